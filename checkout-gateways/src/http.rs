//! Outbound HTTP plumbing shared by the provider clients.

use std::time::Duration;

use reqwest::{RequestBuilder, StatusCode};
use serde::de::DeserializeOwned;

use checkout_types::GatewayError;

/// Upper bound for every provider call. Clients never retry.
pub const PROVIDER_TIMEOUT: Duration = Duration::from_secs(30);

pub fn build_client(gateway: &str) -> Result<reqwest::Client, GatewayError> {
    reqwest::Client::builder()
        .timeout(PROVIDER_TIMEOUT)
        .build()
        .map_err(|e| GatewayError::config(gateway, format!("cannot build HTTP client: {}", e)))
}

/// Status and body of a provider reply that was not a 5xx.
#[derive(Debug, Clone)]
pub struct ProviderResponse {
    pub gateway: String,
    pub status: StatusCode,
    pub body: String,
}

impl ProviderResponse {
    pub fn json<T: DeserializeOwned>(&self) -> Result<T, GatewayError> {
        serde_json::from_str(&self.body).map_err(|e| {
            GatewayError::protocol(
                &self.gateway,
                format!("unparsable response (HTTP {}): {}", self.status, e),
            )
        })
    }

    pub fn is_success(&self) -> bool {
        self.status.is_success()
    }
}

/// Sends the request. Transport failures and 5xx replies are `Transient`:
/// the provider never gave a definitive answer.
pub async fn send(gateway: &str, request: RequestBuilder) -> Result<ProviderResponse, GatewayError> {
    let response = request.send().await.map_err(|e| {
        if e.is_timeout() {
            GatewayError::transient(gateway, "request timed out")
        } else {
            GatewayError::transient(gateway, e)
        }
    })?;
    let status = response.status();
    let body = response
        .text()
        .await
        .map_err(|e| GatewayError::transient(gateway, e))?;

    tracing::debug!(gateway, status = %status, body = %body, "Provider response");

    if status.is_server_error() {
        return Err(GatewayError::transient(
            gateway,
            format!("HTTP {}: {}", status, truncate(&body, 200)),
        ));
    }
    Ok(ProviderResponse {
        gateway: gateway.to_string(),
        status,
        body,
    })
}

pub fn truncate(value: &str, max: usize) -> &str {
    match value.char_indices().nth(max) {
        Some((idx, _)) => &value[..idx],
        None => value,
    }
}

/// Normalizes a base URL so paths can be appended with a leading slash.
pub fn base_url(url: &str) -> String {
    url.trim_end_matches('/').to_string()
}
