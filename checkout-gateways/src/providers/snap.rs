//! SNAP B2B plumbing shared by providers on the Indonesian open-API standard:
//! an RSA-signed client-credentials token and HMAC-SHA512 request signatures.

use chrono::{DateTime, Utc};
use reqwest::Method;
use serde::{Deserialize, Serialize};
use std::time::Duration;

use checkout_types::GatewayError;

use crate::callback::CallbackReply;
use crate::http::{self, ProviderResponse};
use crate::signing::{AccessToken, RsaSigner, SymmetricSigner, TokenCache};

pub const TOKEN_PATH: &str = "/snap/v1.0/access-token/b2b";
const DEFAULT_TOKEN_TTL: u64 = 900;

/// Formats `X-TIMESTAMP` values for one provider.
pub type TimestampFormat = fn(DateTime<Utc>) -> String;

/// `{"value":"10000.00","currency":"IDR"}`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct SnapAmount {
    #[serde(default)]
    pub value: String,
    #[serde(default)]
    pub currency: String,
}

impl SnapAmount {
    pub fn idr(amount: i64) -> Self {
        Self {
            value: format!("{}.00", amount),
            currency: "IDR".to_string(),
        }
    }

    /// Whole rupiah; fractional digits are dropped.
    pub fn minor(&self) -> Option<i64> {
        let whole = self.value.trim().split('.').next()?;
        whole.parse().ok()
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct TokenResponse {
    #[serde(default)]
    response_code: String,
    #[serde(default)]
    response_message: String,
    #[serde(default)]
    access_token: String,
    #[serde(default)]
    expires_in: Option<serde_json::Value>,
}

/// Envelope fields every SNAP reply carries.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SnapStatus {
    #[serde(default)]
    pub response_code: String,
    #[serde(default)]
    pub response_message: String,
}

impl SnapStatus {
    /// `Rejected` unless the reply carries `expected`.
    pub fn ensure(&self, gateway: &str, expected: &str) -> Result<(), GatewayError> {
        if self.response_code == expected {
            return Ok(());
        }
        Err(GatewayError::rejected(
            gateway,
            &self.response_code,
            &self.response_message,
        ))
    }
}

pub struct SnapClient {
    gateway: String,
    http: reqwest::Client,
    base_url: String,
    client_key: String,
    partner_id: String,
    token_signer: RsaSigner,
    request_signer: SymmetricSigner,
    tokens: TokenCache,
    timestamp: TimestampFormat,
    /// Token replies must carry this code when set.
    token_code: Option<&'static str>,
}

impl SnapClient {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        gateway: &str,
        base_url: &str,
        client_key: &str,
        client_secret: &str,
        partner_id: &str,
        token_signer: RsaSigner,
        timestamp: TimestampFormat,
        token_code: Option<&'static str>,
    ) -> Result<Self, GatewayError> {
        Ok(Self {
            gateway: gateway.to_string(),
            http: http::build_client(gateway)?,
            base_url: http::base_url(base_url),
            client_key: client_key.to_string(),
            partner_id: partner_id.to_string(),
            token_signer,
            request_signer: SymmetricSigner::sha512_base64(client_secret)
                .map_err(|e| GatewayError::config(gateway, e))?,
            tokens: TokenCache::default(),
            timestamp,
            token_code,
        })
    }

    pub fn partner_id(&self) -> &str {
        &self.partner_id
    }

    pub fn request_signer(&self) -> &SymmetricSigner {
        &self.request_signer
    }

    pub async fn access_token(&self) -> Result<String, GatewayError> {
        self.tokens.get_or_refresh(|| self.fetch_token()).await
    }

    async fn fetch_token(&self) -> Result<AccessToken, GatewayError> {
        tracing::info!(gateway = %self.gateway, "Fetching access token");
        let timestamp = (self.timestamp)(Utc::now());
        let signature = self
            .token_signer
            .sign_b64(&format!("{}|{}", self.client_key, timestamp))?;

        let request = self
            .http
            .post(format!("{}{}", self.base_url, TOKEN_PATH))
            .header("Content-Type", "application/json")
            .header("X-CLIENT-KEY", &self.client_key)
            .header("X-TIMESTAMP", &timestamp)
            .header("X-SIGNATURE", signature)
            .json(&serde_json::json!({ "grantType": "client_credentials" }));

        let response = http::send(&self.gateway, request).await?;
        let token: TokenResponse = response.json()?;
        if self.token_code.is_some_and(|code| token.response_code != code) {
            return Err(GatewayError::rejected(
                &self.gateway,
                token.response_code,
                token.response_message,
            ));
        }
        if token.access_token.is_empty() {
            return Err(GatewayError::rejected(
                &self.gateway,
                token.response_code,
                format!("no access token: {}", token.response_message),
            ));
        }
        Ok(AccessToken {
            value: token.access_token,
            expires_in: Duration::from_secs(parse_expires_in(token.expires_in.as_ref())),
        })
    }

    /// Sends a token-authenticated, HMAC-signed JSON call.
    pub async fn call(
        &self,
        method: Method,
        path: &str,
        body: &serde_json::Value,
        channel_id: &str,
    ) -> Result<ProviderResponse, GatewayError> {
        let token = self.access_token().await?;
        let timestamp = (self.timestamp)(Utc::now());
        let payload = serde_json::to_vec(body)
            .map_err(|e| GatewayError::signing(&self.gateway, e))?;
        let signature = self.request_signer.sign_request(
            method.as_str(),
            path,
            Some(&token),
            &payload,
            &timestamp,
        );

        let request = self
            .http
            .request(method, format!("{}{}", self.base_url, path))
            .header("Content-Type", "application/json")
            .header("Authorization", format!("Bearer {}", token))
            .header("X-TIMESTAMP", &timestamp)
            .header("X-SIGNATURE", signature)
            .header("X-PARTNER-ID", &self.partner_id)
            .header("CHANNEL-ID", channel_id)
            .header("X-EXTERNAL-ID", external_id())
            .body(payload);

        let response = http::send(&self.gateway, request).await?;
        if response.status == reqwest::StatusCode::UNAUTHORIZED {
            self.tokens.invalidate().await;
        }
        Ok(response)
    }
}

fn parse_expires_in(value: Option<&serde_json::Value>) -> u64 {
    match value {
        Some(serde_json::Value::Number(n)) => n.as_u64().unwrap_or(DEFAULT_TOKEN_TTL),
        Some(serde_json::Value::String(s)) => s.trim().parse().unwrap_or(DEFAULT_TOKEN_TTL),
        _ => DEFAULT_TOKEN_TTL,
    }
}

/// Private key from inline PEM, else from a file path.
pub fn load_signer(
    gateway: &str,
    pem: Option<&str>,
    path: Option<&std::path::Path>,
) -> Result<RsaSigner, GatewayError> {
    match (pem.filter(|p| !p.trim().is_empty()), path) {
        (Some(pem), _) => RsaSigner::from_pem(gateway, pem),
        (None, Some(path)) => RsaSigner::from_file(gateway, path),
        (None, None) => Err(GatewayError::config(gateway, "private key is not configured")),
    }
}

/// `{responseCode, responseMessage}` with the HTTP status taken from the
/// first three digits of the code.
pub fn reply(code: &str, message: &str) -> CallbackReply {
    let status = code
        .get(..3)
        .and_then(|s| s.parse::<u16>().ok())
        .filter(|s| (200..600).contains(s))
        .unwrap_or(500);
    CallbackReply::new(
        status,
        serde_json::json!({ "responseCode": code, "responseMessage": message }),
    )
}

/// Unique per-request `X-EXTERNAL-ID`.
pub fn external_id() -> String {
    let nanos = crate::signing::timestamp::nanos(Utc::now());
    let salt = uuid::Uuid::new_v4().as_u128() % 1_000;
    format!("{}{:03}", nanos, salt)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_amount_format() {
        let amount = SnapAmount::idr(94_000);
        assert_eq!(amount.value, "94000.00");
        assert_eq!(amount.minor(), Some(94_000));
        assert_eq!(SnapAmount::default().minor(), None);
    }

    #[test]
    fn test_expires_in_accepts_string_or_number() {
        assert_eq!(parse_expires_in(Some(&serde_json::json!("899"))), 899);
        assert_eq!(parse_expires_in(Some(&serde_json::json!(600))), 600);
        assert_eq!(parse_expires_in(None), DEFAULT_TOKEN_TTL);
    }

    #[test]
    fn test_reply_status_follows_code() {
        assert_eq!(reply("2003400", "Successful").status, 200);
        assert_eq!(reply("4013400", "Unauthorized").status, 401);
        assert_eq!(reply("5003400", "General Error").status, 500);
        assert_eq!(reply("x", "?").status, 500);
    }

    #[test]
    fn test_load_signer_requires_a_source() {
        let err = load_signer("BRI_DIRECT", None, None).unwrap_err();
        assert!(matches!(err, GatewayError::Config { .. }));
        let pem = include_str!("../../testdata/test_private_pkcs8.pem");
        assert!(load_signer("BRI_DIRECT", Some(pem), None).is_ok());
    }

    #[test]
    fn test_status_ensure() {
        let status = SnapStatus {
            response_code: "4002701".into(),
            response_message: "Invalid Field Format".into(),
        };
        let err = status.ensure("BRI_DIRECT", "2002700").unwrap_err();
        assert!(matches!(err, GatewayError::Rejected { ref code, .. } if code == "4002701"));
    }
}
