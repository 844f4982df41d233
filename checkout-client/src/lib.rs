//! # Checkout Client SDK
//!
//! A typed Rust client for the checkout order and gateway administration API.

use checkout_types::{
    BalanceResponse, CreateDepositRequest, CreateOrderRequest, FulfillmentRequest,
    GatewayHealthResponse, LedgerResponse, OrderView, QuoteRequest, QuoteResponse, RouteView,
    SetRouteRequest,
};
use reqwest::Client;
use serde::de::DeserializeOwned;

/// Error type for client operations.
#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("API error: {status} - {message}")]
    Api {
        status: u16,
        message: String,
        /// Machine-readable code, e.g. `INSUFFICIENT_BALANCE`.
        reason: Option<String>,
    },

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl ClientError {
    /// True when the server asked the caller to retry later.
    pub fn is_retryable(&self) -> bool {
        matches!(self, ClientError::Api { status: 429 | 503, .. })
    }
}

/// Checkout API client.
pub struct CheckoutClient {
    base_url: String,
    http: Client,
}

impl CheckoutClient {
    /// Creates a new client.
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            http: Client::new(),
        }
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Checks if the API is healthy.
    pub async fn health(&self) -> Result<bool, ClientError> {
        let resp = self
            .http
            .get(format!("{}/health", self.base_url))
            .send()
            .await?;
        Ok(resp.status().is_success())
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Orders
    // ─────────────────────────────────────────────────────────────────────────

    pub async fn quote(&self, req: &QuoteRequest) -> Result<QuoteResponse, ClientError> {
        self.post("/api/orders/quote", req).await
    }

    pub async fn create_order(&self, req: &CreateOrderRequest) -> Result<OrderView, ClientError> {
        self.post("/api/orders", req).await
    }

    pub async fn get_order(&self, invoice: &str) -> Result<OrderView, ClientError> {
        self.get(&format!("/api/orders/{}", invoice)).await
    }

    /// Asks the server to check the payment status with the gateway now.
    pub async fn poll_order(&self, invoice: &str) -> Result<OrderView, ClientError> {
        self.post(&format!("/api/orders/{}/poll", invoice), &serde_json::json!({}))
            .await
    }

    pub async fn cancel_order(&self, invoice: &str) -> Result<OrderView, ClientError> {
        self.post(&format!("/api/orders/{}/cancel", invoice), &serde_json::json!({}))
            .await
    }

    pub async fn fulfill_order(
        &self,
        invoice: &str,
        success: bool,
        message: Option<String>,
    ) -> Result<OrderView, ClientError> {
        let req = FulfillmentRequest { success, message };
        self.post(&format!("/api/orders/{}/fulfillment", invoice), &req)
            .await
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Wallet
    // ─────────────────────────────────────────────────────────────────────────

    pub async fn create_deposit(
        &self,
        req: &CreateDepositRequest,
    ) -> Result<OrderView, ClientError> {
        self.post("/api/deposits", req).await
    }

    pub async fn balance(&self, user_id: &str) -> Result<BalanceResponse, ClientError> {
        self.get(&format!("/api/users/{}/balance", user_id)).await
    }

    pub async fn ledger(&self, user_id: &str) -> Result<LedgerResponse, ClientError> {
        self.get(&format!("/api/users/{}/ledger", user_id)).await
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Gateway administration
    // ─────────────────────────────────────────────────────────────────────────

    /// Last recorded gateway health; `refresh` checks every gateway first.
    pub async fn gateway_health(&self, refresh: bool) -> Result<GatewayHealthResponse, ClientError> {
        if refresh {
            self.post("/api/gateways/health/check", &serde_json::json!({}))
                .await
        } else {
            self.get("/api/gateways/health").await
        }
    }

    pub async fn routes(&self) -> Result<Vec<RouteView>, ClientError> {
        self.get("/api/routes").await
    }

    pub async fn set_route(
        &self,
        channel: &str,
        primary: &str,
        fallback: Option<&str>,
    ) -> Result<RouteView, ClientError> {
        let req = SetRouteRequest {
            primary: primary.to_string(),
            fallback: fallback.map(String::from),
        };
        let resp = self
            .http
            .put(format!("{}/api/routes/{}", self.base_url, channel))
            .json(&req)
            .send()
            .await?;
        self.handle_response(resp).await
    }

    async fn get<T: DeserializeOwned>(&self, path: &str) -> Result<T, ClientError> {
        let resp = self
            .http
            .get(format!("{}{}", self.base_url, path))
            .send()
            .await?;
        self.handle_response(resp).await
    }

    async fn post<T: DeserializeOwned, B: serde::Serialize>(
        &self,
        path: &str,
        body: &B,
    ) -> Result<T, ClientError> {
        let resp = self
            .http
            .post(format!("{}{}", self.base_url, path))
            .json(body)
            .send()
            .await?;
        self.handle_response(resp).await
    }

    async fn handle_response<T: DeserializeOwned>(
        &self,
        resp: reqwest::Response,
    ) -> Result<T, ClientError> {
        let status = resp.status();
        if status.is_success() {
            let body = resp.text().await?;
            Ok(serde_json::from_str(&body)?)
        } else {
            let body = resp.text().await.unwrap_or_default();
            Err(api_error(status.as_u16(), body))
        }
    }
}

fn api_error(status: u16, body: String) -> ClientError {
    let json = serde_json::from_str::<serde_json::Value>(&body).ok();
    let field = |name: &str| {
        json.as_ref()
            .and_then(|v| v.get(name))
            .and_then(|e| e.as_str())
            .map(String::from)
    };
    ClientError::Api {
        status,
        reason: field("reason"),
        message: field("error").unwrap_or(body),
    }
}
