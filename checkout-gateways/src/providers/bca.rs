//! BCA direct virtual accounts.

use std::collections::BTreeSet;
use std::time::Duration;

use chrono::Utc;
use reqwest::Method;
use serde::Deserialize;

use checkout_types::domain::clock::to_wib;
use checkout_types::{
    CallbackError, CallbackEvent, CallbackReference, GatewayError, Instrument, PaymentGateway,
    PaymentInstrument, PaymentLookup, PaymentRequest, PaymentStatus, StatusMap,
};

use super::instructions;
use crate::callback::{Ack, CallbackReply, InboundCallback, WebhookProtocol};
use crate::http;
use crate::signing::symmetric::{minify, sha256_hex};
use crate::signing::{AccessToken, SymmetricSigner, TokenCache, snap_timestamp, verify};

pub const NAME: &str = "BCA_DIRECT";
pub const SANDBOX_URL: &str = "https://sandbox.bca.co.id";

const TOKEN_PATH: &str = "/api/oauth/token";
const PAYMENTS_PATH: &str = "/va/payments";

#[derive(Debug, Clone, Default)]
pub struct BcaConfig {
    pub base_url: String,
    pub client_id: String,
    pub client_secret: String,
    pub api_key: String,
    pub api_secret: String,
    pub company_code: String,
    pub status_overrides: Option<String>,
}

pub struct BcaClient {
    http: reqwest::Client,
    base_url: String,
    config: BcaConfig,
    signer: SymmetricSigner,
    tokens: TokenCache,
    channels: BTreeSet<String>,
    statuses: StatusMap,
}

/// `METHOD:path:token:sha256hex(minify(body)):timestamp`. An empty body still
/// hashes, unlike the SNAP layout.
fn string_to_sign(method: &str, path: &str, token: &str, body: &[u8], timestamp: &str) -> String {
    format!(
        "{}:{}:{}:{}:{}",
        method,
        path,
        token,
        sha256_hex(&minify(body)),
        timestamp
    )
}

impl BcaClient {
    pub fn new(config: BcaConfig) -> Result<Self, GatewayError> {
        for (field, value) in [
            ("client id", &config.client_id),
            ("client secret", &config.client_secret),
            ("api key", &config.api_key),
            ("api secret", &config.api_secret),
            ("company code", &config.company_code),
        ] {
            if value.trim().is_empty() {
                return Err(GatewayError::config(NAME, format!("{} is required", field)));
            }
        }
        let mut statuses = default_statuses();
        if let Some(overrides) = &config.status_overrides {
            statuses
                .apply_overrides(overrides)
                .map_err(|e| GatewayError::config(NAME, e))?;
        }
        let base_url = if config.base_url.is_empty() {
            SANDBOX_URL.to_string()
        } else {
            http::base_url(&config.base_url)
        };
        Ok(Self {
            http: http::build_client(NAME)?,
            base_url,
            signer: SymmetricSigner::sha256_hex(&config.api_secret)
                .map_err(|e| GatewayError::config(NAME, e))?,
            config,
            tokens: TokenCache::default(),
            channels: ["VA_BCA", "BCA_VA"].into_iter().map(String::from).collect(),
            statuses,
        })
    }

    pub fn webhook(&self) -> BcaWebhook {
        BcaWebhook {
            signer: self.signer.clone(),
            statuses: self.statuses.clone(),
        }
    }

    async fn access_token(&self) -> Result<String, GatewayError> {
        self.tokens.get_or_refresh(|| self.fetch_token()).await
    }

    async fn fetch_token(&self) -> Result<AccessToken, GatewayError> {
        #[derive(Deserialize)]
        struct TokenResponse {
            #[serde(default)]
            access_token: String,
            #[serde(default)]
            expires_in: u64,
        }

        let request = self
            .http
            .post(format!("{}{}", self.base_url, TOKEN_PATH))
            .basic_auth(&self.config.client_id, Some(&self.config.client_secret))
            .header("Content-Type", "application/x-www-form-urlencoded")
            .body("grant_type=client_credentials");
        let response = http::send(NAME, request).await?;
        if !response.is_success() {
            return Err(GatewayError::rejected(
                NAME,
                response.status.as_str(),
                http::truncate(&response.body, 200),
            ));
        }
        let token: TokenResponse = response.json()?;
        if token.access_token.is_empty() {
            return Err(GatewayError::protocol(NAME, "token response carries no access_token"));
        }
        Ok(AccessToken {
            value: token.access_token,
            expires_in: Duration::from_secs(if token.expires_in == 0 { 3600 } else { token.expires_in }),
        })
    }

    async fn call(
        &self,
        method: Method,
        path: &str,
        body: Option<&serde_json::Value>,
    ) -> Result<http::ProviderResponse, GatewayError> {
        let token = self.access_token().await?;
        let timestamp = snap_timestamp(Utc::now());
        let payload = match body {
            Some(body) => serde_json::to_vec(body).map_err(|e| GatewayError::signing(NAME, e))?,
            None => Vec::new(),
        };
        let signature = self
            .signer
            .sign(&string_to_sign(method.as_str(), path, &token, &payload, &timestamp));

        let mut request = self
            .http
            .request(method, format!("{}{}", self.base_url, path))
            .bearer_auth(&token)
            .header("Content-Type", "application/json")
            .header("X-BCA-Key", &self.config.api_key)
            .header("X-BCA-Timestamp", &timestamp)
            .header("X-BCA-Signature", signature);
        if !payload.is_empty() {
            request = request.body(payload);
        }
        let response = http::send(NAME, request).await?;
        if response.status == reqwest::StatusCode::UNAUTHORIZED {
            self.tokens.invalidate().await;
        }
        Ok(response)
    }
}

fn default_statuses() -> StatusMap {
    StatusMap::new(PaymentStatus::Pending)
        .with("Y", PaymentStatus::Paid)
        .with("E", PaymentStatus::Expired)
        .with("N", PaymentStatus::Pending)
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct ErrorMessage {
    #[serde(default)]
    english: String,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct VirtualAccountData {
    #[serde(default)]
    virtual_account_number: String,
    #[serde(default)]
    virtual_account_name: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct BcaResponse {
    #[serde(default)]
    error_code: String,
    #[serde(default)]
    error_message: ErrorMessage,
    #[serde(default)]
    virtual_account_data: VirtualAccountData,
    #[serde(default)]
    payment_flag_status: String,
}

impl BcaResponse {
    fn ensure(&self) -> Result<(), GatewayError> {
        if self.error_code.is_empty() || self.error_code == "0" {
            return Ok(());
        }
        Err(GatewayError::rejected(NAME, &self.error_code, &self.error_message.english))
    }
}

#[async_trait::async_trait]
impl PaymentGateway for BcaClient {
    fn name(&self) -> &str {
        NAME
    }

    fn supported_channels(&self) -> &BTreeSet<String> {
        &self.channels
    }

    async fn create_payment(&self, request: &PaymentRequest) -> Result<PaymentInstrument, GatewayError> {
        let now = Utc::now();
        let expires_at = request.expires_at(now);
        let body = serde_json::json!({
            "CompanyCode": self.config.company_code,
            "CustomerPhone": request.customer_phone.clone().unwrap_or_default(),
            "PrimaryID": request.reference,
            "SecondaryID": "",
            "CustomerName": request.display_name(),
            "CurrencyCode": "IDR",
            "TotalAmount": format!("{}.00", request.amount),
            "AdditionalInfo": request.description,
            "RequestDate": to_wib(now).format("%Y-%m-%d").to_string(),
            "ExpiredDate": to_wib(expires_at).format("%Y-%m-%d").to_string(),
        });

        tracing::info!(reference = %request.reference, "Creating BCA virtual account");
        let response = self.call(Method::POST, PAYMENTS_PATH, Some(&body)).await?;
        let created: BcaResponse = response.json()?;
        created.ensure()?;
        let data = created.virtual_account_data;
        if data.virtual_account_number.is_empty() {
            return Err(GatewayError::protocol(NAME, "response carries no VirtualAccountNumber"));
        }

        Ok(PaymentInstrument {
            gateway: NAME.to_string(),
            gateway_ref: data.virtual_account_number.clone(),
            instructions: instructions::virtual_account("BCA", &data.virtual_account_number),
            instrument: Instrument::VirtualAccount {
                number: data.virtual_account_number,
                bank_code: "BCA".to_string(),
                account_name: data.virtual_account_name,
            },
            fee: request.fee,
            total: request.amount,
            expires_at,
        })
    }

    async fn check_status(&self, lookup: &PaymentLookup) -> Result<PaymentStatus, GatewayError> {
        let path = format!("{}/{}", PAYMENTS_PATH, urlencoding::encode(&lookup.gateway_ref));
        let response = self.call(Method::GET, &path, None).await?;
        let status: BcaResponse = response.json()?;
        status.ensure()?;
        Ok(self.statuses.map(&status.payment_flag_status))
    }

    async fn health_check(&self) -> Result<(), GatewayError> {
        self.access_token().await.map(|_| ())
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Payment flag notification
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct Notification {
    #[serde(default)]
    virtual_account_number: String,
    #[serde(default)]
    company_code: String,
    #[serde(default)]
    customer_number: String,
    #[serde(default)]
    payment_flag_status: String,
    #[serde(default)]
    paid_amount: String,
}

pub struct BcaWebhook {
    signer: SymmetricSigner,
    statuses: StatusMap,
}

impl WebhookProtocol for BcaWebhook {
    fn gateway(&self) -> &str {
        NAME
    }

    fn parse_callback(&self, callback: &InboundCallback<'_>) -> Result<CallbackEvent, CallbackError> {
        let signature = callback.require_header("x-bca-signature")?;
        let timestamp = callback.require_header("x-bca-timestamp")?;
        let token = callback.bearer_token().unwrap_or_default();
        let message = string_to_sign(callback.method, callback.path, token, callback.body, timestamp);
        if !verify::verify_digest_hex(&self.signer.sign(&message), signature) {
            return Err(CallbackError::InvalidSignature);
        }

        let notification: Notification = callback.json()?;
        let va = if notification.virtual_account_number.is_empty() {
            format!("{}{}", notification.company_code, notification.customer_number)
        } else {
            notification.virtual_account_number
        };
        if va.trim().is_empty() {
            return Err(CallbackError::MissingReference);
        }
        let paid_amount = notification
            .paid_amount
            .split('.')
            .next()
            .and_then(|v| v.trim().parse().ok());

        Ok(CallbackEvent {
            gateway: NAME.to_string(),
            reference: CallbackReference::GatewayRef(va),
            status: self.statuses.map(&notification.payment_flag_status),
            paid_amount,
            provider_status: notification.payment_flag_status,
            received_at: Utc::now(),
        })
    }

    fn acknowledge(&self, ack: Ack) -> CallbackReply {
        let (status, code, english, indonesian) = match ack {
            a if a.is_success() => (200, "0", "Success", "Sukses"),
            Ack::InvalidSignature => (401, "ESB-14-009", "Unauthorized", "Tidak berhak"),
            _ => (500, "ESB-99-999", "General error", "Kesalahan umum"),
        };
        CallbackReply::new(
            status,
            serde_json::json!({
                "ErrorCode": code,
                "ErrorMessage": { "Indonesian": indonesian, "English": english },
            }),
        )
    }
}
