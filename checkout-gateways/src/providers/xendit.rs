//! Xendit: fixed virtual accounts and retail outlet payment codes.

use std::collections::BTreeSet;

use chrono::Utc;
use serde::Deserialize;

use checkout_types::{
    CallbackError, CallbackEvent, CallbackReference, GatewayError, Instrument, PaymentGateway,
    PaymentInstrument, PaymentLookup, PaymentRequest, PaymentStatus, StatusMap,
};

use super::instructions;
use crate::callback::{self, Ack, CallbackReply, InboundCallback, WebhookProtocol};
use crate::http::{self, ProviderResponse};
use crate::signing::timestamp::parse_rfc3339;
use crate::signing::verify;

pub const NAME: &str = "XENDIT";
pub const BASE_URL: &str = "https://api.xendit.co";

const API_VERSION: &str = "2024-11-11";
const RETAIL_CHANNELS: [&str; 2] = ["ALFAMART", "INDOMARET"];

#[derive(Debug, Clone, Default)]
pub struct XenditConfig {
    pub base_url: String,
    pub secret_key: String,
    pub callback_token: String,
    pub status_overrides: Option<String>,
}

pub struct XenditClient {
    http: reqwest::Client,
    base_url: String,
    secret_key: String,
    callback_token: String,
    channels: BTreeSet<String>,
    va_statuses: StatusMap,
    request_statuses: StatusMap,
}

impl XenditClient {
    pub fn new(config: XenditConfig) -> Result<Self, GatewayError> {
        if config.secret_key.trim().is_empty() {
            return Err(GatewayError::config(NAME, "secret key is required"));
        }
        if config.callback_token.trim().is_empty() {
            return Err(GatewayError::config(NAME, "callback token is required"));
        }
        let mut request_statuses = StatusMap::new(PaymentStatus::Pending)
            .with("SUCCEEDED", PaymentStatus::Paid)
            .with("FAILED", PaymentStatus::Failed)
            .with("EXPIRED", PaymentStatus::Expired)
            .with("CANCELED", PaymentStatus::Failed)
            .with("PENDING", PaymentStatus::Pending)
            .with("REQUIRES_ACTION", PaymentStatus::Pending);
        if let Some(overrides) = &config.status_overrides {
            request_statuses
                .apply_overrides(overrides)
                .map_err(|e| GatewayError::config(NAME, e))?;
        }
        let va_statuses = StatusMap::new(PaymentStatus::Pending)
            .with("ACTIVE", PaymentStatus::Pending)
            .with("PENDING", PaymentStatus::Pending)
            .with("INACTIVE", PaymentStatus::Expired);

        let channels = [
            "VA_BRI", "BRI_VA", "VA_BCA", "BCA_VA", "VA_BNI", "BNI_VA", "VA_PERMATA", "PERMATA_VA",
            "VA_MANDIRI", "MANDIRI_VA", "VA_CIMB", "CIMB_VA", "ALFAMART", "INDOMARET",
        ]
        .into_iter()
        .map(String::from)
        .collect();

        Ok(Self {
            http: http::build_client(NAME)?,
            base_url: if config.base_url.is_empty() {
                BASE_URL.to_string()
            } else {
                http::base_url(&config.base_url)
            },
            secret_key: config.secret_key,
            callback_token: config.callback_token,
            channels,
            va_statuses,
            request_statuses,
        })
    }

    pub fn webhook(&self) -> XenditWebhook {
        XenditWebhook {
            callback_token: self.callback_token.clone(),
            statuses: self.request_statuses.clone(),
        }
    }

    fn get(&self, path: &str) -> reqwest::RequestBuilder {
        self.http
            .get(format!("{}{}", self.base_url, path))
            .basic_auth(&self.secret_key, Some(""))
    }

    fn post(&self, path: &str) -> reqwest::RequestBuilder {
        self.http
            .post(format!("{}{}", self.base_url, path))
            .basic_auth(&self.secret_key, Some(""))
    }

    async fn create_virtual_account(
        &self,
        request: &PaymentRequest,
        bank: &'static str,
    ) -> Result<PaymentInstrument, GatewayError> {
        let expires_at = request.expires_at(Utc::now());
        let body = serde_json::json!({
            "external_id": request.reference,
            "bank_code": bank,
            "name": request.display_name(),
            "expected_amount": request.amount,
            "expiration_date": expires_at.to_rfc3339(),
            "is_closed": true,
            "is_single_use": true,
        });
        let response = http::send(NAME, self.post("/callback_virtual_accounts").json(&body)).await?;
        let va: VirtualAccount = parse(&response)?;
        let number = format!("{}{}", va.merchant_code, va.account_number);
        Ok(PaymentInstrument {
            gateway: NAME.to_string(),
            gateway_ref: va.id,
            instructions: instructions::virtual_account(bank, &number),
            instrument: Instrument::VirtualAccount {
                number,
                bank_code: if va.bank_code.is_empty() { bank.to_string() } else { va.bank_code },
                account_name: va.name,
            },
            fee: request.fee,
            total: request.amount,
            expires_at,
        })
    }

    async fn create_retail_code(
        &self,
        request: &PaymentRequest,
        outlet: &str,
    ) -> Result<PaymentInstrument, GatewayError> {
        let description: String = request.description.chars().take(100).collect();
        let body = serde_json::json!({
            "reference_id": request.reference,
            "type": "PAY",
            "country": "ID",
            "currency": "IDR",
            "request_amount": request.amount,
            "channel_code": outlet,
            "channel_properties": { "payer_name": request.display_name() },
            "description": description,
        });
        let response = http::send(
            NAME,
            self.post("/v3/payment_requests")
                .header("api-version", API_VERSION)
                .json(&body),
        )
        .await?;
        let created: PaymentRequestResponse = parse(&response)?;
        let code = created
            .actions
            .iter()
            .find(|a| a.kind == "PRESENT_TO_CUSTOMER" && a.descriptor == "PAYMENT_CODE")
            .map(|a| a.value.clone())
            .ok_or_else(|| GatewayError::protocol(NAME, "response carries no payment code"))?;
        let expires_at = created
            .channel_properties
            .and_then(|p| p.expires_at)
            .and_then(|at| parse_rfc3339(&at))
            .unwrap_or_else(|| request.expires_at(Utc::now()));

        Ok(PaymentInstrument {
            gateway: NAME.to_string(),
            gateway_ref: created.payment_request_id,
            instructions: instructions::retail(outlet, &code),
            instrument: Instrument::RetailCode { code },
            fee: request.fee,
            total: request.amount,
            expires_at,
        })
    }
}

fn bank_code(channel: &str) -> Option<&'static str> {
    let bank = channel
        .strip_prefix("VA_")
        .or_else(|| channel.strip_suffix("_VA"))?;
    match bank {
        "BRI" => Some("BRI"),
        "BCA" => Some("BCA"),
        "BNI" => Some("BNI"),
        "PERMATA" => Some("PERMATA"),
        "MANDIRI" => Some("MANDIRI"),
        "CIMB" => Some("CIMB"),
        _ => None,
    }
}

#[derive(Debug, Default, Deserialize)]
struct ApiError {
    #[serde(default)]
    error_code: String,
    #[serde(default)]
    message: String,
}

/// Xendit reports business failures as `{error_code, message}`, usually on 4xx.
fn parse<T: serde::de::DeserializeOwned>(response: &ProviderResponse) -> Result<T, GatewayError> {
    let error: ApiError = serde_json::from_str(&response.body).unwrap_or_default();
    if !error.error_code.is_empty() {
        return Err(GatewayError::rejected(NAME, error.error_code, error.message));
    }
    if !response.is_success() {
        return Err(GatewayError::rejected(
            NAME,
            response.status.as_str(),
            http::truncate(&response.body, 200),
        ));
    }
    response.json()
}

#[derive(Debug, Deserialize)]
struct VirtualAccount {
    id: String,
    #[serde(default)]
    bank_code: String,
    #[serde(default)]
    merchant_code: String,
    #[serde(default)]
    account_number: String,
    #[serde(default)]
    name: String,
    #[serde(default)]
    status: String,
}

#[derive(Debug, Deserialize)]
struct Action {
    #[serde(rename = "type", default)]
    kind: String,
    #[serde(default)]
    descriptor: String,
    #[serde(default)]
    value: String,
}

#[derive(Debug, Deserialize)]
struct ChannelProperties {
    expires_at: Option<String>,
}

#[derive(Debug, Deserialize)]
struct PaymentRequestResponse {
    payment_request_id: String,
    #[serde(default)]
    status: String,
    #[serde(default)]
    actions: Vec<Action>,
    channel_properties: Option<ChannelProperties>,
}

#[async_trait::async_trait]
impl PaymentGateway for XenditClient {
    fn name(&self) -> &str {
        NAME
    }

    fn supported_channels(&self) -> &BTreeSet<String> {
        &self.channels
    }

    async fn create_payment(&self, request: &PaymentRequest) -> Result<PaymentInstrument, GatewayError> {
        let channel = request.channel.to_ascii_uppercase();
        tracing::info!(reference = %request.reference, channel = %channel, "Creating Xendit payment");
        if let Some(outlet) = RETAIL_CHANNELS.iter().find(|c| **c == channel) {
            return self.create_retail_code(request, outlet).await;
        }
        let bank = bank_code(&channel)
            .ok_or_else(|| GatewayError::UnsupportedChannel(request.channel.clone()))?;
        self.create_virtual_account(request, bank).await
    }

    /// Payment requests carry a `pr-` id; everything else is a virtual account.
    async fn check_status(&self, lookup: &PaymentLookup) -> Result<PaymentStatus, GatewayError> {
        let id = urlencoding::encode(&lookup.gateway_ref);
        if lookup.gateway_ref.starts_with("pr-") {
            let response = http::send(
                NAME,
                self.get(&format!("/v3/payment_requests/{}", id))
                    .header("api-version", API_VERSION),
            )
            .await?;
            let pr: PaymentRequestResponse = parse(&response)?;
            return Ok(self.request_statuses.map(&pr.status));
        }
        let response = http::send(NAME, self.get(&format!("/callback_virtual_accounts/{}", id))).await?;
        let va: VirtualAccount = parse(&response)?;
        Ok(self.va_statuses.map(&va.status))
    }

    async fn health_check(&self) -> Result<(), GatewayError> {
        let response = http::send(NAME, self.get("/balance")).await?;
        if response.status != reqwest::StatusCode::OK {
            return Err(GatewayError::rejected(
                NAME,
                response.status.as_str(),
                "balance check failed",
            ));
        }
        Ok(())
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Callbacks
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Default, Deserialize)]
struct RequestData {
    #[serde(default)]
    reference_id: String,
    #[serde(default)]
    status: String,
    request_amount: Option<f64>,
}

/// Either a payment request event or a virtual account payment.
#[derive(Debug, Deserialize)]
struct Notification {
    #[serde(default)]
    event: String,
    data: Option<RequestData>,
    #[serde(default)]
    external_id: String,
    amount: Option<f64>,
}

pub struct XenditWebhook {
    callback_token: String,
    statuses: StatusMap,
}

impl WebhookProtocol for XenditWebhook {
    fn gateway(&self) -> &str {
        NAME
    }

    fn parse_callback(&self, callback: &InboundCallback<'_>) -> Result<CallbackEvent, CallbackError> {
        let token = callback.require_header("x-callback-token")?;
        if !verify::verify_token(&self.callback_token, token) {
            return Err(CallbackError::InvalidSignature);
        }

        let notification: Notification = callback.json()?;
        let (reference, status, provider_status, amount) = match notification.data {
            Some(data) if !notification.event.is_empty() => {
                let status = self.statuses.map(&data.status);
                (data.reference_id, status, data.status, data.request_amount)
            }
            _ => (
                notification.external_id,
                PaymentStatus::Paid,
                "PAID".to_string(),
                notification.amount,
            ),
        };
        if reference.trim().is_empty() {
            return Err(CallbackError::MissingReference);
        }

        Ok(CallbackEvent {
            gateway: NAME.to_string(),
            reference: CallbackReference::Invoice(reference),
            status,
            paid_amount: amount.map(|a| a.round() as i64),
            provider_status,
            received_at: Utc::now(),
        })
    }

    fn acknowledge(&self, ack: Ack) -> CallbackReply {
        callback::simple_reply(ack)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use reqwest::header::{HeaderMap, HeaderValue};

    fn webhook() -> XenditWebhook {
        XenditClient::new(XenditConfig {
            secret_key: "xnd_development_x".into(),
            callback_token: "cb-token".into(),
            ..Default::default()
        })
        .unwrap()
        .webhook()
    }

    fn headers(token: &'static str) -> HeaderMap {
        let mut headers = HeaderMap::new();
        headers.insert("x-callback-token", HeaderValue::from_static(token));
        headers
    }

    fn parse(webhook: &XenditWebhook, token: &'static str, body: &[u8]) -> Result<CallbackEvent, CallbackError> {
        let headers = headers(token);
        webhook.parse_callback(&InboundCallback {
            method: "POST",
            path: "/webhooks/XENDIT",
            headers: &headers,
            body,
        })
    }

    #[test]
    fn test_bank_codes() {
        assert_eq!(bank_code("VA_BRI"), Some("BRI"));
        assert_eq!(bank_code("MANDIRI_VA"), Some("MANDIRI"));
        assert_eq!(bank_code("VA_BSI"), None);
        assert_eq!(bank_code("QRIS"), None);
    }

    #[test]
    fn test_callback_token_is_required() {
        let webhook = webhook();
        let err = parse(&webhook, "wrong", br#"{"external_id":"INV1","amount":1000}"#).unwrap_err();
        assert_eq!(err, CallbackError::InvalidSignature);
    }

    #[test]
    fn test_virtual_account_payment() {
        let event = parse(&webhook(), "cb-token", br#"{"external_id":"INV1","amount":94000,"payment_id":"p1"}"#).unwrap();
        assert_eq!(event.status, PaymentStatus::Paid);
        assert_eq!(event.reference, CallbackReference::Invoice("INV1".into()));
        assert_eq!(event.paid_amount, Some(94_000));
    }

    #[test]
    fn test_payment_request_event() {
        let body = br#"{"event":"payment.capture","data":{"reference_id":"INV2","status":"SUCCEEDED","request_amount":25000}}"#;
        let event = parse(&webhook(), "cb-token", body).unwrap();
        assert_eq!(event.status, PaymentStatus::Paid);
        assert_eq!(event.provider_status, "SUCCEEDED");

        let body = br#"{"event":"payment.failure","data":{"reference_id":"INV2","status":"FAILED"}}"#;
        assert_eq!(parse(&webhook(), "cb-token", body).unwrap().status, PaymentStatus::Failed);
    }

    #[test]
    fn test_missing_reference() {
        let err = parse(&webhook(), "cb-token", br#"{"amount":1}"#).unwrap_err();
        assert_eq!(err, CallbackError::MissingReference);
    }

    #[test]
    fn test_error_body_is_rejection() {
        let response = ProviderResponse {
            gateway: NAME.into(),
            status: reqwest::StatusCode::BAD_REQUEST,
            body: r#"{"error_code":"DUPLICATE_CALLBACK_VIRTUAL_ACCOUNT_ERROR","message":"duplicate"}"#.into(),
        };
        let err = super::parse::<VirtualAccount>(&response).unwrap_err();
        assert!(matches!(err, GatewayError::Rejected { ref code, .. } if code == "DUPLICATE_CALLBACK_VIRTUAL_ACCOUNT_ERROR"));
    }
}
