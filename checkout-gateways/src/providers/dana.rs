//! DANA payment gateway: hosted checkout and QRIS, RSA-signed SNAP calls.

use std::collections::BTreeSet;
use std::path::PathBuf;

use chrono::Utc;
use serde::Deserialize;

use checkout_types::{
    CallbackError, CallbackEvent, CallbackReference, GatewayError, Instrument, PaymentGateway,
    PaymentInstrument, PaymentLookup, PaymentRequest, PaymentStatus, StatusMap,
};

use super::instructions;
use super::snap::{self, SnapAmount, SnapStatus};
use crate::callback::{Ack, CallbackReply, InboundCallback, WebhookProtocol};
use crate::http;
use crate::signing::{RsaSigner, RsaVerifier, SymmetricSigner, iso_wib, snap_timestamp};

pub const NAME: &str = "DANA_DIRECT";
pub const SANDBOX_URL: &str = "https://api.sandbox.dana.id";

const CREATE_PATH: &str = "/payment-gateway/v1.0/debit/payment-host-to-host.htm";
const STATUS_PATH: &str = "/payment-gateway/v1.0/debit/status.htm";
const QR_IMAGE_URL: &str = "https://api.qrserver.com/v1/create-qr-code/?size=300x300&data=";

#[derive(Debug, Clone, Default)]
pub struct DanaConfig {
    pub base_url: String,
    pub partner_id: String,
    pub merchant_id: String,
    pub shop_id: Option<String>,
    pub channel_id: String,
    pub origin: Option<String>,
    pub private_key_pem: Option<String>,
    pub private_key_path: Option<PathBuf>,
    /// DANA's key, used to verify payment notifications.
    pub public_key_pem: Option<String>,
    pub public_key_path: Option<PathBuf>,
    pub callback_url: Option<String>,
    pub return_url: Option<String>,
    pub mcc: String,
    pub status_overrides: Option<String>,
}

pub struct DanaClient {
    http: reqwest::Client,
    base_url: String,
    config: DanaConfig,
    signer: RsaSigner,
    verifier: std::sync::Arc<RsaVerifier>,
    channels: BTreeSet<String>,
    statuses: StatusMap,
}

impl DanaClient {
    pub fn new(config: DanaConfig) -> Result<Self, GatewayError> {
        if config.partner_id.trim().is_empty() {
            return Err(GatewayError::config(NAME, "partner id is required"));
        }
        if config.merchant_id.trim().is_empty() {
            return Err(GatewayError::config(NAME, "merchant id is required"));
        }
        let signer = snap::load_signer(
            NAME,
            config.private_key_pem.as_deref(),
            config.private_key_path.as_deref(),
        )?;
        let verifier = match (
            config.public_key_pem.as_deref().filter(|p| !p.trim().is_empty()),
            config.public_key_path.as_deref(),
        ) {
            (Some(pem), _) => RsaVerifier::from_pem(NAME, pem)?,
            (None, Some(path)) => RsaVerifier::from_file(NAME, path)?,
            (None, None) => {
                return Err(GatewayError::config(NAME, "DANA public key is not configured"));
            }
        };

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
            config,
            signer,
            verifier: std::sync::Arc::new(verifier),
            channels: ["DANA", "QRIS"].into_iter().map(String::from).collect(),
            statuses,
        })
    }

    pub fn webhook(&self) -> DanaWebhook {
        DanaWebhook {
            verifier: self.verifier.clone(),
            statuses: self.statuses.clone(),
        }
    }

    fn mcc(&self) -> &str {
        if self.config.mcc.is_empty() {
            "6012"
        } else {
            &self.config.mcc
        }
    }

    async fn post(&self, path: &str, body: &serde_json::Value) -> Result<http::ProviderResponse, GatewayError> {
        let timestamp = snap_timestamp(Utc::now());
        let payload = serde_json::to_vec(body).map_err(|e| GatewayError::signing(NAME, e))?;
        let message = SymmetricSigner::string_to_sign("POST", path, None, &payload, &timestamp);
        let signature = self.signer.sign_b64(&message)?;

        let mut request = self
            .http
            .post(format!("{}{}", self.base_url, path))
            .header("Content-Type", "application/json")
            .header("X-TIMESTAMP", &timestamp)
            .header("X-SIGNATURE", signature)
            .header("X-PARTNER-ID", &self.config.partner_id)
            .header("X-EXTERNAL-ID", snap::external_id())
            .header("CHANNEL-ID", &self.config.channel_id);
        if let Some(origin) = &self.config.origin {
            request = request.header("ORIGIN", origin);
        }
        http::send(NAME, request.body(payload)).await
    }
}

fn default_statuses() -> StatusMap {
    StatusMap::new(PaymentStatus::Pending)
        .with("00", PaymentStatus::Paid)
        .with("01", PaymentStatus::Pending)
        .with("02", PaymentStatus::Pending)
        .with("05", PaymentStatus::Failed)
}

fn qr_image_url(code: &str) -> String {
    format!("{}{}", QR_IMAGE_URL, urlencoding::encode(code))
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct CreateInfo {
    #[serde(default)]
    payment_code: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct CreateResponse {
    #[serde(flatten)]
    status: SnapStatus,
    #[serde(default)]
    reference_no: String,
    #[serde(default)]
    web_redirect_url: String,
    #[serde(default)]
    additional_info: CreateInfo,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct QueryResponse {
    #[serde(flatten)]
    status: SnapStatus,
    #[serde(default)]
    latest_transaction_status: String,
}

#[async_trait::async_trait]
impl PaymentGateway for DanaClient {
    fn name(&self) -> &str {
        NAME
    }

    fn supported_channels(&self) -> &BTreeSet<String> {
        &self.channels
    }

    async fn create_payment(&self, request: &PaymentRequest) -> Result<PaymentInstrument, GatewayError> {
        let qris = request.channel.eq_ignore_ascii_case("QRIS");
        let now = Utc::now();
        let expires_at = request.expires_at(now);
        let amount = SnapAmount::idr(request.amount);
        let pay_option = if qris {
            serde_json::json!({ "payMethod": "NETWORK_PAY", "payOption": "NETWORK_PAY_PG_QRIS", "transAmount": amount })
        } else {
            serde_json::json!({ "payMethod": "BALANCE", "payOption": "BALANCE", "transAmount": amount })
        };

        let mut url_params = Vec::new();
        if let Some(url) = request.success_url.as_ref().or(self.config.return_url.as_ref()) {
            url_params.push(serde_json::json!({ "url": url, "type": "PAY_RETURN", "isDeeplink": "Y" }));
        }
        if let Some(url) = request.callback_url.as_ref().or(self.config.callback_url.as_ref()) {
            url_params.push(serde_json::json!({ "url": url, "type": "NOTIFICATION", "isDeeplink": "Y" }));
        }
        let title = if request.description.trim().is_empty() {
            format!("Order {}", request.reference)
        } else {
            request.description.clone()
        };

        let body = serde_json::json!({
            "partnerReferenceNo": request.reference,
            "merchantId": self.config.merchant_id,
            "externalStoreId": self.config.shop_id.clone().unwrap_or_else(|| self.config.merchant_id.clone()),
            "amount": amount,
            "validUpTo": iso_wib(expires_at),
            "urlParams": url_params,
            "payOptionDetails": [pay_option],
            "additionalInfo": {
                "mcc": self.mcc(),
                "envInfo": { "sourcePlatform": "IPG", "terminalType": "SYSTEM", "orderTerminalType": "WEB" },
                "order": { "orderTitle": title, "scenario": "API" },
            },
        });

        tracing::info!(reference = %request.reference, qris, "Creating DANA order");
        let response = self.post(CREATE_PATH, &body).await?;
        let created: CreateResponse = response.json()?;
        created.status.ensure(NAME, "2005400")?;

        let gateway_ref = if created.reference_no.is_empty() {
            request.reference.clone()
        } else {
            created.reference_no
        };
        let payment_code = created.additional_info.payment_code;
        let (instrument, instructions) = if qris && !payment_code.is_empty() {
            let url = Some(qr_image_url(&payment_code));
            (Instrument::Qr { code: payment_code, url }, instructions::qr())
        } else if !created.web_redirect_url.is_empty() {
            (
                Instrument::Redirect { url: created.web_redirect_url },
                instructions::redirect("DANA"),
            )
        } else {
            return Err(GatewayError::protocol(NAME, "no payment code or redirect URL returned"));
        };

        Ok(PaymentInstrument {
            gateway: NAME.to_string(),
            gateway_ref,
            instrument,
            fee: request.fee,
            total: request.amount,
            expires_at,
            instructions,
        })
    }

    async fn check_status(&self, lookup: &PaymentLookup) -> Result<PaymentStatus, GatewayError> {
        let body = serde_json::json!({
            "originalPartnerReferenceNo": lookup.reference,
            "originalReferenceNo": lookup.gateway_ref,
            "serviceCode": "54",
            "merchantId": self.config.merchant_id,
        });
        let response = self.post(STATUS_PATH, &body).await?;
        let query: QueryResponse = response.json()?;
        query.status.ensure(NAME, "2005500")?;
        Ok(self.statuses.map(&query.latest_transaction_status))
    }

    /// Any answer below 500 counts as reachable.
    async fn health_check(&self) -> Result<(), GatewayError> {
        http::send(NAME, self.http.get(&self.base_url)).await.map(|_| ())
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Finish notify
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Notification {
    #[serde(default)]
    original_partner_reference_no: String,
    #[serde(default)]
    latest_transaction_status: String,
    #[serde(default)]
    amount: SnapAmount,
}

/// Verifies DANA's RSA signature over `POST:path:bodyhash:timestamp`.
pub struct DanaWebhook {
    verifier: std::sync::Arc<RsaVerifier>,
    statuses: StatusMap,
}

impl WebhookProtocol for DanaWebhook {
    fn gateway(&self) -> &str {
        NAME
    }

    fn parse_callback(&self, callback: &InboundCallback<'_>) -> Result<CallbackEvent, CallbackError> {
        let signature = callback.require_header("x-signature")?;
        let timestamp = callback.require_header("x-timestamp")?;
        let message =
            SymmetricSigner::string_to_sign(callback.method, callback.path, None, callback.body, timestamp);
        if !self.verifier.verify_b64(&message, signature) {
            return Err(CallbackError::InvalidSignature);
        }

        let notification: Notification = callback.json()?;
        if notification.original_partner_reference_no.trim().is_empty() {
            return Err(CallbackError::MissingReference);
        }
        Ok(CallbackEvent {
            gateway: NAME.to_string(),
            reference: CallbackReference::Invoice(notification.original_partner_reference_no),
            status: self.statuses.map(&notification.latest_transaction_status),
            paid_amount: notification.amount.minor(),
            provider_status: notification.latest_transaction_status,
            received_at: Utc::now(),
        })
    }

    fn acknowledge(&self, ack: Ack) -> CallbackReply {
        match ack {
            a if a.is_success() => snap::reply("2005600", "Successful"),
            Ack::InvalidSignature => snap::reply("4015600", "Unauthorized. [Signature]"),
            _ => snap::reply("5005601", "Internal Server Error"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use reqwest::header::{HeaderMap, HeaderValue};

    const PRIVATE: &str = include_str!("../../testdata/test_private_pkcs8.pem");
    const PUBLIC: &str = include_str!("../../testdata/test_public.pem");

    fn config() -> DanaConfig {
        DanaConfig {
            partner_id: "partner".into(),
            merchant_id: "216620000000000000000".into(),
            channel_id: "95221".into(),
            private_key_pem: Some(PRIVATE.into()),
            public_key_pem: Some(PUBLIC.into()),
            ..Default::default()
        }
    }

    #[test]
    fn test_public_key_is_required() {
        let mut cfg = config();
        cfg.public_key_pem = None;
        assert!(matches!(DanaClient::new(cfg), Err(GatewayError::Config { .. })));
    }

    #[test]
    fn test_qr_image_url_is_encoded() {
        let url = qr_image_url("000201 01&x");
        assert!(url.ends_with("000201%2001%26x"));
    }

    fn notify(body: &[u8], signer: &RsaSigner) -> (HeaderMap, Vec<u8>) {
        let ts = "2025-03-01T10:00:00+07:00";
        let message = SymmetricSigner::string_to_sign("POST", "/webhooks/DANA_DIRECT", None, body, ts);
        let sig = signer.sign_b64(&message).unwrap();
        let mut headers = HeaderMap::new();
        headers.insert("x-timestamp", HeaderValue::from_static(ts));
        headers.insert("x-signature", HeaderValue::from_str(&sig).unwrap());
        (headers, body.to_vec())
    }

    #[test]
    fn test_signed_notification_is_parsed() {
        let client = DanaClient::new(config()).unwrap();
        let webhook = client.webhook();
        let signer = RsaSigner::from_pem(NAME, PRIVATE).unwrap();
        let (headers, body) = notify(
            br#"{"originalPartnerReferenceNo":"INV1","originalReferenceNo":"D-1","latestTransactionStatus":"00","amount":{"value":"100000.00","currency":"IDR"}}"#,
            &signer,
        );
        let event = webhook
            .parse_callback(&InboundCallback {
                method: "POST",
                path: "/webhooks/DANA_DIRECT",
                headers: &headers,
                body: &body,
            })
            .unwrap();
        assert_eq!(event.status, PaymentStatus::Paid);
        assert_eq!(event.paid_amount, Some(100_000));
        assert_eq!(event.reference, CallbackReference::Invoice("INV1".into()));
    }

    #[test]
    fn test_unsigned_notification_is_rejected() {
        let client = DanaClient::new(config()).unwrap();
        let webhook = client.webhook();
        let mut headers = HeaderMap::new();
        headers.insert("x-timestamp", HeaderValue::from_static("2025-03-01T10:00:00+07:00"));
        headers.insert("x-signature", HeaderValue::from_static("AAAA"));
        let err = webhook
            .parse_callback(&InboundCallback {
                method: "POST",
                path: "/webhooks/DANA_DIRECT",
                headers: &headers,
                body: br#"{"originalPartnerReferenceNo":"INV1"}"#,
            })
            .unwrap_err();
        assert_eq!(err, CallbackError::InvalidSignature);
    }

    #[test]
    fn test_replies() {
        let webhook = DanaClient::new(config()).unwrap().webhook();
        assert_eq!(webhook.acknowledge(Ack::Duplicate).body["responseCode"], "2005600");
        let failed = webhook.acknowledge(Ack::Failed);
        assert_eq!(failed.status, 500);
        assert_eq!(failed.body["responseCode"], "5005601");
    }
}
