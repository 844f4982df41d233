//! Pakailink multi-bank virtual accounts over SNAP.

use std::collections::{BTreeMap, BTreeSet};
use std::path::PathBuf;

use chrono::Utc;
use reqwest::Method;
use serde::Deserialize;
use sha2::{Digest, Sha256};

use checkout_types::{
    CallbackError, CallbackEvent, CallbackReference, GatewayError, Instrument, PaymentGateway,
    PaymentInstrument, PaymentLookup, PaymentRequest, PaymentStatus, StatusMap,
};

use super::instructions;
use super::snap::{self, SnapAmount, SnapClient, SnapStatus};
use crate::callback::{Ack, CallbackReply, InboundCallback, WebhookProtocol};
use crate::signing::{SymmetricSigner, iso_wib, timestamp::parse_rfc3339, verify};

pub const NAME: &str = "PAKAILINK";
pub const SANDBOX_URL: &str = "https://sandbox.pakailink.id";

const CREATE_PATH: &str = "/snap/v1.0/transfer-va/create-va";
const STATUS_PATH: &str = "/snap/v1.0/transfer-va/create-va-status";
const CHANNEL_ID: &str = "95221";

/// Bank short name and Pakailink bank code.
const BANKS: &[(&str, &str)] = &[
    ("BCA", "014"),
    ("BNI", "009"),
    ("BRI", "002"),
    ("BSI", "451"),
    ("CIMB", "022"),
    ("DANAMON", "011"),
    ("MANDIRI", "008"),
    ("BMI", "147"),
    ("BNC", "490"),
    ("OCBC", "028"),
    ("PERMATA", "013"),
    ("SINARMAS", "153"),
];

#[derive(Debug, Clone, Default)]
pub struct PakailinkConfig {
    pub base_url: String,
    pub client_key: String,
    pub client_secret: String,
    pub partner_id: String,
    pub private_key_pem: Option<String>,
    pub private_key_path: Option<PathBuf>,
    pub callback_url: Option<String>,
    pub status_overrides: Option<String>,
}

pub struct PakailinkClient {
    snap: SnapClient,
    callback_url: Option<String>,
    /// Channel code to `(bank, bank code)`.
    banks: BTreeMap<String, (&'static str, &'static str)>,
    channels: BTreeSet<String>,
    statuses: StatusMap,
}

impl PakailinkClient {
    pub fn new(config: PakailinkConfig) -> Result<Self, GatewayError> {
        for (field, value) in [
            ("client key", &config.client_key),
            ("client secret", &config.client_secret),
            ("partner id", &config.partner_id),
        ] {
            if value.trim().is_empty() {
                return Err(GatewayError::config(NAME, format!("{} is required", field)));
            }
        }
        let signer = snap::load_signer(
            NAME,
            config.private_key_pem.as_deref(),
            config.private_key_path.as_deref(),
        )?;
        let base_url = if config.base_url.is_empty() {
            SANDBOX_URL
        } else {
            &config.base_url
        };
        let snap = SnapClient::new(
            NAME,
            base_url,
            &config.client_key,
            &config.client_secret,
            &config.partner_id,
            signer,
            iso_wib,
            Some("2007300"),
        )?;

        let mut statuses = default_statuses();
        if let Some(overrides) = &config.status_overrides {
            statuses
                .apply_overrides(overrides)
                .map_err(|e| GatewayError::config(NAME, e))?;
        }

        let mut banks = BTreeMap::new();
        for &(bank, code) in BANKS {
            banks.insert(format!("VA_{}", bank), (bank, code));
            banks.insert(format!("{}_VA", bank), (bank, code));
        }
        let channels = banks.keys().cloned().collect();

        Ok(Self {
            snap,
            callback_url: config.callback_url,
            banks,
            channels,
            statuses,
        })
    }

    pub fn webhook(&self) -> PakailinkWebhook {
        PakailinkWebhook {
            signer: self.snap.request_signer().clone(),
            callback_path: self.callback_url.as_deref().map(url_path),
            statuses: self.statuses.clone(),
        }
    }
}

fn default_statuses() -> StatusMap {
    StatusMap::new(PaymentStatus::Pending)
        .with("00", PaymentStatus::Paid)
        .with("01", PaymentStatus::Pending)
        .with("02", PaymentStatus::Pending)
        .with("03", PaymentStatus::Expired)
}

/// Twelve-digit customer number derived from the reference.
fn customer_no(reference: &str) -> String {
    let digest = Sha256::digest(reference.as_bytes());
    let num = digest[..8]
        .iter()
        .fold(0u64, |acc, b| (acc << 8) | u64::from(*b));
    (num % 1_000_000_000_000).to_string()
}

fn url_path(url: &str) -> String {
    match url.split_once("://") {
        Some((_, rest)) => rest
            .find('/')
            .map(|idx| rest[idx..].to_string())
            .unwrap_or_else(|| "/".to_string()),
        None => url.to_string(),
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct VaInfo {
    #[serde(default)]
    reference_no: String,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct VirtualAccountData {
    #[serde(default)]
    virtual_account_no: String,
    #[serde(default)]
    expired_date: String,
    #[serde(default)]
    additional_info: VaInfo,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct CreateVaResponse {
    #[serde(flatten)]
    status: SnapStatus,
    #[serde(default)]
    virtual_account_data: VirtualAccountData,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct StatusResponse {
    #[serde(flatten)]
    status: SnapStatus,
    #[serde(default)]
    latest_transaction_status: String,
}

#[async_trait::async_trait]
impl PaymentGateway for PakailinkClient {
    fn name(&self) -> &str {
        NAME
    }

    fn supported_channels(&self) -> &BTreeSet<String> {
        &self.channels
    }

    async fn create_payment(&self, request: &PaymentRequest) -> Result<PaymentInstrument, GatewayError> {
        let channel = request.channel.to_ascii_uppercase();
        let (bank, bank_code) = *self
            .banks
            .get(&channel)
            .ok_or_else(|| GatewayError::UnsupportedChannel(request.channel.clone()))?;

        let now = Utc::now();
        let expires_at = request.expires_at(now);
        let account_name = request.display_name();
        let body = serde_json::json!({
            "partnerReferenceNo": request.reference,
            "customerNo": customer_no(&request.reference),
            "virtualAccountName": account_name,
            "virtualAccountPhone": request.customer_phone.clone().unwrap_or_default(),
            "totalAmount": SnapAmount::idr(request.amount),
            "expiredDate": iso_wib(expires_at),
            "additionalInfo": {
                "callbackUrl": self.callback_url.clone().unwrap_or_default(),
                "bankCode": bank_code,
            },
        });

        tracing::info!(reference = %request.reference, bank, "Creating Pakailink virtual account");
        let response = self
            .snap
            .call(Method::POST, CREATE_PATH, &body, CHANNEL_ID)
            .await?;
        let created: CreateVaResponse = response.json()?;
        created.status.ensure(NAME, "2002700")?;
        let data = created.virtual_account_data;
        if data.virtual_account_no.is_empty() {
            return Err(GatewayError::protocol(NAME, "response carries no virtualAccountNo"));
        }

        let gateway_ref = if data.additional_info.reference_no.is_empty() {
            request.reference.clone()
        } else {
            data.additional_info.reference_no
        };
        Ok(PaymentInstrument {
            gateway: NAME.to_string(),
            gateway_ref,
            instructions: instructions::virtual_account(bank, &data.virtual_account_no),
            instrument: Instrument::VirtualAccount {
                number: data.virtual_account_no,
                bank_code: bank.to_string(),
                account_name,
            },
            fee: request.fee,
            total: request.amount,
            expires_at: parse_rfc3339(&data.expired_date).unwrap_or(expires_at),
        })
    }

    async fn check_status(&self, lookup: &PaymentLookup) -> Result<PaymentStatus, GatewayError> {
        let body = serde_json::json!({ "originalPartnerReferenceNo": lookup.reference });
        let response = self
            .snap
            .call(Method::POST, STATUS_PATH, &body, CHANNEL_ID)
            .await?;
        let status: StatusResponse = response.json()?;
        status.status.ensure(NAME, "2003300")?;
        Ok(self.statuses.map(&status.latest_transaction_status))
    }

    async fn health_check(&self) -> Result<(), GatewayError> {
        self.snap.access_token().await.map(|_| ())
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Payment notification
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct TransactionData {
    #[serde(default)]
    payment_flag_status: String,
    #[serde(default)]
    partner_reference_no: String,
    #[serde(default)]
    callback_type: String,
    #[serde(default)]
    paid_amount: SnapAmount,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Notification {
    transaction_data: TransactionData,
}

/// HMAC-SHA512 over `POST:callbackPath:bodyhash:timestamp`, no token segment.
pub struct PakailinkWebhook {
    signer: SymmetricSigner,
    callback_path: Option<String>,
    statuses: StatusMap,
}

impl WebhookProtocol for PakailinkWebhook {
    fn gateway(&self) -> &str {
        NAME
    }

    fn parse_callback(&self, callback: &InboundCallback<'_>) -> Result<CallbackEvent, CallbackError> {
        let signature = callback.require_header("x-signature")?;
        let timestamp = callback.require_header("x-timestamp")?;
        let path = self.callback_path.as_deref().unwrap_or(callback.path);
        let message = SymmetricSigner::string_to_sign("POST", path, None, callback.body, timestamp);
        if !verify::constant_time_eq(self.signer.sign(&message).as_bytes(), signature.as_bytes()) {
            return Err(CallbackError::InvalidSignature);
        }

        let notification: Notification = callback.json()?;
        let data = notification.transaction_data;
        if data.partner_reference_no.trim().is_empty() {
            return Err(CallbackError::MissingReference);
        }
        // Non-payment notifications carry no settlement signal.
        let status = if data.callback_type.eq_ignore_ascii_case("payment") {
            self.statuses.map(&data.payment_flag_status)
        } else {
            PaymentStatus::Pending
        };

        Ok(CallbackEvent {
            gateway: NAME.to_string(),
            reference: CallbackReference::Invoice(data.partner_reference_no),
            status,
            paid_amount: data.paid_amount.minor(),
            provider_status: data.payment_flag_status,
            received_at: Utc::now(),
        })
    }

    fn acknowledge(&self, ack: Ack) -> CallbackReply {
        match ack {
            a if a.is_success() => snap::reply("2002800", "Successful"),
            Ack::InvalidSignature => snap::reply("4012800", "Unauthorized. [Signature]"),
            _ => snap::reply("5002800", "General Error"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use reqwest::header::{HeaderMap, HeaderValue};

    const PEM: &str = include_str!("../../testdata/test_private_pkcs1.pem");

    fn client() -> PakailinkClient {
        PakailinkClient::new(PakailinkConfig {
            client_key: "key".into(),
            client_secret: "secret".into(),
            partner_id: "partner".into(),
            private_key_pem: Some(PEM.into()),
            callback_url: Some("https://shop.example/webhooks/PAKAILINK".into()),
            ..Default::default()
        })
        .unwrap()
    }

    #[test]
    fn test_customer_no_is_stable_and_bounded() {
        let a = customer_no("INV20250301AB12CD34");
        assert_eq!(a, customer_no("INV20250301AB12CD34"));
        assert_ne!(a, customer_no("INV20250301AB12CD35"));
        assert!(a.len() <= 12);
    }

    #[test]
    fn test_channels_accept_both_spellings() {
        let client = client();
        assert!(client.supports("VA_MANDIRI"));
        assert!(client.supports("MANDIRI_VA"));
        assert_eq!(client.supported_channels().len(), BANKS.len() * 2);
    }

    #[test]
    fn test_url_path() {
        assert_eq!(url_path("https://shop.example/webhooks/PAKAILINK"), "/webhooks/PAKAILINK");
        assert_eq!(url_path("https://shop.example"), "/");
    }

    fn callback_parts(signer: &SymmetricSigner, body: &[u8]) -> HeaderMap {
        let ts = "2025-03-01T10:00:00+07:00";
        let sig = signer.sign_request("POST", "/webhooks/PAKAILINK", None, body, ts);
        let mut headers = HeaderMap::new();
        headers.insert("X-Timestamp", HeaderValue::from_static(ts));
        headers.insert("X-Signature", HeaderValue::from_str(&sig).unwrap());
        headers
    }

    #[test]
    fn test_payment_notification() {
        let webhook = client().webhook();
        let body = br#"{"transactionData":{"paymentFlagStatus":"00","partnerReferenceNo":"INV1","callbackType":"payment","paidAmount":{"value":"94000.00","currency":"IDR"}}}"#;
        let headers = callback_parts(&webhook.signer, body);
        let event = webhook
            .parse_callback(&InboundCallback {
                method: "POST",
                path: "/somewhere/else",
                headers: &headers,
                body,
            })
            .unwrap();
        assert_eq!(event.status, PaymentStatus::Paid);
        assert_eq!(event.reference, CallbackReference::Invoice("INV1".into()));
        assert_eq!(event.paid_amount, Some(94_000));
    }

    #[test]
    fn test_non_payment_notification_is_pending() {
        let webhook = client().webhook();
        let body = br#"{"transactionData":{"paymentFlagStatus":"00","partnerReferenceNo":"INV1","callbackType":"inquiry"}}"#;
        let headers = callback_parts(&webhook.signer, body);
        let event = webhook
            .parse_callback(&InboundCallback {
                method: "POST",
                path: "/webhooks/PAKAILINK",
                headers: &headers,
                body,
            })
            .unwrap();
        assert_eq!(event.status, PaymentStatus::Pending);
    }

    #[test]
    fn test_status_map() {
        let statuses = default_statuses();
        assert_eq!(statuses.map("03"), PaymentStatus::Expired);
        assert_eq!(statuses.map("02"), PaymentStatus::Pending);
    }
}
