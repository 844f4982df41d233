//! BRI direct virtual accounts over SNAP.

use std::collections::BTreeSet;
use std::path::PathBuf;

use chrono::Utc;
use reqwest::Method;
use serde::Deserialize;

use checkout_types::{
    CallbackError, CallbackEvent, CallbackReference, GatewayError, Instrument, PaymentGateway,
    PaymentInstrument, PaymentLookup, PaymentRequest, PaymentStatus, StatusMap,
};

use super::instructions;
use super::snap::{self, SnapAmount, SnapClient, SnapStatus};
use crate::callback::{Ack, CallbackReply, InboundCallback, WebhookProtocol};
use crate::signing::{SymmetricSigner, iso_wib, snap_timestamp, verify};

pub const NAME: &str = "BRI_DIRECT";
pub const SANDBOX_URL: &str = "https://sandbox.partner.api.bri.co.id";

const CREATE_PATH: &str = "/snap/v1.0/transfer-va/create-va";
const STATUS_PATH: &str = "/snap/v1.0/transfer-va/status";
const DELETE_PATH: &str = "/snap/v1.0/transfer-va/delete-va";
const CREATE_CHANNEL: &str = "95221";
const INQUIRY_CHANNEL: &str = "95231";

#[derive(Debug, Clone, Default)]
pub struct BriConfig {
    pub base_url: String,
    pub client_id: String,
    pub client_secret: String,
    pub partner_id: String,
    pub private_key_pem: Option<String>,
    pub private_key_path: Option<PathBuf>,
    /// Extra `code=STATUS` pairs for the `paidStatus` map.
    pub status_overrides: Option<String>,
}

pub struct BriClient {
    snap: SnapClient,
    channels: BTreeSet<String>,
    statuses: StatusMap,
}

impl BriClient {
    pub fn new(config: BriConfig) -> Result<Self, GatewayError> {
        for (field, value) in [
            ("client id", &config.client_id),
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
            &config.client_id,
            &config.client_secret,
            &config.partner_id,
            signer,
            snap_timestamp,
            None,
        )?;

        let mut statuses = default_statuses();
        if let Some(overrides) = &config.status_overrides {
            statuses
                .apply_overrides(overrides)
                .map_err(|e| GatewayError::config(NAME, e))?;
        }

        Ok(Self {
            snap,
            channels: ["VA_BRI", "BRI_VA"].into_iter().map(String::from).collect(),
            statuses,
        })
    }

    /// Callback protocol sharing this client's secret.
    pub fn webhook(&self) -> BriWebhook {
        BriWebhook {
            signer: self.snap.request_signer().clone(),
        }
    }

    /// Closes an open virtual account.
    pub async fn delete_va(&self, virtual_account_no: &str, trx_id: &str) -> Result<(), GatewayError> {
        let (partner_service_id, customer_no) = split_va(virtual_account_no, self.snap.partner_id());
        let body = serde_json::json!({
            "partnerServiceId": partner_service_id,
            "customerNo": customer_no,
            "virtualAccountNo": virtual_account_no,
            "trxId": trx_id,
        });
        let response = self
            .snap
            .call(Method::DELETE, DELETE_PATH, &body, INQUIRY_CHANNEL)
            .await?;
        let status: SnapStatus = response.json()?;
        status.ensure(NAME, "2003100")?;
        tracing::info!(virtual_account_no, trx_id, "BRI virtual account deleted");
        Ok(())
    }
}

fn default_statuses() -> StatusMap {
    StatusMap::new(PaymentStatus::Pending)
        .with("Y", PaymentStatus::Paid)
        .with("N", PaymentStatus::Pending)
}

/// `partnerServiceId` left-padded with spaces to eight characters.
fn partner_service_id(partner_id: &str) -> String {
    let padded = format!("{:>8}", partner_id);
    padded.chars().take(8).collect()
}

/// `customerNo` for an invoice: its last eight alphanumerics read as base 36,
/// zero-padded to 13 digits. The same invoice always maps to the same number.
fn customer_no(reference: &str) -> Option<String> {
    let tail: Vec<char> = reference
        .chars()
        .rev()
        .take_while(char::is_ascii_alphanumeric)
        .take(8)
        .collect();
    if tail.is_empty() {
        return None;
    }
    let value = tail
        .iter()
        .rev()
        .try_fold(0u64, |acc, c| c.to_digit(36).map(|d| acc * 36 + u64::from(d)))?;
    Some(format!("{:013}", value))
}

/// Splits a VA number into `(partnerServiceId, customerNo)`.
fn split_va(va: &str, partner_id: &str) -> (String, String) {
    if va.len() > 8 && va.is_char_boundary(8) {
        (va[..8].to_string(), va[8..].trim().to_string())
    } else {
        (partner_service_id(partner_id), va.trim().to_string())
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct VirtualAccountData {
    #[serde(default)]
    virtual_account_no: String,
    #[serde(default)]
    virtual_account_name: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct CreateVaResponse {
    #[serde(flatten)]
    status: SnapStatus,
    virtual_account_data: Option<VirtualAccountData>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PaidInfo {
    #[serde(default)]
    paid_status: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct StatusResponse {
    #[serde(flatten)]
    status: SnapStatus,
    additional_info: Option<PaidInfo>,
}

#[async_trait::async_trait]
impl PaymentGateway for BriClient {
    fn name(&self) -> &str {
        NAME
    }

    fn supported_channels(&self) -> &BTreeSet<String> {
        &self.channels
    }

    async fn create_payment(&self, request: &PaymentRequest) -> Result<PaymentInstrument, GatewayError> {
        let now = Utc::now();
        let expires_at = request.expires_at(now);
        let partner_service_id = partner_service_id(self.snap.partner_id());
        let customer_no = customer_no(&request.reference).ok_or_else(|| {
            GatewayError::rejected(NAME, "INVALID_REFERENCE", "reference has no alphanumeric suffix")
        })?;
        let virtual_account_no = format!("{}{}", partner_service_id, customer_no);

        let body = serde_json::json!({
            "partnerServiceId": partner_service_id,
            "customerNo": customer_no,
            "virtualAccountNo": virtual_account_no,
            "virtualAccountName": request.display_name(),
            "trxId": request.reference,
            "totalAmount": SnapAmount::idr(request.amount),
            "expiredDate": iso_wib(expires_at),
            "additionalInfo": { "description": request.description },
        });

        tracing::info!(reference = %request.reference, amount = request.amount, "Creating BRI virtual account");
        let response = self
            .snap
            .call(Method::POST, CREATE_PATH, &body, CREATE_CHANNEL)
            .await?;
        let created: CreateVaResponse = response.json()?;
        created.status.ensure(NAME, "2002700")?;
        let data = created
            .virtual_account_data
            .ok_or_else(|| GatewayError::protocol(NAME, "response carries no virtualAccountData"))?;

        let number = data.virtual_account_no.trim_start().to_string();
        Ok(PaymentInstrument {
            gateway: NAME.to_string(),
            gateway_ref: data.virtual_account_no.clone(),
            instructions: instructions::virtual_account("BRI", &number),
            instrument: Instrument::VirtualAccount {
                number,
                bank_code: "BRI".to_string(),
                account_name: data.virtual_account_name,
            },
            fee: request.fee,
            total: request.amount,
            expires_at,
        })
    }

    async fn check_status(&self, lookup: &PaymentLookup) -> Result<PaymentStatus, GatewayError> {
        let va = &lookup.gateway_ref;
        let (partner_service_id, customer_no) = split_va(va, self.snap.partner_id());
        let body = serde_json::json!({
            "partnerServiceId": partner_service_id,
            "customerNo": customer_no,
            "virtualAccountNo": va,
            "inquiryRequestId": snap::external_id(),
        });
        let response = self
            .snap
            .call(Method::POST, STATUS_PATH, &body, INQUIRY_CHANNEL)
            .await?;
        let status: StatusResponse = response.json()?;
        status.status.ensure(NAME, "2002600")?;
        let paid = status
            .additional_info
            .map(|info| info.paid_status)
            .unwrap_or_default();
        Ok(self.statuses.map(&paid))
    }

    async fn health_check(&self) -> Result<(), GatewayError> {
        self.snap.access_token().await.map(|_| ())
    }

    async fn cancel_payment(&self, lookup: &PaymentLookup) -> Result<(), GatewayError> {
        self.delete_va(&lookup.gateway_ref, &lookup.reference).await
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Payment notification
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct NotificationInfo {
    #[serde(default)]
    payment_amount: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Notification {
    #[serde(default)]
    virtual_account_no: String,
    #[serde(default)]
    payment_request_id: String,
    additional_info: Option<NotificationInfo>,
}

/// Verifies and parses BRI payment notifications.
pub struct BriWebhook {
    signer: SymmetricSigner,
}

impl BriWebhook {
    pub fn new(client_secret: &str) -> Result<Self, GatewayError> {
        Ok(Self {
            signer: SymmetricSigner::sha512_base64(client_secret)
                .map_err(|e| GatewayError::config(NAME, e))?,
        })
    }
}

impl WebhookProtocol for BriWebhook {
    fn gateway(&self) -> &str {
        NAME
    }

    fn parse_callback(&self, callback: &InboundCallback<'_>) -> Result<CallbackEvent, CallbackError> {
        let signature = callback.require_header("x-signature")?;
        let timestamp = callback.require_header("x-timestamp")?;
        let token = callback.bearer_token().unwrap_or_default();
        let message = SymmetricSigner::string_to_sign(
            callback.method,
            callback.path,
            Some(token),
            callback.body,
            timestamp,
        );
        if !verify::constant_time_eq(self.signer.sign(&message).as_bytes(), signature.as_bytes()) {
            return Err(CallbackError::InvalidSignature);
        }

        let notification: Notification = callback.json()?;
        if notification.virtual_account_no.trim().is_empty() {
            return Err(CallbackError::MissingReference);
        }
        let paid_amount = notification
            .additional_info
            .and_then(|info| SnapAmount { value: info.payment_amount, currency: String::new() }.minor());

        tracing::debug!(request_id = %notification.payment_request_id, "BRI notification verified");
        Ok(CallbackEvent {
            gateway: NAME.to_string(),
            reference: CallbackReference::GatewayRef(notification.virtual_account_no),
            status: PaymentStatus::Paid,
            paid_amount,
            provider_status: "PAID".to_string(),
            received_at: Utc::now(),
        })
    }

    fn acknowledge(&self, ack: Ack) -> CallbackReply {
        match ack {
            a if a.is_success() => snap::reply("2003400", "Successful"),
            Ack::InvalidSignature => snap::reply("4013400", "Unauthorized. [Signature]"),
            _ => snap::reply("5003400", "General Error"),
        }
    }
}
