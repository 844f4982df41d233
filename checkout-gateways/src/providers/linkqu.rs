//! LinkQu QRIS.

use std::collections::BTreeSet;

use chrono::Utc;
use serde::{Deserialize, Serialize};

use checkout_types::{
    CallbackError, CallbackEvent, CallbackReference, GatewayError, Instrument, PaymentGateway,
    PaymentInstrument, PaymentLookup, PaymentRequest, PaymentStatus, StatusMap,
};

use super::instructions;
use crate::callback::{self, Ack, CallbackReply, InboundCallback, WebhookProtocol};
use crate::http;
use crate::signing::symmetric::sha256_hex;
use crate::signing::timestamp::{nanos, parse_wib_naive};
use crate::signing::verify;

pub const NAME: &str = "LINKQU";
pub const SANDBOX_URL: &str = "https://sandbox-api.linkqu.id";

#[derive(Debug, Clone, Default)]
pub struct LinkquConfig {
    pub base_url: String,
    pub client_id: String,
    pub client_secret: String,
    pub username: String,
    pub pin: String,
    pub status_overrides: Option<String>,
}

pub struct LinkquClient {
    http: reqwest::Client,
    base_url: String,
    client_id: String,
    username: String,
    pin: String,
    secret: String,
    channels: BTreeSet<String>,
    statuses: StatusMap,
}

/// `sha256hex(data + client_secret)`
fn sign(data: &str, secret: &str) -> String {
    sha256_hex(format!("{}{}", data, secret).as_bytes())
}

fn default_statuses() -> StatusMap {
    StatusMap::new(PaymentStatus::Pending)
        .with("PAID", PaymentStatus::Paid)
        .with("SUCCESS", PaymentStatus::Paid)
        .with("EXPIRED", PaymentStatus::Expired)
        .with("FAILED", PaymentStatus::Failed)
        .with("REFUNDED", PaymentStatus::Refunded)
}

impl LinkquClient {
    pub fn new(config: LinkquConfig) -> Result<Self, GatewayError> {
        for (field, value) in [
            ("client id", &config.client_id),
            ("client secret", &config.client_secret),
            ("username", &config.username),
            ("pin", &config.pin),
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
        Ok(Self {
            http: http::build_client(NAME)?,
            base_url: if config.base_url.is_empty() {
                SANDBOX_URL.to_string()
            } else {
                http::base_url(&config.base_url)
            },
            client_id: config.client_id,
            username: config.username,
            pin: config.pin,
            secret: config.client_secret,
            channels: BTreeSet::from(["QRIS".to_string()]),
            statuses,
        })
    }

    pub fn webhook(&self) -> LinkquWebhook {
        LinkquWebhook {
            secret: self.secret.clone(),
            statuses: self.statuses.clone(),
        }
    }

    fn credentials(&self) -> String {
        format!("{}{}{}", self.username, self.pin, self.client_id)
    }
}

#[derive(Debug, Serialize)]
struct CreateQris<'a> {
    username: &'a str,
    pin: &'a str,
    client_id: &'a str,
    request_id: String,
    amount: i64,
    expired_time: i64,
    partner_reff: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    customer_name: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    customer_email: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    customer_phone: Option<&'a str>,
    signature: String,
}

#[derive(Debug, Default, Deserialize)]
struct Transaction {
    #[serde(default)]
    partner_reff: String,
    #[serde(default)]
    transaction_id: String,
    #[serde(default)]
    amount: i64,
    #[serde(default)]
    qr_string: String,
    #[serde(default)]
    qr_url: String,
    #[serde(default)]
    expired_time: String,
    #[serde(default)]
    status: String,
}

#[derive(Debug, Deserialize)]
struct Envelope {
    #[serde(default)]
    success: bool,
    #[serde(default)]
    code: String,
    #[serde(default)]
    message: String,
    data: Option<Transaction>,
}

impl Envelope {
    fn into_data(self) -> Result<Transaction, GatewayError> {
        match self.data {
            Some(data) if self.success => Ok(data),
            _ => Err(GatewayError::rejected(NAME, self.code, self.message)),
        }
    }
}

#[async_trait::async_trait]
impl PaymentGateway for LinkquClient {
    fn name(&self) -> &str {
        NAME
    }

    fn supported_channels(&self) -> &BTreeSet<String> {
        &self.channels
    }

    async fn create_payment(&self, request: &PaymentRequest) -> Result<PaymentInstrument, GatewayError> {
        if !request.channel.eq_ignore_ascii_case("QRIS") {
            return Err(GatewayError::UnsupportedChannel(request.channel.clone()));
        }
        let now = Utc::now();
        let expired_time = request.expires_at(now).timestamp();
        let body = CreateQris {
            username: &self.username,
            pin: &self.pin,
            client_id: &self.client_id,
            request_id: format!("LQ{}", nanos(now)),
            amount: request.amount,
            expired_time,
            partner_reff: &request.reference,
            customer_name: request.customer_name.as_deref(),
            customer_email: request.customer_email.as_deref(),
            customer_phone: request.customer_phone.as_deref(),
            signature: sign(
                &format!("{}{}{}", self.credentials(), request.amount, expired_time),
                &self.secret,
            ),
        };
        tracing::info!(reference = %request.reference, "Creating LinkQu QRIS");

        let response = http::send(
            NAME,
            self.http
                .post(format!("{}/transaction/create-qris", self.base_url))
                .json(&body),
        )
        .await?;
        let data = response.json::<Envelope>()?.into_data()?;
        if data.qr_string.is_empty() {
            return Err(GatewayError::protocol(NAME, "response carries no QR string"));
        }

        Ok(PaymentInstrument {
            gateway: NAME.to_string(),
            gateway_ref: data.transaction_id,
            instrument: Instrument::Qr {
                code: data.qr_string,
                url: Some(data.qr_url).filter(|u| !u.is_empty()),
            },
            fee: request.fee,
            total: request.amount,
            expires_at: parse_wib_naive(&data.expired_time).unwrap_or_else(|| request.expires_at(now)),
            instructions: instructions::qr(),
        })
    }

    async fn check_status(&self, lookup: &PaymentLookup) -> Result<PaymentStatus, GatewayError> {
        let signature = sign(
            &format!("{}{}", self.credentials(), lookup.gateway_ref),
            &self.secret,
        );
        let body = serde_json::json!({
            "username": self.username,
            "pin": self.pin,
            "client_id": self.client_id,
            "transaction_id": lookup.gateway_ref,
            "signature": signature,
        });
        let response = http::send(
            NAME,
            self.http
                .post(format!("{}/transaction/check-status", self.base_url))
                .json(&body),
        )
        .await?;
        let data = response.json::<Envelope>()?.into_data()?;
        Ok(self.statuses.map(&data.status))
    }

    async fn health_check(&self) -> Result<(), GatewayError> {
        let response = http::send(NAME, self.http.get(format!("{}/health", self.base_url))).await?;
        if response.status != reqwest::StatusCode::OK {
            return Err(GatewayError::rejected(
                NAME,
                response.status.as_str(),
                "health check failed",
            ));
        }
        Ok(())
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Callbacks
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
struct Notification {
    #[serde(flatten)]
    transaction: Transaction,
    signature: Option<String>,
}

/// Signature is `sha256hex(transaction_id + partner_reff + amount + secret)`,
/// sent in `x-signature` or as a `signature` body field.
pub struct LinkquWebhook {
    secret: String,
    statuses: StatusMap,
}

impl WebhookProtocol for LinkquWebhook {
    fn gateway(&self) -> &str {
        NAME
    }

    fn parse_callback(&self, callback: &InboundCallback<'_>) -> Result<CallbackEvent, CallbackError> {
        let notification: Notification = callback.json()?;
        let received = callback
            .header("x-signature")
            .map(str::to_string)
            .or(notification.signature)
            .ok_or(CallbackError::InvalidSignature)?;

        let tx = notification.transaction;
        let expected = sign(
            &format!("{}{}{}", tx.transaction_id, tx.partner_reff, tx.amount),
            &self.secret,
        );
        if !verify::verify_digest_hex(&expected, &received) {
            return Err(CallbackError::InvalidSignature);
        }
        if tx.partner_reff.trim().is_empty() {
            return Err(CallbackError::MissingReference);
        }

        let status = if tx.status.is_empty() {
            PaymentStatus::Paid
        } else {
            self.statuses.map(&tx.status)
        };
        Ok(CallbackEvent {
            gateway: NAME.to_string(),
            reference: CallbackReference::Invoice(tx.partner_reff),
            status,
            paid_amount: Some(tx.amount),
            provider_status: tx.status,
            received_at: Utc::now(),
        })
    }

    fn acknowledge(&self, ack: Ack) -> CallbackReply {
        callback::simple_reply(ack)
    }
}
