//! Midtrans Core API: e-wallet deeplinks and QRIS.

use std::collections::BTreeSet;

use chrono::Utc;
use serde::Deserialize;

use checkout_types::{
    CallbackError, CallbackEvent, CallbackReference, GatewayError, Instrument, PaymentGateway,
    PaymentInstrument, PaymentLookup, PaymentRequest, PaymentStatus, StatusMap,
};

use super::instructions;
use crate::callback::{self, Ack, CallbackReply, InboundCallback, WebhookProtocol};
use crate::http;
use crate::signing::{midtrans_wib, verify};

pub const NAME: &str = "MIDTRANS";
pub const SANDBOX_URL: &str = "https://api.sandbox.midtrans.com";

#[derive(Debug, Clone, Default)]
pub struct MidtransConfig {
    pub base_url: String,
    pub server_key: String,
    pub status_overrides: Option<String>,
}

pub struct MidtransClient {
    http: reqwest::Client,
    base_url: String,
    server_key: String,
    channels: BTreeSet<String>,
    statuses: StatusMap,
}

impl MidtransClient {
    pub fn new(config: MidtransConfig) -> Result<Self, GatewayError> {
        if config.server_key.trim().is_empty() {
            return Err(GatewayError::config(NAME, "server key is required"));
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
            server_key: config.server_key,
            channels: ["GOPAY", "SHOPEEPAY", "QRIS"].into_iter().map(String::from).collect(),
            statuses,
        })
    }

    pub fn webhook(&self) -> MidtransWebhook {
        MidtransWebhook {
            server_key: self.server_key.clone(),
            statuses: self.statuses.clone(),
        }
    }

    fn charge_body(&self, request: &PaymentRequest, channel: &str) -> serde_json::Value {
        let minutes = (request.expiry.as_secs() / 60).max(1);
        let mut body = serde_json::json!({
            "transaction_details": {
                "order_id": request.reference,
                "gross_amount": request.amount,
            },
            "customer_details": {
                "first_name": request.display_name(),
                "email": request.customer_email,
                "phone": request.customer_phone,
            },
            "custom_expiry": {
                "order_time": midtrans_wib(Utc::now()),
                "expiry_duration": minutes,
                "unit": "minute",
            },
        });
        let callback_url = request.success_url.clone().unwrap_or_default();
        match channel {
            "QRIS" => {
                body["payment_type"] = "qris".into();
                body["qris"] = serde_json::json!({ "acquirer": "gopay" });
            }
            "SHOPEEPAY" => {
                body["payment_type"] = "shopeepay".into();
                body["shopeepay"] = serde_json::json!({ "callback_url": callback_url });
            }
            _ => {
                body["payment_type"] = "gopay".into();
                body["gopay"] = serde_json::json!({
                    "enable_callback": !callback_url.is_empty(),
                    "callback_url": callback_url,
                });
            }
        }
        body
    }
}

fn default_statuses() -> StatusMap {
    StatusMap::new(PaymentStatus::Pending)
        .with("capture", PaymentStatus::Paid)
        .with("settlement", PaymentStatus::Paid)
        .with("pending", PaymentStatus::Pending)
        .with("authorize", PaymentStatus::Pending)
        .with("deny", PaymentStatus::Failed)
        .with("cancel", PaymentStatus::Failed)
        .with("failure", PaymentStatus::Failed)
        .with("expire", PaymentStatus::Expired)
        .with("refund", PaymentStatus::Refunded)
        .with("partial_refund", PaymentStatus::Refunded)
}

/// A captured card or wallet flagged for review is not yet money in hand.
fn resolve(statuses: &StatusMap, transaction_status: &str, fraud_status: Option<&str>) -> PaymentStatus {
    match (transaction_status, fraud_status) {
        ("capture", Some("challenge")) => PaymentStatus::Pending,
        (status, _) => statuses.map(status),
    }
}

#[derive(Debug, Deserialize)]
struct ChargeAction {
    name: String,
    url: String,
}

#[derive(Debug, Deserialize)]
struct ChargeResponse {
    status_code: String,
    #[serde(default)]
    status_message: String,
    #[serde(default)]
    transaction_id: String,
    #[serde(default)]
    transaction_status: String,
    fraud_status: Option<String>,
    qr_string: Option<String>,
    expiry_time: Option<String>,
    #[serde(default)]
    actions: Vec<ChargeAction>,
}

impl ChargeResponse {
    fn ensure_accepted(self) -> Result<Self, GatewayError> {
        match self.status_code.as_str() {
            "200" | "201" => Ok(self),
            _ => Err(GatewayError::rejected(NAME, self.status_code, self.status_message)),
        }
    }

    fn action(&self, name: &str) -> Option<String> {
        self.actions.iter().find(|a| a.name == name).map(|a| a.url.clone())
    }
}

#[async_trait::async_trait]
impl PaymentGateway for MidtransClient {
    fn name(&self) -> &str {
        NAME
    }

    fn supported_channels(&self) -> &BTreeSet<String> {
        &self.channels
    }

    async fn create_payment(&self, request: &PaymentRequest) -> Result<PaymentInstrument, GatewayError> {
        let channel = request.channel.to_ascii_uppercase();
        if !self.channels.contains(&channel) {
            return Err(GatewayError::UnsupportedChannel(request.channel.clone()));
        }
        tracing::info!(reference = %request.reference, channel = %channel, "Creating Midtrans charge");

        let response = http::send(
            NAME,
            self.http
                .post(format!("{}/v2/charge", self.base_url))
                .basic_auth(&self.server_key, Some(""))
                .header("Accept", "application/json")
                .json(&self.charge_body(request, &channel)),
        )
        .await?;
        let charge: ChargeResponse = response.json::<ChargeResponse>()?.ensure_accepted()?;

        let expires_at = charge
            .expiry_time
            .as_deref()
            .and_then(crate::signing::timestamp::parse_wib_naive)
            .unwrap_or_else(|| request.expires_at(Utc::now()));

        let (instrument, steps) = if channel == "QRIS" {
            let code = charge
                .qr_string
                .clone()
                .filter(|q| !q.is_empty())
                .ok_or_else(|| GatewayError::protocol(NAME, "charge carries no QR string"))?;
            (
                Instrument::Qr {
                    code,
                    url: charge.action("generate-qr-code"),
                },
                instructions::qr(),
            )
        } else {
            let url = charge
                .action("deeplink-redirect")
                .ok_or_else(|| GatewayError::protocol(NAME, "charge carries no deeplink"))?;
            (Instrument::Redirect { url }, instructions::redirect(&channel))
        };

        Ok(PaymentInstrument {
            gateway: NAME.to_string(),
            gateway_ref: charge.transaction_id,
            instrument,
            fee: request.fee,
            total: request.amount,
            expires_at,
            instructions: steps,
        })
    }

    async fn check_status(&self, lookup: &PaymentLookup) -> Result<PaymentStatus, GatewayError> {
        let response = http::send(
            NAME,
            self.http
                .get(format!(
                    "{}/v2/{}/status",
                    self.base_url,
                    urlencoding::encode(&lookup.reference)
                ))
                .basic_auth(&self.server_key, Some("")),
        )
        .await?;
        let status: ChargeResponse = response.json::<ChargeResponse>()?.ensure_accepted()?;
        Ok(resolve(
            &self.statuses,
            &status.transaction_status,
            status.fraud_status.as_deref(),
        ))
    }

    async fn health_check(&self) -> Result<(), GatewayError> {
        Ok(())
    }

    async fn cancel_payment(&self, lookup: &PaymentLookup) -> Result<(), GatewayError> {
        let response = http::send(
            NAME,
            self.http
                .post(format!(
                    "{}/v2/{}/cancel",
                    self.base_url,
                    urlencoding::encode(&lookup.reference)
                ))
                .basic_auth(&self.server_key, Some("")),
        )
        .await?;
        response.json::<ChargeResponse>()?.ensure_accepted()?;
        Ok(())
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Callbacks
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
struct Notification {
    #[serde(default)]
    order_id: String,
    #[serde(default)]
    status_code: String,
    #[serde(default)]
    gross_amount: String,
    #[serde(default)]
    signature_key: String,
    #[serde(default)]
    transaction_status: String,
    fraud_status: Option<String>,
}

pub struct MidtransWebhook {
    server_key: String,
    statuses: StatusMap,
}

impl MidtransWebhook {
    fn signature_payload(&self, n: &Notification) -> String {
        format!("{}{}{}{}", n.order_id, n.status_code, n.gross_amount, self.server_key)
    }
}

impl WebhookProtocol for MidtransWebhook {
    fn gateway(&self) -> &str {
        NAME
    }

    fn parse_callback(&self, callback: &InboundCallback<'_>) -> Result<CallbackEvent, CallbackError> {
        let notification: Notification = callback.json()?;
        if notification.signature_key.is_empty()
            || !verify::verify_sha512_hex(&self.signature_payload(&notification), &notification.signature_key)
        {
            return Err(CallbackError::InvalidSignature);
        }
        if notification.order_id.trim().is_empty() {
            return Err(CallbackError::MissingReference);
        }

        let status = resolve(
            &self.statuses,
            &notification.transaction_status,
            notification.fraud_status.as_deref(),
        );
        Ok(CallbackEvent {
            gateway: NAME.to_string(),
            reference: CallbackReference::Invoice(notification.order_id),
            status,
            paid_amount: notification
                .gross_amount
                .parse::<f64>()
                .ok()
                .map(|a| a.round() as i64),
            provider_status: notification.transaction_status,
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
    use crate::signing::symmetric::sha512_hex;
    use reqwest::header::HeaderMap;

    const SERVER_KEY: &str = "SB-Mid-server-test";

    fn client() -> MidtransClient {
        MidtransClient::new(MidtransConfig {
            server_key: SERVER_KEY.into(),
            ..Default::default()
        })
        .unwrap()
    }

    fn notification(status: &str, signature: String) -> Vec<u8> {
        serde_json::to_vec(&serde_json::json!({
            "order_id": "INV-1",
            "status_code": "200",
            "gross_amount": "94000.00",
            "signature_key": signature,
            "transaction_status": status,
        }))
        .unwrap()
    }

    fn signed(status: &str) -> Vec<u8> {
        notification(status, sha512_hex(format!("INV-120094000.00{}", SERVER_KEY).as_bytes()))
    }

    fn parse(body: &[u8]) -> Result<CallbackEvent, CallbackError> {
        let headers = HeaderMap::new();
        client().webhook().parse_callback(&InboundCallback {
            method: "POST",
            path: "/webhooks/MIDTRANS",
            headers: &headers,
            body,
        })
    }

    #[test]
    fn test_settlement_is_paid() {
        let event = parse(&signed("settlement")).unwrap();
        assert_eq!(event.status, PaymentStatus::Paid);
        assert_eq!(event.reference, CallbackReference::Invoice("INV-1".into()));
        assert_eq!(event.paid_amount, Some(94_000));
    }

    #[test]
    fn test_status_vocabulary() {
        assert_eq!(parse(&signed("expire")).unwrap().status, PaymentStatus::Expired);
        assert_eq!(parse(&signed("deny")).unwrap().status, PaymentStatus::Failed);
        assert_eq!(parse(&signed("refund")).unwrap().status, PaymentStatus::Refunded);
        assert_eq!(parse(&signed("pending")).unwrap().status, PaymentStatus::Pending);
    }

    #[test]
    fn test_bad_signature_rejected() {
        let err = parse(&notification("settlement", "00".repeat(64))).unwrap_err();
        assert_eq!(err, CallbackError::InvalidSignature);
    }

    #[test]
    fn test_challenged_capture_stays_pending() {
        let statuses = default_statuses();
        assert_eq!(resolve(&statuses, "capture", Some("challenge")), PaymentStatus::Pending);
        assert_eq!(resolve(&statuses, "capture", Some("accept")), PaymentStatus::Paid);
    }

    #[test]
    fn test_charge_bodies() {
        let client = client();
        let mut request = PaymentRequest::new("INV-9", 50_000, "QRIS");
        let body = client.charge_body(&request, "QRIS");
        assert_eq!(body["payment_type"], "qris");
        assert_eq!(body["qris"]["acquirer"], "gopay");
        assert_eq!(body["custom_expiry"]["expiry_duration"], 60);

        request.success_url = Some("https://shop.test/done".into());
        let body = client.charge_body(&request, "GOPAY");
        assert_eq!(body["payment_type"], "gopay");
        assert_eq!(body["gopay"]["enable_callback"], true);
    }

    #[test]
    fn test_non_2xx_status_code_is_rejection() {
        let response = ChargeResponse {
            status_code: "406".into(),
            status_message: "duplicate order ID".into(),
            transaction_id: String::new(),
            transaction_status: String::new(),
            fraud_status: None,
            qr_string: None,
            expiry_time: None,
            actions: vec![],
        };
        assert!(matches!(
            response.ensure_accepted(),
            Err(GatewayError::Rejected { code, .. }) if code == "406"
        ));
    }
}
