//! Gateway-facing payment types: requests, instruments, statuses and health.

use std::collections::{BTreeMap, HashMap};
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use super::money::Currency;
use crate::error::DomainError;

/// A request to open a payment with a provider.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PaymentRequest {
    /// Our reference (the order invoice number).
    pub reference: String,
    /// Amount to collect, fee included.
    pub amount: i64,
    /// Portion of `amount` that is the channel fee.
    #[serde(default)]
    pub fee: i64,
    pub currency: Currency,
    pub channel: String,
    /// Explicit gateway override; routing table is used when absent.
    pub gateway: Option<String>,
    #[serde(with = "duration_secs")]
    pub expiry: Duration,
    pub description: String,
    pub customer_name: Option<String>,
    pub customer_email: Option<String>,
    pub customer_phone: Option<String>,
    pub callback_url: Option<String>,
    pub success_url: Option<String>,
    pub failure_url: Option<String>,
    #[serde(default)]
    pub metadata: BTreeMap<String, String>,
}

impl PaymentRequest {
    pub fn new(reference: impl Into<String>, amount: i64, channel: impl Into<String>) -> Self {
        Self {
            reference: reference.into(),
            amount,
            fee: 0,
            currency: Currency::IDR,
            channel: channel.into(),
            gateway: None,
            expiry: Duration::from_secs(60 * 60),
            description: String::new(),
            customer_name: None,
            customer_email: None,
            customer_phone: None,
            callback_url: None,
            success_url: None,
            failure_url: None,
            metadata: BTreeMap::new(),
        }
    }

    pub fn expires_at(&self, now: DateTime<Utc>) -> DateTime<Utc> {
        now + chrono::Duration::from_std(self.expiry).unwrap_or(chrono::Duration::hours(1))
    }

    /// Customer display name, falling back to the reference.
    pub fn display_name(&self) -> String {
        self.customer_name
            .clone()
            .filter(|n| !n.trim().is_empty())
            .unwrap_or_else(|| format!("Order {}", self.reference))
    }
}

/// Identifiers a provider may need to look a payment up again.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PaymentLookup {
    /// Our reference (invoice number).
    pub reference: String,
    /// The provider's identifier from `PaymentInstrument::gateway_ref`.
    pub gateway_ref: String,
}

impl PaymentLookup {
    pub fn new(reference: impl Into<String>, gateway_ref: impl Into<String>) -> Self {
        Self {
            reference: reference.into(),
            gateway_ref: gateway_ref.into(),
        }
    }
}

mod duration_secs {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_u64(d.as_secs())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        Ok(Duration::from_secs(u64::deserialize(d)?))
    }
}

/// The payable artifact. Exactly one variant per successful creation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Instrument {
    Qr {
        code: String,
        url: Option<String>,
    },
    VirtualAccount {
        number: String,
        bank_code: String,
        account_name: String,
    },
    Redirect {
        url: String,
    },
    RetailCode {
        code: String,
    },
}

/// Result of a successful `create_payment`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct PaymentInstrument {
    pub gateway: String,
    /// Provider-side identifier used for status checks and callback matching.
    pub gateway_ref: String,
    pub instrument: Instrument,
    pub fee: i64,
    pub total: i64,
    pub expires_at: DateTime<Utc>,
    pub instructions: Vec<String>,
}

/// Shared payment outcome vocabulary.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PaymentStatus {
    Pending,
    Paid,
    Expired,
    Failed,
    Refunded,
}

impl std::fmt::Display for PaymentStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            PaymentStatus::Pending => "PENDING",
            PaymentStatus::Paid => "PAID",
            PaymentStatus::Expired => "EXPIRED",
            PaymentStatus::Failed => "FAILED",
            PaymentStatus::Refunded => "REFUNDED",
        };
        f.write_str(s)
    }
}

impl std::str::FromStr for PaymentStatus {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "PENDING" => Ok(PaymentStatus::Pending),
            "PAID" => Ok(PaymentStatus::Paid),
            "EXPIRED" => Ok(PaymentStatus::Expired),
            "FAILED" => Ok(PaymentStatus::Failed),
            "REFUNDED" => Ok(PaymentStatus::Refunded),
            other => Err(DomainError::ValidationError(format!(
                "Unknown payment status: {}",
                other
            ))),
        }
    }
}

/// Provider-owned table from wire status codes to `PaymentStatus`.
///
/// Codes not in the table resolve to `fallback`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatusMap {
    entries: HashMap<String, PaymentStatus>,
    fallback: PaymentStatus,
}

impl StatusMap {
    pub fn new(fallback: PaymentStatus) -> Self {
        Self {
            entries: HashMap::new(),
            fallback,
        }
    }

    pub fn with(mut self, code: &str, status: PaymentStatus) -> Self {
        self.entries.insert(code.to_string(), status);
        self
    }

    pub fn insert(&mut self, code: impl Into<String>, status: PaymentStatus) {
        self.entries.insert(code.into(), status);
    }

    pub fn map(&self, code: &str) -> PaymentStatus {
        self.entries
            .get(code)
            .or_else(|| self.entries.get(&code.to_ascii_lowercase()))
            .or_else(|| self.entries.get(&code.to_ascii_uppercase()))
            .copied()
            .unwrap_or(self.fallback)
    }

    /// Applies overrides in `code=STATUS,code=STATUS` form.
    pub fn apply_overrides(&mut self, spec: &str) -> Result<(), DomainError> {
        for pair in spec.split(',').map(str::trim).filter(|p| !p.is_empty()) {
            let (code, status) = pair.split_once('=').ok_or_else(|| {
                DomainError::ValidationError(format!("Invalid status mapping: {}", pair))
            })?;
            self.entries
                .insert(code.trim().to_string(), status.parse()?);
        }
        Ok(())
    }
}

/// Gateway health as recorded by the periodic sweep. Advisory only.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum HealthStatus {
    Healthy,
    Degraded,
    Down,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct GatewayHealth {
    pub gateway: String,
    pub status: HealthStatus,
    pub message: Option<String>,
    pub latency_ms: u64,
    pub checked_at: DateTime<Utc>,
}

/// How a callback identifies the order it is about.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "value", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CallbackReference {
    /// Our invoice number, echoed back by the provider.
    Invoice(String),
    /// The provider's own identifier returned at creation time.
    GatewayRef(String),
}

/// A verified, parsed provider callback.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CallbackEvent {
    pub gateway: String,
    pub reference: CallbackReference,
    pub status: PaymentStatus,
    pub paid_amount: Option<i64>,
    pub provider_status: String,
    pub received_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_map_falls_back() {
        let map = StatusMap::new(PaymentStatus::Pending)
            .with("00", PaymentStatus::Paid)
            .with("05", PaymentStatus::Failed);
        assert_eq!(map.map("00"), PaymentStatus::Paid);
        assert_eq!(map.map("05"), PaymentStatus::Failed);
        assert_eq!(map.map("99"), PaymentStatus::Pending);
    }

    #[test]
    fn test_status_map_is_case_tolerant() {
        let map = StatusMap::new(PaymentStatus::Pending).with("settlement", PaymentStatus::Paid);
        assert_eq!(map.map("SETTLEMENT"), PaymentStatus::Paid);
    }

    #[test]
    fn test_status_map_overrides() {
        let mut map = StatusMap::new(PaymentStatus::Pending).with("03", PaymentStatus::Expired);
        map.apply_overrides("03=FAILED, 07=paid").unwrap();
        assert_eq!(map.map("03"), PaymentStatus::Failed);
        assert_eq!(map.map("07"), PaymentStatus::Paid);
        assert!(map.apply_overrides("bogus").is_err());
    }

    #[test]
    fn test_instrument_serializes_tagged() {
        let va = Instrument::VirtualAccount {
            number: "1234500001".into(),
            bank_code: "BRI".into(),
            account_name: "Order INV1".into(),
        };
        let json = serde_json::to_value(&va).unwrap();
        assert_eq!(json["type"], "VIRTUAL_ACCOUNT");
        assert_eq!(json["bank_code"], "BRI");
    }
}
