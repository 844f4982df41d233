use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::order::Order;

pub const ORDER_PAID: &str = "ORDER_PAID";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EventStatus {
    #[default]
    Pending,
    Processing,
    Completed,
    Failed,
}

impl AsRef<str> for EventStatus {
    fn as_ref(&self) -> &str {
        match self {
            Self::Pending => "PENDING",
            Self::Processing => "PROCESSING",
            Self::Completed => "COMPLETED",
            Self::Failed => "FAILED",
        }
    }
}

impl std::fmt::Display for EventStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_ref())
    }
}

impl std::str::FromStr for EventStatus {
    type Err = crate::error::DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "PENDING" => Ok(Self::Pending),
            "PROCESSING" => Ok(Self::Processing),
            "COMPLETED" => Ok(Self::Completed),
            "FAILED" => Ok(Self::Failed),
            other => Err(crate::error::DomainError::ValidationError(format!(
                "Unknown event status: {}",
                other
            ))),
        }
    }
}

/// Fulfillment hand-off, written in the same atomic unit as the status
/// change that produced it and delivered later by the dispatcher.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OutboxEvent {
    pub id: Uuid,
    pub event_type: String,
    pub invoice: String,
    pub payload: serde_json::Value,
    pub status: EventStatus,
    pub created_at: DateTime<Utc>,
    pub processed_at: Option<DateTime<Utc>>,
    pub attempts: i32,
    pub last_error: Option<String>,
}

impl OutboxEvent {
    pub fn new(event_type: impl Into<String>, invoice: impl Into<String>, payload: serde_json::Value) -> Self {
        Self {
            id: Uuid::new_v4(),
            event_type: event_type.into(),
            invoice: invoice.into(),
            payload,
            status: EventStatus::Pending,
            created_at: Utc::now(),
            processed_at: None,
            attempts: 0,
            last_error: None,
        }
    }

    pub fn order_paid(order: &Order) -> Self {
        let payload = serde_json::json!({
            "invoice": order.invoice,
            "kind": order.kind,
            "user_id": order.user_id,
            "sku_code": order.sku_code,
            "quantity": order.quantity,
            "channel": order.channel,
            "gateway": order.gateway,
            "total": order.pricing.total,
            "currency": order.currency,
            "paid_at": order.paid_at,
        });
        Self::new(ORDER_PAID, order.invoice.clone(), payload)
    }
}
