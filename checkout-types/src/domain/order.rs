//! Order domain model and the settlement state machine.

use chrono::{DateTime, Utc};
use rand::Rng;
use rand::distr::Alphanumeric;
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use uuid::Uuid;

use super::ledger::LedgerPosting;
use super::money::Currency;
use super::payment::{PaymentInstrument, PaymentStatus};
use super::promo::PromoReservation;
use super::event::OutboxEvent;
use crate::error::DomainError;

/// Unique identifier for an Order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, ToSchema)]
#[serde(transparent)]
pub struct OrderId(Uuid);

impl OrderId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    pub fn from_uuid(uuid: Uuid) -> Self {
        Self(uuid)
    }

    pub fn as_uuid(&self) -> &Uuid {
        &self.0
    }

    pub fn into_uuid(self) -> Uuid {
        self.0
    }
}

impl Default for OrderId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for OrderId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl std::str::FromStr for OrderId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Self(Uuid::parse_str(s)?))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OrderKind {
    /// A SKU purchase.
    Purchase,
    /// A wallet top-up.
    Deposit,
}

impl OrderKind {
    pub fn invoice_prefix(&self) -> &'static str {
        match self {
            OrderKind::Purchase => "INV",
            OrderKind::Deposit => "DEP",
        }
    }
}

impl AsRef<str> for OrderKind {
    fn as_ref(&self) -> &str {
        match self {
            OrderKind::Purchase => "PURCHASE",
            OrderKind::Deposit => "DEPOSIT",
        }
    }
}

impl std::str::FromStr for OrderKind {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "PURCHASE" => Ok(OrderKind::Purchase),
            "DEPOSIT" => Ok(OrderKind::Deposit),
            other => Err(DomainError::ValidationError(format!(
                "Unknown order kind: {}",
                other
            ))),
        }
    }
}

/// Order lifecycle status.
///
/// `PENDING` is the only initial state. `SUCCESS`, `FAILED`, `EXPIRED`,
/// `CANCELLED` and `REFUNDED` are terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OrderStatus {
    Pending,
    Paid,
    Processing,
    Success,
    Failed,
    Expired,
    Cancelled,
    Refunded,
}

/// Result of asking the state machine for a move.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transition {
    Apply(OrderStatus),
    /// Already there, or the order is terminal. Not an error.
    NoOp,
}

impl OrderStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            OrderStatus::Success
                | OrderStatus::Failed
                | OrderStatus::Expired
                | OrderStatus::Cancelled
                | OrderStatus::Refunded
        )
    }

    pub fn can_transition_to(&self, next: OrderStatus) -> bool {
        use OrderStatus::*;
        matches!(
            (self, next),
            (Pending, Paid | Processing | Failed | Expired | Cancelled)
                | (Paid, Processing | Success | Failed | Cancelled | Refunded)
                | (Processing, Success | Failed | Cancelled | Refunded)
        )
    }

    pub fn transition_to(&self, next: OrderStatus) -> Result<Transition, DomainError> {
        if self.is_terminal() || *self == next {
            return Ok(Transition::NoOp);
        }
        if self.can_transition_to(next) {
            Ok(Transition::Apply(next))
        } else {
            Err(DomainError::InvalidTransition {
                from: *self,
                to: next,
            })
        }
    }
}

impl AsRef<str> for OrderStatus {
    fn as_ref(&self) -> &str {
        match self {
            OrderStatus::Pending => "PENDING",
            OrderStatus::Paid => "PAID",
            OrderStatus::Processing => "PROCESSING",
            OrderStatus::Success => "SUCCESS",
            OrderStatus::Failed => "FAILED",
            OrderStatus::Expired => "EXPIRED",
            OrderStatus::Cancelled => "CANCELLED",
            OrderStatus::Refunded => "REFUNDED",
        }
    }
}

impl std::fmt::Display for OrderStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_ref())
    }
}

impl std::str::FromStr for OrderStatus {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        use OrderStatus::*;
        Ok(match s {
            "PENDING" => Pending,
            "PAID" => Paid,
            "PROCESSING" => Processing,
            "SUCCESS" => Success,
            "FAILED" => Failed,
            "EXPIRED" => Expired,
            "CANCELLED" => Cancelled,
            "REFUNDED" => Refunded,
            other => {
                return Err(DomainError::ValidationError(format!(
                    "Unknown order status: {}",
                    other
                )));
            }
        })
    }
}

/// Whether money has been collected for the order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PaymentState {
    Unpaid,
    Paid,
    Expired,
}

impl AsRef<str> for PaymentState {
    fn as_ref(&self) -> &str {
        match self {
            PaymentState::Unpaid => "UNPAID",
            PaymentState::Paid => "PAID",
            PaymentState::Expired => "EXPIRED",
        }
    }
}

impl std::str::FromStr for PaymentState {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "UNPAID" => Ok(PaymentState::Unpaid),
            "PAID" => Ok(PaymentState::Paid),
            "EXPIRED" => Ok(PaymentState::Expired),
            other => Err(DomainError::ValidationError(format!(
                "Unknown payment state: {}",
                other
            ))),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct TimelineEntry {
    pub status: OrderStatus,
    pub message: String,
    pub at: DateTime<Utc>,
}

/// Price breakdown in minor units.
///
/// Always `total == subtotal - discount + fee` and `total >= 0`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct Pricing {
    pub subtotal: i64,
    pub discount: i64,
    pub fee: i64,
    pub total: i64,
}

impl Pricing {
    /// Discount is clamped into `[0, subtotal]`, fee is added after discount.
    pub fn compute(subtotal: i64, discount: i64, fee: i64) -> Self {
        let subtotal = subtotal.max(0);
        let discount = discount.clamp(0, subtotal);
        let fee = fee.max(0);
        Self {
            subtotal,
            discount,
            fee,
            total: (subtotal - discount + fee).max(0),
        }
    }
}

/// A checkout order (purchase or deposit).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Order {
    pub id: OrderId,
    pub invoice: String,
    pub kind: OrderKind,
    pub user_id: Option<String>,
    pub sku_code: Option<String>,
    pub quantity: i64,
    pub pricing: Pricing,
    pub currency: Currency,
    pub channel: String,
    pub gateway: Option<String>,
    pub gateway_ref: Option<String>,
    pub instrument: Option<PaymentInstrument>,
    pub promo_code: Option<String>,
    pub status: OrderStatus,
    pub payment_status: PaymentState,
    pub expires_at: DateTime<Utc>,
    pub paid_at: Option<DateTime<Utc>>,
    pub timeline: Vec<TimelineEntry>,
    pub customer_name: Option<String>,
    pub customer_email: Option<String>,
    pub customer_phone: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Order {
    /// A new PENDING, UNPAID order with the creation entry on its timeline.
    pub fn new(
        kind: OrderKind,
        invoice: String,
        channel: impl Into<String>,
        pricing: Pricing,
        currency: Currency,
        expires_at: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            id: OrderId::new(),
            invoice,
            kind,
            user_id: None,
            sku_code: None,
            quantity: 1,
            pricing,
            currency,
            channel: channel.into(),
            gateway: None,
            gateway_ref: None,
            instrument: None,
            promo_code: None,
            status: OrderStatus::Pending,
            payment_status: PaymentState::Unpaid,
            expires_at,
            paid_at: None,
            timeline: vec![TimelineEntry {
                status: OrderStatus::Pending,
                message: "Order created".to_string(),
                at: now,
            }],
            customer_name: None,
            customer_email: None,
            customer_phone: None,
            created_at: now,
            updated_at: now,
        }
    }

    /// `INV`/`DEP` + UTC `yyyymmdd` + 8 uppercase alphanumerics.
    pub fn generate_invoice(kind: OrderKind, now: DateTime<Utc>) -> String {
        let suffix: String = rand::rng()
            .sample_iter(&Alphanumeric)
            .take(8)
            .map(|b| char::from(b).to_ascii_uppercase())
            .collect();
        format!("{}{}{}", kind.invoice_prefix(), now.format("%Y%m%d"), suffix)
    }

    /// Records the provider payment opened for this order.
    pub fn attach_instrument(&mut self, instrument: PaymentInstrument) {
        self.gateway = Some(instrument.gateway.clone());
        self.gateway_ref = Some(instrument.gateway_ref.clone());
        self.expires_at = instrument.expires_at;
        self.instrument = Some(instrument);
    }

    pub fn is_paid(&self) -> bool {
        self.payment_status == PaymentState::Paid
    }

    /// PENDING, never paid, and past its payment deadline.
    pub fn is_overdue(&self, now: DateTime<Utc>) -> bool {
        self.status == OrderStatus::Pending && !self.is_paid() && self.expires_at <= now
    }

    /// Plans the effect of a provider-reported payment status.
    ///
    /// Returns `Ok(None)` when nothing should change: the order is terminal,
    /// already in the target state, or the signal does not apply.
    pub fn plan_payment_status(
        &self,
        status: PaymentStatus,
        source: &str,
        now: DateTime<Utc>,
    ) -> Result<Option<StatusChange>, DomainError> {
        let (target, payment_status, message) = match status {
            PaymentStatus::Pending => return Ok(None),
            PaymentStatus::Paid => (
                OrderStatus::Processing,
                PaymentState::Paid,
                format!("Payment confirmed via {}", source),
            ),
            PaymentStatus::Failed => (
                OrderStatus::Failed,
                self.payment_status,
                format!("Payment failed via {}", source),
            ),
            PaymentStatus::Expired => (
                OrderStatus::Expired,
                PaymentState::Expired,
                format!("Payment expired via {}", source),
            ),
            PaymentStatus::Refunded => {
                if !self.is_paid() {
                    return Ok(None);
                }
                (
                    OrderStatus::Refunded,
                    self.payment_status,
                    format!("Payment refunded via {}", source),
                )
            }
        };
        self.plan(target, payment_status, message, now)
    }

    /// Plans settlement from the internal balance: straight to PAID.
    pub fn plan_balance_payment(&self, now: DateTime<Utc>) -> Result<Option<StatusChange>, DomainError> {
        self.plan(
            OrderStatus::Paid,
            PaymentState::Paid,
            "Paid with account balance".to_string(),
            now,
        )
    }

    /// Plans an administrative move (cancel, fulfillment result).
    pub fn plan_transition(
        &self,
        target: OrderStatus,
        message: impl Into<String>,
        now: DateTime<Utc>,
    ) -> Result<Option<StatusChange>, DomainError> {
        let payment_status = match target {
            OrderStatus::Expired => PaymentState::Expired,
            _ => self.payment_status,
        };
        self.plan(target, payment_status, message.into(), now)
    }

    fn plan(
        &self,
        target: OrderStatus,
        payment_status: PaymentState,
        message: String,
        now: DateTime<Utc>,
    ) -> Result<Option<StatusChange>, DomainError> {
        match self.status.transition_to(target)? {
            Transition::NoOp => Ok(None),
            Transition::Apply(to) => {
                let first_payment = payment_status == PaymentState::Paid && !self.is_paid();
                Ok(Some(StatusChange {
                    from: self.status,
                    to,
                    payment_status,
                    paid_at: if first_payment { Some(now) } else { self.paid_at },
                    entry: TimelineEntry {
                        status: to,
                        message,
                        at: now,
                    },
                    first_payment,
                }))
            }
        }
    }

    pub fn apply(&mut self, change: &StatusChange) {
        self.status = change.to;
        self.payment_status = change.payment_status;
        self.paid_at = change.paid_at;
        self.updated_at = change.entry.at;
        self.timeline.push(change.entry.clone());
    }
}

/// A planned status move, applied with compare-and-set on `from`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatusChange {
    pub from: OrderStatus,
    pub to: OrderStatus,
    pub payment_status: PaymentState,
    pub paid_at: Option<DateTime<Utc>>,
    pub entry: TimelineEntry,
    /// True only for the move that first marks the order paid.
    pub first_payment: bool,
}

/// Outcome of a compare-and-set status write.
#[derive(Debug, Clone, PartialEq)]
pub enum ChangeOutcome {
    /// The change was written; carries the updated order.
    Applied(Order),
    /// The stored status no longer matched `from`; carries the current order.
    Conflict(Order),
}

/// Writes that must commit in the same atomic unit as the order insert.
#[derive(Debug, Clone, Default)]
pub struct NewOrderEffects {
    /// Staged promo usage; already redeemed when the order is inserted paid.
    pub promo: Option<PromoReservation>,
    /// Balance-channel debit.
    pub debit: Option<LedgerPosting>,
    /// Written when the order is inserted already paid.
    pub outbox: Option<OutboxEvent>,
}

/// Writes that must commit with the first paid transition, and only then.
#[derive(Debug, Clone, Default)]
pub struct SettlementEffects {
    /// Deposit credit.
    pub credit: Option<LedgerPosting>,
    pub outbox: Option<OutboxEvent>,
    /// Marks the order's staged promo usage redeemed.
    pub redeem_promo: bool,
}
