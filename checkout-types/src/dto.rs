//! Data Transfer Objects (DTOs) for requests and responses.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use crate::domain::{
    Currency, GatewayHealth, LedgerEntry, Order, OrderKind, OrderStatus, PaymentInstrument,
    PaymentState, Pricing, TimelineEntry,
};

fn default_quantity() -> i64 {
    1
}

// ─────────────────────────────────────────────────────────────────────────────
// Order DTOs
// ─────────────────────────────────────────────────────────────────────────────

/// Request to price an order without creating it.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct QuoteRequest {
    #[schema(example = "MLBB_86")]
    pub sku_code: String,
    #[serde(default = "default_quantity")]
    pub quantity: i64,
    #[schema(example = "VA_BRI")]
    pub channel: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub promo_code: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub device_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    #[schema(example = "ID")]
    pub region: Option<String>,
}

/// Priced order, nothing persisted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct QuoteResponse {
    pub sku_code: String,
    pub quantity: i64,
    pub unit_price: i64,
    pub channel: String,
    pub currency: Currency,
    pub pricing: Pricing,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub promo_code: Option<String>,
}

/// Request to create a purchase order.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct CreateOrderRequest {
    #[schema(example = "MLBB_86")]
    pub sku_code: String,
    #[serde(default = "default_quantity")]
    pub quantity: i64,
    #[schema(example = "VA_BRI")]
    pub channel: String,
    /// Explicit gateway override; the routing table is used when absent.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub gateway: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub promo_code: Option<String>,
    /// Required for the BALANCE channel.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub device_id: Option<String>,
    /// Filled from the connection by the HTTP layer.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ip_address: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub region: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub customer_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub customer_email: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub customer_phone: Option<String>,
}

impl From<&CreateOrderRequest> for QuoteRequest {
    fn from(req: &CreateOrderRequest) -> Self {
        Self {
            sku_code: req.sku_code.clone(),
            quantity: req.quantity,
            channel: req.channel.clone(),
            promo_code: req.promo_code.clone(),
            user_id: req.user_id.clone(),
            device_id: req.device_id.clone(),
            region: req.region.clone(),
        }
    }
}

/// Request to top up a wallet balance.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct CreateDepositRequest {
    pub user_id: String,
    #[schema(example = 100000)]
    pub amount: i64,
    #[serde(default)]
    pub currency: Currency,
    #[schema(example = "QRIS")]
    pub channel: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub gateway: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub customer_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub customer_email: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub customer_phone: Option<String>,
}

/// Public view of an order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct OrderView {
    #[schema(example = "INV20250301AB12CD34")]
    pub invoice: String,
    pub kind: OrderKind,
    pub status: OrderStatus,
    pub payment_status: PaymentState,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sku_code: Option<String>,
    pub quantity: i64,
    pub pricing: Pricing,
    pub currency: Currency,
    pub channel: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub gateway: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub payment: Option<PaymentInstrument>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub promo_code: Option<String>,
    pub expires_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub paid_at: Option<DateTime<Utc>>,
    pub timeline: Vec<TimelineEntry>,
    pub created_at: DateTime<Utc>,
}

impl From<&Order> for OrderView {
    fn from(order: &Order) -> Self {
        Self {
            invoice: order.invoice.clone(),
            kind: order.kind,
            status: order.status,
            payment_status: order.payment_status,
            sku_code: order.sku_code.clone(),
            quantity: order.quantity,
            pricing: order.pricing,
            currency: order.currency,
            channel: order.channel.clone(),
            gateway: order.gateway.clone(),
            payment: order.instrument.clone(),
            promo_code: order.promo_code.clone(),
            expires_at: order.expires_at,
            paid_at: order.paid_at,
            timeline: order.timeline.clone(),
            created_at: order.created_at,
        }
    }
}

impl From<Order> for OrderView {
    fn from(order: Order) -> Self {
        Self::from(&order)
    }
}

/// Administrative fulfillment result for a paid order.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct FulfillmentRequest {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

// ─────────────────────────────────────────────────────────────────────────────
// Balance DTOs
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct BalanceResponse {
    pub user_id: String,
    #[schema(example = 94000)]
    pub balance: i64,
    pub currency: Currency,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct LedgerResponse {
    pub user_id: String,
    pub entries: Vec<LedgerEntry>,
}

// ─────────────────────────────────────────────────────────────────────────────
// Gateway admin DTOs
// ─────────────────────────────────────────────────────────────────────────────

/// Channel routing entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct RouteView {
    #[schema(example = "VA_BRI")]
    pub channel: String,
    #[schema(example = "BRI_DIRECT")]
    pub primary: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    #[schema(example = "XENDIT")]
    pub fallback: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct SetRouteRequest {
    pub primary: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub fallback: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct GatewayHealthResponse {
    pub gateways: Vec<GatewayHealth>,
}
