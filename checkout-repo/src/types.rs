//! Row structs for the SQLite adapter and their conversion into domain types.

use chrono::{DateTime, SecondsFormat, Utc};
use serde::de::DeserializeOwned;
use sqlx::FromRow;
use uuid::Uuid;

use checkout_types::{
    Currency, EventStatus, FeeModel, LedgerEntry, Order, OrderId, OutboxEvent, PaymentChannel,
    Pricing, Promo, RepoError, Sku, UsageCounts, UsageLimits,
};

// ─────────────────────────────────────────────────────────────────────────────
// Column helpers
// ─────────────────────────────────────────────────────────────────────────────

/// Fixed-width UTC timestamps so text comparison orders them correctly.
pub fn ts(at: DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Micros, true)
}

pub fn parse_ts(value: &str) -> Result<DateTime<Utc>, RepoError> {
    DateTime::parse_from_rfc3339(value)
        .map(|d| d.with_timezone(&Utc))
        .map_err(|e| RepoError::Database(format!("bad timestamp {}: {}", value, e)))
}

fn parse_opt_ts(value: Option<String>) -> Result<Option<DateTime<Utc>>, RepoError> {
    value.as_deref().map(parse_ts).transpose()
}

fn parse_uuid(value: &str) -> Result<Uuid, RepoError> {
    Uuid::parse_str(value).map_err(|e| RepoError::Database(e.to_string()))
}

fn parse<T: std::str::FromStr>(value: &str) -> Result<T, RepoError>
where
    T::Err: std::fmt::Display,
{
    value
        .parse()
        .map_err(|e: T::Err| RepoError::Database(e.to_string()))
}

pub fn from_json<T: DeserializeOwned>(value: &str) -> Result<T, RepoError> {
    serde_json::from_str(value).map_err(|e| RepoError::Database(e.to_string()))
}

pub fn to_json<T: serde::Serialize>(value: &T) -> Result<String, RepoError> {
    serde_json::to_string(value).map_err(|e| RepoError::Database(e.to_string()))
}

/// Serde name of a unit enum variant (`VIRTUAL_ACCOUNT`).
pub fn enum_name<T: serde::Serialize>(value: &T) -> Result<String, RepoError> {
    match serde_json::to_value(value) {
        Ok(serde_json::Value::String(s)) => Ok(s),
        Ok(other) => Err(RepoError::Database(format!("not a unit variant: {}", other))),
        Err(e) => Err(RepoError::Database(e.to_string())),
    }
}

fn enum_from_name<T: DeserializeOwned>(name: &str) -> Result<T, RepoError> {
    serde_json::from_value(serde_json::Value::String(name.to_string()))
        .map_err(|e| RepoError::Database(e.to_string()))
}

// ─────────────────────────────────────────────────────────────────────────────
// Orders
// ─────────────────────────────────────────────────────────────────────────────

pub const ORDER_COLUMNS: &str = "id, invoice, kind, user_id, sku_code, quantity, subtotal, discount, fee, total, \
     currency, channel, gateway, gateway_ref, instrument, promo_code, status, payment_status, \
     expires_at, paid_at, timeline, customer_name, customer_email, customer_phone, created_at, updated_at";

#[derive(FromRow)]
pub struct DbOrder {
    pub id: String,
    pub invoice: String,
    pub kind: String,
    pub user_id: Option<String>,
    pub sku_code: Option<String>,
    pub quantity: i64,
    pub subtotal: i64,
    pub discount: i64,
    pub fee: i64,
    pub total: i64,
    pub currency: String,
    pub channel: String,
    pub gateway: Option<String>,
    pub gateway_ref: Option<String>,
    pub instrument: Option<String>,
    pub promo_code: Option<String>,
    pub status: String,
    pub payment_status: String,
    pub expires_at: String,
    pub paid_at: Option<String>,
    pub timeline: String,
    pub customer_name: Option<String>,
    pub customer_email: Option<String>,
    pub customer_phone: Option<String>,
    pub created_at: String,
    pub updated_at: String,
}

impl DbOrder {
    pub fn into_domain(self) -> Result<Order, RepoError> {
        Ok(Order {
            id: OrderId::from_uuid(parse_uuid(&self.id)?),
            invoice: self.invoice,
            kind: parse(&self.kind)?,
            user_id: self.user_id,
            sku_code: self.sku_code,
            quantity: self.quantity,
            pricing: Pricing {
                subtotal: self.subtotal,
                discount: self.discount,
                fee: self.fee,
                total: self.total,
            },
            currency: parse(&self.currency)?,
            channel: self.channel,
            gateway: self.gateway,
            gateway_ref: self.gateway_ref,
            instrument: self.instrument.as_deref().map(from_json).transpose()?,
            promo_code: self.promo_code,
            status: parse(&self.status)?,
            payment_status: parse(&self.payment_status)?,
            expires_at: parse_ts(&self.expires_at)?,
            paid_at: parse_opt_ts(self.paid_at)?,
            timeline: from_json(&self.timeline)?,
            customer_name: self.customer_name,
            customer_email: self.customer_email,
            customer_phone: self.customer_phone,
            created_at: parse_ts(&self.created_at)?,
            updated_at: parse_ts(&self.updated_at)?,
        })
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Ledger
// ─────────────────────────────────────────────────────────────────────────────

#[derive(FromRow)]
pub struct DbLedgerEntry {
    pub id: String,
    pub user_id: String,
    pub direction: String,
    pub amount: i64,
    pub currency: String,
    pub balance_before: i64,
    pub balance_after: i64,
    pub reference_type: String,
    pub reference_id: String,
    pub description: String,
    pub created_at: String,
}

impl DbLedgerEntry {
    pub fn into_domain(self) -> Result<LedgerEntry, RepoError> {
        Ok(LedgerEntry {
            id: parse_uuid(&self.id)?,
            user_id: self.user_id,
            direction: parse(&self.direction)?,
            amount: self.amount,
            currency: parse(&self.currency)?,
            balance_before: self.balance_before,
            balance_after: self.balance_after,
            reference_type: parse(&self.reference_type)?,
            reference_id: self.reference_id,
            description: self.description,
            created_at: parse_ts(&self.created_at)?,
        })
    }
}

#[derive(FromRow)]
pub struct DbBalance {
    pub balance: i64,
}

#[derive(FromRow)]
pub struct DbUsageCounts {
    pub total: i64,
    pub daily: i64,
    pub per_user: i64,
    pub per_device: i64,
    pub per_ip: i64,
}

impl From<DbUsageCounts> for UsageCounts {
    fn from(row: DbUsageCounts) -> Self {
        Self {
            total: row.total,
            daily: row.daily,
            per_user: row.per_user,
            per_device: row.per_device,
            per_ip: row.per_ip,
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Outbox
// ─────────────────────────────────────────────────────────────────────────────

#[derive(FromRow)]
pub struct DbOutboxEvent {
    pub id: String,
    pub event_type: String,
    pub invoice: String,
    pub payload: String,
    pub status: String,
    pub created_at: String,
    pub processed_at: Option<String>,
    pub attempts: i32,
    pub last_error: Option<String>,
}

impl DbOutboxEvent {
    pub fn into_domain(self) -> Result<OutboxEvent, RepoError> {
        Ok(OutboxEvent {
            id: parse_uuid(&self.id)?,
            event_type: self.event_type,
            invoice: self.invoice,
            payload: from_json(&self.payload)?,
            status: parse::<EventStatus>(&self.status)?,
            created_at: parse_ts(&self.created_at)?,
            processed_at: parse_opt_ts(self.processed_at)?,
            attempts: self.attempts,
            last_error: self.last_error,
        })
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Catalog
// ─────────────────────────────────────────────────────────────────────────────

#[derive(FromRow)]
pub struct DbSku {
    pub code: String,
    pub product_code: String,
    pub name: String,
    pub price: i64,
    pub currency: String,
    pub active: bool,
}

impl DbSku {
    pub fn into_domain(self) -> Result<Sku, RepoError> {
        Ok(Sku {
            code: self.code,
            product_code: self.product_code,
            name: self.name,
            price: self.price,
            currency: parse::<Currency>(&self.currency)?,
            active: self.active,
        })
    }
}

#[derive(FromRow)]
pub struct DbChannel {
    pub code: String,
    pub name: String,
    pub kind: String,
    pub fee_fixed: i64,
    pub fee_percent_bps: i64,
    pub fee_min: i64,
    pub fee_max: i64,
    pub min_amount: i64,
    pub max_amount: i64,
    pub active: bool,
}

impl DbChannel {
    pub fn into_domain(self) -> Result<PaymentChannel, RepoError> {
        Ok(PaymentChannel {
            code: self.code,
            name: self.name,
            kind: enum_from_name(&self.kind)?,
            fee: FeeModel {
                fixed: self.fee_fixed,
                percent_bps: self.fee_percent_bps,
                min_fee: self.fee_min,
                max_fee: self.fee_max,
            },
            min_amount: self.min_amount,
            max_amount: self.max_amount,
            active: self.active,
        })
    }
}

#[derive(FromRow)]
pub struct DbPromo {
    pub id: String,
    pub code: String,
    pub title: String,
    pub active: bool,
    pub starts_at: Option<String>,
    pub expires_at: Option<String>,
    pub days_available: String,
    pub products: String,
    pub channels: String,
    pub regions: String,
    pub min_amount: i64,
    pub flat: i64,
    pub percent_bps: i64,
    pub max_discount: i64,
    pub max_usage: i64,
    pub max_daily_usage: i64,
    pub max_usage_per_user: i64,
    pub max_usage_per_device: i64,
    pub max_usage_per_ip: i64,
}

impl DbPromo {
    pub fn into_domain(self) -> Result<Promo, RepoError> {
        Ok(Promo {
            id: parse_uuid(&self.id)?,
            code: self.code,
            title: self.title,
            active: self.active,
            starts_at: parse_opt_ts(self.starts_at)?,
            expires_at: parse_opt_ts(self.expires_at)?,
            days_available: from_json(&self.days_available)?,
            products: from_json(&self.products)?,
            channels: from_json(&self.channels)?,
            regions: from_json(&self.regions)?,
            min_amount: self.min_amount,
            flat: self.flat,
            percent_bps: self.percent_bps,
            max_discount: self.max_discount,
            limits: UsageLimits {
                max_usage: self.max_usage,
                max_daily_usage: self.max_daily_usage,
                max_usage_per_user: self.max_usage_per_user,
                max_usage_per_device: self.max_usage_per_device,
                max_usage_per_ip: self.max_usage_per_ip,
            },
        })
    }
}
