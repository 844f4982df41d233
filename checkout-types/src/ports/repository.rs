//! Repository port traits.
//!
//! Adapters (SQLite, in-memory) implement these. Every operation that moves
//! a balance, reserves promo usage or changes order status MUST be atomic.

use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::domain::{
    ChangeOutcome, Currency, EventStatus, LedgerEntry, LedgerPosting, Money, NewOrderEffects,
    Order, OrderId, OutboxEvent, PaymentChannel, Promo, SettlementEffects, Sku, StatusChange,
    UsageCounts, UsageQuery,
};
use crate::error::RepoError;

/// Orders, the balance ledger, promo usage and the fulfillment outbox.
#[async_trait::async_trait]
pub trait OrderRepository: Send + Sync + 'static {
    // ─────────────────────────────────────────────────────────────────────────────
    // Orders (MUST be atomic)
    // ─────────────────────────────────────────────────────────────────────────────

    /// Inserts a new order together with its effects in one atomic unit.
    ///
    /// A promo reservation rechecks its usage limits inside the unit and fails
    /// with `DomainError::PromoRejected`. A debit that would overdraw fails with
    /// `DomainError::InsufficientBalance`. Either failure persists nothing.
    async fn insert_order(&self, order: &Order, effects: NewOrderEffects)
    -> Result<Order, RepoError>;

    async fn get_order(&self, id: OrderId) -> Result<Option<Order>, RepoError>;

    async fn find_by_invoice(&self, invoice: &str) -> Result<Option<Order>, RepoError>;

    async fn find_by_gateway_ref(
        &self,
        gateway: &str,
        gateway_ref: &str,
    ) -> Result<Option<Order>, RepoError>;

    /// Writes `change` only if the stored status still equals `change.from`,
    /// committing `effects` in the same atomic unit.
    async fn apply_change(
        &self,
        id: OrderId,
        change: &StatusChange,
        effects: SettlementEffects,
    ) -> Result<ChangeOutcome, RepoError>;

    /// PENDING, unpaid orders whose deadline is at or before `now`.
    async fn list_overdue(&self, now: DateTime<Utc>, limit: i64) -> Result<Vec<Order>, RepoError>;

    // ─────────────────────────────────────────────────────────────────────────────
    // Promo usage & ledger
    // ─────────────────────────────────────────────────────────────────────────────

    async fn promo_usage_counts(&self, query: &UsageQuery) -> Result<UsageCounts, RepoError>;

    async fn balance(&self, user_id: &str, currency: Currency) -> Result<Money, RepoError>;

    /// Newest first.
    async fn ledger_entries(&self, user_id: &str) -> Result<Vec<LedgerEntry>, RepoError>;

    // ─────────────────────────────────────────────────────────────────────────────
    // Fulfillment outbox
    // ─────────────────────────────────────────────────────────────────────────────

    async fn pending_events(&self, limit: i64) -> Result<Vec<OutboxEvent>, RepoError>;

    async fn update_event_status(
        &self,
        id: Uuid,
        status: EventStatus,
        error: Option<String>,
    ) -> Result<(), RepoError>;
}

/// Read side of the catalog plus the upserts used for seeding.
#[async_trait::async_trait]
pub trait CatalogRepository: Send + Sync + 'static {
    async fn get_sku(&self, code: &str) -> Result<Option<Sku>, RepoError>;

    async fn upsert_sku(&self, sku: &Sku) -> Result<(), RepoError>;

    async fn get_channel(&self, code: &str) -> Result<Option<PaymentChannel>, RepoError>;

    async fn list_channels(&self) -> Result<Vec<PaymentChannel>, RepoError>;

    async fn upsert_channel(&self, channel: &PaymentChannel) -> Result<(), RepoError>;

    /// Case-insensitive lookup.
    async fn get_promo(&self, code: &str) -> Result<Option<Promo>, RepoError>;

    async fn upsert_promo(&self, promo: &Promo) -> Result<(), RepoError>;

    /// Writes an ADJUSTMENT entry outside any order.
    async fn adjust_balance(&self, posting: LedgerPosting) -> Result<LedgerEntry, RepoError>;
}
