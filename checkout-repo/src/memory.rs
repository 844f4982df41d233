//! In-memory repository adapter, selected with `DATABASE_URL=memory://`.
//!
//! One mutex guards all state, so every trait method is a single atomic unit.

use std::collections::{BTreeMap, HashMap};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::Mutex;
use uuid::Uuid;

use checkout_types::{
    CatalogRepository, ChangeOutcome, Currency, DomainError, EventStatus, LedgerEntry,
    LedgerPosting, Money, NewOrderEffects, Order, OrderId, OrderRepository, OrderStatus,
    OutboxEvent, PaymentChannel, PaymentState, Promo, PromoUsage, RepoError, SettlementEffects,
    Sku, StatusChange, UsageCounts, UsageQuery,
};

use crate::MAX_DELIVERY_ATTEMPTS;

#[derive(Default)]
struct State {
    orders: HashMap<OrderId, Order>,
    balances: HashMap<(String, Currency), i64>,
    ledger: Vec<LedgerEntry>,
    usages: Vec<PromoUsage>,
    events: Vec<OutboxEvent>,
    skus: HashMap<String, Sku>,
    channels: BTreeMap<String, PaymentChannel>,
    promos: HashMap<String, Promo>,
}

impl State {
    fn usage_counts(&self, query: &UsageQuery) -> UsageCounts {
        UsageCounts::tally(query, &self.usages)
    }

    fn redeem_usage(&mut self, order_id: OrderId, at: DateTime<Utc>) {
        for usage in self
            .usages
            .iter_mut()
            .filter(|u| u.order_id == order_id && u.redeemed_at.is_none())
        {
            usage.redeemed_at = Some(at);
        }
    }

    fn balance(&self, user_id: &str, currency: Currency) -> Result<Money, RepoError> {
        let amount = self
            .balances
            .get(&(user_id.to_string(), currency))
            .copied()
            .unwrap_or(0);
        Ok(Money::new(amount, currency)?)
    }

    fn already_posted(&self, posting: &LedgerPosting) -> bool {
        self.ledger
            .iter()
            .any(|e| e.reference_id == posting.reference_id && e.direction == posting.direction)
    }

    /// Computes the entry without writing it.
    fn prepare(
        &self,
        posting: LedgerPosting,
        now: DateTime<Utc>,
    ) -> Result<Option<LedgerEntry>, RepoError> {
        if self.already_posted(&posting) {
            return Ok(None);
        }
        let before = self.balance(&posting.user_id, posting.amount.currency())?;
        let after = posting.balance_after(before)?;
        Ok(Some(posting.into_entry(before, after, now)))
    }

    fn commit_entry(&mut self, entry: LedgerEntry) {
        self.balances
            .insert((entry.user_id.clone(), entry.currency), entry.balance_after);
        self.ledger.push(entry);
    }
}

/// In-memory repository implementation.
#[derive(Default)]
pub struct MemoryRepo {
    state: Mutex<State>,
}

impl MemoryRepo {
    pub fn new() -> Self {
        Self::default()
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// OrderRepository
// ─────────────────────────────────────────────────────────────────────────────

#[async_trait]
impl OrderRepository for MemoryRepo {
    async fn insert_order(
        &self,
        order: &Order,
        effects: NewOrderEffects,
    ) -> Result<Order, RepoError> {
        let mut state = self.state.lock().await;

        if state.orders.values().any(|o| o.invoice == order.invoice) {
            return Err(RepoError::Conflict(format!(
                "invoice {} already exists",
                order.invoice
            )));
        }

        // Everything is checked before anything is written.
        if let Some(reservation) = &effects.promo {
            let counts = state.usage_counts(&reservation.query);
            reservation
                .limits
                .check(&counts)
                .map_err(DomainError::PromoRejected)?;
        }
        let debit = match effects.debit {
            Some(posting) => state.prepare(posting, order.created_at)?,
            None => None,
        };

        state.orders.insert(order.id, order.clone());
        if let Some(reservation) = effects.promo {
            state.usages.push(reservation.usage);
        }
        if let Some(entry) = debit {
            state.commit_entry(entry);
        }
        if let Some(event) = effects.outbox {
            state.events.push(event);
        }
        Ok(order.clone())
    }

    async fn get_order(&self, id: OrderId) -> Result<Option<Order>, RepoError> {
        Ok(self.state.lock().await.orders.get(&id).cloned())
    }

    async fn find_by_invoice(&self, invoice: &str) -> Result<Option<Order>, RepoError> {
        let state = self.state.lock().await;
        Ok(state.orders.values().find(|o| o.invoice == invoice).cloned())
    }

    async fn find_by_gateway_ref(
        &self,
        gateway: &str,
        gateway_ref: &str,
    ) -> Result<Option<Order>, RepoError> {
        let state = self.state.lock().await;
        Ok(state
            .orders
            .values()
            .filter(|o| {
                o.gateway.as_deref() == Some(gateway) && o.gateway_ref.as_deref() == Some(gateway_ref)
            })
            .max_by_key(|o| o.created_at)
            .cloned())
    }

    async fn apply_change(
        &self,
        id: OrderId,
        change: &StatusChange,
        effects: SettlementEffects,
    ) -> Result<ChangeOutcome, RepoError> {
        let mut state = self.state.lock().await;
        let current = state.orders.get(&id).cloned().ok_or(RepoError::NotFound)?;
        if current.status != change.from {
            return Ok(ChangeOutcome::Conflict(current));
        }

        let credit = match effects.credit {
            Some(posting) => state.prepare(posting, change.entry.at)?,
            None => None,
        };

        let mut updated = current;
        updated.apply(change);
        state.orders.insert(id, updated.clone());
        if let Some(entry) = credit {
            state.commit_entry(entry);
        }
        if let Some(event) = effects.outbox {
            state.events.push(event);
        }
        if effects.redeem_promo {
            state.redeem_usage(id, change.entry.at);
        }
        Ok(ChangeOutcome::Applied(updated))
    }

    async fn list_overdue(&self, now: DateTime<Utc>, limit: i64) -> Result<Vec<Order>, RepoError> {
        let state = self.state.lock().await;
        let mut overdue: Vec<Order> = state
            .orders
            .values()
            .filter(|o| {
                o.status == OrderStatus::Pending
                    && o.payment_status != PaymentState::Paid
                    && o.expires_at <= now
            })
            .cloned()
            .collect();
        overdue.sort_by_key(|o| o.expires_at);
        overdue.truncate(usize::try_from(limit).unwrap_or(0));
        Ok(overdue)
    }

    async fn promo_usage_counts(&self, query: &UsageQuery) -> Result<UsageCounts, RepoError> {
        Ok(self.state.lock().await.usage_counts(query))
    }

    async fn balance(&self, user_id: &str, currency: Currency) -> Result<Money, RepoError> {
        self.state.lock().await.balance(user_id, currency)
    }

    async fn ledger_entries(&self, user_id: &str) -> Result<Vec<LedgerEntry>, RepoError> {
        let state = self.state.lock().await;
        Ok(state
            .ledger
            .iter()
            .rev()
            .filter(|e| e.user_id == user_id)
            .cloned()
            .collect())
    }

    async fn pending_events(&self, limit: i64) -> Result<Vec<OutboxEvent>, RepoError> {
        let state = self.state.lock().await;
        Ok(state
            .events
            .iter()
            .filter(|e| {
                e.status == EventStatus::Pending
                    || (e.status == EventStatus::Failed && e.attempts < MAX_DELIVERY_ATTEMPTS)
            })
            .take(usize::try_from(limit).unwrap_or(0))
            .cloned()
            .collect())
    }

    async fn update_event_status(
        &self,
        id: Uuid,
        status: EventStatus,
        error: Option<String>,
    ) -> Result<(), RepoError> {
        let mut state = self.state.lock().await;
        let event = state
            .events
            .iter_mut()
            .find(|e| e.id == id)
            .ok_or(RepoError::NotFound)?;
        event.status = status;
        event.last_error = error;
        event.attempts += 1;
        if status == EventStatus::Completed {
            event.processed_at = Some(Utc::now());
        }
        Ok(())
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// CatalogRepository
// ─────────────────────────────────────────────────────────────────────────────

#[async_trait]
impl CatalogRepository for MemoryRepo {
    async fn get_sku(&self, code: &str) -> Result<Option<Sku>, RepoError> {
        Ok(self.state.lock().await.skus.get(code).cloned())
    }

    async fn upsert_sku(&self, sku: &Sku) -> Result<(), RepoError> {
        let mut state = self.state.lock().await;
        state.skus.insert(sku.code.clone(), sku.clone());
        Ok(())
    }

    async fn get_channel(&self, code: &str) -> Result<Option<PaymentChannel>, RepoError> {
        Ok(self.state.lock().await.channels.get(code).cloned())
    }

    async fn list_channels(&self) -> Result<Vec<PaymentChannel>, RepoError> {
        Ok(self.state.lock().await.channels.values().cloned().collect())
    }

    async fn upsert_channel(&self, channel: &PaymentChannel) -> Result<(), RepoError> {
        let mut state = self.state.lock().await;
        state.channels.insert(channel.code.clone(), channel.clone());
        Ok(())
    }

    async fn get_promo(&self, code: &str) -> Result<Option<Promo>, RepoError> {
        let key = code.trim().to_ascii_uppercase();
        Ok(self.state.lock().await.promos.get(&key).cloned())
    }

    async fn upsert_promo(&self, promo: &Promo) -> Result<(), RepoError> {
        let mut state = self.state.lock().await;
        let mut stored = promo.clone();
        stored.code = promo.code.to_ascii_uppercase();
        state.promos.insert(stored.code.clone(), stored);
        Ok(())
    }

    async fn adjust_balance(&self, posting: LedgerPosting) -> Result<LedgerEntry, RepoError> {
        let key = posting.idempotency_key();
        let mut state = self.state.lock().await;
        let entry = state
            .prepare(posting, Utc::now())?
            .ok_or_else(|| RepoError::Conflict(format!("ledger posting {} already applied", key)))?;
        state.commit_entry(entry.clone());
        Ok(entry)
    }
}
