//! # Checkout Repository
//!
//! Concrete repository implementations (adapters) for the checkout engine.
//! Both adapters implement the `OrderRepository` and `CatalogRepository` ports;
//! `Repo` picks one from the database URL.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use checkout_types::{
    CatalogRepository, ChangeOutcome, Currency, EventStatus, LedgerEntry, LedgerPosting, Money,
    NewOrderEffects, Order, OrderId, OrderRepository, OutboxEvent, PaymentChannel, Promo,
    RepoError, SettlementEffects, Sku, StatusChange, UsageCounts, UsageQuery,
};

pub mod memory;
#[cfg(feature = "sqlite")]
pub mod sqlite;

#[cfg(feature = "sqlite")]
mod types;

pub mod outbox;
pub mod security;


pub use memory::MemoryRepo;
pub use outbox::OutboxDispatcher;
#[cfg(feature = "sqlite")]
pub use sqlite::SqliteRepo;

/// A failed outbox event is retried until it has this many attempts.
pub const MAX_DELIVERY_ATTEMPTS: i32 = 5;

/// Database URL selecting the in-memory adapter.
pub const MEMORY_URL: &str = "memory://";

enum Backend {
    #[cfg(feature = "sqlite")]
    Sqlite(SqliteRepo),
    Memory(MemoryRepo),
}

/// Unified repository wrapper over the SQLite and in-memory adapters.
pub struct Repo {
    inner: Backend,
}

/// Build and initialize a repository from a database URL.
///
/// `memory://` selects the in-memory adapter; anything else is handed to
/// SQLite, which connects and runs the migrations.
///
/// ```ignore
/// let repo = build_repo("sqlite://checkout.db?mode=rwc").await?;
/// let scratch = build_repo("memory://").await?;
/// ```
pub async fn build_repo(database_url: &str) -> anyhow::Result<Repo> {
    Repo::new(database_url).await
}

impl Repo {
    pub async fn new(database_url: &str) -> anyhow::Result<Self> {
        if database_url.starts_with(MEMORY_URL) {
            return Ok(Self::memory());
        }
        #[cfg(feature = "sqlite")]
        {
            let inner = SqliteRepo::new(database_url).await?;
            Ok(Self {
                inner: Backend::Sqlite(inner),
            })
        }
        #[cfg(not(feature = "sqlite"))]
        {
            anyhow::bail!("unsupported DATABASE_URL {}; build with the `sqlite` feature", database_url)
        }
    }

    pub fn memory() -> Self {
        Self {
            inner: Backend::Memory(MemoryRepo::new()),
        }
    }

    pub fn backend_name(&self) -> &'static str {
        match &self.inner {
            #[cfg(feature = "sqlite")]
            Backend::Sqlite(_) => "sqlite",
            Backend::Memory(_) => "memory",
        }
    }
}

/// Demo catalog entries seeded next to the default channels.
pub fn demo_skus() -> Vec<Sku> {
    let sku = |code: &str, product: &str, name: &str, price: i64| Sku {
        code: code.to_string(),
        product_code: product.to_string(),
        name: name.to_string(),
        price,
        currency: Currency::IDR,
        active: true,
    };
    vec![
        sku("MLBB_86", "MLBB", "86 Diamonds", 20_000),
        sku("MLBB_172", "MLBB", "172 Diamonds", 40_000),
        sku("MLBB_514", "MLBB", "514 Diamonds", 100_000),
        sku("FF_140", "FREEFIRE", "140 Diamonds", 20_000),
        sku("PUBGM_325", "PUBGM", "325 UC", 75_000),
    ]
}

/// Seeds the default channel catalog and demo SKUs into an empty catalog.
pub async fn seed_catalog<R: CatalogRepository>(repo: &R) -> Result<(), RepoError> {
    if repo.list_channels().await?.is_empty() {
        for channel in PaymentChannel::defaults() {
            repo.upsert_channel(&channel).await?;
        }
        tracing::info!("Seeded default payment channels");
    }
    for sku in demo_skus() {
        if repo.get_sku(&sku.code).await?.is_none() {
            repo.upsert_sku(&sku).await?;
        }
    }
    Ok(())
}

// ─────────────────────────────────────────────────────────────────────────────
// Implement the ports for Repo (delegation)
// ─────────────────────────────────────────────────────────────────────────────

macro_rules! delegate {
    ($self:ident, $repo:ident => $call:expr) => {
        match &$self.inner {
            #[cfg(feature = "sqlite")]
            Backend::Sqlite($repo) => $call.await,
            Backend::Memory($repo) => $call.await,
        }
    };
}

#[async_trait]
impl OrderRepository for Repo {
    async fn insert_order(
        &self,
        order: &Order,
        effects: NewOrderEffects,
    ) -> Result<Order, RepoError> {
        delegate!(self, r => r.insert_order(order, effects))
    }

    async fn get_order(&self, id: OrderId) -> Result<Option<Order>, RepoError> {
        delegate!(self, r => r.get_order(id))
    }

    async fn find_by_invoice(&self, invoice: &str) -> Result<Option<Order>, RepoError> {
        delegate!(self, r => r.find_by_invoice(invoice))
    }

    async fn find_by_gateway_ref(
        &self,
        gateway: &str,
        gateway_ref: &str,
    ) -> Result<Option<Order>, RepoError> {
        delegate!(self, r => r.find_by_gateway_ref(gateway, gateway_ref))
    }

    async fn apply_change(
        &self,
        id: OrderId,
        change: &StatusChange,
        effects: SettlementEffects,
    ) -> Result<ChangeOutcome, RepoError> {
        delegate!(self, r => r.apply_change(id, change, effects))
    }

    async fn list_overdue(&self, now: DateTime<Utc>, limit: i64) -> Result<Vec<Order>, RepoError> {
        delegate!(self, r => r.list_overdue(now, limit))
    }

    async fn promo_usage_counts(&self, query: &UsageQuery) -> Result<UsageCounts, RepoError> {
        delegate!(self, r => r.promo_usage_counts(query))
    }

    async fn balance(&self, user_id: &str, currency: Currency) -> Result<Money, RepoError> {
        delegate!(self, r => r.balance(user_id, currency))
    }

    async fn ledger_entries(&self, user_id: &str) -> Result<Vec<LedgerEntry>, RepoError> {
        delegate!(self, r => r.ledger_entries(user_id))
    }

    async fn pending_events(&self, limit: i64) -> Result<Vec<OutboxEvent>, RepoError> {
        delegate!(self, r => r.pending_events(limit))
    }

    async fn update_event_status(
        &self,
        id: Uuid,
        status: EventStatus,
        error: Option<String>,
    ) -> Result<(), RepoError> {
        delegate!(self, r => r.update_event_status(id, status, error))
    }
}

#[async_trait]
impl CatalogRepository for Repo {
    async fn get_sku(&self, code: &str) -> Result<Option<Sku>, RepoError> {
        delegate!(self, r => r.get_sku(code))
    }

    async fn upsert_sku(&self, sku: &Sku) -> Result<(), RepoError> {
        delegate!(self, r => r.upsert_sku(sku))
    }

    async fn get_channel(&self, code: &str) -> Result<Option<PaymentChannel>, RepoError> {
        delegate!(self, r => r.get_channel(code))
    }

    async fn list_channels(&self) -> Result<Vec<PaymentChannel>, RepoError> {
        delegate!(self, r => r.list_channels())
    }

    async fn upsert_channel(&self, channel: &PaymentChannel) -> Result<(), RepoError> {
        delegate!(self, r => r.upsert_channel(channel))
    }

    async fn get_promo(&self, code: &str) -> Result<Option<Promo>, RepoError> {
        delegate!(self, r => r.get_promo(code))
    }

    async fn upsert_promo(&self, promo: &Promo) -> Result<(), RepoError> {
        delegate!(self, r => r.upsert_promo(promo))
    }

    async fn adjust_balance(&self, posting: LedgerPosting) -> Result<LedgerEntry, RepoError> {
        delegate!(self, r => r.adjust_balance(posting))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_memory_url_selects_memory_backend() {
        let repo = build_repo("memory://").await.unwrap();
        assert_eq!(repo.backend_name(), "memory");
    }

    #[tokio::test]
    async fn test_seed_is_idempotent() {
        let repo = Repo::memory();
        seed_catalog(&repo).await.unwrap();
        seed_catalog(&repo).await.unwrap();

        let channels = repo.list_channels().await.unwrap();
        assert_eq!(channels.len(), PaymentChannel::defaults().len());
        let sku = repo.get_sku("MLBB_86").await.unwrap().unwrap();
        assert_eq!(sku.price, 20_000);
    }
}
