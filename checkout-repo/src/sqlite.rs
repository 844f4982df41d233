//! SQLite repository adapter.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::{SqliteConnection, SqlitePool};
use std::str::FromStr;
use std::time::Duration;
use uuid::Uuid;

use checkout_types::{
    CatalogRepository, ChangeOutcome, Currency, DomainError, EventStatus, LedgerEntry,
    LedgerPosting, Money, NewOrderEffects, Order, OrderId, OrderRepository, OutboxEvent,
    PaymentChannel, Promo, PromoUsage, RepoError, SettlementEffects, Sku, StatusChange,
    UsageCounts, UsageQuery,
};

use crate::MAX_DELIVERY_ATTEMPTS;
use crate::types::{
    DbBalance, DbChannel, DbLedgerEntry, DbOrder, DbOutboxEvent, DbPromo, DbSku, DbUsageCounts,
    ORDER_COLUMNS, enum_name, to_json, ts,
};

const MIGRATIONS: [&str; 3] = [
    include_str!("../migrations/0001_create_orders.sql"),
    include_str!("../migrations/0002_create_order_events.sql"),
    include_str!("../migrations/0003_create_catalog.sql"),
];

fn db_err(e: sqlx::Error) -> RepoError {
    RepoError::Database(e.to_string())
}

fn tx_err(e: sqlx::Error) -> RepoError {
    RepoError::Transaction(e.to_string())
}

// ─────────────────────────────────────────────────────────────────────────────
// SQLite Repository
// ─────────────────────────────────────────────────────────────────────────────

/// SQLite repository implementation.
pub struct SqliteRepo {
    pool: SqlitePool,
}

impl SqliteRepo {
    /// Creates a new SQLite repository with automatic migration.
    pub async fn new(database_url: &str) -> anyhow::Result<Self> {
        let in_memory = database_url.contains(":memory:") || database_url.contains("mode=memory");

        // Ensure on-disk SQLite target directory exists.
        if let Some(path) = database_url.strip_prefix("sqlite://") {
            let path = path.split('?').next().unwrap_or(path);
            if !in_memory {
                if let Some(parent) = std::path::Path::new(path).parent() {
                    if !parent.as_os_str().is_empty() {
                        tokio::fs::create_dir_all(parent).await?;
                    }
                }
            }
        }

        let options = SqliteConnectOptions::from_str(database_url)?
            .create_if_missing(true)
            .foreign_keys(true)
            .busy_timeout(Duration::from_secs(5));

        // Every connection to `:memory:` is a separate database.
        let max_connections = if in_memory { 1 } else { 8 };
        let pool = SqlitePoolOptions::new()
            .max_connections(max_connections)
            .connect_with(options)
            .await?;

        let repo = Self { pool };
        repo.create_schema().await?;
        Ok(repo)
    }

    /// Returns a reference to the connection pool.
    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// Creates the database schema. Safe to run repeatedly.
    pub async fn create_schema(&self) -> Result<(), RepoError> {
        for ddl in MIGRATIONS {
            sqlx::raw_sql(ddl).execute(&self.pool).await.map_err(db_err)?;
        }
        Ok(())
    }

    async fn fetch_order(
        conn: &mut SqliteConnection,
        column: &str,
        value: &str,
    ) -> Result<Option<Order>, RepoError> {
        let sql = format!("SELECT {} FROM orders WHERE {} = ?", ORDER_COLUMNS, column);
        let row: Option<DbOrder> = sqlx::query_as(&sql)
            .bind(value)
            .fetch_optional(conn)
            .await
            .map_err(db_err)?;
        row.map(DbOrder::into_domain).transpose()
    }

    async fn usage_counts(
        conn: &mut SqliteConnection,
        query: &UsageQuery,
    ) -> Result<UsageCounts, RepoError> {
        let row: DbUsageCounts = sqlx::query_as(
            r#"SELECT
                   COUNT(*) AS total,
                   COALESCE(SUM(CASE WHEN redeemed_at >= ? AND redeemed_at < ? THEN 1 ELSE 0 END), 0) AS daily,
                   COALESCE(SUM(CASE WHEN user_id = ? THEN 1 ELSE 0 END), 0) AS per_user,
                   COALESCE(SUM(CASE WHEN device_id = ? THEN 1 ELSE 0 END), 0) AS per_device,
                   COALESCE(SUM(CASE WHEN ip_address = ? THEN 1 ELSE 0 END), 0) AS per_ip
               FROM promo_usages WHERE promo_id = ? AND redeemed_at IS NOT NULL"#,
        )
        .bind(ts(query.day.start))
        .bind(ts(query.day.end))
        .bind(&query.user_id)
        .bind(&query.device_id)
        .bind(&query.ip_address)
        .bind(query.promo_id.to_string())
        .fetch_one(conn)
        .await
        .map_err(db_err)?;
        Ok(row.into())
    }

    async fn insert_usage(conn: &mut SqliteConnection, usage: &PromoUsage) -> Result<(), RepoError> {
        sqlx::query(
            r#"INSERT INTO promo_usages (id, promo_id, order_id, user_id, device_id, ip_address, discount, created_at, redeemed_at)
               VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)"#,
        )
        .bind(usage.id.to_string())
        .bind(usage.promo_id.to_string())
        .bind(usage.order_id.to_string())
        .bind(&usage.user_id)
        .bind(&usage.device_id)
        .bind(&usage.ip_address)
        .bind(usage.discount)
        .bind(ts(usage.created_at))
        .bind(usage.redeemed_at.map(ts))
        .execute(conn)
        .await
        .map_err(db_err)?;
        Ok(())
    }

    async fn read_balance(
        conn: &mut SqliteConnection,
        user_id: &str,
        currency: Currency,
    ) -> Result<Money, RepoError> {
        let row: Option<DbBalance> =
            sqlx::query_as(r#"SELECT balance FROM balances WHERE user_id = ? AND currency = ?"#)
                .bind(user_id)
                .bind(currency.to_string())
                .fetch_optional(conn)
                .await
                .map_err(db_err)?;
        match row {
            Some(row) => Ok(Money::new(row.balance, currency)?),
            None => Ok(Money::zero(currency)),
        }
    }

    /// Writes a ledger entry and its balance. Returns `None` when the
    /// reference already moved the balance in this direction.
    async fn post(
        conn: &mut SqliteConnection,
        posting: LedgerPosting,
        now: DateTime<Utc>,
    ) -> Result<Option<LedgerEntry>, RepoError> {
        let existing: Option<(String,)> = sqlx::query_as(
            r#"SELECT id FROM ledger_entries WHERE reference_id = ? AND direction = ?"#,
        )
        .bind(&posting.reference_id)
        .bind(posting.direction.as_ref())
        .fetch_optional(&mut *conn)
        .await
        .map_err(db_err)?;
        if existing.is_some() {
            tracing::debug!(key = %posting.idempotency_key(), "Ledger posting already applied");
            return Ok(None);
        }

        let currency = posting.amount.currency();
        let before = Self::read_balance(&mut *conn, &posting.user_id, currency).await?;
        let after = posting.balance_after(before)?;

        sqlx::query(
            r#"INSERT INTO balances (user_id, currency, balance, updated_at) VALUES (?, ?, ?, ?)
               ON CONFLICT (user_id, currency) DO UPDATE SET balance = excluded.balance, updated_at = excluded.updated_at"#,
        )
        .bind(&posting.user_id)
        .bind(currency.to_string())
        .bind(after.amount())
        .bind(ts(now))
        .execute(&mut *conn)
        .await
        .map_err(db_err)?;

        let entry = posting.into_entry(before, after, now);
        sqlx::query(
            r#"INSERT INTO ledger_entries (id, user_id, direction, amount, currency, balance_before, balance_after,
                                           reference_type, reference_id, description, created_at)
               VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)"#,
        )
        .bind(entry.id.to_string())
        .bind(&entry.user_id)
        .bind(entry.direction.as_ref())
        .bind(entry.amount)
        .bind(entry.currency.to_string())
        .bind(entry.balance_before)
        .bind(entry.balance_after)
        .bind(entry.reference_type.as_ref())
        .bind(&entry.reference_id)
        .bind(&entry.description)
        .bind(ts(entry.created_at))
        .execute(&mut *conn)
        .await
        .map_err(db_err)?;

        Ok(Some(entry))
    }

    async fn insert_event(conn: &mut SqliteConnection, event: &OutboxEvent) -> Result<(), RepoError> {
        sqlx::query(
            r#"INSERT INTO order_events (id, event_type, invoice, payload, status, created_at, attempts)
               VALUES (?, ?, ?, ?, ?, ?, 0)"#,
        )
        .bind(event.id.to_string())
        .bind(&event.event_type)
        .bind(&event.invoice)
        .bind(to_json(&event.payload)?)
        .bind(event.status.as_ref())
        .bind(ts(event.created_at))
        .execute(conn)
        .await
        .map_err(db_err)?;
        Ok(())
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// OrderRepository
// ─────────────────────────────────────────────────────────────────────────────

#[async_trait]
impl OrderRepository for SqliteRepo {
    async fn insert_order(
        &self,
        order: &Order,
        effects: NewOrderEffects,
    ) -> Result<Order, RepoError> {
        let mut tx = self.pool.begin().await.map_err(tx_err)?;

        // Inserting first takes the write lock, so the usage recheck below
        // cannot race a concurrent redemption.
        let sql = format!(
            "INSERT INTO orders ({}) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
            ORDER_COLUMNS
        );
        let instrument = order.instrument.as_ref().map(to_json).transpose()?;
        sqlx::query(&sql)
            .bind(order.id.to_string())
            .bind(&order.invoice)
            .bind(order.kind.as_ref())
            .bind(&order.user_id)
            .bind(&order.sku_code)
            .bind(order.quantity)
            .bind(order.pricing.subtotal)
            .bind(order.pricing.discount)
            .bind(order.pricing.fee)
            .bind(order.pricing.total)
            .bind(order.currency.to_string())
            .bind(&order.channel)
            .bind(&order.gateway)
            .bind(&order.gateway_ref)
            .bind(instrument)
            .bind(&order.promo_code)
            .bind(order.status.as_ref())
            .bind(order.payment_status.as_ref())
            .bind(ts(order.expires_at))
            .bind(order.paid_at.map(ts))
            .bind(to_json(&order.timeline)?)
            .bind(&order.customer_name)
            .bind(&order.customer_email)
            .bind(&order.customer_phone)
            .bind(ts(order.created_at))
            .bind(ts(order.updated_at))
            .execute(&mut *tx)
            .await
            .map_err(|e| match e {
                sqlx::Error::Database(ref db) if db.is_unique_violation() => {
                    RepoError::Conflict(format!("invoice {} already exists", order.invoice))
                }
                e => db_err(e),
            })?;

        if let Some(reservation) = effects.promo {
            let counts = Self::usage_counts(&mut tx, &reservation.query).await?;
            reservation
                .limits
                .check(&counts)
                .map_err(DomainError::PromoRejected)?;
            Self::insert_usage(&mut tx, &reservation.usage).await?;
        }

        if let Some(debit) = effects.debit {
            Self::post(&mut tx, debit, order.created_at).await?;
        }
        if let Some(event) = effects.outbox {
            Self::insert_event(&mut tx, &event).await?;
        }

        tx.commit().await.map_err(tx_err)?;
        Ok(order.clone())
    }

    async fn get_order(&self, id: OrderId) -> Result<Option<Order>, RepoError> {
        let mut conn = self.pool.acquire().await.map_err(db_err)?;
        Self::fetch_order(&mut conn, "id", &id.to_string()).await
    }

    async fn find_by_invoice(&self, invoice: &str) -> Result<Option<Order>, RepoError> {
        let mut conn = self.pool.acquire().await.map_err(db_err)?;
        Self::fetch_order(&mut conn, "invoice", invoice).await
    }

    async fn find_by_gateway_ref(
        &self,
        gateway: &str,
        gateway_ref: &str,
    ) -> Result<Option<Order>, RepoError> {
        let sql = format!(
            "SELECT {} FROM orders WHERE gateway = ? AND gateway_ref = ? ORDER BY created_at DESC LIMIT 1",
            ORDER_COLUMNS
        );
        let row: Option<DbOrder> = sqlx::query_as(&sql)
            .bind(gateway)
            .bind(gateway_ref)
            .fetch_optional(&self.pool)
            .await
            .map_err(db_err)?;
        row.map(DbOrder::into_domain).transpose()
    }

    async fn apply_change(
        &self,
        id: OrderId,
        change: &StatusChange,
        effects: SettlementEffects,
    ) -> Result<ChangeOutcome, RepoError> {
        let id_str = id.to_string();
        let mut tx = self.pool.begin().await.map_err(tx_err)?;

        let result = sqlx::query(
            r#"UPDATE orders
               SET status = ?, payment_status = ?, paid_at = ?, updated_at = ?,
                   timeline = json_insert(timeline, '$[#]', json(?))
               WHERE id = ? AND status = ?"#,
        )
        .bind(change.to.as_ref())
        .bind(change.payment_status.as_ref())
        .bind(change.paid_at.map(ts))
        .bind(ts(change.entry.at))
        .bind(to_json(&change.entry)?)
        .bind(&id_str)
        .bind(change.from.as_ref())
        .execute(&mut *tx)
        .await
        .map_err(db_err)?;

        if result.rows_affected() == 0 {
            let current = Self::fetch_order(&mut tx, "id", &id_str)
                .await?
                .ok_or(RepoError::NotFound)?;
            tx.rollback().await.map_err(tx_err)?;
            return Ok(ChangeOutcome::Conflict(current));
        }

        if let Some(credit) = effects.credit {
            Self::post(&mut tx, credit, change.entry.at).await?;
        }
        if let Some(event) = effects.outbox {
            Self::insert_event(&mut tx, &event).await?;
        }
        if effects.redeem_promo {
            sqlx::query(
                r#"UPDATE promo_usages SET redeemed_at = ?
                   WHERE order_id = ? AND redeemed_at IS NULL"#,
            )
            .bind(ts(change.entry.at))
            .bind(&id_str)
            .execute(&mut *tx)
            .await
            .map_err(db_err)?;
        }

        let updated = Self::fetch_order(&mut tx, "id", &id_str)
            .await?
            .ok_or(RepoError::NotFound)?;
        tx.commit().await.map_err(tx_err)?;
        Ok(ChangeOutcome::Applied(updated))
    }

    async fn list_overdue(&self, now: DateTime<Utc>, limit: i64) -> Result<Vec<Order>, RepoError> {
        let sql = format!(
            "SELECT {} FROM orders WHERE status = 'PENDING' AND payment_status != 'PAID' AND expires_at <= ? \
             ORDER BY expires_at ASC LIMIT ?",
            ORDER_COLUMNS
        );
        let rows: Vec<DbOrder> = sqlx::query_as(&sql)
            .bind(ts(now))
            .bind(limit)
            .fetch_all(&self.pool)
            .await
            .map_err(db_err)?;
        rows.into_iter().map(DbOrder::into_domain).collect()
    }

    async fn promo_usage_counts(&self, query: &UsageQuery) -> Result<UsageCounts, RepoError> {
        let mut conn = self.pool.acquire().await.map_err(db_err)?;
        Self::usage_counts(&mut conn, query).await
    }

    async fn balance(&self, user_id: &str, currency: Currency) -> Result<Money, RepoError> {
        let mut conn = self.pool.acquire().await.map_err(db_err)?;
        Self::read_balance(&mut conn, user_id, currency).await
    }

    async fn ledger_entries(&self, user_id: &str) -> Result<Vec<LedgerEntry>, RepoError> {
        let rows: Vec<DbLedgerEntry> = sqlx::query_as(
            r#"SELECT id, user_id, direction, amount, currency, balance_before, balance_after,
                      reference_type, reference_id, description, created_at
               FROM ledger_entries WHERE user_id = ?
               ORDER BY created_at DESC, rowid DESC"#,
        )
        .bind(user_id)
        .fetch_all(&self.pool)
        .await
        .map_err(db_err)?;
        rows.into_iter().map(DbLedgerEntry::into_domain).collect()
    }

    async fn pending_events(&self, limit: i64) -> Result<Vec<OutboxEvent>, RepoError> {
        let rows: Vec<DbOutboxEvent> = sqlx::query_as(
            r#"SELECT id, event_type, invoice, payload, status, created_at, processed_at, attempts, last_error
               FROM order_events
               WHERE status = 'PENDING' OR (status = 'FAILED' AND attempts < ?)
               ORDER BY created_at ASC LIMIT ?"#,
        )
        .bind(MAX_DELIVERY_ATTEMPTS)
        .bind(limit)
        .fetch_all(&self.pool)
        .await
        .map_err(db_err)?;
        rows.into_iter().map(DbOutboxEvent::into_domain).collect()
    }

    async fn update_event_status(
        &self,
        id: Uuid,
        status: EventStatus,
        error: Option<String>,
    ) -> Result<(), RepoError> {
        let processed_at = (status == EventStatus::Completed).then(|| ts(Utc::now()));
        let result = sqlx::query(
            r#"UPDATE order_events
               SET status = ?, last_error = ?, processed_at = COALESCE(?, processed_at), attempts = attempts + 1
               WHERE id = ?"#,
        )
        .bind(status.as_ref())
        .bind(error)
        .bind(processed_at)
        .bind(id.to_string())
        .execute(&self.pool)
        .await
        .map_err(db_err)?;

        if result.rows_affected() == 0 {
            return Err(RepoError::NotFound);
        }
        Ok(())
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// CatalogRepository
// ─────────────────────────────────────────────────────────────────────────────

#[async_trait]
impl CatalogRepository for SqliteRepo {
    async fn get_sku(&self, code: &str) -> Result<Option<Sku>, RepoError> {
        let row: Option<DbSku> = sqlx::query_as(
            r#"SELECT code, product_code, name, price, currency, active FROM skus WHERE code = ?"#,
        )
        .bind(code)
        .fetch_optional(&self.pool)
        .await
        .map_err(db_err)?;
        row.map(DbSku::into_domain).transpose()
    }

    async fn upsert_sku(&self, sku: &Sku) -> Result<(), RepoError> {
        sqlx::query(
            r#"INSERT INTO skus (code, product_code, name, price, currency, active) VALUES (?, ?, ?, ?, ?, ?)
               ON CONFLICT (code) DO UPDATE SET product_code = excluded.product_code, name = excluded.name,
                   price = excluded.price, currency = excluded.currency, active = excluded.active"#,
        )
        .bind(&sku.code)
        .bind(&sku.product_code)
        .bind(&sku.name)
        .bind(sku.price)
        .bind(sku.currency.to_string())
        .bind(sku.active)
        .execute(&self.pool)
        .await
        .map_err(db_err)?;
        Ok(())
    }

    async fn get_channel(&self, code: &str) -> Result<Option<PaymentChannel>, RepoError> {
        let row: Option<DbChannel> = sqlx::query_as(
            r#"SELECT code, name, kind, fee_fixed, fee_percent_bps, fee_min, fee_max, min_amount, max_amount, active
               FROM payment_channels WHERE code = ?"#,
        )
        .bind(code)
        .fetch_optional(&self.pool)
        .await
        .map_err(db_err)?;
        row.map(DbChannel::into_domain).transpose()
    }

    async fn list_channels(&self) -> Result<Vec<PaymentChannel>, RepoError> {
        let rows: Vec<DbChannel> = sqlx::query_as(
            r#"SELECT code, name, kind, fee_fixed, fee_percent_bps, fee_min, fee_max, min_amount, max_amount, active
               FROM payment_channels ORDER BY code"#,
        )
        .fetch_all(&self.pool)
        .await
        .map_err(db_err)?;
        rows.into_iter().map(DbChannel::into_domain).collect()
    }

    async fn upsert_channel(&self, channel: &PaymentChannel) -> Result<(), RepoError> {
        sqlx::query(
            r#"INSERT INTO payment_channels (code, name, kind, fee_fixed, fee_percent_bps, fee_min, fee_max,
                                             min_amount, max_amount, active)
               VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
               ON CONFLICT (code) DO UPDATE SET name = excluded.name, kind = excluded.kind,
                   fee_fixed = excluded.fee_fixed, fee_percent_bps = excluded.fee_percent_bps,
                   fee_min = excluded.fee_min, fee_max = excluded.fee_max,
                   min_amount = excluded.min_amount, max_amount = excluded.max_amount, active = excluded.active"#,
        )
        .bind(&channel.code)
        .bind(&channel.name)
        .bind(enum_name(&channel.kind)?)
        .bind(channel.fee.fixed)
        .bind(channel.fee.percent_bps)
        .bind(channel.fee.min_fee)
        .bind(channel.fee.max_fee)
        .bind(channel.min_amount)
        .bind(channel.max_amount)
        .bind(channel.active)
        .execute(&self.pool)
        .await
        .map_err(db_err)?;
        Ok(())
    }

    async fn get_promo(&self, code: &str) -> Result<Option<Promo>, RepoError> {
        let row: Option<DbPromo> = sqlx::query_as(
            r#"SELECT id, code, title, active, starts_at, expires_at, days_available, products, channels, regions,
                      min_amount, flat, percent_bps, max_discount, max_usage, max_daily_usage,
                      max_usage_per_user, max_usage_per_device, max_usage_per_ip
               FROM promos WHERE code = ?"#,
        )
        .bind(code.trim().to_ascii_uppercase())
        .fetch_optional(&self.pool)
        .await
        .map_err(db_err)?;
        row.map(DbPromo::into_domain).transpose()
    }

    async fn upsert_promo(&self, promo: &Promo) -> Result<(), RepoError> {
        sqlx::query(
            r#"INSERT INTO promos (id, code, title, active, starts_at, expires_at, days_available, products, channels,
                                   regions, min_amount, flat, percent_bps, max_discount, max_usage, max_daily_usage,
                                   max_usage_per_user, max_usage_per_device, max_usage_per_ip)
               VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
               ON CONFLICT (code) DO UPDATE SET title = excluded.title, active = excluded.active,
                   starts_at = excluded.starts_at, expires_at = excluded.expires_at,
                   days_available = excluded.days_available, products = excluded.products,
                   channels = excluded.channels, regions = excluded.regions, min_amount = excluded.min_amount,
                   flat = excluded.flat, percent_bps = excluded.percent_bps, max_discount = excluded.max_discount,
                   max_usage = excluded.max_usage, max_daily_usage = excluded.max_daily_usage,
                   max_usage_per_user = excluded.max_usage_per_user,
                   max_usage_per_device = excluded.max_usage_per_device,
                   max_usage_per_ip = excluded.max_usage_per_ip"#,
        )
        .bind(promo.id.to_string())
        .bind(promo.code.to_ascii_uppercase())
        .bind(&promo.title)
        .bind(promo.active)
        .bind(promo.starts_at.map(ts))
        .bind(promo.expires_at.map(ts))
        .bind(to_json(&promo.days_available)?)
        .bind(to_json(&promo.products)?)
        .bind(to_json(&promo.channels)?)
        .bind(to_json(&promo.regions)?)
        .bind(promo.min_amount)
        .bind(promo.flat)
        .bind(promo.percent_bps)
        .bind(promo.max_discount)
        .bind(promo.limits.max_usage)
        .bind(promo.limits.max_daily_usage)
        .bind(promo.limits.max_usage_per_user)
        .bind(promo.limits.max_usage_per_device)
        .bind(promo.limits.max_usage_per_ip)
        .execute(&self.pool)
        .await
        .map_err(db_err)?;
        Ok(())
    }

    async fn adjust_balance(&self, posting: LedgerPosting) -> Result<LedgerEntry, RepoError> {
        let key = posting.idempotency_key();
        let mut tx = self.pool.begin().await.map_err(tx_err)?;
        let entry = Self::post(&mut tx, posting, Utc::now())
            .await?
            .ok_or_else(|| RepoError::Conflict(format!("ledger posting {} already applied", key)))?;
        tx.commit().await.map_err(tx_err)?;
        Ok(entry)
    }
}
