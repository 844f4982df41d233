//! Settlement Application Service
//!
//! Prices orders, opens payments through the gateway manager and settles
//! balance orders. Status changes after creation go through the `Reconciler`.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tracing::{debug, info, instrument, warn};

use checkout_gateways::{GatewayManager, Route};
use checkout_types::{
    AppError, BalanceResponse, CatalogRepository, CreateDepositRequest, CreateOrderRequest,
    Currency, DayWindow, FulfillmentRequest, GatewayError, GatewayHealthResponse,
    LedgerPosting, LedgerResponse, Money, NewOrderEffects, Order, OrderKind, OrderRepository,
    OrderStatus, OrderView, OutboxEvent, PaymentChannel, PaymentInstrument, PaymentLookup,
    PaymentRequest, Pricing, Promo, PromoContext, PromoRejection, PromoReservation, PromoUsage,
    QuoteRequest, QuoteResponse, ReferenceType, RouteView, SetRouteRequest, Sku, UsageQuery,
};

use crate::reconcile::{Reconciler, Settled};

/// Knobs the service needs from configuration.
#[derive(Debug, Clone)]
pub struct SettlementConfig {
    /// How long a customer has to pay an external instrument.
    pub payment_expiry: Duration,
    /// How long past its deadline an order whose gateway cannot be polled
    /// stays open.
    pub expiry_grace: Duration,
    /// Base URL providers call back on, e.g. `https://shop.example.com`.
    pub public_base_url: Option<String>,
    /// Currency wallet balances are kept and reported in.
    pub wallet_currency: Currency,
}

impl Default for SettlementConfig {
    fn default() -> Self {
        Self {
            payment_expiry: Duration::from_secs(60 * 60),
            expiry_grace: Duration::from_secs(60 * 60),
            public_base_url: None,
            wallet_currency: Currency::IDR,
        }
    }
}

/// Everything the pricing step resolved for one request.
struct Priced {
    sku: Sku,
    quantity: i64,
    channel: PaymentChannel,
    pricing: Pricing,
    promo: Option<(Promo, UsageQuery)>,
}

impl Priced {
    fn quote(&self) -> QuoteResponse {
        QuoteResponse {
            sku_code: self.sku.code.clone(),
            quantity: self.quantity,
            unit_price: self.sku.price,
            channel: self.channel.code.clone(),
            currency: self.sku.currency,
            pricing: self.pricing,
            promo_code: self.promo.as_ref().map(|(p, _)| p.code.clone()),
        }
    }

    /// Usage row staged with the order. Only a paid order redeems it.
    fn reservation(&self, order: &Order, now: DateTime<Utc>) -> Option<PromoReservation> {
        self.promo.as_ref().map(|(promo, query)| PromoReservation {
            usage: PromoUsage {
                id: uuid::Uuid::new_v4(),
                promo_id: promo.id,
                order_id: order.id,
                user_id: query.user_id.clone(),
                device_id: query.device_id.clone(),
                ip_address: query.ip_address.clone(),
                discount: self.pricing.discount,
                created_at: now,
                redeemed_at: order.is_paid().then_some(now),
            },
            limits: promo.limits,
            query: query.clone(),
        })
    }
}

/// Application service for checkout operations.
///
/// Generic over the repository so the SQLite adapter, the in-memory adapter
/// and test mocks plug in unchanged.
pub struct SettlementService<R> {
    repo: Arc<R>,
    gateways: Arc<GatewayManager>,
    reconciler: Reconciler<R>,
    config: SettlementConfig,
}

impl<R: OrderRepository + CatalogRepository> SettlementService<R> {
    pub fn new(repo: Arc<R>, gateways: Arc<GatewayManager>) -> Self {
        Self::with_config(repo, gateways, SettlementConfig::default())
    }

    pub fn with_config(
        repo: Arc<R>,
        gateways: Arc<GatewayManager>,
        config: SettlementConfig,
    ) -> Self {
        let reconciler = Reconciler::new(repo.clone(), gateways.clone(), config.expiry_grace);
        Self {
            repo,
            gateways,
            reconciler,
            config,
        }
    }

    pub fn repo(&self) -> &Arc<R> {
        &self.repo
    }

    pub fn gateways(&self) -> &Arc<GatewayManager> {
        &self.gateways
    }

    pub fn reconciler(&self) -> &Reconciler<R> {
        &self.reconciler
    }

    // ─────────────────────────────────────────────────────────────────────────────
    // Orders
    // ─────────────────────────────────────────────────────────────────────────────

    /// Prices an order without persisting anything or reserving promo usage.
    #[instrument(skip(self, req), fields(sku = %req.sku_code, channel = %req.channel))]
    pub async fn quote(&self, req: QuoteRequest) -> Result<QuoteResponse, AppError> {
        let priced = self.price(&req, None, Utc::now()).await?;
        Ok(priced.quote())
    }

    /// Creates a purchase order.
    ///
    /// BALANCE orders are debited and marked PAID in the same atomic insert.
    /// Every other channel opens a payment first; nothing is stored when the
    /// gateway fails.
    #[instrument(skip(self, req), fields(sku = %req.sku_code, channel = %req.channel))]
    pub async fn create_order(&self, req: CreateOrderRequest) -> Result<OrderView, AppError> {
        let now = Utc::now();
        let priced = self
            .price(&QuoteRequest::from(&req), req.ip_address.as_deref(), now)
            .await?;

        let mut order = Order::new(
            OrderKind::Purchase,
            Order::generate_invoice(OrderKind::Purchase, now),
            priced.channel.code.clone(),
            priced.pricing,
            priced.sku.currency,
            now + self.expiry(),
            now,
        );
        order.user_id = non_empty(req.user_id.as_deref());
        order.sku_code = Some(priced.sku.code.clone());
        order.quantity = priced.quantity;
        order.promo_code = priced.promo.as_ref().map(|(p, _)| p.code.clone());
        order.customer_name = req.customer_name.clone();
        order.customer_email = req.customer_email.clone();
        order.customer_phone = req.customer_phone.clone();
        if priced.channel.is_balance() {
            return self.settle_with_balance(order, &priced, now).await;
        }
        let promo = priced.reservation(&order, now);

        let description = format!("{} x{}", priced.sku.name, priced.quantity);
        let instrument = self
            .open_payment(&order, req.gateway.clone(), description)
            .await?;
        order.attach_instrument(instrument);
        self.store(order, NewOrderEffects {
            promo,
            ..Default::default()
        })
        .await
    }

    /// Creates a wallet top-up order, credited on its first paid transition.
    #[instrument(skip(self, req), fields(user = %req.user_id, channel = %req.channel))]
    pub async fn create_deposit(&self, req: CreateDepositRequest) -> Result<OrderView, AppError> {
        let user_id = non_empty(Some(req.user_id.as_str()))
            .ok_or_else(|| AppError::BadRequest("user_id is required".into()))?;
        if req.amount <= 0 {
            return Err(AppError::BadRequest("Amount must be positive".into()));
        }
        let channel = self.channel(&req.channel).await?;
        if channel.is_balance() {
            return Err(AppError::BadRequest(
                "A deposit cannot be paid with the balance it funds".into(),
            ));
        }
        channel.ensure_accepts(req.amount)?;

        let now = Utc::now();
        let pricing = Pricing::compute(req.amount, 0, channel.fee.fee_for(req.amount));
        let mut order = Order::new(
            OrderKind::Deposit,
            Order::generate_invoice(OrderKind::Deposit, now),
            channel.code.clone(),
            pricing,
            req.currency,
            now + self.expiry(),
            now,
        );
        order.user_id = Some(user_id);
        order.customer_name = req.customer_name.clone();
        order.customer_email = req.customer_email.clone();
        order.customer_phone = req.customer_phone.clone();

        let description = format!("Balance top-up {}", Money::new(req.amount, req.currency)?);
        let instrument = self
            .open_payment(&order, req.gateway.clone(), description)
            .await?;
        order.attach_instrument(instrument);
        self.store(order, NewOrderEffects::default()).await
    }

    /// Reads an order. An overdue PENDING order is settled on the way out.
    #[instrument(skip(self))]
    pub async fn get_order(&self, invoice: &str) -> Result<OrderView, AppError> {
        let order = self.find(invoice).await?;
        let now = Utc::now();
        if !order.is_overdue(now) {
            return Ok(order.into());
        }
        match self.reconciler.settle_overdue(order.clone(), now).await {
            Ok(reconciled) => Ok(reconciled.order.into()),
            Err(e) => {
                warn!("On-read expiry failed: {}", e);
                Ok(order.into())
            }
        }
    }

    /// Polls the order's gateway and applies the reported status.
    pub async fn poll_order(&self, invoice: &str) -> Result<OrderView, AppError> {
        self.reconciler.poll(invoice).await.map(Into::into)
    }

    /// Administrative cancel. The provider instrument is invalidated on a
    /// best-effort basis.
    #[instrument(skip(self))]
    pub async fn cancel_order(&self, invoice: &str) -> Result<OrderView, AppError> {
        let order = self.find(invoice).await?;
        let was_paid = order.is_paid();
        let order = match self
            .reconciler
            .commit(order, |o, now| {
                o.plan_transition(OrderStatus::Cancelled, "Cancelled by operator", now)
            })
            .await?
        {
            Settled::Applied(order) => order,
            Settled::Unchanged(order) => return Ok(order.into()),
            Settled::Rejected(_, e) => return Err(e.into()),
        };
        info!(invoice, "Order cancelled");

        if let (false, Some(gateway), Some(gateway_ref)) =
            (was_paid, &order.gateway, &order.gateway_ref)
        {
            let lookup = PaymentLookup::new(order.invoice.clone(), gateway_ref.clone());
            match self.gateways.cancel_payment(gateway, &lookup).await {
                Ok(()) => debug!(gateway = %gateway, "Provider payment cancelled"),
                Err(GatewayError::Unsupported { .. }) => {}
                Err(e) => warn!(gateway = %gateway, "Provider cancel failed: {}", e),
            }
        }
        Ok(order.into())
    }

    /// Records the fulfillment result of a paid order.
    #[instrument(skip(self, req), fields(success = req.success))]
    pub async fn mark_fulfilled(
        &self,
        invoice: &str,
        req: FulfillmentRequest,
    ) -> Result<OrderView, AppError> {
        let order = self.find(invoice).await?;
        if !order.is_paid() {
            return Err(AppError::BadRequest(format!(
                "Order {} has not been paid",
                invoice
            )));
        }
        let (target, default_message) = if req.success {
            (OrderStatus::Success, "Order fulfilled")
        } else {
            (OrderStatus::Failed, "Fulfillment failed")
        };
        let message = req.message.unwrap_or_else(|| default_message.to_string());

        match self
            .reconciler
            .commit(order, |o, now| o.plan_transition(target, message.clone(), now))
            .await?
        {
            Settled::Applied(order) | Settled::Unchanged(order) => Ok(order.into()),
            Settled::Rejected(_, e) => Err(e.into()),
        }
    }

    // ─────────────────────────────────────────────────────────────────────────────
    // Balance
    // ─────────────────────────────────────────────────────────────────────────────

    pub async fn balance(&self, user_id: &str) -> Result<BalanceResponse, AppError> {
        let balance = self.repo.balance(user_id, self.config.wallet_currency).await?;
        Ok(BalanceResponse {
            user_id: user_id.to_string(),
            balance: balance.amount(),
            currency: balance.currency(),
        })
    }

    pub async fn ledger(&self, user_id: &str) -> Result<LedgerResponse, AppError> {
        let entries = self.repo.ledger_entries(user_id).await?;
        Ok(LedgerResponse {
            user_id: user_id.to_string(),
            entries,
        })
    }

    // ─────────────────────────────────────────────────────────────────────────────
    // Gateway admin
    // ─────────────────────────────────────────────────────────────────────────────

    pub async fn routes(&self) -> Vec<RouteView> {
        self.gateways
            .routes()
            .await
            .into_iter()
            .map(|(channel, route)| RouteView {
                channel,
                primary: route.primary,
                fallback: route.fallback,
            })
            .collect()
    }

    /// Replaces a channel's route. Gateways need not be registered yet.
    #[instrument(skip(self, req), fields(primary = %req.primary))]
    pub async fn set_route(
        &self,
        channel: &str,
        req: SetRouteRequest,
    ) -> Result<RouteView, AppError> {
        let channel = channel.trim().to_ascii_uppercase();
        let primary = req.primary.trim().to_ascii_uppercase();
        if channel.is_empty() || primary.is_empty() {
            return Err(AppError::BadRequest(
                "Channel and primary gateway are required".into(),
            ));
        }
        let fallback = non_empty(req.fallback.as_deref()).map(|f| f.to_ascii_uppercase());
        self.gateways
            .set_route(&channel, Route::new(primary.clone(), fallback.as_deref()))
            .await;
        info!(channel = %channel, "Route updated");
        Ok(RouteView {
            channel,
            primary,
            fallback,
        })
    }

    pub async fn gateway_health(&self) -> GatewayHealthResponse {
        GatewayHealthResponse {
            gateways: self.gateways.health().await,
        }
    }

    pub async fn check_gateway_health(&self) -> GatewayHealthResponse {
        GatewayHealthResponse {
            gateways: self.gateways.check_health().await,
        }
    }

    // ─────────────────────────────────────────────────────────────────────────────
    // Internals
    // ─────────────────────────────────────────────────────────────────────────────

    /// Server-side pricing, in order: catalog price, promo, fee.
    async fn price(
        &self,
        req: &QuoteRequest,
        ip_address: Option<&str>,
        now: DateTime<Utc>,
    ) -> Result<Priced, AppError> {
        if req.quantity < 1 {
            return Err(AppError::BadRequest("Quantity must be at least 1".into()));
        }
        let sku = self
            .repo
            .get_sku(req.sku_code.trim())
            .await?
            .ok_or_else(|| AppError::NotFound(format!("SKU {}", req.sku_code)))?;
        if !sku.active {
            return Err(AppError::BadRequest(format!("SKU {} is not available", sku.code)));
        }
        let channel = self.channel(&req.channel).await?;

        let subtotal = sku
            .price
            .checked_mul(req.quantity)
            .ok_or_else(|| AppError::BadRequest("Order amount is too large".into()))?;
        channel.ensure_accepts(subtotal)?;

        let (discount, promo) = match non_empty(req.promo_code.as_deref()) {
            None => (0, None),
            Some(code) => {
                let promo = self
                    .repo
                    .get_promo(&code)
                    .await?
                    .ok_or(AppError::PromoRejected(PromoRejection::PromoNotFound))?;
                let query = UsageQuery {
                    promo_id: promo.id,
                    user_id: non_empty(req.user_id.as_deref()),
                    device_id: non_empty(req.device_id.as_deref()),
                    ip_address: non_empty(ip_address),
                    day: DayWindow::containing(now),
                };
                let counts = self.repo.promo_usage_counts(&query).await?;
                let ctx = PromoContext {
                    product_code: &sku.product_code,
                    channel: &channel.code,
                    region: req.region.as_deref(),
                    subtotal,
                    now,
                };
                let discount = promo
                    .validate(&ctx, &counts)
                    .map_err(AppError::PromoRejected)?;
                (discount, Some((promo, query)))
            }
        };

        let pricing = Pricing::compute(subtotal, discount, channel.fee.fee_for(subtotal));
        debug!(
            subtotal = pricing.subtotal,
            discount = pricing.discount,
            fee = pricing.fee,
            total = pricing.total,
            "Order priced"
        );
        Ok(Priced {
            sku,
            quantity: req.quantity,
            channel,
            pricing,
            promo,
        })
    }

    async fn channel(&self, code: &str) -> Result<PaymentChannel, AppError> {
        let code = code.trim().to_ascii_uppercase();
        self.repo
            .get_channel(&code)
            .await?
            .ok_or_else(|| AppError::BadRequest(format!("Unknown payment channel {}", code)))
    }

    async fn settle_with_balance(
        &self,
        mut order: Order,
        priced: &Priced,
        now: DateTime<Utc>,
    ) -> Result<OrderView, AppError> {
        let user_id = order.user_id.clone().ok_or_else(|| {
            AppError::BadRequest("user_id is required for BALANCE payments".into())
        })?;
        let change = order
            .plan_balance_payment(now)?
            .ok_or_else(|| AppError::Internal("New order cannot be settled".into()))?;
        order.apply(&change);
        let promo = priced.reservation(&order, now);

        let debit = LedgerPosting::debit(
            user_id,
            Money::new(order.pricing.total, order.currency)?,
            ReferenceType::Transaction,
            order.id.to_string(),
            format!("Payment for {}", order.invoice),
        );
        let outbox = OutboxEvent::order_paid(&order);
        self.store(order, NewOrderEffects {
            promo,
            debit: Some(debit),
            outbox: Some(outbox),
        })
        .await
    }

    /// Opens the provider payment. The callback URL points at the gateway the
    /// request actually resolves to.
    async fn open_payment(
        &self,
        order: &Order,
        gateway: Option<String>,
        description: String,
    ) -> Result<PaymentInstrument, AppError> {
        let mut request =
            PaymentRequest::new(order.invoice.clone(), order.pricing.total, order.channel.clone());
        request.fee = order.pricing.fee;
        request.currency = order.currency;
        request.gateway = non_empty(gateway.as_deref()).map(|g| g.to_ascii_uppercase());
        request.expiry = self.config.payment_expiry;
        request.description = description;
        request.customer_name = order.customer_name.clone();
        request.customer_email = order.customer_email.clone();
        request.customer_phone = order.customer_phone.clone();
        request
            .metadata
            .insert("order_id".to_string(), order.id.to_string());
        request
            .metadata
            .insert("kind".to_string(), order.kind.as_ref().to_string());

        let resolution = self.gateways.resolve(&request).await?;
        let gateway = resolution.gateway;
        if let Some(base) = &self.config.public_base_url {
            request.callback_url = Some(format!(
                "{}/webhooks/{}",
                base.trim_end_matches('/'),
                gateway.name()
            ));
        }
        info!(
            gateway = gateway.name(),
            used_fallback = resolution.used_fallback,
            "Creating payment"
        );
        let instrument = gateway.create_payment(&request).await.map_err(|e| {
            warn!(gateway = gateway.name(), retryable = e.is_retryable(), "Payment creation failed: {}", e);
            AppError::from(e)
        })?;
        Ok(instrument)
    }

    /// Inserts the order. If that fails after a provider payment was opened,
    /// the payment is cancelled on a best-effort basis.
    async fn store(&self, order: Order, effects: NewOrderEffects) -> Result<OrderView, AppError> {
        match self.repo.insert_order(&order, effects).await {
            Ok(stored) => {
                info!(invoice = %stored.invoice, status = %stored.status, total = stored.pricing.total, "Order created");
                Ok(stored.into())
            }
            Err(e) => {
                if let (Some(gateway), Some(gateway_ref)) = (&order.gateway, &order.gateway_ref) {
                    let lookup = PaymentLookup::new(order.invoice.clone(), gateway_ref.clone());
                    if let Err(cancel) = self.gateways.cancel_payment(gateway, &lookup).await {
                        debug!(gateway = %gateway, "Orphaned payment left to expire: {}", cancel);
                    }
                }
                Err(e.into())
            }
        }
    }

    async fn find(&self, invoice: &str) -> Result<Order, AppError> {
        self.repo
            .find_by_invoice(invoice)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("Order {}", invoice)))
    }

    fn expiry(&self) -> chrono::Duration {
        chrono::Duration::from_std(self.config.payment_expiry).unwrap_or(chrono::Duration::hours(1))
    }
}

fn non_empty(value: Option<&str>) -> Option<String> {
    value
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(str::to_string)
}
