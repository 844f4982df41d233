//! SettlementService and Reconciler unit tests.

#[cfg(test)]
pub(crate) mod tests {
    use std::collections::{BTreeSet, HashMap};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::{Arc, Mutex};

    use async_trait::async_trait;
    use chrono::{DateTime, Duration, Utc};
    use uuid::Uuid;

    use checkout_gateways::{Ack, GatewayManager, default_routes};
    use checkout_types::{
        AppError, CallbackEvent, CallbackReference, CatalogRepository, ChangeOutcome,
        CreateDepositRequest, CreateOrderRequest, Currency, DomainError, EventStatus,
        FulfillmentRequest, GatewayError, Instrument, LedgerEntry, LedgerPosting, Money,
        NewOrderEffects, Order, OrderId, OrderRepository, OrderStatus, OutboxEvent,
        PaymentChannel, PaymentGateway, PaymentInstrument, PaymentLookup, PaymentRequest,
        PaymentState, PaymentStatus, Promo, PromoRejection, PromoUsage, QuoteRequest,
        ReferenceType, RepoError, SettlementEffects, Sku, StatusChange, UsageCounts, UsageLimits,
        UsageQuery,
    };

    use crate::{ExpirySweeper, SettlementConfig, SettlementService};

    // ─────────────────────────────────────────────────────────────────────────────
    // MockRepo
    // ─────────────────────────────────────────────────────────────────────────────

    /// Simple in-memory repository for testing the service layer.
    pub struct MockRepo {
        orders: Mutex<HashMap<OrderId, Order>>,
        balances: Mutex<HashMap<String, i64>>,
        ledger: Mutex<Vec<LedgerEntry>>,
        usages: Mutex<Vec<PromoUsage>>,
        events: Mutex<Vec<OutboxEvent>>,
        skus: Mutex<HashMap<String, Sku>>,
        channels: Mutex<HashMap<String, PaymentChannel>>,
        promos: Mutex<HashMap<String, Promo>>,
    }

    impl MockRepo {
        pub fn new() -> Self {
            let channels = PaymentChannel::defaults()
                .into_iter()
                .map(|c| (c.code.clone(), c))
                .collect();
            let skus = [
                ("DIAMOND_100K", 100_000),
                ("DIAMOND_94K", 94_000),
                ("DIAMOND_50K", 50_000),
            ]
            .into_iter()
            .map(|(code, price)| {
                let sku = Sku {
                    code: code.to_string(),
                    product_code: "MLBB".to_string(),
                    name: code.to_string(),
                    price,
                    currency: Currency::IDR,
                    active: true,
                };
                (sku.code.clone(), sku)
            })
            .collect();
            Self {
                orders: Mutex::new(HashMap::new()),
                balances: Mutex::new(HashMap::new()),
                ledger: Mutex::new(Vec::new()),
                usages: Mutex::new(Vec::new()),
                events: Mutex::new(Vec::new()),
                skus: Mutex::new(skus),
                channels: Mutex::new(channels),
                promos: Mutex::new(HashMap::new()),
            }
        }

        pub fn order_count(&self) -> usize {
            self.orders.lock().unwrap().len()
        }

        pub fn events(&self) -> Vec<OutboxEvent> {
            self.events.lock().unwrap().clone()
        }

        pub fn ledger_len(&self) -> usize {
            self.ledger.lock().unwrap().len()
        }

        /// Overwrites a stored order, standing in for a concurrent writer.
        pub fn overwrite(&self, order: Order) {
            self.orders.lock().unwrap().insert(order.id, order);
        }

        fn counts(&self, query: &UsageQuery) -> UsageCounts {
            UsageCounts::tally(query, self.usages.lock().unwrap().iter())
        }

        /// Usage rows per order: (staged, redeemed).
        pub fn usages_for(&self, order_id: OrderId) -> (usize, usize) {
            let usages = self.usages.lock().unwrap();
            let rows: Vec<_> = usages.iter().filter(|u| u.order_id == order_id).collect();
            let redeemed = rows.iter().filter(|u| u.is_redeemed()).count();
            (rows.len() - redeemed, redeemed)
        }

        /// Posts unless the reference already moved the balance that way.
        fn post(&self, posting: LedgerPosting) -> Result<Option<LedgerEntry>, RepoError> {
            let mut ledger = self.ledger.lock().unwrap();
            if ledger.iter().any(|e| {
                e.reference_id == posting.reference_id && e.direction == posting.direction
            }) {
                return Ok(None);
            }
            let mut balances = self.balances.lock().unwrap();
            let currency = posting.amount.currency();
            let current = balances.get(&posting.user_id).copied().unwrap_or(0);
            let before = Money::new(current, currency)?;
            let after = posting.balance_after(before)?;
            balances.insert(posting.user_id.clone(), after.amount());
            let entry = posting.into_entry(before, after, Utc::now());
            ledger.push(entry.clone());
            Ok(Some(entry))
        }
    }

    #[async_trait]
    impl OrderRepository for MockRepo {
        async fn insert_order(
            &self,
            order: &Order,
            effects: NewOrderEffects,
        ) -> Result<Order, RepoError> {
            if self
                .orders
                .lock()
                .unwrap()
                .values()
                .any(|o| o.invoice == order.invoice)
            {
                return Err(RepoError::Conflict("duplicate invoice".into()));
            }
            if let Some(reservation) = &effects.promo {
                reservation
                    .limits
                    .check(&self.counts(&reservation.query))
                    .map_err(DomainError::PromoRejected)?;
            }
            if let Some(debit) = &effects.debit {
                let available = self
                    .balances
                    .lock()
                    .unwrap()
                    .get(&debit.user_id)
                    .copied()
                    .unwrap_or(0);
                if available < debit.amount.amount() {
                    return Err(DomainError::InsufficientBalance {
                        available,
                        requested: debit.amount.amount(),
                    }
                    .into());
                }
            }

            if let Some(debit) = effects.debit {
                self.post(debit)?;
            }
            if let Some(reservation) = effects.promo {
                self.usages.lock().unwrap().push(reservation.usage);
            }
            if let Some(event) = effects.outbox {
                self.events.lock().unwrap().push(event);
            }
            self.orders.lock().unwrap().insert(order.id, order.clone());
            Ok(order.clone())
        }

        async fn get_order(&self, id: OrderId) -> Result<Option<Order>, RepoError> {
            Ok(self.orders.lock().unwrap().get(&id).cloned())
        }

        async fn find_by_invoice(&self, invoice: &str) -> Result<Option<Order>, RepoError> {
            Ok(self
                .orders
                .lock()
                .unwrap()
                .values()
                .find(|o| o.invoice == invoice)
                .cloned())
        }

        async fn find_by_gateway_ref(
            &self,
            gateway: &str,
            gateway_ref: &str,
        ) -> Result<Option<Order>, RepoError> {
            Ok(self
                .orders
                .lock()
                .unwrap()
                .values()
                .find(|o| {
                    o.gateway.as_deref() == Some(gateway)
                        && o.gateway_ref.as_deref() == Some(gateway_ref)
                })
                .cloned())
        }

        async fn apply_change(
            &self,
            id: OrderId,
            change: &StatusChange,
            effects: SettlementEffects,
        ) -> Result<ChangeOutcome, RepoError> {
            let current = self
                .orders
                .lock()
                .unwrap()
                .get(&id)
                .cloned()
                .ok_or(RepoError::NotFound)?;
            if current.status != change.from {
                return Ok(ChangeOutcome::Conflict(current));
            }
            if let Some(credit) = effects.credit {
                self.post(credit)?;
            }
            if let Some(event) = effects.outbox {
                self.events.lock().unwrap().push(event);
            }
            if effects.redeem_promo {
                for usage in self
                    .usages
                    .lock()
                    .unwrap()
                    .iter_mut()
                    .filter(|u| u.order_id == id && u.redeemed_at.is_none())
                {
                    usage.redeemed_at = Some(change.entry.at);
                }
            }
            let mut updated = current;
            updated.apply(change);
            self.orders.lock().unwrap().insert(id, updated.clone());
            Ok(ChangeOutcome::Applied(updated))
        }

        async fn list_overdue(
            &self,
            now: DateTime<Utc>,
            limit: i64,
        ) -> Result<Vec<Order>, RepoError> {
            Ok(self
                .orders
                .lock()
                .unwrap()
                .values()
                .filter(|o| o.is_overdue(now))
                .take(limit as usize)
                .cloned()
                .collect())
        }

        async fn promo_usage_counts(&self, query: &UsageQuery) -> Result<UsageCounts, RepoError> {
            Ok(self.counts(query))
        }

        async fn balance(&self, user_id: &str, currency: Currency) -> Result<Money, RepoError> {
            let amount = self
                .balances
                .lock()
                .unwrap()
                .get(user_id)
                .copied()
                .unwrap_or(0);
            Ok(Money::new(amount, currency)?)
        }

        async fn ledger_entries(&self, user_id: &str) -> Result<Vec<LedgerEntry>, RepoError> {
            Ok(self
                .ledger
                .lock()
                .unwrap()
                .iter()
                .rev()
                .filter(|e| e.user_id == user_id)
                .cloned()
                .collect())
        }

        async fn pending_events(&self, limit: i64) -> Result<Vec<OutboxEvent>, RepoError> {
            Ok(self
                .events
                .lock()
                .unwrap()
                .iter()
                .filter(|e| e.status == EventStatus::Pending)
                .take(limit as usize)
                .cloned()
                .collect())
        }

        async fn update_event_status(
            &self,
            id: Uuid,
            status: EventStatus,
            error: Option<String>,
        ) -> Result<(), RepoError> {
            let mut events = self.events.lock().unwrap();
            let event = events
                .iter_mut()
                .find(|e| e.id == id)
                .ok_or(RepoError::NotFound)?;
            event.status = status;
            event.attempts += 1;
            event.last_error = error;
            Ok(())
        }
    }

    #[async_trait]
    impl CatalogRepository for MockRepo {
        async fn get_sku(&self, code: &str) -> Result<Option<Sku>, RepoError> {
            Ok(self.skus.lock().unwrap().get(code).cloned())
        }

        async fn upsert_sku(&self, sku: &Sku) -> Result<(), RepoError> {
            self.skus
                .lock()
                .unwrap()
                .insert(sku.code.clone(), sku.clone());
            Ok(())
        }

        async fn get_channel(&self, code: &str) -> Result<Option<PaymentChannel>, RepoError> {
            Ok(self.channels.lock().unwrap().get(code).cloned())
        }

        async fn list_channels(&self) -> Result<Vec<PaymentChannel>, RepoError> {
            Ok(self.channels.lock().unwrap().values().cloned().collect())
        }

        async fn upsert_channel(&self, channel: &PaymentChannel) -> Result<(), RepoError> {
            self.channels
                .lock()
                .unwrap()
                .insert(channel.code.clone(), channel.clone());
            Ok(())
        }

        async fn get_promo(&self, code: &str) -> Result<Option<Promo>, RepoError> {
            Ok(self
                .promos
                .lock()
                .unwrap()
                .get(&code.to_ascii_uppercase())
                .cloned())
        }

        async fn upsert_promo(&self, promo: &Promo) -> Result<(), RepoError> {
            self.promos
                .lock()
                .unwrap()
                .insert(promo.code.clone(), promo.clone());
            Ok(())
        }

        async fn adjust_balance(&self, posting: LedgerPosting) -> Result<LedgerEntry, RepoError> {
            self.post(posting)?
                .ok_or_else(|| RepoError::Conflict("already posted".into()))
        }
    }

    // ─────────────────────────────────────────────────────────────────────────────
    // StubGateway
    // ─────────────────────────────────────────────────────────────────────────────

    /// Gateway whose answers are set by the test.
    pub struct StubGateway {
        name: &'static str,
        channels: BTreeSet<String>,
        /// `None` makes status checks fail as transient.
        status: Mutex<Option<PaymentStatus>>,
        create_error: Mutex<Option<GatewayError>>,
        pub created: AtomicUsize,
        pub cancelled: AtomicUsize,
    }

    impl StubGateway {
        pub fn new(name: &'static str, channels: &[&str]) -> Self {
            Self {
                name,
                channels: channels.iter().map(|c| c.to_string()).collect(),
                status: Mutex::new(Some(PaymentStatus::Pending)),
                create_error: Mutex::new(None),
                created: AtomicUsize::new(0),
                cancelled: AtomicUsize::new(0),
            }
        }

        pub fn set_status(&self, status: Option<PaymentStatus>) {
            *self.status.lock().unwrap() = status;
        }

        pub fn fail_create(&self, error: GatewayError) {
            *self.create_error.lock().unwrap() = Some(error);
        }
    }

    #[async_trait]
    impl PaymentGateway for StubGateway {
        fn name(&self) -> &str {
            self.name
        }

        fn supported_channels(&self) -> &BTreeSet<String> {
            &self.channels
        }

        async fn create_payment(
            &self,
            request: &PaymentRequest,
        ) -> Result<PaymentInstrument, GatewayError> {
            if let Some(e) = self.create_error.lock().unwrap().clone() {
                return Err(e);
            }
            self.created.fetch_add(1, Ordering::SeqCst);
            Ok(PaymentInstrument {
                gateway: self.name.to_string(),
                gateway_ref: format!("000{}", request.reference),
                instrument: Instrument::VirtualAccount {
                    number: "8888012345678".into(),
                    bank_code: "002".into(),
                    account_name: request.display_name(),
                },
                fee: request.fee,
                total: request.amount,
                expires_at: request.expires_at(Utc::now()),
                instructions: vec!["Pay at any ATM".into()],
            })
        }

        async fn check_status(&self, _lookup: &PaymentLookup) -> Result<PaymentStatus, GatewayError> {
            self.status
                .lock()
                .unwrap()
                .ok_or_else(|| GatewayError::transient(self.name, "connection refused"))
        }

        async fn health_check(&self) -> Result<(), GatewayError> {
            Ok(())
        }

        async fn cancel_payment(&self, _lookup: &PaymentLookup) -> Result<(), GatewayError> {
            self.cancelled.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    // ─────────────────────────────────────────────────────────────────────────────
    // Helpers
    // ─────────────────────────────────────────────────────────────────────────────

    struct Fixture {
        repo: Arc<MockRepo>,
        bri: Arc<StubGateway>,
        service: SettlementService<MockRepo>,
    }

    async fn fixture() -> Fixture {
        let repo = Arc::new(MockRepo::new());
        let manager = Arc::new(GatewayManager::new(default_routes()));
        let bri = Arc::new(StubGateway::new("BRI_DIRECT", &["VA_BRI"]));
        manager.register(bri.clone()).await;
        let config = SettlementConfig {
            public_base_url: Some("https://shop.example.com".into()),
            ..SettlementConfig::default()
        };
        let service = SettlementService::with_config(repo.clone(), manager, config);
        Fixture { repo, bri, service }
    }

    fn order_request(sku: &str, channel: &str) -> CreateOrderRequest {
        CreateOrderRequest {
            sku_code: sku.to_string(),
            quantity: 1,
            channel: channel.to_string(),
            gateway: None,
            promo_code: None,
            user_id: Some("user-1".into()),
            device_id: Some("device-1".into()),
            ip_address: Some("10.0.0.1".into()),
            region: None,
            customer_name: Some("Budi".into()),
            customer_email: None,
            customer_phone: None,
        }
    }

    async fn fund(repo: &MockRepo, user: &str, amount: i64) {
        repo.adjust_balance(LedgerPosting::credit(
            user,
            Money::new(amount, Currency::IDR).unwrap(),
            ReferenceType::Adjustment,
            format!("seed-{}", user),
            "opening balance",
        ))
        .await
        .unwrap();
    }

    fn paid_callback(invoice: &str) -> CallbackEvent {
        CallbackEvent {
            gateway: "BRI_DIRECT".into(),
            reference: CallbackReference::Invoice(invoice.to_string()),
            status: PaymentStatus::Paid,
            paid_amount: None,
            provider_status: "Y".into(),
            received_at: Utc::now(),
        }
    }

    async fn stored(repo: &MockRepo, invoice: &str) -> Order {
        repo.find_by_invoice(invoice).await.unwrap().unwrap()
    }

    // ─────────────────────────────────────────────────────────────────────────────
    // Pricing
    // ─────────────────────────────────────────────────────────────────────────────

    #[tokio::test]
    async fn test_flat_promo_with_fixed_fee() {
        let f = fixture().await;
        let mut promo = Promo::new("HEMAT10", "Hemat 10K");
        promo.flat = 10_000;
        promo.max_discount = 15_000;
        f.repo.upsert_promo(&promo).await.unwrap();

        let quote = f
            .service
            .quote(QuoteRequest {
                promo_code: Some("hemat10".into()),
                ..QuoteRequest::from(&order_request("DIAMOND_100K", "va_bri"))
            })
            .await
            .unwrap();

        assert_eq!(quote.pricing.subtotal, 100_000);
        assert_eq!(quote.pricing.discount, 10_000);
        assert_eq!(quote.pricing.fee, 4_000);
        assert_eq!(quote.pricing.total, 94_000);
        assert_eq!(quote.promo_code.as_deref(), Some("HEMAT10"));
        assert_eq!(f.repo.order_count(), 0);
    }

    #[tokio::test]
    async fn test_percentage_promo_is_capped() {
        let f = fixture().await;
        let mut promo = Promo::new("PCT10", "10 percent");
        promo.percent_bps = 1_000;
        promo.max_discount = 4_000;
        f.repo.upsert_promo(&promo).await.unwrap();

        let mut req = order_request("DIAMOND_50K", "VA_BRI");
        req.promo_code = Some("PCT10".into());
        let quote = f.service.quote(QuoteRequest::from(&req)).await.unwrap();

        assert_eq!(quote.pricing.discount, 4_000);
        assert_eq!(quote.pricing.total, 50_000 - 4_000 + 4_000);
    }

    #[tokio::test]
    async fn test_unknown_promo_is_rejected() {
        let f = fixture().await;
        let mut req = order_request("DIAMOND_50K", "VA_BRI");
        req.promo_code = Some("NOPE".into());
        let err = f.service.create_order(req).await.unwrap_err();
        assert!(matches!(err, AppError::PromoRejected(PromoRejection::PromoNotFound)));
        assert_eq!(err.reason(), "PROMO_NOT_FOUND");
    }

    #[tokio::test]
    async fn test_unknown_sku_and_channel() {
        let f = fixture().await;
        let err = f
            .service
            .create_order(order_request("NOPE", "VA_BRI"))
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::NotFound(_)));

        let err = f
            .service
            .create_order(order_request("DIAMOND_50K", "CARRIER_PIGEON"))
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::BadRequest(_)));
    }

    async fn once_per_user_promo(f: &Fixture) -> CreateOrderRequest {
        let mut promo = Promo::new("ONCE", "Once per user");
        promo.flat = 5_000;
        promo.limits = UsageLimits {
            max_usage_per_user: 1,
            ..Default::default()
        };
        f.repo.upsert_promo(&promo).await.unwrap();
        let mut req = order_request("DIAMOND_50K", "VA_BRI");
        req.promo_code = Some("ONCE".into());
        req
    }

    #[tokio::test]
    async fn test_promo_user_limit_counts_paid_orders() {
        let f = fixture().await;
        let mut req = once_per_user_promo(&f).await;

        let first = f.service.create_order(req.clone()).await.unwrap();
        assert_eq!(first.pricing.discount, 5_000);
        // An unpaid order does not use up the promo.
        req.device_id = Some("device-2".into());
        let second = f.service.create_order(req.clone()).await.unwrap();
        assert_eq!(second.pricing.discount, 5_000);

        let reconciler = f.service.reconciler();
        assert_eq!(reconciler.apply_callback(paid_callback(&first.invoice)).await, Ack::Applied);
        assert_eq!(reconciler.apply_callback(paid_callback(&first.invoice)).await, Ack::Duplicate);
        let paid = stored(&f.repo, &first.invoice).await;
        assert_eq!(f.repo.usages_for(paid.id), (0, 1));

        req.device_id = Some("device-3".into());
        let err = f.service.create_order(req).await.unwrap_err();
        assert!(matches!(
            err,
            AppError::PromoRejected(PromoRejection::UserUsageLimitExceeded)
        ));
        assert_eq!(f.repo.order_count(), 2);
    }

    #[tokio::test]
    async fn test_expired_order_releases_promo() {
        let f = fixture().await;
        let req = once_per_user_promo(&f).await;

        let first = f.service.create_order(req.clone()).await.unwrap();
        let mut order = stored(&f.repo, &first.invoice).await;
        order.expires_at = Utc::now() - Duration::minutes(5);
        f.repo.overwrite(order.clone());

        let report = ExpirySweeper::new(f.service.reconciler().clone())
            .run_once(Utc::now())
            .await;
        assert_eq!(report.expired, 1);
        assert_eq!(stored(&f.repo, &first.invoice).await.status, OrderStatus::Expired);
        assert_eq!(f.repo.usages_for(order.id), (1, 0));

        let second = f.service.create_order(req).await.unwrap();
        assert_eq!(second.pricing.discount, 5_000);
    }

    #[tokio::test]
    async fn test_balance_order_redeems_promo_at_once() {
        let f = fixture().await;
        fund(&f.repo, "user-1", 100_000).await;
        let mut req = once_per_user_promo(&f).await;
        req.channel = "BALANCE".into();

        let view = f.service.create_order(req.clone()).await.unwrap();
        let order = stored(&f.repo, &view.invoice).await;
        assert_eq!(f.repo.usages_for(order.id), (0, 1));

        let err = f.service.create_order(req).await.unwrap_err();
        assert!(matches!(
            err,
            AppError::PromoRejected(PromoRejection::UserUsageLimitExceeded)
        ));
    }

    // ─────────────────────────────────────────────────────────────────────────────
    // Order creation
    // ─────────────────────────────────────────────────────────────────────────────

    #[tokio::test]
    async fn test_external_order_stays_pending_with_instrument() {
        let f = fixture().await;
        let view = f
            .service
            .create_order(order_request("DIAMOND_100K", "VA_BRI"))
            .await
            .unwrap();

        assert_eq!(view.status, OrderStatus::Pending);
        assert_eq!(view.payment_status, PaymentState::Unpaid);
        assert_eq!(view.gateway.as_deref(), Some("BRI_DIRECT"));
        assert!(view.invoice.starts_with("INV"));
        let payment = view.payment.unwrap();
        assert_eq!(payment.total, 104_000);
        assert!(matches!(payment.instrument, Instrument::VirtualAccount { .. }));
        assert_eq!(f.bri.created.load(Ordering::SeqCst), 1);

        let order = stored(&f.repo, &view.invoice).await;
        assert_eq!(order.gateway_ref.as_deref(), Some(format!("000{}", view.invoice).as_str()));
        assert!(f.repo.events().is_empty());
    }

    #[tokio::test]
    async fn test_balance_reported_in_wallet_currency() {
        let repo = Arc::new(MockRepo::new());
        let manager = Arc::new(GatewayManager::new(default_routes()));
        let config = SettlementConfig {
            wallet_currency: Currency::SGD,
            ..SettlementConfig::default()
        };
        let service = SettlementService::with_config(repo, manager, config);

        let balance = service.balance("user-1").await.unwrap();
        assert_eq!(balance.currency, Currency::SGD);
        assert_eq!(balance.balance, 0);

        let f = fixture().await;
        assert_eq!(f.service.balance("user-1").await.unwrap().currency, Currency::IDR);
    }

    #[tokio::test]
    async fn test_balance_order_settles_synchronously() {
        let f = fixture().await;
        fund(&f.repo, "user-1", 94_000).await;

        let view = f
            .service
            .create_order(order_request("DIAMOND_94K", "BALANCE"))
            .await
            .unwrap();

        assert_eq!(view.status, OrderStatus::Paid);
        assert_eq!(view.payment_status, PaymentState::Paid);
        assert!(view.gateway.is_none());
        assert_eq!(f.bri.created.load(Ordering::SeqCst), 0);

        let ledger = f.service.ledger("user-1").await.unwrap();
        assert_eq!(ledger.entries[0].balance_after, 0);
        assert_eq!(ledger.entries[0].reference_type, ReferenceType::Transaction);
        assert_eq!(f.service.balance("user-1").await.unwrap().balance, 0);
        assert_eq!(f.repo.events().len(), 1);
    }

    #[tokio::test]
    async fn test_balance_order_insufficient_funds() {
        let f = fixture().await;
        fund(&f.repo, "user-1", 90_000).await;

        let err = f
            .service
            .create_order(order_request("DIAMOND_94K", "BALANCE"))
            .await
            .unwrap_err();

        assert!(matches!(
            err,
            AppError::InsufficientBalance {
                available: 90_000,
                requested: 94_000
            }
        ));
        assert_eq!(f.repo.order_count(), 0);
        assert_eq!(f.repo.ledger_len(), 1);
        assert_eq!(f.service.balance("user-1").await.unwrap().balance, 90_000);
    }

    #[tokio::test]
    async fn test_balance_order_requires_user() {
        let f = fixture().await;
        let mut req = order_request("DIAMOND_94K", "BALANCE");
        req.user_id = None;
        let err = f.service.create_order(req).await.unwrap_err();
        assert!(matches!(err, AppError::BadRequest(_)));
    }

    #[tokio::test]
    async fn test_gateway_errors_persist_nothing() {
        let f = fixture().await;
        f.bri.fail_create(GatewayError::transient("BRI_DIRECT", "timed out"));
        let err = f
            .service
            .create_order(order_request("DIAMOND_100K", "VA_BRI"))
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::GatewayUnavailable(_)));

        f.bri
            .fail_create(GatewayError::rejected("BRI_DIRECT", "4002701", "Invalid amount"));
        let err = f
            .service
            .create_order(order_request("DIAMOND_100K", "VA_BRI"))
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::PaymentRejected(ref m) if m.contains("Invalid amount")));
        assert_eq!(f.repo.order_count(), 0);
    }

    #[tokio::test]
    async fn test_fallback_gateway_serves_when_primary_unregistered() {
        let repo = Arc::new(MockRepo::new());
        let manager = Arc::new(GatewayManager::new(default_routes()));
        let xendit = Arc::new(StubGateway::new("XENDIT", &["VA_BRI", "VA_BCA"]));
        manager.register(xendit.clone()).await;
        let service = SettlementService::new(repo, manager);

        let view = service
            .create_order(order_request("DIAMOND_100K", "VA_BRI"))
            .await
            .unwrap();
        assert_eq!(view.gateway.as_deref(), Some("XENDIT"));
        assert_eq!(xendit.created.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_deposit_rejects_balance_channel() {
        let f = fixture().await;
        let err = f
            .service
            .create_deposit(CreateDepositRequest {
                user_id: "user-1".into(),
                amount: 50_000,
                currency: Currency::IDR,
                channel: "BALANCE".into(),
                gateway: None,
                customer_name: None,
                customer_email: None,
                customer_phone: None,
            })
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::BadRequest(_)));
    }

    // ─────────────────────────────────────────────────────────────────────────────
    // Reconciliation
    // ─────────────────────────────────────────────────────────────────────────────

    #[tokio::test]
    async fn test_paid_callback_applies_once() {
        let f = fixture().await;
        let view = f
            .service
            .create_order(order_request("DIAMOND_100K", "VA_BRI"))
            .await
            .unwrap();
        let reconciler = f.service.reconciler();

        assert_eq!(reconciler.apply_callback(paid_callback(&view.invoice)).await, Ack::Applied);
        assert_eq!(reconciler.apply_callback(paid_callback(&view.invoice)).await, Ack::Duplicate);

        let order = stored(&f.repo, &view.invoice).await;
        assert_eq!(order.status, OrderStatus::Processing);
        assert_eq!(order.payment_status, PaymentState::Paid);
        assert!(order.paid_at.is_some());
        assert_eq!(order.timeline.len(), 2);
        let events = f.repo.events();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].invoice, view.invoice);
    }

    #[tokio::test]
    async fn test_callback_by_padded_gateway_ref() {
        let f = fixture().await;
        let view = f
            .service
            .create_order(order_request("DIAMOND_100K", "VA_BRI"))
            .await
            .unwrap();
        // Stored with a different padding than the provider echoes back.
        let mut order = stored(&f.repo, &view.invoice).await;
        order.gateway_ref = Some(view.invoice.clone());
        f.repo.overwrite(order);

        let event = CallbackEvent {
            reference: CallbackReference::GatewayRef(format!("0000{}", view.invoice)),
            ..paid_callback(&view.invoice)
        };
        assert_eq!(f.service.reconciler().apply_callback(event).await, Ack::Applied);
    }

    #[tokio::test]
    async fn test_unknown_reference_is_acknowledged() {
        let f = fixture().await;
        let ack = f
            .service
            .reconciler()
            .apply_callback(paid_callback("INV20250101NOTHERE"))
            .await;
        assert_eq!(ack, Ack::UnknownReference);
        assert!(ack.is_success());
    }

    #[tokio::test]
    async fn test_paid_after_failed_stays_failed() {
        let f = fixture().await;
        let view = f
            .service
            .create_order(order_request("DIAMOND_100K", "VA_BRI"))
            .await
            .unwrap();
        let reconciler = f.service.reconciler();
        let failed = CallbackEvent {
            status: PaymentStatus::Failed,
            ..paid_callback(&view.invoice)
        };
        assert_eq!(reconciler.apply_callback(failed).await, Ack::Applied);

        let ack = reconciler.apply_callback(paid_callback(&view.invoice)).await;
        assert!(ack.is_success());
        let order = stored(&f.repo, &view.invoice).await;
        assert_eq!(order.status, OrderStatus::Failed);
        assert!(f.repo.events().is_empty());
    }

    #[tokio::test]
    async fn test_underpaid_callback_is_ignored() {
        let f = fixture().await;
        let view = f
            .service
            .create_order(order_request("DIAMOND_100K", "VA_BRI"))
            .await
            .unwrap();
        let event = CallbackEvent {
            paid_amount: Some(1_000),
            ..paid_callback(&view.invoice)
        };
        assert_eq!(f.service.reconciler().apply_callback(event).await, Ack::Ignored);
        assert_eq!(stored(&f.repo, &view.invoice).await.status, OrderStatus::Pending);
    }

    #[tokio::test]
    async fn test_stale_order_is_replanned_after_conflict() {
        let f = fixture().await;
        let view = f
            .service
            .create_order(order_request("DIAMOND_100K", "VA_BRI"))
            .await
            .unwrap();
        let stale = stored(&f.repo, &view.invoice).await;

        let reconciler = f.service.reconciler();
        reconciler
            .apply_status(stale.clone(), PaymentStatus::Paid, "BRI_DIRECT")
            .await
            .unwrap();

        // The stale copy still says PENDING; the retry sees PROCESSING.
        let again = reconciler
            .apply_status(stale, PaymentStatus::Paid, "BRI_DIRECT")
            .await
            .unwrap();
        assert_eq!(again.ack, Ack::Duplicate);
        assert_eq!(again.order.status, OrderStatus::Processing);
        assert_eq!(f.repo.events().len(), 1);
    }

    #[tokio::test]
    async fn test_poll_applies_gateway_status() {
        let f = fixture().await;
        let view = f
            .service
            .create_order(order_request("DIAMOND_100K", "VA_BRI"))
            .await
            .unwrap();

        let polled = f.service.poll_order(&view.invoice).await.unwrap();
        assert_eq!(polled.status, OrderStatus::Pending);

        f.bri.set_status(Some(PaymentStatus::Paid));
        let polled = f.service.poll_order(&view.invoice).await.unwrap();
        assert_eq!(polled.status, OrderStatus::Processing);
    }

    #[tokio::test]
    async fn test_deposit_credits_once() {
        let f = fixture().await;
        let view = f
            .service
            .create_deposit(CreateDepositRequest {
                user_id: "user-9".into(),
                amount: 50_000,
                currency: Currency::IDR,
                channel: "VA_BRI".into(),
                gateway: None,
                customer_name: None,
                customer_email: None,
                customer_phone: None,
            })
            .await
            .unwrap();
        assert!(view.invoice.starts_with("DEP"));
        assert_eq!(view.pricing.total, 54_000);

        let reconciler = f.service.reconciler();
        assert_eq!(reconciler.apply_callback(paid_callback(&view.invoice)).await, Ack::Applied);
        assert_eq!(reconciler.apply_callback(paid_callback(&view.invoice)).await, Ack::Duplicate);

        assert_eq!(f.service.balance("user-9").await.unwrap().balance, 50_000);
        let ledger = f.service.ledger("user-9").await.unwrap();
        assert_eq!(ledger.entries.len(), 1);
        assert_eq!(ledger.entries[0].reference_type, ReferenceType::Deposit);
    }

    // ─────────────────────────────────────────────────────────────────────────────
    // Expiry
    // ─────────────────────────────────────────────────────────────────────────────

    async fn overdue_order(f: &Fixture) -> Order {
        let view = f
            .service
            .create_order(order_request("DIAMOND_100K", "VA_BRI"))
            .await
            .unwrap();
        let mut order = stored(&f.repo, &view.invoice).await;
        order.expires_at = Utc::now() - Duration::minutes(5);
        f.repo.overwrite(order.clone());
        order
    }

    #[tokio::test]
    async fn test_sweep_expires_unpaid_order() {
        let f = fixture().await;
        let order = overdue_order(&f).await;
        let sweeper = ExpirySweeper::new(f.service.reconciler().clone());

        let report = sweeper.run_once(Utc::now()).await;
        assert_eq!(report.expired, 1);
        let expired = stored(&f.repo, &order.invoice).await;
        assert_eq!(expired.status, OrderStatus::Expired);
        assert_eq!(expired.payment_status, PaymentState::Expired);

        let again = sweeper.run_once(Utc::now()).await;
        assert_eq!(again.examined, 0);
    }

    #[tokio::test]
    async fn test_sweep_prefers_paid() {
        let f = fixture().await;
        let order = overdue_order(&f).await;
        f.bri.set_status(Some(PaymentStatus::Paid));

        let report = ExpirySweeper::new(f.service.reconciler().clone())
            .run_once(Utc::now())
            .await;
        assert_eq!(report.paid, 1);
        assert_eq!(stored(&f.repo, &order.invoice).await.status, OrderStatus::Processing);
    }

    #[tokio::test]
    async fn test_sweep_defers_within_grace_when_gateway_down() {
        let f = fixture().await;
        let order = overdue_order(&f).await;
        f.bri.set_status(None);
        let sweeper = ExpirySweeper::new(f.service.reconciler().clone());

        let report = sweeper.run_once(Utc::now()).await;
        assert_eq!(report.deferred, 1);
        assert_eq!(stored(&f.repo, &order.invoice).await.status, OrderStatus::Pending);

        let report = sweeper.run_once(Utc::now() + Duration::hours(2)).await;
        assert_eq!(report.expired, 1);
        assert_eq!(stored(&f.repo, &order.invoice).await.status, OrderStatus::Expired);
    }

    #[tokio::test]
    async fn test_late_paid_after_expiry_keeps_expired() {
        let f = fixture().await;
        let order = overdue_order(&f).await;
        ExpirySweeper::new(f.service.reconciler().clone())
            .run_once(Utc::now())
            .await;

        let ack = f
            .service
            .reconciler()
            .apply_callback(paid_callback(&order.invoice))
            .await;
        assert_eq!(ack, Ack::Duplicate);
        assert_eq!(stored(&f.repo, &order.invoice).await.status, OrderStatus::Expired);
    }

    #[tokio::test]
    async fn test_get_order_expires_on_read() {
        let f = fixture().await;
        let order = overdue_order(&f).await;
        let view = f.service.get_order(&order.invoice).await.unwrap();
        assert_eq!(view.status, OrderStatus::Expired);
    }

    // ─────────────────────────────────────────────────────────────────────────────
    // Administrative transitions
    // ─────────────────────────────────────────────────────────────────────────────

    #[tokio::test]
    async fn test_cancel_invalidates_provider_payment() {
        let f = fixture().await;
        let view = f
            .service
            .create_order(order_request("DIAMOND_100K", "VA_BRI"))
            .await
            .unwrap();

        let cancelled = f.service.cancel_order(&view.invoice).await.unwrap();
        assert_eq!(cancelled.status, OrderStatus::Cancelled);
        assert_eq!(f.bri.cancelled.load(Ordering::SeqCst), 1);

        // Terminal: cancelling again changes nothing.
        let again = f.service.cancel_order(&view.invoice).await.unwrap();
        assert_eq!(again.timeline.len(), cancelled.timeline.len());
    }

    #[tokio::test]
    async fn test_fulfillment_requires_payment() {
        let f = fixture().await;
        let view = f
            .service
            .create_order(order_request("DIAMOND_100K", "VA_BRI"))
            .await
            .unwrap();
        let done = FulfillmentRequest {
            success: true,
            message: None,
        };

        let err = f
            .service
            .mark_fulfilled(&view.invoice, done.clone())
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::BadRequest(_)));

        f.service
            .reconciler()
            .apply_callback(paid_callback(&view.invoice))
            .await;
        let fulfilled = f.service.mark_fulfilled(&view.invoice, done).await.unwrap();
        assert_eq!(fulfilled.status, OrderStatus::Success);
        assert_eq!(fulfilled.timeline.last().unwrap().message, "Order fulfilled");
    }

    #[tokio::test]
    async fn test_set_route_normalizes_names() {
        let f = fixture().await;
        let route = f
            .service
            .set_route(
                "qris",
                checkout_types::SetRouteRequest {
                    primary: "linkqu".into(),
                    fallback: Some(" ".into()),
                },
            )
            .await
            .unwrap();
        assert_eq!(route.channel, "QRIS");
        assert_eq!(route.primary, "LINKQU");
        assert!(route.fallback.is_none());

        let routes = f.service.routes().await;
        assert!(routes.iter().any(|r| r.channel == "QRIS" && r.primary == "LINKQU"));
    }
}
