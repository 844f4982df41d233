//! Reconciliation: moves orders from provider signals (webhooks, polls, the
//! expiry sweep) through the state machine exactly once.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use tracing::{debug, error, info, instrument, warn};

use checkout_gateways::{Ack, GatewayManager};
use checkout_types::{
    AppError, CallbackEvent, CallbackReference, ChangeOutcome, DomainError, LedgerPosting, Money,
    Order, OrderKind, OrderRepository, OutboxEvent, PaymentLookup, PaymentStatus, ReferenceType,
    RepoError, SettlementEffects, StatusChange,
};

/// A status write that loses the compare-and-set this many times gives up.
const MAX_CAS_ATTEMPTS: usize = 5;

/// Result of committing a planned move.
#[derive(Debug, Clone, PartialEq)]
pub enum Settled {
    Applied(Order),
    /// Nothing to do; carries the current order.
    Unchanged(Order),
    /// The state machine refused the move.
    Rejected(Order, DomainError),
}

impl Settled {
    pub fn order(&self) -> &Order {
        match self {
            Settled::Applied(o) | Settled::Unchanged(o) | Settled::Rejected(o, _) => o,
        }
    }

    pub fn into_order(self) -> Order {
        match self {
            Settled::Applied(o) | Settled::Unchanged(o) | Settled::Rejected(o, _) => o,
        }
    }
}

/// A provider signal after reconciliation.
#[derive(Debug, Clone, PartialEq)]
pub struct Reconciled {
    pub ack: Ack,
    pub order: Order,
}

pub struct Reconciler<R> {
    repo: Arc<R>,
    gateways: Arc<GatewayManager>,
    grace: chrono::Duration,
}

impl<R> Clone for Reconciler<R> {
    fn clone(&self) -> Self {
        Self {
            repo: self.repo.clone(),
            gateways: self.gateways.clone(),
            grace: self.grace,
        }
    }
}

impl<R: OrderRepository> Reconciler<R> {
    /// `grace` is how long past its deadline an order whose gateway cannot be
    /// polled stays open.
    pub fn new(repo: Arc<R>, gateways: Arc<GatewayManager>, grace: std::time::Duration) -> Self {
        Self {
            repo,
            gateways,
            grace: chrono::Duration::from_std(grace).unwrap_or(chrono::Duration::hours(1)),
        }
    }

    pub fn repo(&self) -> &Arc<R> {
        &self.repo
    }

    pub fn gateways(&self) -> &Arc<GatewayManager> {
        &self.gateways
    }

    // ─────────────────────────────────────────────────────────────────────────────
    // Provider signals
    // ─────────────────────────────────────────────────────────────────────────────

    /// Webhook path. Never fails; errors become `Ack::Failed` so the provider
    /// retries.
    #[instrument(skip(self, event), fields(gateway = %event.gateway, status = ?event.status))]
    pub async fn apply_callback(&self, event: CallbackEvent) -> Ack {
        let order = match self.find_order(&event).await {
            Ok(Some(order)) => order,
            Ok(None) => {
                warn!(reference = ?event.reference, "Callback for unknown order");
                return Ack::UnknownReference;
            }
            Err(e) => {
                error!("Order lookup failed: {}", e);
                return Ack::Failed;
            }
        };

        if event.status == PaymentStatus::Paid
            && event
                .paid_amount
                .is_some_and(|paid| paid < order.pricing.total)
        {
            warn!(
                invoice = %order.invoice,
                paid = event.paid_amount,
                total = order.pricing.total,
                "Underpaid callback ignored"
            );
            return Ack::Ignored;
        }

        match self.apply_status(order, event.status, &event.gateway).await {
            Ok(reconciled) => reconciled.ack,
            Err(e) => {
                error!("Failed to apply callback: {}", e);
                Ack::Failed
            }
        }
    }

    /// Asks the order's gateway for the current status and applies it.
    #[instrument(skip(self))]
    pub async fn poll(&self, invoice: &str) -> Result<Order, AppError> {
        let order = self
            .repo
            .find_by_invoice(invoice)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("Order {}", invoice)))?;
        if order.status.is_terminal() || order.is_paid() {
            return Ok(order);
        }
        let Some(gateway) = order.gateway.clone() else {
            return Ok(order);
        };

        let status = self.query_gateway(&order, &gateway).await?;
        debug!(invoice, gateway = %gateway, ?status, "Polled payment status");
        Ok(self.apply_status(order, status, &gateway).await?.order)
    }

    /// The single idempotent transition for a provider-reported status.
    ///
    /// Replays, terminal orders and signals that do not apply come back as
    /// `Duplicate` or `Ignored`; only a written change is `Applied`.
    #[instrument(skip(self, order), fields(invoice = %order.invoice, from = %order.status))]
    pub async fn apply_status(
        &self,
        order: Order,
        status: PaymentStatus,
        source: &str,
    ) -> Result<Reconciled, AppError> {
        let settled = self
            .commit(order, |current, now| {
                if status == PaymentStatus::Paid && current.is_paid() {
                    return Ok(None);
                }
                current.plan_payment_status(status, source, now)
            })
            .await?;

        let ack = match &settled {
            Settled::Applied(order) => {
                info!(to = %order.status, source, "Order status updated");
                Ack::Applied
            }
            Settled::Unchanged(order) => {
                let ignored = status == PaymentStatus::Pending
                    || (status == PaymentStatus::Refunded && !order.is_paid());
                if ignored { Ack::Ignored } else { Ack::Duplicate }
            }
            Settled::Rejected(order, e) => {
                warn!(current = %order.status, ?status, "Signal ignored: {}", e);
                Ack::Ignored
            }
        };
        Ok(Reconciled {
            ack,
            order: settled.into_order(),
        })
    }

    // ─────────────────────────────────────────────────────────────────────────────
    // Expiry
    // ─────────────────────────────────────────────────────────────────────────────

    /// Settles an overdue order: the gateway is asked first and PAID wins.
    ///
    /// When the gateway cannot answer, the order stays open until `grace`
    /// past its deadline.
    #[instrument(skip(self, order), fields(invoice = %order.invoice))]
    pub async fn settle_overdue(
        &self,
        order: Order,
        now: DateTime<Utc>,
    ) -> Result<Reconciled, AppError> {
        if let Some(gateway) = order.gateway.clone() {
            match self.query_gateway(&order, &gateway).await {
                Ok(status @ (PaymentStatus::Paid | PaymentStatus::Failed | PaymentStatus::Expired)) => {
                    return self.apply_status(order, status, &gateway).await;
                }
                Ok(_) => {}
                Err(e) if now < order.expires_at + self.grace => {
                    warn!(gateway = %gateway, "Expiry deferred, status check failed: {}", e);
                    return Ok(Reconciled {
                        ack: Ack::Ignored,
                        order,
                    });
                }
                Err(e) => {
                    warn!(gateway = %gateway, "Grace period over, expiring without status: {}", e);
                }
            }
        }
        self.apply_status(order, PaymentStatus::Expired, "expiry sweep")
            .await
    }

    // ─────────────────────────────────────────────────────────────────────────────
    // Compare-and-set
    // ─────────────────────────────────────────────────────────────────────────────

    /// Plans against the latest stored order and writes with compare-and-set,
    /// re-planning after every conflict.
    pub async fn commit<F>(&self, order: Order, plan: F) -> Result<Settled, AppError>
    where
        F: Fn(&Order, DateTime<Utc>) -> Result<Option<StatusChange>, DomainError> + Send + Sync,
    {
        let mut current = order;
        for attempt in 1..=MAX_CAS_ATTEMPTS {
            let change = match plan(&current, Utc::now()) {
                Ok(Some(change)) => change,
                Ok(None) => return Ok(Settled::Unchanged(current)),
                Err(e) => return Ok(Settled::Rejected(current, e)),
            };
            let effects = settlement_effects(&current, &change)?;
            match self.repo.apply_change(current.id, &change, effects).await? {
                ChangeOutcome::Applied(order) => return Ok(Settled::Applied(order)),
                ChangeOutcome::Conflict(latest) => {
                    debug!(attempt, invoice = %latest.invoice, status = %latest.status, "Status changed concurrently, retrying");
                    current = latest;
                }
            }
        }
        Err(AppError::Internal(format!(
            "Order {} kept changing concurrently",
            current.invoice
        )))
    }

    async fn query_gateway(&self, order: &Order, gateway: &str) -> Result<PaymentStatus, AppError> {
        let lookup = PaymentLookup::new(
            order.invoice.clone(),
            order.gateway_ref.clone().unwrap_or_default(),
        );
        Ok(self.gateways.check_payment_status(gateway, &lookup).await?)
    }

    /// Providers may echo a gateway reference with its padding stripped or
    /// added, so a miss on the raw value retries without leading zeros.
    async fn find_order(&self, event: &CallbackEvent) -> Result<Option<Order>, RepoError> {
        match &event.reference {
            CallbackReference::Invoice(invoice) => self.repo.find_by_invoice(invoice).await,
            CallbackReference::GatewayRef(gateway_ref) => {
                if let Some(order) = self
                    .repo
                    .find_by_gateway_ref(&event.gateway, gateway_ref)
                    .await?
                {
                    return Ok(Some(order));
                }
                let trimmed = gateway_ref.trim_start_matches([' ', '0']);
                if trimmed.is_empty() || trimmed == gateway_ref {
                    return Ok(None);
                }
                self.repo.find_by_gateway_ref(&event.gateway, trimmed).await
            }
        }
    }
}

/// Writes committed with the first paid move: the deposit credit, or the
/// fulfillment event and promo redemption for purchases.
fn settlement_effects(order: &Order, change: &StatusChange) -> Result<SettlementEffects, AppError> {
    if !change.first_payment {
        return Ok(SettlementEffects::default());
    }
    match order.kind {
        OrderKind::Purchase => {
            let mut paid = order.clone();
            paid.apply(change);
            Ok(SettlementEffects {
                credit: None,
                outbox: Some(OutboxEvent::order_paid(&paid)),
                redeem_promo: order.promo_code.is_some(),
            })
        }
        OrderKind::Deposit => {
            let Some(user_id) = order.user_id.as_deref() else {
                warn!(invoice = %order.invoice, "Deposit without a user, nothing to credit");
                return Ok(SettlementEffects::default());
            };
            let amount = Money::new(order.pricing.subtotal, order.currency)?;
            Ok(SettlementEffects {
                credit: Some(LedgerPosting::credit(
                    user_id,
                    amount,
                    ReferenceType::Deposit,
                    order.id.to_string(),
                    format!("Deposit {}", order.invoice),
                )),
                outbox: None,
                redeem_promo: false,
            })
        }
    }
}
