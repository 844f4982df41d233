//! Background sweep that settles PENDING orders past their payment deadline.

use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::sync::watch;
use tracing::{debug, error, info, instrument};

use checkout_gateways::Ack;
use checkout_types::{OrderRepository, OrderStatus};

use crate::reconcile::Reconciler;

const BATCH_SIZE: i64 = 100;

/// What one sweep did.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SweepReport {
    pub examined: usize,
    pub expired: usize,
    /// Found paid at the gateway instead.
    pub paid: usize,
    /// Left open because the gateway could not be asked.
    pub deferred: usize,
    pub failed: usize,
}

pub struct ExpirySweeper<R> {
    reconciler: Reconciler<R>,
}

impl<R: OrderRepository> ExpirySweeper<R> {
    pub fn new(reconciler: Reconciler<R>) -> Self {
        Self { reconciler }
    }

    #[instrument(skip(self))]
    pub async fn run_once(&self, now: DateTime<Utc>) -> SweepReport {
        let mut report = SweepReport::default();
        let overdue = match self.reconciler.repo().list_overdue(now, BATCH_SIZE).await {
            Ok(orders) => orders,
            Err(e) => {
                error!("Failed to list overdue orders: {}", e);
                return report;
            }
        };

        for order in overdue {
            report.examined += 1;
            match self.reconciler.settle_overdue(order, now).await {
                Ok(r) if r.ack == Ack::Applied && r.order.is_paid() => report.paid += 1,
                Ok(r) if r.order.status == OrderStatus::Expired => report.expired += 1,
                Ok(r) if r.order.status == OrderStatus::Pending => report.deferred += 1,
                Ok(_) => {}
                Err(e) => {
                    error!("Failed to settle overdue order: {}", e);
                    report.failed += 1;
                }
            }
        }
        if report.examined > 0 {
            info!(?report, "Expiry sweep finished");
        }
        report
    }

    /// Sweeps every `interval` until `shutdown` flips to `true`.
    pub async fn run(self, interval: Duration, mut shutdown: watch::Receiver<bool>) {
        info!(interval_secs = interval.as_secs(), "Starting expiry sweeper");
        let mut ticker = tokio::time::interval(interval);
        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    let report = self.run_once(Utc::now()).await;
                    debug!(examined = report.examined, "Expiry tick");
                }
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
            }
        }
        info!("Expiry sweeper stopped");
    }
}
