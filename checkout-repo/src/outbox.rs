//! Fulfillment outbox dispatcher.
//!
//! Polls `order_events` and posts each event to the fulfillment endpoint,
//! signed with HMAC-SHA256 when a secret is configured.

use std::sync::Arc;
use std::time::Duration;

use checkout_types::{EventStatus, OrderRepository, OutboxEvent};
use serde::Serialize;
use tokio::sync::watch;
use tracing::{error, info, instrument, warn};

use crate::security::{SIGNATURE_HEADER, sign_payload};

const BATCH_SIZE: i64 = 10;
const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

/// Body posted to the fulfillment endpoint.
#[derive(Debug, Serialize)]
struct Notification<'a> {
    id: String,
    event: &'a str,
    invoice: &'a str,
    created_at: String,
    data: &'a serde_json::Value,
}

pub struct OutboxDispatcher<R> {
    repo: Arc<R>,
    client: reqwest::Client,
    target_url: String,
    secret: Option<String>,
    poll_interval: Duration,
}

impl<R: OrderRepository> OutboxDispatcher<R> {
    pub fn new(repo: Arc<R>, target_url: String, secret: Option<String>) -> Self {
        let client = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .unwrap_or_default();
        Self {
            repo,
            client,
            target_url,
            secret,
            poll_interval: Duration::from_secs(1),
        }
    }

    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    /// Runs until `shutdown` flips to `true`.
    #[instrument(skip_all, fields(target = %self.target_url))]
    pub async fn run(self, mut shutdown: watch::Receiver<bool>) {
        info!("Starting outbox dispatcher");
        let mut ticker = tokio::time::interval(self.poll_interval);
        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    self.dispatch_once().await;
                }
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
            }
        }
        info!("Outbox dispatcher stopped");
    }

    /// Delivers one batch; returns how many events were delivered.
    pub async fn dispatch_once(&self) -> usize {
        let events = match self.repo.pending_events(BATCH_SIZE).await {
            Ok(events) => events,
            Err(e) => {
                error!("Failed to fetch outbox events: {}", e);
                return 0;
            }
        };
        if !events.is_empty() {
            info!("Processing {} outbox events", events.len());
        }

        let mut delivered = 0;
        for event in events {
            if self.process_event(event).await == EventStatus::Completed {
                delivered += 1;
            }
        }
        delivered
    }

    #[instrument(skip(self, event), fields(event_id = %event.id, invoice = %event.invoice))]
    async fn process_event(&self, event: OutboxEvent) -> EventStatus {
        let notification = Notification {
            id: event.id.to_string(),
            event: &event.event_type,
            invoice: &event.invoice,
            created_at: event.created_at.to_rfc3339(),
            data: &event.payload,
        };
        let body = match serde_json::to_vec(&notification) {
            Ok(body) => body,
            Err(e) => {
                self.record(&event, EventStatus::Failed, Some(e.to_string())).await;
                return EventStatus::Failed;
            }
        };

        let mut request = self
            .client
            .post(&self.target_url)
            .header(reqwest::header::CONTENT_TYPE, "application/json")
            .header("X-Checkout-Event", &event.event_type);
        if let Some(secret) = &self.secret {
            request = request.header(SIGNATURE_HEADER, sign_payload(&body, secret));
        }

        let (status, last_error) = match request.body(body).send().await {
            Ok(resp) if resp.status().is_success() => (EventStatus::Completed, None),
            Ok(resp) => (EventStatus::Failed, Some(format!("HTTP {}", resp.status()))),
            Err(e) => (EventStatus::Failed, Some(e.to_string())),
        };
        if let Some(reason) = &last_error {
            warn!(attempt = event.attempts + 1, "Fulfillment delivery failed: {}", reason);
        }

        self.record(&event, status, last_error).await;
        status
    }

    async fn record(&self, event: &OutboxEvent, status: EventStatus, last_error: Option<String>) {
        if let Err(e) = self
            .repo
            .update_event_status(event.id, status, last_error)
            .await
        {
            error!("Failed to update outbox event status: {}", e);
        }
    }
}
