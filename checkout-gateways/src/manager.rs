//! Gateway registry, channel routing and the health sweep.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::Utc;
use tokio::sync::{RwLock, watch};
use tokio::task::{JoinHandle, JoinSet};
use tracing::{debug, info, instrument, warn};

use checkout_types::{
    GatewayError, GatewayHealth, HealthStatus, PaymentGateway, PaymentInstrument, PaymentLookup,
    PaymentRequest, PaymentStatus,
};

use crate::callback::WebhookProtocol;

/// Health checks slower than this are reported as degraded.
pub const SLOW_HEALTH_CHECK: Duration = Duration::from_secs(5);
/// Health checks slower than this are abandoned and reported as down.
pub const HEALTH_CHECK_TIMEOUT: Duration = Duration::from_secs(10);

/// Primary gateway for a channel plus an optional fallback.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Route {
    pub primary: String,
    pub fallback: Option<String>,
}

impl Route {
    pub fn new(primary: impl Into<String>, fallback: Option<&str>) -> Self {
        Self {
            primary: primary.into(),
            fallback: fallback.map(String::from),
        }
    }
}

/// Routing table used when no override is configured.
pub fn default_routes() -> BTreeMap<String, Route> {
    let mut routes = BTreeMap::new();
    let mut add = |channel: &str, primary: &str, fallback: Option<&str>| {
        routes.insert(channel.to_string(), Route::new(primary, fallback));
    };
    add("QRIS", "DANA_DIRECT", Some("LINKQU"));
    add("DANA", "DANA_DIRECT", None);
    add("GOPAY", "MIDTRANS", None);
    add("SHOPEEPAY", "MIDTRANS", None);
    add("ALFAMART", "XENDIT", None);
    add("INDOMARET", "XENDIT", None);
    add("VA_BRI", "BRI_DIRECT", Some("XENDIT"));
    add("VA_BCA", "BCA_DIRECT", Some("XENDIT"));
    for channel in ["VA_MANDIRI", "VA_PERMATA", "VA_BNI", "VA_BSI", "VA_CIMB"] {
        add(channel, "PAKAILINK", Some("XENDIT"));
    }
    routes
}

/// The gateway chosen for a request.
#[derive(Clone)]
pub struct Resolution {
    pub gateway: Arc<dyn PaymentGateway>,
    pub used_fallback: bool,
}

impl std::fmt::Debug for Resolution {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Resolution")
            .field("gateway", &self.gateway.name())
            .field("used_fallback", &self.used_fallback)
            .finish()
    }
}

#[derive(Default)]
struct Registry {
    gateways: HashMap<String, Arc<dyn PaymentGateway>>,
    webhooks: HashMap<String, Arc<dyn WebhookProtocol>>,
    routes: BTreeMap<String, Route>,
}

impl Registry {
    fn usable(&self, name: &str, channel: &str) -> Option<Arc<dyn PaymentGateway>> {
        self.gateways
            .get(name)
            .filter(|g| g.supports(channel))
            .cloned()
    }
}

/// Registry and routing live under one lock, health under another, so health
/// writes never contend with payment creation.
pub struct GatewayManager {
    registry: RwLock<Registry>,
    health: RwLock<HashMap<String, GatewayHealth>>,
}

impl Default for GatewayManager {
    fn default() -> Self {
        Self::new(default_routes())
    }
}

impl GatewayManager {
    pub fn new(routes: BTreeMap<String, Route>) -> Self {
        Self {
            registry: RwLock::new(Registry {
                routes,
                ..Registry::default()
            }),
            health: RwLock::new(HashMap::new()),
        }
    }

    // ─────────────────────────────────────────────────────────────────────────────
    // Registry
    // ─────────────────────────────────────────────────────────────────────────────

    pub async fn register(&self, gateway: Arc<dyn PaymentGateway>) {
        let name = gateway.name().to_string();
        info!(gateway = %name, channels = ?gateway.supported_channels(), "Registering gateway");
        self.registry.write().await.gateways.insert(name, gateway);
    }

    /// Registers a gateway together with the parser for its callbacks.
    pub async fn register_with_webhook(
        &self,
        gateway: Arc<dyn PaymentGateway>,
        webhook: Arc<dyn WebhookProtocol>,
    ) {
        let name = gateway.name().to_string();
        info!(gateway = %name, channels = ?gateway.supported_channels(), "Registering gateway");
        let mut registry = self.registry.write().await;
        registry.gateways.insert(name.clone(), gateway);
        registry.webhooks.insert(name, webhook);
    }

    pub async fn unregister(&self, name: &str) -> bool {
        let mut registry = self.registry.write().await;
        registry.webhooks.remove(name);
        let removed = registry.gateways.remove(name).is_some();
        drop(registry);
        self.health.write().await.remove(name);
        if removed {
            info!(gateway = %name, "Unregistered gateway");
        }
        removed
    }

    pub async fn get(&self, name: &str) -> Result<Arc<dyn PaymentGateway>, GatewayError> {
        self.registry
            .read()
            .await
            .gateways
            .get(name)
            .cloned()
            .ok_or_else(|| GatewayError::NotRegistered(name.to_string()))
    }

    pub async fn gateway_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.registry.read().await.gateways.keys().cloned().collect();
        names.sort();
        names
    }

    pub async fn webhook(&self, name: &str) -> Option<Arc<dyn WebhookProtocol>> {
        self.registry.read().await.webhooks.get(name).cloned()
    }

    // ─────────────────────────────────────────────────────────────────────────────
    // Routing
    // ─────────────────────────────────────────────────────────────────────────────

    pub async fn set_route(&self, channel: &str, route: Route) {
        info!(channel, primary = %route.primary, fallback = ?route.fallback, "Updating route");
        self.registry
            .write()
            .await
            .routes
            .insert(channel.to_ascii_uppercase(), route);
    }

    pub async fn routes(&self) -> BTreeMap<String, Route> {
        self.registry.read().await.routes.clone()
    }

    /// Primary gateway for the channel, else its fallback.
    pub async fn get_by_channel(&self, channel: &str) -> Result<Resolution, GatewayError> {
        let channel = channel.to_ascii_uppercase();
        let registry = self.registry.read().await;
        let route = registry
            .routes
            .get(&channel)
            .ok_or_else(|| GatewayError::UnsupportedChannel(channel.clone()))?;

        if let Some(gateway) = registry.usable(&route.primary, &channel) {
            return Ok(Resolution {
                gateway,
                used_fallback: false,
            });
        }
        match route.fallback.as_deref() {
            Some(fallback) => {
                let gateway = registry
                    .usable(fallback, &channel)
                    .ok_or_else(|| GatewayError::NotRegistered(fallback.to_string()))?;
                warn!(
                    channel = %channel,
                    primary = %route.primary,
                    fallback,
                    "Primary gateway unavailable, using fallback"
                );
                Ok(Resolution {
                    gateway,
                    used_fallback: true,
                })
            }
            None => Err(GatewayError::NotRegistered(route.primary.clone())),
        }
    }

    /// An explicit gateway on the request wins when it is registered and
    /// serves the channel; otherwise the channel route decides.
    pub async fn resolve(&self, request: &PaymentRequest) -> Result<Resolution, GatewayError> {
        let channel = request.channel.to_ascii_uppercase();
        if let Some(name) = request.gateway.as_deref() {
            let registry = self.registry.read().await;
            match registry.gateways.get(name) {
                Some(gateway) if gateway.supports(&channel) => {
                    return Ok(Resolution {
                        gateway: gateway.clone(),
                        used_fallback: false,
                    });
                }
                Some(_) => return Err(GatewayError::UnsupportedChannel(channel)),
                None => {
                    warn!(gateway = name, channel = %channel, "Requested gateway not registered, using route");
                }
            }
        }
        let mut resolution = self.get_by_channel(&channel).await?;
        resolution.used_fallback |= request.gateway.is_some();
        Ok(resolution)
    }

    // ─────────────────────────────────────────────────────────────────────────────
    // Payments
    // ─────────────────────────────────────────────────────────────────────────────

    /// Resolves the gateway, then calls it with no lock held.
    #[instrument(skip(self, request), fields(reference = %request.reference, channel = %request.channel))]
    pub async fn create_payment(
        &self,
        request: &PaymentRequest,
    ) -> Result<PaymentInstrument, GatewayError> {
        let Resolution {
            gateway,
            used_fallback,
        } = self.resolve(request).await?;
        debug!(gateway = gateway.name(), used_fallback, "Gateway resolved");
        gateway.create_payment(request).await
    }

    #[instrument(skip(self, lookup), fields(reference = %lookup.reference))]
    pub async fn check_payment_status(
        &self,
        gateway: &str,
        lookup: &PaymentLookup,
    ) -> Result<PaymentStatus, GatewayError> {
        let gateway = self.get(gateway).await?;
        gateway.check_status(lookup).await
    }

    pub async fn cancel_payment(&self, gateway: &str, lookup: &PaymentLookup) -> Result<(), GatewayError> {
        let gateway = self.get(gateway).await?;
        gateway.cancel_payment(lookup).await
    }

    // ─────────────────────────────────────────────────────────────────────────────
    // Health
    // ─────────────────────────────────────────────────────────────────────────────

    /// Last recorded health per gateway. Advisory only; routing ignores it.
    pub async fn health(&self) -> Vec<GatewayHealth> {
        let mut all: Vec<GatewayHealth> = self.health.read().await.values().cloned().collect();
        all.sort_by(|a, b| a.gateway.cmp(&b.gateway));
        all
    }

    /// Checks every registered gateway concurrently and records the results.
    pub async fn check_health(&self) -> Vec<GatewayHealth> {
        self.check_health_with(HEALTH_CHECK_TIMEOUT).await
    }

    pub async fn check_health_with(&self, timeout: Duration) -> Vec<GatewayHealth> {
        let gateways: Vec<Arc<dyn PaymentGateway>> =
            self.registry.read().await.gateways.values().cloned().collect();

        let mut checks = JoinSet::new();
        for gateway in gateways {
            checks.spawn(async move {
                let started = Instant::now();
                let result = tokio::time::timeout(timeout, gateway.health_check()).await;
                classify(gateway.name(), result, started.elapsed())
            });
        }

        let mut results = Vec::new();
        while let Some(joined) = checks.join_next().await {
            match joined {
                Ok(health) => results.push(health),
                Err(e) => warn!(error = %e, "Health check task failed"),
            }
        }
        results.sort_by(|a, b| a.gateway.cmp(&b.gateway));

        let mut recorded = self.health.write().await;
        for health in &results {
            if health.status != HealthStatus::Healthy {
                warn!(
                    gateway = %health.gateway,
                    status = ?health.status,
                    message = ?health.message,
                    "Gateway health degraded"
                );
            }
            recorded.insert(health.gateway.clone(), health.clone());
        }
        results
    }

    /// Runs `check_health` every `interval` until `shutdown` flips to true.
    pub fn spawn_health_sweep(
        self: Arc<Self>,
        interval: Duration,
        mut shutdown: watch::Receiver<bool>,
    ) -> JoinHandle<()> {
        tokio::spawn(async move {
            info!(interval_secs = interval.as_secs(), "Starting gateway health sweep");
            let mut ticker = tokio::time::interval(interval);
            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        let results = self.check_health().await;
                        debug!(gateways = results.len(), "Health sweep finished");
                    }
                    changed = shutdown.changed() => {
                        if changed.is_err() || *shutdown.borrow() {
                            info!("Stopping gateway health sweep");
                            break;
                        }
                    }
                }
            }
        })
    }
}

fn classify(
    gateway: &str,
    result: Result<Result<(), GatewayError>, tokio::time::error::Elapsed>,
    elapsed: Duration,
) -> GatewayHealth {
    let (status, message) = match result {
        Ok(Ok(())) if elapsed <= SLOW_HEALTH_CHECK => (HealthStatus::Healthy, None),
        Ok(Ok(())) => (
            HealthStatus::Degraded,
            Some(format!("slow response: {}ms", elapsed.as_millis())),
        ),
        Ok(Err(e)) if e.is_retryable() => (HealthStatus::Degraded, Some(e.to_string())),
        Ok(Err(e)) => (HealthStatus::Down, Some(e.to_string())),
        Err(_) => (HealthStatus::Down, Some("health check timed out".to_string())),
    };
    GatewayHealth {
        gateway: gateway.to_string(),
        status,
        message,
        latency_ms: elapsed.as_millis() as u64,
        checked_at: Utc::now(),
    }
}
