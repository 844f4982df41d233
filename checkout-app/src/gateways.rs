//! Builds the gateway manager from the configured provider sections.

use std::sync::Arc;

use anyhow::Context;
use tracing::{info, warn};

use checkout_gateways::providers::{
    BcaClient, BriClient, DanaClient, LinkquClient, MidtransClient, PakailinkClient, XenditClient,
};
use checkout_gateways::{GatewayManager, WebhookProtocol, default_routes};
use checkout_types::PaymentGateway;

use crate::config::Config;

async fn register<G, W>(manager: &GatewayManager, client: G, webhook: W)
where
    G: PaymentGateway,
    W: WebhookProtocol,
{
    manager
        .register_with_webhook(Arc::new(client), Arc::new(webhook))
        .await;
}

/// Registers every provider with credentials, then applies route overrides.
pub async fn build_manager(config: &Config) -> anyhow::Result<Arc<GatewayManager>> {
    let manager = GatewayManager::new(default_routes());
    let providers = &config.providers;

    if let Some(cfg) = &providers.bri {
        let client = BriClient::new(cfg.clone()).context("BRI_DIRECT configuration")?;
        let webhook = client.webhook();
        register(&manager, client, webhook).await;
    }
    if let Some(cfg) = &providers.bca {
        let client = BcaClient::new(cfg.clone()).context("BCA_DIRECT configuration")?;
        let webhook = client.webhook();
        register(&manager, client, webhook).await;
    }
    if let Some(cfg) = &providers.dana {
        let client = DanaClient::new(cfg.clone()).context("DANA_DIRECT configuration")?;
        let webhook = client.webhook();
        register(&manager, client, webhook).await;
    }
    if let Some(cfg) = &providers.pakailink {
        let client = PakailinkClient::new(cfg.clone()).context("PAKAILINK configuration")?;
        let webhook = client.webhook();
        register(&manager, client, webhook).await;
    }
    if let Some(cfg) = &providers.xendit {
        let client = XenditClient::new(cfg.clone()).context("XENDIT configuration")?;
        let webhook = client.webhook();
        register(&manager, client, webhook).await;
    }
    if let Some(cfg) = &providers.midtrans {
        let client = MidtransClient::new(cfg.clone()).context("MIDTRANS configuration")?;
        let webhook = client.webhook();
        register(&manager, client, webhook).await;
    }
    if let Some(cfg) = &providers.linkqu {
        let client = LinkquClient::new(cfg.clone()).context("LINKQU configuration")?;
        let webhook = client.webhook();
        register(&manager, client, webhook).await;
    }

    for (channel, route) in &config.routes {
        info!(channel = %channel, primary = %route.primary, fallback = ?route.fallback, "Route override");
        manager.set_route(channel, route.clone()).await;
    }

    let names = manager.gateway_names().await;
    if names.is_empty() {
        warn!("No payment gateways configured; only BALANCE orders can be settled");
    } else {
        info!(gateways = ?names, "Payment gateways ready");
    }
    Ok(Arc::new(manager))
}
