//! # Checkout Application
//!
//! Binary that wires together all the components:
//! - Load configuration from environment
//! - Initialize the repository adapter and seed the catalog
//! - Register the configured payment gateways
//! - Start the background sweeps and the fulfillment outbox
//! - Start the HTTP server

mod config;
mod gateways;

use opentelemetry::global;
use opentelemetry_otlp::WithExportConfig;
use opentelemetry_sdk::{propagation::TraceContextPropagator, trace as sdktrace};
use tokio::sync::watch;
use tracing_subscriber::{Layer, layer::SubscriberExt, util::SubscriberInitExt};

use checkout_hex::{ExpirySweeper, SettlementConfig, SettlementService, inbound::HttpServer};
use checkout_repo::{OutboxDispatcher, build_repo, seed_catalog};

use config::{Config, LogFormat};

fn init_tracer(
    endpoint: &str,
) -> anyhow::Result<(sdktrace::Tracer, sdktrace::SdkTracerProvider)> {
    global::set_text_map_propagator(TraceContextPropagator::new());

    // Use gRPC exporter with batch processing (non-blocking)
    let exporter = opentelemetry_otlp::SpanExporter::builder()
        .with_tonic()
        .with_endpoint(endpoint)
        .build()
        .map_err(|e| anyhow::anyhow!("failed to create OTLP span exporter: {}", e))?;

    let provider = sdktrace::SdkTracerProvider::builder()
        .with_batch_exporter(exporter)
        .build();

    global::set_tracer_provider(provider.clone());

    use opentelemetry::trace::TracerProvider as _;
    Ok((provider.tracer("checkout-service"), provider))
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load environment variables
    dotenvy::dotenv().ok();

    let config = Config::from_env()?;

    // OpenTelemetry export only when a collector is configured
    let otel = config
        .otlp_endpoint
        .as_deref()
        .map(init_tracer)
        .transpose()?;
    let (telemetry, otel_provider) = match otel {
        Some((tracer, provider)) => (
            Some(tracing_opentelemetry::layer().with_tracer(tracer)),
            Some(provider),
        ),
        None => (None, None),
    };

    let fmt = match config.log_format {
        LogFormat::Json => tracing_subscriber::fmt::layer().json().boxed(),
        LogFormat::Pretty => tracing_subscriber::fmt::layer().boxed(),
    };

    // Initialize tracing subscriber
    tracing_subscriber::registry()
        .with(fmt)
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                "info,checkout_app=debug,checkout_hex=debug,checkout_gateways=debug".into()
            }),
        )
        .with(telemetry)
        .init();

    tracing::info!(
        mode = ?config.gateway_mode,
        "Starting checkout server on port {}",
        config.port
    );

    // Build repository (handles connection and migration)
    let repo = build_repo(&config.database_url).await?;
    tracing::info!(backend = repo.backend_name(), "Repository ready");
    seed_catalog(&repo).await?;
    let repo = std::sync::Arc::new(repo);

    let gateways = gateways::build_manager(&config).await?;

    let service = SettlementService::with_config(
        repo.clone(),
        gateways.clone(),
        SettlementConfig {
            payment_expiry: config.payment_expiry,
            expiry_grace: config.expiry_grace,
            public_base_url: config.public_base_url.clone(),
            wallet_currency: config.wallet_currency,
        },
    );
    if config.public_base_url.is_none() {
        tracing::warn!("PUBLIC_BASE_URL is not set; providers fall back to their dashboard callback URLs");
    }

    // Background tasks stop when the server does
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let mut tasks = vec![
        gateways
            .clone()
            .spawn_health_sweep(config.health_check_interval, shutdown_rx.clone()),
        tokio::spawn(
            ExpirySweeper::new(service.reconciler().clone())
                .run(config.expiry_sweep_interval, shutdown_rx.clone()),
        ),
    ];
    match &config.fulfillment {
        Some(fulfillment) => tasks.push(tokio::spawn(
            OutboxDispatcher::new(repo.clone(), fulfillment.url.clone(), fulfillment.secret.clone())
                .run(shutdown_rx.clone()),
        )),
        None => tracing::warn!("FULFILLMENT_URL is not set; paid order events stay queued"),
    }

    // Create and run the HTTP server
    let server = HttpServer::with_rate_limit(service, config.order_rate_limit_per_minute);
    let addr = format!("0.0.0.0:{}", config.port);
    let result = server.run(&addr).await;

    let _ = shutdown_tx.send(true);
    for task in tasks {
        let _ = task.await;
    }

    // Ensure traces are flushed before exit
    if let Some(provider) = otel_provider {
        let _ = provider.shutdown();
    }
    result
}
