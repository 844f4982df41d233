//! HTTP Server configuration and startup.

use std::{net::SocketAddr, sync::Arc, time::Duration};

use axum::{
    Router, middleware,
    routing::{get, post, put},
};
use tower_http::trace::TraceLayer;
use utoipa::OpenApi;
use utoipa_swagger_ui::SwaggerUi;

use checkout_types::{CatalogRepository, OrderRepository};

use super::handlers::{self, AppState};
use super::rate_limit::{RateLimiterState, rate_limit_middleware};
use super::webhooks;
use crate::SettlementService;
use crate::openapi::ApiDoc;

/// HTTP Server for the checkout API and provider callbacks.
pub struct HttpServer<R: OrderRepository + CatalogRepository> {
    state: Arc<AppState<R>>,
    rate_limiter: Arc<RateLimiterState>,
}

impl<R: OrderRepository + CatalogRepository> HttpServer<R> {
    /// Creates a new HTTP server with the given service.
    pub fn new(service: SettlementService<R>) -> Self {
        Self {
            state: Arc::new(AppState { service }),
            rate_limiter: Arc::new(RateLimiterState::default()), // 60 orders/min per client
        }
    }

    /// Creates a new HTTP server with a custom order creation limit.
    pub fn with_rate_limit(service: SettlementService<R>, requests_per_minute: u32) -> Self {
        Self {
            state: Arc::new(AppState { service }),
            rate_limiter: Arc::new(RateLimiterState::new(
                requests_per_minute,
                Duration::from_secs(60),
            )),
        }
    }

    /// Builds the Axum router with all routes.
    pub fn router(&self) -> Router {
        // Build HTTP metrics layer (uses globally set MeterProvider)
        let metrics = axum_otel_metrics::HttpMetricsLayerBuilder::new().build();

        let create_order = post(handlers::create_order::<R>).route_layer(
            middleware::from_fn_with_state(self.rate_limiter.clone(), rate_limit_middleware),
        );

        Router::new()
            .route("/health", get(handlers::health))
            .route("/api/orders/quote", post(handlers::quote::<R>))
            .route("/api/orders", create_order)
            .route("/api/orders/{invoice}", get(handlers::get_order::<R>))
            .route("/api/orders/{invoice}/poll", post(handlers::poll_order::<R>))
            .route(
                "/api/orders/{invoice}/cancel",
                post(handlers::cancel_order::<R>),
            )
            .route(
                "/api/orders/{invoice}/fulfillment",
                post(handlers::fulfillment::<R>),
            )
            .route("/api/deposits", post(handlers::create_deposit::<R>))
            .route("/api/users/{user}/balance", get(handlers::balance::<R>))
            .route("/api/users/{user}/ledger", get(handlers::ledger::<R>))
            .route("/api/gateways/health", get(handlers::gateway_health::<R>))
            .route(
                "/api/gateways/health/check",
                post(handlers::check_gateway_health::<R>),
            )
            .route("/api/routes", get(handlers::list_routes::<R>))
            .route("/api/routes/{channel}", put(handlers::set_route::<R>))
            .route("/webhooks/{gateway}", post(webhooks::receive::<R>))
            .merge(SwaggerUi::new("/docs").url("/api-docs/openapi.json", ApiDoc::openapi()))
            .layer(metrics)
            .layer(TraceLayer::new_for_http())
            .with_state(self.state.clone())
    }

    /// Runs the server on the given address with graceful shutdown.
    pub async fn run(self, addr: &str) -> anyhow::Result<()> {
        let listener = tokio::net::TcpListener::bind(addr).await?;
        tracing::info!("Server listening on {}", listener.local_addr()?);

        axum::serve(
            listener,
            self.router()
                .into_make_service_with_connect_info::<SocketAddr>(),
        )
        .with_graceful_shutdown(shutdown_signal())
        .await?;

        Ok(())
    }
}

async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to install signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    tracing::info!("Shutdown signal received, starting graceful shutdown...");
}
