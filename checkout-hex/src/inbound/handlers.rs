//! HTTP request handlers.

use std::sync::Arc;

use axum::{
    Json,
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
};

use checkout_types::{
    AppError, CatalogRepository, CreateDepositRequest, CreateOrderRequest, FulfillmentRequest,
    OrderRepository, QuoteRequest, SetRouteRequest,
};

use super::rate_limit::ClientIp;
use crate::SettlementService;

/// Application state shared across handlers.
pub struct AppState<R: OrderRepository + CatalogRepository> {
    pub service: SettlementService<R>,
}

/// Wrapper to implement IntoResponse for AppError (orphan rule workaround).
pub struct ApiError(pub AppError);

impl From<AppError> for ApiError {
    fn from(err: AppError) -> Self {
        ApiError(err)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match &self.0 {
            AppError::BadRequest(_) => StatusCode::BAD_REQUEST,
            AppError::NotFound(_) => StatusCode::NOT_FOUND,
            AppError::InsufficientBalance { .. } | AppError::PromoRejected(_) => {
                StatusCode::UNPROCESSABLE_ENTITY
            }
            AppError::PaymentRejected(_) => StatusCode::UNPROCESSABLE_ENTITY,
            AppError::GatewayUnavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
            AppError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };
        if status.is_server_error() {
            tracing::error!(reason = self.0.reason(), "Request failed: {}", self.0);
        }

        let body = serde_json::json!({
            "error": self.0.to_string(),
            "code": status.as_u16(),
            "reason": self.0.reason(),
        });

        (status, Json(body)).into_response()
    }
}

/// Health check endpoint.
pub async fn health() -> impl IntoResponse {
    Json(serde_json::json!({ "status": "healthy" }))
}

// ─────────────────────────────────────────────────────────────────────────────
// Orders
// ─────────────────────────────────────────────────────────────────────────────

#[tracing::instrument(skip(state, req), fields(sku = %req.sku_code, channel = %req.channel))]
pub async fn quote<R: OrderRepository + CatalogRepository>(
    State(state): State<Arc<AppState<R>>>,
    Json(req): Json<QuoteRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let quote = state.service.quote(req).await?;
    Ok(Json(quote))
}

#[tracing::instrument(skip(state, req), fields(sku = %req.sku_code, channel = %req.channel))]
pub async fn create_order<R: OrderRepository + CatalogRepository>(
    State(state): State<Arc<AppState<R>>>,
    ClientIp(ip): ClientIp,
    Json(mut req): Json<CreateOrderRequest>,
) -> Result<impl IntoResponse, ApiError> {
    if ip.is_some() {
        req.ip_address = ip;
    }
    let order = state.service.create_order(req).await?;
    Ok((StatusCode::CREATED, Json(order)))
}

#[tracing::instrument(skip(state))]
pub async fn get_order<R: OrderRepository + CatalogRepository>(
    State(state): State<Arc<AppState<R>>>,
    Path(invoice): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    let order = state.service.get_order(&invoice).await?;
    Ok(Json(order))
}

/// Asks the gateway for the payment status and applies it.
#[tracing::instrument(skip(state))]
pub async fn poll_order<R: OrderRepository + CatalogRepository>(
    State(state): State<Arc<AppState<R>>>,
    Path(invoice): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    let order = state.service.poll_order(&invoice).await?;
    Ok(Json(order))
}

#[tracing::instrument(skip(state))]
pub async fn cancel_order<R: OrderRepository + CatalogRepository>(
    State(state): State<Arc<AppState<R>>>,
    Path(invoice): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    let order = state.service.cancel_order(&invoice).await?;
    Ok(Json(order))
}

#[tracing::instrument(skip(state, req), fields(success = req.success))]
pub async fn fulfillment<R: OrderRepository + CatalogRepository>(
    State(state): State<Arc<AppState<R>>>,
    Path(invoice): Path<String>,
    Json(req): Json<FulfillmentRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let order = state.service.mark_fulfilled(&invoice, req).await?;
    Ok(Json(order))
}

// ─────────────────────────────────────────────────────────────────────────────
// Wallet
// ─────────────────────────────────────────────────────────────────────────────

#[tracing::instrument(skip(state, req), fields(user = %req.user_id, amount = req.amount, channel = %req.channel))]
pub async fn create_deposit<R: OrderRepository + CatalogRepository>(
    State(state): State<Arc<AppState<R>>>,
    Json(req): Json<CreateDepositRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let order = state.service.create_deposit(req).await?;
    Ok((StatusCode::CREATED, Json(order)))
}

#[tracing::instrument(skip(state))]
pub async fn balance<R: OrderRepository + CatalogRepository>(
    State(state): State<Arc<AppState<R>>>,
    Path(user): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    let balance = state.service.balance(&user).await?;
    Ok(Json(balance))
}

#[tracing::instrument(skip(state))]
pub async fn ledger<R: OrderRepository + CatalogRepository>(
    State(state): State<Arc<AppState<R>>>,
    Path(user): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    let ledger = state.service.ledger(&user).await?;
    Ok(Json(ledger))
}

// ─────────────────────────────────────────────────────────────────────────────
// Gateway administration
// ─────────────────────────────────────────────────────────────────────────────

/// Last recorded health of every registered gateway.
pub async fn gateway_health<R: OrderRepository + CatalogRepository>(
    State(state): State<Arc<AppState<R>>>,
) -> impl IntoResponse {
    Json(state.service.gateway_health().await)
}

/// Checks every gateway now.
#[tracing::instrument(skip(state))]
pub async fn check_gateway_health<R: OrderRepository + CatalogRepository>(
    State(state): State<Arc<AppState<R>>>,
) -> impl IntoResponse {
    Json(state.service.check_gateway_health().await)
}

pub async fn list_routes<R: OrderRepository + CatalogRepository>(
    State(state): State<Arc<AppState<R>>>,
) -> impl IntoResponse {
    Json(state.service.routes().await)
}

#[tracing::instrument(skip(state, req), fields(primary = %req.primary))]
pub async fn set_route<R: OrderRepository + CatalogRepository>(
    State(state): State<Arc<AppState<R>>>,
    Path(channel): Path<String>,
    Json(req): Json<SetRouteRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let route = state.service.set_route(&channel, req).await?;
    Ok(Json(route))
}
