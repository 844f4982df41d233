//! Provider callback endpoint.
//!
//! Every reply, success or not, uses the provider's own envelope so the
//! provider's retry logic reads it correctly.

use std::sync::Arc;

use axum::{
    Json,
    body::Bytes,
    extract::{Path, State},
    http::{HeaderMap, Method, StatusCode, Uri},
    response::{IntoResponse, Response},
};
use tracing::{debug, warn};

use checkout_gateways::{Ack, CallbackReply, InboundCallback};
use checkout_types::{AppError, CallbackError, CatalogRepository, OrderRepository};

use super::handlers::{ApiError, AppState};

#[tracing::instrument(skip(state, headers, body), fields(gateway = %gateway))]
pub async fn receive<R: OrderRepository + CatalogRepository>(
    State(state): State<Arc<AppState<R>>>,
    Path(gateway): Path<String>,
    method: Method,
    uri: Uri,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    let gateway = gateway.to_uppercase();
    let Some(protocol) = state.service.gateways().webhook(&gateway).await else {
        warn!("Callback for unregistered gateway");
        return ApiError(AppError::NotFound(format!("Gateway {}", gateway))).into_response();
    };
    debug!(body = %String::from_utf8_lossy(&body), "Callback received");

    let callback = InboundCallback {
        method: method.as_str(),
        path: uri.path(),
        headers: &headers,
        body: &body,
    };
    let ack = match protocol.parse_callback(&callback) {
        Ok(event) => state.service.reconciler().apply_callback(event).await,
        Err(CallbackError::InvalidSignature) => {
            warn!("Callback rejected: invalid signature");
            Ack::InvalidSignature
        }
        // Acknowledged so the provider stops retrying; flagged for follow-up.
        Err(e) => {
            warn!(needs_review = true, "Unusable callback acknowledged: {}", e);
            Ack::from(&e)
        }
    };
    debug!(?ack, "Callback handled");

    reply(protocol.acknowledge(ack))
}

fn reply(reply: CallbackReply) -> Response {
    let status = StatusCode::from_u16(reply.status).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
    (status, Json(reply.body)).into_response()
}
