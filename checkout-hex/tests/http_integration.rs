//! HTTP-level tests for the order API and provider callbacks.
//!
//! The router runs on the in-memory repository with a stub gateway standing
//! in for XENDIT; callbacks go through the real Xendit callback parser.

use std::collections::BTreeSet;
use std::sync::Arc;

use async_trait::async_trait;
use axum::{
    Router,
    body::Body,
    http::{Method, Request, StatusCode},
};
use chrono::Utc;
use http_body_util::BodyExt;
use serde_json::{Value, json};
use tower::ServiceExt;

use checkout_gateways::providers::{XenditClient, XenditConfig};
use checkout_gateways::{GatewayManager, default_routes};
use checkout_hex::{SettlementConfig, SettlementService, inbound::HttpServer};
use checkout_repo::{MemoryRepo, seed_catalog};
use checkout_types::{
    CatalogRepository, Currency, GatewayError, Instrument, LedgerPosting, Money, OrderRepository,
    PaymentGateway, PaymentInstrument, PaymentLookup, PaymentRequest, PaymentStatus,
    ReferenceType,
};

const CALLBACK_TOKEN: &str = "test-callback-token";

/// Retail gateway that hands out a payment code and reports PENDING.
struct RetailStub {
    channels: BTreeSet<String>,
}

#[async_trait]
impl PaymentGateway for RetailStub {
    fn name(&self) -> &str {
        "XENDIT"
    }

    fn supported_channels(&self) -> &BTreeSet<String> {
        &self.channels
    }

    async fn create_payment(
        &self,
        request: &PaymentRequest,
    ) -> Result<PaymentInstrument, GatewayError> {
        Ok(PaymentInstrument {
            gateway: "XENDIT".into(),
            gateway_ref: format!("pr-{}", request.reference),
            instrument: Instrument::RetailCode {
                code: "TEST1234".into(),
            },
            fee: request.fee,
            total: request.amount,
            expires_at: request.expires_at(Utc::now()),
            instructions: vec!["Show the code at the cashier".into()],
        })
    }

    async fn check_status(&self, _lookup: &PaymentLookup) -> Result<PaymentStatus, GatewayError> {
        Ok(PaymentStatus::Pending)
    }

    async fn health_check(&self) -> Result<(), GatewayError> {
        Ok(())
    }
}

async fn create_test_app(orders_per_minute: u32) -> (Router, Arc<MemoryRepo>) {
    let repo = Arc::new(MemoryRepo::new());
    seed_catalog(repo.as_ref()).await.unwrap();

    let manager = Arc::new(GatewayManager::new(default_routes()));
    let webhook = XenditClient::new(XenditConfig {
        secret_key: "xnd_development_test".into(),
        callback_token: CALLBACK_TOKEN.into(),
        ..Default::default()
    })
    .unwrap()
    .webhook();
    let gateway = RetailStub {
        channels: ["ALFAMART", "INDOMARET"].iter().map(|c| c.to_string()).collect(),
    };
    manager
        .register_with_webhook(Arc::new(gateway), Arc::new(webhook))
        .await;

    let config = SettlementConfig {
        public_base_url: Some("https://shop.example.com".into()),
        ..SettlementConfig::default()
    };
    let service = SettlementService::with_config(repo.clone(), manager, config);
    let server = HttpServer::with_rate_limit(service, orders_per_minute);
    (server.router(), repo)
}

fn json_request(method: Method, uri: &str, body: Value) -> Request<Body> {
    Request::builder()
        .method(method)
        .uri(uri)
        .header("Content-Type", "application/json")
        .header("X-Forwarded-For", "203.0.113.10")
        .body(Body::from(body.to_string()))
        .unwrap()
}

fn get_request(uri: &str) -> Request<Body> {
    Request::builder().uri(uri).body(Body::empty()).unwrap()
}

fn callback_request(token: &str, body: Value) -> Request<Body> {
    Request::builder()
        .method(Method::POST)
        .uri("/webhooks/XENDIT")
        .header("Content-Type", "application/json")
        .header("x-callback-token", token)
        .body(Body::from(body.to_string()))
        .unwrap()
}

async fn body_json(response: axum::response::Response) -> Value {
    let body = response.into_body().collect().await.unwrap().to_bytes();
    serde_json::from_slice(&body).unwrap()
}

async fn create_retail_order(app: &Router) -> Value {
    let response = app
        .clone()
        .oneshot(json_request(
            Method::POST,
            "/api/orders",
            json!({ "sku_code": "MLBB_86", "channel": "ALFAMART", "user_id": "user-1" }),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::CREATED);
    body_json(response).await
}

#[tokio::test]
async fn test_health() {
    let (app, _) = create_test_app(10).await;
    let response = app.oneshot(get_request("/health")).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
}

#[tokio::test]
async fn test_quote_prices_without_persisting() {
    let (app, repo) = create_test_app(10).await;
    let response = app
        .oneshot(json_request(
            Method::POST,
            "/api/orders/quote",
            json!({ "sku_code": "MLBB_86", "channel": "ALFAMART" }),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let quote = body_json(response).await;
    assert_eq!(quote["pricing"]["subtotal"], 20_000);
    assert_eq!(quote["pricing"]["fee"], 5_000);
    assert_eq!(quote["pricing"]["total"], 25_000);
    assert!(repo.list_overdue(Utc::now() + chrono::Duration::days(1), 10).await.unwrap().is_empty());
}

#[tokio::test]
async fn test_create_order_returns_instrument() {
    let (app, _) = create_test_app(10).await;
    let order = create_retail_order(&app).await;

    assert_eq!(order["status"], "PENDING");
    assert_eq!(order["payment_status"], "UNPAID");
    assert_eq!(order["gateway"], "XENDIT");
    assert_eq!(order["payment"]["instrument"]["code"], "TEST1234");
    assert!(order["invoice"].as_str().unwrap().starts_with("INV"));
}

#[tokio::test]
async fn test_unknown_sku_is_bad_request() {
    let (app, _) = create_test_app(10).await;
    let response = app
        .oneshot(json_request(
            Method::POST,
            "/api/orders",
            json!({ "sku_code": "NOPE", "channel": "ALFAMART" }),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);

    let json = body_json(response).await;
    assert_eq!(json["code"], 400);
    assert_eq!(json["reason"], "BAD_REQUEST");
}

#[tokio::test]
async fn test_unrouted_channel_is_unavailable() {
    let (app, _) = create_test_app(10).await;
    let response = app
        .oneshot(json_request(
            Method::POST,
            "/api/orders",
            json!({ "sku_code": "MLBB_86", "channel": "GOPAY" }),
        ))
        .await
        .unwrap();
    assert!(response.status().is_client_error() || response.status().is_server_error());
    let json = body_json(response).await;
    assert!(json["error"].is_string());
}

#[tokio::test]
async fn test_missing_order_is_not_found() {
    let (app, _) = create_test_app(10).await;
    let response = app
        .oneshot(get_request("/api/orders/INV20250101NOTHERE"))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
    assert_eq!(body_json(response).await["reason"], "NOT_FOUND");
}

#[tokio::test]
async fn test_paid_callback_settles_order_once() {
    let (app, repo) = create_test_app(10).await;
    let order = create_retail_order(&app).await;
    let invoice = order["invoice"].as_str().unwrap().to_string();
    let callback = json!({ "external_id": invoice, "amount": 25_000 });

    for _ in 0..2 {
        let response = app
            .clone()
            .oneshot(callback_request(CALLBACK_TOKEN, callback.clone()))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(body_json(response).await["status"], "ok");
    }

    let response = app
        .clone()
        .oneshot(get_request(&format!("/api/orders/{}", invoice)))
        .await
        .unwrap();
    let order = body_json(response).await;
    assert_eq!(order["payment_status"], "PAID");
    assert_eq!(order["status"], "PROCESSING");
    assert_eq!(repo.pending_events(10).await.unwrap().len(), 1);
}

#[tokio::test]
async fn test_callback_with_bad_token_is_rejected() {
    let (app, _) = create_test_app(10).await;
    let order = create_retail_order(&app).await;
    let callback = json!({ "external_id": order["invoice"], "amount": 25_000 });

    let response = app
        .clone()
        .oneshot(callback_request("wrong-token", callback))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);

    let response = app
        .oneshot(get_request(&format!(
            "/api/orders/{}",
            order["invoice"].as_str().unwrap()
        )))
        .await
        .unwrap();
    assert_eq!(body_json(response).await["status"], "PENDING");
}

#[tokio::test]
async fn test_callback_for_unknown_order_is_acknowledged() {
    let (app, _) = create_test_app(10).await;
    let response = app
        .oneshot(callback_request(
            CALLBACK_TOKEN,
            json!({ "external_id": "INV20250101UNKNOWN1", "amount": 10_000 }),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
}

#[tokio::test]
async fn test_unusable_callbacks_are_acknowledged() {
    let (app, _) = create_test_app(10).await;
    let response = app
        .clone()
        .oneshot(callback_request(CALLBACK_TOKEN, json!({ "amount": 10_000 })))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(body_json(response).await["status"], "ok");

    let garbage = Request::builder()
        .method(Method::POST)
        .uri("/webhooks/XENDIT")
        .header("Content-Type", "application/json")
        .header("x-callback-token", CALLBACK_TOKEN)
        .body(Body::from("not json"))
        .unwrap();
    let response = app.oneshot(garbage).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
}

#[tokio::test]
async fn test_callback_for_unregistered_gateway_is_not_found() {
    let (app, _) = create_test_app(10).await;
    let response = app
        .oneshot(
            Request::builder()
                .method(Method::POST)
                .uri("/webhooks/NOBODY")
                .body(Body::from("{}"))
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_balance_order_settles_immediately() {
    let (app, repo) = create_test_app(10).await;
    repo.adjust_balance(LedgerPosting::credit(
        "user-7",
        Money::new(50_000, Currency::IDR).unwrap(),
        ReferenceType::Adjustment,
        "seed-user-7",
        "Opening balance",
    ))
    .await
    .unwrap();

    let response = app
        .clone()
        .oneshot(json_request(
            Method::POST,
            "/api/orders",
            json!({ "sku_code": "MLBB_86", "channel": "BALANCE", "user_id": "user-7" }),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::CREATED);
    assert_eq!(body_json(response).await["payment_status"], "PAID");

    let response = app
        .clone()
        .oneshot(get_request("/api/users/user-7/balance"))
        .await
        .unwrap();
    assert_eq!(body_json(response).await["balance"], 30_000);

    let response = app
        .oneshot(get_request("/api/users/user-7/ledger"))
        .await
        .unwrap();
    assert_eq!(body_json(response).await["entries"].as_array().unwrap().len(), 2);
}

#[tokio::test]
async fn test_insufficient_balance_is_unprocessable() {
    let (app, _) = create_test_app(10).await;
    let response = app
        .oneshot(json_request(
            Method::POST,
            "/api/orders",
            json!({ "sku_code": "MLBB_86", "channel": "BALANCE", "user_id": "user-empty" }),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::UNPROCESSABLE_ENTITY);
    assert_eq!(body_json(response).await["reason"], "INSUFFICIENT_BALANCE");
}

#[tokio::test]
async fn test_cancel_then_callback_is_ignored() {
    let (app, _) = create_test_app(10).await;
    let order = create_retail_order(&app).await;
    let invoice = order["invoice"].as_str().unwrap().to_string();

    let response = app
        .clone()
        .oneshot(json_request(
            Method::POST,
            &format!("/api/orders/{}/cancel", invoice),
            json!({}),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(body_json(response).await["status"], "CANCELLED");

    let response = app
        .clone()
        .oneshot(callback_request(
            CALLBACK_TOKEN,
            json!({ "external_id": invoice, "amount": 25_000 }),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let response = app
        .oneshot(get_request(&format!("/api/orders/{}", invoice)))
        .await
        .unwrap();
    assert_eq!(body_json(response).await["status"], "CANCELLED");
}

#[tokio::test]
async fn test_routes_can_be_changed() {
    let (app, _) = create_test_app(10).await;
    let response = app
        .clone()
        .oneshot(json_request(
            Method::PUT,
            "/api/routes/qris",
            json!({ "primary": "xendit" }),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let route = body_json(response).await;
    assert_eq!(route["channel"], "QRIS");
    assert_eq!(route["primary"], "XENDIT");

    let response = app.oneshot(get_request("/api/routes")).await.unwrap();
    let routes = body_json(response).await;
    assert!(
        routes
            .as_array()
            .unwrap()
            .iter()
            .any(|r| r["channel"] == "QRIS" && r["primary"] == "XENDIT")
    );
}

#[tokio::test]
async fn test_gateway_health_check() {
    let (app, _) = create_test_app(10).await;
    let response = app
        .oneshot(
            Request::builder()
                .method(Method::POST)
                .uri("/api/gateways/health/check")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let health = body_json(response).await;
    let gateways = health["gateways"].as_array().unwrap();
    assert_eq!(gateways.len(), 1);
    assert_eq!(gateways[0]["status"], "HEALTHY");
}

#[tokio::test]
async fn test_openapi_document_is_served() {
    let (app, _) = create_test_app(10).await;
    let response = app
        .oneshot(get_request("/api-docs/openapi.json"))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let doc = body_json(response).await;
    assert!(doc["paths"]["/api/orders"].is_object());
}
