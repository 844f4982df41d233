//! # Checkout Gateways
//!
//! Outbound adapters for the third-party payment providers.
//!
//! - `signing/` - token cache, RSA and HMAC signers, webhook verification helpers
//! - `providers/` - one `PaymentGateway` implementation per provider, each with
//!   its `WebhookProtocol`
//! - `manager` - registry, channel routing with fallback, health sweep

pub mod callback;
pub mod http;
pub mod manager;
pub mod providers;
pub mod signing;

pub use callback::{Ack, CallbackReply, InboundCallback, WebhookProtocol};
pub use manager::{GatewayManager, Resolution, Route, default_routes};
