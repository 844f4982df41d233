//! # Checkout Types
//!
//! Domain types and port traits for the checkout settlement engine.
//! This crate has no IO dependencies: data structures, pricing and
//! state-machine rules, and the traits adapters implement.
//!
//! ## Architecture
//!
//! - `domain/` - Money, channels, orders, ledger, promos, payment instruments
//! - `ports/` - `PaymentGateway`, `OrderRepository`, `CatalogRepository`
//! - `dto/` - Request/response shapes for the order API
//! - `error/` - Domain, gateway, callback, repository and application errors

pub mod domain;
pub mod dto;
pub mod error;
pub mod ports;

pub use domain::{
    BALANCE_CHANNEL, CallbackEvent, CallbackReference, ChangeOutcome, ChannelKind, Currency,
    DayOfWeek, DayWindow, Direction, EventStatus, FeeModel, GatewayHealth, HealthStatus,
    Instrument, LedgerEntry, LedgerPosting, Money, NewOrderEffects, ORDER_PAID, Order, OrderId,
    OrderKind, OrderStatus, OutboxEvent, PaymentChannel, PaymentInstrument, PaymentLookup,
    PaymentRequest, PaymentState, PaymentStatus, Pricing, Promo, PromoContext, PromoRejection,
    PromoReservation, PromoUsage, ReferenceType, SettlementEffects, Sku, StatusChange, StatusMap,
    TimelineEntry, Transition, UsageCounts, UsageLimits, UsageQuery,
};
pub use dto::*;
pub use error::{AppError, CallbackError, DomainError, GatewayError, RepoError};
pub use ports::{CatalogRepository, OrderRepository, PaymentGateway};
