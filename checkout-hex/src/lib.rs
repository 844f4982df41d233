//! # Checkout Hex
//!
//! Application services and HTTP adapter for the checkout engine.
//!
//! ## Architecture
//!
//! - `service` - Settlement Engine: pricing, order creation, balance settlement
//! - `reconcile` - Reconciliation Layer: webhook and poll driven status moves
//! - `expiry` - background sweep of overdue orders
//! - `inbound/` - HTTP adapter (Axum server)
//!
//! Services are generic over `R: OrderRepository + CatalogRepository`, so the
//! SQLite adapter, the in-memory adapter and test mocks plug in unchanged.

pub mod expiry;
pub mod inbound;
pub mod openapi;
pub mod reconcile;
pub mod service;

#[cfg(test)]
mod service_tests;

pub use expiry::{ExpirySweeper, SweepReport};
pub use reconcile::{Reconciled, Reconciler, Settled};
pub use service::{SettlementConfig, SettlementService};
