//! Domain models for the checkout engine.

pub mod catalog;
pub mod channel;
pub mod clock;
pub mod event;
pub mod ledger;
pub mod money;
pub mod order;
pub mod payment;
pub mod promo;

pub use catalog::Sku;
pub use channel::{BALANCE_CHANNEL, ChannelKind, FeeModel, PaymentChannel};
pub use event::{EventStatus, ORDER_PAID, OutboxEvent};
pub use ledger::{Direction, LedgerEntry, LedgerPosting, ReferenceType};
pub use money::{Currency, Money};
pub use order::{
    ChangeOutcome, NewOrderEffects, Order, OrderId, OrderKind, OrderStatus, PaymentState, Pricing,
    SettlementEffects, StatusChange, TimelineEntry, Transition,
};
pub use payment::{
    CallbackEvent, CallbackReference, GatewayHealth, HealthStatus, Instrument, PaymentInstrument,
    PaymentLookup, PaymentRequest, PaymentStatus, StatusMap,
};
pub use promo::{
    DayOfWeek, DayWindow, Promo, PromoContext, PromoRejection, PromoReservation, PromoUsage,
    UsageCounts, UsageLimits, UsageQuery,
};
