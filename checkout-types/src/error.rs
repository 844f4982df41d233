//! Error types for the checkout engine.

use crate::domain::{Currency, OrderStatus, PromoRejection};

/// Domain-level errors (business rule violations).
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DomainError {
    #[error("Amount cannot be negative")]
    NegativeAmount,

    #[error("Currency mismatch: expected {expected}, got {got}")]
    CurrencyMismatch { expected: Currency, got: Currency },

    #[error("Insufficient balance: available {available}, requested {requested}")]
    InsufficientBalance { available: i64, requested: i64 },

    #[error("Invalid order transition: {from} -> {to}")]
    InvalidTransition { from: OrderStatus, to: OrderStatus },

    #[error("Promo rejected: {0}")]
    PromoRejected(PromoRejection),

    #[error("Validation error: {0}")]
    ValidationError(String),
}

/// Errors raised by payment gateway clients and the gateway manager.
#[derive(Debug, Clone, thiserror::Error)]
pub enum GatewayError {
    /// Missing or invalid credentials, keys or URLs. Fatal at construction.
    #[error("{gateway} misconfigured: {message}")]
    Config { gateway: String, message: String },

    /// Timeout, connection failure or provider 5xx. Outcome unknown.
    #[error("{gateway} unavailable: {message}")]
    Transient { gateway: String, message: String },

    /// Provider refused the request (bad signature, invalid amount, business rule).
    #[error("{gateway} rejected request [{code}]: {message}")]
    Rejected {
        gateway: String,
        code: String,
        message: String,
    },

    /// Provider answered with a body we could not interpret.
    #[error("{gateway} protocol error: {message}")]
    Protocol { gateway: String, message: String },

    #[error("{gateway} signing failed: {message}")]
    Signing { gateway: String, message: String },

    #[error("Gateway not registered: {0}")]
    NotRegistered(String),

    #[error("No gateway routes channel {0}")]
    UnsupportedChannel(String),

    #[error("{gateway} does not support {operation}")]
    Unsupported { gateway: String, operation: String },
}

impl GatewayError {
    pub fn transient(gateway: impl Into<String>, message: impl ToString) -> Self {
        Self::Transient {
            gateway: gateway.into(),
            message: message.to_string(),
        }
    }

    pub fn rejected(
        gateway: impl Into<String>,
        code: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self::Rejected {
            gateway: gateway.into(),
            code: code.into(),
            message: message.into(),
        }
    }

    pub fn protocol(gateway: impl Into<String>, message: impl ToString) -> Self {
        Self::Protocol {
            gateway: gateway.into(),
            message: message.to_string(),
        }
    }

    pub fn config(gateway: impl Into<String>, message: impl ToString) -> Self {
        Self::Config {
            gateway: gateway.into(),
            message: message.to_string(),
        }
    }

    pub fn signing(gateway: impl Into<String>, message: impl ToString) -> Self {
        Self::Signing {
            gateway: gateway.into(),
            message: message.to_string(),
        }
    }

    /// Whether the caller may retry: the provider never gave a definitive answer.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            GatewayError::Transient { .. } | GatewayError::Protocol { .. }
        )
    }

    /// Whether the gateway could not be used at all, so a fallback may be tried.
    pub fn is_unavailable(&self) -> bool {
        matches!(
            self,
            GatewayError::NotRegistered(_) | GatewayError::Config { .. }
        )
    }
}

/// Errors while interpreting an inbound provider callback.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CallbackError {
    #[error("Invalid callback signature")]
    InvalidSignature,

    #[error("Malformed callback: {0}")]
    Malformed(String),

    #[error("Callback carries no payment reference")]
    MissingReference,
}

/// Repository-level errors (data access failures).
#[derive(Debug, thiserror::Error)]
pub enum RepoError {
    #[error(transparent)]
    Domain(#[from] DomainError),

    #[error("Database error: {0}")]
    Database(String),

    #[error("Transaction error: {0}")]
    Transaction(String),

    #[error("Entity not found")]
    NotFound,

    #[error("Conflict: {0}")]
    Conflict(String),
}

/// Application-level errors (for HTTP responses).
///
/// Order-creation failures distinguish "retry later" from "fix the request"
/// from "top up your balance".
#[derive(Debug, thiserror::Error)]
pub enum AppError {
    #[error("Bad request: {0}")]
    BadRequest(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Insufficient balance: available {available}, requested {requested}")]
    InsufficientBalance { available: i64, requested: i64 },

    #[error("Promo rejected: {0}")]
    PromoRejected(PromoRejection),

    #[error("Payment gateway unavailable, retry later: {0}")]
    GatewayUnavailable(String),

    #[error("Payment rejected: {0}")]
    PaymentRejected(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl AppError {
    /// Machine-readable reason code surfaced next to the message.
    pub fn reason(&self) -> &'static str {
        match self {
            AppError::BadRequest(_) => "BAD_REQUEST",
            AppError::NotFound(_) => "NOT_FOUND",
            AppError::InsufficientBalance { .. } => "INSUFFICIENT_BALANCE",
            AppError::PromoRejected(r) => r.code(),
            AppError::GatewayUnavailable(_) => "GATEWAY_UNAVAILABLE",
            AppError::PaymentRejected(_) => "PAYMENT_REJECTED",
            AppError::Internal(_) => "INTERNAL",
        }
    }
}

impl From<DomainError> for AppError {
    fn from(err: DomainError) -> Self {
        match err {
            DomainError::InsufficientBalance {
                available,
                requested,
            } => AppError::InsufficientBalance {
                available,
                requested,
            },
            DomainError::PromoRejected(reason) => AppError::PromoRejected(reason),
            DomainError::ValidationError(msg) => AppError::BadRequest(msg),
            e => AppError::BadRequest(e.to_string()),
        }
    }
}

impl From<RepoError> for AppError {
    fn from(err: RepoError) -> Self {
        match err {
            RepoError::Domain(e) => e.into(),
            RepoError::NotFound => AppError::NotFound("Resource not found".into()),
            RepoError::Database(e) => AppError::Internal(e),
            RepoError::Transaction(e) => AppError::Internal(e),
            RepoError::Conflict(e) => AppError::BadRequest(e),
        }
    }
}

impl From<GatewayError> for AppError {
    fn from(err: GatewayError) -> Self {
        match &err {
            e if e.is_retryable() || e.is_unavailable() => {
                AppError::GatewayUnavailable(err.to_string())
            }
            GatewayError::UnsupportedChannel(_) => AppError::BadRequest(err.to_string()),
            GatewayError::Signing { .. } => AppError::GatewayUnavailable(err.to_string()),
            _ => AppError::PaymentRejected(err.to_string()),
        }
    }
}
