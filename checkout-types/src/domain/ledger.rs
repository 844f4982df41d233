//! Balance ledger: append-only entries with a materialized running balance.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use uuid::Uuid;

use super::money::{Currency, Money};
use crate::error::DomainError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Direction {
    Debit,
    Credit,
}

impl AsRef<str> for Direction {
    fn as_ref(&self) -> &str {
        match self {
            Direction::Debit => "DEBIT",
            Direction::Credit => "CREDIT",
        }
    }
}

impl std::fmt::Display for Direction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_ref())
    }
}

impl std::str::FromStr for Direction {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "DEBIT" => Ok(Direction::Debit),
            "CREDIT" => Ok(Direction::Credit),
            other => Err(DomainError::ValidationError(format!(
                "Unknown ledger direction: {}",
                other
            ))),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ReferenceType {
    Transaction,
    Deposit,
    Refund,
    Adjustment,
}

impl AsRef<str> for ReferenceType {
    fn as_ref(&self) -> &str {
        match self {
            ReferenceType::Transaction => "TRANSACTION",
            ReferenceType::Deposit => "DEPOSIT",
            ReferenceType::Refund => "REFUND",
            ReferenceType::Adjustment => "ADJUSTMENT",
        }
    }
}

impl std::str::FromStr for ReferenceType {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "TRANSACTION" => Ok(ReferenceType::Transaction),
            "DEPOSIT" => Ok(ReferenceType::Deposit),
            "REFUND" => Ok(ReferenceType::Refund),
            "ADJUSTMENT" => Ok(ReferenceType::Adjustment),
            other => Err(DomainError::ValidationError(format!(
                "Unknown ledger reference type: {}",
                other
            ))),
        }
    }
}

/// A balance movement to be written. The repository fills in the
/// before/after balances when it commits the entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LedgerPosting {
    pub user_id: String,
    pub direction: Direction,
    pub amount: Money,
    pub reference_type: ReferenceType,
    pub reference_id: String,
    pub description: String,
}

impl LedgerPosting {
    pub fn debit(
        user_id: impl Into<String>,
        amount: Money,
        reference_type: ReferenceType,
        reference_id: impl Into<String>,
        description: impl Into<String>,
    ) -> Self {
        Self {
            user_id: user_id.into(),
            direction: Direction::Debit,
            amount,
            reference_type,
            reference_id: reference_id.into(),
            description: description.into(),
        }
    }

    pub fn credit(
        user_id: impl Into<String>,
        amount: Money,
        reference_type: ReferenceType,
        reference_id: impl Into<String>,
        description: impl Into<String>,
    ) -> Self {
        Self {
            direction: Direction::Credit,
            ..Self::debit(user_id, amount, reference_type, reference_id, description)
        }
    }

    /// A reference may move the balance at most once per direction.
    pub fn idempotency_key(&self) -> String {
        format!("{}:{}", self.reference_id, self.direction)
    }

    /// Applies the posting to `before`, refusing to go negative.
    pub fn balance_after(&self, before: Money) -> Result<Money, DomainError> {
        match self.direction {
            Direction::Credit => before.checked_add(self.amount),
            Direction::Debit => before.checked_sub(self.amount),
        }
    }

    pub fn into_entry(self, before: Money, after: Money, now: DateTime<Utc>) -> LedgerEntry {
        LedgerEntry {
            id: Uuid::new_v4(),
            user_id: self.user_id,
            direction: self.direction,
            amount: self.amount.amount(),
            currency: self.amount.currency(),
            balance_before: before.amount(),
            balance_after: after.amount(),
            reference_type: self.reference_type,
            reference_id: self.reference_id,
            description: self.description,
            created_at: now,
        }
    }
}

/// A committed ledger row. Never updated or deleted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct LedgerEntry {
    pub id: Uuid,
    pub user_id: String,
    pub direction: Direction,
    pub amount: i64,
    pub currency: Currency,
    pub balance_before: i64,
    pub balance_after: i64,
    pub reference_type: ReferenceType,
    pub reference_id: String,
    pub description: String,
    pub created_at: DateTime<Utc>,
}
