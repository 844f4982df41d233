//! Type-safe monetary value with embedded currency.

use serde::{Deserialize, Serialize};
use std::fmt;
use utoipa::ToSchema;

use crate::error::DomainError;

/// Currencies the storefront settles in.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "UPPERCASE")]
pub enum Currency {
    #[default]
    IDR,
    MYR,
    PHP,
    SGD,
    USD,
}

impl Currency {
    /// Number of decimal places carried by the minor unit.
    ///
    /// Rupiah is settled in whole units by every provider we talk to.
    pub fn decimal_places(&self) -> u32 {
        match self {
            Currency::IDR => 0,
            Currency::MYR | Currency::PHP | Currency::SGD | Currency::USD => 2,
        }
    }

    pub fn symbol(&self) -> &'static str {
        match self {
            Currency::IDR => "Rp",
            Currency::MYR => "RM",
            Currency::PHP => "₱",
            Currency::SGD => "S$",
            Currency::USD => "$",
        }
    }
}

impl fmt::Display for Currency {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}", self)
    }
}

impl std::str::FromStr for Currency {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_uppercase().as_str() {
            "IDR" => Ok(Currency::IDR),
            "MYR" => Ok(Currency::MYR),
            "PHP" => Ok(Currency::PHP),
            "SGD" => Ok(Currency::SGD),
            "USD" => Ok(Currency::USD),
            other => Err(DomainError::ValidationError(format!(
                "Unsupported currency: {}",
                other
            ))),
        }
    }
}

/// Type-safe money representation with embedded currency.
///
/// Amount is stored in the smallest settled unit of the currency
/// to avoid floating-point drift.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Money {
    amount: i64,
    currency: Currency,
}

impl Money {
    pub fn new(amount: i64, currency: Currency) -> Result<Self, DomainError> {
        if amount < 0 {
            return Err(DomainError::NegativeAmount);
        }
        Ok(Self { amount, currency })
    }

    pub fn zero(currency: Currency) -> Self {
        Self {
            amount: 0,
            currency,
        }
    }

    pub fn amount(&self) -> i64 {
        self.amount
    }

    pub fn currency(&self) -> Currency {
        self.currency
    }

    /// Checked addition - returns error if currencies don't match.
    pub fn checked_add(&self, other: Money) -> Result<Money, DomainError> {
        self.ensure_same_currency(other)?;
        Ok(Money {
            amount: self.amount.saturating_add(other.amount),
            currency: self.currency,
        })
    }

    /// Checked subtraction - errors on currency mismatch or a negative result.
    pub fn checked_sub(&self, other: Money) -> Result<Money, DomainError> {
        self.ensure_same_currency(other)?;
        if self.amount < other.amount {
            return Err(DomainError::InsufficientBalance {
                available: self.amount,
                requested: other.amount,
            });
        }
        Ok(Money {
            amount: self.amount - other.amount,
            currency: self.currency,
        })
    }

    /// Major-unit decimal string with two fraction digits, as SNAP APIs expect
    /// (`94000` rupiah becomes `"94000.00"`).
    pub fn to_decimal_string(&self) -> String {
        match self.currency.decimal_places() {
            0 => format!("{}.00", self.amount),
            _ => format!("{}.{:02}", self.amount / 100, (self.amount % 100).abs()),
        }
    }

    /// Parses a provider decimal amount (`"94000.00"`, `"94000"`) into minor units.
    pub fn parse_decimal(value: &str, currency: Currency) -> Result<Money, DomainError> {
        let invalid = || DomainError::ValidationError(format!("Invalid amount: {}", value));
        let value = value.trim();
        let (whole, fraction) = match value.split_once('.') {
            Some((w, f)) => (w, f),
            None => (value, ""),
        };
        if whole.is_empty() || !whole.bytes().all(|b| b.is_ascii_digit()) {
            return Err(invalid());
        }
        if !fraction.bytes().all(|b| b.is_ascii_digit()) {
            return Err(invalid());
        }
        let whole: i64 = whole.parse().map_err(|_| invalid())?;
        let amount = match currency.decimal_places() {
            0 => whole,
            _ => {
                let cents = match fraction.len() {
                    0 => 0,
                    1 => fraction.parse::<i64>().map_err(|_| invalid())? * 10,
                    _ => fraction[..2].parse::<i64>().map_err(|_| invalid())?,
                };
                whole.checked_mul(100).ok_or_else(invalid)? + cents
            }
        };
        Money::new(amount, currency)
    }

    fn ensure_same_currency(&self, other: Money) -> Result<(), DomainError> {
        if self.currency != other.currency {
            return Err(DomainError::CurrencyMismatch {
                expected: self.currency,
                got: other.currency,
            });
        }
        Ok(())
    }
}

impl fmt::Display for Money {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.currency.decimal_places() {
            0 => write!(f, "{}{}", self.currency.symbol(), self.amount),
            _ => write!(
                f,
                "{}{}.{:02}",
                self.currency.symbol(),
                self.amount / 100,
                (self.amount % 100).abs()
            ),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_negative_money_fails() {
        let result = Money::new(-100, Currency::IDR);
        assert!(matches!(result, Err(DomainError::NegativeAmount)));
    }

    #[test]
    fn test_currency_mismatch() {
        let idr = Money::new(100, Currency::IDR).unwrap();
        let usd = Money::new(50, Currency::USD).unwrap();
        let result = idr.checked_add(usd);
        assert!(matches!(result, Err(DomainError::CurrencyMismatch { .. })));
    }

    #[test]
    fn test_checked_sub_reports_shortfall() {
        let balance = Money::new(90_000, Currency::IDR).unwrap();
        let total = Money::new(94_000, Currency::IDR).unwrap();
        assert!(matches!(
            balance.checked_sub(total),
            Err(DomainError::InsufficientBalance {
                available: 90_000,
                requested: 94_000
            })
        ));
    }

    #[test]
    fn test_decimal_string_for_rupiah() {
        let money = Money::new(94_000, Currency::IDR).unwrap();
        assert_eq!(money.to_decimal_string(), "94000.00");
        assert_eq!(format!("{}", money), "Rp94000");
    }

    #[test]
    fn test_decimal_string_for_cent_currencies() {
        let money = Money::new(1050, Currency::USD).unwrap();
        assert_eq!(money.to_decimal_string(), "10.50");
    }

    #[test]
    fn test_parse_decimal() {
        assert_eq!(
            Money::parse_decimal("94000.00", Currency::IDR).unwrap().amount(),
            94_000
        );
        assert_eq!(
            Money::parse_decimal("10.5", Currency::USD).unwrap().amount(),
            1050
        );
        assert!(Money::parse_decimal("-1", Currency::IDR).is_err());
        assert!(Money::parse_decimal("abc", Currency::IDR).is_err());
    }
}
