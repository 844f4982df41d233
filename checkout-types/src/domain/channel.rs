//! Payment channels and their fee models.

use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use crate::error::DomainError;

/// Channel code of the internal wallet balance. Settled without a gateway.
pub const BALANCE_CHANNEL: &str = "BALANCE";

/// Broad family a channel belongs to; drives instruction text and UI grouping.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ChannelKind {
    Qris,
    VirtualAccount,
    EWallet,
    Retail,
    Balance,
}

/// Fee charged on top of the discounted price.
///
/// `percent_bps` is in basis points (0.7% = 70). A zero `min_fee`/`max_fee`
/// means the bound is not applied.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct FeeModel {
    pub fixed: i64,
    pub percent_bps: i64,
    pub min_fee: i64,
    pub max_fee: i64,
}

impl FeeModel {
    pub fn fixed(amount: i64) -> Self {
        Self {
            fixed: amount,
            ..Self::default()
        }
    }

    pub fn percent(bps: i64) -> Self {
        Self {
            percent_bps: bps,
            ..Self::default()
        }
    }

    /// `fixed + subtotal * pct`, clamped into `[min_fee, max_fee]`.
    pub fn fee_for(&self, subtotal: i64) -> i64 {
        let mut fee = self.fixed + subtotal.saturating_mul(self.percent_bps) / 10_000;
        if self.min_fee > 0 && fee < self.min_fee {
            fee = self.min_fee;
        }
        if self.max_fee > 0 && fee > self.max_fee {
            fee = self.max_fee;
        }
        fee.max(0)
    }
}

/// A user-facing payment method.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct PaymentChannel {
    pub code: String,
    pub name: String,
    pub kind: ChannelKind,
    pub fee: FeeModel,
    pub min_amount: i64,
    pub max_amount: i64,
    pub active: bool,
}

impl PaymentChannel {
    pub fn new(code: &str, name: &str, kind: ChannelKind, fee: FeeModel) -> Self {
        Self {
            code: code.to_string(),
            name: name.to_string(),
            kind,
            fee,
            min_amount: 10_000,
            max_amount: 10_000_000,
            active: true,
        }
    }

    pub fn with_limits(mut self, min_amount: i64, max_amount: i64) -> Self {
        self.min_amount = min_amount;
        self.max_amount = max_amount;
        self
    }

    pub fn is_balance(&self) -> bool {
        self.kind == ChannelKind::Balance
    }

    /// Rejects inactive channels and amounts outside the channel's range.
    pub fn ensure_accepts(&self, amount: i64) -> Result<(), DomainError> {
        if !self.active {
            return Err(DomainError::ValidationError(format!(
                "Payment channel {} is not active",
                self.code
            )));
        }
        if amount < self.min_amount || (self.max_amount > 0 && amount > self.max_amount) {
            return Err(DomainError::ValidationError(format!(
                "Amount {} outside {} limits [{}, {}]",
                amount, self.code, self.min_amount, self.max_amount
            )));
        }
        Ok(())
    }

    /// Channel catalog seeded on first start.
    pub fn defaults() -> Vec<PaymentChannel> {
        use ChannelKind::*;
        vec![
            PaymentChannel::new("QRIS", "QRIS", Qris, FeeModel::percent(70))
                .with_limits(10_000, 5_000_000),
            PaymentChannel::new("VA_BCA", "BCA Virtual Account", VirtualAccount, FeeModel::fixed(4_000)),
            PaymentChannel::new("VA_BRI", "BRI Virtual Account", VirtualAccount, FeeModel::fixed(4_000)),
            PaymentChannel::new("VA_PERMATA", "Permata Virtual Account", VirtualAccount, FeeModel::fixed(4_000)),
            PaymentChannel::new("VA_MANDIRI", "Mandiri Virtual Account", VirtualAccount, FeeModel::fixed(4_000)),
            PaymentChannel::new("VA_BNI", "BNI Virtual Account", VirtualAccount, FeeModel::fixed(4_000)),
            PaymentChannel::new("VA_BSI", "BSI Virtual Account", VirtualAccount, FeeModel::fixed(4_000)),
            PaymentChannel::new("VA_CIMB", "CIMB Niaga Virtual Account", VirtualAccount, FeeModel::fixed(4_000)),
            PaymentChannel::new("GOPAY", "GoPay", EWallet, FeeModel::percent(200)),
            PaymentChannel::new("SHOPEEPAY", "ShopeePay", EWallet, FeeModel::percent(200)),
            PaymentChannel::new("DANA", "DANA", EWallet, FeeModel::percent(150)),
            PaymentChannel::new("ALFAMART", "Alfamart", Retail, FeeModel::fixed(5_000)),
            PaymentChannel::new("INDOMARET", "Indomaret", Retail, FeeModel::fixed(5_000)),
            PaymentChannel::new(BALANCE_CHANNEL, "Saldo", Balance, FeeModel::default())
                .with_limits(1, 10_000_000),
        ]
    }
}
