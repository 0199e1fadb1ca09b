use crate::error::MarketplaceError;
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::{Decimal, RoundingStrategy};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::ops::{Sub, SubAssign};

/// Number of decimal places every stored amount is rounded to.
pub const CURRENCY_SCALE: u32 = 2;

/// Largest amount a single operation may move: one trillion currency units.
pub const MAX_AMOUNT: Decimal = Decimal::from_parts(276_447_232, 23_283, 0, false, 2);

/// Rounds a decimal to currency precision, half away from zero.
pub fn round_currency(value: Decimal) -> Decimal {
    value.round_dp_with_strategy(CURRENCY_SCALE, RoundingStrategy::MidpointAwayFromZero)
}

/// A running wallet balance.
///
/// Wraps `rust_decimal::Decimal` so balances cannot be mixed up with raw
/// request values. Wallet operations guarantee it never drops below zero.
#[derive(Debug, Clone, Copy, PartialEq, PartialOrd, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Balance(pub Decimal);

/// A strictly positive monetary amount, rounded to currency precision.
#[derive(Debug, Clone, Copy, PartialEq, PartialOrd, Serialize, Deserialize)]
#[serde(try_from = "Decimal", into = "Decimal")]
pub struct Amount(Decimal);

impl Amount {
    pub fn new(value: Decimal) -> Result<Self, MarketplaceError> {
        let value = round_currency(value);
        if value <= Decimal::ZERO {
            return Err(MarketplaceError::ValidationError(
                "Amount must be positive".to_string(),
            ));
        }
        if value > MAX_AMOUNT {
            return Err(MarketplaceError::ValidationError(format!(
                "Amount must not exceed {MAX_AMOUNT}"
            )));
        }
        Ok(Self(value))
    }

    pub fn value(&self) -> Decimal {
        self.0
    }

    /// Amount expressed in minor units, as payment gateways expect it.
    pub fn cents(&self) -> Result<i64, MarketplaceError> {
        self.0
            .checked_mul(Decimal::ONE_HUNDRED)
            .and_then(|cents| cents.trunc().to_i64())
            .ok_or_else(|| {
                MarketplaceError::ValidationError(format!(
                    "Amount {} cannot be expressed in minor units",
                    self.0
                ))
            })
    }
}

impl TryFrom<Decimal> for Amount {
    type Error = MarketplaceError;

    fn try_from(value: Decimal) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<Amount> for Decimal {
    fn from(amount: Amount) -> Self {
        amount.0
    }
}

impl From<Amount> for Balance {
    fn from(amount: Amount) -> Self {
        Self(amount.0)
    }
}

impl fmt::Display for Amount {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl Balance {
    pub const ZERO: Self = Self(Decimal::ZERO);

    pub fn new(amount: Decimal) -> Self {
        Self(amount)
    }

    pub fn value(&self) -> Decimal {
        self.0
    }

    pub fn is_zero(&self) -> bool {
        self.0.is_zero()
    }

    /// Adds `rhs`, failing instead of overflowing.
    pub fn checked_add(self, rhs: Self) -> Result<Self, MarketplaceError> {
        self.0.checked_add(rhs.0).map(Self).ok_or_else(|| {
            MarketplaceError::ValidationError("Balance would overflow".to_string())
        })
    }

    pub fn saturating_add(self, rhs: Self) -> Self {
        Self(self.0.saturating_add(rhs.0))
    }
}

impl fmt::Display for Balance {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl Sub for Balance {
    type Output = Self;
    fn sub(self, rhs: Self) -> Self::Output {
        Self(self.0 - rhs.0)
    }
}

impl SubAssign for Balance {
    fn sub_assign(&mut self, rhs: Self) {
        self.0 -= rhs.0;
    }
}
