use super::money::{Amount, round_currency};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};

/// Platform cut taken when a client releases escrow to a technician.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CommissionPolicy {
    /// Percentage in the `0..=100` range, e.g. `5.00`.
    pub percentage: Decimal,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CommissionSplit {
    pub percentage: Decimal,
    pub commission: Decimal,
    pub to_technician: Decimal,
}

impl Default for CommissionPolicy {
    fn default() -> Self {
        Self {
            percentage: dec!(5.00),
        }
    }
}

impl CommissionPolicy {
    pub fn new(percentage: Decimal) -> Self {
        Self {
            percentage: percentage.clamp(Decimal::ZERO, Decimal::ONE_HUNDRED),
        }
    }

    /// Splits a price into platform commission and technician payout.
    ///
    /// The commission is rounded to currency precision and the technician
    /// receives the exact remainder, so both parts always add up to `price`.
    pub fn split(&self, price: Amount) -> CommissionSplit {
        let commission = round_currency(price.value() * self.percentage / Decimal::ONE_HUNDRED);
        CommissionSplit {
            percentage: self.percentage,
            commission,
            to_technician: price.value() - commission,
        }
    }
}
