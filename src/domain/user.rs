use super::money::{Amount, Balance};
use crate::error::MarketplaceError;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;

pub type UserId = u64;

#[derive(Debug, Serialize, Deserialize, PartialEq, Eq, Clone, Copy, Hash)]
#[serde(rename_all = "lowercase")]
pub enum UserRole {
    Client,
    Technician,
    Admin,
}

impl fmt::Display for UserRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            UserRole::Client => "client",
            UserRole::Technician => "technician",
            UserRole::Admin => "admin",
        };
        f.write_str(name)
    }
}

/// The three balances every marketplace user carries.
///
/// Client money flows `available -> in_escrow` when an offer is accepted and
/// leaves escrow either back to `available` (refunds) or to the technician's
/// `pending` balance (releases). Every operation validates before mutating,
/// so a failed call leaves the wallet exactly as it was.
#[derive(Debug, Serialize, Deserialize, PartialEq, Clone, Default)]
pub struct Wallet {
    /// Funds the user can spend or withdraw.
    pub available: Balance,
    /// Client funds locked against accepted orders.
    pub in_escrow: Balance,
    /// Technician earnings released but not yet settled.
    pub pending: Balance,
}

impl Wallet {
    pub fn total(&self) -> Balance {
        self.available
            .saturating_add(self.in_escrow)
            .saturating_add(self.pending)
    }

    /// Credits the available balance.
    pub fn deposit(&mut self, amount: Amount) -> Result<(), MarketplaceError> {
        self.available = self.available.checked_add(amount.into())?;
        Ok(())
    }

    /// Debits the available balance if it covers the amount.
    pub fn withdraw(&mut self, amount: Amount) -> Result<(), MarketplaceError> {
        let amount = Balance::from(amount);
        if self.available >= amount {
            self.available -= amount;
            Ok(())
        } else {
            Err(MarketplaceError::InsufficientFunds(
                "Insufficient available balance for withdrawal.".to_string(),
            ))
        }
    }

    /// Moves funds from available into escrow.
    pub fn hold(&mut self, amount: Amount) -> Result<(), MarketplaceError> {
        let amount = Balance::from(amount);
        if self.available >= amount {
            let in_escrow = self.in_escrow.checked_add(amount)?;
            self.available -= amount;
            self.in_escrow = in_escrow;
            Ok(())
        } else {
            Err(MarketplaceError::InsufficientFunds(format!(
                "Insufficient available balance to hold {} in escrow (available: {}).",
                amount, self.available
            )))
        }
    }

    /// Returns escrowed funds to the available balance.
    pub fn refund(&mut self, amount: Amount) -> Result<(), MarketplaceError> {
        self.ensure_escrow(amount)?;
        let available = self.available.checked_add(amount.into())?;
        self.in_escrow -= amount.into();
        self.available = available;
        Ok(())
    }

    /// Removes funds from escrow; the caller credits them elsewhere.
    pub fn debit_escrow(&mut self, amount: Amount) -> Result<(), MarketplaceError> {
        self.ensure_escrow(amount)?;
        self.in_escrow -= amount.into();
        Ok(())
    }

    pub fn credit_pending(&mut self, amount: Amount) -> Result<(), MarketplaceError> {
        self.pending = self.pending.checked_add(amount.into())?;
        Ok(())
    }

    /// Moves the whole pending balance to available and returns what moved.
    pub fn settle_pending(&mut self) -> Result<Amount, MarketplaceError> {
        if self.pending.is_zero() {
            return Err(MarketplaceError::ValidationError(
                "No pending balance to settle.".to_string(),
            ));
        }
        let moved = Amount::new(self.pending.value())?;
        self.available = self.available.checked_add(moved.into())?;
        self.pending = Balance::ZERO;
        Ok(moved)
    }

    fn ensure_escrow(&self, amount: Amount) -> Result<(), MarketplaceError> {
        if self.in_escrow >= Balance::from(amount) {
            Ok(())
        } else {
            Err(MarketplaceError::InsufficientFunds(format!(
                "Insufficient escrow funds ({}) to move {}.",
                self.in_escrow, amount
            )))
        }
    }
}

#[derive(Debug, Serialize, Deserialize, PartialEq, Clone)]
pub struct User {
    pub id: UserId,
    pub role: UserRole,
    pub first_name: String,
    pub last_name: String,
    pub email: String,
    #[serde(default)]
    pub wallet: Wallet,
    /// Mean review rating, two decimal places. `None` until the first review.
    #[serde(default)]
    pub overall_rating: Option<Decimal>,
    #[serde(default)]
    pub num_jobs_completed: u32,
    /// Technicians must be verified before they see or receive work.
    #[serde(default)]
    pub verified: bool,
}

impl User {
    pub fn full_name(&self) -> String {
        format!("{} {}", self.first_name, self.last_name)
    }

    pub fn is_admin(&self) -> bool {
        self.role == UserRole::Admin
    }

    pub fn is_verified_technician(&self) -> bool {
        self.role == UserRole::Technician && self.verified
    }
}
