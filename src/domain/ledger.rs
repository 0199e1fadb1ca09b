use super::dispute::DisputeId;
use super::money::Amount;
use super::order::OrderId;
use super::user::UserId;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

pub type EntryId = u64;

#[derive(Debug, Serialize, Deserialize, PartialEq, Eq, Clone, Copy, Hash)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TransactionType {
    Deposit,
    Withdrawal,
    EscrowHold,
    EscrowRelease,
    CancelRefund,
    DisputePayout,
    DisputeRefund,
    Fee,
    PendingToAvailableTransfer,
    PlatformFee,
    Payout,
}

impl TransactionType {
    pub fn as_str(&self) -> &'static str {
        match self {
            TransactionType::Deposit => "DEPOSIT",
            TransactionType::Withdrawal => "WITHDRAWAL",
            TransactionType::EscrowHold => "ESCROW_HOLD",
            TransactionType::EscrowRelease => "ESCROW_RELEASE",
            TransactionType::CancelRefund => "CANCEL_REFUND",
            TransactionType::DisputePayout => "DISPUTE_PAYOUT",
            TransactionType::DisputeRefund => "DISPUTE_REFUND",
            TransactionType::Fee => "FEE",
            TransactionType::PendingToAvailableTransfer => "PENDING_TO_AVAILABLE_TRANSFER",
            TransactionType::PlatformFee => "PLATFORM_FEE",
            TransactionType::Payout => "PAYOUT",
        }
    }
}

impl fmt::Display for TransactionType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Serialize, Deserialize, PartialEq, Eq, Clone, Copy)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TransactionStatus {
    Pending,
    Completed,
    Failed,
}

impl fmt::Display for TransactionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            TransactionStatus::Pending => "PENDING",
            TransactionStatus::Completed => "COMPLETED",
            TransactionStatus::Failed => "FAILED",
        };
        f.write_str(name)
    }
}

/// One row of the money ledger. Every balance movement writes at least one.
///
/// `destination` is `None` for money leaving the marketplace (withdrawals,
/// platform fees).
#[derive(Debug, Serialize, Deserialize, PartialEq, Clone)]
pub struct LedgerEntry {
    pub id: EntryId,
    pub source: Option<UserId>,
    pub destination: Option<UserId>,
    pub order_id: Option<OrderId>,
    pub dispute_id: Option<DisputeId>,
    pub kind: TransactionType,
    pub amount: Amount,
    pub currency: String,
    pub status: TransactionStatus,
    pub payment_method: Option<String>,
    /// Gateway-side reference (Paymob order id) for deposits.
    pub external_id: Option<String>,
    pub timestamp: DateTime<Utc>,
}

impl LedgerEntry {
    /// Whether `user` is on either side of this entry.
    pub fn involves(&self, user: UserId) -> bool {
        self.source == Some(user) || self.destination == Some(user)
    }
}
