use super::money::Amount;
use super::user::UserId;
use crate::error::MarketplaceError;
use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Deserializer, Serialize};
use std::fmt;
use std::str::FromStr;

pub type OrderId = u64;
pub type OfferId = u64;

/// Lifecycle of an order.
///
/// ```text
/// OPEN ─► ACCEPTED ─► IN_PROGRESS ─► AWAITING_RELEASE ─► COMPLETED
///   │        │             │                │
///   │        └─────────────┴──── DISPUTED ◄─┘ ─► COMPLETED | REFUNDED
///   └─► CANCELLED            (cancel with escrow) ─► REFUNDED
/// ```
///
/// Direct hires start at `AWAITING_TECHNICIAN_RESPONSE` and pass through
/// `AWAITING_CLIENT_ESCROW_CONFIRMATION` before escrow is funded.
#[derive(Debug, Serialize, PartialEq, Eq, Clone, Copy, Hash)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OrderStatus {
    Open,
    AwaitingTechnicianResponse,
    AwaitingClientEscrowConfirmation,
    Accepted,
    InProgress,
    AwaitingRelease,
    Completed,
    Disputed,
    Cancelled,
    Refunded,
}

impl OrderStatus {
    pub const ALL: [OrderStatus; 10] = [
        OrderStatus::Open,
        OrderStatus::AwaitingTechnicianResponse,
        OrderStatus::AwaitingClientEscrowConfirmation,
        OrderStatus::Accepted,
        OrderStatus::InProgress,
        OrderStatus::AwaitingRelease,
        OrderStatus::Completed,
        OrderStatus::Disputed,
        OrderStatus::Cancelled,
        OrderStatus::Refunded,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            OrderStatus::Open => "OPEN",
            OrderStatus::AwaitingTechnicianResponse => "AWAITING_TECHNICIAN_RESPONSE",
            OrderStatus::AwaitingClientEscrowConfirmation => "AWAITING_CLIENT_ESCROW_CONFIRMATION",
            OrderStatus::Accepted => "ACCEPTED",
            OrderStatus::InProgress => "IN_PROGRESS",
            OrderStatus::AwaitingRelease => "AWAITING_RELEASE",
            OrderStatus::Completed => "COMPLETED",
            OrderStatus::Disputed => "DISPUTED",
            OrderStatus::Cancelled => "CANCELLED",
            OrderStatus::Refunded => "REFUNDED",
        }
    }

    /// Whether the client's money for this order sits in escrow.
    pub fn holds_escrow(&self) -> bool {
        matches!(
            self,
            OrderStatus::Accepted
                | OrderStatus::InProgress
                | OrderStatus::AwaitingRelease
                | OrderStatus::Disputed
        )
    }

    /// Orders still waiting for a technician and a price.
    pub fn accepts_offers(&self) -> bool {
        matches!(
            self,
            OrderStatus::Open
                | OrderStatus::AwaitingTechnicianResponse
                | OrderStatus::AwaitingClientEscrowConfirmation
        )
    }

    pub fn is_cancellable(&self) -> bool {
        self.accepts_offers() || matches!(self, OrderStatus::Accepted | OrderStatus::InProgress)
    }

    /// Statuses a participant may open a dispute from.
    pub fn is_disputable(&self) -> bool {
        matches!(
            self,
            OrderStatus::Accepted | OrderStatus::InProgress | OrderStatus::AwaitingRelease
        )
    }
}

impl fmt::Display for OrderStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for OrderStatus {
    type Err = MarketplaceError;

    /// Status names are matched case-insensitively, so `awaiting_release`
    /// and `AWAITING_RELEASE` are the same status.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let wanted = s.trim().to_ascii_uppercase();
        OrderStatus::ALL
            .into_iter()
            .find(|status| status.as_str() == wanted)
            .ok_or_else(|| MarketplaceError::ValidationError(format!("Unknown order status: {s}")))
    }
}

impl<'de> Deserialize<'de> for OrderStatus {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let raw = String::deserialize(deserializer)?;
        raw.parse().map_err(serde::de::Error::custom)
    }
}

#[derive(Debug, Serialize, Deserialize, PartialEq, Clone)]
pub struct Order {
    pub id: OrderId,
    pub client: UserId,
    pub technician: Option<UserId>,
    pub service_id: u64,
    pub order_type: String,
    pub problem_description: String,
    pub requested_location: String,
    pub scheduled_date: NaiveDate,
    pub status: OrderStatus,
    /// Agreed price; this is the amount held in escrow once accepted.
    pub final_price: Option<Amount>,
    pub commission_percentage: Option<Decimal>,
    pub platform_commission_amount: Option<Decimal>,
    pub amount_to_technician: Option<Decimal>,
    pub created_at: DateTime<Utc>,
    pub job_start_timestamp: Option<DateTime<Utc>>,
    /// Set when the technician marks the job done.
    pub job_done_timestamp: Option<DateTime<Utc>>,
    /// Set when funds leave escrow for good (release, auto-release, dispute payout).
    pub job_completion_timestamp: Option<DateTime<Utc>>,
    pub auto_release_date: Option<DateTime<Utc>>,
}

impl Order {
    pub fn transition(&mut self, to: OrderStatus) {
        tracing::debug!(order_id = self.id, from = %self.status, to = %to, "order transition");
        self.status = to;
    }

    /// Fails unless the order is currently in one of `allowed`.
    pub fn ensure_status(&self, allowed: &[OrderStatus], action: &str) -> Result<(), MarketplaceError> {
        if allowed.contains(&self.status) {
            Ok(())
        } else {
            Err(MarketplaceError::InvalidTransition(format!(
                "Cannot {action} order {} in status {}.",
                self.id, self.status
            )))
        }
    }

    /// Escrowed amount, if the order holds any.
    pub fn escrowed_amount(&self) -> Option<Amount> {
        if self.status.holds_escrow() {
            self.final_price
        } else {
            None
        }
    }
}

#[derive(Debug, Serialize, Deserialize, PartialEq, Eq, Clone, Copy)]
#[serde(rename_all = "lowercase")]
pub enum OfferStatus {
    Pending,
    Accepted,
    Rejected,
}

#[derive(Debug, Serialize, Deserialize, PartialEq, Eq, Clone, Copy)]
#[serde(rename_all = "lowercase")]
pub enum OfferInitiator {
    Client,
    Technician,
}

/// A proposed price for an order. At most one offer per order is ever accepted.
#[derive(Debug, Serialize, Deserialize, PartialEq, Clone)]
pub struct ProjectOffer {
    pub id: OfferId,
    pub order_id: OrderId,
    pub technician: UserId,
    pub offered_price: Amount,
    pub description: Option<String>,
    pub status: OfferStatus,
    pub initiator: OfferInitiator,
    pub offered_at: DateTime<Utc>,
}

impl ProjectOffer {
    pub fn is_pending(&self) -> bool {
        self.status == OfferStatus::Pending
    }
}
