use super::money::Amount;
use super::order::OrderId;
use super::user::UserId;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

pub type DisputeId = u64;

#[derive(Debug, Serialize, Deserialize, PartialEq, Eq, Clone, Copy)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DisputeStatus {
    Open,
    InReview,
    Resolved,
}

/// How an admin reallocates the escrow of a disputed order.
#[derive(Debug, Serialize, Deserialize, PartialEq, Clone, Copy)]
#[serde(tag = "resolution", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Resolution {
    PayTechnician,
    RefundClient,
    SplitPayment {
        client_refund: Option<Amount>,
        technician_payout: Option<Amount>,
    },
}

impl Resolution {
    pub fn name(&self) -> &'static str {
        match self {
            Resolution::PayTechnician => "PAY_TECHNICIAN",
            Resolution::RefundClient => "REFUND_CLIENT",
            Resolution::SplitPayment { .. } => "SPLIT_PAYMENT",
        }
    }
}

impl fmt::Display for Resolution {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

#[derive(Debug, Serialize, Deserialize, PartialEq, Clone)]
pub struct Dispute {
    pub id: DisputeId,
    pub order_id: OrderId,
    pub initiator: UserId,
    pub client_argument: Option<String>,
    pub technician_argument: Option<String>,
    pub admin_notes: Option<String>,
    pub status: DisputeStatus,
    pub resolution: Option<Resolution>,
    pub created_at: DateTime<Utc>,
    pub resolved_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Serialize, Deserialize, PartialEq, Eq, Clone, Copy)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ResponseKind {
    Client,
    Technician,
    Admin,
}

#[derive(Debug, Serialize, Deserialize, PartialEq, Clone)]
pub struct DisputeResponse {
    pub id: u64,
    pub dispute_id: DisputeId,
    pub sender: UserId,
    pub kind: ResponseKind,
    pub message: String,
    pub created_at: DateTime<Utc>,
}
