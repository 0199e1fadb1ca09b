use super::order::{OfferId, OrderId};
use super::user::UserId;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

pub type NotificationId = u64;

#[derive(Debug, Serialize, Deserialize, PartialEq, Eq, Clone, Copy, Hash)]
#[serde(rename_all = "snake_case")]
pub enum NotificationKind {
    NewProjectAvailable,
    NewOfferReceived,
    NewDirectOffer,
    OfferAccepted,
    OfferRejected,
    OfferDeclined,
    JobStarted,
    JobDone,
    FundsReleased,
    FundsAutoReleased,
    AutoReleaseFailed,
    DisputeInitiated,
    DisputeNew,
    DisputeResponse,
    DisputeResolved,
    OrderCancelled,
    SystemError,
    DepositCompleted,
    ReviewReceived,
}

impl NotificationKind {
    pub fn title(&self) -> &'static str {
        match self {
            NotificationKind::NewProjectAvailable => "New project available",
            NotificationKind::NewOfferReceived => "New offer received",
            NotificationKind::NewDirectOffer => "New direct offer received",
            NotificationKind::OfferAccepted => "Offer accepted",
            NotificationKind::OfferRejected => "Offer rejected",
            NotificationKind::OfferDeclined => "Offer declined",
            NotificationKind::JobStarted => "Job started",
            NotificationKind::JobDone => "Job marked as done",
            NotificationKind::FundsReleased => "Funds released",
            NotificationKind::FundsAutoReleased => "Funds released automatically",
            NotificationKind::AutoReleaseFailed => "Automatic release failed",
            NotificationKind::DisputeInitiated => "Dispute initiated",
            NotificationKind::DisputeNew => "New dispute",
            NotificationKind::DisputeResponse => "New dispute response",
            NotificationKind::DisputeResolved => "Dispute resolved",
            NotificationKind::OrderCancelled => "Order cancelled",
            NotificationKind::SystemError => "System error",
            NotificationKind::DepositCompleted => "Deposit completed",
            NotificationKind::ReviewReceived => "New review",
        }
    }
}

#[derive(Debug, Serialize, Deserialize, PartialEq, Clone)]
pub struct Notification {
    pub id: NotificationId,
    pub user: UserId,
    pub kind: NotificationKind,
    pub title: String,
    pub message: String,
    pub order_id: Option<OrderId>,
    pub offer_id: Option<OfferId>,
    pub is_read: bool,
    pub created_at: DateTime<Utc>,
}
