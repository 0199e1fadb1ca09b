use crate::application::marketplace::{NewOrder, NewUser};
use crate::domain::dispute::{DisputeId, Resolution};
use crate::domain::money::Amount;
use crate::domain::notification::NotificationId;
use crate::domain::order::{OfferId, OrderId};
use crate::domain::payment_method::PaymentMethodId;
use crate::domain::review::Rating;
use crate::domain::user::UserId;
use crate::error::{MarketplaceError, Result};
use chrono::{DateTime, Utc};
use serde::Deserialize;
use serde_json::{Map, Value};
use std::io::BufRead;

/// One marketplace action, tagged by `op`.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum Command {
    RegisterUser(NewUser),
    CreateOrder(NewOrder),
    SubmitOffer {
        order: OrderId,
        price: Amount,
        #[serde(default)]
        description: Option<String>,
        #[serde(default)]
        technician: Option<UserId>,
    },
    MakeDirectOffer {
        technician: UserId,
        price: Amount,
        #[serde(default)]
        description: Option<String>,
        order: NewOrder,
    },
    RespondToDirectOffer {
        offer: OfferId,
        accept: bool,
        #[serde(default)]
        reason: Option<String>,
    },
    AcceptOffer {
        order: OrderId,
        offer: OfferId,
    },
    DeclineOffer {
        order: OrderId,
        offer: OfferId,
    },
    StartJob {
        order: OrderId,
    },
    MarkJobDone {
        order: OrderId,
    },
    ReleaseFunds {
        order: OrderId,
    },
    CancelOrder {
        order: OrderId,
    },
    InitiateDispute {
        order: OrderId,
        argument: String,
    },
    AddDisputeResponse {
        dispute: DisputeId,
        message: String,
    },
    ResolveDispute {
        dispute: DisputeId,
        decision: Resolution,
        notes: String,
    },
    Deposit {
        amount: Amount,
    },
    Withdraw {
        amount: Amount,
    },
    SettlePending {
        #[serde(default)]
        user: Option<UserId>,
    },
    SubmitReview {
        order: OrderId,
        rating: Rating,
        #[serde(default)]
        comment: Option<String>,
    },
    MarkNotificationRead {
        notification: NotificationId,
    },
    InitiateDeposit {
        amount: Amount,
        /// Charge a saved card instead of opening the hosted checkout.
        #[serde(default)]
        payment_method: Option<PaymentMethodId>,
    },
    Webhook {
        params: Map<String, Value>,
    },
    AutoRelease,
}

/// A command with the caller and the instant it happens at.
#[derive(Debug, Clone, Deserialize)]
pub struct CommandLine {
    #[serde(default)]
    pub actor: Option<UserId>,
    /// Replays the command at this instant instead of the wall clock.
    #[serde(default)]
    pub at: Option<DateTime<Utc>>,
    #[serde(flatten)]
    pub command: Command,
}

/// Reads newline-delimited JSON commands.
///
/// Blank lines and lines starting with `#` are ignored. A malformed line
/// yields an error carrying its line number and the stream carries on.
pub struct CommandReader<R: BufRead> {
    source: R,
}

impl<R: BufRead> CommandReader<R> {
    pub fn new(source: R) -> Self {
        Self { source }
    }

    pub fn commands(self) -> impl Iterator<Item = Result<CommandLine>> {
        self.source
            .lines()
            .enumerate()
            .filter_map(|(index, line)| {
                let line = match line {
                    Ok(line) => line,
                    Err(err) => return Some(Err(MarketplaceError::from(err))),
                };
                let trimmed = line.trim();
                if trimmed.is_empty() || trimmed.starts_with('#') {
                    return None;
                }
                Some(serde_json::from_str(trimmed).map_err(|err| {
                    MarketplaceError::ValidationError(format!(
                        "Malformed command on line {}: {err}",
                        index + 1
                    ))
                }))
            })
    }
}
