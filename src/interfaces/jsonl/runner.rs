use super::command_reader::{Command, CommandLine};
use crate::application::access::Actor;
use crate::application::marketplace::Marketplace;
use crate::application::payments::Checkout;
use crate::domain::user::UserId;
use crate::error::{MarketplaceError, Result};
use crate::infrastructure::clock::ManualClock;
use chrono::Utc;

/// Replays commands against a marketplace driven by a manual clock.
///
/// A command's `at` timestamp becomes "now" for that command; commands
/// without one run at the wall-clock time.
pub struct CommandRunner<'a> {
    market: &'a Marketplace,
    clock: ManualClock,
}

impl<'a> CommandRunner<'a> {
    /// `clock` must be the clock `market` was built with.
    pub fn new(market: &'a Marketplace, clock: ManualClock) -> Self {
        Self { market, clock }
    }

    async fn actor(&self, actor: Option<UserId>) -> Result<Actor> {
        let user_id = actor.ok_or_else(|| {
            MarketplaceError::ValidationError("This command requires an actor.".to_string())
        })?;
        self.market.actor(user_id).await
    }

    /// Runs one command and describes what it did.
    pub async fn execute(&self, line: CommandLine) -> Result<String> {
        let now = line.at.unwrap_or_else(Utc::now);
        self.clock.set(now);
        let market = self.market;

        let summary = match line.command {
            Command::RegisterUser(new_user) => {
                let user = market.register_user(new_user).await?;
                format!("registered {} user {}", user.role, user.id)
            }
            Command::CreateOrder(new_order) => {
                let actor = self.actor(line.actor).await?;
                let order = market.create_order(&actor, new_order).await?;
                format!("created order {}", order.id)
            }
            Command::SubmitOffer {
                order,
                price,
                description,
                technician,
            } => {
                let actor = self.actor(line.actor).await?;
                let offer = market
                    .submit_offer(&actor, order, technician, price, description)
                    .await?;
                format!("offer {} on order {order}", offer.id)
            }
            Command::MakeDirectOffer {
                technician,
                price,
                description,
                order,
            } => {
                let actor = self.actor(line.actor).await?;
                let (order, offer) = market
                    .make_direct_offer(&actor, technician, order, price, description)
                    .await?;
                format!("direct offer {} on order {}", offer.id, order.id)
            }
            Command::RespondToDirectOffer {
                offer,
                accept,
                reason,
            } => {
                let actor = self.actor(line.actor).await?;
                let offer = market
                    .respond_to_direct_offer(&actor, offer, accept, reason)
                    .await?;
                format!("direct offer {} answered", offer.id)
            }
            Command::AcceptOffer { order, offer } => {
                let actor = self.actor(line.actor).await?;
                let order = market.accept_offer(&actor, order, offer).await?;
                format!("order {} is {}", order.id, order.status)
            }
            Command::DeclineOffer { order, offer } => {
                let actor = self.actor(line.actor).await?;
                market.decline_offer(&actor, order, offer).await?;
                format!("offer {offer} declined")
            }
            Command::StartJob { order } => {
                let actor = self.actor(line.actor).await?;
                let order = market.start_job(&actor, order).await?;
                format!("order {} is {}", order.id, order.status)
            }
            Command::MarkJobDone { order } => {
                let actor = self.actor(line.actor).await?;
                let order = market.mark_job_done(&actor, order).await?;
                format!("order {} is {}", order.id, order.status)
            }
            Command::ReleaseFunds { order } => {
                let actor = self.actor(line.actor).await?;
                let order = market.release_funds(&actor, order).await?;
                format!("order {} is {}", order.id, order.status)
            }
            Command::CancelOrder { order } => {
                let actor = self.actor(line.actor).await?;
                let order = market.cancel_order(&actor, order).await?;
                format!("order {} is {}", order.id, order.status)
            }
            Command::InitiateDispute { order, argument } => {
                let actor = self.actor(line.actor).await?;
                let dispute = market.initiate_dispute(&actor, order, argument).await?;
                format!("dispute {} opened on order {order}", dispute.id)
            }
            Command::AddDisputeResponse { dispute, message } => {
                let actor = self.actor(line.actor).await?;
                let response = market.add_dispute_response(&actor, dispute, message).await?;
                format!("response {} on dispute {dispute}", response.id)
            }
            Command::ResolveDispute {
                dispute,
                decision,
                notes,
            } => {
                let actor = self.actor(line.actor).await?;
                market.resolve_dispute(&actor, dispute, decision, notes).await?;
                format!("dispute {dispute} resolved with {decision}")
            }
            Command::Deposit { amount } => {
                let actor = self.actor(line.actor).await?;
                market.deposit(&actor, amount).await?;
                format!("user {} deposited {amount}", actor.user_id)
            }
            Command::Withdraw { amount } => {
                let actor = self.actor(line.actor).await?;
                market.withdraw(&actor, amount).await?;
                format!("user {} withdrew {amount}", actor.user_id)
            }
            Command::SettlePending { user } => {
                let actor = self.actor(line.actor).await?;
                let user = user.unwrap_or(actor.user_id);
                let moved = market.settle_pending(&actor, user).await?;
                format!("user {user} settled {moved}")
            }
            Command::SubmitReview {
                order,
                rating,
                comment,
            } => {
                let actor = self.actor(line.actor).await?;
                market.submit_review(&actor, order, rating, comment).await?;
                format!("order {order} reviewed")
            }
            Command::MarkNotificationRead { notification } => {
                let actor = self.actor(line.actor).await?;
                market.mark_notification_read(&actor, notification).await?;
                format!("notification {notification} read")
            }
            Command::InitiateDeposit {
                amount,
                payment_method,
            } => {
                let actor = self.actor(line.actor).await?;
                let session = market
                    .initiate_deposit(&actor, amount, payment_method)
                    .await?;
                match session.checkout {
                    Checkout::Iframe(url) => format!("deposit checkout at {url}"),
                    Checkout::Redirect(url) => format!("deposit card verification at {url}"),
                    Checkout::Charged => format!(
                        "deposit {} charged to saved card, awaiting confirmation",
                        session.entry_id
                    ),
                }
            }
            Command::Webhook { params } => {
                let outcome = market.handle_webhook(&params).await?;
                format!("webhook {outcome:?}")
            }
            Command::AutoRelease => {
                let report = market.run_auto_release(now).await?;
                format!(
                    "auto-release processed {}, skipped {}",
                    report.processed,
                    report.skipped.len()
                )
            }
        };
        Ok(summary)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::application::stores::Stores;
    use crate::config::MarketplaceConfig;
    use crate::domain::order::OrderStatus;
    use crate::interfaces::jsonl::command_reader::CommandReader;

    const SCRIPT: &str = r#"
{"op": "register_user", "role": "admin", "first_name": "Ada", "last_name": "Admin", "email": "admin@example.com"}
{"op": "register_user", "role": "client", "first_name": "Carl", "last_name": "Client", "email": "carl@example.com"}
{"op": "register_user", "role": "technician", "first_name": "Tia", "last_name": "Tech", "email": "tia@example.com", "verified": true}
{"op": "deposit", "actor": 2, "amount": "500"}
{"op": "create_order", "actor": 2, "at": "2025-01-01T09:00:00Z", "service_id": 1, "problem_description": "Door lock", "requested_location": "Maadi", "scheduled_date": "2025-01-02"}
{"op": "submit_offer", "actor": 3, "order": 1, "price": "120"}
{"op": "accept_offer", "actor": 2, "at": "2025-01-01T10:00:00Z", "order": 1, "offer": 1}
{"op": "mark_job_done", "actor": 3, "at": "2025-01-02T10:00:00Z", "order": 1}
{"op": "auto_release", "at": "2025-01-05T10:00:00Z"}
"#;

    #[tokio::test]
    async fn test_replays_script_with_timestamps() {
        let clock = ManualClock::new(Utc::now());
        let market = Marketplace::new(
            Stores::in_memory(),
            Box::new(clock.clone()),
            MarketplaceConfig::default(),
        );
        let runner = CommandRunner::new(&market, clock);

        for line in CommandReader::new(SCRIPT.as_bytes()).commands() {
            runner.execute(line.unwrap()).await.unwrap();
        }

        let admin = market.actor(1).await.unwrap();
        let order = market.order(&admin, 1).await.unwrap();
        assert_eq!(order.status, OrderStatus::Completed);
        let tech = market.user(&admin, 3).await.unwrap();
        assert_eq!(tech.wallet.pending.value(), rust_decimal_macros::dec!(120));
    }

    #[tokio::test]
    async fn test_missing_actor_is_rejected() {
        let clock = ManualClock::new(Utc::now());
        let market = Marketplace::new(
            Stores::in_memory(),
            Box::new(clock.clone()),
            MarketplaceConfig::default(),
        );
        let runner = CommandRunner::new(&market, clock);
        let line: CommandLine =
            serde_json::from_str(r#"{"op": "deposit", "amount": "10"}"#).unwrap();

        let err = runner.execute(line).await.unwrap_err();
        assert!(matches!(err, MarketplaceError::ValidationError(_)));
    }
}
