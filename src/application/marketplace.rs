use super::access::{
    Actor, ensure_assigned_technician_or_admin, ensure_client_owner_or_admin,
    ensure_participant_or_admin, ensure_self_or_admin, is_participant,
};
use super::stores::Stores;
use super::unit_of_work::{EntryDraft, Sequence, UnitOfWork};
use crate::config::MarketplaceConfig;
use crate::domain::dispute::{Dispute, DisputeId, DisputeStatus};
use crate::domain::ledger::{LedgerEntry, TransactionType};
use crate::domain::money::Amount;
use crate::domain::notification::{Notification, NotificationId, NotificationKind};
use crate::domain::order::{
    OfferId, OfferInitiator, OfferStatus, Order, OrderId, OrderStatus, ProjectOffer,
};
use crate::domain::ports::{ChangeSet, Clock, PaymentGatewayBox};
use crate::domain::review::{Rating, Review, average_rating};
use crate::domain::user::{User, UserId, UserRole};
use crate::error::{MarketplaceError, Result};
use chrono::NaiveDate;
use serde::Deserialize;
use tokio::sync::Mutex;
use tracing::{info, warn};

/// Registration details for a new account.
#[derive(Debug, Clone, Deserialize)]
pub struct NewUser {
    pub role: UserRole,
    pub first_name: String,
    pub last_name: String,
    pub email: String,
    #[serde(default)]
    pub verified: bool,
}

/// What a client asks for when opening an order.
#[derive(Debug, Clone, Deserialize)]
pub struct NewOrder {
    /// Only admins set this, to open an order on a client's behalf.
    #[serde(default)]
    pub client: Option<UserId>,
    pub service_id: u64,
    #[serde(default = "default_order_type")]
    pub order_type: String,
    pub problem_description: String,
    pub requested_location: String,
    pub scheduled_date: NaiveDate,
}

fn default_order_type() -> String {
    "scheduled".to_string()
}

/// The escrow marketplace.
///
/// `Marketplace` owns the storage backends, the clock and the business
/// settings. Every mutating action takes the engine-wide write guard, stages
/// its changes in a [`UnitOfWork`] and commits them only once every check
/// passed, so a rejected action leaves the stores untouched.
pub struct Marketplace {
    pub(super) stores: Stores,
    clock: Box<dyn Clock>,
    pub(super) config: MarketplaceConfig,
    pub(super) gateway: Option<PaymentGatewayBox>,
    pub(super) guard: Mutex<()>,
}

impl Marketplace {
    pub fn new(stores: Stores, clock: Box<dyn Clock>, config: MarketplaceConfig) -> Self {
        Self {
            stores,
            clock,
            config,
            gateway: None,
            guard: Mutex::new(()),
        }
    }

    pub fn with_gateway(mut self, gateway: PaymentGatewayBox) -> Self {
        self.gateway = Some(gateway);
        self
    }

    pub fn config(&self) -> &MarketplaceConfig {
        &self.config
    }

    pub(super) fn begin(&self) -> UnitOfWork<'_> {
        UnitOfWork::new(&self.stores, self.clock.now(), &self.config.currency)
    }

    /// Resolves a stored user into the caller identity used by actions.
    pub async fn actor(&self, user_id: UserId) -> Result<Actor> {
        let user = self
            .stores
            .users
            .get(user_id)
            .await?
            .ok_or_else(|| MarketplaceError::not_found("User", user_id))?;
        Ok(Actor::from(&user))
    }

    pub async fn register_user(&self, new_user: NewUser) -> Result<User> {
        let _guard = self.guard.lock().await;
        let mut unit = self.begin();

        if new_user.first_name.trim().is_empty() || new_user.last_name.trim().is_empty() {
            return Err(MarketplaceError::ValidationError(
                "First and last name are required.".to_string(),
            ));
        }
        let email = new_user.email.trim().to_ascii_lowercase();
        if !email.contains('@') {
            return Err(MarketplaceError::ValidationError(format!(
                "Invalid email address: {email}"
            )));
        }
        if !unit.users_where(|u| u.email == email).await?.is_empty() {
            return Err(MarketplaceError::ValidationError(
                "A user with this email already exists.".to_string(),
            ));
        }

        let user = User {
            id: unit.allocate(Sequence::User).await?,
            role: new_user.role,
            first_name: new_user.first_name.trim().to_string(),
            last_name: new_user.last_name.trim().to_string(),
            email,
            wallet: Default::default(),
            overall_rating: None,
            num_jobs_completed: 0,
            verified: new_user.verified,
        };
        unit.save_user(user.clone());
        unit.commit().await?;

        info!(user_id = user.id, role = %user.role, "user registered");
        Ok(user)
    }

    /// Picks the client an order is opened for.
    async fn order_owner(
        &self,
        unit: &mut UnitOfWork<'_>,
        actor: &Actor,
        requested: Option<UserId>,
    ) -> Result<User> {
        let client_id = match actor.role {
            UserRole::Client => match requested {
                Some(other) if other != actor.user_id => {
                    return Err(MarketplaceError::PermissionDenied(
                        "Clients can only create orders for themselves.".to_string(),
                    ));
                }
                _ => actor.user_id,
            },
            UserRole::Admin => requested.ok_or_else(|| {
                MarketplaceError::ValidationError(
                    "Admins must name the client the order is for.".to_string(),
                )
            })?,
            UserRole::Technician => {
                return Err(MarketplaceError::PermissionDenied(
                    "Only clients can create orders.".to_string(),
                ));
            }
        };
        let client = unit.user(client_id).await?;
        if client.role != UserRole::Client {
            return Err(MarketplaceError::ValidationError(format!(
                "User {client_id} is not a client."
            )));
        }
        Ok(client)
    }

    fn open_order(&self, id: OrderId, client: UserId, new_order: NewOrder, unit: &UnitOfWork<'_>) -> Result<Order> {
        if new_order.problem_description.trim().is_empty() {
            return Err(MarketplaceError::ValidationError(
                "Problem description is required.".to_string(),
            ));
        }
        Ok(Order {
            id,
            client,
            technician: None,
            service_id: new_order.service_id,
            order_type: new_order.order_type,
            problem_description: new_order.problem_description,
            requested_location: new_order.requested_location,
            scheduled_date: new_order.scheduled_date,
            status: OrderStatus::Open,
            final_price: None,
            commission_percentage: None,
            platform_commission_amount: None,
            amount_to_technician: None,
            created_at: unit.now(),
            job_start_timestamp: None,
            job_done_timestamp: None,
            job_completion_timestamp: None,
            auto_release_date: None,
        })
    }

    pub async fn create_order(&self, actor: &Actor, new_order: NewOrder) -> Result<Order> {
        let _guard = self.guard.lock().await;
        let mut unit = self.begin();

        let client = self.order_owner(&mut unit, actor, new_order.client).await?;
        let id = unit.allocate(Sequence::Order).await?;
        let order = self.open_order(id, client.id, new_order, &unit)?;
        unit.save_order(order.clone());

        let message = format!(
            "A new project is available: {} ({}).",
            order.problem_description, order.requested_location
        );
        for technician in unit.users_where(User::is_verified_technician).await? {
            unit.notify(
                technician.id,
                NotificationKind::NewProjectAvailable,
                message.clone(),
                Some(order.id),
                None,
            )
            .await?;
        }

        unit.commit().await?;
        info!(order_id = order.id, client = order.client, "order created");
        Ok(order)
    }

    /// A technician bids on an open order. Admins bid on a technician's behalf.
    pub async fn submit_offer(
        &self,
        actor: &Actor,
        order_id: OrderId,
        technician: Option<UserId>,
        price: Amount,
        description: Option<String>,
    ) -> Result<ProjectOffer> {
        let _guard = self.guard.lock().await;
        let mut unit = self.begin();

        let technician_id = match actor.role {
            UserRole::Technician => actor.user_id,
            UserRole::Admin => technician.ok_or_else(|| {
                MarketplaceError::ValidationError(
                    "Admins must name the technician the offer is for.".to_string(),
                )
            })?,
            UserRole::Client => {
                return Err(MarketplaceError::PermissionDenied(
                    "Only technicians can submit offers.".to_string(),
                ));
            }
        };
        let technician = unit.user(technician_id).await?;
        if !technician.is_verified_technician() {
            return Err(MarketplaceError::PermissionDenied(
                "Only verified technicians can submit offers.".to_string(),
            ));
        }

        let order = unit.order(order_id).await?;
        order.ensure_status(&[OrderStatus::Open], "submit an offer on")?;
        let duplicate = unit
            .offers_for(order_id)
            .await?
            .iter()
            .any(|offer| offer.technician == technician_id && offer.is_pending());
        if duplicate {
            return Err(MarketplaceError::ValidationError(
                "You already have a pending offer for this order.".to_string(),
            ));
        }

        let offer = ProjectOffer {
            id: unit.allocate(Sequence::Offer).await?,
            order_id,
            technician: technician_id,
            offered_price: price,
            description,
            status: OfferStatus::Pending,
            initiator: OfferInitiator::Technician,
            offered_at: unit.now(),
        };
        unit.save_offer(offer.clone());
        unit.notify(
            order.client,
            NotificationKind::NewOfferReceived,
            format!(
                "{} offered {} for order #{}.",
                technician.full_name(),
                price,
                order_id
            ),
            Some(order_id),
            Some(offer.id),
        )
        .await?;

        unit.commit().await?;
        info!(order_id, offer_id = offer.id, technician = technician_id, %price, "offer submitted");
        Ok(offer)
    }

    /// A client hires a specific technician: the order is opened already
    /// waiting for that technician's answer.
    pub async fn make_direct_offer(
        &self,
        actor: &Actor,
        technician_id: UserId,
        new_order: NewOrder,
        price: Amount,
        description: Option<String>,
    ) -> Result<(Order, ProjectOffer)> {
        let _guard = self.guard.lock().await;
        let mut unit = self.begin();

        let client = self.order_owner(&mut unit, actor, new_order.client).await?;
        let technician = unit.user(technician_id).await?;
        if !technician.is_verified_technician() {
            return Err(MarketplaceError::ValidationError(format!(
                "User {technician_id} is not a verified technician."
            )));
        }

        let id = unit.allocate(Sequence::Order).await?;
        let mut order = self.open_order(id, client.id, new_order, &unit)?;
        order.transition(OrderStatus::AwaitingTechnicianResponse);

        let offer = ProjectOffer {
            id: unit.allocate(Sequence::Offer).await?,
            order_id: order.id,
            technician: technician_id,
            offered_price: price,
            description,
            status: OfferStatus::Pending,
            initiator: OfferInitiator::Client,
            offered_at: unit.now(),
        };
        unit.save_order(order.clone());
        unit.save_offer(offer.clone());
        unit.notify(
            technician_id,
            NotificationKind::NewDirectOffer,
            format!(
                "{} wants to hire you for {} on order #{}.",
                client.full_name(),
                price,
                order.id
            ),
            Some(order.id),
            Some(offer.id),
        )
        .await?;

        unit.commit().await?;
        info!(order_id = order.id, offer_id = offer.id, technician = technician_id, "direct offer made");
        Ok((order, offer))
    }

    /// The targeted technician accepts or rejects a client's direct offer.
    pub async fn respond_to_direct_offer(
        &self,
        actor: &Actor,
        offer_id: OfferId,
        accept: bool,
        reason: Option<String>,
    ) -> Result<ProjectOffer> {
        let _guard = self.guard.lock().await;
        let mut unit = self.begin();

        let mut offer = unit.offer(offer_id).await?;
        // Other users must not learn that the offer exists.
        if offer.technician != actor.user_id
            || offer.initiator != OfferInitiator::Client
            || !offer.is_pending()
        {
            return Err(MarketplaceError::not_found("Offer", offer_id));
        }
        let mut order = unit.order(offer.order_id).await?;
        let technician = unit.user(actor.user_id).await?;

        let kind = if accept {
            order.ensure_status(&[OrderStatus::AwaitingTechnicianResponse], "accept a direct offer on")?;
            offer.status = OfferStatus::Accepted;
            order.technician = Some(actor.user_id);
            order.transition(OrderStatus::AwaitingClientEscrowConfirmation);
            unit.save_order(order.clone());
            NotificationKind::OfferAccepted
        } else {
            let reason = reason
                .filter(|r| !r.trim().is_empty())
                .unwrap_or_else(|| "No reason given".to_string());
            offer.status = OfferStatus::Rejected;
            offer.description = Some(match offer.description.take() {
                Some(text) => format!("{text} (Rejected: {reason})"),
                None => format!("(Rejected: {reason})"),
            });
            NotificationKind::OfferRejected
        };
        unit.save_offer(offer.clone());

        let message = if accept {
            format!(
                "{} accepted your offer for order #{}. Confirm to fund the escrow.",
                technician.full_name(),
                order.id
            )
        } else {
            format!(
                "{} declined your offer for order #{}.",
                technician.full_name(),
                order.id
            )
        };
        unit.notify(order.client, kind, message, Some(order.id), Some(offer.id))
            .await?;

        unit.commit().await?;
        info!(order_id = order.id, offer_id, accept, "direct offer answered");
        Ok(offer)
    }

    /// The client picks an offer and funds the escrow with its price.
    pub async fn accept_offer(
        &self,
        actor: &Actor,
        order_id: OrderId,
        offer_id: OfferId,
    ) -> Result<Order> {
        let _guard = self.guard.lock().await;
        let mut unit = self.begin();

        let mut order = unit.order(order_id).await?;
        ensure_client_owner_or_admin(actor, &order)?;
        let mut offer = unit.offer(offer_id).await?;
        if offer.order_id != order_id {
            return Err(MarketplaceError::ValidationError(format!(
                "Offer {offer_id} does not belong to order {order_id}."
            )));
        }

        if order.status == OrderStatus::Accepted
            && offer.status == OfferStatus::Accepted
            && order.technician == Some(offer.technician)
        {
            return Ok(order);
        }

        order.ensure_status(
            &[
                OrderStatus::Open,
                OrderStatus::AwaitingTechnicianResponse,
                OrderStatus::AwaitingClientEscrowConfirmation,
            ],
            "accept an offer on",
        )?;
        if offer.status == OfferStatus::Rejected {
            return Err(MarketplaceError::ValidationError(
                "This offer has already been rejected.".to_string(),
            ));
        }

        let price = offer.offered_price;
        let mut client = unit.user(order.client).await?;
        if let Err(err) = client.wallet.hold(price) {
            warn!(order_id, client = client.id, %price, "escrow hold rejected");
            return Err(err);
        }
        unit.save_user(client);

        let now = unit.now();
        order.technician = Some(offer.technician);
        order.final_price = Some(price);
        order.transition(OrderStatus::Accepted);
        order.job_start_timestamp = Some(now);
        order.auto_release_date = Some(now + self.config.auto_release_after);
        unit.save_order(order.clone());

        offer.status = OfferStatus::Accepted;
        unit.save_offer(offer.clone());

        for mut other in unit.offers_for(order_id).await? {
            if other.id == offer_id || !other.is_pending() {
                continue;
            }
            other.status = OfferStatus::Rejected;
            unit.notify(
                other.technician,
                NotificationKind::OfferRejected,
                format!("Your offer for order #{order_id} was not selected."),
                Some(order_id),
                Some(other.id),
            )
            .await?;
            unit.save_offer(other);
        }

        unit.record(
            EntryDraft::new(TransactionType::EscrowHold, price)
                .from(order.client)
                .to(offer.technician)
                .order(order_id),
        )
        .await?;

        unit.notify(
            offer.technician,
            NotificationKind::OfferAccepted,
            format!("Your offer of {price} for order #{order_id} was accepted."),
            Some(order_id),
            Some(offer_id),
        )
        .await?;
        unit.notify(
            order.client,
            NotificationKind::OfferAccepted,
            format!("{price} is now held in escrow for order #{order_id}."),
            Some(order_id),
            Some(offer_id),
        )
        .await?;

        unit.commit().await?;
        info!(order_id, offer_id, technician = offer.technician, %price, "offer accepted, escrow funded");
        Ok(order)
    }

    pub async fn decline_offer(
        &self,
        actor: &Actor,
        order_id: OrderId,
        offer_id: OfferId,
    ) -> Result<ProjectOffer> {
        let _guard = self.guard.lock().await;
        let mut unit = self.begin();

        let order = unit.order(order_id).await?;
        ensure_client_owner_or_admin(actor, &order)?;
        let mut offer = unit.offer(offer_id).await?;
        if offer.order_id != order_id {
            return Err(MarketplaceError::ValidationError(format!(
                "Offer {offer_id} does not belong to order {order_id}."
            )));
        }
        if !offer.is_pending() {
            return Err(MarketplaceError::ValidationError(
                "Only pending offers can be declined.".to_string(),
            ));
        }

        offer.status = OfferStatus::Rejected;
        unit.save_offer(offer.clone());
        unit.notify(
            offer.technician,
            NotificationKind::OfferDeclined,
            format!("Your offer for order #{order_id} was declined."),
            Some(order_id),
            Some(offer_id),
        )
        .await?;

        unit.commit().await?;
        info!(order_id, offer_id, "offer declined");
        Ok(offer)
    }

    pub async fn start_job(&self, actor: &Actor, order_id: OrderId) -> Result<Order> {
        let _guard = self.guard.lock().await;
        let mut unit = self.begin();

        let mut order = unit.order(order_id).await?;
        ensure_assigned_technician_or_admin(actor, &order)?;
        order.ensure_status(&[OrderStatus::Accepted], "start")?;

        order.transition(OrderStatus::InProgress);
        order.job_start_timestamp = Some(unit.now());
        unit.save_order(order.clone());
        unit.notify(
            order.client,
            NotificationKind::JobStarted,
            format!("Work on order #{order_id} has started."),
            Some(order_id),
            None,
        )
        .await?;

        unit.commit().await?;
        info!(order_id, "job started");
        Ok(order)
    }

    /// The technician reports the work finished. Auto-release counts from here.
    pub async fn mark_job_done(&self, actor: &Actor, order_id: OrderId) -> Result<Order> {
        let _guard = self.guard.lock().await;
        let mut unit = self.begin();

        let mut order = unit.order(order_id).await?;
        ensure_assigned_technician_or_admin(actor, &order)?;
        order.ensure_status(&[OrderStatus::Accepted, OrderStatus::InProgress], "mark done")?;

        let now = unit.now();
        order.transition(OrderStatus::AwaitingRelease);
        order.job_done_timestamp = Some(now);
        order.auto_release_date = Some(now + self.config.auto_release_after);
        unit.save_order(order.clone());
        unit.notify(
            order.client,
            NotificationKind::JobDone,
            format!(
                "Order #{order_id} is done. Release the funds or they will be released automatically."
            ),
            Some(order_id),
            None,
        )
        .await?;

        unit.commit().await?;
        info!(order_id, "job marked done");
        Ok(order)
    }

    /// The client pays the technician out of escrow, minus the platform commission.
    pub async fn release_funds(&self, actor: &Actor, order_id: OrderId) -> Result<Order> {
        let _guard = self.guard.lock().await;
        let mut unit = self.begin();

        let mut order = unit.order(order_id).await?;
        ensure_client_owner_or_admin(actor, &order)?;
        order.ensure_status(&[OrderStatus::AwaitingRelease], "release funds for")?;
        let technician_id = order.technician.ok_or_else(|| {
            MarketplaceError::ValidationError("Order has no assigned technician.".to_string())
        })?;
        let price = order.final_price.ok_or_else(|| {
            MarketplaceError::ValidationError("Order has no final price.".to_string())
        })?;

        let mut client = unit.user(order.client).await?;
        client.wallet.debit_escrow(price)?;
        unit.save_user(client);

        let split = self.config.commission.split(price);
        let mut technician = unit.user(technician_id).await?;
        if let Ok(payout) = Amount::new(split.to_technician) {
            technician.wallet.credit_pending(payout)?;
            unit.record(
                EntryDraft::new(TransactionType::Payout, payout)
                    .from(order.client)
                    .to(technician_id)
                    .order(order_id),
            )
            .await?;
        }
        if let Ok(fee) = Amount::new(split.commission) {
            unit.record(
                EntryDraft::new(TransactionType::PlatformFee, fee)
                    .from(order.client)
                    .order(order_id),
            )
            .await?;
        }
        technician.num_jobs_completed += 1;
        unit.save_user(technician);

        order.transition(OrderStatus::Completed);
        order.job_completion_timestamp = Some(unit.now());
        order.commission_percentage = Some(split.percentage);
        order.platform_commission_amount = Some(split.commission);
        order.amount_to_technician = Some(split.to_technician);
        unit.save_order(order.clone());

        unit.notify(
            technician_id,
            NotificationKind::FundsReleased,
            format!(
                "{} for order #{order_id} was added to your pending balance.",
                split.to_technician
            ),
            Some(order_id),
            None,
        )
        .await?;

        unit.commit().await?;
        info!(
            order_id,
            technician = technician_id,
            payout = %split.to_technician,
            commission = %split.commission,
            "funds released"
        );
        Ok(order)
    }

    /// Cancels an order. Escrowed money goes back to the client.
    pub async fn cancel_order(&self, actor: &Actor, order_id: OrderId) -> Result<Order> {
        let _guard = self.guard.lock().await;
        let mut unit = self.begin();

        let mut order = unit.order(order_id).await?;
        ensure_client_owner_or_admin(actor, &order)?;
        if !order.status.is_cancellable() {
            return Err(MarketplaceError::InvalidTransition(format!(
                "Cannot cancel order {order_id} in status {}.",
                order.status
            )));
        }

        match order.escrowed_amount() {
            Some(price) => {
                let mut client = unit.user(order.client).await?;
                client.wallet.refund(price)?;
                unit.save_user(client);
                unit.record(
                    EntryDraft::new(TransactionType::CancelRefund, price)
                        .from(order.client)
                        .to(order.client)
                        .order(order_id),
                )
                .await?;
                order.transition(OrderStatus::Refunded);
            }
            None => {
                for mut offer in unit.offers_for(order_id).await? {
                    if offer.is_pending() {
                        offer.status = OfferStatus::Rejected;
                        unit.save_offer(offer);
                    }
                }
                order.transition(OrderStatus::Cancelled);
            }
        }
        unit.save_order(order.clone());

        let message = match order.status {
            OrderStatus::Refunded => format!(
                "Order #{order_id} was cancelled and the escrowed funds were returned to the client."
            ),
            _ => format!("Order #{order_id} was cancelled."),
        };
        let mut recipients = vec![order.client];
        recipients.extend(order.technician);
        for user in recipients {
            unit.notify(
                user,
                NotificationKind::OrderCancelled,
                message.clone(),
                Some(order_id),
                None,
            )
            .await?;
        }

        unit.commit().await?;
        info!(order_id, status = %order.status, "order cancelled");
        Ok(order)
    }

    /// Freezes the escrow of an order until an admin resolves the dispute.
    pub async fn initiate_dispute(
        &self,
        actor: &Actor,
        order_id: OrderId,
        argument: String,
    ) -> Result<Dispute> {
        let _guard = self.guard.lock().await;
        let mut unit = self.begin();

        let mut order = unit.order(order_id).await?;
        if !is_participant(actor, &order) {
            return Err(MarketplaceError::PermissionDenied(
                "Only the client or the assigned technician can open a dispute.".to_string(),
            ));
        }
        if !order.status.is_disputable() {
            return Err(MarketplaceError::InvalidTransition(format!(
                "Cannot dispute order {order_id} in status {}.",
                order.status
            )));
        }
        if argument.trim().is_empty() {
            return Err(MarketplaceError::ValidationError(
                "Please explain the reason for the dispute.".to_string(),
            ));
        }

        let by_client = order.client == actor.user_id;
        let dispute = Dispute {
            id: unit.allocate(Sequence::Dispute).await?,
            order_id,
            initiator: actor.user_id,
            client_argument: by_client.then(|| argument.clone()),
            technician_argument: (!by_client).then(|| argument.clone()),
            admin_notes: None,
            status: DisputeStatus::Open,
            resolution: None,
            created_at: unit.now(),
            resolved_at: None,
        };
        unit.save_dispute(dispute.clone());

        order.transition(OrderStatus::Disputed);
        unit.save_order(order.clone());

        let other_party = if by_client {
            order.technician
        } else {
            Some(order.client)
        };
        if let Some(other) = other_party {
            unit.notify(
                other,
                NotificationKind::DisputeInitiated,
                format!("A dispute was opened on order #{order_id}."),
                Some(order_id),
                None,
            )
            .await?;
        }
        for admin in unit.admins().await? {
            unit.notify(
                admin.id,
                NotificationKind::DisputeNew,
                format!("Dispute #{} on order #{order_id} needs review.", dispute.id),
                Some(order_id),
                None,
            )
            .await?;
        }

        unit.commit().await?;
        info!(order_id, dispute_id = dispute.id, initiator = actor.user_id, "dispute opened");
        Ok(dispute)
    }

    pub async fn deposit(&self, actor: &Actor, amount: Amount) -> Result<User> {
        let _guard = self.guard.lock().await;
        let mut unit = self.begin();

        let mut user = unit.user(actor.user_id).await?;
        user.wallet.deposit(amount)?;
        unit.save_user(user.clone());
        unit.record(
            EntryDraft::new(TransactionType::Deposit, amount)
                .from(user.id)
                .to(user.id),
        )
        .await?;

        unit.commit().await?;
        info!(user_id = user.id, %amount, "deposit");
        Ok(user)
    }

    pub async fn withdraw(&self, actor: &Actor, amount: Amount) -> Result<User> {
        let _guard = self.guard.lock().await;
        let mut unit = self.begin();

        let mut user = unit.user(actor.user_id).await?;
        user.wallet.withdraw(amount)?;
        unit.save_user(user.clone());
        unit.record(EntryDraft::new(TransactionType::Withdrawal, amount).from(user.id))
            .await?;

        unit.commit().await?;
        info!(user_id = user.id, %amount, "withdrawal");
        Ok(user)
    }

    /// Moves a technician's whole pending balance to available.
    pub async fn settle_pending(&self, actor: &Actor, user_id: UserId) -> Result<Amount> {
        let _guard = self.guard.lock().await;
        let mut unit = self.begin();

        ensure_self_or_admin(actor, user_id)?;
        let mut user = unit.user(user_id).await?;
        let moved = user.wallet.settle_pending()?;
        unit.save_user(user);
        unit.record(
            EntryDraft::new(TransactionType::PendingToAvailableTransfer, moved)
                .from(user_id)
                .to(user_id),
        )
        .await?;

        unit.commit().await?;
        info!(user_id, %moved, "pending balance settled");
        Ok(moved)
    }

    pub async fn submit_review(
        &self,
        actor: &Actor,
        order_id: OrderId,
        rating: Rating,
        comment: Option<String>,
    ) -> Result<Review> {
        let _guard = self.guard.lock().await;
        let mut unit = self.begin();

        let order = unit.order(order_id).await?;
        if !(actor.is_client() && order.client == actor.user_id) {
            return Err(MarketplaceError::PermissionDenied(
                "Only the client who owns this order can review it.".to_string(),
            ));
        }
        order.ensure_status(&[OrderStatus::Completed], "review")?;
        let technician_id = order.technician.ok_or_else(|| {
            MarketplaceError::ValidationError("Order has no assigned technician.".to_string())
        })?;
        if self.stores.reviews.for_order(order_id).await?.is_some() {
            return Err(MarketplaceError::ValidationError(
                "This order has already been reviewed.".to_string(),
            ));
        }

        let review = Review {
            id: unit.allocate(Sequence::Review).await?,
            order_id,
            reviewer: actor.user_id,
            technician: technician_id,
            rating,
            comment,
            created_at: unit.now(),
        };
        let mut reviews = self.stores.reviews.for_technician(technician_id).await?;
        reviews.push(review.clone());

        let mut technician = unit.user(technician_id).await?;
        technician.overall_rating = average_rating(&reviews);
        unit.save_user(technician);
        unit.add_review(review.clone());
        unit.notify(
            technician_id,
            NotificationKind::ReviewReceived,
            format!(
                "You received a {}-star review for order #{order_id}.",
                rating.value()
            ),
            Some(order_id),
            None,
        )
        .await?;

        unit.commit().await?;
        info!(order_id, technician = technician_id, rating = rating.value(), "review submitted");
        Ok(review)
    }

    pub async fn user(&self, actor: &Actor, user_id: UserId) -> Result<User> {
        ensure_self_or_admin(actor, user_id)?;
        self.stores
            .users
            .get(user_id)
            .await?
            .ok_or_else(|| MarketplaceError::not_found("User", user_id))
    }

    /// Participants and admins see any order; verified technicians also see open ones.
    pub async fn order(&self, actor: &Actor, order_id: OrderId) -> Result<Order> {
        let order = self
            .stores
            .orders
            .get(order_id)
            .await?
            .ok_or_else(|| MarketplaceError::not_found("Order", order_id))?;
        if order.status == OrderStatus::Open && actor.is_technician() {
            return Ok(order);
        }
        ensure_participant_or_admin(actor, &order)?;
        Ok(order)
    }

    /// Offers on an order, newest first.
    pub async fn offers_for_order(
        &self,
        actor: &Actor,
        order_id: OrderId,
    ) -> Result<Vec<ProjectOffer>> {
        let order = self
            .stores
            .orders
            .get(order_id)
            .await?
            .ok_or_else(|| MarketplaceError::not_found("Order", order_id))?;
        ensure_client_owner_or_admin(actor, &order)?;
        let mut offers = self.stores.orders.offers_for_order(order_id).await?;
        offers.sort_by(|a, b| b.offered_at.cmp(&a.offered_at).then(b.id.cmp(&a.id)));
        Ok(offers)
    }

    /// Open orders a verified technician can bid on.
    pub async fn available_orders(&self, actor: &Actor) -> Result<Vec<Order>> {
        let user = self.user(actor, actor.user_id).await?;
        if !(user.is_verified_technician() || user.is_admin()) {
            return Err(MarketplaceError::PermissionDenied(
                "Only verified technicians can browse available orders.".to_string(),
            ));
        }
        Ok(self
            .stores
            .orders
            .get_all()
            .await?
            .into_iter()
            .filter(|order| order.status == OrderStatus::Open)
            .collect())
    }

    pub async fn dispute(&self, actor: &Actor, dispute_id: DisputeId) -> Result<Dispute> {
        let dispute = self
            .stores
            .disputes
            .get(dispute_id)
            .await?
            .ok_or_else(|| MarketplaceError::not_found("Dispute", dispute_id))?;
        let order = self
            .stores
            .orders
            .get(dispute.order_id)
            .await?
            .ok_or_else(|| MarketplaceError::not_found("Order", dispute.order_id))?;
        ensure_participant_or_admin(actor, &order)?;
        Ok(dispute)
    }

    pub async fn ledger_for(&self, actor: &Actor, user_id: UserId) -> Result<Vec<LedgerEntry>> {
        ensure_self_or_admin(actor, user_id)?;
        Ok(self
            .stores
            .ledger
            .get_all()
            .await?
            .into_iter()
            .filter(|entry| entry.involves(user_id))
            .collect())
    }

    /// The whole ledger in id order.
    pub async fn ledger(&self) -> Result<Vec<LedgerEntry>> {
        self.stores.ledger.get_all().await
    }

    /// The caller's notifications, newest first.
    pub async fn notifications_for(&self, actor: &Actor) -> Result<Vec<Notification>> {
        let mut notifications = self.stores.notifications.for_user(actor.user_id).await?;
        notifications.sort_by(|a, b| b.created_at.cmp(&a.created_at).then(b.id.cmp(&a.id)));
        Ok(notifications)
    }

    pub async fn mark_notification_read(
        &self,
        actor: &Actor,
        notification_id: NotificationId,
    ) -> Result<Notification> {
        let _guard = self.guard.lock().await;
        let mut notification = self
            .stores
            .notifications
            .get(notification_id)
            .await?
            .filter(|n| n.user == actor.user_id)
            .ok_or_else(|| MarketplaceError::not_found("Notification", notification_id))?;
        notification.is_read = true;
        self.stores
            .changes
            .apply(ChangeSet {
                notifications: vec![notification.clone()],
                ..ChangeSet::default()
            })
            .await?;
        Ok(notification)
    }

    /// Every account with its wallet, in id order.
    pub async fn wallets(&self) -> Result<Vec<User>> {
        self.stores.users.get_all().await
    }
}
