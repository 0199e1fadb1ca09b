use super::access::{Actor, ensure_admin};
use super::marketplace::Marketplace;
use super::unit_of_work::{EntryDraft, Sequence};
use crate::domain::dispute::{Dispute, DisputeId, DisputeResponse, DisputeStatus, Resolution, ResponseKind};
use crate::domain::ledger::TransactionType;
use crate::domain::money::Amount;
use crate::domain::notification::NotificationKind;
use crate::domain::order::OrderStatus;
use crate::error::{MarketplaceError, Result};
use rust_decimal::Decimal;
use tracing::info;

fn escrow_shortfall(err: MarketplaceError) -> MarketplaceError {
    match err {
        MarketplaceError::InsufficientFunds(message) => MarketplaceError::ValidationError(message),
        other => other,
    }
}

impl Marketplace {
    /// Admin decision on a dispute: the escrow goes to the client, the
    /// technician, or is split between them.
    pub async fn resolve_dispute(
        &self,
        actor: &Actor,
        dispute_id: DisputeId,
        resolution: Resolution,
        admin_notes: String,
    ) -> Result<Dispute> {
        let _guard = self.guard.lock().await;
        let mut unit = self.begin();

        ensure_admin(actor)?;
        let mut dispute = unit.dispute(dispute_id).await?;
        if dispute.status == DisputeStatus::Resolved {
            return Err(MarketplaceError::ValidationError(
                "This dispute has already been resolved.".to_string(),
            ));
        }
        if admin_notes.trim().is_empty() {
            return Err(MarketplaceError::ValidationError(
                "Admin notes are required to resolve a dispute.".to_string(),
            ));
        }

        let mut order = unit.order(dispute.order_id).await?;
        order.ensure_status(&[OrderStatus::Disputed], "resolve a dispute on")?;
        let order_id = order.id;
        let escrow = order.final_price.ok_or_else(|| {
            MarketplaceError::ValidationError("Order has no escrowed amount.".to_string())
        })?;
        let technician_id = order.technician;
        let require_technician = || {
            technician_id.ok_or_else(|| {
                MarketplaceError::ValidationError("Order has no assigned technician.".to_string())
            })
        };

        let mut client = unit.user(order.client).await?;
        client.wallet.debit_escrow(escrow).map_err(escrow_shortfall)?;

        let (refund, payout) = match resolution {
            Resolution::RefundClient => (Some(escrow), None),
            Resolution::PayTechnician => (None, Some(escrow)),
            Resolution::SplitPayment {
                client_refund,
                technician_payout,
            } => {
                if client_refund.is_none() && technician_payout.is_none() {
                    return Err(MarketplaceError::ValidationError(
                        "A split payment needs a client refund or a technician payout.".to_string(),
                    ));
                }
                let split_total = client_refund.map_or(Decimal::ZERO, |a| a.value())
                    + technician_payout.map_or(Decimal::ZERO, |a| a.value());
                if split_total > escrow.value() {
                    return Err(MarketplaceError::ValidationError(format!(
                        "Split amounts ({split_total}) exceed the escrowed amount ({escrow})."
                    )));
                }
                (client_refund, technician_payout)
            }
        };

        // Ledger order: client refund, technician payout, then any remainder.
        if let Some(refund) = refund {
            client.wallet.deposit(refund)?;
            unit.record(
                EntryDraft::new(TransactionType::DisputeRefund, refund)
                    .from(order.client)
                    .to(order.client)
                    .order(order_id)
                    .dispute(dispute_id),
            )
            .await?;
        }
        if let Some(payout) = payout {
            let technician_id = require_technician()?;
            let mut technician = unit.user(technician_id).await?;
            technician.wallet.credit_pending(payout)?;
            unit.save_user(technician);
            unit.record(
                EntryDraft::new(TransactionType::DisputePayout, payout)
                    .from(order.client)
                    .to(technician_id)
                    .order(order_id)
                    .dispute(dispute_id),
            )
            .await?;
        }
        // Whatever a split leaves unassigned returns to the client.
        let assigned = refund.map_or(Decimal::ZERO, |a| a.value())
            + payout.map_or(Decimal::ZERO, |a| a.value());
        if let Ok(remainder) = Amount::new(escrow.value() - assigned) {
            client.wallet.deposit(remainder)?;
            unit.record(
                EntryDraft::new(TransactionType::DisputeRefund, remainder)
                    .from(order.client)
                    .to(order.client)
                    .order(order_id)
                    .dispute(dispute_id),
            )
            .await?;
        }
        unit.save_user(client);

        let now = unit.now();
        match resolution {
            Resolution::RefundClient => order.transition(OrderStatus::Refunded),
            Resolution::PayTechnician | Resolution::SplitPayment { .. } => {
                order.transition(OrderStatus::Completed);
                order.job_completion_timestamp = Some(now);
            }
        }
        unit.save_order(order.clone());

        dispute.status = DisputeStatus::Resolved;
        dispute.admin_notes = Some(admin_notes.trim().to_string());
        dispute.resolution = Some(resolution);
        dispute.resolved_at = Some(now);
        unit.save_dispute(dispute.clone());

        let message = format!(
            "The dispute on order #{order_id} was resolved ({resolution}). {}",
            admin_notes.trim()
        );
        let mut recipients = vec![order.client];
        recipients.extend(technician_id);
        for user in recipients {
            unit.notify(
                user,
                NotificationKind::DisputeResolved,
                message.clone(),
                Some(order_id),
                None,
            )
            .await?;
        }

        unit.commit().await?;
        info!(dispute_id, order_id, %resolution, "dispute resolved");
        Ok(dispute)
    }

    /// Adds a message to an unresolved dispute. The first response moves it into review.
    pub async fn add_dispute_response(
        &self,
        actor: &Actor,
        dispute_id: DisputeId,
        message: String,
    ) -> Result<DisputeResponse> {
        let _guard = self.guard.lock().await;
        let mut unit = self.begin();

        let mut dispute = unit.dispute(dispute_id).await?;
        let order = unit.order(dispute.order_id).await?;
        let kind = if actor.is_admin() {
            ResponseKind::Admin
        } else if order.client == actor.user_id {
            ResponseKind::Client
        } else if order.technician == Some(actor.user_id) {
            ResponseKind::Technician
        } else {
            return Err(MarketplaceError::PermissionDenied(
                "You are not a participant in this dispute.".to_string(),
            ));
        };
        if message.trim().is_empty() {
            return Err(MarketplaceError::ValidationError(
                "Message cannot be empty.".to_string(),
            ));
        }
        if dispute.status == DisputeStatus::Resolved {
            return Err(MarketplaceError::ValidationError(
                "This dispute has already been resolved.".to_string(),
            ));
        }

        let response = DisputeResponse {
            id: unit.allocate(Sequence::DisputeResponse).await?,
            dispute_id,
            sender: actor.user_id,
            kind,
            message: message.trim().to_string(),
            created_at: unit.now(),
        };
        unit.add_dispute_response(response.clone());

        match kind {
            ResponseKind::Client if dispute.client_argument.is_none() => {
                dispute.client_argument = Some(response.message.clone());
            }
            ResponseKind::Technician if dispute.technician_argument.is_none() => {
                dispute.technician_argument = Some(response.message.clone());
            }
            _ => {}
        }
        if dispute.status == DisputeStatus::Open {
            dispute.status = DisputeStatus::InReview;
        }
        unit.save_dispute(dispute);

        let mut recipients = vec![order.client];
        recipients.extend(order.technician);
        for user in recipients.into_iter().filter(|u| *u != actor.user_id) {
            unit.notify(
                user,
                NotificationKind::DisputeResponse,
                format!("New response on dispute #{dispute_id} for order #{}.", order.id),
                Some(order.id),
                None,
            )
            .await?;
        }

        unit.commit().await?;
        info!(dispute_id, sender = actor.user_id, "dispute response added");
        Ok(response)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::application::marketplace::{NewOrder, NewUser};
    use crate::application::stores::Stores;
    use crate::config::MarketplaceConfig;
    use crate::domain::order::OrderId;
    use crate::domain::user::{UserRole, Wallet};
    use crate::infrastructure::clock::SystemClock;
    use chrono::NaiveDate;
    use rust_decimal_macros::dec;

    struct Fixture {
        market: Marketplace,
        admin: Actor,
        client: Actor,
        tech: Actor,
        order_id: OrderId,
        dispute_id: DisputeId,
    }

    fn amount(value: Decimal) -> Amount {
        Amount::new(value).unwrap()
    }

    async fn register(market: &Marketplace, role: UserRole, name: &str) -> Actor {
        let user = market
            .register_user(NewUser {
                role,
                first_name: name.to_string(),
                last_name: "Test".to_string(),
                email: format!("{name}@example.com"),
                verified: true,
            })
            .await
            .unwrap();
        Actor::from(&user)
    }

    /// A 300 order, accepted and disputed by the client.
    async fn disputed() -> Fixture {
        let market = Marketplace::new(
            Stores::in_memory(),
            Box::new(SystemClock),
            MarketplaceConfig::default(),
        );
        let admin = register(&market, UserRole::Admin, "admin").await;
        let client = register(&market, UserRole::Client, "client").await;
        let tech = register(&market, UserRole::Technician, "tech").await;
        market.deposit(&client, amount(dec!(1000))).await.unwrap();

        let order = market
            .create_order(
                &client,
                NewOrder {
                    client: None,
                    service_id: 1,
                    order_type: "urgent".to_string(),
                    problem_description: "Water heater".to_string(),
                    requested_location: "Giza".to_string(),
                    scheduled_date: NaiveDate::from_ymd_opt(2025, 2, 2).unwrap(),
                },
            )
            .await
            .unwrap();
        let offer = market
            .submit_offer(&tech, order.id, None, amount(dec!(300)), None)
            .await
            .unwrap();
        market.accept_offer(&client, order.id, offer.id).await.unwrap();
        let dispute = market
            .initiate_dispute(&client, order.id, "Job not finished".to_string())
            .await
            .unwrap();

        Fixture {
            market,
            admin,
            client,
            tech,
            order_id: order.id,
            dispute_id: dispute.id,
        }
    }

    async fn wallet(f: &Fixture, actor: &Actor) -> Wallet {
        f.market.user(&f.admin, actor.user_id).await.unwrap().wallet
    }

    #[tokio::test]
    async fn test_refund_client() {
        let f = disputed().await;
        let dispute = f
            .market
            .resolve_dispute(&f.admin, f.dispute_id, Resolution::RefundClient, "No show".into())
            .await
            .unwrap();
        assert_eq!(dispute.status, DisputeStatus::Resolved);
        assert!(dispute.resolved_at.is_some());

        let client = wallet(&f, &f.client).await;
        assert_eq!(client.available.value(), dec!(1000));
        assert!(client.in_escrow.is_zero());
        let order = f.market.order(&f.admin, f.order_id).await.unwrap();
        assert_eq!(order.status, OrderStatus::Refunded);

        let last = f.market.ledger().await.unwrap().pop().unwrap();
        assert_eq!(last.kind, TransactionType::DisputeRefund);
        assert_eq!(last.dispute_id, Some(f.dispute_id));
    }

    #[tokio::test]
    async fn test_pay_technician_moves_full_escrow() {
        let f = disputed().await;
        f.market
            .resolve_dispute(&f.admin, f.dispute_id, Resolution::PayTechnician, "Done".into())
            .await
            .unwrap();

        assert_eq!(wallet(&f, &f.tech).await.pending.value(), dec!(300));
        assert!(wallet(&f, &f.client).await.in_escrow.is_zero());
        let order = f.market.order(&f.admin, f.order_id).await.unwrap();
        assert_eq!(order.status, OrderStatus::Completed);
        assert!(order.job_completion_timestamp.is_some());
    }

    #[tokio::test]
    async fn test_split_payment_returns_remainder_to_client() {
        let f = disputed().await;
        let resolution = Resolution::SplitPayment {
            client_refund: Some(amount(dec!(100))),
            technician_payout: Some(amount(dec!(150))),
        };
        f.market
            .resolve_dispute(&f.admin, f.dispute_id, resolution, "Half done".into())
            .await
            .unwrap();

        let client = wallet(&f, &f.client).await;
        assert_eq!(client.available.value(), dec!(850));
        assert!(client.in_escrow.is_zero());
        assert_eq!(wallet(&f, &f.tech).await.pending.value(), dec!(150));

        let kinds: Vec<_> = f
            .market
            .ledger()
            .await
            .unwrap()
            .into_iter()
            .filter(|e| e.dispute_id == Some(f.dispute_id))
            .map(|e| (e.kind, e.amount.value()))
            .collect();
        assert_eq!(
            kinds,
            vec![
                (TransactionType::DisputeRefund, dec!(100)),
                (TransactionType::DisputePayout, dec!(150)),
                (TransactionType::DisputeRefund, dec!(50)),
            ]
        );
    }

    #[tokio::test]
    async fn test_split_exceeding_escrow_changes_nothing() {
        let f = disputed().await;
        let resolution = Resolution::SplitPayment {
            client_refund: Some(amount(dec!(200))),
            technician_payout: Some(amount(dec!(200))),
        };
        let err = f
            .market
            .resolve_dispute(&f.admin, f.dispute_id, resolution, "Too much".into())
            .await
            .unwrap_err();
        assert!(matches!(err, MarketplaceError::ValidationError(_)));
        assert_eq!(wallet(&f, &f.client).await.in_escrow.value(), dec!(300));
        let dispute = f.market.dispute(&f.admin, f.dispute_id).await.unwrap();
        assert_eq!(dispute.status, DisputeStatus::Open);
    }

    #[tokio::test]
    async fn test_resolve_rules() {
        let f = disputed().await;
        assert!(matches!(
            f.market
                .resolve_dispute(&f.client, f.dispute_id, Resolution::RefundClient, "x".into())
                .await,
            Err(MarketplaceError::PermissionDenied(_))
        ));
        assert!(matches!(
            f.market
                .resolve_dispute(&f.admin, f.dispute_id, Resolution::RefundClient, "  ".into())
                .await,
            Err(MarketplaceError::ValidationError(_))
        ));

        f.market
            .resolve_dispute(&f.admin, f.dispute_id, Resolution::RefundClient, "ok".into())
            .await
            .unwrap();
        let err = f
            .market
            .resolve_dispute(&f.admin, f.dispute_id, Resolution::PayTechnician, "again".into())
            .await
            .unwrap_err();
        assert_eq!(
            err.to_string(),
            "Validation error: This dispute has already been resolved."
        );
    }

    #[tokio::test]
    async fn test_response_moves_to_review_and_skips_sender() {
        let f = disputed().await;
        let response = f
            .market
            .add_dispute_response(&f.tech, f.dispute_id, "I was there on time".into())
            .await
            .unwrap();
        assert_eq!(response.kind, ResponseKind::Technician);

        let dispute = f.market.dispute(&f.tech, f.dispute_id).await.unwrap();
        assert_eq!(dispute.status, DisputeStatus::InReview);
        assert_eq!(dispute.technician_argument.as_deref(), Some("I was there on time"));

        let client_notes = f.market.notifications_for(&f.client).await.unwrap();
        assert_eq!(client_notes[0].kind, NotificationKind::DisputeResponse);
        let tech_notes = f.market.notifications_for(&f.tech).await.unwrap();
        assert!(tech_notes.iter().all(|n| n.kind != NotificationKind::DisputeResponse));

        assert!(matches!(
            f.market
                .add_dispute_response(&f.client, f.dispute_id, "   ".into())
                .await,
            Err(MarketplaceError::ValidationError(_))
        ));
    }
}
