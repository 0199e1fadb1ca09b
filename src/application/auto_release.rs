use super::marketplace::Marketplace;
use super::unit_of_work::{EntryDraft, UnitOfWork};
use crate::domain::ledger::TransactionType;
use crate::domain::money::Balance;
use crate::domain::notification::NotificationKind;
use crate::domain::order::{OrderId, OrderStatus};
use crate::error::{MarketplaceError, Result};
use chrono::{DateTime, Utc};
use tracing::{error, info, warn};

/// Outcome of one auto-release sweep.
#[derive(Debug, Default, Clone, PartialEq)]
pub struct AutoReleaseReport {
    pub processed: usize,
    pub skipped: Vec<(OrderId, String)>,
}

enum Outcome {
    Released,
    Skipped(String),
}

impl Marketplace {
    /// Completes every order whose auto-release date has passed, paying the
    /// technician the full escrowed price.
    ///
    /// Each order is handled in its own unit of work: a failure on one order
    /// is reported to the admins and the sweep moves on.
    pub async fn run_auto_release(&self, now: DateTime<Utc>) -> Result<AutoReleaseReport> {
        let mut due: Vec<OrderId> = self
            .stores
            .orders
            .get_all()
            .await?
            .into_iter()
            .filter(|order| {
                order.status == OrderStatus::AwaitingRelease
                    && order.auto_release_date.is_some_and(|date| date <= now)
            })
            .map(|order| order.id)
            .collect();
        due.sort_unstable();
        info!(due = due.len(), %now, "auto-release sweep started");

        let mut report = AutoReleaseReport::default();
        for order_id in due {
            match self.auto_release_order(order_id, now).await {
                Ok(Outcome::Released) => report.processed += 1,
                Ok(Outcome::Skipped(reason)) => {
                    warn!(order_id, %reason, "auto-release skipped");
                    report.skipped.push((order_id, reason));
                }
                Err(err) => {
                    error!(order_id, error = %err, "auto-release failed");
                    if let Err(report_err) = self.report_system_error(order_id, &err, now).await {
                        error!(order_id, error = %report_err, "could not notify admins");
                    }
                    report.skipped.push((order_id, err.to_string()));
                }
            }
        }

        info!(processed = report.processed, skipped = report.skipped.len(), "auto-release sweep completed");
        Ok(report)
    }

    async fn auto_release_order(&self, order_id: OrderId, now: DateTime<Utc>) -> Result<Outcome> {
        let _guard = self.guard.lock().await;
        let mut unit = UnitOfWork::new(&self.stores, now, &self.config.currency);

        let mut order = unit.order(order_id).await?;
        if order.status != OrderStatus::AwaitingRelease {
            return Ok(Outcome::Skipped(format!(
                "Order {order_id} is now {}.",
                order.status
            )));
        }
        let price = order.final_price.ok_or_else(|| {
            MarketplaceError::ValidationError(format!("Order {order_id} has no final price."))
        })?;

        let Some(technician_id) = order.technician else {
            unit.notify(
                order.client,
                NotificationKind::AutoReleaseFailed,
                format!("Funds for order #{order_id} could not be released automatically."),
                Some(order_id),
                None,
            )
            .await?;
            unit.commit().await?;
            return Ok(Outcome::Skipped(format!(
                "Order {order_id} has no assigned technician."
            )));
        };

        let mut client = unit.user(order.client).await?;
        if client.wallet.in_escrow < Balance::from(price) {
            let reason = format!(
                "Insufficient escrow funds ({}) to release {price}.",
                client.wallet.in_escrow
            );
            unit.notify(
                order.client,
                NotificationKind::AutoReleaseFailed,
                format!("Funds for order #{order_id} could not be released automatically."),
                Some(order_id),
                None,
            )
            .await?;
            unit.commit().await?;
            return Ok(Outcome::Skipped(reason));
        }

        client.wallet.debit_escrow(price)?;
        unit.save_user(client);
        let mut technician = unit.user(technician_id).await?;
        technician.wallet.credit_pending(price)?;
        technician.num_jobs_completed += 1;
        let technician_name = technician.full_name();
        unit.save_user(technician);

        unit.record(
            EntryDraft::new(TransactionType::EscrowRelease, price)
                .from(order.client)
                .to(technician_id)
                .order(order_id),
        )
        .await?;

        order.transition(OrderStatus::Completed);
        order.job_completion_timestamp = Some(now);
        unit.save_order(order.clone());

        unit.notify(
            technician_id,
            NotificationKind::FundsAutoReleased,
            format!("{price} for order #{order_id} was released to your pending balance."),
            Some(order_id),
            None,
        )
        .await?;
        unit.notify(
            order.client,
            NotificationKind::FundsAutoReleased,
            format!("Funds for order #{order_id} were released to {technician_name}."),
            Some(order_id),
            None,
        )
        .await?;

        unit.commit().await?;
        info!(order_id, technician = technician_id, %price, "funds auto-released");
        Ok(Outcome::Released)
    }

    async fn report_system_error(
        &self,
        order_id: OrderId,
        err: &MarketplaceError,
        now: DateTime<Utc>,
    ) -> Result<()> {
        let _guard = self.guard.lock().await;
        let mut unit = UnitOfWork::new(&self.stores, now, &self.config.currency);
        for admin in unit.admins().await? {
            unit.notify(
                admin.id,
                NotificationKind::SystemError,
                format!("Auto-release of order #{order_id} failed: {err}"),
                Some(order_id),
                None,
            )
            .await?;
        }
        unit.commit().await
    }
}
