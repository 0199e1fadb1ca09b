use super::stores::Stores;
use crate::domain::dispute::{Dispute, DisputeId, DisputeResponse};
use crate::domain::ledger::{EntryId, LedgerEntry, TransactionStatus, TransactionType};
use crate::domain::money::Amount;
use crate::domain::notification::{Notification, NotificationKind};
use crate::domain::order::{OfferId, Order, OrderId, ProjectOffer};
use crate::domain::payment_method::{PaymentMethod, PaymentMethodId};
use crate::domain::ports::ChangeSet;
use crate::domain::review::Review;
use crate::domain::user::{User, UserId};
use crate::error::{MarketplaceError, Result};
use chrono::{DateTime, Utc};
use std::collections::{BTreeMap, HashMap};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Sequence {
    User,
    Order,
    Offer,
    Dispute,
    DisputeResponse,
    Ledger,
    Notification,
    Review,
    PaymentMethod,
}

/// A ledger row before it gets an id and a timestamp.
#[derive(Debug, Clone)]
pub struct EntryDraft {
    kind: TransactionType,
    amount: Amount,
    source: Option<UserId>,
    destination: Option<UserId>,
    order_id: Option<OrderId>,
    dispute_id: Option<DisputeId>,
    status: TransactionStatus,
    payment_method: Option<String>,
    external_id: Option<String>,
}

impl EntryDraft {
    pub fn new(kind: TransactionType, amount: Amount) -> Self {
        Self {
            kind,
            amount,
            source: None,
            destination: None,
            order_id: None,
            dispute_id: None,
            status: TransactionStatus::Completed,
            payment_method: None,
            external_id: None,
        }
    }

    pub fn from(mut self, user: UserId) -> Self {
        self.source = Some(user);
        self
    }

    pub fn to(mut self, user: UserId) -> Self {
        self.destination = Some(user);
        self
    }

    pub fn order(mut self, order_id: OrderId) -> Self {
        self.order_id = Some(order_id);
        self
    }

    pub fn dispute(mut self, dispute_id: DisputeId) -> Self {
        self.dispute_id = Some(dispute_id);
        self
    }

    pub fn status(mut self, status: TransactionStatus) -> Self {
        self.status = status;
        self
    }

    pub fn payment_method(mut self, method: &str) -> Self {
        self.payment_method = Some(method.to_string());
        self
    }

    pub fn external_id(mut self, external_id: String) -> Self {
        self.external_id = Some(external_id);
        self
    }
}

/// Stages every change of one marketplace action and writes them together.
///
/// Reads go through the staging area first, so an action always sees its own
/// writes. Nothing reaches the stores until [`UnitOfWork::commit`]; dropping
/// the unit discards the action.
pub struct UnitOfWork<'a> {
    stores: &'a Stores,
    now: DateTime<Utc>,
    currency: String,
    next_ids: HashMap<Sequence, u64>,
    users: BTreeMap<UserId, User>,
    orders: BTreeMap<OrderId, Order>,
    offers: BTreeMap<OfferId, ProjectOffer>,
    disputes: BTreeMap<DisputeId, Dispute>,
    responses: Vec<DisputeResponse>,
    ledger: BTreeMap<EntryId, LedgerEntry>,
    notifications: Vec<Notification>,
    reviews: Vec<Review>,
    payment_methods: BTreeMap<PaymentMethodId, PaymentMethod>,
}

impl<'a> UnitOfWork<'a> {
    pub fn new(stores: &'a Stores, now: DateTime<Utc>, currency: &str) -> Self {
        Self {
            stores,
            now,
            currency: currency.to_string(),
            next_ids: HashMap::new(),
            users: BTreeMap::new(),
            orders: BTreeMap::new(),
            offers: BTreeMap::new(),
            disputes: BTreeMap::new(),
            responses: Vec::new(),
            ledger: BTreeMap::new(),
            notifications: Vec::new(),
            reviews: Vec::new(),
            payment_methods: BTreeMap::new(),
        }
    }

    pub fn now(&self) -> DateTime<Utc> {
        self.now
    }

    pub async fn allocate(&mut self, sequence: Sequence) -> Result<u64> {
        let next = match self.next_ids.get(&sequence) {
            Some(next) => *next,
            None => match sequence {
                Sequence::User => self.stores.users.next_id().await?,
                Sequence::Order => self.stores.orders.next_id().await?,
                Sequence::Offer => self.stores.orders.next_offer_id().await?,
                Sequence::Dispute => self.stores.disputes.next_id().await?,
                Sequence::DisputeResponse => self.stores.disputes.next_response_id().await?,
                Sequence::Ledger => self.stores.ledger.next_id().await?,
                Sequence::Notification => self.stores.notifications.next_id().await?,
                Sequence::Review => self.stores.reviews.next_id().await?,
                Sequence::PaymentMethod => self.stores.payment_methods.next_id().await?,
            },
        };
        self.next_ids.insert(sequence, next + 1);
        Ok(next)
    }

    pub async fn user(&mut self, id: UserId) -> Result<User> {
        if let Some(user) = self.users.get(&id) {
            return Ok(user.clone());
        }
        self.stores
            .users
            .get(id)
            .await?
            .ok_or_else(|| MarketplaceError::not_found("User", id))
    }

    pub fn save_user(&mut self, user: User) {
        self.users.insert(user.id, user);
    }

    pub async fn order(&mut self, id: OrderId) -> Result<Order> {
        if let Some(order) = self.orders.get(&id) {
            return Ok(order.clone());
        }
        self.stores
            .orders
            .get(id)
            .await?
            .ok_or_else(|| MarketplaceError::not_found("Order", id))
    }

    pub fn save_order(&mut self, order: Order) {
        self.orders.insert(order.id, order);
    }

    pub async fn offer(&mut self, id: OfferId) -> Result<ProjectOffer> {
        if let Some(offer) = self.offers.get(&id) {
            return Ok(offer.clone());
        }
        self.stores
            .orders
            .get_offer(id)
            .await?
            .ok_or_else(|| MarketplaceError::not_found("Offer", id))
    }

    /// Offers of an order, staged versions taking precedence.
    pub async fn offers_for(&mut self, order_id: OrderId) -> Result<Vec<ProjectOffer>> {
        let mut offers: BTreeMap<OfferId, ProjectOffer> = self
            .stores
            .orders
            .offers_for_order(order_id)
            .await?
            .into_iter()
            .map(|offer| (offer.id, offer))
            .collect();
        for staged in self.offers.values().filter(|o| o.order_id == order_id) {
            offers.insert(staged.id, staged.clone());
        }
        Ok(offers.into_values().collect())
    }

    pub fn save_offer(&mut self, offer: ProjectOffer) {
        self.offers.insert(offer.id, offer);
    }

    pub async fn dispute(&mut self, id: DisputeId) -> Result<Dispute> {
        if let Some(dispute) = self.disputes.get(&id) {
            return Ok(dispute.clone());
        }
        self.stores
            .disputes
            .get(id)
            .await?
            .ok_or_else(|| MarketplaceError::not_found("Dispute", id))
    }

    pub fn save_dispute(&mut self, dispute: Dispute) {
        self.disputes.insert(dispute.id, dispute);
    }

    pub fn add_dispute_response(&mut self, response: DisputeResponse) {
        self.responses.push(response);
    }

    pub fn add_review(&mut self, review: Review) {
        self.reviews.push(review);
    }

    pub async fn payment_method(&mut self, id: PaymentMethodId) -> Result<PaymentMethod> {
        if let Some(method) = self.payment_methods.get(&id) {
            return Ok(method.clone());
        }
        self.stores
            .payment_methods
            .get(id)
            .await?
            .ok_or_else(|| MarketplaceError::not_found("Payment method", id))
    }

    pub fn save_payment_method(&mut self, method: PaymentMethod) {
        self.payment_methods.insert(method.id, method);
    }

    /// Stored users matching `keep`.
    pub async fn users_where(&self, keep: impl Fn(&User) -> bool) -> Result<Vec<User>> {
        Ok(self
            .stores
            .users
            .get_all()
            .await?
            .into_iter()
            .filter(|user| keep(user))
            .collect())
    }

    pub async fn admins(&self) -> Result<Vec<User>> {
        self.users_where(User::is_admin).await
    }

    pub async fn record(&mut self, draft: EntryDraft) -> Result<EntryId> {
        let id = self.allocate(Sequence::Ledger).await?;
        let entry = LedgerEntry {
            id,
            source: draft.source,
            destination: draft.destination,
            order_id: draft.order_id,
            dispute_id: draft.dispute_id,
            kind: draft.kind,
            amount: draft.amount,
            currency: self.currency.clone(),
            status: draft.status,
            payment_method: draft.payment_method,
            external_id: draft.external_id,
            timestamp: self.now,
        };
        tracing::debug!(entry_id = id, kind = %entry.kind, amount = %entry.amount, "ledger entry");
        self.ledger.insert(id, entry);
        Ok(id)
    }

    pub async fn ledger_entry(&mut self, id: EntryId) -> Result<LedgerEntry> {
        if let Some(entry) = self.ledger.get(&id) {
            return Ok(entry.clone());
        }
        self.stores
            .ledger
            .get(id)
            .await?
            .ok_or_else(|| MarketplaceError::not_found("Transaction", id))
    }

    pub fn save_ledger_entry(&mut self, entry: LedgerEntry) {
        self.ledger.insert(entry.id, entry);
    }

    pub async fn notify(
        &mut self,
        user: UserId,
        kind: NotificationKind,
        message: String,
        order_id: Option<OrderId>,
        offer_id: Option<OfferId>,
    ) -> Result<()> {
        let id = self.allocate(Sequence::Notification).await?;
        self.notifications.push(Notification {
            id,
            user,
            kind,
            title: kind.title().to_string(),
            message,
            order_id,
            offer_id,
            is_read: false,
            created_at: self.now,
        });
        Ok(())
    }

    /// Persists every staged change in one atomic write.
    pub async fn commit(self) -> Result<()> {
        let changes = ChangeSet {
            users: self.users.into_values().collect(),
            orders: self.orders.into_values().collect(),
            offers: self.offers.into_values().collect(),
            disputes: self.disputes.into_values().collect(),
            responses: self.responses,
            ledger: self.ledger.into_values().collect(),
            notifications: self.notifications,
            reviews: self.reviews,
            payment_methods: self.payment_methods.into_values().collect(),
        };
        if changes.is_empty() {
            return Ok(());
        }
        self.stores.changes.apply(changes).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::ports::ChangeStore;
    use crate::domain::user::{UserRole, Wallet};
    use async_trait::async_trait;
    use rust_decimal_macros::dec;
    use std::sync::{Arc, Mutex};

    /// Keeps every applied set instead of writing it.
    struct RecordingChanges(Arc<Mutex<Vec<ChangeSet>>>);

    #[async_trait]
    impl ChangeStore for RecordingChanges {
        async fn apply(&self, changes: ChangeSet) -> Result<()> {
            self.0.lock().unwrap().push(changes);
            Ok(())
        }
    }

    fn user(id: UserId) -> User {
        User {
            id,
            role: UserRole::Client,
            first_name: "Mona".to_string(),
            last_name: "Adel".to_string(),
            email: format!("mona{id}@example.com"),
            wallet: Wallet::default(),
            overall_rating: None,
            num_jobs_completed: 0,
            verified: false,
        }
    }

    #[tokio::test]
    async fn test_dropped_unit_changes_nothing() {
        let stores = Stores::in_memory();
        stores.users.store(user(1)).await.unwrap();

        {
            let mut unit = UnitOfWork::new(&stores, Utc::now(), "EGP");
            let mut staged = unit.user(1).await.unwrap();
            staged.wallet.deposit(Amount::new(dec!(100)).unwrap()).unwrap();
            unit.save_user(staged);
            unit.record(EntryDraft::new(TransactionType::Deposit, Amount::new(dec!(100)).unwrap()))
                .await
                .unwrap();
        }

        assert!(stores.users.get(1).await.unwrap().unwrap().wallet.available.is_zero());
        assert!(stores.ledger.get_all().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_staged_reads_and_sequential_ids() {
        let stores = Stores::in_memory();
        stores.users.store(user(1)).await.unwrap();

        let mut unit = UnitOfWork::new(&stores, Utc::now(), "EGP");
        let mut staged = unit.user(1).await.unwrap();
        staged.wallet.deposit(Amount::new(dec!(40)).unwrap()).unwrap();
        unit.save_user(staged);

        assert_eq!(unit.user(1).await.unwrap().wallet.available.value(), dec!(40));
        assert_eq!(unit.allocate(Sequence::Ledger).await.unwrap(), 1);
        assert_eq!(unit.allocate(Sequence::Ledger).await.unwrap(), 2);
        assert_eq!(unit.allocate(Sequence::Order).await.unwrap(), 1);

        unit.commit().await.unwrap();
        assert_eq!(
            stores.users.get(1).await.unwrap().unwrap().wallet.available.value(),
            dec!(40)
        );
    }

    #[tokio::test]
    async fn test_missing_user_is_not_found() {
        let stores = Stores::in_memory();
        let mut unit = UnitOfWork::new(&stores, Utc::now(), "EGP");
        let err = unit.user(42).await.unwrap_err();
        assert_eq!(err.to_string(), "Not found: User 42 not found");
    }

    #[tokio::test]
    async fn test_commit_applies_one_change_set() {
        let mut stores = Stores::in_memory();
        stores.users.store(user(1)).await.unwrap();
        let applied = Arc::new(Mutex::new(Vec::new()));
        stores.changes = Box::new(RecordingChanges(applied.clone()));

        let mut unit = UnitOfWork::new(&stores, Utc::now(), "EGP");
        let mut staged = unit.user(1).await.unwrap();
        staged.wallet.deposit(Amount::new(dec!(10)).unwrap()).unwrap();
        unit.save_user(staged);
        unit.record(EntryDraft::new(TransactionType::Deposit, Amount::new(dec!(10)).unwrap()).to(1))
            .await
            .unwrap();
        unit.notify(
            1,
            NotificationKind::DepositCompleted,
            "Your deposit of 10.00 was added to your wallet.".to_string(),
            None,
            None,
        )
        .await
        .unwrap();
        unit.commit().await.unwrap();

        let applied = applied.lock().unwrap();
        assert_eq!(applied.len(), 1);
        assert_eq!(applied[0].users.len(), 1);
        assert_eq!(applied[0].ledger.len(), 1);
        assert_eq!(applied[0].notifications.len(), 1);
        assert!(applied[0].orders.is_empty());
    }

    #[tokio::test]
    async fn test_empty_commit_applies_nothing() {
        let mut stores = Stores::in_memory();
        let applied = Arc::new(Mutex::new(Vec::new()));
        stores.changes = Box::new(RecordingChanges(applied.clone()));

        UnitOfWork::new(&stores, Utc::now(), "EGP").commit().await.unwrap();
        assert!(applied.lock().unwrap().is_empty());
    }
}
