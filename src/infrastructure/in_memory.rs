use crate::domain::dispute::{Dispute, DisputeId, DisputeResponse};
use crate::domain::ledger::{EntryId, LedgerEntry};
use crate::domain::notification::{Notification, NotificationId};
use crate::domain::order::{OfferId, Order, OrderId, ProjectOffer};
use crate::domain::payment_method::{PaymentMethod, PaymentMethodId};
use crate::domain::ports::{
    ChangeSet, ChangeStore, DisputeStore, LedgerStore, NotificationStore, OrderStore,
    PaymentMethodStore, ReviewStore, UserStore,
};
use crate::domain::review::Review;
use crate::domain::user::{User, UserId};
use crate::error::Result;
use async_trait::async_trait;
use std::collections::BTreeMap;
use std::sync::Arc;
use tokio::sync::RwLock;

/// A shared, ordered id → record map.
///
/// `BTreeMap` keeps listings in id order, which is also creation order.
#[derive(Clone)]
struct Table<T> {
    rows: Arc<RwLock<BTreeMap<u64, T>>>,
}

impl<T> Default for Table<T> {
    fn default() -> Self {
        Self {
            rows: Arc::new(RwLock::new(BTreeMap::new())),
        }
    }
}

impl<T: Clone> Table<T> {
    async fn put(&self, id: u64, row: T) {
        self.rows.write().await.insert(id, row);
    }

    async fn get(&self, id: u64) -> Option<T> {
        self.rows.read().await.get(&id).cloned()
    }

    async fn all(&self) -> Vec<T> {
        self.rows.read().await.values().cloned().collect()
    }

    async fn filter(&self, keep: impl Fn(&T) -> bool) -> Vec<T> {
        self.rows
            .read()
            .await
            .values()
            .filter(|row| keep(row))
            .cloned()
            .collect()
    }

    async fn next_id(&self) -> u64 {
        self.rows
            .read()
            .await
            .keys()
            .next_back()
            .map_or(1, |last| last + 1)
    }
}

/// In-memory user store. Ideal for tests and one-shot CLI runs.
#[derive(Default, Clone)]
pub struct InMemoryUserStore {
    users: Table<User>,
}

impl InMemoryUserStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl UserStore for InMemoryUserStore {
    async fn store(&self, user: User) -> Result<()> {
        self.users.put(user.id, user).await;
        Ok(())
    }

    async fn get(&self, id: UserId) -> Result<Option<User>> {
        Ok(self.users.get(id).await)
    }

    async fn get_all(&self) -> Result<Vec<User>> {
        Ok(self.users.all().await)
    }

    async fn next_id(&self) -> Result<UserId> {
        Ok(self.users.next_id().await)
    }
}

#[derive(Default, Clone)]
pub struct InMemoryOrderStore {
    orders: Table<Order>,
    offers: Table<ProjectOffer>,
}

impl InMemoryOrderStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl OrderStore for InMemoryOrderStore {
    async fn store(&self, order: Order) -> Result<()> {
        self.orders.put(order.id, order).await;
        Ok(())
    }

    async fn get(&self, id: OrderId) -> Result<Option<Order>> {
        Ok(self.orders.get(id).await)
    }

    async fn get_all(&self) -> Result<Vec<Order>> {
        Ok(self.orders.all().await)
    }

    async fn next_id(&self) -> Result<OrderId> {
        Ok(self.orders.next_id().await)
    }

    async fn store_offer(&self, offer: ProjectOffer) -> Result<()> {
        self.offers.put(offer.id, offer).await;
        Ok(())
    }

    async fn get_offer(&self, id: OfferId) -> Result<Option<ProjectOffer>> {
        Ok(self.offers.get(id).await)
    }

    async fn offers_for_order(&self, order_id: OrderId) -> Result<Vec<ProjectOffer>> {
        Ok(self
            .offers
            .filter(|offer| offer.order_id == order_id)
            .await)
    }

    async fn next_offer_id(&self) -> Result<OfferId> {
        Ok(self.offers.next_id().await)
    }
}

#[derive(Default, Clone)]
pub struct InMemoryDisputeStore {
    disputes: Table<Dispute>,
    responses: Table<DisputeResponse>,
}

impl InMemoryDisputeStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl DisputeStore for InMemoryDisputeStore {
    async fn store(&self, dispute: Dispute) -> Result<()> {
        self.disputes.put(dispute.id, dispute).await;
        Ok(())
    }

    async fn get(&self, id: DisputeId) -> Result<Option<Dispute>> {
        Ok(self.disputes.get(id).await)
    }

    async fn get_all(&self) -> Result<Vec<Dispute>> {
        Ok(self.disputes.all().await)
    }

    async fn next_id(&self) -> Result<DisputeId> {
        Ok(self.disputes.next_id().await)
    }

    async fn store_response(&self, response: DisputeResponse) -> Result<()> {
        self.responses.put(response.id, response).await;
        Ok(())
    }

    async fn responses_for(&self, dispute_id: DisputeId) -> Result<Vec<DisputeResponse>> {
        Ok(self
            .responses
            .filter(|response| response.dispute_id == dispute_id)
            .await)
    }

    async fn next_response_id(&self) -> Result<u64> {
        Ok(self.responses.next_id().await)
    }
}

/// In-memory money ledger.
#[derive(Default, Clone)]
pub struct InMemoryLedgerStore {
    entries: Table<LedgerEntry>,
}

impl InMemoryLedgerStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl LedgerStore for InMemoryLedgerStore {
    async fn store(&self, entry: LedgerEntry) -> Result<()> {
        self.entries.put(entry.id, entry).await;
        Ok(())
    }

    async fn get(&self, id: EntryId) -> Result<Option<LedgerEntry>> {
        Ok(self.entries.get(id).await)
    }

    async fn get_all(&self) -> Result<Vec<LedgerEntry>> {
        Ok(self.entries.all().await)
    }

    async fn find_by_external_id(&self, external_id: &str) -> Result<Option<LedgerEntry>> {
        Ok(self
            .entries
            .filter(|entry| entry.external_id.as_deref() == Some(external_id))
            .await
            .into_iter()
            .next())
    }

    async fn next_id(&self) -> Result<EntryId> {
        Ok(self.entries.next_id().await)
    }
}

#[derive(Default, Clone)]
pub struct InMemoryNotificationStore {
    notifications: Table<Notification>,
}

impl InMemoryNotificationStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl NotificationStore for InMemoryNotificationStore {
    async fn store(&self, notification: Notification) -> Result<()> {
        self.notifications.put(notification.id, notification).await;
        Ok(())
    }

    async fn get(&self, id: NotificationId) -> Result<Option<Notification>> {
        Ok(self.notifications.get(id).await)
    }

    async fn for_user(&self, user: UserId) -> Result<Vec<Notification>> {
        Ok(self.notifications.filter(|n| n.user == user).await)
    }

    async fn next_id(&self) -> Result<NotificationId> {
        Ok(self.notifications.next_id().await)
    }
}

#[derive(Default, Clone)]
pub struct InMemoryReviewStore {
    reviews: Table<Review>,
}

impl InMemoryReviewStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl ReviewStore for InMemoryReviewStore {
    async fn store(&self, review: Review) -> Result<()> {
        self.reviews.put(review.id, review).await;
        Ok(())
    }

    async fn for_order(&self, order_id: OrderId) -> Result<Option<Review>> {
        Ok(self
            .reviews
            .filter(|review| review.order_id == order_id)
            .await
            .into_iter()
            .next())
    }

    async fn for_technician(&self, technician: UserId) -> Result<Vec<Review>> {
        Ok(self
            .reviews
            .filter(|review| review.technician == technician)
            .await)
    }

    async fn next_id(&self) -> Result<u64> {
        Ok(self.reviews.next_id().await)
    }
}

#[derive(Default, Clone)]
pub struct InMemoryPaymentMethodStore {
    methods: Table<PaymentMethod>,
}

impl InMemoryPaymentMethodStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl PaymentMethodStore for InMemoryPaymentMethodStore {
    async fn store(&self, method: PaymentMethod) -> Result<()> {
        self.methods.put(method.id, method).await;
        Ok(())
    }

    async fn get(&self, id: PaymentMethodId) -> Result<Option<PaymentMethod>> {
        Ok(self.methods.get(id).await)
    }

    async fn for_user(&self, user: UserId) -> Result<Vec<PaymentMethod>> {
        Ok(self.methods.filter(|method| method.user == user).await)
    }

    async fn next_id(&self) -> Result<PaymentMethodId> {
        Ok(self.methods.next_id().await)
    }
}

/// Applies change sets to the in-memory stores it shares tables with.
///
/// Every table lock is taken, always in the same order, before the first
/// insert, so readers never see half of a set.
#[derive(Default, Clone)]
pub struct InMemoryChangeStore {
    pub users: InMemoryUserStore,
    pub orders: InMemoryOrderStore,
    pub disputes: InMemoryDisputeStore,
    pub ledger: InMemoryLedgerStore,
    pub notifications: InMemoryNotificationStore,
    pub reviews: InMemoryReviewStore,
    pub payment_methods: InMemoryPaymentMethodStore,
}

impl InMemoryChangeStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl ChangeStore for InMemoryChangeStore {
    async fn apply(&self, changes: ChangeSet) -> Result<()> {
        let mut users = self.users.users.rows.write().await;
        let mut orders = self.orders.orders.rows.write().await;
        let mut offers = self.orders.offers.rows.write().await;
        let mut disputes = self.disputes.disputes.rows.write().await;
        let mut responses = self.disputes.responses.rows.write().await;
        let mut ledger = self.ledger.entries.rows.write().await;
        let mut notifications = self.notifications.notifications.rows.write().await;
        let mut reviews = self.reviews.reviews.rows.write().await;
        let mut methods = self.payment_methods.methods.rows.write().await;

        for user in changes.users {
            users.insert(user.id, user);
        }
        for order in changes.orders {
            orders.insert(order.id, order);
        }
        for offer in changes.offers {
            offers.insert(offer.id, offer);
        }
        for dispute in changes.disputes {
            disputes.insert(dispute.id, dispute);
        }
        for response in changes.responses {
            responses.insert(response.id, response);
        }
        for entry in changes.ledger {
            ledger.insert(entry.id, entry);
        }
        for notification in changes.notifications {
            notifications.insert(notification.id, notification);
        }
        for review in changes.reviews {
            reviews.insert(review.id, review);
        }
        for method in changes.payment_methods {
            methods.insert(method.id, method);
        }
        Ok(())
    }
}
