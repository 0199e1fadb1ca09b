use super::dispute::{Dispute, DisputeId, DisputeResponse};
use super::ledger::{EntryId, LedgerEntry};
use super::notification::{Notification, NotificationId};
use super::order::{OfferId, Order, OrderId, ProjectOffer};
use super::payment_method::{PaymentMethod, PaymentMethodId};
use super::review::Review;
use super::user::{User, UserId};
use crate::error::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;

#[async_trait]
pub trait UserStore: Send + Sync {
    async fn store(&self, user: User) -> Result<()>;
    async fn get(&self, id: UserId) -> Result<Option<User>>;
    async fn get_all(&self) -> Result<Vec<User>>;
    async fn next_id(&self) -> Result<UserId>;
}

pub type UserStoreBox = Box<dyn UserStore>;

#[async_trait]
pub trait OrderStore: Send + Sync {
    async fn store(&self, order: Order) -> Result<()>;
    async fn get(&self, id: OrderId) -> Result<Option<Order>>;
    async fn get_all(&self) -> Result<Vec<Order>>;
    async fn next_id(&self) -> Result<OrderId>;

    async fn store_offer(&self, offer: ProjectOffer) -> Result<()>;
    async fn get_offer(&self, id: OfferId) -> Result<Option<ProjectOffer>>;
    async fn offers_for_order(&self, order_id: OrderId) -> Result<Vec<ProjectOffer>>;
    async fn next_offer_id(&self) -> Result<OfferId>;
}

pub type OrderStoreBox = Box<dyn OrderStore>;

#[async_trait]
pub trait DisputeStore: Send + Sync {
    async fn store(&self, dispute: Dispute) -> Result<()>;
    async fn get(&self, id: DisputeId) -> Result<Option<Dispute>>;
    async fn get_all(&self) -> Result<Vec<Dispute>>;
    async fn next_id(&self) -> Result<DisputeId>;

    async fn store_response(&self, response: DisputeResponse) -> Result<()>;
    async fn responses_for(&self, dispute_id: DisputeId) -> Result<Vec<DisputeResponse>>;
    async fn next_response_id(&self) -> Result<u64>;
}

pub type DisputeStoreBox = Box<dyn DisputeStore>;

#[async_trait]
pub trait LedgerStore: Send + Sync {
    async fn store(&self, entry: LedgerEntry) -> Result<()>;
    async fn get(&self, id: EntryId) -> Result<Option<LedgerEntry>>;
    async fn get_all(&self) -> Result<Vec<LedgerEntry>>;
    async fn find_by_external_id(&self, external_id: &str) -> Result<Option<LedgerEntry>>;
    async fn next_id(&self) -> Result<EntryId>;
}

pub type LedgerStoreBox = Box<dyn LedgerStore>;

#[async_trait]
pub trait NotificationStore: Send + Sync {
    async fn store(&self, notification: Notification) -> Result<()>;
    async fn get(&self, id: NotificationId) -> Result<Option<Notification>>;
    async fn for_user(&self, user: UserId) -> Result<Vec<Notification>>;
    async fn next_id(&self) -> Result<NotificationId>;
}

pub type NotificationStoreBox = Box<dyn NotificationStore>;

#[async_trait]
pub trait ReviewStore: Send + Sync {
    async fn store(&self, review: Review) -> Result<()>;
    async fn for_order(&self, order_id: OrderId) -> Result<Option<Review>>;
    async fn for_technician(&self, technician: UserId) -> Result<Vec<Review>>;
    async fn next_id(&self) -> Result<u64>;
}

pub type ReviewStoreBox = Box<dyn ReviewStore>;

#[async_trait]
pub trait PaymentMethodStore: Send + Sync {
    async fn store(&self, method: PaymentMethod) -> Result<()>;
    async fn get(&self, id: PaymentMethodId) -> Result<Option<PaymentMethod>>;
    async fn for_user(&self, user: UserId) -> Result<Vec<PaymentMethod>>;
    async fn next_id(&self) -> Result<PaymentMethodId>;
}

pub type PaymentMethodStoreBox = Box<dyn PaymentMethodStore>;

/// Every write of one marketplace action.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ChangeSet {
    pub users: Vec<User>,
    pub orders: Vec<Order>,
    pub offers: Vec<ProjectOffer>,
    pub disputes: Vec<Dispute>,
    pub responses: Vec<DisputeResponse>,
    pub ledger: Vec<LedgerEntry>,
    pub notifications: Vec<Notification>,
    pub reviews: Vec<Review>,
    pub payment_methods: Vec<PaymentMethod>,
}

impl ChangeSet {
    pub fn is_empty(&self) -> bool {
        self.users.is_empty()
            && self.orders.is_empty()
            && self.offers.is_empty()
            && self.disputes.is_empty()
            && self.responses.is_empty()
            && self.ledger.is_empty()
            && self.notifications.is_empty()
            && self.reviews.is_empty()
            && self.payment_methods.is_empty()
    }
}

/// Writes a [`ChangeSet`] across every aggregate as one atomic step.
///
/// Either every record of the set is stored or none is.
#[async_trait]
pub trait ChangeStore: Send + Sync {
    async fn apply(&self, changes: ChangeSet) -> Result<()>;
}

pub type ChangeStoreBox = Box<dyn ChangeStore>;

/// Source of "now" for timestamps and auto-release deadlines.
pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

/// Customer details forwarded to the gateway when requesting a payment key.
#[derive(Debug, Clone, Default, Serialize, PartialEq)]
pub struct BillingData {
    pub first_name: String,
    pub last_name: String,
    pub email: String,
    pub phone_number: String,
}

/// Which gateway callback is being verified. Each one signs its own fields.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallbackKind {
    Transaction,
    /// A card was tokenized during checkout.
    Token,
}

/// Gateway answer to charging a saved card.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TokenPayment {
    pub success: bool,
    pub pending: bool,
    /// Set when the issuer asks for a 3-D Secure challenge.
    pub redirect_url: Option<String>,
}

/// Card-payment gateway used for wallet top-ups.
///
/// The flow is auth token, register order, payment key; then either the
/// hosted checkout or a charge against a saved card token. The gateway
/// later confirms the payment through a signed webhook.
#[async_trait]
pub trait PaymentGateway: Send + Sync {
    async fn authenticate(&self) -> Result<String>;
    async fn register_order(
        &self,
        auth_token: &str,
        amount_cents: i64,
        merchant_order_id: u64,
        currency: &str,
    ) -> Result<String>;
    async fn payment_key(
        &self,
        auth_token: &str,
        gateway_order_id: &str,
        billing: &BillingData,
        amount_cents: i64,
        currency: &str,
    ) -> Result<String>;
    async fn pay_with_token(&self, card_token: &str, payment_key: &str) -> Result<TokenPayment>;
    fn checkout_url(&self, payment_key: &str) -> String;
    /// Checks the webhook signature over the received parameters.
    fn verify_webhook(
        &self,
        kind: CallbackKind,
        params: &serde_json::Map<String, serde_json::Value>,
    ) -> bool;
}

pub type PaymentGatewayBox = Box<dyn PaymentGateway>;
