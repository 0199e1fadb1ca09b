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
use crate::error::{MarketplaceError, Result};
use async_trait::async_trait;
use rocksdb::{ColumnFamily, ColumnFamilyDescriptor, DB, IteratorMode, Options, WriteBatch};
use serde::Serialize;
use serde::de::DeserializeOwned;
use std::path::Path;
use std::sync::Arc;

pub const CF_USERS: &str = "users";
pub const CF_ORDERS: &str = "orders";
pub const CF_OFFERS: &str = "offers";
pub const CF_DISPUTES: &str = "disputes";
pub const CF_DISPUTE_RESPONSES: &str = "dispute_responses";
pub const CF_LEDGER: &str = "ledger";
pub const CF_NOTIFICATIONS: &str = "notifications";
pub const CF_REVIEWS: &str = "reviews";
pub const CF_PAYMENT_METHODS: &str = "payment_methods";

const COLUMN_FAMILIES: [&str; 9] = [
    CF_USERS,
    CF_ORDERS,
    CF_OFFERS,
    CF_DISPUTES,
    CF_DISPUTE_RESPONSES,
    CF_LEDGER,
    CF_NOTIFICATIONS,
    CF_REVIEWS,
    CF_PAYMENT_METHODS,
];

/// A persistent store implementation using RocksDB.
///
/// Every aggregate lives in its own Column Family, keyed by its id in
/// big-endian bytes so iteration order matches id order. Values are JSON.
///
/// This struct is thread-safe (`Clone` shares the underlying `Arc<DB>`), so a
/// single instance can back every storage port at once.
#[derive(Clone)]
pub struct RocksDBStore {
    db: Arc<DB>,
}

impl RocksDBStore {
    /// Opens or creates a RocksDB instance at the specified path, creating
    /// any missing column family.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let mut opts = Options::default();
        opts.create_if_missing(true);
        opts.create_missing_column_families(true);

        let descriptors = COLUMN_FAMILIES
            .iter()
            .map(|name| ColumnFamilyDescriptor::new(*name, Options::default()));

        let db = DB::open_cf_descriptors(&opts, path, descriptors)?;

        Ok(Self { db: Arc::new(db) })
    }

    fn cf(&self, name: &str) -> Result<&ColumnFamily> {
        self.db.cf_handle(name).ok_or_else(|| {
            MarketplaceError::InternalError(Box::new(std::io::Error::other(format!(
                "{name} column family not found"
            ))))
        })
    }

    fn put_json<T: Serialize>(&self, cf: &str, id: u64, value: &T) -> Result<()> {
        let handle = self.cf(cf)?;
        self.db.put_cf(handle, id.to_be_bytes(), encode(value)?)?;
        Ok(())
    }

    fn batch_json<T: Serialize>(
        &self,
        batch: &mut WriteBatch,
        cf: &str,
        rows: impl IntoIterator<Item = (u64, T)>,
    ) -> Result<()> {
        let handle = self.cf(cf)?;
        for (id, row) in rows {
            batch.put_cf(handle, id.to_be_bytes(), encode(&row)?);
        }
        Ok(())
    }

    fn get_json<T: DeserializeOwned>(&self, cf: &str, id: u64) -> Result<Option<T>> {
        let handle = self.cf(cf)?;
        match self.db.get_cf(handle, id.to_be_bytes())? {
            Some(bytes) => Ok(Some(decode(&bytes)?)),
            None => Ok(None),
        }
    }

    fn scan_json<T: DeserializeOwned>(&self, cf: &str, keep: impl Fn(&T) -> bool) -> Result<Vec<T>> {
        let handle = self.cf(cf)?;
        let mut rows = Vec::new();
        for item in self.db.iterator_cf(handle, IteratorMode::Start) {
            let (_key, value) = item.map_err(|e| {
                MarketplaceError::InternalError(Box::new(std::io::Error::other(format!(
                    "RocksDB iteration error: {}",
                    e
                ))))
            })?;
            let row: T = decode(&value)?;
            if keep(&row) {
                rows.push(row);
            }
        }
        Ok(rows)
    }

    /// One past the highest key in the column family.
    fn next_key(&self, cf: &str) -> Result<u64> {
        let handle = self.cf(cf)?;
        let last = self.db.iterator_cf(handle, IteratorMode::End).next();
        match last {
            Some(item) => {
                let (key, _value) = item?;
                let bytes: [u8; 8] = key.as_ref().try_into().map_err(|_| {
                    MarketplaceError::InternalError(Box::new(std::io::Error::other(format!(
                        "Malformed key in {cf}"
                    ))))
                })?;
                Ok(u64::from_be_bytes(bytes) + 1)
            }
            None => Ok(1),
        }
    }
}

fn encode<T: Serialize>(value: &T) -> Result<Vec<u8>> {
    serde_json::to_vec(value).map_err(|e| {
        MarketplaceError::InternalError(Box::new(std::io::Error::new(
            std::io::ErrorKind::InvalidData,
            format!("Serialization error: {}", e),
        )))
    })
}

fn decode<T: DeserializeOwned>(bytes: &[u8]) -> Result<T> {
    serde_json::from_slice(bytes).map_err(|e| {
        MarketplaceError::InternalError(Box::new(std::io::Error::new(
            std::io::ErrorKind::InvalidData,
            format!("Deserialization error: {}", e),
        )))
    })
}

#[async_trait]
impl UserStore for RocksDBStore {
    async fn store(&self, user: User) -> Result<()> {
        self.put_json(CF_USERS, user.id, &user)
    }

    async fn get(&self, id: UserId) -> Result<Option<User>> {
        self.get_json(CF_USERS, id)
    }

    async fn get_all(&self) -> Result<Vec<User>> {
        self.scan_json(CF_USERS, |_: &User| true)
    }

    async fn next_id(&self) -> Result<UserId> {
        self.next_key(CF_USERS)
    }
}

#[async_trait]
impl OrderStore for RocksDBStore {
    async fn store(&self, order: Order) -> Result<()> {
        self.put_json(CF_ORDERS, order.id, &order)
    }

    async fn get(&self, id: OrderId) -> Result<Option<Order>> {
        self.get_json(CF_ORDERS, id)
    }

    async fn get_all(&self) -> Result<Vec<Order>> {
        self.scan_json(CF_ORDERS, |_: &Order| true)
    }

    async fn next_id(&self) -> Result<OrderId> {
        self.next_key(CF_ORDERS)
    }

    async fn store_offer(&self, offer: ProjectOffer) -> Result<()> {
        self.put_json(CF_OFFERS, offer.id, &offer)
    }

    async fn get_offer(&self, id: OfferId) -> Result<Option<ProjectOffer>> {
        self.get_json(CF_OFFERS, id)
    }

    async fn offers_for_order(&self, order_id: OrderId) -> Result<Vec<ProjectOffer>> {
        self.scan_json(CF_OFFERS, |offer: &ProjectOffer| offer.order_id == order_id)
    }

    async fn next_offer_id(&self) -> Result<OfferId> {
        self.next_key(CF_OFFERS)
    }
}

#[async_trait]
impl DisputeStore for RocksDBStore {
    async fn store(&self, dispute: Dispute) -> Result<()> {
        self.put_json(CF_DISPUTES, dispute.id, &dispute)
    }

    async fn get(&self, id: DisputeId) -> Result<Option<Dispute>> {
        self.get_json(CF_DISPUTES, id)
    }

    async fn get_all(&self) -> Result<Vec<Dispute>> {
        self.scan_json(CF_DISPUTES, |_: &Dispute| true)
    }

    async fn next_id(&self) -> Result<DisputeId> {
        self.next_key(CF_DISPUTES)
    }

    async fn store_response(&self, response: DisputeResponse) -> Result<()> {
        self.put_json(CF_DISPUTE_RESPONSES, response.id, &response)
    }

    async fn responses_for(&self, dispute_id: DisputeId) -> Result<Vec<DisputeResponse>> {
        self.scan_json(CF_DISPUTE_RESPONSES, |response: &DisputeResponse| {
            response.dispute_id == dispute_id
        })
    }

    async fn next_response_id(&self) -> Result<u64> {
        self.next_key(CF_DISPUTE_RESPONSES)
    }
}

#[async_trait]
impl LedgerStore for RocksDBStore {
    async fn store(&self, entry: LedgerEntry) -> Result<()> {
        self.put_json(CF_LEDGER, entry.id, &entry)
    }

    async fn get(&self, id: EntryId) -> Result<Option<LedgerEntry>> {
        self.get_json(CF_LEDGER, id)
    }

    async fn get_all(&self) -> Result<Vec<LedgerEntry>> {
        self.scan_json(CF_LEDGER, |_: &LedgerEntry| true)
    }

    async fn find_by_external_id(&self, external_id: &str) -> Result<Option<LedgerEntry>> {
        let matches = self.scan_json(CF_LEDGER, |entry: &LedgerEntry| {
            entry.external_id.as_deref() == Some(external_id)
        })?;
        Ok(matches.into_iter().next())
    }

    async fn next_id(&self) -> Result<EntryId> {
        self.next_key(CF_LEDGER)
    }
}

#[async_trait]
impl NotificationStore for RocksDBStore {
    async fn store(&self, notification: Notification) -> Result<()> {
        self.put_json(CF_NOTIFICATIONS, notification.id, &notification)
    }

    async fn get(&self, id: NotificationId) -> Result<Option<Notification>> {
        self.get_json(CF_NOTIFICATIONS, id)
    }

    async fn for_user(&self, user: UserId) -> Result<Vec<Notification>> {
        self.scan_json(CF_NOTIFICATIONS, |n: &Notification| n.user == user)
    }

    async fn next_id(&self) -> Result<NotificationId> {
        self.next_key(CF_NOTIFICATIONS)
    }
}

#[async_trait]
impl ReviewStore for RocksDBStore {
    async fn store(&self, review: Review) -> Result<()> {
        self.put_json(CF_REVIEWS, review.id, &review)
    }

    async fn for_order(&self, order_id: OrderId) -> Result<Option<Review>> {
        let matches = self.scan_json(CF_REVIEWS, |review: &Review| review.order_id == order_id)?;
        Ok(matches.into_iter().next())
    }

    async fn for_technician(&self, technician: UserId) -> Result<Vec<Review>> {
        self.scan_json(CF_REVIEWS, |review: &Review| review.technician == technician)
    }

    async fn next_id(&self) -> Result<u64> {
        self.next_key(CF_REVIEWS)
    }
}

#[async_trait]
impl PaymentMethodStore for RocksDBStore {
    async fn store(&self, method: PaymentMethod) -> Result<()> {
        self.put_json(CF_PAYMENT_METHODS, method.id, &method)
    }

    async fn get(&self, id: PaymentMethodId) -> Result<Option<PaymentMethod>> {
        self.get_json(CF_PAYMENT_METHODS, id)
    }

    async fn for_user(&self, user: UserId) -> Result<Vec<PaymentMethod>> {
        self.scan_json(CF_PAYMENT_METHODS, |method: &PaymentMethod| method.user == user)
    }

    async fn next_id(&self) -> Result<PaymentMethodId> {
        self.next_key(CF_PAYMENT_METHODS)
    }
}

/// One `WriteBatch` spanning every column family, written in a single call.
#[async_trait]
impl ChangeStore for RocksDBStore {
    async fn apply(&self, changes: ChangeSet) -> Result<()> {
        let mut batch = WriteBatch::default();
        self.batch_json(&mut batch, CF_USERS, changes.users.into_iter().map(|u| (u.id, u)))?;
        self.batch_json(&mut batch, CF_ORDERS, changes.orders.into_iter().map(|o| (o.id, o)))?;
        self.batch_json(&mut batch, CF_OFFERS, changes.offers.into_iter().map(|o| (o.id, o)))?;
        self.batch_json(
            &mut batch,
            CF_DISPUTES,
            changes.disputes.into_iter().map(|d| (d.id, d)),
        )?;
        self.batch_json(
            &mut batch,
            CF_DISPUTE_RESPONSES,
            changes.responses.into_iter().map(|r| (r.id, r)),
        )?;
        self.batch_json(&mut batch, CF_LEDGER, changes.ledger.into_iter().map(|e| (e.id, e)))?;
        self.batch_json(
            &mut batch,
            CF_NOTIFICATIONS,
            changes.notifications.into_iter().map(|n| (n.id, n)),
        )?;
        self.batch_json(&mut batch, CF_REVIEWS, changes.reviews.into_iter().map(|r| (r.id, r)))?;
        self.batch_json(
            &mut batch,
            CF_PAYMENT_METHODS,
            changes.payment_methods.into_iter().map(|m| (m.id, m)),
        )?;
        tracing::debug!(writes = batch.len(), "applying write batch");
        self.db.write(&batch)?;
        Ok(())
    }
}
