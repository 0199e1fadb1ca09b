use crate::domain::ports::{
    ChangeStoreBox, DisputeStoreBox, LedgerStoreBox, NotificationStoreBox, OrderStoreBox,
    PaymentMethodStoreBox, ReviewStoreBox, UserStoreBox,
};
use crate::infrastructure::in_memory::InMemoryChangeStore;

/// Every storage port the marketplace reads and writes.
///
/// The per-aggregate ports serve reads; `changes` writes whole actions.
pub struct Stores {
    pub users: UserStoreBox,
    pub orders: OrderStoreBox,
    pub disputes: DisputeStoreBox,
    pub ledger: LedgerStoreBox,
    pub notifications: NotificationStoreBox,
    pub reviews: ReviewStoreBox,
    pub payment_methods: PaymentMethodStoreBox,
    pub changes: ChangeStoreBox,
}

impl Stores {
    pub fn in_memory() -> Self {
        let changes = InMemoryChangeStore::new();
        Self {
            users: Box::new(changes.users.clone()),
            orders: Box::new(changes.orders.clone()),
            disputes: Box::new(changes.disputes.clone()),
            ledger: Box::new(changes.ledger.clone()),
            notifications: Box::new(changes.notifications.clone()),
            reviews: Box::new(changes.reviews.clone()),
            payment_methods: Box::new(changes.payment_methods.clone()),
            changes: Box::new(changes),
        }
    }

    /// Backs every port with the same RocksDB instance.
    #[cfg(feature = "storage-rocksdb")]
    pub fn rocksdb(store: crate::infrastructure::rocksdb::RocksDBStore) -> Self {
        Self {
            users: Box::new(store.clone()),
            orders: Box::new(store.clone()),
            disputes: Box::new(store.clone()),
            ledger: Box::new(store.clone()),
            notifications: Box::new(store.clone()),
            reviews: Box::new(store.clone()),
            payment_methods: Box::new(store.clone()),
            changes: Box::new(store),
        }
    }
}
