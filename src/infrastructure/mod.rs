pub mod clock;
pub mod in_memory;
pub mod paymob;
#[cfg(feature = "storage-rocksdb")]
pub mod rocksdb;
