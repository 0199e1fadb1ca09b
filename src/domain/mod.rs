//! Domain model: users and their wallets, orders and offers, disputes, the
//! money ledger, notifications, reviews and saved cards, plus the storage
//! ports the application layer talks to.

pub mod commission;
pub mod dispute;
pub mod ledger;
pub mod money;
pub mod notification;
pub mod order;
pub mod payment_method;
pub mod ports;
pub mod review;
pub mod user;
