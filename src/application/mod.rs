//! Application layer orchestrating the marketplace use cases.
//!
//! [`marketplace::Marketplace`] is the single entry point. Its actions are
//! split by concern: order and offer flow in `marketplace`, admin mediation in
//! `disputes`, the scheduled sweep in `auto_release` and card top-ups in
//! `payments`. All of them share the same write guard and commit through a
//! [`unit_of_work::UnitOfWork`].

pub mod access;
pub mod auto_release;
pub mod disputes;
pub mod marketplace;
pub mod payments;
pub mod stores;
pub mod unit_of_work;
