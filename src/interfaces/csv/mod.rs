pub mod ledger_writer;
pub mod wallet_writer;
