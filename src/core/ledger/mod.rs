// Durable ledger - communities, dedup FIFO, pending queue and journal.

pub mod ledger_models;
pub mod ledger_store;

pub use ledger_models::*;
pub use ledger_store::*;
