// Ledger implementations.

pub mod in_memory;
pub mod sqlite_ledger;

pub use in_memory::InMemoryLedger;
pub use sqlite_ledger::SqliteLedger;
