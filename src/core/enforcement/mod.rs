// Enforcement - admission, restoration, sweeping and reply handling.
// Everything here talks to the platform and ledger only through the context.

pub mod admission_service;
pub mod context;
pub mod notices;
pub mod reply_service;
pub mod restoration_service;
pub mod sweeper;

pub use admission_service::*;
pub use context::*;
pub use reply_service::*;
pub use restoration_service::*;
pub use sweeper::*;
