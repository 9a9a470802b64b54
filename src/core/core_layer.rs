// The core module contains all business logic.
// Each feature gets its own submodule.

#[path = "settings.rs"]
pub mod settings;

#[path = "platform/mod.rs"]
pub mod platform;

#[path = "ledger/mod.rs"]
pub mod ledger;

#[path = "policy/mod.rs"]
pub mod policy;

#[path = "schedule/schedule_service.rs"]
pub mod schedule;

#[path = "resolver/reply_resolver.rs"]
pub mod resolver;

#[path = "enforcement/mod.rs"]
pub mod enforcement;

#[path = "scheduler/ingestion_scheduler.rs"]
pub mod scheduler;

#[path = "operator/mod.rs"]
pub mod operator;

#[path = "engine/engine_service.rs"]
pub mod engine;

#[cfg(test)]
#[path = "test_support.rs"]
pub mod test_support;
