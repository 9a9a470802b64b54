// Entry point for one Flair Warden shard.
//
// **Architecture Overview:**
// - `core/` = Business logic (platform-agnostic ports, models and services)
// - `infra/` = Implementations of core traits (SQLite ledger, Reddit API)
// - `messaging/` = Inbox front-end that turns mail into core calls
//
// This file's job is to:
// 1. Load configuration
// 2. Initialize services (dependency injection)
// 3. Run the engine loop until the process is stopped

// These attrs point each module declaration at a more descriptive root file
// so we don't end up with several mod.rs files that all look the same.
#[path = "core/core_layer.rs"]
mod core;
#[path = "infra/infra_layer.rs"]
mod infra;
#[path = "messaging/messaging_layer.rs"]
mod messaging;

mod config;

use crate::config::BotConfig;
use crate::core::engine::EngineService;
use crate::core::enforcement::EngineContext;
use crate::infra::ledger::SqliteLedger;
use crate::infra::reddit::RedditClient;
use crate::messaging::InboxDispatcher;
use anyhow::Context;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load environment variables from .env file (if it exists)
    dotenv::dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let config = BotConfig::from_env().context("Failed to load configuration")?;

    // ========================================================================
    // DEPENDENCY INJECTION
    // ========================================================================
    // One context per shard: ledger handle, platform session, tuning and
    // identity. Every service gets it through an Arc.

    let ledger = SqliteLedger::new(&config.database_path, config.settings.dedup_capacity)
        .await
        .with_context(|| format!("Failed to open ledger at {}", config.database_path))?;

    let platform =
        RedditClient::new(config.credentials.clone()).context("Failed to create Reddit client")?;

    tracing::info!(
        instance = config.identity.instance,
        username = %config.identity.username,
        siblings = config.identity.siblings.len(),
        database = %config.database_path,
        "Starting Flair Warden shard"
    );

    let ctx = Arc::new(EngineContext::new(
        ledger,
        platform,
        config.settings,
        config.identity,
    ));

    let inbox = InboxDispatcher::new(ctx.clone());
    let engine = EngineService::new(ctx, inbox);

    tokio::select! {
        _ = engine.run_forever() => {}
        _ = tokio::signal::ctrl_c() => {
            tracing::info!("Shutdown requested; stopping after the current step");
        }
    }

    Ok(())
}
