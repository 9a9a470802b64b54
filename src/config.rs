// Process configuration, read once at startup.
//
// `dotenv` is loaded in `main`; everything here reads plain environment
// variables. Numeric engine tuning uses `ENGINE_<FIELD>` overrides on top of
// `EngineSettings::default()`.

use crate::core::enforcement::ShardIdentity;
use crate::core::settings::EngineSettings;
use crate::infra::reddit::RedditCredentials;
use anyhow::{anyhow, Context};
use std::str::FromStr;

#[derive(Debug, Clone)]
pub struct BotConfig {
    pub credentials: RedditCredentials,
    pub identity: ShardIdentity,
    pub database_path: String,
    pub settings: EngineSettings,
}

impl BotConfig {
    pub fn from_env() -> anyhow::Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build from any key lookup so tests never touch the process environment.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> anyhow::Result<Self> {
        let required = |key: &str| {
            lookup(key)
                .filter(|v| !v.trim().is_empty())
                .ok_or_else(|| anyhow!("Missing {} environment variable", key))
        };

        let username = required("REDDIT_USERNAME")?;
        let credentials = RedditCredentials {
            client_id: required("REDDIT_CLIENT_ID")?,
            client_secret: required("REDDIT_CLIENT_SECRET")?,
            password: required("REDDIT_PASSWORD")?,
            user_agent: lookup("REDDIT_USER_AGENT")
                .unwrap_or_else(|| format!("flair_warden/0.1 (by u/{})", username)),
            username: username.clone(),
        };

        let instance: u32 = parse_or(&lookup, "SHARD_INSTANCE", 0)?;
        let mut identity = ShardIdentity::new(instance, &username);
        identity.siblings = lookup("SHARD_SIBLINGS")
            .map(|list| {
                list.split(',')
                    .map(|s| s.trim().to_lowercase())
                    .filter(|s| !s.is_empty() && !s.eq_ignore_ascii_case(&username))
                    .collect()
            })
            .unwrap_or_default();
        identity.accepting_invites = parse_or(&lookup, "SHARD_ACCEPTING_INVITES", true)?;
        identity.operator = lookup("OPERATOR_USERNAME").filter(|v| !v.trim().is_empty());

        let database_path = lookup("DATABASE_PATH")
            .unwrap_or_else(|| format!("data/flair_warden_{}.db", instance));

        Ok(Self {
            credentials,
            identity,
            database_path,
            settings: engine_settings(&lookup)?,
        })
    }
}

fn parse_or<T>(lookup: &impl Fn(&str) -> Option<String>, key: &str, default: T) -> anyhow::Result<T>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match lookup(key) {
        Some(raw) => raw
            .trim()
            .parse()
            .with_context(|| format!("{} has an invalid value: {:?}", key, raw)),
        None => Ok(default),
    }
}

/// Upper bound for every `*_SECS` knob: ten years.
const MAX_SECS: i64 = 10 * 365 * 86_400;

fn check_secs(key: &str, value: i64) -> anyhow::Result<i64> {
    if !(0..=MAX_SECS).contains(&value) {
        return Err(anyhow!(
            "{} must be between 0 and {} seconds, got {}",
            key,
            MAX_SECS,
            value
        ));
    }
    Ok(value)
}

fn check_at_least_one(key: &str, value: usize) -> anyhow::Result<()> {
    if value == 0 {
        return Err(anyhow!("{} must be at least 1", key));
    }
    Ok(())
}

fn engine_settings(lookup: &impl Fn(&str) -> Option<String>) -> anyhow::Result<EngineSettings> {
    let d = EngineSettings::default();
    let min_age_secs = check_secs(
        "ENGINE_MIN_AGE_SECS",
        parse_or(lookup, "ENGINE_MIN_AGE_SECS", d.min_age_secs)?,
    )?;

    let settings = EngineSettings {
        min_age_secs,
        abandonment_secs: parse_or(lookup, "ENGINE_ABANDONMENT_SECS", d.abandonment_secs)?,
        min_fetch: parse_or(lookup, "ENGINE_MIN_FETCH", d.min_fetch)?,
        max_fetch: parse_or(lookup, "ENGINE_MAX_FETCH", d.max_fetch)?,
        cold_start_fetch: parse_or(lookup, "ENGINE_COLD_START_FETCH", d.cold_start_fetch)?,
        chunk_ceiling: parse_or(lookup, "ENGINE_CHUNK_CEILING", d.chunk_ceiling)?,
        min_chunks: parse_or(lookup, "ENGINE_MIN_CHUNKS", d.min_chunks)?,
        calibration_interval_secs: parse_or(
            lookup,
            "ENGINE_CALIBRATION_INTERVAL_SECS",
            d.calibration_interval_secs,
        )?,
        arrival_window_secs: parse_or(lookup, "ENGINE_ARRIVAL_WINDOW_SECS", min_age_secs * 3)?,
        reference_feed: lookup("ENGINE_REFERENCE_FEED").unwrap_or(d.reference_feed),
        cycle_wait_secs: parse_or(lookup, "ENGINE_CYCLE_WAIT_SECS", d.cycle_wait_secs)?,
        maintenance_interval_cycles: parse_or(
            lookup,
            "ENGINE_MAINTENANCE_INTERVAL_CYCLES",
            d.maintenance_interval_cycles,
        )?,
        dedup_capacity: parse_or(lookup, "ENGINE_DEDUP_CAPACITY", d.dedup_capacity)?,
        journal_retention: parse_or(lookup, "ENGINE_JOURNAL_RETENTION", d.journal_retention)?,
        similarity_threshold: parse_or(
            lookup,
            "ENGINE_SIMILARITY_THRESHOLD",
            d.similarity_threshold,
        )?,
        report_threshold: parse_or(lookup, "ENGINE_REPORT_THRESHOLD", d.report_threshold)?,
        mod_log_window: parse_or(lookup, "ENGINE_MOD_LOG_WINDOW", d.mod_log_window)?,
        integrity_denial_threshold: parse_or(
            lookup,
            "ENGINE_INTEGRITY_DENIAL_THRESHOLD",
            d.integrity_denial_threshold,
        )?,
        query_reply_limit: parse_or(lookup, "ENGINE_QUERY_REPLY_LIMIT", d.query_reply_limit)?,
        transient_signatures: lookup("ENGINE_TRANSIENT_SIGNATURES")
            .map(|list| {
                list.split(',')
                    .map(|s| s.trim().to_string())
                    .filter(|s| !s.is_empty())
                    .collect()
            })
            .unwrap_or(d.transient_signatures),
    };
    validate_settings(&settings)?;
    Ok(settings)
}

/// Reject combinations the engine cannot run with.
fn validate_settings(settings: &EngineSettings) -> anyhow::Result<()> {
    check_secs("ENGINE_ABANDONMENT_SECS", settings.abandonment_secs)?;
    check_secs(
        "ENGINE_CALIBRATION_INTERVAL_SECS",
        settings.calibration_interval_secs,
    )?;
    check_secs("ENGINE_ARRIVAL_WINDOW_SECS", settings.arrival_window_secs)?;
    if settings.cycle_wait_secs > MAX_SECS as u64 {
        return Err(anyhow!(
            "ENGINE_CYCLE_WAIT_SECS must be at most {} seconds",
            MAX_SECS
        ));
    }

    check_at_least_one("ENGINE_MIN_FETCH", settings.min_fetch)?;
    if settings.min_fetch > settings.max_fetch {
        return Err(anyhow!(
            "ENGINE_MIN_FETCH ({}) must not exceed ENGINE_MAX_FETCH ({})",
            settings.min_fetch,
            settings.max_fetch
        ));
    }
    check_at_least_one("ENGINE_COLD_START_FETCH", settings.cold_start_fetch)?;
    check_at_least_one("ENGINE_CHUNK_CEILING", settings.chunk_ceiling)?;
    check_at_least_one("ENGINE_MIN_CHUNKS", settings.min_chunks)?;
    check_at_least_one("ENGINE_DEDUP_CAPACITY", settings.dedup_capacity)?;

    if !(0.0..=100.0).contains(&settings.similarity_threshold) {
        return Err(anyhow!(
            "ENGINE_SIMILARITY_THRESHOLD must be between 0 and 100, got {}",
            settings.similarity_threshold
        ));
    }
    Ok(())
}
