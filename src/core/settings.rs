// Engine tuning shared by every shard component.
//
// Values come from the environment (see `config.rs`); `Default` holds the
// production numbers so tests can build settings without touching env vars.

use chrono::Duration;

/// Numeric knobs for the ingestion, admission and sweep passes.
#[derive(Debug, Clone)]
pub struct EngineSettings {
    /// Submissions younger than this are left alone so the author can tag them.
    pub min_age_secs: i64,
    /// Pending entries older than this are dropped without restoring.
    pub abandonment_secs: i64,
    pub min_fetch: usize,
    pub max_fetch: usize,
    /// Per-chunk pull on the very first cycle after a restart.
    pub cold_start_fetch: usize,
    /// Max communities the platform accepts in one combined listing.
    pub chunk_ceiling: usize,
    pub min_chunks: usize,
    pub calibration_interval_secs: i64,
    pub arrival_window_secs: i64,
    pub reference_feed: String,
    pub cycle_wait_secs: u64,
    pub maintenance_interval_cycles: u64,
    pub dedup_capacity: usize,
    pub journal_retention: usize,
    /// Fuzzy match acceptance, 0-100.
    pub similarity_threshold: f64,
    pub report_threshold: i64,
    pub mod_log_window: usize,
    pub integrity_denial_threshold: u32,
    pub query_reply_limit: usize,
    /// Error text fragments that mark a failure as transient noise.
    pub transient_signatures: Vec<String>,
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            min_age_secs: 300,
            abandonment_secs: 86_400,
            min_fetch: 25,
            max_fetch: 500,
            cold_start_fetch: 1000,
            chunk_ceiling: 250,
            min_chunks: 2,
            calibration_interval_secs: 86_400,
            arrival_window_secs: 900,
            reference_feed: "mod".to_string(),
            cycle_wait_secs: 30,
            maintenance_interval_cycles: 60,
            dedup_capacity: 10_000,
            journal_retention: 50_000,
            similarity_threshold: 85.0,
            report_threshold: 4,
            mod_log_window: 25,
            integrity_denial_threshold: 3,
            query_reply_limit: 10_000,
            transient_signatures: [
                "502",
                "503",
                "504",
                "500 Server Error",
                "timed out",
                "connection reset",
                "Connection refused",
                "RATELIMIT",
                "429",
            ]
            .iter()
            .map(|s| s.to_string())
            .collect(),
        }
    }
}

impl EngineSettings {
    pub fn min_age(&self) -> Duration {
        Duration::seconds(self.min_age_secs)
    }

    pub fn abandonment(&self) -> Duration {
        Duration::seconds(self.abandonment_secs)
    }

    /// Submissions older than this are never actioned by admission.
    pub fn staleness_ceiling(&self) -> Duration {
        Duration::seconds(self.abandonment_secs / 4)
    }

    /// Whether an error message matches the transient denylist.
    pub fn is_transient_text(&self, message: &str) -> bool {
        let lowered = message.to_lowercase();
        self.transient_signatures
            .iter()
            .any(|sig| lowered.contains(&sig.to_lowercase()))
    }
}
