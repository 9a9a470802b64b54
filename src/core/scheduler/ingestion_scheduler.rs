// Ingestion scheduler - decides what to fetch each cycle and how much.
//
// Communities are split into chunks under the combined-listing ceiling. The
// per-cycle fetch size is recalibrated once a day from the arrival rate of a
// high-traffic reference feed. A failed chunk is skipped and simply re-polled
// on the next cycle.

use crate::core::platform::{PlatformClient, Submission};
use crate::core::settings::EngineSettings;
use chrono::{DateTime, Duration, Utc};

/// Scheduler state carried between cycles. Nothing here survives a restart.
#[derive(Debug, Clone)]
pub struct SchedulerState {
    /// Completed cycles since start. Zero means cold start.
    pub cycle: u64,
    pub fetch_size: usize,
    pub last_calibrated: Option<DateTime<Utc>>,
}

impl SchedulerState {
    pub fn new(settings: &EngineSettings) -> Self {
        Self {
            cycle: 0,
            fetch_size: settings.min_fetch,
            last_calibrated: None,
        }
    }

    pub fn is_cold_start(&self) -> bool {
        self.cycle == 0
    }

    pub fn needs_calibration(&self, settings: &EngineSettings, now: DateTime<Utc>) -> bool {
        match self.last_calibrated {
            None => true,
            Some(at) => now - at >= Duration::seconds(settings.calibration_interval_secs),
        }
    }

    pub fn needs_maintenance(&self, settings: &EngineSettings) -> bool {
        let every = settings.maintenance_interval_cycles.max(1);
        self.cycle > 0 && self.cycle % every == 0
    }

    pub fn advance(&mut self) {
        self.cycle += 1;
    }
}

/// Split communities into listing chunks.
///
/// Under the ceiling everything goes in one chunk. At or above it the count
/// is `max(min_chunks, ceil(len / ceiling))` and communities are spread
/// evenly across chunks.
pub fn partition(communities: &[String], settings: &EngineSettings) -> Vec<Vec<String>> {
    if communities.is_empty() {
        return Vec::new();
    }
    let ceiling = settings.chunk_ceiling.max(1);
    if communities.len() < ceiling {
        return vec![communities.to_vec()];
    }

    let count = settings.min_chunks.max(communities.len().div_ceil(ceiling));
    let size = communities.len().div_ceil(count);
    communities.chunks(size).map(|c| c.to_vec()).collect()
}

/// New fetch size from a sample of the reference feed (any order).
///
/// Expected arrivals over the arrival window are doubled and clamped.
pub fn calibrate(sample: &[Submission], settings: &EngineSettings) -> usize {
    if sample.len() < 2 {
        return settings.min_fetch;
    }
    let newest = sample.iter().map(|s| s.created_utc).max();
    let oldest = sample.iter().map(|s| s.created_utc).min();
    let span = match (newest, oldest) {
        (Some(n), Some(o)) => (n - o).num_seconds(),
        _ => 0,
    };
    if span <= 0 {
        return settings.max_fetch;
    }

    let per_second = (sample.len() - 1) as f64 / span as f64;
    let expected = per_second * settings.arrival_window_secs as f64;
    let target = (expected * 2.0).ceil() as usize;
    // Bounds are validated at startup; min wins if they ever cross.
    target.min(settings.max_fetch).max(settings.min_fetch)
}

/// How many submissions to pull per chunk this cycle.
pub fn per_chunk_limit(state: &SchedulerState, chunk_count: usize, settings: &EngineSettings) -> usize {
    if state.is_cold_start() {
        return settings.cold_start_fetch;
    }
    (state.fetch_size / chunk_count.max(1)).max(1)
}

/// Sample the reference feed and update the fetch size.
pub async fn recalibrate<P: PlatformClient>(
    platform: &P,
    state: &mut SchedulerState,
    settings: &EngineSettings,
    now: DateTime<Utc>,
) {
    match platform
        .list_new(&[settings.reference_feed.clone()], 100)
        .await
    {
        Ok(sample) => {
            let previous = state.fetch_size;
            state.fetch_size = calibrate(&sample, settings);
            tracing::info!(
                previous,
                fetch_size = state.fetch_size,
                sample = sample.len(),
                "Calibrated fetch size"
            );
        }
        Err(err) => {
            tracing::warn!(error = %err, "Calibration sample failed; keeping fetch size");
        }
    }
    state.last_calibrated = Some(now);
}

/// Fetch every chunk. Failed chunks are logged and skipped.
pub async fn fetch_batch<P: PlatformClient>(
    platform: &P,
    communities: &[String],
    state: &SchedulerState,
    settings: &EngineSettings,
) -> Vec<Submission> {
    let chunks = partition(communities, settings);
    let limit = per_chunk_limit(state, chunks.len(), settings);
    let mut batch = Vec::new();

    for chunk in &chunks {
        match platform.list_new(chunk, limit).await {
            Ok(mut found) => batch.append(&mut found),
            Err(err) => {
                if err.is_transient() || settings.is_transient_text(&err.to_string()) {
                    tracing::warn!(communities = chunk.len(), error = %err, "Chunk fetch failed; retrying next cycle");
                } else {
                    tracing::error!(communities = chunk.len(), error = %err, "Chunk fetch failed");
                }
            }
        }
    }

    batch
}

// ============================================================================
// TESTS
// ============================================================================
