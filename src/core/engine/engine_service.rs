// Shard engine - the cooperative cycle loop.
//
// One cycle: inbox pass, calibration and integrity check (daily), ingestion
// and admission, pending sweep, maintenance (every N cycles). Errors from a
// cycle are logged and the loop sleeps and tries again. All state that must
// survive a restart lives in the ledger.

use crate::core::enforcement::{
    notices, AdmissionService, EngineContext, EngineError, PendingSweeper, SweepReport,
};
use crate::core::ledger::Ledger;
use crate::core::platform::PlatformClient;
use crate::core::scheduler::{fetch_batch, recalibrate, SchedulerState};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::sync::Arc;
use std::time::Duration as StdDuration;
use tokio::time::sleep;

// ============================================================================
// INBOX PORT
// ============================================================================

/// The messaging front-end, run at the start of every cycle.
#[async_trait]
pub trait InboxPass: Send + Sync {
    /// Handle unread messages. Returns how many were processed.
    async fn process_inbox(&self, now: DateTime<Utc>) -> Result<usize, EngineError>;
}

// ============================================================================
// INTEGRITY SENTINEL
// ============================================================================

/// Counts refused approvals and raises a single alert per streak.
#[derive(Debug, Default)]
pub struct IntegrityMonitor {
    denials: u32,
    alerted: bool,
}

impl IntegrityMonitor {
    /// Feed one sweep's results. Returns the streak length when an alert is due.
    pub fn observe(&mut self, report: &SweepReport, threshold: u32) -> Option<u32> {
        if report.approvals > 0 {
            self.denials = 0;
            self.alerted = false;
        }
        self.denials += report.approval_denials;
        if self.denials >= threshold.max(1) && !self.alerted {
            self.alerted = true;
            return Some(self.denials);
        }
        None
    }
}

// ============================================================================
// CYCLE
// ============================================================================

#[derive(Debug, Default)]
pub struct CycleReport {
    pub messages: usize,
    pub fetched: usize,
    pub admitted: usize,
    pub admission_failures: usize,
    pub sweep: SweepReport,
    pub trimmed: u64,
}

pub struct EngineService<L: Ledger, P: PlatformClient, I: InboxPass> {
    ctx: Arc<EngineContext<L, P>>,
    inbox: I,
    admission: AdmissionService<L, P>,
    sweeper: PendingSweeper<L, P>,
    state: SchedulerState,
    integrity: IntegrityMonitor,
}

impl<L: Ledger, P: PlatformClient, I: InboxPass> EngineService<L, P, I> {
    pub fn new(ctx: Arc<EngineContext<L, P>>, inbox: I) -> Self {
        Self {
            admission: AdmissionService::new(ctx.clone()),
            sweeper: PendingSweeper::new(ctx.clone()),
            state: SchedulerState::new(&ctx.settings),
            integrity: IntegrityMonitor::default(),
            inbox,
            ctx,
        }
    }

    pub fn state(&self) -> &SchedulerState {
        &self.state
    }

    pub async fn run_cycle(&mut self, now: DateTime<Utc>) -> Result<CycleReport, EngineError> {
        let ctx = self.ctx.clone();
        let settings = &ctx.settings;
        let mut report = CycleReport::default();

        report.messages = self.inbox.process_inbox(now).await?;

        if self.state.needs_calibration(settings, now) {
            recalibrate(&ctx.platform, &mut self.state, settings, now).await;
            self.check_integrity().await?;
        }

        let communities = ctx.ledger.enforced_communities().await?;
        let batch = fetch_batch(&ctx.platform, &communities, &self.state, settings).await;
        self.state.advance();
        report.fetched = batch.len();

        let admission = self.admission.process_batch(batch, now).await;
        report.admitted = admission.outcomes.len();
        report.admission_failures = admission.failures;

        report.sweep = self.sweeper.sweep(now).await?;
        if let Some(denials) = self
            .integrity
            .observe(&report.sweep, settings.integrity_denial_threshold)
        {
            self.raise_integrity_alert(denials).await;
        }

        if self.state.needs_maintenance(settings) {
            report.trimmed = ctx.ledger.trim_journal(settings.journal_retention).await?;
            tracing::info!(trimmed = report.trimmed, "Journal maintenance done");
        }

        Ok(report)
    }

    /// Disable enforcement where a community no longer has any templates.
    async fn check_integrity(&self) -> Result<(), EngineError> {
        let ctx = &self.ctx;
        for community in ctx.ledger.list_communities().await? {
            if !community.enforced {
                continue;
            }
            match ctx.platform.list_category_templates(&community.name).await {
                Ok(templates) if templates.is_empty() => {
                    ctx.ledger.set_enforced(&community.name, false).await?;
                    tracing::warn!(community = %community.name, "No flair templates left; enforcement disabled");
                }
                Ok(_) => {}
                Err(err) => {
                    tracing::warn!(community = %community.name, error = %err, "Integrity check skipped");
                }
            }
        }
        Ok(())
    }

    async fn raise_integrity_alert(&self, denials: u32) {
        let ctx = &self.ctx;
        let Some(operator) = ctx.identity.operator.as_deref() else {
            tracing::error!(denials, "Approvals keep failing and no operator is configured");
            return;
        };
        let notice = notices::integrity_alert(&ctx.identity.username, denials);
        match ctx
            .platform
            .send_message(operator, &notice.subject, &notice.body)
            .await
        {
            Ok(()) => tracing::error!(denials, operator = %operator, "Integrity alert sent"),
            Err(err) => tracing::error!(denials, error = %err, "Failed to send integrity alert"),
        }
    }

    /// Run cycles until the process is stopped.
    pub async fn run_forever(mut self) {
        let wait = StdDuration::from_secs(self.ctx.settings.cycle_wait_secs);
        loop {
            let cycle = self.state.cycle;
            match self.run_cycle(Utc::now()).await {
                Ok(report) => tracing::debug!(
                    cycle,
                    messages = report.messages,
                    fetched = report.fetched,
                    admitted = report.admitted,
                    restored = report.sweep.restored,
                    pending = report.sweep.waiting,
                    "Cycle complete"
                ),
                Err(err) if err.is_transient(&self.ctx.settings) => {
                    tracing::warn!(cycle, error = %err, "Cycle interrupted by a transient error")
                }
                Err(err) => tracing::error!(cycle, error = %err, "Cycle failed"),
            }
            sleep(wait).await;
        }
    }
}

// ============================================================================
// TESTS
// ============================================================================
