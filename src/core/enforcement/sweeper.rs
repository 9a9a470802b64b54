// Pending-queue sweeper.
//
// Every cycle: drop entries past the abandonment threshold, then look the rest
// up in ONE batched call and hand each one to the restoration path.

use super::context::{EngineContext, EngineError};
use super::restoration_service::{RestorationOutcome, RestorationService};
use crate::core::ledger::{actions, JournalRecord, Ledger};
use crate::core::platform::PlatformClient;
use chrono::{DateTime, Utc};
use std::sync::Arc;

#[derive(Debug, Default, Clone, PartialEq)]
pub struct SweepReport {
    pub abandoned: usize,
    pub restored: usize,
    pub disqualified: usize,
    pub waiting: usize,
    pub approval_denials: u32,
    pub approvals: u32,
}

pub struct PendingSweeper<L: Ledger, P: PlatformClient> {
    ctx: Arc<EngineContext<L, P>>,
    restoration: RestorationService<L, P>,
}

impl<L: Ledger, P: PlatformClient> PendingSweeper<L, P> {
    pub fn new(ctx: Arc<EngineContext<L, P>>) -> Self {
        Self {
            restoration: RestorationService::new(ctx.clone()),
            ctx,
        }
    }

    pub async fn sweep(&self, now: DateTime<Utc>) -> Result<SweepReport, EngineError> {
        let ctx = &self.ctx;
        let mut report = SweepReport::default();

        let mut live = Vec::new();
        for entry in ctx.ledger.list_pending().await? {
            if now - entry.created_utc > ctx.settings.abandonment() {
                ctx.ledger.remove_pending(&entry.submission_id).await?;
                ctx.ledger
                    .append_journal(&JournalRecord {
                        submission_id: entry.submission_id.clone(),
                        recorded_utc: now,
                        action: actions::ABANDONED.to_string(),
                    })
                    .await?;
                tracing::info!(submission = %entry.submission_id, "Abandoned pending post");
                report.abandoned += 1;
            } else {
                live.push(entry.submission_id);
            }
        }

        if live.is_empty() {
            return Ok(report);
        }

        let submissions = ctx.platform.get_by_ids(&live).await?;
        for submission in submissions {
            match self.restoration.restore(&submission, now).await {
                Ok(RestorationOutcome::Restored { .. }) => {
                    report.restored += 1;
                    report.approvals += 1;
                }
                Ok(RestorationOutcome::Acknowledged) => report.restored += 1,
                Ok(RestorationOutcome::Disqualified(_)) => report.disqualified += 1,
                Ok(RestorationOutcome::ApprovalDenied) => {
                    report.approval_denials += 1;
                    report.waiting += 1;
                }
                Ok(RestorationOutcome::AwaitingCategory | RestorationOutcome::NoPermission) => {
                    report.waiting += 1
                }
                Err(err) => {
                    report.waiting += 1;
                    if err.is_transient(&ctx.settings) {
                        tracing::warn!(submission = %submission.id, error = %err, "Restoration deferred");
                    } else {
                        tracing::error!(submission = %submission.id, error = %err, "Restoration failed");
                    }
                }
            }
        }

        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::enforcement::AdmissionService;
    use crate::core::ledger::{CommunityRecord, PendingEntry};
    use crate::core::test_support::*;
    use chrono::Duration;

    #[tokio::test]
    async fn test_entry_older_than_a_day_is_dropped_without_approval() {
        let platform = MockPlatform::new().with_community("pics", &["posts", "flair"], discussion_and_help());
        let mut post = submission("p1", "pics", "alice", minutes_ago(10));
        post.flair_text = Some("Help".to_string());
        platform.add_submission(post.clone());
        let ctx = context(platform);
        ctx.ledger
            .add_pending(&PendingEntry {
                submission_id: "p1".to_string(),
                created_utc: post.created_utc,
            })
            .await
            .unwrap();
        let sweeper = PendingSweeper::new(ctx.clone());

        let report = sweeper
            .sweep(base_time() + Duration::hours(25))
            .await
            .unwrap();

        assert_eq!(report.abandoned, 1);
        assert!(ctx.ledger.list_pending().await.unwrap().is_empty());
        assert!(ctx.platform.calls().is_empty());
    }

    #[tokio::test]
    async fn test_sweep_uses_one_batched_lookup() {
        let platform = MockPlatform::new().with_community("pics", &["posts"], discussion_and_help());
        let ctx = context(platform);
        ctx.ledger
            .upsert_community(&CommunityRecord::new("pics", true, 0, base_time()))
            .await
            .unwrap();
        for i in 0..5 {
            let id = format!("p{i}");
            let post = submission(&id, "pics", "alice", minutes_ago(20 + i));
            ctx.platform.add_submission(post.clone());
            ctx.ledger
                .add_pending(&PendingEntry {
                    submission_id: id,
                    created_utc: post.created_utc,
                })
                .await
                .unwrap();
        }

        let report = PendingSweeper::new(ctx.clone()).sweep(base_time()).await.unwrap();

        assert_eq!(report.waiting, 5);
        assert_eq!(ctx.platform.count(|c| matches!(c, Call::GetByIds(_))), 1);
    }

    // Strict community, 10-minute-old post, no reply for 25 hours.
    #[tokio::test]
    async fn test_unanswered_reminder_is_abandoned_silently() {
        let platform = MockPlatform::new().with_community("pics", &["posts", "flair"], discussion_and_help());
        let post = submission("p1", "pics", "alice", minutes_ago(10));
        platform.add_submission(post.clone());
        let ctx = context(platform);
        ctx.ledger
            .upsert_community(&CommunityRecord::new("pics", true, 0, base_time()))
            .await
            .unwrap();

        AdmissionService::new(ctx.clone())
            .evaluate(&post, base_time())
            .await
            .unwrap();
        assert_eq!(ctx.platform.messages_to("alice").len(), 1);

        let report = PendingSweeper::new(ctx.clone())
            .sweep(base_time() + Duration::hours(25))
            .await
            .unwrap();

        assert_eq!(report.abandoned, 1);
        assert!(ctx.ledger.get_pending("p1").await.unwrap().is_none());
        assert_eq!(ctx.platform.count(|c| matches!(c, Call::Approve(_))), 0);
        assert_eq!(ctx.platform.messages_to("alice").len(), 1);
    }
}
