// Admission engine - the per-submission state machine.
//
// Unseen -> Seen&Flaired (terminal)
//        -> Seen&Unflaired -> Reminded | Removed-Pending
//
// Removed-Pending entries are resolved later by the sweeper (Restored or
// Abandoned). A submission is only marked seen once every platform read has
// succeeded and right before its first mutation lands, so a failed read or a
// failed removal leaves it unseen for the next cycle.

use super::context::{EngineContext, EngineError};
use super::notices;
use crate::core::ledger::{actions, CommunityRecord, Ledger, PendingEntry};
use crate::core::platform::{PlatformClient, Submission};
use crate::core::schedule::check_schedule;
use chrono::{DateTime, Utc};
use std::sync::Arc;

#[derive(Debug, Clone, PartialEq)]
pub enum SkipReason {
    CommunityNotEnforced,
    AlreadySeen,
    AuthorUnresolvable,
    TooYoung,
    TooOld,
    AutomatedAuthor,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Exemption {
    Moderator,
    Whitelisted,
}

#[derive(Debug, Clone, PartialEq)]
pub enum AdmissionOutcome {
    Skipped(SkipReason),
    /// Already categorized and allowed today.
    Flaired,
    /// Categorized with a flair that is not allowed today; removed.
    ScheduleRejected,
    /// The bot lacks moderator rights; marked seen and left alone.
    NoPermission,
    Exempt(Exemption),
    /// Default mode: reminder only.
    Reminded { notified: bool },
    /// Strict mode: removed and queued for restoration.
    RemovedPending { notified: bool },
}

#[derive(Debug, Default)]
pub struct AdmissionReport {
    pub outcomes: Vec<(String, AdmissionOutcome)>,
    pub failures: usize,
}

impl AdmissionReport {
    pub fn count(&self, predicate: impl Fn(&AdmissionOutcome) -> bool) -> usize {
        self.outcomes.iter().filter(|(_, o)| predicate(o)).count()
    }
}

pub struct AdmissionService<L: Ledger, P: PlatformClient> {
    ctx: Arc<EngineContext<L, P>>,
}

impl<L: Ledger, P: PlatformClient> AdmissionService<L, P> {
    pub fn new(ctx: Arc<EngineContext<L, P>>) -> Self {
        Self { ctx }
    }

    /// Evaluate a fetch batch oldest-first. A failing submission is logged and
    /// the rest of the batch still runs.
    pub async fn process_batch(
        &self,
        mut batch: Vec<Submission>,
        now: DateTime<Utc>,
    ) -> AdmissionReport {
        batch.sort_by(|a, b| {
            a.created_utc
                .cmp(&b.created_utc)
                .then_with(|| a.id.cmp(&b.id))
        });

        let mut report = AdmissionReport::default();
        for submission in batch {
            match self.evaluate(&submission, now).await {
                Ok(outcome) => report.outcomes.push((submission.id.clone(), outcome)),
                Err(err) => {
                    report.failures += 1;
                    if err.is_transient(&self.ctx.settings) {
                        tracing::warn!(submission = %submission.id, error = %err, "Admission deferred");
                    } else {
                        tracing::error!(
                            submission = %submission.id,
                            community = %submission.community,
                            error = %err,
                            "Admission failed"
                        );
                    }
                }
            }
        }
        report
    }

    pub async fn evaluate(
        &self,
        submission: &Submission,
        now: DateTime<Utc>,
    ) -> Result<AdmissionOutcome, EngineError> {
        let ctx = &self.ctx;

        let record = match ctx.ledger.get_community(&submission.community).await? {
            Some(record) if record.enforced => record,
            _ => return Ok(AdmissionOutcome::Skipped(SkipReason::CommunityNotEnforced)),
        };
        if ctx.ledger.is_seen(&submission.id).await? {
            return Ok(AdmissionOutcome::Skipped(SkipReason::AlreadySeen));
        }

        let age = submission.age(now);
        if age < ctx.settings.min_age() {
            return Ok(AdmissionOutcome::Skipped(SkipReason::TooYoung));
        }
        if age > ctx.settings.staleness_ceiling() {
            return Ok(AdmissionOutcome::Skipped(SkipReason::TooOld));
        }
        let Some(author) = submission.author.as_deref() else {
            return Ok(AdmissionOutcome::Skipped(SkipReason::AuthorUnresolvable));
        };

        if ctx.identity.is_automated_account(author) {
            self.admit(submission, &record, now).await?;
            ctx.record_action(&submission.id, &record.name, actions::SKIPPED_SELF, now)
                .await?;
            return Ok(AdmissionOutcome::Skipped(SkipReason::AutomatedAuthor));
        }

        if submission.is_categorized() {
            self.check_categorized(submission, &record, now).await
        } else {
            self.enforce_uncategorized(submission, author, &record, now)
                .await
        }
    }

    /// Enter the submission into the dedup ledger and journal the fetch.
    async fn admit(
        &self,
        submission: &Submission,
        record: &CommunityRecord,
        now: DateTime<Utc>,
    ) -> Result<(), EngineError> {
        self.ctx.ledger.mark_seen(&submission.id).await?;
        self.ctx
            .record_action(&submission.id, &record.name, actions::FETCHED, now)
            .await?;
        Ok(())
    }

    async fn check_categorized(
        &self,
        submission: &Submission,
        record: &CommunityRecord,
        now: DateTime<Utc>,
    ) -> Result<AdmissionOutcome, EngineError> {
        let ctx = &self.ctx;
        let (Some(schedule), Some(template_id)) = (
            record.policy.schedule(),
            submission.flair_template_id.as_deref(),
        ) else {
            self.admit(submission, record, now).await?;
            return Ok(AdmissionOutcome::Flaired);
        };

        let verdict = check_schedule(template_id, schedule, now);
        if verdict.allowed {
            self.admit(submission, record, now).await?;
            return Ok(AdmissionOutcome::Flaired);
        }

        let permissions = ctx.platform.get_permissions(&record.name).await?;
        if !permissions.can_remove() {
            self.admit(submission, record, now).await?;
            return Ok(AdmissionOutcome::Flaired);
        }

        ctx.platform.remove(submission).await?;
        self.admit(submission, record, now).await?;
        ctx.record_action(&submission.id, &record.name, actions::REMOVED_UNSCHEDULED, now)
            .await?;
        tracing::info!(
            community = %record.name,
            submission = %submission.id,
            allowed = %verdict.permitted_days_label(),
            "Removed unscheduled post"
        );

        if let Some(author) = submission.author.as_deref() {
            let flair = submission.flair_text.as_deref().unwrap_or(template_id);
            let notice = notices::schedule_rejection(submission, flair, &verdict, &record.policy);
            if let Err(err) = ctx
                .platform
                .send_message(author, &notice.subject, &notice.body)
                .await
            {
                tracing::warn!(user = %author, error = %err, "Failed to send schedule notice");
            }
        }
        Ok(AdmissionOutcome::ScheduleRejected)
    }

    async fn enforce_uncategorized(
        &self,
        submission: &Submission,
        author: &str,
        record: &CommunityRecord,
        now: DateTime<Utc>,
    ) -> Result<AdmissionOutcome, EngineError> {
        let ctx = &self.ctx;
        let policy = &record.policy;

        let permissions = ctx.platform.get_permissions(&record.name).await?;
        if !permissions.is_moderator {
            self.admit(submission, record, now).await?;
            tracing::info!(community = %record.name, "Not a moderator, leaving post alone");
            return Ok(AdmissionOutcome::NoPermission);
        }

        if !policy.enforce_moderators() {
            let moderators = ctx.platform.list_moderators(&record.name).await?;
            if moderators.iter().any(|m| m.eq_ignore_ascii_case(author)) {
                self.admit(submission, record, now).await?;
                ctx.record_action(&submission.id, &record.name, actions::SKIPPED_MOD, now)
                    .await?;
                return Ok(AdmissionOutcome::Exempt(Exemption::Moderator));
            }
        }
        if policy.is_whitelisted(author) {
            self.admit(submission, record, now).await?;
            ctx.record_action(&submission.id, &record.name, actions::SKIPPED_WHITELIST, now)
                .await?;
            return Ok(AdmissionOutcome::Exempt(Exemption::Whitelisted));
        }

        let templates = ctx.platform.list_category_templates(&record.name).await?;
        let strict = permissions.can_remove();

        if strict {
            ctx.ledger
                .add_pending(&PendingEntry {
                    submission_id: submission.id.clone(),
                    created_utc: submission.created_utc,
                })
                .await?;
            if let Err(err) = ctx.platform.remove(submission).await {
                ctx.ledger.remove_pending(&submission.id).await?;
                return Err(err.into());
            }
            self.admit(submission, record, now).await?;
            ctx.record_action(&submission.id, &record.name, actions::REMOVED, now)
                .await?;
            tracing::info!(community = %record.name, submission = %submission.id, "Removed post");
            self.alert_moderators(submission, record).await;
        } else {
            self.admit(submission, record, now).await?;
            ctx.record_action(&submission.id, &record.name, actions::REMINDED, now)
                .await?;
        }

        let notified = if templates.is_empty() {
            false
        } else {
            let notice = notices::reminder(
                submission,
                &templates,
                policy,
                strict,
                permissions.can_flair(),
            );
            match ctx
                .platform
                .send_message(author, &notice.subject, &notice.body)
                .await
            {
                Ok(()) => true,
                Err(err) => {
                    tracing::warn!(user = %author, error = %err, "Failed to send flair reminder");
                    false
                }
            }
        };

        Ok(if strict {
            AdmissionOutcome::RemovedPending { notified }
        } else {
            AdmissionOutcome::Reminded { notified }
        })
    }

    /// Notify alert-list users, but only those who still moderate the community.
    async fn alert_moderators(&self, submission: &Submission, record: &CommunityRecord) {
        let alert_list = record.policy.alert_list();
        if alert_list.is_empty() {
            return;
        }
        let moderators = match self.ctx.platform.list_moderators(&record.name).await {
            Ok(moderators) => moderators,
            Err(err) => {
                tracing::warn!(community = %record.name, error = %err, "Could not load moderators for alert");
                return;
            }
        };

        let notice = notices::removal_alert(submission);
        for user in alert_list {
            if !moderators.iter().any(|m| m.eq_ignore_ascii_case(user)) {
                continue;
            }
            if let Err(err) = self
                .ctx
                .platform
                .send_message(user, &notice.subject, &notice.body)
                .await
            {
                tracing::warn!(user = %user, error = %err, "Failed to send removal alert");
            }
        }
    }
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::test_support::*;
    use chrono::Duration;
    use std::collections::BTreeMap;
    use std::sync::atomic::Ordering;

    async fn enforce(ctx: &EngineContext<crate::infra::ledger::InMemoryLedger, MockPlatform>, name: &str) {
        ctx.ledger
            .upsert_community(&CommunityRecord::new(name, true, 0, base_time()))
            .await
            .unwrap();
    }

    fn strict_platform() -> MockPlatform {
        MockPlatform::new().with_community("pics", &["posts", "flair"], discussion_and_help())
    }

    #[tokio::test]
    async fn test_strict_mode_removes_queues_and_reminds() {
        let platform = strict_platform();
        let post = submission("p1", "pics", "alice", minutes_ago(10));
        let ctx = context(platform);
        enforce(&ctx, "pics").await;
        let admission = AdmissionService::new(ctx.clone());

        let outcome = admission.evaluate(&post, base_time()).await.unwrap();

        assert_eq!(outcome, AdmissionOutcome::RemovedPending { notified: true });
        assert!(ctx.ledger.get_pending("p1").await.unwrap().is_some());
        assert_eq!(ctx.platform.count(|c| *c == Call::Remove("p1".to_string())), 1);
        let messages = ctx.platform.messages_to("alice");
        assert_eq!(messages.len(), 1);
        assert!(messages[0].0.contains(notices::REMINDER_SUBJECT_MARKER));
        assert!(messages[0].1.contains("automatically restored"));

        let counts = ctx.ledger.action_counts("pics").await.unwrap();
        assert_eq!(counts.get(actions::REMOVED), Some(&1));
    }

    #[tokio::test]
    async fn test_reevaluating_seen_submission_is_a_no_op() {
        let ctx = context(strict_platform());
        enforce(&ctx, "pics").await;
        let admission = AdmissionService::new(ctx.clone());
        let post = submission("p1", "pics", "alice", minutes_ago(10));

        admission.evaluate(&post, base_time()).await.unwrap();
        let again = admission
            .evaluate(&post, base_time() + Duration::minutes(1))
            .await
            .unwrap();

        assert_eq!(again, AdmissionOutcome::Skipped(SkipReason::AlreadySeen));
        assert_eq!(ctx.platform.count(|c| matches!(c, Call::Remove(_))), 1);
        assert_eq!(ctx.platform.messages_to("alice").len(), 1);
    }

    #[tokio::test]
    async fn test_grace_period_defers_until_elapsed() {
        let ctx = context(strict_platform());
        enforce(&ctx, "pics").await;
        let admission = AdmissionService::new(ctx.clone());
        let post = submission("p1", "pics", "alice", minutes_ago(4));

        let early = admission.evaluate(&post, base_time()).await.unwrap();
        assert_eq!(early, AdmissionOutcome::Skipped(SkipReason::TooYoung));
        assert!(!ctx.ledger.is_seen("p1").await.unwrap());
        assert!(ctx.platform.calls().is_empty());

        let later = admission
            .evaluate(&post, base_time() + Duration::minutes(2))
            .await
            .unwrap();
        assert_eq!(later, AdmissionOutcome::RemovedPending { notified: true });
    }

    #[tokio::test]
    async fn test_stale_submission_is_never_actioned() {
        let ctx = context(strict_platform());
        enforce(&ctx, "pics").await;
        let admission = AdmissionService::new(ctx.clone());
        let post = submission("p1", "pics", "alice", base_time() - Duration::hours(7));

        let outcome = admission.evaluate(&post, base_time()).await.unwrap();
        assert_eq!(outcome, AdmissionOutcome::Skipped(SkipReason::TooOld));
        assert!(ctx.platform.calls().is_empty());
        assert!(ctx.ledger.get_pending("p1").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_default_mode_only_reminds() {
        let platform = MockPlatform::new().with_community("pics", &["flair"], discussion_and_help());
        let ctx = context(platform);
        enforce(&ctx, "pics").await;
        let admission = AdmissionService::new(ctx.clone());

        let outcome = admission
            .evaluate(&submission("p1", "pics", "alice", minutes_ago(10)), base_time())
            .await
            .unwrap();

        assert_eq!(outcome, AdmissionOutcome::Reminded { notified: true });
        assert!(ctx.ledger.get_pending("p1").await.unwrap().is_none());
        assert_eq!(ctx.platform.count(|c| matches!(c, Call::Remove(_))), 0);
        assert!(!ctx.platform.messages_to("alice")[0].1.contains("removed"));
    }

    #[tokio::test]
    async fn test_missing_permission_marks_seen_without_action() {
        let platform = MockPlatform::new();
        platform
            .templates
            .insert("pics".to_string(), discussion_and_help());
        let ctx = context(platform);
        enforce(&ctx, "pics").await;
        let admission = AdmissionService::new(ctx.clone());

        let outcome = admission
            .evaluate(&submission("p1", "pics", "alice", minutes_ago(10)), base_time())
            .await
            .unwrap();

        assert_eq!(outcome, AdmissionOutcome::NoPermission);
        assert!(ctx.ledger.is_seen("p1").await.unwrap());
        assert!(ctx.platform.messages_to("alice").is_empty());
    }

    #[tokio::test]
    async fn test_moderator_exemption_can_be_overridden() {
        let platform = strict_platform();
        platform
            .moderators
            .insert("pics".to_string(), vec![BOT.to_string(), "ModMary".to_string()]);
        let ctx = context(platform);
        enforce(&ctx, "pics").await;
        let admission = AdmissionService::new(ctx.clone());

        let outcome = admission
            .evaluate(&submission("p1", "pics", "modmary", minutes_ago(10)), base_time())
            .await
            .unwrap();
        assert_eq!(outcome, AdmissionOutcome::Exempt(Exemption::Moderator));

        let mut record = ctx.ledger.get_community("pics").await.unwrap().unwrap();
        record.policy.enforce_moderators = Some(true);
        ctx.ledger.upsert_community(&record).await.unwrap();

        let outcome = admission
            .evaluate(&submission("p2", "pics", "modmary", minutes_ago(10)), base_time())
            .await
            .unwrap();
        assert_eq!(outcome, AdmissionOutcome::RemovedPending { notified: true });
    }

    #[tokio::test]
    async fn test_whitelisted_author_is_exempt() {
        let ctx = context(strict_platform());
        let mut record = CommunityRecord::new("pics", true, 0, base_time());
        record.policy.whitelist = Some(vec!["trusted".to_string()]);
        ctx.ledger.upsert_community(&record).await.unwrap();
        let admission = AdmissionService::new(ctx.clone());

        let outcome = admission
            .evaluate(&submission("p1", "pics", "Trusted", minutes_ago(10)), base_time())
            .await
            .unwrap();
        assert_eq!(outcome, AdmissionOutcome::Exempt(Exemption::Whitelisted));
        assert!(ctx.platform.calls().is_empty());
    }

    #[tokio::test]
    async fn test_no_templates_removes_without_reminder() {
        let platform = MockPlatform::new().with_community("pics", &["all"], Vec::new());
        let ctx = context(platform);
        enforce(&ctx, "pics").await;
        let admission = AdmissionService::new(ctx.clone());

        let outcome = admission
            .evaluate(&submission("p1", "pics", "alice", minutes_ago(10)), base_time())
            .await
            .unwrap();
        assert_eq!(outcome, AdmissionOutcome::RemovedPending { notified: false });
        assert!(ctx.platform.messages_to("alice").is_empty());
    }

    #[tokio::test]
    async fn test_alert_list_only_reaches_current_moderators() {
        let platform = strict_platform();
        platform
            .moderators
            .insert("pics".to_string(), vec![BOT.to_string(), "modmary".to_string()]);
        let ctx = context(platform);
        let mut record = CommunityRecord::new("pics", true, 0, base_time());
        record.policy.alert_list = Some(vec!["modmary".to_string(), "formermod".to_string()]);
        ctx.ledger.upsert_community(&record).await.unwrap();
        let admission = AdmissionService::new(ctx.clone());

        admission
            .evaluate(&submission("p1", "pics", "alice", minutes_ago(10)), base_time())
            .await
            .unwrap();

        assert_eq!(ctx.platform.messages_to("modmary").len(), 1);
        assert!(ctx.platform.messages_to("formermod").is_empty());
    }

    #[tokio::test]
    async fn test_scheduled_flair_rejected_on_wrong_day() {
        let ctx = context(strict_platform());
        let mut record = CommunityRecord::new("pics", true, 0, base_time());
        let mut schedule = BTreeMap::new();
        schedule.insert("Mon".to_string(), vec![HELP_ID.to_string()]);
        schedule.insert("Wed".to_string(), vec![HELP_ID.to_string()]);
        record.policy.flair_schedule = Some(schedule);
        ctx.ledger.upsert_community(&record).await.unwrap();
        let admission = AdmissionService::new(ctx.clone());

        let flaired = |id: &str, created| {
            let mut post = submission(id, "pics", "alice", created);
            post.flair_text = Some("Help".to_string());
            post.flair_template_id = Some(HELP_ID.to_string());
            post
        };

        // Monday: allowed.
        let monday = admission
            .evaluate(&flaired("p1", minutes_ago(10)), base_time())
            .await
            .unwrap();
        assert_eq!(monday, AdmissionOutcome::Flaired);

        // Tuesday: removed with a notice listing the allowed days.
        let tuesday = base_time() + Duration::days(1);
        let outcome = admission
            .evaluate(&flaired("p2", tuesday - Duration::minutes(10)), tuesday)
            .await
            .unwrap();
        assert_eq!(outcome, AdmissionOutcome::ScheduleRejected);
        assert_eq!(ctx.platform.count(|c| *c == Call::Remove("p2".to_string())), 1);
        let messages = ctx.platform.messages_to("alice");
        assert_eq!(messages.len(), 1);
        assert!(messages[0].1.contains("Mon, Wed"));
    }

    #[tokio::test]
    async fn test_automated_authors_and_unenforced_communities_are_skipped() {
        let ctx = context(strict_platform());
        enforce(&ctx, "pics").await;
        let admission = AdmissionService::new(ctx.clone());

        let outcome = admission
            .evaluate(&submission("p1", "pics", "AutoModerator", minutes_ago(10)), base_time())
            .await
            .unwrap();
        assert_eq!(outcome, AdmissionOutcome::Skipped(SkipReason::AutomatedAuthor));

        let outcome = admission
            .evaluate(&submission("p2", "other", "alice", minutes_ago(10)), base_time())
            .await
            .unwrap();
        assert_eq!(outcome, AdmissionOutcome::Skipped(SkipReason::CommunityNotEnforced));
        assert!(ctx.platform.calls().is_empty());
    }

    #[tokio::test]
    async fn test_batch_is_processed_oldest_first() {
        let ctx = context(strict_platform());
        enforce(&ctx, "pics").await;
        let admission = AdmissionService::new(ctx.clone());

        let batch = vec![
            submission("newer", "pics", "alice", minutes_ago(10)),
            submission("older", "pics", "bob", minutes_ago(30)),
        ];
        let report = admission.process_batch(batch, base_time()).await;

        let order: Vec<&str> = report.outcomes.iter().map(|(id, _)| id.as_str()).collect();
        assert_eq!(order, vec!["older", "newer"]);
        assert_eq!(report.failures, 0);
        assert_eq!(
            report.count(|o| matches!(o, AdmissionOutcome::RemovedPending { .. })),
            2
        );
    }

    #[tokio::test]
    async fn test_permission_outage_leaves_submission_for_next_cycle() {
        let platform = strict_platform();
        platform.permission_outages.store(1, Ordering::SeqCst);
        let ctx = context(platform);
        enforce(&ctx, "pics").await;
        let admission = AdmissionService::new(ctx.clone());
        let post = submission("p1", "pics", "alice", minutes_ago(10));

        let err = admission.evaluate(&post, base_time()).await.unwrap_err();
        assert!(err.is_transient(&ctx.settings));
        assert!(!ctx.ledger.is_seen("p1").await.unwrap());
        assert!(ctx.ledger.journal_for("p1").await.unwrap().is_empty());

        let retry = admission
            .evaluate(&post, base_time() + Duration::seconds(30))
            .await
            .unwrap();
        assert_eq!(retry, AdmissionOutcome::RemovedPending { notified: true });
        assert_eq!(ctx.platform.count(|c| *c == Call::Remove("p1".to_string())), 1);
        assert_eq!(ctx.platform.messages_to("alice").len(), 1);
        assert!(ctx.ledger.get_pending("p1").await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_failed_removal_is_retried_next_cycle() {
        let platform = strict_platform();
        platform.fail_removals.store(true, Ordering::SeqCst);
        let ctx = context(platform);
        enforce(&ctx, "pics").await;
        let admission = AdmissionService::new(ctx.clone());
        let post = submission("p1", "pics", "alice", minutes_ago(10));

        assert!(admission.evaluate(&post, base_time()).await.is_err());
        assert!(!ctx.ledger.is_seen("p1").await.unwrap());
        assert!(ctx.ledger.get_pending("p1").await.unwrap().is_none());
        assert!(ctx.platform.messages_to("alice").is_empty());

        ctx.platform.fail_removals.store(false, Ordering::SeqCst);
        let retry = admission
            .evaluate(&post, base_time() + Duration::seconds(30))
            .await
            .unwrap();
        assert_eq!(retry, AdmissionOutcome::RemovedPending { notified: true });
        assert!(ctx.ledger.is_seen("p1").await.unwrap());
        assert_eq!(ctx.platform.messages_to("alice").len(), 1);
    }
}
