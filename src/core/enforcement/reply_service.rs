// Reminder replies - "reply with the flair name" support.
//
// A resolved reply sets the category exactly as if the author had picked it
// on the site. If a pending entry exists the next sweep restores the post;
// otherwise (reminder-only mode) the flair is acknowledged immediately.

use super::context::{EngineContext, EngineError};
use super::notices;
use super::restoration_service::RestorationService;
use crate::core::ledger::{actions, Ledger, ReplyMatchRecord};
use crate::core::platform::PlatformClient;
use crate::core::resolver::{MatchKind, ReplyResolver, Resolution};
use crate::core::schedule::check_schedule;
use chrono::{DateTime, Utc};
use std::sync::Arc;

#[derive(Debug, Clone, PartialEq)]
pub enum ReplyOutcome {
    NoMatch,
    SubmissionMissing,
    /// The chosen flair is not allowed today; a reschedule notice was sent.
    Rescheduled { template_id: String },
    NoPermission,
    CategorySet {
        template_id: String,
        kind: MatchKind,
        pending: bool,
    },
}

pub struct ReplyService<L: Ledger, P: PlatformClient> {
    ctx: Arc<EngineContext<L, P>>,
    resolver: ReplyResolver,
    restoration: RestorationService<L, P>,
}

impl<L: Ledger, P: PlatformClient> ReplyService<L, P> {
    pub fn new(ctx: Arc<EngineContext<L, P>>) -> Self {
        Self {
            resolver: ReplyResolver::new(ctx.settings.similarity_threshold),
            restoration: RestorationService::new(ctx.clone()),
            ctx,
        }
    }

    pub async fn handle_reply(
        &self,
        community: &str,
        submission_id: &str,
        reply_text: &str,
        now: DateTime<Utc>,
    ) -> Result<ReplyOutcome, EngineError> {
        let ctx = &self.ctx;
        let community = community.to_lowercase();

        let templates = ctx.platform.list_category_templates(&community).await?;
        let resolution = self.resolver.resolve(reply_text, &templates);
        if !resolution.is_exact() {
            self.audit(&community, submission_id, reply_text, &resolution, now)
                .await?;
        }
        let Resolution::Matched { template, kind } = resolution else {
            tracing::info!(submission = %submission_id, "Reply did not match any flair");
            return Ok(ReplyOutcome::NoMatch);
        };

        let Some(submission) = ctx
            .platform
            .get_by_ids(&[submission_id.to_string()])
            .await?
            .into_iter()
            .next()
        else {
            return Ok(ReplyOutcome::SubmissionMissing);
        };

        let policy = ctx
            .ledger
            .get_community(&community)
            .await?
            .map(|c| c.policy)
            .unwrap_or_default();

        if let Some(schedule) = policy.schedule() {
            let verdict = check_schedule(&template.id, schedule, now);
            if !verdict.allowed {
                if let Some(author) = submission.author.as_deref() {
                    let notice =
                        notices::schedule_rejection(&submission, &template.text, &verdict, &policy);
                    if let Err(err) = ctx
                        .platform
                        .send_message(author, &notice.subject, &notice.body)
                        .await
                    {
                        tracing::warn!(user = %author, error = %err, "Failed to send reschedule notice");
                    }
                }
                ctx.record_action(&submission.id, &community, actions::RESCHEDULE_NOTICE, now)
                    .await?;
                return Ok(ReplyOutcome::Rescheduled {
                    template_id: template.id,
                });
            }
        }

        let permissions = ctx.platform.get_permissions(&community).await?;
        if !permissions.can_flair() {
            return Ok(ReplyOutcome::NoPermission);
        }

        ctx.platform.set_category(&submission, &template.id).await?;
        ctx.record_action(&submission.id, &community, actions::FLAIR_FROM_REPLY, now)
            .await?;
        tracing::info!(
            community = %community,
            submission = %submission.id,
            flair = %template.text,
            kind = kind.label(),
            "Set flair from reply"
        );

        let pending = ctx.ledger.get_pending(&submission.id).await?.is_some();
        if !pending {
            let mut flaired = submission.clone();
            flaired.flair_text = Some(template.text.clone());
            flaired.flair_template_id = Some(template.id.clone());

            if let Some(author) = flaired.author.as_deref() {
                let notice = notices::flair_acknowledged(&flaired, &policy);
                if let Err(err) = ctx
                    .platform
                    .send_message(author, &notice.subject, &notice.body)
                    .await
                {
                    tracing::warn!(user = %author, error = %err, "Failed to acknowledge flair");
                }
            }
            ctx.record_action(&submission.id, &community, actions::FLAIRED, now)
                .await?;
            self.restoration.apply_tags(&flaired, &policy).await;
        }

        Ok(ReplyOutcome::CategorySet {
            template_id: template.id,
            kind,
            pending,
        })
    }

    async fn audit(
        &self,
        community: &str,
        submission_id: &str,
        reply_text: &str,
        resolution: &Resolution,
        now: DateTime<Utc>,
    ) -> Result<(), EngineError> {
        let (match_kind, template, action) = match resolution {
            Resolution::Matched { template, kind } => {
                (kind.label(), Some(template), actions::REPLY_APPROXIMATE)
            }
            Resolution::NoMatch => ("none", None, actions::REPLY_UNMATCHED),
        };

        self.ctx
            .ledger
            .record_reply_match(&ReplyMatchRecord {
                submission_id: submission_id.to_string(),
                community: community.to_string(),
                reply_text: reply_text.chars().take(500).collect(),
                match_kind: match_kind.to_string(),
                template_id: template.map(|t| t.id.clone()),
                template_text: template.map(|t| t.text.clone()),
                recorded_utc: now,
            })
            .await?;
        self.ctx
            .record_action(submission_id, community, action, now)
            .await?;
        Ok(())
    }
}
