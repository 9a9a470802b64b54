// Restoration - the single approval path for pending submissions.
//
// Called by the sweeper for every pending submission it can still see. The
// disqualification checks always run first; the entry is only deleted when the
// submission is either restored or can never be.

use super::context::{EngineContext, EngineError};
use super::notices;
use crate::core::ledger::{actions, Ledger};
use crate::core::platform::{PlatformClient, Submission};
use crate::core::policy::CommunityPolicy;
use chrono::{DateTime, Utc};
use std::sync::Arc;

/// Mod log action recorded when a flair is edited.
pub const FLAIR_EDIT_ACTION: &str = "editflair";

#[derive(Debug, Clone, PartialEq)]
pub enum Disqualification {
    Abandoned,
    RemovedByOtherModerator(String),
    ExcessiveReports,
    AuthorDeleted,
}

impl Disqualification {
    fn action(&self) -> &'static str {
        match self {
            Disqualification::Abandoned => actions::ABANDONED,
            Disqualification::RemovedByOtherModerator(_) => actions::OTHER_MOD_REMOVED,
            Disqualification::ExcessiveReports => actions::EXCESSIVE_REPORTS,
            Disqualification::AuthorDeleted => actions::AUTHOR_DELETED,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum RestorationOutcome {
    Disqualified(Disqualification),
    /// Still no category; left for the next sweep.
    AwaitingCategory,
    /// Rights are missing right now; entry left untouched.
    NoPermission,
    /// The platform refused the approval; entry left for a retry.
    ApprovalDenied,
    Restored { mod_selected: bool },
    /// Approval is switched off by policy; flair acknowledged and entry cleared.
    Acknowledged,
}

pub struct RestorationService<L: Ledger, P: PlatformClient> {
    ctx: Arc<EngineContext<L, P>>,
}

impl<L: Ledger, P: PlatformClient> RestorationService<L, P> {
    pub fn new(ctx: Arc<EngineContext<L, P>>) -> Self {
        Self { ctx }
    }

    fn disqualification(&self, submission: &Submission, now: DateTime<Utc>) -> Option<Disqualification> {
        let settings = &self.ctx.settings;
        if submission.age(now) > settings.abandonment() {
            return Some(Disqualification::Abandoned);
        }
        if let Some(actor) = &submission.removed_by {
            if !actor.eq_ignore_ascii_case(self.ctx.platform.username()) {
                return Some(Disqualification::RemovedByOtherModerator(actor.clone()));
            }
        }
        if submission
            .num_reports
            .map_or(false, |n| n.abs() >= settings.report_threshold)
        {
            return Some(Disqualification::ExcessiveReports);
        }
        if submission.author.is_none() {
            return Some(Disqualification::AuthorDeleted);
        }
        None
    }

    pub async fn restore(
        &self,
        submission: &Submission,
        now: DateTime<Utc>,
    ) -> Result<RestorationOutcome, EngineError> {
        let ctx = &self.ctx;

        if let Some(reason) = self.disqualification(submission, now) {
            ctx.ledger.remove_pending(&submission.id).await?;
            ctx.record_action(&submission.id, &submission.community, reason.action(), now)
                .await?;
            ctx.record_action(&submission.id, &submission.community, actions::CLEARED, now)
                .await?;
            tracing::info!(submission = %submission.id, reason = ?reason, "Pending entry disqualified");
            return Ok(RestorationOutcome::Disqualified(reason));
        }

        if !submission.is_categorized() {
            return Ok(RestorationOutcome::AwaitingCategory);
        }

        let permissions = ctx.platform.get_permissions(&submission.community).await?;
        if !permissions.can_remove() {
            return Ok(RestorationOutcome::NoPermission);
        }

        let policy = ctx
            .ledger
            .get_community(&submission.community)
            .await?
            .map(|c| c.policy)
            .unwrap_or_default();
        let author = submission.author.as_deref().unwrap_or_default();

        if !policy.approve_posts() {
            ctx.ledger.remove_pending(&submission.id).await?;
            ctx.record_action(&submission.id, &submission.community, actions::FLAIRED, now)
                .await?;
            let notice = notices::flair_acknowledged(submission, &policy);
            self.notify(author, &notice).await;
            self.apply_tags(submission, &policy).await;
            return Ok(RestorationOutcome::Acknowledged);
        }

        match ctx.platform.approve(submission).await {
            Ok(()) => {}
            Err(err) if err.is_forbidden() => {
                ctx.record_action(&submission.id, &submission.community, actions::APPROVAL_DENIED, now)
                    .await?;
                tracing::warn!(submission = %submission.id, error = %err, "Approval refused");
                return Ok(RestorationOutcome::ApprovalDenied);
            }
            Err(err) => return Err(err.into()),
        }

        let mod_selected = self.moderator_selected_flair(submission).await;
        ctx.ledger.remove_pending(&submission.id).await?;
        ctx.record_action(&submission.id, &submission.community, actions::RESTORED, now)
            .await?;
        ctx.record_action(&submission.id, &submission.community, actions::CLEARED, now)
            .await?;
        tracing::info!(
            community = %submission.community,
            submission = %submission.id,
            mod_selected,
            "Restored post"
        );

        let notice = notices::approval(submission, &policy, mod_selected);
        self.notify(author, &notice).await;
        self.apply_tags(submission, &policy).await;

        Ok(RestorationOutcome::Restored { mod_selected })
    }

    /// Whether a human moderator, rather than the author, set the flair.
    async fn moderator_selected_flair(&self, submission: &Submission) -> bool {
        let ctx = &self.ctx;
        let fullname = format!("t3_{}", submission.id);
        match ctx
            .platform
            .get_mod_log(&submission.community, FLAIR_EDIT_ACTION, ctx.settings.mod_log_window)
            .await
        {
            Ok(entries) => entries.iter().any(|entry| {
                entry.target_fullname.as_deref() == Some(fullname.as_str())
                    && !ctx.identity.is_automated_account(&entry.moderator)
            }),
            Err(err) => {
                tracing::warn!(community = %submission.community, error = %err, "Mod log unavailable");
                false
            }
        }
    }

    async fn notify(&self, author: &str, notice: &notices::Notice) {
        if author.is_empty() {
            return;
        }
        if let Err(err) = self
            .ctx
            .platform
            .send_message(author, &notice.subject, &notice.body)
            .await
        {
            tracing::warn!(user = %author, error = %err, "Failed to send notice");
        }
    }

    /// Apply NSFW/OC/spoiler side effects configured for the chosen flair.
    pub async fn apply_tags(&self, submission: &Submission, policy: &CommunityPolicy) {
        let Some(template_id) = submission.flair_template_id.as_deref() else {
            return;
        };
        for tag in policy.tags_for(template_id) {
            if let Err(err) = self.ctx.platform.apply_tag(submission, tag).await {
                tracing::warn!(submission = %submission.id, tag = tag.key(), error = %err, "Failed to apply tag");
            }
        }
    }
}
