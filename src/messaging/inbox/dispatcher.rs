// Inbox dispatcher - runs the messaging pass at the start of each cycle.
//
// Messages are handled oldest-first and marked read before they are acted on,
// so a message that keeps failing cannot wedge the inbox.

use super::intents::{classify, Intent};
use crate::core::engine::InboxPass;
use crate::core::enforcement::{EngineContext, EngineError, ReplyService};
use crate::core::ledger::Ledger;
use crate::core::operator::{InvitationOutcome, OperatorService};
use crate::core::platform::{InboxMessage, PlatformClient};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::sync::Arc;

pub struct InboxDispatcher<L: Ledger, P: PlatformClient> {
    ctx: Arc<EngineContext<L, P>>,
    replies: ReplyService<L, P>,
    operator: OperatorService<L, P>,
}

impl<L: Ledger, P: PlatformClient> InboxDispatcher<L, P> {
    pub fn new(ctx: Arc<EngineContext<L, P>>) -> Self {
        Self {
            replies: ReplyService::new(ctx.clone()),
            operator: OperatorService::new(ctx.clone()),
            ctx,
        }
    }

    async fn handle(&self, message: &InboxMessage, now: DateTime<Utc>) -> Result<(), EngineError> {
        let ctx = &self.ctx;
        let intent = classify(&ctx.platform, message).await?;

        match intent {
            Intent::ReminderReply {
                community,
                submission_id,
                text,
            } => {
                let outcome = self
                    .replies
                    .handle_reply(&community, &submission_id, &text, now)
                    .await?;
                tracing::info!(community = %community, submission = %submission_id, outcome = ?outcome, "Handled reminder reply");
            }
            Intent::Invitation { community } => {
                let body = match self.operator.accept_invitation(&community, now).await? {
                    InvitationOutcome::Accepted { enforced: true } => format!(
                        "Thanks for the invitation! Flair enforcement is now active on r/{}.",
                        community
                    ),
                    InvitationOutcome::Accepted { enforced: false } => format!(
                        "Thanks for the invitation! r/{} has no post flairs yet, so flair \
                         enforcement stays off. Add some flairs and send `enable` to start.",
                        community
                    ),
                    InvitationOutcome::NotAcceptingInvites => format!(
                        "u/{} is not accepting new communities right now. Please invite \
                         another instance instead.",
                        ctx.identity.username
                    ),
                    InvitationOutcome::SiblingPresent(sibling) => format!(
                        "r/{} is already covered by u/{}.",
                        community, sibling
                    ),
                };
                self.reply(message, &body).await;
            }
            Intent::Demodded { community } => {
                self.operator.handle_demod(&community).await?;
            }
            Intent::Command {
                community,
                requester,
                command,
            } => {
                if !ctx.platform.get_permissions(&community).await?.is_moderator {
                    tracing::info!(community = %community, "Ignoring command from a community we do not moderate");
                    return Ok(());
                }
                let body = self.operator.execute(&community, &requester, command).await?;
                self.reply(message, &body).await;
            }
            Intent::Unrecognised => {
                tracing::debug!(message = %message.id, subject = %message.subject, "Ignoring message");
            }
        }
        Ok(())
    }

    async fn reply(&self, message: &InboxMessage, body: &str) {
        if let Err(err) = self.ctx.platform.reply(message, body).await {
            tracing::warn!(message = %message.id, error = %err, "Failed to reply");
        }
    }
}

#[async_trait]
impl<L: Ledger, P: PlatformClient> InboxPass for InboxDispatcher<L, P> {
    async fn process_inbox(&self, now: DateTime<Utc>) -> Result<usize, EngineError> {
        let mut messages = self.ctx.platform.unread_messages().await?;
        messages.sort_by(|a, b| a.created_utc.cmp(&b.created_utc));

        let mut processed = 0;
        for message in &messages {
            self.ctx.platform.mark_read(message).await?;
            processed += 1;

            if let Err(err) = self.handle(message, now).await {
                if err.is_transient(&self.ctx.settings) {
                    tracing::warn!(message = %message.id, error = %err, "Message handling deferred");
                } else {
                    tracing::error!(message = %message.id, subject = %message.subject, error = %err, "Message handling failed");
                }
            }
        }
        Ok(processed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::enforcement::AdmissionService;
    use crate::core::ledger::CommunityRecord;
    use crate::core::test_support::*;
    use chrono::Duration;

    fn mail(id: &str, author: &str, community: Option<&str>, subject: &str, body: &str) -> InboxMessage {
        InboxMessage {
            id: id.to_string(),
            author: Some(author.to_string()),
            community: community.map(str::to_string),
            subject: subject.to_string(),
            body: body.to_string(),
            parent_id: None,
            is_private: true,
            created_utc: base_time(),
        }
    }

    #[tokio::test]
    async fn test_reply_to_reminder_sets_flair() {
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

        let (subject, body) = ctx.platform.messages_to("alice")[0].clone();
        ctx.platform
            .archived
            .insert("m1".to_string(), mail("m1", BOT, None, &subject, &body));
        let mut answer = mail("m2", "alice", None, &format!("re: {subject}"), "help");
        answer.parent_id = Some("t4_m1".to_string());
        ctx.platform.push_inbox(answer);

        let dispatcher = InboxDispatcher::new(ctx.clone());
        let processed = dispatcher
            .process_inbox(base_time() + Duration::minutes(10))
            .await
            .unwrap();

        assert_eq!(processed, 1);
        assert_eq!(
            ctx.platform
                .count(|c| *c == Call::SetCategory("p1".to_string(), HELP_ID.to_string())),
            1
        );
        assert!(ctx.platform.inbox.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_invitation_is_accepted_and_answered() {
        let platform = MockPlatform::new();
        platform
            .templates
            .insert("newsub".to_string(), discussion_and_help());
        platform.push_inbox(mail("m1", "modone", Some("newsub"), "invitation to moderate /r/newsub", ""));
        let ctx = context(platform);

        InboxDispatcher::new(ctx.clone())
            .process_inbox(base_time())
            .await
            .unwrap();

        assert!(ctx.ledger.get_community("newsub").await.unwrap().unwrap().enforced);
        assert_eq!(ctx.platform.count(|c| *c == Call::AcceptInvite("newsub".to_string())), 1);
        assert_eq!(ctx.platform.count(|c| matches!(c, Call::Reply(id, _) if id == "m1")), 1);
    }

    #[tokio::test]
    async fn test_commands_need_current_moderator_rights() {
        let platform = MockPlatform::new().with_community("pics", &["posts"], discussion_and_help());
        let mut newer = mail("m2", "modtwo", Some("funny"), "disable", "");
        newer.created_utc = base_time() + Duration::seconds(5);
        platform.push_inbox(newer);
        platform.push_inbox(mail("m1", "modone", Some("pics"), "disable", ""));
        let ctx = context(platform);
        for name in ["pics", "funny"] {
            ctx.ledger
                .upsert_community(&CommunityRecord::new(name, true, 0, base_time()))
                .await
                .unwrap();
        }

        InboxDispatcher::new(ctx.clone())
            .process_inbox(base_time())
            .await
            .unwrap();

        assert!(!ctx.ledger.get_community("pics").await.unwrap().unwrap().enforced);
        assert!(ctx.ledger.get_community("funny").await.unwrap().unwrap().enforced);
        let reads: Vec<Call> = ctx
            .platform
            .calls()
            .into_iter()
            .filter(|c| matches!(c, Call::MarkRead(_)))
            .collect();
        assert_eq!(
            reads,
            vec![Call::MarkRead("m1".to_string()), Call::MarkRead("m2".to_string())]
        );
        assert_eq!(ctx.platform.count(|c| matches!(c, Call::Reply(..))), 1);
    }

    #[tokio::test]
    async fn test_demod_notice_forgets_community() {
        let platform = MockPlatform::new();
        platform.push_inbox(mail(
            "m1",
            "reddit",
            Some("pics"),
            "u/flairwarden has been removed as a moderator from r/pics",
            "",
        ));
        let ctx = context(platform);
        ctx.ledger
            .upsert_community(&CommunityRecord::new("pics", true, 0, base_time()))
            .await
            .unwrap();

        InboxDispatcher::new(ctx.clone())
            .process_inbox(base_time())
            .await
            .unwrap();

        assert!(ctx.ledger.get_community("pics").await.unwrap().is_none());
    }
}
