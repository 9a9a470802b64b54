// Operator commands and community lifecycle.
//
// Commands arrive as community mail through the messaging front-end; this
// service applies them and returns the reply text. Invitations and demod
// notices create and delete community records.

use crate::core::enforcement::{EngineContext, EngineError};
use crate::core::ledger::{actions, CommunityRecord, Ledger};
use crate::core::platform::PlatformClient;
use crate::core::policy::{parse_policy_document, CommunityPolicy};
use chrono::{DateTime, Utc};
use once_cell::sync::Lazy;
use regex::Regex;
use std::sync::Arc;

static LINK_ID: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?:comments/|redd\.it/)([A-Za-z0-9]+)").expect("link pattern is valid")
});

static BARE_ID: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^(?:t3_)?([A-Za-z0-9]{4,10})$").expect("id pattern is valid"));

// ============================================================================
// COMMANDS
// ============================================================================

#[derive(Debug, Clone, PartialEq)]
pub enum OperatorCommand {
    Enable,
    Disable,
    UpdatePolicy { document: String },
    RevertPolicy,
    Query { ids: Vec<String> },
}

impl OperatorCommand {
    /// Map a mail subject (and body, for update/query) to a command.
    pub fn parse(subject: &str, body: &str) -> Option<Self> {
        match subject.trim().to_lowercase().as_str() {
            "enable" => Some(OperatorCommand::Enable),
            "disable" => Some(OperatorCommand::Disable),
            "update" => Some(OperatorCommand::UpdatePolicy {
                document: body.to_string(),
            }),
            "revert" => Some(OperatorCommand::RevertPolicy),
            "query" => Some(OperatorCommand::Query {
                ids: parse_query_ids(body),
            }),
            _ => None,
        }
    }
}

/// Submission ids from links or a comma/semicolon/whitespace separated list.
/// Duplicates are dropped, first occurrence wins.
pub fn parse_query_ids(text: &str) -> Vec<String> {
    let mut ids: Vec<String> = Vec::new();
    for token in text.split(|c: char| c == ',' || c == ';' || c.is_whitespace()) {
        let token = token.trim();
        if token.is_empty() {
            continue;
        }
        let id = if let Some(caps) = LINK_ID.captures(token) {
            caps[1].to_string()
        } else if let Some(caps) = BARE_ID.captures(token) {
            caps[1].to_string()
        } else {
            continue;
        };
        let id = id.to_lowercase();
        if !ids.contains(&id) {
            ids.push(id);
        }
    }
    ids
}

// ============================================================================
// LIFECYCLE OUTCOMES
// ============================================================================

#[derive(Debug, Clone, PartialEq)]
pub enum InvitationOutcome {
    Accepted { enforced: bool },
    NotAcceptingInvites,
    /// Another shard already moderates the community.
    SiblingPresent(String),
}

// ============================================================================
// CORE SERVICE
// ============================================================================

pub struct OperatorService<L: Ledger, P: PlatformClient> {
    ctx: Arc<EngineContext<L, P>>,
}

impl<L: Ledger, P: PlatformClient> OperatorService<L, P> {
    pub fn new(ctx: Arc<EngineContext<L, P>>) -> Self {
        Self { ctx }
    }

    /// Apply a command on behalf of `community` and return the reply text.
    pub async fn execute(
        &self,
        community: &str,
        requester: &str,
        command: OperatorCommand,
    ) -> Result<String, EngineError> {
        let community = community.to_lowercase();
        let ledger = &self.ctx.ledger;

        let registered = ledger.get_community(&community).await?.is_some();

        let reply = match command {
            OperatorCommand::Query { ids } => return self.query(&community, requester, &ids).await,
            _ if !registered => format!(
                "r/{} is not registered with u/{}. Invite the bot as a moderator first.",
                community, self.ctx.identity.username
            ),
            OperatorCommand::Enable => {
                ledger.set_enforced(&community, true).await?;
                tracing::info!(community = %community, by = %requester, "Enforcement enabled");
                format!("Flair enforcement is now enabled on r/{}.", community)
            }
            OperatorCommand::Disable => {
                ledger.set_enforced(&community, false).await?;
                tracing::info!(community = %community, by = %requester, "Enforcement disabled");
                format!("Flair enforcement is now disabled on r/{}.", community)
            }
            OperatorCommand::UpdatePolicy { document } => match parse_policy_document(&document) {
                Ok(policy) => {
                    ledger.save_policy(&community, &policy).await?;
                    ledger
                        .increment_action(&community, actions::UPDATED_POLICY)
                        .await?;
                    tracing::info!(community = %community, by = %requester, "Policy updated");
                    format!("The configuration for r/{} has been updated.", community)
                }
                Err(err) => {
                    tracing::info!(community = %community, error = %err, "Policy update rejected");
                    format!(
                        "The configuration was not changed.\n\n**Error:** {}",
                        err
                    )
                }
            },
            OperatorCommand::RevertPolicy => {
                ledger
                    .save_policy(&community, &CommunityPolicy::default())
                    .await?;
                ledger
                    .increment_action(&community, actions::REVERTED_POLICY)
                    .await?;
                tracing::info!(community = %community, by = %requester, "Policy reverted");
                format!(
                    "The configuration for r/{} has been reverted to the defaults.",
                    community
                )
            }
        };
        Ok(reply)
    }

    async fn query(
        &self,
        community: &str,
        requester: &str,
        ids: &[String],
    ) -> Result<String, EngineError> {
        if ids.is_empty() {
            return Ok("No submission ids found. Send links or ids separated by commas.".to_string());
        }

        let visible: Vec<String> = if self.ctx.identity.is_operator(requester) {
            ids.to_vec()
        } else {
            self.ctx
                .platform
                .get_by_ids(ids)
                .await?
                .into_iter()
                .filter(|s| s.community.eq_ignore_ascii_case(community))
                .map(|s| s.id)
                .collect()
        };

        let mut table = String::from("| Submission | Time (UTC) | Action |\n|---|---|---|\n");
        let mut rows = 0;
        for id in &visible {
            for record in self.ctx.ledger.journal_for(id).await? {
                table.push_str(&format!(
                    "| {} | {} | {} |\n",
                    record.submission_id,
                    record.recorded_utc.format("%Y-%m-%d %H:%M:%S"),
                    record.action
                ));
                rows += 1;
            }
        }

        if rows == 0 {
            return Ok("No journal entries found for those submissions.".to_string());
        }
        Ok(truncate_chars(&table, self.ctx.settings.query_reply_limit))
    }

    /// Accept a moderator invitation unless another shard already holds it.
    pub async fn accept_invitation(
        &self,
        community: &str,
        now: DateTime<Utc>,
    ) -> Result<InvitationOutcome, EngineError> {
        let ctx = &self.ctx;
        let community = community.to_lowercase();

        if !ctx.identity.accepting_invites {
            tracing::info!(community = %community, "Declined invitation; shard is full");
            return Ok(InvitationOutcome::NotAcceptingInvites);
        }

        let moderators = ctx.platform.list_moderators(&community).await?;
        if let Some(sibling) = moderators
            .iter()
            .find(|m| ctx.identity.siblings.iter().any(|s| s.eq_ignore_ascii_case(m)))
        {
            tracing::info!(community = %community, sibling = %sibling, "Declined invitation; sibling present");
            return Ok(InvitationOutcome::SiblingPresent(sibling.clone()));
        }

        ctx.platform.accept_invite(&community).await?;
        let templates = ctx.platform.list_category_templates(&community).await?;
        let enforced = !templates.is_empty();

        let mut record = CommunityRecord::new(&community, enforced, ctx.identity.instance, now);
        if let Some(existing) = ctx.ledger.get_community(&community).await? {
            record.policy = existing.policy;
        }
        ctx.ledger.upsert_community(&record).await?;
        tracing::info!(community = %community, enforced, "Accepted moderator invitation");

        Ok(InvitationOutcome::Accepted { enforced })
    }

    /// Forget a community after the bot was removed as a moderator.
    pub async fn handle_demod(&self, community: &str) -> Result<bool, EngineError> {
        let community = community.to_lowercase();
        let deleted = self.ctx.ledger.delete_community(&community).await?;
        tracing::info!(community = %community, deleted, "Removed as moderator");
        Ok(deleted)
    }
}

fn truncate_chars(text: &str, limit: usize) -> String {
    if text.chars().count() <= limit {
        return text.to_string();
    }
    text.chars().take(limit).collect()
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::enforcement::ShardIdentity;
    use crate::core::ledger::JournalRecord;
    use crate::core::settings::EngineSettings;
    use crate::core::test_support::*;
    use crate::infra::ledger::InMemoryLedger;

    async fn registered() -> Arc<EngineContext<crate::infra::ledger::InMemoryLedger, MockPlatform>> {
        let platform = MockPlatform::new().with_community("pics", &["posts"], discussion_and_help());
        let ctx = context(platform);
        ctx.ledger
            .upsert_community(&CommunityRecord::new("pics", true, 0, base_time()))
            .await
            .unwrap();
        ctx
    }

    #[test]
    fn test_parse_query_ids_from_links_and_lists() {
        let ids = parse_query_ids(
            "https://www.reddit.com/r/pics/comments/1abcde/some_title/, https://redd.it/2fghij\nt3_3klmno; 1abcde",
        );
        assert_eq!(ids, vec!["1abcde", "2fghij", "3klmno"]);
        assert!(parse_query_ids("hi there!").is_empty());
        assert!(parse_query_ids("").is_empty());
    }

    #[test]
    fn test_command_subjects() {
        assert_eq!(OperatorCommand::parse(" Enable ", ""), Some(OperatorCommand::Enable));
        assert_eq!(OperatorCommand::parse("revert", "x"), Some(OperatorCommand::RevertPolicy));
        assert!(OperatorCommand::parse("hello", "").is_none());
    }

    #[tokio::test]
    async fn test_disable_and_enable_toggle_enforcement() {
        let ctx = registered().await;
        let service = OperatorService::new(ctx.clone());

        service
            .execute("pics", "modone", OperatorCommand::Disable)
            .await
            .unwrap();
        assert!(!ctx.ledger.get_community("pics").await.unwrap().unwrap().enforced);

        let reply = service
            .execute("Pics", "modone", OperatorCommand::Enable)
            .await
            .unwrap();
        assert!(reply.contains("enabled"));
        assert!(ctx.ledger.get_community("pics").await.unwrap().unwrap().enforced);
    }

    #[tokio::test]
    async fn test_invalid_update_keeps_prior_policy() {
        let ctx = registered().await;
        let service = OperatorService::new(ctx.clone());

        service
            .execute(
                "pics",
                "modone",
                OperatorCommand::UpdatePolicy {
                    document: "approve_posts = false".to_string(),
                },
            )
            .await
            .unwrap();

        let reply = service
            .execute(
                "pics",
                "modone",
                OperatorCommand::UpdatePolicy {
                    document: "approve_posts = false\nflair_colour = \"red\"".to_string(),
                },
            )
            .await
            .unwrap();

        assert!(reply.contains("flair_colour"));
        let policy = ctx.ledger.get_community("pics").await.unwrap().unwrap().policy;
        assert!(!policy.approve_posts());
        let counts = ctx.ledger.action_counts("pics").await.unwrap();
        assert_eq!(counts.get(actions::UPDATED_POLICY), Some(&1));
    }

    #[tokio::test]
    async fn test_revert_restores_defaults() {
        let ctx = registered().await;
        let service = OperatorService::new(ctx.clone());
        service
            .execute(
                "pics",
                "modone",
                OperatorCommand::UpdatePolicy {
                    document: "custom_name = \"Tagger\"".to_string(),
                },
            )
            .await
            .unwrap();

        service
            .execute("pics", "modone", OperatorCommand::RevertPolicy)
            .await
            .unwrap();

        let policy = ctx.ledger.get_community("pics").await.unwrap().unwrap().policy;
        assert!(policy.is_default());
    }

    #[tokio::test]
    async fn test_query_is_scoped_to_requesting_community() {
        let ctx = registered().await;
        ctx.platform
            .add_submission(submission("abcd1", "pics", "alice", minutes_ago(30)));
        ctx.platform
            .add_submission(submission("efgh2", "funny", "bob", minutes_ago(30)));
        for id in ["abcd1", "efgh2"] {
            ctx.ledger
                .append_journal(&JournalRecord {
                    submission_id: id.to_string(),
                    recorded_utc: base_time(),
                    action: actions::REMOVED.to_string(),
                })
                .await
                .unwrap();
        }
        let service = OperatorService::new(ctx.clone());
        let ids = parse_query_ids("abcd1, efgh2");

        let scoped = service
            .execute("pics", "modone", OperatorCommand::Query { ids: ids.clone() })
            .await
            .unwrap();
        assert!(scoped.contains("abcd1"));
        assert!(!scoped.contains("efgh2"));

        let global = service
            .execute("pics", "operator", OperatorCommand::Query { ids })
            .await
            .unwrap();
        assert!(global.contains("efgh2"));
        assert!(global.contains("| abcd1 | 2024-06-10 10:30:00 | Removed post |"));
    }

    #[tokio::test]
    async fn test_invitation_creates_community_unless_sibling_present() {
        let platform = MockPlatform::new();
        platform
            .templates
            .insert("pics".to_string(), discussion_and_help());
        platform
            .moderators
            .insert("funny".to_string(), vec!["flairwarden2".to_string()]);
        let settings = EngineSettings::default();
        let mut identity = ShardIdentity::new(0, BOT);
        identity.siblings = vec!["FlairWarden2".to_string()];
        let ctx = Arc::new(EngineContext::new(
            InMemoryLedger::new(settings.dedup_capacity),
            platform,
            settings,
            identity,
        ));
        let service = OperatorService::new(ctx.clone());

        assert_eq!(
            service.accept_invitation("Pics", base_time()).await.unwrap(),
            InvitationOutcome::Accepted { enforced: true }
        );
        assert!(ctx.ledger.get_community("pics").await.unwrap().unwrap().enforced);

        assert_eq!(
            service.accept_invitation("funny", base_time()).await.unwrap(),
            InvitationOutcome::SiblingPresent("flairwarden2".to_string())
        );
        assert!(ctx.ledger.get_community("funny").await.unwrap().is_none());

        assert_eq!(
            service.accept_invitation("empty", base_time()).await.unwrap(),
            InvitationOutcome::Accepted { enforced: false }
        );

        assert!(service.handle_demod("pics").await.unwrap());
        assert!(ctx.ledger.get_community("pics").await.unwrap().is_none());
    }
}
