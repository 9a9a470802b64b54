// Test doubles shared by the core service tests.

use crate::core::enforcement::{EngineContext, ShardIdentity};
use crate::core::platform::{
    CategoryTemplate, InboxMessage, ModLogEntry, Permissions, PlatformClient, PlatformError,
    Submission, SubmissionTag,
};
use crate::core::settings::EngineSettings;
use crate::infra::ledger::InMemoryLedger;
use async_trait::async_trait;
use chrono::{DateTime, Duration, TimeZone, Utc};
use dashmap::DashMap;
use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

pub const BOT: &str = "flairwarden";
pub const DISCUSSION_ID: &str = "1c5e3a52-2f1d-11ee-8a3b-0e6f1c2b9d41";
pub const HELP_ID: &str = "2d7f4b63-2f1d-11ee-9c4d-0e6f1c2b9d41";

/// A fixed Monday, 10:30 UTC.
pub fn base_time() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 6, 10, 10, 30, 0).unwrap()
}

pub fn submission(id: &str, community: &str, author: &str, created: DateTime<Utc>) -> Submission {
    Submission {
        id: id.to_string(),
        community: community.to_string(),
        author: Some(author.to_string()),
        title: format!("Post {id}"),
        permalink: format!("/r/{community}/comments/{id}/post/"),
        created_utc: created,
        flair_text: None,
        flair_css_class: None,
        flair_template_id: None,
        removed_by: None,
        num_reports: None,
    }
}

pub fn discussion_and_help() -> Vec<CategoryTemplate> {
    vec![
        CategoryTemplate {
            id: DISCUSSION_ID.to_string(),
            text: "Discussion".to_string(),
            mod_only: false,
        },
        CategoryTemplate {
            id: HELP_ID.to_string(),
            text: "Help".to_string(),
            mod_only: false,
        },
    ]
}

#[derive(Debug, Clone, PartialEq)]
pub enum Call {
    ListNew(Vec<String>, usize),
    GetByIds(Vec<String>),
    Remove(String),
    Approve(String),
    SetCategory(String, String),
    SendMessage {
        to: String,
        subject: String,
        body: String,
    },
    ApplyTag(String, SubmissionTag),
    MarkRead(String),
    Reply(String, String),
    AcceptInvite(String),
}

/// Scriptable in-memory platform that records every mutating call.
pub struct MockPlatform {
    pub submissions: DashMap<String, Submission>,
    pub permissions: DashMap<String, Permissions>,
    pub moderators: DashMap<String, Vec<String>>,
    pub templates: DashMap<String, Vec<CategoryTemplate>>,
    pub mod_log: DashMap<String, Vec<ModLogEntry>>,
    pub inbox: Mutex<Vec<InboxMessage>>,
    pub archived: DashMap<String, InboxMessage>,
    pub failing_communities: Mutex<HashSet<String>>,
    pub deny_approvals: AtomicBool,
    /// Number of upcoming permission reads that fail transiently.
    pub permission_outages: AtomicUsize,
    pub fail_removals: AtomicBool,
    pub calls: Mutex<Vec<Call>>,
}

impl MockPlatform {
    pub fn new() -> Self {
        Self {
            submissions: DashMap::new(),
            permissions: DashMap::new(),
            moderators: DashMap::new(),
            templates: DashMap::new(),
            mod_log: DashMap::new(),
            inbox: Mutex::new(Vec::new()),
            archived: DashMap::new(),
            failing_communities: Mutex::new(HashSet::new()),
            deny_approvals: AtomicBool::new(false),
            permission_outages: AtomicUsize::new(0),
            fail_removals: AtomicBool::new(false),
            calls: Mutex::new(Vec::new()),
        }
    }

    /// A community where the bot holds the given scopes and `templates` are selectable.
    pub fn with_community(
        self,
        community: &str,
        scopes: &[&str],
        templates: Vec<CategoryTemplate>,
    ) -> Self {
        self.permissions
            .insert(community.to_string(), Permissions::moderator(scopes));
        self.moderators
            .insert(community.to_string(), vec![BOT.to_string()]);
        self.templates.insert(community.to_string(), templates);
        self
    }

    pub fn add_submission(&self, submission: Submission) {
        self.submissions.insert(submission.id.clone(), submission);
    }

    pub fn push_inbox(&self, message: InboxMessage) {
        self.inbox.lock().unwrap().push(message);
    }

    pub fn calls(&self) -> Vec<Call> {
        self.calls.lock().unwrap().clone()
    }

    pub fn messages_to(&self, user: &str) -> Vec<(String, String)> {
        self.calls()
            .into_iter()
            .filter_map(|c| match c {
                Call::SendMessage { to, subject, body } if to == user => Some((subject, body)),
                _ => None,
            })
            .collect()
    }

    pub fn count(&self, predicate: impl Fn(&Call) -> bool) -> usize {
        self.calls().iter().filter(|c| predicate(c)).count()
    }

    fn record(&self, call: Call) {
        self.calls.lock().unwrap().push(call);
    }
}

#[async_trait]
impl PlatformClient for MockPlatform {
    fn username(&self) -> &str {
        BOT
    }

    async fn list_new(
        &self,
        communities: &[String],
        limit: usize,
    ) -> Result<Vec<Submission>, PlatformError> {
        self.record(Call::ListNew(communities.to_vec(), limit));
        {
            let failing = self.failing_communities.lock().unwrap();
            if communities.iter().any(|c| failing.contains(c)) {
                return Err(PlatformError::Transient("503 Service Unavailable".to_string()));
            }
        }

        let mut found: Vec<Submission> = self
            .submissions
            .iter()
            .filter(|s| communities.contains(&s.community))
            .map(|s| s.value().clone())
            .collect();
        found.sort_by(|a, b| b.created_utc.cmp(&a.created_utc));
        found.truncate(limit);
        Ok(found)
    }

    async fn get_by_ids(&self, ids: &[String]) -> Result<Vec<Submission>, PlatformError> {
        self.record(Call::GetByIds(ids.to_vec()));
        Ok(ids
            .iter()
            .filter_map(|id| self.submissions.get(id).map(|s| s.clone()))
            .collect())
    }

    async fn get_permissions(&self, community: &str) -> Result<Permissions, PlatformError> {
        let outage = self
            .permission_outages
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if outage {
            return Err(PlatformError::Transient("503 Service Unavailable".to_string()));
        }
        Ok(self
            .permissions
            .get(community)
            .map(|p| p.clone())
            .unwrap_or_else(Permissions::not_moderator))
    }

    async fn list_moderators(&self, community: &str) -> Result<Vec<String>, PlatformError> {
        Ok(self
            .moderators
            .get(community)
            .map(|m| m.clone())
            .unwrap_or_default())
    }

    async fn list_category_templates(
        &self,
        community: &str,
    ) -> Result<Vec<CategoryTemplate>, PlatformError> {
        Ok(self
            .templates
            .get(community)
            .map(|t| t.clone())
            .unwrap_or_default())
    }

    async fn remove(&self, submission: &Submission) -> Result<(), PlatformError> {
        self.record(Call::Remove(submission.id.clone()));
        if self.fail_removals.load(Ordering::SeqCst) {
            return Err(PlatformError::Transient("502 Bad Gateway".to_string()));
        }
        if let Some(mut stored) = self.submissions.get_mut(&submission.id) {
            stored.removed_by = Some(BOT.to_string());
        }
        Ok(())
    }

    async fn approve(&self, submission: &Submission) -> Result<(), PlatformError> {
        if self.deny_approvals.load(Ordering::SeqCst) {
            return Err(PlatformError::Forbidden("403 Forbidden".to_string()));
        }
        self.record(Call::Approve(submission.id.clone()));
        if let Some(mut stored) = self.submissions.get_mut(&submission.id) {
            stored.removed_by = None;
        }
        Ok(())
    }

    async fn set_category(
        &self,
        submission: &Submission,
        template_id: &str,
    ) -> Result<(), PlatformError> {
        self.record(Call::SetCategory(
            submission.id.clone(),
            template_id.to_string(),
        ));
        let text = self
            .templates
            .get(&submission.community)
            .and_then(|ts| ts.iter().find(|t| t.id == template_id).map(|t| t.text.clone()));
        if let Some(mut stored) = self.submissions.get_mut(&submission.id) {
            stored.flair_text = text;
            stored.flair_template_id = Some(template_id.to_string());
        }
        Ok(())
    }

    async fn send_message(
        &self,
        user: &str,
        subject: &str,
        body: &str,
    ) -> Result<(), PlatformError> {
        self.record(Call::SendMessage {
            to: user.to_string(),
            subject: subject.to_string(),
            body: body.to_string(),
        });
        Ok(())
    }

    async fn get_mod_log(
        &self,
        community: &str,
        action: &str,
        limit: usize,
    ) -> Result<Vec<ModLogEntry>, PlatformError> {
        Ok(self
            .mod_log
            .get(community)
            .map(|entries| {
                entries
                    .iter()
                    .filter(|e| e.action == action)
                    .take(limit)
                    .cloned()
                    .collect()
            })
            .unwrap_or_default())
    }

    async fn apply_tag(
        &self,
        submission: &Submission,
        tag: SubmissionTag,
    ) -> Result<(), PlatformError> {
        self.record(Call::ApplyTag(submission.id.clone(), tag));
        Ok(())
    }

    async fn unread_messages(&self) -> Result<Vec<InboxMessage>, PlatformError> {
        Ok(self.inbox.lock().unwrap().clone())
    }

    async fn get_message(&self, id: &str) -> Result<Option<InboxMessage>, PlatformError> {
        Ok(self.archived.get(id).map(|m| m.clone()))
    }

    async fn mark_read(&self, message: &InboxMessage) -> Result<(), PlatformError> {
        self.record(Call::MarkRead(message.id.clone()));
        self.inbox.lock().unwrap().retain(|m| m.id != message.id);
        Ok(())
    }

    async fn reply(&self, message: &InboxMessage, body: &str) -> Result<(), PlatformError> {
        self.record(Call::Reply(message.id.clone(), body.to_string()));
        Ok(())
    }

    async fn accept_invite(&self, community: &str) -> Result<(), PlatformError> {
        self.record(Call::AcceptInvite(community.to_string()));
        self.moderators
            .entry(community.to_string())
            .or_default()
            .push(BOT.to_string());
        Ok(())
    }
}

/// Context over an in-memory ledger and the given mock.
pub fn context(platform: MockPlatform) -> Arc<EngineContext<InMemoryLedger, MockPlatform>> {
    let settings = EngineSettings::default();
    let ledger = InMemoryLedger::new(settings.dedup_capacity);
    let mut identity = ShardIdentity::new(0, BOT);
    identity.operator = Some("operator".to_string());
    Arc::new(EngineContext::new(ledger, platform, settings, identity))
}

/// Minutes before `base_time()`.
pub fn minutes_ago(minutes: i64) -> DateTime<Utc> {
    base_time() - Duration::minutes(minutes)
}
