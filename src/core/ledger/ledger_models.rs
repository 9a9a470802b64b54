// Durable ledger records.

use crate::core::policy::CommunityPolicy;
use chrono::{DateTime, Utc};

/// A community this shard enforces in.
#[derive(Debug, Clone, PartialEq)]
pub struct CommunityRecord {
    /// Lowercased community name.
    pub name: String,
    pub enforced: bool,
    /// Shard instance that accepted the invitation.
    pub shard: u32,
    pub added_utc: DateTime<Utc>,
    pub policy: CommunityPolicy,
}

impl CommunityRecord {
    pub fn new(name: &str, enforced: bool, shard: u32, added_utc: DateTime<Utc>) -> Self {
        Self {
            name: name.to_lowercase(),
            enforced,
            shard,
            added_utc,
            policy: CommunityPolicy::default(),
        }
    }
}

/// A removed submission waiting for its author to pick a category.
#[derive(Debug, Clone, PartialEq)]
pub struct PendingEntry {
    pub submission_id: String,
    pub created_utc: DateTime<Utc>,
}

/// One timestamped line of a submission's operations journal.
#[derive(Debug, Clone, PartialEq)]
pub struct JournalRecord {
    pub submission_id: String,
    pub recorded_utc: DateTime<Utc>,
    pub action: String,
}

/// Audit row for a reply that did not resolve by exact match.
#[derive(Debug, Clone, PartialEq)]
pub struct ReplyMatchRecord {
    pub submission_id: String,
    pub community: String,
    pub reply_text: String,
    /// `fuzzy`, `contained` or `none`.
    pub match_kind: String,
    pub template_id: Option<String>,
    pub template_text: Option<String>,
    pub recorded_utc: DateTime<Utc>,
}

/// Journal action names. Also used as the per-community counter keys.
pub mod actions {
    pub const FETCHED: &str = "Fetched post";
    pub const SKIPPED_SELF: &str = "Skipped own post";
    pub const SKIPPED_MOD: &str = "Skipped mod post";
    pub const SKIPPED_WHITELIST: &str = "Skipped whitelist post";
    pub const REMOVED: &str = "Removed post";
    pub const REMINDED: &str = "Sent flair reminder";
    pub const REMOVED_UNSCHEDULED: &str = "Removed unscheduled post";
    pub const RESTORED: &str = "Restored post";
    pub const FLAIRED: &str = "Flaired post";
    pub const FLAIR_FROM_REPLY: &str = "Set flair from reply";
    pub const RESCHEDULE_NOTICE: &str = "Sent reschedule notice";
    pub const CLEARED: &str = "Cleared post";
    pub const ABANDONED: &str = "Abandoned post";
    pub const OTHER_MOD_REMOVED: &str = "Other moderator removed post";
    pub const EXCESSIVE_REPORTS: &str = "Excessive reports on post";
    pub const AUTHOR_DELETED: &str = "Author deleted";
    pub const REPLY_UNMATCHED: &str = "Reply did not match a flair";
    pub const REPLY_APPROXIMATE: &str = "Reply matched approximately";
    pub const APPROVAL_DENIED: &str = "Approval denied";
    pub const UPDATED_POLICY: &str = "Updated configuration";
    pub const REVERTED_POLICY: &str = "Reverted configuration";
}
