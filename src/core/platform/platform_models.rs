// Platform data types the engine reasons about.
//
// Only the fields enforcement needs survive the adapter. Full submission bodies are never carried.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

pub const AUTOMATION_ACCOUNT: &str = "automoderator";

/// A submission as seen during one evaluation.
#[derive(Debug, Clone, PartialEq)]
pub struct Submission {
    pub id: String,
    /// Lowercased community name.
    pub community: String,
    /// `None` once the author account is deleted.
    pub author: Option<String>,
    pub title: String,
    pub permalink: String,
    pub created_utc: DateTime<Utc>,
    pub flair_text: Option<String>,
    pub flair_css_class: Option<String>,
    pub flair_template_id: Option<String>,
    /// Moderator who removed the submission, if any.
    pub removed_by: Option<String>,
    pub num_reports: Option<i64>,
}

impl Submission {
    pub fn age(&self, now: DateTime<Utc>) -> Duration {
        now - self.created_utc
    }

    /// A submission counts as categorized if it carries any visible flair.
    pub fn is_categorized(&self) -> bool {
        let has = |v: &Option<String>| v.as_deref().map_or(false, |s| !s.trim().is_empty());
        has(&self.flair_text) || has(&self.flair_css_class)
    }

    pub fn author_is(&self, username: &str) -> bool {
        self.author
            .as_deref()
            .map_or(false, |a| a.eq_ignore_ascii_case(username))
    }
}

/// Moderator permissions held by the bot in one community, fetched live.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Permissions {
    pub is_moderator: bool,
    pub scopes: Vec<String>,
}

impl Permissions {
    pub fn not_moderator() -> Self {
        Self::default()
    }

    pub fn moderator(scopes: &[&str]) -> Self {
        Self {
            is_moderator: true,
            scopes: scopes.iter().map(|s| s.to_string()).collect(),
        }
    }

    fn has(&self, scope: &str) -> bool {
        self.is_moderator && self.scopes.iter().any(|s| s == scope || s == "all")
    }

    /// Remove/approve rights, which put the community in Strict mode.
    pub fn can_remove(&self) -> bool {
        self.has("posts")
    }

    pub fn can_flair(&self) -> bool {
        self.has("flair")
    }

    pub fn mode(&self) -> EnforcementMode {
        if !self.is_moderator {
            EnforcementMode::Unavailable
        } else if self.can_remove() {
            EnforcementMode::Strict {
                flair_rights: self.can_flair(),
            }
        } else {
            EnforcementMode::Default {
                flair_rights: self.can_flair(),
            }
        }
    }
}

/// Enforcement mode derived from live permissions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EnforcementMode {
    Default { flair_rights: bool },
    Strict { flair_rights: bool },
    Unavailable,
}

impl EnforcementMode {
    pub fn label(&self) -> &'static str {
        match self {
            EnforcementMode::Strict { flair_rights: true } => "Strict+",
            EnforcementMode::Strict { flair_rights: false } => "Strict",
            EnforcementMode::Default { flair_rights: true } => "Default+",
            EnforcementMode::Default { flair_rights: false } => "Default",
            EnforcementMode::Unavailable => "N/A",
        }
    }
}

/// A selectable link flair template.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CategoryTemplate {
    pub id: String,
    pub text: String,
    pub mod_only: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ModLogEntry {
    pub moderator: String,
    pub action: String,
    /// Fullname of the target thing, e.g. `t3_abc123`.
    pub target_fullname: Option<String>,
    pub created_utc: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SubmissionTag {
    Nsfw,
    Oc,
    Spoiler,
}

impl SubmissionTag {
    pub fn key(&self) -> &'static str {
        match self {
            SubmissionTag::Nsfw => "nsfw",
            SubmissionTag::Oc => "oc",
            SubmissionTag::Spoiler => "spoiler",
        }
    }

    pub fn from_key(key: &str) -> Option<Self> {
        match key {
            "nsfw" => Some(SubmissionTag::Nsfw),
            "oc" => Some(SubmissionTag::Oc),
            "spoiler" => Some(SubmissionTag::Spoiler),
            _ => None,
        }
    }
}

/// An unread inbox item handed to the messaging front-end.
#[derive(Debug, Clone, PartialEq)]
pub struct InboxMessage {
    pub id: String,
    pub author: Option<String>,
    /// Set when the message was sent on behalf of a community (modmail).
    pub community: Option<String>,
    pub subject: String,
    pub body: String,
    /// Parent message id, when this is a reply.
    pub parent_id: Option<String>,
    /// False for comment replies and username mentions.
    pub is_private: bool,
    pub created_utc: DateTime<Utc>,
}
