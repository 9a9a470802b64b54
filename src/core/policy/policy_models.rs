// Per-community policy record.
//
// Every field is optional; `None` means "use the built-in default". The record
// is stored as a JSON document next to its version so old rows can be migrated
// on read (see `policy_validator::migrate_stored`).

use crate::core::platform::SubmissionTag;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

pub const POLICY_VERSION: u32 = 1;

pub const CUSTOM_MESSAGE_LIMIT: usize = 500;
pub const CUSTOM_NAME_LIMIT: usize = 20;
pub const DEFAULT_DISPLAY_NAME: &str = "Flair Warden";

/// Weekday keys accepted in `flair_schedule`, Sunday first.
pub const SCHEDULE_DAYS: [&str; 7] = ["Sun", "Mon", "Tue", "Wed", "Thu", "Fri", "Sat"];

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CommunityPolicy {
    pub version: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub enforce_moderators: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub approve_posts: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub custom_message: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub whitelist: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub alert_list: Option<Vec<String>>,
    /// Tag key (`nsfw`, `oc`, `spoiler`) to template ids.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub flair_tags: Option<BTreeMap<String, Vec<String>>>,
    /// Weekday abbreviation to the template ids allowed on that day.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub flair_schedule: Option<BTreeMap<String, Vec<String>>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub custom_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub custom_goodbye: Option<String>,
}

impl Default for CommunityPolicy {
    fn default() -> Self {
        Self {
            version: POLICY_VERSION,
            enforce_moderators: None,
            approve_posts: None,
            custom_message: None,
            whitelist: None,
            alert_list: None,
            flair_tags: None,
            flair_schedule: None,
            custom_name: None,
            custom_goodbye: None,
        }
    }
}

impl CommunityPolicy {
    /// When true, moderators get no exemption.
    pub fn enforce_moderators(&self) -> bool {
        self.enforce_moderators.unwrap_or(false)
    }

    /// When false, strict mode leaves approval to humans.
    pub fn approve_posts(&self) -> bool {
        self.approve_posts.unwrap_or(true)
    }

    pub fn custom_message(&self) -> Option<&str> {
        self.custom_message.as_deref().filter(|m| !m.is_empty())
    }

    pub fn display_name(&self) -> &str {
        self.custom_name
            .as_deref()
            .filter(|n| !n.is_empty())
            .unwrap_or(DEFAULT_DISPLAY_NAME)
    }

    pub fn custom_goodbye(&self) -> Option<&str> {
        self.custom_goodbye.as_deref().filter(|g| !g.is_empty())
    }

    pub fn is_whitelisted(&self, username: &str) -> bool {
        let username = username.to_lowercase();
        self.whitelist
            .as_ref()
            .map_or(false, |list| list.iter().any(|u| *u == username))
    }

    pub fn alert_list(&self) -> &[String] {
        self.alert_list.as_deref().unwrap_or(&[])
    }

    pub fn schedule(&self) -> Option<&BTreeMap<String, Vec<String>>> {
        self.flair_schedule.as_ref().filter(|s| !s.is_empty())
    }

    /// Tags that selecting `template_id` should apply to a submission.
    pub fn tags_for(&self, template_id: &str) -> Vec<SubmissionTag> {
        let Some(tags) = &self.flair_tags else {
            return Vec::new();
        };
        tags.iter()
            .filter(|(_, ids)| ids.iter().any(|id| id == template_id))
            .filter_map(|(key, _)| SubmissionTag::from_key(key))
            .collect()
    }

    pub fn is_default(&self) -> bool {
        *self == CommunityPolicy::default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_apply_when_fields_unset() {
        let policy = CommunityPolicy::default();
        assert!(!policy.enforce_moderators());
        assert!(policy.approve_posts());
        assert_eq!(policy.display_name(), DEFAULT_DISPLAY_NAME);
        assert!(policy.custom_message().is_none());
        assert!(policy.schedule().is_none());
    }

    #[test]
    fn test_tags_for_collects_every_matching_key() {
        let mut tags = BTreeMap::new();
        tags.insert("nsfw".to_string(), vec!["a".to_string(), "b".to_string()]);
        tags.insert("spoiler".to_string(), vec!["b".to_string()]);
        let policy = CommunityPolicy {
            flair_tags: Some(tags),
            ..Default::default()
        };

        assert_eq!(policy.tags_for("a"), vec![SubmissionTag::Nsfw]);
        assert_eq!(
            policy.tags_for("b"),
            vec![SubmissionTag::Nsfw, SubmissionTag::Spoiler]
        );
        assert!(policy.tags_for("c").is_empty());
    }

    #[test]
    fn test_stored_json_omits_unset_fields() {
        let policy = CommunityPolicy {
            approve_posts: Some(false),
            ..Default::default()
        };
        let json = serde_json::to_string(&policy).unwrap();
        assert_eq!(json, r#"{"version":1,"approve_posts":false}"#);
    }
}
