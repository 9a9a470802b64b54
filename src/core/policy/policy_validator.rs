// Boundary validator for policy documents.
//
// Operators send a TOML document. It is checked field by field and either
// produces a complete `CommunityPolicy` or a single field-level error; nothing
// is partially applied.

use super::policy_models::{
    CommunityPolicy, CUSTOM_MESSAGE_LIMIT, CUSTOM_NAME_LIMIT, POLICY_VERSION, SCHEDULE_DAYS,
};
use crate::core::platform::SubmissionTag;
use once_cell::sync::Lazy;
use regex::Regex;
use std::collections::BTreeMap;
use thiserror::Error;
use toml::{Table, Value};

static TEMPLATE_ID: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^[0-9a-f]{8}-[0-9a-f]{4}-[0-9a-f]{4}-[0-9a-f]{4}-[0-9a-f]{12}$")
        .expect("template id pattern is valid")
});

/// Keys used by the first generation of stored policies, mapped to today's names.
const LEGACY_KEYS: [(&str, &str); 5] = [
    ("flair_enforce_moderators", "enforce_moderators"),
    ("flair_enforce_approve_posts", "approve_posts"),
    ("flair_enforce_custom_message", "custom_message"),
    ("flair_enforce_whitelist", "whitelist"),
    ("flair_enforce_alert_list", "alert_list"),
];

/// Legacy keys that no longer have a meaning and are dropped on migration.
const RETIRED_KEYS: [&str; 1] = ["userflair_statistics"];

// ============================================================================
// ERRORS
// ============================================================================

#[derive(Debug, Error, PartialEq)]
pub enum PolicyError {
    #[error("Could not parse the configuration: {0}")]
    Syntax(String),

    #[error("`{field}` is not a recognised setting")]
    UnknownField { field: String },

    #[error("`{field}` must be {expected}")]
    WrongType {
        field: String,
        expected: &'static str,
    },

    #[error("`flair_tags.{key}` is not a supported tag (use nsfw, oc or spoiler)")]
    UnknownTag { key: String },

    #[error("`flair_schedule.{key}` is not a weekday (use Sun, Mon, Tue, Wed, Thu, Fri or Sat)")]
    UnknownDay { key: String },

    #[error("`{field}` contains `{value}`, which is not a flair template id")]
    InvalidTemplateId { field: String, value: String },

    #[error("Policy version {found} is not supported")]
    UnsupportedVersion { found: i64 },

    #[error("Stored policy is unreadable: {0}")]
    Corrupt(String),
}

impl PolicyError {
    fn wrong_type(field: &str, expected: &'static str) -> Self {
        PolicyError::WrongType {
            field: field.to_string(),
            expected,
        }
    }
}

// ============================================================================
// PARSING
// ============================================================================

/// Parse and validate an operator-submitted policy document.
pub fn parse_policy_document(text: &str) -> Result<CommunityPolicy, PolicyError> {
    let table: Table = text
        .parse()
        .map_err(|e: toml::de::Error| PolicyError::Syntax(e.message().to_string()))?;
    validate_table(&table)
}

/// Validate an already-parsed document.
pub fn validate_table(table: &Table) -> Result<CommunityPolicy, PolicyError> {
    let mut policy = CommunityPolicy::default();

    for (field, value) in table {
        match field.as_str() {
            "version" => {
                let found = value
                    .as_integer()
                    .ok_or_else(|| PolicyError::wrong_type(field, "an integer"))?;
                if found != POLICY_VERSION as i64 {
                    return Err(PolicyError::UnsupportedVersion { found });
                }
            }
            "enforce_moderators" => policy.enforce_moderators = Some(expect_bool(field, value)?),
            "approve_posts" => policy.approve_posts = Some(expect_bool(field, value)?),
            "custom_message" => {
                policy.custom_message =
                    Some(capped(expect_str(field, value)?, CUSTOM_MESSAGE_LIMIT))
            }
            "custom_name" => {
                policy.custom_name = Some(capped(expect_str(field, value)?, CUSTOM_NAME_LIMIT))
            }
            "custom_goodbye" => {
                policy.custom_goodbye = Some(capped(expect_str(field, value)?, CUSTOM_NAME_LIMIT))
            }
            "whitelist" => policy.whitelist = Some(usernames(field, value)?),
            "alert_list" => policy.alert_list = Some(usernames(field, value)?),
            "flair_tags" => {
                policy.flair_tags = Some(template_map(field, value, |key| {
                    SubmissionTag::from_key(key)
                        .map(|tag| tag.key().to_string())
                        .ok_or_else(|| PolicyError::UnknownTag {
                            key: key.to_string(),
                        })
                })?)
            }
            "flair_schedule" => {
                policy.flair_schedule = Some(template_map(field, value, |key| {
                    SCHEDULE_DAYS
                        .iter()
                        .find(|day| day.eq_ignore_ascii_case(key))
                        .map(|day| day.to_string())
                        .ok_or_else(|| PolicyError::UnknownDay {
                            key: key.to_string(),
                        })
                })?)
            }
            _ => {
                return Err(PolicyError::UnknownField {
                    field: field.clone(),
                })
            }
        }
    }

    Ok(policy)
}

/// Decode a stored policy, upgrading older layouts.
pub fn migrate_stored(version: u32, raw: &str) -> Result<CommunityPolicy, PolicyError> {
    match version {
        POLICY_VERSION => {
            serde_json::from_str(raw).map_err(|e| PolicyError::Corrupt(e.to_string()))
        }
        0 => {
            let legacy: serde_json::Map<String, serde_json::Value> =
                serde_json::from_str(raw).map_err(|e| PolicyError::Corrupt(e.to_string()))?;

            let mut table = Table::new();
            for (key, value) in legacy {
                if RETIRED_KEYS.contains(&key.as_str()) {
                    continue;
                }
                let key = LEGACY_KEYS
                    .iter()
                    .find(|(old, _)| *old == key)
                    .map(|(_, new)| new.to_string())
                    .unwrap_or(key);
                let value =
                    Value::try_from(value).map_err(|e| PolicyError::Corrupt(e.to_string()))?;
                table.insert(key, value);
            }
            validate_table(&table)
        }
        other => Err(PolicyError::UnsupportedVersion {
            found: other as i64,
        }),
    }
}

// ============================================================================
// FIELD HELPERS
// ============================================================================

fn expect_bool(field: &str, value: &Value) -> Result<bool, PolicyError> {
    value
        .as_bool()
        .ok_or_else(|| PolicyError::wrong_type(field, "true or false"))
}

fn expect_str<'a>(field: &str, value: &'a Value) -> Result<&'a str, PolicyError> {
    value
        .as_str()
        .ok_or_else(|| PolicyError::wrong_type(field, "a string"))
}

fn capped(text: &str, limit: usize) -> String {
    text.chars()
        .take(limit)
        .collect::<String>()
        .trim()
        .to_string()
}

fn string_list<'a>(field: &str, value: &'a Value) -> Result<Vec<&'a str>, PolicyError> {
    let items = value
        .as_array()
        .ok_or_else(|| PolicyError::wrong_type(field, "a list of strings"))?;
    items
        .iter()
        .map(|item| {
            item.as_str()
                .ok_or_else(|| PolicyError::wrong_type(field, "a list of strings"))
        })
        .collect()
}

/// Lowercase, trim and strip `u/` prefixes; drop blanks and duplicates.
fn usernames(field: &str, value: &Value) -> Result<Vec<String>, PolicyError> {
    let mut names: Vec<String> = Vec::new();
    for raw in string_list(field, value)? {
        let name = raw.trim().to_lowercase();
        let name = name
            .strip_prefix("/u/")
            .or_else(|| name.strip_prefix("u/"))
            .unwrap_or(&name)
            .to_string();
        if !name.is_empty() && !names.contains(&name) {
            names.push(name);
        }
    }
    Ok(names)
}

fn template_map(
    field: &str,
    value: &Value,
    normalize_key: impl Fn(&str) -> Result<String, PolicyError>,
) -> Result<BTreeMap<String, Vec<String>>, PolicyError> {
    let table = value
        .as_table()
        .ok_or_else(|| PolicyError::wrong_type(field, "a table of template id lists"))?;

    let mut map = BTreeMap::new();
    for (key, ids) in table {
        let normalized = normalize_key(key)?;
        let entry_field = format!("{}.{}", field, key);
        let mut templates = Vec::new();
        for id in string_list(&entry_field, ids)? {
            let id = id.trim().to_lowercase();
            if !TEMPLATE_ID.is_match(&id) {
                return Err(PolicyError::InvalidTemplateId {
                    field: entry_field,
                    value: id,
                });
            }
            templates.push(id);
        }
        map.insert(normalized, templates);
    }
    Ok(map)
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    const DISCUSSION: &str = "1c5e3a52-2f1d-11ee-8a3b-0e6f1c2b9d41";
    const HELP: &str = "2d7f4b63-2f1d-11ee-9c4d-0e6f1c2b9d41";

    #[test]
    fn test_accepts_complete_document() {
        let doc = format!(
            r#"
            enforce_moderators = true
            approve_posts = false
            custom_message = "  Please read the rules.  "
            whitelist = ["  SomeUser ", "u/Other", "someuser"]
            alert_list = ["ModOne"]
            custom_name = "Warden"

            [flair_tags]
            nsfw = ["{HELP}"]

            [flair_schedule]
            Mon = ["{DISCUSSION}"]
            wed = ["{DISCUSSION}"]
            "#
        );

        let policy = parse_policy_document(&doc).unwrap();
        assert!(policy.enforce_moderators());
        assert!(!policy.approve_posts());
        assert_eq!(policy.custom_message(), Some("Please read the rules."));
        assert_eq!(
            policy.whitelist,
            Some(vec!["someuser".to_string(), "other".to_string()])
        );
        assert_eq!(policy.alert_list().to_vec(), vec!["modone".to_string()]);
        assert_eq!(policy.display_name(), "Warden");

        let schedule = policy.schedule().unwrap();
        assert_eq!(schedule.keys().collect::<Vec<_>>(), vec!["Mon", "Wed"]);
        assert_eq!(policy.tags_for(HELP), vec![SubmissionTag::Nsfw]);
    }

    #[test]
    fn test_rejects_unknown_field() {
        let err = parse_policy_document("flair_enforce = true").unwrap_err();
        assert_eq!(
            err,
            PolicyError::UnknownField {
                field: "flair_enforce".to_string()
            }
        );
    }

    #[test]
    fn test_rejects_wrong_type_with_field_name() {
        let err = parse_policy_document(r#"approve_posts = "yes""#).unwrap_err();
        assert_eq!(
            err,
            PolicyError::WrongType {
                field: "approve_posts".to_string(),
                expected: "true or false"
            }
        );
        assert!(err.to_string().contains("approve_posts"));
    }

    #[test]
    fn test_rejects_mixed_list() {
        let err = parse_policy_document(r#"whitelist = ["a", 3]"#).unwrap_err();
        assert!(matches!(err, PolicyError::WrongType { ref field, .. } if field == "whitelist"));
    }

    #[test]
    fn test_rejects_unknown_schedule_day_and_bad_template_id() {
        let err = parse_policy_document(&format!(
            "[flair_schedule]\nFunday = [\"{DISCUSSION}\"]"
        ))
        .unwrap_err();
        assert_eq!(
            err,
            PolicyError::UnknownDay {
                key: "Funday".to_string()
            }
        );

        let err = parse_policy_document("[flair_tags]\nspoiler = [\"not-an-id\"]").unwrap_err();
        assert_eq!(
            err,
            PolicyError::InvalidTemplateId {
                field: "flair_tags.spoiler".to_string(),
                value: "not-an-id".to_string()
            }
        );
    }

    #[test]
    fn test_caps_string_lengths() {
        let long = "x".repeat(CUSTOM_MESSAGE_LIMIT + 50);
        let doc = format!("custom_message = \"{long}\"\ncustom_goodbye = \"{long}\"");
        let policy = parse_policy_document(&doc).unwrap();
        assert_eq!(
            policy.custom_message.unwrap().chars().count(),
            CUSTOM_MESSAGE_LIMIT
        );
        assert_eq!(
            policy.custom_goodbye.unwrap().chars().count(),
            CUSTOM_NAME_LIMIT
        );
    }

    #[test]
    fn test_rejects_future_version() {
        let err = parse_policy_document("version = 7").unwrap_err();
        assert_eq!(err, PolicyError::UnsupportedVersion { found: 7 });
    }

    #[test]
    fn test_syntax_errors_are_reported() {
        let err = parse_policy_document("approve_posts = ").unwrap_err();
        assert!(matches!(err, PolicyError::Syntax(_)));
    }

    #[test]
    fn test_migrates_legacy_layout() {
        let raw = format!(
            r#"{{"flair_enforce_moderators": true, "flair_enforce_whitelist": ["Bob"],
                "userflair_statistics": false, "flair_schedule": {{"Tue": ["{HELP}"]}}}}"#
        );
        let policy = migrate_stored(0, &raw).unwrap();
        assert!(policy.enforce_moderators());
        assert!(policy.is_whitelisted("BOB"));
        assert!(policy.schedule().unwrap().contains_key("Tue"));
        assert_eq!(policy.version, POLICY_VERSION);
    }

    #[test]
    fn test_current_layout_round_trips_through_storage() {
        let policy = parse_policy_document("approve_posts = false").unwrap();
        let raw = serde_json::to_string(&policy).unwrap();
        assert_eq!(migrate_stored(POLICY_VERSION, &raw).unwrap(), policy);
    }
}
