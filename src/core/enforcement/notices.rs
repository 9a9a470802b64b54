// Outbound message copy.
//
// Subjects carry `r/<community>` and bodies carry the
// submission permalink because the inbox front-end parses both back out of a
// reply's parent message.

use crate::core::platform::{CategoryTemplate, Submission};
use crate::core::policy::CommunityPolicy;
use crate::core::schedule::ScheduleVerdict;
use rand::seq::SliceRandom;

pub const PLATFORM_URL: &str = "https://www.reddit.com";

/// Every reminder subject contains this, so replies can be recognised.
pub const REMINDER_SUBJECT_MARKER: &str = "needs a post flair";

const GOODBYES: [&str; 4] = ["Have a great day!", "Cheers!", "Thanks!", "Take care!"];

#[derive(Debug, Clone, PartialEq)]
pub struct Notice {
    pub subject: String,
    pub body: String,
}

fn link(submission: &Submission) -> String {
    format!("{}{}", PLATFORM_URL, submission.permalink)
}

fn sign_off(policy: &CommunityPolicy, community: &str) -> String {
    let goodbye = policy
        .custom_goodbye()
        .map(str::to_string)
        .or_else(|| {
            GOODBYES
                .choose(&mut rand::thread_rng())
                .map(|g| g.to_string())
        })
        .unwrap_or_default();
    format!(
        "\n\n{}\n\n*{} for r/{}*",
        goodbye,
        policy.display_name(),
        community
    )
}

fn template_list(templates: &[CategoryTemplate]) -> String {
    templates
        .iter()
        .map(|t| format!("* {}", t.text))
        .collect::<Vec<_>>()
        .join("\n")
}

/// Reminder sent to the author of an uncategorized submission.
pub fn reminder(
    submission: &Submission,
    templates: &[CategoryTemplate],
    policy: &CommunityPolicy,
    removed: bool,
    reply_selects: bool,
) -> Notice {
    let community = &submission.community;
    let mut body = String::new();

    if let Some(message) = policy.custom_message() {
        body.push_str(&format!("**Message from the moderators:** {}\n\n", message));
    }
    body.push_str(&format!(
        "Hi! Your post [\"{}\"]({}) on r/{} does not have a post flair yet.",
        submission.title,
        link(submission),
        community
    ));
    if removed {
        body.push_str(
            "\n\n**Your post has been removed but will be automatically restored if you \
             select a flair for it within 24 hours.**",
        );
    }
    body.push_str(&format!(
        "\n\nPlease pick one of these flairs:\n\n{}",
        template_list(templates)
    ));
    if reply_selects {
        body.push_str(
            "\n\nYou can also **reply to this message with the name of the flair** and it \
             will be applied for you.",
        );
    }
    body.push_str(&sign_off(policy, community));

    Notice {
        subject: format!(
            "[Notification] Your post on r/{} {}!",
            community, REMINDER_SUBJECT_MARKER
        ),
        body,
    }
}

/// Heads-up to moderators on the alert list after a strict removal.
pub fn removal_alert(submission: &Submission) -> Notice {
    Notice {
        subject: format!(
            "[Alert] Unflaired post removed on r/{}",
            submission.community
        ),
        body: format!(
            "The post [\"{}\"]({}) by u/{} was removed for missing a flair. It will be \
             restored automatically if the author selects one within 24 hours.",
            submission.title,
            link(submission),
            submission.author.as_deref().unwrap_or("[deleted]")
        ),
    }
}

/// Sent when a pending submission is approved after gaining a flair.
pub fn approval(submission: &Submission, policy: &CommunityPolicy, mod_selected: bool) -> Notice {
    let (subject, opener) = if mod_selected {
        (
            format!(
                "[Notification] Your post has been assigned a flair on r/{}!",
                submission.community
            ),
            "It appears a moderator has selected a flair for your post",
        )
    } else {
        (
            format!(
                "[Notification] Your flaired post is approved on r/{}!",
                submission.community
            ),
            "Thanks for selecting a flair for your post",
        )
    };

    Notice {
        subject,
        body: format!(
            "{} [\"{}\"]({}). It has been approved and is now visible to everyone.{}",
            opener,
            submission.title,
            link(submission),
            sign_off(policy, &submission.community)
        ),
    }
}

/// Sent in reminder-only mode once a flair is on the submission.
pub fn flair_acknowledged(submission: &Submission, policy: &CommunityPolicy) -> Notice {
    Notice {
        subject: format!(
            "[Notification] Your post has been assigned a flair on r/{}!",
            submission.community
        ),
        body: format!(
            "Thanks! Your post [\"{}\"]({}) now has a flair.{}",
            submission.title,
            link(submission),
            sign_off(policy, &submission.community)
        ),
    }
}

/// The chosen flair is not allowed today.
pub fn schedule_rejection(
    submission: &Submission,
    flair_text: &str,
    verdict: &ScheduleVerdict,
    policy: &CommunityPolicy,
) -> Notice {
    Notice {
        subject: format!(
            "[Notification] Your post on r/{} is not on a scheduled day.",
            submission.community
        ),
        body: format!(
            "Posts with the flair **{}** are only allowed on: {}. Your post [\"{}\"]({}) \
             was not published on one of those days. Please post again on a scheduled day.{}",
            flair_text,
            verdict.permitted_days_label(),
            submission.title,
            link(submission),
            sign_off(policy, &submission.community)
        ),
    }
}

/// One-off operator notice when approvals keep being refused.
pub fn integrity_alert(username: &str, denials: u32) -> Notice {
    Notice {
        subject: format!("[Integrity] Approvals failing for u/{}", username),
        body: format!(
            "The last {} approval attempts by u/{} were refused by the platform. The account \
             may be restricted. Restorations will keep failing until this is resolved.",
            denials, username
        ),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn submission() -> Submission {
        Submission {
            id: "abc123".to_string(),
            community: "pics".to_string(),
            author: Some("alice".to_string()),
            title: "A photo".to_string(),
            permalink: "/r/pics/comments/abc123/a_photo/".to_string(),
            created_utc: Utc::now(),
            flair_text: None,
            flair_css_class: None,
            flair_template_id: None,
            removed_by: None,
            num_reports: None,
        }
    }

    #[test]
    fn test_reminder_carries_marker_link_and_custom_message() {
        let policy = CommunityPolicy {
            custom_message: Some("Read the sidebar.".to_string()),
            custom_goodbye: Some("Bye!".to_string()),
            ..Default::default()
        };
        let templates = vec![CategoryTemplate {
            id: "t1".to_string(),
            text: "Help".to_string(),
            mod_only: false,
        }];

        let notice = reminder(&submission(), &templates, &policy, true, true);
        assert!(notice.subject.contains(REMINDER_SUBJECT_MARKER));
        assert!(notice.subject.contains("r/pics"));
        assert!(notice
            .body
            .starts_with("**Message from the moderators:** Read the sidebar."));
        assert!(notice.body.contains("/r/pics/comments/abc123/"));
        assert!(notice.body.contains("automatically restored"));
        assert!(notice.body.contains("reply to this message"));
        assert!(notice.body.contains("Bye!"));
    }

    #[test]
    fn test_default_reminder_omits_removal_copy() {
        let notice = reminder(&submission(), &[], &CommunityPolicy::default(), false, false);
        assert!(!notice.body.contains("removed"));
        assert!(!notice.body.contains("reply to this message"));
    }
}
