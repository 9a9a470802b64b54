// Inbox classification.
//
// Turns an unread message into the one thing the engine should do about it.
// Only reminder replies may come from ordinary users; everything else has to
// be sent on behalf of a community.

use crate::core::enforcement::notices::REMINDER_SUBJECT_MARKER;
use crate::core::operator::OperatorCommand;
use crate::core::platform::{InboxMessage, PlatformClient, PlatformError};
use once_cell::sync::Lazy;
use regex::Regex;

const INVITATION_MARKER: &str = "invitation to moderate";
const DEMOD_MARKER: &str = "has been removed as a moderator from";

static SUBJECT_COMMUNITY: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\br/([A-Za-z0-9_]+)").expect("community pattern is valid"));

static PERMALINK_ID: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"/comments/([A-Za-z0-9_]+)").expect("permalink pattern is valid"));

#[derive(Debug, Clone, PartialEq)]
pub enum Intent {
    /// The author answered a flair reminder with a flair name.
    ReminderReply {
        community: String,
        submission_id: String,
        text: String,
    },
    Invitation {
        community: String,
    },
    Demodded {
        community: String,
    },
    Command {
        community: String,
        requester: String,
        command: OperatorCommand,
    },
    Unrecognised,
}

/// Community named in a reminder subject such as "re: ... on r/pics needs a post flair!".
pub fn subject_community(subject: &str) -> Option<String> {
    SUBJECT_COMMUNITY
        .captures(subject)
        .map(|caps| caps[1].to_lowercase())
}

/// Submission id from the first permalink in a message body.
pub fn permalink_submission_id(body: &str) -> Option<String> {
    PERMALINK_ID.captures(body).map(|caps| caps[1].to_string())
}

pub async fn classify<P: PlatformClient>(
    platform: &P,
    message: &InboxMessage,
) -> Result<Intent, PlatformError> {
    let subject = message.subject.to_lowercase();

    if subject.contains(REMINDER_SUBJECT_MARKER) {
        return classify_reminder_reply(platform, message).await;
    }

    let Some(community) = message.community.as_deref().map(str::to_lowercase) else {
        return Ok(Intent::Unrecognised);
    };

    if subject.contains(INVITATION_MARKER) {
        return Ok(Intent::Invitation { community });
    }
    if subject.contains(DEMOD_MARKER) {
        return Ok(Intent::Demodded { community });
    }

    match OperatorCommand::parse(&message.subject, &message.body) {
        Some(command) => Ok(Intent::Command {
            community,
            requester: message.author.clone().unwrap_or_default(),
            command,
        }),
        None => Ok(Intent::Unrecognised),
    }
}

async fn classify_reminder_reply<P: PlatformClient>(
    platform: &P,
    message: &InboxMessage,
) -> Result<Intent, PlatformError> {
    let (Some(parent_id), Some(community)) = (
        message.parent_id.as_deref(),
        subject_community(&message.subject),
    ) else {
        return Ok(Intent::Unrecognised);
    };

    let parent_id = parent_id.trim_start_matches("t4_");
    let Some(parent) = platform.get_message(parent_id).await? else {
        return Ok(Intent::Unrecognised);
    };

    // Only our own reminders count as a flair selection.
    let sent_by_us = parent
        .author
        .as_deref()
        .map_or(false, |a| a.eq_ignore_ascii_case(platform.username()));
    if !sent_by_us {
        return Ok(Intent::Unrecognised);
    }

    match permalink_submission_id(&parent.body) {
        Some(submission_id) => Ok(Intent::ReminderReply {
            community,
            submission_id,
            text: message.body.clone(),
        }),
        None => Ok(Intent::Unrecognised),
    }
}
