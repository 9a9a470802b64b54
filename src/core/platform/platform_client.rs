// Platform client port.
//
// Everything the engine asks of the hosting platform goes through this trait.
// The real adapter lives in `infra/reddit`; tests use a mock.

use super::platform_models::{
    CategoryTemplate, InboxMessage, ModLogEntry, Permissions, Submission, SubmissionTag,
};
use async_trait::async_trait;
use thiserror::Error;

// ============================================================================
// ERRORS
// ============================================================================

#[derive(Debug, Error)]
pub enum PlatformError {
    /// Network trouble, rate limiting or a 5xx. Retried implicitly next cycle.
    #[error("Transient platform error: {0}")]
    Transient(String),

    #[error("Forbidden: {0}")]
    Forbidden(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Platform API error: {0}")]
    Api(String),
}

impl PlatformError {
    pub fn is_transient(&self) -> bool {
        matches!(self, PlatformError::Transient(_))
    }

    pub fn is_forbidden(&self) -> bool {
        matches!(self, PlatformError::Forbidden(_))
    }
}

// ============================================================================
// CLIENT TRAIT (PORT)
// ============================================================================

/// Primitives exposed by the platform. Every call is rate limited and may fail
/// transiently.
#[async_trait]
pub trait PlatformClient: Send + Sync {
    /// Username the client is authenticated as.
    fn username(&self) -> &str;

    /// Newest submissions across a set of communities, newest first.
    async fn list_new(
        &self,
        communities: &[String],
        limit: usize,
    ) -> Result<Vec<Submission>, PlatformError>;

    /// Batched lookup. Unknown ids are silently absent from the result.
    async fn get_by_ids(&self, ids: &[String]) -> Result<Vec<Submission>, PlatformError>;

    async fn get_permissions(&self, community: &str) -> Result<Permissions, PlatformError>;

    async fn list_moderators(&self, community: &str) -> Result<Vec<String>, PlatformError>;

    /// Templates regular users may pick.
    async fn list_category_templates(
        &self,
        community: &str,
    ) -> Result<Vec<CategoryTemplate>, PlatformError>;

    async fn remove(&self, submission: &Submission) -> Result<(), PlatformError>;

    async fn approve(&self, submission: &Submission) -> Result<(), PlatformError>;

    async fn set_category(
        &self,
        submission: &Submission,
        template_id: &str,
    ) -> Result<(), PlatformError>;

    async fn send_message(&self, user: &str, subject: &str, body: &str)
        -> Result<(), PlatformError>;

    async fn get_mod_log(
        &self,
        community: &str,
        action: &str,
        limit: usize,
    ) -> Result<Vec<ModLogEntry>, PlatformError>;

    async fn apply_tag(&self, submission: &Submission, tag: SubmissionTag)
        -> Result<(), PlatformError>;

    async fn unread_messages(&self) -> Result<Vec<InboxMessage>, PlatformError>;

    async fn get_message(&self, id: &str) -> Result<Option<InboxMessage>, PlatformError>;

    async fn mark_read(&self, message: &InboxMessage) -> Result<(), PlatformError>;

    async fn reply(&self, message: &InboxMessage, body: &str) -> Result<(), PlatformError>;

    async fn accept_invite(&self, community: &str) -> Result<(), PlatformError>;
}
