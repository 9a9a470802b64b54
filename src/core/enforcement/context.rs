// Per-shard context shared by every enforcement component.
//
// Built once in `main` and handed around behind an `Arc`. There are no ambient
// globals: the ledger handle, platform session, settings and identity all live
// here.

use crate::core::ledger::{JournalRecord, Ledger, LedgerError};
use crate::core::platform::{PlatformClient, PlatformError, AUTOMATION_ACCOUNT};
use crate::core::settings::EngineSettings;
use chrono::{DateTime, Utc};
use thiserror::Error;

// ============================================================================
// ERRORS
// ============================================================================

#[derive(Debug, Error)]
pub enum EngineError {
    #[error(transparent)]
    Platform(#[from] PlatformError),

    #[error(transparent)]
    Ledger(#[from] LedgerError),
}

impl EngineError {
    /// Transient failures are expected noise and get retried next cycle.
    pub fn is_transient(&self, settings: &EngineSettings) -> bool {
        match self {
            EngineError::Platform(err) => {
                err.is_transient() || settings.is_transient_text(&err.to_string())
            }
            EngineError::Ledger(err) => settings.is_transient_text(&err.to_string()),
        }
    }
}

// ============================================================================
// IDENTITY
// ============================================================================

/// Which bot account this shard runs as, and who its siblings are.
#[derive(Debug, Clone)]
pub struct ShardIdentity {
    pub instance: u32,
    pub username: String,
    /// Usernames of the other shards.
    pub siblings: Vec<String>,
    pub accepting_invites: bool,
    /// Account with global query scope that receives integrity notices.
    pub operator: Option<String>,
}

impl ShardIdentity {
    pub fn new(instance: u32, username: &str) -> Self {
        Self {
            instance,
            username: username.to_string(),
            siblings: Vec::new(),
            accepting_invites: true,
            operator: None,
        }
    }

    /// True for this shard, any sibling shard, or the platform's automation account.
    pub fn is_automated_account(&self, name: &str) -> bool {
        name.eq_ignore_ascii_case(&self.username)
            || name.eq_ignore_ascii_case(AUTOMATION_ACCOUNT)
            || self.siblings.iter().any(|s| s.eq_ignore_ascii_case(name))
    }

    pub fn is_operator(&self, name: &str) -> bool {
        self.operator
            .as_deref()
            .map_or(false, |op| op.eq_ignore_ascii_case(name))
    }
}

// ============================================================================
// CONTEXT
// ============================================================================

pub struct EngineContext<L: Ledger, P: PlatformClient> {
    pub ledger: L,
    pub platform: P,
    pub settings: EngineSettings,
    pub identity: ShardIdentity,
}

impl<L: Ledger, P: PlatformClient> EngineContext<L, P> {
    pub fn new(ledger: L, platform: P, settings: EngineSettings, identity: ShardIdentity) -> Self {
        Self {
            ledger,
            platform,
            settings,
            identity,
        }
    }

    /// Append a journal line for a submission and bump the community counter.
    pub async fn record_action(
        &self,
        submission_id: &str,
        community: &str,
        action: &str,
        now: DateTime<Utc>,
    ) -> Result<(), LedgerError> {
        self.ledger
            .append_journal(&JournalRecord {
                submission_id: submission_id.to_string(),
                recorded_utc: now,
                action: action.to_string(),
            })
            .await?;
        self.ledger.increment_action(community, action).await
    }
}
