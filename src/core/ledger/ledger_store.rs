// Ledger port.
//
// Every method is a single keyed read or an immediately committed, idempotent
// write. Nothing is batched across a cycle, so a failure halfway through a
// cycle leaves the ledger consistent.

use super::ledger_models::{CommunityRecord, JournalRecord, PendingEntry, ReplyMatchRecord};
use crate::core::policy::CommunityPolicy;
use async_trait::async_trait;
use std::collections::BTreeMap;
use thiserror::Error;

// ============================================================================
// ERRORS
// ============================================================================

#[derive(Debug, Error)]
pub enum LedgerError {
    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Corrupt ledger row: {0}")]
    Corrupt(String),
}

// ============================================================================
// STORAGE TRAIT (PORT)
// ============================================================================

#[async_trait]
pub trait Ledger: Send + Sync {
    // --- communities ---------------------------------------------------------

    async fn upsert_community(&self, record: &CommunityRecord) -> Result<(), LedgerError>;

    async fn get_community(&self, name: &str) -> Result<Option<CommunityRecord>, LedgerError>;

    async fn list_communities(&self) -> Result<Vec<CommunityRecord>, LedgerError>;

    /// Returns false if the community is unknown.
    async fn set_enforced(&self, name: &str, enforced: bool) -> Result<bool, LedgerError>;

    /// Returns false if the community is unknown.
    async fn save_policy(&self, name: &str, policy: &CommunityPolicy)
        -> Result<bool, LedgerError>;

    async fn delete_community(&self, name: &str) -> Result<bool, LedgerError>;

    /// Names of communities with enforcement switched on, sorted.
    async fn enforced_communities(&self) -> Result<Vec<String>, LedgerError> {
        let mut names: Vec<String> = self
            .list_communities()
            .await?
            .into_iter()
            .filter(|c| c.enforced)
            .map(|c| c.name)
            .collect();
        names.sort();
        Ok(names)
    }

    // --- dedup FIFO ----------------------------------------------------------

    async fn is_seen(&self, submission_id: &str) -> Result<bool, LedgerError>;

    /// Insert into the capped FIFO, evicting the oldest ids beyond capacity.
    /// Returns true if the id was not already present.
    async fn mark_seen(&self, submission_id: &str) -> Result<bool, LedgerError>;

    // --- pending queue -------------------------------------------------------

    /// Returns false and leaves the existing row alone if one is present.
    async fn add_pending(&self, entry: &PendingEntry) -> Result<bool, LedgerError>;

    async fn remove_pending(&self, submission_id: &str) -> Result<bool, LedgerError>;

    async fn get_pending(&self, submission_id: &str) -> Result<Option<PendingEntry>, LedgerError>;

    /// Oldest first.
    async fn list_pending(&self) -> Result<Vec<PendingEntry>, LedgerError>;

    // --- operations journal --------------------------------------------------

    async fn append_journal(&self, record: &JournalRecord) -> Result<(), LedgerError>;

    /// Oldest first.
    async fn journal_for(&self, submission_id: &str) -> Result<Vec<JournalRecord>, LedgerError>;

    /// Keep only the newest `keep` journal rows. Returns rows deleted.
    async fn trim_journal(&self, keep: usize) -> Result<u64, LedgerError>;

    // --- audit and counters --------------------------------------------------

    async fn record_reply_match(&self, record: &ReplyMatchRecord) -> Result<(), LedgerError>;

    async fn increment_action(&self, community: &str, action: &str) -> Result<(), LedgerError>;

    async fn action_counts(&self, community: &str) -> Result<BTreeMap<String, u64>, LedgerError>;
}
