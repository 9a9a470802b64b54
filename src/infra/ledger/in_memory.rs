// In-memory ledger.
//
// Same contract as the SQLite ledger, backed by DashMap. Used by the service
// tests and handy for dry runs against a live account without a database.

use crate::core::ledger::{
    CommunityRecord, JournalRecord, Ledger, LedgerError, PendingEntry, ReplyMatchRecord,
};
use crate::core::policy::CommunityPolicy;
use async_trait::async_trait;
use dashmap::DashMap;
use std::collections::{BTreeMap, HashSet, VecDeque};
use std::sync::Mutex;

#[derive(Default)]
struct SeenFifo {
    order: VecDeque<String>,
    members: HashSet<String>,
}

pub struct InMemoryLedger {
    dedup_capacity: usize,
    communities: DashMap<String, CommunityRecord>,
    seen: Mutex<SeenFifo>,
    pending: DashMap<String, PendingEntry>,
    journal: Mutex<Vec<JournalRecord>>,
    reply_matches: Mutex<Vec<ReplyMatchRecord>>,
    counters: DashMap<(String, String), u64>,
}

impl InMemoryLedger {
    pub fn new(dedup_capacity: usize) -> Self {
        Self {
            dedup_capacity,
            communities: DashMap::new(),
            seen: Mutex::new(SeenFifo::default()),
            pending: DashMap::new(),
            journal: Mutex::new(Vec::new()),
            reply_matches: Mutex::new(Vec::new()),
            counters: DashMap::new(),
        }
    }

    fn poisoned<T>(_: T) -> LedgerError {
        LedgerError::Storage("in-memory ledger lock poisoned".to_string())
    }

    /// Audit rows written so far.
    #[cfg(test)]
    pub fn reply_matches(&self) -> Vec<ReplyMatchRecord> {
        self.reply_matches
            .lock()
            .map(|rows| rows.clone())
            .unwrap_or_default()
    }
}

#[async_trait]
impl Ledger for InMemoryLedger {
    async fn upsert_community(&self, record: &CommunityRecord) -> Result<(), LedgerError> {
        self.communities.insert(record.name.clone(), record.clone());
        Ok(())
    }

    async fn get_community(&self, name: &str) -> Result<Option<CommunityRecord>, LedgerError> {
        Ok(self
            .communities
            .get(&name.to_lowercase())
            .map(|c| c.clone()))
    }

    async fn list_communities(&self) -> Result<Vec<CommunityRecord>, LedgerError> {
        let mut all: Vec<CommunityRecord> =
            self.communities.iter().map(|c| c.value().clone()).collect();
        all.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(all)
    }

    async fn set_enforced(&self, name: &str, enforced: bool) -> Result<bool, LedgerError> {
        match self.communities.get_mut(&name.to_lowercase()) {
            Some(mut record) => {
                record.enforced = enforced;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn save_policy(
        &self,
        name: &str,
        policy: &CommunityPolicy,
    ) -> Result<bool, LedgerError> {
        match self.communities.get_mut(&name.to_lowercase()) {
            Some(mut record) => {
                record.policy = policy.clone();
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn delete_community(&self, name: &str) -> Result<bool, LedgerError> {
        Ok(self.communities.remove(&name.to_lowercase()).is_some())
    }

    async fn is_seen(&self, submission_id: &str) -> Result<bool, LedgerError> {
        let seen = self.seen.lock().map_err(Self::poisoned)?;
        Ok(seen.members.contains(submission_id))
    }

    async fn mark_seen(&self, submission_id: &str) -> Result<bool, LedgerError> {
        let mut seen = self.seen.lock().map_err(Self::poisoned)?;
        if !seen.members.insert(submission_id.to_string()) {
            return Ok(false);
        }
        seen.order.push_back(submission_id.to_string());
        while seen.order.len() > self.dedup_capacity {
            if let Some(evicted) = seen.order.pop_front() {
                seen.members.remove(&evicted);
            }
        }
        Ok(true)
    }

    async fn add_pending(&self, entry: &PendingEntry) -> Result<bool, LedgerError> {
        if self.pending.contains_key(&entry.submission_id) {
            return Ok(false);
        }
        self.pending
            .insert(entry.submission_id.clone(), entry.clone());
        Ok(true)
    }

    async fn remove_pending(&self, submission_id: &str) -> Result<bool, LedgerError> {
        Ok(self.pending.remove(submission_id).is_some())
    }

    async fn get_pending(&self, submission_id: &str) -> Result<Option<PendingEntry>, LedgerError> {
        Ok(self.pending.get(submission_id).map(|e| e.clone()))
    }

    async fn list_pending(&self) -> Result<Vec<PendingEntry>, LedgerError> {
        let mut entries: Vec<PendingEntry> =
            self.pending.iter().map(|e| e.value().clone()).collect();
        entries.sort_by(|a, b| {
            a.created_utc
                .cmp(&b.created_utc)
                .then_with(|| a.submission_id.cmp(&b.submission_id))
        });
        Ok(entries)
    }

    async fn append_journal(&self, record: &JournalRecord) -> Result<(), LedgerError> {
        self.journal
            .lock()
            .map_err(Self::poisoned)?
            .push(record.clone());
        Ok(())
    }

    async fn journal_for(&self, submission_id: &str) -> Result<Vec<JournalRecord>, LedgerError> {
        let journal = self.journal.lock().map_err(Self::poisoned)?;
        let mut rows: Vec<JournalRecord> = journal
            .iter()
            .filter(|r| r.submission_id == submission_id)
            .cloned()
            .collect();
        rows.sort_by_key(|r| r.recorded_utc);
        Ok(rows)
    }

    async fn trim_journal(&self, keep: usize) -> Result<u64, LedgerError> {
        let mut journal = self.journal.lock().map_err(Self::poisoned)?;
        let excess = journal.len().saturating_sub(keep);
        journal.drain(..excess);
        Ok(excess as u64)
    }

    async fn record_reply_match(&self, record: &ReplyMatchRecord) -> Result<(), LedgerError> {
        self.reply_matches
            .lock()
            .map_err(Self::poisoned)?
            .push(record.clone());
        Ok(())
    }

    async fn increment_action(&self, community: &str, action: &str) -> Result<(), LedgerError> {
        *self
            .counters
            .entry((community.to_lowercase(), action.to_string()))
            .or_insert(0) += 1;
        Ok(())
    }

    async fn action_counts(&self, community: &str) -> Result<BTreeMap<String, u64>, LedgerError> {
        let community = community.to_lowercase();
        Ok(self
            .counters
            .iter()
            .filter(|entry| entry.key().0 == community)
            .map(|entry| (entry.key().1.clone(), *entry.value()))
            .collect())
    }
}
