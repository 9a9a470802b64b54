// SQLite-backed ledger.
//
// Tables:
// - schema_migrations: applied schema versions
// - communities: per-community flags plus the policy as a versioned JSON document
// - seen_submissions: capped dedup FIFO, ordered by insert sequence
// - pending_submissions: removed submissions awaiting a category
// - operations_journal: append-only per-submission action log
// - reply_matches: audit of non-exact reply resolutions
// - community_actions: per-community action counters

use crate::core::ledger::{
    CommunityRecord, JournalRecord, Ledger, LedgerError, PendingEntry, ReplyMatchRecord,
};
use crate::core::policy::{migrate_stored, CommunityPolicy, POLICY_VERSION};
use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use sqlx::sqlite::{SqlitePoolOptions, SqliteRow};
use sqlx::{Pool, Row, Sqlite};
use std::collections::BTreeMap;
use std::path::Path;

/// Ordered schema steps. Append only; never edit an applied step.
const MIGRATIONS: [(i64, &str); 2] = [
    (
        1,
        r#"
        CREATE TABLE IF NOT EXISTS communities (
            name TEXT PRIMARY KEY,
            enforced BOOLEAN NOT NULL DEFAULT 1,
            shard INTEGER NOT NULL DEFAULT 0,
            added_utc TEXT NOT NULL,
            policy_version INTEGER NOT NULL,
            policy TEXT NOT NULL
        );
        CREATE TABLE IF NOT EXISTS seen_submissions (
            seq INTEGER PRIMARY KEY AUTOINCREMENT,
            submission_id TEXT NOT NULL UNIQUE
        );
        CREATE TABLE IF NOT EXISTS pending_submissions (
            submission_id TEXT PRIMARY KEY,
            created_utc TEXT NOT NULL
        );
        CREATE TABLE IF NOT EXISTS operations_journal (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            submission_id TEXT NOT NULL,
            recorded_utc TEXT NOT NULL,
            action TEXT NOT NULL
        );
        CREATE INDEX IF NOT EXISTS idx_operations_journal_submission
            ON operations_journal(submission_id, recorded_utc);
        "#,
    ),
    (
        2,
        r#"
        CREATE TABLE IF NOT EXISTS reply_matches (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            submission_id TEXT NOT NULL,
            community TEXT NOT NULL,
            reply_text TEXT NOT NULL,
            match_kind TEXT NOT NULL,
            template_id TEXT,
            template_text TEXT,
            recorded_utc TEXT NOT NULL
        );
        CREATE TABLE IF NOT EXISTS community_actions (
            community TEXT NOT NULL,
            action TEXT NOT NULL,
            count INTEGER NOT NULL DEFAULT 0,
            PRIMARY KEY (community, action)
        );
        "#,
    ),
];

fn storage(e: sqlx::Error) -> LedgerError {
    LedgerError::Storage(e.to_string())
}

fn timestamp(dt: DateTime<Utc>) -> String {
    dt.to_rfc3339_opts(SecondsFormat::Secs, true)
}

fn parse_timestamp(raw: &str) -> Result<DateTime<Utc>, LedgerError> {
    DateTime::parse_from_rfc3339(raw)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| LedgerError::Corrupt(format!("bad timestamp {raw:?}: {e}")))
}

pub struct SqliteLedger {
    pool: Pool<Sqlite>,
    dedup_capacity: usize,
}

impl SqliteLedger {
    /// Open (creating if needed) the database file and bring the schema up to date.
    pub async fn new(database_url: &str, dedup_capacity: usize) -> anyhow::Result<Self> {
        let path_str = database_url.trim_start_matches("sqlite://");
        if !database_url.contains(":memory:") && !Path::new(path_str).exists() {
            if let Some(parent) = Path::new(path_str).parent() {
                std::fs::create_dir_all(parent)?;
            }
            std::fs::File::create(path_str)?;
        }

        let conn_str = if database_url.starts_with("sqlite:") {
            database_url.to_string()
        } else {
            format!("sqlite://{}", database_url)
        };

        let pool = SqlitePoolOptions::new().connect(&conn_str).await?;
        let ledger = Self {
            pool,
            dedup_capacity,
        };
        ledger.migrate().await?;
        Ok(ledger)
    }

    /// Apply outstanding schema steps, then rewrite policies stored in an older layout.
    pub async fn migrate(&self) -> Result<(), LedgerError> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS schema_migrations (
                version INTEGER PRIMARY KEY,
                applied_utc TEXT NOT NULL
            );
            "#,
        )
        .execute(&self.pool)
        .await
        .map_err(storage)?;

        for (version, sql) in MIGRATIONS {
            let applied = sqlx::query("SELECT 1 FROM schema_migrations WHERE version = ?")
                .bind(version)
                .fetch_optional(&self.pool)
                .await
                .map_err(storage)?
                .is_some();
            if applied {
                continue;
            }

            sqlx::query(sql)
                .execute(&self.pool)
                .await
                .map_err(storage)?;
            sqlx::query("INSERT INTO schema_migrations (version, applied_utc) VALUES (?, ?)")
                .bind(version)
                .bind(timestamp(Utc::now()))
                .execute(&self.pool)
                .await
                .map_err(storage)?;
            tracing::info!(version, "Applied ledger migration");
        }

        self.upgrade_policies().await
    }

    async fn upgrade_policies(&self) -> Result<(), LedgerError> {
        let rows = sqlx::query("SELECT name, policy_version, policy FROM communities WHERE policy_version < ?")
            .bind(POLICY_VERSION as i64)
            .fetch_all(&self.pool)
            .await
            .map_err(storage)?;

        for row in rows {
            let name: String = row.get("name");
            let version: i64 = row.get("policy_version");
            let raw: String = row.get("policy");
            match migrate_stored(version as u32, &raw) {
                Ok(policy) => {
                    self.save_policy(&name, &policy).await?;
                    tracing::info!(community = %name, from = version, "Upgraded stored policy");
                }
                Err(err) => {
                    tracing::warn!(community = %name, error = %err, "Stored policy could not be upgraded");
                }
            }
        }
        Ok(())
    }

    fn decode_community(row: &SqliteRow) -> Result<CommunityRecord, LedgerError> {
        let name: String = row.get("name");
        let version: i64 = row.get("policy_version");
        let raw: String = row.get("policy");
        let policy = migrate_stored(version as u32, &raw)
            .map_err(|e| LedgerError::Corrupt(format!("policy for {name}: {e}")))?;

        Ok(CommunityRecord {
            enforced: row.get("enforced"),
            shard: row.get::<i64, _>("shard") as u32,
            added_utc: parse_timestamp(&row.get::<String, _>("added_utc"))?,
            policy,
            name,
        })
    }

    fn encode_policy(policy: &CommunityPolicy) -> Result<String, LedgerError> {
        serde_json::to_string(policy).map_err(|e| LedgerError::Storage(e.to_string()))
    }
}

#[async_trait]
impl Ledger for SqliteLedger {
    async fn upsert_community(&self, record: &CommunityRecord) -> Result<(), LedgerError> {
        sqlx::query(
            r#"
            INSERT INTO communities (name, enforced, shard, added_utc, policy_version, policy)
            VALUES (?, ?, ?, ?, ?, ?)
            ON CONFLICT(name) DO UPDATE SET
                enforced = excluded.enforced,
                shard = excluded.shard,
                policy_version = excluded.policy_version,
                policy = excluded.policy
            "#,
        )
        .bind(record.name.to_lowercase())
        .bind(record.enforced)
        .bind(record.shard as i64)
        .bind(timestamp(record.added_utc))
        .bind(POLICY_VERSION as i64)
        .bind(Self::encode_policy(&record.policy)?)
        .execute(&self.pool)
        .await
        .map_err(storage)?;
        Ok(())
    }

    async fn get_community(&self, name: &str) -> Result<Option<CommunityRecord>, LedgerError> {
        let row = sqlx::query("SELECT * FROM communities WHERE name = ?")
            .bind(name.to_lowercase())
            .fetch_optional(&self.pool)
            .await
            .map_err(storage)?;
        row.as_ref().map(Self::decode_community).transpose()
    }

    async fn list_communities(&self) -> Result<Vec<CommunityRecord>, LedgerError> {
        let rows = sqlx::query("SELECT * FROM communities ORDER BY name")
            .fetch_all(&self.pool)
            .await
            .map_err(storage)?;
        rows.iter().map(Self::decode_community).collect()
    }

    async fn set_enforced(&self, name: &str, enforced: bool) -> Result<bool, LedgerError> {
        let result = sqlx::query("UPDATE communities SET enforced = ? WHERE name = ?")
            .bind(enforced)
            .bind(name.to_lowercase())
            .execute(&self.pool)
            .await
            .map_err(storage)?;
        Ok(result.rows_affected() > 0)
    }

    async fn save_policy(
        &self,
        name: &str,
        policy: &CommunityPolicy,
    ) -> Result<bool, LedgerError> {
        let result =
            sqlx::query("UPDATE communities SET policy_version = ?, policy = ? WHERE name = ?")
                .bind(POLICY_VERSION as i64)
                .bind(Self::encode_policy(policy)?)
                .bind(name.to_lowercase())
                .execute(&self.pool)
                .await
                .map_err(storage)?;
        Ok(result.rows_affected() > 0)
    }

    async fn delete_community(&self, name: &str) -> Result<bool, LedgerError> {
        let result = sqlx::query("DELETE FROM communities WHERE name = ?")
            .bind(name.to_lowercase())
            .execute(&self.pool)
            .await
            .map_err(storage)?;
        Ok(result.rows_affected() > 0)
    }

    async fn is_seen(&self, submission_id: &str) -> Result<bool, LedgerError> {
        let row = sqlx::query("SELECT 1 FROM seen_submissions WHERE submission_id = ?")
            .bind(submission_id)
            .fetch_optional(&self.pool)
            .await
            .map_err(storage)?;
        Ok(row.is_some())
    }

    async fn mark_seen(&self, submission_id: &str) -> Result<bool, LedgerError> {
        let result = sqlx::query("INSERT OR IGNORE INTO seen_submissions (submission_id) VALUES (?)")
            .bind(submission_id)
            .execute(&self.pool)
            .await
            .map_err(storage)?;
        if result.rows_affected() == 0 {
            return Ok(false);
        }

        sqlx::query(
            r#"
            DELETE FROM seen_submissions WHERE seq NOT IN (
                SELECT seq FROM seen_submissions ORDER BY seq DESC LIMIT ?
            )
            "#,
        )
        .bind(self.dedup_capacity as i64)
        .execute(&self.pool)
        .await
        .map_err(storage)?;
        Ok(true)
    }

    async fn add_pending(&self, entry: &PendingEntry) -> Result<bool, LedgerError> {
        let result = sqlx::query(
            "INSERT OR IGNORE INTO pending_submissions (submission_id, created_utc) VALUES (?, ?)",
        )
        .bind(&entry.submission_id)
        .bind(timestamp(entry.created_utc))
        .execute(&self.pool)
        .await
        .map_err(storage)?;
        Ok(result.rows_affected() > 0)
    }

    async fn remove_pending(&self, submission_id: &str) -> Result<bool, LedgerError> {
        let result = sqlx::query("DELETE FROM pending_submissions WHERE submission_id = ?")
            .bind(submission_id)
            .execute(&self.pool)
            .await
            .map_err(storage)?;
        Ok(result.rows_affected() > 0)
    }

    async fn get_pending(&self, submission_id: &str) -> Result<Option<PendingEntry>, LedgerError> {
        let row = sqlx::query(
            "SELECT submission_id, created_utc FROM pending_submissions WHERE submission_id = ?",
        )
        .bind(submission_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(storage)?;

        match row {
            Some(row) => Ok(Some(PendingEntry {
                submission_id: row.get("submission_id"),
                created_utc: parse_timestamp(&row.get::<String, _>("created_utc"))?,
            })),
            None => Ok(None),
        }
    }

    async fn list_pending(&self) -> Result<Vec<PendingEntry>, LedgerError> {
        let rows = sqlx::query(
            "SELECT submission_id, created_utc FROM pending_submissions ORDER BY created_utc, submission_id",
        )
        .fetch_all(&self.pool)
        .await
        .map_err(storage)?;

        rows.iter()
            .map(|row| {
                Ok(PendingEntry {
                    submission_id: row.get("submission_id"),
                    created_utc: parse_timestamp(&row.get::<String, _>("created_utc"))?,
                })
            })
            .collect()
    }

    async fn append_journal(&self, record: &JournalRecord) -> Result<(), LedgerError> {
        sqlx::query(
            "INSERT INTO operations_journal (submission_id, recorded_utc, action) VALUES (?, ?, ?)",
        )
        .bind(&record.submission_id)
        .bind(timestamp(record.recorded_utc))
        .bind(&record.action)
        .execute(&self.pool)
        .await
        .map_err(storage)?;
        Ok(())
    }

    async fn journal_for(&self, submission_id: &str) -> Result<Vec<JournalRecord>, LedgerError> {
        let rows = sqlx::query(
            r#"
            SELECT submission_id, recorded_utc, action
            FROM operations_journal
            WHERE submission_id = ?
            ORDER BY recorded_utc, id
            "#,
        )
        .bind(submission_id)
        .fetch_all(&self.pool)
        .await
        .map_err(storage)?;

        rows.iter()
            .map(|row| {
                Ok(JournalRecord {
                    submission_id: row.get("submission_id"),
                    recorded_utc: parse_timestamp(&row.get::<String, _>("recorded_utc"))?,
                    action: row.get("action"),
                })
            })
            .collect()
    }

    async fn trim_journal(&self, keep: usize) -> Result<u64, LedgerError> {
        let result = sqlx::query(
            r#"
            DELETE FROM operations_journal WHERE id NOT IN (
                SELECT id FROM operations_journal ORDER BY id DESC LIMIT ?
            )
            "#,
        )
        .bind(keep as i64)
        .execute(&self.pool)
        .await
        .map_err(storage)?;
        Ok(result.rows_affected())
    }

    async fn record_reply_match(&self, record: &ReplyMatchRecord) -> Result<(), LedgerError> {
        sqlx::query(
            r#"
            INSERT INTO reply_matches (
                submission_id, community, reply_text, match_kind,
                template_id, template_text, recorded_utc
            )
            VALUES (?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&record.submission_id)
        .bind(&record.community)
        .bind(&record.reply_text)
        .bind(&record.match_kind)
        .bind(&record.template_id)
        .bind(&record.template_text)
        .bind(timestamp(record.recorded_utc))
        .execute(&self.pool)
        .await
        .map_err(storage)?;
        Ok(())
    }

    async fn increment_action(&self, community: &str, action: &str) -> Result<(), LedgerError> {
        sqlx::query(
            r#"
            INSERT INTO community_actions (community, action, count)
            VALUES (?, ?, 1)
            ON CONFLICT(community, action) DO UPDATE SET
                count = count + 1
            "#,
        )
        .bind(community.to_lowercase())
        .bind(action)
        .execute(&self.pool)
        .await
        .map_err(storage)?;
        Ok(())
    }

    async fn action_counts(&self, community: &str) -> Result<BTreeMap<String, u64>, LedgerError> {
        let rows = sqlx::query("SELECT action, count FROM community_actions WHERE community = ?")
            .bind(community.to_lowercase())
            .fetch_all(&self.pool)
            .await
            .map_err(storage)?;

        Ok(rows
            .iter()
            .map(|row| {
                (
                    row.get::<String, _>("action"),
                    row.get::<i64, _>("count") as u64,
                )
            })
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};
    use tempfile::NamedTempFile;

    async fn ledger(capacity: usize) -> (SqliteLedger, NamedTempFile) {
        let file = NamedTempFile::new().unwrap();
        let ledger = SqliteLedger::new(file.path().to_str().unwrap(), capacity)
            .await
            .unwrap();
        (ledger, file)
    }

    fn added() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 6, 1, 12, 0, 0).unwrap()
    }

    #[tokio::test]
    async fn test_community_round_trip_with_policy() {
        let (ledger, _file) = ledger(10).await;
        let mut record = CommunityRecord::new("AskScience", true, 2, added());
        record.policy.approve_posts = Some(false);
        ledger.upsert_community(&record).await.unwrap();

        let loaded = ledger.get_community("askscience").await.unwrap().unwrap();
        assert_eq!(loaded.name, "askscience");
        assert_eq!(loaded.shard, 2);
        assert!(!loaded.policy.approve_posts());

        assert!(ledger.set_enforced("askscience", false).await.unwrap());
        assert!(ledger.enforced_communities().await.unwrap().is_empty());
        assert!(!ledger.set_enforced("unknown", true).await.unwrap());

        assert!(ledger.delete_community("AskScience").await.unwrap());
        assert!(ledger.get_community("askscience").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_seen_fifo_evicts_oldest() {
        let (ledger, _file) = ledger(3).await;
        for id in ["a", "b", "c", "d"] {
            assert!(ledger.mark_seen(id).await.unwrap());
        }
        assert!(!ledger.mark_seen("d").await.unwrap());

        assert!(!ledger.is_seen("a").await.unwrap());
        for id in ["b", "c", "d"] {
            assert!(ledger.is_seen(id).await.unwrap());
        }
    }

    #[tokio::test]
    async fn test_pending_is_at_most_one_per_submission() {
        let (ledger, _file) = ledger(10).await;
        let entry = PendingEntry {
            submission_id: "xyz".to_string(),
            created_utc: added(),
        };
        assert!(ledger.add_pending(&entry).await.unwrap());
        assert!(!ledger
            .add_pending(&PendingEntry {
                created_utc: added() + Duration::hours(2),
                ..entry.clone()
            })
            .await
            .unwrap());

        assert_eq!(ledger.list_pending().await.unwrap(), vec![entry.clone()]);
        assert_eq!(ledger.get_pending("xyz").await.unwrap(), Some(entry));
        assert!(ledger.remove_pending("xyz").await.unwrap());
        assert!(!ledger.remove_pending("xyz").await.unwrap());
    }

    #[tokio::test]
    async fn test_journal_and_counters() {
        let (ledger, _file) = ledger(10).await;
        for (offset, action) in [(0, "Fetched post"), (5, "Removed post"), (9, "Restored post")] {
            ledger
                .append_journal(&JournalRecord {
                    submission_id: "abc".to_string(),
                    recorded_utc: added() + Duration::seconds(offset),
                    action: action.to_string(),
                })
                .await
                .unwrap();
        }
        ledger.increment_action("Pics", "Removed post").await.unwrap();
        ledger.increment_action("pics", "Removed post").await.unwrap();

        let journal = ledger.journal_for("abc").await.unwrap();
        assert_eq!(journal.len(), 3);
        assert_eq!(journal[2].action, "Restored post");

        assert_eq!(ledger.trim_journal(1).await.unwrap(), 2);
        assert_eq!(ledger.journal_for("abc").await.unwrap().len(), 1);

        let counts = ledger.action_counts("pics").await.unwrap();
        assert_eq!(counts.get("Removed post"), Some(&2));
    }

    #[tokio::test]
    async fn test_legacy_policy_rows_are_upgraded() {
        let (ledger, file) = ledger(10).await;
        sqlx::query(
            "INSERT INTO communities (name, enforced, shard, added_utc, policy_version, policy) VALUES (?, 1, 0, ?, 0, ?)",
        )
        .bind("oldsub")
        .bind(timestamp(added()))
        .bind(r#"{"flair_enforce_approve_posts": false, "userflair_statistics": true}"#)
        .execute(&ledger.pool)
        .await
        .unwrap();

        let reopened = SqliteLedger::new(file.path().to_str().unwrap(), 10)
            .await
            .unwrap();
        let record = reopened.get_community("oldsub").await.unwrap().unwrap();
        assert!(!record.policy.approve_posts());

        let version: i64 = sqlx::query("SELECT policy_version FROM communities WHERE name = 'oldsub'")
            .fetch_one(&reopened.pool)
            .await
            .unwrap()
            .get("policy_version");
        assert_eq!(version, POLICY_VERSION as i64);
    }
}
