//! Local cache: a durable SQLite mirror of remote records.
//!
//! Writes land here first (fast, always available); the remote store is
//! updated best-effort afterwards.  Reads fall back here when the remote
//! is unreachable.  Records are stored as their JSON document plus a few
//! plaintext columns for efficient owner-scoped queries; payload content
//! inside the document is already encrypted or anonymized upstream.

use std::path::Path;

use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePool};
use sqlx::Row;

use crate::error::VaultError;
use crate::models::SecureRecord;

const SCHEMA: &str = "CREATE TABLE IF NOT EXISTS records (
    id TEXT PRIMARY KEY,
    owner_id TEXT NOT NULL,
    data_type TEXT NOT NULL,
    created_at TEXT NOT NULL,
    document TEXT NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_records_owner ON records (owner_id, created_at);";

/// Cache handle.  Cheap to clone (pool is Arc internally).
#[derive(Clone)]
pub struct LocalCache {
    pool: SqlitePool,
}

impl LocalCache {
    /// Open (or create) the cache database at `db_path`.
    ///
    /// WAL journal mode is configured at connection time; SQLite forbids
    /// changing `journal_mode` inside a transaction.
    pub async fn open(db_path: &Path) -> Result<Self, VaultError> {
        let opts = SqliteConnectOptions::new()
            .filename(db_path)
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .foreign_keys(true);

        let pool = SqlitePool::connect_with(opts).await?;
        for statement in SCHEMA.split(';').filter(|s| !s.trim().is_empty()) {
            sqlx::query(statement).execute(&pool).await?;
        }
        Ok(Self { pool })
    }

    /// Insert or replace a record.  The record must already carry an id.
    pub async fn upsert(&self, record: &SecureRecord) -> Result<(), VaultError> {
        let id = record
            .id
            .as_deref()
            .ok_or_else(|| VaultError::NotFound("record has no id".into()))?;
        let document = serde_json::to_string(record)?;
        sqlx::query(
            "INSERT OR REPLACE INTO records (id, owner_id, data_type, created_at, document)
             VALUES (?, ?, ?, ?, ?)",
        )
        .bind(id)
        .bind(&record.owner_id)
        .bind(&record.data_type)
        .bind(record.timestamp.to_rfc3339())
        .bind(document)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Records for one owner, newest first, optionally filtered by type.
    pub async fn records_for_owner(
        &self,
        owner_id: &str,
        data_type: Option<&str>,
    ) -> Result<Vec<SecureRecord>, VaultError> {
        let rows = match data_type {
            Some(dt) => {
                sqlx::query(
                    "SELECT document FROM records
                     WHERE owner_id = ? AND data_type = ?
                     ORDER BY created_at DESC",
                )
                .bind(owner_id)
                .bind(dt)
                .fetch_all(&self.pool)
                .await?
            }
            None => {
                sqlx::query(
                    "SELECT document FROM records WHERE owner_id = ? ORDER BY created_at DESC",
                )
                .bind(owner_id)
                .fetch_all(&self.pool)
                .await?
            }
        };

        let mut records = Vec::with_capacity(rows.len());
        for row in rows {
            let document: String = row.try_get("document")?;
            records.push(serde_json::from_str(&document)?);
        }
        Ok(records)
    }

    /// Remove one record.  Missing records are not an error.
    pub async fn delete(&self, owner_id: &str, record_id: &str) -> Result<(), VaultError> {
        sqlx::query("DELETE FROM records WHERE owner_id = ? AND id = ?")
            .bind(owner_id)
            .bind(record_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    /// Remove every record keyed to `owner_id`, returning the count.
    pub async fn clear_owner(&self, owner_id: &str) -> Result<u64, VaultError> {
        let result = sqlx::query("DELETE FROM records WHERE owner_id = ?")
            .bind(owner_id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected())
    }
}
