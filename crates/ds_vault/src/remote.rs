//! Remote store: the durable source of truth.  Reachable but not always
//! available; every call site wraps it in a bounded timeout.
//!
//! Two implementations: a REST document-store client for production and an
//! in-memory store used by tests and offline deployments.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};

use async_trait::async_trait;
use reqwest::StatusCode;
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::error::VaultError;
use crate::models::{AuditEvent, SecureRecord};

/// Owner-scoped document operations against the remote store.
///
/// Stores honor a caller-provided record id (the write-through cache and
/// the remote must agree on the key); a record arriving without one gets a
/// store-assigned id, returned from `insert_record`.
#[async_trait]
pub trait RemoteStore: Send + Sync {
    /// Persist a record, returning its authoritative id.
    async fn insert_record(
        &self,
        collection: &str,
        record: &SecureRecord,
    ) -> Result<String, VaultError>;

    /// Records for `owner_id`, newest first, optionally filtered by
    /// data type and truncated to `limit` (0 means no records).
    async fn fetch_records(
        &self,
        collection: &str,
        owner_id: &str,
        data_type: Option<&str>,
        limit: usize,
    ) -> Result<Vec<SecureRecord>, VaultError>;

    /// Every record for `owner_id`, newest first.
    async fn fetch_all_records(
        &self,
        collection: &str,
        owner_id: &str,
    ) -> Result<Vec<SecureRecord>, VaultError>;

    /// Delete one record.  `Ok(true)` if a record was removed, `Ok(false)`
    /// if none existed; deletion is idempotent.
    async fn delete_record(
        &self,
        collection: &str,
        owner_id: &str,
        record_id: &str,
    ) -> Result<bool, VaultError>;

    /// Append an audit event to the audit collection.
    async fn append_audit(&self, collection: &str, event: &AuditEvent)
        -> Result<(), VaultError>;
}

// ── REST client ──────────────────────────────────────────────────────────────

/// Client for a JSON document-store API
/// (`/collections/{name}/documents` resources, bearer auth).
#[derive(Clone)]
pub struct RestRemoteStore {
    client: reqwest::Client,
    base_url: String,
    token: String,
}

impl RestRemoteStore {
    pub fn new(base_url: impl Into<String>, token: impl Into<String>) -> Result<Self, VaultError> {
        let client = reqwest::Client::builder()
            .user_agent("ds-vault/0.1")
            .build()
            .map_err(|e| VaultError::Transport(e.to_string()))?;
        Ok(Self {
            client,
            base_url: base_url.into(),
            token: token.into(),
        })
    }

    fn documents_url(&self, collection: &str) -> String {
        format!("{}/collections/{}/documents", self.base_url, collection)
    }
}

fn transport(err: reqwest::Error) -> VaultError {
    VaultError::Transport(err.to_string())
}

#[async_trait]
impl RemoteStore for RestRemoteStore {
    async fn insert_record(
        &self,
        collection: &str,
        record: &SecureRecord,
    ) -> Result<String, VaultError> {
        let res = self
            .client
            .post(self.documents_url(collection))
            .bearer_auth(&self.token)
            .json(record)
            .send()
            .await
            .map_err(transport)?;
        if !res.status().is_success() {
            return Err(VaultError::Transport(format!(
                "insert failed with status {}",
                res.status()
            )));
        }
        let body: serde_json::Value = res.json().await.map_err(transport)?;
        body.get("id")
            .and_then(|id| id.as_str())
            .map(str::to_string)
            .or_else(|| record.id.clone())
            .ok_or_else(|| VaultError::Transport("insert response missing id".into()))
    }

    async fn fetch_records(
        &self,
        collection: &str,
        owner_id: &str,
        data_type: Option<&str>,
        limit: usize,
    ) -> Result<Vec<SecureRecord>, VaultError> {
        let mut query = vec![
            ("owner_id".to_string(), owner_id.to_string()),
            ("limit".to_string(), limit.to_string()),
            ("order".to_string(), "timestamp_desc".to_string()),
        ];
        if let Some(dt) = data_type {
            query.push(("data_type".to_string(), dt.to_string()));
        }
        let res = self
            .client
            .get(self.documents_url(collection))
            .bearer_auth(&self.token)
            .query(&query)
            .send()
            .await
            .map_err(transport)?;
        if res.status() == StatusCode::NOT_FOUND {
            return Ok(vec![]);
        }
        if !res.status().is_success() {
            return Err(VaultError::Transport(format!(
                "fetch failed with status {}",
                res.status()
            )));
        }
        let body: serde_json::Value = res.json().await.map_err(transport)?;
        let docs = body
            .get("documents")
            .and_then(|d| d.as_array())
            .cloned()
            .unwrap_or_default();
        let mut out = Vec::with_capacity(docs.len());
        for doc in docs {
            out.push(serde_json::from_value(doc)?);
        }
        Ok(out)
    }

    async fn fetch_all_records(
        &self,
        collection: &str,
        owner_id: &str,
    ) -> Result<Vec<SecureRecord>, VaultError> {
        self.fetch_records(collection, owner_id, None, usize::MAX)
            .await
    }

    async fn delete_record(
        &self,
        collection: &str,
        owner_id: &str,
        record_id: &str,
    ) -> Result<bool, VaultError> {
        let url = format!("{}/{}", self.documents_url(collection), record_id);
        let res = self
            .client
            .delete(url)
            .bearer_auth(&self.token)
            .query(&[("owner_id", owner_id)])
            .send()
            .await
            .map_err(transport)?;
        if res.status() == StatusCode::NOT_FOUND {
            return Ok(false);
        }
        if !res.status().is_success() {
            return Err(VaultError::Transport(format!(
                "delete failed with status {}",
                res.status()
            )));
        }
        Ok(true)
    }

    async fn append_audit(
        &self,
        collection: &str,
        event: &AuditEvent,
    ) -> Result<(), VaultError> {
        let res = self
            .client
            .post(self.documents_url(collection))
            .bearer_auth(&self.token)
            .json(event)
            .send()
            .await
            .map_err(transport)?;
        if !res.status().is_success() {
            return Err(VaultError::Transport(format!(
                "audit append failed with status {}",
                res.status()
            )));
        }
        Ok(())
    }
}

// ── In-memory store ──────────────────────────────────────────────────────────

/// In-memory remote store.  Used by the test suite (with failure injection
/// and call counters) and by offline deployments that have no remote
/// backend configured.
#[derive(Default)]
pub struct MemoryRemoteStore {
    records: RwLock<HashMap<String, Vec<SecureRecord>>>,
    audit: RwLock<Vec<AuditEvent>>,
    fail_reads: AtomicBool,
    fail_writes: AtomicBool,
    fail_audit: AtomicBool,
    read_delay_ms: AtomicU64,
    fetch_calls: AtomicUsize,
}

impl MemoryRemoteStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make subsequent reads fail with a transport error.
    pub fn set_fail_reads(&self, fail: bool) {
        self.fail_reads.store(fail, Ordering::SeqCst);
    }

    /// Make subsequent writes and deletes fail with a transport error.
    pub fn set_fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }

    /// Make subsequent audit appends fail with a transport error.
    pub fn set_fail_audit(&self, fail: bool) {
        self.fail_audit.store(fail, Ordering::SeqCst);
    }

    /// Delay each fetch by `ms` milliseconds (to widen race windows in
    /// coalescing tests).
    pub fn set_read_delay_ms(&self, ms: u64) {
        self.read_delay_ms.store(ms, Ordering::SeqCst);
    }

    /// Number of fetch calls that actually hit the store.
    pub fn fetch_calls(&self) -> usize {
        self.fetch_calls.load(Ordering::SeqCst)
    }

    pub async fn audit_events(&self) -> Vec<AuditEvent> {
        self.audit.read().await.clone()
    }

    pub async fn record_count(&self, owner_id: &str) -> usize {
        self.records
            .read()
            .await
            .get(owner_id)
            .map(Vec::len)
            .unwrap_or(0)
    }

    /// Overwrite a stored record's payload in place (test hook for
    /// corruption scenarios).
    pub async fn tamper_record(&self, owner_id: &str, record_id: &str, blob: &str) {
        let mut records = self.records.write().await;
        if let Some(owned) = records.get_mut(owner_id) {
            for record in owned.iter_mut() {
                if record.id.as_deref() == Some(record_id) {
                    record.payload = crate::models::RecordPayload::Encrypted(blob.to_string());
                }
            }
        }
    }

    async fn check_read(&self) -> Result<(), VaultError> {
        let delay = self.read_delay_ms.load(Ordering::SeqCst);
        if delay > 0 {
            tokio::time::sleep(std::time::Duration::from_millis(delay)).await;
        }
        if self.fail_reads.load(Ordering::SeqCst) {
            return Err(VaultError::Transport("injected read failure".into()));
        }
        Ok(())
    }

    fn check_write(&self) -> Result<(), VaultError> {
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(VaultError::Transport("injected write failure".into()));
        }
        Ok(())
    }
}

#[async_trait]
impl RemoteStore for MemoryRemoteStore {
    async fn insert_record(
        &self,
        _collection: &str,
        record: &SecureRecord,
    ) -> Result<String, VaultError> {
        self.check_write()?;
        let mut stored = record.clone();
        let id = stored
            .id
            .get_or_insert_with(|| Uuid::new_v4().to_string())
            .clone();
        let mut records = self.records.write().await;
        let owned = records.entry(stored.owner_id.clone()).or_default();
        owned.retain(|r| r.id != stored.id);
        owned.push(stored);
        Ok(id)
    }

    async fn fetch_records(
        &self,
        _collection: &str,
        owner_id: &str,
        data_type: Option<&str>,
        limit: usize,
    ) -> Result<Vec<SecureRecord>, VaultError> {
        self.fetch_calls.fetch_add(1, Ordering::SeqCst);
        self.check_read().await?;
        let records = self.records.read().await;
        let mut owned: Vec<SecureRecord> = records
            .get(owner_id)
            .map(|v| {
                v.iter()
                    .filter(|r| data_type.map_or(true, |dt| r.data_type == dt))
                    .cloned()
                    .collect()
            })
            .unwrap_or_default();
        owned.sort_by(|a, b| b.timestamp.cmp(&a.timestamp));
        owned.truncate(limit);
        Ok(owned)
    }

    async fn fetch_all_records(
        &self,
        collection: &str,
        owner_id: &str,
    ) -> Result<Vec<SecureRecord>, VaultError> {
        self.fetch_records(collection, owner_id, None, usize::MAX)
            .await
    }

    async fn delete_record(
        &self,
        _collection: &str,
        owner_id: &str,
        record_id: &str,
    ) -> Result<bool, VaultError> {
        self.check_write()?;
        let mut records = self.records.write().await;
        let Some(owned) = records.get_mut(owner_id) else {
            return Ok(false);
        };
        let before = owned.len();
        owned.retain(|r| r.id.as_deref() != Some(record_id));
        Ok(owned.len() < before)
    }

    async fn append_audit(
        &self,
        _collection: &str,
        event: &AuditEvent,
    ) -> Result<(), VaultError> {
        if self.fail_audit.load(Ordering::SeqCst) {
            return Err(VaultError::Transport("injected audit failure".into()));
        }
        self.audit.write().await.push(event.clone());
        Ok(())
    }
}
