//! Vault orchestrator: the public face of the subsystem.
//!
//! Composes crypto, anonymization, compliance, audit, local cache and
//! remote store.  Callers talk only to [`SecureVault`]; it decides
//! encryption vs. anonymization per write, persists cache-first with a
//! best-effort remote write, reads remote-first with cache fallback, and
//! emits one audit event per operation.
//!
//! Consistency model: writes are durable locally immediately and durably
//! remote eventually; reads are best-effort, newest-first, possibly
//! incomplete.  Records are never locked; concurrent writers to the same
//! logical entity create independent records and last-writer-wins applies
//! at the read layer.

use std::collections::{BTreeMap, HashSet};
use std::future::Future;
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::RwLock;
use tokio::time::timeout;
use uuid::Uuid;

use crate::anonymize::{Anonymizer, DoseAnonymizer};
use crate::audit::AuditLogger;
use crate::cache::LocalCache;
use crate::cancel::CancelToken;
use crate::cipher::{CryptoProvider, RecordCipher};
use crate::compliance::{ComplianceEvaluator, ComplianceStatus, PolicyEvaluator};
use crate::config::{ComplianceConfig, StorageConfig};
use crate::error::VaultError;
use crate::models::{
    AuditAction, ConsentLevel, DecryptedRecord, RecordPayload, SecureRecord, UserContext,
    DECRYPTION_FAILED_PLACEHOLDER,
};
use crate::remote::RemoteStore;

/// Result of an identity migration (anonymous → authenticated).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MigrationOutcome {
    /// No remote record existed for the new owner; locally-cached records
    /// were promoted to the remote store under the new id.
    PromotedLocal { promoted: usize },
    /// The remote store already held records for the new owner; the local
    /// cache was overwritten to match.
    RemoteWins { refreshed: usize },
    NothingToMigrate,
}

pub struct SecureVault {
    storage: StorageConfig,
    remote: Arc<dyn RemoteStore>,
    cache: LocalCache,
    crypto: Arc<dyn CryptoProvider>,
    anonymizer: Arc<dyn Anonymizer>,
    evaluator: Arc<dyn ComplianceEvaluator>,
    audit: AuditLogger,
    user: RwLock<Option<UserContext>>,
    /// Owners with a load currently in flight; a second concurrent load
    /// for the same owner serves cached state instead of re-fetching.
    loads_in_flight: Mutex<HashSet<String>>,
}

/// RAII permit for the per-owner load guard.
struct LoadPermit<'a> {
    loads: &'a Mutex<HashSet<String>>,
    owner: String,
}

impl Drop for LoadPermit<'_> {
    fn drop(&mut self) {
        self.loads.lock().remove(&self.owner);
    }
}

impl SecureVault {
    /// Build a vault with the default providers (AEAD record cipher, dose
    /// anonymizer, policy evaluator).  Must be called within a tokio
    /// runtime; the audit drain task is spawned here.
    pub fn new(
        storage: StorageConfig,
        compliance: ComplianceConfig,
        remote: Arc<dyn RemoteStore>,
        cache: LocalCache,
    ) -> Self {
        let evaluator = Arc::new(PolicyEvaluator::new(compliance, storage.clone()));
        Self::with_providers(
            storage,
            remote,
            cache,
            Arc::new(RecordCipher::new(None)),
            Arc::new(DoseAnonymizer),
            evaluator,
        )
    }

    /// Injection seam: build a vault from explicit capability providers.
    pub fn with_providers(
        storage: StorageConfig,
        remote: Arc<dyn RemoteStore>,
        cache: LocalCache,
        crypto: Arc<dyn CryptoProvider>,
        anonymizer: Arc<dyn Anonymizer>,
        evaluator: Arc<dyn ComplianceEvaluator>,
    ) -> Self {
        let audit = AuditLogger::spawn(
            remote.clone(),
            storage.audit_collection.clone(),
            storage.audit_queue_depth,
        );
        Self {
            storage,
            remote,
            cache,
            crypto,
            anonymizer,
            evaluator,
            audit,
            user: RwLock::new(None),
            loads_in_flight: Mutex::new(HashSet::new()),
        }
    }

    /// Set the identity scope for all subsequent calls.  Supplied by the
    /// external session provider; the vault never fetches it itself.
    pub async fn initialize(&self, user: UserContext) {
        let owner = user.id.clone();
        *self.user.write().await = Some(user);
        self.audit
            .record(&owner, AuditAction::ApiInitialized, BTreeMap::new());
        tracing::info!(owner = %owner, "vault initialized");
    }

    async fn current_user(&self) -> Result<UserContext, VaultError> {
        self.user
            .read()
            .await
            .clone()
            .ok_or(VaultError::NotInitialized)
    }

    async fn with_timeout<T>(
        &self,
        fut: impl Future<Output = Result<T, VaultError>>,
    ) -> Result<T, VaultError> {
        match timeout(self.storage.remote_timeout(), fut).await {
            Ok(result) => result,
            // A late result is discarded; the call already failed.
            Err(_) => Err(VaultError::Timeout),
        }
    }

    fn try_acquire_load(&self, owner: &str) -> Option<LoadPermit<'_>> {
        let mut loads = self.loads_in_flight.lock();
        if loads.insert(owner.to_string()) {
            Some(LoadPermit {
                loads: &self.loads_in_flight,
                owner: owner.to_string(),
            })
        } else {
            None
        }
    }

    /// Store one record for the current owner.
    ///
    /// Encrypts iff `force_encryption || (encryption_enabled && !is_anonymous)`,
    /// otherwise anonymizes.  Compliance flags are recomputed here, never
    /// taken from the caller.  Returns the new record id.  The local write
    /// is durable even when the remote write fails.
    pub async fn store_data(
        &self,
        data: &serde_json::Value,
        data_type: &str,
        force_encryption: bool,
        metadata: BTreeMap<String, String>,
        cancel: &CancelToken,
    ) -> Result<String, VaultError> {
        cancel.check()?;
        let user = self.current_user().await?;
        let encrypt = force_encryption || (user.encryption_enabled && !user.is_anonymous);

        let mut metadata = metadata;
        let payload = if encrypt {
            let plaintext = serde_json::to_vec(data)?;
            let blob = self.crypto.encrypt_payload(&user.id, &plaintext)?;
            metadata.insert("algorithm".into(), "xchacha20-poly1305".into());
            metadata.insert("version".into(), "1".into());
            RecordPayload::Encrypted(blob)
        } else {
            RecordPayload::Plain(self.anonymizer.anonymize(data, data_type))
        };

        let record = SecureRecord {
            id: Some(Uuid::new_v4().to_string()),
            owner_id: user.id.clone(),
            data_type: data_type.to_string(),
            is_encrypted: encrypt,
            payload,
            timestamp: chrono::Utc::now(),
            metadata,
            compliance_flags: self.evaluator.evaluate(data_type, encrypt),
        };

        // Cache first: fast and always available.
        self.cache.upsert(&record).await?;
        cancel.check()?;

        // Remote best-effort: a failed write is reconciled on the next
        // connectivity window, it does not fail the operation.
        let id = match self
            .with_timeout(self.remote.insert_record(&self.storage.collection, &record))
            .await
        {
            Ok(id) => id,
            Err(err) if err.is_transport() => {
                tracing::warn!(%err, "remote write failed, local copy stands");
                record.id.clone().unwrap_or_default()
            }
            Err(err) => return Err(err),
        };

        let mut audit_meta = BTreeMap::new();
        audit_meta.insert("data_type".into(), data_type.to_string());
        audit_meta.insert("encrypted".into(), encrypt.to_string());
        self.audit.record(&user.id, AuditAction::DataStored, audit_meta);

        Ok(id)
    }

    /// Records for the current owner, newest first, decrypted
    /// transparently.  A record that fails to decrypt is skipped; the
    /// caller always gets the maximal decryptable subset.  Falls back to
    /// the local cache when the remote store is unreachable.
    pub async fn retrieve_data(
        &self,
        data_type: &str,
        limit: usize,
        filters: Option<&BTreeMap<String, String>>,
        cancel: &CancelToken,
    ) -> Result<Vec<DecryptedRecord>, VaultError> {
        cancel.check()?;
        let user = self.current_user().await?;
        if limit == 0 {
            return Ok(vec![]);
        }

        let records = match self.try_acquire_load(&user.id) {
            Some(_permit) => {
                let fetched = self
                    .with_timeout(self.remote.fetch_records(
                        &self.storage.collection,
                        &user.id,
                        Some(data_type),
                        limit,
                    ))
                    .await;
                cancel.check()?;
                match fetched {
                    Ok(records) => {
                        for record in &records {
                            if let Err(err) = self.cache.upsert(record).await {
                                tracing::warn!(%err, "cache write-back failed");
                            }
                        }
                        records
                    }
                    Err(err) if err.is_transport() => {
                        tracing::warn!(%err, "remote fetch failed, serving from local cache");
                        self.cache.records_for_owner(&user.id, Some(data_type)).await?
                    }
                    Err(err) => return Err(err),
                }
            }
            None => {
                // A load for this owner is already in flight; don't hit the
                // remote store twice, rely on the first load's write-back.
                tracing::debug!(owner = %user.id, "load already in flight, serving cached state");
                self.cache.records_for_owner(&user.id, Some(data_type)).await?
            }
        };
        cancel.check()?;

        let mut out = Vec::new();
        for record in &records {
            if out.len() == limit {
                break;
            }
            if let Some(filters) = filters {
                if !filters
                    .iter()
                    .all(|(k, v)| record.metadata.get(k) == Some(v))
                {
                    continue;
                }
            }
            match self.open_record(record) {
                Ok(decrypted) => out.push(decrypted),
                Err(err) => {
                    tracing::warn!(id = ?record.id, %err, "skipping record that failed to decrypt")
                }
            }
        }

        let mut audit_meta = BTreeMap::new();
        audit_meta.insert("data_type".into(), data_type.to_string());
        audit_meta.insert("count".into(), out.len().to_string());
        self.audit
            .record(&user.id, AuditAction::DataRetrieved, audit_meta);

        Ok(out)
    }

    /// Remove one record.  Transport failure yields `Ok(false)` rather
    /// than an error; the deletion is retried by the caller or reconciled
    /// later.  Owner scoping is enforced by the remote store's access
    /// rules, not re-checked here.
    pub async fn delete_data(
        &self,
        record_id: &str,
        reason: Option<&str>,
        cancel: &CancelToken,
    ) -> Result<bool, VaultError> {
        cancel.check()?;
        let user = self.current_user().await?;

        self.cache.delete(&user.id, record_id).await?;
        cancel.check()?;

        let removed = match self
            .with_timeout(self.remote.delete_record(
                &self.storage.collection,
                &user.id,
                record_id,
            ))
            .await
        {
            Ok(removed) => removed,
            Err(err) if err.is_transport() => {
                tracing::warn!(%err, "remote delete failed");
                return Ok(false);
            }
            Err(err) => return Err(err),
        };

        if removed {
            let mut audit_meta = BTreeMap::new();
            audit_meta.insert("record_id".into(), record_id.to_string());
            if let Some(reason) = reason {
                audit_meta.insert("reason".into(), reason.to_string());
            }
            self.audit.record(&user.id, AuditAction::DataDeleted, audit_meta);
        }
        Ok(removed)
    }

    /// Every record for the current owner, decrypted where possible.  A
    /// record that cannot be decrypted is included with a
    /// `[DECRYPTION_FAILED]` placeholder; export completeness beats
    /// decrypt success.  Fails if the owner scan itself fails.
    pub async fn export_user_data(
        &self,
        cancel: &CancelToken,
    ) -> Result<Vec<DecryptedRecord>, VaultError> {
        cancel.check()?;
        let user = self.current_user().await?;

        let records = self
            .with_timeout(
                self.remote
                    .fetch_all_records(&self.storage.collection, &user.id),
            )
            .await?;
        cancel.check()?;

        let mut out = Vec::with_capacity(records.len());
        for record in &records {
            match self.open_record(record) {
                Ok(decrypted) => out.push(decrypted),
                Err(err) => {
                    tracing::warn!(id = ?record.id, %err, "export includes undecryptable record as placeholder");
                    out.push(DecryptedRecord {
                        id: record.id.clone().unwrap_or_default(),
                        data_type: record.data_type.clone(),
                        is_encrypted: record.is_encrypted,
                        data: serde_json::Value::String(DECRYPTION_FAILED_PLACEHOLDER.into()),
                        timestamp: record.timestamp,
                        metadata: record.metadata.clone(),
                        compliance_flags: record.compliance_flags,
                    });
                }
            }
        }

        let mut audit_meta = BTreeMap::new();
        audit_meta.insert("count".into(), out.len().to_string());
        self.audit.record(&user.id, AuditAction::DataExported, audit_meta);

        Ok(out)
    }

    /// Delete every record for the current owner, one by one, then clear
    /// the owner's local cache entries.  Partial failure still reports the
    /// count that succeeded; prior deletions are not rolled back.
    pub async fn delete_all_user_data(
        &self,
        cancel: &CancelToken,
    ) -> Result<usize, VaultError> {
        cancel.check()?;
        let user = self.current_user().await?;

        let records = match self
            .with_timeout(
                self.remote
                    .fetch_all_records(&self.storage.collection, &user.id),
            )
            .await
        {
            Ok(records) => records,
            Err(err) if err.is_transport() => {
                // Scan failed; fall back to the cached view so erasure can
                // still make progress.
                tracing::warn!(%err, "remote scan failed, deleting from cached record list");
                self.cache.records_for_owner(&user.id, None).await?
            }
            Err(err) => return Err(err),
        };

        let mut deleted = 0usize;
        for record in &records {
            cancel.check()?;
            let Some(id) = record.id.as_deref() else {
                continue;
            };
            match self
                .with_timeout(self.remote.delete_record(&self.storage.collection, &user.id, id))
                .await
            {
                Ok(true) => deleted += 1,
                Ok(false) => {}
                Err(err) => {
                    tracing::warn!(record_id = id, %err, "delete failed, continuing");
                }
            }
        }

        self.cache.clear_owner(&user.id).await?;

        let mut audit_meta = BTreeMap::new();
        audit_meta.insert("deleted_count".into(), deleted.to_string());
        self.audit
            .record(&user.id, AuditAction::CompleteDataDeletion, audit_meta);

        Ok(deleted)
    }

    /// Current regulatory posture plus advisory violations.  Never fails:
    /// an uninitialized vault reports that as a violation.
    pub async fn get_compliance_status(&self) -> ComplianceStatus {
        match self.user.read().await.clone() {
            Some(user) => self.evaluator.status(&user),
            None => {
                let placeholder = UserContext {
                    id: String::new(),
                    is_anonymous: true,
                    consent_level: ConsentLevel::Full,
                    encryption_enabled: false,
                };
                let mut status = self.evaluator.status(&placeholder);
                status
                    .violations
                    .push("vault not initialized: no user context".to_string());
                status
            }
        }
    }

    /// Record a consent-level transition reported by the session provider.
    pub async fn record_consent_change(
        &self,
        consent_level: ConsentLevel,
    ) -> Result<(), VaultError> {
        let mut guard = self.user.write().await;
        let user = guard.as_mut().ok_or(VaultError::NotInitialized)?;
        let action = if consent_level == ConsentLevel::None {
            AuditAction::ConsentRevoked
        } else {
            AuditAction::ConsentGranted
        };
        user.consent_level = consent_level;
        let owner = user.id.clone();
        drop(guard);
        self.audit.record(&owner, action, BTreeMap::new());
        Ok(())
    }

    /// Record the explicit encryption opt-in reported by the session
    /// provider.  Applies to records written from now on; existing records
    /// keep their encryption status for life.
    pub async fn record_encryption_opt_in(&self) -> Result<(), VaultError> {
        let mut guard = self.user.write().await;
        let user = guard.as_mut().ok_or(VaultError::NotInitialized)?;
        user.encryption_enabled = true;
        let owner = user.id.clone();
        drop(guard);
        self.audit
            .record(&owner, AuditAction::EncryptionEnabled, BTreeMap::new());
        Ok(())
    }

    /// Identity migration: the session provider reports that the current
    /// (anonymous) owner has become `new_user` (authenticated).
    ///
    /// If the remote store has no records for the new owner, locally-cached
    /// records are promoted: re-tagged to the new owner, re-sealed under
    /// the new owner's key where encrypted, and pushed to the remote store.
    /// If remote records already exist, the remote copy wins and the local
    /// cache is overwritten to match.  Evaluated once per transition.
    pub async fn migrate_identity(
        &self,
        new_user: UserContext,
        cancel: &CancelToken,
    ) -> Result<MigrationOutcome, VaultError> {
        cancel.check()?;
        let old_user = self.current_user().await?;

        if old_user.id == new_user.id {
            *self.user.write().await = Some(new_user);
            return Ok(MigrationOutcome::NothingToMigrate);
        }

        let remote_existing = self
            .with_timeout(
                self.remote
                    .fetch_all_records(&self.storage.collection, &new_user.id),
            )
            .await?;
        cancel.check()?;

        let outcome = if remote_existing.is_empty() {
            let cached = self.cache.records_for_owner(&old_user.id, None).await?;
            if cached.is_empty() {
                MigrationOutcome::NothingToMigrate
            } else {
                let mut promoted = 0usize;
                for record in cached {
                    cancel.check()?;
                    match self.promote_record(&old_user.id, &new_user.id, record) {
                        Ok(record) => {
                            if let Err(err) = self
                                .with_timeout(
                                    self.remote
                                        .insert_record(&self.storage.collection, &record),
                                )
                                .await
                            {
                                tracing::warn!(%err, "remote promotion write failed, cached copy will reconcile later");
                            }
                            self.cache.upsert(&record).await?;
                            promoted += 1;
                        }
                        Err(err) => {
                            tracing::warn!(%err, "skipping record that could not be promoted")
                        }
                    }
                }
                self.cache.clear_owner(&old_user.id).await?;
                tracing::info!(promoted, "promoted local records to authenticated owner");
                MigrationOutcome::PromotedLocal { promoted }
            }
        } else {
            self.cache.clear_owner(&old_user.id).await?;
            self.cache.clear_owner(&new_user.id).await?;
            for record in &remote_existing {
                self.cache.upsert(record).await?;
            }
            tracing::info!(
                refreshed = remote_existing.len(),
                "remote records win, local cache overwritten"
            );
            MigrationOutcome::RemoteWins {
                refreshed: remote_existing.len(),
            }
        };

        *self.user.write().await = Some(new_user);
        Ok(outcome)
    }

    /// Re-own a record for the promoted identity, re-sealing encrypted
    /// payloads under the new owner's key (the record key is derived from
    /// the owner id, so the old blob is unreadable under the new id).
    fn promote_record(
        &self,
        old_owner: &str,
        new_owner: &str,
        mut record: SecureRecord,
    ) -> Result<SecureRecord, VaultError> {
        if let RecordPayload::Encrypted(blob) = &record.payload {
            let plaintext = self.crypto.decrypt_payload(old_owner, blob)?;
            let resealed = self.crypto.encrypt_payload(new_owner, &plaintext)?;
            record.payload = RecordPayload::Encrypted(resealed);
        }
        record.owner_id = new_owner.to_string();
        record
            .metadata
            .insert("migrated_from".into(), "anonymous".into());
        Ok(record)
    }

    fn open_record(&self, record: &SecureRecord) -> Result<DecryptedRecord, VaultError> {
        let data = match &record.payload {
            RecordPayload::Plain(value) => value.clone(),
            RecordPayload::Encrypted(blob) => {
                let plaintext = self.crypto.decrypt_payload(&record.owner_id, blob)?;
                serde_json::from_slice(&plaintext)?
            }
        };
        Ok(DecryptedRecord {
            id: record.id.clone().unwrap_or_default(),
            data_type: record.data_type.clone(),
            is_encrypted: record.is_encrypted,
            data,
            timestamp: record.timestamp,
            metadata: record.metadata.clone(),
            compliance_flags: record.compliance_flags,
        })
    }
}
