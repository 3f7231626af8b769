//! End-to-end vault behavior against the in-memory remote store.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use serde_json::json;
use tempfile::TempDir;

use ds_vault::{
    AuditAction, AuditEvent, CancelToken, ComplianceConfig, ConsentLevel, LocalCache,
    MemoryRemoteStore, MigrationOutcome, SecureVault, StorageConfig, UserContext, VaultError,
};

async fn vault_with(remote: Arc<MemoryRemoteStore>, dir: &TempDir) -> SecureVault {
    let cache = LocalCache::open(&dir.path().join("cache.db")).await.unwrap();
    SecureVault::new(
        StorageConfig::default(),
        ComplianceConfig::default(),
        remote,
        cache,
    )
}

fn authenticated(id: &str) -> UserContext {
    UserContext {
        id: id.into(),
        is_anonymous: false,
        consent_level: ConsentLevel::Full,
        encryption_enabled: true,
    }
}

fn anonymous(id: &str) -> UserContext {
    UserContext {
        id: id.into(),
        is_anonymous: true,
        consent_level: ConsentLevel::Basic,
        encryption_enabled: false,
    }
}

fn calculation() -> serde_json::Value {
    json!({
        "substanceName": "BPC-157",
        "dose": 3.0,
        "volume": 0.4,
        "unit": "mg",
        "notes": "evening protocol",
    })
}

async fn wait_for_audit(remote: &MemoryRemoteStore, min: usize) -> Vec<AuditEvent> {
    for _ in 0..100 {
        let events = remote.audit_events().await;
        if events.len() >= min {
            return events;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    remote.audit_events().await
}

#[tokio::test]
async fn authenticated_store_encrypts_and_roundtrips() {
    let remote = Arc::new(MemoryRemoteStore::new());
    let dir = TempDir::new().unwrap();
    let vault = vault_with(remote.clone(), &dir).await;
    vault.initialize(authenticated("alice")).await;

    let cancel = CancelToken::new();
    let id = vault
        .store_data(&calculation(), "personal_calculation", false, BTreeMap::new(), &cancel)
        .await
        .unwrap();
    assert!(!id.is_empty());
    assert_eq!(remote.record_count("alice").await, 1);

    let records = vault
        .retrieve_data("personal_calculation", 10, None, &cancel)
        .await
        .unwrap();
    assert_eq!(records.len(), 1);
    assert!(records[0].is_encrypted);
    assert_eq!(records[0].data, calculation());
    assert_eq!(
        records[0].metadata.get("algorithm").map(String::as_str),
        Some("xchacha20-poly1305")
    );
    assert!(records[0].compliance_flags.hipaa_compliant);
}

#[tokio::test]
async fn anonymous_store_generalizes_the_payload() {
    let remote = Arc::new(MemoryRemoteStore::new());
    let dir = TempDir::new().unwrap();
    let vault = vault_with(remote, &dir).await;
    vault.initialize(anonymous("anon-1")).await;

    let cancel = CancelToken::new();
    vault
        .store_data(&calculation(), "personal_calculation", false, BTreeMap::new(), &cancel)
        .await
        .unwrap();

    let records = vault
        .retrieve_data("personal_calculation", 10, None, &cancel)
        .await
        .unwrap();
    assert_eq!(records.len(), 1);
    assert!(!records[0].is_encrypted);
    let data = records[0].data.as_object().unwrap();
    assert_eq!(data["substance_category"], "peptide");
    assert_eq!(data["dose_range"], "1-5");
    assert_eq!(data["volume_range"], "0.1-0.5ml");
    assert!(data.get("substanceName").is_none());
    assert!(data.get("notes").is_none());
}

#[tokio::test]
async fn force_encryption_applies_to_anonymous_users() {
    let remote = Arc::new(MemoryRemoteStore::new());
    let dir = TempDir::new().unwrap();
    let vault = vault_with(remote, &dir).await;
    vault.initialize(anonymous("anon-1")).await;

    let cancel = CancelToken::new();
    vault
        .store_data(&calculation(), "personal_calculation", true, BTreeMap::new(), &cancel)
        .await
        .unwrap();

    let records = vault
        .retrieve_data("personal_calculation", 10, None, &cancel)
        .await
        .unwrap();
    assert!(records[0].is_encrypted);
    assert_eq!(records[0].data, calculation());
}

#[tokio::test]
async fn corrupted_record_is_skipped_on_retrieve() {
    let remote = Arc::new(MemoryRemoteStore::new());
    let dir = TempDir::new().unwrap();
    let vault = vault_with(remote.clone(), &dir).await;
    vault.initialize(authenticated("alice")).await;

    let cancel = CancelToken::new();
    let mut ids = Vec::new();
    for _ in 0..3 {
        ids.push(
            vault
                .store_data(&calculation(), "personal_calculation", false, BTreeMap::new(), &cancel)
                .await
                .unwrap(),
        );
    }
    remote.tamper_record("alice", &ids[0], "bm90LWEtcmVhbC1ibG9i").await;

    let records = vault
        .retrieve_data("personal_calculation", 10, None, &cancel)
        .await
        .unwrap();
    assert_eq!(records.len(), 2);
    assert!(records.iter().all(|r| r.id != ids[0]));
}

#[tokio::test]
async fn export_replaces_undecryptable_payloads_with_placeholder() {
    let remote = Arc::new(MemoryRemoteStore::new());
    let dir = TempDir::new().unwrap();
    let vault = vault_with(remote.clone(), &dir).await;
    vault.initialize(authenticated("alice")).await;

    let cancel = CancelToken::new();
    let mut ids = Vec::new();
    for _ in 0..3 {
        ids.push(
            vault
                .store_data(&calculation(), "personal_calculation", false, BTreeMap::new(), &cancel)
                .await
                .unwrap(),
        );
    }
    remote.tamper_record("alice", &ids[1], "bm90LWEtcmVhbC1ibG9i").await;

    let exported = vault.export_user_data(&cancel).await.unwrap();
    assert_eq!(exported.len(), 3);
    let placeholder = exported.iter().find(|r| r.id == ids[1]).unwrap();
    assert_eq!(placeholder.data, json!("[DECRYPTION_FAILED]"));
    assert_eq!(
        exported.iter().filter(|r| r.data == calculation()).count(),
        2
    );
}

#[tokio::test]
async fn export_fails_when_the_owner_scan_fails() {
    let remote = Arc::new(MemoryRemoteStore::new());
    let dir = TempDir::new().unwrap();
    let vault = vault_with(remote.clone(), &dir).await;
    vault.initialize(authenticated("alice")).await;

    remote.set_fail_reads(true);
    let err = vault.export_user_data(&CancelToken::new()).await.unwrap_err();
    assert!(err.is_transport());
}

#[tokio::test]
async fn delete_all_reports_count_and_is_idempotent() {
    let remote = Arc::new(MemoryRemoteStore::new());
    let dir = TempDir::new().unwrap();
    let vault = vault_with(remote.clone(), &dir).await;
    vault.initialize(authenticated("alice")).await;

    let cancel = CancelToken::new();
    for _ in 0..3 {
        vault
            .store_data(&calculation(), "personal_calculation", false, BTreeMap::new(), &cancel)
            .await
            .unwrap();
    }

    assert_eq!(vault.delete_all_user_data(&cancel).await.unwrap(), 3);
    assert_eq!(remote.record_count("alice").await, 0);
    assert_eq!(vault.delete_all_user_data(&cancel).await.unwrap(), 0);
    assert!(vault
        .retrieve_data("personal_calculation", 10, None, &cancel)
        .await
        .unwrap()
        .is_empty());
}

#[tokio::test]
async fn concurrent_retrieves_for_one_owner_fetch_remote_once() {
    let remote = Arc::new(MemoryRemoteStore::new());
    let dir = TempDir::new().unwrap();
    let vault = vault_with(remote.clone(), &dir).await;
    vault.initialize(authenticated("alice")).await;

    let cancel = CancelToken::new();
    vault
        .store_data(&calculation(), "personal_calculation", false, BTreeMap::new(), &cancel)
        .await
        .unwrap();

    remote.set_read_delay_ms(100);
    let (a, b) = tokio::join!(
        vault.retrieve_data("personal_calculation", 10, None, &cancel),
        vault.retrieve_data("personal_calculation", 10, None, &cancel),
    );
    assert_eq!(a.unwrap().len(), 1);
    assert_eq!(b.unwrap().len(), 1);
    assert_eq!(remote.fetch_calls(), 1);
}

#[tokio::test]
async fn remote_write_failure_keeps_the_local_copy() {
    let remote = Arc::new(MemoryRemoteStore::new());
    let dir = TempDir::new().unwrap();
    let vault = vault_with(remote.clone(), &dir).await;
    vault.initialize(authenticated("alice")).await;

    remote.set_fail_writes(true);
    let cancel = CancelToken::new();
    let id = vault
        .store_data(&calculation(), "personal_calculation", false, BTreeMap::new(), &cancel)
        .await
        .unwrap();
    assert!(!id.is_empty());
    assert_eq!(remote.record_count("alice").await, 0);

    // Remote also unreachable for reads: the cache serves the record.
    remote.set_fail_reads(true);
    let records = vault
        .retrieve_data("personal_calculation", 10, None, &cancel)
        .await
        .unwrap();
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].data, calculation());
}

#[tokio::test]
async fn retrieve_falls_back_to_cache_when_remote_is_down() {
    let remote = Arc::new(MemoryRemoteStore::new());
    let dir = TempDir::new().unwrap();
    let vault = vault_with(remote.clone(), &dir).await;
    vault.initialize(authenticated("alice")).await;

    let cancel = CancelToken::new();
    vault
        .store_data(&calculation(), "personal_calculation", false, BTreeMap::new(), &cancel)
        .await
        .unwrap();

    remote.set_fail_reads(true);
    let records = vault
        .retrieve_data("personal_calculation", 10, None, &cancel)
        .await
        .unwrap();
    assert_eq!(records.len(), 1);
}

#[tokio::test]
async fn audit_failure_never_fails_the_operation() {
    let remote = Arc::new(MemoryRemoteStore::new());
    remote.set_fail_audit(true);
    let dir = TempDir::new().unwrap();
    let vault = vault_with(remote.clone(), &dir).await;
    vault.initialize(authenticated("alice")).await;

    let cancel = CancelToken::new();
    vault
        .store_data(&calculation(), "personal_calculation", false, BTreeMap::new(), &cancel)
        .await
        .unwrap();
    let records = vault
        .retrieve_data("personal_calculation", 10, None, &cancel)
        .await
        .unwrap();
    assert_eq!(records.len(), 1);
    assert!(remote.audit_events().await.is_empty());
}

#[tokio::test]
async fn operations_leave_an_audit_trail() {
    let remote = Arc::new(MemoryRemoteStore::new());
    let dir = TempDir::new().unwrap();
    let vault = vault_with(remote.clone(), &dir).await;
    vault.initialize(authenticated("alice")).await;

    let cancel = CancelToken::new();
    vault
        .store_data(&calculation(), "personal_calculation", false, BTreeMap::new(), &cancel)
        .await
        .unwrap();
    vault
        .retrieve_data("personal_calculation", 10, None, &cancel)
        .await
        .unwrap();

    let events = wait_for_audit(&remote, 3).await;
    let actions: Vec<AuditAction> = events.iter().map(|e| e.action).collect();
    assert!(actions.contains(&AuditAction::ApiInitialized));
    assert!(actions.contains(&AuditAction::DataStored));
    assert!(actions.contains(&AuditAction::DataRetrieved));
    assert!(events.iter().all(|e| e.owner_id == "alice"));
    assert!(events.iter().all(|e| e.compliance_relevant));
}

#[tokio::test]
async fn operations_before_initialize_are_rejected() {
    let remote = Arc::new(MemoryRemoteStore::new());
    let dir = TempDir::new().unwrap();
    let vault = vault_with(remote, &dir).await;

    let cancel = CancelToken::new();
    let err = vault
        .store_data(&calculation(), "personal_calculation", false, BTreeMap::new(), &cancel)
        .await
        .unwrap_err();
    assert!(matches!(err, VaultError::NotInitialized));

    let status = vault.get_compliance_status().await;
    assert!(status.violations.iter().any(|v| v.contains("not initialized")));
}

#[tokio::test]
async fn delete_data_reports_transport_failure_as_false() {
    let remote = Arc::new(MemoryRemoteStore::new());
    let dir = TempDir::new().unwrap();
    let vault = vault_with(remote.clone(), &dir).await;
    vault.initialize(authenticated("alice")).await;

    let cancel = CancelToken::new();
    let id = vault
        .store_data(&calculation(), "personal_calculation", false, BTreeMap::new(), &cancel)
        .await
        .unwrap();

    remote.set_fail_writes(true);
    assert!(!vault.delete_data(&id, None, &cancel).await.unwrap());

    remote.set_fail_writes(false);
    assert!(vault.delete_data(&id, Some("user request"), &cancel).await.unwrap());
    assert!(!vault.delete_data(&id, None, &cancel).await.unwrap());
}

#[tokio::test]
async fn cancelled_token_aborts_operations() {
    let remote = Arc::new(MemoryRemoteStore::new());
    let dir = TempDir::new().unwrap();
    let vault = vault_with(remote, &dir).await;
    vault.initialize(authenticated("alice")).await;

    let cancel = CancelToken::new();
    cancel.cancel();
    let err = vault
        .retrieve_data("personal_calculation", 10, None, &cancel)
        .await
        .unwrap_err();
    assert!(matches!(err, VaultError::Cancelled));
}

#[tokio::test]
async fn metadata_filters_narrow_retrieval() {
    let remote = Arc::new(MemoryRemoteStore::new());
    let dir = TempDir::new().unwrap();
    let vault = vault_with(remote, &dir).await;
    vault.initialize(authenticated("alice")).await;

    let cancel = CancelToken::new();
    let mut first = BTreeMap::new();
    first.insert("profile_id".to_string(), "p1".to_string());
    let mut second = BTreeMap::new();
    second.insert("profile_id".to_string(), "p2".to_string());
    vault
        .store_data(&calculation(), "personal_calculation", false, first.clone(), &cancel)
        .await
        .unwrap();
    vault
        .store_data(&calculation(), "personal_calculation", false, second, &cancel)
        .await
        .unwrap();

    let filter: BTreeMap<String, String> =
        [("profile_id".to_string(), "p1".to_string())].into();
    let records = vault
        .retrieve_data("personal_calculation", 10, Some(&filter), &cancel)
        .await
        .unwrap();
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].metadata.get("profile_id").map(String::as_str), Some("p1"));
}

#[tokio::test]
async fn retrieve_honors_the_limit() {
    let remote = Arc::new(MemoryRemoteStore::new());
    let dir = TempDir::new().unwrap();
    let vault = vault_with(remote, &dir).await;
    vault.initialize(authenticated("alice")).await;

    let cancel = CancelToken::new();
    for _ in 0..3 {
        vault
            .store_data(&calculation(), "personal_calculation", false, BTreeMap::new(), &cancel)
            .await
            .unwrap();
    }
    let records = vault
        .retrieve_data("personal_calculation", 2, None, &cancel)
        .await
        .unwrap();
    assert_eq!(records.len(), 2);
    assert!(vault
        .retrieve_data("personal_calculation", 0, None, &cancel)
        .await
        .unwrap()
        .is_empty());
}

#[tokio::test]
async fn migration_promotes_cached_records_to_the_new_owner() {
    let remote = Arc::new(MemoryRemoteStore::new());
    let dir = TempDir::new().unwrap();
    let vault = vault_with(remote.clone(), &dir).await;
    vault.initialize(anonymous("anon-1")).await;

    let cancel = CancelToken::new();
    // Forced encryption while anonymous: sealed under the anonymous id.
    vault
        .store_data(&calculation(), "personal_calculation", true, BTreeMap::new(), &cancel)
        .await
        .unwrap();

    let outcome = vault
        .migrate_identity(authenticated("alice"), &cancel)
        .await
        .unwrap();
    assert_eq!(outcome, MigrationOutcome::PromotedLocal { promoted: 1 });
    assert_eq!(remote.record_count("alice").await, 1);

    // The promoted record decrypts under the new identity.
    let records = vault
        .retrieve_data("personal_calculation", 10, None, &cancel)
        .await
        .unwrap();
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].data, calculation());
    assert_eq!(
        records[0].metadata.get("migrated_from").map(String::as_str),
        Some("anonymous")
    );
}

#[tokio::test]
async fn migration_prefers_existing_remote_records() {
    let remote = Arc::new(MemoryRemoteStore::new());
    let dir = TempDir::new().unwrap();

    // Another device already stored data for the authenticated account.
    {
        let other_dir = TempDir::new().unwrap();
        let other = vault_with(remote.clone(), &other_dir).await;
        other.initialize(authenticated("alice")).await;
        other
            .store_data(&json!({"dose": 7.0}), "personal_calculation", false, BTreeMap::new(), &CancelToken::new())
            .await
            .unwrap();
    }

    let vault = vault_with(remote.clone(), &dir).await;
    vault.initialize(anonymous("anon-1")).await;
    let cancel = CancelToken::new();
    vault
        .store_data(&calculation(), "personal_calculation", false, BTreeMap::new(), &cancel)
        .await
        .unwrap();

    let outcome = vault
        .migrate_identity(authenticated("alice"), &cancel)
        .await
        .unwrap();
    assert_eq!(outcome, MigrationOutcome::RemoteWins { refreshed: 1 });

    // The local cache now mirrors the remote copy: with the remote down,
    // the surviving record is the authenticated one.
    remote.set_fail_reads(true);
    let records = vault
        .retrieve_data("personal_calculation", 10, None, &cancel)
        .await
        .unwrap();
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].data, json!({"dose": 7.0}));
}

#[tokio::test]
async fn migration_with_no_data_is_a_noop() {
    let remote = Arc::new(MemoryRemoteStore::new());
    let dir = TempDir::new().unwrap();
    let vault = vault_with(remote, &dir).await;
    vault.initialize(anonymous("anon-1")).await;

    let outcome = vault
        .migrate_identity(authenticated("alice"), &CancelToken::new())
        .await
        .unwrap();
    assert_eq!(outcome, MigrationOutcome::NothingToMigrate);
}

#[tokio::test]
async fn consent_and_encryption_transitions_are_audited() {
    let remote = Arc::new(MemoryRemoteStore::new());
    let dir = TempDir::new().unwrap();
    let vault = vault_with(remote.clone(), &dir).await;
    vault.initialize(authenticated("alice")).await;

    vault.record_consent_change(ConsentLevel::None).await.unwrap();
    vault.record_consent_change(ConsentLevel::Full).await.unwrap();
    vault.record_encryption_opt_in().await.unwrap();

    let events = wait_for_audit(&remote, 4).await;
    let actions: Vec<AuditAction> = events.iter().map(|e| e.action).collect();
    assert!(actions.contains(&AuditAction::ConsentRevoked));
    assert!(actions.contains(&AuditAction::ConsentGranted));
    assert!(actions.contains(&AuditAction::EncryptionEnabled));
}
