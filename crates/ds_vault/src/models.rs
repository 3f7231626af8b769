//! Record and event models: these map to/from stored documents.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Well-known record categories.  `data_type` is an open tag, these are
/// the ones the surrounding app writes today.
pub const DATA_TYPE_PERSONAL_CALCULATION: &str = "personal_calculation";
pub const DATA_TYPE_EDUCATIONAL_CALCULATION: &str = "educational_calculation";
pub const DATA_TYPE_PROFILE: &str = "profile";
pub const DATA_TYPE_PRESET: &str = "preset";

/// The payload of a record is either ciphertext or anonymized plain data,
/// never both.  The externally-tagged representation keeps the stored
/// document shape (`encrypted_payload` XOR `plain_payload`) and rejects
/// documents carrying both.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum RecordPayload {
    /// Base64 `nonce ∥ ciphertext+tag` blob.
    #[serde(rename = "encrypted_payload")]
    Encrypted(String),
    /// Anonymized, generalized representation.  Never identifying.
    #[serde(rename = "plain_payload")]
    Plain(serde_json::Value),
}

/// One persisted unit of storage.
///
/// Records are never mutated in place: an "update" is a new record tied to
/// the same logical entity through caller-supplied metadata.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SecureRecord {
    /// Assigned on first persist; `None` before that.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    /// Immutable after creation.
    pub owner_id: String,
    pub data_type: String,
    /// Fixed for the life of the record.
    pub is_encrypted: bool,
    #[serde(flatten)]
    pub payload: RecordPayload,
    /// Creation time, immutable.
    pub timestamp: DateTime<Utc>,
    /// Open key/value bag (algorithm, version, caller context).
    /// Must never contain identifying content.
    #[serde(default)]
    pub metadata: BTreeMap<String, String>,
    /// Derived on every write; never hand-set by callers.
    pub compliance_flags: ComplianceFlags,
}

/// A record as handed back to callers: payload decrypted (or the
/// anonymized plain value), envelope fields preserved.
#[derive(Debug, Clone, Serialize)]
pub struct DecryptedRecord {
    pub id: String,
    pub data_type: String,
    pub is_encrypted: bool,
    pub data: serde_json::Value,
    pub timestamp: DateTime<Utc>,
    pub metadata: BTreeMap<String, String>,
    pub compliance_flags: ComplianceFlags,
}

/// Placeholder payload for export entries whose ciphertext could not be
/// authenticated.  Export completeness wins over decrypt success.
pub const DECRYPTION_FAILED_PLACEHOLDER: &str = "[DECRYPTION_FAILED]";

/// Identity scope supplied by the external session provider.  The vault
/// never fetches or refreshes this itself.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UserContext {
    pub id: String,
    pub is_anonymous: bool,
    pub consent_level: ConsentLevel,
    /// Explicit opt-in toggle.  Encryption applies only when this is set
    /// and the user is authenticated (or the caller forces it).
    pub encryption_enabled: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConsentLevel {
    None,
    Basic,
    Full,
}

/// Regulatory posture of a record, recomputed on every write.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ComplianceFlags {
    pub hipaa_compliant: bool,
    pub gdpr_compliant: bool,
    pub educational_purpose: bool,
    pub audit_required: bool,
    pub retention_policy_applies: bool,
    pub disclaimer_required: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuditAction {
    DataStored,
    DataRetrieved,
    DataDeleted,
    DataExported,
    CompleteDataDeletion,
    EncryptionEnabled,
    ConsentGranted,
    ConsentRevoked,
    ApiInitialized,
}

impl AuditAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            AuditAction::DataStored => "data_stored",
            AuditAction::DataRetrieved => "data_retrieved",
            AuditAction::DataDeleted => "data_deleted",
            AuditAction::DataExported => "data_exported",
            AuditAction::CompleteDataDeletion => "complete_data_deletion",
            AuditAction::EncryptionEnabled => "encryption_enabled",
            AuditAction::ConsentGranted => "consent_granted",
            AuditAction::ConsentRevoked => "consent_revoked",
            AuditAction::ApiInitialized => "api_initialized",
        }
    }
}

/// Append-only trail entry, one per vault operation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditEvent {
    pub owner_id: String,
    pub action: AuditAction,
    pub timestamp: DateTime<Utc>,
    #[serde(default)]
    pub metadata: BTreeMap<String, String>,
    pub compliance_relevant: bool,
}
