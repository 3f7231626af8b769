//! Encrypted, compliance-aware storage for dose-calculation user data.
//!
//! Every record belongs to exactly one owner and is either encrypted
//! (personal data, sealed under a key derived from the owner id) or
//! anonymized (identifying fields stripped, numeric values coarsened to
//! range buckets) before it ever reaches a store.  Raw personal plaintext
//! is never persisted.
//!
//! Entry point is [`SecureVault`]; see the module docs on [`vault`] for
//! the consistency model.

pub mod anonymize;
pub mod audit;
pub mod cache;
pub mod cancel;
pub mod cipher;
pub mod compliance;
pub mod config;
pub mod error;
pub mod models;
pub mod remote;
pub mod vault;

pub use anonymize::{Anonymizer, DoseAnonymizer};
pub use audit::AuditLogger;
pub use cache::LocalCache;
pub use cancel::CancelToken;
pub use cipher::{CryptoProvider, RecordCipher};
pub use compliance::{ComplianceEvaluator, ComplianceStatus, PolicyEvaluator};
pub use config::{AuditLevel, ComplianceConfig, StorageConfig};
pub use error::VaultError;
pub use models::{
    AuditAction, AuditEvent, ComplianceFlags, ConsentLevel, DecryptedRecord, RecordPayload,
    SecureRecord, UserContext,
};
pub use remote::{MemoryRemoteStore, RemoteStore, RestRemoteStore};
pub use vault::{MigrationOutcome, SecureVault};
