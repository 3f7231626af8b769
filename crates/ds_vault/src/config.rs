//! Process-wide policy objects, set once at vault construction and held
//! immutably.  Keeping them as plain values (no globals) lets multiple
//! vault instances coexist, e.g. in tests.

use std::time::Duration;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    /// Remote collection holding secure records.
    pub collection: String,
    /// Remote collection holding the append-only audit trail.
    pub audit_collection: String,
    /// Retention policy window in days.  0 disables retention tagging.
    pub retention_days: u32,
    /// Bound on every remote I/O call, in seconds.  A call that exceeds it
    /// is treated as failed; a late result is discarded.
    pub remote_timeout_secs: u64,
    /// Depth of the fire-and-forget audit queue.  Overflow drops events.
    pub audit_queue_depth: usize,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            collection: "secure_user_data".into(),
            audit_collection: "audit_log".into(),
            retention_days: 2555, // 7 years
            remote_timeout_secs: 10,
            audit_queue_depth: 256,
        }
    }
}

impl StorageConfig {
    pub fn remote_timeout(&self) -> Duration {
        Duration::from_secs(self.remote_timeout_secs)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuditLevel {
    Minimal,
    Standard,
    Detailed,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ComplianceConfig {
    pub hipaa_enabled: bool,
    pub gdpr_enabled: bool,
    pub audit_level: AuditLevel,
}

impl Default for ComplianceConfig {
    fn default() -> Self {
        Self {
            hipaa_enabled: true,
            gdpr_enabled: true,
            audit_level: AuditLevel::Standard,
        }
    }
}
