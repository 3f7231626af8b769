//! Compliance evaluation: derived regulatory metadata and advisory
//! violation checks.  A compliance check is data, never a hard failure.

use serde::Serialize;

use crate::config::{AuditLevel, ComplianceConfig, StorageConfig};
use crate::models::{ComplianceFlags, ConsentLevel, UserContext};

/// Capability seam: the orchestrator recomputes flags through this trait
/// on every write.
pub trait ComplianceEvaluator: Send + Sync {
    fn evaluate(&self, data_type: &str, is_encrypted: bool) -> ComplianceFlags;
    fn status(&self, user: &UserContext) -> ComplianceStatus;
}

/// Snapshot of the configured posture plus any advisory violations,
/// returned from `get_compliance_status`.
#[derive(Debug, Clone, Serialize)]
pub struct ComplianceStatus {
    pub hipaa_enabled: bool,
    pub gdpr_enabled: bool,
    pub audit_level: AuditLevel,
    pub retention_days: u32,
    /// Human-readable advisories.  Empty means no violations detected.
    pub violations: Vec<String>,
}

/// Default evaluator, pure over the two immutable config objects.
pub struct PolicyEvaluator {
    compliance: ComplianceConfig,
    storage: StorageConfig,
}

impl PolicyEvaluator {
    pub fn new(compliance: ComplianceConfig, storage: StorageConfig) -> Self {
        Self { compliance, storage }
    }
}

fn is_educational(data_type: &str) -> bool {
    data_type.contains("educational")
}

impl ComplianceEvaluator for PolicyEvaluator {
    fn evaluate(&self, data_type: &str, is_encrypted: bool) -> ComplianceFlags {
        let educational = is_educational(data_type);
        ComplianceFlags {
            // PHI is either encrypted or explicitly non-personal.
            hipaa_compliant: is_encrypted || educational,
            // Consent is a precondition enforced upstream, not recomputed
            // per record.
            gdpr_compliant: true,
            educational_purpose: educational,
            audit_required: self.compliance.audit_level != AuditLevel::Minimal,
            retention_policy_applies: self.storage.retention_days > 0 && !educational,
            disclaimer_required: data_type.contains("calculation"),
        }
    }

    fn status(&self, user: &UserContext) -> ComplianceStatus {
        let mut violations = Vec::new();

        if self.compliance.hipaa_enabled && !user.is_anonymous && !user.encryption_enabled {
            violations.push(
                "HIPAA: encryption is disabled for an authenticated user; \
                 personal health data would be stored without encryption"
                    .to_string(),
            );
        }
        if self.compliance.gdpr_enabled && user.consent_level == ConsentLevel::None {
            violations
                .push("GDPR: no consent recorded for personal data processing".to_string());
        }

        ComplianceStatus {
            hipaa_enabled: self.compliance.hipaa_enabled,
            gdpr_enabled: self.compliance.gdpr_enabled,
            audit_level: self.compliance.audit_level,
            retention_days: self.storage.retention_days,
            violations,
        }
    }
}
