//! Audit logging: best-effort, append-only recorder of vault operations.
//!
//! The logger is fire-and-forget relative to the primary operation: events
//! go into a bounded queue drained by a background task.  A full queue or
//! a failing sink drops the event with a diagnostic; it never blocks or
//! fails the operation being described.

use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::Utc;
use tokio::sync::mpsc;

use crate::models::{AuditAction, AuditEvent};
use crate::remote::RemoteStore;

/// Actions that count as compliance-relevant in the audit trail.
pub const COMPLIANCE_RELEVANT_ACTIONS: &[AuditAction] = &[
    AuditAction::DataStored,
    AuditAction::DataRetrieved,
    AuditAction::DataDeleted,
    AuditAction::DataExported,
    AuditAction::CompleteDataDeletion,
    AuditAction::EncryptionEnabled,
    AuditAction::ConsentGranted,
    AuditAction::ConsentRevoked,
    AuditAction::ApiInitialized,
];

pub fn is_compliance_relevant(action: AuditAction) -> bool {
    COMPLIANCE_RELEVANT_ACTIONS.contains(&action)
}

/// Handle to the background audit sink.  Cheap to clone.
#[derive(Clone)]
pub struct AuditLogger {
    tx: mpsc::Sender<AuditEvent>,
}

impl AuditLogger {
    /// Spawn the drain task writing to `collection` on the remote store.
    /// Must be called from within a tokio runtime.
    pub fn spawn(remote: Arc<dyn RemoteStore>, collection: String, queue_depth: usize) -> Self {
        let (tx, mut rx) = mpsc::channel::<AuditEvent>(queue_depth.max(1));
        tokio::spawn(async move {
            while let Some(event) = rx.recv().await {
                if let Err(err) = remote.append_audit(&collection, &event).await {
                    tracing::warn!(
                        action = event.action.as_str(),
                        %err,
                        "audit event dropped"
                    );
                }
            }
        });
        Self { tx }
    }

    /// Enqueue an event.  Never blocks; a full queue drops the event.
    pub fn record(
        &self,
        owner_id: &str,
        action: AuditAction,
        metadata: BTreeMap<String, String>,
    ) {
        let event = AuditEvent {
            owner_id: owner_id.to_string(),
            action,
            timestamp: Utc::now(),
            metadata,
            compliance_relevant: is_compliance_relevant(action),
        };
        if let Err(err) = self.tx.try_send(event) {
            tracing::warn!(action = action.as_str(), %err, "audit queue full, event dropped");
        }
    }
}
