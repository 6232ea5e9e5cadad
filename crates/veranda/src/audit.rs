//! Best-effort audit trail.

use chrono::Utc;
use std::sync::Arc;
use tracing::warn;

use veranda_ids::UserId;
use veranda_protocol::AuditLog;
use veranda_store::StateStore;

pub struct AuditService {
    store: Arc<StateStore>,
}

impl AuditService {
    pub fn new(store: Arc<StateStore>) -> Self {
        Self { store }
    }

    /// Record an action. Persistence failures are logged, not propagated;
    /// the audit trail never blocks the operation it describes.
    pub fn record(
        &self,
        actor: &UserId,
        action: &str,
        target_type: &str,
        target_id: &str,
        metadata: serde_json::Value,
    ) {
        let entry = AuditLog {
            id: 0,
            actor_user: actor.as_str().to_string(),
            action: action.to_string(),
            target_type: target_type.to_string(),
            target_id: target_id.to_string(),
            metadata: metadata.to_string(),
            created_at: Utc::now(),
        };
        if let Err(err) = self.store.append_audit_log(entry) {
            warn!("audit write failed action={action} target={target_id} err={err}");
        }
    }

    pub fn list(&self, limit: usize) -> Vec<AuditLog> {
        self.store.list_audit_logs(limit)
    }
}
