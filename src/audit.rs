//! Append-only audit ring: who did what, to what, with what outcome.

use std::sync::Arc;

use chrono::Utc;
use serde_json::json;

use crate::models::AuditEntry;
use crate::store::Store;

const DEFAULT_CAP: usize = 10_000;

pub struct AuditLog {
    store: Arc<Store>,
    cap: usize,
}

impl AuditLog {
    pub fn new(store: Arc<Store>) -> Self {
        AuditLog { store, cap: DEFAULT_CAP }
    }

    pub fn record(&self, actor: &str, action: &str, resource: &str, outcome: &str, detail: serde_json::Value) {
        let entry = json!({
            "timestamp": Utc::now().to_rfc3339(),
            "actor": actor,
            "action": action,
            "resource": resource,
            "outcome": outcome,
            "detail": detail,
        });
        if let Err(e) = self.store.audit_append(&entry, self.cap) {
            eprintln!("audit log append failed, entry dropped: {e:?}");
        }
    }

    pub fn list(&self, limit: usize) -> Result<Vec<AuditEntry>, crate::errors::CoordinatorError> {
        let rows = self.store.audit_list(limit)?;
        Ok(rows
            .into_iter()
            .filter_map(|v| serde_json::from_value(v).ok())
            .collect())
    }
}
