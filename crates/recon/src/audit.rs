//! Operator-visible record of what each run did.

use serde::{Deserialize, Serialize};

use crate::model::{RecordId, RunMode};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuditEvent {
    pub job: String,
    pub dataset: String,
    pub id: RecordId,
    pub mode: RunMode,
    /// Report category (`repaired_via_*`, `merged`, `unmatched`, `error`).
    pub category: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
}

/// Receives one event per applied, failed, merged or unmatched candidate.
/// Candidates that were already correct are not audited.
pub trait AuditSink {
    fn record(&mut self, event: &AuditEvent);
}

impl<A: AuditSink + ?Sized> AuditSink for &mut A {
    fn record(&mut self, event: &AuditEvent) {
        (**self).record(event);
    }
}

/// Emits each event through `tracing`.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingAudit;

impl AuditSink for TracingAudit {
    fn record(&mut self, event: &AuditEvent) {
        let detail = event.detail.as_deref().unwrap_or("");
        match event.category.as_str() {
            "error" => tracing::warn!(
                job = %event.job,
                dataset = %event.dataset,
                id = %event.id,
                mode = %event.mode,
                detail,
                "candidate failed"
            ),
            "unmatched" => tracing::info!(
                job = %event.job,
                dataset = %event.dataset,
                id = %event.id,
                mode = %event.mode,
                "candidate unmatched"
            ),
            category => tracing::info!(
                job = %event.job,
                dataset = %event.dataset,
                id = %event.id,
                mode = %event.mode,
                category,
                detail,
                "candidate reconciled"
            ),
        }
    }
}

/// Keeps events in memory.
#[derive(Debug, Clone, Default)]
pub struct MemoryAudit {
    pub events: Vec<AuditEvent>,
}

impl MemoryAudit {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn categories(&self) -> Vec<&str> {
        self.events.iter().map(|e| e.category.as_str()).collect()
    }
}

impl AuditSink for MemoryAudit {
    fn record(&mut self, event: &AuditEvent) {
        self.events.push(event.clone());
    }
}
