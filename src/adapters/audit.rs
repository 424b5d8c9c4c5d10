use parking_lot::Mutex;
use tracing::info;

use crate::ports::{AuditEvent, AuditEventType, AuditSink};

/// Writes each audit record as one structured event on the `audit` target
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingAuditSink;

impl AuditSink for TracingAuditSink {
    fn record(&self, event: AuditEvent) {
        let details = serde_json::to_string(&event.details).unwrap_or_default();
        info!(
            target: "audit",
            event_type = event.event_type.as_str(),
            status = ?event.status,
            actor = %event.actor,
            target_id = event.target_id,
            details = %details,
            "crypto token audit record"
        );
    }
}

/// Keeps every record in memory, for embedders and tests
#[derive(Debug, Default)]
pub struct MemoryAuditSink {
    events: Mutex<Vec<AuditEvent>>,
}

impl MemoryAuditSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<AuditEvent> {
        self.events.lock().clone()
    }

    pub fn events_of(&self, event_type: AuditEventType) -> Vec<AuditEvent> {
        self.events
            .lock()
            .iter()
            .filter(|event| event.event_type == event_type)
            .cloned()
            .collect()
    }

    pub fn len(&self) -> usize {
        self.events.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.lock().is_empty()
    }
}

impl AuditSink for MemoryAuditSink {
    fn record(&self, event: AuditEvent) {
        self.events.lock().push(event);
    }
}
