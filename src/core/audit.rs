//! Audit trail of batch lifecycle transitions.
//!
//! Provides an in-memory sink; other sinks plug in through [`AuditSink`].

use std::collections::VecDeque;
use std::sync::Arc;

use parking_lot::Mutex;

use crate::util::clock::now_ms;

/// Audit event structure.
#[derive(Debug, Clone)]
pub struct AuditEvent {
    /// Event identifier.
    pub event_id: String,
    /// Related batch identifier.
    pub batch_id: String,
    /// Action taken (admit, start, complete, error, exit, held, terminate).
    pub action: String,
    /// Timestamp milliseconds.
    pub created_at_ms: u128,
    /// Additional context.
    pub payload: Option<String>,
}

/// Audit sink abstraction.
pub trait AuditSink: Send {
    /// Record an audit event.
    fn record(&mut self, event: AuditEvent);
}

/// Audit sink shared between the registry and lifecycle tasks.
pub type SharedAuditSink = Arc<Mutex<Box<dyn AuditSink>>>;

/// Wrap a sink for sharing.
#[must_use]
pub fn shared(sink: impl AuditSink + 'static) -> SharedAuditSink {
    Arc::new(Mutex::new(Box::new(sink)))
}

/// In-memory audit sink for testing and dev.
pub struct InMemoryAuditSink {
    events: Arc<Mutex<VecDeque<AuditEvent>>>,
    max_events: usize,
}

impl InMemoryAuditSink {
    /// Create a new in-memory sink with a bounded buffer.
    #[must_use]
    pub fn new(max_events: usize) -> Self {
        Self {
            events: Arc::new(Mutex::new(VecDeque::with_capacity(max_events))),
            max_events,
        }
    }

    /// Reader over the same buffer, usable after the sink has been boxed.
    #[must_use]
    pub fn reader(&self) -> AuditReader {
        AuditReader {
            events: Arc::clone(&self.events),
        }
    }

    /// Retrieve a snapshot of stored events.
    #[must_use]
    pub fn events(&self) -> Vec<AuditEvent> {
        self.events.lock().iter().cloned().collect()
    }
}

impl AuditSink for InMemoryAuditSink {
    fn record(&mut self, event: AuditEvent) {
        let mut events = self.events.lock();
        if events.len() >= self.max_events {
            events.pop_front();
        }
        events.push_back(event);
    }
}

/// Read side of an [`InMemoryAuditSink`].
#[derive(Clone)]
pub struct AuditReader {
    events: Arc<Mutex<VecDeque<AuditEvent>>>,
}

impl AuditReader {
    /// Snapshot of stored events.
    #[must_use]
    pub fn events(&self) -> Vec<AuditEvent> {
        self.events.lock().iter().cloned().collect()
    }

    /// Actions recorded for `batch_id`, oldest first.
    #[must_use]
    pub fn actions_for(&self, batch_id: &str) -> Vec<String> {
        self.events
            .lock()
            .iter()
            .filter(|e| e.batch_id == batch_id)
            .map(|e| e.action.clone())
            .collect()
    }
}

/// Helper to build an audit event from context.
pub fn build_audit_event(
    batch_id: impl Into<String>,
    action: impl Into<String>,
    payload: Option<String>,
) -> AuditEvent {
    let batch_id = batch_id.into();
    let action = action.into();
    AuditEvent {
        event_id: format!("{batch_id}-{action}-{}", uuid::Uuid::new_v4().simple()),
        batch_id,
        action,
        created_at_ms: now_ms(),
        payload,
    }
}

/// Record on an optional sink.
pub fn record(sink: &Option<SharedAuditSink>, batch_id: &str, action: &str, payload: Option<String>) {
    if let Some(sink) = sink {
        sink.lock().record(build_audit_event(batch_id, action, payload));
    }
}
