//! Tests for audit sink

use meeting_bot_scheduler::core::{build_audit_event, AuditSink, InMemoryAuditSink};

#[test]
fn test_in_memory_audit_sink() {
    let mut sink = InMemoryAuditSink::new(10);

    let event = build_audit_event("chromium-run1-1-2", "start", Some("768MiB".to_string()));

    sink.record(event.clone());
    assert_eq!(sink.events().len(), 1);

    let events = sink.events();
    assert_eq!(events[0].event_id, event.event_id);
    assert_eq!(events[0].batch_id, "chromium-run1-1-2");
    assert_eq!(events[0].action, "start");
}

#[test]
fn test_audit_sink_overflow() {
    let mut sink = InMemoryAuditSink::new(2);

    sink.record(build_audit_event("b1", "admit", None));
    sink.record(build_audit_event("b2", "admit", None));
    sink.record(build_audit_event("b3", "admit", None));

    let events = sink.events();
    assert_eq!(events.len(), 2);
    assert_eq!(events[0].batch_id, "b2"); // First one popped
    assert_eq!(events[1].batch_id, "b3");
}

#[test]
fn test_reader_filters_by_batch() {
    let mut sink = InMemoryAuditSink::new(8);
    let reader = sink.reader();
    sink.record(build_audit_event("b1", "admit", None));
    sink.record(build_audit_event("b2", "admit", None));
    sink.record(build_audit_event("b1", "error", Some("launch failed".into())));
    assert_eq!(reader.actions_for("b1"), vec!["admit", "error"]);
    assert_eq!(reader.events().len(), 3);
}
