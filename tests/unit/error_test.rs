//! Tests for error types

use meeting_bot_scheduler::core::{RefusalReason, RunnerError, SchedulerError, SystemMetrics};

#[test]
fn test_validation_error() {
    let err = SchedulerError::Validation("bot list is empty".to_string());
    assert_eq!(format!("{}", err), "invalid request: bot list is empty");
}

#[test]
fn test_capacity_exceeded_error() {
    let err = SchedulerError::CapacityExceeded {
        reason: RefusalReason::CpuPressure,
        metrics: SystemMetrics::default(),
    };
    assert_eq!(format!("{}", err), "capacity exceeded: cpu load above high-water mark");
}

#[test]
fn test_shutting_down_error() {
    let err = SchedulerError::ShuttingDown;
    assert_eq!(format!("{}", err), "scheduler is shutting down");
}

#[test]
fn test_backend_error() {
    let err = SchedulerError::Backend("connection failed".to_string());
    assert_eq!(format!("{}", err), "backend error: connection failed");
}

#[test]
fn test_runner_launch_error() {
    let err = RunnerError::Launch("no browser binary".to_string());
    assert_eq!(format!("{}", err), "launch failed: no browser binary");
}

#[test]
fn test_runner_io_error_converts() {
    let io = std::io::Error::new(std::io::ErrorKind::BrokenPipe, "pipe closed");
    let err: RunnerError = io.into();
    assert!(matches!(err, RunnerError::Io(_)));
    assert!(err.to_string().contains("pipe closed"));
}

#[test]
fn test_refusal_reason_serializes_snake_case() {
    let json = serde_json::to_string(&RefusalReason::BotCeiling).unwrap();
    assert_eq!(json, "\"bot_ceiling\"");
}
