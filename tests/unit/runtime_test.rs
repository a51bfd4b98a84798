//! Tests for the transport-facing API helpers

use std::sync::Arc;

use meeting_bot_scheduler::builders::CoordinatorBuilder;
use meeting_bot_scheduler::config::SchedulerConfig;
use meeting_bot_scheduler::core::{FixedProbe, HmacCredentialIssuer, NameListSynthesizer, RequestCoordinator};
use meeting_bot_scheduler::infra::ScriptedRunner;
use meeting_bot_scheduler::runtime::api::{health, list_active, terminate_all};
use meeting_bot_scheduler::runtime::{submit_json, JoinRequestBody, SubmitStatus};

fn coordinator(memory: f64) -> RequestCoordinator<ScriptedRunner> {
    CoordinatorBuilder::new(SchedulerConfig::default())
        .runner(ScriptedRunner::completing())
        .credential_issuer(HmacCredentialIssuer::new("k", "s").unwrap())
        .host_probe(Arc::new(FixedProbe::new(memory, 4)))
        .build()
        .unwrap()
}

fn body(json: &str) -> JoinRequestBody {
    serde_json::from_str(json).unwrap()
}

#[tokio::test]
async fn test_submit_json_accepts_synthesized_bots() {
    let coordinator = coordinator(0.2);
    let response = submit_json(
        &coordinator,
        body(r#"{"bot_count":6,"meeting_id":"123","credential":"pw","duration_minutes":5}"#),
        &NameListSynthesizer::default(),
    )
    .await;

    assert!(response.accepted);
    assert_eq!(response.status, SubmitStatus::Success);
    let summary = response.summary.unwrap();
    assert_eq!(summary.total_bots, 6);
    assert_eq!(summary.duration_minutes, 5);

    let listed = list_active(&coordinator);
    assert_eq!(listed.total_bots, 6);
    assert_eq!(listed.metrics.active_bot_count, 6);

    let stopped = terminate_all(&coordinator).await;
    assert_eq!(stopped.total_bots, 6);
    assert_eq!(health(&coordinator).active_bots, 0);
}

#[tokio::test]
async fn test_submit_json_reports_capacity_error() {
    let coordinator = coordinator(0.95);
    let response = submit_json(
        &coordinator,
        body(r#"{"bot_count":2,"meeting_id":"123","credential":"pw"}"#),
        &NameListSynthesizer::default(),
    )
    .await;

    assert!(!response.accepted);
    assert_eq!(response.status, SubmitStatus::CapacityExceeded);
    let capacity = response.capacity_error.unwrap();
    assert!(capacity.metrics.memory_used_fraction > 0.9);

    let json = serde_json::to_value(&capacity).unwrap();
    assert_eq!(json["reason"], "memory_pressure");
}

#[tokio::test]
async fn test_submit_json_rejects_missing_meeting() {
    let coordinator = coordinator(0.2);
    let response = submit_json(
        &coordinator,
        body(r#"{"bot_count":2,"credential":"pw"}"#),
        &NameListSynthesizer::default(),
    )
    .await;
    assert!(!response.accepted);
    assert_eq!(response.status, SubmitStatus::Invalid);
    assert!(response.summary.is_none());
}

#[tokio::test]
async fn test_submit_json_refuses_unbounded_bot_count() {
    let coordinator = coordinator(0.2);
    let response = submit_json(
        &coordinator,
        body(&format!(
            r#"{{"bot_count":{},"meeting_id":"123","credential":"pw"}}"#,
            usize::MAX
        )),
        &NameListSynthesizer::default(),
    )
    .await;
    assert!(!response.accepted);
    assert_eq!(response.status, SubmitStatus::Invalid);
    assert!(response.error.unwrap().contains("system ceiling"));
    assert!(coordinator.list_active().is_empty());
}

#[tokio::test]
async fn test_health_reflects_shutdown() {
    let coordinator = coordinator(0.2);
    assert!(health(&coordinator).ok);
    coordinator.shutdown().await;
    assert!(!health(&coordinator).ok);

    let response = submit_json(
        &coordinator,
        body(r#"{"bot_count":1,"meeting_id":"123","credential":"pw"}"#),
        &NameListSynthesizer::default(),
    )
    .await;
    assert_eq!(response.status, SubmitStatus::Unavailable);
}
