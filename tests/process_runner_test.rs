//! Child-process runner over a small shell script.
#![cfg(unix)]

use std::time::Duration;

use meeting_bot_scheduler::core::{
    stop_runner, Batch, BotIdentity, ConnectionParams, ResourceBudget, Runner, RunnerError,
    RunnerEvent, StopOutcome,
};
use meeting_bot_scheduler::infra::runner::{ProcessRunner, ProcessRunnerConfig};

fn batch() -> Batch {
    Batch {
        id: "chromium-test0001-1-2".into(),
        bots: vec![BotIdentity::new(1, "Alex"), BotIdentity::new(2, "Blair")],
        meeting_id: "123456789".into(),
        credential: "passcode".into(),
        connection: ConnectionParams::optimized("signed".into()),
        duration_minutes: 1,
    }
}

fn budget() -> ResourceBudget {
    ResourceBudget {
        memory_mb: 768,
        bot_count: 2,
    }
}

fn shell(script: &str) -> ProcessRunner {
    ProcessRunner::new(ProcessRunnerConfig::new("sh").arg("-c").arg(script))
}

#[tokio::test]
async fn test_complete_line_then_graceful_stop() {
    let runner = shell(
        r##"read start
echo "not json"
echo '{"type":"complete","results":[{"bot_id":1,"success":true},{"bot_id":2,"success":false,"error":"lobby"}]}'
read stop
exit 0"##,
    );
    let mut session = runner.start(batch(), budget()).await.unwrap();

    let event = tokio::time::timeout(Duration::from_secs(5), session.events.recv())
        .await
        .unwrap()
        .unwrap();
    let RunnerEvent::Completed(results) = event else {
        panic!("unexpected event: {event:?}");
    };
    assert_eq!(results.len(), 2);
    assert!(results[0].success);
    assert_eq!(results[1].error.as_deref(), Some("lobby"));

    let outcome = stop_runner(session.handle.as_ref(), Duration::from_secs(5)).await;
    assert_eq!(outcome, StopOutcome::Graceful);
    let exit = tokio::time::timeout(Duration::from_secs(5), session.events.recv())
        .await
        .unwrap();
    assert_eq!(exit, Some(RunnerEvent::Exited(Some(0))));
}

#[tokio::test]
async fn test_error_line_and_forced_stop() {
    let runner = shell(
        r##"read start
echo '{"type":"error","message":"launch failed"}'
trap '' TERM
while true; do sleep 1; done"##,
    );
    let mut session = runner.start(batch(), budget()).await.unwrap();
    let event = tokio::time::timeout(Duration::from_secs(5), session.events.recv())
        .await
        .unwrap();
    assert_eq!(event, Some(RunnerEvent::Errored("launch failed".into())));

    session.handle.force_stop().await;
    tokio::time::timeout(Duration::from_secs(5), session.handle.wait_exited())
        .await
        .unwrap();
}

#[tokio::test]
async fn test_budget_is_exported_to_child() {
    let runner = shell(
        r##"read start
printf '{"type":"error","message":"%s %s"}\n' "$BOT_RUNNER_MEMORY_MB" "$BOT_RUNNER_BATCH_ID""##,
    );
    let mut session = runner.start(batch(), budget()).await.unwrap();
    let event = tokio::time::timeout(Duration::from_secs(5), session.events.recv())
        .await
        .unwrap();
    assert_eq!(
        event,
        Some(RunnerEvent::Errored("768 chromium-test0001-1-2".into()))
    );
}

#[tokio::test]
async fn test_unexpected_exit_is_reported() {
    let runner = shell("read start; exit 3");
    let mut session = runner.start(batch(), budget()).await.unwrap();
    let event = tokio::time::timeout(Duration::from_secs(5), session.events.recv())
        .await
        .unwrap();
    assert_eq!(event, Some(RunnerEvent::Exited(Some(3))));
}

#[tokio::test]
async fn test_missing_program_fails_to_launch() {
    let runner = ProcessRunner::new(ProcessRunnerConfig::new("/nonexistent/bot-runner"));
    let err = runner.start(batch(), budget()).await.unwrap_err();
    assert!(matches!(err, RunnerError::Launch(_)));
    assert!(err.to_string().starts_with("launch failed"));
}
