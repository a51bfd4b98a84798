//! Tests for builder modules

use std::sync::Arc;

use meeting_bot_scheduler::builders::CoordinatorBuilder;
use meeting_bot_scheduler::config::SchedulerConfig;
use meeting_bot_scheduler::core::{FixedProbe, HmacCredentialIssuer, SchedulerError};
use meeting_bot_scheduler::infra::ScriptedRunner;

#[tokio::test]
async fn test_builder_wires_coordinator() {
    let coordinator = CoordinatorBuilder::new(SchedulerConfig::default())
        .runner(ScriptedRunner::completing())
        .credential_issuer(HmacCredentialIssuer::new("k", "s").unwrap())
        .host_probe(Arc::new(FixedProbe::new(0.3, 2)))
        .build()
        .unwrap();
    assert_eq!(coordinator.config().max_bots_per_batch, 10);
    assert!(coordinator.list_active().is_empty());
    assert!(!coordinator.is_shutting_down());
}

#[test]
fn test_builder_requires_runner() {
    let result = CoordinatorBuilder::<ScriptedRunner>::new(SchedulerConfig::default())
        .credential_issuer(HmacCredentialIssuer::new("k", "s").unwrap())
        .build();
    assert!(matches!(result, Err(SchedulerError::InvalidConfig(_))));
}

#[test]
fn test_builder_requires_issuer() {
    let result = CoordinatorBuilder::new(SchedulerConfig::default())
        .runner(ScriptedRunner::completing())
        .build();
    assert!(matches!(result, Err(SchedulerError::InvalidConfig(_))));
}

#[test]
fn test_builder_rejects_invalid_config() {
    let config = SchedulerConfig {
        max_concurrent_batches: 0,
        ..SchedulerConfig::default()
    };
    let result = CoordinatorBuilder::new(config)
        .runner(ScriptedRunner::completing())
        .credential_issuer(HmacCredentialIssuer::new("k", "s").unwrap())
        .build();
    assert!(matches!(result, Err(SchedulerError::InvalidConfig(_))));
}
