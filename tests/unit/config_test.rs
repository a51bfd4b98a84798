//! Tests for configuration validation

use meeting_bot_scheduler::config::{SchedulerConfig, HARD_BATCH_CEILING};

#[test]
fn test_default_config_is_valid() {
    let cfg = SchedulerConfig::default();
    assert!(cfg.validate().is_ok());
    assert_eq!(cfg.max_bots_per_batch, 10);
    assert_eq!(cfg.grace_period_ms, 3_000);
    assert_eq!(cfg.shutdown_ceiling_ms, 10_000);
    assert!(cfg.treat_joined_as_success);
}

#[test]
fn test_batch_size_above_hard_ceiling_rejected() {
    let cfg = SchedulerConfig {
        max_bots_per_batch: HARD_BATCH_CEILING + 1,
        ..SchedulerConfig::default()
    };
    assert!(cfg.validate().is_err());
}

#[test]
fn test_zero_batch_size_rejected() {
    let cfg = SchedulerConfig {
        max_bots_per_batch: 0,
        ..SchedulerConfig::default()
    };
    assert!(cfg.validate().is_err());
}

#[test]
fn test_high_water_marks_must_be_fractions() {
    let cfg = SchedulerConfig {
        memory_high_water: 1.5,
        ..SchedulerConfig::default()
    };
    assert!(cfg.validate().is_err());

    let cfg = SchedulerConfig {
        cpu_high_water: 0.0,
        ..SchedulerConfig::default()
    };
    assert!(cfg.validate().is_err());
}

#[test]
fn test_ceiling_shorter_than_grace_rejected() {
    let cfg = SchedulerConfig {
        grace_period_ms: 5_000,
        shutdown_ceiling_ms: 1_000,
        ..SchedulerConfig::default()
    };
    let err = cfg.validate().unwrap_err();
    assert!(err.contains("shutdown_ceiling_ms"));
}

#[test]
fn test_config_from_json_fills_defaults() {
    let json = r#"{
        "max_bots_per_batch": 5,
        "startup_report_timeout_secs": 20,
        "budget": { "base_memory_mb": 256, "per_bot_memory_mb": 64, "max_memory_mb": 2048 }
    }"#;

    let cfg = SchedulerConfig::from_json_str(json).unwrap();
    assert_eq!(cfg.max_bots_per_batch, 5);
    assert_eq!(cfg.startup_report_timeout().as_secs(), 20);
    assert_eq!(cfg.budget.per_bot_memory_mb, 64);
    assert_eq!(cfg.engine_tag, "chromium");
    assert_eq!(cfg.max_concurrent_batches, 8);
}

#[test]
fn test_config_from_json_rejects_invalid() {
    assert!(SchedulerConfig::from_json_str(r#"{"max_bots_per_batch": 40}"#).is_err());
    assert!(SchedulerConfig::from_json_str("not json").is_err());
}

#[test]
fn test_config_from_env_overlays_defaults() {
    std::env::set_var("BOT_SCHEDULER_SYSTEM_BOT_CEILING", "120");
    let cfg = SchedulerConfig::from_env().unwrap();
    std::env::remove_var("BOT_SCHEDULER_SYSTEM_BOT_CEILING");
    assert_eq!(cfg.system_bot_ceiling, 120);
}
