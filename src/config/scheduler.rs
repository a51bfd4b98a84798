//! Scheduler configuration structures.

use std::time::Duration;

use anyhow::Context;
use serde::{Deserialize, Serialize};

use crate::core::AppResult;

/// Upper bound on bots per batch. Bounds the resources one runner may take.
pub const HARD_BATCH_CEILING: usize = 10;

/// Prefix of environment variables read by [`SchedulerConfig::from_env`].
const ENV_PREFIX: &str = "BOT_SCHEDULER_";

/// Memory budget handed to each runner, scaled by its bot count.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BudgetConfig {
    /// Fixed memory per runner in MiB.
    pub base_memory_mb: u64,
    /// Additional memory per bot in MiB.
    pub per_bot_memory_mb: u64,
    /// Ceiling on any single runner in MiB.
    pub max_memory_mb: u64,
}

impl Default for BudgetConfig {
    fn default() -> Self {
        Self {
            base_memory_mb: 512,
            per_bot_memory_mb: 128,
            max_memory_mb: 4096,
        }
    }
}

/// Root scheduler configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SchedulerConfig {
    /// Bots per batch ceiling, at most [`HARD_BATCH_CEILING`].
    pub max_bots_per_batch: usize,
    /// Configured maximum of concurrently admitted batches.
    pub max_concurrent_batches: usize,
    /// System-wide ceiling on live bots.
    pub system_bot_ceiling: usize,
    /// Memory fraction above which requests are refused.
    pub memory_high_water: f64,
    /// Cpu load estimate above which requests are refused.
    pub cpu_high_water: f64,
    /// Batches per core at which the cpu estimate saturates.
    pub concurrency_factor: f64,
    /// Gate permits per core before damping.
    pub concurrency_multiplier: f64,
    /// Damping applied to the computed gate capacity.
    pub safety_margin: f64,
    /// How long a runner has to report before its session is held anyway.
    pub startup_report_timeout_secs: u64,
    /// Cooperative stop window before a runner is killed.
    pub grace_period_ms: u64,
    /// Hard deadline for draining the registry.
    pub shutdown_ceiling_ms: u64,
    /// Duration applied when a request does not name one.
    pub default_duration_minutes: u32,
    /// Engine tag used as batch id prefix.
    pub engine_tag: String,
    /// Use the OS load average instead of the batch-count heuristic when available.
    pub prefer_load_average: bool,
    /// Report every bot of a completed batch as joined regardless of in-page failures.
    pub treat_joined_as_success: bool,
    /// Runner memory budget.
    pub budget: BudgetConfig,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            max_bots_per_batch: HARD_BATCH_CEILING,
            max_concurrent_batches: 8,
            system_bot_ceiling: 500,
            memory_high_water: 0.85,
            cpu_high_water: 0.90,
            concurrency_factor: 2.0,
            concurrency_multiplier: 1.5,
            safety_margin: 0.8,
            startup_report_timeout_secs: 45,
            grace_period_ms: 3_000,
            shutdown_ceiling_ms: 10_000,
            default_duration_minutes: 60,
            engine_tag: "chromium".into(),
            prefer_load_average: false,
            treat_joined_as_success: true,
            budget: BudgetConfig::default(),
        }
    }
}

fn check_fraction(name: &str, value: f64) -> Result<(), String> {
    if !(value > 0.0 && value <= 1.0) {
        return Err(format!("{name} must be in (0, 1]"));
    }
    Ok(())
}

impl SchedulerConfig {
    /// Validate configuration values.
    pub fn validate(&self) -> Result<(), String> {
        if self.max_bots_per_batch == 0 || self.max_bots_per_batch > HARD_BATCH_CEILING {
            return Err(format!(
                "max_bots_per_batch must be between 1 and {HARD_BATCH_CEILING}"
            ));
        }
        if self.max_concurrent_batches == 0 {
            return Err("max_concurrent_batches must be greater than 0".into());
        }
        if self.system_bot_ceiling == 0 {
            return Err("system_bot_ceiling must be greater than 0".into());
        }
        check_fraction("memory_high_water", self.memory_high_water)?;
        check_fraction("cpu_high_water", self.cpu_high_water)?;
        check_fraction("safety_margin", self.safety_margin)?;
        if !(self.concurrency_factor > 0.0) {
            return Err("concurrency_factor must be positive".into());
        }
        if !(self.concurrency_multiplier > 0.0) {
            return Err("concurrency_multiplier must be positive".into());
        }
        if self.startup_report_timeout_secs == 0 {
            return Err("startup_report_timeout_secs must be greater than 0".into());
        }
        if self.shutdown_ceiling_ms < self.grace_period_ms {
            return Err("shutdown_ceiling_ms must not be shorter than grace_period_ms".into());
        }
        if self.default_duration_minutes == 0 {
            return Err("default_duration_minutes must be greater than 0".into());
        }
        if self.engine_tag.trim().is_empty() {
            return Err("engine_tag must not be empty".into());
        }
        if self.budget.base_memory_mb > self.budget.max_memory_mb {
            return Err("budget.base_memory_mb exceeds budget.max_memory_mb".into());
        }
        Ok(())
    }

    /// Parse scheduler configuration from a JSON string and validate.
    pub fn from_json_str(input: &str) -> Result<Self, String> {
        let cfg: Self = serde_json::from_str(input).map_err(|e| format!("parse error: {e}"))?;
        cfg.validate()?;
        Ok(cfg)
    }

    /// Load configuration from `BOT_SCHEDULER_*` environment variables over
    /// the defaults, reading a `.env` file first when one exists.
    ///
    /// # Errors
    ///
    /// Fails when a variable cannot be parsed or the result is invalid.
    pub fn from_env() -> AppResult<Self> {
        let _ = dotenvy::dotenv();
        let mut cfg = Self::default();
        overlay(&mut cfg.max_bots_per_batch, "MAX_BOTS_PER_BATCH")?;
        overlay(&mut cfg.max_concurrent_batches, "MAX_CONCURRENT_BATCHES")?;
        overlay(&mut cfg.system_bot_ceiling, "SYSTEM_BOT_CEILING")?;
        overlay(&mut cfg.memory_high_water, "MEMORY_HIGH_WATER")?;
        overlay(&mut cfg.cpu_high_water, "CPU_HIGH_WATER")?;
        overlay(&mut cfg.concurrency_factor, "CONCURRENCY_FACTOR")?;
        overlay(&mut cfg.concurrency_multiplier, "CONCURRENCY_MULTIPLIER")?;
        overlay(&mut cfg.safety_margin, "SAFETY_MARGIN")?;
        overlay(&mut cfg.startup_report_timeout_secs, "STARTUP_REPORT_TIMEOUT_SECS")?;
        overlay(&mut cfg.grace_period_ms, "GRACE_PERIOD_MS")?;
        overlay(&mut cfg.shutdown_ceiling_ms, "SHUTDOWN_CEILING_MS")?;
        overlay(&mut cfg.default_duration_minutes, "DEFAULT_DURATION_MINUTES")?;
        overlay(&mut cfg.engine_tag, "ENGINE_TAG")?;
        overlay(&mut cfg.prefer_load_average, "PREFER_LOAD_AVERAGE")?;
        overlay(&mut cfg.treat_joined_as_success, "TREAT_JOINED_AS_SUCCESS")?;
        overlay(&mut cfg.budget.base_memory_mb, "BASE_MEMORY_MB")?;
        overlay(&mut cfg.budget.per_bot_memory_mb, "PER_BOT_MEMORY_MB")?;
        overlay(&mut cfg.budget.max_memory_mb, "MAX_MEMORY_MB")?;
        cfg.validate().map_err(anyhow::Error::msg)?;
        Ok(cfg)
    }

    /// Startup-report timeout as a `Duration`.
    #[must_use]
    pub const fn startup_report_timeout(&self) -> Duration {
        Duration::from_secs(self.startup_report_timeout_secs)
    }

    /// Grace period as a `Duration`.
    #[must_use]
    pub const fn grace_period(&self) -> Duration {
        Duration::from_millis(self.grace_period_ms)
    }

    /// Shutdown ceiling as a `Duration`.
    #[must_use]
    pub const fn shutdown_ceiling(&self) -> Duration {
        Duration::from_millis(self.shutdown_ceiling_ms)
    }
}

fn overlay<T>(slot: &mut T, key: &str) -> AppResult<()>
where
    T: std::str::FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    let name = format!("{ENV_PREFIX}{key}");
    if let Ok(raw) = std::env::var(&name) {
        *slot = raw
            .trim()
            .parse()
            .with_context(|| format!("invalid value for {name}: {raw:?}"))?;
    }
    Ok(())
}
