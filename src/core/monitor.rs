//! Host sampling and admission decisions.
//!
//! Metrics are never stored: every call to [`SystemMonitor::sample`] reads the
//! registry and the host again, so the snapshot cannot drift from the truth.

use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use sysinfo::System;

use crate::config::SchedulerConfig;
use crate::core::{ActiveRegistry, BotReservation, RefusalReason, SchedulerError, SystemMetrics};
use crate::util::clock::now_ms;

/// Source of host resource indicators.
pub trait HostProbe: Send + Sync {
    /// Fraction of host memory in use, `[0, 1]`.
    fn memory_used_fraction(&self) -> f64;
    /// Logical cores available to the process.
    fn core_count(&self) -> usize;
    /// One-minute load average, when the platform exposes one.
    fn load_average(&self) -> Option<f64> {
        None
    }
}

/// Probe backed by `sysinfo` and `num_cpus`.
pub struct SysinfoProbe {
    system: Mutex<System>,
    cores: usize,
}

impl SysinfoProbe {
    /// Create a probe for the current host.
    #[must_use]
    pub fn new() -> Self {
        Self {
            system: Mutex::new(System::new()),
            cores: num_cpus::get().max(1),
        }
    }
}

impl Default for SysinfoProbe {
    fn default() -> Self {
        Self::new()
    }
}

impl HostProbe for SysinfoProbe {
    #[allow(clippy::cast_precision_loss)]
    fn memory_used_fraction(&self) -> f64 {
        let mut system = self.system.lock();
        system.refresh_memory();
        let total = system.total_memory();
        if total == 0 {
            return 0.0;
        }
        system.used_memory() as f64 / total as f64
    }

    fn core_count(&self) -> usize {
        self.cores
    }

    fn load_average(&self) -> Option<f64> {
        let load = System::load_average();
        (load.one > 0.0).then_some(load.one)
    }
}

/// Probe with settable readings, for tests and dry runs.
#[derive(Debug)]
pub struct FixedProbe {
    memory_bits: AtomicU64,
    cores: AtomicUsize,
    load_bits: AtomicU64,
}

impl FixedProbe {
    /// Create a probe reporting the given memory fraction and core count.
    #[must_use]
    pub fn new(memory_used_fraction: f64, cores: usize) -> Self {
        Self {
            memory_bits: AtomicU64::new(memory_used_fraction.to_bits()),
            cores: AtomicUsize::new(cores.max(1)),
            load_bits: AtomicU64::new(f64::NAN.to_bits()),
        }
    }

    /// Change the reported memory fraction.
    pub fn set_memory_used_fraction(&self, value: f64) {
        self.memory_bits.store(value.to_bits(), Ordering::Release);
    }

    /// Report a load average; `None` hides it.
    pub fn set_load_average(&self, value: Option<f64>) {
        self.load_bits
            .store(value.unwrap_or(f64::NAN).to_bits(), Ordering::Release);
    }
}

impl HostProbe for FixedProbe {
    fn memory_used_fraction(&self) -> f64 {
        f64::from_bits(self.memory_bits.load(Ordering::Acquire))
    }

    fn core_count(&self) -> usize {
        self.cores.load(Ordering::Acquire)
    }

    fn load_average(&self) -> Option<f64> {
        let value = f64::from_bits(self.load_bits.load(Ordering::Acquire));
        (!value.is_nan()).then_some(value)
    }
}

/// Outcome of an admission check.
#[derive(Debug, Clone, PartialEq)]
pub enum AdmissionDecision {
    /// The request may proceed.
    Admit(SystemMetrics),
    /// The request must be rejected.
    Refuse {
        /// Which limit tripped.
        reason: RefusalReason,
        /// Snapshot the decision was based on.
        metrics: SystemMetrics,
    },
}

impl AdmissionDecision {
    /// Convert a refusal into `SchedulerError::CapacityExceeded`.
    ///
    /// # Errors
    ///
    /// Returns the capacity error for `Refuse`.
    pub fn into_result(self) -> Result<SystemMetrics, SchedulerError> {
        match self {
            Self::Admit(metrics) => Ok(metrics),
            Self::Refuse { reason, metrics } => {
                Err(SchedulerError::CapacityExceeded { reason, metrics })
            }
        }
    }
}

/// Samples load and answers admission questions. Never blocks.
pub struct SystemMonitor {
    config: Arc<SchedulerConfig>,
    registry: ActiveRegistry,
    probe: Arc<dyn HostProbe>,
}

impl SystemMonitor {
    /// Create a monitor reading `registry` and `probe`.
    pub fn new(config: Arc<SchedulerConfig>, registry: ActiveRegistry, probe: Arc<dyn HostProbe>) -> Self {
        Self {
            config,
            registry,
            probe,
        }
    }

    /// Logical cores reported by the probe.
    #[must_use]
    pub fn core_count(&self) -> usize {
        self.probe.core_count().max(1)
    }

    /// Recompute metrics from the registry and the host.
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn sample(&self) -> SystemMetrics {
        let (active_batch_count, active_bot_count) = self.registry.load();
        let cores = self.core_count() as f64;
        let heuristic =
            (active_batch_count as f64 / (cores * self.config.concurrency_factor)).min(1.0);
        let cpu_load_estimate = if self.config.prefer_load_average {
            self.probe
                .load_average()
                .map_or(heuristic, |load| (load / cores).clamp(0.0, 1.0))
        } else {
            heuristic
        };
        SystemMetrics {
            active_batch_count,
            active_bot_count,
            memory_used_fraction: self.probe.memory_used_fraction().clamp(0.0, 1.0),
            cpu_load_estimate,
            last_sampled_at_ms: now_ms(),
        }
    }

    /// Decide whether `additional_bots` more bots can be admitted.
    ///
    /// Bots reserved by requests still starting count as active.
    #[must_use]
    pub fn check_admission(&self, additional_bots: usize) -> AdmissionDecision {
        self.decide(additional_bots, self.registry.reserved_bots())
    }

    /// Admit `additional_bots` and reserve them against the ceiling until
    /// the returned reservation is dropped.
    ///
    /// # Errors
    ///
    /// `CapacityExceeded` with the refusal reason and a load snapshot.
    pub fn admit(&self, additional_bots: usize) -> Result<(SystemMetrics, BotReservation), SchedulerError> {
        self.registry.reserve_if(additional_bots, |reserved| {
            self.decide(additional_bots, reserved).into_result()
        })
    }

    fn decide(&self, additional_bots: usize, reserved_bots: usize) -> AdmissionDecision {
        let metrics = self.sample();
        let reason = if metrics.memory_used_fraction > self.config.memory_high_water {
            Some(RefusalReason::MemoryPressure)
        } else if metrics.cpu_load_estimate > self.config.cpu_high_water {
            Some(RefusalReason::CpuPressure)
        } else if metrics
            .active_bot_count
            .saturating_add(reserved_bots)
            .saturating_add(additional_bots)
            > self.config.system_bot_ceiling
        {
            Some(RefusalReason::BotCeiling)
        } else {
            None
        };
        match reason {
            Some(reason) => {
                tracing::warn!(
                    %reason,
                    additional_bots,
                    active_bots = metrics.active_bot_count,
                    reserved_bots,
                    memory = metrics.memory_used_fraction,
                    cpu = metrics.cpu_load_estimate,
                    "admission refused"
                );
                AdmissionDecision::Refuse { reason, metrics }
            }
            None => AdmissionDecision::Admit(metrics),
        }
    }

    /// Boolean form of [`Self::check_admission`].
    #[must_use]
    pub fn can_admit(&self, additional_bots: usize) -> bool {
        matches!(self.check_admission(additional_bots), AdmissionDecision::Admit(_))
    }

    /// Gate size for a request of `batch_count` batches under `metrics`:
    /// `min(configured max, computed capacity, batch count)`, at least 1.
    #[must_use]
    #[allow(
        clippy::cast_precision_loss,
        clippy::cast_possible_truncation,
        clippy::cast_sign_loss
    )]
    pub fn gate_capacity(&self, metrics: &SystemMetrics, batch_count: usize) -> usize {
        let computed = (self.core_count() as f64
            * self.config.concurrency_multiplier
            * (1.0 - metrics.cpu_load_estimate)
            * self.config.safety_margin)
            .floor()
            .max(1.0) as usize;
        self.config
            .max_concurrent_batches
            .min(computed)
            .min(batch_count)
            .max(1)
    }
}
