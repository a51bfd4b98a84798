//! Runner seam: the opaque execution unit that joins a batch of bots.
//!
//! The scheduler never looks inside a runner. It starts one per batch, waits
//! for exactly one [`RunnerEvent`] report, and later stops it through the
//! [`RunnerHandle`] (cooperatively first, forcibly after a grace period).
//!
//! # Example
//!
//! ```rust,ignore
//! use async_trait::async_trait;
//! use meeting_bot_scheduler::core::{Batch, ResourceBudget, Runner, RunnerError, RunnerSession};
//!
//! struct HeadlessRunner;
//!
//! #[async_trait]
//! impl Runner for HeadlessRunner {
//!     async fn start(&self, batch: Batch, budget: ResourceBudget) -> Result<RunnerSession, RunnerError> {
//!         // launch a sandboxed browser, wire its messages into a channel...
//!         # unimplemented!()
//!     }
//! }
//! ```

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

use crate::config::BudgetConfig;
use crate::core::{Batch, RunnerError};

/// Resources granted to one runner, scaled by its bot count.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceBudget {
    /// Memory ceiling in MiB.
    pub memory_mb: u64,
    /// Bots the runner hosts.
    pub bot_count: usize,
}

impl ResourceBudget {
    /// Budget for a runner hosting `bot_count` bots, bounded by the configured ceiling.
    #[must_use]
    pub fn for_bots(bot_count: usize, cfg: &BudgetConfig) -> Self {
        let scaled = cfg
            .per_bot_memory_mb
            .saturating_mul(bot_count as u64)
            .saturating_add(cfg.base_memory_mb);
        Self {
            memory_mb: scaled.min(cfg.max_memory_mb),
            bot_count,
        }
    }
}

/// Raw per-bot outcome as the runner saw it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunnerBotReport {
    /// Bot id.
    pub bot_id: u64,
    /// Whether the in-page join flow succeeded.
    pub success: bool,
    /// In-page error, if any.
    #[serde(default)]
    pub error: Option<String>,
}

/// The single report a runner emits.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RunnerEvent {
    /// Per-bot outcomes are available.
    Completed(Vec<RunnerBotReport>),
    /// Fatal startup or launch error.
    Errored(String),
    /// The execution unit exited. `None` means it was killed by a signal.
    Exited(Option<i32>),
}

/// Control surface of a started runner.
#[async_trait]
pub trait RunnerHandle: Send + Sync {
    /// Ask the runner to stop cooperatively. Must not block on the exit.
    async fn request_graceful_stop(&self);
    /// Stop the runner unconditionally. Idempotent.
    async fn force_stop(&self);
    /// Resolve once the execution unit has exited.
    async fn wait_exited(&self);
}

/// A started runner: its control handle and its report channel.
pub struct RunnerSession {
    /// Control handle shared with the registry.
    pub handle: Arc<dyn RunnerHandle>,
    /// Report channel. The first message is the runner's report.
    pub events: mpsc::Receiver<RunnerEvent>,
}

impl std::fmt::Debug for RunnerSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RunnerSession").finish_non_exhaustive()
    }
}

/// Launches execution units for batches.
#[async_trait]
pub trait Runner: Send + Sync + 'static {
    /// Start a runner for `batch` within `budget`.
    ///
    /// # Errors
    ///
    /// Returns `RunnerError` when the execution unit cannot be launched at all.
    async fn start(&self, batch: Batch, budget: ResourceBudget) -> Result<RunnerSession, RunnerError>;
}

/// How a runner ended up stopping.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopOutcome {
    /// Exited within the grace period.
    Graceful,
    /// Killed after the grace period.
    Forced,
}

/// Graceful-then-forced stop.
pub async fn stop_runner(handle: &dyn RunnerHandle, grace: Duration) -> StopOutcome {
    handle.request_graceful_stop().await;
    if tokio::time::timeout(grace, handle.wait_exited()).await.is_ok() {
        return StopOutcome::Graceful;
    }
    handle.force_stop().await;
    StopOutcome::Forced
}
