//! Process-wide registry of live batches.
//!
//! Every mutation happens under one `parking_lot::Mutex`, so a reader never
//! sees a half-applied transition. Termination timers are explicit task
//! handles stored on the entry: armed once on registration, and either fired
//! (hold-open elapsed) or cancelled (batch failed, or drained) exactly once.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use futures::future::join_all;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tokio::task::JoinHandle;
use tokio::time::Instant;

use crate::core::audit::{record, SharedAuditSink};
use crate::core::runner::{stop_runner, RunnerHandle, StopOutcome};
use crate::core::{BatchId, SchedulerError, WorkerState, WorkerStatus};
use crate::util::clock::{minutes, now_ms};

/// Default cooperative stop window.
const DEFAULT_GRACE: Duration = Duration::from_secs(3);
/// Default hard deadline for a drain.
const DEFAULT_CEILING: Duration = Duration::from_secs(10);

/// Cancelable hold-open timer.
#[derive(Debug)]
pub struct TerminationTimer {
    task: JoinHandle<()>,
}

impl TerminationTimer {
    fn cancel(self) {
        self.task.abort();
    }
}

/// Live state of one admitted batch.
pub struct WorkerHandle {
    batch_id: BatchId,
    runner: Arc<dyn RunnerHandle>,
    started_at: Instant,
    started_at_ms: u128,
    duration_minutes: u32,
    bot_count: usize,
    state: WorkerState,
    termination: Option<TerminationTimer>,
}

impl WorkerHandle {
    fn status(&self) -> WorkerStatus {
        let duration = minutes(self.duration_minutes);
        let elapsed = self.started_at.elapsed();
        let remaining = duration.saturating_sub(elapsed);
        WorkerStatus {
            batch_id: self.batch_id.clone(),
            state: self.state,
            bot_count: self.bot_count,
            started_at_ms: self.started_at_ms,
            elapsed_minutes: elapsed.as_secs_f64() / 60.0,
            remaining_minutes: remaining.as_secs_f64() / 60.0,
            scheduled_termination_at_ms: self.started_at_ms + duration.as_millis(),
        }
    }
}

/// Outcome of registering a batch.
#[derive(Debug, Clone, Copy)]
pub struct Registration {
    /// Admission time (ms since epoch).
    pub started_at_ms: u128,
    /// When the hold-open timer fires (ms since epoch).
    pub scheduled_termination_at_ms: u128,
}

/// Bots admitted to the registry ahead of registration.
///
/// Counted against the system ceiling until dropped. A lifecycle drops its
/// share once its batch is registered, or when the batch fails.
#[derive(Debug)]
#[must_use = "dropping a reservation releases it"]
pub struct BotReservation {
    registry: ActiveRegistry,
    bots: usize,
}

impl BotReservation {
    /// Bots still held by this reservation.
    #[must_use]
    pub const fn bots(&self) -> usize {
        self.bots
    }

    /// Move up to `bots` of this reservation into a new one.
    pub fn split_off(&mut self, bots: usize) -> Self {
        let taken = bots.min(self.bots);
        self.bots -= taken;
        Self {
            registry: self.registry.clone(),
            bots: taken,
        }
    }
}

impl Drop for BotReservation {
    fn drop(&mut self) {
        if self.bots > 0 {
            let mut reserved = self.registry.inner.reserved.lock();
            *reserved = reserved.saturating_sub(self.bots);
        }
    }
}

/// Counts returned by a drain.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DrainReport {
    /// Batches removed from the registry.
    pub terminated_count: usize,
    /// Bots those batches carried.
    pub total_bots: usize,
    /// Batches that had to be killed after the grace period.
    pub forced_count: usize,
    /// Whether the hard deadline cut the drain short.
    pub deadline_hit: bool,
}

struct RegistryInner {
    entries: Mutex<HashMap<BatchId, WorkerHandle>>,
    // bots admitted but not yet registered
    reserved: Mutex<usize>,
    closed: AtomicBool,
    grace: Duration,
    ceiling: Duration,
    audit: Option<SharedAuditSink>,
}

/// Shared handle to the registry. Cheap to clone.
#[derive(Clone)]
pub struct ActiveRegistry {
    inner: Arc<RegistryInner>,
}

impl std::fmt::Debug for ActiveRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let (batches, bots) = self.load();
        f.debug_struct("ActiveRegistry")
            .field("batches", &batches)
            .field("bots", &bots)
            .field("closed", &self.is_closed())
            .finish()
    }
}

impl Default for ActiveRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl ActiveRegistry {
    /// Registry with default grace period and drain deadline.
    #[must_use]
    pub fn new() -> Self {
        Self::with_settings(DEFAULT_GRACE, DEFAULT_CEILING, None)
    }

    /// Registry with explicit stop timing and an optional audit sink.
    #[must_use]
    pub fn with_settings(grace: Duration, ceiling: Duration, audit: Option<SharedAuditSink>) -> Self {
        Self {
            inner: Arc::new(RegistryInner {
                entries: Mutex::new(HashMap::new()),
                reserved: Mutex::new(0),
                closed: AtomicBool::new(false),
                grace,
                ceiling,
                audit,
            }),
        }
    }

    /// Grace period applied to every stop.
    #[must_use]
    pub fn grace_period(&self) -> Duration {
        self.inner.grace
    }

    /// Insert a running batch and arm its hold-open timer.
    ///
    /// # Errors
    ///
    /// `ShuttingDown` once the registry is closed; `Backend` for a duplicate id.
    pub fn register(
        &self,
        batch_id: &str,
        runner: Arc<dyn RunnerHandle>,
        bot_count: usize,
        duration_minutes: u32,
    ) -> Result<Registration, SchedulerError> {
        let mut entries = self.inner.entries.lock();
        if self.is_closed() {
            return Err(SchedulerError::ShuttingDown);
        }
        if entries.contains_key(batch_id) {
            return Err(SchedulerError::Backend(format!(
                "batch {batch_id} is already registered"
            )));
        }
        let started_at_ms = now_ms();
        let hold = minutes(duration_minutes);
        let timer = {
            let registry = self.clone();
            let batch_id = batch_id.to_owned();
            tokio::spawn(async move {
                tokio::time::sleep(hold).await;
                registry.expire(&batch_id).await;
            })
        };
        entries.insert(
            batch_id.to_owned(),
            WorkerHandle {
                batch_id: batch_id.to_owned(),
                runner,
                started_at: Instant::now(),
                started_at_ms,
                duration_minutes,
                bot_count,
                state: WorkerState::Running,
                termination: Some(TerminationTimer { task: timer }),
            },
        );
        tracing::debug!(batch_id, bot_count, batches = entries.len(), "batch registered");
        Ok(Registration {
            started_at_ms,
            scheduled_termination_at_ms: started_at_ms + hold.as_millis(),
        })
    }

    /// Reserve `bots` if `decide` allows it, in one critical section.
    ///
    /// `decide` receives the bots already reserved by other requests. Two
    /// concurrent admissions cannot both see the same headroom.
    ///
    /// # Errors
    ///
    /// Whatever `decide` returns.
    pub fn reserve_if<T, E>(
        &self,
        bots: usize,
        decide: impl FnOnce(usize) -> Result<T, E>,
    ) -> Result<(T, BotReservation), E> {
        let mut reserved = self.inner.reserved.lock();
        let admitted = decide(*reserved)?;
        *reserved += bots;
        Ok((
            admitted,
            BotReservation {
                registry: self.clone(),
                bots,
            },
        ))
    }

    /// Bots admitted but not yet registered.
    #[must_use]
    pub fn reserved_bots(&self) -> usize {
        *self.inner.reserved.lock()
    }

    /// Record a state transition. Returns `false` if the batch is gone.
    pub fn set_state(&self, batch_id: &str, state: WorkerState) -> bool {
        let mut entries = self.inner.entries.lock();
        entries.get_mut(batch_id).is_some_and(|handle| {
            handle.state = state;
            true
        })
    }

    /// Remove a batch ahead of its timer and clear the timer.
    ///
    /// Returns the runner handle so the caller can stop it; `None` if the
    /// batch was already removed.
    pub fn retire(&self, batch_id: &str) -> Option<Arc<dyn RunnerHandle>> {
        let removed = self.inner.entries.lock().remove(batch_id);
        let mut handle = removed?;
        if let Some(timer) = handle.termination.take() {
            timer.cancel();
        }
        let (batches, bots) = self.load();
        tracing::info!(batch_id, active_batches = batches, active_bots = bots, "batch retired");
        Some(handle.runner)
    }

    /// Hold-open elapsed: stop the runner gracefully, then remove the entry.
    async fn expire(&self, batch_id: &str) {
        let runner = {
            let mut entries = self.inner.entries.lock();
            let Some(handle) = entries.get_mut(batch_id) else {
                return;
            };
            // the timer is this task; dropping the handle detaches it
            drop(handle.termination.take());
            handle.state = WorkerState::TerminationScheduled;
            Arc::clone(&handle.runner)
        };
        tracing::info!(batch_id, "hold-open elapsed, terminating batch");
        let outcome = stop_runner(runner.as_ref(), self.inner.grace).await;
        if outcome == StopOutcome::Forced {
            tracing::warn!(batch_id, "runner ignored graceful stop, killed");
        }
        if self.inner.entries.lock().remove(batch_id).is_some() {
            record(&self.inner.audit, batch_id, "terminate", Some(format!("{outcome:?}")));
        }
        let (batches, bots) = self.load();
        tracing::info!(batch_id, active_batches = batches, active_bots = bots, "batch terminated");
    }

    /// Stop every live batch: graceful first, forced after the grace period,
    /// giving up at the hard deadline. The registry is empty on return.
    pub async fn drain_all(&self) -> DrainReport {
        self.drain_with(self.inner.grace, self.inner.ceiling).await
    }

    /// [`Self::drain_all`] with explicit timing.
    pub async fn drain_with(&self, grace: Duration, ceiling: Duration) -> DrainReport {
        let drained: Vec<WorkerHandle> = {
            let mut entries = self.inner.entries.lock();
            entries.drain().map(|(_, handle)| handle).collect()
        };
        let mut report = DrainReport {
            terminated_count: drained.len(),
            total_bots: drained.iter().map(|h| h.bot_count).sum(),
            ..DrainReport::default()
        };
        if drained.is_empty() {
            return report;
        }
        tracing::info!(
            batches = report.terminated_count,
            bots = report.total_bots,
            "draining active batches"
        );

        let mut runners = Vec::with_capacity(drained.len());
        for mut handle in drained {
            if let Some(timer) = handle.termination.take() {
                timer.cancel();
            }
            record(&self.inner.audit, &handle.batch_id, "terminate", Some("drain".into()));
            runners.push(handle.runner);
        }

        let stops = join_all(runners.iter().map(|runner| stop_runner(runner.as_ref(), grace)));
        match tokio::time::timeout(ceiling, stops).await {
            Ok(outcomes) => {
                report.forced_count = outcomes
                    .iter()
                    .filter(|outcome| **outcome == StopOutcome::Forced)
                    .count();
            }
            Err(_) => {
                report.deadline_hit = true;
                tracing::warn!(?ceiling, "drain deadline reached, killing stragglers");
                for runner in runners {
                    tokio::spawn(async move { runner.force_stop().await });
                }
            }
        }
        report
    }

    /// Refuse further registrations.
    pub fn close(&self) {
        self.inner.closed.store(true, Ordering::Release);
    }

    /// Whether the registry has been closed.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.inner.closed.load(Ordering::Acquire)
    }

    /// Status of every live batch, computed at read time.
    #[must_use]
    pub fn list(&self) -> Vec<WorkerStatus> {
        let mut statuses: Vec<WorkerStatus> =
            self.inner.entries.lock().values().map(WorkerHandle::status).collect();
        statuses.sort_by(|a, b| {
            a.started_at_ms
                .cmp(&b.started_at_ms)
                .then_with(|| a.batch_id.cmp(&b.batch_id))
        });
        statuses
    }

    /// `(batch count, bot count)` in one consistent read.
    #[must_use]
    pub fn load(&self) -> (usize, usize) {
        let entries = self.inner.entries.lock();
        (entries.len(), entries.values().map(|h| h.bot_count).sum())
    }

    /// Whether `batch_id` is live.
    #[must_use]
    pub fn contains(&self, batch_id: &str) -> bool {
        self.inner.entries.lock().contains_key(batch_id)
    }

    /// Current state of `batch_id`.
    #[must_use]
    pub fn state_of(&self, batch_id: &str) -> Option<WorkerState> {
        self.inner.entries.lock().get(batch_id).map(|h| h.state)
    }

    /// Number of live batches.
    #[must_use]
    pub fn len(&self) -> usize {
        self.inner.entries.lock().len()
    }

    /// Whether no batch is live.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
