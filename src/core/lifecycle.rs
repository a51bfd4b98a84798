//! Lifecycle of one dispatched batch.
//!
//! ```text
//! Queued -> Admitted -> Running -> Completed ----\
//!                          |  \--> TimedOutHeld --+-> TerminationScheduled -> Terminated
//!                          +-----> Errored / Exited (removed at once, no hold-open)
//! ```
//!
//! The hold-open timer is armed when the batch is registered, right after the
//! runner starts, so a slow runner does not stretch its bots' presence. The
//! gate permit is held only until the runner's first report (or the
//! startup-report timeout); after that the batch lives on in the registry
//! without occupying a permit.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;

use crate::config::{BudgetConfig, SchedulerConfig};
use crate::core::audit::{record, SharedAuditSink};
use crate::core::runner::{ResourceBudget, Runner, RunnerBotReport, RunnerEvent, RunnerHandle, RunnerSession};
use crate::core::{
    ActiveRegistry, AdmissionGate, Batch, BatchId, BotReservation, BotResult, SchedulerError, WorkerState,
};

/// Knobs shared by every lifecycle of a coordinator.
#[derive(Debug, Clone)]
pub struct LifecycleSettings {
    /// How long a runner has to report before the session is held anyway.
    pub startup_report_timeout: Duration,
    /// Rewrite every outcome of a completed batch to joined.
    pub treat_joined_as_success: bool,
    /// Memory budget scaling.
    pub budget: BudgetConfig,
}

impl LifecycleSettings {
    /// Settings taken from the scheduler configuration.
    #[must_use]
    pub fn from_config(cfg: &SchedulerConfig) -> Self {
        Self {
            startup_report_timeout: cfg.startup_report_timeout(),
            treat_joined_as_success: cfg.treat_joined_as_success,
            budget: cfg.budget.clone(),
        }
    }
}

/// Results of one batch, in the batch's bot order.
#[derive(Debug, Clone)]
pub struct BatchReport {
    /// Batch id.
    pub batch_id: BatchId,
    /// State the batch settled in when the report was produced.
    pub state: WorkerState,
    /// Exactly one result per bot of the batch.
    pub results: Vec<BotResult>,
}

/// Drives one batch from the gate to its report.
pub struct WorkerLifecycleManager<R: Runner> {
    batch: Batch,
    runner: Arc<R>,
    gate: AdmissionGate,
    registry: ActiveRegistry,
    settings: Arc<LifecycleSettings>,
    audit: Option<SharedAuditSink>,
    reservation: Option<BotReservation>,
    state: WorkerState,
}

impl<R: Runner> WorkerLifecycleManager<R> {
    /// Create a manager for `batch`, admitted through `gate`.
    pub fn new(
        batch: Batch,
        runner: Arc<R>,
        gate: AdmissionGate,
        registry: ActiveRegistry,
        settings: Arc<LifecycleSettings>,
        audit: Option<SharedAuditSink>,
    ) -> Self {
        Self {
            batch,
            runner,
            gate,
            registry,
            settings,
            audit,
            reservation: None,
            state: WorkerState::Queued,
        }
    }

    /// Hold `reservation` against the bot ceiling until the batch registers.
    #[must_use]
    pub fn with_reservation(mut self, reservation: BotReservation) -> Self {
        self.reservation = Some(reservation);
        self
    }

    /// Current state.
    #[must_use]
    pub const fn state(&self) -> WorkerState {
        self.state
    }

    fn transition(&mut self, next: WorkerState) {
        tracing::debug!(batch_id = %self.batch.id, from = ?self.state, to = ?next, "lifecycle transition");
        self.state = next;
    }

    /// Run the batch until its report is known.
    ///
    /// Always returns one result per bot. The hold-open and the final stop
    /// continue in the background through the registry.
    pub async fn run(mut self) -> BatchReport {
        let batch_id = self.batch.id.clone();
        let bot_count = self.batch.bot_count();

        let mut permit = match self.gate.acquire().await {
            Ok(permit) => permit,
            Err(err) => return self.fail_all(WorkerState::Errored, &err.to_string()),
        };
        if self.registry.is_closed() {
            permit.release();
            let message = SchedulerError::ShuttingDown.to_string();
            tracing::info!(batch_id = %batch_id, bots = bot_count, "scheduler closed, batch not launched");
            return self.fail_all(WorkerState::Errored, &message);
        }
        self.transition(WorkerState::Admitted);
        record(&self.audit, &batch_id, "admit", None);

        let budget = ResourceBudget::for_bots(bot_count, &self.settings.budget);
        let session = match self.runner.start(self.batch.clone(), budget).await {
            Ok(session) => session,
            Err(err) => {
                permit.release();
                let message = err.to_string();
                tracing::error!(batch_id = %batch_id, bots = bot_count, error = %message, "runner failed to launch");
                record(&self.audit, &batch_id, "error", Some(message.clone()));
                return self.fail_all(WorkerState::Errored, &message);
            }
        };
        let RunnerSession { handle, mut events } = session;

        let registration = match self.registry.register(
            &batch_id,
            Arc::clone(&handle),
            bot_count,
            self.batch.duration_minutes,
        ) {
            Ok(registration) => registration,
            Err(err) => {
                permit.release();
                handle.force_stop().await;
                let message = err.to_string();
                tracing::warn!(batch_id = %batch_id, error = %message, "batch not registered, runner stopped");
                return self.fail_all(WorkerState::Errored, &message);
            }
        };
        drop(self.reservation.take());
        self.transition(WorkerState::Running);
        record(&self.audit, &batch_id, "start", Some(format!("{}MiB", budget.memory_mb)));
        tracing::info!(
            batch_id = %batch_id,
            bots = bot_count,
            memory_mb = budget.memory_mb,
            duration_minutes = self.batch.duration_minutes,
            "runner started"
        );

        let first = tokio::time::timeout(self.settings.startup_report_timeout, events.recv()).await;
        permit.release();
        let termination_at = registration.scheduled_termination_at_ms;

        match first {
            Ok(Some(RunnerEvent::Completed(reports))) => {
                self.transition(WorkerState::Completed);
                self.registry.set_state(&batch_id, WorkerState::Completed);
                let results = self.completed_results(&reports, termination_at);
                let failed = results.iter().filter(|r| !r.is_success()).count();
                record(&self.audit, &batch_id, "complete", Some(format!("{failed} failed")));
                tracing::info!(batch_id = %batch_id, bots = bot_count, failed, "batch joined, holding open");
                self.watch_after_report(events);
                self.report(results)
            }
            Ok(Some(RunnerEvent::Errored(message))) => {
                self.abort(WorkerState::Errored, &message, handle.as_ref()).await
            }
            Ok(Some(RunnerEvent::Exited(code))) => {
                let message = exit_message(code);
                self.abort(WorkerState::Exited, &message, handle.as_ref()).await
            }
            Ok(None) => {
                self.abort(WorkerState::Exited, "runner closed its report channel", handle.as_ref())
                    .await
            }
            Err(_) => {
                self.transition(WorkerState::TimedOutHeld);
                self.registry.set_state(&batch_id, WorkerState::TimedOutHeld);
                let note = format!(
                    "no report within {}s; session kept running",
                    self.settings.startup_report_timeout.as_secs()
                );
                record(&self.audit, &batch_id, "held", Some(note.clone()));
                tracing::warn!(batch_id = %batch_id, bots = bot_count, "runner silent past startup window, holding session");
                let results = self
                    .batch
                    .bots
                    .iter()
                    .map(|bot| BotResult::held(bot, termination_at, note.clone()))
                    .collect();
                self.watch_after_report(events);
                self.report(results)
            }
        }
    }

    fn completed_results(&self, reports: &[RunnerBotReport], termination_at: u128) -> Vec<BotResult> {
        self.batch
            .bots
            .iter()
            .map(|bot| {
                if self.settings.treat_joined_as_success {
                    return BotResult::joined(bot, termination_at);
                }
                match reports.iter().find(|r| r.bot_id == bot.id) {
                    Some(report) if report.success => BotResult::joined(bot, termination_at),
                    Some(report) => BotResult::failed(
                        bot,
                        report.error.clone().unwrap_or_else(|| "join failed".into()),
                    ),
                    None => BotResult::failed(bot, "runner reported no outcome"),
                }
            })
            .collect()
    }

    /// Failed before or during startup: no hold-open, entry removed now.
    async fn abort(mut self, state: WorkerState, message: &str, handle: &dyn RunnerHandle) -> BatchReport {
        let batch_id = self.batch.id.clone();
        self.transition(state);
        if self.registry.retire(&batch_id).is_some() {
            handle.force_stop().await;
        }
        let action = if state == WorkerState::Exited { "exit" } else { "error" };
        record(&self.audit, &batch_id, action, Some(message.to_owned()));
        tracing::error!(batch_id = %batch_id, bots = self.batch.bot_count(), error = message, "batch failed");
        self.fail_all(state, message)
    }

    /// Keep listening after the report: a unit that dies while held is retired early.
    fn watch_after_report(&self, mut events: mpsc::Receiver<RunnerEvent>) {
        let registry = self.registry.clone();
        let batch_id = self.batch.id.clone();
        let audit = self.audit.clone();
        tokio::spawn(async move {
            while let Some(event) = events.recv().await {
                match event {
                    RunnerEvent::Exited(code) => {
                        let held = matches!(
                            registry.state_of(&batch_id),
                            Some(WorkerState::Completed | WorkerState::TimedOutHeld)
                        );
                        if held && registry.retire(&batch_id).is_some() {
                            record(&audit, &batch_id, "exit", Some(exit_message(code)));
                            tracing::warn!(batch_id = %batch_id, ?code, "runner exited while held open");
                        }
                        break;
                    }
                    other => {
                        tracing::debug!(batch_id = %batch_id, event = ?other, "ignoring late runner event");
                    }
                }
            }
        });
    }

    fn fail_all(mut self, state: WorkerState, message: &str) -> BatchReport {
        self.transition(state);
        let results = self
            .batch
            .bots
            .iter()
            .map(|bot| BotResult::failed(bot, message))
            .collect();
        self.report(results)
    }

    fn report(self, results: Vec<BotResult>) -> BatchReport {
        BatchReport {
            batch_id: self.batch.id,
            state: self.state,
            results,
        }
    }
}

fn exit_message(code: Option<i32>) -> String {
    code.map_or_else(
        || "runner terminated by signal".to_owned(),
        |code| format!("runner exited with status {code}"),
    )
}
