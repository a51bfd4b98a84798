//! Top-level entry point: validate, admit, batch, fan out, aggregate.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use crate::config::SchedulerConfig;
use crate::core::audit::SharedAuditSink;
use crate::core::credential::{CredentialIssuer, Role};
use crate::core::lifecycle::{BatchReport, LifecycleSettings, WorkerLifecycleManager};
use crate::core::monitor::{HostProbe, SystemMonitor};
use crate::core::registry::DrainReport;
use crate::core::runner::Runner;
use crate::core::{
    ActiveRegistry, AdmissionGate, Batch, Batcher, BotReservation, BotResult, JoinRequest, JoinSummary,
    SchedulerError, SystemMetrics, WorkerState, WorkerStatus,
};

/// Coordinates requests over one runner backend.
///
/// The registry and monitor live as long as the coordinator; an admission
/// gate is computed fresh for every request.
pub struct RequestCoordinator<R: Runner> {
    config: Arc<SchedulerConfig>,
    runner: Arc<R>,
    issuer: Arc<dyn CredentialIssuer>,
    registry: ActiveRegistry,
    monitor: SystemMonitor,
    batcher: Batcher,
    settings: Arc<LifecycleSettings>,
    audit: Option<SharedAuditSink>,
    shutting_down: AtomicBool,
}

impl<R: Runner> RequestCoordinator<R> {
    /// Wire a coordinator. Prefer [`crate::builders::CoordinatorBuilder`].
    ///
    /// # Errors
    ///
    /// Returns `SchedulerError::InvalidConfig` if `config` does not validate.
    pub fn new(
        config: SchedulerConfig,
        runner: Arc<R>,
        issuer: Arc<dyn CredentialIssuer>,
        probe: Arc<dyn HostProbe>,
        audit: Option<SharedAuditSink>,
    ) -> Result<Self, SchedulerError> {
        config.validate().map_err(SchedulerError::InvalidConfig)?;
        let config = Arc::new(config);
        let registry =
            ActiveRegistry::with_settings(config.grace_period(), config.shutdown_ceiling(), audit.clone());
        let monitor = SystemMonitor::new(Arc::clone(&config), registry.clone(), probe);
        let batcher = Batcher::new(config.engine_tag.clone(), config.max_bots_per_batch);
        let settings = Arc::new(LifecycleSettings::from_config(&config));
        tracing::info!(
            max_bots_per_batch = config.max_bots_per_batch,
            max_concurrent_batches = config.max_concurrent_batches,
            system_bot_ceiling = config.system_bot_ceiling,
            cores = monitor.core_count(),
            "request coordinator initialized"
        );
        Ok(Self {
            config,
            runner,
            issuer,
            registry,
            monitor,
            batcher,
            settings,
            audit,
            shutting_down: AtomicBool::new(false),
        })
    }

    /// Active configuration.
    #[must_use]
    pub fn config(&self) -> &SchedulerConfig {
        &self.config
    }

    /// Shared registry handle.
    #[must_use]
    pub fn registry(&self) -> &ActiveRegistry {
        &self.registry
    }

    /// Current load snapshot.
    #[must_use]
    pub fn metrics(&self) -> SystemMetrics {
        self.monitor.sample()
    }

    /// Admit, batch and dispatch a request, then aggregate its results.
    ///
    /// # Errors
    ///
    /// Only request-level failures: `Validation`, `CapacityExceeded`,
    /// `ShuttingDown` and `Credential`. Batch failures land in the summary.
    pub async fn submit(&self, request: JoinRequest) -> Result<JoinSummary, SchedulerError> {
        if self.shutting_down.load(Ordering::Acquire) {
            return Err(SchedulerError::ShuttingDown);
        }
        request.validate()?;
        let total = request.bots.len();
        let (metrics, reservation) = self.monitor.admit(total)?;

        let signature = self
            .issuer
            .sign(&request.meeting_id, Role::Attendee, request.duration_minutes)?;
        let run_id = uuid::Uuid::new_v4().simple().to_string()[..8].to_owned();
        let host_slots = self.monitor.gate_capacity(&metrics, usize::MAX);
        let batch_size = self.batcher.batch_size_for(total, host_slots);
        let batches = self.batcher.build(&request, &run_id, &signature, batch_size);
        let gate = AdmissionGate::new(self.monitor.gate_capacity(&metrics, batches.len()));
        tracing::info!(
            request_id = %run_id,
            meeting_id = %request.meeting_id,
            bots = total,
            batches = batches.len(),
            batch_size,
            gate_capacity = gate.capacity(),
            duration_minutes = request.duration_minutes,
            "dispatching request"
        );

        let batch_count = batches.len();
        let reports = self.dispatch(batches, &gate, reservation).await;
        let results: Vec<BotResult> = reports.into_iter().flat_map(|r| r.results).collect();
        let summary = JoinSummary::fold(run_id, &request, batch_count, results, self.monitor.sample());
        tracing::info!(
            request_id = %summary.request_id,
            status = ?summary.status,
            succeeded = summary.succeeded,
            failed = summary.failed,
            "request settled"
        );
        Ok(summary)
    }

    /// One task per batch; reports come back in batch creation order.
    ///
    /// Each lifecycle carries its share of the request's reservation.
    async fn dispatch(
        &self,
        batches: Vec<Batch>,
        gate: &AdmissionGate,
        mut reservation: BotReservation,
    ) -> Vec<BatchReport> {
        let mut tasks = Vec::with_capacity(batches.len());
        for batch in batches {
            let fallback = batch.clone();
            let share = reservation.split_off(batch.bot_count());
            let manager = WorkerLifecycleManager::new(
                batch,
                Arc::clone(&self.runner),
                gate.clone(),
                self.registry.clone(),
                Arc::clone(&self.settings),
                self.audit.clone(),
            )
            .with_reservation(share);
            tasks.push((fallback, tokio::spawn(manager.run())));
        }

        let mut reports = Vec::with_capacity(tasks.len());
        for (batch, task) in tasks {
            let report = match task.await {
                Ok(report) => report,
                Err(err) => {
                    tracing::error!(batch_id = %batch.id, error = %err, "lifecycle task died");
                    if let Some(runner) = self.registry.retire(&batch.id) {
                        runner.force_stop().await;
                    }
                    let message = format!("lifecycle task failed: {err}");
                    BatchReport {
                        results: batch.bots.iter().map(|b| BotResult::failed(b, &message)).collect(),
                        batch_id: batch.id,
                        state: WorkerState::Errored,
                    }
                }
            };
            reports.push(report);
        }
        reports
    }

    /// Status of every live batch.
    #[must_use]
    pub fn list_active(&self) -> Vec<WorkerStatus> {
        self.registry.list()
    }

    /// Stop every live batch. Safe to call repeatedly.
    pub async fn terminate_all(&self) -> DrainReport {
        let report = self.registry.drain_all().await;
        tracing::info!(
            terminated = report.terminated_count,
            bots = report.total_bots,
            forced = report.forced_count,
            "terminate all finished"
        );
        report
    }

    /// Refuse new work and drain the registry within the hard deadline.
    pub async fn shutdown(&self) -> DrainReport {
        if self.shutting_down.swap(true, Ordering::AcqRel) {
            tracing::debug!("shutdown already requested");
        }
        self.registry.close();
        tracing::info!("shutting down request coordinator");
        let report = self.registry.drain_all().await;
        if report.deadline_hit {
            tracing::warn!(terminated = report.terminated_count, "shutdown hit its deadline");
        }
        report
    }

    /// Whether [`Self::shutdown`] has been called.
    #[must_use]
    pub fn is_shutting_down(&self) -> bool {
        self.shutting_down.load(Ordering::Acquire)
    }
}
