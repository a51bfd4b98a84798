//! Builder that wires a [`RequestCoordinator`] from configuration.

use std::sync::Arc;

use crate::config::SchedulerConfig;
use crate::core::audit::{shared, AuditSink, SharedAuditSink};
use crate::core::{
    CredentialIssuer, HostProbe, RequestCoordinator, Runner, SchedulerError, SysinfoProbe,
};

/// Fluent builder for a coordinator.
///
/// ```rust,ignore
/// let coordinator = CoordinatorBuilder::new(SchedulerConfig::from_env()?)
///     .runner(ProcessRunner::new(ProcessRunnerConfig::new("node").arg("runner.js")))
///     .credential_issuer(HmacCredentialIssuer::new(key, secret)?)
///     .build()?;
/// ```
pub struct CoordinatorBuilder<R: Runner> {
    config: SchedulerConfig,
    runner: Option<Arc<R>>,
    issuer: Option<Arc<dyn CredentialIssuer>>,
    probe: Option<Arc<dyn HostProbe>>,
    audit: Option<SharedAuditSink>,
}

impl<R: Runner> CoordinatorBuilder<R> {
    /// Start from a configuration.
    #[must_use]
    pub fn new(config: SchedulerConfig) -> Self {
        Self {
            config,
            runner: None,
            issuer: None,
            probe: None,
            audit: None,
        }
    }

    /// Runner backend (required).
    #[must_use]
    pub fn runner(mut self, runner: R) -> Self {
        self.runner = Some(Arc::new(runner));
        self
    }

    /// Runner backend already behind an `Arc`, e.g. to keep a handle for inspection.
    #[must_use]
    pub fn shared_runner(mut self, runner: Arc<R>) -> Self {
        self.runner = Some(runner);
        self
    }

    /// Credential issuer (required).
    #[must_use]
    pub fn credential_issuer(mut self, issuer: impl CredentialIssuer + 'static) -> Self {
        self.issuer = Some(Arc::new(issuer));
        self
    }

    /// Host probe; defaults to [`SysinfoProbe`].
    #[must_use]
    pub fn host_probe(mut self, probe: Arc<dyn HostProbe>) -> Self {
        self.probe = Some(probe);
        self
    }

    /// Attach an audit sink.
    #[must_use]
    pub fn audit(mut self, sink: impl AuditSink + 'static) -> Self {
        self.audit = Some(shared(sink));
        self
    }

    /// Build the coordinator.
    ///
    /// # Errors
    ///
    /// `InvalidConfig` for a bad configuration or a missing runner or issuer.
    pub fn build(self) -> Result<RequestCoordinator<R>, SchedulerError> {
        let runner = self
            .runner
            .ok_or_else(|| SchedulerError::InvalidConfig("a runner is required".into()))?;
        let issuer = self
            .issuer
            .ok_or_else(|| SchedulerError::InvalidConfig("a credential issuer is required".into()))?;
        let probe = self
            .probe
            .unwrap_or_else(|| Arc::new(SysinfoProbe::new()) as Arc<dyn HostProbe>);
        RequestCoordinator::new(self.config, runner, issuer, probe, self.audit)
    }
}
