//! Core scheduling: admission, batching, lifecycles and the live registry.

pub mod audit;
pub mod batcher;
pub mod coordinator;
pub mod credential;
pub mod error;
pub mod gate;
pub mod identity;
pub mod lifecycle;
pub mod model;
pub mod monitor;
pub mod registry;
pub mod runner;

pub use audit::{build_audit_event, AuditEvent, AuditReader, AuditSink, InMemoryAuditSink, SharedAuditSink};
pub use batcher::{adaptive_batch_size, batch_id, split, Batcher};
pub use coordinator::RequestCoordinator;
pub use credential::{CredentialIssuer, HmacCredentialIssuer, Role};
pub use error::{AppResult, RefusalReason, RunnerError, SchedulerError};
pub use gate::{AdmissionGate, GatePermit};
pub use identity::{BotIdentitySynthesizer, NameListSynthesizer};
pub use lifecycle::{BatchReport, LifecycleSettings, WorkerLifecycleManager};
pub use model::{
    Batch, BatchId, BotIdentity, BotOutcome, BotResult, Breakdown, ConnectionParams, JoinRequest,
    JoinSummary, RequestStatus, SystemMetrics, WorkerState, WorkerStatus,
};
pub use monitor::{AdmissionDecision, FixedProbe, HostProbe, SysinfoProbe, SystemMonitor};
pub use registry::{ActiveRegistry, BotReservation, DrainReport, Registration};
pub use runner::{
    stop_runner, ResourceBudget, Runner, RunnerBotReport, RunnerEvent, RunnerHandle, RunnerSession,
    StopOutcome,
};
