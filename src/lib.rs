//! # Meeting Bot Scheduler
//!
//! Admission-controlled batch scheduler for sandboxed meeting-bot runners.
//!
//! A request asks for N bots to join one meeting and stay for a number of
//! minutes. The scheduler decides whether the host can take the request at
//! all, splits the bots into bounded batches, runs one execution unit (a
//! [`core::Runner`]) per batch behind a counting admission gate, and keeps a
//! registry of everything still running so it can be listed or torn down.
//!
//! ## Core Problem Solved
//!
//! Each runner is a headless browser hosting a handful of bots. Browsers are
//! heavy, so the scheduler has to:
//!
//! - **Refuse early** when memory, cpu or the system-wide bot ceiling are exhausted
//! - **Bound concurrency** so only as many runners start at once as the host can carry
//! - **Hold sessions open** for the requested duration, then stop them cleanly
//! - **Shut down in bounded time**, killing runners that ignore a graceful stop
//!
//! ## Lifecycle
//!
//! ```text
//! submit -> SystemMonitor::admit (reserves bots) -> Batcher::build
//!        -> WorkerLifecycleManager (one per batch, gated by AdmissionGate)
//!        -> ActiveRegistry (hold-open timer, graceful-then-forced stop)
//!        -> JoinSummary
//! ```
//!
//! ## Example
//!
//! ```rust,ignore
//! use meeting_bot_scheduler::builders::CoordinatorBuilder;
//! use meeting_bot_scheduler::config::SchedulerConfig;
//! use meeting_bot_scheduler::core::{BotIdentity, HmacCredentialIssuer, JoinRequest};
//! use meeting_bot_scheduler::infra::{ProcessRunner, ProcessRunnerConfig};
//!
//! let coordinator = CoordinatorBuilder::new(SchedulerConfig::from_env()?)
//!     .runner(ProcessRunner::new(ProcessRunnerConfig::new("node").arg("runner.js")))
//!     .credential_issuer(HmacCredentialIssuer::new("sdk-key", "sdk-secret")?)
//!     .build()?;
//!
//! let bots = (1..=25).map(|id| BotIdentity::new(id, format!("Bot {id}"))).collect();
//! let summary = coordinator
//!     .submit(JoinRequest::new(bots, "123456789", "passcode", 30.0))
//!     .await?;
//! println!("{:?}: {} joined, {} failed", summary.status, summary.succeeded, summary.failed);
//!
//! coordinator.shutdown().await;
//! ```
//!
//! For complete scenarios, see `tests/lifecycle_test.rs`.

#![deny(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]

/// Core scheduling: admission, batching, lifecycles and the live registry.
pub mod core;
/// Configuration models for limits, timeouts and budgets.
pub mod config;
/// Builders to construct a coordinator from configuration.
pub mod builders;
/// Runner backends.
pub mod infra;
/// Transport-facing API surface and process hooks.
pub mod runtime;
/// Shared utilities.
pub mod util;
