//! Infrastructure adapters: runner backends that host batches.

pub mod runner;
pub use runner::{ProcessRunner, ProcessRunnerConfig, ScriptedRunner};
