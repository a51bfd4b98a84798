//! Runner backends.

pub mod memory;
pub mod process;

pub use memory::{RunnerStats, ScriptedBehavior, ScriptedRunner, StopBehavior};
pub use process::{ProcessRunner, ProcessRunnerConfig};
