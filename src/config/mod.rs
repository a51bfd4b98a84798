//! Configuration models for admission limits, batching, and timeouts.

pub mod scheduler;

pub use scheduler::{BudgetConfig, SchedulerConfig, HARD_BATCH_CEILING};
