//! Per-task pluggable policies: what happens after a failure, and what to do
//! with an execution whose owner stopped heartbeating.

pub mod dead;
pub mod failure;

pub use dead::DeadExecutionPolicy;
pub use failure::{Backoff, BackoffSchedule, FailurePolicy};
