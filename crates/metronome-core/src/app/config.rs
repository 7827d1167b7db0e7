//! Scheduler configuration.

use std::time::Duration;

use crate::domain::SchedulerId;
use crate::policy::{DeadExecutionPolicy, FailurePolicy};

/// Tunables for one scheduler instance.
///
/// Validation happens at build time ([`crate::app::builder::SchedulerBuilder`]),
/// and invalid values are fatal there; misconfiguration must not surface as
/// runtime drift.
#[derive(Debug, Clone)]
pub struct SchedulerConfig {
    /// How often the poll loop looks for due executions.
    pub polling_interval: Duration,

    /// Cadence of the self-heartbeat refresh (and of the dead-execution
    /// sweep, which runs on its own timer at the same period).
    pub heartbeat_interval: Duration,

    /// A picked execution whose heartbeat is older than this is considered
    /// abandoned. Must be >= 3x `heartbeat_interval` so scheduling jitter
    /// does not produce false-positive dead detection.
    pub stale_threshold: Duration,

    /// Bounded dispatch capacity: number of concurrently running handlers.
    pub worker_capacity: usize,

    /// Identity written into `picked_by`. Generated (ULID) unless configured.
    pub scheduler_id: SchedulerId,

    /// How long shutdown waits for in-flight handlers before abandoning
    /// their picks to heartbeat-expiry recovery.
    pub shutdown_grace: Duration,

    /// Policies for tasks registered without explicit ones.
    pub default_failure_policy: FailurePolicy,
    pub default_dead_policy: DeadExecutionPolicy,
}

impl SchedulerConfig {
    pub fn new() -> Self {
        let heartbeat_interval = Duration::from_secs(30);
        Self {
            polling_interval: Duration::from_secs(10),
            heartbeat_interval,
            stale_threshold: heartbeat_interval * 4,
            worker_capacity: 4,
            scheduler_id: SchedulerId::generate(),
            shutdown_grace: Duration::from_secs(30),
            default_failure_policy: FailurePolicy::default_policy(),
            default_dead_policy: DeadExecutionPolicy::ReviveNow,
        }
    }
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self::new()
    }
}
