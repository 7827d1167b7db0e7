//! Dead-execution policy: what the reaper does with a stale claim.

/// Selected per task at registration; applied by the reaper sweep when an
/// execution's heartbeat has gone stale (owner crashed or stalled).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeadExecutionPolicy {
    /// Release the pick and make the execution due immediately
    /// (consecutive_failures is incremented; the lost run counts).
    ReviveNow,

    /// Release the pick and reschedule using the task's failure backoff.
    ReviveWithBackoff,

    /// Leave the row picked and flag it dead; an operator has to intervene.
    MarkDead,
}
