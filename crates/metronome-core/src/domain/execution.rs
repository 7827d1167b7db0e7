//! Execution record: the persisted, schedulable occurrence of a task instance.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::ids::{ExecutionKey, SchedulerId};

/// One row of the shared execution table.
///
/// Design:
/// - This is the "single source of truth" for claim/heartbeat/retry state.
/// - All state transitions happen here, via methods; store implementations
///   call them inside their conditional write so the version discipline
///   lives in one place.
/// - `version` is the optimistic concurrency token. Every mutation that
///   changes ownership or schedule compares and increments it. Heartbeat
///   refresh deliberately does NOT bump it: the version held since claim
///   time must stay valid for the completion write.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Execution {
    pub key: ExecutionKey,

    /// When this execution becomes due.
    pub execution_time: DateTime<Utc>,

    pub picked: bool,
    pub picked_by: Option<SchedulerId>,

    /// Non-null iff `picked`.
    pub last_heartbeat: Option<DateTime<Utc>>,

    pub consecutive_failures: u32,
    pub last_success: Option<DateTime<Utc>>,
    pub last_failure: Option<DateTime<Utc>>,

    /// Serialized payload bytes (task-defined codec, JSON in practice).
    pub data: Option<Vec<u8>>,

    pub version: u64,

    /// Terminal flag: heartbeat went stale and policy said stop, or retries
    /// ran out. The row keeps `picked = true` and waits for an operator.
    pub dead: bool,
}

/// Derived view of where an execution sits in its lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExecutionState {
    /// Unpicked and `execution_time <= now`: eligible for claiming.
    Due,
    /// Unpicked, becomes due in the future.
    Scheduled,
    /// Claimed by some instance, heartbeat running.
    Picked,
    /// Terminal, pending operator action.
    Dead,
}

/// Field set applied by a release-and-reschedule conditional write.
///
/// `last_success` / `last_failure` overwrite only when `Some`; `new_data`
/// replaces the payload only when `Some` (a plain reschedule keeps it).
#[derive(Debug, Clone, Default)]
pub struct RescheduleUpdate {
    pub next_execution_time: DateTime<Utc>,
    pub consecutive_failures: u32,
    pub last_success: Option<DateTime<Utc>>,
    pub last_failure: Option<DateTime<Utc>>,
    pub new_data: Option<Vec<u8>>,
}

impl Execution {
    /// Fresh DUE row for a newly scheduled instance.
    pub fn new(key: ExecutionKey, execution_time: DateTime<Utc>, data: Option<Vec<u8>>) -> Self {
        Self {
            key,
            execution_time,
            picked: false,
            picked_by: None,
            last_heartbeat: None,
            consecutive_failures: 0,
            last_success: None,
            last_failure: None,
            data,
            version: 1,
            dead: false,
        }
    }

    pub fn is_due(&self, now: DateTime<Utc>) -> bool {
        !self.picked && !self.dead && self.execution_time <= now
    }

    /// Stale = picked, not yet dead, and the owner stopped heartbeating
    /// before `cutoff`.
    pub fn is_heartbeat_stale(&self, cutoff: DateTime<Utc>) -> bool {
        self.picked && !self.dead && self.last_heartbeat.is_some_and(|hb| hb < cutoff)
    }

    pub fn state(&self, now: DateTime<Utc>) -> ExecutionState {
        if self.dead {
            ExecutionState::Dead
        } else if self.picked {
            ExecutionState::Picked
        } else if self.execution_time <= now {
            ExecutionState::Due
        } else {
            ExecutionState::Scheduled
        }
    }

    /// Claim transition. Caller (the store) must have compared `version`
    /// first; this applies the write half of the compare-and-swap.
    pub fn pick(&mut self, by: &SchedulerId, now: DateTime<Utc>) {
        self.picked = true;
        self.picked_by = Some(by.clone());
        self.last_heartbeat = Some(now);
        self.version += 1;
    }

    /// Liveness signal. No version bump (see struct docs).
    pub fn refresh_heartbeat(&mut self, now: DateTime<Utc>) {
        self.last_heartbeat = Some(now);
    }

    /// Release the pick and move the due time, applying `update`.
    pub fn release_and_reschedule(&mut self, update: RescheduleUpdate) {
        self.picked = false;
        self.picked_by = None;
        self.last_heartbeat = None;
        self.execution_time = update.next_execution_time;
        self.consecutive_failures = update.consecutive_failures;
        if update.last_success.is_some() {
            self.last_success = update.last_success;
        }
        if update.last_failure.is_some() {
            self.last_failure = update.last_failure;
        }
        if let Some(data) = update.new_data {
            self.data = Some(data);
        }
        self.version += 1;
    }

    /// Terminal transition: keep the pick, flag the row for an operator.
    /// The run that routed here (exhausted retry, or a lost claim the policy
    /// refused to revive) counts as one more failure.
    pub fn mark_dead(&mut self, now: DateTime<Utc>) {
        self.dead = true;
        self.consecutive_failures += 1;
        self.last_failure = Some(now);
        self.version += 1;
    }
}
