//! Completion decision: what a successful handler run wants to happen next.

use chrono::{DateTime, Utc};

/// Outcome chosen by a handler after a successful run.
///
/// - `Remove`: the work is finished, delete the row (one-off tasks).
/// - `Reschedule`: run again at `at`. `new_data = Some(..)` also replaces
///   the payload, which is how self-perpetuating recurring tasks carry
///   state forward.
#[derive(Debug, Clone, PartialEq)]
pub enum CompletionDecision {
    Remove,
    Reschedule {
        at: DateTime<Utc>,
        new_data: Option<Vec<u8>>,
    },
}

impl CompletionDecision {
    pub fn remove() -> Self {
        Self::Remove
    }

    pub fn reschedule(at: DateTime<Utc>) -> Self {
        Self::Reschedule { at, new_data: None }
    }

    pub fn reschedule_with_data(at: DateTime<Utc>, data: Vec<u8>) -> Self {
        Self::Reschedule {
            at,
            new_data: Some(data),
        }
    }
}
