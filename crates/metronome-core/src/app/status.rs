//! Status views over the execution table.

use serde::{Deserialize, Serialize};

/// Row counts by lifecycle state, for operators and tests.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecutionCounts {
    /// Unpicked and due now.
    pub due: usize,
    /// Unpicked, due in the future.
    pub scheduled: usize,
    /// Claimed by some instance.
    pub picked: usize,
    /// Terminal, waiting for an operator.
    pub dead: usize,
}

impl ExecutionCounts {
    pub fn total(&self) -> usize {
        self.due + self.scheduled + self.picked + self.dead
    }
}
