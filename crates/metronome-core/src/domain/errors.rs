//! Scheduler error taxonomy.
//!
//! 分類の方針:
//! - 起動時エラー（重複登録・設定不正）だけが fatal（`app::builder::BuildError`）
//! - store 系のエラーは activity 境界（1 tick / 1 heartbeat）で捕捉してログ、
//!   プロセスは落とさない
//! - claim の競り負けはエラーではない（`try_pick` が `None` を返すだけ）

use thiserror::Error;

use super::ids::{ExecutionKey, TaskName};
use crate::ports::execution_store::StoreError;

#[derive(Debug, Error)]
pub enum SchedulerError {
    /// Registration-time: the name is already taken. Fatal at startup.
    #[error("task already registered: {0}")]
    DuplicateTask(TaskName),

    /// An execution references a task this process does not know. Logged and
    /// skipped each cycle; a newer deployment may have written it.
    #[error("no task registered for name={0}")]
    UnknownTask(TaskName),

    /// Dispatcher backpressure: no free worker slot. Not an error condition,
    /// the loop simply claims less next tick.
    #[error("dispatcher capacity exhausted")]
    CapacityExceeded,

    /// A completion write lost its version race: some other instance owns
    /// the row now. Logged, never retried.
    #[error("execution {0} is no longer owned by this scheduler")]
    OwnershipLost(ExecutionKey),

    /// Payload could not be encoded/decoded by the task codec.
    #[error("payload codec: {0}")]
    Codec(#[from] serde_json::Error),

    /// Failure reported (or thrown) by task handler code. Routed through the
    /// task's failure policy like any other failure.
    #[error("handler failure: {0}")]
    Handler(String),

    #[error(transparent)]
    Store(#[from] StoreError),
}

impl SchedulerError {
    /// Convenience for handler code reporting a failure.
    pub fn handler(message: impl Into<String>) -> Self {
        Self::Handler(message.into())
    }
}
