//! Domain identifiers (strongly-typed names and keys).
//!
//! # SchedulerId と ULID
//! SchedulerId は ULID ベースで生成します。分散生成可能（調整なしで複数
//! ノードで生成できる）なので、クラスタ内のインスタンス識別子に向いています。
//! 設定で固定の識別子を与えることもできます（`from_name`）。

use serde::{Deserialize, Serialize};
use std::fmt;
use ulid::Ulid;

/// Name of a registered task kind (unique key in the registry).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct TaskName(String);

impl TaskName {
    pub fn new(s: impl Into<String>) -> Self {
        Self(s.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for TaskName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// Identifier of one task instance, unique per task name.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct InstanceId(String);

impl InstanceId {
    pub fn new(s: impl Into<String>) -> Self {
        Self(s.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for InstanceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// Composite primary key of an execution row: (task_name, instance_id).
///
/// Ordering is derived (task_name, then instance_id) and doubles as the
/// deterministic tie-break for equally-due executions.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ExecutionKey {
    pub task_name: TaskName,
    pub instance_id: InstanceId,
}

impl ExecutionKey {
    pub fn new(task_name: TaskName, instance_id: InstanceId) -> Self {
        Self {
            task_name,
            instance_id,
        }
    }
}

impl fmt::Display for ExecutionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.task_name, self.instance_id)
    }
}

/// Identity of one scheduler process in the cluster.
///
/// Written into `picked_by` when this process claims an execution.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SchedulerId(String);

impl SchedulerId {
    /// Generate a fresh identity (ULID, no coordination needed).
    pub fn generate() -> Self {
        Self(format!("sched-{}", Ulid::new()))
    }

    /// Use a configured identifier (e.g. hostname) instead of a random one.
    pub fn from_name(s: impl Into<String>) -> Self {
        Self(s.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SchedulerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}
