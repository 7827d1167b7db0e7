//! TaskRegistry - Task 定義の登録と検索
//!
//! 起動時に構築（mutable）、稼働中は読み取り専用で複数 dispatch worker から
//! 並行 lookup される。lock は不要（`Arc<TaskRegistry>` で共有するだけ）。

use std::collections::HashMap;
use std::sync::Arc;

use super::handler::{DynHandler, Handler, TypedHandler};
use super::task::Task;
use crate::domain::{SchedulerError, TaskName};
use crate::policy::{DeadExecutionPolicy, FailurePolicy};

/// Everything the engine needs to run one kind of task: the (type-erased)
/// handler plus the policies chosen at registration.
pub struct TaskDefinition {
    handler: Arc<dyn DynHandler>,
    failure_policy: FailurePolicy,
    dead_policy: DeadExecutionPolicy,
}

impl TaskDefinition {
    pub fn handler(&self) -> &Arc<dyn DynHandler> {
        &self.handler
    }

    pub fn failure_policy(&self) -> &FailurePolicy {
        &self.failure_policy
    }

    pub fn dead_policy(&self) -> DeadExecutionPolicy {
        self.dead_policy
    }
}

/// TaskRegistry は task name → TaskDefinition の対応を管理
pub struct TaskRegistry {
    definitions: HashMap<TaskName, TaskDefinition>,
}

impl TaskRegistry {
    pub fn new() -> Self {
        Self {
            definitions: HashMap::new(),
        }
    }

    /// Register a handler (with its policies) for task type `T`.
    ///
    /// Duplicate names are a startup error, not a last-wins overwrite.
    pub fn register<T: Task, H: Handler<T> + 'static>(
        &mut self,
        handler: H,
        failure_policy: FailurePolicy,
        dead_policy: DeadExecutionPolicy,
    ) -> Result<(), SchedulerError> {
        let name = TaskName::new(T::NAME);
        if self.definitions.contains_key(&name) {
            return Err(SchedulerError::DuplicateTask(name));
        }
        self.definitions.insert(
            name,
            TaskDefinition {
                handler: Arc::new(TypedHandler::new(handler)),
                failure_policy,
                dead_policy,
            },
        );
        Ok(())
    }

    /// Lookup by name. `None` means the execution references a task this
    /// deployment does not know; callers log and skip, never crash.
    pub fn lookup(&self, name: &TaskName) -> Option<&TaskDefinition> {
        self.definitions.get(name)
    }

    pub fn registered_names(&self) -> Vec<TaskName> {
        self.definitions.keys().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.definitions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.definitions.is_empty()
    }
}

impl Default for TaskRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::CompletionDecision;
    use crate::typed::handler::ExecutionContext;
    use async_trait::async_trait;
    use serde::{Deserialize, Serialize};

    #[derive(Debug, Serialize, Deserialize)]
    struct TaskA;

    impl Task for TaskA {
        const NAME: &'static str = "test.a";
    }

    #[derive(Debug, Serialize, Deserialize)]
    struct TaskB;

    impl Task for TaskB {
        const NAME: &'static str = "test.b";
    }

    struct NoopHandler;

    #[async_trait]
    impl Handler<TaskA> for NoopHandler {
        async fn handle(
            &self,
            _task: TaskA,
            _ctx: &ExecutionContext,
        ) -> Result<CompletionDecision, SchedulerError> {
            Ok(CompletionDecision::remove())
        }
    }

    #[async_trait]
    impl Handler<TaskB> for NoopHandler {
        async fn handle(
            &self,
            _task: TaskB,
            _ctx: &ExecutionContext,
        ) -> Result<CompletionDecision, SchedulerError> {
            Ok(CompletionDecision::remove())
        }
    }

    fn policies() -> (FailurePolicy, DeadExecutionPolicy) {
        (FailurePolicy::default_policy(), DeadExecutionPolicy::ReviveNow)
    }

    #[test]
    fn register_and_lookup() {
        let (failure, dead) = policies();
        let mut registry = TaskRegistry::new();
        registry.register::<TaskA, _>(NoopHandler, failure, dead).unwrap();

        let def = registry.lookup(&TaskName::new("test.a")).unwrap();
        assert_eq!(def.handler().task_name(), "test.a");
        assert_eq!(def.dead_policy(), DeadExecutionPolicy::ReviveNow);
        assert!(registry.lookup(&TaskName::new("test.unknown")).is_none());
    }

    #[test]
    fn duplicate_registration_is_an_error() {
        let mut registry = TaskRegistry::new();
        let (failure, dead) = policies();
        registry.register::<TaskA, _>(NoopHandler, failure, dead).unwrap();

        let (failure, dead) = policies();
        let err = registry
            .register::<TaskA, _>(NoopHandler, failure, dead)
            .unwrap_err();
        assert!(matches!(err, SchedulerError::DuplicateTask(_)));
    }

    #[test]
    fn different_tasks_do_not_collide() {
        let mut registry = TaskRegistry::new();
        let (failure, dead) = policies();
        registry.register::<TaskA, _>(NoopHandler, failure, dead).unwrap();
        let (failure, dead) = policies();
        registry.register::<TaskB, _>(NoopHandler, failure, dead).unwrap();

        assert_eq!(registry.len(), 2);
        assert!(registry.lookup(&TaskName::new("test.a")).is_some());
        assert!(registry.lookup(&TaskName::new("test.b")).is_some());
    }
}
