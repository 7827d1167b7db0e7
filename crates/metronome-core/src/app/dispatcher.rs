//! Dispatcher - bounded worker capacity
//!
//! claim 済みの実行を worker に割り当てて handler を走らせます。
//!
//! # 設計
//! - capacity を超える submit は `CapacityExceeded`（backpressure）。poll loop は
//!   空き分しか claim しないので、通常この分岐は踏まれない。
//! - handler は実行ごとに独立した task で spawn する。panic しても worker と
//!   各ループは無事で、failure として failure policy に流れる。
//! - in-flight 表はこのプロセス唯一の共有可変状態で、Dispatcher が所有する。
//!   Heartbeater はここから「いま自分が走らせている実行」を読む。

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Mutex;
use tracing::{debug, warn};

use super::resolver::CompletionResolver;
use crate::domain::{Execution, ExecutionKey, SchedulerError, SchedulerId};
use crate::typed::{ExecutionContext, TaskRegistry};

pub struct Dispatcher {
    capacity: usize,
    in_flight: Arc<Mutex<HashSet<ExecutionKey>>>,
    registry: Arc<TaskRegistry>,
    resolver: Arc<CompletionResolver>,
    scheduler_id: SchedulerId,
}

impl Dispatcher {
    pub fn new(
        capacity: usize,
        registry: Arc<TaskRegistry>,
        resolver: Arc<CompletionResolver>,
        scheduler_id: SchedulerId,
    ) -> Self {
        Self {
            capacity,
            in_flight: Arc::new(Mutex::new(HashSet::new())),
            registry,
            resolver,
            scheduler_id,
        }
    }

    /// Free worker slots right now. The poll loop claims at most this many.
    pub async fn free_capacity(&self) -> usize {
        let in_flight = self.in_flight.lock().await;
        self.capacity.saturating_sub(in_flight.len())
    }

    /// Executions currently running on this instance (heartbeat targets).
    pub async fn in_flight_keys(&self) -> Vec<ExecutionKey> {
        let in_flight = self.in_flight.lock().await;
        in_flight.iter().cloned().collect()
    }

    /// Hand one claimed execution to a worker.
    ///
    /// Fails with `CapacityExceeded` when no slot is free; the caller still
    /// holds the claim and must release it (a claimed-but-unrun execution
    /// just ages toward the stale threshold).
    pub async fn submit(&self, execution: Execution) -> Result<(), SchedulerError> {
        {
            let mut in_flight = self.in_flight.lock().await;
            if in_flight.len() >= self.capacity {
                return Err(SchedulerError::CapacityExceeded);
            }
            in_flight.insert(execution.key.clone());
        }

        let key = execution.key.clone();
        let registry = Arc::clone(&self.registry);
        let resolver = Arc::clone(&self.resolver);
        let in_flight = Arc::clone(&self.in_flight);
        let scheduler_id = self.scheduler_id.clone();

        tokio::spawn(async move {
            run_one(execution, registry, resolver, scheduler_id).await;
            in_flight.lock().await.remove(&key);
        });

        Ok(())
    }

    /// Wait until all in-flight executions finish, up to `grace`.
    /// Returns whether the table drained.
    pub async fn wait_for_drain(&self, grace: Duration) -> bool {
        let deadline = tokio::time::Instant::now() + grace;
        loop {
            if self.in_flight.lock().await.is_empty() {
                return true;
            }
            if tokio::time::Instant::now() >= deadline {
                return false;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
    }
}

/// One worker: resolve the handler, run it isolated, route the outcome.
async fn run_one(
    execution: Execution,
    registry: Arc<TaskRegistry>,
    resolver: Arc<CompletionResolver>,
    scheduler_id: SchedulerId,
) {
    let Some(def) = registry.lookup(&execution.key.task_name) else {
        // Picker は registry を見てから claim するので通常来ないが、来たら
        // claim を返して他のデプロイに任せる
        warn!(key = %execution.key, "no handler for claimed execution, releasing");
        resolver.release_unchanged(&execution).await;
        return;
    };

    debug!(key = %execution.key, "executing");

    let handler = Arc::clone(def.handler());
    let ctx = ExecutionContext::new(execution.clone(), scheduler_id);
    let data = execution.data.clone();

    // handler は信用しない: 独立 task で走らせ、panic は JoinError で受け止める
    let join = tokio::spawn(async move { handler.handle_dyn(data.as_deref(), &ctx).await });

    let outcome = match join.await {
        Ok(outcome) => outcome,
        Err(err) if err.is_panic() => {
            Err(SchedulerError::Handler(format!("handler panicked: {err}")))
        }
        Err(err) => Err(SchedulerError::Handler(format!("handler task failed: {err}"))),
    };

    resolver.resolve(&execution, outcome, def.failure_policy()).await;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{CompletionDecision, InstanceId, TaskName};
    use crate::impls::InMemoryExecutionStore;
    use crate::policy::{DeadExecutionPolicy, FailurePolicy};
    use crate::ports::clock::FixedClock;
    use crate::ports::execution_store::ExecutionStore;
    use crate::typed::{Handler, Task};
    use async_trait::async_trait;
    use chrono::{DateTime, TimeZone, Utc};
    use serde::{Deserialize, Serialize};

    #[derive(Debug, Serialize, Deserialize)]
    struct OneOff;

    impl Task for OneOff {
        const NAME: &'static str = "test.one_off";
    }

    struct OneOffHandler;

    #[async_trait]
    impl Handler<OneOff> for OneOffHandler {
        async fn handle(
            &self,
            _task: OneOff,
            _ctx: &ExecutionContext,
        ) -> Result<CompletionDecision, SchedulerError> {
            Ok(CompletionDecision::remove())
        }
    }

    #[derive(Debug, Serialize, Deserialize)]
    struct Panicky;

    impl Task for Panicky {
        const NAME: &'static str = "test.panicky";
    }

    struct PanickyHandler;

    #[async_trait]
    impl Handler<Panicky> for PanickyHandler {
        async fn handle(
            &self,
            _task: Panicky,
            _ctx: &ExecutionContext,
        ) -> Result<CompletionDecision, SchedulerError> {
            panic!("handler blew up");
        }
    }

    #[derive(Debug, Serialize, Deserialize)]
    struct Slow;

    impl Task for Slow {
        const NAME: &'static str = "test.slow";
    }

    struct SlowHandler;

    #[async_trait]
    impl Handler<Slow> for SlowHandler {
        async fn handle(
            &self,
            _task: Slow,
            _ctx: &ExecutionContext,
        ) -> Result<CompletionDecision, SchedulerError> {
            tokio::time::sleep(Duration::from_secs(60)).await;
            Ok(CompletionDecision::remove())
        }
    }

    fn at(secs: i64) -> DateTime<Utc> {
        Utc.timestamp_opt(secs, 0).unwrap()
    }

    fn key(name: &str, id: &str) -> ExecutionKey {
        ExecutionKey::new(TaskName::new(name), InstanceId::new(id))
    }

    fn registry() -> Arc<TaskRegistry> {
        let mut registry = TaskRegistry::new();
        registry
            .register::<OneOff, _>(
                OneOffHandler,
                FailurePolicy::default_policy(),
                DeadExecutionPolicy::ReviveNow,
            )
            .unwrap();
        registry
            .register::<Panicky, _>(
                PanickyHandler,
                FailurePolicy::fixed(Duration::from_secs(30), Some(5)),
                DeadExecutionPolicy::ReviveNow,
            )
            .unwrap();
        registry
            .register::<Slow, _>(
                SlowHandler,
                FailurePolicy::default_policy(),
                DeadExecutionPolicy::ReviveNow,
            )
            .unwrap();
        Arc::new(registry)
    }

    fn dispatcher(store: Arc<InMemoryExecutionStore>, capacity: usize) -> Dispatcher {
        let clock = Arc::new(FixedClock::at(at(1000)));
        let resolver = Arc::new(CompletionResolver::new(store, clock));
        Dispatcher::new(capacity, registry(), resolver, SchedulerId::from_name("me"))
    }

    /// Claim one inserted execution so it can be submitted.
    async fn claimed(store: &InMemoryExecutionStore, key: &ExecutionKey) -> Execution {
        store
            .insert(Execution::new(key.clone(), at(0), None))
            .await
            .unwrap();
        store
            .try_pick(key, 1, &SchedulerId::from_name("me"), at(1))
            .await
            .unwrap()
            .unwrap()
    }

    async fn wait_until<F, Fut>(mut cond: F)
    where
        F: FnMut() -> Fut,
        Fut: std::future::Future<Output = bool>,
    {
        let deadline = tokio::time::Instant::now() + Duration::from_secs(2);
        while !cond().await {
            assert!(tokio::time::Instant::now() < deadline, "condition not reached");
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    }

    #[tokio::test]
    async fn successful_one_off_removes_the_row() {
        let store = Arc::new(InMemoryExecutionStore::new());
        let execution = claimed(&store, &key("test.one_off", "1")).await;
        let dispatcher = dispatcher(store.clone(), 2);

        dispatcher.submit(execution).await.unwrap();

        let store2 = store.clone();
        wait_until(move || {
            let store = store2.clone();
            async move { store.get(&key("test.one_off", "1")).await.unwrap().is_none() }
        })
        .await;
        assert_eq!(dispatcher.free_capacity().await, 2);
    }

    #[tokio::test]
    async fn panicking_handler_is_contained_and_rescheduled() {
        let store = Arc::new(InMemoryExecutionStore::new());
        let execution = claimed(&store, &key("test.panicky", "1")).await;
        let dispatcher = dispatcher(store.clone(), 2);

        dispatcher.submit(execution).await.unwrap();

        let store2 = store.clone();
        wait_until(move || {
            let store = store2.clone();
            async move {
                let row = store.get(&key("test.panicky", "1")).await.unwrap().unwrap();
                !row.picked
            }
        })
        .await;

        let row = store.get(&key("test.panicky", "1")).await.unwrap().unwrap();
        assert_eq!(row.consecutive_failures, 1);
        assert_eq!(row.execution_time, at(1030)); // fixed 30s backoff
    }

    #[tokio::test]
    async fn capacity_is_enforced_as_backpressure() {
        let store = Arc::new(InMemoryExecutionStore::new());
        let slow1 = claimed(&store, &key("test.slow", "1")).await;
        let slow2 = claimed(&store, &key("test.slow", "2")).await;
        let dispatcher = dispatcher(store.clone(), 1);

        dispatcher.submit(slow1).await.unwrap();
        assert_eq!(dispatcher.free_capacity().await, 0);

        let err = dispatcher.submit(slow2).await.unwrap_err();
        assert!(matches!(err, SchedulerError::CapacityExceeded));
    }

    #[tokio::test]
    async fn slow_handler_does_not_block_other_submissions() {
        let store = Arc::new(InMemoryExecutionStore::new());
        let slow = claimed(&store, &key("test.slow", "1")).await;
        let quick = claimed(&store, &key("test.one_off", "1")).await;
        let dispatcher = dispatcher(store.clone(), 2);

        dispatcher.submit(slow).await.unwrap();
        dispatcher.submit(quick).await.unwrap();

        // slow が走ったまま quick は完走する
        let store2 = store.clone();
        wait_until(move || {
            let store = store2.clone();
            async move { store.get(&key("test.one_off", "1")).await.unwrap().is_none() }
        })
        .await;

        let dispatcher2 = &dispatcher;
        wait_until(move || async move { dispatcher2.in_flight_keys().await.len() == 1 }).await;
        assert_eq!(dispatcher.in_flight_keys().await, vec![key("test.slow", "1")]);
    }

    #[tokio::test]
    async fn drain_times_out_while_work_is_running() {
        let store = Arc::new(InMemoryExecutionStore::new());
        let slow = claimed(&store, &key("test.slow", "1")).await;
        let dispatcher = dispatcher(store.clone(), 1);

        dispatcher.submit(slow).await.unwrap();
        assert!(!dispatcher.wait_for_drain(Duration::from_millis(100)).await);
    }
}
