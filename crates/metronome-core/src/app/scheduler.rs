//! Scheduler - 3 つのループと worker pool を束ねる表面
//!
//! # 並行構造
//! - poll loop / heartbeat loop / reaper loop は独立したタイマーで spawn される
//!   （遅い poll tick が heartbeat を塞がない）
//! - worker は Dispatcher が実行ごとに spawn する
//! - 停止は watch チャンネルで通知。drop ではなく `shutdown_and_join` で
//!   猶予つきの graceful shutdown になる
//!
//! # Graceful shutdown
//! claim を止める → in-flight に猶予を与える → 残った pick はそのまま捨てる。
//! 捨てられた行は heartbeat が止まるので、他インスタンスの sweep が普通の
//! クラッシュと同じ経路で回収します（復旧経路を 1 本にするための設計）。

use std::sync::Arc;

use chrono::{DateTime, Utc};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{info, warn};

use super::config::SchedulerConfig;
use super::dispatcher::Dispatcher;
use super::heartbeat_loop::Heartbeater;
use super::picker::Picker;
use super::poll_loop::PollLoop;
use super::reaper_loop::Reaper;
use super::resolver::CompletionResolver;
use super::status::ExecutionCounts;
use crate::domain::{Execution, ExecutionKey, SchedulerError, SchedulerId, TaskInstance};
use crate::ports::clock::Clock;
use crate::ports::execution_store::ExecutionStore;
use crate::typed::TaskRegistry;

pub struct Scheduler {
    config: SchedulerConfig,
    store: Arc<dyn ExecutionStore>,
    registry: Arc<TaskRegistry>,
    dispatcher: Arc<Dispatcher>,
    resolver: Arc<CompletionResolver>,
    clock: Arc<dyn Clock>,
    shutdown_tx: watch::Sender<bool>,
    shutdown_rx: watch::Receiver<bool>,
    joins: Vec<JoinHandle<()>>,
}

impl std::fmt::Debug for Scheduler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Scheduler")
            .field("config", &self.config)
            .field("joins", &self.joins.len())
            .finish_non_exhaustive()
    }
}

impl Scheduler {
    pub(crate) fn new(
        config: SchedulerConfig,
        store: Arc<dyn ExecutionStore>,
        registry: Arc<TaskRegistry>,
        dispatcher: Arc<Dispatcher>,
        resolver: Arc<CompletionResolver>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        Self {
            config,
            store,
            registry,
            dispatcher,
            resolver,
            clock,
            shutdown_tx,
            shutdown_rx,
            joins: Vec::new(),
        }
    }

    pub fn scheduler_id(&self) -> &SchedulerId {
        &self.config.scheduler_id
    }

    /// Spawn the three loops. Idempotent (a second call is a no-op).
    pub fn start(&mut self) {
        if !self.joins.is_empty() {
            return;
        }

        let poll = PollLoop::new(
            Picker::new(
                Arc::clone(&self.store),
                Arc::clone(&self.registry),
                self.config.scheduler_id.clone(),
            ),
            Arc::clone(&self.dispatcher),
            Arc::clone(&self.resolver),
            Arc::clone(&self.clock),
        );
        self.joins.push(tokio::spawn(
            poll.run(self.config.polling_interval, self.shutdown_rx.clone()),
        ));

        let heartbeater = Heartbeater::new(
            Arc::clone(&self.store),
            Arc::clone(&self.dispatcher),
            Arc::clone(&self.clock),
            self.config.scheduler_id.clone(),
        );
        self.joins.push(tokio::spawn(
            heartbeater.run(self.config.heartbeat_interval, self.shutdown_rx.clone()),
        ));

        let reaper = Reaper::new(
            Arc::clone(&self.store),
            Arc::clone(&self.registry),
            Arc::clone(&self.clock),
            self.config.stale_threshold,
            self.config.default_failure_policy.clone(),
            self.config.default_dead_policy,
        );
        // sweep は heartbeat と同じ周期の独立タイマー
        self.joins.push(tokio::spawn(
            reaper.run(self.config.heartbeat_interval, self.shutdown_rx.clone()),
        ));

        info!(scheduler_id = %self.config.scheduler_id, "scheduler started");
    }

    /// Persist a new execution, due at `at`. The instance's task must be
    /// registered on this builder: scheduling a name nothing can run is
    /// almost certainly a bug, so it fails fast here.
    pub async fn schedule(
        &self,
        instance: TaskInstance,
        at: DateTime<Utc>,
    ) -> Result<(), SchedulerError> {
        if self.registry.lookup(instance.task_name()).is_none() {
            return Err(SchedulerError::UnknownTask(instance.task_name().clone()));
        }
        let execution = Execution::new(instance.key(), at, instance.into_data());
        self.store.insert(execution).await?;
        Ok(())
    }

    pub async fn schedule_now(&self, instance: TaskInstance) -> Result<(), SchedulerError> {
        self.schedule(instance, self.clock.now()).await
    }

    /// Operator surface: inspect one execution row.
    pub async fn execution(
        &self,
        key: &ExecutionKey,
    ) -> Result<Option<Execution>, SchedulerError> {
        Ok(self.store.get(key).await?)
    }

    /// Operator surface: row counts by state.
    pub async fn counts(&self) -> Result<ExecutionCounts, SchedulerError> {
        Ok(self.store.counts(self.clock.now()).await?)
    }

    /// Stop claiming new work (loops exit; in-flight handlers keep running).
    pub fn request_shutdown(&self) {
        // ignore send error: receivers may already be dropped
        let _ = self.shutdown_tx.send(true);
    }

    /// Graceful shutdown: stop claiming, give in-flight executions up to
    /// `shutdown_grace` to finish, then abandon the rest.
    pub async fn shutdown_and_join(mut self) {
        self.request_shutdown();

        let drained = self.dispatcher.wait_for_drain(self.config.shutdown_grace).await;
        if !drained {
            warn!(
                "shutdown grace expired, abandoning in-flight picks; their heartbeats \
                stop now and another instance's sweep will recover them"
            );
        }

        for join in self.joins.drain(..) {
            let _ = join.await;
        }
        info!(scheduler_id = %self.config.scheduler_id, "scheduler stopped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::app::builder::SchedulerBuilder;
    use crate::domain::{CompletionDecision, InstanceId, TaskName};
    use crate::impls::InMemoryExecutionStore;
    use crate::policy::{DeadExecutionPolicy, FailurePolicy};
    use crate::typed::{self, ExecutionContext, Handler, Task};
    use async_trait::async_trait;
    use serde::{Deserialize, Serialize};
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::time::Duration;

    #[derive(Debug, Serialize, Deserialize)]
    struct Hello;

    impl Task for Hello {
        const NAME: &'static str = "test.hello";
    }

    struct CountingHandler {
        runs: Arc<AtomicU32>,
    }

    #[async_trait]
    impl Handler<Hello> for CountingHandler {
        async fn handle(
            &self,
            _task: Hello,
            _ctx: &ExecutionContext,
        ) -> Result<CompletionDecision, SchedulerError> {
            self.runs.fetch_add(1, Ordering::SeqCst);
            Ok(CompletionDecision::remove())
        }
    }

    #[derive(Debug, Serialize, Deserialize)]
    struct AlwaysFails;

    impl Task for AlwaysFails {
        const NAME: &'static str = "test.always_fails";
    }

    struct FailingHandler {
        attempts: Arc<AtomicU32>,
    }

    #[async_trait]
    impl Handler<AlwaysFails> for FailingHandler {
        async fn handle(
            &self,
            _task: AlwaysFails,
            _ctx: &ExecutionContext,
        ) -> Result<CompletionDecision, SchedulerError> {
            self.attempts.fetch_add(1, Ordering::SeqCst);
            Err(SchedulerError::handler("intentional failure"))
        }
    }

    #[derive(Debug, Serialize, Deserialize)]
    struct Recurring;

    impl Task for Recurring {
        const NAME: &'static str = "test.recurring";
    }

    struct RecurringHandler {
        runs: Arc<AtomicU32>,
    }

    #[async_trait]
    impl Handler<Recurring> for RecurringHandler {
        async fn handle(
            &self,
            _task: Recurring,
            _ctx: &ExecutionContext,
        ) -> Result<CompletionDecision, SchedulerError> {
            let run = self.runs.fetch_add(1, Ordering::SeqCst) + 1;
            if run < 3 {
                Ok(CompletionDecision::reschedule(
                    Utc::now() + chrono::Duration::milliseconds(30),
                ))
            } else {
                Ok(CompletionDecision::remove())
            }
        }
    }

    /// Fast intervals for tests: 20ms poll, 30ms heartbeat, 100ms stale.
    fn fast_config() -> SchedulerConfig {
        let mut config = SchedulerConfig::new();
        config.polling_interval = Duration::from_millis(20);
        config.heartbeat_interval = Duration::from_millis(30);
        config.stale_threshold = Duration::from_millis(100);
        config.worker_capacity = 2;
        config.shutdown_grace = Duration::from_millis(500);
        config
    }

    async fn wait_until<F, Fut>(what: &str, mut cond: F)
    where
        F: FnMut() -> Fut,
        Fut: std::future::Future<Output = bool>,
    {
        let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
        while !cond().await {
            assert!(
                tokio::time::Instant::now() < deadline,
                "timed out waiting for: {what}"
            );
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    }

    #[tokio::test]
    async fn one_off_task_runs_once_and_row_is_deleted() {
        let store = Arc::new(InMemoryExecutionStore::new());
        let runs = Arc::new(AtomicU32::new(0));

        let mut scheduler = SchedulerBuilder::new(store.clone())
            .with_config(fast_config())
            .register::<Hello, _>(CountingHandler {
                runs: Arc::clone(&runs),
            })
            .unwrap()
            .build()
            .unwrap();

        scheduler.schedule_now(typed::instance::<Hello>("once")).await.unwrap();
        scheduler.start();

        let key = ExecutionKey::new(TaskName::new(Hello::NAME), InstanceId::new("once"));
        let store2 = store.clone();
        wait_until("one-off row deleted", move || {
            let store = store2.clone();
            let key = key.clone();
            async move { store.get(&key).await.unwrap().is_none() }
        })
        .await;

        assert_eq!(runs.load(Ordering::SeqCst), 1);
        scheduler.shutdown_and_join().await;
    }

    #[tokio::test]
    async fn always_failing_task_goes_dead_after_max_retries() {
        let store = Arc::new(InMemoryExecutionStore::new());
        let attempts = Arc::new(AtomicU32::new(0));

        let mut scheduler = SchedulerBuilder::new(store.clone())
            .with_config(fast_config())
            .register_with_policies::<AlwaysFails, _>(
                FailingHandler {
                    attempts: Arc::clone(&attempts),
                },
                FailurePolicy::fixed(Duration::from_millis(10), Some(2)),
                DeadExecutionPolicy::MarkDead,
            )
            .unwrap()
            .build()
            .unwrap();

        scheduler
            .schedule_now(typed::instance::<AlwaysFails>("doomed"))
            .await
            .unwrap();
        scheduler.start();

        let key = ExecutionKey::new(TaskName::new(AlwaysFails::NAME), InstanceId::new("doomed"));
        let store2 = store.clone();
        let key2 = key.clone();
        wait_until("execution marked dead", move || {
            let store = store2.clone();
            let key = key2.clone();
            async move { store.get(&key).await.unwrap().is_some_and(|row| row.dead) }
        })
        .await;

        let row = store.get(&key).await.unwrap().unwrap();
        assert_eq!(row.consecutive_failures, 2);
        assert_eq!(attempts.load(Ordering::SeqCst), 2);

        // DEAD は二度と claim されない
        tokio::time::sleep(Duration::from_millis(150)).await;
        assert_eq!(attempts.load(Ordering::SeqCst), 2);

        scheduler.shutdown_and_join().await;
    }

    #[tokio::test]
    async fn recurring_task_reschedules_until_it_removes_itself() {
        let store = Arc::new(InMemoryExecutionStore::new());
        let runs = Arc::new(AtomicU32::new(0));

        let mut scheduler = SchedulerBuilder::new(store.clone())
            .with_config(fast_config())
            .register::<Recurring, _>(RecurringHandler {
                runs: Arc::clone(&runs),
            })
            .unwrap()
            .build()
            .unwrap();

        scheduler
            .schedule_now(typed::instance::<Recurring>("tick"))
            .await
            .unwrap();
        scheduler.start();

        let key = ExecutionKey::new(TaskName::new(Recurring::NAME), InstanceId::new("tick"));
        let store2 = store.clone();
        wait_until("recurring row removed after 3 runs", move || {
            let store = store2.clone();
            let key = key.clone();
            async move { store.get(&key).await.unwrap().is_none() }
        })
        .await;

        assert_eq!(runs.load(Ordering::SeqCst), 3);
        scheduler.shutdown_and_join().await;
    }

    #[tokio::test]
    async fn abandoned_claim_is_recovered_and_completed_here() {
        let store = Arc::new(InMemoryExecutionStore::new());
        let runs = Arc::new(AtomicU32::new(0));

        // 別インスタンス("crashed")が claim した直後に死んだ、という状態を作る
        let key = ExecutionKey::new(TaskName::new(Hello::NAME), InstanceId::new("orphan"));
        store
            .insert(Execution::new(key.clone(), Utc::now(), None))
            .await
            .unwrap();
        store
            .try_pick(&key, 1, &SchedulerId::from_name("crashed"), Utc::now())
            .await
            .unwrap()
            .unwrap();

        let mut scheduler = SchedulerBuilder::new(store.clone())
            .with_config(fast_config())
            .register::<Hello, _>(CountingHandler {
                runs: Arc::clone(&runs),
            })
            .unwrap()
            .build()
            .unwrap();
        scheduler.start();

        // stale threshold (100ms) 経過後、sweep が取り戻し、この instance が完走させる
        let store2 = store.clone();
        let key2 = key.clone();
        wait_until("orphan recovered and completed", move || {
            let store = store2.clone();
            let key = key2.clone();
            async move { store.get(&key).await.unwrap().is_none() }
        })
        .await;

        assert_eq!(runs.load(Ordering::SeqCst), 1);
        scheduler.shutdown_and_join().await;
    }

    #[tokio::test]
    async fn after_shutdown_nothing_is_claimed() {
        let store = Arc::new(InMemoryExecutionStore::new());
        let runs = Arc::new(AtomicU32::new(0));

        let mut scheduler = SchedulerBuilder::new(store.clone())
            .with_config(fast_config())
            .register::<Hello, _>(CountingHandler {
                runs: Arc::clone(&runs),
            })
            .unwrap()
            .build()
            .unwrap();
        scheduler.start();

        scheduler.request_shutdown();
        tokio::time::sleep(Duration::from_millis(50)).await;

        scheduler.schedule_now(typed::instance::<Hello>("late")).await.unwrap();
        tokio::time::sleep(Duration::from_millis(100)).await;

        assert_eq!(runs.load(Ordering::SeqCst), 0);
        let key = ExecutionKey::new(TaskName::new(Hello::NAME), InstanceId::new("late"));
        let row = store.get(&key).await.unwrap().unwrap();
        assert!(!row.picked);

        scheduler.shutdown_and_join().await;
    }

    #[tokio::test]
    async fn scheduling_an_unregistered_task_fails_fast() {
        let store = Arc::new(InMemoryExecutionStore::new());
        let scheduler = SchedulerBuilder::new(store).build().unwrap();

        let err = scheduler
            .schedule_now(typed::instance::<Hello>("nope"))
            .await
            .unwrap_err();
        assert!(matches!(err, SchedulerError::UnknownTask(_)));
    }
}
