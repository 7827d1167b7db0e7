//! SchedulerBuilder - スケジューラの構築とワイヤリング
//!
//! # Fail-fast 設計
//! - register() の重複はその場でエラー
//! - build() で設定を検証（ゼロ間隔、容量 0、きつすぎる stale threshold）
//! - 不正があれば BuildError。起動後に設定エラーが出ることはない

use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;

use super::config::SchedulerConfig;
use super::dispatcher::Dispatcher;
use super::resolver::CompletionResolver;
use super::scheduler::Scheduler;
use crate::domain::SchedulerError;
use crate::policy::{DeadExecutionPolicy, FailurePolicy};
use crate::ports::clock::{Clock, SystemClock};
use crate::ports::execution_store::ExecutionStore;
use crate::typed::{Handler, Task, TaskRegistry};

/// Configuration/startup errors. These are the only fatal errors in the
/// system; everything after build is contained per tick or per execution.
#[derive(Debug, Error)]
pub enum BuildError {
    #[error("polling interval must be non-zero")]
    ZeroPollingInterval,

    #[error("heartbeat interval must be non-zero")]
    ZeroHeartbeatInterval,

    #[error("worker capacity must be at least 1")]
    ZeroWorkerCapacity,

    /// The stale threshold must leave room for missed heartbeat ticks,
    /// otherwise scheduling jitter shows up as false dead detection.
    #[error("stale threshold {stale:?} must be at least 3x the heartbeat interval {heartbeat:?}")]
    StaleThresholdTooTight { stale: Duration, heartbeat: Duration },
}

/// SchedulerBuilder はスケジューラを構築
///
/// # 使用例
/// ```ignore
/// let scheduler = SchedulerBuilder::new(store)
///     .register::<SendInvoice, _>(SendInvoiceHandler)?
///     .with_config(config)
///     .build()?;
/// ```
pub struct SchedulerBuilder {
    config: SchedulerConfig,
    registry: TaskRegistry,
    store: Arc<dyn ExecutionStore>,
    clock: Arc<dyn Clock>,
}

impl SchedulerBuilder {
    pub fn new(store: Arc<dyn ExecutionStore>) -> Self {
        Self {
            config: SchedulerConfig::new(),
            registry: TaskRegistry::new(),
            store,
            clock: Arc::new(SystemClock),
        }
    }

    pub fn with_config(mut self, config: SchedulerConfig) -> Self {
        self.config = config;
        self
    }

    /// Swap the clock (tests use `FixedClock`).
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Register a task with the config's default policies.
    pub fn register<T: Task, H: Handler<T> + 'static>(
        mut self,
        handler: H,
    ) -> Result<Self, SchedulerError> {
        let failure = self.config.default_failure_policy.clone();
        let dead = self.config.default_dead_policy;
        self.registry.register::<T, H>(handler, failure, dead)?;
        Ok(self)
    }

    /// Register a task with explicit policies.
    pub fn register_with_policies<T: Task, H: Handler<T> + 'static>(
        mut self,
        handler: H,
        failure_policy: FailurePolicy,
        dead_policy: DeadExecutionPolicy,
    ) -> Result<Self, SchedulerError> {
        self.registry
            .register::<T, H>(handler, failure_policy, dead_policy)?;
        Ok(self)
    }

    pub fn build(self) -> Result<Scheduler, BuildError> {
        let config = self.config;
        if config.polling_interval.is_zero() {
            return Err(BuildError::ZeroPollingInterval);
        }
        if config.heartbeat_interval.is_zero() {
            return Err(BuildError::ZeroHeartbeatInterval);
        }
        if config.worker_capacity == 0 {
            return Err(BuildError::ZeroWorkerCapacity);
        }
        if config.stale_threshold < config.heartbeat_interval * 3 {
            return Err(BuildError::StaleThresholdTooTight {
                stale: config.stale_threshold,
                heartbeat: config.heartbeat_interval,
            });
        }

        let registry = Arc::new(self.registry);
        let resolver = Arc::new(CompletionResolver::new(
            Arc::clone(&self.store),
            Arc::clone(&self.clock),
        ));
        let dispatcher = Arc::new(Dispatcher::new(
            config.worker_capacity,
            Arc::clone(&registry),
            Arc::clone(&resolver),
            config.scheduler_id.clone(),
        ));
        Ok(Scheduler::new(
            config,
            self.store,
            registry,
            dispatcher,
            resolver,
            self.clock,
        ))
    }
}
