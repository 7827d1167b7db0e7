//! Reaper - stale heartbeat の回収（dead-execution sweep）
//!
//! どのインスタンスが claim したかに関わらず、heartbeat が stale_threshold
//! より古い picked 行を拾い、タスク登録時の dead policy に従って遷移させます。
//! 遷移は fetch 時に観測した version を条件にした CAS なので、「死んだように
//! 見えただけ」の所有者（GC pause 等）とすれ違っても安全に片側が負けます。
//! 負けた所有者は次の self-refresh で所有権喪失に気づきます。

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::sync::watch;
use tracing::{debug, info, warn};

use crate::domain::{Execution, RescheduleUpdate};
use crate::policy::{DeadExecutionPolicy, FailurePolicy};
use crate::ports::clock::Clock;
use crate::ports::execution_store::{ExecutionStore, StoreError};
use crate::typed::TaskRegistry;

pub struct Reaper {
    store: Arc<dyn ExecutionStore>,
    registry: Arc<TaskRegistry>,
    clock: Arc<dyn Clock>,
    stale_threshold: Duration,
    default_failure_policy: FailurePolicy,
    default_dead_policy: DeadExecutionPolicy,
}

impl Reaper {
    pub fn new(
        store: Arc<dyn ExecutionStore>,
        registry: Arc<TaskRegistry>,
        clock: Arc<dyn Clock>,
        stale_threshold: Duration,
        default_failure_policy: FailurePolicy,
        default_dead_policy: DeadExecutionPolicy,
    ) -> Self {
        Self {
            store,
            registry,
            clock,
            stale_threshold,
            default_failure_policy,
            default_dead_policy,
        }
    }

    /// One sweep. Returns how many executions were transitioned out of their
    /// stale pick (lost CAS races are not counted: the row had an owner
    /// after all, or another instance's sweep got there first).
    pub async fn sweep_once(&self) -> Result<usize, StoreError> {
        let now = self.clock.now();
        let threshold =
            chrono::Duration::from_std(self.stale_threshold).unwrap_or(chrono::TimeDelta::MAX);
        let cutoff = now
            .checked_sub_signed(threshold)
            .unwrap_or(DateTime::<Utc>::MIN_UTC);

        let stale = self.store.fetch_stale(cutoff).await?;
        let mut transitioned = 0;

        for execution in stale {
            warn!(key = %execution.key,
                picked_by = execution.picked_by.as_ref().map(|id| id.as_str()).unwrap_or("?"),
                "stale heartbeat, owner presumed crashed or stalled");

            let (dead_policy, failure_policy) =
                match self.registry.lookup(&execution.key.task_name) {
                    Some(def) => (def.dead_policy(), def.failure_policy().clone()),
                    None => {
                        warn!(key = %execution.key,
                            "stale execution references unregistered task, applying defaults");
                        (self.default_dead_policy, self.default_failure_policy.clone())
                    }
                };

            if self.apply(&execution, dead_policy, &failure_policy, now).await? {
                transitioned += 1;
            } else {
                debug!(key = %execution.key, "sweep lost the version race, leaving row alone");
            }
        }

        Ok(transitioned)
    }

    async fn apply(
        &self,
        execution: &Execution,
        dead_policy: DeadExecutionPolicy,
        failure_policy: &FailurePolicy,
        now: DateTime<Utc>,
    ) -> Result<bool, StoreError> {
        // 失われた実行は 1 回の失敗として数える
        let failures = execution.consecutive_failures + 1;

        match dead_policy {
            DeadExecutionPolicy::MarkDead => {
                let written = self
                    .store
                    .mark_dead(&execution.key, execution.version, now)
                    .await?;
                if written {
                    info!(key = %execution.key, "dead execution marked, operator action required");
                }
                Ok(written)
            }
            DeadExecutionPolicy::ReviveNow => {
                self.revive(execution, now, failures, now).await
            }
            DeadExecutionPolicy::ReviveWithBackoff => {
                let delay = chrono::Duration::from_std(failure_policy.backoff.delay(failures))
                    .unwrap_or(chrono::TimeDelta::MAX);
                let next = now.checked_add_signed(delay).unwrap_or(DateTime::<Utc>::MAX_UTC);
                self.revive(execution, next, failures, now).await
            }
        }
    }

    async fn revive(
        &self,
        execution: &Execution,
        next: DateTime<Utc>,
        failures: u32,
        now: DateTime<Utc>,
    ) -> Result<bool, StoreError> {
        let written = self
            .store
            .release_and_reschedule(
                &execution.key,
                execution.version,
                RescheduleUpdate {
                    next_execution_time: next,
                    consecutive_failures: failures,
                    last_success: None,
                    last_failure: Some(now),
                    new_data: None,
                },
            )
            .await?;
        if written {
            info!(key = %execution.key, next = %next, "dead execution revived");
        }
        Ok(written)
    }

    pub(crate) async fn run(self, interval: Duration, mut shutdown_rx: watch::Receiver<bool>) {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        ticker.tick().await;

        loop {
            tokio::select! {
                changed = shutdown_rx.changed() => {
                    if changed.is_err() || *shutdown_rx.borrow() {
                        break;
                    }
                }
                _ = ticker.tick() => {
                    match self.sweep_once().await {
                        Ok(transitioned) => debug!(transitioned, "sweep tick"),
                        Err(err) => warn!(error = %err, "sweep tick aborted, retrying next tick"),
                    }
                }
            }
        }
    }
}
