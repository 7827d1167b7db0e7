//! CompletionResolver - 実行結果から次の永続状態を決めて書き込む
//!
//! 全ての書き込みは claim 時に得た version を条件にした CAS。負けたら
//! OwnershipLost: 行は既に他インスタンスのもの（sweep が回収した等）なので
//! ログだけ残して手を引く。リトライはしない。

use std::sync::Arc;

use tracing::{debug, error, warn};

use crate::domain::{CompletionDecision, Execution, RescheduleUpdate, SchedulerError};
use crate::policy::FailurePolicy;
use crate::ports::clock::Clock;
use crate::ports::execution_store::ExecutionStore;

pub struct CompletionResolver {
    store: Arc<dyn ExecutionStore>,
    clock: Arc<dyn Clock>,
}

impl CompletionResolver {
    pub fn new(store: Arc<dyn ExecutionStore>, clock: Arc<dyn Clock>) -> Self {
        Self { store, clock }
    }

    /// Route one finished execution to its next persisted state.
    ///
    /// `execution` is the row as claimed (its `version` is the CAS guard);
    /// `outcome` is what the handler produced: a decision, or a failure
    /// (handler `Err`, codec error, or a contained panic).
    pub async fn resolve(
        &self,
        execution: &Execution,
        outcome: Result<CompletionDecision, SchedulerError>,
        failure_policy: &FailurePolicy,
    ) {
        match outcome {
            Ok(decision) => self.on_success(execution, decision).await,
            Err(err) => self.on_failure(execution, err, failure_policy).await,
        }
    }

    async fn on_success(&self, execution: &Execution, decision: CompletionDecision) {
        let now = self.clock.now();
        let written = match decision {
            CompletionDecision::Remove => {
                self.store.remove(&execution.key, execution.version).await
            }
            CompletionDecision::Reschedule { at, new_data } => {
                self.store
                    .release_and_reschedule(
                        &execution.key,
                        execution.version,
                        RescheduleUpdate {
                            next_execution_time: at,
                            consecutive_failures: 0, // 成功でリセット
                            last_success: Some(now),
                            last_failure: None,
                            new_data,
                        },
                    )
                    .await
            }
        };
        self.log_write(execution, written, "completion");
    }

    async fn on_failure(
        &self,
        execution: &Execution,
        err: SchedulerError,
        failure_policy: &FailurePolicy,
    ) {
        let now = self.clock.now();
        let failures = execution.consecutive_failures + 1;
        warn!(key = %execution.key, consecutive_failures = failures, error = %err,
            "execution failed");

        let written = match failure_policy.next_execution_time(now, failures) {
            Some(next) => {
                self.store
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
                    .await
            }
            None => {
                error!(key = %execution.key, consecutive_failures = failures,
                    "retries exhausted, marking execution dead");
                self.store.mark_dead(&execution.key, execution.version, now).await
            }
        };
        self.log_write(execution, written, "failure handling");
    }

    /// Put an execution this process claimed but cannot run (e.g. submit was
    /// refused) back to DUE, schedule and counters untouched.
    pub async fn release_unchanged(&self, execution: &Execution) {
        let written = self
            .store
            .release_and_reschedule(
                &execution.key,
                execution.version,
                RescheduleUpdate {
                    next_execution_time: execution.execution_time,
                    consecutive_failures: execution.consecutive_failures,
                    last_success: None,
                    last_failure: None,
                    new_data: None,
                },
            )
            .await;
        self.log_write(execution, written, "release");
    }

    fn log_write(
        &self,
        execution: &Execution,
        written: Result<bool, crate::ports::execution_store::StoreError>,
        what: &str,
    ) {
        match written {
            Ok(true) => debug!(key = %execution.key, "{what} write applied"),
            Ok(false) => {
                // OwnershipLost: sweep か他プロセスが先に version を進めた
                warn!(key = %execution.key, "{what} write lost its version race, \
                    execution is owned elsewhere");
            }
            Err(err) => {
                // 行は picked のまま残る。heartbeat が止まれば sweep が回収する。
                error!(key = %execution.key, error = %err, "{what} write failed");
            }
        }
    }
}
