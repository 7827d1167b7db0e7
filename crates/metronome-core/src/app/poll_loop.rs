//! PollLoop - 定期 tick で due な実行を claim し、worker に流す
//!
//! # 1 tick のフロー
//! 1. Dispatcher の空き容量を見る（backpressure: 空きが無ければ claim しない）
//! 2. Picker::pick_due を空き分だけ呼ぶ
//! 3. claim できた実行を Dispatcher::submit
//!
//! store エラーはこの tick を打ち切るだけで、次の tick で再試行します。
//! heartbeat / sweep は別タイマーなので、遅い tick が liveness を塞ぐことは
//! ありません。

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tracing::{debug, warn};

use super::dispatcher::Dispatcher;
use super::picker::Picker;
use super::resolver::CompletionResolver;
use crate::ports::clock::Clock;
use crate::ports::execution_store::StoreError;

pub struct PollLoop {
    picker: Picker,
    dispatcher: Arc<Dispatcher>,
    resolver: Arc<CompletionResolver>,
    clock: Arc<dyn Clock>,
}

impl PollLoop {
    pub fn new(
        picker: Picker,
        dispatcher: Arc<Dispatcher>,
        resolver: Arc<CompletionResolver>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            picker,
            dispatcher,
            resolver,
            clock,
        }
    }

    /// One polling tick. Returns how many executions were submitted.
    pub async fn tick_once(&self) -> Result<usize, StoreError> {
        let free = self.dispatcher.free_capacity().await;
        if free == 0 {
            debug!("workers saturated, claiming nothing this tick");
            return Ok(0);
        }

        let claimed = self.picker.pick_due(self.clock.now(), free).await?;
        let mut submitted = 0;

        for execution in claimed {
            match self.dispatcher.submit(execution.clone()).await {
                Ok(()) => submitted += 1,
                Err(err) => {
                    // capacity は claim 前に測ったので通常届かない。届いたら
                    // claim を持ったままにせず返す（持ち続けても走らないまま
                    // stale になるだけ）。
                    warn!(key = %execution.key, error = %err,
                        "submit refused, releasing fresh claim");
                    self.resolver.release_unchanged(&execution).await;
                }
            }
        }

        Ok(submitted)
    }

    pub(crate) async fn run(self, interval: Duration, mut shutdown_rx: watch::Receiver<bool>) {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                changed = shutdown_rx.changed() => {
                    if changed.is_err() || *shutdown_rx.borrow() {
                        break;
                    }
                }
                _ = ticker.tick() => {
                    match self.tick_once().await {
                        Ok(submitted) if submitted > 0 => debug!(submitted, "poll tick"),
                        Ok(_) => {}
                        Err(err) => warn!(error = %err, "poll tick aborted, retrying next tick"),
                    }
                }
            }
        }
    }
}
