//! Heartbeater - 自分が実行中の claim の生存信号
//!
//! handler の呼び出しスタックとは独立に、in-flight 表の全キーへ定期的に
//! `last_heartbeat = now` を書きます。遅い handler が他の実行の heartbeat を
//! 飢えさせることはありません。
//!
//! 書き込みは `picked_by = 自分` を条件にした conditional write。false が
//! 返ってきたら、その行は sweep か他プロセスに取られた後ということ
//! （OwnershipLost をここで発見する）。

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tracing::{debug, warn};

use super::dispatcher::Dispatcher;
use crate::domain::SchedulerId;
use crate::ports::clock::Clock;
use crate::ports::execution_store::{ExecutionStore, StoreError};

pub struct Heartbeater {
    store: Arc<dyn ExecutionStore>,
    dispatcher: Arc<Dispatcher>,
    clock: Arc<dyn Clock>,
    scheduler_id: SchedulerId,
}

impl Heartbeater {
    pub fn new(
        store: Arc<dyn ExecutionStore>,
        dispatcher: Arc<Dispatcher>,
        clock: Arc<dyn Clock>,
        scheduler_id: SchedulerId,
    ) -> Self {
        Self {
            store,
            dispatcher,
            clock,
            scheduler_id,
        }
    }

    /// Refresh every in-flight execution once. Returns how many rows this
    /// process still owns. A store error aborts the tick (caller retries on
    /// the next one).
    pub async fn refresh_once(&self) -> Result<usize, StoreError> {
        let keys = self.dispatcher.in_flight_keys().await;
        let now = self.clock.now();
        let mut refreshed = 0;

        for key in keys {
            if self
                .store
                .refresh_heartbeat(&key, &self.scheduler_id, now)
                .await?
            {
                refreshed += 1;
            } else {
                warn!(key = %key, "execution no longer owned by this instance, \
                    heartbeat not refreshed");
            }
        }
        Ok(refreshed)
    }

    pub(crate) async fn run(self, interval: Duration, mut shutdown_rx: watch::Receiver<bool>) {
        let mut ticker = tokio::time::interval(interval);
        // 負荷で tick を取りこぼしても追いかけない（idempotent なのでスキップで良い）
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        ticker.tick().await; // interval の初回は即時発火なので読み捨てる

        loop {
            tokio::select! {
                changed = shutdown_rx.changed() => {
                    if changed.is_err() || *shutdown_rx.borrow() {
                        break;
                    }
                }
                _ = ticker.tick() => {
                    match self.refresh_once().await {
                        Ok(refreshed) => debug!(refreshed, "heartbeat tick"),
                        Err(err) => warn!(error = %err, "heartbeat tick aborted, retrying next tick"),
                    }
                }
            }
        }
    }
}
