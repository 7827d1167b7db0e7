//! Picker - claim protocol
//!
//! due な実行を読み、version を比較する条件付き書き込みで自分のものにします。
//! 競り負け（他インスタンスが先に version を進めた）はエラーではなく skip。
//! 行ロック待ちは存在しないので、インスタンス数が増えても claim は
//! 待ち合わせではなく速い失敗として解決されます。

use std::sync::Arc;

use chrono::{DateTime, Utc};
use tracing::{debug, warn};

use crate::domain::{Execution, SchedulerId};
use crate::ports::execution_store::{ExecutionStore, StoreError};
use crate::typed::TaskRegistry;

pub struct Picker {
    store: Arc<dyn ExecutionStore>,
    registry: Arc<TaskRegistry>,
    scheduler_id: SchedulerId,
}

impl Picker {
    pub fn new(
        store: Arc<dyn ExecutionStore>,
        registry: Arc<TaskRegistry>,
        scheduler_id: SchedulerId,
    ) -> Self {
        Self {
            store,
            registry,
            scheduler_id,
        }
    }

    /// Claim up to `limit` due executions, oldest-due first.
    ///
    /// May legitimately return fewer than `limit` under contention: every
    /// candidate another instance got to first is skipped silently.
    /// Executions referencing a task this deployment does not know are
    /// logged and left unclaimed (a newer scheduler version may own them).
    pub async fn pick_due(
        &self,
        now: DateTime<Utc>,
        limit: usize,
    ) -> Result<Vec<Execution>, StoreError> {
        if limit == 0 {
            return Ok(Vec::new());
        }

        let candidates = self.store.fetch_due(now, limit).await?;
        let mut claimed = Vec::with_capacity(candidates.len());

        for candidate in candidates {
            if self.registry.lookup(&candidate.key.task_name).is_none() {
                warn!(key = %candidate.key, "execution references unregistered task, skipping");
                continue;
            }

            match self
                .store
                .try_pick(&candidate.key, candidate.version, &self.scheduler_id, now)
                .await?
            {
                Some(execution) => claimed.push(execution),
                None => {
                    // ClaimLost: 他インスタンスが勝った。期待される経路。
                    debug!(key = %candidate.key, "claim lost, skipping");
                }
            }
        }

        Ok(claimed)
    }
}
