//! In-memory execution store.
//!
//! 開発・テスト用の ExecutionStore 実装。本番の backend（条件付き UPDATE の
//! できるリレーショナルストア）が守るべき CAS の意味論をそのまま再現します:
//! version 比較に負けた書き込みは何も変えずに false / None を返すだけ。

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::Mutex;

use crate::app::status::ExecutionCounts;
use crate::domain::{Execution, ExecutionKey, ExecutionState, RescheduleUpdate, SchedulerId};
use crate::ports::execution_store::{ExecutionStore, StoreError};

/// In-memory store state (single source of truth for rows).
///
/// Lock discipline: every operation locks, mutates, and releases before any
/// await point; no lock is ever held across a suspension.
struct InMemoryStoreState {
    rows: HashMap<ExecutionKey, Execution>,
}

/// In-memory implementation of [`ExecutionStore`].
pub struct InMemoryExecutionStore {
    state: Arc<Mutex<InMemoryStoreState>>,

    /// Fault injection: when set, every operation fails with
    /// `StoreError::Unavailable` (transient-outage testing).
    unavailable: AtomicBool,
}

impl InMemoryExecutionStore {
    pub fn new() -> Self {
        Self {
            state: Arc::new(Mutex::new(InMemoryStoreState {
                rows: HashMap::new(),
            })),
            unavailable: AtomicBool::new(false),
        }
    }

    /// Simulate a store outage (and recovery) for tests.
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    fn check_available(&self) -> Result<(), StoreError> {
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(StoreError::Unavailable("injected outage".to_string()));
        }
        Ok(())
    }

    /// Snapshot of every row (test helper).
    pub async fn all_rows(&self) -> Vec<Execution> {
        let state = self.state.lock().await;
        state.rows.values().cloned().collect()
    }
}

impl Default for InMemoryExecutionStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ExecutionStore for InMemoryExecutionStore {
    async fn insert(&self, execution: Execution) -> Result<(), StoreError> {
        self.check_available()?;
        let mut state = self.state.lock().await;
        if state.rows.contains_key(&execution.key) {
            return Err(StoreError::Duplicate(execution.key));
        }
        state.rows.insert(execution.key.clone(), execution);
        Ok(())
    }

    async fn fetch_due(
        &self,
        now: DateTime<Utc>,
        limit: usize,
    ) -> Result<Vec<Execution>, StoreError> {
        self.check_available()?;
        let state = self.state.lock().await;
        let mut due: Vec<Execution> = state
            .rows
            .values()
            .filter(|e| e.is_due(now))
            .cloned()
            .collect();
        // oldest-due first, 同時刻は key で安定させる
        due.sort_by(|a, b| {
            a.execution_time
                .cmp(&b.execution_time)
                .then_with(|| a.key.cmp(&b.key))
        });
        due.truncate(limit);
        Ok(due)
    }

    async fn try_pick(
        &self,
        key: &ExecutionKey,
        expected_version: u64,
        picked_by: &SchedulerId,
        now: DateTime<Utc>,
    ) -> Result<Option<Execution>, StoreError> {
        self.check_available()?;
        let mut state = self.state.lock().await;
        let Some(row) = state.rows.get_mut(key) else {
            return Ok(None); // deleted since we read it: lost the race
        };
        if row.picked || row.dead || row.version != expected_version {
            return Ok(None);
        }
        row.pick(picked_by, now);
        Ok(Some(row.clone()))
    }

    async fn refresh_heartbeat(
        &self,
        key: &ExecutionKey,
        owner: &SchedulerId,
        now: DateTime<Utc>,
    ) -> Result<bool, StoreError> {
        self.check_available()?;
        let mut state = self.state.lock().await;
        let Some(row) = state.rows.get_mut(key) else {
            return Ok(false);
        };
        if !row.picked || row.picked_by.as_ref() != Some(owner) {
            return Ok(false);
        }
        row.refresh_heartbeat(now);
        Ok(true)
    }

    async fn fetch_stale(&self, older_than: DateTime<Utc>) -> Result<Vec<Execution>, StoreError> {
        self.check_available()?;
        let state = self.state.lock().await;
        Ok(state
            .rows
            .values()
            .filter(|e| e.is_heartbeat_stale(older_than))
            .cloned()
            .collect())
    }

    async fn release_and_reschedule(
        &self,
        key: &ExecutionKey,
        expected_version: u64,
        update: RescheduleUpdate,
    ) -> Result<bool, StoreError> {
        self.check_available()?;
        let mut state = self.state.lock().await;
        let Some(row) = state.rows.get_mut(key) else {
            return Ok(false);
        };
        if row.version != expected_version {
            return Ok(false);
        }
        row.release_and_reschedule(update);
        Ok(true)
    }

    async fn remove(&self, key: &ExecutionKey, expected_version: u64) -> Result<bool, StoreError> {
        self.check_available()?;
        let mut state = self.state.lock().await;
        let Some(row) = state.rows.get(key) else {
            return Ok(false);
        };
        if row.version != expected_version {
            return Ok(false);
        }
        state.rows.remove(key);
        Ok(true)
    }

    async fn mark_dead(
        &self,
        key: &ExecutionKey,
        expected_version: u64,
        now: DateTime<Utc>,
    ) -> Result<bool, StoreError> {
        self.check_available()?;
        let mut state = self.state.lock().await;
        let Some(row) = state.rows.get_mut(key) else {
            return Ok(false);
        };
        if row.version != expected_version {
            return Ok(false);
        }
        row.mark_dead(now);
        Ok(true)
    }

    async fn get(&self, key: &ExecutionKey) -> Result<Option<Execution>, StoreError> {
        self.check_available()?;
        let state = self.state.lock().await;
        Ok(state.rows.get(key).cloned())
    }

    async fn counts(&self, now: DateTime<Utc>) -> Result<ExecutionCounts, StoreError> {
        self.check_available()?;
        let state = self.state.lock().await;
        let mut counts = ExecutionCounts::default();
        for row in state.rows.values() {
            match row.state(now) {
                ExecutionState::Due => counts.due += 1,
                ExecutionState::Scheduled => counts.scheduled += 1,
                ExecutionState::Picked => counts.picked += 1,
                ExecutionState::Dead => counts.dead += 1,
            }
        }
        Ok(counts)
    }
}
