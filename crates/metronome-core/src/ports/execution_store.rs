//! ExecutionStore port - 共有実行テーブルの契約
//!
//! クラスタ内の全インスタンスが同じテーブルを見る、唯一の共有可変状態です。
//! 想定backend はリレーショナルストア（read-committed 以上、atomic な条件付き
//! UPDATE ができること）。論理スキーマ:
//!
//! `executions(task_name, instance_id, execution_time, picked, picked_by,
//!  last_heartbeat, consecutive_failures, last_success, last_failure, data,
//!  version, dead)`, primary key `(task_name, instance_id)`,
//! range scan 用 index: `(picked, execution_time)`, `(picked, last_heartbeat)`.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use thiserror::Error;

use crate::app::status::ExecutionCounts;
use crate::domain::{Execution, ExecutionKey, RescheduleUpdate, SchedulerId};

#[derive(Debug, Error)]
pub enum StoreError {
    /// Insert hit an existing `(task_name, instance_id)` row.
    #[error("execution already exists: {0}")]
    Duplicate(ExecutionKey),

    /// Transient store failure. The calling activity aborts its current tick
    /// and retries on the next one; it never crashes the process.
    #[error("store unavailable: {0}")]
    Unavailable(String),
}

/// Contract every mutation of which is a single atomic conditional write.
///
/// 条件付き書き込みの戻り値の約束:
/// - `try_pick` は競り負けを `Ok(None)` で返す（ClaimLost はエラーではない）
/// - `release_and_reschedule` / `remove` / `mark_dead` は version 不一致を
///   `Ok(false)` で返す（呼び出し側が OwnershipLost / lost race として扱う）
/// - `refresh_heartbeat` は所有者不一致を `Ok(false)` で返す
#[async_trait]
pub trait ExecutionStore: Send + Sync {
    /// Create a DUE row for a newly scheduled instance.
    async fn insert(&self, execution: Execution) -> Result<(), StoreError>;

    /// Up to `limit` executions with `!picked && !dead && execution_time <= now`,
    /// ordered by `execution_time` asc, ties broken by key asc.
    async fn fetch_due(
        &self,
        now: DateTime<Utc>,
        limit: usize,
    ) -> Result<Vec<Execution>, StoreError>;

    /// Compare-and-swap claim: succeeds only if the row is still unpicked and
    /// `version` equals `expected_version`. On success sets picked/picked_by/
    /// last_heartbeat, bumps version, and returns the updated row. A lost
    /// race returns `Ok(None)`; it never blocks on a row lock.
    async fn try_pick(
        &self,
        key: &ExecutionKey,
        expected_version: u64,
        picked_by: &SchedulerId,
        now: DateTime<Utc>,
    ) -> Result<Option<Execution>, StoreError>;

    /// Refresh `last_heartbeat`, conditional on `picked && picked_by == owner`
    /// (never clobbers a row this process no longer owns). Returns whether a
    /// row was updated.
    async fn refresh_heartbeat(
        &self,
        key: &ExecutionKey,
        owner: &SchedulerId,
        now: DateTime<Utc>,
    ) -> Result<bool, StoreError>;

    /// All executions with `picked && !dead && last_heartbeat < older_than`,
    /// whatever instance picked them.
    async fn fetch_stale(&self, older_than: DateTime<Utc>) -> Result<Vec<Execution>, StoreError>;

    /// Release the pick and apply `update`, gated on `version == expected_version`.
    async fn release_and_reschedule(
        &self,
        key: &ExecutionKey,
        expected_version: u64,
        update: RescheduleUpdate,
    ) -> Result<bool, StoreError>;

    /// Delete the row, gated on `version == expected_version`.
    async fn remove(&self, key: &ExecutionKey, expected_version: u64) -> Result<bool, StoreError>;

    /// Flag the row dead (keeps the pick), gated on `version == expected_version`.
    async fn mark_dead(
        &self,
        key: &ExecutionKey,
        expected_version: u64,
        now: DateTime<Utc>,
    ) -> Result<bool, StoreError>;

    /// Point lookup, for status surfaces and tests.
    async fn get(&self, key: &ExecutionKey) -> Result<Option<Execution>, StoreError>;

    /// Observability hook.
    async fn counts(&self, now: DateTime<Utc>) -> Result<ExecutionCounts, StoreError>;
}
