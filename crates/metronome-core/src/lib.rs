//! metronome-core
//!
//! Cluster-safe, persistence-backed task scheduler. Any number of scheduler
//! instances share one durable execution table and cooperate through
//! optimistic conditional writes so that each due execution runs on exactly
//! one instance at a time, survives crashes, and retries per policy.
//!
//! # モジュール構成
//! - **domain**: ドメインモデル（ids, execution, instance, decision, errors）
//! - **policy**: リトライ/死活ポリシー（FailurePolicy, DeadExecutionPolicy）
//! - **ports**: 抽象化レイヤー（ExecutionStore, Clock）
//! - **typed**: 型付き Task API（Task trait, Handler trait, TaskRegistry, PayloadCodec）
//! - **app**: アプリケーションロジック（builder, scheduler, poll/heartbeat/reaper loops）
//! - **impls**: 実装（InMemoryExecutionStore など開発用）
//!
//! 調整サービスは存在しません。claim / release / heartbeat のすべてが
//! version を比較する単一の条件付き書き込みで、負けた側は待たずにスキップします。

pub mod domain;
pub mod policy;
pub mod ports;
pub mod typed;
pub mod app;
pub mod impls;
