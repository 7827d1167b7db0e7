//! Ports - 抽象化レイヤー
//!
//! 外部システムへの seam を trait として定義します。実体の永続ストア
//! （リレーショナル DB など、条件付き書き込みができるもの）はこのクレートの
//! 範囲外で、`ExecutionStore` がその契約だけを規定します。
//!
//! # 設計原則
//! - すべての所有権遷移（claim / release / mark_dead）は version を比較する
//!   単一の条件付き書き込み
//! - 比較に負けた書き込みは待たずに失敗を返す（行ロック待ちをしない）

pub mod clock;
pub mod execution_store;

pub use self::clock::{Clock, FixedClock, SystemClock};
pub use self::execution_store::{ExecutionStore, StoreError};
