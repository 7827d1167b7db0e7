//! App - アプリケーション層
//!
//! ports を組み合わせて調整エンジンを実装します。
//!
//! # 主要コンポーネント
//! - **SchedulerBuilder**: 構築とワイヤリング（fail-fast 検証）
//! - **Scheduler**: 表面。ループの spawn、schedule API、graceful shutdown
//! - **PollLoop**: due な実行の claim と投入（空き容量で bound）
//! - **Picker**: claim protocol（version CAS、負けたら skip）
//! - **Dispatcher**: bounded worker capacity と in-flight 表
//! - **Heartbeater**: 自分の claim の生存信号
//! - **Reaper**: stale heartbeat の回収（dead-execution sweep）
//! - **CompletionResolver**: 実行結果 → 次の永続状態

pub mod builder;
pub mod config;
pub mod dispatcher;
pub mod heartbeat_loop;
pub mod picker;
pub mod poll_loop;
pub mod reaper_loop;
pub mod resolver;
pub mod scheduler;
pub mod status;

pub use builder::{BuildError, SchedulerBuilder};
pub use config::SchedulerConfig;
pub use dispatcher::Dispatcher;
pub use heartbeat_loop::Heartbeater;
pub use picker::Picker;
pub use poll_loop::PollLoop;
pub use reaper_loop::Reaper;
pub use resolver::CompletionResolver;
pub use scheduler::Scheduler;
pub use status::ExecutionCounts;
