//! 型付き Task API
//!
//! Task trait（payload 型と task_name の対応付け）、Handler trait、型消去
//! （TypedHandler → DynHandler）、TaskRegistry、PayloadCodec。
//! ここがアプリケーションコードから見えるタスク定義の表面で、その下の
//! 調整エンジン（`crate::app`）は bytes と [`crate::domain`] の型しか見ません。

pub mod codec;
pub mod handler;
pub mod registry;
pub mod task;

pub use codec::PayloadCodec;
pub use handler::{DynHandler, ExecutionContext, Handler, TypedHandler};
pub use registry::{TaskDefinition, TaskRegistry};
pub use task::{Task, instance, instance_with_data};
