//! Handler trait - Task を実行する Handler の定義
//!
//! 型消去の三点セット（Handler<T> / DynHandler / TypedHandler）で、
//! 型付き Handler を `HashMap<TaskName, Arc<dyn DynHandler>>` に格納可能にします。

use async_trait::async_trait;
use std::marker::PhantomData;

use super::codec::PayloadCodec;
use super::task::Task;
use crate::domain::{CompletionDecision, Execution, SchedulerError, SchedulerId};

/// Metadata exposed to a running handler: a snapshot of the execution row as
/// claimed, and the identity of the scheduler instance running it.
#[derive(Debug, Clone)]
pub struct ExecutionContext {
    execution: Execution,
    scheduler_id: SchedulerId,
}

impl ExecutionContext {
    pub fn new(execution: Execution, scheduler_id: SchedulerId) -> Self {
        Self {
            execution,
            scheduler_id,
        }
    }

    /// The execution as it looked when this process claimed it.
    pub fn execution(&self) -> &Execution {
        &self.execution
    }

    pub fn scheduler_id(&self) -> &SchedulerId {
        &self.scheduler_id
    }

    /// How many consecutive failures preceded this attempt.
    pub fn consecutive_failures(&self) -> u32 {
        self.execution.consecutive_failures
    }
}

/// Handler は Task を実行して CompletionDecision を返す
///
/// # 使用例
/// ```ignore
/// struct SendInvoiceHandler;
///
/// #[async_trait]
/// impl Handler<SendInvoice> for SendInvoiceHandler {
///     async fn handle(
///         &self,
///         task: SendInvoice,
///         _ctx: &ExecutionContext,
///     ) -> Result<CompletionDecision, SchedulerError> {
///         send(&task.customer).await?;
///         Ok(CompletionDecision::remove())
///     }
/// }
/// ```
///
/// 失敗は `Err` で返す（panic しても dispatcher が封じ込めて failure 扱いに
/// するが、行儀のよい handler は Err を返す）。
#[async_trait]
pub trait Handler<T: Task>: Send + Sync {
    async fn handle(
        &self,
        task: T,
        ctx: &ExecutionContext,
    ) -> Result<CompletionDecision, SchedulerError>;
}

/// DynHandler は object-safe な Handler の抽象化
///
/// payload は bytes のまま受け取り、内部で codec を通して `T` に復元します。
#[async_trait]
pub trait DynHandler: Send + Sync {
    async fn handle_dyn(
        &self,
        data: Option<&[u8]>,
        ctx: &ExecutionContext,
    ) -> Result<CompletionDecision, SchedulerError>;

    fn task_name(&self) -> &'static str;
}

pub struct TypedHandler<T: Task, H: Handler<T>> {
    handler: H,
    _marker: PhantomData<T>,
}

impl<T: Task, H: Handler<T>> TypedHandler<T, H> {
    pub fn new(handler: H) -> Self {
        Self {
            handler,
            _marker: PhantomData,
        }
    }
}

#[async_trait]
impl<T: Task, H: Handler<T>> DynHandler for TypedHandler<T, H> {
    async fn handle_dyn(
        &self,
        data: Option<&[u8]>,
        ctx: &ExecutionContext,
    ) -> Result<CompletionDecision, SchedulerError> {
        let task: T = PayloadCodec::decode(data)?;
        self.handler.handle(task, ctx).await
    }

    fn task_name(&self) -> &'static str {
        T::NAME
    }
}
