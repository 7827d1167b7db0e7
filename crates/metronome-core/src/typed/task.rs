//! Task trait - 型付き Task の定義

use serde::de::DeserializeOwned;
use serde::Serialize;

use super::codec::PayloadCodec;
use crate::domain::{InstanceId, SchedulerError, TaskInstance, TaskName};

/// Task は task name と payload 型を対応付ける
///
/// # 使用例
/// ```ignore
/// #[derive(Serialize, Deserialize)]
/// struct SendInvoice {
///     customer: String,
/// }
///
/// impl Task for SendInvoice {
///     const NAME: &'static str = "billing.send_invoice";
/// }
/// ```
///
/// # Trait Bounds
/// - `Serialize` / `DeserializeOwned`: payload が store の `data` bytes を往復するため
/// - `Send + Sync + 'static`: dispatch worker 間で共有するため
pub trait Task: Serialize + DeserializeOwned + Send + Sync + 'static {
    /// Unique task name, the registry key.
    const NAME: &'static str;
}

/// Build an instance of `T` with no payload.
pub fn instance<T: Task>(id: impl Into<String>) -> TaskInstance {
    TaskInstance::new(TaskName::new(T::NAME), InstanceId::new(id))
}

/// Build an instance of `T` carrying `data` (encoded through the codec).
pub fn instance_with_data<T: Task>(
    id: impl Into<String>,
    data: &T,
) -> Result<TaskInstance, SchedulerError> {
    Ok(TaskInstance::with_data(
        TaskName::new(T::NAME),
        InstanceId::new(id),
        PayloadCodec::encode(data)?,
    ))
}
