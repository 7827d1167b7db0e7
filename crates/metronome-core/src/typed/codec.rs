//! PayloadCodec - store の `data` bytes と型付き payload の相互変換

use serde_json::Value;

use super::task::Task;
use crate::domain::SchedulerError;

/// JSON bytes ↔ `T`。
///
/// payload を持たない実行（`data = NULL`）は JSON の `null` として decode
/// されるので、unit struct の Task はそのまま成立します。
pub struct PayloadCodec;

impl PayloadCodec {
    pub fn encode<T: Task>(task: &T) -> Result<Vec<u8>, SchedulerError> {
        Ok(serde_json::to_vec(task)?)
    }

    pub fn decode<T: Task>(bytes: Option<&[u8]>) -> Result<T, SchedulerError> {
        match bytes {
            Some(bytes) => Ok(serde_json::from_slice(bytes)?),
            None => Ok(serde_json::from_value(Value::Null)?),
        }
    }
}
