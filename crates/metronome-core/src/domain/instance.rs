//! Task instance: one identified, optionally-payload-bearing unit of work.

use serde::{Deserialize, Serialize};

use super::ids::{ExecutionKey, InstanceId, TaskName};

/// A logical unit of work for a registered task.
///
/// Created by application code when scheduling; immutable value. The payload
/// travels as serialized bytes; the typed facade ([`crate::typed`]) encodes
/// and decodes it so handlers never see raw bytes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskInstance {
    task_name: TaskName,
    instance_id: InstanceId,
    data: Option<Vec<u8>>,
}

impl TaskInstance {
    pub fn new(task_name: TaskName, instance_id: InstanceId) -> Self {
        Self {
            task_name,
            instance_id,
            data: None,
        }
    }

    pub fn with_data(task_name: TaskName, instance_id: InstanceId, data: Vec<u8>) -> Self {
        Self {
            task_name,
            instance_id,
            data: Some(data),
        }
    }

    pub fn task_name(&self) -> &TaskName {
        &self.task_name
    }

    pub fn instance_id(&self) -> &InstanceId {
        &self.instance_id
    }

    pub fn data(&self) -> Option<&[u8]> {
        self.data.as_deref()
    }

    pub fn key(&self) -> ExecutionKey {
        ExecutionKey::new(self.task_name.clone(), self.instance_id.clone())
    }

    pub fn into_data(self) -> Option<Vec<u8>> {
        self.data
    }
}
