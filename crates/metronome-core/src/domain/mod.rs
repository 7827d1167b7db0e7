//! Domain model (identifiers, execution record, decisions, errors).

pub mod decision;
pub mod errors;
pub mod execution;
pub mod ids;
pub mod instance;

pub use decision::CompletionDecision;
pub use errors::SchedulerError;
pub use execution::{Execution, ExecutionState, RescheduleUpdate};
pub use ids::{ExecutionKey, InstanceId, SchedulerId, TaskName};
pub use instance::TaskInstance;
