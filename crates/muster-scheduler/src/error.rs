//! Scheduler error types.

use thiserror::Error;

use muster_context::ContextError;
use muster_nodedb::NodeDbError;

/// Result type alias for scheduling operations.
pub type SchedulerResult<T> = Result<T, SchedulerError>;

/// Internal scheduling failures. A routine "gang does not fit" is not
/// an error; it is reported through [`crate::ScheduleOutcome`].
#[derive(Debug, Clone, Error)]
pub enum SchedulerError {
    #[error("scheduling cancelled")]
    Cancelled,

    #[error("node database error: {0}")]
    NodeDb(#[from] NodeDbError),

    #[error("scheduling context error: {0}")]
    Context(#[from] ContextError),

    #[error("job repository error: {0}")]
    Repository(String),
}
