//! Scheduling-context error types.

use thiserror::Error;

/// Result type alias for context operations.
pub type ContextResult<T> = Result<T, ContextError>;

/// Internal failures of context bookkeeping. Routine outcomes such as
/// "nothing changed" are reported through return values, not errors.
#[derive(Debug, Clone, Error)]
pub enum ContextError {
    #[error("job {job_id} belongs to queue {job_queue}, gang belongs to queue {gang_queue}")]
    QueueMismatch {
        job_id: String,
        job_queue: String,
        gang_queue: String,
    },
}
