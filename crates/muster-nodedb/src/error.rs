//! Node database error types.

use thiserror::Error;

/// Result type alias for node database operations.
pub type NodeDbResult<T> = Result<T, NodeDbError>;

/// Errors that can occur during node database operations.
#[derive(Debug, Clone, Error)]
pub enum NodeDbError {
    #[error("operation requires a writable transaction")]
    ReadOnlyTxn,
}
