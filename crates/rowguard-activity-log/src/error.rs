//! Error types for the ledger crate

use thiserror::Error;

/// Result type for ledger operations
pub type LedgerResult<T> = Result<T, LedgerError>;

/// Errors that can occur while recording or reading the ledger
#[derive(Error, Debug)]
pub enum LedgerError {
    #[error("Storage error: {message}")]
    StorageError { message: String },

    #[error("Invalid record: {message}")]
    InvalidRecord { message: String },

    #[error("Workflow not found: {0}")]
    WorkflowNotFound(String),

    #[error("JSON error: {0}")]
    JsonError(#[from] serde_json::Error),

    #[error("Database error: {0}")]
    DatabaseError(#[from] rusqlite::Error),
}

impl LedgerError {
    /// Create a storage error
    pub fn storage(message: impl Into<String>) -> Self {
        Self::StorageError {
            message: message.into(),
        }
    }

    /// Create an invalid record error
    pub fn invalid_record(message: impl Into<String>) -> Self {
        Self::InvalidRecord {
            message: message.into(),
        }
    }

    /// Create a workflow not found error
    pub fn workflow_not_found(id: impl Into<String>) -> Self {
        Self::WorkflowNotFound(id.into())
    }
}
