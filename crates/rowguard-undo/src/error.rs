//! Error types for snapshots and undo

use rowguard_sql::SqlError;
use thiserror::Error;

/// Result type for undo operations
pub type UndoResult<T> = Result<T, UndoError>;

/// Errors that can occur while capturing, restoring or undoing
#[derive(Debug, Error)]
pub enum UndoError {
    /// Snapshot not found
    #[error("Snapshot not found: {0}")]
    SnapshotNotFound(String),

    /// Snapshot already restored once
    #[error("Snapshot already restored: {0}")]
    AlreadyRestored(String),

    /// Snapshot past its retention time
    #[error("Snapshot expired: {0}")]
    SnapshotExpired(String),

    /// Another caller is restoring or undoing the same item
    #[error("Restore already in progress: {0}")]
    InFlight(String),

    /// Operation not found
    #[error("Operation not found: {0}")]
    OperationNotFound(String),

    /// Operation was already undone
    #[error("Operation already undone: {0}")]
    AlreadyUndone(String),

    /// Operation is not on top of its workflow stack
    #[error("Operation {operation_id} is not the most recent operation of its workflow")]
    OutOfOrder {
        /// Requested operation
        operation_id: String,
    },

    /// Operation has no recovery path
    #[error("Operation cannot be reversed: {0}")]
    NotReversible(String),

    /// Nothing left on the stack
    #[error("No more undos available")]
    NoMoreUndos,

    /// Relational gateway failure
    #[error("SQL error: {0}")]
    Sql(#[from] SqlError),

    /// Durable storage failure
    #[error("Storage error: {0}")]
    StorageError(String),

    /// Serialization error
    #[error("Serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),

    /// Database error in the durable store
    #[error("Database error: {0}")]
    DatabaseError(#[from] rusqlite::Error),
}

impl UndoError {
    /// Create a new SnapshotNotFound error with context
    pub fn snapshot_not_found(id: impl Into<String>) -> Self {
        Self::SnapshotNotFound(id.into())
    }

    /// Create a new OperationNotFound error with context
    pub fn operation_not_found(id: impl Into<String>) -> Self {
        Self::OperationNotFound(id.into())
    }

    /// Create a new NotReversible error with context
    pub fn not_reversible(msg: impl Into<String>) -> Self {
        Self::NotReversible(msg.into())
    }

    /// Create a new StorageError with context
    pub fn storage_error(msg: impl Into<String>) -> Self {
        Self::StorageError(msg.into())
    }
}
