//! Error types for relational access

use thiserror::Error;

/// Errors raised by the relational access layer
#[derive(Debug, Error)]
pub enum SqlError {
    /// The SQLite driver rejected the statement
    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    /// Statement text could not be used for the requested operation
    #[error("Unsupported statement: {0}")]
    Unsupported(String),

    /// A row did not carry an expected column
    #[error("Missing column: {0}")]
    MissingColumn(String),

    /// Failure reported by a non-SQLite gateway implementation
    #[error("Gateway error: {0}")]
    Gateway(String),
}

impl SqlError {
    /// Create an Unsupported error with context
    pub fn unsupported(msg: impl Into<String>) -> Self {
        Self::Unsupported(msg.into())
    }

    /// Create a MissingColumn error with context
    pub fn missing_column(column: impl Into<String>) -> Self {
        Self::MissingColumn(column.into())
    }

    /// Create a Gateway error with context
    pub fn gateway(msg: impl Into<String>) -> Self {
        Self::Gateway(msg.into())
    }
}

/// Result type for relational access
pub type SqlResult<T> = Result<T, SqlError>;
