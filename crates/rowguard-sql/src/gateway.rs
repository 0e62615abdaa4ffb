//! The relational access seam consumed by the workflow core

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::SqlResult;
use crate::value::{Row, SqlValue};

/// Keys generated by an INSERT, reported so the insert can be reversed
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct GeneratedKeys {
    /// Column the keys belong to
    pub column: String,
    /// One value per inserted row
    pub values: Vec<SqlValue>,
}

/// Outcome of executing a mutating statement
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ExecutionOutcome {
    /// Rows changed by the statement
    pub affected_rows: u64,
    /// Keys generated by an INSERT, when the backend can report them
    pub generated_keys: Option<GeneratedKeys>,
}

impl ExecutionOutcome {
    /// Outcome with only an affected-row count
    pub fn affected(affected_rows: u64) -> Self {
        Self {
            affected_rows,
            generated_keys: None,
        }
    }
}

/// Access to the relational store
///
/// Implementations receive statement text that has already passed an external
/// safety check. Positional parameters (`?`) are bound from `params` in order.
#[async_trait]
pub trait SqlGateway: Send + Sync {
    /// Run a read query and return every row with its full column set
    async fn query(&self, sql: &str, params: &[SqlValue]) -> SqlResult<Vec<Row>>;

    /// Execute a mutating statement
    async fn execute(&self, sql: &str, params: &[SqlValue]) -> SqlResult<ExecutionOutcome>;

    /// Primary-key column of a table, if catalog introspection can find one
    async fn primary_key_column(&self, table: &str) -> SqlResult<Option<String>>;

    /// Run a query whose first column of the first row is a count
    async fn count(&self, sql: &str, params: &[SqlValue]) -> SqlResult<u64> {
        let rows = self.query(sql, params).await?;
        Ok(rows
            .first()
            .and_then(|row| row.values().next())
            .and_then(SqlValue::as_i64)
            .map(|n| n.max(0) as u64)
            .unwrap_or(0))
    }
}
