//! Executed mutating statements

use chrono::{DateTime, Utc};
use rowguard_sql::{GeneratedKeys, StatementKind};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

use crate::error::UndoError;

/// Whether an operation still stands
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OperationStatus {
    /// Applied to the database
    Executed,
    /// Reversed
    Undone,
}

impl OperationStatus {
    /// Stable storage name
    pub fn as_str(&self) -> &'static str {
        match self {
            OperationStatus::Executed => "executed",
            OperationStatus::Undone => "undone",
        }
    }
}

impl fmt::Display for OperationStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for OperationStatus {
    type Err = UndoError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "executed" => Ok(OperationStatus::Executed),
            "undone" => Ok(OperationStatus::Undone),
            other => Err(UndoError::storage_error(format!("unknown operation status '{}'", other))),
        }
    }
}

/// One executed mutating statement and what is needed to reverse it
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Operation {
    /// Unique identifier
    pub id: String,
    /// Owning workflow
    pub workflow_id: String,
    /// Step that executed the statement
    pub step_id: String,
    /// Statement text as executed
    pub statement: String,
    /// Parsed statement shape
    pub kind: StatementKind,
    /// Rows changed
    pub affected_rows: u64,
    /// Before-image for UPDATE/DELETE
    pub snapshot_id: Option<String>,
    /// Keys reported for INSERT
    pub generated_keys: Option<GeneratedKeys>,
    /// When the statement ran
    pub created_at: DateTime<Utc>,
    /// Current status
    pub status: OperationStatus,
}

impl Operation {
    /// Create an executed operation, classifying the statement
    pub fn new(
        workflow_id: impl Into<String>,
        step_id: impl Into<String>,
        statement: impl Into<String>,
        affected_rows: u64,
        snapshot_id: Option<String>,
    ) -> Self {
        let statement = statement.into();
        Self {
            id: Uuid::new_v4().to_string(),
            workflow_id: workflow_id.into(),
            step_id: step_id.into(),
            kind: StatementKind::parse(&statement),
            statement,
            affected_rows,
            snapshot_id,
            generated_keys: None,
            created_at: Utc::now(),
            status: OperationStatus::Executed,
        }
    }

    /// Attach keys generated by an INSERT
    pub fn with_generated_keys(mut self, keys: Option<GeneratedKeys>) -> Self {
        self.generated_keys = keys;
        self
    }

    /// Whether the operation has a recovery path
    pub fn is_reversible(&self) -> bool {
        match &self.kind {
            StatementKind::Update { .. } | StatementKind::Delete { .. } => {
                self.snapshot_id.is_some() || self.affected_rows == 0
            }
            StatementKind::Insert { .. } => self
                .generated_keys
                .as_ref()
                .map_or(false, |keys| !keys.values.is_empty()),
            StatementKind::Select | StatementKind::Other => false,
        }
    }

    /// Whether the operation still stands
    pub fn is_executed(&self) -> bool {
        self.status == OperationStatus::Executed
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rowguard_sql::SqlValue;

    #[test]
    fn test_update_with_snapshot_is_reversible() {
        let op = Operation::new("wf", "execute", "UPDATE t SET a = 1 WHERE id = 2", 1, Some("snap".into()));
        assert!(op.is_reversible());
        assert!(op.is_executed());
        assert_eq!(op.kind.label(), "UPDATE");
    }

    #[test]
    fn test_update_without_snapshot_needs_zero_rows() {
        let empty = Operation::new("wf", "execute", "UPDATE t SET a = 1 WHERE 0", 0, None);
        assert!(empty.is_reversible());

        let lost = Operation::new("wf", "execute", "DELETE FROM t", 5, None);
        assert!(!lost.is_reversible());
    }

    #[test]
    fn test_insert_needs_generated_keys() {
        let op = Operation::new("wf", "execute", "INSERT INTO t (a) VALUES (1)", 1, None);
        assert!(!op.is_reversible());

        let op = op.with_generated_keys(Some(GeneratedKeys {
            column: "rowid".into(),
            values: vec![SqlValue::Integer(9)],
        }));
        assert!(op.is_reversible());
    }

    #[test]
    fn test_status_names() {
        assert_eq!("undone".parse::<OperationStatus>().unwrap(), OperationStatus::Undone);
        assert!("pending".parse::<OperationStatus>().is_err());
    }
}
