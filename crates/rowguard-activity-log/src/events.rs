//! Ledger events and workflow records

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

use crate::error::LedgerError;

/// Kind of a ledger event
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum LedgerEventKind {
    /// Workflow started
    #[serde(rename = "workflow_started")]
    WorkflowStarted,
    /// Workflow completed
    #[serde(rename = "workflow_completed")]
    WorkflowCompleted,
    /// Workflow cancelled
    #[serde(rename = "workflow_cancelled")]
    WorkflowCancelled,
    /// Workflow failed
    #[serde(rename = "workflow_failed")]
    WorkflowFailed,
    /// Step started
    #[serde(rename = "step_started")]
    StepStarted,
    /// Step produced a result
    #[serde(rename = "step_result_ready")]
    StepResultReady,
    /// Step result confirmed by the operator
    #[serde(rename = "step_confirmed")]
    StepConfirmed,
    /// Step corrected by the operator
    #[serde(rename = "step_corrected")]
    StepCorrected,
    /// Step skipped
    #[serde(rename = "step_skipped")]
    StepSkipped,
    /// Operator stepped back from a step
    #[serde(rename = "step_rolled_back")]
    StepRolledBack,
    /// A mutating statement ran
    #[serde(rename = "sql_executed")]
    SqlExecuted,
    /// Data was restored by an undo
    #[serde(rename = "data_rolled_back")]
    DataRolledBack,
}

impl LedgerEventKind {
    /// Every kind, in declaration order
    pub const ALL: [LedgerEventKind; 12] = [
        LedgerEventKind::WorkflowStarted,
        LedgerEventKind::WorkflowCompleted,
        LedgerEventKind::WorkflowCancelled,
        LedgerEventKind::WorkflowFailed,
        LedgerEventKind::StepStarted,
        LedgerEventKind::StepResultReady,
        LedgerEventKind::StepConfirmed,
        LedgerEventKind::StepCorrected,
        LedgerEventKind::StepSkipped,
        LedgerEventKind::StepRolledBack,
        LedgerEventKind::SqlExecuted,
        LedgerEventKind::DataRolledBack,
    ];

    /// Stable storage name
    pub fn as_str(&self) -> &'static str {
        match self {
            LedgerEventKind::WorkflowStarted => "workflow_started",
            LedgerEventKind::WorkflowCompleted => "workflow_completed",
            LedgerEventKind::WorkflowCancelled => "workflow_cancelled",
            LedgerEventKind::WorkflowFailed => "workflow_failed",
            LedgerEventKind::StepStarted => "step_started",
            LedgerEventKind::StepResultReady => "step_result_ready",
            LedgerEventKind::StepConfirmed => "step_confirmed",
            LedgerEventKind::StepCorrected => "step_corrected",
            LedgerEventKind::StepSkipped => "step_skipped",
            LedgerEventKind::StepRolledBack => "step_rolled_back",
            LedgerEventKind::SqlExecuted => "sql_executed",
            LedgerEventKind::DataRolledBack => "data_rolled_back",
        }
    }

    /// Terminal status this kind puts a workflow in, if any
    pub fn terminal_status(&self) -> Option<RecordStatus> {
        match self {
            LedgerEventKind::WorkflowCompleted => Some(RecordStatus::Completed),
            LedgerEventKind::WorkflowCancelled => Some(RecordStatus::Cancelled),
            LedgerEventKind::WorkflowFailed => Some(RecordStatus::Failed),
            _ => None,
        }
    }
}

impl fmt::Display for LedgerEventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for LedgerEventKind {
    type Err = LedgerError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        LedgerEventKind::ALL
            .iter()
            .copied()
            .find(|kind| kind.as_str() == s)
            .ok_or_else(|| LedgerError::invalid_record(format!("unknown event kind '{}'", s)))
    }
}

/// One entry of the audit trail
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LedgerEvent {
    /// Unique event ID
    pub id: String,
    /// Monotonic sequence number, assigned on append
    pub sequence: u64,
    /// Owning workflow
    pub workflow_id: String,
    /// Step the event belongs to, if any
    pub step_id: Option<String>,
    /// Event kind
    pub kind: LedgerEventKind,
    /// Free-text detail
    pub detail: String,
    /// Statement text for SQL events
    pub statement: Option<String>,
    /// Rows touched, for SQL events
    pub row_count: Option<u64>,
    /// When the event happened
    pub timestamp: DateTime<Utc>,
}

impl LedgerEvent {
    /// Create an event for a workflow
    pub fn new(workflow_id: impl Into<String>, kind: LedgerEventKind, detail: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            sequence: 0,
            workflow_id: workflow_id.into(),
            step_id: None,
            kind,
            detail: detail.into(),
            statement: None,
            row_count: None,
            timestamp: Utc::now(),
        }
    }

    /// Attach a step id
    pub fn with_step(mut self, step_id: impl Into<String>) -> Self {
        self.step_id = Some(step_id.into());
        self
    }

    /// Attach statement text
    pub fn with_statement(mut self, statement: impl Into<String>) -> Self {
        self.statement = Some(statement.into());
        self
    }

    /// Attach a row count
    pub fn with_row_count(mut self, row_count: u64) -> Self {
        self.row_count = Some(row_count);
        self
    }
}

/// Lifecycle status as seen by the ledger
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecordStatus {
    /// Started and not yet ended
    Running,
    /// Completed normally
    Completed,
    /// Cancelled by the operator
    Cancelled,
    /// Stopped by an error
    Failed,
}

impl RecordStatus {
    /// Stable storage name
    pub fn as_str(&self) -> &'static str {
        match self {
            RecordStatus::Running => "running",
            RecordStatus::Completed => "completed",
            RecordStatus::Cancelled => "cancelled",
            RecordStatus::Failed => "failed",
        }
    }

    /// Whether the workflow has ended
    pub fn is_terminal(&self) -> bool {
        !matches!(self, RecordStatus::Running)
    }
}

impl FromStr for RecordStatus {
    type Err = LedgerError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "running" => Ok(RecordStatus::Running),
            "completed" => Ok(RecordStatus::Completed),
            "cancelled" => Ok(RecordStatus::Cancelled),
            "failed" => Ok(RecordStatus::Failed),
            other => Err(LedgerError::invalid_record(format!("unknown status '{}'", other))),
        }
    }
}

/// Summary of one workflow kept alongside its events
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkflowRecord {
    /// Workflow ID
    pub workflow_id: String,
    /// Template name ("query", "modify", "generate")
    pub workflow_type: String,
    /// Operator intent
    pub user_intent: String,
    /// Current status
    pub status: RecordStatus,
    /// Rows changed by executed statements
    pub affected_rows: u64,
    /// Start time
    pub started_at: DateTime<Utc>,
    /// End time, set once the workflow is terminal
    pub ended_at: Option<DateTime<Utc>>,
}

impl WorkflowRecord {
    /// Record for a freshly started workflow
    pub fn started(
        workflow_id: impl Into<String>,
        workflow_type: impl Into<String>,
        user_intent: impl Into<String>,
    ) -> Self {
        Self {
            workflow_id: workflow_id.into(),
            workflow_type: workflow_type.into(),
            user_intent: user_intent.into(),
            status: RecordStatus::Running,
            affected_rows: 0,
            started_at: Utc::now(),
            ended_at: None,
        }
    }

    /// Fold an event into the summary
    ///
    /// Returns true when the record changed.
    pub fn apply(&mut self, event: &LedgerEvent) -> bool {
        if let Some(status) = event.kind.terminal_status() {
            if self.status.is_terminal() {
                return false;
            }
            self.status = status;
            self.ended_at = Some(event.timestamp);
            return true;
        }

        if event.kind == LedgerEventKind::SqlExecuted {
            self.affected_rows += event.row_count.unwrap_or(0);
            return true;
        }

        false
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kind_names_round_trip() {
        for kind in LedgerEventKind::ALL {
            assert_eq!(kind.as_str().parse::<LedgerEventKind>().unwrap(), kind);
        }
        assert!("paused".parse::<LedgerEventKind>().is_err());
    }

    #[test]
    fn test_kind_serde_matches_storage_name() {
        let json = serde_json::to_string(&LedgerEventKind::SqlExecuted).unwrap();
        assert_eq!(json, "\"sql_executed\"");
    }

    #[test]
    fn test_event_builders() {
        let event = LedgerEvent::new("wf-1", LedgerEventKind::SqlExecuted, "ran update")
            .with_step("execute")
            .with_statement("UPDATE t SET a = 1")
            .with_row_count(3);

        assert_eq!(event.step_id.as_deref(), Some("execute"));
        assert_eq!(event.statement.as_deref(), Some("UPDATE t SET a = 1"));
        assert_eq!(event.row_count, Some(3));
        assert!(!event.id.is_empty());
    }

    #[test]
    fn test_record_applies_terminal_once() {
        let mut record = WorkflowRecord::started("wf-1", "modify", "raise attack");
        let done = LedgerEvent::new("wf-1", LedgerEventKind::WorkflowCompleted, "done");
        let failed = LedgerEvent::new("wf-1", LedgerEventKind::WorkflowFailed, "late");

        assert!(record.apply(&done));
        assert_eq!(record.status, RecordStatus::Completed);
        assert!(record.ended_at.is_some());

        assert!(!record.apply(&failed));
        assert_eq!(record.status, RecordStatus::Completed);
    }

    #[test]
    fn test_record_accumulates_rows() {
        let mut record = WorkflowRecord::started("wf-1", "modify", "x");
        record.apply(&LedgerEvent::new("wf-1", LedgerEventKind::SqlExecuted, "").with_row_count(42));
        record.apply(&LedgerEvent::new("wf-1", LedgerEventKind::SqlExecuted, "").with_row_count(8));
        assert_eq!(record.affected_rows, 50);
    }
}
