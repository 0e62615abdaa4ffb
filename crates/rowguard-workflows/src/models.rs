//! Core data models for workflows

use chrono::{DateTime, Utc};
use rowguard_sql::{changed_columns, Row};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::fmt;

/// Kind of work a step performs
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepType {
    /// Interpret the user's intent
    Understand,
    /// Narrow down the affected rows
    Filter,
    /// Show rows without changing anything
    Preview,
    /// Show before/after values side by side
    Compare,
    /// Final go-ahead before data changes
    Confirm,
    /// Run the mutating statement
    Execute,
    /// Check the data after the change
    Validate,
}

impl StepType {
    /// Get the string representation
    pub fn as_str(&self) -> &'static str {
        match self {
            StepType::Understand => "understand",
            StepType::Filter => "filter",
            StepType::Preview => "preview",
            StepType::Compare => "compare",
            StepType::Confirm => "confirm",
            StepType::Execute => "execute",
            StepType::Validate => "validate",
        }
    }

    /// Step types whose result always needs an explicit confirm
    pub fn always_confirms(&self) -> bool {
        matches!(
            self,
            StepType::Understand | StepType::Compare | StepType::Confirm
        )
    }

    /// Whether steps of this type may change data
    pub fn may_mutate(&self) -> bool {
        matches!(self, StepType::Execute)
    }
}

impl fmt::Display for StepType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Immutable description of one step
///
/// Construction enforces the type rules: Execute steps never require confirmation and
/// are never skippable; Understand, Compare and Confirm steps always require confirmation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StepDefinition {
    /// Step identifier, unique within a workflow
    pub id: String,
    /// Display name
    pub name: String,
    /// Longer description
    pub description: String,
    /// Step type
    pub step_type: StepType,
    /// Whether the user may skip the step
    pub skippable: bool,
    /// Whether the result waits for a confirm
    pub requires_confirmation: bool,
}

impl StepDefinition {
    /// Create a step with the defaults of its type
    pub fn new(id: impl Into<String>, name: impl Into<String>, step_type: StepType) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            description: String::new(),
            step_type,
            skippable: false,
            requires_confirmation: step_type.always_confirms(),
        }
        .normalized()
    }

    /// Set the description
    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    /// Allow or forbid skipping
    pub fn skippable(mut self, skippable: bool) -> Self {
        self.skippable = skippable;
        self.normalized()
    }

    /// Require or waive confirmation
    pub fn requires_confirmation(mut self, required: bool) -> Self {
        self.requires_confirmation = required;
        self.normalized()
    }

    fn normalized(mut self) -> Self {
        if self.step_type == StepType::Execute {
            self.skippable = false;
            self.requires_confirmation = false;
        } else if self.step_type.always_confirms() {
            self.requires_confirmation = true;
        }
        self
    }
}

/// Outcome status of one step run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepStatus {
    /// Step finished
    Success,
    /// Step finished with some rows left out
    Partial,
    /// Step failed
    Failed,
    /// Step produced a result that still needs a decision
    Pending,
    /// Step was cancelled
    Cancelled,
}

/// Before and after images of the rows a change touches
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct ChangeSet {
    /// Rows as they are now
    pub before: Vec<Row>,
    /// Rows as they would be after the change
    pub after: Vec<Row>,
    /// Columns whose values differ in at least one row pair
    pub changed_columns: Vec<String>,
}

impl ChangeSet {
    /// Pair rows by position and collect the changed columns
    pub fn new(before: Vec<Row>, after: Vec<Row>) -> Self {
        let mut columns: Vec<String> = Vec::new();
        for (old, new) in before.iter().zip(after.iter()) {
            for column in changed_columns(old, new) {
                if !columns.contains(&column) {
                    columns.push(column);
                }
            }
        }
        Self {
            before,
            after,
            changed_columns: columns,
        }
    }

    /// Number of row pairs
    pub fn len(&self) -> usize {
        self.before.len().max(self.after.len())
    }

    /// Whether the change set holds no rows
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Outcome of one step execution
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StepResult {
    /// Outcome status
    pub status: StepStatus,
    /// Summary shown to the user
    pub message: String,
    /// Rows returned by a query
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rows: Option<Vec<Row>>,
    /// Before/after comparison
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub changes: Option<ChangeSet>,
    /// Structured reading of the user's intent
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parsed_intent: Option<serde_json::Value>,
    /// Generated statement text
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub statement: Option<String>,
    /// Parsed filter conditions, column to condition
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub conditions: Option<BTreeMap<String, String>>,
    /// Row indices the user kept
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub confirmed_rows: Option<Vec<usize>>,
    /// Rows changed by this step
    #[serde(default)]
    pub affected_rows: u64,
}

impl StepResult {
    fn with_status(status: StepStatus, message: impl Into<String>) -> Self {
        Self {
            status,
            message: message.into(),
            rows: None,
            changes: None,
            parsed_intent: None,
            statement: None,
            conditions: None,
            confirmed_rows: None,
            affected_rows: 0,
        }
    }

    /// Successful result
    pub fn success(message: impl Into<String>) -> Self {
        Self::with_status(StepStatus::Success, message)
    }

    /// Partially successful result
    pub fn partial(message: impl Into<String>) -> Self {
        Self::with_status(StepStatus::Partial, message)
    }

    /// Failed result
    pub fn failed(message: impl Into<String>) -> Self {
        Self::with_status(StepStatus::Failed, message)
    }

    /// Result that still needs a decision
    pub fn pending(message: impl Into<String>) -> Self {
        Self::with_status(StepStatus::Pending, message)
    }

    /// Cancelled result
    pub fn cancelled(message: impl Into<String>) -> Self {
        Self::with_status(StepStatus::Cancelled, message)
    }

    /// Attach query rows
    pub fn with_rows(mut self, rows: Vec<Row>) -> Self {
        self.rows = Some(rows);
        self
    }

    /// Attach a before/after comparison
    pub fn with_changes(mut self, changes: ChangeSet) -> Self {
        self.changes = Some(changes);
        self
    }

    /// Attach the parsed intent
    pub fn with_intent(mut self, intent: serde_json::Value) -> Self {
        self.parsed_intent = Some(intent);
        self
    }

    /// Attach generated statement text
    pub fn with_statement(mut self, statement: impl Into<String>) -> Self {
        self.statement = Some(statement.into());
        self
    }

    /// Attach parsed conditions
    pub fn with_conditions(mut self, conditions: BTreeMap<String, String>) -> Self {
        self.conditions = Some(conditions);
        self
    }

    /// Attach the row indices the user kept
    pub fn with_confirmed_rows(mut self, rows: Vec<usize>) -> Self {
        self.confirmed_rows = Some(rows);
        self
    }

    /// Set the affected-row count
    pub fn with_affected_rows(mut self, rows: u64) -> Self {
        self.affected_rows = rows;
        self
    }

    /// Whether the result stops the workflow
    pub fn is_failed(&self) -> bool {
        self.status == StepStatus::Failed
    }
}

/// Workflow lifecycle status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkflowStatus {
    /// Built but not started
    Created,
    /// A step is executing
    Running,
    /// A result is waiting for confirmation
    Waiting,
    /// Every step finished
    Completed,
    /// Stopped by the user
    Cancelled,
    /// Stopped by a step failure
    Failed,
}

impl WorkflowStatus {
    /// Whether no further transitions are accepted
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            WorkflowStatus::Completed | WorkflowStatus::Cancelled | WorkflowStatus::Failed
        )
    }
}

/// A user amendment to one step
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Correction {
    /// Step the correction applies to
    pub step_id: String,
    /// Natural-language amendment
    pub text: String,
    /// When it was given
    pub created_at: DateTime<Utc>,
}

/// Full state of one workflow
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkflowState {
    /// Workflow identifier
    pub id: String,
    /// Template name
    pub workflow_type: String,
    /// What the user asked for
    pub user_intent: String,
    /// Opaque caller context handed to every step
    pub context: serde_json::Value,
    /// Lifecycle status
    pub status: WorkflowStatus,
    /// Index into `steps`
    pub current_step: usize,
    /// Rows changed so far
    pub affected_rows: u64,
    /// Start time
    pub started_at: DateTime<Utc>,
    /// End time, set once the status is terminal
    pub ended_at: Option<DateTime<Utc>>,
    /// Step sequence, fixed at creation
    pub steps: Vec<StepDefinition>,
    /// Saved results by step id
    pub results: HashMap<String, StepResult>,
    /// Result of the current step waiting for confirmation
    pub pending: Option<StepResult>,
    /// Corrections in the order they were given
    pub corrections: Vec<Correction>,
    /// Operations recorded by Execute steps
    pub operation_ids: Vec<String>,
    /// Snapshots captured by Execute steps
    pub snapshot_ids: Vec<String>,
}

impl WorkflowState {
    /// Definition of the current step
    pub fn current(&self) -> Option<&StepDefinition> {
        self.steps.get(self.current_step)
    }

    /// Whether the workflow reached a terminal status
    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    /// Whether the current step is the last one
    pub fn is_last_step(&self) -> bool {
        self.current_step + 1 >= self.steps.len()
    }

    /// The latest correction for a step
    pub fn current_correction(&self, step_id: &str) -> Option<&Correction> {
        self.corrections.iter().rev().find(|c| c.step_id == step_id)
    }

    /// Whether an Execute step already ran
    pub fn has_executed(&self, step_id: &str) -> bool {
        self.steps
            .iter()
            .any(|s| s.id == step_id && s.step_type == StepType::Execute)
            && self.results.contains_key(step_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rowguard_sql::SqlValue;

    #[test]
    fn test_execute_steps_normalized() {
        let step = StepDefinition::new("run", "Run", StepType::Execute)
            .skippable(true)
            .requires_confirmation(true);
        assert!(!step.skippable);
        assert!(!step.requires_confirmation);
    }

    #[test]
    fn test_confirming_types_always_confirm() {
        for step_type in [StepType::Understand, StepType::Compare, StepType::Confirm] {
            let step = StepDefinition::new("s", "S", step_type).requires_confirmation(false);
            assert!(step.requires_confirmation, "{}", step_type);
        }
        let filter = StepDefinition::new("f", "F", StepType::Filter);
        assert!(!filter.requires_confirmation);
    }

    #[test]
    fn test_change_set_collects_columns() {
        let mut before = Row::new();
        before.insert("id".into(), SqlValue::Integer(1));
        before.insert("attack".into(), SqlValue::Real(10.0));
        let mut after = before.clone();
        after.insert("attack".into(), SqlValue::Real(11.0));

        let changes = ChangeSet::new(vec![before.clone(), before], vec![after.clone(), after]);
        assert_eq!(changes.changed_columns, vec!["attack".to_string()]);
        assert_eq!(changes.len(), 2);
    }

    #[test]
    fn test_result_builders() {
        let result = StepResult::success("done")
            .with_statement("UPDATE units SET attack = 1")
            .with_affected_rows(3);
        assert_eq!(result.status, StepStatus::Success);
        assert_eq!(result.affected_rows, 3);
        assert!(!result.is_failed());
        assert!(StepResult::failed("x").is_failed());
    }

    #[test]
    fn test_terminal_statuses() {
        assert!(WorkflowStatus::Completed.is_terminal());
        assert!(WorkflowStatus::Failed.is_terminal());
        assert!(!WorkflowStatus::Waiting.is_terminal());
        assert!(!WorkflowStatus::Created.is_terminal());
    }
}
