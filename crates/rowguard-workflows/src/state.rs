//! Workflow state machine
//!
//! Created → Running ⇄ Waiting → {Completed | Cancelled | Failed}. Every transition that
//! matters for audit writes one ledger event. Once terminal, every mutator returns
//! [`WorkflowError::Ended`].

use chrono::Utc;
use rowguard_activity_log::Ledger;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::debug;

use crate::error::{WorkflowError, WorkflowResult};
use crate::models::{Correction, StepDefinition, StepResult, WorkflowState, WorkflowStatus};
use crate::step::{ExecutionLog, Step};

/// Owns one workflow's state and applies transitions to it
pub struct WorkflowMachine {
    state: WorkflowState,
    steps: Vec<Step>,
    ledger: Arc<Ledger>,
}

impl WorkflowMachine {
    /// Create a machine in the Created status
    pub fn new(
        id: impl Into<String>,
        workflow_type: impl Into<String>,
        user_intent: impl Into<String>,
        context: serde_json::Value,
        steps: Vec<Step>,
        ledger: Arc<Ledger>,
    ) -> WorkflowResult<Self> {
        if steps.is_empty() {
            return Err(WorkflowError::invalid("a workflow needs at least one step"));
        }
        let mut seen = std::collections::HashSet::new();
        for step in &steps {
            if !seen.insert(step.definition.id.as_str()) {
                return Err(WorkflowError::invalid(format!(
                    "duplicate step id: {}",
                    step.definition.id
                )));
            }
        }

        let state = WorkflowState {
            id: id.into(),
            workflow_type: workflow_type.into(),
            user_intent: user_intent.into(),
            context,
            status: WorkflowStatus::Created,
            current_step: 0,
            affected_rows: 0,
            started_at: Utc::now(),
            ended_at: None,
            steps: steps.iter().map(|s| s.definition.clone()).collect(),
            results: HashMap::new(),
            pending: None,
            corrections: Vec::new(),
            operation_ids: Vec::new(),
            snapshot_ids: Vec::new(),
        };
        Ok(Self {
            state,
            steps,
            ledger,
        })
    }

    /// Read-only view of the state
    pub fn state(&self) -> &WorkflowState {
        &self.state
    }

    /// Workflow identifier
    pub fn id(&self) -> &str {
        &self.state.id
    }

    /// The step at the current index
    pub fn current_step(&self) -> &Step {
        &self.steps[self.state.current_step]
    }

    /// Definition of the step at the current index
    pub fn current_definition(&self) -> &StepDefinition {
        &self.current_step().definition
    }

    fn ensure_active(&self) -> WorkflowResult<()> {
        if self.state.is_terminal() {
            return Err(WorkflowError::Ended(self.state.id.clone()));
        }
        if self.state.status == WorkflowStatus::Created {
            return Err(WorkflowError::NotStarted(self.state.id.clone()));
        }
        Ok(())
    }

    /// Move from Created to Running and register with the ledger
    pub async fn start(&mut self) -> WorkflowResult<()> {
        if self.state.status != WorkflowStatus::Created {
            return Err(WorkflowError::Ended(self.state.id.clone()));
        }
        self.state.status = WorkflowStatus::Running;
        self.state.started_at = Utc::now();
        self.ledger
            .begin_workflow(&self.state.id, &self.state.workflow_type, &self.state.user_intent)
            .await;
        Ok(())
    }

    /// Record that the current step is about to run
    pub async fn begin_step(&mut self) -> WorkflowResult<()> {
        self.ensure_active()?;
        self.state.status = WorkflowStatus::Running;
        let step = self.current_definition().clone();
        self.ledger
            .log_step_started(&self.state.id, &step.id, &step.name)
            .await;
        Ok(())
    }

    /// Move to the next step, clearing any pending result
    ///
    /// Returns `false` at the last step, where nothing changes.
    pub fn advance(&mut self) -> WorkflowResult<bool> {
        self.ensure_active()?;
        if self.state.is_last_step() {
            return Ok(false);
        }
        self.state.current_step += 1;
        self.state.pending = None;
        debug!(workflow_id = %self.state.id, step = self.state.current_step, "advanced");
        Ok(true)
    }

    /// Move to the previous step
    ///
    /// Returns `false` at step 0. Stepping back onto an Execute step that already ran is
    /// refused; reversal goes through undo.
    pub async fn retreat(&mut self) -> WorkflowResult<bool> {
        self.ensure_active()?;
        if self.state.current_step == 0 {
            return Ok(false);
        }
        let target = &self.state.steps[self.state.current_step - 1];
        if self.state.has_executed(&target.id) {
            return Err(WorkflowError::AlreadyExecuted(target.id.clone()));
        }

        let left = self.current_definition().id.clone();
        self.state.current_step -= 1;
        self.state.pending = None;
        self.state.status = WorkflowStatus::Running;

        let target_id = self.current_definition().id.clone();
        if let Some(previous) = self.state.results.remove(&target_id) {
            self.state.affected_rows = self.state.affected_rows.saturating_sub(previous.affected_rows);
        }
        self.ledger
            .log_step_rolled_back(
                &self.state.id,
                &left,
                &format!("Stepped back to '{}'", target_id),
            )
            .await;
        Ok(true)
    }

    /// Store a result that waits for confirmation
    pub async fn set_pending(&mut self, result: StepResult) -> WorkflowResult<()> {
        self.ensure_active()?;
        let step_id = self.current_definition().id.clone();
        self.ledger
            .log_step_result_ready(&self.state.id, &step_id, &result.message)
            .await;
        self.state.pending = Some(result);
        self.state.status = WorkflowStatus::Waiting;
        Ok(())
    }

    /// Save a result against the current step
    pub async fn commit(&mut self, result: StepResult) -> WorkflowResult<()> {
        self.ensure_active()?;
        let step_id = self.current_definition().id.clone();
        self.ledger
            .log_step_result_ready(&self.state.id, &step_id, &result.message)
            .await;
        self.save(step_id, result);
        Ok(())
    }

    fn save(&mut self, step_id: String, result: StepResult) {
        self.state.affected_rows += result.affected_rows;
        if let Some(replaced) = self.state.results.insert(step_id, result) {
            self.state.affected_rows = self.state.affected_rows.saturating_sub(replaced.affected_rows);
        }
        self.state.pending = None;
        self.state.status = WorkflowStatus::Running;
    }

    /// Commit the pending result
    pub async fn confirm_pending(&mut self) -> WorkflowResult<StepResult> {
        self.ensure_active()?;
        let result = self.state.pending.take().ok_or(WorkflowError::NothingPending)?;
        let step_id = self.current_definition().id.clone();
        self.save(step_id.clone(), result.clone());
        self.ledger.log_step_confirmed(&self.state.id, &step_id).await;
        Ok(result)
    }

    /// Skip the current step
    ///
    /// A non-skippable step leaves the state untouched. Returns whether the machine moved
    /// to a following step.
    pub async fn skip(&mut self) -> WorkflowResult<bool> {
        self.ensure_active()?;
        let step = self.current_definition().clone();
        if !step.skippable {
            return Err(WorkflowError::NotSkippable(step.id));
        }
        self.save(step.id.clone(), StepResult::success(format!("Skipped '{}'", step.name)));
        self.ledger.log_step_skipped(&self.state.id, &step.id).await;
        self.advance()
    }

    /// Append a correction for the current step
    pub async fn record_correction(&mut self, text: &str) -> WorkflowResult<Correction> {
        self.ensure_active()?;
        let text = text.trim();
        if text.is_empty() {
            return Err(WorkflowError::BlankCorrection);
        }
        let correction = Correction {
            step_id: self.current_definition().id.clone(),
            text: text.to_string(),
            created_at: Utc::now(),
        };
        self.state.corrections.push(correction.clone());
        self.state.pending = None;
        self.ledger
            .log_step_corrected(&self.state.id, &correction.step_id, text)
            .await;
        Ok(correction)
    }

    /// Link mutations made by a step run to the workflow
    pub fn link_execution(&mut self, log: ExecutionLog) {
        self.state.operation_ids.extend(log.operation_ids);
        self.state.snapshot_ids.extend(log.snapshot_ids);
    }

    fn finish(&mut self, status: WorkflowStatus) -> WorkflowResult<()> {
        if self.state.is_terminal() {
            return Err(WorkflowError::Ended(self.state.id.clone()));
        }
        self.state.status = status;
        self.state.ended_at = Some(Utc::now());
        self.state.pending = None;
        Ok(())
    }

    /// Mark the workflow Completed
    pub async fn mark_completed(&mut self) -> WorkflowResult<()> {
        self.finish(WorkflowStatus::Completed)?;
        self.ledger
            .log_workflow_completed(&self.state.id, self.state.affected_rows)
            .await;
        Ok(())
    }

    /// Mark the workflow Cancelled
    pub async fn mark_cancelled(&mut self, reason: &str) -> WorkflowResult<()> {
        self.finish(WorkflowStatus::Cancelled)?;
        self.ledger.log_workflow_cancelled(&self.state.id, reason).await;
        Ok(())
    }

    /// Mark the workflow Failed
    pub async fn mark_failed(&mut self, reason: &str) -> WorkflowResult<()> {
        self.finish(WorkflowStatus::Failed)?;
        self.ledger.log_workflow_failed(&self.state.id, reason).await;
        Ok(())
    }
}
