//! Progress reporting for a running workflow

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::models::{WorkflowState, WorkflowStatus};

/// Status report for a workflow
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusReport {
    /// Workflow identifier
    pub workflow_id: String,
    /// Workflow status
    pub workflow_status: WorkflowStatus,
    /// Current step ID
    pub current_step: Option<String>,
    /// One-based position of the current step
    pub step_number: usize,
    /// Total steps in workflow
    pub total_steps: usize,
    /// Number of steps with a saved result
    pub completed_steps_count: usize,
    /// Progress percentage (0-100)
    pub progress_percentage: u32,
    /// Rows changed so far
    pub affected_rows: u64,
    /// Whether a result waits for confirmation
    pub awaiting_confirmation: bool,
}

/// Calculate progress percentage (0-100)
pub fn calculate_progress(completed_steps: usize, total_steps: usize) -> u32 {
    if total_steps == 0 {
        return 0;
    }
    ((completed_steps * 100 / total_steps) as u32).min(100)
}

impl StatusReport {
    /// Build a report from workflow state
    pub fn from_state(state: &WorkflowState) -> Self {
        let total_steps = state.steps.len();
        let completed_steps_count = state.results.len().min(total_steps);
        let progress_percentage = if state.status == WorkflowStatus::Completed {
            100
        } else {
            calculate_progress(completed_steps_count, total_steps)
        };

        Self {
            workflow_id: state.id.clone(),
            workflow_status: state.status,
            current_step: state.current().map(|s| s.id.clone()),
            step_number: (state.current_step + 1).min(total_steps),
            total_steps,
            completed_steps_count,
            progress_percentage,
            affected_rows: state.affected_rows,
            awaiting_confirmation: state.pending.is_some(),
        }
    }
}

impl fmt::Display for StatusReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Step {}/{} ({}%), status {:?}",
            self.step_number, self.total_steps, self.progress_percentage, self.workflow_status
        )?;
        if let Some(step) = &self.current_step {
            write!(f, ", current step '{}'", step)?;
        }
        if self.awaiting_confirmation {
            write!(f, ", awaiting confirmation")?;
        }
        Ok(())
    }
}
