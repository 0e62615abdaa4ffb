//! Workflow orchestration engine
//!
//! The engine owns the current workflow and serializes control calls through an async
//! mutex. Each step runs as a future the engine awaits before applying the transition.
//! User-flow mistakes (no workflow, nothing to confirm, non-skippable step) are logged
//! and reported as a failed [`ControlResult`]; only `start` returns an error.

use futures::FutureExt;
use rowguard_activity_log::LedgerEvent;
use rowguard_undo::{UndoReport, WorkflowUndoReport};
use serde::{Deserialize, Serialize};
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::error::{EngineError, EngineResult, WorkflowError, WorkflowResult};
use crate::events::{EventBus, WorkflowEvent, WorkflowListener};
use crate::models::{StepStatus, StepType, WorkflowState, WorkflowStatus};
use crate::progress::StatusReport;
use crate::services::Services;
use crate::state::WorkflowMachine;
use crate::step::{Step, StepContext};
use crate::templates::{ExecutorProvider, TemplateRegistry};

/// Outcome of a control call
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ControlResult {
    /// Whether the call did what was asked
    pub success: bool,
    /// Human-readable outcome
    pub message: String,
    /// Workflow the call applied to
    pub workflow_id: Option<String>,
    /// Workflow status after the call
    pub status: Option<WorkflowStatus>,
    /// Current step after the call
    pub step_id: Option<String>,
}

impl ControlResult {
    fn new(success: bool, state: Option<&WorkflowState>, message: impl Into<String>) -> Self {
        Self {
            success,
            message: message.into(),
            workflow_id: state.map(|s| s.id.clone()),
            status: state.map(|s| s.status),
            step_id: state.and_then(|s| s.current()).map(|s| s.id.clone()),
        }
    }

    fn ok(machine: &WorkflowMachine, message: impl Into<String>) -> Self {
        Self::new(true, Some(machine.state()), message)
    }

    fn failed(machine: &WorkflowMachine, message: impl Into<String>) -> Self {
        Self::new(false, Some(machine.state()), message)
    }
}

/// Public control surface for confirmable workflows
pub struct WorkflowEngine {
    services: Services,
    templates: TemplateRegistry,
    provider: Option<Arc<dyn ExecutorProvider>>,
    events: EventBus,
    active: Mutex<Option<WorkflowMachine>>,
}

impl WorkflowEngine {
    /// Create an engine with the default templates and no executor provider
    pub fn new(services: Services) -> Self {
        Self {
            services,
            templates: TemplateRegistry::with_defaults(),
            provider: None,
            events: EventBus::new(),
            active: Mutex::new(None),
        }
    }

    /// Replace the template registry
    pub fn with_templates(mut self, templates: TemplateRegistry) -> Self {
        self.templates = templates;
        self
    }

    /// Set the executor provider
    pub fn with_provider(mut self, provider: Arc<dyn ExecutorProvider>) -> Self {
        self.provider = Some(provider);
        self
    }

    /// Register a lifecycle listener
    pub fn subscribe(&self, listener: Arc<dyn WorkflowListener>) {
        self.events.subscribe(listener);
    }

    /// Shared services
    pub fn services(&self) -> &Services {
        &self.services
    }

    /// Template registry
    pub fn templates(&self) -> &TemplateRegistry {
        &self.templates
    }

    /// Start a workflow of a registered type
    ///
    /// An unfinished workflow is cancelled first. The first step runs before this returns.
    pub async fn start(
        &self,
        workflow_type: &str,
        context: serde_json::Value,
        user_intent: &str,
    ) -> EngineResult<ControlResult> {
        let provider = self
            .provider
            .as_ref()
            .ok_or(EngineError::NoExecutorProvider)?;
        let definitions = self.templates.build(workflow_type)?;

        let mut steps = Vec::with_capacity(definitions.len());
        for definition in definitions {
            let executor = provider
                .executor_for(workflow_type, &definition)
                .ok_or_else(|| EngineError::MissingExecutor {
                    workflow_type: workflow_type.to_string(),
                    step_id: definition.id.clone(),
                })?;
            steps.push(Step::new(definition, executor));
        }

        let mut active = self.active.lock().await;
        if let Some(previous) = active.as_mut() {
            if !previous.state().is_terminal() {
                info!(workflow_id = %previous.id(), "Cancelling unfinished workflow");
                self.cancel_machine(previous, "Superseded by a new workflow").await;
            }
        }

        let mut machine = WorkflowMachine::new(
            Uuid::new_v4().to_string(),
            workflow_type,
            user_intent,
            context,
            steps,
            self.services.ledger.clone(),
        )?;
        machine.start().await?;
        info!(
            workflow_id = %machine.id(),
            workflow_type = %workflow_type,
            steps = machine.state().steps.len(),
            "Workflow started"
        );
        self.events.publish(WorkflowEvent::Started(machine.state()));

        let result = self.run_current(&mut machine).await;
        *active = Some(machine);
        Ok(result)
    }

    /// Accept the pending result and move on
    pub async fn confirm(&self) -> ControlResult {
        let mut active = self.active.lock().await;
        let machine = match Self::active_machine(&mut active, "confirm") {
            Ok(machine) => machine,
            Err(rejected) => return rejected,
        };

        if let Err(e) = machine.confirm_pending().await {
            return Self::rejected(machine, "confirm", e);
        }
        let step = machine.current_definition().clone();
        info!(workflow_id = %machine.id(), step_id = %step.id, "Step confirmed");
        self.events
            .publish(WorkflowEvent::Confirmed(machine.state(), &step));

        self.move_on(machine).await
    }

    /// Re-run the current step with a correction
    pub async fn correct(&self, text: &str) -> ControlResult {
        let mut active = self.active.lock().await;
        let machine = match Self::active_machine(&mut active, "correct") {
            Ok(machine) => machine,
            Err(rejected) => return rejected,
        };

        if machine.current_definition().step_type == StepType::Execute {
            return Self::rejected(
                machine,
                "correct",
                WorkflowError::AlreadyExecuted(machine.current_definition().id.clone()),
            );
        }
        let correction = match machine.record_correction(text).await {
            Ok(correction) => correction,
            Err(e) => return Self::rejected(machine, "correct", e),
        };
        info!(workflow_id = %machine.id(), step_id = %correction.step_id, "Step corrected");
        self.events
            .publish(WorkflowEvent::Corrected(machine.state(), &correction));

        self.run_current(machine).await
    }

    /// Skip the current step
    pub async fn skip(&self) -> ControlResult {
        let mut active = self.active.lock().await;
        let machine = match Self::active_machine(&mut active, "skip") {
            Ok(machine) => machine,
            Err(rejected) => return rejected,
        };

        let step = machine.current_definition().clone();
        let advanced = match machine.skip().await {
            Ok(advanced) => advanced,
            Err(e) => return Self::rejected(machine, "skip", e),
        };
        info!(workflow_id = %machine.id(), step_id = %step.id, "Step skipped");
        self.events
            .publish(WorkflowEvent::Skipped(machine.state(), &step));

        if advanced {
            self.run_current(machine).await
        } else {
            self.complete(machine).await
        }
    }

    /// Step back and re-run the previous step
    pub async fn previous(&self) -> ControlResult {
        let mut active = self.active.lock().await;
        let machine = match Self::active_machine(&mut active, "previous") {
            Ok(machine) => machine,
            Err(rejected) => return rejected,
        };

        match machine.retreat().await {
            Ok(true) => self.run_current(machine).await,
            Ok(false) => {
                warn!(workflow_id = %machine.id(), "Already at the first step");
                ControlResult::failed(machine, "Already at the first step")
            }
            Err(e) => Self::rejected(machine, "previous", e),
        }
    }

    /// Cancel the workflow without undoing executed operations
    pub async fn cancel(&self) -> ControlResult {
        let mut active = self.active.lock().await;
        let machine = match Self::active_machine(&mut active, "cancel") {
            Ok(machine) => machine,
            Err(rejected) => return rejected,
        };

        self.cancel_machine(machine, "Cancelled by user").await;
        ControlResult::ok(machine, "Workflow cancelled")
    }

    /// Whether a workflow is running or waiting
    pub async fn has_active_workflow(&self) -> bool {
        self.active
            .lock()
            .await
            .as_ref()
            .map(|m| !m.state().is_terminal())
            .unwrap_or(false)
    }

    /// Copy of the current (or last finished) workflow state
    pub async fn workflow(&self) -> Option<WorkflowState> {
        self.active.lock().await.as_ref().map(|m| m.state().clone())
    }

    /// Progress of the current workflow
    pub async fn progress(&self) -> Option<StatusReport> {
        self.active
            .lock()
            .await
            .as_ref()
            .map(|m| StatusReport::from_state(m.state()))
    }

    /// Audit timeline of the current workflow
    pub async fn timeline(&self) -> Vec<LedgerEvent> {
        match self.current_id().await {
            Some(id) => self.services.ledger.timeline(&id).await,
            None => Vec::new(),
        }
    }

    /// Undo the latest operation of the current workflow
    pub async fn undo_last(&self) -> Option<UndoReport> {
        let id = self.current_id().await?;
        Some(self.services.registry.undo_workflow_last(&id).await)
    }

    /// Undo every operation of the current workflow, newest first
    pub async fn rollback(&self) -> Option<WorkflowUndoReport> {
        let id = self.current_id().await?;
        let report = self.services.registry.undo_workflow_all(&id).await;
        if report.success {
            info!(workflow_id = %id, restored_rows = report.restored_rows, "Workflow rolled back");
        } else {
            warn!(
                workflow_id = %id,
                failures = report.failures.len(),
                remaining = report.remaining,
                "Workflow rollback incomplete"
            );
        }
        Some(report)
    }

    async fn current_id(&self) -> Option<String> {
        self.active.lock().await.as_ref().map(|m| m.id().to_string())
    }

    fn active_machine<'a>(
        active: &'a mut Option<WorkflowMachine>,
        action: &str,
    ) -> Result<&'a mut WorkflowMachine, ControlResult> {
        match active.as_mut() {
            None => {
                warn!(action = %action, "No active workflow");
                Err(ControlResult::new(false, None, "No active workflow"))
            }
            Some(machine) if machine.state().is_terminal() => {
                warn!(
                    workflow_id = %machine.id(),
                    action = %action,
                    status = ?machine.state().status,
                    "Workflow has ended"
                );
                Err(ControlResult::failed(machine, "Workflow has ended"))
            }
            Some(machine) => Ok(machine),
        }
    }

    fn rejected(machine: &WorkflowMachine, action: &str, e: WorkflowError) -> ControlResult {
        warn!(workflow_id = %machine.id(), action = %action, error = %e, "Control call rejected");
        ControlResult::failed(machine, e.to_string())
    }

    async fn move_on(&self, machine: &mut WorkflowMachine) -> ControlResult {
        match machine.advance() {
            Ok(true) => self.run_current(machine).await,
            Ok(false) => self.complete(machine).await,
            Err(e) => Self::rejected(machine, "advance", e),
        }
    }

    async fn run_current(&self, machine: &mut WorkflowMachine) -> ControlResult {
        match self.drive(machine).await {
            Ok(result) => result,
            Err(e) => Self::rejected(machine, "run", e),
        }
    }

    /// Run steps until one waits for confirmation or the workflow ends
    async fn drive(&self, machine: &mut WorkflowMachine) -> WorkflowResult<ControlResult> {
        loop {
            machine.begin_step().await?;
            let step = machine.current_step().clone();
            let definition = &step.definition;
            self.events
                .publish(WorkflowEvent::StepStarted(machine.state(), definition));

            let correction = machine
                .state()
                .current_correction(&definition.id)
                .map(|c| c.text.clone());
            let ctx = StepContext::new(
                machine.id(),
                machine.state().user_intent.as_str(),
                definition.clone(),
                machine.state().context.clone(),
                machine.state().results.clone(),
                self.services.clone(),
            );

            let outcome = AssertUnwindSafe(step.executor.execute(&ctx, correction.as_deref()))
                .catch_unwind()
                .await;
            let log = ctx.seal().await;
            let changed_rows = (!log.operation_ids.is_empty()).then_some(log.affected_rows);
            machine.link_execution(log);

            let mut result = match outcome {
                Ok(Ok(result)) => result,
                Ok(Err(e)) => {
                    return Ok(self
                        .fail(machine, &format!("Step '{}' failed: {}", definition.id, e))
                        .await)
                }
                Err(_) => {
                    return Ok(self
                        .fail(machine, &format!("Step '{}' panicked", definition.id))
                        .await)
                }
            };

            match result.status {
                StepStatus::Failed => {
                    return Ok(self
                        .fail(
                            machine,
                            &format!("Step '{}' failed: {}", definition.id, result.message),
                        )
                        .await)
                }
                StepStatus::Cancelled => {
                    self.cancel_machine(machine, &result.message).await;
                    return Ok(ControlResult::failed(
                        machine,
                        format!("Step '{}' cancelled the workflow", definition.id),
                    ));
                }
                _ => {}
            }
            // Statements run through the context are the authoritative row count
            if let Some(rows) = changed_rows {
                result.affected_rows = rows;
            }

            if definition.requires_confirmation {
                machine.set_pending(result.clone()).await?;
                self.events
                    .publish(WorkflowEvent::ResultReady(machine.state(), definition, &result));
                return Ok(ControlResult::ok(
                    machine,
                    format!("'{}' is waiting for confirmation", definition.name),
                ));
            }

            machine.commit(result.clone()).await?;
            self.events
                .publish(WorkflowEvent::ResultReady(machine.state(), definition, &result));
            if !machine.advance()? {
                return Ok(self.complete(machine).await);
            }
        }
    }

    async fn complete(&self, machine: &mut WorkflowMachine) -> ControlResult {
        if let Err(e) = machine.mark_completed().await {
            return Self::rejected(machine, "complete", e);
        }
        let rows = machine.state().affected_rows;
        info!(workflow_id = %machine.id(), affected_rows = rows, "Workflow completed");
        self.events.publish(WorkflowEvent::Completed(machine.state()));
        ControlResult::ok(
            machine,
            format!("Workflow completed, {} rows affected", rows),
        )
    }

    async fn fail(&self, machine: &mut WorkflowMachine, reason: &str) -> ControlResult {
        error!(workflow_id = %machine.id(), reason = %reason, "Workflow failed");
        if let Err(e) = machine.mark_failed(reason).await {
            return Self::rejected(machine, "fail", e);
        }
        self.events
            .publish(WorkflowEvent::Error(machine.state(), reason));
        ControlResult::failed(machine, reason)
    }

    async fn cancel_machine(&self, machine: &mut WorkflowMachine, reason: &str) {
        match machine.mark_cancelled(reason).await {
            Ok(()) => {
                info!(workflow_id = %machine.id(), reason = %reason, "Workflow cancelled");
                self.events.publish(WorkflowEvent::Cancelled(machine.state()));
            }
            Err(e) => {
                warn!(workflow_id = %machine.id(), error = %e, "Cancel rejected");
            }
        }
    }
}
