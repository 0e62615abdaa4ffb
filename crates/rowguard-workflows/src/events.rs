//! Lifecycle notifications for presentation and logging layers
//!
//! Delivery is best effort. A listener that panics is logged and skipped; the engine
//! carries on as if the callback had returned normally.

use parking_lot::RwLock;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;
use tracing::warn;

use crate::models::{Correction, StepDefinition, StepResult, WorkflowState};

/// Receives workflow lifecycle callbacks
///
/// Every method has an empty default body.
#[allow(unused_variables)]
pub trait WorkflowListener: Send + Sync {
    /// A workflow was started
    fn on_workflow_started(&self, state: &WorkflowState) {}

    /// A step is about to run
    fn on_step_started(&self, state: &WorkflowState, step: &StepDefinition) {}

    /// A step produced a result
    fn on_step_result_ready(&self, state: &WorkflowState, step: &StepDefinition, result: &StepResult) {}

    /// The user confirmed a step result
    fn on_step_confirmed(&self, state: &WorkflowState, step: &StepDefinition) {}

    /// The user corrected a step
    fn on_step_corrected(&self, state: &WorkflowState, correction: &Correction) {}

    /// The user skipped a step
    fn on_step_skipped(&self, state: &WorkflowState, step: &StepDefinition) {}

    /// Every step finished
    fn on_workflow_completed(&self, state: &WorkflowState) {}

    /// The workflow was cancelled
    fn on_workflow_cancelled(&self, state: &WorkflowState) {}

    /// A step failed and the workflow stopped
    fn on_workflow_error(&self, state: &WorkflowState, error: &str) {}
}

/// One lifecycle notification
#[derive(Debug, Clone, Copy)]
pub enum WorkflowEvent<'a> {
    /// See [`WorkflowListener::on_workflow_started`]
    Started(&'a WorkflowState),
    /// See [`WorkflowListener::on_step_started`]
    StepStarted(&'a WorkflowState, &'a StepDefinition),
    /// See [`WorkflowListener::on_step_result_ready`]
    ResultReady(&'a WorkflowState, &'a StepDefinition, &'a StepResult),
    /// See [`WorkflowListener::on_step_confirmed`]
    Confirmed(&'a WorkflowState, &'a StepDefinition),
    /// See [`WorkflowListener::on_step_corrected`]
    Corrected(&'a WorkflowState, &'a Correction),
    /// See [`WorkflowListener::on_step_skipped`]
    Skipped(&'a WorkflowState, &'a StepDefinition),
    /// See [`WorkflowListener::on_workflow_completed`]
    Completed(&'a WorkflowState),
    /// See [`WorkflowListener::on_workflow_cancelled`]
    Cancelled(&'a WorkflowState),
    /// See [`WorkflowListener::on_workflow_error`]
    Error(&'a WorkflowState, &'a str),
}

impl WorkflowEvent<'_> {
    /// Short name for logs
    pub fn name(&self) -> &'static str {
        match self {
            WorkflowEvent::Started(_) => "started",
            WorkflowEvent::StepStarted(..) => "step_started",
            WorkflowEvent::ResultReady(..) => "result_ready",
            WorkflowEvent::Confirmed(..) => "confirmed",
            WorkflowEvent::Corrected(..) => "corrected",
            WorkflowEvent::Skipped(..) => "skipped",
            WorkflowEvent::Completed(_) => "completed",
            WorkflowEvent::Cancelled(_) => "cancelled",
            WorkflowEvent::Error(..) => "error",
        }
    }

    fn deliver(&self, listener: &dyn WorkflowListener) {
        match *self {
            WorkflowEvent::Started(state) => listener.on_workflow_started(state),
            WorkflowEvent::StepStarted(state, step) => listener.on_step_started(state, step),
            WorkflowEvent::ResultReady(state, step, result) => {
                listener.on_step_result_ready(state, step, result)
            }
            WorkflowEvent::Confirmed(state, step) => listener.on_step_confirmed(state, step),
            WorkflowEvent::Corrected(state, correction) => {
                listener.on_step_corrected(state, correction)
            }
            WorkflowEvent::Skipped(state, step) => listener.on_step_skipped(state, step),
            WorkflowEvent::Completed(state) => listener.on_workflow_completed(state),
            WorkflowEvent::Cancelled(state) => listener.on_workflow_cancelled(state),
            WorkflowEvent::Error(state, error) => listener.on_workflow_error(state, error),
        }
    }
}

/// Fan-out of lifecycle events to registered listeners
#[derive(Default)]
pub struct EventBus {
    listeners: RwLock<Vec<Arc<dyn WorkflowListener>>>,
}

impl EventBus {
    /// Create an empty bus
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a listener
    pub fn subscribe(&self, listener: Arc<dyn WorkflowListener>) {
        self.listeners.write().push(listener);
    }

    /// Number of registered listeners
    pub fn len(&self) -> usize {
        self.listeners.read().len()
    }

    /// Whether no listener is registered
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Deliver an event to every listener, returning how many panicked
    pub fn publish(&self, event: WorkflowEvent<'_>) -> usize {
        let listeners = self.listeners.read().clone();
        let mut panicked = 0;
        for listener in listeners {
            if catch_unwind(AssertUnwindSafe(|| event.deliver(listener.as_ref()))).is_err() {
                panicked += 1;
                warn!(event = event.name(), "workflow listener panicked");
            }
        }
        panicked
    }
}
