//! Error types for workflow operations

use rowguard_activity_log::LedgerError;
use rowguard_config::ConfigError;
use rowguard_sql::SqlError;
use rowguard_undo::UndoError;
use thiserror::Error;

/// Errors raised by workflow transitions and step execution
#[derive(Debug, Error)]
pub enum WorkflowError {
    /// The workflow reached a terminal status and accepts no further changes
    #[error("Workflow has ended: {0}")]
    Ended(String),

    /// The workflow has not been started yet
    #[error("Workflow not started: {0}")]
    NotStarted(String),

    /// Invalid workflow definition
    #[error("Invalid workflow: {0}")]
    Invalid(String),

    /// The current step cannot be skipped
    #[error("Step cannot be skipped: {0}")]
    NotSkippable(String),

    /// Confirm was called with no pending result
    #[error("No result is waiting for confirmation")]
    NothingPending,

    /// A correction with no content
    #[error("Correction text must not be blank")]
    BlankCorrection,

    /// Stepping back would re-run a step that already changed data
    #[error("Step already executed, use undo instead: {0}")]
    AlreadyExecuted(String),

    /// A mutation was attempted outside an Execute step run
    #[error("Mutation not allowed: {0}")]
    MutationNotAllowed(String),

    /// Step execution failed
    #[error("Step failed: {0}")]
    StepFailed(String),

    /// Relational access failed
    #[error("SQL error: {0}")]
    Sql(#[from] SqlError),

    /// Snapshot or undo bookkeeping failed
    #[error("Undo error: {0}")]
    Undo(#[from] UndoError),

    /// Serialization error
    #[error("Serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),
}

impl WorkflowError {
    /// Create a StepFailed error with context
    pub fn step_failed(msg: impl Into<String>) -> Self {
        Self::StepFailed(msg.into())
    }

    /// Create a MutationNotAllowed error with context
    pub fn mutation_not_allowed(msg: impl Into<String>) -> Self {
        Self::MutationNotAllowed(msg.into())
    }

    /// Create an Invalid error with context
    pub fn invalid(msg: impl Into<String>) -> Self {
        Self::Invalid(msg.into())
    }
}

/// Result type for workflow operations
pub type WorkflowResult<T> = Result<T, WorkflowError>;

/// Errors that cross the public engine surface
///
/// Only construction problems are reported this way. Control calls on a missing or
/// ended workflow come back as a failed `ControlResult` instead.
#[derive(Debug, Error)]
pub enum EngineError {
    /// No template is registered under the requested name
    #[error("Unknown workflow type: {0}")]
    UnknownWorkflowType(String),

    /// The engine was built without an executor provider
    #[error("No executor provider configured")]
    NoExecutorProvider,

    /// The provider has no executor for a template step
    #[error("No executor for step '{step_id}' of workflow type '{workflow_type}'")]
    MissingExecutor {
        /// Template name
        workflow_type: String,
        /// Step without an executor
        step_id: String,
    },

    /// The workflow could not be constructed
    #[error("Workflow error: {0}")]
    Workflow(#[from] WorkflowError),

    /// Settings rejected before any service was built
    #[error("Invalid configuration: {0}")]
    Config(#[from] ConfigError),

    /// Durable stores could not be opened or reloaded
    #[error("Bootstrap failed: {0}")]
    Bootstrap(String),
}

impl EngineError {
    /// Create a Bootstrap error with context
    pub fn bootstrap(msg: impl Into<String>) -> Self {
        Self::Bootstrap(msg.into())
    }
}

impl From<LedgerError> for EngineError {
    fn from(e: LedgerError) -> Self {
        Self::Bootstrap(e.to_string())
    }
}

impl From<UndoError> for EngineError {
    fn from(e: UndoError) -> Self {
        Self::Bootstrap(e.to_string())
    }
}

/// Result type for engine construction
pub type EngineResult<T> = Result<T, EngineError>;
