#![warn(missing_docs)]

//! Rowguard Workflows
//!
//! Confirmable multi-step workflows that turn a user's intent into data changes with a
//! guaranteed recovery path. Each step is confirmed, corrected, skipped or stepped back
//! by the user; every mutating statement is snapshotted, recorded for undo and audited.
//!
//! ```no_run
//! use rowguard_config::RowguardConfig;
//! use rowguard_sql::SqliteGateway;
//! use rowguard_workflows::{ExecutorMap, Services, WorkflowEngine};
//! use std::sync::Arc;
//!
//! # async fn run(executors: ExecutorMap) -> Result<(), Box<dyn std::error::Error>> {
//! let gateway = Arc::new(SqliteGateway::open_in_memory()?);
//! let services = Services::bootstrap(RowguardConfig::default(), gateway).await?;
//! let engine = WorkflowEngine::new(services).with_provider(Arc::new(executors));
//!
//! let started = engine
//!     .start("modify", serde_json::json!({"table": "units"}), "raise attack by 10%")
//!     .await?;
//! println!("{}", started.message);
//! engine.confirm().await;
//! # Ok(())
//! # }
//! ```

pub mod engine;
pub mod error;
pub mod events;
pub mod models;
pub mod progress;
pub mod services;
pub mod state;
pub mod step;
pub mod templates;

#[cfg(test)]
mod engine_properties;

pub use engine::{ControlResult, WorkflowEngine};
pub use error::{EngineError, EngineResult, WorkflowError, WorkflowResult};
pub use events::{EventBus, WorkflowEvent, WorkflowListener};
pub use models::{
    ChangeSet, Correction, StepDefinition, StepResult, StepStatus, StepType, WorkflowState,
    WorkflowStatus,
};
pub use progress::{calculate_progress, StatusReport};
pub use services::Services;
pub use state::WorkflowMachine;
pub use step::{ExecutionLog, FnExecutor, Step, StepContext, StepExecutor};
pub use templates::{
    generate_template, modify_template, query_template, ExecutorMap, ExecutorProvider,
    TemplateFactory, TemplateRegistry,
};
