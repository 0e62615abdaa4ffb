//! Steps, their executors and the context they run in
//!
//! An executor is an async function of the step context and an optional correction.
//! Every step may read through [`StepContext::query`]. Only an Execute step may change
//! data, through [`StepContext::execute`], and only while its own run is in progress:
//! the engine seals the context as soon as the executor returns. Sealing waits for
//! statements already running so each one is linked to the workflow.

use async_trait::async_trait;
use parking_lot::Mutex;
use rowguard_sql::{ExecutionOutcome, Row, SqlError, StatementKind};
use rowguard_undo::Operation;
use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use tokio::sync::Notify;
use tracing::{info, warn};

use crate::error::{WorkflowError, WorkflowResult};
use crate::models::{StepDefinition, StepResult};
use crate::services::Services;

/// Async body of a step
#[async_trait]
pub trait StepExecutor: Send + Sync {
    /// Run the step, taking the latest correction into account when one is given
    async fn execute(&self, ctx: &StepContext, correction: Option<&str>) -> WorkflowResult<StepResult>;
}

/// Executor backed by a closure returning a future
pub struct FnExecutor<F> {
    func: F,
}

impl<F, Fut> FnExecutor<F>
where
    F: Fn(StepContext, Option<String>) -> Fut + Send + Sync,
    Fut: Future<Output = WorkflowResult<StepResult>> + Send + 'static,
{
    /// Wrap a closure
    pub fn new(func: F) -> Self {
        Self { func }
    }
}

#[async_trait]
impl<F, Fut> StepExecutor for FnExecutor<F>
where
    F: Fn(StepContext, Option<String>) -> Fut + Send + Sync,
    Fut: Future<Output = WorkflowResult<StepResult>> + Send + 'static,
{
    async fn execute(&self, ctx: &StepContext, correction: Option<&str>) -> WorkflowResult<StepResult> {
        (self.func)(ctx.clone(), correction.map(str::to_string)).await
    }
}

/// A step definition bound to its executor
#[derive(Clone)]
pub struct Step {
    /// What the step is
    pub definition: StepDefinition,
    /// How it runs
    pub executor: Arc<dyn StepExecutor>,
}

impl Step {
    /// Bind a definition to an executor
    pub fn new(definition: StepDefinition, executor: Arc<dyn StepExecutor>) -> Self {
        Self {
            definition,
            executor,
        }
    }
}

impl std::fmt::Debug for Step {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Step")
            .field("definition", &self.definition)
            .finish_non_exhaustive()
    }
}

/// Mutations made during one step run
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExecutionLog {
    /// Operations recorded in the undo registry
    pub operation_ids: Vec<String>,
    /// Snapshots captured before UPDATE/DELETE statements
    pub snapshot_ids: Vec<String>,
    /// Rows changed across all statements
    pub affected_rows: u64,
}

#[derive(Default)]
struct MutationGuard {
    sealed: bool,
    running: usize,
    log: ExecutionLog,
}

/// Counts one statement as running until dropped
struct RunningStatement<'a> {
    guard: &'a Mutex<MutationGuard>,
    settled: &'a Notify,
}

impl Drop for RunningStatement<'_> {
    fn drop(&mut self) {
        self.guard.lock().running -= 1;
        self.settled.notify_waiters();
    }
}

/// Everything a step can see and use while it runs
#[derive(Clone)]
pub struct StepContext {
    workflow_id: String,
    user_intent: String,
    step: StepDefinition,
    data: Arc<serde_json::Value>,
    results: Arc<HashMap<String, StepResult>>,
    services: Services,
    guard: Arc<Mutex<MutationGuard>>,
    settled: Arc<Notify>,
}

impl StepContext {
    /// Build the context for one run of a step
    pub fn new(
        workflow_id: impl Into<String>,
        user_intent: impl Into<String>,
        step: StepDefinition,
        data: serde_json::Value,
        results: HashMap<String, StepResult>,
        services: Services,
    ) -> Self {
        Self {
            workflow_id: workflow_id.into(),
            user_intent: user_intent.into(),
            step,
            data: Arc::new(data),
            results: Arc::new(results),
            services,
            guard: Arc::new(Mutex::new(MutationGuard::default())),
            settled: Arc::new(Notify::new()),
        }
    }

    /// Workflow the step belongs to
    pub fn workflow_id(&self) -> &str {
        &self.workflow_id
    }

    /// What the user asked for
    pub fn user_intent(&self) -> &str {
        &self.user_intent
    }

    /// Definition of the running step
    pub fn step(&self) -> &StepDefinition {
        &self.step
    }

    /// Caller context passed to `start`
    pub fn data(&self) -> &serde_json::Value {
        &self.data
    }

    /// Saved result of an earlier step
    pub fn result(&self, step_id: &str) -> Option<&StepResult> {
        self.results.get(step_id)
    }

    /// Run a read-only query
    pub async fn query(&self, sql: &str) -> WorkflowResult<Vec<Row>> {
        if StatementKind::parse(sql).is_mutation() {
            return Err(WorkflowError::mutation_not_allowed(
                "query() only runs read statements, use execute() from an Execute step",
            ));
        }
        Ok(self.services.gateway.query(sql, &[]).await?)
    }

    /// Run a mutating statement with a recovery path
    ///
    /// UPDATE and DELETE capture a snapshot first. The statement is then executed, recorded
    /// as an operation and written to the ledger as `SqlExecuted`.
    pub async fn execute(&self, statement: &str) -> WorkflowResult<ExecutionOutcome> {
        if !self.step.step_type.may_mutate() {
            return Err(WorkflowError::mutation_not_allowed(format!(
                "{} steps cannot change data",
                self.step.step_type
            )));
        }
        let _running = {
            let mut guard = self.guard.lock();
            if guard.sealed {
                return Err(WorkflowError::mutation_not_allowed(format!(
                    "step '{}' has already finished",
                    self.step.id
                )));
            }
            guard.running += 1;
            RunningStatement {
                guard: &self.guard,
                settled: &self.settled,
            }
        };

        let kind = StatementKind::parse(statement);
        if !kind.is_mutation() {
            return Err(SqlError::unsupported(format!(
                "not a data modification: {}",
                statement
            ))
            .into());
        }

        let snapshot_id = match kind.table() {
            Some(table) if kind.needs_snapshot() => {
                self.services
                    .snapshots
                    .capture(
                        &self.workflow_id,
                        &self.step.id,
                        table,
                        kind.where_clause(),
                        statement,
                    )
                    .await?
            }
            _ => None,
        };

        let outcome = match self.services.gateway.execute(statement, &[]).await {
            Ok(outcome) => outcome,
            Err(e) => {
                warn!(
                    workflow_id = %self.workflow_id,
                    step_id = %self.step.id,
                    error = %e,
                    "statement failed"
                );
                return Err(e.into());
            }
        };

        let operation = Operation::new(
            self.workflow_id.as_str(),
            self.step.id.as_str(),
            statement,
            outcome.affected_rows,
            snapshot_id.clone(),
        )
        .with_generated_keys(outcome.generated_keys.clone());
        let operation_id = self.services.registry.record_operation(operation).await;

        self.services
            .ledger
            .log_sql_executed(&self.workflow_id, &self.step.id, statement, outcome.affected_rows)
            .await;

        {
            let mut guard = self.guard.lock();
            guard.log.operation_ids.push(operation_id.clone());
            guard.log.snapshot_ids.extend(snapshot_id);
            guard.log.affected_rows += outcome.affected_rows;
        }

        info!(
            workflow_id = %self.workflow_id,
            step_id = %self.step.id,
            operation_id = %operation_id,
            rows = outcome.affected_rows,
            "statement executed"
        );
        Ok(outcome)
    }

    /// Close the context for mutations and hand back what was done
    ///
    /// Statements that started before the seal are awaited first.
    pub(crate) async fn seal(&self) -> ExecutionLog {
        loop {
            let settled = self.settled.notified();
            {
                let mut guard = self.guard.lock();
                guard.sealed = true;
                if guard.running == 0 {
                    return std::mem::take(&mut guard.log);
                }
            }
            settled.await;
        }
    }
}
