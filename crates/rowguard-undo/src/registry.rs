//! Per-workflow and global LIFO stacks of executed operations
//!
//! Reversal is dispatched on the parsed [`StatementKind`]: UPDATE and DELETE restore their
//! snapshot, INSERT deletes the keys the gateway reported. A successful reversal removes
//! the operation from both stacks under one lock; a failed one leaves it executed.
//! Undone operations stay queryable until `global_max` newer ones have been undone.

use parking_lot::Mutex;
use rowguard_activity_log::Ledger;
use rowguard_sql::{quote_ident, SqlValue, StatementKind};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::error::{UndoError, UndoResult};
use crate::operation::{Operation, OperationStatus};
use crate::persistence::UndoPersistence;
use crate::snapshot::SnapshotStore;

/// Default size of the global undo stack
pub const DEFAULT_GLOBAL_MAX: usize = 50;

/// What `undo_workflow_all` does after a failed reversal
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RollbackPolicy {
    /// Halt at the first failure, leaving it and everything below executed
    #[default]
    StopOnFirstFailure,
    /// Try every remaining operation and collect the failures
    BestEffort,
}

/// Outcome of reversing one operation
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UndoReport {
    /// Whether the reversal succeeded
    pub success: bool,
    /// Operation the report is about
    pub operation_id: Option<String>,
    /// Human-readable outcome
    pub message: String,
    /// Rows written back (or deleted, for an INSERT)
    pub restored_rows: usize,
}

impl UndoReport {
    fn succeeded(operation: &Operation, restored_rows: usize) -> Self {
        Self {
            success: true,
            operation_id: Some(operation.id.clone()),
            message: format!(
                "Reverted {} on {} ({} rows)",
                operation.kind.label(),
                operation.kind.table().unwrap_or("?"),
                restored_rows
            ),
            restored_rows,
        }
    }

    fn failed(operation_id: Option<&str>, error: &UndoError) -> Self {
        Self {
            success: false,
            operation_id: operation_id.map(str::to_string),
            message: error.to_string(),
            restored_rows: 0,
        }
    }
}

/// Outcome of reversing a whole workflow
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkflowUndoReport {
    /// Workflow that was rolled back
    pub workflow_id: String,
    /// True when every operation was reversed
    pub success: bool,
    /// Successful reversals, in the order they ran
    pub undone: Vec<UndoReport>,
    /// Failed reversals
    pub failures: Vec<UndoReport>,
    /// Rows restored across all reversals
    pub restored_rows: usize,
    /// Operations still executed afterwards
    pub remaining: usize,
}

#[derive(Default)]
struct RegistryState {
    operations: HashMap<String, Operation>,
    workflow_stacks: HashMap<String, Vec<String>>,
    global_stack: VecDeque<String>,
    undone: VecDeque<String>,
    in_flight: HashSet<String>,
}

impl RegistryState {
    fn push(&mut self, operation: Operation, global_max: usize) {
        let id = operation.id.clone();
        self.workflow_stacks
            .entry(operation.workflow_id.clone())
            .or_default()
            .push(id.clone());
        self.global_stack.push_back(id.clone());
        while self.global_stack.len() > global_max {
            self.global_stack.pop_front();
        }
        self.operations.insert(id, operation);
    }

    fn workflow_top(&self, workflow_id: &str) -> Option<&String> {
        self.workflow_stacks.get(workflow_id).and_then(|stack| stack.last())
    }

    /// Validate and mark an operation as being reversed
    fn claim(&mut self, operation_id: &str) -> UndoResult<Operation> {
        let operation = self
            .operations
            .get(operation_id)
            .cloned()
            .ok_or_else(|| UndoError::operation_not_found(operation_id))?;
        if operation.status == OperationStatus::Undone {
            return Err(UndoError::AlreadyUndone(operation_id.to_string()));
        }
        if self.workflow_top(&operation.workflow_id).map(String::as_str) != Some(operation_id) {
            return Err(UndoError::OutOfOrder {
                operation_id: operation_id.to_string(),
            });
        }
        if !self.in_flight.insert(operation_id.to_string()) {
            return Err(UndoError::InFlight(operation_id.to_string()));
        }
        Ok(operation)
    }

    fn complete(&mut self, operation_id: &str, success: bool, history: usize) -> Option<Operation> {
        self.in_flight.remove(operation_id);
        if !success {
            return None;
        }

        let operation = self.operations.get_mut(operation_id)?;
        operation.status = OperationStatus::Undone;
        let operation = operation.clone();

        if let Some(stack) = self.workflow_stacks.get_mut(&operation.workflow_id) {
            stack.retain(|id| id != operation_id);
            if stack.is_empty() {
                self.workflow_stacks.remove(&operation.workflow_id);
            }
        }
        self.global_stack.retain(|id| id != operation_id);

        self.undone.push_back(operation_id.to_string());
        while self.undone.len() > history {
            if let Some(oldest) = self.undone.pop_front() {
                self.operations.remove(&oldest);
            }
        }
        Some(operation)
    }
}

/// Registry of reversible operations
pub struct UndoRegistry {
    snapshots: Arc<SnapshotStore>,
    ledger: Arc<Ledger>,
    global_max: usize,
    policy: RollbackPolicy,
    state: Mutex<RegistryState>,
    persistence: Option<Arc<dyn UndoPersistence>>,
}

impl UndoRegistry {
    /// Create a registry reversing through the given snapshot store
    pub fn new(snapshots: Arc<SnapshotStore>, ledger: Arc<Ledger>, global_max: usize) -> Self {
        Self {
            snapshots,
            ledger,
            global_max: global_max.max(1),
            policy: RollbackPolicy::default(),
            state: Mutex::new(RegistryState::default()),
            persistence: None,
        }
    }

    /// Set the policy used by [`UndoRegistry::undo_workflow_all`]
    pub fn with_policy(mut self, policy: RollbackPolicy) -> Self {
        self.policy = policy;
        self
    }

    /// Mirror operations to durable storage
    pub fn with_persistence(mut self, persistence: Arc<dyn UndoPersistence>) -> Self {
        self.persistence = Some(persistence);
        self
    }

    /// Configured rollback policy
    pub fn policy(&self) -> RollbackPolicy {
        self.policy
    }

    /// Snapshot store used for reversals
    pub fn snapshots(&self) -> &Arc<SnapshotStore> {
        &self.snapshots
    }

    /// Record an executed statement, returning the new operation id
    pub async fn record(
        &self,
        workflow_id: &str,
        step_id: &str,
        statement: &str,
        affected_rows: u64,
        snapshot_id: Option<String>,
    ) -> String {
        self.record_operation(Operation::new(
            workflow_id,
            step_id,
            statement,
            affected_rows,
            snapshot_id,
        ))
        .await
    }

    /// Record a prepared operation (used for INSERTs carrying generated keys)
    pub async fn record_operation(&self, operation: Operation) -> String {
        let id = operation.id.clone();
        if !operation.is_reversible() {
            warn!(
                operation_id = %id,
                statement = %operation.statement,
                "recorded operation has no recovery path"
            );
        }

        self.persist(&operation).await;
        info!(
            operation_id = %id,
            workflow_id = %operation.workflow_id,
            kind = operation.kind.label(),
            rows = operation.affected_rows,
            "operation recorded"
        );
        self.state.lock().push(operation, self.global_max);
        id
    }

    /// Reverse the most recent operation of any workflow
    pub async fn undo_last(&self) -> UndoReport {
        let top = self.state.lock().global_stack.back().cloned();
        match top {
            Some(id) => self.reverse(&id).await,
            None => UndoReport::failed(None, &UndoError::NoMoreUndos),
        }
    }

    /// Reverse the most recent operation of one workflow
    pub async fn undo_workflow_last(&self, workflow_id: &str) -> UndoReport {
        let top = self.state.lock().workflow_top(workflow_id).cloned();
        match top {
            Some(id) => self.reverse(&id).await,
            None => UndoReport::failed(None, &UndoError::NoMoreUndos),
        }
    }

    /// Reverse a specific operation; only the top of its workflow stack is allowed
    pub async fn undo_operation(&self, operation_id: &str) -> UndoReport {
        self.reverse(operation_id).await
    }

    /// Reverse every operation of a workflow using the configured policy
    pub async fn undo_workflow_all(&self, workflow_id: &str) -> WorkflowUndoReport {
        self.undo_workflow_all_with(workflow_id, self.policy).await
    }

    /// Reverse every operation of a workflow, newest first
    pub async fn undo_workflow_all_with(
        &self,
        workflow_id: &str,
        policy: RollbackPolicy,
    ) -> WorkflowUndoReport {
        let mut undone = Vec::new();
        let mut failures = Vec::new();

        match policy {
            RollbackPolicy::StopOnFirstFailure => loop {
                let top = self.state.lock().workflow_top(workflow_id).cloned();
                let Some(id) = top else { break };
                let report = self.reverse(&id).await;
                if report.success {
                    undone.push(report);
                } else {
                    failures.push(report);
                    break;
                }
            },
            RollbackPolicy::BestEffort => {
                let pending: Vec<String> = self
                    .state
                    .lock()
                    .workflow_stacks
                    .get(workflow_id)
                    .map(|stack| stack.iter().rev().cloned().collect())
                    .unwrap_or_default();
                for id in pending {
                    let report = self.reverse_unordered(&id).await;
                    if report.success {
                        undone.push(report);
                    } else {
                        failures.push(report);
                    }
                }
            }
        }

        let remaining = self.workflow_depth(workflow_id);
        let restored_rows = undone.iter().map(|r| r.restored_rows).sum();
        info!(
            workflow_id = %workflow_id,
            undone = undone.len(),
            failed = failures.len(),
            remaining,
            "workflow rollback finished"
        );

        WorkflowUndoReport {
            workflow_id: workflow_id.to_string(),
            success: failures.is_empty(),
            undone,
            failures,
            restored_rows,
            remaining,
        }
    }

    async fn reverse(&self, operation_id: &str) -> UndoReport {
        let claimed = self.state.lock().claim(operation_id);
        self.run_claimed(operation_id, claimed).await
    }

    /// Best-effort rollback may skip over a failed operation, so ordering is not enforced
    async fn reverse_unordered(&self, operation_id: &str) -> UndoReport {
        let claimed = {
            let mut state = self.state.lock();
            match state.operations.get(operation_id).cloned() {
                None => Err(UndoError::operation_not_found(operation_id)),
                Some(op) if op.status == OperationStatus::Undone => {
                    Err(UndoError::AlreadyUndone(operation_id.to_string()))
                }
                Some(op) => {
                    if state.in_flight.insert(operation_id.to_string()) {
                        Ok(op)
                    } else {
                        Err(UndoError::InFlight(operation_id.to_string()))
                    }
                }
            }
        };
        self.run_claimed(operation_id, claimed).await
    }

    async fn run_claimed(&self, operation_id: &str, claimed: UndoResult<Operation>) -> UndoReport {
        let operation = match claimed {
            Ok(operation) => operation,
            Err(e) => {
                warn!(operation_id = %operation_id, error = %e, "undo rejected");
                return UndoReport::failed(Some(operation_id), &e);
            }
        };

        let result = self.dispatch(&operation).await;
        let completed = self
            .state
            .lock()
            .complete(operation_id, result.is_ok(), self.global_max);

        match result {
            Ok(rows) => {
                if let Some(undone) = &completed {
                    self.persist(undone).await;
                }
                let report = UndoReport::succeeded(&operation, rows);
                self.ledger
                    .log_data_rolled_back(
                        &operation.workflow_id,
                        &operation.step_id,
                        &operation.statement,
                        rows as u64,
                        &report.message,
                    )
                    .await;
                info!(operation_id = %operation_id, rows, "operation undone");
                report
            }
            Err(e) => {
                warn!(operation_id = %operation_id, error = %e, "undo failed");
                UndoReport::failed(Some(operation_id), &e)
            }
        }
    }

    async fn dispatch(&self, operation: &Operation) -> UndoResult<usize> {
        match &operation.kind {
            StatementKind::Update { .. } | StatementKind::Delete { .. } => {
                match &operation.snapshot_id {
                    Some(snapshot_id) => self.snapshots.restore(snapshot_id).await,
                    None if operation.affected_rows == 0 => Ok(0),
                    None => Err(UndoError::not_reversible(format!(
                        "{} changed {} rows but no snapshot was captured",
                        operation.kind.label(),
                        operation.affected_rows
                    ))),
                }
            }
            StatementKind::Insert { table } => {
                let keys = operation
                    .generated_keys
                    .as_ref()
                    .filter(|keys| !keys.values.is_empty())
                    .ok_or_else(|| {
                        UndoError::not_reversible("INSERT did not report generated keys")
                    })?;

                let placeholders = vec!["?"; keys.values.len()].join(", ");
                let sql = format!(
                    "DELETE FROM {} WHERE {} IN ({})",
                    quote_ident(table),
                    quote_ident(&keys.column),
                    placeholders
                );
                let params: Vec<SqlValue> = keys.values.clone();
                let outcome = self.snapshots.gateway().execute(&sql, &params).await?;
                debug!(table = %table, rows = outcome.affected_rows, "inserted rows removed");
                Ok(outcome.affected_rows as usize)
            }
            StatementKind::Select | StatementKind::Other => Err(UndoError::not_reversible(format!(
                "{} statements cannot be reversed",
                operation.kind.label()
            ))),
        }
    }

    async fn persist(&self, operation: &Operation) {
        if let Some(persistence) = &self.persistence {
            if let Err(e) = persistence.save_operation(operation).await {
                warn!(operation_id = %operation.id, error = %e, "failed to persist operation");
            }
        }
    }

    /// Whether an operation could be undone right now
    pub fn can_undo(&self, operation_id: &str) -> bool {
        let state = self.state.lock();
        match state.operations.get(operation_id) {
            Some(op) => {
                op.is_executed()
                    && op.is_reversible()
                    && !state.in_flight.contains(operation_id)
                    && state.workflow_top(&op.workflow_id).map(String::as_str) == Some(operation_id)
            }
            None => false,
        }
    }

    /// Executed operations of a workflow, oldest first
    pub fn workflow_operations(&self, workflow_id: &str) -> Vec<Operation> {
        let state = self.state.lock();
        state
            .workflow_stacks
            .get(workflow_id)
            .map(|stack| {
                stack
                    .iter()
                    .filter_map(|id| state.operations.get(id).cloned())
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Look up an operation, including recently undone ones
    pub fn operation(&self, operation_id: &str) -> Option<Operation> {
        self.state.lock().operations.get(operation_id).cloned()
    }

    /// Executed operations across all workflows
    pub fn undoable_count(&self) -> usize {
        self.state
            .lock()
            .workflow_stacks
            .values()
            .map(Vec::len)
            .sum()
    }

    /// Executed operations of one workflow
    pub fn workflow_depth(&self, workflow_id: &str) -> usize {
        self.state
            .lock()
            .workflow_stacks
            .get(workflow_id)
            .map_or(0, Vec::len)
    }

    /// Entries on the global stack
    pub fn global_depth(&self) -> usize {
        self.state.lock().global_stack.len()
    }

    /// Reload executed operations from durable storage
    pub async fn rehydrate(&self) -> UndoResult<usize> {
        let Some(persistence) = &self.persistence else {
            return Ok(0);
        };

        let operations = persistence.load_operations().await?;
        let mut state = self.state.lock();
        let mut count = 0;
        for operation in operations {
            if !operation.is_executed() || state.operations.contains_key(&operation.id) {
                continue;
            }
            state.push(operation, self.global_max);
            count += 1;
        }
        drop(state);

        info!(count, "rehydrated operations");
        Ok(count)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::snapshot::SnapshotConfig;
    use rowguard_sql::{SqlGateway, SqliteGateway};

    async fn setup(global_max: usize) -> (Arc<SqliteGateway>, UndoRegistry) {
        let gateway = Arc::new(SqliteGateway::open_in_memory().unwrap());
        gateway
            .execute_batch(
                "CREATE TABLE items (id INTEGER PRIMARY KEY, price INTEGER);
                 INSERT INTO items VALUES (1, 10), (2, 20), (3, 30);",
            )
            .await
            .unwrap();
        let snapshots = Arc::new(SnapshotStore::new(gateway.clone(), SnapshotConfig::default()));
        let registry = UndoRegistry::new(snapshots, Arc::new(Ledger::new(10)), global_max);
        (gateway, registry)
    }

    async fn run(registry: &UndoRegistry, gateway: &SqliteGateway, workflow_id: &str, sql: &str) -> String {
        let kind = StatementKind::parse(sql);
        let snapshot_id = registry
            .snapshots()
            .capture(workflow_id, "execute", kind.table().unwrap(), kind.where_clause(), sql)
            .await
            .unwrap();
        let outcome = gateway.execute(sql, &[]).await.unwrap();
        registry
            .record(workflow_id, "execute", sql, outcome.affected_rows, snapshot_id)
            .await
    }

    async fn prices(gateway: &SqliteGateway) -> Vec<i64> {
        gateway
            .query("SELECT price FROM items ORDER BY id", &[])
            .await
            .unwrap()
            .iter()
            .map(|row| row["price"].as_i64().unwrap())
            .collect()
    }

    #[tokio::test]
    async fn test_undo_workflow_last_restores_rows() {
        let (gateway, registry) = setup(10).await;
        run(&registry, &gateway, "wf", "UPDATE items SET price = price * 2").await;
        assert_eq!(prices(&gateway).await, vec![20, 40, 60]);

        let report = registry.undo_workflow_last("wf").await;
        assert!(report.success, "{}", report.message);
        assert_eq!(report.restored_rows, 3);
        assert_eq!(prices(&gateway).await, vec![10, 20, 30]);
        assert_eq!(registry.undoable_count(), 0);
        assert_eq!(registry.global_depth(), 0);
    }

    #[tokio::test]
    async fn test_same_operation_undone_once() {
        let (gateway, registry) = setup(10).await;
        let id = run(&registry, &gateway, "wf", "DELETE FROM items WHERE id = 1").await;

        assert!(registry.undo_operation(&id).await.success);
        let second = registry.undo_operation(&id).await;
        assert!(!second.success);
        assert!(second.message.contains("already undone"));
    }

    #[tokio::test]
    async fn test_targeted_undo_requires_top_of_stack() {
        let (gateway, registry) = setup(10).await;
        let first = run(&registry, &gateway, "wf", "UPDATE items SET price = 0 WHERE id = 1").await;
        let second = run(&registry, &gateway, "wf", "UPDATE items SET price = 0 WHERE id = 2").await;

        assert!(!registry.can_undo(&first));
        assert!(registry.can_undo(&second));
        assert!(!registry.undo_operation(&first).await.success);
        assert!(registry.undo_operation(&second).await.success);
        assert!(registry.undo_operation(&first).await.success);
    }

    #[tokio::test]
    async fn test_insert_is_reversed_by_generated_key() {
        let (gateway, registry) = setup(10).await;
        let sql = "INSERT INTO items (price) VALUES (99)";
        let outcome = gateway.execute(sql, &[]).await.unwrap();
        registry
            .record_operation(
                Operation::new("wf", "execute", sql, outcome.affected_rows, None)
                    .with_generated_keys(outcome.generated_keys),
            )
            .await;

        let report = registry.undo_last().await;
        assert!(report.success, "{}", report.message);
        assert_eq!(prices(&gateway).await, vec![10, 20, 30]);
    }

    #[tokio::test]
    async fn test_insert_without_keys_is_not_reversible() {
        let (_, registry) = setup(10).await;
        let id = registry
            .record("wf", "execute", "INSERT INTO items (price) VALUES (1), (2)", 2, None)
            .await;

        assert!(!registry.can_undo(&id));
        let report = registry.undo_workflow_last("wf").await;
        assert!(!report.success);
        assert_eq!(registry.operation(&id).unwrap().status, OperationStatus::Executed);
    }

    #[tokio::test]
    async fn test_global_stack_is_trimmed() {
        let (gateway, registry) = setup(2).await;
        for id in 1..=3 {
            run(&registry, &gateway, "wf", &format!("UPDATE items SET price = 0 WHERE id = {}", id)).await;
        }
        assert_eq!(registry.global_depth(), 2);
        assert_eq!(registry.workflow_depth("wf"), 3);
    }

    #[tokio::test]
    async fn test_undone_history_is_bounded() {
        let (gateway, registry) = setup(3).await;
        let mut ids = Vec::new();
        for _ in 0..10 {
            let id = run(&registry, &gateway, "wf", "UPDATE items SET price = price + 1 WHERE id = 1").await;
            assert!(registry.undo_operation(&id).await.success);
            ids.push(id);
        }

        assert_eq!(registry.state.lock().operations.len(), 3);
        assert!(registry.operation(&ids[0]).is_none());
        assert_eq!(registry.operation(&ids[9]).unwrap().status, OperationStatus::Undone);
        assert!(registry.undo_operation(&ids[9]).await.message.contains("already undone"));
        assert!(!registry.undo_operation(&ids[0]).await.success);
        assert_eq!(prices(&gateway).await, vec![10, 20, 30]);
    }

    #[tokio::test]
    async fn test_undo_on_empty_stack() {
        let (_, registry) = setup(10).await;
        assert!(!registry.undo_last().await.success);
        assert!(!registry.undo_workflow_last("nothing").await.success);
    }
}
