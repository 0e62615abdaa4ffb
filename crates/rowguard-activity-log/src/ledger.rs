//! The workflow ledger
//!
//! Events are kept in memory per workflow (workflow-level and per-step lists) and
//! mirrored to an optional [`LedgerStore`]. Only the oldest workflows are evicted from
//! memory once `max_workflows` is exceeded; their history stays readable through the
//! store.

use parking_lot::Mutex;
use serde::Serialize;
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::{debug, warn};

use crate::error::{LedgerError, LedgerResult};
use crate::events::{LedgerEvent, LedgerEventKind, WorkflowRecord};
use crate::storage::LedgerStore;

/// Default number of workflows kept in memory
pub const DEFAULT_MAX_WORKFLOWS: usize = 100;

struct WorkflowLog {
    record: WorkflowRecord,
    workflow_events: Vec<LedgerEvent>,
    step_events: HashMap<String, Vec<LedgerEvent>>,
}

impl WorkflowLog {
    fn new(record: WorkflowRecord) -> Self {
        Self {
            record,
            workflow_events: Vec::new(),
            step_events: HashMap::new(),
        }
    }

    fn push(&mut self, event: LedgerEvent) {
        match &event.step_id {
            Some(step_id) => self
                .step_events
                .entry(step_id.clone())
                .or_default()
                .push(event),
            None => self.workflow_events.push(event),
        }
    }

    fn merged(&self) -> Vec<LedgerEvent> {
        let mut events: Vec<LedgerEvent> = self
            .workflow_events
            .iter()
            .chain(self.step_events.values().flatten())
            .cloned()
            .collect();
        sort_chronologically(&mut events);
        events
    }
}

#[derive(Default)]
struct LedgerState {
    logs: HashMap<String, WorkflowLog>,
    order: VecDeque<String>,
}

fn sort_chronologically(events: &mut [LedgerEvent]) {
    events.sort_by(|a, b| {
        a.timestamp
            .cmp(&b.timestamp)
            .then(a.sequence.cmp(&b.sequence))
    });
}

#[derive(Serialize)]
struct WorkflowExport<'a> {
    record: &'a WorkflowRecord,
    events: &'a [LedgerEvent],
}

/// Append-only audit trail shared by every workflow in the process
pub struct Ledger {
    state: Mutex<LedgerState>,
    sequence: AtomicU64,
    max_workflows: usize,
    store: Option<Arc<dyn LedgerStore>>,
}

impl Ledger {
    /// Create a memory-only ledger
    pub fn new(max_workflows: usize) -> Self {
        Self {
            state: Mutex::new(LedgerState::default()),
            sequence: AtomicU64::new(1),
            max_workflows: max_workflows.max(1),
            store: None,
        }
    }

    /// Mirror every event to a durable store
    pub fn with_store(mut self, store: Arc<dyn LedgerStore>) -> Self {
        self.store = Some(store);
        self
    }

    /// Whether events are mirrored to durable storage
    pub fn is_durable(&self) -> bool {
        self.store.is_some()
    }

    /// Register a workflow and append its `WorkflowStarted` event
    pub async fn begin_workflow(
        &self,
        workflow_id: &str,
        workflow_type: &str,
        user_intent: &str,
    ) -> LedgerEvent {
        let record = WorkflowRecord::started(workflow_id, workflow_type, user_intent);
        {
            let mut state = self.state.lock();
            if !state.logs.contains_key(workflow_id) {
                state
                    .logs
                    .insert(workflow_id.to_string(), WorkflowLog::new(record.clone()));
                state.order.push_back(workflow_id.to_string());
            }
            self.evict_locked(&mut state);
        }

        if let Some(store) = &self.store {
            if let Err(e) = store.save_record(&record).await {
                warn!(workflow_id = %workflow_id, error = %e, "failed to persist workflow record");
            }
        }

        self.append(LedgerEvent::new(
            workflow_id,
            LedgerEventKind::WorkflowStarted,
            format!("Workflow '{}' started: {}", workflow_type, user_intent),
        ))
        .await
    }

    /// Append an event, assigning its sequence number
    ///
    /// Durable mirroring is best effort: failures are logged and never returned.
    pub async fn append(&self, mut event: LedgerEvent) -> LedgerEvent {
        event.sequence = self.sequence.fetch_add(1, Ordering::SeqCst);

        let (in_memory, changed_record) = {
            let mut state = self.state.lock();
            // Workflows that were evicted (or never begun) only reach the durable store
            match state.logs.get_mut(&event.workflow_id) {
                Some(log) => {
                    let changed = log.record.apply(&event);
                    log.push(event.clone());
                    (true, changed.then(|| log.record.clone()))
                }
                None => (false, None),
            }
        };

        debug!(
            workflow_id = %event.workflow_id,
            kind = %event.kind,
            sequence = event.sequence,
            "ledger event appended"
        );

        if let Some(store) = &self.store {
            if let Err(e) = store.append_event(&event).await {
                warn!(workflow_id = %event.workflow_id, error = %e, "failed to persist ledger event");
            }
            let changed_record = match changed_record {
                None if !in_memory => Self::apply_to_stored(store.as_ref(), &event).await,
                record => record,
            };
            if let Some(record) = changed_record {
                if let Err(e) = store.save_record(&record).await {
                    warn!(workflow_id = %event.workflow_id, error = %e, "failed to persist workflow record");
                }
            }
        }

        event
    }

    async fn apply_to_stored(store: &dyn LedgerStore, event: &LedgerEvent) -> Option<WorkflowRecord> {
        match store.load_record(&event.workflow_id).await {
            Ok(Some(mut record)) => record.apply(event).then_some(record),
            Ok(None) => None,
            Err(e) => {
                warn!(workflow_id = %event.workflow_id, error = %e, "failed to load workflow record");
                None
            }
        }
    }

    fn evict_locked(&self, state: &mut LedgerState) {
        while state.order.len() > self.max_workflows {
            if let Some(oldest) = state.order.pop_front() {
                state.logs.remove(&oldest);
                debug!(workflow_id = %oldest, "evicted workflow from in-memory ledger");
            }
        }
    }

    /// Log workflow started
    pub async fn log_workflow_started(&self, workflow_id: &str, workflow_type: &str, user_intent: &str) {
        self.begin_workflow(workflow_id, workflow_type, user_intent).await;
    }

    /// Log workflow completed
    pub async fn log_workflow_completed(&self, workflow_id: &str, affected_rows: u64) {
        self.append(
            LedgerEvent::new(
                workflow_id,
                LedgerEventKind::WorkflowCompleted,
                format!("Workflow completed, {} rows affected", affected_rows),
            )
            .with_row_count(affected_rows),
        )
        .await;
    }

    /// Log workflow cancelled
    pub async fn log_workflow_cancelled(&self, workflow_id: &str, reason: &str) {
        self.append(LedgerEvent::new(
            workflow_id,
            LedgerEventKind::WorkflowCancelled,
            format!("Workflow cancelled: {}", reason),
        ))
        .await;
    }

    /// Log workflow failed
    pub async fn log_workflow_failed(&self, workflow_id: &str, error: &str) {
        self.append(LedgerEvent::new(
            workflow_id,
            LedgerEventKind::WorkflowFailed,
            format!("Workflow failed: {}", error),
        ))
        .await;
    }

    /// Log step started
    pub async fn log_step_started(&self, workflow_id: &str, step_id: &str, step_name: &str) {
        self.append(
            LedgerEvent::new(
                workflow_id,
                LedgerEventKind::StepStarted,
                format!("Step '{}' started", step_name),
            )
            .with_step(step_id),
        )
        .await;
    }

    /// Log a step result
    pub async fn log_step_result_ready(&self, workflow_id: &str, step_id: &str, message: &str) {
        self.append(
            LedgerEvent::new(workflow_id, LedgerEventKind::StepResultReady, message).with_step(step_id),
        )
        .await;
    }

    /// Log step confirmed
    pub async fn log_step_confirmed(&self, workflow_id: &str, step_id: &str) {
        self.append(
            LedgerEvent::new(workflow_id, LedgerEventKind::StepConfirmed, "Step confirmed")
                .with_step(step_id),
        )
        .await;
    }

    /// Log step corrected
    pub async fn log_step_corrected(&self, workflow_id: &str, step_id: &str, correction: &str) {
        self.append(
            LedgerEvent::new(
                workflow_id,
                LedgerEventKind::StepCorrected,
                format!("Correction: {}", correction),
            )
            .with_step(step_id),
        )
        .await;
    }

    /// Log step skipped
    pub async fn log_step_skipped(&self, workflow_id: &str, step_id: &str) {
        self.append(
            LedgerEvent::new(workflow_id, LedgerEventKind::StepSkipped, "Step skipped").with_step(step_id),
        )
        .await;
    }

    /// Log a step back from `step_id`
    pub async fn log_step_rolled_back(&self, workflow_id: &str, step_id: &str, detail: &str) {
        self.append(
            LedgerEvent::new(workflow_id, LedgerEventKind::StepRolledBack, detail).with_step(step_id),
        )
        .await;
    }

    /// Log an executed mutating statement
    pub async fn log_sql_executed(&self, workflow_id: &str, step_id: &str, statement: &str, rows: u64) {
        self.append(
            LedgerEvent::new(
                workflow_id,
                LedgerEventKind::SqlExecuted,
                format!("Statement affected {} rows", rows),
            )
            .with_step(step_id)
            .with_statement(statement)
            .with_row_count(rows),
        )
        .await;
    }

    /// Log a reversal of an executed statement
    pub async fn log_data_rolled_back(
        &self,
        workflow_id: &str,
        step_id: &str,
        statement: &str,
        rows: u64,
        detail: &str,
    ) {
        self.append(
            LedgerEvent::new(workflow_id, LedgerEventKind::DataRolledBack, detail)
                .with_step(step_id)
                .with_statement(statement)
                .with_row_count(rows),
        )
        .await;
    }

    /// Chronological event history of a workflow
    ///
    /// Falls back to the durable store once the workflow has left memory.
    pub async fn timeline(&self, workflow_id: &str) -> Vec<LedgerEvent> {
        let cached = self.state.lock().logs.get(workflow_id).map(WorkflowLog::merged);
        if let Some(events) = cached {
            return events;
        }

        match &self.store {
            Some(store) => match store.load_events(workflow_id).await {
                Ok(mut events) => {
                    sort_chronologically(&mut events);
                    events
                }
                Err(e) => {
                    warn!(workflow_id = %workflow_id, error = %e, "failed to load ledger events");
                    Vec::new()
                }
            },
            None => Vec::new(),
        }
    }

    /// Events of one step, in append order
    pub fn step_events(&self, workflow_id: &str, step_id: &str) -> Vec<LedgerEvent> {
        self.state
            .lock()
            .logs
            .get(workflow_id)
            .and_then(|log| log.step_events.get(step_id).cloned())
            .unwrap_or_default()
    }

    /// Events of one kind for a workflow, chronologically
    pub async fn events_of_kind(&self, workflow_id: &str, kind: LedgerEventKind) -> Vec<LedgerEvent> {
        self.timeline(workflow_id)
            .await
            .into_iter()
            .filter(|event| event.kind == kind)
            .collect()
    }

    /// Summary of a workflow
    pub async fn workflow_record(&self, workflow_id: &str) -> Option<WorkflowRecord> {
        let cached = self
            .state
            .lock()
            .logs
            .get(workflow_id)
            .map(|log| log.record.clone());
        if cached.is_some() {
            return cached;
        }

        let store = self.store.as_ref()?;
        match store.load_record(workflow_id).await {
            Ok(record) => record,
            Err(e) => {
                warn!(workflow_id = %workflow_id, error = %e, "failed to load workflow record");
                None
            }
        }
    }

    /// Most recently started workflows held in memory, newest first
    pub fn recent_workflows(&self, limit: usize) -> Vec<WorkflowRecord> {
        let state = self.state.lock();
        state
            .order
            .iter()
            .rev()
            .filter_map(|id| state.logs.get(id).map(|log| log.record.clone()))
            .take(limit)
            .collect()
    }

    /// Number of workflows held in memory
    pub fn workflow_count(&self) -> usize {
        self.state.lock().logs.len()
    }

    /// Record and timeline of a workflow as pretty JSON
    pub async fn export_json(&self, workflow_id: &str) -> LedgerResult<String> {
        let record = self
            .workflow_record(workflow_id)
            .await
            .ok_or_else(|| LedgerError::workflow_not_found(workflow_id))?;
        let events = self.timeline(workflow_id).await;

        Ok(serde_json::to_string_pretty(&WorkflowExport {
            record: &record,
            events: &events,
        })?)
    }
}

impl Default for Ledger {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_WORKFLOWS)
    }
}
