use async_trait::async_trait;
use rowguard_activity_log::*;
use std::sync::Arc;

struct BrokenStore;

#[async_trait]
impl LedgerStore for BrokenStore {
    async fn save_record(&self, _record: &WorkflowRecord) -> LedgerResult<()> {
        Err(LedgerError::storage("disk full"))
    }

    async fn append_event(&self, _event: &LedgerEvent) -> LedgerResult<()> {
        Err(LedgerError::storage("disk full"))
    }

    async fn load_record(&self, _workflow_id: &str) -> LedgerResult<Option<WorkflowRecord>> {
        Err(LedgerError::storage("disk full"))
    }

    async fn load_events(&self, _workflow_id: &str) -> LedgerResult<Vec<LedgerEvent>> {
        Err(LedgerError::storage("disk full"))
    }

    async fn recent_records(&self, _limit: usize) -> LedgerResult<Vec<WorkflowRecord>> {
        Err(LedgerError::storage("disk full"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_persistence_failures_are_swallowed() {
        let ledger = Ledger::new(10).with_store(Arc::new(BrokenStore));
        ledger.begin_workflow("wf-1", "modify", "x").await;
        ledger.log_step_started("wf-1", "understand", "Understand").await;

        assert_eq!(ledger.timeline("wf-1").await.len(), 2);
        assert!(ledger.timeline("evicted").await.is_empty());
        assert!(ledger.workflow_record("evicted").await.is_none());
    }

    #[tokio::test]
    async fn test_timeline_falls_back_to_durable_store() {
        let store = Arc::new(SqliteLedgerStore::open_in_memory().unwrap());
        let ledger = Ledger::new(1).with_store(store.clone());

        ledger.begin_workflow("wf-old", "modify", "raise attack").await;
        ledger
            .log_sql_executed("wf-old", "execute", "UPDATE units SET attack = 1", 42)
            .await;
        ledger.log_workflow_completed("wf-old", 42).await;

        // Pushes wf-old out of memory
        ledger.begin_workflow("wf-new", "query", "list").await;
        assert_eq!(ledger.workflow_count(), 1);

        let timeline = ledger.timeline("wf-old").await;
        let kinds: Vec<_> = timeline.iter().map(|e| e.kind).collect();
        assert_eq!(
            kinds,
            vec![
                LedgerEventKind::WorkflowStarted,
                LedgerEventKind::SqlExecuted,
                LedgerEventKind::WorkflowCompleted,
            ]
        );

        let record = ledger.workflow_record("wf-old").await.unwrap();
        assert_eq!(record.status, RecordStatus::Completed);
        assert_eq!(record.affected_rows, 42);
    }

    #[tokio::test]
    async fn test_evicted_workflow_record_keeps_updating() {
        let store = Arc::new(SqliteLedgerStore::open_in_memory().unwrap());
        let ledger = Ledger::new(1).with_store(store.clone());

        ledger.begin_workflow("wf-slow", "modify", "raise attack").await;
        ledger.begin_workflow("wf-fast", "query", "list").await;

        ledger
            .log_sql_executed("wf-slow", "execute", "UPDATE units SET attack = 1", 7)
            .await;
        ledger.log_workflow_completed("wf-slow", 7).await;

        let record = store.load_record("wf-slow").await.unwrap().unwrap();
        assert_eq!(record.status, RecordStatus::Completed);
        assert_eq!(record.affected_rows, 7);
        assert!(record.ended_at.is_some());
    }

    #[tokio::test]
    async fn test_events_of_kind_filters() {
        let ledger = Ledger::new(10);
        ledger.begin_workflow("wf-1", "modify", "x").await;
        ledger.log_step_started("wf-1", "understand", "Understand").await;
        ledger.log_step_corrected("wf-1", "understand", "only archers").await;
        ledger.log_step_corrected("wf-1", "understand", "only tier 2 archers").await;

        let corrections = ledger
            .events_of_kind("wf-1", LedgerEventKind::StepCorrected)
            .await;
        assert_eq!(corrections.len(), 2);
        assert!(corrections[1].detail.contains("tier 2"));
    }

    #[tokio::test]
    async fn test_export_json_contains_record_and_events() {
        let ledger = Ledger::new(10);
        ledger.begin_workflow("wf-1", "generate", "seed units").await;
        ledger
            .log_data_rolled_back("wf-1", "execute", "INSERT INTO units VALUES (1)", 1, "undo insert")
            .await;

        let json = ledger.export_json("wf-1").await.unwrap();
        let value: serde_json::Value = serde_json::from_str(&json).unwrap();
        assert_eq!(value["record"]["workflow_type"], "generate");
        assert_eq!(value["events"].as_array().unwrap().len(), 2);
        assert_eq!(value["events"][1]["kind"], "data_rolled_back");
    }

    #[tokio::test]
    async fn test_workflows_do_not_share_timelines() {
        let ledger = Arc::new(Ledger::new(10));
        let a = {
            let ledger = ledger.clone();
            tokio::spawn(async move {
                ledger.begin_workflow("wf-a", "modify", "a").await;
                for _ in 0..20 {
                    ledger.log_step_started("wf-a", "filter", "Filter").await;
                }
            })
        };
        let b = {
            let ledger = ledger.clone();
            tokio::spawn(async move {
                ledger.begin_workflow("wf-b", "modify", "b").await;
                for _ in 0..10 {
                    ledger.log_step_started("wf-b", "filter", "Filter").await;
                }
            })
        };
        a.await.unwrap();
        b.await.unwrap();

        assert_eq!(ledger.timeline("wf-a").await.len(), 21);
        assert_eq!(ledger.timeline("wf-b").await.len(), 11);
    }
}
