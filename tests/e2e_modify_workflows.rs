//! End-to-End Test Suite: Confirmable Modifications with Undo and Audit
//!
//! Drives complete "modify" workflows through the engine against a SQLite units table and
//! checks that every change can be reversed and traced, across restarts and alongside
//! other workflows.

use std::sync::Arc;

use rowguard_activity_log::{LedgerEventKind, RecordStatus};
use rowguard_config::{ConfigManager, RowguardConfig};
use rowguard_sql::{SqlGateway, SqlValue, SqliteGateway};
use rowguard_workflows::{
    ExecutorMap, FnExecutor, Services, StepContext, StepResult, StepType, WorkflowEngine,
    WorkflowStatus,
};
use tempfile::TempDir;

/// 42 archers and 18 knights
async fn units_gateway() -> Arc<SqliteGateway> {
    let gateway = Arc::new(SqliteGateway::open_in_memory().expect("Failed to open database"));
    gateway
        .execute_batch("CREATE TABLE units (id INTEGER PRIMARY KEY, class TEXT NOT NULL, attack REAL NOT NULL)")
        .await
        .expect("Failed to create table");
    for i in 0..60 {
        let class = if i < 42 { "archer" } else { "knight" };
        gateway
            .execute(
                "INSERT INTO units (class, attack) VALUES (?, ?)",
                &[class.into(), (10.0 + i as f64).into()],
            )
            .await
            .expect("Failed to seed units");
    }
    gateway
}

fn target_class(ctx: &StepContext) -> String {
    ctx.data()["class"].as_str().unwrap_or("archer").to_string()
}

/// Executors that raise the attack of the class named in the workflow context
fn executors() -> ExecutorMap {
    let review = |message: &'static str| {
        Arc::new(FnExecutor::new(move |_ctx, _correction| async move {
            Ok(StepResult::pending(message))
        }))
    };

    ExecutorMap::new()
        .with_type(StepType::Understand, review("Raise attack by 10%"))
        .with_type(StepType::Compare, review("Before and after"))
        .with_type(StepType::Confirm, review("Apply?"))
        .with_type(
            StepType::Filter,
            Arc::new(FnExecutor::new(|ctx, _| async move {
                let rows = ctx
                    .query(&format!(
                        "SELECT * FROM units WHERE class = '{}'",
                        target_class(&ctx)
                    ))
                    .await?;
                Ok(StepResult::pending(format!("{} rows", rows.len())).with_rows(rows))
            })),
        )
        .with_type(
            StepType::Execute,
            Arc::new(FnExecutor::new(|ctx, _| async move {
                let statement = format!(
                    "UPDATE units SET attack = attack * 1.1 WHERE class = '{}'",
                    target_class(&ctx)
                );
                let outcome = ctx.execute(&statement).await?;
                Ok(StepResult::success("Applied").with_affected_rows(outcome.affected_rows))
            })),
        )
        .with_type(
            StepType::Validate,
            Arc::new(FnExecutor::new(|_, _| async move {
                Ok(StepResult::success("Validated"))
            })),
        )
}

async fn run_modify(engine: &WorkflowEngine, class: &str) -> String {
    let started = engine
        .start(
            "modify",
            serde_json::json!({ "table": "units", "class": class }),
            "raise attack by 10%",
        )
        .await
        .expect("Failed to start workflow");
    for _ in 0..4 {
        let result = engine.confirm().await;
        assert!(result.success, "{}", result.message);
    }
    assert_eq!(
        engine.workflow().await.expect("workflow").status,
        WorkflowStatus::Completed
    );
    started.workflow_id.expect("workflow id")
}

async fn attacks(gateway: &SqliteGateway) -> Vec<SqlValue> {
    gateway
        .query("SELECT attack FROM units ORDER BY id", &[])
        .await
        .expect("Failed to read units")
        .into_iter()
        .map(|row| row["attack"].clone())
        .collect()
}

/// Configuration on disk, durable audit database, restart, then undo from the reloaded state
#[tokio::test]
async fn test_undo_survives_restart() {
    let temp_dir = TempDir::new().expect("Failed to create temp directory");
    let config_path = temp_dir.path().join("config.toml");
    let mut config = RowguardConfig::default();
    config.storage.audit_database = Some(temp_dir.path().join("audit.db"));
    let manager = ConfigManager::with_path(&config_path).with_env_prefix("ROWGUARD_E2E_RESTART");
    manager.save_config(&config).expect("Failed to save config");
    let config = manager.load_config().expect("Failed to load config");

    let gateway = units_gateway().await;
    let before = attacks(&gateway).await;

    let workflow_id = {
        let services = Services::bootstrap(config.clone(), gateway.clone())
            .await
            .expect("Failed to bootstrap");
        let engine = WorkflowEngine::new(services.clone()).with_provider(Arc::new(executors()));
        let id = run_modify(&engine, "archer").await;
        services.shutdown().await;
        id
    };
    assert_ne!(attacks(&gateway).await, before);

    let services = Services::bootstrap(config, gateway.clone())
        .await
        .expect("Failed to bootstrap again");
    assert_eq!(services.registry.workflow_depth(&workflow_id), 1);

    let record = services
        .ledger
        .workflow_record(&workflow_id)
        .await
        .expect("record persisted");
    assert_eq!(record.status, RecordStatus::Completed);
    assert_eq!(record.affected_rows, 42);

    let report = services.registry.undo_workflow_last(&workflow_id).await;
    assert!(report.success, "{}", report.message);
    assert_eq!(report.restored_rows, 42);
    assert_eq!(attacks(&gateway).await, before);

    let timeline = services.ledger.timeline(&workflow_id).await;
    assert!(timeline
        .iter()
        .any(|e| e.kind == LedgerEventKind::DataRolledBack));
    services.shutdown().await;
}

/// Two workflows run side by side; rolling back one leaves the other alone
#[tokio::test]
async fn test_concurrent_workflows_roll_back_independently() {
    let gateway = units_gateway().await;
    let services = Services::in_memory(&RowguardConfig::default(), gateway.clone());
    let engine_a = WorkflowEngine::new(services.clone()).with_provider(Arc::new(executors()));
    let engine_b = WorkflowEngine::new(services.clone()).with_provider(Arc::new(executors()));

    let (id_a, id_b) = tokio::join!(run_modify(&engine_a, "archer"), run_modify(&engine_b, "knight"));
    let knights_after_change = gateway
        .query("SELECT attack FROM units WHERE class = 'knight' ORDER BY id", &[])
        .await
        .expect("Failed to read knights");

    let report = engine_a.rollback().await.expect("rollback report");
    assert!(report.success);
    assert_eq!(report.restored_rows, 42);

    assert_eq!(services.registry.workflow_depth(&id_a), 0);
    assert_eq!(services.registry.workflow_depth(&id_b), 1);
    assert_eq!(services.snapshots.list_for_workflow(&id_b).len(), 1);
    assert_eq!(
        gateway
            .query("SELECT attack FROM units WHERE class = 'knight' ORDER BY id", &[])
            .await
            .expect("Failed to read knights"),
        knights_after_change
    );
}

/// A snapshot with a zero TTL is never restorable and the failed undo leaves data alone
#[tokio::test]
async fn test_zero_ttl_snapshot_cannot_be_restored() {
    let gateway = units_gateway().await;
    let mut config = RowguardConfig::default();
    config.snapshots.ttl_secs = 0;
    let services = Services::in_memory(&config, gateway.clone());
    let engine = WorkflowEngine::new(services.clone()).with_provider(Arc::new(executors()));

    run_modify(&engine, "archer").await;
    let state = engine.workflow().await.expect("workflow");
    let snapshot_id = &state.snapshot_ids[0];
    assert!(!services.snapshots.can_restore(snapshot_id));

    let changed = attacks(&gateway).await;
    let report = engine.undo_last().await.expect("undo report");
    assert!(!report.success);
    assert_eq!(attacks(&gateway).await, changed);
    assert_eq!(services.registry.workflow_depth(&state.id), 1);
}
