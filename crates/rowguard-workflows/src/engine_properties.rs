//! Property tests for engine control flow

use proptest::prelude::*;
use rowguard_activity_log::LedgerEventKind;
use rowguard_config::RowguardConfig;
use rowguard_sql::SqliteGateway;
use std::sync::Arc;

use crate::engine::WorkflowEngine;
use crate::models::{StepResult, StepType};
use crate::services::Services;
use crate::step::FnExecutor;
use crate::templates::ExecutorMap;

#[derive(Debug, Clone, Copy)]
enum Action {
    Confirm,
    Correct,
    Skip,
    Previous,
}

fn action() -> impl Strategy<Value = Action> {
    prop_oneof![
        3 => Just(Action::Confirm),
        1 => Just(Action::Correct),
        1 => Just(Action::Skip),
        1 => Just(Action::Previous),
    ]
}

fn engine() -> WorkflowEngine {
    let gateway = Arc::new(SqliteGateway::open_in_memory().unwrap());
    let services = Services::in_memory(&RowguardConfig::default(), gateway);
    let mut map = ExecutorMap::new();
    for step_type in [
        StepType::Understand,
        StepType::Filter,
        StepType::Preview,
        StepType::Compare,
        StepType::Confirm,
        StepType::Execute,
        StepType::Validate,
    ] {
        map = map.with_type(
            step_type,
            Arc::new(FnExecutor::new(|_, correction: Option<String>| async move {
                Ok(StepResult::success(correction.unwrap_or_else(|| "ok".into())))
            })),
        );
    }
    WorkflowEngine::new(services).with_provider(Arc::new(map))
}

proptest! {
    #[test]
    fn prop_step_index_stays_in_range(actions in prop::collection::vec(action(), 1..25)) {
        tokio_test::block_on(async {
            let engine = engine();
            engine.start("modify", serde_json::json!({}), "raise attack").await.unwrap();

            for action in actions {
                let before = engine.workflow().await.unwrap();
                match action {
                    Action::Confirm => { engine.confirm().await; }
                    Action::Correct => { engine.correct("only archers").await; }
                    Action::Skip => { engine.skip().await; }
                    Action::Previous => { engine.previous().await; }
                }
                let after = engine.workflow().await.unwrap();

                prop_assert!(after.current_step < after.steps.len());
                if !matches!(action, Action::Previous) {
                    prop_assert!(after.current_step >= before.current_step);
                }
                if after.is_terminal() {
                    prop_assert!(after.ended_at.is_some());
                }
            }
            Ok(())
        })?;
    }

    #[test]
    fn prop_rejected_skip_leaves_no_trace(confirms in 0usize..4) {
        tokio_test::block_on(async {
            let engine = engine();
            engine.start("modify", serde_json::json!({}), "raise attack").await.unwrap();
            for _ in 0..confirms {
                engine.confirm().await;
            }

            // understand, filter, compare and confirm are all non-skippable
            let before = engine.workflow().await.unwrap();
            let result = engine.skip().await;
            prop_assert!(!result.success);
            prop_assert_eq!(engine.workflow().await.unwrap(), before.clone());
            let skipped = engine
                .services()
                .ledger
                .events_of_kind(&before.id, LedgerEventKind::StepSkipped)
                .await;
            prop_assert!(skipped.is_empty());
            Ok(())
        })?;
    }
}
