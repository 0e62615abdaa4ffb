//! Property-based tests for snapshot round trips and LIFO rollback

#[cfg(test)]
mod tests {
    use crate::registry::UndoRegistry;
    use crate::snapshot::{SnapshotConfig, SnapshotStore};
    use proptest::prelude::*;
    use rowguard_activity_log::{Ledger, LedgerEventKind};
    use rowguard_sql::{SqlGateway, SqlValue, SqliteGateway, StatementKind};
    use std::sync::Arc;

    async fn seeded(rows: &[(i64, String)]) -> Arc<SqliteGateway> {
        let gateway = Arc::new(SqliteGateway::open_in_memory().unwrap());
        gateway
            .execute_batch("CREATE TABLE units (id INTEGER PRIMARY KEY, name TEXT, attack INTEGER)")
            .await
            .unwrap();
        for (attack, name) in rows {
            gateway
                .execute(
                    "INSERT INTO units (name, attack) VALUES (?, ?)",
                    &[SqlValue::from(name.as_str()), SqlValue::Integer(*attack)],
                )
                .await
                .unwrap();
        }
        gateway
    }

    fn arb_rows() -> impl Strategy<Value = Vec<(i64, String)>> {
        prop::collection::vec((0i64..1000, "[a-z]{1,10}"), 1..20)
    }

    proptest! {
        /// Capture, mutate, restore reproduces every row column for column
        #[test]
        fn prop_restore_reproduces_captured_rows(
            rows in arb_rows(),
            threshold in 0i64..1000,
            delete in any::<bool>(),
        ) {
            tokio_test::block_on(async {
                let gateway = seeded(&rows).await;
                let store = SnapshotStore::new(gateway.clone(), SnapshotConfig::default());
                let before = gateway.query("SELECT * FROM units ORDER BY id", &[]).await.unwrap();

                let sql = if delete {
                    format!("DELETE FROM units WHERE attack >= {}", threshold)
                } else {
                    format!("UPDATE units SET attack = attack + 1, name = 'x' WHERE attack >= {}", threshold)
                };
                let kind = StatementKind::parse(&sql);
                let snapshot = store
                    .capture("wf", "execute", "units", kind.where_clause(), &sql)
                    .await
                    .unwrap();
                gateway.execute(&sql, &[]).await.unwrap();

                if let Some(id) = snapshot {
                    store.restore(&id).await.unwrap();
                }

                let after = gateway.query("SELECT * FROM units ORDER BY id", &[]).await.unwrap();
                prop_assert_eq!(before, after);
                Ok(())
            })?;
        }

        /// Rolling back a workflow undoes its operations newest first
        #[test]
        fn prop_workflow_rollback_is_lifo(updates in prop::collection::vec(0i64..50, 1..8)) {
            tokio_test::block_on(async {
                let gateway = seeded(&[(1, "a".to_string()), (2, "b".to_string())]).await;
                let snapshots = Arc::new(SnapshotStore::new(gateway.clone(), SnapshotConfig::default()));
                let ledger = Arc::new(Ledger::new(10));
                ledger.begin_workflow("wf", "modify", "bump attack").await;
                let registry = UndoRegistry::new(snapshots.clone(), ledger.clone(), 100);
                let original = gateway.query("SELECT * FROM units ORDER BY id", &[]).await.unwrap();

                let mut ids = Vec::new();
                for delta in &updates {
                    let sql = format!("UPDATE units SET attack = attack + {}", delta);
                    let snapshot = snapshots.capture("wf", "execute", "units", None, &sql).await.unwrap();
                    let outcome = gateway.execute(&sql, &[]).await.unwrap();
                    ids.push(registry.record("wf", "execute", &sql, outcome.affected_rows, snapshot).await);
                }

                let report = registry.undo_workflow_all("wf").await;
                prop_assert!(report.success);
                let order: Vec<String> = report
                    .undone
                    .iter()
                    .filter_map(|r| r.operation_id.clone())
                    .collect();
                ids.reverse();
                prop_assert_eq!(order, ids);

                let restored = gateway.query("SELECT * FROM units ORDER BY id", &[]).await.unwrap();
                prop_assert_eq!(original, restored);
                prop_assert_eq!(
                    ledger.events_of_kind("wf", LedgerEventKind::DataRolledBack).await.len(),
                    updates.len()
                );
                Ok(())
            })?;
        }
    }
}
