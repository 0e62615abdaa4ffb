//! Durable storage for snapshots and operations

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection};
use std::path::Path;
use std::sync::Arc;
use tokio::sync::Mutex;

use crate::error::UndoResult;
use crate::operation::Operation;
use crate::snapshot::Snapshot;

/// Storage backend for undo state
#[async_trait]
pub trait UndoPersistence: Send + Sync {
    /// Insert or update a snapshot
    async fn save_snapshot(&self, snapshot: &Snapshot) -> UndoResult<()>;

    /// Delete snapshots by id
    async fn delete_snapshots(&self, ids: &[String]) -> UndoResult<()>;

    /// Load every stored snapshot
    async fn load_snapshots(&self) -> UndoResult<Vec<Snapshot>>;

    /// Insert or update an operation
    async fn save_operation(&self, operation: &Operation) -> UndoResult<()>;

    /// Load every stored operation in recording order
    async fn load_operations(&self) -> UndoResult<Vec<Operation>>;
}

fn parse_datetime_utc(s: &str) -> rusqlite::Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| {
            rusqlite::Error::FromSqlConversionFailure(0, rusqlite::types::Type::Text, Box::new(e))
        })
}

fn parse_json<T: serde::de::DeserializeOwned>(s: &str) -> rusqlite::Result<T> {
    serde_json::from_str(s).map_err(|e| {
        rusqlite::Error::FromSqlConversionFailure(0, rusqlite::types::Type::Text, Box::new(e))
    })
}

/// SQLite-backed undo storage
#[derive(Clone)]
pub struct SqliteUndoPersistence {
    conn: Arc<Mutex<Connection>>,
}

impl SqliteUndoPersistence {
    /// Open or create the database at the given path
    pub fn open(path: &Path) -> UndoResult<Self> {
        let mut conn = Connection::open(path)?;
        Self::init_schema_sync(&mut conn)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// Open an in-memory database (for testing)
    pub fn open_in_memory() -> UndoResult<Self> {
        let mut conn = Connection::open_in_memory()?;
        Self::init_schema_sync(&mut conn)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    fn init_schema_sync(conn: &mut Connection) -> UndoResult<()> {
        conn.execute_batch(
            r#"
            PRAGMA busy_timeout = 5000;

            CREATE TABLE IF NOT EXISTS undo_snapshots (
                id TEXT PRIMARY KEY,
                workflow_id TEXT NOT NULL,
                step_id TEXT NOT NULL,
                table_name TEXT NOT NULL,
                primary_key TEXT NOT NULL,
                rows TEXT NOT NULL,
                statement TEXT NOT NULL,
                created_at TEXT NOT NULL,
                expires_at TEXT NOT NULL,
                restored_at TEXT
            );

            CREATE TABLE IF NOT EXISTS undo_operations (
                id TEXT PRIMARY KEY,
                workflow_id TEXT NOT NULL,
                step_id TEXT NOT NULL,
                statement TEXT NOT NULL,
                kind TEXT NOT NULL,
                affected_rows INTEGER NOT NULL,
                snapshot_id TEXT,
                generated_keys TEXT,
                created_at TEXT NOT NULL,
                status TEXT NOT NULL
            );

            CREATE INDEX IF NOT EXISTS idx_undo_snapshots_workflow ON undo_snapshots(workflow_id);
            CREATE INDEX IF NOT EXISTS idx_undo_operations_workflow ON undo_operations(workflow_id);
            "#,
        )?;
        Ok(())
    }

    fn row_to_snapshot(row: &rusqlite::Row<'_>) -> rusqlite::Result<Snapshot> {
        let rows: String = row.get(5)?;
        let created_at: String = row.get(7)?;
        let expires_at: String = row.get(8)?;
        let restored_at: Option<String> = row.get(9)?;
        Ok(Snapshot {
            id: row.get(0)?,
            workflow_id: row.get(1)?,
            step_id: row.get(2)?,
            table: row.get(3)?,
            primary_key: row.get(4)?,
            rows: parse_json(&rows)?,
            statement: row.get(6)?,
            created_at: parse_datetime_utc(&created_at)?,
            expires_at: parse_datetime_utc(&expires_at)?,
            restored_at: restored_at.as_deref().map(parse_datetime_utc).transpose()?,
        })
    }

    fn row_to_operation(row: &rusqlite::Row<'_>) -> rusqlite::Result<Operation> {
        let kind: String = row.get(4)?;
        let generated_keys: Option<String> = row.get(7)?;
        let created_at: String = row.get(8)?;
        let status: String = row.get(9)?;
        Ok(Operation {
            id: row.get(0)?,
            workflow_id: row.get(1)?,
            step_id: row.get(2)?,
            statement: row.get(3)?,
            kind: parse_json(&kind)?,
            affected_rows: row.get::<_, i64>(5)?.max(0) as u64,
            snapshot_id: row.get(6)?,
            generated_keys: generated_keys.as_deref().map(parse_json).transpose()?,
            created_at: parse_datetime_utc(&created_at)?,
            status: status.parse().map_err(|e| {
                rusqlite::Error::FromSqlConversionFailure(9, rusqlite::types::Type::Text, Box::new(e))
            })?,
        })
    }
}

#[async_trait]
impl UndoPersistence for SqliteUndoPersistence {
    async fn save_snapshot(&self, snapshot: &Snapshot) -> UndoResult<()> {
        let rows = serde_json::to_string(&snapshot.rows)?;
        let conn = self.conn.lock().await;
        conn.execute(
            "INSERT INTO undo_snapshots
                (id, workflow_id, step_id, table_name, primary_key, rows, statement,
                 created_at, expires_at, restored_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)
             ON CONFLICT(id) DO UPDATE SET restored_at = excluded.restored_at",
            params![
                snapshot.id,
                snapshot.workflow_id,
                snapshot.step_id,
                snapshot.table,
                snapshot.primary_key,
                rows,
                snapshot.statement,
                snapshot.created_at.to_rfc3339(),
                snapshot.expires_at.to_rfc3339(),
                snapshot.restored_at.map(|t| t.to_rfc3339()),
            ],
        )?;
        Ok(())
    }

    async fn delete_snapshots(&self, ids: &[String]) -> UndoResult<()> {
        let mut conn = self.conn.lock().await;
        let tx = conn.transaction()?;
        for id in ids {
            tx.execute("DELETE FROM undo_snapshots WHERE id = ?1", [id])?;
        }
        tx.commit()?;
        Ok(())
    }

    async fn load_snapshots(&self) -> UndoResult<Vec<Snapshot>> {
        let conn = self.conn.lock().await;
        let mut stmt = conn.prepare(
            "SELECT id, workflow_id, step_id, table_name, primary_key, rows, statement,
                    created_at, expires_at, restored_at
             FROM undo_snapshots ORDER BY rowid",
        )?;
        let snapshots = stmt
            .query_map([], Self::row_to_snapshot)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(snapshots)
    }

    async fn save_operation(&self, operation: &Operation) -> UndoResult<()> {
        let kind = serde_json::to_string(&operation.kind)?;
        let generated_keys = operation
            .generated_keys
            .as_ref()
            .map(serde_json::to_string)
            .transpose()?;
        let conn = self.conn.lock().await;
        conn.execute(
            "INSERT INTO undo_operations
                (id, workflow_id, step_id, statement, kind, affected_rows, snapshot_id,
                 generated_keys, created_at, status)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)
             ON CONFLICT(id) DO UPDATE SET status = excluded.status",
            params![
                operation.id,
                operation.workflow_id,
                operation.step_id,
                operation.statement,
                kind,
                operation.affected_rows as i64,
                operation.snapshot_id,
                generated_keys,
                operation.created_at.to_rfc3339(),
                operation.status.as_str(),
            ],
        )?;
        Ok(())
    }

    async fn load_operations(&self) -> UndoResult<Vec<Operation>> {
        let conn = self.conn.lock().await;
        let mut stmt = conn.prepare(
            "SELECT id, workflow_id, step_id, statement, kind, affected_rows, snapshot_id,
                    generated_keys, created_at, status
             FROM undo_operations ORDER BY rowid",
        )?;
        let operations = stmt
            .query_map([], Self::row_to_operation)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(operations)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::operation::OperationStatus;
    use rowguard_sql::{GeneratedKeys, Row, SqlValue};

    fn sample_snapshot() -> Snapshot {
        let mut row = Row::new();
        row.insert("id".to_string(), SqlValue::Integer(1));
        row.insert("name".to_string(), SqlValue::from("archer"));
        let now = Utc::now();
        Snapshot {
            id: "snap-1".to_string(),
            workflow_id: "wf-1".to_string(),
            step_id: "execute".to_string(),
            table: "units".to_string(),
            primary_key: "id".to_string(),
            rows: vec![row],
            statement: "DELETE FROM units WHERE id = 1".to_string(),
            created_at: now,
            expires_at: now + chrono::Duration::hours(1),
            restored_at: None,
        }
    }

    #[tokio::test]
    async fn test_snapshot_round_trip_and_restore_mark() {
        let store = SqliteUndoPersistence::open_in_memory().unwrap();
        let mut snapshot = sample_snapshot();
        store.save_snapshot(&snapshot).await.unwrap();

        snapshot.restored_at = Some(Utc::now());
        store.save_snapshot(&snapshot).await.unwrap();

        let loaded = store.load_snapshots().await.unwrap();
        assert_eq!(loaded.len(), 1);
        assert_eq!(loaded[0].rows, snapshot.rows);
        assert!(loaded[0].restored_at.is_some());

        store.delete_snapshots(&["snap-1".to_string()]).await.unwrap();
        assert!(store.load_snapshots().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_operation_round_trip_keeps_order() {
        let store = SqliteUndoPersistence::open_in_memory().unwrap();
        let first = Operation::new("wf-1", "execute", "UPDATE units SET a = 1", 3, Some("snap-1".into()));
        let mut second = Operation::new("wf-1", "execute", "INSERT INTO units (a) VALUES (1)", 1, None)
            .with_generated_keys(Some(GeneratedKeys {
                column: "rowid".into(),
                values: vec![SqlValue::Integer(4)],
            }));
        store.save_operation(&first).await.unwrap();
        store.save_operation(&second).await.unwrap();

        second.status = OperationStatus::Undone;
        store.save_operation(&second).await.unwrap();

        let loaded = store.load_operations().await.unwrap();
        assert_eq!(loaded.len(), 2);
        assert_eq!(loaded[0].id, first.id);
        assert_eq!(loaded[0].kind, first.kind);
        assert_eq!(loaded[1].status, OperationStatus::Undone);
        assert_eq!(loaded[1].generated_keys, second.generated_keys);
    }
}
