//! Durable ledger storage

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension};
use std::path::Path;
use std::sync::Arc;
use tokio::sync::Mutex;

use crate::error::LedgerResult;
use crate::events::{LedgerEvent, WorkflowRecord};

/// Storage backend the ledger mirrors its events to
#[async_trait]
pub trait LedgerStore: Send + Sync {
    /// Insert or replace a workflow summary
    async fn save_record(&self, record: &WorkflowRecord) -> LedgerResult<()>;

    /// Append one event
    async fn append_event(&self, event: &LedgerEvent) -> LedgerResult<()>;

    /// Load a workflow summary
    async fn load_record(&self, workflow_id: &str) -> LedgerResult<Option<WorkflowRecord>>;

    /// Load every event of a workflow in append order
    async fn load_events(&self, workflow_id: &str) -> LedgerResult<Vec<LedgerEvent>>;

    /// Most recently started workflows, newest first
    async fn recent_records(&self, limit: usize) -> LedgerResult<Vec<WorkflowRecord>>;
}

fn parse_datetime_utc(s: &str) -> rusqlite::Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| {
            rusqlite::Error::FromSqlConversionFailure(0, rusqlite::types::Type::Text, Box::new(e))
        })
}

fn parse_field<T>(s: &str) -> rusqlite::Result<T>
where
    T: std::str::FromStr<Err = crate::error::LedgerError>,
{
    s.parse::<T>().map_err(|e| {
        rusqlite::Error::FromSqlConversionFailure(0, rusqlite::types::Type::Text, Box::new(e))
    })
}

/// SQLite-backed ledger store
#[derive(Clone)]
pub struct SqliteLedgerStore {
    conn: Arc<Mutex<Connection>>,
}

impl SqliteLedgerStore {
    /// Open or create the audit database at the given path
    pub fn open(path: &Path) -> LedgerResult<Self> {
        let mut conn = Connection::open(path)?;
        Self::init_schema_sync(&mut conn)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// Open an in-memory database (for testing)
    pub fn open_in_memory() -> LedgerResult<Self> {
        let mut conn = Connection::open_in_memory()?;
        Self::init_schema_sync(&mut conn)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    fn init_schema_sync(conn: &mut Connection) -> LedgerResult<()> {
        conn.execute_batch(
            r#"
            PRAGMA busy_timeout = 5000;

            CREATE TABLE IF NOT EXISTS ledger_workflows (
                id TEXT PRIMARY KEY,
                workflow_type TEXT NOT NULL,
                user_intent TEXT NOT NULL,
                status TEXT NOT NULL,
                affected_rows INTEGER NOT NULL DEFAULT 0,
                started_at TEXT NOT NULL,
                ended_at TEXT
            );

            CREATE TABLE IF NOT EXISTS ledger_events (
                id TEXT PRIMARY KEY,
                sequence INTEGER NOT NULL,
                workflow_id TEXT NOT NULL,
                step_id TEXT,
                kind TEXT NOT NULL,
                detail TEXT NOT NULL,
                statement TEXT,
                row_count INTEGER,
                timestamp TEXT NOT NULL
            );

            CREATE INDEX IF NOT EXISTS idx_ledger_events_workflow
                ON ledger_events(workflow_id, timestamp, sequence);
            CREATE INDEX IF NOT EXISTS idx_ledger_workflows_started
                ON ledger_workflows(started_at DESC);
            "#,
        )?;
        Ok(())
    }

    fn row_to_record(row: &rusqlite::Row<'_>) -> rusqlite::Result<WorkflowRecord> {
        let status: String = row.get(3)?;
        let started_at: String = row.get(5)?;
        let ended_at: Option<String> = row.get(6)?;
        Ok(WorkflowRecord {
            workflow_id: row.get(0)?,
            workflow_type: row.get(1)?,
            user_intent: row.get(2)?,
            status: parse_field(&status)?,
            affected_rows: row.get::<_, i64>(4)?.max(0) as u64,
            started_at: parse_datetime_utc(&started_at)?,
            ended_at: ended_at.as_deref().map(parse_datetime_utc).transpose()?,
        })
    }

    fn row_to_event(row: &rusqlite::Row<'_>) -> rusqlite::Result<LedgerEvent> {
        let kind: String = row.get(4)?;
        let timestamp: String = row.get(8)?;
        Ok(LedgerEvent {
            id: row.get(0)?,
            sequence: row.get::<_, i64>(1)?.max(0) as u64,
            workflow_id: row.get(2)?,
            step_id: row.get(3)?,
            kind: parse_field(&kind)?,
            detail: row.get(5)?,
            statement: row.get(6)?,
            row_count: row.get::<_, Option<i64>>(7)?.map(|n| n.max(0) as u64),
            timestamp: parse_datetime_utc(&timestamp)?,
        })
    }
}

#[async_trait]
impl LedgerStore for SqliteLedgerStore {
    async fn save_record(&self, record: &WorkflowRecord) -> LedgerResult<()> {
        let conn = self.conn.lock().await;
        conn.execute(
            "INSERT OR REPLACE INTO ledger_workflows
                (id, workflow_type, user_intent, status, affected_rows, started_at, ended_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            params![
                record.workflow_id,
                record.workflow_type,
                record.user_intent,
                record.status.as_str(),
                record.affected_rows as i64,
                record.started_at.to_rfc3339(),
                record.ended_at.map(|t| t.to_rfc3339()),
            ],
        )?;
        Ok(())
    }

    async fn append_event(&self, event: &LedgerEvent) -> LedgerResult<()> {
        let conn = self.conn.lock().await;
        conn.execute(
            "INSERT INTO ledger_events
                (id, sequence, workflow_id, step_id, kind, detail, statement, row_count, timestamp)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
            params![
                event.id,
                event.sequence as i64,
                event.workflow_id,
                event.step_id,
                event.kind.as_str(),
                event.detail,
                event.statement,
                event.row_count.map(|n| n as i64),
                event.timestamp.to_rfc3339(),
            ],
        )?;
        Ok(())
    }

    async fn load_record(&self, workflow_id: &str) -> LedgerResult<Option<WorkflowRecord>> {
        let conn = self.conn.lock().await;
        let record = conn
            .query_row(
                "SELECT id, workflow_type, user_intent, status, affected_rows, started_at, ended_at
                 FROM ledger_workflows WHERE id = ?1",
                [workflow_id],
                Self::row_to_record,
            )
            .optional()?;
        Ok(record)
    }

    async fn load_events(&self, workflow_id: &str) -> LedgerResult<Vec<LedgerEvent>> {
        let conn = self.conn.lock().await;
        let mut stmt = conn.prepare(
            "SELECT id, sequence, workflow_id, step_id, kind, detail, statement, row_count, timestamp
             FROM ledger_events WHERE workflow_id = ?1
             ORDER BY timestamp, sequence",
        )?;
        let events = stmt
            .query_map([workflow_id], Self::row_to_event)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(events)
    }

    async fn recent_records(&self, limit: usize) -> LedgerResult<Vec<WorkflowRecord>> {
        let conn = self.conn.lock().await;
        let mut stmt = conn.prepare(
            "SELECT id, workflow_type, user_intent, status, affected_rows, started_at, ended_at
             FROM ledger_workflows ORDER BY started_at DESC LIMIT ?1",
        )?;
        let records = stmt
            .query_map([limit as i64], Self::row_to_record)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(records)
    }
}
