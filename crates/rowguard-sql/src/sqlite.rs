//! SQLite implementation of the relational gateway

use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use rusqlite::types::Value as DbValue;
use rusqlite::{params_from_iter, Connection};
use tokio::sync::Mutex;
use tracing::debug;

use crate::error::SqlResult;
use crate::gateway::{ExecutionOutcome, GeneratedKeys, SqlGateway};
use crate::statement::StatementKind;
use crate::value::{quote_ident, Row, SqlValue};

/// SQLite-backed gateway
///
/// The connection sits behind an async mutex so one gateway can be shared by every
/// workflow in the process.
#[derive(Clone)]
pub struct SqliteGateway {
    conn: Arc<Mutex<Connection>>,
}

impl SqliteGateway {
    /// Open or create a database file
    pub fn open(path: &Path) -> SqlResult<Self> {
        let conn = Connection::open(path)?;
        conn.execute_batch("PRAGMA busy_timeout = 5000;")?;
        Ok(Self::from_connection(conn))
    }

    /// Open a private in-memory database
    pub fn open_in_memory() -> SqlResult<Self> {
        Ok(Self::from_connection(Connection::open_in_memory()?))
    }

    /// Wrap an existing connection
    pub fn from_connection(conn: Connection) -> Self {
        Self {
            conn: Arc::new(Mutex::new(conn)),
        }
    }

    /// Run a batch of statements without parameters (schema setup, fixtures)
    pub async fn execute_batch(&self, sql: &str) -> SqlResult<()> {
        let conn = self.conn.lock().await;
        conn.execute_batch(sql)?;
        Ok(())
    }
}

fn to_db(value: &SqlValue) -> DbValue {
    match value {
        SqlValue::Null => DbValue::Null,
        SqlValue::Integer(v) => DbValue::Integer(*v),
        SqlValue::Real(v) => DbValue::Real(*v),
        SqlValue::Text(v) => DbValue::Text(v.clone()),
        SqlValue::Blob(v) => DbValue::Blob(v.clone()),
    }
}

fn from_db(value: DbValue) -> SqlValue {
    match value {
        DbValue::Null => SqlValue::Null,
        DbValue::Integer(v) => SqlValue::Integer(v),
        DbValue::Real(v) => SqlValue::Real(v),
        DbValue::Text(v) => SqlValue::Text(v),
        DbValue::Blob(v) => SqlValue::Blob(v),
    }
}

#[async_trait]
impl SqlGateway for SqliteGateway {
    async fn query(&self, sql: &str, params: &[SqlValue]) -> SqlResult<Vec<Row>> {
        let conn = self.conn.lock().await;
        let mut stmt = conn.prepare(sql)?;
        let columns: Vec<String> = stmt.column_names().into_iter().map(String::from).collect();

        let mut rows = stmt.query(params_from_iter(params.iter().map(to_db)))?;
        let mut result = Vec::new();
        while let Some(row) = rows.next()? {
            let mut record = Row::new();
            for (index, column) in columns.iter().enumerate() {
                let value: DbValue = row.get(index)?;
                record.insert(column.clone(), from_db(value));
            }
            result.push(record);
        }

        debug!(rows = result.len(), "query returned");
        Ok(result)
    }

    async fn execute(&self, sql: &str, params: &[SqlValue]) -> SqlResult<ExecutionOutcome> {
        let conn = self.conn.lock().await;
        let affected = conn.execute(sql, params_from_iter(params.iter().map(to_db)))? as u64;

        // SQLite only reports the last rowid, which identifies the row only for single-row inserts
        let generated_keys = match StatementKind::parse(sql) {
            StatementKind::Insert { .. } if affected == 1 => Some(GeneratedKeys {
                column: "rowid".to_string(),
                values: vec![SqlValue::Integer(conn.last_insert_rowid())],
            }),
            _ => None,
        };

        debug!(affected, "statement executed");
        Ok(ExecutionOutcome {
            affected_rows: affected,
            generated_keys,
        })
    }

    async fn primary_key_column(&self, table: &str) -> SqlResult<Option<String>> {
        let conn = self.conn.lock().await;
        let mut stmt = conn.prepare(&format!("PRAGMA table_info({})", quote_ident(table)))?;
        let mut rows = stmt.query([])?;

        // table_info columns: cid, name, type, notnull, dflt_value, pk
        let mut first_key: Option<(i64, String)> = None;
        while let Some(row) = rows.next()? {
            let name: String = row.get(1)?;
            let pk: i64 = row.get(5)?;
            if pk > 0 && first_key.as_ref().map_or(true, |(order, _)| pk < *order) {
                first_key = Some((pk, name));
            }
        }

        Ok(first_key.map(|(_, name)| name))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn units_gateway() -> SqliteGateway {
        let gateway = SqliteGateway::open_in_memory().unwrap();
        gateway
            .execute_batch(
                "CREATE TABLE units (unit_id INTEGER PRIMARY KEY, name TEXT NOT NULL, attack REAL, icon BLOB);
                 INSERT INTO units (unit_id, name, attack, icon) VALUES (1, 'archer', 10.0, x'0102');
                 INSERT INTO units (unit_id, name, attack, icon) VALUES (2, 'knight', 20.0, NULL);",
            )
            .await
            .unwrap();
        gateway
    }

    #[tokio::test]
    async fn test_query_returns_full_rows() {
        let gateway = units_gateway().await;
        let rows = gateway
            .query("SELECT * FROM units WHERE unit_id = ?", &[SqlValue::Integer(1)])
            .await
            .unwrap();

        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0]["name"], SqlValue::from("archer"));
        assert_eq!(rows[0]["attack"], SqlValue::Real(10.0));
        assert_eq!(rows[0]["icon"], SqlValue::Blob(vec![1, 2]));
    }

    #[tokio::test]
    async fn test_execute_reports_affected_rows() {
        let gateway = units_gateway().await;
        let outcome = gateway
            .execute("UPDATE units SET attack = attack * 2", &[])
            .await
            .unwrap();

        assert_eq!(outcome.affected_rows, 2);
        assert!(outcome.generated_keys.is_none());
    }

    #[tokio::test]
    async fn test_single_insert_reports_generated_key() {
        let gateway = units_gateway().await;
        let outcome = gateway
            .execute("INSERT INTO units (name, attack) VALUES ('mage', 5.0)", &[])
            .await
            .unwrap();

        let keys = outcome.generated_keys.expect("insert should report its rowid");
        assert_eq!(keys.column, "rowid");
        assert_eq!(keys.values, vec![SqlValue::Integer(3)]);
    }

    #[tokio::test]
    async fn test_primary_key_detection() {
        let gateway = units_gateway().await;
        assert_eq!(
            gateway.primary_key_column("units").await.unwrap(),
            Some("unit_id".to_string())
        );

        gateway
            .execute_batch("CREATE TABLE tags (label TEXT)")
            .await
            .unwrap();
        assert_eq!(gateway.primary_key_column("tags").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_count_helper() {
        let gateway = units_gateway().await;
        let count = gateway
            .count("SELECT COUNT(*) FROM units WHERE attack > ?", &[SqlValue::Real(15.0)])
            .await
            .unwrap();
        assert_eq!(count, 1);
    }
}
