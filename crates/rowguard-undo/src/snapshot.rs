//! Before-images of rows about to be mutated
//!
//! A [`Snapshot`] is captured right before an UPDATE or DELETE runs and can be restored
//! at most once. Snapshots leave the store by TTL sweep or by count-based eviction
//! (oldest first); neither touches a snapshot whose restore is in flight.

use chrono::{DateTime, Duration, Utc};
use parking_lot::Mutex;
use rowguard_sql::{quote_ident, Row, SqlError, SqlGateway, SqlValue};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Arc;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::error::{UndoError, UndoResult};
use crate::persistence::UndoPersistence;

/// Default snapshot retention in seconds
pub const DEFAULT_SNAPSHOT_TTL_SECS: u64 = 24 * 60 * 60;

/// Default maximum number of snapshots held
pub const DEFAULT_MAX_SNAPSHOTS: usize = 200;

/// Primary-key column assumed when introspection finds none
pub const DEFAULT_PRIMARY_KEY: &str = "id";

const MAX_TTL_SECS: u64 = 100 * 365 * 24 * 60 * 60;

/// A captured before-image
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Snapshot {
    /// Unique identifier
    pub id: String,
    /// Owning workflow
    pub workflow_id: String,
    /// Step that captured it
    pub step_id: String,
    /// Table the rows belong to
    pub table: String,
    /// Column used to find the rows again
    pub primary_key: String,
    /// Full rows as they were before the statement
    pub rows: Vec<Row>,
    /// Statement about to run when the snapshot was taken
    pub statement: String,
    /// Capture time
    pub created_at: DateTime<Utc>,
    /// Retention limit
    pub expires_at: DateTime<Utc>,
    /// Set once the snapshot has been restored
    pub restored_at: Option<DateTime<Utc>>,
}

impl Snapshot {
    /// Whether the snapshot is past its retention time
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        now >= self.expires_at
    }

    /// Whether the snapshot was already restored
    pub fn is_restored(&self) -> bool {
        self.restored_at.is_some()
    }

    /// Number of captured rows
    pub fn row_count(&self) -> usize {
        self.rows.len()
    }
}

/// Snapshot retention settings
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SnapshotConfig {
    /// Seconds a snapshot stays restorable
    pub ttl_secs: u64,
    /// Count limit; the oldest snapshots are evicted above it
    pub max_snapshots: usize,
}

impl Default for SnapshotConfig {
    fn default() -> Self {
        Self {
            ttl_secs: DEFAULT_SNAPSHOT_TTL_SECS,
            max_snapshots: DEFAULT_MAX_SNAPSHOTS,
        }
    }
}

impl SnapshotConfig {
    fn ttl(&self) -> Duration {
        Duration::seconds(self.ttl_secs.min(MAX_TTL_SECS) as i64)
    }
}

/// Snapshot store statistics
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SnapshotStats {
    /// Snapshots held
    pub total: usize,
    /// Snapshots already restored
    pub restored: usize,
    /// Snapshots past expiry that have not been swept yet
    pub expired: usize,
    /// Restores currently running
    pub in_flight: usize,
    /// Rows held across all snapshots
    pub rows: usize,
}

#[derive(Default)]
struct SnapshotState {
    snapshots: HashMap<String, Snapshot>,
    order: VecDeque<String>,
    in_flight: HashSet<String>,
}

impl SnapshotState {
    fn insert(&mut self, snapshot: Snapshot) {
        self.order.push_back(snapshot.id.clone());
        self.snapshots.insert(snapshot.id.clone(), snapshot);
    }

    fn remove(&mut self, id: &str) -> Option<Snapshot> {
        self.order.retain(|existing| existing != id);
        self.snapshots.remove(id)
    }

    fn evict_over_capacity(&mut self, max_snapshots: usize) -> Vec<String> {
        let mut evicted = Vec::new();
        while self.snapshots.len() > max_snapshots {
            let Some(pos) = self
                .order
                .iter()
                .position(|id| !self.in_flight.contains(id))
            else {
                break;
            };
            if let Some(id) = self.order.remove(pos) {
                self.snapshots.remove(&id);
                evicted.push(id);
            }
        }
        evicted
    }
}

/// Holds snapshots and restores them through the gateway
pub struct SnapshotStore {
    gateway: Arc<dyn SqlGateway>,
    config: SnapshotConfig,
    state: Mutex<SnapshotState>,
    persistence: Option<Arc<dyn UndoPersistence>>,
}

impl SnapshotStore {
    /// Create a memory-only store
    pub fn new(gateway: Arc<dyn SqlGateway>, config: SnapshotConfig) -> Self {
        Self {
            gateway,
            config,
            state: Mutex::new(SnapshotState::default()),
            persistence: None,
        }
    }

    /// Mirror snapshots to durable storage
    pub fn with_persistence(mut self, persistence: Arc<dyn UndoPersistence>) -> Self {
        self.persistence = Some(persistence);
        self
    }

    /// Gateway the store reads and restores through
    pub fn gateway(&self) -> &Arc<dyn SqlGateway> {
        &self.gateway
    }

    /// Retention settings
    pub fn config(&self) -> SnapshotConfig {
        self.config
    }

    /// Capture the rows an upcoming UPDATE or DELETE will touch
    ///
    /// Returns `None` when no rows match.
    pub async fn capture(
        &self,
        workflow_id: &str,
        step_id: &str,
        table: &str,
        where_clause: Option<&str>,
        statement: &str,
    ) -> UndoResult<Option<String>> {
        let mut sql = format!("SELECT * FROM {}", quote_ident(table));
        if let Some(condition) = where_clause {
            sql.push_str(" WHERE ");
            sql.push_str(condition);
        }

        let rows = self.gateway.query(&sql, &[]).await?;
        if rows.is_empty() {
            debug!(workflow_id = %workflow_id, table = %table, "no rows matched, snapshot skipped");
            return Ok(None);
        }

        let primary_key = match self.gateway.primary_key_column(table).await {
            Ok(Some(column)) => column,
            Ok(None) => DEFAULT_PRIMARY_KEY.to_string(),
            Err(e) => {
                warn!(table = %table, error = %e, "primary key introspection failed, assuming 'id'");
                DEFAULT_PRIMARY_KEY.to_string()
            }
        };

        let created_at = Utc::now();
        let snapshot = Snapshot {
            id: Uuid::new_v4().to_string(),
            workflow_id: workflow_id.to_string(),
            step_id: step_id.to_string(),
            table: table.to_string(),
            primary_key,
            rows,
            statement: statement.to_string(),
            created_at,
            expires_at: created_at + self.config.ttl(),
            restored_at: None,
        };
        let id = snapshot.id.clone();

        let evicted = {
            let mut state = self.state.lock();
            state.insert(snapshot.clone());
            state.evict_over_capacity(self.config.max_snapshots)
        };

        info!(
            snapshot_id = %id,
            workflow_id = %workflow_id,
            table = %table,
            rows = snapshot.row_count(),
            "snapshot captured"
        );
        if !evicted.is_empty() {
            debug!(count = evicted.len(), "evicted oldest snapshots over capacity");
        }

        if let Some(persistence) = &self.persistence {
            if let Err(e) = persistence.save_snapshot(&snapshot).await {
                warn!(snapshot_id = %id, error = %e, "failed to persist snapshot");
            }
            self.forget_persisted(persistence, &evicted).await;
        }

        Ok(Some(id))
    }

    /// Whether a snapshot can be restored right now
    pub fn can_restore(&self, id: &str) -> bool {
        let state = self.state.lock();
        match state.snapshots.get(id) {
            Some(snapshot) => {
                !snapshot.is_restored()
                    && !snapshot.is_expired(Utc::now())
                    && !state.in_flight.contains(id)
            }
            None => false,
        }
    }

    /// Write captured rows back, returning how many rows were restored
    ///
    /// Rows that still exist get their non-key columns set back; deleted rows are
    /// re-inserted in full. A partially failed restore leaves the snapshot restorable.
    pub async fn restore(&self, id: &str) -> UndoResult<usize> {
        let snapshot = {
            let mut state = self.state.lock();
            let snapshot = state
                .snapshots
                .get(id)
                .cloned()
                .ok_or_else(|| UndoError::snapshot_not_found(id))?;
            if snapshot.is_restored() {
                return Err(UndoError::AlreadyRestored(id.to_string()));
            }
            if snapshot.is_expired(Utc::now()) {
                return Err(UndoError::SnapshotExpired(id.to_string()));
            }
            if !state.in_flight.insert(id.to_string()) {
                return Err(UndoError::InFlight(id.to_string()));
            }
            snapshot
        };

        let result = self.write_rows(&snapshot).await;

        let restored = {
            let mut state = self.state.lock();
            state.in_flight.remove(id);
            match (&result, state.snapshots.get_mut(id)) {
                (Ok(_), Some(stored)) => {
                    stored.restored_at = Some(Utc::now());
                    Some(stored.clone())
                }
                _ => None,
            }
        };

        match &result {
            Ok(count) => {
                info!(snapshot_id = %id, table = %snapshot.table, rows = count, "snapshot restored");
                if let (Some(persistence), Some(restored)) = (&self.persistence, restored) {
                    if let Err(e) = persistence.save_snapshot(&restored).await {
                        warn!(snapshot_id = %id, error = %e, "failed to persist restored snapshot");
                    }
                }
            }
            Err(e) => warn!(snapshot_id = %id, error = %e, "snapshot restore failed"),
        }

        result
    }

    async fn write_rows(&self, snapshot: &Snapshot) -> UndoResult<usize> {
        let table = quote_ident(&snapshot.table);
        let key = quote_ident(&snapshot.primary_key);
        let mut restored = 0;

        for row in &snapshot.rows {
            let key_value = row
                .get(&snapshot.primary_key)
                .cloned()
                .ok_or_else(|| SqlError::missing_column(snapshot.primary_key.clone()))?;

            let exists = self
                .gateway
                .count(
                    &format!("SELECT COUNT(*) FROM {} WHERE {} = ?", table, key),
                    std::slice::from_ref(&key_value),
                )
                .await?
                > 0;

            if exists {
                let columns: Vec<(&String, &SqlValue)> = row
                    .iter()
                    .filter(|(column, _)| **column != snapshot.primary_key)
                    .collect();
                if !columns.is_empty() {
                    let assignments = columns
                        .iter()
                        .map(|(column, _)| format!("{} = ?", quote_ident(column)))
                        .collect::<Vec<_>>()
                        .join(", ");
                    let mut params: Vec<SqlValue> =
                        columns.iter().map(|(_, value)| (*value).clone()).collect();
                    params.push(key_value);

                    self.gateway
                        .execute(
                            &format!("UPDATE {} SET {} WHERE {} = ?", table, assignments, key),
                            &params,
                        )
                        .await?;
                }
            } else {
                let columns = row
                    .keys()
                    .map(|column| quote_ident(column))
                    .collect::<Vec<_>>()
                    .join(", ");
                let placeholders = vec!["?"; row.len()].join(", ");
                let params: Vec<SqlValue> = row.values().cloned().collect();

                self.gateway
                    .execute(
                        &format!("INSERT INTO {} ({}) VALUES ({})", table, columns, placeholders),
                        &params,
                    )
                    .await?;
            }

            restored += 1;
        }

        Ok(restored)
    }

    /// Look up a snapshot
    pub fn get(&self, id: &str) -> Option<Snapshot> {
        self.state.lock().snapshots.get(id).cloned()
    }

    /// Snapshots of a workflow, oldest first
    pub fn list_for_workflow(&self, workflow_id: &str) -> Vec<Snapshot> {
        let state = self.state.lock();
        state
            .order
            .iter()
            .filter_map(|id| state.snapshots.get(id))
            .filter(|snapshot| snapshot.workflow_id == workflow_id)
            .cloned()
            .collect()
    }

    /// Number of snapshots held
    pub fn len(&self) -> usize {
        self.state.lock().snapshots.len()
    }

    /// Whether the store holds no snapshots
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Current statistics
    pub fn stats(&self) -> SnapshotStats {
        let now = Utc::now();
        let state = self.state.lock();
        SnapshotStats {
            total: state.snapshots.len(),
            restored: state.snapshots.values().filter(|s| s.is_restored()).count(),
            expired: state.snapshots.values().filter(|s| s.is_expired(now)).count(),
            in_flight: state.in_flight.len(),
            rows: state.snapshots.values().map(Snapshot::row_count).sum(),
        }
    }

    /// Remove every snapshot past expiry, returning how many were removed
    pub async fn sweep_expired(&self) -> usize {
        let now = Utc::now();
        let removed: Vec<String> = {
            let mut state = self.state.lock();
            let expired: Vec<String> = state
                .snapshots
                .values()
                .filter(|s| s.is_expired(now) && !state.in_flight.contains(&s.id))
                .map(|s| s.id.clone())
                .collect();
            for id in &expired {
                state.remove(id);
            }
            expired
        };

        if !removed.is_empty() {
            info!(count = removed.len(), "swept expired snapshots");
            if let Some(persistence) = &self.persistence {
                self.forget_persisted(persistence, &removed).await;
            }
        }

        removed.len()
    }

    /// Drop every snapshot of a workflow that is not being restored
    pub async fn discard_workflow(&self, workflow_id: &str) -> usize {
        let removed: Vec<String> = {
            let mut state = self.state.lock();
            let ids: Vec<String> = state
                .snapshots
                .values()
                .filter(|s| s.workflow_id == workflow_id && !state.in_flight.contains(&s.id))
                .map(|s| s.id.clone())
                .collect();
            for id in &ids {
                state.remove(id);
            }
            ids
        };

        if let Some(persistence) = &self.persistence {
            self.forget_persisted(persistence, &removed).await;
        }
        debug!(workflow_id = %workflow_id, count = removed.len(), "discarded workflow snapshots");
        removed.len()
    }

    /// Reload unexpired snapshots from durable storage
    pub async fn rehydrate(&self) -> UndoResult<usize> {
        let Some(persistence) = &self.persistence else {
            return Ok(0);
        };

        let now = Utc::now();
        let mut loaded = persistence.load_snapshots().await?;
        loaded.sort_by(|a, b| a.created_at.cmp(&b.created_at));

        let (count, evicted) = {
            let mut state = self.state.lock();
            let mut count = 0;
            for snapshot in loaded {
                if snapshot.is_expired(now) || state.snapshots.contains_key(&snapshot.id) {
                    continue;
                }
                state.insert(snapshot);
                count += 1;
            }
            (count, state.evict_over_capacity(self.config.max_snapshots))
        };

        self.forget_persisted(persistence, &evicted).await;
        info!(count, "rehydrated snapshots");
        Ok(count)
    }

    async fn forget_persisted(&self, persistence: &Arc<dyn UndoPersistence>, ids: &[String]) {
        if ids.is_empty() {
            return;
        }
        if let Err(e) = persistence.delete_snapshots(ids).await {
            warn!(count = ids.len(), error = %e, "failed to delete persisted snapshots");
        }
    }
}
