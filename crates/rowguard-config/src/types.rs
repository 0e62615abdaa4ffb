//! Configuration types

use rowguard_activity_log::DEFAULT_MAX_WORKFLOWS;
use rowguard_undo::{
    RollbackPolicy, SnapshotConfig, DEFAULT_GLOBAL_MAX, DEFAULT_MAX_SNAPSHOTS,
    DEFAULT_SNAPSHOT_TTL_SECS,
};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// Main rowguard configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(default)]
pub struct RowguardConfig {
    /// Snapshot retention
    pub snapshots: SnapshotSettings,
    /// Undo stacks
    pub undo: UndoSettings,
    /// In-memory audit history
    pub ledger: LedgerSettings,
    /// Durable storage
    pub storage: StorageSettings,
    /// Log output
    pub logging: LoggingSettings,
}

/// Snapshot retention settings
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct SnapshotSettings {
    /// Seconds a snapshot stays restorable
    pub ttl_secs: u64,
    /// Maximum snapshots held before the oldest are evicted
    pub max_snapshots: usize,
    /// Seconds between background sweeps
    pub sweep_interval_secs: u64,
}

impl Default for SnapshotSettings {
    fn default() -> Self {
        Self {
            ttl_secs: DEFAULT_SNAPSHOT_TTL_SECS,
            max_snapshots: DEFAULT_MAX_SNAPSHOTS,
            sweep_interval_secs: 60,
        }
    }
}

impl SnapshotSettings {
    /// Store settings derived from this section
    pub fn to_snapshot_config(&self) -> SnapshotConfig {
        SnapshotConfig {
            ttl_secs: self.ttl_secs,
            max_snapshots: self.max_snapshots,
        }
    }

    /// Sweep interval as a duration
    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.sweep_interval_secs)
    }
}

/// Undo stack settings
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct UndoSettings {
    /// Size of the global undo stack
    pub global_max: usize,
    /// Behavior of whole-workflow rollback after a failure
    pub rollback_policy: RollbackPolicy,
}

impl Default for UndoSettings {
    fn default() -> Self {
        Self {
            global_max: DEFAULT_GLOBAL_MAX,
            rollback_policy: RollbackPolicy::default(),
        }
    }
}

/// Audit ledger settings
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct LedgerSettings {
    /// Workflows kept in memory
    pub max_workflows: usize,
}

impl Default for LedgerSettings {
    fn default() -> Self {
        Self {
            max_workflows: DEFAULT_MAX_WORKFLOWS,
        }
    }
}

/// Durable storage settings
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(default)]
pub struct StorageSettings {
    /// SQLite file holding the ledger and undo state; memory-only when unset
    #[serde(skip_serializing_if = "Option::is_none")]
    pub audit_database: Option<PathBuf>,
}

/// Log output settings
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct LoggingSettings {
    /// Default filter directive, overridden by `RUST_LOG`
    pub level: String,
    /// Emit JSON lines instead of human-readable output
    pub json: bool,
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json: false,
        }
    }
}
