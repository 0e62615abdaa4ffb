#![warn(missing_docs)]

//! Snapshot-based undo for rowguard
//!
//! Captures before-images of rows ahead of UPDATE/DELETE statements, records every
//! executed statement as an [`Operation`] on per-workflow and global LIFO stacks, and
//! reverses them on demand.

pub mod error;
pub mod operation;
pub mod persistence;
pub mod registry;
pub mod snapshot;
pub mod sweeper;

#[cfg(test)]
mod registry_properties;

// Re-export public API
pub use error::{UndoError, UndoResult};
pub use operation::{Operation, OperationStatus};
pub use persistence::{SqliteUndoPersistence, UndoPersistence};
pub use registry::{RollbackPolicy, UndoRegistry, UndoReport, WorkflowUndoReport, DEFAULT_GLOBAL_MAX};
pub use snapshot::{
    Snapshot, SnapshotConfig, SnapshotStats, SnapshotStore, DEFAULT_MAX_SNAPSHOTS,
    DEFAULT_PRIMARY_KEY, DEFAULT_SNAPSHOT_TTL_SECS,
};
pub use sweeper::SnapshotSweeper;
