//! Rowguard Audit Ledger
//!
//! Append-only, per-workflow event history. Every lifecycle transition, executed
//! statement and reversal of a rowguard workflow lands here, and [`Ledger::timeline`]
//! rebuilds the chronological trail on demand.
//!
//! ## Usage
//!
//! ```rust,no_run
//! use rowguard_activity_log::{Ledger, LedgerEventKind};
//!
//! # async fn example() {
//! let ledger = Ledger::new(100);
//! ledger.begin_workflow("wf-1", "modify", "raise attack by 10%").await;
//! ledger.log_sql_executed("wf-1", "execute", "UPDATE units SET attack = attack * 1.1", 42).await;
//!
//! let executed = ledger.events_of_kind("wf-1", LedgerEventKind::SqlExecuted).await;
//! assert_eq!(executed.len(), 1);
//! # }
//! ```

#![warn(missing_docs)]

pub mod error;
pub mod events;
pub mod ledger;
pub mod storage;

#[cfg(test)]
mod ledger_properties;

pub use error::{LedgerError, LedgerResult};
pub use events::{LedgerEvent, LedgerEventKind, RecordStatus, WorkflowRecord};
pub use ledger::{Ledger, DEFAULT_MAX_WORKFLOWS};
pub use storage::{LedgerStore, SqliteLedgerStore};
