#![warn(missing_docs)]

//! Rowguard relational access boundary
//!
//! The workflow core never talks to a database driver directly. Everything it needs
//! from the relational store goes through the [`SqlGateway`] trait: reading the rows a
//! statement is about to touch, executing an already-approved statement, and looking
//! up a table's primary key. This crate also owns the value model shared by snapshots
//! and step results, and the [`StatementKind`] classifier that turns statement text
//! into a tagged variant once, at capture time.

pub mod error;
pub mod gateway;
pub mod sqlite;
pub mod statement;
pub mod value;

#[cfg(test)]
mod statement_properties;

pub use error::{SqlError, SqlResult};
pub use gateway::{ExecutionOutcome, GeneratedKeys, SqlGateway};
pub use sqlite::SqliteGateway;
pub use statement::StatementKind;
pub use value::{changed_columns, quote_ident, Row, SqlValue};
