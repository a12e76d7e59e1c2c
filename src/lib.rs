//! An embedded single-file key/value table engine.
//!
//! Each [`table::Table`] is a persistent collection of fixed-width rows, addressed by a
//! user-declared primary key column. [`set::Set`] presents the same engine as a persistent set
//! of values. The engine is designed for processes that need durable record storage with
//! bounded memory and safe concurrent access from multiple in-process tasks, without embedding a
//! full database.
//!
//! Multi-process sharing of a single file, secondary indexes, range/prefix scans,
//! multi-key transactions, crash-consistency beyond an ordinary write-through file, compaction
//! policies beyond swap-with-last, and compression are all out of scope.

#![deny(clippy::all)]
#![allow(clippy::module_name_repetitions)]

#[macro_use]
extern crate tracing;

pub mod codec;
pub mod config;
pub mod error;
mod file;
mod index;
mod row;
pub mod schema;
pub mod set;
pub mod table;

pub use codec::{ColumnType, Value};
pub use config::{BuildError, SetConfig, SetConfigBuilder, TableConfig, TableConfigBuilder};
pub use error::{OpenError, SchemaError, TransactionError, ValidationError};
pub use schema::{Column, ColumnDecl, Schema};
pub use set::Set;
pub use table::{Handle, KeyLiteral, Table};
