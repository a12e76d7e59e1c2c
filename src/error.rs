//! Error kinds surfaced across the engine's public boundary.
//!
//! Mirrors the teacher crate's per-subsystem `#[derive(Debug, Snafu)]` enums: one enum per
//! fallible subsystem, with `#[snafu(display(...))]` messages that name the offending field
//! rather than a single flat error type for the whole crate.

use std::io;

use snafu::Snafu;

/// Errors raised while resolving a user-supplied schema.
#[derive(Debug, Snafu)]
pub enum SchemaError {
    #[snafu(display("column '{}' has an empty name", name))]
    EmptyName { name: String },
    #[snafu(display("duplicate column name '{}'", name))]
    DuplicateName { name: String },
    #[snafu(display("key column '{}' cannot declare a default value", name))]
    KeyHasDefault { name: String },
    #[snafu(display("unknown type tag '{}' for column '{}'", type_name, name))]
    UnknownType { name: String, type_name: String },
    #[snafu(display(
        "fixed-width column '{}' must not declare an explicit maximum width",
        name
    ))]
    FixedWidthHasExplicitWidth { name: String },
    #[snafu(display(
        "column '{}' is not fixed-width and declares neither a maximum width nor a default",
        name
    ))]
    MissingWidthOrDefault { name: String },
    #[snafu(display("default value for column '{}' does not fit within its width: {}", name, reason))]
    DefaultOutOfRange { name: String, reason: String },
    #[snafu(display("key column name '{}' does not match any declared column", name))]
    UnknownKeyColumn { name: String },
    #[snafu(display("table must declare at least one column"))]
    NoColumns,
}

/// Errors raised while opening or creating the backing file.
#[derive(Debug, Snafu)]
pub enum OpenError {
    #[snafu(display("failed to resolve schema: {}", source))]
    Schema { source: SchemaError },
    #[snafu(display("I/O error while opening table file: {}", source))]
    Io { source: io::Error },
    #[snafu(display(
        "schema mismatch: on-disk preamble does not match the configured schema ({})",
        reason
    ))]
    PreambleMismatch { reason: String },
    #[snafu(display("table file is truncated or corrupted: {}", reason))]
    Truncated { reason: String },
}

/// Errors raised when a key or field value fails to validate against its column.
#[derive(Debug, Snafu)]
pub enum ValidationError {
    #[snafu(display(
        "value for column '{}' does not fit within its declared width or type: {}",
        column,
        reason
    ))]
    InvalidValue { column: String, reason: String },
    #[snafu(display("no such column '{}'", column))]
    UnknownColumn { column: String },
}

/// Errors surfaced from a transaction run through the table facade.
///
/// Generic over the error type a caller's transaction body can itself fail with, so that body
/// errors propagate unchanged alongside the engine's own validation and I/O failures.
#[derive(Debug, Snafu)]
pub enum TransactionError<E> {
    #[snafu(display("key failed validation: {}", source))]
    InvalidKey { source: ValidationError },
    #[snafu(display("field failed validation after transaction body ran: {}", source))]
    InvalidField { source: ValidationError },
    #[snafu(display("I/O error during transaction: {}", source))]
    Io { source: io::Error },
    #[snafu(display("transaction body failed: {}", source))]
    Body { source: E },
}
