//! Error types and SNAFU context selectors for `table`.
//!
//! Every fallible `Table` and `PartitionedTable` operation reports one of
//! these variants. A failed mutation leaves the table exactly as it was.

use snafu::prelude::*;

use crate::media::MediaError;
use crate::value::ColumnName;

/// Errors from building, mutating or iterating tables.
#[derive(Debug, Snafu)]
#[snafu(visibility(pub(crate)))]
pub enum TableError {
    /// A row does not have one cell per column.
    #[snafu(display("This table expects {expected} columns, got a row of {found}"))]
    Shape {
        /// Number of columns.
        expected: usize,
        /// Number of cells in the rejected row.
        found: usize,
    },

    /// One or more cells cannot narrow their column's current type.
    #[snafu(display(
        "Data row contained incompatible types in column(s) {}:\n{explanation}",
        columns.join(", ")
    ))]
    TypeNarrowing {
        /// Keys of the offending columns.
        columns: Vec<String>,
        /// Line-oriented diagnostic from `TypeDescriptor::explain`.
        explanation: String,
    },

    /// The named column does not exist.
    #[snafu(display("Unknown column {column}"))]
    UnknownColumn {
        /// The requested column.
        column: ColumnName,
    },

    /// Two columns share the same key.
    #[snafu(display("Duplicate column {column}"))]
    DuplicateColumn {
        /// The repeated column.
        column: ColumnName,
    },

    /// A per-column setting has a different length than the column list.
    #[snafu(display("{setting} has {found} entries for {expected} columns"))]
    BroadcastLength {
        /// Which setting was mis-sized (`optional` or `dtype`).
        setting: &'static str,
        /// Number of columns.
        expected: usize,
        /// Number of entries supplied.
        found: usize,
    },

    /// Tables added to a manifest must not have periods in column names.
    #[snafu(display("Invalid column name {column}: tables added to a manifest must not contain periods"))]
    InvalidColumnName {
        /// The rejected column.
        column: ColumnName,
    },

    /// Partitioned table parts disagree on their columns.
    #[snafu(display("Table parts have non-matching columns at {path}: {expected:?} != {found:?}"))]
    SchemaMismatch {
        /// Manifest path of the diverging part.
        path: String,
        /// Columns of the first part.
        expected: Vec<ColumnName>,
        /// Columns of the diverging part.
        found: Vec<ColumnName>,
    },

    /// A part could not be loaded from its source manifest.
    #[snafu(display("Failed to load table part {path}: {source}"))]
    PartLoad {
        /// Manifest path of the part.
        path: String,
        /// Underlying media error.
        #[snafu(source(from(MediaError, Box::new)))]
        source: Box<MediaError>,
    },

    /// A part entry holds something other than a table.
    #[snafu(display("Table part {path} holds a {found}, not a table"))]
    PartNotTable {
        /// Manifest path of the part.
        path: String,
        /// Kind of value found instead.
        found: &'static str,
    },
}
