//! Schema-validated tables.
//!
//! A [`Table`] holds ordered columns, ordered rows, and a `Record` type
//! descriptor mapping each column key to the type inferred so far. Every
//! [`Table::add_data`] narrows that record against the incoming row; a row
//! that cannot narrow it is rejected and nothing changes.
//!
//! The record is a derived cache: [`Table::recompute_column_types`] folds
//! every stored row over the declared column types again and must land on
//! the same record.
//!
//! Serialization toward a run log or a manifest lives in [`serialize`];
//! lazily loaded multi-part tables live in [`partitioned`].

mod error;
pub mod partitioned;
pub mod serialize;

pub use error::TableError;
pub(crate) use error::{
    BroadcastLengthSnafu, DuplicateColumnSnafu, InvalidColumnNameSnafu, PartLoadSnafu,
    PartNotTableSnafu, SchemaMismatchSnafu, ShapeSnafu, TypeNarrowingSnafu, UnknownColumnSnafu,
};
pub use partitioned::{PartState, PartStats, PartitionedTable};

use std::collections::HashSet;

use indexmap::IndexMap;
use snafu::prelude::*;

use crate::config::TableLimits;
use crate::dtypes::TypeDescriptor;
use crate::media::MediaFile;
use crate::value::{ColumnName, Value};

/// Row cap applied when a table is serialized to a run log.
pub const MAX_ROWS: usize = 10_000;

/// Row cap applied when a table is serialized to a manifest.
pub const MAX_ARTIFACT_ROWS: usize = 200_000;

/// A setting given once for every column or once per column.
#[derive(Debug, Clone, PartialEq)]
pub enum Broadcast<T> {
    /// The same setting for every column.
    All(T),
    /// One setting per column, in column order.
    PerColumn(Vec<T>),
}

impl<T: Clone> Broadcast<T> {
    fn expand(self, columns: usize, setting: &'static str) -> Result<Vec<T>, TableError> {
        match self {
            Broadcast::All(value) => Ok(vec![value; columns]),
            Broadcast::PerColumn(values) => {
                ensure!(
                    values.len() == columns,
                    BroadcastLengthSnafu {
                        setting,
                        expected: columns,
                        found: values.len(),
                    }
                );
                Ok(values)
            }
        }
    }
}

impl From<bool> for Broadcast<bool> {
    fn from(value: bool) -> Self {
        Broadcast::All(value)
    }
}

impl From<Vec<bool>> for Broadcast<bool> {
    fn from(values: Vec<bool>) -> Self {
        Broadcast::PerColumn(values)
    }
}

impl From<TypeDescriptor> for Broadcast<TypeDescriptor> {
    fn from(value: TypeDescriptor) -> Self {
        Broadcast::All(value)
    }
}

impl From<Vec<TypeDescriptor>> for Broadcast<TypeDescriptor> {
    fn from(values: Vec<TypeDescriptor>) -> Self {
        Broadcast::PerColumn(values)
    }
}

/// An ordered set of rows with inferred column types.
#[derive(Debug, Clone)]
pub struct Table {
    columns: Vec<ColumnName>,
    rows: Vec<Vec<Value>>,
    column_types: TypeDescriptor,
    declared: IndexMap<String, TypeDescriptor>,
    limits: TableLimits,
    pub(crate) file: MediaFile,
}

impl Table {
    /// Create an empty table.
    ///
    /// Each column starts at its `dtype`, wrapped in `Optional` where its
    /// `optional` flag is set. Either setting may be broadcast.
    pub fn new(
        columns: Vec<ColumnName>,
        optional: impl Into<Broadcast<bool>>,
        dtype: impl Into<Broadcast<TypeDescriptor>>,
    ) -> Result<Self, TableError> {
        let optional = optional.into().expand(columns.len(), "optional")?;
        let dtype = dtype.into().expand(columns.len(), "dtype")?;

        let mut seen = HashSet::with_capacity(columns.len());
        let mut declared = IndexMap::with_capacity(columns.len());
        for ((column, optional), dtype) in columns.iter().zip(optional).zip(dtype) {
            let key = column.key();
            ensure!(
                seen.insert(key.clone()),
                DuplicateColumnSnafu {
                    column: column.clone()
                }
            );
            let ty = if optional {
                TypeDescriptor::optional(dtype)
            } else {
                dtype
            };
            declared.insert(key, ty);
        }

        Ok(Self {
            columns,
            rows: Vec::new(),
            column_types: TypeDescriptor::Record(declared.clone()),
            declared,
            limits: TableLimits::default(),
            file: MediaFile::default(),
        })
    }

    /// Create an empty table with optional columns of unknown type.
    pub fn with_columns(columns: Vec<ColumnName>) -> Result<Self, TableError> {
        Self::new(columns, true, TypeDescriptor::Unknown)
    }

    /// Create an empty table whose columns accept values of mixed kinds.
    ///
    /// Every column is seeded with the empty union, which widens instead of
    /// rejecting a value of a new kind.
    pub fn with_mixed_types(columns: Vec<ColumnName>) -> Result<Self, TableError> {
        Self::new(columns, false, TypeDescriptor::empty_union())
    }

    /// Create a table and add `rows` in order.
    pub fn from_rows(columns: Vec<ColumnName>, rows: Vec<Vec<Value>>) -> Result<Self, TableError> {
        let mut table = Self::with_columns(columns)?;
        for row in rows {
            table.add_data(row)?;
        }
        Ok(table)
    }

    /// Replace the row caps used during serialization.
    pub fn with_limits(mut self, limits: TableLimits) -> Self {
        self.limits = limits;
        self
    }

    /// Row caps used during serialization.
    pub fn limits(&self) -> TableLimits {
        self.limits
    }

    /// Column names in order.
    pub fn columns(&self) -> &[ColumnName] {
        &self.columns
    }

    /// The `Record` descriptor of all column types.
    pub fn column_types(&self) -> &TypeDescriptor {
        &self.column_types
    }

    /// Current type of one column.
    pub fn column_type(&self, column: &ColumnName) -> Result<&TypeDescriptor, TableError> {
        let field = match &self.column_types {
            TypeDescriptor::Record(fields) => fields.get(&column.key()),
            _ => None,
        };
        field.context(UnknownColumnSnafu {
            column: column.clone(),
        })
    }

    /// Number of rows.
    pub fn len(&self) -> usize {
        self.rows.len()
    }

    /// True when the table has no rows.
    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Append one row.
    ///
    /// Fails with [`TableError::Shape`] when the row length differs from the
    /// column count and with [`TableError::TypeNarrowing`] when any cell is
    /// incompatible with its column's type. On failure nothing is appended
    /// and the column types are unchanged.
    pub fn add_data(&mut self, row: Vec<Value>) -> Result<(), TableError> {
        ensure!(
            row.len() == self.columns.len(),
            ShapeSnafu {
                expected: self.columns.len(),
                found: row.len(),
            }
        );

        let incoming = self.row_record(&row);
        let narrowed = self.column_types.assign(&incoming);
        if narrowed.is_invalid() {
            return TypeNarrowingSnafu {
                columns: self.failing_columns(&row),
                explanation: self.column_types.explain(&incoming),
            }
            .fail();
        }

        self.column_types = narrowed;
        self.rows.push(row);
        self.file = MediaFile::default();
        Ok(())
    }

    /// Re-type a column, re-checking every stored value against `dtype`.
    ///
    /// Returns the resulting column type. Fails with
    /// [`TableError::TypeNarrowing`] when a stored value does not fit, in
    /// which case the column keeps its previous type.
    pub fn cast(
        &mut self,
        column: impl Into<ColumnName>,
        dtype: TypeDescriptor,
        optional: bool,
    ) -> Result<TypeDescriptor, TableError> {
        let column = column.into();
        let index = self.column_index(&column)?;
        let declared = if optional {
            TypeDescriptor::optional(dtype)
        } else {
            dtype
        };

        let mut ty = declared.clone();
        for row in &self.rows {
            let cell = &row[index];
            let narrowed = ty.assign(cell);
            if narrowed.is_invalid() {
                return TypeNarrowingSnafu {
                    columns: vec![column.key()],
                    explanation: format!(
                        "Existing data of type {} cannot be cast to {declared}\n{}",
                        TypeDescriptor::of(cell),
                        ty.explain(cell)
                    ),
                }
                .fail();
            }
            ty = narrowed;
        }

        let key = column.key();
        self.declared.insert(key.clone(), declared);
        if let TypeDescriptor::Record(fields) = &mut self.column_types {
            fields.insert(key, ty.clone());
        }
        self.file = MediaFile::default();
        Ok(ty)
    }

    /// Fold every stored row over the declared column types from scratch.
    pub fn recompute_column_types(&self) -> TypeDescriptor {
        self.rows
            .iter()
            .fold(TypeDescriptor::Record(self.declared.clone()), |ty, row| {
                ty.assign(&self.row_record(row))
            })
    }

    /// Iterate `(index, row)` pairs from the first row. Each call starts over.
    pub fn iter_rows(&self) -> impl Iterator<Item = (usize, &[Value])> + '_ {
        self.rows.iter().map(Vec::as_slice).enumerate()
    }

    /// All values of one column, in row order.
    pub fn get_column(&self, column: &ColumnName) -> Result<Vec<&Value>, TableError> {
        let index = self.column_index(column)?;
        Ok(self.rows.iter().map(|row| &row[index]).collect())
    }

    /// Consume the table, returning its rows.
    pub fn into_rows(self) -> Vec<Vec<Value>> {
        self.rows
    }

    pub(crate) fn rows(&self) -> &[Vec<Value>] {
        &self.rows
    }

    pub(crate) fn rows_mut(&mut self) -> &mut [Vec<Value>] {
        &mut self.rows
    }

    /// Adopt a column record decoded from JSON as both cache and seed.
    pub(crate) fn restore_column_types(&mut self, column_types: TypeDescriptor) {
        if let TypeDescriptor::Record(fields) = &column_types {
            self.declared = fields.clone();
        }
        self.column_types = column_types;
    }

    fn column_index(&self, column: &ColumnName) -> Result<usize, TableError> {
        let key = column.key();
        self.columns
            .iter()
            .position(|c| c.key() == key)
            .context(UnknownColumnSnafu {
                column: column.clone(),
            })
    }

    fn row_record(&self, row: &[Value]) -> Value {
        Value::Record(
            self.columns
                .iter()
                .zip(row)
                .map(|(column, cell)| (column.key(), cell.clone()))
                .collect(),
        )
    }

    fn failing_columns(&self, row: &[Value]) -> Vec<String> {
        let TypeDescriptor::Record(fields) = &self.column_types else {
            return Vec::new();
        };
        self.columns
            .iter()
            .zip(row)
            .filter_map(|(column, cell)| {
                let key = column.key();
                match fields.get(&key) {
                    Some(field) if field.assign(cell).is_invalid() => Some(key),
                    _ => None,
                }
            })
            .collect()
    }
}

impl PartialEq for Table {
    fn eq(&self, other: &Self) -> bool {
        self.columns == other.columns
            && self.column_types == other.column_types
            && self.rows == other.rows
    }
}
