//! Tables stored as parts under a manifest directory.
//!
//! A [`PartitionedTable`] names a directory of table entries in a manifest.
//! Its rows are the ordered union of the parts' rows. Iteration loads one
//! part at a time, yields its rows with a running index, and frees the part
//! before the next one is loaded, so at most one part is resident.

use serde_json::{Value as Json, json};
use snafu::prelude::*;

use super::{PartLoadSnafu, PartNotTableSnafu, SchemaMismatchSnafu, Table, TableError};
use crate::destination::{Destination, ManifestEntry, SourceManifest};
use crate::media::{
    MediaError, MissingFieldSnafu, RichValue, UnresolvedReferenceSnafu, UnsupportedDestinationSnafu,
};
use crate::value::{ColumnName, Value};

/// Residency of one part.
#[derive(Debug, Clone, PartialEq)]
pub enum PartState {
    /// Not in memory.
    Unloaded,
    /// Fully materialized.
    Loaded(Table),
}

/// Load and free counters across every iteration of one table.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PartStats {
    /// Parts loaded.
    pub loads: usize,
    /// Parts freed.
    pub frees: usize,
    /// Largest number of parts resident at once.
    pub max_resident: usize,
}

#[derive(Debug, Clone)]
struct PartEntry {
    entry: ManifestEntry,
    state: PartState,
}

/// A table whose rows live in the parts under `parts_path`.
#[derive(Debug, Clone)]
pub struct PartitionedTable {
    parts_path: String,
    parts: Vec<PartEntry>,
    stats: PartStats,
}

impl PartitionedTable {
    /// A partitioned table over the manifest directory `parts_path`.
    ///
    /// Parts are discovered when the table is loaded back with
    /// [`PartitionedTable::from_json`].
    pub fn new(parts_path: impl Into<String>) -> Self {
        Self {
            parts_path: parts_path.into(),
            parts: Vec::new(),
            stats: PartStats::default(),
        }
    }

    /// Directory the parts live under.
    pub fn parts_path(&self) -> &str {
        &self.parts_path
    }

    /// Manifest paths of the discovered parts, in iteration order.
    pub fn part_paths(&self) -> impl Iterator<Item = &str> {
        self.parts.iter().map(|part| part.entry.path.as_str())
    }

    /// Residency of each part, in iteration order.
    pub fn part_states(&self) -> impl Iterator<Item = &PartState> {
        self.parts.iter().map(|part| &part.state)
    }

    /// Load and free counters.
    pub fn stats(&self) -> PartStats {
        self.stats
    }

    /// Serialize as `{"_type": "partitioned-table", "parts_path"}`.
    ///
    /// Only manifests hold partitioned tables.
    pub fn to_json(&mut self, destination: &mut Destination<'_>) -> Result<Json, MediaError> {
        ensure!(
            matches!(destination, Destination::Manifest(_)),
            UnsupportedDestinationSnafu {
                kind: "partitioned-table",
                destination: destination.kind_name(),
            }
        );
        Ok(json!({
            "_type": "partitioned-table",
            "parts_path": self.parts_path,
        }))
    }

    /// Load from JSON, discovering parts in `source`.
    pub fn from_json(json: &Json, source: &dyn SourceManifest) -> Result<Self, MediaError> {
        let parts_path = json
            .get("parts_path")
            .and_then(Json::as_str)
            .context(MissingFieldSnafu {
                kind: "partitioned-table",
                field: "parts_path",
            })?;
        let mut table = Self::new(parts_path);
        table.parts = source
            .get_entries_in_directory(parts_path)
            .into_iter()
            .map(|entry| PartEntry {
                entry,
                state: PartState::Unloaded,
            })
            .collect();
        Ok(table)
    }

    /// Iterate `(index, row)` across every part.
    ///
    /// Indices run from zero without gaps across parts. The first part whose
    /// columns differ from the first part's yields
    /// [`TableError::SchemaMismatch`] and ends the iteration.
    pub fn iter_rows<'a>(&'a mut self, source: &'a dyn SourceManifest) -> PartitionedRows<'a> {
        for part in 0..self.parts.len() {
            self.free(part);
        }
        PartitionedRows {
            table: self,
            source,
            part: 0,
            entered: None,
            row: 0,
            index: 0,
            columns: None,
            done: false,
        }
    }

    fn resident(&self) -> usize {
        self.parts
            .iter()
            .filter(|part| matches!(part.state, PartState::Loaded(_)))
            .count()
    }

    fn load(&mut self, part: usize, source: &dyn SourceManifest) -> Result<(), TableError> {
        let path = self.parts[part].entry.path.clone();
        let loaded = source
            .get(&path)
            .context(PartLoadSnafu { path: path.clone() })?;
        let table = match loaded {
            Some(RichValue::Table(table)) => table,
            Some(other) => {
                return PartNotTableSnafu {
                    path,
                    found: other.type_name(),
                }
                .fail();
            }
            None => {
                return Err(UnresolvedReferenceSnafu { path: path.clone() }.build())
                    .context(PartLoadSnafu { path });
            }
        };

        self.parts[part].state = PartState::Loaded(table);
        self.stats.loads += 1;
        self.stats.max_resident = self.stats.max_resident.max(self.resident());
        Ok(())
    }

    fn free(&mut self, part: usize) {
        if matches!(self.parts[part].state, PartState::Loaded(_)) {
            self.parts[part].state = PartState::Unloaded;
            self.stats.frees += 1;
        }
    }
}

impl PartialEq for PartitionedTable {
    fn eq(&self, other: &Self) -> bool {
        self.parts_path == other.parts_path
    }
}

/// Row iterator over a [`PartitionedTable`]; see
/// [`PartitionedTable::iter_rows`].
pub struct PartitionedRows<'a> {
    table: &'a mut PartitionedTable,
    source: &'a dyn SourceManifest,
    part: usize,
    entered: Option<usize>,
    row: usize,
    index: usize,
    columns: Option<Vec<ColumnName>>,
    done: bool,
}

impl PartitionedRows<'_> {
    fn fail(&mut self, err: TableError) -> Option<Result<(usize, Vec<Value>), TableError>> {
        self.done = true;
        self.table.free(self.part);
        Some(Err(err))
    }

    /// Load the current part if needed and check its columns.
    fn enter_part(&mut self) -> Result<(), TableError> {
        if matches!(self.table.parts[self.part].state, PartState::Unloaded) {
            self.table.load(self.part, self.source)?;
        }
        self.entered = Some(self.part);
        self.row = 0;

        let PartState::Loaded(part) = &self.table.parts[self.part].state else {
            return Ok(());
        };
        let found = part.columns().to_vec();
        let Some(expected) = &self.columns else {
            self.columns = Some(found);
            return Ok(());
        };
        ensure!(
            *expected == found,
            SchemaMismatchSnafu {
                path: self.table.parts[self.part].entry.path.clone(),
                expected: expected.clone(),
                found,
            }
        );
        Ok(())
    }
}

impl Iterator for PartitionedRows<'_> {
    type Item = Result<(usize, Vec<Value>), TableError>;

    fn next(&mut self) -> Option<Self::Item> {
        while !self.done && self.part < self.table.parts.len() {
            if self.entered != Some(self.part) {
                if let Err(err) = self.enter_part() {
                    return self.fail(err);
                }
            }

            let row = match &self.table.parts[self.part].state {
                PartState::Loaded(part) => part.rows().get(self.row).cloned(),
                PartState::Unloaded => None,
            };
            match row {
                Some(row) => {
                    let index = self.index;
                    self.row += 1;
                    self.index += 1;
                    return Some(Ok((index, row)));
                }
                None => {
                    self.table.free(self.part);
                    self.part += 1;
                }
            }
        }
        None
    }
}

// An abandoned iterator must not leave its part resident.
impl Drop for PartitionedRows<'_> {
    fn drop(&mut self) {
        if self.part < self.table.parts.len() {
            self.table.free(self.part);
        }
    }
}
