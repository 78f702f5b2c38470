//! Two tables joined on a key, stored only in manifests.

use serde::{Deserialize, Serialize};
use serde_json::{Value as Json, json};
use snafu::prelude::*;

use super::{
    DestinationSnafu, InvalidJoinSnafu, JsonSnafu, MediaError, MissingFieldSnafu, RichValue,
    UnresolvedReferenceSnafu, UnsupportedDestinationSnafu, stage_rich,
};
use crate::destination::{Destination, Manifest, SourceManifest};
use crate::layout::manifest_object_name;
use crate::table::{PartitionedTable, Table};

/// One side of a join.
#[derive(Debug, Clone, PartialEq)]
pub enum JoinSide {
    /// A table already in the manifest, by its `.table.json` path.
    Path(String),
    /// A table added to the manifest with the join.
    Table(Box<Table>),
    /// A partitioned table added to the manifest with the join.
    Partitioned(PartitionedTable),
}

impl From<Table> for JoinSide {
    fn from(table: Table) -> Self {
        JoinSide::Table(Box::new(table))
    }
}

impl From<PartitionedTable> for JoinSide {
    fn from(table: PartitionedTable) -> Self {
        JoinSide::Partitioned(table)
    }
}

impl From<&str> for JoinSide {
    fn from(path: &str) -> Self {
        JoinSide::Path(path.to_string())
    }
}

/// Column the tables are joined on, shared or one per side.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum JoinKey {
    /// Same column name on both sides.
    Single(String),
    /// `[left column, right column]`.
    Pair([String; 2]),
}

impl From<&str> for JoinKey {
    fn from(key: &str) -> Self {
        JoinKey::Single(key.to_string())
    }
}

/// A join of two tables.
#[derive(Debug, Clone, PartialEq)]
pub struct JoinedTable {
    table1: JoinSide,
    table2: JoinSide,
    join_key: JoinKey,
}

impl JoinedTable {
    /// Join `table1` and `table2` on `join_key`.
    ///
    /// Path sides must name a `.table.json` entry.
    pub fn new(
        table1: impl Into<JoinSide>,
        table2: impl Into<JoinSide>,
        join_key: impl Into<JoinKey>,
    ) -> Result<Self, MediaError> {
        let (table1, table2) = (table1.into(), table2.into());
        for side in [&table1, &table2] {
            if let JoinSide::Path(path) = side {
                ensure!(
                    path.ends_with(".table.json"),
                    InvalidJoinSnafu {
                        reason: format!("{path} is not a path to a table"),
                    }
                );
            }
        }
        Ok(Self {
            table1,
            table2,
            join_key: join_key.into(),
        })
    }

    /// Left side.
    pub fn table1(&self) -> &JoinSide {
        &self.table1
    }

    /// Right side.
    pub fn table2(&self) -> &JoinSide {
        &self.table2
    }

    /// Join key.
    pub fn join_key(&self) -> &JoinKey {
        &self.join_key
    }

    /// Serialize toward a manifest, adding table sides to it first.
    pub fn to_json(&mut self, destination: &mut Destination<'_>) -> Result<Json, MediaError> {
        let Destination::Manifest(manifest) = destination else {
            return UnsupportedDestinationSnafu {
                kind: "joined-table",
                destination: destination.kind_name(),
            }
            .fail();
        };
        let manifest: &mut dyn Manifest = &mut **manifest;

        let table1 = ensure_in_manifest(manifest, &self.table1, 1)?;
        let table2 = ensure_in_manifest(manifest, &self.table2, 2)?;
        Ok(json!({
            "_type": "joined-table",
            "table1": table1,
            "table2": table2,
            "join_key": serde_json::to_value(&self.join_key).context(JsonSnafu)?,
        }))
    }

    /// Load a join. Sides found in `source` load as tables; others stay
    /// paths.
    pub fn from_json(json: &Json, source: &dyn SourceManifest) -> Result<JoinedTable, MediaError> {
        let side = |field: &'static str| -> Result<JoinSide, MediaError> {
            let path = json.get(field).and_then(Json::as_str).context(MissingFieldSnafu {
                kind: "joined-table",
                field,
            })?;
            Ok(match source.get(path)? {
                Some(RichValue::Table(table)) => JoinSide::Table(Box::new(table)),
                Some(RichValue::PartitionedTable(table)) => JoinSide::Partitioned(table),
                Some(other) => {
                    return InvalidJoinSnafu {
                        reason: format!("{path} holds a {}, not a table", other.type_name()),
                    }
                    .fail();
                }
                None => JoinSide::Path(path.to_string()),
            })
        };
        let join_key = json.get("join_key").context(MissingFieldSnafu {
            kind: "joined-table",
            field: "join_key",
        })?;
        let join_key = JoinKey::deserialize(join_key).context(JsonSnafu)?;
        Ok(Self {
            table1: side("table1")?,
            table2: side("table2")?,
            join_key,
        })
    }
}

/// Manifest path of a join side, adding table sides as `t{ndx}_{digest}`.
fn ensure_in_manifest(
    manifest: &mut dyn Manifest,
    side: &JoinSide,
    ndx: usize,
) -> Result<String, MediaError> {
    let path = match side {
        JoinSide::Path(path) => path.clone(),
        JoinSide::Table(table) => add_side(manifest, RichValue::Table((**table).clone()), ndx)?,
        JoinSide::Partitioned(table) => {
            add_side(manifest, RichValue::PartitionedTable(table.clone()), ndx)?
        }
    };
    ensure!(
        manifest.resolve(&path).is_some(),
        UnresolvedReferenceSnafu { path: path.clone() }
    );
    Ok(path)
}

fn add_side(manifest: &mut dyn Manifest, mut rich: RichValue, ndx: usize) -> Result<String, MediaError> {
    let staged = stage_rich(manifest, &mut rich)?;
    let digest = staged.digest();
    let name = format!("t{ndx}_{}", &digest[..8.min(digest.len())]);
    let entry = manifest
        .register(&staged, &manifest_object_name(&name, rich.type_name()))
        .context(DestinationSnafu)?;
    Ok(entry.path)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::destination::{LocalManifest, LocalRun, Step};
    use crate::media::add_to_manifest;
    use tempfile::TempDir;

    type TestResult = Result<(), Box<dyn std::error::Error>>;

    fn table(rows: i64) -> Table {
        Table::from_rows(
            vec!["id".into()],
            (0..rows).map(|i| vec![i.into()]).collect(),
        )
        .expect("table")
    }

    #[test]
    fn table_sides_are_added_before_the_join() -> TestResult {
        let tmp = TempDir::new()?;
        let mut manifest = LocalManifest::new(tmp.path())?;
        let mut joined = JoinedTable::new(table(2), table(3), "id")?;

        let json = joined.to_json(&mut Destination::manifest(&mut manifest))?;
        assert_eq!(json["_type"], "joined-table");
        assert_eq!(json["join_key"], "id");
        let t1 = json["table1"].as_str().expect("path");
        assert!(t1.starts_with("t1_") && t1.ends_with(".table.json"));
        assert_eq!(manifest.len(), 2);

        let back = JoinedTable::from_json(&json, &manifest)?;
        assert_eq!(back, joined);
        Ok(())
    }

    #[test]
    fn path_sides_must_already_be_in_the_manifest() -> TestResult {
        let tmp = TempDir::new()?;
        let mut manifest = LocalManifest::new(tmp.path())?;
        let entry = add_to_manifest(&mut manifest, &mut RichValue::Table(table(1)), "left")?;

        let mut joined = JoinedTable::new(entry.path.as_str(), "right.table.json", JoinKey::Pair(["id".into(), "key".into()]))?;
        let err = joined
            .to_json(&mut Destination::manifest(&mut manifest))
            .expect_err("right side missing");
        assert!(matches!(err, MediaError::UnresolvedReference { ref path } if path == "right.table.json"));
        Ok(())
    }

    #[test]
    fn non_table_paths_and_run_logs_are_rejected() -> TestResult {
        let err = JoinedTable::new("a.png", "b.table.json", "id").expect_err("not a table");
        assert!(matches!(err, MediaError::InvalidJoin { .. }));

        let tmp = TempDir::new()?;
        let mut run = LocalRun::new(tmp.path())?;
        let mut joined = JoinedTable::new("a.table.json", "b.table.json", "id")?;
        let err = joined
            .to_json(&mut Destination::log(&mut run, "j", Step::Index(0)))
            .expect_err("log");
        assert!(matches!(err, MediaError::UnsupportedDestination { kind: "joined-table", .. }));
        Ok(())
    }
}
