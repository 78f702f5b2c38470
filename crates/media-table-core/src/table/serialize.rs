//! Table JSON for run logs and manifests.
//!
//! Toward a run log a table is staged as a `.table.json` file holding
//! `{"columns", "data"}` (capped at `max_rows`) and described by
//!
//! ```text
//! {"_type": "table-file", "path", "digest", "size", "ncols", "nrows"}
//! ```
//!
//! Toward a manifest the table is written inline, capped at
//! `max_artifact_rows`, with rich cells registered into the same manifest:
//!
//! ```text
//! {"_type": "table", "columns", "data", "ncols", "nrows", "column_types"}
//! ```

use log::warn;
use serde_json::{Map, Value as Json, json};
use snafu::prelude::*;

use super::{InvalidColumnNameSnafu, Table};
use crate::destination::{Destination, Manifest, SourceManifest};
use crate::dtypes::TypeDescriptor;
use crate::layout::TABLE_SUBDIR;
use crate::media::{
    JsonSnafu, Media, MediaError, MediaFile, MissingFieldSnafu, TableSnafu, TypeJsonSnafu,
    UnsupportedCellSnafu, file_json, value_from_json, value_to_json,
};
use crate::value::ColumnName;

impl Media for Table {
    const TYPE_NAME: &'static str = "table-file";

    fn media_subdir(&self) -> &'static str {
        TABLE_SUBDIR
    }

    fn encode(&self) -> Result<(Vec<u8>, String), MediaError> {
        let max_rows = self.limits().max_rows;
        if self.len() > max_rows {
            warn!("Truncating table to {max_rows} rows for the run log");
        }

        let mut data = Vec::with_capacity(self.len().min(max_rows));
        for (_, row) in self.iter_rows().take(max_rows) {
            let mut cells = Vec::with_capacity(row.len());
            for cell in row {
                let json = cell.to_plain_json().context(UnsupportedCellSnafu {
                    reason: format!("a {} cell cannot be written to a run log table", cell.kind_name()),
                })?;
                cells.push(json);
            }
            data.push(Json::Array(cells));
        }

        let doc = json!({ "columns": self.columns(), "data": data });
        let bytes = serde_json::to_vec(&doc).context(JsonSnafu)?;
        Ok((bytes, ".table.json".to_string()))
    }

    fn file(&self) -> &MediaFile {
        &self.file
    }

    fn file_mut(&mut self) -> &mut MediaFile {
        &mut self.file
    }
}

impl Table {
    /// Serialize toward a run log or a manifest.
    pub fn to_json(&mut self, destination: &mut Destination<'_>) -> Result<Json, MediaError> {
        match destination {
            Destination::Log { .. } => {
                let mut json = file_json(self, destination, None)?;
                json.insert("ncols".to_string(), Json::from(self.columns().len()));
                json.insert("nrows".to_string(), Json::from(self.len()));
                Ok(Json::Object(json))
            }
            Destination::Manifest(manifest) => {
                let manifest: &mut dyn Manifest = &mut **manifest;
                self.to_manifest_json(manifest)
            }
        }
    }

    fn to_manifest_json(&mut self, manifest: &mut dyn Manifest) -> Result<Json, MediaError> {
        for column in self.columns() {
            if let ColumnName::Name(name) = column {
                if name.contains('.') {
                    return InvalidColumnNameSnafu {
                        column: column.clone(),
                    }
                    .fail()
                    .context(TableSnafu);
                }
            }
        }

        let max_rows = self.limits().max_artifact_rows;
        if self.len() > max_rows {
            warn!("Truncating table to {max_rows} rows for the manifest");
        }
        let kept = self.len().min(max_rows);

        let mut data = Vec::with_capacity(kept);
        {
            let cells: &mut dyn Manifest = &mut *manifest;
            let mut destination = Destination::Manifest(cells);
            for row in self.rows_mut().iter_mut().take(kept) {
                let mut out = Vec::with_capacity(row.len());
                for cell in row.iter_mut() {
                    out.push(value_to_json(cell, &mut destination)?);
                }
                data.push(Json::Array(out));
            }
        }

        let column_types = self
            .column_types()
            .to_json(Some(manifest))
            .context(TypeJsonSnafu)?;

        let mut json = Map::new();
        json.insert("_type".to_string(), Json::from("table"));
        json.insert("columns".to_string(), json!(self.columns()));
        json.insert("data".to_string(), Json::Array(data));
        json.insert("ncols".to_string(), Json::from(self.columns().len()));
        json.insert("nrows".to_string(), Json::from(kept));
        json.insert("column_types".to_string(), column_types);
        Ok(Json::Object(json))
    }

    /// Load a table from manifest JSON.
    ///
    /// When `column_types` is present it seeds the columns before the rows
    /// are re-added, so mixed-type columns load as they were written.
    pub fn from_json(json: &Json, source: Option<&dyn SourceManifest>) -> Result<Table, MediaError> {
        let columns: Vec<ColumnName> = serde_json::from_value(
            json.get("columns")
                .cloned()
                .context(MissingFieldSnafu {
                    kind: "table",
                    field: "columns",
                })?,
        )
        .context(JsonSnafu)?;
        let rows = json
            .get("data")
            .and_then(Json::as_array)
            .context(MissingFieldSnafu {
                kind: "table",
                field: "data",
            })?;

        let mut table = Table::with_columns(columns).context(TableSnafu)?;
        match json.get("column_types") {
            None | Some(Json::Null) => {}
            Some(column_types) => {
                let column_types =
                    TypeDescriptor::from_json(column_types, source).context(TypeJsonSnafu)?;
                table.restore_column_types(column_types);
            }
        }

        for row in rows {
            let cells = row.as_array().context(MissingFieldSnafu {
                kind: "table",
                field: "data",
            })?;
            let row = cells
                .iter()
                .map(|cell| value_from_json(cell, source))
                .collect::<Result<Vec<_>, _>>()?;
            table.add_data(row).context(TableSnafu)?;
        }
        Ok(table)
    }
}
