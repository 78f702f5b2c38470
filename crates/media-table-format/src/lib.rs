//! # media-table-format
//!
//! Schema-validated tables of rich media values, serialized to step-indexed
//! run logs or to immutable, content-addressed manifests.
//!
//! This crate is the supported public entry point and provides a small, stable surface.
//!
//! ## Example
//!
//! ```rust
//! use media_table_format::prelude::*;
//!
//! let mut table = Table::with_columns(vec!["loss".into()]).unwrap();
//! table.add_data(vec![Value::from(0.5)]).unwrap();
//! assert_eq!(table.len(), 1);
//! ```

/// Convenience prelude with the stable, supported surface.
pub mod prelude;

/// Rich media values.
pub mod media {
    pub use media_table_core::media::annotations::{
        BoundingBoxes2D, BoxData, BoxPosition, ImageMask,
    };
    pub use media_table_core::media::audio::Audio;
    pub use media_table_core::media::classes::{ClassEntry, ClassId, Classes};
    pub use media_table_core::media::image::Image;
    pub use media_table_core::media::joined_table::{JoinKey, JoinSide, JoinedTable};
    pub use media_table_core::media::{MediaError, RichValue, add_to_manifest};
}

/// Run logs and manifests.
pub mod destination {
    pub use media_table_core::destination::{
        Destination, DestinationError, LocalManifest, LocalRun, Manifest, ManifestEntry, RunLog,
        SourceManifest, StagedRef, Stager, Step,
    };
}

pub use media_table_core::config::{ConfigError, MediaConfig, TableLimits};
pub use media_table_core::dtypes::TypeDescriptor;
pub use media_table_core::history::{LogItem, row_to_json, val_to_json};
pub use media_table_core::table::{PartitionedTable, Table, TableError};
pub use media_table_core::value::{ColumnName, Value};
