//! Wrapper prelude.
//!
//! The `media-table-format` crate is the supported public entry point.
//! Downstream code should prefer importing from this prelude instead of
//! depending on internal core module paths.

pub use crate::destination::{Destination, LocalManifest, LocalRun, Step};
pub use crate::media::{Audio, Classes, Image, MediaError, RichValue};
pub use crate::{
    ColumnName, LogItem, MediaConfig, PartitionedTable, Table, TableError, TableLimits,
    TypeDescriptor, Value,
};
