//! Core engine for schema-validated tables of rich media.
//!
//! This crate provides the foundational pieces for `media-table-format`:
//!
//! - A type lattice whose descriptors narrow as values are observed, with a
//!   registry of custom kinds for nested tables, images and class ids
//!   (`dtypes` module).
//! - A `Table` whose columns carry inferred, evolving types, plus tables
//!   stored as parts in a manifest (`table` module).
//! - Rich values (images, audio, class sets, annotations, joined tables)
//!   that serialize either to a mutable, step-indexed run log or to an
//!   immutable, content-addressed manifest (`media` and `destination`
//!   modules).
//! - Conversion of logged rows into run-log JSON, batching media sequences
//!   (`history` module).
//!
//! The run log and manifest are collaborator traits. `destination::LocalRun`
//! and `destination::LocalManifest` implement them over a local directory.
#![deny(missing_docs)]
pub mod config;
pub mod destination;
pub mod dtypes;
pub mod history;
pub mod layout;
pub mod media;
pub mod storage;
pub mod table;
pub mod value;

pub use config::{MediaConfig, TableLimits};
pub use dtypes::{CustomType, PrimitiveKind, TypeDescriptor, TypeRegistry};
pub use media::{MediaError, RichValue};
pub use table::{PartitionedTable, Table, TableError};
pub use value::{ColumnName, Value};
