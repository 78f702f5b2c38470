use snafu::prelude::*;

use crate::destination::DestinationError;
use crate::dtypes::TypeJsonError;
use crate::table::TableError;

/// Errors from serializing or loading rich values.
#[derive(Debug, Snafu)]
#[snafu(visibility(pub(crate)))]
pub enum MediaError {
    /// A nested value or referenced path is not an entry of the manifest.
    #[snafu(display("{path} could not be resolved in the manifest"))]
    UnresolvedReference {
        /// The unresolved manifest path.
        path: String,
    },

    /// The value cannot be serialized toward this kind of destination.
    #[snafu(display("A {kind} cannot be serialized to a {destination}"))]
    UnsupportedDestination {
        /// Kind of the value.
        kind: &'static str,
        /// Kind of the destination.
        destination: &'static str,
    },

    /// Loading the value needs a source manifest and none was given.
    #[snafu(display("Loading a {kind} requires a source manifest"))]
    NoSource {
        /// Kind of the value.
        kind: &'static str,
    },

    /// An image with boxes or masks was added to a manifest without classes.
    #[snafu(display(
        "Classes must be set on an image with masks or bounding boxes when adding it to a manifest"
    ))]
    MissingClasses,

    /// Box or mask data failed validation.
    #[snafu(display("Invalid annotation: {reason}"))]
    InvalidAnnotation {
        /// What was wrong.
        reason: String,
    },

    /// A batched sequence had no items.
    #[snafu(display("Cannot serialize an empty batch of {kind}"))]
    EmptyBatch {
        /// Kind of the batch.
        kind: &'static str,
    },

    /// A batched item landed outside its kind's media directory.
    #[snafu(display("Files in a batch must be in the {expected} directory, not {path}"))]
    MediaPathMismatch {
        /// Required directory prefix.
        expected: &'static str,
        /// Path the item was written to.
        path: String,
    },

    /// A required JSON field is absent or has the wrong shape.
    #[snafu(display("{kind} JSON is missing field `{field}`"))]
    MissingField {
        /// Kind being decoded.
        kind: &'static str,
        /// The missing field.
        field: &'static str,
    },

    /// A joined table side or join key is not usable.
    #[snafu(display("Invalid joined table: {reason}"))]
    InvalidJoin {
        /// What was wrong.
        reason: String,
    },

    /// A table cell cannot be written in the requested form.
    #[snafu(display("Unsupported table cell: {reason}"))]
    UnsupportedCell {
        /// What was wrong.
        reason: String,
    },

    /// `_type` names no known rich value kind.
    #[snafu(display("Unknown rich value type {type_name}"))]
    UnknownKind {
        /// The unrecognized `_type`.
        type_name: String,
    },

    /// Encoding or decoding a JSON document failed.
    #[snafu(display("JSON error: {source}"))]
    Json {
        /// Underlying JSON error.
        source: serde_json::Error,
    },

    /// Staging, copying or registering a file failed.
    #[snafu(display("Destination error: {source}"))]
    Destination {
        /// Underlying destination error.
        source: DestinationError,
    },

    /// A nested table operation failed.
    #[snafu(display("Table error: {source}"))]
    Table {
        /// Underlying table error.
        #[snafu(source(from(TableError, Box::new)))]
        source: Box<TableError>,
    },

    /// Encoding or decoding a column type failed.
    #[snafu(display("Type JSON error: {source}"))]
    TypeJson {
        /// Underlying type JSON error.
        source: TypeJsonError,
    },
}
