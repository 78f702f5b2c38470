use snafu::prelude::*;

use crate::layout::LayoutError;
use crate::storage::StorageError;

/// Errors raised by staging areas and destinations.
#[derive(Debug, Snafu)]
#[snafu(visibility(pub(crate)))]
pub enum DestinationError {
    /// The temporary staging directory could not be created.
    #[snafu(display("Failed to create staging directory: {source}"))]
    StagingDir {
        /// Underlying I/O error.
        source: std::io::Error,
    },

    /// Reading or writing a staged file, run file or manifest object failed.
    #[snafu(display("Storage error: {source}"))]
    Storage {
        /// Underlying storage error.
        source: StorageError,
    },

    /// A manifest entry path is absolute or escapes the manifest root.
    #[snafu(display("Rejected manifest entry path: {source}"))]
    InvalidEntryPath {
        /// Underlying layout error.
        source: LayoutError,
    },

    /// The persisted manifest document could not be parsed.
    #[snafu(display("Corrupt manifest document at {path}: {source}"))]
    CorruptManifest {
        /// Path of the manifest document.
        path: String,
        /// Underlying JSON error.
        source: serde_json::Error,
    },

    /// No manifest entry exists at the requested path.
    #[snafu(display("No manifest entry at {path}"))]
    MissingEntry {
        /// The requested path.
        path: String,
    },
}
