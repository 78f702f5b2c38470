use std::io;

use snafu::prelude::*;

/// Failures of the file operations behind staging areas, runs and manifests.
///
/// Every variant carries the absolute path the operation touched.
#[derive(Debug, Snafu)]
#[snafu(visibility(pub(crate)))]
pub enum StorageError {
    /// A payload, run file or manifest document is missing.
    #[snafu(display("No file at {path}"))]
    NotFound {
        /// Absolute path that was read.
        path: String,
        /// Error reported by the filesystem.
        source: io::Error,
    },

    /// A create-only write found the target already present.
    #[snafu(display("Refusing to overwrite {path}"))]
    AlreadyExists {
        /// Absolute path of the existing file.
        path: String,
    },

    /// A run already holds a file under this name with other bytes.
    #[snafu(display("{path} already holds different content"))]
    ContentConflict {
        /// Absolute path of the conflicting run file.
        path: String,
    },

    /// Any other filesystem failure.
    #[snafu(display("I/O error at {path}: {source}"))]
    Io {
        /// Absolute path being written or read.
        path: String,
        /// Error reported by the filesystem.
        source: io::Error,
    },
}

impl StorageError {
    /// Path the failing operation was working on.
    pub fn path(&self) -> &str {
        match self {
            StorageError::NotFound { path, .. }
            | StorageError::AlreadyExists { path }
            | StorageError::ContentConflict { path }
            | StorageError::Io { path, .. } => path,
        }
    }
}
