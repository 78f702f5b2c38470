//! Destinations rich values serialize toward.
//!
//! Two kinds of sink exist and a value serializes differently to each:
//!
//! - a [`RunLog`]: mutable, step-indexed. Media is staged, then copied into
//!   the run's media directory under a name derived from the logged key and
//!   step.
//! - a [`Manifest`]: immutable and content-addressed. Media is staged, then
//!   registered as an entry whose identity is the content digest.
//!
//! Both share [`Stager`], which writes a payload to a temporary location
//! once and hands back a [`StagedRef`]. [`SourceManifest`] is the read side
//! of a manifest, used when values are loaded back.
//!
//! The traits are collaborator seams. [`LocalRun`] and [`LocalManifest`] are
//! directory-backed implementations.

mod error;
pub mod local_manifest;
pub mod local_run;
pub mod staging;

pub use error::DestinationError;
pub(crate) use error::{
    CorruptManifestSnafu, InvalidEntryPathSnafu, MissingEntrySnafu, StagingDirSnafu,
    StorageSnafu,
};
pub use local_manifest::LocalManifest;
pub use local_run::LocalRun;
pub use staging::{StagedRef, StagingArea};

use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Value as Json;

use crate::media::{MediaError, RichValue};

/// Writes payloads to a temporary location.
pub trait Stager {
    /// Stage `bytes` as a file with the given extension (including the dot).
    fn stage(&mut self, bytes: &[u8], extension: &str) -> Result<StagedRef, DestinationError>;
}

/// A mutable, step-indexed run log.
pub trait RunLog: Stager {
    /// Copy a staged file into the run under `subdir/file_name`, returning
    /// the run-relative path actually used.
    fn copy_into_run(
        &mut self,
        staged: &StagedRef,
        subdir: &str,
        file_name: &str,
    ) -> Result<String, DestinationError>;

    /// Record a run-wide value shared by every step, such as class labels.
    fn record_singleton(&mut self, kind: &str, key: &str, value: Json);

    /// Identity of this run; two runs never share one.
    fn run_id(&self) -> String;
}

/// An immutable, content-addressed manifest.
pub trait Manifest: Stager {
    /// Register a staged file under `logical_name`.
    ///
    /// Registering the same staged file again, or the same name with the same
    /// content, returns the existing entry.
    fn register(
        &mut self,
        staged: &StagedRef,
        logical_name: &str,
    ) -> Result<ManifestEntry, DestinationError>;

    /// Staged form of an existing entry, or `None` when the path is unknown.
    fn resolve(&self, path: &str) -> Option<StagedRef>;
}

/// Read side of a manifest.
pub trait SourceManifest {
    /// Entries under a directory prefix, ordered by path.
    fn get_entries_in_directory(&self, prefix: &str) -> Vec<ManifestEntry>;

    /// Load the rich value stored at `path`; `None` when no such entry exists.
    fn get(&self, path: &str) -> Result<Option<RichValue>, MediaError>;

    /// Local copy of the entry at `path`.
    fn download(&self, path: &str) -> Result<StagedRef, DestinationError>;
}

/// One manifest entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ManifestEntry {
    /// Manifest-relative path, forward slashes.
    pub path: String,
    /// Content digest (blake3, hex).
    pub digest: String,
    /// Size in bytes.
    pub size: u64,
}

/// Step a value is logged at.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Step {
    /// A history step.
    Index(u64),
    /// The run summary.
    Summary,
}

impl fmt::Display for Step {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Step::Index(step) => write!(f, "{step}"),
            Step::Summary => f.write_str("summary"),
        }
    }
}

impl From<u64> for Step {
    fn from(step: u64) -> Self {
        Step::Index(step)
    }
}

/// Where a serialization call is headed.
pub enum Destination<'a> {
    /// A run log, at a logged key and step.
    Log {
        /// The run.
        run: &'a mut dyn RunLog,
        /// Logged key.
        key: String,
        /// Logged step.
        step: Step,
    },
    /// A manifest.
    Manifest(&'a mut dyn Manifest),
}

impl<'a> Destination<'a> {
    /// A run-log destination.
    pub fn log(run: &'a mut dyn RunLog, key: impl Into<String>, step: Step) -> Self {
        Destination::Log {
            run,
            key: key.into(),
            step,
        }
    }

    /// A manifest destination.
    pub fn manifest(manifest: &'a mut dyn Manifest) -> Self {
        Destination::Manifest(manifest)
    }

    /// Short name used in diagnostics.
    pub fn kind_name(&self) -> &'static str {
        match self {
            Destination::Log { .. } => "run log",
            Destination::Manifest(_) => "manifest",
        }
    }

    /// Borrow this destination for a nested call.
    pub fn reborrow(&mut self) -> Destination<'_> {
        match self {
            Destination::Log { run, key, step } => {
                let run: &mut dyn RunLog = &mut **run;
                Destination::Log {
                    run,
                    key: key.clone(),
                    step: *step,
                }
            }
            Destination::Manifest(manifest) => {
                let manifest: &mut dyn Manifest = &mut **manifest;
                Destination::Manifest(manifest)
            }
        }
    }
}

impl fmt::Debug for Destination<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Destination::Log { key, step, .. } => f
                .debug_struct("Log")
                .field("key", key)
                .field("step", step)
                .finish_non_exhaustive(),
            Destination::Manifest(_) => f.write_str("Manifest(..)"),
        }
    }
}

/// Reborrow an optional manifest context for a nested call.
pub(crate) fn reborrow<'s>(context: &'s mut Option<&mut dyn Manifest>) -> Option<&'s mut dyn Manifest> {
    match context {
        Some(manifest) => {
            let manifest: &'s mut dyn Manifest = &mut **manifest;
            Some(manifest)
        }
        None => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn steps_render_for_file_names() {
        assert_eq!(Step::Index(7).to_string(), "7");
        assert_eq!(Step::Summary.to_string(), "summary");
        assert_eq!(Step::from(3), Step::Index(3));
    }
}
