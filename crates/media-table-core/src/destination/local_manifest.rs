//! A content-addressed manifest backed by a local directory.
//!
//! On-disk layout under the manifest root:
//!
//! ```text
//! manifest.json         entry path -> {digest, size}, written atomically
//! objects/<blake3 hex>  entry contents, one file per distinct digest
//! ```
//!
//! Entries are kept ordered by path so directory listings are stable.
//! Entry paths must be relative and stay inside the root.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use log::{debug, warn};
use serde::{Deserialize, Serialize};
use snafu::prelude::*;

use super::{
    CorruptManifestSnafu, DestinationError, InvalidEntryPathSnafu, Manifest, ManifestEntry,
    MissingEntrySnafu, SourceManifest, StagedRef, Stager, StagingArea, StorageSnafu,
};
use crate::layout::{
    compound_extension, directory_prefix, manifest_rel_path, object_rel_path, validate_entry_path,
};
use crate::media::{DestinationSnafu, JsonSnafu, MediaError, RichValue};
use crate::storage::{self, StorageError, StorageLocation};

/// Current version of the persisted manifest document.
pub const MANIFEST_FORMAT_VERSION: u32 = 1;

#[derive(Debug, Serialize, Deserialize)]
struct ManifestDocument {
    version: u32,
    created_at: DateTime<Utc>,
    entries: BTreeMap<String, StoredEntry>,
}

#[derive(Debug, Serialize, Deserialize)]
struct StoredEntry {
    digest: String,
    size: u64,
}

/// Directory-backed [`Manifest`] and [`SourceManifest`].
#[derive(Debug)]
pub struct LocalManifest {
    location: StorageLocation,
    staging: StagingArea,
    entries: BTreeMap<String, ManifestEntry>,
}

impl LocalManifest {
    /// An empty manifest rooted at `root`. Nothing is written until the first
    /// registration or [`LocalManifest::save`].
    pub fn new(root: impl Into<PathBuf>) -> Result<Self, DestinationError> {
        Ok(Self {
            location: StorageLocation::local(root),
            staging: StagingArea::new()?,
            entries: BTreeMap::new(),
        })
    }

    /// Open a manifest previously persisted with [`LocalManifest::save`].
    pub fn open(root: impl Into<PathBuf>) -> Result<Self, DestinationError> {
        let mut manifest = Self::new(root)?;
        let rel = manifest_rel_path();
        let text = storage::read_to_string(&manifest.location, &rel).context(StorageSnafu)?;
        let doc: ManifestDocument =
            serde_json::from_str(&text).context(CorruptManifestSnafu {
                path: manifest.location.join(&rel).display().to_string(),
            })?;

        for (path, stored) in doc.entries {
            validate_entry_path(&path).context(InvalidEntryPathSnafu)?;
            manifest.entries.insert(
                path.clone(),
                ManifestEntry {
                    path,
                    digest: stored.digest,
                    size: stored.size,
                },
            );
        }
        debug!(
            "opened manifest with {} entries (created {})",
            manifest.entries.len(),
            doc.created_at
        );
        Ok(manifest)
    }

    /// Persist the entry table to `manifest.json` (write-then-rename).
    pub fn save(&self) -> Result<(), DestinationError> {
        let doc = ManifestDocument {
            version: MANIFEST_FORMAT_VERSION,
            created_at: Utc::now(),
            entries: self
                .entries
                .values()
                .map(|e| {
                    (
                        e.path.clone(),
                        StoredEntry {
                            digest: e.digest.clone(),
                            size: e.size,
                        },
                    )
                })
                .collect(),
        };
        let bytes = serde_json::to_vec_pretty(&doc).context(CorruptManifestSnafu {
            path: MANIFEST_PATH_FOR_ERRORS,
        })?;
        storage::write_atomic(&self.location, &manifest_rel_path(), &bytes).context(StorageSnafu)
    }

    /// Root directory.
    pub fn root(&self) -> &Path {
        self.location.root()
    }

    /// All entries, ordered by path.
    pub fn entries(&self) -> impl Iterator<Item = &ManifestEntry> {
        self.entries.values()
    }

    /// The entry at `path`.
    pub fn entry(&self, path: &str) -> Option<&ManifestEntry> {
        self.entries.get(path)
    }

    /// Number of entries.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// True when nothing has been registered.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    fn object_ref(&self, entry: &ManifestEntry) -> StagedRef {
        StagedRef::existing(
            self.location.join(&object_rel_path(&entry.digest)),
            entry.digest.clone(),
            entry.size,
            compound_extension(&entry.path).to_string(),
        )
    }
}

const MANIFEST_PATH_FOR_ERRORS: &str = "manifest.json";

impl Stager for LocalManifest {
    fn stage(&mut self, bytes: &[u8], extension: &str) -> Result<StagedRef, DestinationError> {
        self.staging.stage(bytes, extension)
    }
}

impl Manifest for LocalManifest {
    fn register(
        &mut self,
        staged: &StagedRef,
        logical_name: &str,
    ) -> Result<ManifestEntry, DestinationError> {
        validate_entry_path(logical_name).context(InvalidEntryPathSnafu)?;

        if let Some(existing) = self.entries.get(logical_name) {
            if existing.digest == staged.digest() {
                return Ok(existing.clone());
            }
            warn!(
                "replacing manifest entry {logical_name}: digest {} -> {}",
                existing.digest,
                staged.digest()
            );
        }

        let bytes = staged.read_bytes()?;
        match storage::write_new(&self.location, &object_rel_path(staged.digest()), &bytes) {
            Ok(()) | Err(StorageError::AlreadyExists { .. }) => {}
            Err(e) => return Err(e).context(StorageSnafu),
        }

        let entry = ManifestEntry {
            path: logical_name.to_string(),
            digest: staged.digest().to_string(),
            size: staged.size(),
        };
        self.entries.insert(entry.path.clone(), entry.clone());
        debug!("registered {} ({} bytes)", entry.path, entry.size);
        Ok(entry)
    }

    fn resolve(&self, path: &str) -> Option<StagedRef> {
        self.entries.get(path).map(|entry| self.object_ref(entry))
    }
}

impl SourceManifest for LocalManifest {
    fn get_entries_in_directory(&self, prefix: &str) -> Vec<ManifestEntry> {
        let prefix = directory_prefix(prefix);
        self.entries
            .values()
            .filter(|entry| entry.path.starts_with(&prefix))
            .cloned()
            .collect()
    }

    fn get(&self, path: &str) -> Result<Option<RichValue>, MediaError> {
        let Some(entry) = self.entries.get(path) else {
            return Ok(None);
        };
        let bytes = self.object_ref(entry).read_bytes().context(DestinationSnafu)?;
        let json: serde_json::Value = serde_json::from_slice(&bytes).context(JsonSnafu)?;
        RichValue::from_json(&json, Some(self)).map(Some)
    }

    fn download(&self, path: &str) -> Result<StagedRef, DestinationError> {
        self.resolve(path).context(MissingEntrySnafu { path })
    }
}
