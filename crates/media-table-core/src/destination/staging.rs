//! Temporary staging of media payloads.
//!
//! Staged files are named after their content digest, so staging identical
//! bytes twice lands on the same file. A [`StagedRef`] keeps its staging
//! directory alive: the directory is removed once the area and every ref
//! into it are dropped.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use log::debug;
use snafu::prelude::*;
use tempfile::TempDir;

use super::{DestinationError, StagingDirSnafu, StorageSnafu};
use crate::layout::MEDIA_ID_DIGEST_CHARS;
use crate::storage::{self, StorageLocation};

/// Hex blake3 digest of `bytes`.
pub fn content_digest(bytes: &[u8]) -> String {
    blake3::hash(bytes).to_hex().to_string()
}

/// A temporary directory staged payloads are written to.
#[derive(Debug, Clone)]
pub struct StagingArea {
    dir: Arc<TempDir>,
}

impl StagingArea {
    /// Create a fresh staging directory under the system temp dir.
    pub fn new() -> Result<Self, DestinationError> {
        let dir = tempfile::Builder::new()
            .prefix("media-staging-")
            .tempdir()
            .context(StagingDirSnafu)?;
        Ok(Self { dir: Arc::new(dir) })
    }

    /// Root of the staging directory.
    pub fn path(&self) -> &Path {
        self.dir.path()
    }

    /// Write `bytes` to `<digest prefix><extension>` in the staging directory.
    pub fn stage(&self, bytes: &[u8], extension: &str) -> Result<StagedRef, DestinationError> {
        let digest = content_digest(bytes);
        let file_name = format!("{}{extension}", &digest[..MEDIA_ID_DIGEST_CHARS]);
        let location = StorageLocation::local(self.dir.path());
        storage::write_atomic(&location, Path::new(&file_name), bytes).context(StorageSnafu)?;
        debug!("staged {} bytes as {file_name}", bytes.len());

        Ok(StagedRef {
            path: self.dir.path().join(&file_name),
            digest,
            size: bytes.len() as u64,
            extension: extension.to_string(),
            _area: Some(Arc::clone(&self.dir)),
        })
    }
}

/// A staged (or otherwise local) file with its content identity.
#[derive(Debug, Clone)]
pub struct StagedRef {
    path: PathBuf,
    digest: String,
    size: u64,
    extension: String,
    _area: Option<Arc<TempDir>>,
}

impl StagedRef {
    /// Refer to an existing local file whose digest is already known.
    pub fn existing(path: impl Into<PathBuf>, digest: String, size: u64, extension: String) -> Self {
        Self {
            path: path.into(),
            digest,
            size,
            extension,
            _area: None,
        }
    }

    /// Absolute path of the file.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Hex content digest.
    pub fn digest(&self) -> &str {
        &self.digest
    }

    /// Size in bytes.
    pub fn size(&self) -> u64 {
        self.size
    }

    /// Extension including the leading dot, possibly compound (`.table.json`).
    pub fn extension(&self) -> &str {
        &self.extension
    }

    /// Default media id: the first characters of the digest.
    pub fn short_id(&self) -> &str {
        &self.digest[..MEDIA_ID_DIGEST_CHARS.min(self.digest.len())]
    }

    /// File name of the staged file.
    pub fn file_name(&self) -> String {
        format!("{}{}", self.short_id(), self.extension)
    }

    /// Read the staged bytes back.
    pub fn read_bytes(&self) -> Result<Vec<u8>, DestinationError> {
        storage::read_path(&self.path).context(StorageSnafu)
    }
}

impl PartialEq for StagedRef {
    fn eq(&self, other: &Self) -> bool {
        self.path == other.path && self.digest == other.digest
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    type TestResult = Result<(), Box<dyn std::error::Error>>;

    #[test]
    fn staging_is_content_named() -> TestResult {
        let area = StagingArea::new()?;
        let a = area.stage(b"payload", ".png")?;
        let b = area.stage(b"payload", ".png")?;
        assert_eq!(a, b);
        assert_eq!(a.size(), 7);
        assert!(a.file_name().ends_with(".png"));
        assert_eq!(a.read_bytes()?, b"payload");

        let c = area.stage(b"other", ".png")?;
        assert_ne!(a.digest(), c.digest());
        Ok(())
    }

    #[test]
    fn refs_keep_the_directory_alive() -> TestResult {
        let staged = {
            let area = StagingArea::new()?;
            area.stage(b"kept", ".bin")?
        };
        assert!(staged.path().exists());
        Ok(())
    }
}
