//! A run log backed by a local directory.
//!
//! Media files are copied under `<root>/<subdir>/<file name>`. When content
//! deduplication is enabled, a file whose digest was already copied into the
//! run is not copied again; the earlier path is returned instead.

use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};

use log::debug;
use serde_json::Value as Json;
use snafu::prelude::*;

use super::staging::content_digest;
use super::{DestinationError, RunLog, StagedRef, Stager, StagingArea, StorageSnafu};
use crate::config::MediaConfig;
use crate::layout::join_forward;
use crate::storage::{self, ContentConflictSnafu, StorageError, StorageLocation};

/// Directory-backed [`RunLog`].
#[derive(Debug)]
pub struct LocalRun {
    location: StorageLocation,
    staging: StagingArea,
    dedupe: bool,
    by_digest: HashMap<String, String>,
    singletons: BTreeMap<String, BTreeMap<String, Json>>,
}

impl LocalRun {
    /// A run rooted at `root`, without content deduplication.
    pub fn new(root: impl Into<PathBuf>) -> Result<Self, DestinationError> {
        Ok(Self {
            location: StorageLocation::local(root),
            staging: StagingArea::new()?,
            dedupe: false,
            by_digest: HashMap::new(),
            singletons: BTreeMap::new(),
        })
    }

    /// A run configured from [`MediaConfig::dedupe_run_media`].
    pub fn from_config(root: impl Into<PathBuf>, config: &MediaConfig) -> Result<Self, DestinationError> {
        Ok(Self::new(root)?.with_dedupe(config.dedupe_run_media))
    }

    /// Enable or disable content deduplication.
    pub fn with_dedupe(mut self, dedupe: bool) -> Self {
        self.dedupe = dedupe;
        self
    }

    /// Root directory of the run.
    pub fn root(&self) -> &Path {
        self.location.root()
    }

    /// Singletons recorded under `kind`, keyed by their key.
    pub fn singletons(&self, kind: &str) -> Option<&BTreeMap<String, Json>> {
        self.singletons.get(kind)
    }
}

impl Stager for LocalRun {
    fn stage(&mut self, bytes: &[u8], extension: &str) -> Result<StagedRef, DestinationError> {
        self.staging.stage(bytes, extension)
    }
}

impl RunLog for LocalRun {
    fn copy_into_run(
        &mut self,
        staged: &StagedRef,
        subdir: &str,
        file_name: &str,
    ) -> Result<String, DestinationError> {
        if self.dedupe {
            if let Some(existing) = self.by_digest.get(staged.digest()) {
                debug!("reusing {existing} for identical content");
                return Ok(existing.clone());
            }
        }

        let rel = join_forward(subdir, file_name);
        match storage::copy_new(&self.location, staged.path(), Path::new(&rel)) {
            Ok(_) => {}
            Err(StorageError::AlreadyExists { .. }) => {
                // Same name is fine as long as the bytes match.
                let existing =
                    storage::read_all_bytes(&self.location, Path::new(&rel)).context(StorageSnafu)?;
                if content_digest(&existing) != staged.digest() {
                    let path = self.location.join(Path::new(&rel)).display().to_string();
                    return Err(ContentConflictSnafu { path }.build()).context(StorageSnafu);
                }
            }
            Err(e) => return Err(e).context(StorageSnafu),
        }

        self.by_digest
            .entry(staged.digest().to_string())
            .or_insert_with(|| rel.clone());
        Ok(rel)
    }

    fn record_singleton(&mut self, kind: &str, key: &str, value: Json) {
        self.singletons
            .entry(kind.to_string())
            .or_default()
            .insert(key.to_string(), value);
    }

    fn run_id(&self) -> String {
        self.root().display().to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tempfile::TempDir;

    type TestResult = Result<(), Box<dyn std::error::Error>>;

    #[test]
    fn copies_under_subdir() -> TestResult {
        let tmp = TempDir::new()?;
        let mut run = LocalRun::new(tmp.path())?;
        let staged = run.stage(b"img", ".png")?;

        let path = run.copy_into_run(&staged, "media/images", "k_0_abc.png")?;
        assert_eq!(path, "media/images/k_0_abc.png");
        assert_eq!(std::fs::read(tmp.path().join(&path))?, b"img");

        // Copying the same content to the same name again is accepted.
        let again = run.copy_into_run(&staged, "media/images", "k_0_abc.png")?;
        assert_eq!(again, path);
        Ok(())
    }

    #[test]
    fn conflicting_content_under_one_name_fails() -> TestResult {
        let tmp = TempDir::new()?;
        let mut run = LocalRun::new(tmp.path())?;
        let a = run.stage(b"a", ".png")?;
        let b = run.stage(b"b", ".png")?;
        run.copy_into_run(&a, "media/images", "same.png")?;
        let err = run
            .copy_into_run(&b, "media/images", "same.png")
            .expect_err("conflict");
        assert!(matches!(
            err,
            DestinationError::Storage {
                source: StorageError::ContentConflict { .. },
                ..
            }
        ));
        Ok(())
    }

    #[test]
    fn dedupe_reuses_earlier_path_only_when_enabled() -> TestResult {
        let tmp = TempDir::new()?;
        let mut run = LocalRun::new(tmp.path())?.with_dedupe(true);
        let staged = run.stage(b"same", ".wav")?;
        let first = run.copy_into_run(&staged, "media/audio", "a_1_x.wav")?;
        let second = run.copy_into_run(&staged, "media/audio", "a_2_x.wav")?;
        assert_eq!(first, second);
        assert!(!tmp.path().join("media/audio/a_2_x.wav").exists());

        let tmp2 = TempDir::new()?;
        let mut plain = LocalRun::new(tmp2.path())?;
        let staged = plain.stage(b"same", ".wav")?;
        plain.copy_into_run(&staged, "media/audio", "a_1_x.wav")?;
        let second = plain.copy_into_run(&staged, "media/audio", "a_2_x.wav")?;
        assert_eq!(second, "media/audio/a_2_x.wav");
        Ok(())
    }

    #[test]
    fn singletons_are_grouped_by_kind() -> TestResult {
        let tmp = TempDir::new()?;
        let mut run = LocalRun::new(tmp.path())?;
        run.record_singleton("mask/class_labels", "img_wandb_delimeter_pred", json!({"1": "cat"}));
        let labels = run.singletons("mask/class_labels").expect("recorded");
        assert_eq!(labels["img_wandb_delimeter_pred"], json!({"1": "cat"}));
        Ok(())
    }
}
