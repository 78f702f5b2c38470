//! Filesystem helpers used by staging areas and the local destinations.
//!
//! Everything that touches the disk goes through this module so path
//! handling and error mapping live in one place:
//!
//! - [`write_atomic`] writes a temporary sibling and renames it into place,
//!   used for staged payloads and the persisted manifest document.
//! - [`write_new`] creates a file only if it does not exist yet, used for
//!   content-addressed manifest objects where the name already implies the
//!   contents.
//! - [`copy_new`] copies a staged file into a run directory.
//! - [`read_all_bytes`] / [`read_to_string`] read payloads back.
//!
//! All operations are synchronous. Only the local filesystem is supported;
//! `StorageLocation` keeps room for other backends without touching callers.

mod error;

pub use error::StorageError;
pub(crate) use error::{AlreadyExistsSnafu, ContentConflictSnafu, IoSnafu, NotFoundSnafu};

use snafu::{IntoError, prelude::*};
use std::{
    fs::{self, OpenOptions},
    io::{self, Write},
    path::{Path, PathBuf},
};

/// General result type used by storage operations.
pub type StorageResult<T> = Result<T, StorageError>;

/// Root of a directory tree managed by a destination.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum StorageLocation {
    /// A directory on the local filesystem.
    Local(PathBuf),
}

impl StorageLocation {
    /// Creates a new `StorageLocation` for a local filesystem path.
    pub fn local(root: impl Into<PathBuf>) -> Self {
        StorageLocation::Local(root.into())
    }

    /// Resolve a relative path under this location.
    pub fn join(&self, rel: &Path) -> PathBuf {
        match self {
            StorageLocation::Local(root) => root.join(rel),
        }
    }

    /// The root directory.
    pub fn root(&self) -> &Path {
        match self {
            StorageLocation::Local(root) => root,
        }
    }
}

fn create_parent_dir(abs: &Path) -> StorageResult<()> {
    if let Some(parent) = abs.parent() {
        fs::create_dir_all(parent).context(IoSnafu {
            path: parent.display().to_string(),
        })?;
    }
    Ok(())
}

/// Guard that removes a temporary file on drop unless disarmed.
/// Used to ensure cleanup on error paths during atomic writes.
struct TempFileGuard {
    path: PathBuf,
    armed: bool,
}

impl TempFileGuard {
    fn new(path: PathBuf) -> Self {
        Self { path, armed: true }
    }

    /// Call this after a successful rename.
    fn disarm(&mut self) {
        self.armed = false;
    }
}

impl Drop for TempFileGuard {
    fn drop(&mut self) {
        if self.armed {
            // Best-effort cleanup; the caller is already handling another error.
            let _ = fs::remove_file(&self.path);
        }
    }
}

fn map_read_error(e: io::Error, abs: &Path) -> StorageError {
    let path = abs.display().to_string();
    if e.kind() == io::ErrorKind::NotFound {
        NotFoundSnafu { path }.into_error(e)
    } else {
        IoSnafu { path }.into_error(e)
    }
}

/// Write `contents` to `rel_path` inside `location` using write-then-rename.
///
/// The payload goes to a `.tmp` sibling first, is synced, and is then
/// renamed over the target, so readers never observe a partial file.
/// Parent directories are created as needed.
pub fn write_atomic(
    location: &StorageLocation,
    rel_path: &Path,
    contents: &[u8],
) -> StorageResult<()> {
    let abs = location.join(rel_path);
    create_parent_dir(&abs)?;

    let mut tmp_name = abs.as_os_str().to_owned();
    tmp_name.push(".tmp");
    let tmp_path = PathBuf::from(tmp_name);
    let mut guard = TempFileGuard::new(tmp_path.clone());

    {
        let mut file = fs::File::create(&tmp_path).context(IoSnafu {
            path: tmp_path.display().to_string(),
        })?;

        file.write_all(contents).context(IoSnafu {
            path: tmp_path.display().to_string(),
        })?;

        file.sync_all().context(IoSnafu {
            path: tmp_path.display().to_string(),
        })?;
    }

    fs::rename(&tmp_path, &abs).context(IoSnafu {
        path: abs.display().to_string(),
    })?;

    guard.disarm();
    Ok(())
}

/// Create a *new* file at `rel_path` and write `contents`, failing with
/// [`StorageError::AlreadyExists`] if the file is already there.
pub fn write_new(location: &StorageLocation, rel_path: &Path, contents: &[u8]) -> StorageResult<()> {
    let abs = location.join(rel_path);
    create_parent_dir(&abs)?;
    let path_str = abs.display().to_string();

    let mut file = match OpenOptions::new().write(true).create_new(true).open(&abs) {
        Ok(f) => f,
        Err(e) if e.kind() == io::ErrorKind::AlreadyExists => {
            return AlreadyExistsSnafu { path: path_str }.fail();
        }
        Err(e) => {
            return Err(e).context(IoSnafu { path: path_str });
        }
    };

    file.write_all(contents).context(IoSnafu {
        path: path_str.clone(),
    })?;

    file.sync_all().context(IoSnafu { path: path_str })?;

    Ok(())
}

/// Copy the file at absolute path `src` to `rel_path` under `location`.
///
/// Fails with [`StorageError::AlreadyExists`] when the target exists so a
/// second binding never silently replaces a logged media file.
pub fn copy_new(location: &StorageLocation, src: &Path, rel_path: &Path) -> StorageResult<u64> {
    let abs = location.join(rel_path);
    create_parent_dir(&abs)?;

    ensure!(
        !abs.exists(),
        AlreadyExistsSnafu {
            path: abs.display().to_string(),
        }
    );

    fs::copy(src, &abs).map_err(|e| map_read_error(e, src))
}

/// Read the full contents of the file at absolute path `abs`.
pub fn read_path(abs: &Path) -> StorageResult<Vec<u8>> {
    fs::read(abs).map_err(|e| map_read_error(e, abs))
}

/// Read the full contents of a file at `rel_path` within `location`.
///
/// A missing file maps to [`StorageError::NotFound`]; anything else to
/// [`StorageError::Io`].
pub fn read_all_bytes(location: &StorageLocation, rel_path: &Path) -> StorageResult<Vec<u8>> {
    read_path(&location.join(rel_path))
}

/// Read the file at `rel_path` within `location` as UTF-8 text.
pub fn read_to_string(location: &StorageLocation, rel_path: &Path) -> StorageResult<String> {
    let abs = location.join(rel_path);
    fs::read_to_string(&abs).map_err(|e| map_read_error(e, &abs))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    type TestResult = Result<(), Box<dyn std::error::Error>>;

    #[test]
    fn write_atomic_creates_parent_directories() -> TestResult {
        let tmp = TempDir::new()?;
        let location = StorageLocation::local(tmp.path());

        let rel_path = Path::new("nested/deep/dir/file.json");
        write_atomic(&location, rel_path, b"nested content")?;

        let read_back = read_to_string(&location, rel_path)?;
        assert_eq!(read_back, "nested content");
        Ok(())
    }

    #[test]
    fn write_atomic_overwrites_and_leaves_no_tmp_file() -> TestResult {
        let tmp = TempDir::new()?;
        let location = StorageLocation::local(tmp.path());
        let rel_path = Path::new("manifest.json");

        write_atomic(&location, rel_path, b"original")?;
        write_atomic(&location, rel_path, b"updated")?;

        assert_eq!(read_to_string(&location, rel_path)?, "updated");
        assert!(!tmp.path().join("manifest.json.tmp").exists());
        Ok(())
    }

    #[test]
    fn write_new_fails_if_file_exists() -> TestResult {
        let tmp = TempDir::new()?;
        let location = StorageLocation::local(tmp.path());
        let rel_path = Path::new("objects/abc");

        write_new(&location, rel_path, b"first")?;
        let err = write_new(&location, rel_path, b"second").expect_err("second write must fail");
        assert!(matches!(err, StorageError::AlreadyExists { .. }));

        assert_eq!(read_all_bytes(&location, rel_path)?, b"first");
        Ok(())
    }

    #[test]
    fn copy_new_refuses_to_overwrite() -> TestResult {
        let tmp = TempDir::new()?;
        let location = StorageLocation::local(tmp.path());
        let src = tmp.path().join("src.bin");
        fs::write(&src, b"payload")?;

        let copied = copy_new(&location, &src, Path::new("media/images/a.png"))?;
        assert_eq!(copied, 7);

        let err = copy_new(&location, &src, Path::new("media/images/a.png"))
            .expect_err("target exists");
        assert!(matches!(err, StorageError::AlreadyExists { .. }));
        Ok(())
    }

    #[test]
    fn read_missing_file_is_not_found() -> TestResult {
        let tmp = TempDir::new()?;
        let location = StorageLocation::local(tmp.path());

        let err = read_all_bytes(&location, Path::new("missing.bin")).expect_err("missing");
        assert!(matches!(err, StorageError::NotFound { .. }));
        assert!(err.path().ends_with("missing.bin"));
        Ok(())
    }
}
