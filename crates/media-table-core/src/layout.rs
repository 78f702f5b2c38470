//! Relative path conventions for run media directories and manifests.
//!
//! This module centralizes every *relative* path the serialization protocol
//! produces:
//! - per-kind media subdirectories (`media/table`, `media/images`, ...),
//! - log media file naming (`{key}_{step}_{id}{ext}`),
//! - manifest object names for whole rich values (`{name}.{type}.json`),
//! - the on-disk manifest document and its content-addressed object store.
//!
//! Callers join these with a [`crate::storage::StorageLocation`] before IO.
//! Manifest paths always use forward slashes regardless of platform.

use std::path::{Component, Path, PathBuf};

use snafu::Snafu;

/// Root directory for all media written by rich values.
pub const MEDIA_DIR: &str = "media";
/// Log media subdirectory for tables.
pub const TABLE_SUBDIR: &str = "media/table";
/// Media subdirectory for images.
pub const IMAGES_SUBDIR: &str = "media/images";
/// Media subdirectory for image masks.
pub const MASKS_SUBDIR: &str = "media/images/mask";
/// Media subdirectory for audio clips.
pub const AUDIO_SUBDIR: &str = "media/audio";
/// Media subdirectory for bounding box metadata files.
pub const BOXES_SUBDIR: &str = "media/metadata/boxes2D";
/// Manifest name under which image classes are registered.
pub const CLASSES_ENTRY_NAME: &str = "media/cls";

/// Name of the persisted manifest document under a manifest root.
pub const MANIFEST_FILE_NAME: &str = "manifest.json";
/// Directory holding content-addressed manifest objects.
pub const OBJECTS_DIR_NAME: &str = "objects";

/// Number of digest hex characters used in default media file ids.
pub const MEDIA_ID_DIGEST_CHARS: usize = 20;

/// Errors raised when a manifest entry path is not acceptable.
#[derive(Debug, Snafu)]
pub enum LayoutError {
    /// The path is empty, absolute, or escapes the manifest root.
    #[snafu(display("Invalid manifest entry path: {path}"))]
    InvalidEntryPath {
        /// The offending path.
        path: String,
    },
}

/// Validate a manifest-relative entry path.
///
/// A valid path is non-empty, relative, uses only normal components, and
/// does not contain backslashes.
pub fn validate_entry_path(path: &str) -> Result<(), LayoutError> {
    let invalid = || LayoutError::InvalidEntryPath {
        path: path.to_string(),
    };

    if path.is_empty() || path.starts_with('/') || path.contains('\\') {
        return Err(invalid());
    }

    let all_normal = Path::new(path)
        .components()
        .all(|c| matches!(c, Component::Normal(_)));
    if !all_normal {
        return Err(invalid());
    }

    Ok(())
}

/// Join path segments with forward slashes.
pub fn join_forward(dir: &str, file_name: &str) -> String {
    let dir = dir.trim_end_matches('/');
    if dir.is_empty() {
        file_name.to_string()
    } else {
        format!("{dir}/{file_name}")
    }
}

/// File name for a media file bound to a run: `{key}_{step}_{id}{ext}`.
///
/// `key` may contain `/` for nested history keys; those are flattened so the
/// file stays inside its media subdirectory.
pub fn log_media_file_name(key: &str, step: &str, id: &str, extension: &str) -> String {
    let key = key.replace(['/', '\\'], "_");
    format!("{key}_{step}_{id}{extension}")
}

/// Manifest name for a whole rich value: `{name}.{type_name}.json`.
pub fn manifest_object_name(name: &str, type_name: &str) -> String {
    format!("{name}.{type_name}.json")
}

/// Extension of a staged rich-value document: `.{type_name}.json`.
pub fn object_extension(type_name: &str) -> String {
    format!(".{type_name}.json")
}

/// Relative path: `manifest.json`
pub fn manifest_rel_path() -> PathBuf {
    PathBuf::from(MANIFEST_FILE_NAME)
}

/// Relative path: `objects/<digest>`
pub fn object_rel_path(digest: &str) -> PathBuf {
    PathBuf::from(OBJECTS_DIR_NAME).join(digest)
}

/// Extension of a manifest path from the first dot of its file name, so
/// `parts/a.table.json` yields `.table.json`. Empty when there is none.
pub fn compound_extension(path: &str) -> &str {
    let file_name = path.rsplit('/').next().unwrap_or(path);
    match file_name.find('.') {
        Some(idx) => &file_name[idx..],
        None => "",
    }
}

/// Normalize a directory prefix so `prefix` and `prefix/` select the same entries.
pub fn directory_prefix(prefix: &str) -> String {
    let trimmed = prefix.trim_end_matches('/');
    if trimmed.is_empty() {
        String::new()
    } else {
        format!("{trimmed}/")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn entry_paths_must_stay_relative() {
        assert!(validate_entry_path("media/images/a.png").is_ok());
        assert!(validate_entry_path("t.table.json").is_ok());

        for bad in ["", "/abs/path", "../escape", "a/../b", "a\\b", "./a"] {
            assert!(validate_entry_path(bad).is_err(), "{bad} should be rejected");
        }
    }

    #[test]
    fn log_file_names_flatten_nested_keys() {
        assert_eq!(
            log_media_file_name("eval/samples", "3", "abc", ".png"),
            "eval_samples_3_abc.png"
        );
    }

    #[test]
    fn manifest_names_carry_the_type() {
        assert_eq!(manifest_object_name("media/cls", "classes"), "media/cls.classes.json");
        assert_eq!(object_extension("table"), ".table.json");
        assert_eq!(join_forward("media/table/", "x.json"), "media/table/x.json");
        assert_eq!(join_forward("", "x.json"), "x.json");
    }

    #[test]
    fn compound_extensions_keep_every_suffix() {
        assert_eq!(compound_extension("parts/a.table.json"), ".table.json");
        assert_eq!(compound_extension("media/images/abc.png"), ".png");
        assert_eq!(compound_extension("dir.d/noext"), "");
    }

    #[test]
    fn directory_prefix_adds_single_slash() {
        assert_eq!(directory_prefix("parts"), "parts/");
        assert_eq!(directory_prefix("parts/"), "parts/");
        assert_eq!(directory_prefix(""), "");
    }
}
