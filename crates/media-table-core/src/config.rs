//! Tunable limits for table serialization and batched media.
//!
//! Every field has a default matching the built-in constants, so a config
//! document only needs the keys it overrides:
//!
//! ```json
//! { "limits": { "max_rows": 500 }, "dedupe_run_media": true }
//! ```

use std::path::Path;

use serde::{Deserialize, Serialize};
use snafu::prelude::*;

use crate::media::image::MAX_ITEMS;
use crate::table::{MAX_ARTIFACT_ROWS, MAX_ROWS};

/// Errors raised while loading a [`MediaConfig`].
#[derive(Debug, Snafu)]
pub enum ConfigError {
    /// The config file could not be read.
    #[snafu(display("Failed to read config at {path}: {source}"))]
    Read {
        /// Path of the config file.
        path: String,
        /// Underlying I/O error.
        source: std::io::Error,
    },

    /// The config document is not valid JSON for [`MediaConfig`].
    #[snafu(display("Failed to parse config: {source}"))]
    Parse {
        /// Underlying JSON error.
        source: serde_json::Error,
    },
}

/// Row caps applied when a table is serialized.
///
/// The two caps are independent: `max_rows` applies to run-log files (the
/// display cap) and `max_artifact_rows` to manifest documents.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TableLimits {
    /// Cap for tables written to a run log.
    #[serde(default = "default_max_rows")]
    pub max_rows: usize,
    /// Cap for tables written to a manifest.
    #[serde(default = "default_max_artifact_rows")]
    pub max_artifact_rows: usize,
}

fn default_max_rows() -> usize {
    MAX_ROWS
}

fn default_max_artifact_rows() -> usize {
    MAX_ARTIFACT_ROWS
}

fn default_max_batch_items() -> usize {
    MAX_ITEMS
}

impl Default for TableLimits {
    fn default() -> Self {
        Self {
            max_rows: MAX_ROWS,
            max_artifact_rows: MAX_ARTIFACT_ROWS,
        }
    }
}

/// Top-level configuration for media serialization.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MediaConfig {
    /// Row caps for tables.
    #[serde(default)]
    pub limits: TableLimits,
    /// Maximum number of items serialized from one batched sequence.
    #[serde(default = "default_max_batch_items")]
    pub max_batch_items: usize,
    /// Whether a run reuses an existing media file with identical content.
    #[serde(default)]
    pub dedupe_run_media: bool,
}

impl Default for MediaConfig {
    fn default() -> Self {
        Self {
            limits: TableLimits::default(),
            max_batch_items: MAX_ITEMS,
            dedupe_run_media: false,
        }
    }
}

impl MediaConfig {
    /// Parse a config from a JSON document.
    pub fn from_json_str(json: &str) -> Result<Self, ConfigError> {
        serde_json::from_str(json).context(ParseSnafu)
    }

    /// Load a config from a JSON file.
    pub fn from_path(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let json = std::fs::read_to_string(path).context(ReadSnafu {
            path: path.display().to_string(),
        })?;
        Self::from_json_str(&json)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_document_uses_defaults() {
        let config = MediaConfig::from_json_str("{}").expect("parse");
        assert_eq!(config, MediaConfig::default());
        assert_eq!(config.limits.max_rows, 10_000);
        assert_eq!(config.limits.max_artifact_rows, 200_000);
        assert_eq!(config.max_batch_items, 108);
        assert!(!config.dedupe_run_media);
    }

    #[test]
    fn partial_limits_keep_other_defaults() {
        let config =
            MediaConfig::from_json_str(r#"{ "limits": { "max_rows": 5 }, "dedupe_run_media": true }"#)
                .expect("parse");
        assert_eq!(config.limits.max_rows, 5);
        assert_eq!(config.limits.max_artifact_rows, MAX_ARTIFACT_ROWS);
        assert!(config.dedupe_run_media);
    }

    #[test]
    fn malformed_document_is_a_parse_error() {
        let err = MediaConfig::from_json_str("{ not json").expect_err("invalid");
        assert!(matches!(err, ConfigError::Parse { .. }));
    }
}
