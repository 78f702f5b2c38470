//! Pre-encoded audio clips.

use serde_json::{Value as Json, json};

use super::{Media, MediaError, MediaFile, download_bytes, file_json, json_path};
use crate::destination::{Destination, SourceManifest};
use crate::layout::{AUDIO_SUBDIR, compound_extension};

/// An encoded audio clip with its sample rate.
#[derive(Debug, Clone)]
pub struct Audio {
    data: Vec<u8>,
    format: String,
    sample_rate: Option<u32>,
    duration: Option<f64>,
    caption: Option<String>,
    file: MediaFile,
}

impl Audio {
    /// A clip from encoded bytes in `format` (for example `wav`).
    pub fn new(data: Vec<u8>, format: impl Into<String>, sample_rate: Option<u32>) -> Self {
        Self {
            data,
            format: format.into(),
            sample_rate,
            duration: None,
            caption: None,
            file: MediaFile::default(),
        }
    }

    /// Set the duration in seconds.
    pub fn with_duration(mut self, seconds: f64) -> Self {
        self.duration = Some(seconds);
        self
    }

    /// Set the caption.
    pub fn with_caption(mut self, caption: impl Into<String>) -> Self {
        self.caption = Some(caption.into());
        self
    }

    /// Encoded bytes.
    pub fn data(&self) -> &[u8] {
        &self.data
    }

    /// Encoding format.
    pub fn format(&self) -> &str {
        &self.format
    }

    /// Samples per second, when known.
    pub fn sample_rate(&self) -> Option<u32> {
        self.sample_rate
    }

    /// Duration in seconds, when known.
    pub fn duration(&self) -> Option<f64> {
        self.duration
    }

    /// Caption.
    pub fn caption(&self) -> Option<&str> {
        self.caption.as_deref()
    }

    /// Serialize toward a run log or a manifest.
    pub fn to_json(&mut self, destination: &mut Destination<'_>) -> Result<Json, MediaError> {
        self.to_json_with_id(destination, None)
    }

    pub(crate) fn to_json_with_id(
        &mut self,
        destination: &mut Destination<'_>,
        id: Option<&str>,
    ) -> Result<Json, MediaError> {
        let mut json = file_json(self, destination, id)?;
        json.insert("sample_rate".to_string(), json!(self.sample_rate));
        json.insert("caption".to_string(), json!(self.caption));
        Ok(Json::Object(json))
    }

    /// Load a clip whose bytes live in `source`.
    pub fn from_json(json: &Json, source: &dyn SourceManifest) -> Result<Audio, MediaError> {
        let path = json_path(json, Self::TYPE_NAME)?;
        let format = compound_extension(path).trim_start_matches('.').to_string();
        let data = download_bytes(json, source, Self::TYPE_NAME)?;
        let sample_rate = json
            .get("sample_rate")
            .and_then(Json::as_u64)
            .and_then(|rate| u32::try_from(rate).ok());
        let mut audio = Audio::new(data, format, sample_rate);
        audio.caption = json
            .get("caption")
            .and_then(Json::as_str)
            .map(str::to_string);
        Ok(audio)
    }
}

impl Media for Audio {
    const TYPE_NAME: &'static str = "audio-file";

    fn media_subdir(&self) -> &'static str {
        AUDIO_SUBDIR
    }

    fn encode(&self) -> Result<(Vec<u8>, String), MediaError> {
        Ok((self.data.clone(), format!(".{}", self.format)))
    }

    fn file(&self) -> &MediaFile {
        &self.file
    }

    fn file_mut(&mut self) -> &mut MediaFile {
        &mut self.file
    }
}

impl PartialEq for Audio {
    fn eq(&self, other: &Self) -> bool {
        self.data == other.data
            && self.sample_rate == other.sample_rate
            && self.caption == other.caption
    }
}
