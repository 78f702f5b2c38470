//! Rich values and their dual-destination serialization.
//!
//! A [`RichValue`] is anything beyond a scalar that a table cell or a logged
//! row may hold: media files, nested tables, class sets and annotations.
//! Each serializes differently to each [`Destination`]:
//!
//! - toward a run log, media is staged once and copied into the run under
//!   `media/<kind>/{key}_{step}_{id}{ext}`; the JSON carries that relative
//!   path.
//! - toward a manifest, media is staged once and registered under
//!   `<media subdir>/<staged file name>`; the JSON carries the manifest
//!   path. Nested values register into the same manifest before their
//!   parent finishes, and a registration the manifest cannot resolve fails
//!   with [`MediaError::UnresolvedReference`].
//!
//! Staging and binding state lives in a [`MediaFile`] owned by each
//! file-backed value. It never takes part in equality.

pub mod annotations;
pub mod audio;
pub mod batch;
pub mod classes;
mod error;
pub mod image;
pub mod joined_table;

pub use error::MediaError;
pub(crate) use error::{
    DestinationSnafu, EmptyBatchSnafu, InvalidAnnotationSnafu, InvalidJoinSnafu, JsonSnafu,
    MediaPathMismatchSnafu, MissingClassesSnafu, MissingFieldSnafu, NoSourceSnafu, TableSnafu,
    TypeJsonSnafu, UnknownKindSnafu, UnresolvedReferenceSnafu, UnsupportedCellSnafu,
    UnsupportedDestinationSnafu,
};

use indexmap::IndexMap;
use log::debug;
use serde_json::{Map, Value as Json};
use snafu::prelude::*;

use crate::destination::{
    Destination, Manifest, ManifestEntry, RunLog, SourceManifest, StagedRef, Stager, Step,
};
use crate::dtypes::registry::{
    AUDIO_TAG, BOXES_TAG, CLASSES_ID_TAG, IMAGE_TAG, JOINED_TABLE_TAG, MASK_TAG,
    PARTITIONED_TABLE_TAG, TABLE_TAG,
};
use crate::layout::{join_forward, log_media_file_name, manifest_object_name, object_extension};
use crate::table::{PartitionedTable, Table};
use crate::value::{Value, binary_from_json, binary_to_json};

use annotations::{BoundingBoxes2D, ImageMask};
use audio::Audio;
use classes::Classes;
use image::Image;
use joined_table::JoinedTable;

/// A value that takes part in media serialization.
#[derive(Debug, Clone, PartialEq)]
pub enum RichValue {
    /// A nested table.
    Table(Table),
    /// A table stored as parts in a manifest directory.
    PartitionedTable(PartitionedTable),
    /// Two tables joined on a key.
    JoinedTable(JoinedTable),
    /// An encoded image.
    Image(Image),
    /// An encoded audio clip.
    Audio(Audio),
    /// A class set.
    Classes(Classes),
    /// Bounding boxes over an image.
    BoundingBoxes2D(BoundingBoxes2D),
    /// A segmentation mask over an image.
    ImageMask(ImageMask),
}

impl RichValue {
    /// The kind's `_type` in manifest JSON.
    pub fn type_name(&self) -> &'static str {
        match self {
            RichValue::Table(_) => "table",
            RichValue::PartitionedTable(_) => "partitioned-table",
            RichValue::JoinedTable(_) => "joined-table",
            RichValue::Image(_) => "image-file",
            RichValue::Audio(_) => "audio-file",
            RichValue::Classes(_) => "classes",
            RichValue::BoundingBoxes2D(_) => "bounding-boxes",
            RichValue::ImageMask(_) => "mask",
        }
    }

    /// Tag of the registry kind that types this value.
    pub fn custom_tag(&self) -> &'static str {
        match self {
            RichValue::Table(_) => TABLE_TAG,
            RichValue::PartitionedTable(_) => PARTITIONED_TABLE_TAG,
            RichValue::JoinedTable(_) => JOINED_TABLE_TAG,
            RichValue::Image(_) => IMAGE_TAG,
            RichValue::Audio(_) => AUDIO_TAG,
            RichValue::Classes(_) => CLASSES_ID_TAG,
            RichValue::BoundingBoxes2D(_) => BOXES_TAG,
            RichValue::ImageMask(_) => MASK_TAG,
        }
    }

    /// Serialize toward `destination`, staging and binding as needed.
    pub fn to_json(&mut self, destination: &mut Destination<'_>) -> Result<Json, MediaError> {
        match self {
            RichValue::Table(table) => table.to_json(destination),
            RichValue::PartitionedTable(table) => table.to_json(destination),
            RichValue::JoinedTable(joined) => joined.to_json(destination),
            RichValue::Image(image) => image.to_json(destination),
            RichValue::Audio(audio) => audio.to_json(destination),
            RichValue::Classes(classes) => classes.to_json(destination),
            RichValue::BoundingBoxes2D(boxes) => boxes.to_json(destination),
            RichValue::ImageMask(mask) => mask.to_json(destination),
        }
    }

    /// Load a value from its JSON, dispatching on `_type`.
    ///
    /// File-backed kinds read their payload through `source`.
    pub fn from_json(
        json: &Json,
        source: Option<&dyn SourceManifest>,
    ) -> Result<RichValue, MediaError> {
        let type_name = json
            .get("_type")
            .and_then(Json::as_str)
            .context(MissingFieldSnafu {
                kind: "rich value",
                field: "_type",
            })?;
        let rich = match type_name {
            "table" => RichValue::Table(Table::from_json(json, source)?),
            "partitioned-table" => RichValue::PartitionedTable(PartitionedTable::from_json(
                json,
                require(source, "partitioned-table")?,
            )?),
            "joined-table" => {
                RichValue::JoinedTable(JoinedTable::from_json(json, require(source, "joined-table")?)?)
            }
            "image-file" => RichValue::Image(Image::from_json(json, require(source, "image-file")?)?),
            "audio-file" => RichValue::Audio(Audio::from_json(json, require(source, "audio-file")?)?),
            "classes" => RichValue::Classes(Classes::from_json(json)?),
            "mask" => RichValue::ImageMask(ImageMask::from_json(json, require(source, "mask")?, "")?),
            other => return UnknownKindSnafu { type_name: other }.fail(),
        };
        Ok(rich)
    }
}

fn require<'a>(
    source: Option<&'a dyn SourceManifest>,
    kind: &'static str,
) -> Result<&'a dyn SourceManifest, MediaError> {
    source.context(NoSourceSnafu { kind })
}

/// Where a file-backed value was copied into a run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogBinding {
    /// Identity of the run the file was copied into.
    pub run: String,
    /// Logged key.
    pub key: String,
    /// Logged step.
    pub step: Step,
    /// Run-relative path of the copied file.
    pub path: String,
}

/// Staging and binding state of a file-backed value.
///
/// `staged` is set on first serialization to either destination and reused
/// afterwards; `binding` is set once the file was copied into a run.
#[derive(Debug, Clone, Default)]
pub struct MediaFile {
    staged: Option<StagedRef>,
    binding: Option<LogBinding>,
}

impl MediaFile {
    /// The staged file, if the value was serialized before.
    pub fn staged(&self) -> Option<&StagedRef> {
        self.staged.as_ref()
    }

    /// The run binding, if the value was logged before.
    pub fn binding(&self) -> Option<&LogBinding> {
        self.binding.as_ref()
    }

    /// Whether the value is bound to a run.
    pub fn is_bound(&self) -> bool {
        self.binding.is_some()
    }
}

/// A value backed by one staged file.
pub trait Media {
    /// `_type` written in the value's JSON.
    const TYPE_NAME: &'static str;

    /// Directory files of this kind are grouped under.
    fn media_subdir(&self) -> &'static str;

    /// Bytes to stage and their extension, including the leading dot.
    fn encode(&self) -> Result<(Vec<u8>, String), MediaError>;

    /// Staging and binding state.
    fn file(&self) -> &MediaFile;

    /// Mutable staging and binding state.
    fn file_mut(&mut self) -> &mut MediaFile;
}

/// Stage the value's payload, or return the earlier staged file.
pub fn stage_media<M: Media + ?Sized, S: Stager + ?Sized>(
    media: &mut M,
    stager: &mut S,
) -> Result<StagedRef, MediaError> {
    if let Some(staged) = media.file().staged() {
        return Ok(staged.clone());
    }
    let (bytes, extension) = media.encode()?;
    let staged = stager.stage(&bytes, &extension).context(DestinationSnafu)?;
    media.file_mut().staged = Some(staged.clone());
    Ok(staged)
}

/// Copy the value's file into `run` at `(key, step)`.
///
/// `id` names the file together with key and step and defaults to the short
/// content digest. Binding again to the same run at the same key and step
/// returns the earlier binding without touching the run.
pub fn bind_to_log<M: Media + ?Sized>(
    media: &mut M,
    run: &mut dyn RunLog,
    key: &str,
    step: Step,
    id: Option<&str>,
) -> Result<LogBinding, MediaError> {
    let run_id = run.run_id();
    if let Some(binding) = media.file().binding() {
        if binding.run == run_id && binding.key == key && binding.step == step {
            return Ok(binding.clone());
        }
    }

    let staged = stage_media(media, run)?;
    let id = id.unwrap_or_else(|| staged.short_id());
    let file_name = log_media_file_name(key, &step.to_string(), id, staged.extension());
    let path = run
        .copy_into_run(&staged, media.media_subdir(), &file_name)
        .context(DestinationSnafu)?;
    debug!("bound {} to {path}", M::TYPE_NAME);

    let binding = LogBinding {
        run: run_id,
        key: key.to_string(),
        step,
        path,
    };
    media.file_mut().binding = Some(binding.clone());
    Ok(binding)
}

/// Register the value's file in `manifest` under its media subdirectory.
///
/// Fails with [`MediaError::UnresolvedReference`] when the manifest cannot
/// resolve the entry it just registered.
pub fn bind_to_manifest<M: Media + ?Sized>(
    media: &mut M,
    manifest: &mut dyn Manifest,
) -> Result<ManifestEntry, MediaError> {
    let staged = stage_media(media, manifest)?;
    let name = join_forward(media.media_subdir(), &staged.file_name());
    let entry = manifest
        .register(&staged, &name)
        .context(DestinationSnafu)?;
    ensure!(
        manifest.resolve(&entry.path).is_some(),
        UnresolvedReferenceSnafu {
            path: entry.path.clone()
        }
    );
    Ok(entry)
}

/// Base JSON of a file-backed value: `_type`, `path`, `digest` and `size`.
pub(crate) fn base_json(type_name: &str, path: &str, staged: &StagedRef) -> Map<String, Json> {
    let mut json = Map::new();
    json.insert("_type".to_string(), Json::String(type_name.to_string()));
    json.insert("path".to_string(), Json::String(path.to_string()));
    json.insert("digest".to_string(), Json::String(staged.digest().to_string()));
    json.insert("size".to_string(), Json::from(staged.size()));
    json
}

/// Bind a file-backed value to whichever destination is given and return
/// its base JSON.
pub(crate) fn file_json<M: Media + ?Sized>(
    media: &mut M,
    destination: &mut Destination<'_>,
    id: Option<&str>,
) -> Result<Map<String, Json>, MediaError> {
    match destination {
        Destination::Log { run, key, step } => {
            let run: &mut dyn RunLog = &mut **run;
            let binding = bind_to_log(media, run, key, *step, id)?;
            let staged = stage_media(media, run)?;
            Ok(base_json(M::TYPE_NAME, &binding.path, &staged))
        }
        Destination::Manifest(manifest) => {
            let manifest: &mut dyn Manifest = &mut **manifest;
            let entry = bind_to_manifest(media, manifest)?;
            let staged = stage_media(media, manifest)?;
            Ok(base_json(M::TYPE_NAME, &entry.path, &staged))
        }
    }
}

/// `path` field of a file-backed value's JSON.
pub(crate) fn json_path<'a>(json: &'a Json, kind: &'static str) -> Result<&'a str, MediaError> {
    json.get("path")
        .and_then(Json::as_str)
        .context(MissingFieldSnafu { kind, field: "path" })
}

/// Read the bytes a file-backed value's JSON points at.
pub(crate) fn download_bytes(
    json: &Json,
    source: &dyn SourceManifest,
    kind: &'static str,
) -> Result<Vec<u8>, MediaError> {
    let path = json_path(json, kind)?;
    let staged = source.download(path).context(DestinationSnafu)?;
    staged.read_bytes().context(DestinationSnafu)
}

/// Serialize a cell value, binding any rich values it holds.
pub fn value_to_json(value: &mut Value, destination: &mut Destination<'_>) -> Result<Json, MediaError> {
    Ok(match value {
        Value::None => Json::Null,
        Value::Bool(b) => Json::Bool(*b),
        Value::Number(n) => Json::Number(n.clone()),
        Value::String(s) => Json::String(s.clone()),
        Value::Binary(bytes) => binary_to_json(bytes),
        Value::Record(fields) => {
            let mut out = Map::with_capacity(fields.len());
            for (key, field) in fields.iter_mut() {
                out.insert(key.clone(), value_to_json(field, destination)?);
            }
            Json::Object(out)
        }
        Value::Rich(rich) => rich.to_json(destination)?,
    })
}

/// Load a cell value. Objects with a `_type` other than `bytes` load as
/// rich values through `source`.
pub fn value_from_json(json: &Json, source: Option<&dyn SourceManifest>) -> Result<Value, MediaError> {
    Ok(match json {
        Json::Null => Value::None,
        Json::Bool(b) => Value::Bool(*b),
        Json::Number(n) => Value::Number(n.clone()),
        Json::String(s) => Value::String(s.clone()),
        Json::Object(map) => {
            if let Some(bytes) = binary_from_json(map) {
                return bytes.map(Value::Binary).context(UnsupportedCellSnafu {
                    reason: "bytes cell without a valid base64 payload",
                });
            }
            if map.contains_key("_type") {
                return Ok(RichValue::from_json(json, source)?.into());
            }
            let mut fields = IndexMap::with_capacity(map.len());
            for (key, field) in map {
                fields.insert(key.clone(), value_from_json(field, source)?);
            }
            Value::Record(fields)
        }
        Json::Array(_) => {
            return UnsupportedCellSnafu {
                reason: "arrays have no cell representation",
            }
            .fail();
        }
    })
}

/// Stage the manifest JSON of `rich` as a document in `manifest`.
pub(crate) fn stage_rich(
    manifest: &mut dyn Manifest,
    rich: &mut RichValue,
) -> Result<StagedRef, MediaError> {
    let json = {
        let inner: &mut dyn Manifest = &mut *manifest;
        rich.to_json(&mut Destination::Manifest(inner))?
    };
    let bytes = serde_json::to_vec(&json).context(JsonSnafu)?;
    manifest
        .stage(&bytes, &object_extension(rich.type_name()))
        .context(DestinationSnafu)
}

/// Add a whole rich value to `manifest` as `{name}.{type}.json`.
///
/// Values it contains register into the same manifest first.
pub fn add_to_manifest(
    manifest: &mut dyn Manifest,
    rich: &mut RichValue,
    name: &str,
) -> Result<ManifestEntry, MediaError> {
    let staged = stage_rich(manifest, rich)?;
    manifest
        .register(&staged, &manifest_object_name(name, rich.type_name()))
        .context(DestinationSnafu)
}
