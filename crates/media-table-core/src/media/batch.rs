//! Batched log serialization of image and audio sequences.
//!
//! A homogeneous sequence logged at one key and step becomes a single
//! summary object instead of a list. Item `i` binds with id `i`, so the
//! files land at `{key}_{step}_{i}{ext}`.

use log::warn;
use serde_json::{Map, Value as Json, json};
use snafu::prelude::*;

use super::audio::Audio;
use super::image::Image;
use super::{EmptyBatchSnafu, MediaError, MediaPathMismatchSnafu};
use crate::destination::{Destination, RunLog, Step};
use crate::layout::IMAGES_SUBDIR;

/// Keep at most `max_items` items, warning when some are dropped.
pub fn prune_max_items<T>(mut items: Vec<T>, max_items: usize, kind: &str) -> Vec<T> {
    if items.len() > max_items {
        warn!(
            "Only {max_items} {kind} will be uploaded per step; dropping {} of {}",
            items.len() - max_items,
            items.len()
        );
        items.truncate(max_items);
    }
    items
}

/// Serialize a sequence of images logged together as `images/separated`.
pub fn images_to_json<'i>(
    images: impl IntoIterator<Item = &'i mut Image>,
    run: &mut dyn RunLog,
    key: &str,
    step: Step,
    max_items: usize,
) -> Result<Json, MediaError> {
    let images = prune_max_items(images.into_iter().collect(), max_items, "images");
    ensure!(!images.is_empty(), EmptyBatchSnafu { kind: "images" });

    let mut jsons = Vec::with_capacity(images.len());
    for (i, image) in images.into_iter().enumerate() {
        let id = i.to_string();
        let json = image.to_json_with_id(&mut Destination::log(&mut *run, key, step), Some(&id))?;
        let path = json.get("path").and_then(Json::as_str).unwrap_or_default();
        ensure!(
            path.starts_with(IMAGES_SUBDIR),
            MediaPathMismatchSnafu {
                expected: IMAGES_SUBDIR,
                path,
            }
        );
        jsons.push((json, image.width(), image.height(), image.caption().map(str::to_string)));
    }

    let (first, width, height, first_caption) = &jsons[0];
    if jsons.iter().any(|(_, w, h, _)| w != width || h != height) {
        warn!("Image sizes do not match; batched images may display incorrectly");
    }

    let mut meta = Map::new();
    meta.insert("_type".to_string(), Json::from("images/separated"));
    meta.insert("width".to_string(), Json::from(*width));
    meta.insert("height".to_string(), Json::from(*height));
    meta.insert("format".to_string(), first.get("format").cloned().unwrap_or(Json::Null));
    meta.insert("count".to_string(), Json::from(jsons.len()));
    if first_caption.is_some() {
        let captions = jsons.iter().map(|(_, _, _, caption)| json!(caption)).collect();
        meta.insert("captions".to_string(), Json::Array(captions));
    }
    for (field, meta_key) in [("masks", "all_masks"), ("boxes", "all_boxes")] {
        let groups: Vec<Json> = jsons
            .iter()
            .map(|(json, ..)| json.get(field).cloned().unwrap_or(Json::Null))
            .collect();
        if groups.iter().any(|group| !group.is_null()) {
            meta.insert(meta_key.to_string(), Json::Array(groups));
        }
    }
    Ok(Json::Object(meta))
}

/// Serialize a sequence of audio clips logged together as `audio`.
pub fn audio_to_json<'i>(
    clips: impl IntoIterator<Item = &'i mut Audio>,
    run: &mut dyn RunLog,
    key: &str,
    step: Step,
    max_items: usize,
) -> Result<Json, MediaError> {
    let mut clips = prune_max_items(clips.into_iter().collect(), max_items, "audio clips");
    ensure!(!clips.is_empty(), EmptyBatchSnafu { kind: "audio" });

    let mut audio = Vec::with_capacity(clips.len());
    for (i, clip) in clips.iter_mut().enumerate() {
        let id = i.to_string();
        audio.push(clip.to_json_with_id(&mut Destination::log(&mut *run, key, step), Some(&id))?);
    }

    let sample_rates: Vec<Json> = clips.iter().map(|c| json!(c.sample_rate())).collect();
    let durations: Vec<Json> = clips.iter().map(|c| json!(c.duration())).collect();
    let mut meta = Map::new();
    meta.insert("_type".to_string(), Json::from("audio"));
    meta.insert("count".to_string(), Json::from(clips.len()));
    meta.insert("audio".to_string(), Json::Array(audio));
    meta.insert("sampleRates".to_string(), Json::Array(sample_rates));
    meta.insert("durations".to_string(), Json::Array(durations));
    if clips.iter().any(|c| c.caption().is_some()) {
        let captions = clips
            .iter()
            .map(|c| Json::from(c.caption().unwrap_or_default()))
            .collect();
        meta.insert("captions".to_string(), Json::Array(captions));
    }
    Ok(Json::Object(meta))
}
