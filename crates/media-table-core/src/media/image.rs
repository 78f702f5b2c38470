//! Pre-encoded images with optional annotations.
//!
//! An image may carry keyed bounding boxes and masks. Toward a run log they
//! bind under the image's key with ids derived from the image's id. Toward a
//! manifest an annotated image needs its [`Classes`], which are registered
//! once at `media/cls.classes.json` and referenced from the image JSON.

use indexmap::IndexMap;
use serde_json::{Map, Value as Json, json};
use snafu::prelude::*;

use super::annotations::{BoundingBoxes2D, ImageMask};
use super::classes::Classes;
use super::{
    Media, MediaError, MediaFile, MissingClassesSnafu, MissingFieldSnafu, RichValue,
    UnresolvedReferenceSnafu, add_to_manifest, download_bytes, file_json, json_path,
};
use crate::destination::{Destination, Manifest, SourceManifest};
use crate::layout::{CLASSES_ENTRY_NAME, IMAGES_SUBDIR, compound_extension};

/// Default cap on the number of items serialized from one batched sequence.
pub const MAX_ITEMS: usize = 108;

/// An encoded image.
#[derive(Debug, Clone)]
pub struct Image {
    data: Vec<u8>,
    format: String,
    width: u32,
    height: u32,
    caption: Option<String>,
    grouping: Option<i64>,
    classes: Option<Classes>,
    boxes: IndexMap<String, BoundingBoxes2D>,
    masks: IndexMap<String, ImageMask>,
    file: MediaFile,
}

impl Image {
    /// An image from encoded bytes in `format` (for example `png`) with its
    /// pixel dimensions.
    pub fn new(data: Vec<u8>, format: impl Into<String>, width: u32, height: u32) -> Self {
        Self {
            data,
            format: format.into(),
            width,
            height,
            caption: None,
            grouping: None,
            classes: None,
            boxes: IndexMap::new(),
            masks: IndexMap::new(),
            file: MediaFile::default(),
        }
    }

    /// Set the caption.
    pub fn with_caption(mut self, caption: impl Into<String>) -> Self {
        self.caption = Some(caption.into());
        self
    }

    /// Set the grouping.
    pub fn with_grouping(mut self, grouping: i64) -> Self {
        self.grouping = Some(grouping);
        self
    }

    /// Set the class set annotations refer to.
    pub fn with_classes(mut self, classes: Classes) -> Self {
        self.classes = Some(classes);
        self
    }

    /// Add bounding boxes under `key`.
    pub fn with_boxes(mut self, key: impl Into<String>, boxes: BoundingBoxes2D) -> Self {
        self.boxes.insert(key.into(), boxes);
        self
    }

    /// Add a mask under `key`.
    pub fn with_mask(mut self, key: impl Into<String>, mask: ImageMask) -> Self {
        self.masks.insert(key.into(), mask);
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

    /// Width in pixels.
    pub fn width(&self) -> u32 {
        self.width
    }

    /// Height in pixels.
    pub fn height(&self) -> u32 {
        self.height
    }

    /// Caption.
    pub fn caption(&self) -> Option<&str> {
        self.caption.as_deref()
    }

    /// Class set.
    pub fn classes(&self) -> Option<&Classes> {
        self.classes.as_ref()
    }

    /// Bounding boxes by key.
    pub fn boxes(&self) -> &IndexMap<String, BoundingBoxes2D> {
        &self.boxes
    }

    /// Masks by key.
    pub fn masks(&self) -> &IndexMap<String, ImageMask> {
        &self.masks
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
        let annotated = !self.boxes.is_empty() || !self.masks.is_empty();
        if matches!(destination, Destination::Manifest(_)) {
            ensure!(!annotated || self.classes.is_some(), MissingClassesSnafu);
        }

        let mut json = file_json(self, destination, id)?;
        json.insert("format".to_string(), Json::String(self.format.clone()));
        json.insert("width".to_string(), Json::from(self.width));
        json.insert("height".to_string(), Json::from(self.height));
        if let Some(grouping) = self.grouping {
            json.insert("grouping".to_string(), Json::from(grouping));
        }
        if let Some(caption) = &self.caption {
            json.insert("caption".to_string(), Json::String(caption.clone()));
        }

        if let (Destination::Manifest(manifest), Some(classes)) = (&mut *destination, &self.classes) {
            let manifest: &mut dyn Manifest = &mut **manifest;
            let mut rich = RichValue::Classes(classes.clone());
            let entry = add_to_manifest(manifest, &mut rich, CLASSES_ENTRY_NAME)?;
            json.insert(
                "classes".to_string(),
                json!({
                    "type": "classes-file",
                    "path": entry.path,
                    "digest": entry.digest,
                }),
            );
        }

        if !self.boxes.is_empty() {
            let mut out = Map::with_capacity(self.boxes.len());
            for (i, (key, boxes)) in self.boxes.iter_mut().enumerate() {
                let sub_id = id.map(|id| format!("{id}{i}"));
                out.insert(
                    key.clone(),
                    boxes.to_json_with_id(&mut destination.reborrow(), sub_id.as_deref())?,
                );
            }
            json.insert("boxes".to_string(), Json::Object(out));
        }
        if !self.masks.is_empty() {
            let mut out = Map::with_capacity(self.masks.len());
            for (i, (key, mask)) in self.masks.iter_mut().enumerate() {
                let sub_id = id.map(|id| format!("{id}{i}"));
                out.insert(
                    key.clone(),
                    mask.to_json_with_id(&mut destination.reborrow(), sub_id.as_deref())?,
                );
            }
            json.insert("masks".to_string(), Json::Object(out));
        }
        Ok(Json::Object(json))
    }

    /// Load an image, its classes and its annotations from `source`.
    pub fn from_json(json: &Json, source: &dyn SourceManifest) -> Result<Image, MediaError> {
        let path = json_path(json, Self::TYPE_NAME)?;
        let format = json
            .get("format")
            .and_then(Json::as_str)
            .map(str::to_string)
            .unwrap_or_else(|| compound_extension(path).trim_start_matches('.').to_string());
        let dimension = |field: &'static str| {
            json.get(field)
                .and_then(Json::as_u64)
                .and_then(|v| u32::try_from(v).ok())
                .context(MissingFieldSnafu {
                    kind: Self::TYPE_NAME,
                    field,
                })
        };
        let (width, height) = (dimension("width")?, dimension("height")?);

        let data = download_bytes(json, source, Self::TYPE_NAME)?;
        let mut image = Image::new(data, format, width, height);
        image.caption = json.get("caption").and_then(Json::as_str).map(str::to_string);
        image.grouping = json.get("grouping").and_then(Json::as_i64);

        if let Some(classes_path) = json.pointer("/classes/path").and_then(Json::as_str) {
            match source.get(classes_path)? {
                Some(RichValue::Classes(classes)) => image.classes = Some(classes),
                _ => {
                    return UnresolvedReferenceSnafu { path: classes_path }.fail();
                }
            }
        }
        if let Some(boxes) = json.get("boxes").and_then(Json::as_object) {
            for (key, box_data) in boxes {
                let boxes = BoundingBoxes2D::from_value(&json!({ "box_data": box_data }), key.as_str())?;
                image.boxes.insert(key.clone(), boxes);
            }
        }
        if let Some(masks) = json.get("masks").and_then(Json::as_object) {
            for (key, mask) in masks {
                image
                    .masks
                    .insert(key.clone(), ImageMask::from_json(mask, source, key.as_str())?);
            }
        }
        Ok(image)
    }
}

impl Media for Image {
    const TYPE_NAME: &'static str = "image-file";

    fn media_subdir(&self) -> &'static str {
        IMAGES_SUBDIR
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

impl PartialEq for Image {
    fn eq(&self, other: &Self) -> bool {
        self.data == other.data
            && self.format == other.format
            && self.width == other.width
            && self.height == other.height
            && self.caption == other.caption
            && self.grouping == other.grouping
            && self.classes == other.classes
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::destination::{LocalManifest, LocalRun, Step};
    use crate::media::annotations::{BoxData, BoxPosition};
    use std::collections::BTreeMap;
    use tempfile::TempDir;

    type TestResult = Result<(), Box<dyn std::error::Error>>;

    fn boxed(key: &str) -> BoundingBoxes2D {
        let mut b = BoxData::at(BoxPosition::Corners {
            min_x: 0.0,
            max_x: 4.0,
            min_y: 0.0,
            max_y: 4.0,
        });
        b.class_id = Some(1);
        BoundingBoxes2D::new(key, vec![b], None)
    }

    fn annotated() -> Image {
        Image::new(vec![137, 80, 78, 71, 1], "png", 8, 8)
            .with_caption("a cat")
            .with_boxes("pred", boxed("pred"))
            .with_mask("seg", ImageMask::new("seg", vec![9, 9], BTreeMap::from([(1, "cat".to_string())])))
    }

    #[test]
    fn log_json_binds_annotations_with_derived_ids() -> TestResult {
        let tmp = TempDir::new()?;
        let mut run = LocalRun::new(tmp.path())?;
        let mut image = annotated();

        let json = image.to_json_with_id(&mut Destination::log(&mut run, "samples", Step::Index(5)), Some("2"))?;
        assert_eq!(json["_type"], "image-file");
        assert_eq!(json["path"], "media/images/samples_5_2.png");
        assert_eq!(json["width"], 8);
        assert_eq!(json["caption"], "a cat");
        assert_eq!(json["boxes"]["pred"]["path"], "media/metadata/boxes2D/samples_5_20.boxes2D.json");
        assert_eq!(json["masks"]["seg"]["path"], "media/images/mask/samples_5_20.mask.png");
        assert!(json.get("classes").is_none());
        Ok(())
    }

    #[test]
    fn manifest_requires_classes_for_annotations() -> TestResult {
        let tmp = TempDir::new()?;
        let mut manifest = LocalManifest::new(tmp.path())?;
        let err = annotated()
            .to_json(&mut Destination::manifest(&mut manifest))
            .expect_err("no classes");
        assert!(matches!(err, MediaError::MissingClasses));

        let mut plain = Image::new(vec![1, 2], "png", 1, 1);
        plain.to_json(&mut Destination::manifest(&mut manifest))?;
        Ok(())
    }

    #[test]
    fn manifest_round_trip_restores_classes_and_annotations() -> TestResult {
        let tmp = TempDir::new()?;
        let mut manifest = LocalManifest::new(tmp.path())?;
        let mut image = annotated()
            .with_grouping(3)
            .with_classes(Classes::from_pairs([(1, "cat")]));

        let json = image.to_json(&mut Destination::manifest(&mut manifest))?;
        assert_eq!(json["classes"]["type"], "classes-file");
        assert_eq!(json["classes"]["path"], "media/cls.classes.json");
        assert!(json["boxes"]["pred"].is_array());
        assert_eq!(json["masks"]["seg"]["_type"], "mask");

        let back = Image::from_json(&json, &manifest)?;
        assert_eq!(back, image);
        assert_eq!(back.boxes()["pred"], image.boxes()["pred"]);
        assert_eq!(back.masks()["seg"].data(), &[9, 9]);
        Ok(())
    }
}
