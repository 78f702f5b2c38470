//! Image annotations: 2D bounding boxes and segmentation masks.
//!
//! Both are bound to a run under their parent image's key. Binding records
//! the class labels once per run as a singleton keyed
//! `{image key}_wandb_delimeter_{annotation key}`.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::{Value as Json, json};
use snafu::prelude::*;

use super::{
    InvalidAnnotationSnafu, JsonSnafu, Media, MediaError, MediaFile, download_bytes, file_json,
};
use crate::destination::{Destination, RunLog, SourceManifest};
use crate::layout::{BOXES_SUBDIR, MASKS_SUBDIR};

/// Singleton kind bounding-box labels are recorded under.
pub const BOX_LABELS_SINGLETON: &str = "bounding_box/class_labels";
/// Singleton kind mask labels are recorded under.
pub const MASK_LABELS_SINGLETON: &str = "mask/class_labels";

fn singleton_key(parent: &str, key: &str) -> String {
    format!("{parent}_wandb_delimeter_{key}")
}

fn labels_json(labels: &BTreeMap<i64, String>) -> Json {
    Json::Object(
        labels
            .iter()
            .map(|(id, name)| (id.to_string(), Json::String(name.clone())))
            .collect(),
    )
}

fn labels_from_json(json: &Json) -> Result<BTreeMap<i64, String>, MediaError> {
    let map = json.as_object().context(InvalidAnnotationSnafu {
        reason: "class labels must be a mapping of numbers to strings",
    })?;
    let mut labels = BTreeMap::new();
    for (id, name) in map {
        let (Ok(id), Some(name)) = (id.parse::<i64>(), name.as_str()) else {
            return InvalidAnnotationSnafu {
                reason: "class labels must be a mapping of numbers to strings",
            }
            .fail();
        };
        labels.insert(id, name.to_string());
    }
    Ok(labels)
}

/// Where a box sits, either by center and size or by its corners.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum BoxPosition {
    /// Center point with width and height.
    Center {
        /// `[x, y]` of the center.
        middle: [f64; 2],
        /// Box width.
        width: f64,
        /// Box height.
        height: f64,
    },
    /// Corner coordinates.
    Corners {
        /// Left edge.
        #[serde(rename = "minX")]
        min_x: f64,
        /// Right edge.
        #[serde(rename = "maxX")]
        max_x: f64,
        /// Top edge.
        #[serde(rename = "minY")]
        min_y: f64,
        /// Bottom edge.
        #[serde(rename = "maxY")]
        max_y: f64,
    },
}

/// One bounding box.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BoxData {
    /// Placement.
    pub position: BoxPosition,
    /// Class of the boxed object.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub class_id: Option<i64>,
    /// Caption shown with the box.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub box_caption: Option<String>,
    /// Named scores.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scores: Option<BTreeMap<String, f64>>,
}

impl BoxData {
    /// A box with only a position.
    pub fn at(position: BoxPosition) -> Self {
        Self {
            position,
            class_id: None,
            box_caption: None,
            scores: None,
        }
    }
}

/// A keyed set of bounding boxes over one image.
#[derive(Debug, Clone)]
pub struct BoundingBoxes2D {
    key: String,
    box_data: Vec<BoxData>,
    class_labels: BTreeMap<i64, String>,
    file: MediaFile,
}

impl BoundingBoxes2D {
    /// Boxes under `key`. Without explicit labels every class id present is
    /// labelled `class_{id}`.
    pub fn new(
        key: impl Into<String>,
        box_data: Vec<BoxData>,
        class_labels: Option<BTreeMap<i64, String>>,
    ) -> Self {
        let class_labels = class_labels.unwrap_or_else(|| {
            box_data
                .iter()
                .filter_map(|b| b.class_id)
                .map(|id| (id, format!("class_{id}")))
                .collect()
        });
        Self {
            key: key.into(),
            box_data,
            class_labels,
            file: MediaFile::default(),
        }
    }

    /// No boxes under `key`.
    pub fn empty(key: impl Into<String>) -> Self {
        Self::new(key, Vec::new(), None)
    }

    /// Validate and load `{"box_data": [...], "class_labels"?: {...}}`.
    pub fn from_value(value: &Json, key: impl Into<String>) -> Result<Self, MediaError> {
        let box_data = value.get("box_data").context(InvalidAnnotationSnafu {
            reason: "bounding boxes need a `box_data` list",
        })?;
        let box_data = Vec::<BoxData>::deserialize(box_data).map_err(|e| {
            InvalidAnnotationSnafu {
                reason: format!(
                    "each box needs a position with middle, width and height or minX, maxX, minY, maxY: {e}"
                ),
            }
            .build()
        })?;
        let class_labels = value.get("class_labels").map(labels_from_json).transpose()?;
        Ok(Self::new(key, box_data, class_labels))
    }

    /// Key of this box set within its image.
    pub fn key(&self) -> &str {
        &self.key
    }

    /// The boxes.
    pub fn box_data(&self) -> &[BoxData] {
        &self.box_data
    }

    /// Class id to label.
    pub fn class_labels(&self) -> &BTreeMap<i64, String> {
        &self.class_labels
    }

    /// Serialize toward a run log (as a `boxes2D` metadata file) or a
    /// manifest (as the raw box list).
    pub fn to_json(&mut self, destination: &mut Destination<'_>) -> Result<Json, MediaError> {
        self.to_json_with_id(destination, None)
    }

    pub(crate) fn to_json_with_id(
        &mut self,
        destination: &mut Destination<'_>,
        id: Option<&str>,
    ) -> Result<Json, MediaError> {
        match destination {
            Destination::Log { run, key, .. } => {
                let run: &mut dyn RunLog = &mut **run;
                run.record_singleton(
                    BOX_LABELS_SINGLETON,
                    &singleton_key(key, &self.key),
                    labels_json(&self.class_labels),
                );
                let json = file_json(self, destination, id)?;
                Ok(Json::Object(json))
            }
            Destination::Manifest(_) => serde_json::to_value(&self.box_data).context(JsonSnafu),
        }
    }
}

impl Media for BoundingBoxes2D {
    const TYPE_NAME: &'static str = "boxes2D";

    fn media_subdir(&self) -> &'static str {
        BOXES_SUBDIR
    }

    fn encode(&self) -> Result<(Vec<u8>, String), MediaError> {
        let doc = json!({
            "box_data": self.box_data,
            "class_labels": labels_json(&self.class_labels),
        });
        let bytes = serde_json::to_vec(&doc).context(JsonSnafu)?;
        Ok((bytes, ".boxes2D.json".to_string()))
    }

    fn file(&self) -> &MediaFile {
        &self.file
    }

    fn file_mut(&mut self) -> &mut MediaFile {
        &mut self.file
    }
}

impl PartialEq for BoundingBoxes2D {
    fn eq(&self, other: &Self) -> bool {
        self.box_data == other.box_data && self.class_labels == other.class_labels
    }
}

/// A segmentation mask over one image, supplied as an encoded PNG whose
/// pixel values are class ids.
#[derive(Debug, Clone)]
pub struct ImageMask {
    key: String,
    data: Vec<u8>,
    class_labels: BTreeMap<i64, String>,
    file: MediaFile,
}

impl ImageMask {
    /// A mask under `key`.
    pub fn new(key: impl Into<String>, data: Vec<u8>, class_labels: BTreeMap<i64, String>) -> Self {
        Self {
            key: key.into(),
            data,
            class_labels,
            file: MediaFile::default(),
        }
    }

    /// Key of this mask within its image.
    pub fn key(&self) -> &str {
        &self.key
    }

    /// Encoded mask bytes.
    pub fn data(&self) -> &[u8] {
        &self.data
    }

    /// Class id to label.
    pub fn class_labels(&self) -> &BTreeMap<i64, String> {
        &self.class_labels
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
        if let Destination::Log { run, key, .. } = destination {
            let run: &mut dyn RunLog = &mut **run;
            run.record_singleton(
                MASK_LABELS_SINGLETON,
                &singleton_key(key, &self.key),
                labels_json(&self.class_labels),
            );
        }
        Ok(Json::Object(file_json(self, destination, id)?))
    }

    /// Load a mask whose bytes live in `source`. Labels are not part of the
    /// mask's JSON and load empty.
    pub fn from_json(
        json: &Json,
        source: &dyn SourceManifest,
        key: impl Into<String>,
    ) -> Result<ImageMask, MediaError> {
        let data = download_bytes(json, source, Self::TYPE_NAME)?;
        Ok(Self::new(key, data, BTreeMap::new()))
    }
}

impl Media for ImageMask {
    const TYPE_NAME: &'static str = "mask";

    fn media_subdir(&self) -> &'static str {
        MASKS_SUBDIR
    }

    fn encode(&self) -> Result<(Vec<u8>, String), MediaError> {
        ensure!(
            !self.data.is_empty(),
            InvalidAnnotationSnafu {
                reason: "a mask needs image data",
            }
        );
        Ok((self.data.clone(), ".mask.png".to_string()))
    }

    fn file(&self) -> &MediaFile {
        &self.file
    }

    fn file_mut(&mut self) -> &mut MediaFile {
        &mut self.file
    }
}

impl PartialEq for ImageMask {
    fn eq(&self, other: &Self) -> bool {
        self.key == other.key && self.data == other.data
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::destination::{LocalManifest, LocalRun, Step};
    use tempfile::TempDir;

    type TestResult = Result<(), Box<dyn std::error::Error>>;

    #[test]
    fn both_position_forms_validate() -> TestResult {
        let boxes = BoundingBoxes2D::from_value(
            &json!({"box_data": [
                {"position": {"middle": [0.5, 0.5], "width": 0.2, "height": 0.1}, "class_id": 2},
                {"position": {"minX": 1, "maxX": 3, "minY": 0, "maxY": 2}, "box_caption": "a",
                 "scores": {"acc": 0.9}},
            ]}),
            "pred",
        )?;
        assert_eq!(boxes.box_data().len(), 2);
        assert_eq!(boxes.class_labels().get(&2).map(String::as_str), Some("class_2"));
        assert!(matches!(boxes.box_data()[1].position, BoxPosition::Corners { max_x, .. } if max_x == 3.0));
        Ok(())
    }

    #[test]
    fn malformed_boxes_are_rejected() {
        for bad in [
            json!({"box_data": [{"position": {"middle": [0.5], "width": 1, "height": 1}}]}),
            json!({"box_data": [{"position": {"minX": 0, "maxX": 1}}]}),
            json!({"box_data": [{"position": {"minX": 0, "maxX": 1, "minY": 0, "maxY": 1}, "class_id": 1.5}]}),
            json!({"box_data": [{"position": {"minX": 0, "maxX": 1, "minY": 0, "maxY": 1}, "box_caption": 3}]}),
            json!({"box_data": [], "class_labels": {"x": "cat"}}),
            json!({"boxes": []}),
        ] {
            let err = BoundingBoxes2D::from_value(&bad, "k").expect_err("invalid");
            assert!(matches!(err, MediaError::InvalidAnnotation { .. }), "{bad}");
        }
    }

    #[test]
    fn log_binding_records_label_singletons() -> TestResult {
        let tmp = TempDir::new()?;
        let mut run = LocalRun::new(tmp.path())?;
        let mut boxes = BoundingBoxes2D::new(
            "pred",
            vec![BoxData::at(BoxPosition::Center {
                middle: [1.0, 1.0],
                width: 2.0,
                height: 2.0,
            })],
            Some(BTreeMap::from([(0, "cat".to_string())])),
        );

        let json = boxes.to_json(&mut Destination::log(&mut run, "img", Step::Index(0)))?;
        assert_eq!(json["_type"], "boxes2D");
        assert!(json["path"].as_str().is_some_and(|p| p.starts_with("media/metadata/boxes2D/img_0_")));
        let labels = run.singletons(BOX_LABELS_SINGLETON).expect("recorded");
        assert_eq!(labels["img_wandb_delimeter_pred"], json!({"0": "cat"}));
        Ok(())
    }

    #[test]
    fn manifest_form_is_the_raw_box_list() -> TestResult {
        let tmp = TempDir::new()?;
        let mut manifest = LocalManifest::new(tmp.path())?;
        let mut boxes = BoundingBoxes2D::from_value(
            &json!({"box_data": [{"position": {"minX": 0, "maxX": 1, "minY": 0, "maxY": 1}}]}),
            "k",
        )?;
        let json = boxes.to_json(&mut Destination::manifest(&mut manifest))?;
        assert!(json.is_array());
        assert!(manifest.is_empty());
        Ok(())
    }

    #[test]
    fn masks_bind_under_the_mask_subdir() -> TestResult {
        let tmp = TempDir::new()?;
        let mut run = LocalRun::new(tmp.path())?;
        let mut mask = ImageMask::new("seg", vec![1, 2, 3], BTreeMap::from([(1, "road".to_string())]));
        let json = mask.to_json(&mut Destination::log(&mut run, "img", Step::Index(2)))?;
        assert_eq!(json["_type"], "mask");
        assert!(json["path"].as_str().is_some_and(|p| p.starts_with("media/images/mask/img_2_")));
        assert!(json["path"].as_str().is_some_and(|p| p.ends_with(".mask.png")));
        assert!(run.singletons(MASK_LABELS_SINGLETON).is_some());

        let mut empty = ImageMask::new("seg", Vec::new(), BTreeMap::new());
        let err = empty
            .to_json(&mut Destination::log(&mut run, "img", Step::Index(3)))
            .expect_err("no data");
        assert!(matches!(err, MediaError::InvalidAnnotation { .. }));
        Ok(())
    }
}
