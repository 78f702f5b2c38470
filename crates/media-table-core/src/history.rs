//! Converting a logged row into run-log JSON.
//!
//! A row maps keys to [`LogItem`]s. Scalars pass through, rich values bind
//! to the run at `(key, step)`, homogeneous image or audio sequences become
//! one batch summary, and nested maps recurse under `{key}/{field}`.

use indexmap::IndexMap;
use serde_json::{Map, Value as Json};

use crate::destination::{Destination, RunLog, Step};
use crate::media::batch::{audio_to_json, images_to_json};
use crate::media::image::MAX_ITEMS;
use crate::media::{MediaError, RichValue, value_to_json};
use crate::value::Value;

/// One logged item.
#[derive(Debug, Clone, PartialEq)]
pub enum LogItem {
    /// A scalar, record or single rich value.
    Value(Value),
    /// A sequence of rich values logged together.
    Sequence(Vec<RichValue>),
    /// A nested map.
    Nested(IndexMap<String, LogItem>),
}

impl From<Value> for LogItem {
    fn from(value: Value) -> Self {
        LogItem::Value(value)
    }
}

impl From<RichValue> for LogItem {
    fn from(rich: RichValue) -> Self {
        LogItem::Value(rich.into())
    }
}

impl From<Vec<RichValue>> for LogItem {
    fn from(items: Vec<RichValue>) -> Self {
        LogItem::Sequence(items)
    }
}

/// Serialize one logged item at `key` and `step`.
pub fn val_to_json(
    run: &mut dyn RunLog,
    key: &str,
    item: &mut LogItem,
    step: Step,
) -> Result<Json, MediaError> {
    val_to_json_capped(run, key, item, step, MAX_ITEMS)
}

/// [`val_to_json`] with an explicit cap on batched sequences.
pub fn val_to_json_capped(
    run: &mut dyn RunLog,
    key: &str,
    item: &mut LogItem,
    step: Step,
    max_items: usize,
) -> Result<Json, MediaError> {
    match item {
        LogItem::Value(value) => value_to_json(value, &mut Destination::log(run, key, step)),
        LogItem::Sequence(items) => sequence_to_json(run, key, items, step, max_items),
        LogItem::Nested(fields) => {
            let mut out = Map::with_capacity(fields.len());
            for (field, nested) in fields.iter_mut() {
                let nested_key = format!("{key}/{field}");
                let json = val_to_json_capped(&mut *run, &nested_key, nested, step, max_items)?;
                out.insert(field.clone(), json);
            }
            Ok(Json::Object(out))
        }
    }
}

fn sequence_to_json(
    run: &mut dyn RunLog,
    key: &str,
    items: &mut [RichValue],
    step: Step,
    max_items: usize,
) -> Result<Json, MediaError> {
    if items.is_empty() {
        return Ok(Json::Array(Vec::new()));
    }

    if items.iter().all(|item| matches!(item, RichValue::Image(_))) {
        let images = items.iter_mut().filter_map(|item| match item {
            RichValue::Image(image) => Some(image),
            _ => None,
        });
        return images_to_json(images, run, key, step, max_items);
    }
    if items.iter().all(|item| matches!(item, RichValue::Audio(_))) {
        let clips = items.iter_mut().filter_map(|item| match item {
            RichValue::Audio(audio) => Some(audio),
            _ => None,
        });
        return audio_to_json(clips, run, key, step, max_items);
    }

    let mut out = Vec::with_capacity(items.len());
    for item in items.iter_mut() {
        out.push(item.to_json(&mut Destination::log(&mut *run, key, step))?);
    }
    Ok(Json::Array(out))
}

/// Serialize a whole logged row at `step`.
pub fn row_to_json(
    run: &mut dyn RunLog,
    row: &mut IndexMap<String, LogItem>,
    step: Step,
) -> Result<Map<String, Json>, MediaError> {
    let mut out = Map::with_capacity(row.len());
    for (key, item) in row.iter_mut() {
        out.insert(key.clone(), val_to_json(&mut *run, key, item, step)?);
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::destination::LocalRun;
    use crate::media::audio::Audio;
    use crate::media::image::Image;
    use crate::table::Table;
    use tempfile::TempDir;

    type TestResult = Result<(), Box<dyn std::error::Error>>;

    #[test]
    fn rows_mix_scalars_media_and_batches() -> TestResult {
        let tmp = TempDir::new()?;
        let mut run = LocalRun::new(tmp.path())?;
        let mut row: IndexMap<String, LogItem> = IndexMap::new();
        row.insert("loss".into(), Value::from(0.25).into());
        row.insert(
            "preview".into(),
            RichValue::Image(Image::new(vec![1, 2], "png", 2, 2)).into(),
        );
        row.insert(
            "samples".into(),
            vec![
                RichValue::Image(Image::new(vec![3], "png", 2, 2)),
                RichValue::Image(Image::new(vec![4], "png", 2, 2)),
            ]
            .into(),
        );

        let json = row_to_json(&mut run, &mut row, Step::Index(1))?;
        assert_eq!(json["loss"], 0.25);
        assert_eq!(json["preview"]["_type"], "image-file");
        assert_eq!(json["samples"]["_type"], "images/separated");
        assert_eq!(json["samples"]["count"], 2);
        Ok(())
    }

    #[test]
    fn mixed_sequences_stay_lists() -> TestResult {
        let tmp = TempDir::new()?;
        let mut run = LocalRun::new(tmp.path())?;
        let mut item = LogItem::Sequence(vec![
            RichValue::Image(Image::new(vec![1], "png", 1, 1)),
            RichValue::Audio(Audio::new(vec![2], "wav", Some(8000))),
        ]);
        let json = val_to_json(&mut run, "mixed", &mut item, Step::Index(0))?;
        assert_eq!(json[0]["_type"], "image-file");
        assert_eq!(json[1]["_type"], "audio-file");
        Ok(())
    }

    #[test]
    fn nested_maps_recurse_with_prefixed_keys() -> TestResult {
        let tmp = TempDir::new()?;
        let mut run = LocalRun::new(tmp.path())?;
        let table = Table::from_rows(vec!["x".into()], vec![vec![1.into()]])?;
        let mut item = LogItem::Nested(IndexMap::from([
            ("acc".to_string(), LogItem::from(Value::from(0.9))),
            ("table".to_string(), LogItem::from(RichValue::Table(table))),
        ]));
        let json = val_to_json(&mut run, "eval", &mut item, Step::Index(2))?;
        assert_eq!(json["acc"], 0.9);
        assert!(json["table"]["path"]
            .as_str()
            .is_some_and(|p| p.starts_with("media/table/eval_table_2_")));
        Ok(())
    }
}
