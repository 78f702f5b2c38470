//! Integration tests for binding rich values to run logs and manifests.
#![allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]

use std::fs;

use media_table_core::destination::{
    Destination, DestinationError, LocalManifest, LocalRun, Manifest, ManifestEntry, StagedRef,
    Stager, Step,
};
use media_table_core::media::annotations::{BoundingBoxes2D, BoxData, BoxPosition};
use media_table_core::media::audio::Audio;
use media_table_core::media::classes::Classes;
use media_table_core::media::image::Image;
use media_table_core::media::{MediaError, RichValue};
use media_table_core::table::{PartitionedTable, Table};
use tempfile::TempDir;

type TestResult = Result<(), Box<dyn std::error::Error>>;

fn files_in(dir: &std::path::Path) -> usize {
    fs::read_dir(dir).map(|entries| entries.count()).unwrap_or(0)
}

#[test]
fn binding_twice_at_the_same_step_copies_once() -> TestResult {
    let tmp = TempDir::new()?;
    let mut run = LocalRun::new(tmp.path())?;
    let mut image = Image::new(vec![9, 9, 9], "png", 1, 3);

    let first = image.to_json(&mut Destination::log(&mut run, "preview", Step::Index(3)))?;
    let second = image.to_json(&mut Destination::log(&mut run, "preview", Step::Index(3)))?;
    assert_eq!(first, second);
    let path = first["path"].as_str().expect("path");
    assert!(path.starts_with("media/images/preview_3_"));
    assert_eq!(files_in(&tmp.path().join("media/images")), 1);

    let later = image.to_json(&mut Destination::log(&mut run, "preview", Step::Index(4)))?;
    assert_ne!(later["path"], first["path"]);
    assert_eq!(files_in(&tmp.path().join("media/images")), 2);
    Ok(())
}

#[test]
fn one_value_logged_to_two_runs_lands_in_both() -> TestResult {
    let tmp_a = TempDir::new()?;
    let tmp_b = TempDir::new()?;
    let mut run_a = LocalRun::new(tmp_a.path())?;
    let mut run_b = LocalRun::new(tmp_b.path())?;
    let mut clip = Audio::new(vec![1, 2, 3], "wav", Some(8000));

    let ja = clip.to_json(&mut Destination::log(&mut run_a, "k", Step::Index(0)))?;
    let jb = clip.to_json(&mut Destination::log(&mut run_b, "k", Step::Index(0)))?;
    let path = jb["path"].as_str().expect("path");
    assert_eq!(ja["path"], jb["path"]);
    assert!(tmp_a.path().join(path).exists());
    assert!(tmp_b.path().join(path).exists());
    Ok(())
}

#[test]
fn values_outlive_the_run_they_were_first_logged_to() -> TestResult {
    let tmp_a = TempDir::new()?;
    let tmp_b = TempDir::new()?;
    let mut image = Image::new(vec![4, 2], "png", 1, 2);
    {
        let mut run_a = LocalRun::new(tmp_a.path())?;
        image.to_json(&mut Destination::log(&mut run_a, "k", Step::Index(0)))?;
    }

    let mut run_b = LocalRun::new(tmp_b.path())?;
    let json = image.to_json(&mut Destination::log(&mut run_b, "k", Step::Index(0)))?;
    let path = json["path"].as_str().expect("path");
    assert_eq!(fs::read(tmp_b.path().join(path))?, vec![4, 2]);
    Ok(())
}

#[test]
fn logged_values_can_still_be_added_to_a_manifest() -> TestResult {
    let tmp_run = TempDir::new()?;
    let tmp_manifest = TempDir::new()?;
    let mut run = LocalRun::new(tmp_run.path())?;
    let mut manifest = LocalManifest::new(tmp_manifest.path())?;
    let mut image = Image::new(vec![8, 8], "png", 2, 1);

    image.to_json(&mut Destination::log(&mut run, "k", Step::Index(1)))?;
    let json = image.to_json(&mut Destination::manifest(&mut manifest))?;
    let path = json["path"].as_str().expect("path");
    assert!(path.starts_with("media/images/"));
    assert!(manifest.entry(path).is_some());
    assert_eq!(manifest.len(), 1);
    Ok(())
}

#[test]
fn nested_keys_flatten_into_file_names() -> TestResult {
    let tmp = TempDir::new()?;
    let mut run = LocalRun::new(tmp.path())?;
    let mut image = Image::new(vec![1], "jpg", 1, 1);
    let json = image.to_json(&mut Destination::log(&mut run, "eval/best", Step::Summary))?;
    let path = json["path"].as_str().expect("path");
    assert!(path.starts_with("media/images/eval_best_summary_"), "{path}");
    assert!(tmp.path().join(path).exists());
    Ok(())
}

#[test]
fn box_labels_are_recorded_once_per_run() -> TestResult {
    let tmp = TempDir::new()?;
    let mut run = LocalRun::new(tmp.path())?;
    let position = BoxPosition::Corners {
        min_x: 0.0,
        max_x: 1.0,
        min_y: 0.0,
        max_y: 1.0,
    };
    let boxes = BoundingBoxes2D::new("predictions", vec![BoxData::at(position)], None);
    let mut image = Image::new(vec![5], "png", 2, 2).with_boxes("predictions", boxes);

    let json = image.to_json(&mut Destination::log(&mut run, "detections", Step::Index(0)))?;
    assert!(json["boxes"]["predictions"]["path"].is_string());
    let labels = run
        .singletons("bounding_box/class_labels")
        .expect("box labels singleton");
    assert_eq!(labels.len(), 1);
    Ok(())
}

#[test]
fn identical_content_registers_one_manifest_entry() -> TestResult {
    let tmp = TempDir::new()?;
    let mut manifest = LocalManifest::new(tmp.path())?;
    let mut a = Image::new(vec![7, 7], "png", 1, 2);
    let mut b = Image::new(vec![7, 7], "png", 1, 2);

    let ja = a.to_json(&mut Destination::manifest(&mut manifest))?;
    let jb = b.to_json(&mut Destination::manifest(&mut manifest))?;
    assert_eq!(ja["path"], jb["path"]);
    assert_eq!(manifest.len(), 1);
    Ok(())
}

/// Manifest that accepts registrations but forgets them.
struct ForgetfulManifest {
    inner: LocalManifest,
}

impl Stager for ForgetfulManifest {
    fn stage(&mut self, bytes: &[u8], extension: &str) -> Result<StagedRef, DestinationError> {
        self.inner.stage(bytes, extension)
    }
}

impl Manifest for ForgetfulManifest {
    fn register(
        &mut self,
        staged: &StagedRef,
        logical_name: &str,
    ) -> Result<ManifestEntry, DestinationError> {
        self.inner.register(staged, logical_name)
    }

    fn resolve(&self, _path: &str) -> Option<StagedRef> {
        None
    }
}

#[test]
fn unresolvable_registrations_are_reported() -> TestResult {
    let tmp = TempDir::new()?;
    let mut manifest = ForgetfulManifest {
        inner: LocalManifest::new(tmp.path())?,
    };
    let mut image = Image::new(vec![1, 2], "png", 1, 1);
    let err = image
        .to_json(&mut Destination::manifest(&mut manifest))
        .expect_err("entry never resolves");
    match err {
        MediaError::UnresolvedReference { path } => assert!(path.starts_with("media/images/")),
        other => panic!("unexpected error: {other}"),
    }
    Ok(())
}

#[test]
fn manifest_only_values_reject_run_logs() -> TestResult {
    let tmp = TempDir::new()?;
    let mut run = LocalRun::new(tmp.path())?;

    let mut partitioned = PartitionedTable::new("parts");
    let err = partitioned
        .to_json(&mut Destination::log(&mut run, "parts", Step::Index(0)))
        .expect_err("partitioned tables live in manifests");
    assert!(matches!(
        err,
        MediaError::UnsupportedDestination {
            kind: "partitioned-table",
            destination: "run log"
        }
    ));

    let mut classes = Classes::from_pairs([(1, "cat")]);
    let err = classes
        .to_json(&mut Destination::log(&mut run, "classes", Step::Index(0)))
        .expect_err("class sets live in manifests");
    assert!(matches!(err, MediaError::UnsupportedDestination { .. }));
    Ok(())
}

#[test]
fn tables_logged_to_a_run_are_written_as_files() -> TestResult {
    let tmp = TempDir::new()?;
    let mut run = LocalRun::new(tmp.path())?;
    let table = Table::from_rows(vec!["x".into()], vec![vec![1.into()], vec![2.into()]])?;
    let mut rich = RichValue::Table(table);

    let json = rich.to_json(&mut Destination::log(&mut run, "metrics", Step::Index(5)))?;
    assert_eq!(json["_type"], "table-file");
    assert_eq!(json["nrows"], 2);
    assert_eq!(json["ncols"], 1);
    let path = json["path"].as_str().expect("path");
    assert!(path.ends_with(".table.json"));
    let written: serde_json::Value = serde_json::from_slice(&fs::read(tmp.path().join(path))?)?;
    assert_eq!(written["columns"], serde_json::json!(["x"]));
    Ok(())
}
