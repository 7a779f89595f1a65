//! Capability stage tests: construction contract, lifecycle, deterministic
//! tagging, and caption rendering.

use std::fs;
use std::path::{Path, PathBuf};
use tagpipe::stage::{CapabilityStage, CaptionStage, TagStage};

fn make_models_root(dir: &Path) -> PathBuf {
    let root = dir.join("models");
    fs::create_dir_all(root.join("tagger")).unwrap();
    fs::write(
        root.join("tagger").join("top_tags.txt"),
        "sky\ntree\nwater\ncat\ndog\ncar\nnight\nportrait\n",
    )
    .unwrap();
    fs::create_dir_all(root.join("caption")).unwrap();
    fs::write(
        root.join("caption").join("template.txt"),
        "a photo of {name}\n",
    )
    .unwrap();
    root
}

fn write_image(dir: &Path, name: &str) -> PathBuf {
    let path = dir.join(name);
    fs::write(&path, format!("image-bytes:{name}")).unwrap();
    path
}

// --- construction contract ---

#[test]
fn test_missing_model_dir_is_fatal_at_construction() {
    let dir = tempfile::tempdir().unwrap();
    assert!(TagStage::new(dir.path(), 0.4).is_err());
    assert!(CaptionStage::new(dir.path()).is_err());
}

#[test]
fn test_construction_succeeds_with_model_dirs() {
    let dir = tempfile::tempdir().unwrap();
    let models = make_models_root(dir.path());
    assert!(TagStage::new(&models, 0.4).is_ok());
    assert!(CaptionStage::new(&models).is_ok());
}

// --- lifecycle ---

#[test]
fn test_process_before_activate_is_per_item_error() {
    let dir = tempfile::tempdir().unwrap();
    let models = make_models_root(dir.path());
    let image = write_image(dir.path(), "a.jpg");
    let stage = TagStage::new(&models, 0.0).unwrap();
    assert!(stage.process(&image).is_err());
}

#[test]
fn test_deactivate_is_idempotent_and_safe_without_activate() {
    let dir = tempfile::tempdir().unwrap();
    let models = make_models_root(dir.path());
    let stage = TagStage::new(&models, 0.0).unwrap();
    stage.deactivate();
    stage.deactivate();

    stage.activate().unwrap();
    stage.deactivate();
    stage.deactivate();
    // Deactivated again means process fails until the next activate.
    let image = write_image(dir.path(), "a.jpg");
    assert!(stage.process(&image).is_err());
}

#[test]
fn test_activate_fails_when_vocabulary_missing() {
    let dir = tempfile::tempdir().unwrap();
    let models = dir.path().join("models");
    fs::create_dir_all(models.join("tagger")).unwrap();
    let stage = TagStage::new(&models, 0.4).unwrap();
    assert!(stage.activate().is_err());
}

// --- tagging ---

#[test]
fn test_tag_stage_is_deterministic() {
    let dir = tempfile::tempdir().unwrap();
    let models = make_models_root(dir.path());
    let image = write_image(dir.path(), "a.jpg");
    let stage = TagStage::new(&models, -1.0).unwrap();
    stage.activate().unwrap();

    let first = stage.process(&image).unwrap();
    let second = stage.process(&image).unwrap();
    assert_eq!(first, second);
    // Threshold below zero keeps the whole vocabulary.
    assert_eq!(first.as_object().unwrap().len(), 8);
}

#[test]
fn test_tag_stage_threshold_filters_everything_at_one() {
    let dir = tempfile::tempdir().unwrap();
    let models = make_models_root(dir.path());
    let image = write_image(dir.path(), "a.jpg");
    let stage = TagStage::new(&models, 1.0).unwrap();
    stage.activate().unwrap();
    let raw = stage.process(&image).unwrap();
    assert!(raw.as_object().unwrap().is_empty());
}

#[test]
fn test_tag_stage_rejects_empty_image() {
    let dir = tempfile::tempdir().unwrap();
    let models = make_models_root(dir.path());
    let empty = dir.path().join("empty.jpg");
    fs::write(&empty, b"").unwrap();
    let stage = TagStage::new(&models, 0.0).unwrap();
    stage.activate().unwrap();
    assert!(stage.process(&empty).is_err());
}

#[test]
fn test_tag_format_is_sorted_by_descending_confidence() {
    let dir = tempfile::tempdir().unwrap();
    let models = make_models_root(dir.path());
    let stage = TagStage::new(&models, 0.0).unwrap();
    let raw = serde_json::json!({"tree": 0.25, "sky": 0.921, "cat": 0.55});
    let lines = stage.format_result(&raw);
    assert_eq!(
        lines,
        vec!["sky (92.10%)", "cat (55.00%)", "tree (25.00%)"]
    );
}

#[test]
fn test_tag_format_of_non_object_is_empty() {
    let dir = tempfile::tempdir().unwrap();
    let models = make_models_root(dir.path());
    let stage = TagStage::new(&models, 0.0).unwrap();
    assert!(stage.format_result(&serde_json::json!("oops")).is_empty());
}

// --- captioning ---

#[test]
fn test_caption_stage_renders_template_from_stem() {
    let dir = tempfile::tempdir().unwrap();
    let models = make_models_root(dir.path());
    let image = write_image(dir.path(), "sunny_day-beach.jpg");
    let stage = CaptionStage::new(&models).unwrap();
    stage.activate().unwrap();

    let raw = stage.process(&image).unwrap();
    assert_eq!(raw, serde_json::json!("a photo of sunny day beach"));
    assert_eq!(stage.format_result(&raw), vec!["a photo of sunny day beach"]);
}

#[test]
fn test_caption_stage_result_key() {
    let dir = tempfile::tempdir().unwrap();
    let models = make_models_root(dir.path());
    let stage = CaptionStage::new(&models).unwrap();
    assert_eq!(stage.result_key(), "_caption");
    assert_eq!(stage.name(), "caption");
}
