//! Multi-label tagging stage.
//!
//! Activation loads the tag vocabulary (`top_tags.txt`, one tag per line)
//! from the stage's model directory. Processing derives a per-tag confidence
//! from a blake3 stream over the image bytes, so scores are deterministic for
//! a given image and vocabulary, keeps tags above the threshold, and reports
//! them as a `{tag: score}` object.

use anyhow::{Context, Result, bail};
use serde_json::{Map, Value, json};
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use super::{CapabilityStage, read_image_bytes, resolve_model_dir};

pub const TAG_STAGE_NAME: &str = "tagger";
const TAG_RESULT_KEY: &str = "_tags";
const VOCAB_FILENAME: &str = "top_tags.txt";

pub struct TagStage {
    model_dir: PathBuf,
    threshold: f32,
    vocab: Mutex<Option<Vec<String>>>,
}

impl TagStage {
    /// Construct the stage. Fails when `<models_root>/tagger` does not exist.
    pub fn new(models_root: &Path, threshold: f32) -> Result<Self> {
        let model_dir = resolve_model_dir(models_root, TAG_STAGE_NAME)?;
        Ok(Self {
            model_dir,
            threshold,
            vocab: Mutex::new(None),
        })
    }

    /// Score every vocabulary tag for the given image bytes. Two bytes of the
    /// blake3 extended output per tag, mapped into `[0, 1]`.
    fn score_tags(&self, vocab: &[String], bytes: &[u8]) -> Vec<(String, f32)> {
        let mut hasher = blake3::Hasher::new();
        hasher.update(bytes);
        let mut reader = hasher.finalize_xof();
        let mut buf = vec![0u8; vocab.len() * 2];
        reader.fill(&mut buf);

        let mut scored: Vec<(String, f32)> = vocab
            .iter()
            .enumerate()
            .map(|(i, tag)| {
                let raw = u16::from_le_bytes([buf[2 * i], buf[2 * i + 1]]);
                (tag.clone(), f32::from(raw) / f32::from(u16::MAX))
            })
            .filter(|(_, score)| *score > self.threshold)
            .collect();
        // Descending by confidence; tag name breaks ties deterministically.
        scored.sort_by(|a, b| b.1.total_cmp(&a.1).then_with(|| a.0.cmp(&b.0)));
        scored
    }
}

impl CapabilityStage for TagStage {
    fn name(&self) -> &str {
        TAG_STAGE_NAME
    }

    fn activate(&self) -> Result<()> {
        let vocab_path = self.model_dir.join(VOCAB_FILENAME);
        let text = std::fs::read_to_string(&vocab_path)
            .with_context(|| format!("load tag vocabulary at {}", vocab_path.display()))?;
        let vocab: Vec<String> = text
            .lines()
            .map(str::trim)
            .filter(|l| !l.is_empty())
            .map(String::from)
            .collect();
        if vocab.is_empty() {
            bail!("tag vocabulary at {} is empty", vocab_path.display());
        }
        *self.vocab.lock().unwrap() = Some(vocab);
        Ok(())
    }

    fn deactivate(&self) {
        *self.vocab.lock().unwrap() = None;
    }

    fn process(&self, path: &Path) -> Result<Value> {
        let guard = self.vocab.lock().unwrap();
        let Some(vocab) = guard.as_ref() else {
            bail!("stage {TAG_STAGE_NAME} is not activated");
        };
        let bytes = read_image_bytes(path)?;
        let mut obj = Map::new();
        for (tag, score) in self.score_tags(vocab, &bytes) {
            obj.insert(tag, json!(score));
        }
        Ok(Value::Object(obj))
    }

    fn result_key(&self) -> &str {
        TAG_RESULT_KEY
    }

    /// `"{tag} ({pct:.2}%)"`, descending by confidence.
    fn format_result(&self, raw: &Value) -> Vec<String> {
        let Some(obj) = raw.as_object() else {
            return Vec::new();
        };
        let mut scored: Vec<(&String, f64)> = obj
            .iter()
            .filter_map(|(tag, v)| v.as_f64().map(|s| (tag, s)))
            .collect();
        scored.sort_by(|a, b| b.1.total_cmp(&a.1).then_with(|| a.0.cmp(b.0)));
        scored
            .into_iter()
            .map(|(tag, score)| format!("{tag} ({:.2}%)", score * 100.0))
            .collect()
    }
}
