//! Captioning stage.
//!
//! Activation loads a caption template (`template.txt`, with a `{name}`
//! placeholder) from the stage's model directory. Processing verifies the
//! image is readable and renders the template from the cleaned-up file stem.
//! The raw result is a single JSON string.

use anyhow::{Context, Result, bail};
use serde_json::Value;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use super::{CapabilityStage, read_image_bytes, resolve_model_dir};

pub const CAPTION_STAGE_NAME: &str = "caption";
const CAPTION_RESULT_KEY: &str = "_caption";
const TEMPLATE_FILENAME: &str = "template.txt";

pub struct CaptionStage {
    model_dir: PathBuf,
    template: Mutex<Option<String>>,
}

impl CaptionStage {
    /// Construct the stage. Fails when `<models_root>/caption` does not exist.
    pub fn new(models_root: &Path) -> Result<Self> {
        let model_dir = resolve_model_dir(models_root, CAPTION_STAGE_NAME)?;
        Ok(Self {
            model_dir,
            template: Mutex::new(None),
        })
    }
}

impl CapabilityStage for CaptionStage {
    fn name(&self) -> &str {
        CAPTION_STAGE_NAME
    }

    fn activate(&self) -> Result<()> {
        let template_path = self.model_dir.join(TEMPLATE_FILENAME);
        let text = std::fs::read_to_string(&template_path)
            .with_context(|| format!("load caption template at {}", template_path.display()))?;
        let text = text.trim().to_string();
        if text.is_empty() {
            bail!("caption template at {} is empty", template_path.display());
        }
        *self.template.lock().unwrap() = Some(text);
        Ok(())
    }

    fn deactivate(&self) {
        *self.template.lock().unwrap() = None;
    }

    fn process(&self, path: &Path) -> Result<Value> {
        let guard = self.template.lock().unwrap();
        let Some(template) = guard.as_ref() else {
            bail!("stage {CAPTION_STAGE_NAME} is not activated");
        };
        read_image_bytes(path)?;
        let stem = path
            .file_stem()
            .map(|s| s.to_string_lossy().replace(['_', '-'], " "))
            .unwrap_or_default();
        Ok(Value::String(template.replace("{name}", stem.trim())))
    }

    fn result_key(&self) -> &str {
        CAPTION_RESULT_KEY
    }

    fn format_result(&self, raw: &Value) -> Vec<String> {
        match raw.as_str() {
            Some(caption) => vec![caption.to_string()],
            None => Vec::new(),
        }
    }
}
