//! Capability stages: pluggable inference units with an explicit
//! activate/process/deactivate lifecycle.
//!
//! A stage is constructed once for the process lifetime, activated when the
//! inference consumer starts running, and deactivated when it stops. Each
//! stage requires an on-disk resource directory named after it under the
//! models root; a missing directory is a configuration error at construction,
//! not a runtime error.

pub mod caption;
pub mod tagger;

pub use caption::CaptionStage;
pub use tagger::TagStage;

use anyhow::{Result, bail};
use serde_json::Value;
use std::path::{Path, PathBuf};

/// One named unit of inference.
///
/// `activate` loads the stage's heavyweight resource into a reusable state;
/// `process` runs inference on one image and may fail per item (unreadable or
/// corrupt input, or called before activation) without being fatal to the
/// pipeline. `deactivate` releases the resource and must be idempotent and
/// safe even when `activate` was never called. Stages use interior mutability
/// for their resource slot so they can be shared via `Arc` between the
/// consumer worker (lifecycle, process) and the controller (formatting).
pub trait CapabilityStage: Send + Sync {
    /// Unique stage name; equals its resource directory name.
    fn name(&self) -> &str;

    /// Load the stage resource. Failure fails the whole consumer run.
    fn activate(&self) -> Result<()>;

    /// Release the stage resource. Never errors, safe to call repeatedly or
    /// without a prior `activate`.
    fn deactivate(&self);

    /// Run inference on one image. Errors are per-item, not fatal.
    fn process(&self, path: &Path) -> Result<Value>;

    /// Fixed key this stage writes into a record's properties (e.g. `_tags`).
    fn result_key(&self) -> &str;

    /// Turn this stage's raw output into a human-viewable string list.
    fn format_result(&self, raw: &Value) -> Vec<String>;
}

/// Resolve `<models_root>/<name>`, failing when it is not an existing
/// directory. Called at stage construction; the error aborts startup.
pub fn resolve_model_dir(models_root: &Path, name: &str) -> Result<PathBuf> {
    let dir = models_root.join(name);
    if !dir.is_dir() {
        bail!("model directory not found: {}", dir.display());
    }
    Ok(dir)
}

/// Read the image file for a stage, mapping unreadable or empty files to a
/// per-item stage error.
pub(crate) fn read_image_bytes(path: &Path) -> Result<Vec<u8>> {
    let bytes = std::fs::read(path)
        .map_err(|e| anyhow::anyhow!("cannot read image {}: {e}", path.display()))?;
    if bytes.is_empty() {
        bail!("empty image file: {}", path.display());
    }
    Ok(bytes)
}
