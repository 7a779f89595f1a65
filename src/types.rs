//! Public types for the tagpipe API and pipeline.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::HashMap;
use std::path::{Path, PathBuf};

/// Lifecycle status of one discovered image.
///
/// `Running` is kept for index compatibility; the pipeline itself only writes
/// `Pending`, `Queued`, `Done`, and `Error`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FileStatus {
    Pending,
    Queued,
    Running,
    Done,
    Error,
}

/// Persisted state of one discovered image: stable identifier, source path,
/// status, and an open-ended map of result properties written by stages
/// (e.g. `"_tags"` → list of strings, `"_caption"` → string).
#[derive(Clone, Debug, PartialEq)]
pub struct ItemRecord {
    /// Compacted relative-path key, unique within one index. See
    /// [`derive_id`](crate::pipeline::scan::derive_id) for the derivation rule.
    pub id: String,
    /// Absolute source path of the image.
    pub path: PathBuf,
    pub status: FileStatus,
    /// Result properties keyed by stage result key. A key without a leading
    /// underscore is the "public" value; `_key` is the backing value.
    pub properties: Map<String, Value>,
}

impl ItemRecord {
    pub fn new(id: impl Into<String>, path: impl Into<PathBuf>, status: FileStatus) -> Self {
        Self {
            id: id.into(),
            path: path.into(),
            status,
            properties: Map::new(),
        }
    }

    /// Property lookup with underscore fallback: `name` first; when `name` is
    /// absent, or present but null, fall through to `_name`. Returns `None`
    /// when neither exists. External stage code relies on this exact rule.
    pub fn prop(&self, name: &str) -> Option<&Value> {
        let alt = format!("_{name}");
        if let Some(v) = self.properties.get(name) {
            if v.is_null()
                && let Some(backing) = self.properties.get(&alt)
            {
                return Some(backing);
            }
            return Some(v);
        }
        self.properties.get(&alt)
    }

    pub fn set_prop(&mut self, name: impl Into<String>, value: Value) {
        self.properties.insert(name.into(), value);
    }
}

/// Durable mapping from identifier to [`ItemRecord`] for one scanned root.
/// Loaded once per pipeline run; all mutation during a run goes through the
/// controller's dispatch thread.
#[derive(Clone, Debug, Default)]
pub struct Index {
    /// Scan root this index belongs to.
    pub root: PathBuf,
    pub files: HashMap<String, ItemRecord>,
}

impl Index {
    /// Fresh empty index for an index file at `index_path`: root is the file's
    /// parent directory, no records.
    pub fn empty_for(index_path: &Path) -> Self {
        Self {
            root: index_path.parent().unwrap_or(Path::new(".")).to_path_buf(),
            files: HashMap::new(),
        }
    }
}

/// One unit of pending inference work: identifier plus absolute source path.
#[derive(Clone, Debug)]
pub struct WorkItem {
    pub id: String,
    pub path: PathBuf,
}

/// Raw output of one stage for one item, before formatting into the record.
#[derive(Clone, Debug)]
pub struct StageResult {
    /// Stage name, used by the controller to resolve the stage for formatting.
    pub stage: String,
    pub raw: Value,
}

/// Observer-facing notifications emitted by the pipeline. Delivered over a
/// channel; none of them block the pipeline.
#[derive(Clone, Debug, PartialEq)]
pub enum ObserverEvent {
    /// A path was discovered by the scan; exactly one per found path per run,
    /// including items that are already done.
    ItemDiscovered(String),
    /// All stages have run for an item and its record was updated.
    ItemTagged(String),
    Status(String),
    Error { source: String, message: String },
}

/// Run options for the CLI. The library takes stages and
/// [`PipelineConfig`](crate::pipeline::PipelineConfig) directly.
#[derive(Clone, Debug)]
pub struct RunOpts {
    /// Directory holding one resource directory per stage name.
    pub models_root: PathBuf,
    /// Tagging confidence threshold.
    pub threshold: f32,
    /// Also run the captioning stage.
    pub caption: bool,
    /// Recurse into subdirectories.
    pub recursive: bool,
    /// Verbose logging.
    pub verbose: bool,
}

impl Default for RunOpts {
    fn default() -> Self {
        Self {
            models_root: PathBuf::from("models"),
            threshold: crate::utils::config::PipelineConsts::DEFAULT_TAG_THRESHOLD,
            caption: false,
            recursive: true,
            verbose: false,
        }
    }
}
