//! Load `.tagpipe.toml` from a directory (CLI only). Lib callers inject
//! options directly; the file only presets what CLI flags can override.

use serde::Deserialize;
use std::path::{Path, PathBuf};

use crate::RunOpts;
use crate::utils::config::PackagePaths;

#[derive(Debug, Deserialize)]
pub(crate) struct TagpipeToml {
    #[serde(default)]
    settings: SettingsSection,
}

#[derive(Debug, Default, Deserialize)]
struct SettingsSection {
    models_root: Option<String>,
    threshold: Option<f32>,
    caption: Option<bool>,
    recursive: Option<bool>,
    verbose: Option<bool>,
}

/// Load `.tagpipe.toml` from `dir` if present. Returns None if the file is
/// missing or unreadable. CLI only.
pub(crate) fn load_tagpipe_toml(dir: &Path) -> Option<TagpipeToml> {
    let path = dir.join(PackagePaths::get().config_filename());
    let s = std::fs::read_to_string(&path).ok()?;
    toml::from_str(&s)
        .map_err(|e| log::warn!("{}: {}", path.display(), e))
        .ok()
}

/// Overwrite opts field from file when present.
macro_rules! apply_file_opt {
    ($sec:expr, $opts:expr, $field:ident) => {
        if let Some(v) = $sec.$field {
            $opts.$field = v;
        }
    };
}

/// Apply file config to opts (only fields present in the file). Call before
/// applying CLI flags so the flags win.
pub(crate) fn apply_file_to_opts(file: &TagpipeToml, opts: &mut RunOpts) {
    let sec = &file.settings;
    if let Some(ref p) = sec.models_root {
        opts.models_root = PathBuf::from(p);
    }
    apply_file_opt!(sec, opts, threshold);
    apply_file_opt!(sec, opts, caption);
    apply_file_opt!(sec, opts, recursive);
    apply_file_opt!(sec, opts, verbose);
}
