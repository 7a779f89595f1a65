//! Application configuration constants.
//! Tuning and filenames in one place.

use std::sync::OnceLock;

// ---- Package / paths (from CARGO_PKG_NAME, cached) ----

/// Package-derived paths: built once from `CARGO_PKG_NAME`, then cached.
pub struct PackagePaths {
    pkg_name: &'static str,
    config_filename: String,
}

static PACKAGE_PATHS: OnceLock<PackagePaths> = OnceLock::new();

impl PackagePaths {
    /// Build and cache paths from `CARGO_PKG_NAME`. Called once on first use.
    pub fn get() -> &'static PackagePaths {
        PACKAGE_PATHS.get_or_init(|| {
            let pkg = env!("CARGO_PKG_NAME");
            PackagePaths {
                pkg_name: pkg,
                config_filename: format!(".{pkg}.toml"),
            }
        })
    }

    pub fn pkg_name(&self) -> &str {
        self.pkg_name
    }

    /// Per-directory config filename (e.g. `.tagpipe.toml`).
    pub fn config_filename(&self) -> &str {
        &self.config_filename
    }
}

// ---- Index ----

/// Index filename written into each scanned root. Fixed (not package-derived)
/// so existing indexes remain addressable.
pub const INDEX_FILENAME: &str = "tags_index.json";

// ---- Scan ----

/// File extensions treated as images by the scan producer (lowercase, no dot).
pub const IMAGE_EXTS: &[&str] = &["jpg", "jpeg", "png", "webp", "bmp", "tif", "tiff"];

// ---- Pipeline tuning ----

/// Pipeline timing and stage defaults.
pub struct PipelineConsts;

impl PipelineConsts {
    /// How long stop-and-drain waits for a worker's terminal message before
    /// abandoning it (ms).
    pub const DRAIN_TIMEOUT_MS: u64 = 1500;
    /// Tagging stage: minimum confidence for a tag to be kept.
    pub const DEFAULT_TAG_THRESHOLD: f32 = 0.4;
}
