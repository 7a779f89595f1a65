//! Tagpipe: background image-tagging pipeline.
//!
//! A scan worker discovers image files under a root, a long-lived inference
//! worker runs every configured capability stage over each discovered image,
//! and the controller accumulates per-image results into a crash-safe JSON
//! index (`tags_index.json` in the scanned root). An observer receives live
//! discovered/tagged/status/error events over a channel and issues
//! start/shutdown commands; re-scanning a folder never re-runs inference on
//! items already done.

pub mod cli;
pub mod pipeline;
pub mod stage;
pub mod store;
pub mod types;
pub mod utils;

/// Re-export types for API
pub use types::*;

pub use pipeline::{Pipeline, PipelineConfig};
pub use stage::CapabilityStage;

/// Result alias used by the public tagpipe API
pub use anyhow::Error;
pub type Result<T> = std::result::Result<T, Error>;
