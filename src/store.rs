//! Index store: load and save the per-root `tags_index.json` document.
//!
//! Loading is tolerant: a missing, unreadable, or malformed file yields a
//! fresh empty index rather than an error, so a corrupt index can never keep
//! a scan from starting. Saving goes through a sibling temp file and an atomic
//! rename, so a crash mid-write leaves the previous index intact.

use anyhow::{Context, Result};
use log::{debug, warn};
use serde_json::{Map, Value, json};
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use crate::types::{FileStatus, Index, ItemRecord};
use crate::utils::config::INDEX_FILENAME;
use crate::utils::to_posix_string;

/// Index file location for a scanned root.
pub fn index_path_for(root: &Path) -> PathBuf {
    root.join(INDEX_FILENAME)
}

/// Sibling temp path used by [`save_index`] before the atomic rename.
pub fn temp_path_for(index_path: &Path) -> PathBuf {
    let name = index_path
        .file_name()
        .and_then(|n| n.to_str())
        .unwrap_or(INDEX_FILENAME);
    index_path
        .parent()
        .unwrap_or(Path::new("."))
        .join(format!("{name}.tmp"))
}

/// Load the index at `index_path`. Never errors: a missing file, unreadable
/// file, malformed JSON, non-object document, or document without a `root`
/// field all yield a fresh empty index rooted at the file's parent.
pub fn load_index(index_path: &Path) -> Index {
    let Ok(text) = fs::read_to_string(index_path) else {
        debug!("no index at {}; starting fresh", index_path.display());
        return Index::empty_for(index_path);
    };
    let Ok(doc) = serde_json::from_str::<Value>(&text) else {
        debug!("malformed index at {}; starting fresh", index_path.display());
        return Index::empty_for(index_path);
    };
    let Some(obj) = doc.as_object() else {
        return Index::empty_for(index_path);
    };
    let Some(root) = obj.get("root").and_then(Value::as_str) else {
        return Index::empty_for(index_path);
    };

    let mut index = Index {
        root: PathBuf::from(root),
        files: Default::default(),
    };
    if let Some(raw) = obj.get("files").and_then(Value::as_object) {
        for (id, value) in raw {
            match record_from_json(value) {
                Some(record) => {
                    index.files.insert(id.clone(), record);
                }
                None => warn!("skipping malformed index record {id:?}"),
            }
        }
    }
    debug!(
        "loaded index {} ({} records)",
        index_path.display(),
        index.files.len()
    );
    index
}

/// Save the full index: serialize every record, write to a sibling temp file,
/// flush and sync, then atomically replace `index_path`.
pub fn save_index(index: &Index, index_path: &Path) -> Result<()> {
    let mut files = Map::new();
    for (id, record) in &index.files {
        files.insert(id.clone(), record_to_json(record));
    }
    let doc = json!({
        "root": to_posix_string(&index.root),
        "files": files,
    });

    let tmp = temp_path_for(index_path);
    let mut f = fs::File::create(&tmp)
        .with_context(|| format!("create temp index at {}", tmp.display()))?;
    serde_json::to_writer_pretty(&mut f, &doc)
        .with_context(|| format!("serialize index to {}", tmp.display()))?;
    f.flush().context("flush temp index")?;
    f.sync_all().context("sync temp index")?;
    drop(f);
    fs::rename(&tmp, index_path).with_context(|| {
        format!(
            "atomic rename temp index to final path ({} -> {})",
            tmp.display(),
            index_path.display()
        )
    })?;
    Ok(())
}

/// Decode one record. Requires `id` and `path`; a missing `status` defaults to
/// pending, and unrecognized top-level keys on old-format records are folded
/// into `properties`.
fn record_from_json(value: &Value) -> Option<ItemRecord> {
    let obj = value.as_object()?;
    let id = obj.get("id").and_then(Value::as_str)?.to_string();
    let path = obj.get("path").and_then(Value::as_str)?;
    let status = obj
        .get("status")
        .and_then(|v| serde_json::from_value::<FileStatus>(v.clone()).ok())
        .unwrap_or(FileStatus::Pending);

    let mut properties = obj
        .get("properties")
        .and_then(Value::as_object)
        .cloned()
        .unwrap_or_default();
    for (key, extra) in obj {
        if !matches!(key.as_str(), "__type__" | "id" | "path" | "status" | "properties") {
            properties.insert(key.clone(), extra.clone());
        }
    }

    Some(ItemRecord {
        id,
        path: PathBuf::from(path),
        status,
        properties,
    })
}

fn record_to_json(record: &ItemRecord) -> Value {
    json!({
        "id": record.id,
        "path": to_posix_string(&record.path),
        "status": record.status,
        "properties": record.properties,
    })
}
