//! Scan producer: a dedicated worker that traverses a root directory and
//! emits one `Found` event per image file, then exactly one terminal event.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::{self, JoinHandle};
use walkdir::WalkDir;

use crate::utils::config::IMAGE_EXTS;
use crate::utils::to_posix_string;

/// Scan worker name, used as the error-event source.
pub const SCAN_WORKER: &str = "ScanWorker";
/// Terminal message after an exhausted traversal.
pub const SCAN_DONE: &str = "done";
/// Terminal message after a cancelled traversal.
pub const SCAN_CANCEL: &str = "cancel";

/// One event from the scan worker. The terminal event is emitted exactly once,
/// after the last `Found`, and carries [`SCAN_DONE`], [`SCAN_CANCEL`], or an
/// I/O error description.
#[derive(Clone, Debug)]
pub enum ScanEvent {
    Found(PathBuf),
    Terminal { message: String },
}

/// Handle to one running scan worker. Cancellation is cooperative: the worker
/// checks the flag between matches, so stopping has bounded latency but the
/// terminal event still always arrives.
pub struct ScanProducer {
    cancel: Arc<AtomicBool>,
    handle: Option<JoinHandle<()>>,
}

impl ScanProducer {
    /// Begin a lazy traversal of `root` on a dedicated worker. Every file
    /// whose extension (case-insensitive) is in [`IMAGE_EXTS`] is reported
    /// through `emit`; when `recursive` is false only the immediate directory
    /// is scanned.
    pub fn start<F>(root: &Path, recursive: bool, emit: F) -> Self
    where
        F: Fn(ScanEvent) + Send + 'static,
    {
        let cancel = Arc::new(AtomicBool::new(false));
        let flag = Arc::clone(&cancel);
        let root = root.to_path_buf();
        let handle = thread::spawn(move || {
            let message = run_scan_loop(&root, recursive, &flag, &emit);
            emit(ScanEvent::Terminal { message });
        });
        Self {
            cancel,
            handle: Some(handle),
        }
    }

    /// Request early termination. The worker stops between matches and still
    /// emits its terminal event.
    pub fn cancel(&self) {
        self.cancel.store(true, Ordering::Relaxed);
    }

    /// Wait for the worker to exit. Call after the terminal event was seen.
    pub fn join(&mut self) {
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

fn run_scan_loop<F>(root: &Path, recursive: bool, cancel: &AtomicBool, emit: &F) -> String
where
    F: Fn(ScanEvent),
{
    let max_depth = if recursive { usize::MAX } else { 1 };
    let walker = WalkDir::new(root).max_depth(max_depth).follow_links(false);
    for entry in walker {
        if cancel.load(Ordering::Relaxed) {
            return SCAN_CANCEL.to_string();
        }
        match entry {
            Ok(entry) => {
                if entry.file_type().is_file() && is_image_file(entry.path()) {
                    emit(ScanEvent::Found(entry.into_path()));
                }
            }
            Err(err) => return format!("scan failed: {err}"),
        }
    }
    SCAN_DONE.to_string()
}

/// True when the path's extension (case-insensitive) is in [`IMAGE_EXTS`].
pub fn is_image_file(path: &Path) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_lowercase())
        .is_some_and(|e| IMAGE_EXTS.contains(&e.as_str()))
}

/// Identifier for a discovered path: when the path sits directly inside the
/// scan root, its location relative to the root with forward slashes;
/// otherwise `"parent-dir-name/filename"`, keeping only one level of parent
/// context. The compaction is intentional and must match existing indexes.
pub fn derive_id(path: &Path, root: &Path) -> String {
    if path.parent() == Some(root)
        && let Ok(rel) = path.strip_prefix(root)
    {
        return to_posix_string(rel);
    }
    let parent = path
        .parent()
        .and_then(Path::file_name)
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    format!("{parent}/{name}")
}
