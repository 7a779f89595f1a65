//! Path normalization helpers.

use std::path::Path;

/// Render a path with forward slashes for the index document. Only Windows
/// separators are rewritten; a (legal) backslash inside a Unix filename is
/// left alone.
pub fn to_posix_string(path: &Path) -> String {
    let s = path.to_string_lossy();
    if cfg!(windows) {
        s.replace('\\', "/")
    } else {
        s.into_owned()
    }
}
