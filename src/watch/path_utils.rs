// src/watch/path_utils.rs

//! Path normalization for change events.

use std::path::{Component, Path};

/// Express `path` relative to `root` with forward slashes.
///
/// Relative inputs are taken as already relative to `root`. Absolute inputs
/// are stripped of `root`, retrying with both sides canonicalized (symlinked
/// temp dirs on macOS report `/private/var/...`). Returns `None` for paths
/// outside the root.
pub fn relative_str(root: &Path, path: &Path) -> Option<String> {
    if path.is_relative() {
        return Some(slashes(path));
    }

    if let Ok(rel) = path.strip_prefix(root) {
        return Some(slashes(rel));
    }

    let root_canon = root.canonicalize().ok()?;
    // A removed file cannot be canonicalized; its parent usually can.
    let path_canon = match path.canonicalize() {
        Ok(p) => p,
        Err(_) => {
            let parent = path.parent()?.canonicalize().ok()?;
            parent.join(path.file_name()?)
        }
    };
    path_canon.strip_prefix(&root_canon).ok().map(slashes)
}

fn slashes(path: &Path) -> String {
    path.components()
        .filter_map(|c| match c {
            Component::Normal(s) => Some(s.to_string_lossy().into_owned()),
            _ => None,
        })
        .collect::<Vec<_>>()
        .join("/")
}
