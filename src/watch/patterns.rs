// src/watch/patterns.rs

use std::fmt;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use globset::{Glob, GlobSet, GlobSetBuilder};

use crate::action::{ActionRef, ActionSet};
use crate::fs::FileSystem;

/// Directory holding actiongraph's own state; never an input.
pub const STATE_DIR: &str = ".actiongraph";

/// Project-wide pattern defaults from `[default]` in the config.
///
/// ```toml
/// [default]
/// exclude = ["**/.git/**", "**/target/**"]
/// ```
#[derive(Debug, Clone, Default)]
pub struct SourceDefaults {
    pub exclude: Vec<String>,
}

/// Compiled include/exclude patterns of a single action.
///
/// Patterns are relative to the project root; [`matches`](Self::matches)
/// expects relative paths with forward slashes (e.g. `"api/src/main.rs"`).
#[derive(Clone)]
pub struct SourceProfile {
    action: ActionRef,
    include_set: GlobSet,
    exclude_set: Option<GlobSet>,
    /// Narrower set of files that may be live-synced, if the action syncs.
    sync_set: Option<GlobSet>,
}

impl fmt::Debug for SourceProfile {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SourceProfile")
            .field("action", &self.action)
            .finish_non_exhaustive()
    }
}

impl SourceProfile {
    pub fn action(&self) -> &ActionRef {
        &self.action
    }

    /// Returns true if the given relative path is one of this action's
    /// inputs.
    pub fn matches(&self, rel_path: &str) -> bool {
        if is_state_path(rel_path) || !self.include_set.is_match(rel_path) {
            return false;
        }
        if let Some(exclude) = &self.exclude_set {
            if exclude.is_match(rel_path) {
                return false;
            }
        }
        true
    }

    /// Whether a change to `rel_path` can be pushed by live sync. An action
    /// with `sync` but no sync patterns may sync any of its inputs.
    pub fn syncable(&self, rel_path: &str) -> bool {
        match &self.sync_set {
            Some(set) => set.is_match(rel_path),
            None => true,
        }
    }
}

fn is_state_path(rel_path: &str) -> bool {
    rel_path == STATE_DIR || rel_path.starts_with(&format!("{STATE_DIR}/"))
}

/// Compile one profile per action. Action-level excludes are merged with
/// the project defaults.
pub fn build_source_profiles(
    defaults: &SourceDefaults,
    actions: &ActionSet,
) -> Result<Vec<SourceProfile>> {
    let mut profiles = Vec::with_capacity(actions.len());

    for action in actions.iter() {
        let include_set = build_globset(&action.include)
            .with_context(|| format!("building include globset for {}", action.reference))?;

        let mut exclude_patterns = action.exclude.clone();
        exclude_patterns.extend(defaults.exclude.iter().cloned());
        let exclude_set = if exclude_patterns.is_empty() {
            None
        } else {
            Some(
                build_globset(&exclude_patterns).with_context(|| {
                    format!("building exclude globset for {}", action.reference)
                })?,
            )
        };

        let sync_set = match &action.sync {
            Some(sync) if !sync.include.is_empty() => Some(
                build_globset(&sync.include)
                    .with_context(|| format!("building sync globset for {}", action.reference))?,
            ),
            _ => None,
        };

        profiles.push(SourceProfile {
            action: action.reference.clone(),
            include_set,
            exclude_set,
            sync_set,
        });
    }

    Ok(profiles)
}

/// Build a GlobSet from simple string patterns.
pub fn build_globset(patterns: &[String]) -> Result<GlobSet> {
    let mut builder = GlobSetBuilder::new();
    for pat in patterns {
        let glob = Glob::new(pat).with_context(|| format!("invalid glob pattern: {pat}"))?;
        builder.add(glob);
    }
    Ok(builder.build()?)
}

/// Collect all files under `root` that belong to `profile`, as
/// `(relative path, full path)` pairs sorted by relative path.
pub fn collect_matching_files(
    fs: &dyn FileSystem,
    root: &Path,
    profile: &SourceProfile,
) -> Result<Vec<(String, PathBuf)>> {
    let mut files = Vec::new();
    if !fs.is_dir(root) {
        return Ok(files);
    }
    let mut stack = vec![root.to_path_buf()];

    while let Some(dir) = stack.pop() {
        for path in fs.read_dir(&dir)? {
            let Ok(rel) = path.strip_prefix(root) else {
                continue;
            };
            let rel_str = rel.to_string_lossy().replace('\\', "/");
            if is_state_path(&rel_str) {
                continue;
            }
            if fs.is_dir(&path) {
                stack.push(path);
            } else if fs.is_file(&path) && profile.matches(&rel_str) {
                files.push((rel_str, path));
            }
        }
    }

    files.sort();
    Ok(files)
}
