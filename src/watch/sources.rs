// src/watch/sources.rs

//! Resolution of action source files into content hashes.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use tracing::debug;

use crate::action::{ActionRef, ActionSet};
use crate::fs::FileSystem;
use crate::watch::cache::FileCache;
use crate::watch::patterns::{
    SourceDefaults, SourceProfile, build_source_profiles, collect_matching_files,
};

/// Hashes the files each action includes, reusing cached hashes for files
/// that did not change.
#[derive(Debug)]
pub struct SourceResolver {
    root: PathBuf,
    fs: Arc<dyn FileSystem>,
    profiles: BTreeMap<ActionRef, SourceProfile>,
    cache: FileCache,
}

impl SourceResolver {
    pub fn new(
        root: impl Into<PathBuf>,
        fs: Arc<dyn FileSystem>,
        defaults: &SourceDefaults,
        actions: &ActionSet,
    ) -> Result<Self> {
        let profiles = build_source_profiles(defaults, actions)?
            .into_iter()
            .map(|p| (p.action().clone(), p))
            .collect();

        Ok(Self {
            root: root.into(),
            cache: FileCache::new(Arc::clone(&fs)),
            fs,
            profiles,
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn profile(&self, action: &ActionRef) -> Option<&SourceProfile> {
        self.profiles.get(action)
    }

    /// Current `relative path -> hash` map of one action's inputs.
    pub fn files_for(&mut self, action: &ActionRef) -> Result<BTreeMap<String, String>> {
        let Some(profile) = self.profiles.get(action) else {
            return Ok(BTreeMap::new());
        };

        let mut out = BTreeMap::new();
        for (rel, path) in collect_matching_files(self.fs.as_ref(), &self.root, profile)? {
            let hash = self
                .cache
                .get_or_compute(&path)
                .with_context(|| format!("hashing input {rel} of {action}"))?;
            out.insert(rel, hash);
        }
        Ok(out)
    }

    /// Hash the inputs of every action and store them in `actions`.
    pub fn resolve_all(&mut self, actions: &mut ActionSet) -> Result<()> {
        let refs: Vec<ActionRef> = actions.references().cloned().collect();
        for reference in refs {
            let files = self.files_for(&reference)?;
            debug!(action = %reference, files = files.len(), "resolved source inputs");
            actions.set_source_files(&reference, files);
        }
        Ok(())
    }

    /// Actions with at least one pattern matching `rel_path`.
    pub fn actions_matching(&self, rel_path: &str) -> Vec<ActionRef> {
        self.profiles
            .values()
            .filter(|p| p.matches(rel_path))
            .map(|p| p.action().clone())
            .collect()
    }

    /// Drop cached hashes of paths reported as changed.
    pub fn forget(&mut self, paths: &[PathBuf]) {
        for path in paths {
            self.cache.invalidate(path);
        }
    }
}
