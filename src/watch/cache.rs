// src/watch/cache.rs

use std::collections::HashMap;
use std::collections::hash_map::Entry;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::Result;
use tracing::trace;

use crate::fs::FileSystem;
use crate::version::compute_file_hash;

/// Content hashes of source files seen by the watch loop, keyed by path.
///
/// Entries stay valid until the watcher reports the path as changed.
#[derive(Debug)]
pub struct FileCache {
    fs: Arc<dyn FileSystem>,
    digests: HashMap<PathBuf, String>,
}

impl FileCache {
    pub fn new(fs: Arc<dyn FileSystem>) -> Self {
        Self {
            fs,
            digests: HashMap::new(),
        }
    }

    pub fn get_or_compute(&mut self, path: &Path) -> Result<String> {
        match self.digests.entry(path.to_path_buf()) {
            Entry::Occupied(known) => Ok(known.get().clone()),
            Entry::Vacant(slot) => {
                let digest = compute_file_hash(self.fs.as_ref(), path)?;
                trace!(?path, %digest, "hashed source file");
                Ok(slot.insert(digest).clone())
            }
        }
    }

    pub fn invalidate(&mut self, path: &Path) {
        if self.digests.remove(path).is_some() {
            trace!(?path, "dropped stale digest");
        }
    }

    pub fn len(&self) -> usize {
        self.digests.len()
    }

    pub fn is_empty(&self) -> bool {
        self.digests.is_empty()
    }
}
