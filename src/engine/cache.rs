// src/engine/cache.rs

//! Result cache keyed by `(action, intent, version)`.
//!
//! A result is only ever written after a handler succeeded. Two backends
//! exist: an in-memory map, and a JSON file under the project root that
//! makes results survive restarts.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, PoisonError};
use std::time::{SystemTime, UNIX_EPOCH};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::action::{ActionRef, Intent, Outputs};
use crate::version::Version;

/// Relative path (from the project root) to the persisted results.
///
/// The effective path on disk is `<root>/.actiongraph/results.json`.
pub const RESULTS_FILE_PATH: &str = ".actiongraph/results.json";

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct CacheKey {
    pub action: ActionRef,
    pub intent: Intent,
    /// Full version digest.
    pub version: String,
}

impl CacheKey {
    pub fn new(action: ActionRef, intent: Intent, version: &Version) -> Self {
        Self {
            action,
            intent,
            version: version.as_str().to_string(),
        }
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let end = self.version.len().min(10);
        write!(f, "{}/{}@v-{}", self.action, self.intent, &self.version[..end])
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CachedResult {
    /// `None` when the run that produced this record did not keep outputs.
    pub outputs: Option<Outputs>,
    /// Seconds since the Unix epoch.
    pub completed_at: u64,
}

impl CachedResult {
    pub fn now(outputs: Option<Outputs>) -> Self {
        let completed_at = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs())
            .unwrap_or(0);
        Self {
            outputs,
            completed_at,
        }
    }
}

/// Abstract storage for task results.
pub trait ResultStore: Send {
    fn load(&self, key: &CacheKey) -> Result<Option<CachedResult>>;
    fn save(&mut self, key: &CacheKey, result: &CachedResult) -> Result<()>;
    /// Remove results of actions that are not in `active`. Returns how many
    /// entries were dropped.
    fn prune(&mut self, active: &BTreeSet<ActionRef>) -> Result<usize>;
    /// Remove every version's result for `(action, intent)`.
    fn forget(&mut self, action: &ActionRef, intent: Intent) -> Result<usize>;
    fn len(&self) -> usize;
}

/// Stores results in memory only.
#[derive(Debug, Default)]
pub struct MemoryResultStore {
    map: BTreeMap<CacheKey, CachedResult>,
}

impl MemoryResultStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl ResultStore for MemoryResultStore {
    fn load(&self, key: &CacheKey) -> Result<Option<CachedResult>> {
        Ok(self.map.get(key).cloned())
    }

    fn save(&mut self, key: &CacheKey, result: &CachedResult) -> Result<()> {
        self.map.insert(key.clone(), result.clone());
        debug!(key = %key, "stored task result (memory)");
        Ok(())
    }

    fn prune(&mut self, active: &BTreeSet<ActionRef>) -> Result<usize> {
        let initial_len = self.map.len();
        self.map.retain(|k, _| active.contains(&k.action));
        Ok(initial_len - self.map.len())
    }

    fn forget(&mut self, action: &ActionRef, intent: Intent) -> Result<usize> {
        let initial_len = self.map.len();
        self.map
            .retain(|k, _| !(k.action == *action && k.intent == intent));
        Ok(initial_len - self.map.len())
    }

    fn len(&self) -> usize {
        self.map.len()
    }
}

#[derive(Debug, Serialize, Deserialize)]
struct PersistedEntry {
    #[serde(flatten)]
    key: CacheKey,
    #[serde(flatten)]
    result: CachedResult,
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct PersistedResults {
    results: Vec<PersistedEntry>,
}

/// Stores results in `<root>/.actiongraph/results.json`.
///
/// The file is read once on open and rewritten (atomically, through a
/// temporary file in the same directory) on every change.
#[derive(Debug)]
pub struct FileResultStore {
    path: PathBuf,
    map: BTreeMap<CacheKey, CachedResult>,
}

impl FileResultStore {
    pub fn open(root: &Path) -> Result<Self> {
        let path = root.join(RESULTS_FILE_PATH);
        let map = load_all_results(&path)?;
        debug!(path = ?path, entries = map.len(), "opened result store");
        Ok(Self { path, map })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn flush(&self) -> Result<()> {
        save_all_results(&self.path, &self.map)
    }
}

impl ResultStore for FileResultStore {
    fn load(&self, key: &CacheKey) -> Result<Option<CachedResult>> {
        Ok(self.map.get(key).cloned())
    }

    fn save(&mut self, key: &CacheKey, result: &CachedResult) -> Result<()> {
        self.map.insert(key.clone(), result.clone());
        self.flush()?;
        debug!(key = %key, "stored task result (file)");
        Ok(())
    }

    fn prune(&mut self, active: &BTreeSet<ActionRef>) -> Result<usize> {
        let initial_len = self.map.len();
        self.map.retain(|k, _| active.contains(&k.action));
        let removed = initial_len - self.map.len();
        if removed > 0 {
            self.flush()?;
        }
        Ok(removed)
    }

    fn forget(&mut self, action: &ActionRef, intent: Intent) -> Result<usize> {
        let initial_len = self.map.len();
        self.map
            .retain(|k, _| !(k.action == *action && k.intent == intent));
        let removed = initial_len - self.map.len();
        if removed > 0 {
            self.flush()?;
        }
        Ok(removed)
    }

    fn len(&self) -> usize {
        self.map.len()
    }
}

fn load_all_results(path: &Path) -> Result<BTreeMap<CacheKey, CachedResult>> {
    if !path.exists() {
        return Ok(BTreeMap::new());
    }

    let text = fs::read_to_string(path)
        .with_context(|| format!("reading result store at {:?}", path))?;
    if text.trim().is_empty() {
        return Ok(BTreeMap::new());
    }

    let persisted: PersistedResults = serde_json::from_str(&text)
        .with_context(|| format!("parsing result store at {:?}", path))?;

    Ok(persisted
        .results
        .into_iter()
        .map(|e| (e.key, e.result))
        .collect())
}

fn save_all_results(path: &Path, map: &BTreeMap<CacheKey, CachedResult>) -> Result<()> {
    let parent = path
        .parent()
        .with_context(|| format!("result store path {:?} has no parent", path))?;
    fs::create_dir_all(parent)
        .with_context(|| format!("creating result store directory at {:?}", parent))?;

    let persisted = PersistedResults {
        results: map
            .iter()
            .map(|(k, r)| PersistedEntry {
                key: k.clone(),
                result: r.clone(),
            })
            .collect(),
    };

    let mut tmp = tempfile::NamedTempFile::new_in(parent)
        .with_context(|| format!("creating temporary file in {:?}", parent))?;
    serde_json::to_writer_pretty(&mut tmp, &persisted)?;
    tmp.write_all(b"\n")?;
    tmp.flush()?;
    tmp.persist(path)
        .with_context(|| format!("writing result store at {:?}", path))?;
    Ok(())
}

/// Thread-safe front for a [`ResultStore`].
///
/// Store errors on lookup are logged and treated as misses; a broken cache
/// must never fail a run that could simply redo the work.
pub struct ResultCache {
    store: Mutex<Box<dyn ResultStore>>,
}

impl ResultCache {
    pub fn new(store: Box<dyn ResultStore>) -> Self {
        Self {
            store: Mutex::new(store),
        }
    }

    pub fn in_memory() -> Self {
        Self::new(Box::new(MemoryResultStore::new()))
    }

    pub fn get(&self, key: &CacheKey) -> Option<CachedResult> {
        if !key.intent.is_cacheable() {
            return None;
        }
        let store = self.store.lock().unwrap_or_else(PoisonError::into_inner);
        match store.load(key) {
            Ok(hit) => hit,
            Err(err) => {
                warn!(key = %key, error = %err, "result cache lookup failed; treating as miss");
                None
            }
        }
    }

    pub fn put(&self, key: &CacheKey, result: CachedResult) -> Result<()> {
        let mut store = self.store.lock().unwrap_or_else(PoisonError::into_inner);
        store.save(key, &result)
    }

    /// Record a handler success: store it if its intent is cacheable and
    /// drop the results it invalidates (a delete undoes every deploy record
    /// of the action, and a deploy undoes the delete).
    pub fn record_success(&self, key: &CacheKey, result: CachedResult) -> Result<()> {
        let mut store = self.store.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(reversed) = key.intent.reverses() {
            let removed = store.forget(&key.action, reversed)?;
            if removed > 0 {
                debug!(key = %key, %reversed, removed, "dropped results undone by this task");
            }
        }
        if key.intent.is_cacheable() {
            store.save(key, &result)?;
        }
        Ok(())
    }

    /// Drop results of actions that no longer exist.
    pub fn prune(&self, active: &BTreeSet<ActionRef>) -> Result<usize> {
        let mut store = self.store.lock().unwrap_or_else(PoisonError::into_inner);
        let removed = store.prune(active)?;
        if removed > 0 {
            info!(removed, "pruned results of removed actions");
        }
        Ok(removed)
    }

    pub fn len(&self) -> usize {
        self.store
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl fmt::Debug for ResultCache {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ResultCache")
            .field("entries", &self.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::action::ActionKind;

    fn key(name: &str, version: &str) -> CacheKey {
        CacheKey {
            action: ActionRef::new(ActionKind::Build, name),
            intent: Intent::Build,
            version: version.to_string(),
        }
    }

    #[test]
    fn memory_store_prunes_removed_actions() {
        let mut store = MemoryResultStore::new();
        store.save(&key("a", "1"), &CachedResult::now(None)).unwrap();
        store.save(&key("b", "1"), &CachedResult::now(None)).unwrap();

        let active: BTreeSet<ActionRef> = [ActionRef::new(ActionKind::Build, "a")].into();
        assert_eq!(store.prune(&active).unwrap(), 1);
        assert!(store.load(&key("a", "1")).unwrap().is_some());
        assert!(store.load(&key("b", "1")).unwrap().is_none());
    }

    fn deploy_key(intent: Intent) -> CacheKey {
        CacheKey {
            action: ActionRef::new(ActionKind::Deploy, "api"),
            intent,
            version: "v1".into(),
        }
    }

    #[test]
    fn delete_drops_deploy_records_and_is_not_stored() {
        let cache = ResultCache::in_memory();
        cache
            .record_success(&deploy_key(Intent::Deploy), CachedResult::now(None))
            .unwrap();
        cache.put(&key("api", "v1"), CachedResult::now(None)).unwrap();
        assert!(cache.get(&deploy_key(Intent::Deploy)).is_some());

        cache
            .record_success(&deploy_key(Intent::Delete), CachedResult::now(None))
            .unwrap();
        assert!(cache.get(&deploy_key(Intent::Deploy)).is_none());
        assert!(cache.get(&deploy_key(Intent::Delete)).is_none());
        // Records of other actions are untouched.
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn file_store_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let mut outputs = Outputs::new();
        outputs.insert("image".into(), serde_json::json!("api:abc"));

        {
            let mut store = FileResultStore::open(dir.path()).unwrap();
            store
                .save(&key("api", "abc"), &CachedResult::now(Some(outputs.clone())))
                .unwrap();
        }

        let store = FileResultStore::open(dir.path()).unwrap();
        let hit = store.load(&key("api", "abc")).unwrap().unwrap();
        assert_eq!(hit.outputs, Some(outputs));
        assert!(store.load(&key("api", "other")).unwrap().is_none());
        assert!(dir.path().join(RESULTS_FILE_PATH).exists());
    }
}
