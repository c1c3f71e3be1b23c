// src/engine/context.rs

//! State shared by every run against the same project.

use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use tokio::sync::watch;
use tracing::{debug, warn};

use crate::action::Outputs;
use crate::engine::cache::{CacheKey, CachedResult, ResultCache, ResultStore};

/// Result published by the task that actually ran a handler.
#[derive(Debug, Clone, PartialEq)]
pub enum FlightResult {
    Succeeded(Outputs),
    Failed(String),
}

type FlightSlot = watch::Receiver<Option<FlightResult>>;

struct ContextInner {
    cache: ResultCache,
    in_flight: Mutex<HashMap<CacheKey, (u64, FlightSlot)>>,
    next_flight: AtomicU64,
}

/// Explicit execution context: the result cache plus the map of tasks
/// currently being executed.
///
/// Cloning is cheap; runs that share a context never execute the same
/// `(action, intent, version)` twice at the same time.
#[derive(Clone)]
pub struct ExecutionContext {
    inner: Arc<ContextInner>,
}

/// Outcome of trying to become the executor of a cache key.
pub enum Claim {
    /// Nobody else is running it: the holder must run it and report.
    Leader(FlightGuard),
    /// Another run is already on it: wait for its result.
    Follower(FlightSlot),
}

impl ExecutionContext {
    pub fn new(store: Box<dyn ResultStore>) -> Self {
        Self {
            inner: Arc::new(ContextInner {
                cache: ResultCache::new(store),
                in_flight: Mutex::new(HashMap::new()),
                next_flight: AtomicU64::new(0),
            }),
        }
    }

    pub fn in_memory() -> Self {
        Self::new(Box::new(crate::engine::cache::MemoryResultStore::new()))
    }

    pub fn cache(&self) -> &ResultCache {
        &self.inner.cache
    }

    /// [`ResultCache::record_success`] on the blocking pool; a file-backed
    /// store rewrites its whole file on every write.
    pub async fn record(&self, key: &CacheKey, result: CachedResult) -> anyhow::Result<()> {
        let ctx = self.clone();
        let key = key.clone();
        tokio::task::spawn_blocking(move || ctx.cache().record_success(&key, result)).await?
    }

    /// Number of cache keys currently being executed.
    pub fn in_flight(&self) -> usize {
        self.lock_in_flight().len()
    }

    fn lock_in_flight(&self) -> std::sync::MutexGuard<'_, HashMap<CacheKey, (u64, FlightSlot)>> {
        self.inner
            .in_flight
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    pub fn claim(&self, key: &CacheKey) -> Claim {
        let mut in_flight = self.lock_in_flight();

        if let Some((_, slot)) = in_flight.get(key) {
            debug!(key = %key, "already in flight; following");
            return Claim::Follower(slot.clone());
        }

        let id = self.inner.next_flight.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = watch::channel(None);
        in_flight.insert(key.clone(), (id, rx));

        Claim::Leader(FlightGuard {
            ctx: self.clone(),
            key: key.clone(),
            id,
            tx,
        })
    }
}

impl fmt::Debug for ExecutionContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ExecutionContext")
            .field("cache", &self.inner.cache)
            .field("in_flight", &self.in_flight())
            .finish()
    }
}

/// Held by the leader of a cache key while its handler runs.
///
/// Dropping the guard without [`succeed`](Self::succeed) or
/// [`fail`](Self::fail) (cancellation, abort) releases the key; followers
/// then observe a closed channel and claim it again.
pub struct FlightGuard {
    ctx: ExecutionContext,
    key: CacheKey,
    id: u64,
    tx: watch::Sender<Option<FlightResult>>,
}

impl FlightGuard {
    /// Record the result in the cache, then publish it to followers.
    pub async fn succeed(self, outputs: Outputs) {
        let record = CachedResult::now(Some(outputs.clone()));
        if let Err(err) = self.ctx.record(&self.key, record).await {
            warn!(key = %self.key, error = %err, "failed to store task result");
        }
        self.tx.send_replace(Some(FlightResult::Succeeded(outputs)));
    }

    /// Publish a failure to followers. Nothing is cached.
    pub fn fail(self, message: String) {
        self.tx.send_replace(Some(FlightResult::Failed(message)));
    }
}

impl Drop for FlightGuard {
    fn drop(&mut self) {
        let mut in_flight = self.ctx.lock_in_flight();
        if in_flight.get(&self.key).is_some_and(|(id, _)| *id == self.id) {
            in_flight.remove(&self.key);
        }
    }
}

/// Wait for the leader of a key. `None` means the leader gave up without a
/// result and the key should be claimed again.
pub async fn follow(mut slot: FlightSlot) -> Option<FlightResult> {
    match slot.wait_for(Option::is_some).await {
        Ok(value) => value.clone(),
        Err(_) => None,
    }
}
