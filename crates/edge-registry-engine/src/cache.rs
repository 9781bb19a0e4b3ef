//! Process-wide memoization of loaded artifacts.
//!
//! Every key owns a slot that is initialized at most once. The map lock is
//! only held to find or create a slot, so loads for different keys run in
//! parallel while concurrent loads for the same key wait on the slot and
//! share the first caller's result.

use std::collections::HashMap;
use std::fmt;
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use once_cell::sync::{Lazy, OnceCell};
use parking_lot::Mutex;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoadedArtifact {
    pub name: String,
    pub version: String,
    pub path: PathBuf,
    pub bytes: Vec<u8>,
}

pub type ArtifactHandle = Arc<LoadedArtifact>;

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CacheKey {
    pub name: String,
    pub version: String,
}

impl CacheKey {
    pub fn new(name: &str, version: &str) -> Self {
        Self {
            name: name.to_string(),
            version: version.to_string(),
        }
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}", self.name, self.version)
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CacheStats {
    /// Warm starts served from memory.
    pub hits: u64,
    /// Loader invocations (cold starts), including failed ones.
    pub loads: u64,
    pub entries: usize,
}

type Slot<V> = Arc<OnceCell<Arc<V>>>;

static GLOBAL: Lazy<Arc<ArtifactCache>> = Lazy::new(|| Arc::new(ArtifactCache::new()));

#[derive(Debug)]
pub struct ArtifactCache<V = LoadedArtifact> {
    slots: Mutex<HashMap<CacheKey, Slot<V>>>,
    hits: AtomicU64,
    loads: AtomicU64,
}

impl ArtifactCache {
    /// The single instance shared by every registry opened in this process.
    /// Constructed on first access, lives until exit.
    pub fn global() -> Arc<Self> {
        Arc::clone(&GLOBAL)
    }
}

impl<V> Default for ArtifactCache<V> {
    fn default() -> Self {
        Self::new()
    }
}

impl<V> ArtifactCache<V> {
    pub fn new() -> Self {
        Self {
            slots: Mutex::new(HashMap::new()),
            hits: AtomicU64::new(0),
            loads: AtomicU64::new(0),
        }
    }

    /// Returns the cached value for `(name, version)` or runs `loader`
    /// exactly once across all concurrent callers for that key. A failed
    /// load caches nothing; the next call retries.
    pub fn get_or_load<E, F>(&self, name: &str, version: &str, loader: F) -> Result<Arc<V>, E>
    where
        F: FnOnce() -> Result<V, E>,
    {
        let key = CacheKey::new(name, version);
        let slot = Arc::clone(self.slots.lock().entry(key.clone()).or_default());

        if let Some(value) = slot.get() {
            self.hits.fetch_add(1, Ordering::Relaxed);
            tracing::debug!(key = %key, "artifact cache hit");
            return Ok(Arc::clone(value));
        }

        let mut loaded_here = false;
        let outcome = slot.get_or_try_init(|| {
            loaded_here = true;
            self.loads.fetch_add(1, Ordering::Relaxed);
            loader().map(Arc::new)
        });
        match outcome {
            Ok(value) => {
                if !loaded_here {
                    self.hits.fetch_add(1, Ordering::Relaxed);
                    tracing::debug!(key = %key, "artifact cache hit after concurrent load");
                }
                Ok(Arc::clone(value))
            }
            Err(err) => {
                self.drop_empty_slot(&key, &slot);
                Err(err)
            }
        }
    }

    pub fn get(&self, name: &str, version: &str) -> Option<Arc<V>> {
        let slots = self.slots.lock();
        slots
            .get(&CacheKey::new(name, version))
            .and_then(|slot| slot.get().cloned())
    }

    pub fn contains(&self, name: &str, version: &str) -> bool {
        self.get(name, version).is_some()
    }

    /// Forces the next access for the key to reload. Returns whether a
    /// loaded value was dropped.
    pub fn invalidate(&self, name: &str, version: &str) -> bool {
        let removed = self.slots.lock().remove(&CacheKey::new(name, version));
        removed.is_some_and(|slot| slot.get().is_some())
    }

    pub fn clear(&self) {
        self.slots.lock().clear();
    }

    pub fn len(&self) -> usize {
        self.slots
            .lock()
            .values()
            .filter(|slot| slot.get().is_some())
            .count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn stats(&self) -> CacheStats {
        CacheStats {
            hits: self.hits.load(Ordering::Relaxed),
            loads: self.loads.load(Ordering::Relaxed),
            entries: self.len(),
        }
    }

    fn drop_empty_slot(&self, key: &CacheKey, slot: &Slot<V>) {
        let mut slots = self.slots.lock();
        let stale = slots
            .get(key)
            .is_some_and(|current| Arc::ptr_eq(current, slot) && current.get().is_none());
        if stale {
            slots.remove(key);
        }
    }
}
