//! Bounded LRU cache of path-resolution bindings.
//!
//! The cache stores only the resolution `normalized path -> (ino, kind)`,
//! never attribute values, so attribute freshness is not a coherence
//! concern. Every mutating operation that changes a binding invalidates the
//! affected keys; directory-shaped mutations invalidate whole subtrees by
//! key prefix.
//!
//! A global generation counter closes the lookup/mutate/insert race: every
//! invalidation bumps it, and an insert computed from a walk that began
//! before the bump is dropped.

use std::num::NonZeroUsize;

use lru::LruCache;
use parking_lot::Mutex;

use super::types::FileKind;

/// Cache occupancy and effectiveness counters.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    pub entries: u64,
}

impl CacheStats {
    /// Fraction of lookups served from the cache, in `[0, 1]`.
    pub fn hit_rate(&self) -> f64 {
        let total = self.hits + self.misses;
        if total == 0 {
            0.0
        } else {
            self.hits as f64 / total as f64
        }
    }
}

#[derive(Clone, Copy, Debug)]
struct CacheEntry {
    ino: u64,
    kind: FileKind,
    /// Generation stamped at insertion.
    #[allow(dead_code)]
    generation: u64,
}

struct CacheInner {
    map: LruCache<String, CacheEntry>,
    generation: u64,
    hits: u64,
    misses: u64,
}

pub(crate) struct PathCache {
    inner: Mutex<CacheInner>,
}

impl PathCache {
    pub fn new(max_entries: usize) -> Self {
        let cap = NonZeroUsize::new(max_entries.max(1)).expect("max(1) is nonzero");
        PathCache {
            inner: Mutex::new(CacheInner {
                map: LruCache::new(cap),
                generation: 0,
                hits: 0,
                misses: 0,
            }),
        }
    }

    /// Probe the cache. Exactly one hit or miss is counted per call, so
    /// `hits + misses` equals total lookups.
    pub fn lookup(&self, path: &str) -> Option<(u64, FileKind)> {
        let mut inner = self.inner.lock();
        match inner.map.get(path) {
            Some(entry) => {
                let found = (entry.ino, entry.kind);
                inner.hits += 1;
                Some(found)
            }
            None => {
                inner.misses += 1;
                None
            }
        }
    }

    /// Snapshot the generation before starting a resolution walk.
    pub fn begin(&self) -> u64 {
        self.inner.lock().generation
    }

    /// Insert a binding unless an invalidation happened since `snapshot`
    /// was taken; a stale insert would resurrect a just-invalidated path.
    pub fn insert_if_current(&self, path: String, ino: u64, kind: FileKind, snapshot: u64) {
        let mut inner = self.inner.lock();
        if inner.generation != snapshot {
            return;
        }
        let generation = inner.generation;
        inner.map.put(
            path,
            CacheEntry {
                ino,
                kind,
                generation,
            },
        );
    }

    /// Drop the binding for exactly `path`.
    pub fn invalidate(&self, path: &str) {
        let mut inner = self.inner.lock();
        inner.generation += 1;
        inner.map.pop(path);
    }

    /// Drop the binding for `path` and every cached key underneath it.
    pub fn invalidate_subtree(&self, path: &str) {
        let mut inner = self.inner.lock();
        inner.generation += 1;
        inner.map.pop(path);

        let prefix = if path == "/" {
            "/".to_string()
        } else {
            format!("{path}/")
        };
        let doomed: Vec<String> = inner
            .map
            .iter()
            .filter(|(key, _)| key.starts_with(&prefix))
            .map(|(key, _)| key.clone())
            .collect();
        for key in doomed {
            inner.map.pop(&key);
        }
    }

    pub fn clear(&self) {
        let mut inner = self.inner.lock();
        inner.generation += 1;
        inner.map.clear();
    }

    pub fn stats(&self) -> CacheStats {
        let inner = self.inner.lock();
        CacheStats {
            hits: inner.hits,
            misses: inner.misses,
            entries: inner.map.len() as u64,
        }
    }
}
