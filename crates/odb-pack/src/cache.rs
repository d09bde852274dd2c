//! Byte-bounded LRU cache for resolved delta bases.
//!
//! Deltified packs revisit the same bases constantly; without a cache
//! every lookup re-inflates and re-patches the whole chain. Entries are
//! keyed by object id and the bound is total inflated bytes, not entry
//! count, because base sizes vary over orders of magnitude.

use std::sync::{Arc, Mutex};

use lru::LruCache;
use odb_hash::ObjectId;
use odb_object::ObjectType;

/// Default cache budget: 96 MiB of inflated content.
pub const DEFAULT_CACHE_BYTES: u64 = 96 * 1024 * 1024;

/// A cached decoded object.
#[derive(Debug, Clone)]
pub struct CachedObject {
    pub obj_type: ObjectType,
    pub data: Arc<[u8]>,
}

struct Inner {
    map: LruCache<ObjectId, CachedObject>,
    bytes: u64,
}

/// Thread-safe LRU keyed by id, bounded by total inflated bytes.
///
/// The lock is held only for map bookkeeping, never across inflation or
/// delta application.
pub struct DeltaBaseCache {
    inner: Mutex<Inner>,
    max_bytes: u64,
}

impl DeltaBaseCache {
    /// Create a cache with the given byte budget. A budget of zero
    /// disables caching entirely.
    pub fn new(max_bytes: u64) -> Self {
        Self {
            inner: Mutex::new(Inner {
                map: LruCache::unbounded(),
                bytes: 0,
            }),
            max_bytes,
        }
    }

    /// Look up an object, promoting it to most recently used.
    pub fn get(&self, id: &ObjectId) -> Option<CachedObject> {
        let mut inner = self.inner.lock().expect("cache lock poisoned");
        inner.map.get(id).cloned()
    }

    /// Insert a decoded object.
    ///
    /// Objects larger than the whole budget are not cached (they would
    /// evict everything for a single entry). Oldest entries are evicted
    /// until the budget holds.
    pub fn insert(&self, id: ObjectId, obj_type: ObjectType, data: Arc<[u8]>) {
        let size = data.len() as u64;
        if size > self.max_bytes {
            return;
        }
        let mut inner = self.inner.lock().expect("cache lock poisoned");
        if let Some(old) = inner.map.put(id, CachedObject { obj_type, data }) {
            inner.bytes -= old.data.len() as u64;
        }
        inner.bytes += size;
        while inner.bytes > self.max_bytes {
            match inner.map.pop_lru() {
                Some((_, evicted)) => inner.bytes -= evicted.data.len() as u64,
                None => break,
            }
        }
    }

    /// Number of cached objects.
    pub fn len(&self) -> usize {
        self.inner.lock().expect("cache lock poisoned").map.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Total inflated bytes currently held.
    pub fn bytes(&self) -> u64 {
        self.inner.lock().expect("cache lock poisoned").bytes
    }

    /// Drop all entries.
    pub fn clear(&self) {
        let mut inner = self.inner.lock().expect("cache lock poisoned");
        inner.map.clear();
        inner.bytes = 0;
    }
}

impl Default for DeltaBaseCache {
    fn default() -> Self {
        Self::new(DEFAULT_CACHE_BYTES)
    }
}
