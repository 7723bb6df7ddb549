//! Decoded chunk cache.
//!
//! Readers keep recently decoded (decompressed) chunks so that repeated
//! selections over the same region do not hit the file and zlib again.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use parking_lot::RwLock;

/// Default cache budget (16 MB).
pub const DEFAULT_CHUNK_CACHE_BYTES: usize = 16 * 1024 * 1024;

/// Thread-safe cache of decoded chunks, keyed by their file offset.
///
/// Uses `parking_lot::RwLock` for non-poisoning locks and `AtomicUsize`
/// for lock-free size tracking.
pub struct ChunkCache {
    cache: RwLock<HashMap<u64, Arc<Vec<u8>>>>,
    max_size: usize,
    current_size: AtomicUsize,
}

impl ChunkCache {
    /// Create a cache with the given budget in bytes. Zero disables caching.
    pub fn new(max_size: usize) -> Self {
        Self {
            cache: RwLock::new(HashMap::new()),
            max_size,
            current_size: AtomicUsize::new(0),
        }
    }

    /// Get a cached chunk.
    #[inline]
    pub fn get(&self, offset: u64) -> Option<Arc<Vec<u8>>> {
        self.cache.read().get(&offset).cloned()
    }

    /// Insert a decoded chunk and return the shared handle.
    pub fn insert(&self, offset: u64, data: Vec<u8>) -> Arc<Vec<u8>> {
        let size = data.len();
        let data = Arc::new(data);

        if size > self.max_size {
            return data;
        }

        if self.current_size.load(Ordering::Relaxed) + size > self.max_size {
            self.evict_some();
        }

        let mut cache = self.cache.write();
        if let Some(existing) = cache.get(&offset) {
            return Arc::clone(existing);
        }
        cache.insert(offset, Arc::clone(&data));
        self.current_size.fetch_add(size, Ordering::Relaxed);
        data
    }

    /// Evict approximately half of the cache.
    fn evict_some(&self) {
        let mut cache = self.cache.write();
        let keys: Vec<u64> = cache.keys().copied().collect();
        let evict_count = (keys.len() + 1) / 2;

        let mut evicted_size = 0;
        for key in keys.into_iter().take(evict_count) {
            if let Some(chunk) = cache.remove(&key) {
                evicted_size += chunk.len();
            }
        }

        let _ = self.current_size.fetch_update(
            Ordering::Relaxed,
            Ordering::Relaxed,
            |x| Some(x.saturating_sub(evicted_size)),
        );
    }

    /// Clear the entire cache.
    pub fn clear(&self) {
        self.cache.write().clear();
        self.current_size.store(0, Ordering::Relaxed);
    }

    /// Number of cached chunks.
    #[inline]
    pub fn len(&self) -> usize {
        self.cache.read().len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Current cache size in bytes.
    #[inline]
    pub fn size(&self) -> usize {
        self.current_size.load(Ordering::Relaxed)
    }
}

impl Default for ChunkCache {
    fn default() -> Self {
        Self::new(DEFAULT_CHUNK_CACHE_BYTES)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cache_insert_get() {
        let cache = ChunkCache::new(1024);
        cache.insert(100, vec![1, 2, 3]);
        assert_eq!(*cache.get(100).unwrap(), vec![1, 2, 3]);
        assert!(cache.get(200).is_none());
    }

    #[test]
    fn test_cache_clear() {
        let cache = ChunkCache::new(1024);
        cache.insert(100, vec![1, 2, 3]);
        assert!(!cache.is_empty());
        cache.clear();
        assert!(cache.is_empty());
        assert_eq!(cache.size(), 0);
    }

    #[test]
    fn test_cache_eviction() {
        let cache = ChunkCache::new(50);
        for i in 0..10u64 {
            cache.insert(i * 100, vec![0u8; 10]);
        }
        assert!(cache.len() <= 5);
        assert!(cache.size() <= 50);
    }

    #[test]
    fn test_disabled_cache_still_returns_data() {
        let cache = ChunkCache::new(0);
        let data = cache.insert(8, vec![9, 9]);
        assert_eq!(*data, vec![9, 9]);
        assert!(cache.is_empty());
    }
}
