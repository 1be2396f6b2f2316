// Copyright (c) 2024-2025 Jesse Morgan / Morgan Forge
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Model cache collaborator.
//!
//! The worker consults the cache before downloading and stores the raw
//! container bytes after they parse successfully. Cached bytes go through
//! the normal parse and assembly stages, so a hit only skips the network.

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};

use crate::sync::resilient_lock;

/// Default byte budget of [`MemoryModelCache`].
pub const DEFAULT_CACHE_BYTES: usize = 256 * 1024 * 1024;

/// Storage for raw model bytes keyed by URL.
pub trait ModelCache: Send + Sync {
    fn get(&self, url: &str) -> Option<Arc<Vec<u8>>>;

    fn put(&self, url: &str, bytes: Arc<Vec<u8>>);
}

#[derive(Debug, Default)]
struct Entries {
    map: HashMap<String, Arc<Vec<u8>>>,
    /// Least recently used first.
    order: VecDeque<String>,
    bytes: usize,
}

impl Entries {
    fn touch(&mut self, url: &str) {
        if let Some(pos) = self.order.iter().position(|u| u == url) {
            if let Some(key) = self.order.remove(pos) {
                self.order.push_back(key);
            }
        }
    }

    fn remove(&mut self, url: &str) {
        if let Some(old) = self.map.remove(url) {
            self.bytes -= old.len();
            self.order.retain(|u| u != url);
        }
    }
}

/// In-process LRU cache bounded by total bytes.
#[derive(Debug)]
pub struct MemoryModelCache {
    entries: Mutex<Entries>,
    max_bytes: usize,
}

impl Default for MemoryModelCache {
    fn default() -> Self {
        Self::new(DEFAULT_CACHE_BYTES)
    }
}

impl MemoryModelCache {
    pub fn new(max_bytes: usize) -> Self {
        Self {
            entries: Mutex::new(Entries::default()),
            max_bytes,
        }
    }

    pub fn len(&self) -> usize {
        resilient_lock(&self.entries).map.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Total bytes currently held.
    pub fn size_bytes(&self) -> usize {
        resilient_lock(&self.entries).bytes
    }

    pub fn clear(&self) {
        *resilient_lock(&self.entries) = Entries::default();
    }
}

impl ModelCache for MemoryModelCache {
    fn get(&self, url: &str) -> Option<Arc<Vec<u8>>> {
        let mut entries = resilient_lock(&self.entries);
        let hit = entries.map.get(url).cloned();
        if hit.is_some() {
            entries.touch(url);
        }
        hit
    }

    fn put(&self, url: &str, bytes: Arc<Vec<u8>>) {
        if bytes.len() > self.max_bytes {
            tracing::debug!(url, bytes = bytes.len(), "Model larger than cache, not stored");
            return;
        }

        let mut entries = resilient_lock(&self.entries);
        entries.remove(url);
        while entries.bytes + bytes.len() > self.max_bytes {
            let Some(oldest) = entries.order.pop_front() else {
                break;
            };
            if let Some(evicted) = entries.map.remove(&oldest) {
                entries.bytes -= evicted.len();
                tracing::debug!(url = %oldest, "Evicted cached model");
            }
        }
        entries.bytes += bytes.len();
        entries.order.push_back(url.to_string());
        entries.map.insert(url.to_string(), bytes);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn bytes(n: usize) -> Arc<Vec<u8>> {
        Arc::new(vec![0u8; n])
    }

    #[test]
    fn test_put_and_get() {
        let cache = MemoryModelCache::default();
        assert!(cache.get("a").is_none());
        cache.put("a", bytes(10));
        assert_eq!(cache.get("a").map(|b| b.len()), Some(10));
        cache.put("a", bytes(4));
        assert_eq!(cache.size_bytes(), 4);
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn test_evicts_least_recently_used() {
        let cache = MemoryModelCache::new(20);
        cache.put("a", bytes(8));
        cache.put("b", bytes(8));
        cache.get("a");
        cache.put("c", bytes(8));

        assert!(cache.get("a").is_some());
        assert!(cache.get("b").is_none());
        assert!(cache.get("c").is_some());
        assert_eq!(cache.size_bytes(), 16);
    }

    #[test]
    fn test_oversized_entry_is_skipped() {
        let cache = MemoryModelCache::new(4);
        cache.put("big", bytes(5));
        assert!(cache.is_empty());
        cache.clear();
        assert_eq!(cache.size_bytes(), 0);
    }
}
