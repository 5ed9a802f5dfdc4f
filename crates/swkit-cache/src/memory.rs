//! In-memory cache storage.

use hashbrown::HashMap;
use tokio::sync::RwLock;
use tracing::trace;

use crate::{CacheEntry, CacheError, CacheStore, RequestKey};

/// A cache instance.
#[derive(Debug, Default)]
struct Cache {
    entries: HashMap<RequestKey, CacheEntry>,
}

/// Cache storage held in process memory.
#[derive(Debug, Default)]
pub struct MemoryCacheStorage {
    caches: RwLock<HashMap<String, Cache>>,
}

impl MemoryCacheStorage {
    /// Create new cache storage.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of entries in a cache, `None` if it does not exist.
    pub async fn len(&self, name: &str) -> Option<usize> {
        self.caches.read().await.get(name).map(|c| c.entries.len())
    }
}

impl CacheStore for MemoryCacheStorage {
    async fn open(&self, name: &str) -> Result<(), CacheError> {
        self.caches
            .write()
            .await
            .entry(name.to_string())
            .or_default();
        Ok(())
    }

    async fn has(&self, name: &str) -> Result<bool, CacheError> {
        Ok(self.caches.read().await.contains_key(name))
    }

    async fn get(&self, name: &str, key: &RequestKey) -> Result<Option<CacheEntry>, CacheError> {
        let caches = self.caches.read().await;
        Ok(caches.get(name).and_then(|c| c.entries.get(key)).cloned())
    }

    async fn put(&self, name: &str, entry: CacheEntry) -> Result<(), CacheError> {
        if !entry.key.is_storable() {
            return Err(CacheError::Unsupported(entry.key.to_string()));
        }
        trace!(cache = name, key = %entry.key, "Cache put");
        self.caches
            .write()
            .await
            .entry(name.to_string())
            .or_default()
            .entries
            .insert(entry.key.clone(), entry);
        Ok(())
    }

    async fn delete(&self, name: &str) -> Result<bool, CacheError> {
        Ok(self.caches.write().await.remove(name).is_some())
    }

    async fn keys(&self) -> Result<Vec<String>, CacheError> {
        let mut names: Vec<String> = self.caches.read().await.keys().cloned().collect();
        names.sort();
        Ok(names)
    }

    async fn entry_keys(&self, name: &str) -> Result<Vec<RequestKey>, CacheError> {
        let caches = self.caches.read().await;
        Ok(caches
            .get(name)
            .map(|c| c.entries.keys().cloned().collect())
            .unwrap_or_default())
    }
}
