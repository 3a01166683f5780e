//! Caches of a collector running without a cluster: one map per cache, last
//! write wins.

use std::sync::Arc;

use async_trait::async_trait;
use dashmap::DashMap;
use tracing::debug;

use super::cache::{AsyncCache, AsyncCacheLoader, Cache, CacheKey, CacheLoader};
use super::errors::CacheError;
use crate::{record_cache_invalidation, record_cache_load, record_cache_request};

pub struct LocalCache<K, V> {
    name: String,
    entries: DashMap<K, V>,
    loader: Arc<dyn CacheLoader<K, V>>,
}

impl<K: CacheKey, V: Clone + Send + Sync> LocalCache<K, V> {
    pub fn new(name: &str, loader: Arc<dyn CacheLoader<K, V>>) -> Self {
        Self {
            name: name.to_string(),
            entries: DashMap::new(),
            loader,
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl<K: CacheKey, V: Clone + Send + Sync> Cache<K, V> for LocalCache<K, V> {
    fn name(&self) -> &str {
        &self.name
    }

    fn get(&self, key: &K) -> Result<V, CacheError> {
        if let Some(value) = self.entries.get(key) {
            record_cache_request!(&self.name, true);
            return Ok(value.value().clone());
        }
        record_cache_request!(&self.name, false);
        let loaded = self.loader.load(key);
        record_cache_load!(&self.name, loaded.is_ok());
        let value = loaded?;
        self.entries.insert(key.clone(), value.clone());
        Ok(value)
    }

    fn invalidate(&self, key: &K) -> Result<(), CacheError> {
        if self.entries.remove(key).is_some() {
            debug!("🧹 Invalidated entry in cache {}", self.name);
        }
        record_cache_invalidation!(&self.name);
        Ok(())
    }
}

pub struct LocalAsyncCache<K, V> {
    name: String,
    entries: DashMap<K, V>,
    loader: Arc<dyn AsyncCacheLoader<K, V>>,
}

impl<K: CacheKey, V: Clone + Send + Sync> LocalAsyncCache<K, V> {
    pub fn new(name: &str, loader: Arc<dyn AsyncCacheLoader<K, V>>) -> Self {
        Self {
            name: name.to_string(),
            entries: DashMap::new(),
            loader,
        }
    }
}

#[async_trait]
impl<K: CacheKey, V: Clone + Send + Sync> AsyncCache<K, V> for LocalAsyncCache<K, V> {
    fn name(&self) -> &str {
        &self.name
    }

    async fn get(&self, key: &K) -> Result<V, CacheError> {
        let cached = self.entries.get(key).map(|value| value.value().clone());
        if let Some(value) = cached {
            record_cache_request!(&self.name, true);
            return Ok(value);
        }
        record_cache_request!(&self.name, false);
        let loaded = self.loader.load(key).await;
        record_cache_load!(&self.name, loaded.is_ok());
        let value = loaded?;
        self.entries.insert(key.clone(), value.clone());
        Ok(value)
    }

    fn invalidate(&self, key: &K) -> Result<(), CacheError> {
        self.entries.remove(key);
        record_cache_invalidation!(&self.name);
        Ok(())
    }
}
