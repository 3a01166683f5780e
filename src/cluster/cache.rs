//! Read-through caches.
//!
//! `get` loads on a miss and keeps the result; `invalidate` removes the key
//! from every copy. Concurrent misses on one key may each run the loader, and
//! a load that started before an `invalidate` can still store its stale result.

use std::future::Future;
use std::hash::Hash;

use async_trait::async_trait;

use super::codec::ClusterValue;
use super::errors::CacheError;

/// Bounds shared by every cache key
pub trait CacheKey: ClusterValue + Eq + Hash + Clone {}

impl<T: ClusterValue + Eq + Hash + Clone> CacheKey for T {}

pub trait CacheLoader<K, V>: Send + Sync {
    fn load(&self, key: &K) -> Result<V, CacheError>;
}

impl<K, V, F> CacheLoader<K, V> for F
where
    F: Fn(&K) -> Result<V, CacheError> + Send + Sync,
{
    fn load(&self, key: &K) -> Result<V, CacheError> {
        self(key)
    }
}

#[async_trait]
pub trait AsyncCacheLoader<K, V>: Send + Sync {
    async fn load(&self, key: &K) -> Result<V, CacheError>;
}

/// Adapter turning an async closure into an `AsyncCacheLoader`
pub struct AsyncLoaderFn<F>(pub F);

#[async_trait]
impl<K, V, F, Fut> AsyncCacheLoader<K, V> for AsyncLoaderFn<F>
where
    K: Clone + Send + Sync + 'static,
    V: Send + 'static,
    F: Fn(K) -> Fut + Send + Sync,
    Fut: Future<Output = Result<V, CacheError>> + Send,
{
    async fn load(&self, key: &K) -> Result<V, CacheError> {
        (self.0)(key.clone()).await
    }
}

pub trait Cache<K, V>: Send + Sync {
    fn name(&self) -> &str;
    fn get(&self, key: &K) -> Result<V, CacheError>;
    fn invalidate(&self, key: &K) -> Result<(), CacheError>;
}

#[async_trait]
pub trait AsyncCache<K, V>: Send + Sync {
    fn name(&self) -> &str;
    async fn get(&self, key: &K) -> Result<V, CacheError>;
    fn invalidate(&self, key: &K) -> Result<(), CacheError>;
}
