//! In-process cluster membership and invalidation-mode caches.
//!
//! Every member keeps its own copy of each cache; a copy only ever holds what
//! that member loaded itself. `invalidate` removes the key locally and
//! broadcasts it to every other member. Keys and values always go through the
//! hub's `WireCodec` when stored or sent.

use std::any::Any;
use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use dashmap::DashMap;
use parking_lot::RwLock;
use tracing::{debug, info, warn};

use super::cache::{AsyncCache, AsyncCacheLoader, Cache, CacheKey, CacheLoader};
use super::codec::{ClusterValue, WireCodec};
use super::errors::CacheError;
use crate::{record_cache_invalidation, record_cache_load, record_cache_request};

type Resource = Arc<dyn Any + Send + Sync>;

/// One member: the named resources (cache copies, map replicas, execution
/// stores) it holds
pub struct NodeState {
    node_id: String,
    resources: DashMap<String, Resource>,
}

impl NodeState {
    fn new(node_id: &str) -> Self {
        Self {
            node_id: node_id.to_string(),
            resources: DashMap::new(),
        }
    }

    pub fn node_id(&self) -> &str {
        &self.node_id
    }

    pub fn resource_count(&self) -> usize {
        self.resources.len()
    }

    pub(crate) fn resource<T, F>(&self, name: &str, create: F) -> Result<Arc<T>, CacheError>
    where
        T: Any + Send + Sync,
        F: FnOnce() -> T,
    {
        let resource = self
            .resources
            .entry(name.to_string())
            .or_insert_with(|| Arc::new(create()) as Resource)
            .value()
            .clone();
        resource
            .downcast::<T>()
            .map_err(|_| CacheError::TypeMismatch(name.to_string()))
    }

    pub(crate) fn existing<T: Any + Send + Sync>(&self, name: &str) -> Option<Arc<T>> {
        let resource = self.resources.get(name)?.value().clone();
        resource.downcast::<T>().ok()
    }
}

/// Members of one cluster living in this process
pub struct ClusterHub {
    codec: WireCodec,
    members: RwLock<BTreeMap<String, Arc<NodeState>>>,
}

impl ClusterHub {
    pub fn new() -> Arc<Self> {
        Self::with_codec(WireCodec::default())
    }

    pub fn with_codec(codec: WireCodec) -> Arc<Self> {
        Arc::new(Self {
            codec,
            members: RwLock::new(BTreeMap::new()),
        })
    }

    /// Hub whose only member is `node_id`
    pub(crate) fn single_member(node_id: &str) -> (Arc<Self>, Arc<NodeState>) {
        let node = Arc::new(NodeState::new(node_id));
        let mut members = BTreeMap::new();
        members.insert(node_id.to_string(), node.clone());
        let hub = Arc::new(Self {
            codec: WireCodec::default(),
            members: RwLock::new(members),
        });
        (hub, node)
    }

    pub fn codec(&self) -> &WireCodec {
        &self.codec
    }

    pub fn join(&self, node_id: &str) -> Result<Arc<NodeState>, CacheError> {
        let mut members = self.members.write();
        if members.contains_key(node_id) {
            return Err(CacheError::DuplicateNode(node_id.to_string()));
        }
        let node = Arc::new(NodeState::new(node_id));
        members.insert(node_id.to_string(), node.clone());
        info!("🤝 Node {} joined the cluster ({} members)", node_id, members.len());
        Ok(node)
    }

    pub fn leave(&self, node_id: &str) {
        if self.members.write().remove(node_id).is_some() {
            info!("👋 Node {} left the cluster", node_id);
        }
    }

    pub fn member_ids(&self) -> Vec<String> {
        self.members.read().keys().cloned().collect()
    }

    pub(crate) fn members(&self) -> Vec<Arc<NodeState>> {
        self.members.read().values().cloned().collect()
    }

    pub(crate) fn peers(&self, node_id: &str) -> Vec<Arc<NodeState>> {
        self.members
            .read()
            .values()
            .filter(|member| member.node_id != node_id)
            .cloned()
            .collect()
    }
}

/// One member's copy of a cache: encoded values by key
type CacheCopy<K> = DashMap<K, Vec<u8>>;

fn cache_resource(name: &str) -> String {
    format!("cache:{}", name)
}

struct ClusteredCopy<K> {
    name: String,
    resource: String,
    hub: Arc<ClusterHub>,
    node: Arc<NodeState>,
    copy: Arc<CacheCopy<K>>,
}

impl<K: CacheKey> ClusteredCopy<K> {
    fn new(hub: Arc<ClusterHub>, node: Arc<NodeState>, name: &str) -> Result<Self, CacheError> {
        let resource = cache_resource(name);
        let copy = node.resource(&resource, CacheCopy::<K>::new)?;
        Ok(Self {
            name: name.to_string(),
            resource,
            hub,
            node,
            copy,
        })
    }

    fn cached<V: ClusterValue>(&self, key: &K) -> Result<Option<V>, CacheError> {
        let encoded = self.copy.get(key).map(|value| value.value().clone());
        match encoded {
            Some(bytes) => {
                record_cache_request!(&self.name, true);
                Ok(Some(self.hub.codec().decode(&bytes)?))
            }
            None => {
                record_cache_request!(&self.name, false);
                Ok(None)
            }
        }
    }

    // An invalidation that reaches this member while the loader runs is
    // overwritten by this insert, leaving a stale entry until the next
    // invalidation of the key.
    fn store<V: ClusterValue>(&self, key: &K, value: &V) -> Result<(), CacheError> {
        let bytes = self.hub.codec().encode(value)?;
        self.copy.insert(key.clone(), bytes);
        Ok(())
    }

    fn invalidate(&self, key: &K) -> Result<(), CacheError> {
        self.copy.remove(key);
        record_cache_invalidation!(&self.name);
        let encoded_key = self.hub.codec().encode(key)?;
        let mut reached = 0;
        for peer in self.hub.peers(self.node.node_id()) {
            let Some(peer_copy) = peer.existing::<CacheCopy<K>>(&self.resource) else {
                continue;
            };
            match self.hub.codec().decode::<K>(&encoded_key) {
                Ok(peer_key) => {
                    peer_copy.remove(&peer_key);
                    reached += 1;
                }
                Err(error) => warn!("⚠️ Dropped invalidation for {} on {}: {}", self.name, peer.node_id(), error),
            }
        }
        debug!("📣 Invalidation of {} broadcast to {} peers", self.name, reached);
        Ok(())
    }
}

pub struct ClusteredCache<K, V> {
    copy: ClusteredCopy<K>,
    loader: Arc<dyn CacheLoader<K, V>>,
}

impl<K: CacheKey, V: ClusterValue> ClusteredCache<K, V> {
    pub fn new(
        hub: Arc<ClusterHub>,
        node: Arc<NodeState>,
        name: &str,
        loader: Arc<dyn CacheLoader<K, V>>,
    ) -> Result<Self, CacheError> {
        Ok(Self {
            copy: ClusteredCopy::new(hub, node, name)?,
            loader,
        })
    }

    pub fn local_len(&self) -> usize {
        self.copy.copy.len()
    }
}

impl<K: CacheKey, V: ClusterValue> Cache<K, V> for ClusteredCache<K, V> {
    fn name(&self) -> &str {
        &self.copy.name
    }

    fn get(&self, key: &K) -> Result<V, CacheError> {
        if let Some(value) = self.copy.cached(key)? {
            return Ok(value);
        }
        let loaded = self.loader.load(key);
        record_cache_load!(&self.copy.name, loaded.is_ok());
        let value = loaded?;
        self.copy.store(key, &value)?;
        Ok(value)
    }

    fn invalidate(&self, key: &K) -> Result<(), CacheError> {
        self.copy.invalidate(key)
    }
}

pub struct ClusteredAsyncCache<K, V> {
    copy: ClusteredCopy<K>,
    loader: Arc<dyn AsyncCacheLoader<K, V>>,
}

impl<K: CacheKey, V: ClusterValue> ClusteredAsyncCache<K, V> {
    pub fn new(
        hub: Arc<ClusterHub>,
        node: Arc<NodeState>,
        name: &str,
        loader: Arc<dyn AsyncCacheLoader<K, V>>,
    ) -> Result<Self, CacheError> {
        Ok(Self {
            copy: ClusteredCopy::new(hub, node, name)?,
            loader,
        })
    }
}

#[async_trait]
impl<K: CacheKey, V: ClusterValue> AsyncCache<K, V> for ClusteredAsyncCache<K, V> {
    fn name(&self) -> &str {
        &self.copy.name
    }

    async fn get(&self, key: &K) -> Result<V, CacheError> {
        if let Some(value) = self.copy.cached(key)? {
            return Ok(value);
        }
        let loaded = self.loader.load(key).await;
        record_cache_load!(&self.copy.name, loaded.is_ok());
        let value = loaded?;
        self.copy.store(key, &value)?;
        Ok(value)
    }

    fn invalidate(&self, key: &K) -> Result<(), CacheError> {
        self.copy.invalidate(key)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::*;

    fn loader(counter: Arc<AtomicUsize>) -> Arc<dyn CacheLoader<String, String>> {
        Arc::new(move |key: &String| -> Result<String, CacheError> {
            let generation = counter.fetch_add(1, Ordering::SeqCst);
            Ok(format!("{}@{}", key, generation))
        })
    }

    #[test]
    fn test_duplicate_member_rejected() {
        let hub = ClusterHub::new();
        hub.join("a").unwrap();
        assert!(matches!(hub.join("a"), Err(CacheError::DuplicateNode(_))));
        hub.leave("a");
        assert!(hub.join("a").is_ok());
    }

    #[test]
    fn test_invalidation_reaches_every_member() {
        let hub = ClusterHub::new();
        let loads = Arc::new(AtomicUsize::new(0));
        let node_a = hub.join("a").unwrap();
        let node_b = hub.join("b").unwrap();
        let cache_a = ClusteredCache::new(hub.clone(), node_a, "agent_config", loader(loads.clone())).unwrap();
        let cache_b = ClusteredCache::new(hub.clone(), node_b, "agent_config", loader(loads.clone())).unwrap();
        let key = "agent-1".to_string();

        assert_eq!(cache_a.get(&key).unwrap(), "agent-1@0");
        assert_eq!(cache_b.get(&key).unwrap(), "agent-1@1");
        assert_eq!(cache_b.get(&key).unwrap(), "agent-1@1");

        cache_a.invalidate(&key).unwrap();
        assert_eq!(cache_b.local_len(), 0);
        assert_eq!(cache_b.get(&key).unwrap(), "agent-1@2");
        assert_eq!(cache_a.get(&key).unwrap(), "agent-1@3");
        assert_eq!(loads.load(Ordering::SeqCst), 4);
    }

    #[test]
    fn test_same_name_with_other_types_rejected() {
        let hub = ClusterHub::new();
        let node = hub.join("a").unwrap();
        let loads = Arc::new(AtomicUsize::new(0));
        ClusteredCache::new(hub.clone(), node.clone(), "shared", loader(loads)).unwrap();
        let other: Arc<dyn CacheLoader<i64, String>> =
            Arc::new(|key: &i64| -> Result<String, CacheError> { Ok(key.to_string()) });
        assert!(matches!(
            ClusteredCache::new(hub, node, "shared", other),
            Err(CacheError::TypeMismatch(_))
        ));
    }
}
