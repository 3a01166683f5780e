use std::sync::Arc;
use std::time::Duration;

use tracing::info;

use super::cache::{AsyncCache, AsyncCacheLoader, Cache, CacheKey, CacheLoader};
use super::clustered::{ClusterHub, ClusteredAsyncCache, ClusteredCache, NodeState};
use super::codec::ClusterValue;
use super::distributed_execution::DistributedExecutionMap;
use super::errors::CacheError;
use super::local::{LocalAsyncCache, LocalCache};
use super::replicated_map::{ReplicatedLock, ReplicatedMap};
use crate::common::{SystemTicker, Ticker};
use crate::config::ClusterConfig;

const NON_CLUSTERED_NODE_ID: &str = "local";

/// Membership of this process in a hub
#[derive(Clone)]
pub struct Membership {
    hub: Arc<ClusterHub>,
    node: Arc<NodeState>,
    ticker: Arc<dyn Ticker>,
}

impl Membership {
    fn join(hub: Arc<ClusterHub>, node_id: &str, ticker: Arc<dyn Ticker>) -> Result<Self, CacheError> {
        let node = hub.join(node_id)?;
        Ok(Self { hub, node, ticker })
    }

    pub fn hub(&self) -> &Arc<ClusterHub> {
        &self.hub
    }
}

/// Factory for caches and shared state, with or without a cluster.
///
/// Without a cluster, caches are plain local maps and the replicated and
/// distributed primitives run on a private single-member hub.
pub enum ClusterManager {
    NonClustered(Membership),
    Clustered(Membership),
}

impl ClusterManager {
    pub fn create(config: &ClusterConfig) -> Result<Self, CacheError> {
        if !config.enabled {
            return Ok(Self::non_clustered());
        }
        let hub = ClusterHub::new();
        for peer in &config.peer_node_ids {
            hub.join(peer)?;
        }
        let manager = Self::join(hub, &config.node_id)?;
        info!(
            "🌐 Cluster manager started as {} with {} peers",
            config.node_id,
            config.peer_node_ids.len()
        );
        Ok(manager)
    }

    pub fn non_clustered() -> Self {
        Self::non_clustered_with_ticker(Arc::new(SystemTicker::new()))
    }

    pub fn non_clustered_with_ticker(ticker: Arc<dyn Ticker>) -> Self {
        let (hub, node) = ClusterHub::single_member(NON_CLUSTERED_NODE_ID);
        Self::NonClustered(Membership { hub, node, ticker })
    }

    pub fn join(hub: Arc<ClusterHub>, node_id: &str) -> Result<Self, CacheError> {
        Self::join_with_ticker(hub, node_id, Arc::new(SystemTicker::new()))
    }

    pub fn join_with_ticker(hub: Arc<ClusterHub>, node_id: &str, ticker: Arc<dyn Ticker>) -> Result<Self, CacheError> {
        Ok(Self::Clustered(Membership::join(hub, node_id, ticker)?))
    }

    fn membership(&self) -> &Membership {
        match self {
            Self::NonClustered(membership) | Self::Clustered(membership) => membership,
        }
    }

    pub fn is_clustered(&self) -> bool {
        matches!(self, Self::Clustered(_))
    }

    pub fn node_id(&self) -> &str {
        self.membership().node.node_id()
    }

    pub fn create_cache<K, V>(
        &self,
        name: &str,
        loader: Arc<dyn CacheLoader<K, V>>,
    ) -> Result<Arc<dyn Cache<K, V>>, CacheError>
    where
        K: CacheKey,
        V: ClusterValue + Clone,
    {
        let cache: Arc<dyn Cache<K, V>> = match self {
            Self::NonClustered(_) => Arc::new(LocalCache::new(name, loader)),
            Self::Clustered(membership) => Arc::new(ClusteredCache::new(
                membership.hub.clone(),
                membership.node.clone(),
                name,
                loader,
            )?),
        };
        Ok(cache)
    }

    pub fn create_async_cache<K, V>(
        &self,
        name: &str,
        loader: Arc<dyn AsyncCacheLoader<K, V>>,
    ) -> Result<Arc<dyn AsyncCache<K, V>>, CacheError>
    where
        K: CacheKey,
        V: ClusterValue + Clone,
    {
        let cache: Arc<dyn AsyncCache<K, V>> = match self {
            Self::NonClustered(_) => Arc::new(LocalAsyncCache::new(name, loader)),
            Self::Clustered(membership) => Arc::new(ClusteredAsyncCache::new(
                membership.hub.clone(),
                membership.node.clone(),
                name,
                loader,
            )?),
        };
        Ok(cache)
    }

    pub fn create_replicated_map<K, V>(&self, name: &str, expiry: Duration) -> Result<ReplicatedMap<K, V>, CacheError>
    where
        K: CacheKey,
        V: ClusterValue,
    {
        let membership = self.membership();
        ReplicatedMap::new(
            membership.hub.clone(),
            membership.node.clone(),
            name,
            expiry,
            membership.ticker.clone(),
        )
    }

    /// Lease lock whose leases last `lease`
    pub fn create_lock(&self, name: &str, lease: Duration) -> Result<ReplicatedLock, CacheError> {
        let map = self.create_replicated_map(&format!("lock:{}", name), lease)?;
        Ok(ReplicatedLock::new(map, self.node_id()))
    }

    pub fn create_distributed_execution_map<K, V>(&self, name: &str) -> Result<DistributedExecutionMap<K, V>, CacheError>
    where
        K: CacheKey,
        V: Clone + Send + Sync + 'static,
    {
        let membership = self.membership();
        DistributedExecutionMap::new(membership.hub.clone(), membership.node.clone(), name)
    }

    pub fn stop(&self) {
        if let Self::Clustered(membership) = self {
            membership.hub.leave(membership.node.node_id());
        }
        info!("🛑 Cluster manager {} stopped", self.node_id());
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::*;
    use crate::common::FakeTicker;

    fn loader(counter: Arc<AtomicUsize>) -> Arc<dyn CacheLoader<String, i64>> {
        Arc::new(move |_: &String| -> Result<i64, CacheError> {
            Ok(counter.fetch_add(1, Ordering::SeqCst) as i64)
        })
    }

    #[test]
    fn test_disabled_config_is_non_clustered() {
        let manager = ClusterManager::create(&ClusterConfig::default()).unwrap();
        assert!(!manager.is_clustered());
        assert_eq!(manager.node_id(), "local");
    }

    #[test]
    fn test_enabled_config_joins_peers() {
        let config = ClusterConfig {
            enabled: true,
            node_id: "a".to_string(),
            peer_node_ids: vec!["b".to_string()],
            ..ClusterConfig::default()
        };
        let manager = ClusterManager::create(&config).unwrap();
        assert!(manager.is_clustered());
        let ClusterManager::Clustered(membership) = &manager else {
            panic!("expected a clustered manager");
        };
        assert_eq!(membership.hub().member_ids(), vec!["a".to_string(), "b".to_string()]);
        manager.stop();
        assert_eq!(membership.hub().member_ids(), vec!["b".to_string()]);
    }

    #[test]
    fn test_invalidate_then_reload_on_both_modes() {
        let hub = ClusterHub::new();
        let managers = [
            ClusterManager::non_clustered(),
            ClusterManager::join(hub, "a").unwrap(),
        ];
        for manager in &managers {
            let loads = Arc::new(AtomicUsize::new(0));
            let cache = manager.create_cache("gauge_names", loader(loads.clone())).unwrap();
            let key = "agent-1".to_string();
            assert_eq!(cache.get(&key).unwrap(), 0);
            assert_eq!(cache.get(&key).unwrap(), 0);
            cache.invalidate(&key).unwrap();
            assert_eq!(cache.get(&key).unwrap(), 1);
            assert_eq!(loads.load(Ordering::SeqCst), 2);
        }
    }

    #[test]
    fn test_lock_on_non_clustered_manager() {
        let ticker = FakeTicker::new(0);
        let manager = ClusterManager::non_clustered_with_ticker(Arc::new(ticker.clone()));
        let lock = manager.create_lock("purge", Duration::from_secs(30)).unwrap();
        assert!(lock.try_acquire("central").unwrap());
        assert!(!lock.try_acquire("central").unwrap());
        ticker.advance(Duration::from_secs(30).as_nanos() as i64);
        assert!(lock.try_acquire("central").unwrap());
    }
}
