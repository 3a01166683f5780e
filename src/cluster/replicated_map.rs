//! Expiring maps replicated to every member, and lease locks built on them.

use std::marker::PhantomData;
use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use tracing::{debug, warn};

use super::cache::CacheKey;
use super::clustered::{ClusterHub, NodeState};
use super::codec::ClusterValue;
use super::errors::CacheError;
use crate::common::Ticker;

#[derive(Debug, Clone)]
struct Replica {
    value: Vec<u8>,
    expires_at: i64,
}

type ReplicaStore<K> = DashMap<K, Replica>;

/// Writes go to the replica of every member; reads are served locally.
/// Entries older than the expiry are treated as absent.
pub struct ReplicatedMap<K, V> {
    resource: String,
    hub: Arc<ClusterHub>,
    node: Arc<NodeState>,
    local: Arc<ReplicaStore<K>>,
    expiry_nanos: i64,
    ticker: Arc<dyn Ticker>,
    _value: PhantomData<fn() -> V>,
}

impl<K: CacheKey, V: ClusterValue> ReplicatedMap<K, V> {
    pub fn new(
        hub: Arc<ClusterHub>,
        node: Arc<NodeState>,
        name: &str,
        expiry: Duration,
        ticker: Arc<dyn Ticker>,
    ) -> Result<Self, CacheError> {
        let resource = format!("map:{}", name);
        let local = node.resource(&resource, ReplicaStore::<K>::new)?;
        Ok(Self {
            resource,
            hub,
            node,
            local,
            expiry_nanos: expiry.as_nanos().min(i64::MAX as u128) as i64,
            ticker,
            _value: PhantomData,
        })
    }

    pub fn get(&self, key: &K) -> Result<Option<V>, CacheError> {
        let now = self.ticker.read();
        let replica = self.local.get(key).map(|replica| replica.value().clone());
        match replica {
            Some(replica) if replica.expires_at > now => Ok(Some(self.hub.codec().decode(&replica.value)?)),
            Some(_) => {
                self.local.remove(key);
                Ok(None)
            }
            None => Ok(None),
        }
    }

    pub fn contains_key(&self, key: &K) -> bool {
        let now = self.ticker.read();
        self.local
            .get(key)
            .map(|replica| replica.expires_at > now)
            .unwrap_or(false)
    }

    pub fn put(&self, key: &K, value: &V) -> Result<(), CacheError> {
        let replica = Replica {
            value: self.hub.codec().encode(value)?,
            expires_at: self.ticker.read().saturating_add(self.expiry_nanos),
        };
        self.replicate(key, |store, member_key| {
            store.insert(member_key, replica.clone());
        })
    }

    /// Put unless a live entry exists locally. Two members racing on the same
    /// key can both succeed.
    pub fn put_if_absent(&self, key: &K, value: &V) -> Result<bool, CacheError> {
        if self.contains_key(key) {
            return Ok(false);
        }
        self.put(key, value)?;
        Ok(true)
    }

    pub fn remove(&self, key: &K) -> Result<(), CacheError> {
        self.replicate(key, |store, member_key| {
            store.remove(&member_key);
        })
    }

    pub fn local_len(&self) -> usize {
        self.local.len()
    }

    fn replicate(&self, key: &K, apply: impl Fn(&ReplicaStore<K>, K)) -> Result<(), CacheError> {
        let encoded_key = self.hub.codec().encode(key)?;
        apply(&*self.local, key.clone());
        for peer in self.hub.peers(self.node.node_id()) {
            let store = match peer.resource(&self.resource, ReplicaStore::<K>::new) {
                Ok(store) => store,
                Err(error) => {
                    warn!("⚠️ Replica {} unavailable on {}: {}", self.resource, peer.node_id(), error);
                    continue;
                }
            };
            apply(&*store, self.hub.codec().decode(&encoded_key)?);
        }
        Ok(())
    }
}

/// Lease lock: held while its key is live in a replicated map.
///
/// Mutual exclusion is best effort; a lease ends at expiry or on release.
pub struct ReplicatedLock {
    map: ReplicatedMap<String, String>,
    owner: String,
}

impl ReplicatedLock {
    pub fn new(map: ReplicatedMap<String, String>, owner: &str) -> Self {
        Self {
            map,
            owner: owner.to_string(),
        }
    }

    pub fn try_acquire(&self, name: &str) -> Result<bool, CacheError> {
        let acquired = self.map.put_if_absent(&name.to_string(), &self.owner)?;
        if acquired {
            debug!("🔒 {} acquired lease {}", self.owner, name);
        }
        Ok(acquired)
    }

    pub fn is_held(&self, name: &str) -> bool {
        self.map.contains_key(&name.to_string())
    }

    pub fn holder(&self, name: &str) -> Result<Option<String>, CacheError> {
        self.map.get(&name.to_string())
    }

    /// Ends the lease if this member holds it
    pub fn release(&self, name: &str) -> Result<bool, CacheError> {
        let key = name.to_string();
        if self.map.get(&key)?.as_deref() != Some(self.owner.as_str()) {
            return Ok(false);
        }
        self.map.remove(&key)?;
        Ok(true)
    }
}
