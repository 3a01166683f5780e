//! Caches and shared state for one collector or a cluster of collectors.

pub mod cache;
pub mod clustered;
pub mod codec;
pub mod distributed_execution;
pub mod errors;
pub mod local;
pub mod manager;
pub mod replicated_map;

pub use cache::{AsyncCache, AsyncCacheLoader, AsyncLoaderFn, Cache, CacheKey, CacheLoader};
pub use clustered::{ClusterHub, ClusteredAsyncCache, ClusteredCache, NodeState};
pub use codec::{ClusterValue, WireCodec, DEFAULT_ALLOWED_TYPES};
pub use distributed_execution::DistributedExecutionMap;
pub use errors::{CacheError, CodecError};
pub use local::{LocalAsyncCache, LocalCache};
pub use manager::{ClusterManager, Membership};
pub use replicated_map::{ReplicatedLock, ReplicatedMap};
