//! Run a read-only task wherever a key's value lives.
//!
//! Values stay on the member that put them (an agent's connection, for
//! instance). `execute` sends the task to every member holding the key and
//! returns the first non-empty answer; answers cross back through the codec.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use futures::stream::{FuturesUnordered, StreamExt};
use tracing::{debug, warn};

use super::cache::CacheKey;
use super::clustered::{ClusterHub, NodeState};
use super::codec::ClusterValue;
use super::errors::CacheError;

type LocalValues<K, V> = DashMap<K, V>;

pub struct DistributedExecutionMap<K, V> {
    name: String,
    resource: String,
    hub: Arc<ClusterHub>,
    local: Arc<LocalValues<K, V>>,
}

impl<K, V> DistributedExecutionMap<K, V>
where
    K: CacheKey,
    V: Clone + Send + Sync + 'static,
{
    pub fn new(hub: Arc<ClusterHub>, node: Arc<NodeState>, name: &str) -> Result<Self, CacheError> {
        let resource = format!("exec:{}", name);
        let local = node.resource(&resource, LocalValues::<K, V>::new)?;
        Ok(Self {
            name: name.to_string(),
            resource,
            hub,
            local,
        })
    }

    /// Value held by this member
    pub fn get(&self, key: &K) -> Option<V> {
        self.local.get(key).map(|value| value.value().clone())
    }

    pub fn put(&self, key: K, value: V) {
        self.local.insert(key, value);
    }

    pub fn remove(&self, key: &K) {
        self.local.remove(key);
    }

    /// First non-empty answer among the members holding `key`.
    ///
    /// A member that fails is logged and skipped; the call fails only when
    /// every member holding the key failed, or nobody answered in time.
    pub async fn execute<R, F, Fut>(&self, key: &K, timeout: Duration, task: F) -> Result<Option<R>, CacheError>
    where
        R: ClusterValue,
        F: Fn(V) -> Fut + Clone + Send + 'static,
        Fut: Future<Output = Result<Option<R>, CacheError>> + Send + 'static,
    {
        let codec = self.hub.codec().clone();
        let encoded_key = codec.encode(key)?;
        let mut pending = FuturesUnordered::new();
        let mut abort_handles = Vec::new();
        for member in self.hub.members() {
            let Some(values) = member.existing::<LocalValues<K, V>>(&self.resource) else {
                continue;
            };
            let member_key: K = codec.decode(&encoded_key)?;
            let Some(value) = values.get(&member_key).map(|value| value.value().clone()) else {
                continue;
            };
            let task = task.clone();
            let codec = codec.clone();
            let node_id = member.node_id().to_string();
            let handle = tokio::spawn(async move {
                let answer = match task(value).await {
                    Ok(Some(answer)) => codec.encode(&answer).map(Some).map_err(CacheError::from),
                    Ok(None) => Ok(None),
                    Err(error) => Err(error),
                };
                (node_id, answer)
            });
            abort_handles.push(handle.abort_handle());
            pending.push(handle);
        }
        if pending.is_empty() {
            debug!("🔍 No member holds the key in {}", self.name);
            return Ok(None);
        }

        let holders = pending.len();
        let collect = async {
            let mut failures = Vec::new();
            while let Some(joined) = pending.next().await {
                match joined {
                    Ok((_, Ok(Some(bytes)))) => return Ok(Some(codec.decode::<R>(&bytes)?)),
                    Ok((_, Ok(None))) => {}
                    Ok((node_id, Err(error))) => {
                        warn!("⚠️ {} failed on {}: {}", self.name, node_id, error);
                        failures.push(format!("{}: {}", node_id, error));
                    }
                    Err(error) => {
                        warn!("⚠️ {} task aborted: {}", self.name, error);
                        failures.push(error.to_string());
                    }
                }
            }
            if failures.len() == holders {
                Err(CacheError::NoResponse(failures.join("; ")))
            } else {
                Ok(None)
            }
        };
        let result = match tokio::time::timeout(timeout, collect).await {
            Ok(result) => result,
            Err(_) => Err(CacheError::Timeout(timeout)),
        };
        // members still running after the first answer or the timeout
        for handle in abort_handles {
            handle.abort();
        }
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, Clone)]
    struct AgentConnection {
        agent_id: String,
        thread_dump: Option<String>,
        healthy: bool,
    }

    fn connection(agent_id: &str, thread_dump: Option<&str>, healthy: bool) -> AgentConnection {
        AgentConnection {
            agent_id: agent_id.to_string(),
            thread_dump: thread_dump.map(str::to_string),
            healthy,
        }
    }

    async fn thread_dump(connection: AgentConnection) -> Result<Option<String>, CacheError> {
        if !connection.healthy {
            return Err(CacheError::Loader(format!("{} disconnected", connection.agent_id)));
        }
        Ok(connection.thread_dump)
    }

    type ConnectionMap = DistributedExecutionMap<String, AgentConnection>;

    fn maps(hub: &Arc<ClusterHub>) -> (ConnectionMap, ConnectionMap) {
        let a = hub.join("a").unwrap();
        let b = hub.join("b").unwrap();
        (
            DistributedExecutionMap::new(hub.clone(), a, "agent_connections").unwrap(),
            DistributedExecutionMap::new(hub.clone(), b, "agent_connections").unwrap(),
        )
    }

    #[tokio::test]
    async fn test_runs_where_value_lives() {
        let hub = ClusterHub::new();
        let (map_a, map_b) = maps(&hub);
        map_b.put("agent-1".to_string(), connection("agent-1", Some("main: RUNNABLE"), true));

        let answer = map_a
            .execute(&"agent-1".to_string(), Duration::from_secs(5), thread_dump)
            .await
            .unwrap();
        assert_eq!(answer.as_deref(), Some("main: RUNNABLE"));
        assert!(map_a.get(&"agent-1".to_string()).is_none());
    }

    #[tokio::test]
    async fn test_single_failure_tolerated() {
        let hub = ClusterHub::new();
        let (map_a, map_b) = maps(&hub);
        map_a.put("agent-1".to_string(), connection("agent-1", None, false));
        map_b.put("agent-1".to_string(), connection("agent-1", Some("dump"), true));

        let answer = map_a
            .execute(&"agent-1".to_string(), Duration::from_secs(5), thread_dump)
            .await
            .unwrap();
        assert_eq!(answer.as_deref(), Some("dump"));
    }

    #[tokio::test]
    async fn test_all_failures_reported() {
        let hub = ClusterHub::new();
        let (map_a, map_b) = maps(&hub);
        map_a.put("agent-1".to_string(), connection("agent-1", None, false));
        map_b.put("agent-1".to_string(), connection("agent-1", None, false));

        let result = map_a
            .execute(&"agent-1".to_string(), Duration::from_secs(5), thread_dump)
            .await;
        assert!(matches!(result, Err(CacheError::NoResponse(_))));
    }

    #[tokio::test]
    async fn test_missing_key_is_empty() {
        let hub = ClusterHub::new();
        let (map_a, _map_b) = maps(&hub);
        let answer = map_a
            .execute(&"agent-9".to_string(), Duration::from_secs(5), thread_dump)
            .await
            .unwrap();
        assert!(answer.is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_slow_member_times_out() {
        let hub = ClusterHub::new();
        let (map_a, _map_b) = maps(&hub);
        map_a.put("agent-1".to_string(), connection("agent-1", Some("late"), true));

        let result = map_a
            .execute(&"agent-1".to_string(), Duration::from_secs(1), |connection: AgentConnection| async move {
                tokio::time::sleep(Duration::from_secs(10)).await;
                Ok::<_, CacheError>(connection.thread_dump)
            })
            .await;
        assert!(matches!(result, Err(CacheError::Timeout(_))));
    }

    #[tokio::test(start_paused = true)]
    async fn test_timed_out_members_are_aborted() {
        let hub = ClusterHub::new();
        let (map_a, _map_b) = maps(&hub);
        map_a.put("agent-1".to_string(), connection("agent-1", Some("late"), true));
        let finished = Arc::new(std::sync::atomic::AtomicBool::new(false));

        let task_finished = finished.clone();
        let result = map_a
            .execute(&"agent-1".to_string(), Duration::from_secs(1), move |connection: AgentConnection| {
                let task_finished = task_finished.clone();
                async move {
                    tokio::time::sleep(Duration::from_secs(10)).await;
                    task_finished.store(true, std::sync::atomic::Ordering::SeqCst);
                    Ok::<_, CacheError>(connection.thread_dump)
                }
            })
            .await;
        assert!(matches!(result, Err(CacheError::Timeout(_))));

        tokio::time::sleep(Duration::from_secs(20)).await;
        assert!(!finished.load(std::sync::atomic::Ordering::SeqCst));
    }
}
