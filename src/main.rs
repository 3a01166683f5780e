use std::sync::Arc;

use apm_collector::aggregate::{create_aggregate_tables, AggregateActor, AggregateAsk, AggregateReply};
use apm_collector::cluster::{AsyncCache, AsyncCacheLoader, AsyncLoaderFn, CacheError, ClusterManager};
use apm_collector::config::CollectorConfig;
use apm_collector::logging::{cleanup_old_logs, init_dual_logging, log_system_info};
use apm_collector::metrics::init_metrics;
use apm_collector::metrics_server::{start_metrics_server, NodeStatus};
use apm_collector::storage::{Session, StorageDriver};
use kameo::actor::ActorRef;
use tokio::time::Duration;
use tracing::{error, info, warn};

#[cfg(feature = "scylla")]
async fn connect_driver(config: &CollectorConfig) -> Result<Arc<dyn StorageDriver>, Box<dyn std::error::Error + Send + Sync>> {
    let driver = apm_collector::storage::ScyllaDriver::connect(&config.storage.contact_points).await?;
    Ok(Arc::new(driver))
}

#[cfg(not(feature = "scylla"))]
async fn connect_driver(_config: &CollectorConfig) -> Result<Arc<dyn StorageDriver>, Box<dyn std::error::Error + Send + Sync>> {
    warn!("⚠️ Built without the scylla feature, writes go to the in-memory driver");
    Ok(Arc::new(apm_collector::storage::RecordingDriver::new()))
}

/// Start of the window a flush at `now_millis` closes
fn capture_time(now_millis: i64, flush_interval_seconds: u64) -> i64 {
    let interval_millis = (flush_interval_seconds as i64 * 1000).max(1);
    now_millis - now_millis.rem_euclid(interval_millis)
}

/// Full query texts looked up by sha, shared across collector nodes
fn full_query_text_cache(
    cluster: &ClusterManager,
    aggregate_actor: ActorRef<AggregateActor>,
) -> Result<Arc<dyn AsyncCache<String, String>>, CacheError> {
    let loader: Arc<dyn AsyncCacheLoader<String, String>> = Arc::new(AsyncLoaderFn(move |sha: String| {
        let aggregate_actor = aggregate_actor.clone();
        async move {
            match aggregate_actor
                .ask(AggregateAsk::GetFullQueryText { sha: sha.clone() })
                .await
            {
                Ok(AggregateReply::FullQueryText(Some(text))) => Ok(text),
                Ok(_) => Err(CacheError::Loader(format!("no full query text for {}", sha))),
                Err(e) => Err(CacheError::Loader(e.to_string())),
            }
        }
    }));
    cluster.create_async_cache("full_query_text", loader)
}

async fn run_flush_loop(aggregate_actor: ActorRef<AggregateActor>, flush_interval_seconds: u64) {
    let mut ticker = tokio::time::interval(Duration::from_secs(flush_interval_seconds));
    // first tick completes immediately
    ticker.tick().await;
    loop {
        ticker.tick().await;
        let capture_time = capture_time(chrono::Utc::now().timestamp_millis(), flush_interval_seconds);
        match aggregate_actor.ask(AggregateAsk::Flush { capture_time }).await {
            Ok(AggregateReply::Flushed(summary)) => {
                info!(
                    capture_time,
                    agent_rollups = summary.agent_rollups,
                    skipped = summary.skipped_agent_rollups,
                    statements = summary.statements,
                    "💾 Aggregate window flushed"
                );
            }
            Ok(other) => warn!("⚠️ Unexpected flush reply: {:?}", other),
            Err(e) => error!("❌ Aggregate flush failed: {}", e),
        }
    }
}

#[tokio::main]
async fn main() {
    let config = match CollectorConfig::load("config.toml") {
        Ok(config) => {
            println!("✅ Loaded configuration from config.toml");
            config
        }
        Err(e) => {
            println!("⚠️ Failed to load config.toml: {}. Using default configuration", e);
            CollectorConfig::default()
        }
    };

    let _logging_guard = match init_dual_logging(config.logging.clone()) {
        Ok(guard) => Some(guard),
        Err(e) => {
            eprintln!("❌ Failed to initialize logging system: {}", e);
            tracing_subscriber::fmt()
                .with_env_filter("info,apm_collector=info")
                .init();
            error!("⚠️ Using fallback console-only logging due to error: {}", e);
            None
        }
    };

    if let Err(e) = cleanup_old_logs(&config.logging.log_dir, config.logging.cleanup_days) {
        warn!("⚠️ Failed to clean up old log files: {}", e);
    }
    log_system_info();

    info!(
        keyspace = %config.storage.keyspace,
        max_concurrent_requests = config.storage.max_concurrent_requests,
        clustered = config.cluster.enabled,
        node_id = %config.cluster.node_id,
        flush_interval_seconds = config.aggregation.flush_interval_seconds,
        "🔧 Collector configuration"
    );

    if let Err(e) = init_metrics() {
        error!("❌ Failed to initialize metrics: {}", e);
        return;
    }

    let cluster = match ClusterManager::create(&config.cluster) {
        Ok(cluster) => cluster,
        Err(e) => {
            error!("❌ Failed to start cluster manager: {}", e);
            return;
        }
    };

    let driver = match connect_driver(&config).await {
        Ok(driver) => driver,
        Err(e) => {
            error!("❌ Failed to connect to storage: {}", e);
            cluster.stop();
            return;
        }
    };
    let session = Session::new(driver, &config.storage);

    if let Err(e) = session
        .create_keyspace_if_not_exists(config.storage.replication_factor)
        .await
    {
        error!("❌ Failed to create keyspace {}: {}", config.storage.keyspace, e);
        cluster.stop();
        return;
    }
    if let Err(e) = create_aggregate_tables(&session, config.storage.aggregate_expiration_hours).await {
        error!("❌ Failed to create aggregate tables: {}", e);
        cluster.stop();
        return;
    }

    let aggregate_actor = kameo::spawn(AggregateActor::new(
        session.clone(),
        config.aggregation.interval_limits(),
    ));

    let query_text_cache = match full_query_text_cache(&cluster, aggregate_actor.clone()) {
        Ok(cache) => cache,
        Err(e) => {
            error!("❌ Failed to create query text cache: {}", e);
            cluster.stop();
            return;
        }
    };
    info!("🗂️ Cache {} ready", query_text_cache.name());

    tokio::spawn(run_flush_loop(
        aggregate_actor.clone(),
        config.aggregation.flush_interval_seconds,
    ));

    if config.metrics.enabled {
        let status = NodeStatus {
            node_id: cluster.node_id().to_string(),
            clustered: cluster.is_clustered(),
        };
        tokio::spawn(start_metrics_server(config.metrics.port, status));
    }

    info!("🚀 Collector running, press Ctrl+C to stop");
    if let Err(e) = tokio::signal::ctrl_c().await {
        error!("❌ Failed to listen for shutdown signal: {}", e);
    }
    info!("🛑 Shutdown signal received");

    let capture_time = capture_time(
        chrono::Utc::now().timestamp_millis(),
        config.aggregation.flush_interval_seconds,
    );
    if let Err(e) = aggregate_actor.ask(AggregateAsk::Flush { capture_time }).await {
        warn!("⚠️ Final flush failed: {}", e);
    }
    if let Err(e) = aggregate_actor.stop_gracefully().await {
        warn!("⚠️ Aggregate actor did not stop cleanly: {}", e);
    }
    session.close();
    cluster.stop();
    info!("🏁 Graceful shutdown completed");
}
