//! `config.toml` layout. Every field has a default, so an empty file is valid.

use std::path::Path;

use serde::Deserialize;
use thiserror::Error;
use tracing::info;

use crate::aggregate::IntervalLimits;
use crate::common::constants::*;
use crate::logging::LoggingConfig;
use crate::storage::Consistency;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to parse config file: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    pub contact_points: Vec<String>,
    pub keyspace: String,
    pub replication_factor: u32,
    pub max_concurrent_requests: usize,
    pub read_consistency: Consistency,
    pub write_consistency: Consistency,
    /// Above the cluster's 3 hour hint window
    pub gc_grace_seconds: u64,
    pub schema_retry_timeout_seconds: u64,
    pub schema_retry_interval_millis: u64,
    /// Expiration of aggregate rows, drives the compaction window size
    pub aggregate_expiration_hours: u32,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            contact_points: vec!["127.0.0.1:9042".to_string()],
            keyspace: "apm".to_string(),
            replication_factor: 1,
            max_concurrent_requests: DEFAULT_MAX_CONCURRENT_REQUESTS,
            read_consistency: Consistency::LocalOne,
            write_consistency: Consistency::LocalQuorum,
            gc_grace_seconds: DEFAULT_GC_GRACE_SECONDS,
            schema_retry_timeout_seconds: DEFAULT_SCHEMA_RETRY_TIMEOUT_SECONDS,
            schema_retry_interval_millis: DEFAULT_SCHEMA_RETRY_INTERVAL_MILLIS,
            aggregate_expiration_hours: 30 * 24,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct AggregationConfig {
    pub max_query_aggregates: usize,
    pub max_service_call_aggregates: usize,
    pub hard_limit_multiplier_while_building: usize,
    pub query_text_truncate: usize,
    pub throwable_frame_limit: usize,
    pub profile_sample_limit: usize,
    pub flush_interval_seconds: u64,
}

impl Default for AggregationConfig {
    fn default() -> Self {
        Self {
            max_query_aggregates: DEFAULT_MAX_QUERY_AGGREGATES,
            max_service_call_aggregates: DEFAULT_MAX_SERVICE_CALL_AGGREGATES,
            hard_limit_multiplier_while_building: DEFAULT_HARD_LIMIT_MULTIPLIER,
            query_text_truncate: DEFAULT_QUERY_TEXT_TRUNCATE,
            throwable_frame_limit: DEFAULT_THROWABLE_FRAME_LIMIT,
            profile_sample_limit: DEFAULT_PROFILE_SAMPLE_LIMIT,
            flush_interval_seconds: 60,
        }
    }
}

impl AggregationConfig {
    pub fn interval_limits(&self) -> IntervalLimits {
        IntervalLimits {
            max_query_aggregates: self.max_query_aggregates,
            max_service_call_aggregates: self.max_service_call_aggregates,
            hard_limit_multiplier_while_building: self.hard_limit_multiplier_while_building,
            query_text_truncate: self.query_text_truncate,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct ClusterConfig {
    pub enabled: bool,
    pub node_id: String,
    /// Members started alongside this node in the same process
    pub peer_node_ids: Vec<String>,
    pub distributed_execution_timeout_seconds: u64,
}

impl Default for ClusterConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            node_id: "collector-1".to_string(),
            peer_node_ids: Vec::new(),
            distributed_execution_timeout_seconds: DEFAULT_DISTRIBUTED_EXECUTION_TIMEOUT_SECONDS,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct MetricsConfig {
    pub enabled: bool,
    pub port: u16,
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            port: DEFAULT_METRICS_PORT,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default)]
pub struct CollectorConfig {
    pub storage: StorageConfig,
    pub aggregation: AggregationConfig,
    pub cluster: ClusterConfig,
    pub logging: LoggingConfig,
    pub metrics: MetricsConfig,
}

impl CollectorConfig {
    pub fn from_toml_str(text: &str) -> Result<Self, ConfigError> {
        let config: CollectorConfig = toml::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path)?;
        let config = Self::from_toml_str(&text)?;
        info!("⚙️ Loaded configuration from {}", path.display());
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let positive = [
            ("storage.max_concurrent_requests", self.storage.max_concurrent_requests),
            ("aggregation.max_query_aggregates", self.aggregation.max_query_aggregates),
            (
                "aggregation.max_service_call_aggregates",
                self.aggregation.max_service_call_aggregates,
            ),
            (
                "aggregation.hard_limit_multiplier_while_building",
                self.aggregation.hard_limit_multiplier_while_building,
            ),
            ("aggregation.query_text_truncate", self.aggregation.query_text_truncate),
            ("aggregation.throwable_frame_limit", self.aggregation.throwable_frame_limit),
            ("aggregation.profile_sample_limit", self.aggregation.profile_sample_limit),
        ];
        for (name, value) in positive {
            if value == 0 {
                return Err(ConfigError::Invalid(format!("{} must be greater than zero", name)));
            }
        }
        if self.storage.keyspace.is_empty() {
            return Err(ConfigError::Invalid("storage.keyspace must not be empty".to_string()));
        }
        if self.aggregation.flush_interval_seconds == 0 {
            return Err(ConfigError::Invalid(
                "aggregation.flush_interval_seconds must be greater than zero".to_string(),
            ));
        }
        if self.cluster.enabled && self.cluster.peer_node_ids.contains(&self.cluster.node_id) {
            return Err(ConfigError::Invalid(
                "cluster.peer_node_ids must not contain cluster.node_id".to_string(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_file_uses_defaults() {
        let config = CollectorConfig::from_toml_str("").unwrap();
        assert_eq!(config, CollectorConfig::default());
        assert_eq!(config.storage.max_concurrent_requests, 1000);
        assert_eq!(config.storage.read_consistency, Consistency::LocalOne);
        assert_eq!(config.storage.write_consistency, Consistency::LocalQuorum);
        assert_eq!(config.storage.gc_grace_seconds, 14400);
        assert_eq!(config.aggregation.hard_limit_multiplier_while_building, 2);
        assert!(!config.cluster.enabled);
        assert_eq!(config.metrics.port, 9877);
    }

    #[test]
    fn test_shipped_config_matches_defaults() {
        let config = CollectorConfig::from_toml_str(include_str!("../config.toml")).unwrap();
        assert_eq!(config, CollectorConfig::default());
    }

    #[test]
    fn test_partial_sections() {
        let config = CollectorConfig::from_toml_str(
            r#"
            [storage]
            keyspace = "apm_test"
            write_consistency = "QUORUM"

            [cluster]
            enabled = true
            node_id = "a"
            peer_node_ids = ["b", "c"]
            "#,
        )
        .unwrap();
        assert_eq!(config.storage.keyspace, "apm_test");
        assert_eq!(config.storage.write_consistency, Consistency::Quorum);
        assert_eq!(config.storage.max_concurrent_requests, 1000);
        assert_eq!(config.cluster.peer_node_ids.len(), 2);
    }

    #[test]
    fn test_zero_limits_rejected() {
        let error = CollectorConfig::from_toml_str("[aggregation]\nmax_query_aggregates = 0").unwrap_err();
        assert!(matches!(error, ConfigError::Invalid(message) if message.contains("max_query_aggregates")));
        let error = CollectorConfig::from_toml_str("[storage]\nmax_concurrent_requests = 0").unwrap_err();
        assert!(matches!(error, ConfigError::Invalid(_)));
    }

    #[test]
    fn test_unknown_consistency_is_parse_error() {
        let error = CollectorConfig::from_toml_str("[storage]\nread_consistency = \"SOMETIMES\"").unwrap_err();
        assert!(matches!(error, ConfigError::Parse(_)));
    }
}
