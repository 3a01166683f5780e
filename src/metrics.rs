/// Prometheus metrics for the collector
///
/// Tracks storage throttling, cache behaviour, write volume and aggregation
/// throughput.
use prometheus::{
    Encoder, HistogramOpts, HistogramVec, IntCounterVec, IntGaugeVec, Opts, Registry, TextEncoder,
};
use std::sync::Arc;
use tracing::info;

pub struct MetricsRegistry {
    registry: Registry,

    // Session throttling
    pub semaphore_available_permits: IntGaugeVec,
    pub semaphore_max_permits: IntGaugeVec,
    pub storage_operation_duration: HistogramVec,
    pub storage_operations_total: IntCounterVec,
    pub schema_retries_total: IntCounterVec,

    // Cache
    pub cache_requests_total: IntCounterVec,
    pub cache_loads_total: IntCounterVec,
    pub cache_invalidations_total: IntCounterVec,

    // Write volume
    pub write_bytes_total: IntCounterVec,
    pub write_rows_total: IntCounterVec,

    // Aggregation
    pub aggregates_merged_total: IntCounterVec,
    pub aggregate_flush_duration: HistogramVec,
    pub rate_limited_total: IntCounterVec,

    // Error tracking
    pub error_count_by_type: IntCounterVec,
}

impl MetricsRegistry {
    pub fn new() -> Result<Self, prometheus::Error> {
        let registry = Registry::new();

        let semaphore_available_permits = IntGaugeVec::new(
            Opts::new(
                "session_semaphore_available_permits",
                "Permits currently available on a session semaphore",
            ),
            &["object_name"],
        )?;

        let semaphore_max_permits = IntGaugeVec::new(
            Opts::new("session_semaphore_max_permits", "Configured permits of a session semaphore"),
            &["object_name"],
        )?;

        let storage_operation_duration = HistogramVec::new(
            HistogramOpts::new(
                "storage_operation_duration_seconds",
                "Time from permit request to driver completion",
            )
            .buckets(vec![0.0005, 0.001, 0.005, 0.01, 0.05, 0.1, 0.5, 1.0, 5.0]),
            &["kind"],
        )?;

        let storage_operations_total = IntCounterVec::new(
            Opts::new("storage_operations_total", "Storage statements executed"),
            &["kind", "status"],
        )?;

        let schema_retries_total = IntCounterVec::new(
            Opts::new("schema_retries_total", "Schema statements retried after all nodes failed"),
            &["operation"],
        )?;

        let cache_requests_total = IntCounterVec::new(
            Opts::new("cache_requests_total", "Cache lookups by result"),
            &["cache", "result"],
        )?;

        let cache_loads_total = IntCounterVec::new(
            Opts::new("cache_loads_total", "Loader invocations by outcome"),
            &["cache", "status"],
        )?;

        let cache_invalidations_total = IntCounterVec::new(
            Opts::new("cache_invalidations_total", "Keys invalidated"),
            &["cache"],
        )?;

        let write_bytes_total = IntCounterVec::new(
            Opts::new("write_bytes_total", "Bound value bytes written per table"),
            &["table"],
        )?;

        let write_rows_total = IntCounterVec::new(
            Opts::new("write_rows_total", "Rows written per table"),
            &["table"],
        )?;

        let aggregates_merged_total = IntCounterVec::new(
            Opts::new("aggregates_merged_total", "Aggregate messages merged into the window"),
            &["transaction_type"],
        )?;

        let aggregate_flush_duration = HistogramVec::new(
            HistogramOpts::new("aggregate_flush_duration_seconds", "Time spent flushing a window")
                .buckets(vec![0.001, 0.01, 0.1, 0.5, 1.0, 5.0, 30.0]),
            &["status"],
        )?;

        let rate_limited_total = IntCounterVec::new(
            Opts::new("rate_limited_total", "Work skipped because the key was recently seen"),
            &["component"],
        )?;

        let error_count_by_type = IntCounterVec::new(
            Opts::new("error_count_by_type", "Total errors by type"),
            &["error_type", "component"],
        )?;

        registry.register(Box::new(semaphore_available_permits.clone()))?;
        registry.register(Box::new(semaphore_max_permits.clone()))?;
        registry.register(Box::new(storage_operation_duration.clone()))?;
        registry.register(Box::new(storage_operations_total.clone()))?;
        registry.register(Box::new(schema_retries_total.clone()))?;
        registry.register(Box::new(cache_requests_total.clone()))?;
        registry.register(Box::new(cache_loads_total.clone()))?;
        registry.register(Box::new(cache_invalidations_total.clone()))?;
        registry.register(Box::new(write_bytes_total.clone()))?;
        registry.register(Box::new(write_rows_total.clone()))?;
        registry.register(Box::new(aggregates_merged_total.clone()))?;
        registry.register(Box::new(aggregate_flush_duration.clone()))?;
        registry.register(Box::new(rate_limited_total.clone()))?;
        registry.register(Box::new(error_count_by_type.clone()))?;

        info!("📊 Prometheus metrics registry initialized with {} collector metrics", 14);

        Ok(MetricsRegistry {
            registry,
            semaphore_available_permits,
            semaphore_max_permits,
            storage_operation_duration,
            storage_operations_total,
            schema_retries_total,
            cache_requests_total,
            cache_loads_total,
            cache_invalidations_total,
            write_bytes_total,
            write_rows_total,
            aggregates_merged_total,
            aggregate_flush_duration,
            rate_limited_total,
            error_count_by_type,
        })
    }

    /// Export metrics in Prometheus text format
    pub fn export_metrics(&self) -> Result<String, prometheus::Error> {
        let encoder = TextEncoder::new();
        let metric_families = self.registry.gather();
        let mut buffer = Vec::new();

        encoder.encode(&metric_families, &mut buffer)?;

        String::from_utf8(buffer)
            .map_err(|e| prometheus::Error::Msg(format!("UTF-8 encoding error: {}", e)))
    }

    pub fn record_semaphore(&self, object_name: &str, available: usize, max: usize) {
        self.semaphore_available_permits
            .with_label_values(&[object_name])
            .set(available as i64);
        self.semaphore_max_permits
            .with_label_values(&[object_name])
            .set(max as i64);
    }

    pub fn record_storage_operation(&self, kind: &str, success: bool, duration_seconds: f64) {
        let status = if success { "success" } else { "failure" };
        self.storage_operation_duration
            .with_label_values(&[kind])
            .observe(duration_seconds);
        self.storage_operations_total
            .with_label_values(&[kind, status])
            .inc();
    }

    pub fn record_schema_retry(&self, operation: &str) {
        self.schema_retries_total.with_label_values(&[operation]).inc();
    }

    pub fn record_cache_request(&self, cache: &str, hit: bool) {
        let result = if hit { "hit" } else { "miss" };
        self.cache_requests_total
            .with_label_values(&[cache, result])
            .inc();
    }

    pub fn record_cache_load(&self, cache: &str, success: bool) {
        let status = if success { "success" } else { "failure" };
        self.cache_loads_total.with_label_values(&[cache, status]).inc();
    }

    pub fn record_cache_invalidation(&self, cache: &str) {
        self.cache_invalidations_total.with_label_values(&[cache]).inc();
    }

    pub fn record_write(&self, table: &str, bytes: u64, rows: u64) {
        self.write_bytes_total.with_label_values(&[table]).inc_by(bytes);
        self.write_rows_total.with_label_values(&[table]).inc_by(rows);
    }

    pub fn record_aggregate_merged(&self, transaction_type: &str) {
        self.aggregates_merged_total
            .with_label_values(&[transaction_type])
            .inc();
    }

    pub fn record_flush(&self, success: bool, duration_seconds: f64) {
        let status = if success { "success" } else { "failure" };
        self.aggregate_flush_duration
            .with_label_values(&[status])
            .observe(duration_seconds);
    }

    pub fn record_rate_limited(&self, component: &str) {
        self.rate_limited_total.with_label_values(&[component]).inc();
    }

    pub fn record_error(&self, error_type: &str, component: &str) {
        self.error_count_by_type
            .with_label_values(&[error_type, component])
            .inc();
    }
}

/// Global metrics instance
static METRICS: std::sync::OnceLock<Arc<MetricsRegistry>> = std::sync::OnceLock::new();

/// Initialize global metrics registry
pub fn init_metrics() -> Result<Arc<MetricsRegistry>, prometheus::Error> {
    let metrics = Arc::new(MetricsRegistry::new()?);
    METRICS
        .set(metrics.clone())
        .map_err(|_| prometheus::Error::Msg("Metrics already initialized".to_string()))?;

    info!("Global metrics registry initialized");
    Ok(metrics)
}

/// Get global metrics instance
pub fn get_metrics() -> Option<Arc<MetricsRegistry>> {
    METRICS.get().cloned()
}

#[macro_export]
macro_rules! record_cache_request {
    ($cache:expr, $hit:expr) => {
        if let Some(metrics) = $crate::metrics::get_metrics() {
            metrics.record_cache_request($cache, $hit);
        }
    };
}

#[macro_export]
macro_rules! record_cache_load {
    ($cache:expr, $success:expr) => {
        if let Some(metrics) = $crate::metrics::get_metrics() {
            metrics.record_cache_load($cache, $success);
        }
    };
}

#[macro_export]
macro_rules! record_cache_invalidation {
    ($cache:expr) => {
        if let Some(metrics) = $crate::metrics::get_metrics() {
            metrics.record_cache_invalidation($cache);
        }
    };
}

#[macro_export]
macro_rules! record_storage_error {
    ($error_type:expr) => {
        if let Some(metrics) = $crate::metrics::get_metrics() {
            metrics.record_error($error_type, "storage");
        }
    };
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_export_contains_semaphore_object_name() {
        let metrics = MetricsRegistry::new().unwrap();
        metrics.record_semaphore("apm_collector:type=WriteSemaphore", 480, 500);
        metrics.record_write("aggregate_query", 128, 2);

        let text = metrics.export_metrics().unwrap();
        assert!(text.contains(
            "session_semaphore_available_permits{object_name=\"apm_collector:type=WriteSemaphore\"} 480"
        ));
        assert!(text.contains("write_rows_total{table=\"aggregate_query\"} 2"));
    }
}
