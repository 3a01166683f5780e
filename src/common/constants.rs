/// Collector-wide constants
// Aggregation
pub const LIMIT_EXCEEDED_BUCKET: &str = "LIMIT EXCEEDED BUCKET";
pub const DEFAULT_MAX_QUERY_AGGREGATES: usize = 500;
pub const DEFAULT_MAX_SERVICE_CALL_AGGREGATES: usize = 500;
pub const DEFAULT_HARD_LIMIT_MULTIPLIER: usize = 2;
pub const DEFAULT_QUERY_TEXT_TRUNCATE: usize = 120;

// Error capture
pub const DEFAULT_THROWABLE_FRAME_LIMIT: usize = 100_000;
// stays under the 100 level nesting limit of the wire format
pub const MAX_CAUSE_DEPTH: usize = 80;
pub const FRAME_LIMIT_EXCEEDED_MESSAGE: &str = "[transaction throwable frame limit exceeded]";
pub const CAUSE_CHAIN_TRUNCATED_MESSAGE: &str =
    "The rest of the causal chain for this exception has been truncated";

// Profiling
pub const DEFAULT_PROFILE_SAMPLE_LIMIT: usize = 100_000;
pub const UNMERGED_SAMPLE_THRESHOLD: usize = 10;

// Session
pub const DEFAULT_MAX_CONCURRENT_REQUESTS: usize = 1000;
pub const DEFAULT_GC_GRACE_SECONDS: u64 = 4 * 3600;
pub const DEFAULT_SCHEMA_RETRY_TIMEOUT_SECONDS: u64 = 60;
pub const DEFAULT_SCHEMA_RETRY_INTERVAL_MILLIS: u64 = 1000;
pub const MAX_TWCS_WINDOW_HOURS: u32 = 30 * 24;
pub const MIN_TWCS_WINDOWS: u32 = 20;
pub const MAX_TWCS_WINDOWS: u32 = 30;
pub const TWCS_TOMBSTONE_THRESHOLD: f64 = 0.1;

// Semaphore object names
pub const READ_SEMAPHORE_OBJECT_NAME: &str = "apm_collector:type=ReadSemaphore";
pub const WRITE_SEMAPHORE_OBJECT_NAME: &str = "apm_collector:type=WriteSemaphore";
pub const ROLLUP_SEMAPHORE_OBJECT_NAME: &str = "apm_collector:type=RollupSemaphore";

// Write metrics
pub const WRITE_METRICS_OTHER: &str = "Other";
pub const WRITE_METRICS_AGENT_LIMIT: usize = 100;
pub const WRITE_METRICS_TRANSACTION_TYPE_LIMIT: usize = 20;
pub const WRITE_METRICS_TRANSACTION_NAME_LIMIT: usize = 50;

// Rate limiting
pub const RATE_LIMITER_EXPIRY_SECONDS: u64 = 24 * 3600;
pub const RATE_LIMITER_MAX_ENTRIES: usize = 100_000;

// Cluster
pub const DEFAULT_DISTRIBUTED_EXECUTION_TIMEOUT_SECONDS: u64 = 60;

// Metrics server
pub const DEFAULT_METRICS_PORT: u16 = 9877;
