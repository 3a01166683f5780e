pub mod context;
pub mod driver;
pub mod errors;
pub mod futures;
pub mod schema;
#[cfg(feature = "scylla")]
pub mod scylla_driver;
pub mod session;
pub mod statement;
pub mod write_metrics;

pub use context::ExecutionContext;
pub use driver::{RecordingDriver, StorageDriver};
pub use errors::{DriverError, StorageError};
pub use futures::{join_result, rollup_async, transform_async, wait_for_all, ResultFuture};
pub use schema::CompactionStrategy;
#[cfg(feature = "scylla")]
pub use scylla_driver::ScyllaDriver;
pub use session::{SemaphoreStats, Session, StatementKind};
pub use statement::{Consistency, ResultSet, Row, Statement, Value};
pub use write_metrics::{WriteCounts, WriteMetricKey, WriteMetrics};
