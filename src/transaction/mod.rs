//! Capture-side accumulators owned by a single in-flight transaction.

pub mod error_message;
pub mod query_collector;
pub mod query_data;
pub mod thread_profile;
pub mod thread_stats;

pub use error_message::{CapturedThrowable, ErrorMessage, FrameBudget, ThrowableSource};
pub use query_collector::{
    AsyncQuerySlot, AsyncQueryTarget, AsyncTransactionQueryCollector, QueryKey, QuerySlot,
    TransactionQueryCollector,
};
pub use query_data::{AsyncQueryData, AsyncQueryExecution, QueryStats, SyncQueryData, ROWS_NOT_TRACKED};
pub use thread_profile::ThreadProfile;
pub use thread_stats::{CurrentThreadStats, ThreadStatsComponent, ThreadStatsSnapshot, ThreadStatsSource};
