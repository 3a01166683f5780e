//! Collector-side aggregation: mergeable records, bounded collectors and the
//! actor that owns the current aggregation window.

pub mod actor;
pub mod bounded;
pub mod errors;
pub mod interval;
pub mod mutable_query;
pub mod profile;
pub mod query_collector;
pub mod shared_text;
pub mod thread_stats;
pub mod timers;

pub use actor::{create_aggregate_tables, AggregateActor, AggregateAsk, AggregateReply, AggregateTell, FlushSummary};
pub use bounded::{BoundedTable, BucketEntry, EntryText, RankedEntry};
pub use errors::AggregateError;
pub use interval::{AggregateInterval, IntervalLimits};
pub use mutable_query::{MutableQuery, MutableServiceCall};
pub use profile::MutableProfile;
pub use query_collector::{QueryCollector, ServiceCallCollector};
pub use shared_text::SharedQueryTextCollection;
pub use thread_stats::{not_available_aware_add, MutableThreadStats, NOT_AVAILABLE};
pub use timers::{merge_root_timers, MutableAggregateTimer, MutableTraceTimer};
