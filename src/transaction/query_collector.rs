//! Per-transaction query tracking with a cap on distinct query texts.
//!
//! Once the cap is reached a new text is not tracked individually: the caller
//! gets a `Folded` slot whose every mutation is mirrored into the limit
//! exceeded bucket for its query type. Nesting stays in the slot's own data;
//! the bucket only sees whole top-level executions, so folded queries of
//! different texts may overlap freely.

use std::sync::Arc;

use dashmap::DashMap;
use rustc_hash::FxHashMap;
use tracing::debug;

use super::query_data::{AsyncQueryData, AsyncQueryExecution, QueryStats, SyncQueryData};
use crate::aggregate::QueryCollector;
use crate::common::Ticker;

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct QueryKey {
    pub query_type: String,
    pub query_text: String,
}

impl QueryKey {
    pub fn new(query_type: &str, query_text: &str) -> Self {
        Self {
            query_type: query_type.to_string(),
            query_text: query_text.to_string(),
        }
    }
}

/// Handle returned by `start`, passed back for every later mutation
#[derive(Debug, Clone)]
pub enum QuerySlot {
    Tracked(QueryKey),
    Folded { data: SyncQueryData, bucket: String },
}

impl QuerySlot {
    pub fn is_folded(&self) -> bool {
        matches!(self, QuerySlot::Folded { .. })
    }
}

/// Query state of one transaction, owned by the transaction's thread
#[derive(Debug)]
pub struct TransactionQueryCollector {
    queries: FxHashMap<QueryKey, SyncQueryData>,
    limit_exceeded_buckets: FxHashMap<String, SyncQueryData>,
    limit: usize,
}

impl TransactionQueryCollector {
    pub fn new(limit: usize) -> Self {
        Self {
            queries: FxHashMap::default(),
            limit_exceeded_buckets: FxHashMap::default(),
            limit,
        }
    }

    pub fn tracked_count(&self) -> usize {
        self.queries.len()
    }

    pub fn get(&self, query_type: &str, query_text: &str) -> Option<&SyncQueryData> {
        self.queries.get(&QueryKey::new(query_type, query_text))
    }

    pub fn limit_exceeded_bucket(&self, query_type: &str) -> Option<&SyncQueryData> {
        self.limit_exceeded_buckets.get(query_type)
    }

    pub fn start(&mut self, query_type: &str, query_text: &str, start_tick: i64, batch_size: i64) -> QuerySlot {
        let key = QueryKey::new(query_type, query_text);
        if self.queries.contains_key(&key) || self.queries.len() < self.limit {
            self.queries
                .entry(key.clone())
                .or_insert_with(|| SyncQueryData::new(query_type, query_text))
                .start(start_tick, batch_size);
            return QuerySlot::Tracked(key);
        }
        let mut data = SyncQueryData::new(query_type, query_text);
        data.start(start_tick, batch_size);
        self.bucket(query_type).open_execution(start_tick, batch_size);
        QuerySlot::Folded {
            data,
            bucket: query_type.to_string(),
        }
    }

    pub fn end(&mut self, slot: &mut QuerySlot, end_tick: i64) {
        match slot {
            QuerySlot::Tracked(key) => {
                if let Some(data) = self.queries.get_mut(key) {
                    data.end(end_tick);
                }
            }
            QuerySlot::Folded { data, bucket } => {
                if let Some(start_tick) = data.end(end_tick) {
                    self.bucket(bucket).close_execution(start_tick, end_tick);
                }
            }
        }
    }

    pub fn extend(&mut self, slot: &mut QuerySlot, start_tick: i64) {
        match slot {
            QuerySlot::Tracked(key) => {
                if let Some(data) = self.queries.get_mut(key) {
                    data.extend(start_tick);
                }
            }
            QuerySlot::Folded { data, bucket } => {
                if data.extend(start_tick) {
                    self.bucket(bucket).open_execution(start_tick, 0);
                }
            }
        }
    }

    pub fn increment_row_count(&mut self, slot: &mut QuerySlot, increment: i64) {
        self.apply_rows(slot, |data| data.increment_row_count(increment));
    }

    pub fn set_has_total_rows(&mut self, slot: &mut QuerySlot) {
        self.apply_rows(slot, SyncQueryData::set_has_total_rows);
    }

    /// Fold this transaction's queries into an aggregation window
    pub fn merge_into(&self, collector: &mut QueryCollector, ticker: &dyn Ticker) {
        for data in self.queries.values() {
            collector.merge_query(
                data.query_type(),
                data.query_text(),
                data.total_duration_nanos(ticker) as f64,
                data.execution_count(),
                data.has_total_rows(),
                data.total_rows(),
                data.is_active(),
            );
        }
        for (query_type, bucket) in &self.limit_exceeded_buckets {
            collector.merge_limit_exceeded_bucket(
                query_type,
                bucket.total_duration_nanos(ticker) as f64,
                bucket.execution_count(),
                bucket.has_total_rows(),
                bucket.total_rows(),
                bucket.is_active(),
            );
        }
    }

    fn bucket(&mut self, query_type: &str) -> &mut SyncQueryData {
        self.limit_exceeded_buckets
            .entry(query_type.to_string())
            .or_insert_with(|| SyncQueryData::new(query_type, ""))
    }

    fn apply_rows(&mut self, slot: &mut QuerySlot, op: impl Fn(&mut SyncQueryData)) {
        match slot {
            QuerySlot::Tracked(key) => {
                if let Some(data) = self.queries.get_mut(key) {
                    op(data);
                }
            }
            QuerySlot::Folded { data, bucket } => {
                op(data);
                op(self.bucket(bucket));
            }
        }
    }
}

#[derive(Debug, Clone)]
pub enum AsyncQueryTarget {
    Tracked(QueryKey),
    Folded { data: Arc<AsyncQueryData>, bucket: String },
}

/// Slot for queries whose start and end may run on different threads; holds
/// the open execution so concurrent executions of one text stay separate
#[derive(Debug, Clone)]
pub struct AsyncQuerySlot {
    target: AsyncQueryTarget,
    execution: Option<AsyncQueryExecution>,
}

impl AsyncQuerySlot {
    pub fn target(&self) -> &AsyncQueryTarget {
        &self.target
    }

    pub fn is_folded(&self) -> bool {
        matches!(self.target, AsyncQueryTarget::Folded { .. })
    }

    pub fn is_open(&self) -> bool {
        self.execution.is_some()
    }
}

/// Shared variant of `TransactionQueryCollector` for async transactions
#[derive(Debug)]
pub struct AsyncTransactionQueryCollector {
    queries: DashMap<QueryKey, AsyncQueryData>,
    limit_exceeded_buckets: DashMap<String, AsyncQueryData>,
    limit: usize,
}

impl AsyncTransactionQueryCollector {
    pub fn new(limit: usize) -> Self {
        Self {
            queries: DashMap::new(),
            limit_exceeded_buckets: DashMap::new(),
            limit,
        }
    }

    pub fn tracked_count(&self) -> usize {
        self.queries.len()
    }

    /// The cap is checked without a lock, so racing starts can overshoot it slightly
    pub fn start(&self, query_type: &str, query_text: &str, start_tick: i64, batch_size: i64) -> AsyncQuerySlot {
        let key = QueryKey::new(query_type, query_text);
        if self.queries.contains_key(&key) || self.queries.len() < self.limit {
            let execution = self
                .queries
                .entry(key.clone())
                .or_insert_with(|| AsyncQueryData::new(query_type, query_text))
                .start(start_tick, batch_size);
            return AsyncQuerySlot {
                target: AsyncQueryTarget::Tracked(key),
                execution: Some(execution),
            };
        }
        let data = Arc::new(AsyncQueryData::new(query_type, query_text));
        let execution = data.start(start_tick, batch_size);
        self.with_bucket(query_type, |bucket| {
            bucket.start(start_tick, batch_size);
        });
        AsyncQuerySlot {
            target: AsyncQueryTarget::Folded {
                data,
                bucket: query_type.to_string(),
            },
            execution: Some(execution),
        }
    }

    /// Closes the slot's open execution; a second `end` is ignored
    pub fn end(&self, slot: &mut AsyncQuerySlot, end_tick: i64) {
        let Some(execution) = slot.execution.take() else {
            debug!("Unbalanced end for async query slot");
            return;
        };
        match &slot.target {
            AsyncQueryTarget::Tracked(key) => {
                if let Some(data) = self.queries.get(key) {
                    data.end(execution, end_tick);
                }
            }
            AsyncQueryTarget::Folded { data, bucket } => {
                data.end(execution, end_tick);
                self.with_bucket(bucket, |bucket| bucket.end(execution, end_tick));
            }
        }
    }

    /// Re-opens a closed slot without counting another execution
    pub fn extend(&self, slot: &mut AsyncQuerySlot, start_tick: i64) {
        if slot.execution.is_some() {
            return;
        }
        let execution = match &slot.target {
            AsyncQueryTarget::Tracked(key) => match self.queries.get(key) {
                Some(data) => data.extend(start_tick),
                None => return,
            },
            AsyncQueryTarget::Folded { data, bucket } => {
                self.with_bucket(bucket, |bucket| {
                    bucket.extend(start_tick);
                });
                data.extend(start_tick)
            }
        };
        slot.execution = Some(execution);
    }

    pub fn increment_row_count(&self, slot: &AsyncQuerySlot, increment: i64) {
        self.apply_rows(slot, |data| data.increment_row_count(increment));
    }

    pub fn set_has_total_rows(&self, slot: &AsyncQuerySlot) {
        self.apply_rows(slot, AsyncQueryData::set_has_total_rows);
    }

    pub fn merge_into(&self, collector: &mut QueryCollector, ticker: &dyn Ticker) {
        for entry in self.queries.iter() {
            let data = entry.value();
            collector.merge_query(
                data.query_type(),
                data.query_text(),
                data.total_duration_nanos(ticker) as f64,
                data.execution_count(),
                data.has_total_rows(),
                data.total_rows(),
                data.is_active(),
            );
        }
        for entry in self.limit_exceeded_buckets.iter() {
            let bucket = entry.value();
            collector.merge_limit_exceeded_bucket(
                entry.key(),
                bucket.total_duration_nanos(ticker) as f64,
                bucket.execution_count(),
                bucket.has_total_rows(),
                bucket.total_rows(),
                bucket.is_active(),
            );
        }
    }

    fn with_bucket(&self, query_type: &str, op: impl FnOnce(&AsyncQueryData)) {
        let bucket = self
            .limit_exceeded_buckets
            .entry(query_type.to_string())
            .or_insert_with(|| AsyncQueryData::new(query_type, ""));
        op(bucket.value());
    }

    fn apply_rows(&self, slot: &AsyncQuerySlot, op: impl Fn(&AsyncQueryData)) {
        match &slot.target {
            AsyncQueryTarget::Tracked(key) => {
                if let Some(data) = self.queries.get(key) {
                    op(data.value());
                }
            }
            AsyncQueryTarget::Folded { data, bucket } => {
                op(data);
                self.with_bucket(bucket, &op);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::common::FakeTicker;

    #[test]
    fn test_over_limit_mirrors_into_bucket() {
        let ticker = FakeTicker::new(0);
        let mut collector = TransactionQueryCollector::new(1);

        let mut first = collector.start("SQL", "select a", 0, 1);
        collector.end(&mut first, 10);
        let mut second = collector.start("SQL", "select b", 20, 1);
        assert!(second.is_folded());
        collector.set_has_total_rows(&mut second);
        collector.increment_row_count(&mut second, 4);
        collector.end(&mut second, 50);

        let bucket = collector.limit_exceeded_bucket("SQL").unwrap();
        assert_eq!(bucket.total_duration_nanos(&ticker), 30);
        assert_eq!(bucket.total_rows(), 4);
        if let QuerySlot::Folded { data, .. } = &second {
            assert_eq!(data.total_duration_nanos(&ticker), 30);
        }
        assert_eq!(collector.tracked_count(), 1);
    }

    #[test]
    fn test_known_text_still_tracked_after_limit() {
        let mut collector = TransactionQueryCollector::new(1);
        let mut slot = collector.start("SQL", "select a", 0, 1);
        collector.end(&mut slot, 5);
        let _folded = collector.start("SQL", "select b", 5, 1);
        let again = collector.start("SQL", "select a", 10, 1);
        assert!(!again.is_folded());
        assert_eq!(collector.get("SQL", "select a").unwrap().execution_count(), 2);
    }

    #[test]
    fn test_merge_into_aggregate_collector() {
        let ticker = FakeTicker::new(100);
        let mut collector = TransactionQueryCollector::new(1);
        let mut first = collector.start("SQL", "select a", 0, 1);
        collector.end(&mut first, 10);
        let mut second = collector.start("SQL", "select b", 0, 3);
        collector.end(&mut second, 5);
        // still running: reported with its live estimate
        let _running = collector.start("CQL", "select c", 80, 1);

        let mut aggregate = QueryCollector::new(10, 2);
        collector.merge_into(&mut aggregate, &ticker);
        assert_eq!(aggregate.get("SQL", "select a").unwrap().total_duration_nanos(), 10.0);
        assert_eq!(aggregate.limit_exceeded_bucket("SQL").unwrap().execution_count(), 3);
        let running = aggregate.limit_exceeded_bucket("CQL").unwrap();
        assert_eq!(running.total_duration_nanos(), 20.0);
        assert!(running.is_active());
    }

    #[test]
    fn test_overlapping_folded_queries_each_reach_bucket() {
        let ticker = FakeTicker::new(0);
        let mut collector = TransactionQueryCollector::new(1);
        let mut tracked = collector.start("SQL", "select a", 0, 1);
        collector.end(&mut tracked, 5);

        let mut b = collector.start("SQL", "select b", 20, 1);
        let mut c = collector.start("SQL", "select c", 25, 1);
        collector.end(&mut c, 30);
        collector.end(&mut b, 50);

        let bucket = collector.limit_exceeded_bucket("SQL").unwrap();
        assert_eq!(bucket.execution_count(), 2);
        assert_eq!(bucket.total_duration_nanos(&ticker), 35);
        assert!(!bucket.is_active());
    }

    #[test]
    fn test_reentrant_folded_query_reaches_bucket_once() {
        let ticker = FakeTicker::new(0);
        let mut collector = TransactionQueryCollector::new(0);
        let mut slot = collector.start("SQL", "select a", 10, 1);
        // the driver re-entering the same query on the slot's own data
        if let QuerySlot::Folded { data, .. } = &mut slot {
            data.start(12, 1);
            data.end(18);
        }
        collector.end(&mut slot, 40);
        collector.extend(&mut slot, 50);
        collector.end(&mut slot, 55);

        let bucket = collector.limit_exceeded_bucket("SQL").unwrap();
        assert_eq!(bucket.execution_count(), 1);
        assert_eq!(bucket.total_duration_nanos(&ticker), 35);
    }

    #[test]
    fn test_async_collector_across_threads() {
        let ticker = FakeTicker::new(0);
        let collector = Arc::new(AsyncTransactionQueryCollector::new(1));
        let mut tracked = collector.start("CQL", "select a", 0, 1);
        let mut folded = collector.start("CQL", "select b", 10, 1);
        assert!(folded.is_folded());

        let worker = collector.clone();
        std::thread::spawn(move || {
            worker.end(&mut tracked, 7);
            worker.end(&mut folded, 12);
        })
        .join()
        .unwrap();

        let mut aggregate = QueryCollector::new(10, 2);
        collector.merge_into(&mut aggregate, &ticker);
        assert_eq!(aggregate.get("CQL", "select a").unwrap().total_duration_nanos(), 7.0);
        assert_eq!(aggregate.limit_exceeded_bucket("CQL").unwrap().total_duration_nanos(), 2.0);
    }

    #[test]
    fn test_async_concurrent_executions_of_one_text() {
        let ticker = FakeTicker::new(0);
        let collector = Arc::new(AsyncTransactionQueryCollector::new(1));
        let mut first = collector.start("CQL", "select a", 0, 1);
        let mut second = collector.start("CQL", "select a", 10, 1);
        let mut folded_b = collector.start("CQL", "select b", 20, 1);
        let mut folded_c = collector.start("CQL", "select c", 25, 1);

        let worker = collector.clone();
        std::thread::spawn(move || {
            worker.end(&mut first, 20);
            worker.end(&mut folded_c, 30);
        })
        .join()
        .unwrap();
        collector.end(&mut second, 30);
        collector.end(&mut folded_b, 50);
        // already closed
        collector.end(&mut second, 90);

        let mut aggregate = QueryCollector::new(10, 2);
        collector.merge_into(&mut aggregate, &ticker);
        let tracked = aggregate.get("CQL", "select a").unwrap();
        assert_eq!(tracked.execution_count(), 2);
        assert_eq!(tracked.total_duration_nanos(), 40.0);
        let bucket = aggregate.limit_exceeded_bucket("CQL").unwrap();
        assert_eq!(bucket.execution_count(), 2);
        assert_eq!(bucket.total_duration_nanos(), 35.0);
        assert!(!bucket.is_active());
    }

    #[test]
    fn test_async_extend_reopens_closed_slot() {
        let ticker = FakeTicker::new(0);
        let collector = AsyncTransactionQueryCollector::new(0);
        let mut slot = collector.start("CQL", "select a", 0, 1);
        collector.end(&mut slot, 10);
        assert!(!slot.is_open());
        collector.extend(&mut slot, 20);
        assert!(slot.is_open());
        collector.set_has_total_rows(&slot);
        collector.end(&mut slot, 25);

        let mut aggregate = QueryCollector::new(10, 2);
        collector.merge_into(&mut aggregate, &ticker);
        let bucket = aggregate.limit_exceeded_bucket("CQL").unwrap();
        assert_eq!(bucket.execution_count(), 1);
        assert_eq!(bucket.total_duration_nanos(), 15.0);
        assert!(bucket.has_total_rows());
    }
}
