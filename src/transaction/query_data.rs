//! Per-transaction accumulators for a single (query type, query text).
//!
//! A query execution is bracketed by `start` and `end`. On the sync variant,
//! reentrant calls on the same logical query (a driver method delegating to
//! itself) only bump the self-nesting level, so the recorded duration is the
//! outermost interval. `extend` re-opens a finished query (reading a result set
//! after the call returned) without counting another execution.
//!
//! The async variant has no nesting level: every `start` hands back an
//! `AsyncQueryExecution` carrying its own start tick, so executions in flight
//! on different tasks are counted and timed independently.

use std::sync::atomic::{AtomicI64, Ordering};

use tracing::debug;

use crate::common::Ticker;

/// Sentinel for "row counting never started" at the capture layer
pub const ROWS_NOT_TRACKED: i64 = -1;

/// Read side shared by the sync and async variants
pub trait QueryStats {
    fn query_type(&self) -> &str;
    fn query_text(&self) -> &str;
    /// Completed duration plus a live estimate for intervals still open
    fn total_duration_nanos(&self, ticker: &dyn Ticker) -> i64;
    fn execution_count(&self) -> i64;
    fn has_total_rows(&self) -> bool;
    fn total_rows(&self) -> i64;
    fn is_active(&self) -> bool;
}

/// Single-writer variant: plain fields, mutated only by the transaction's thread
#[derive(Debug, Clone)]
pub struct SyncQueryData {
    query_type: String,
    query_text: String,
    sum_of_start_ticks: i64,
    active_count: i64,
    current_start_tick: i64,
    total_duration_nanos: i64,
    execution_count: i64,
    total_rows: i64,
    self_nesting_level: i32,
}

impl SyncQueryData {
    pub fn new(query_type: &str, query_text: &str) -> Self {
        Self {
            query_type: query_type.to_string(),
            query_text: query_text.to_string(),
            sum_of_start_ticks: 0,
            active_count: 0,
            current_start_tick: 0,
            total_duration_nanos: 0,
            execution_count: 0,
            total_rows: ROWS_NOT_TRACKED,
            self_nesting_level: 0,
        }
    }

    /// True when this call opened a new top-level interval
    pub fn start(&mut self, start_tick: i64, batch_size: i64) -> bool {
        let opened = self.self_nesting_level == 0;
        if opened {
            self.open_execution(start_tick, batch_size);
            self.current_start_tick = start_tick;
        }
        self.self_nesting_level += 1;
        opened
    }

    /// True when this call re-opened the query
    pub fn extend(&mut self, start_tick: i64) -> bool {
        self.start(start_tick, 0)
    }

    /// Start tick of the top-level interval this call closed, if any
    pub fn end(&mut self, end_tick: i64) -> Option<i64> {
        if self.self_nesting_level == 0 {
            debug!("Unbalanced end for query {}", self.query_text);
            return None;
        }
        self.self_nesting_level -= 1;
        if self.self_nesting_level > 0 {
            return None;
        }
        self.close_execution(self.current_start_tick, end_tick);
        Some(self.current_start_tick)
    }

    /// Opens an interval with no nesting check; limit exceeded buckets use
    /// this since overlapping intervals there belong to different queries
    pub fn open_execution(&mut self, start_tick: i64, batch_size: i64) {
        self.sum_of_start_ticks += start_tick;
        self.active_count += 1;
        self.execution_count += batch_size;
    }

    /// Closes an interval opened by `open_execution`
    pub fn close_execution(&mut self, start_tick: i64, end_tick: i64) {
        if self.active_count == 0 {
            debug!("Unbalanced close for query {}", self.query_text);
            return;
        }
        self.total_duration_nanos += end_tick - start_tick;
        self.sum_of_start_ticks -= start_tick;
        self.active_count -= 1;
    }

    pub fn increment_row_count(&mut self, increment: i64) {
        if self.total_rows == ROWS_NOT_TRACKED {
            self.total_rows = increment;
        } else {
            self.total_rows += increment;
        }
    }

    /// Marks rows as observed, so "zero rows" differs from "not row oriented"
    pub fn set_has_total_rows(&mut self) {
        if self.total_rows == ROWS_NOT_TRACKED {
            self.total_rows = 0;
        }
    }

}

impl QueryStats for SyncQueryData {
    fn query_type(&self) -> &str {
        &self.query_type
    }

    fn query_text(&self) -> &str {
        &self.query_text
    }

    fn total_duration_nanos(&self, ticker: &dyn Ticker) -> i64 {
        // assumes every active interval is still running at read time
        if self.active_count > 0 {
            self.total_duration_nanos + self.active_count * ticker.read() - self.sum_of_start_ticks
        } else {
            self.total_duration_nanos
        }
    }

    fn execution_count(&self) -> i64 {
        self.execution_count
    }

    fn has_total_rows(&self) -> bool {
        self.total_rows != ROWS_NOT_TRACKED
    }

    fn total_rows(&self) -> i64 {
        self.total_rows.max(0)
    }

    fn is_active(&self) -> bool {
        self.active_count > 0
    }
}

/// One open interval of an `AsyncQueryData`, owned by whoever ends it
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AsyncQueryExecution {
    start_tick: i64,
}

impl AsyncQueryExecution {
    pub fn start_tick(&self) -> i64 {
        self.start_tick
    }
}

/// Variant for queries started on one thread and ended on another
#[derive(Debug)]
pub struct AsyncQueryData {
    query_type: String,
    query_text: String,
    sum_of_start_ticks: AtomicI64,
    active_count: AtomicI64,
    total_duration_nanos: AtomicI64,
    execution_count: AtomicI64,
    total_rows: AtomicI64,
}

impl AsyncQueryData {
    pub fn new(query_type: &str, query_text: &str) -> Self {
        Self {
            query_type: query_type.to_string(),
            query_text: query_text.to_string(),
            sum_of_start_ticks: AtomicI64::new(0),
            active_count: AtomicI64::new(0),
            total_duration_nanos: AtomicI64::new(0),
            execution_count: AtomicI64::new(0),
            total_rows: AtomicI64::new(ROWS_NOT_TRACKED),
        }
    }

    pub fn start(&self, start_tick: i64, batch_size: i64) -> AsyncQueryExecution {
        self.execution_count.fetch_add(batch_size, Ordering::Relaxed);
        self.open_interval(start_tick)
    }

    pub fn extend(&self, start_tick: i64) -> AsyncQueryExecution {
        self.open_interval(start_tick)
    }

    pub fn end(&self, execution: AsyncQueryExecution, end_tick: i64) {
        self.total_duration_nanos
            .fetch_add(end_tick - execution.start_tick, Ordering::Relaxed);
        self.sum_of_start_ticks
            .fetch_sub(execution.start_tick, Ordering::Relaxed);
        self.active_count.fetch_sub(1, Ordering::Release);
    }

    pub fn increment_row_count(&self, increment: i64) {
        let _ = self
            .total_rows
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |rows| {
                if rows == ROWS_NOT_TRACKED {
                    Some(increment)
                } else {
                    Some(rows + increment)
                }
            });
    }

    pub fn set_has_total_rows(&self) {
        let _ = self.total_rows.compare_exchange(
            ROWS_NOT_TRACKED,
            0,
            Ordering::AcqRel,
            Ordering::Acquire,
        );
    }

    fn open_interval(&self, start_tick: i64) -> AsyncQueryExecution {
        self.sum_of_start_ticks.fetch_add(start_tick, Ordering::Relaxed);
        self.active_count.fetch_add(1, Ordering::Release);
        AsyncQueryExecution { start_tick }
    }
}

impl QueryStats for AsyncQueryData {
    fn query_type(&self) -> &str {
        &self.query_type
    }

    fn query_text(&self) -> &str {
        &self.query_text
    }

    fn total_duration_nanos(&self, ticker: &dyn Ticker) -> i64 {
        // active count may change between these loads, the estimate is approximate
        let active_count = self.active_count.load(Ordering::Acquire);
        let total = self.total_duration_nanos.load(Ordering::Relaxed);
        if active_count > 0 {
            total + active_count * ticker.read() - self.sum_of_start_ticks.load(Ordering::Relaxed)
        } else {
            total
        }
    }

    fn execution_count(&self) -> i64 {
        self.execution_count.load(Ordering::Relaxed)
    }

    fn has_total_rows(&self) -> bool {
        self.total_rows.load(Ordering::Relaxed) != ROWS_NOT_TRACKED
    }

    fn total_rows(&self) -> i64 {
        self.total_rows.load(Ordering::Relaxed).max(0)
    }

    fn is_active(&self) -> bool {
        self.active_count.load(Ordering::Acquire) > 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::common::FakeTicker;

    #[test]
    fn test_nested_start_end_counts_outer_interval_only() {
        let ticker = FakeTicker::new(0);
        let mut data = SyncQueryData::new("SQL", "select 1");

        data.start(100, 1);
        data.start(120, 1);
        data.end(130);
        data.start(140, 1);
        data.end(150);
        data.end(200);

        data.start(1000, 1);
        data.end(1010);

        assert_eq!(data.total_duration_nanos(&ticker), 110);
        assert_eq!(data.execution_count(), 2);
        assert!(!data.is_active());
    }

    #[test]
    fn test_live_estimate_for_active_query() {
        let ticker = FakeTicker::new(500);
        let mut data = SyncQueryData::new("SQL", "select 1");
        data.start(100, 1);
        data.end(200);
        data.start(300, 1);

        // 100 completed + (500 - 300) still running
        assert_eq!(data.total_duration_nanos(&ticker), 300);
        assert!(data.is_active());
    }

    #[test]
    fn test_extend_does_not_count_execution() {
        let ticker = FakeTicker::new(0);
        let mut data = SyncQueryData::new("SQL", "select 1");
        data.start(0, 1);
        data.end(10);
        data.extend(50);
        data.end(70);

        assert_eq!(data.execution_count(), 1);
        assert_eq!(data.total_duration_nanos(&ticker), 30);
    }

    #[test]
    fn test_row_count_tri_state() {
        let fresh = SyncQueryData::new("SQL", "select 1");
        assert!(!fresh.has_total_rows());
        assert_eq!(fresh.total_rows(), 0);

        let mut zero_rows = SyncQueryData::new("SQL", "select 1");
        zero_rows.set_has_total_rows();
        assert!(zero_rows.has_total_rows());
        assert_eq!(zero_rows.total_rows(), 0);

        let mut some_rows = SyncQueryData::new("SQL", "select 1");
        some_rows.increment_row_count(3);
        some_rows.set_has_total_rows();
        some_rows.increment_row_count(2);
        assert!(some_rows.has_total_rows());
        assert_eq!(some_rows.total_rows(), 5);
    }

    #[test]
    fn test_unbalanced_end_is_ignored() {
        let ticker = FakeTicker::new(0);
        let mut data = SyncQueryData::new("SQL", "select 1");
        data.end(10);
        assert_eq!(data.total_duration_nanos(&ticker), 0);
        assert!(!data.is_active());
    }

    #[test]
    fn test_nested_end_reports_closed_interval_once() {
        let mut data = SyncQueryData::new("SQL", "select 1");
        assert!(data.start(10, 1));
        assert!(!data.start(15, 1));
        assert_eq!(data.end(20), None);
        assert_eq!(data.end(40), Some(10));
        assert!(data.extend(100));
        assert_eq!(data.end(105), Some(100));
    }

    #[test]
    fn test_open_execution_overlaps_without_nesting() {
        let ticker = FakeTicker::new(0);
        let mut bucket = SyncQueryData::new("SQL", "");
        bucket.open_execution(20, 1);
        bucket.open_execution(25, 1);
        bucket.close_execution(25, 30);
        bucket.close_execution(20, 50);
        bucket.close_execution(0, 60);

        assert_eq!(bucket.execution_count(), 2);
        assert_eq!(bucket.total_duration_nanos(&ticker), 35);
        assert!(!bucket.is_active());
    }

    #[test]
    fn test_async_extend_and_rows() {
        let ticker = FakeTicker::new(0);
        let data = AsyncQueryData::new("CQL", "select * from t");
        let first = data.start(10, 2);
        data.end(first, 40);
        let reopened = data.extend(100);
        data.end(reopened, 105);
        data.set_has_total_rows();

        assert_eq!(data.total_duration_nanos(&ticker), 35);
        assert_eq!(data.execution_count(), 2);
        assert!(data.has_total_rows());
        assert_eq!(data.total_rows(), 0);
    }

    #[test]
    fn test_async_overlapping_executions_counted_separately() {
        let data = std::sync::Arc::new(AsyncQueryData::new("CQL", "select * from t"));
        let first = data.start(0, 1);
        let second = {
            let data = data.clone();
            std::thread::spawn(move || data.start(10, 1)).join().unwrap()
        };

        // both in flight: 2 * 15 - (0 + 10)
        assert_eq!(data.total_duration_nanos(&FakeTicker::new(15)), 20);

        let ender = data.clone();
        std::thread::spawn(move || ender.end(first, 20)).join().unwrap();
        data.end(second, 30);

        let ticker = FakeTicker::new(1000);
        assert_eq!(data.execution_count(), 2);
        assert_eq!(data.total_duration_nanos(&ticker), 40);
        assert!(!data.is_active());
    }

    #[test]
    fn test_async_variant_across_threads() {
        let data = std::sync::Arc::new(AsyncQueryData::new("CQL", "insert"));
        let execution = data.start(0, 1);
        let ender = data.clone();
        std::thread::spawn(move || ender.end(execution, 25))
            .join()
            .unwrap();

        let ticker = FakeTicker::new(1000);
        assert_eq!(data.total_duration_nanos(&ticker), 25);
        assert!(!data.is_active());
    }
}
