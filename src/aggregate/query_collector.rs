use tracing::warn;

use super::bounded::{BoundedTable, BucketEntry, EntryText};
use super::mutable_query::{MutableQuery, MutableServiceCall};
use super::shared_text::{full_text_sha, truncate_text, SharedQueryTextCollection};
use crate::common::constants::{DEFAULT_QUERY_TEXT_TRUNCATE, LIMIT_EXCEEDED_BUCKET};
use crate::model::{AggregateQuery, AggregateServiceCall, SharedQueryText};

impl BucketEntry for MutableQuery {
    fn total_duration_nanos(&self) -> f64 {
        MutableQuery::total_duration_nanos(self)
    }

    fn add_entry(&mut self, other: &Self) {
        MutableQuery::add_entry(self, other)
    }
}

impl BucketEntry for MutableServiceCall {
    fn total_duration_nanos(&self) -> f64 {
        MutableServiceCall::total_duration_nanos(self)
    }

    fn add_entry(&mut self, other: &Self) {
        MutableServiceCall::add_entry(self, other)
    }
}

/// Query aggregates for one aggregation window.
///
/// Not internally synchronized: one owner merges into it for the lifetime of
/// the window.
#[derive(Debug, Clone)]
pub struct QueryCollector {
    table: BoundedTable<MutableQuery>,
    truncate_length: usize,
}

impl QueryCollector {
    pub fn new(limit: usize, hard_limit_multiplier_while_building: usize) -> Self {
        Self::with_truncate_length(limit, hard_limit_multiplier_while_building, DEFAULT_QUERY_TEXT_TRUNCATE)
    }

    pub fn with_truncate_length(
        limit: usize,
        hard_limit_multiplier_while_building: usize,
        truncate_length: usize,
    ) -> Self {
        Self {
            table: BoundedTable::new(limit, hard_limit_multiplier_while_building),
            truncate_length,
        }
    }

    pub fn entry_count(&self) -> usize {
        self.table.entry_count()
    }

    pub fn get(&self, query_type: &str, query_text: &str) -> Option<&MutableQuery> {
        self.table.get(query_type, query_text)
    }

    pub fn limit_exceeded_bucket(&self, query_type: &str) -> Option<&MutableQuery> {
        self.table.limit_exceeded_bucket(query_type)
    }

    #[allow(clippy::too_many_arguments)]
    pub fn merge_query(
        &mut self,
        query_type: &str,
        query_text: &str,
        total_duration_nanos: f64,
        execution_count: i64,
        has_total_rows: bool,
        total_rows: i64,
        active: bool,
    ) {
        let truncate_length = self.truncate_length;
        let (query, admitted) = self.table.entry_mut(query_type, query_text);
        if admitted && query.full_text_sha().is_none() && query_text.chars().count() > truncate_length {
            query.set_full_text_sha(Some(full_text_sha(query_text)));
        }
        apply(query, total_duration_nanos, execution_count, has_total_rows, total_rows, active);
    }

    pub fn merge_limit_exceeded_bucket(
        &mut self,
        query_type: &str,
        total_duration_nanos: f64,
        execution_count: i64,
        has_total_rows: bool,
        total_rows: i64,
        active: bool,
    ) {
        let bucket = self.table.bucket_mut(query_type);
        apply(bucket, total_duration_nanos, execution_count, has_total_rows, total_rows, active);
    }

    /// Merge a record produced by another collector's `to_aggregate_queries`
    pub fn merge_query_message(&mut self, query: &AggregateQuery, shared_query_texts: &[SharedQueryText]) {
        let Some(text) = usize::try_from(query.shared_query_text_index)
            .ok()
            .and_then(|index| shared_query_texts.get(index))
        else {
            warn!(
                "Query references missing shared text index {}",
                query.shared_query_text_index
            );
            return;
        };
        if text.full_text_sha.is_none() && text.truncated_text == LIMIT_EXCEEDED_BUCKET {
            self.table.bucket_mut(&query.query_type).add(query);
            return;
        }
        let truncate_length = self.truncate_length;
        let (entry, admitted) = self.table.entry_mut(&query.query_type, &text.truncated_text);
        if admitted {
            let sha = match &text.full_text_sha {
                Some(sha) => Some(sha.clone()),
                None if text.truncated_text.chars().count() > truncate_length => {
                    Some(full_text_sha(&text.truncated_text))
                }
                None => None,
            };
            entry.set_full_text_sha(sha);
        }
        entry.add(query);
    }

    /// Re-project this window, overflow buckets included, into another collector
    pub fn merge_queries_into(&self, other: &mut QueryCollector) {
        for (query_type, query_text, query) in self.table.iter() {
            if let Some(sha) = query.full_text_sha() {
                if query_text.chars().count() <= self.truncate_length {
                    // text came in truncated; keep its hash with it
                    let (entry, admitted) = other.table.entry_mut(query_type, query_text);
                    if admitted {
                        entry.set_full_text_sha(Some(sha.to_string()));
                    }
                    entry.add_entry(query);
                    continue;
                }
            }
            other.merge_query(
                query_type,
                query_text,
                query.total_duration_nanos(),
                query.execution_count(),
                query.has_total_rows(),
                query.total_rows(),
                query.is_active(),
            );
        }
        for (query_type, bucket) in self.table.buckets() {
            other.table.bucket_mut(query_type).add_entry(bucket);
        }
    }

    pub fn to_aggregate_queries(
        &self,
        shared_query_texts: &mut SharedQueryTextCollection,
        include_active: bool,
    ) -> Vec<AggregateQuery> {
        self.table
            .finalize()
            .into_iter()
            .map(|ranked| {
                let shared_text = match &ranked.text {
                    EntryText::Named(text) => match ranked.entry.full_text_sha() {
                        Some(sha) => SharedQueryText {
                            truncated_text: truncate_text(text, self.truncate_length),
                            full_text_sha: Some(sha.to_string()),
                        },
                        None => SharedQueryText {
                            truncated_text: text.clone(),
                            full_text_sha: None,
                        },
                    },
                    EntryText::LimitExceededBucket => SharedQueryText {
                        truncated_text: LIMIT_EXCEEDED_BUCKET.to_string(),
                        full_text_sha: None,
                    },
                };
                let index = shared_query_texts.shared_query_text_index(shared_text);
                ranked
                    .entry
                    .to_aggregate_query(&ranked.entry_type, index, include_active)
            })
            .collect()
    }

    /// Linear scan for the full text behind a hash
    pub fn get_full_query_text(&self, sha: &str) -> Option<&str> {
        self.table
            .iter()
            .find(|(_, text, query)| {
                query.full_text_sha() == Some(sha) && text.chars().count() > self.truncate_length
            })
            .map(|(_, text, _)| text)
    }
}

fn apply(
    query: &mut MutableQuery,
    total_duration_nanos: f64,
    execution_count: i64,
    has_total_rows: bool,
    total_rows: i64,
    active: bool,
) {
    query.add_to_total_duration_nanos(total_duration_nanos);
    query.add_to_execution_count(execution_count);
    query.add_to_total_rows(has_total_rows, total_rows);
    query.set_active(active);
}

/// Service call aggregates for one aggregation window
#[derive(Debug, Clone)]
pub struct ServiceCallCollector {
    table: BoundedTable<MutableServiceCall>,
}

impl ServiceCallCollector {
    pub fn new(limit: usize, hard_limit_multiplier_while_building: usize) -> Self {
        Self {
            table: BoundedTable::new(limit, hard_limit_multiplier_while_building),
        }
    }

    pub fn entry_count(&self) -> usize {
        self.table.entry_count()
    }

    pub fn get(&self, service_call_type: &str, text: &str) -> Option<&MutableServiceCall> {
        self.table.get(service_call_type, text)
    }

    pub fn limit_exceeded_bucket(&self, service_call_type: &str) -> Option<&MutableServiceCall> {
        self.table.limit_exceeded_bucket(service_call_type)
    }

    pub fn merge_service_call(
        &mut self,
        service_call_type: &str,
        text: &str,
        total_duration_nanos: f64,
        execution_count: i64,
        active: bool,
    ) {
        let (service_call, _) = self.table.entry_mut(service_call_type, text);
        service_call.add_to_total_duration_nanos(total_duration_nanos);
        service_call.add_to_execution_count(execution_count);
        service_call.set_active(active);
    }

    pub fn merge_service_call_message(&mut self, service_call: &AggregateServiceCall) {
        if service_call.text == LIMIT_EXCEEDED_BUCKET {
            self.table
                .bucket_mut(&service_call.service_call_type)
                .add(service_call);
            return;
        }
        let (entry, _) = self
            .table
            .entry_mut(&service_call.service_call_type, &service_call.text);
        entry.add(service_call);
    }

    pub fn merge_service_calls_into(&self, other: &mut ServiceCallCollector) {
        for (service_call_type, text, service_call) in self.table.iter() {
            other.merge_service_call(
                service_call_type,
                text,
                service_call.total_duration_nanos(),
                service_call.execution_count(),
                service_call.is_active(),
            );
        }
        for (service_call_type, bucket) in self.table.buckets() {
            other.table.bucket_mut(service_call_type).add_entry(bucket);
        }
    }

    pub fn to_aggregate_service_calls(&self, include_active: bool) -> Vec<AggregateServiceCall> {
        self.table
            .finalize()
            .into_iter()
            .map(|ranked| {
                let text = match &ranked.text {
                    EntryText::Named(text) => text.as_str(),
                    EntryText::LimitExceededBucket => LIMIT_EXCEEDED_BUCKET,
                };
                ranked
                    .entry
                    .to_aggregate_service_call(&ranked.entry_type, text, include_active)
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn merge(collector: &mut QueryCollector, text: &str, nanos: f64) {
        collector.merge_query("SQL", text, nanos, 1, false, 0, false);
    }

    fn summarize(collector: &QueryCollector) -> Vec<(String, f64)> {
        let mut texts = SharedQueryTextCollection::new();
        let queries = collector.to_aggregate_queries(&mut texts, false);
        queries
            .iter()
            .map(|query| {
                let text = &texts.texts()[query.shared_query_text_index as usize];
                (text.truncated_text.clone(), query.total_duration_nanos)
            })
            .collect()
    }

    #[test]
    fn test_overflow_with_hard_multiplier_one() {
        let mut collector = QueryCollector::new(2, 1);
        merge(&mut collector, "q10", 10.0);
        merge(&mut collector, "q30", 30.0);
        merge(&mut collector, "q20", 20.0);

        // third distinct key is folded while building
        assert_eq!(
            summarize(&collector),
            vec![
                ("q30".to_string(), 30.0),
                (LIMIT_EXCEEDED_BUCKET.to_string(), 20.0),
                ("q10".to_string(), 10.0),
            ]
        );
    }

    #[test]
    fn test_hard_multiplier_one_folds_latest_key() {
        let mut collector = QueryCollector::new(2, 1);
        merge(&mut collector, "q30", 30.0);
        merge(&mut collector, "q20", 20.0);
        merge(&mut collector, "q10", 10.0);

        assert_eq!(
            summarize(&collector),
            vec![
                ("q30".to_string(), 30.0),
                ("q20".to_string(), 20.0),
                (LIMIT_EXCEEDED_BUCKET.to_string(), 10.0),
            ]
        );
    }

    #[test]
    fn test_overflow_folded_at_finalization() {
        let mut collector = QueryCollector::new(2, 2);
        merge(&mut collector, "q10", 10.0);
        merge(&mut collector, "q30", 30.0);
        merge(&mut collector, "q20", 20.0);

        assert_eq!(
            summarize(&collector),
            vec![
                ("q30".to_string(), 30.0),
                ("q20".to_string(), 20.0),
                (LIMIT_EXCEEDED_BUCKET.to_string(), 10.0),
            ]
        );
    }

    #[test]
    fn test_bucket_resorted_after_fold() {
        let mut collector = QueryCollector::new(3, 2);
        for (text, nanos) in [("q50", 50.0), ("q40", 40.0), ("q30", 30.0), ("q20", 20.0), ("q10", 10.0)] {
            merge(&mut collector, text, nanos);
        }
        assert_eq!(
            summarize(&collector),
            vec![
                ("q50".to_string(), 50.0),
                ("q40".to_string(), 40.0),
                (LIMIT_EXCEEDED_BUCKET.to_string(), 30.0),
                ("q30".to_string(), 30.0),
            ]
        );
    }

    #[test]
    fn test_swollen_bucket_outranks_kept_entries() {
        let mut collector = QueryCollector::new(2, 5);
        for (text, nanos) in [("a", 100.0), ("b", 50.0), ("c", 45.0), ("d", 40.0)] {
            merge(&mut collector, text, nanos);
        }
        // c + d fold to 85 and land ahead of b
        assert_eq!(
            summarize(&collector),
            vec![
                ("a".to_string(), 100.0),
                (LIMIT_EXCEEDED_BUCKET.to_string(), 85.0),
                ("b".to_string(), 50.0),
            ]
        );
    }

    #[test]
    fn test_rows_and_active_carried_to_output() {
        let mut collector = QueryCollector::new(10, 2);
        collector.merge_query("SQL", "select", 5.0, 2, true, 0, true);
        collector.merge_query("SQL", "update", 5.0, 2, false, 0, false);
        let mut texts = SharedQueryTextCollection::new();
        let queries = collector.to_aggregate_queries(&mut texts, true);
        let select = queries
            .iter()
            .find(|query| texts.texts()[query.shared_query_text_index as usize].truncated_text == "select")
            .unwrap();
        assert_eq!(select.total_rows, Some(0));
        assert_eq!(select.active, Some(true));
        let update = queries
            .iter()
            .find(|query| texts.texts()[query.shared_query_text_index as usize].truncated_text == "update")
            .unwrap();
        assert_eq!(update.total_rows, None);
        assert_eq!(update.active, None);
    }

    #[test]
    fn test_full_query_text_round_trip() {
        let mut collector = QueryCollector::with_truncate_length(10, 2, 20);
        let long_text = "select * from a_table_with_a_long_name where x = ?";
        collector.merge_query("SQL", long_text, 1.0, 1, false, 0, false);

        let mut texts = SharedQueryTextCollection::new();
        let queries = collector.to_aggregate_queries(&mut texts, false);
        let shared = &texts.texts()[queries[0].shared_query_text_index as usize];
        assert_eq!(shared.truncated_text.chars().count(), 20);
        let sha = shared.full_text_sha.clone().unwrap();

        assert_eq!(collector.get_full_query_text(&sha), Some(long_text));
        assert_eq!(collector.get_full_query_text("nope"), None);
    }

    #[test]
    fn test_merge_queries_into_keeps_buckets() {
        let mut source = QueryCollector::new(1, 1);
        merge(&mut source, "a", 10.0);
        merge(&mut source, "b", 5.0);
        let mut target = QueryCollector::new(5, 2);
        merge(&mut target, "a", 1.0);
        source.merge_queries_into(&mut target);

        assert_eq!(target.get("SQL", "a").unwrap().total_duration_nanos(), 11.0);
        assert_eq!(target.limit_exceeded_bucket("SQL").unwrap().total_duration_nanos(), 5.0);
        assert!(target.get("SQL", "b").is_none());
    }

    #[test]
    fn test_merge_query_message_round_trip() {
        let mut source = QueryCollector::with_truncate_length(1, 1, 5);
        source.merge_query("SQL", "select everything", 10.0, 1, true, 4, false);
        source.merge_query("SQL", "other", 3.0, 1, false, 0, false);
        let mut texts = SharedQueryTextCollection::new();
        let messages = source.to_aggregate_queries(&mut texts, false);

        let mut target = QueryCollector::with_truncate_length(10, 2, 5);
        for message in &messages {
            target.merge_query_message(message, texts.texts());
        }
        let sha = full_text_sha("select everything");
        let entry = target.get("SQL", "selec").unwrap();
        assert_eq!(entry.full_text_sha(), Some(sha.as_str()));
        assert_eq!(entry.total_rows(), 4);
        assert_eq!(target.limit_exceeded_bucket("SQL").unwrap().total_duration_nanos(), 3.0);
    }

    #[test]
    fn test_service_call_collector_overflow() {
        let mut collector = ServiceCallCollector::new(1, 1);
        collector.merge_service_call("HTTP", "GET /a", 10.0, 1, false);
        collector.merge_service_call("HTTP", "GET /b", 30.0, 1, true);
        let calls = collector.to_aggregate_service_calls(true);
        assert_eq!(calls.len(), 2);
        assert_eq!(calls[0].text, LIMIT_EXCEEDED_BUCKET);
        assert_eq!(calls[0].total_duration_nanos, 30.0);
        assert_eq!(calls[0].active, Some(true));
        assert_eq!(calls[1].text, "GET /a");

        let mut rollup = ServiceCallCollector::new(5, 2);
        for call in &calls {
            rollup.merge_service_call_message(call);
        }
        assert_eq!(rollup.entry_count(), 1);
        assert_eq!(rollup.limit_exceeded_bucket("HTTP").unwrap().execution_count(), 1);
    }

    #[test]
    fn test_merge_service_calls_into_keeps_buckets() {
        let mut source = ServiceCallCollector::new(1, 1);
        source.merge_service_call("HTTP", "GET /a", 10.0, 1, false);
        source.merge_service_call("HTTP", "GET /b", 5.0, 2, false);

        let mut target = ServiceCallCollector::new(5, 2);
        target.merge_service_call("HTTP", "GET /a", 1.0, 1, false);
        source.merge_service_calls_into(&mut target);

        assert_eq!(target.entry_count(), 1);
        assert_eq!(target.limit_exceeded_bucket("HTTP").unwrap().execution_count(), 2);
        let calls = target.to_aggregate_service_calls(false);
        assert_eq!(calls[0].text, "GET /a");
        assert_eq!(calls[0].total_duration_nanos, 11.0);
        assert_eq!(calls[0].execution_count, 2);
    }
}
