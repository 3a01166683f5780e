#![allow(dead_code)]

use std::sync::Arc;

use apm_collector::aggregate::QueryCollector;
use apm_collector::aggregate::SharedQueryTextCollection;
use apm_collector::common::FakeTicker;
use apm_collector::config::StorageConfig;
use apm_collector::model::AggregateMessage;
use apm_collector::storage::{RecordingDriver, Session};
use apm_collector::transaction::TransactionQueryCollector;

/// Session over an in-memory driver with default settings
pub fn create_recording_session() -> (Arc<RecordingDriver>, Session) {
    create_session_with_driver(RecordingDriver::new(), StorageConfig::default())
}

pub fn create_session_with_driver(driver: RecordingDriver, config: StorageConfig) -> (Arc<RecordingDriver>, Session) {
    let driver = Arc::new(driver);
    let session = Session::new(driver.clone(), &config);
    (driver, session)
}

/// Storage config allowing `max` concurrent requests and no schema retries
pub fn create_storage_config(max: usize) -> StorageConfig {
    StorageConfig {
        max_concurrent_requests: max,
        schema_retry_timeout_seconds: 0,
        ..StorageConfig::default()
    }
}

/// One executed query of a captured transaction: (type, text, start tick, end tick)
pub type CapturedQuery<'a> = (&'a str, &'a str, i64, i64);

/// Run `queries` through a transaction collector capped at `query_limit`
/// texts and package the result the way an agent reports it
pub fn create_captured_aggregate(
    agent_rollup_id: &str,
    transaction_name: Option<&str>,
    query_limit: usize,
    queries: &[CapturedQuery<'_>],
) -> AggregateMessage {
    let ticker = FakeTicker::new(0);
    let mut transaction = TransactionQueryCollector::new(query_limit);
    let mut duration = 0;
    for (query_type, query_text, start, end) in queries {
        let mut slot = transaction.start(query_type, query_text, *start, 1);
        transaction.end(&mut slot, *end);
        duration = duration.max(*end);
    }

    let mut collector = QueryCollector::new(500, 2);
    transaction.merge_into(&mut collector, &ticker);
    let mut shared_query_texts = SharedQueryTextCollection::new();
    let aggregate_queries = collector.to_aggregate_queries(&mut shared_query_texts, true);

    let mut message = AggregateMessage::new(agent_rollup_id, "Web", 0);
    message.transaction_name = transaction_name.map(str::to_string);
    message.total_duration_nanos = duration as f64;
    message.transaction_count = 1;
    message.queries = aggregate_queries;
    message.shared_query_texts = shared_query_texts.into_texts();
    message
}
