use std::collections::BTreeMap;
use std::time::Instant;

use kameo::actor::{ActorRef, WeakActorRef};
use kameo::error::{ActorStopReason, BoxError};
use kameo::message::{Context, Message};
use kameo::{mailbox::unbounded::UnboundedMailbox, Actor};
use serde::Serialize;
use tracing::{debug, error, info, warn};

use super::errors::AggregateError;
use super::interval::{AggregateInterval, IntervalLimits};
use crate::metrics::get_metrics;
use crate::model::AggregateMessage;
use crate::rate_limiter::RateLimiter;
use crate::storage::{wait_for_all, ExecutionContext, Session, Statement, StorageError, Value};

const OVERVIEW_TABLE: &str = "create table if not exists aggregate_overview (agent_rollup varchar, \
    transaction_type varchar, transaction_name varchar, capture_time timestamp, \
    total_duration_nanos double, transaction_count bigint, error_count bigint, \
    async_transactions boolean, main_thread_root_timers blob, aux_thread_root_timers blob, \
    main_thread_stats blob, aux_thread_stats blob, \
    primary key ((agent_rollup, transaction_type), capture_time, transaction_name))";

const QUERY_TABLE: &str = "create table if not exists aggregate_query (agent_rollup varchar, \
    transaction_type varchar, transaction_name varchar, capture_time timestamp, query_type varchar, \
    truncated_query_text varchar, full_query_text_sha varchar, total_duration_nanos double, \
    execution_count bigint, total_rows bigint, \
    primary key ((agent_rollup, transaction_type), capture_time, transaction_name, query_type, \
    truncated_query_text))";

const SERVICE_CALL_TABLE: &str = "create table if not exists aggregate_service_call (agent_rollup varchar, \
    transaction_type varchar, transaction_name varchar, capture_time timestamp, \
    service_call_type varchar, service_call_text varchar, total_duration_nanos double, \
    execution_count bigint, \
    primary key ((agent_rollup, transaction_type), capture_time, transaction_name, \
    service_call_type, service_call_text))";

const PROFILE_TABLE: &str = "create table if not exists aggregate_profile (agent_rollup varchar, \
    transaction_type varchar, transaction_name varchar, capture_time timestamp, \
    main_thread_profile blob, aux_thread_profile blob, \
    primary key ((agent_rollup, transaction_type), capture_time, transaction_name))";

const QUERY_TEXT_TABLE: &str = "create table if not exists query_text (full_query_text_sha varchar, \
    full_query_text varchar, primary key (full_query_text_sha))";

const INSERT_OVERVIEW: &str = "insert into aggregate_overview (agent_rollup, transaction_type, \
    transaction_name, capture_time, total_duration_nanos, transaction_count, error_count, \
    async_transactions, main_thread_root_timers, aux_thread_root_timers, main_thread_stats, \
    aux_thread_stats) values (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)";

const INSERT_QUERY: &str = "insert into aggregate_query (agent_rollup, transaction_type, \
    transaction_name, capture_time, query_type, truncated_query_text, full_query_text_sha, \
    total_duration_nanos, execution_count, total_rows) values (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)";

const INSERT_SERVICE_CALL: &str = "insert into aggregate_service_call (agent_rollup, transaction_type, \
    transaction_name, capture_time, service_call_type, service_call_text, total_duration_nanos, \
    execution_count) values (?, ?, ?, ?, ?, ?, ?, ?)";

const INSERT_PROFILE: &str = "insert into aggregate_profile (agent_rollup, transaction_type, \
    transaction_name, capture_time, main_thread_profile, aux_thread_profile) \
    values (?, ?, ?, ?, ?, ?)";

const INSERT_QUERY_TEXT: &str = "insert into query_text (full_query_text_sha, full_query_text) values (?, ?)";

/// Create every aggregate table; safe to call on each startup
pub async fn create_aggregate_tables(session: &Session, expiration_hours: u32) -> Result<(), StorageError> {
    for table in [OVERVIEW_TABLE, QUERY_TABLE, SERVICE_CALL_TABLE, PROFILE_TABLE] {
        session.create_table_with_twcs(table, expiration_hours).await?;
    }
    session.create_table_with_stcs(QUERY_TEXT_TABLE).await?;
    info!("🗄️ Aggregate tables ready in keyspace {}", session.keyspace());
    Ok(())
}

/// (agent rollup, transaction type, transaction name); no name is the overall row
type IntervalKey = (String, String, Option<String>);

#[derive(Debug, Clone)]
pub enum AggregateTell {
    /// Merge one agent's aggregate into the current window
    Merge { message: AggregateMessage },
}

#[derive(Debug, Clone)]
pub enum AggregateAsk {
    /// Write the current window and start a new one
    Flush { capture_time: i64 },
    /// Merge and wait until the message is part of the window
    MergeAndConfirm { message: AggregateMessage },
    GetStatus,
    GetFullQueryText { sha: String },
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FlushSummary {
    pub agent_rollups: usize,
    pub skipped_agent_rollups: usize,
    pub intervals: usize,
    pub statements: usize,
}

#[derive(Debug, Clone, PartialEq)]
pub enum AggregateReply {
    Flushed(FlushSummary),
    Status {
        interval_count: usize,
        merged_count: u64,
        last_flush: Option<FlushSummary>,
    },
    FullQueryText(Option<String>),
    Success,
}

/// Owns the aggregation window; merges arrive one at a time through the mailbox
pub struct AggregateActor {
    session: Session,
    limits: IntervalLimits,
    intervals: BTreeMap<IntervalKey, AggregateInterval>,
    flush_limiter: RateLimiter<(String, i64)>,
    query_text_limiter: RateLimiter<String>,
    merged_count: u64,
    last_flush: Option<FlushSummary>,
}

impl AggregateActor {
    pub fn new(session: Session, limits: IntervalLimits) -> Self {
        Self {
            session,
            limits,
            intervals: BTreeMap::new(),
            flush_limiter: RateLimiter::new("aggregate_flush"),
            query_text_limiter: RateLimiter::new("query_text"),
            merged_count: 0,
            last_flush: None,
        }
    }

    fn merge(&mut self, message: &AggregateMessage) {
        let overall = (
            message.agent_rollup_id.clone(),
            message.transaction_type.clone(),
            None,
        );
        self.interval(overall).merge(message);
        if let Some(transaction_name) = &message.transaction_name {
            let named = (
                message.agent_rollup_id.clone(),
                message.transaction_type.clone(),
                Some(transaction_name.clone()),
            );
            self.interval(named).merge(message);
        }
        self.merged_count += 1;
        if let Some(metrics) = get_metrics() {
            metrics.record_aggregate_merged(&message.transaction_type);
        }
    }

    fn interval(&mut self, key: IntervalKey) -> &mut AggregateInterval {
        let limits = self.limits;
        self.intervals.entry(key).or_insert_with_key(|(agent_rollup_id, transaction_type, transaction_name)| {
            AggregateInterval::new(agent_rollup_id, transaction_type, transaction_name.as_deref(), limits)
        })
    }

    fn full_query_text(&self, sha: &str) -> Option<String> {
        self.intervals
            .values()
            .find_map(|interval| interval.queries().get_full_query_text(sha))
            .map(str::to_string)
    }

    async fn flush(&mut self, capture_time: i64) -> Result<AggregateReply, AggregateError> {
        let started = Instant::now();
        let mut by_agent_rollup: BTreeMap<String, Vec<AggregateInterval>> = BTreeMap::new();
        for ((agent_rollup_id, _, _), interval) in std::mem::take(&mut self.intervals) {
            by_agent_rollup.entry(agent_rollup_id).or_default().push(interval);
        }

        let mut summary = FlushSummary::default();
        let mut failures = Vec::new();
        for (agent_rollup_id, intervals) in by_agent_rollup {
            let key = (agent_rollup_id.clone(), capture_time);
            if !self.flush_limiter.try_acquire(key.clone()) {
                warn!(
                    "⏭️ Window {} of {} already flushed, dropping {} intervals",
                    capture_time,
                    agent_rollup_id,
                    intervals.len()
                );
                summary.skipped_agent_rollups += 1;
                continue;
            }
            match self.write_agent_rollup(&intervals, capture_time).await {
                Ok(statements) => {
                    summary.agent_rollups += 1;
                    summary.intervals += intervals.len();
                    summary.statements += statements;
                }
                Err(error) => {
                    error!("❌ Failed to flush {} at {}: {}", agent_rollup_id, capture_time, error);
                    self.flush_limiter.release(&key);
                    for interval in intervals {
                        self.restore(interval);
                    }
                    failures.push(error);
                }
            }
        }

        let success = failures.is_empty();
        if let Some(metrics) = get_metrics() {
            metrics.record_flush(success, started.elapsed().as_secs_f64());
        }
        if !success {
            if failures.len() == 1 {
                return Err(failures.remove(0));
            }
            return Err(AggregateError::PartialFlush {
                failed: failures.len(),
                first: failures[0].to_string(),
            });
        }
        info!(
            "💾 Flushed window {}: {} agent rollups, {} intervals, {} statements",
            capture_time, summary.agent_rollups, summary.intervals, summary.statements
        );
        self.last_flush = Some(summary.clone());
        Ok(AggregateReply::Flushed(summary))
    }

    fn restore(&mut self, interval: AggregateInterval) {
        let key = (
            interval.agent_rollup_id().to_string(),
            interval.transaction_type().to_string(),
            interval.transaction_name().map(str::to_string),
        );
        match self.intervals.get_mut(&key) {
            Some(existing) => existing.merge_interval(&interval),
            None => {
                self.intervals.insert(key, interval);
            }
        }
    }

    async fn write_agent_rollup(
        &self,
        intervals: &[AggregateInterval],
        capture_time: i64,
    ) -> Result<usize, AggregateError> {
        let mut acquired_shas = Vec::new();
        let result = self
            .write_intervals(intervals, capture_time, &mut acquired_shas)
            .await;
        if result.is_err() {
            for sha in &acquired_shas {
                self.query_text_limiter.release(sha);
            }
        }
        result
    }

    async fn write_intervals(
        &self,
        intervals: &[AggregateInterval],
        capture_time: i64,
        acquired_shas: &mut Vec<String>,
    ) -> Result<usize, AggregateError> {
        let mut pending = Vec::new();
        for interval in intervals {
            let context = ExecutionContext::rollup()
                .with_agent_rollup_id(interval.agent_rollup_id())
                .with_transaction(interval.transaction_type(), interval.transaction_name());
            for statement in self.statements(interval, capture_time, acquired_shas)? {
                pending.push(self.session.write_async(statement, &context)?);
            }
        }
        let count = pending.len();
        wait_for_all(pending).await?;
        debug!("📝 Wrote {} statements for {} intervals", count, intervals.len());
        Ok(count)
    }

    fn statements(
        &self,
        interval: &AggregateInterval,
        capture_time: i64,
        acquired_shas: &mut Vec<String>,
    ) -> Result<Vec<Statement>, AggregateError> {
        let message = interval.to_message(capture_time, false);
        let row_key = |query: &str| {
            Statement::new(query)
                .bind(message.agent_rollup_id.as_str())
                .bind(message.transaction_type.as_str())
                .bind(message.transaction_name.clone().unwrap_or_default())
                .bind(Value::Timestamp(capture_time))
        };

        let mut statements = vec![row_key(INSERT_OVERVIEW)
            .bind(message.total_duration_nanos)
            .bind(message.transaction_count)
            .bind(message.error_count)
            .bind(message.async_transactions)
            .bind(blob(&message.main_thread_root_timers)?)
            .bind(blob(&message.aux_thread_root_timers)?)
            .bind(optional_blob(message.main_thread_stats.as_ref())?)
            .bind(optional_blob(message.aux_thread_stats.as_ref())?)];

        for query in &message.queries {
            let Some(text) = message.query_text(query) else {
                warn!("⚠️ Query references missing shared text {}", query.shared_query_text_index);
                continue;
            };
            statements.push(
                row_key(INSERT_QUERY)
                    .bind(query.query_type.as_str())
                    .bind(text.truncated_text.as_str())
                    .bind(text.full_text_sha.clone())
                    .bind(query.total_duration_nanos)
                    .bind(query.execution_count)
                    .bind(query.total_rows),
            );
            if let Some(sha) = &text.full_text_sha {
                let full_text = interval.queries().get_full_query_text(sha);
                if let Some(full_text) = full_text {
                    if self.query_text_limiter.try_acquire(sha.clone()) {
                        acquired_shas.push(sha.clone());
                        statements.push(Statement::new(INSERT_QUERY_TEXT).bind(sha.as_str()).bind(full_text));
                    }
                }
            }
        }

        for service_call in &message.service_calls {
            statements.push(
                row_key(INSERT_SERVICE_CALL)
                    .bind(service_call.service_call_type.as_str())
                    .bind(service_call.text.as_str())
                    .bind(service_call.total_duration_nanos)
                    .bind(service_call.execution_count),
            );
        }

        if message.main_thread_profile.is_some() || message.aux_thread_profile.is_some() {
            statements.push(
                row_key(INSERT_PROFILE)
                    .bind(optional_blob(message.main_thread_profile.as_ref())?)
                    .bind(optional_blob(message.aux_thread_profile.as_ref())?),
            );
        }
        Ok(statements)
    }
}

fn blob<T: Serialize>(value: &T) -> Result<Value, AggregateError> {
    Ok(Value::Blob(serde_json::to_vec(value)?))
}

fn optional_blob<T: Serialize>(value: Option<&T>) -> Result<Value, AggregateError> {
    match value {
        Some(value) => blob(value),
        None => Ok(Value::Null),
    }
}

impl Actor for AggregateActor {
    type Mailbox = UnboundedMailbox<Self>;

    fn name() -> &'static str {
        "AggregateActor"
    }

    async fn on_start(&mut self, _actor_ref: ActorRef<Self>) -> Result<(), BoxError> {
        info!(
            "🚀 AggregateActor started (max {} queries, {} service calls per interval)",
            self.limits.max_query_aggregates, self.limits.max_service_call_aggregates
        );
        Ok(())
    }

    async fn on_stop(&mut self, _actor_ref: WeakActorRef<Self>, reason: ActorStopReason) -> Result<(), BoxError> {
        if !self.intervals.is_empty() {
            warn!(
                "⚠️ AggregateActor stopping with {} unflushed intervals: {:?}",
                self.intervals.len(),
                reason
            );
        } else {
            info!("AggregateActor stopping: {:?}", reason);
        }
        Ok(())
    }
}

impl Message<AggregateTell> for AggregateActor {
    type Reply = ();

    async fn handle(&mut self, msg: AggregateTell, _ctx: Context<'_, Self, Self::Reply>) -> Self::Reply {
        match msg {
            AggregateTell::Merge { message } => self.merge(&message),
        }
    }
}

impl Message<AggregateAsk> for AggregateActor {
    type Reply = Result<AggregateReply, AggregateError>;

    async fn handle(&mut self, msg: AggregateAsk, _ctx: Context<'_, Self, Self::Reply>) -> Self::Reply {
        match msg {
            AggregateAsk::Flush { capture_time } => self.flush(capture_time).await,
            AggregateAsk::MergeAndConfirm { message } => {
                self.merge(&message);
                Ok(AggregateReply::Success)
            }
            AggregateAsk::GetStatus => Ok(AggregateReply::Status {
                interval_count: self.intervals.len(),
                merged_count: self.merged_count,
                last_flush: self.last_flush.clone(),
            }),
            AggregateAsk::GetFullQueryText { sha } => Ok(AggregateReply::FullQueryText(self.full_query_text(&sha))),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::config::StorageConfig;
    use crate::model::{AggregateQuery, AggregateServiceCall, SharedQueryText};
    use crate::storage::{DriverError, RecordingDriver};

    fn session(driver: &Arc<RecordingDriver>) -> Session {
        Session::new(driver.clone(), &StorageConfig::default())
    }

    fn message(agent: &str, name: Option<&str>, query_text: &str) -> AggregateMessage {
        let mut message = AggregateMessage::new(agent, "Web", 0);
        message.transaction_name = name.map(str::to_string);
        message.total_duration_nanos = 1_000.0;
        message.transaction_count = 1;
        message.shared_query_texts = vec![SharedQueryText {
            truncated_text: query_text.to_string(),
            full_text_sha: None,
        }];
        message.queries = vec![AggregateQuery {
            query_type: "SQL".to_string(),
            shared_query_text_index: 0,
            total_duration_nanos: 400.0,
            execution_count: 2,
            total_rows: Some(5),
            active: None,
        }];
        message.service_calls = vec![AggregateServiceCall {
            service_call_type: "HTTP".to_string(),
            text: "GET /inventory".to_string(),
            total_duration_nanos: 100.0,
            execution_count: 1,
            active: None,
        }];
        message
    }

    #[tokio::test]
    async fn test_merge_builds_overall_and_named_intervals() {
        let driver = Arc::new(RecordingDriver::new());
        let actor_ref = kameo::spawn(AggregateActor::new(session(&driver), IntervalLimits::default()));

        actor_ref
            .ask(AggregateAsk::MergeAndConfirm { message: message("agent-1", Some("/checkout"), "select 1") })
            .await
            .unwrap();
        actor_ref
            .ask(AggregateAsk::MergeAndConfirm { message: message("agent-1", None, "select 2") })
            .await
            .unwrap();

        match actor_ref.ask(AggregateAsk::GetStatus).await.unwrap() {
            AggregateReply::Status { interval_count, merged_count, last_flush } => {
                assert_eq!(interval_count, 2);
                assert_eq!(merged_count, 2);
                assert!(last_flush.is_none());
            }
            reply => panic!("Expected Status, got {:?}", reply),
        }
    }

    #[tokio::test]
    async fn test_flush_writes_rows_with_rollup_attribution() {
        let driver = Arc::new(RecordingDriver::new());
        let session = session(&driver);
        create_aggregate_tables(&session, 720).await.unwrap();
        let actor_ref = kameo::spawn(AggregateActor::new(session.clone(), IntervalLimits::default()));

        actor_ref
            .ask(AggregateAsk::MergeAndConfirm { message: message("agent-1", Some("/checkout"), "select 1") })
            .await
            .unwrap();
        let reply = actor_ref.ask(AggregateAsk::Flush { capture_time: 60_000 }).await.unwrap();
        let AggregateReply::Flushed(summary) = reply else {
            panic!("Expected Flushed, got {:?}", reply);
        };
        assert_eq!(summary.agent_rollups, 1);
        assert_eq!(summary.intervals, 2);
        // overview + query + service call, for the overall and the named interval
        assert_eq!(summary.statements, 6);

        assert_eq!(driver.rows("aggregate_overview").len(), 2);
        assert_eq!(driver.rows("aggregate_query").len(), 2);
        assert_eq!(driver.rows("aggregate_service_call").len(), 2);
        assert!(driver.rows("aggregate_profile").is_empty());

        let counts = session.write_metrics().table_counts("aggregate_overview");
        assert_eq!(counts.rows, 2);

        match actor_ref.ask(AggregateAsk::GetStatus).await.unwrap() {
            AggregateReply::Status { interval_count, .. } => assert_eq!(interval_count, 0),
            reply => panic!("Expected Status, got {:?}", reply),
        }
    }

    #[tokio::test]
    async fn test_repeated_flush_of_same_window_is_skipped() {
        let driver = Arc::new(RecordingDriver::new());
        let actor_ref = kameo::spawn(AggregateActor::new(session(&driver), IntervalLimits::default()));

        actor_ref
            .ask(AggregateAsk::MergeAndConfirm { message: message("agent-1", None, "select 1") })
            .await
            .unwrap();
        actor_ref.ask(AggregateAsk::Flush { capture_time: 60_000 }).await.unwrap();

        actor_ref
            .ask(AggregateAsk::MergeAndConfirm { message: message("agent-1", None, "select 1") })
            .await
            .unwrap();
        let reply = actor_ref.ask(AggregateAsk::Flush { capture_time: 60_000 }).await.unwrap();
        let AggregateReply::Flushed(summary) = reply else {
            panic!("Expected Flushed, got {:?}", reply);
        };
        assert_eq!(summary.skipped_agent_rollups, 1);
        assert_eq!(driver.rows("aggregate_overview").len(), 1);
    }

    #[tokio::test]
    async fn test_failed_flush_keeps_window() {
        let driver = Arc::new(RecordingDriver::new());
        let actor_ref = kameo::spawn(AggregateActor::new(session(&driver), IntervalLimits::default()));
        actor_ref
            .ask(AggregateAsk::MergeAndConfirm { message: message("agent-1", None, "select 1") })
            .await
            .unwrap();

        driver.fail_next(1, DriverError::Unavailable("no replicas".to_string()));
        let result = actor_ref.ask(AggregateAsk::Flush { capture_time: 60_000 }).await;
        assert!(result.is_err());

        match actor_ref.ask(AggregateAsk::GetStatus).await.unwrap() {
            AggregateReply::Status { interval_count, .. } => assert_eq!(interval_count, 1),
            reply => panic!("Expected Status, got {:?}", reply),
        }
        let reply = actor_ref.ask(AggregateAsk::Flush { capture_time: 60_000 }).await.unwrap();
        assert!(matches!(reply, AggregateReply::Flushed(FlushSummary { agent_rollups: 1, .. })));
    }

    #[tokio::test]
    async fn test_long_query_text_written_once() {
        let driver = Arc::new(RecordingDriver::new());
        let limits = IntervalLimits {
            query_text_truncate: 10,
            ..IntervalLimits::default()
        };
        let actor_ref = kameo::spawn(AggregateActor::new(session(&driver), limits));
        let long_text = "select id, name, price from products where category = ?";

        actor_ref
            .ask(AggregateAsk::MergeAndConfirm { message: message("agent-1", None, long_text) })
            .await
            .unwrap();
        let sha = crate::aggregate::shared_text::full_text_sha(long_text);
        let reply = actor_ref
            .ask(AggregateAsk::GetFullQueryText { sha: sha.clone() })
            .await
            .unwrap();
        assert_eq!(reply, AggregateReply::FullQueryText(Some(long_text.to_string())));

        actor_ref.ask(AggregateAsk::Flush { capture_time: 60_000 }).await.unwrap();
        actor_ref
            .ask(AggregateAsk::MergeAndConfirm { message: message("agent-1", None, long_text) })
            .await
            .unwrap();
        actor_ref.ask(AggregateAsk::Flush { capture_time: 120_000 }).await.unwrap();

        let texts = driver.rows("query_text");
        assert_eq!(texts.len(), 1);
        assert_eq!(texts[0][0], Value::Text(sha));
    }
}
