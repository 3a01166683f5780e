use tracing::debug;

use super::profile::MutableProfile;
use super::query_collector::{QueryCollector, ServiceCallCollector};
use super::shared_text::SharedQueryTextCollection;
use super::thread_stats::MutableThreadStats;
use super::timers::{merge_root_timers, MutableAggregateTimer};
use crate::model::AggregateMessage;

/// Limits applied to every interval built by the aggregation window
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct IntervalLimits {
    pub max_query_aggregates: usize,
    pub max_service_call_aggregates: usize,
    pub hard_limit_multiplier_while_building: usize,
    pub query_text_truncate: usize,
}

impl Default for IntervalLimits {
    fn default() -> Self {
        use crate::common::constants::*;
        Self {
            max_query_aggregates: DEFAULT_MAX_QUERY_AGGREGATES,
            max_service_call_aggregates: DEFAULT_MAX_SERVICE_CALL_AGGREGATES,
            hard_limit_multiplier_while_building: DEFAULT_HARD_LIMIT_MULTIPLIER,
            query_text_truncate: DEFAULT_QUERY_TEXT_TRUNCATE,
        }
    }
}

/// Everything merged for one (agent rollup, transaction type, transaction name)
/// during one aggregation window
#[derive(Debug, Clone)]
pub struct AggregateInterval {
    agent_rollup_id: String,
    transaction_type: String,
    transaction_name: Option<String>,
    total_duration_nanos: f64,
    transaction_count: i64,
    error_count: i64,
    async_transactions: bool,
    main_thread_root_timers: Vec<MutableAggregateTimer>,
    aux_thread_root_timers: Vec<MutableAggregateTimer>,
    main_thread_stats: MutableThreadStats,
    aux_thread_stats: MutableThreadStats,
    queries: QueryCollector,
    service_calls: ServiceCallCollector,
    main_thread_profile: MutableProfile,
    aux_thread_profile: MutableProfile,
}

impl AggregateInterval {
    pub fn new(
        agent_rollup_id: &str,
        transaction_type: &str,
        transaction_name: Option<&str>,
        limits: IntervalLimits,
    ) -> Self {
        Self {
            agent_rollup_id: agent_rollup_id.to_string(),
            transaction_type: transaction_type.to_string(),
            transaction_name: transaction_name.map(str::to_string),
            total_duration_nanos: 0.0,
            transaction_count: 0,
            error_count: 0,
            async_transactions: false,
            main_thread_root_timers: Vec::new(),
            aux_thread_root_timers: Vec::new(),
            main_thread_stats: MutableThreadStats::new(),
            aux_thread_stats: MutableThreadStats::new(),
            queries: QueryCollector::with_truncate_length(
                limits.max_query_aggregates,
                limits.hard_limit_multiplier_while_building,
                limits.query_text_truncate,
            ),
            service_calls: ServiceCallCollector::new(
                limits.max_service_call_aggregates,
                limits.hard_limit_multiplier_while_building,
            ),
            main_thread_profile: MutableProfile::new(),
            aux_thread_profile: MutableProfile::new(),
        }
    }

    pub fn agent_rollup_id(&self) -> &str {
        &self.agent_rollup_id
    }

    pub fn transaction_type(&self) -> &str {
        &self.transaction_type
    }

    pub fn transaction_name(&self) -> Option<&str> {
        self.transaction_name.as_deref()
    }

    pub fn transaction_count(&self) -> i64 {
        self.transaction_count
    }

    pub fn queries(&self) -> &QueryCollector {
        &self.queries
    }

    pub fn service_calls(&self) -> &ServiceCallCollector {
        &self.service_calls
    }

    pub fn merge(&mut self, message: &AggregateMessage) {
        self.total_duration_nanos += message.total_duration_nanos;
        self.transaction_count += message.transaction_count;
        self.error_count += message.error_count;
        self.async_transactions |= message.async_transactions;
        merge_root_timers(&mut self.main_thread_root_timers, &message.main_thread_root_timers);
        merge_root_timers(&mut self.aux_thread_root_timers, &message.aux_thread_root_timers);
        if let Some(stats) = &message.main_thread_stats {
            self.main_thread_stats.merge(stats);
        }
        if let Some(stats) = &message.aux_thread_stats {
            self.aux_thread_stats.merge(stats);
        }
        for query in &message.queries {
            self.queries
                .merge_query_message(query, &message.shared_query_texts);
        }
        for service_call in &message.service_calls {
            self.service_calls.merge_service_call_message(service_call);
        }
        if let Some(profile) = &message.main_thread_profile {
            self.main_thread_profile.merge(profile);
        }
        if let Some(profile) = &message.aux_thread_profile {
            self.aux_thread_profile.merge(profile);
        }
        debug!(
            "🔀 Merged aggregate into {}/{} ({} transactions so far)",
            self.agent_rollup_id, self.transaction_type, self.transaction_count
        );
    }

    /// Fold another interval in, for rollups of rollups
    pub fn merge_interval(&mut self, other: &AggregateInterval) {
        self.merge(&other.to_message(0, true));
    }

    pub fn to_message(&self, capture_time: i64, include_active: bool) -> AggregateMessage {
        let mut shared_query_texts = SharedQueryTextCollection::new();
        let queries = self
            .queries
            .to_aggregate_queries(&mut shared_query_texts, include_active);
        AggregateMessage {
            agent_rollup_id: self.agent_rollup_id.clone(),
            transaction_type: self.transaction_type.clone(),
            transaction_name: self.transaction_name.clone(),
            capture_time,
            total_duration_nanos: self.total_duration_nanos,
            transaction_count: self.transaction_count,
            error_count: self.error_count,
            async_transactions: self.async_transactions,
            main_thread_root_timers: self
                .main_thread_root_timers
                .iter()
                .map(MutableAggregateTimer::to_aggregate_timer)
                .collect(),
            aux_thread_root_timers: self
                .aux_thread_root_timers
                .iter()
                .map(MutableAggregateTimer::to_aggregate_timer)
                .collect(),
            main_thread_stats: self.main_thread_stats.to_message(),
            aux_thread_stats: self.aux_thread_stats.to_message(),
            queries,
            service_calls: self.service_calls.to_aggregate_service_calls(include_active),
            shared_query_texts: shared_query_texts.into_texts(),
            main_thread_profile: (!self.main_thread_profile.is_empty())
                .then(|| self.main_thread_profile.to_message()),
            aux_thread_profile: (!self.aux_thread_profile.is_empty())
                .then(|| self.aux_thread_profile.to_message()),
        }
    }
}
