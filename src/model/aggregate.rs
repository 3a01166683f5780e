use serde::{Deserialize, Serialize};

use super::trace::ProfileMessage;

/// One aggregated query record
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AggregateQuery {
    #[serde(rename = "type")]
    pub query_type: String,
    pub shared_query_text_index: i32,
    /// Nanoseconds; floating point so multi-year cumulative totals do not roll over.
    pub total_duration_nanos: f64,
    pub execution_count: i64,
    pub total_rows: Option<i64>,
    pub active: Option<bool>,
}

/// One aggregated service call record
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AggregateServiceCall {
    #[serde(rename = "type")]
    pub service_call_type: String,
    pub text: String,
    pub total_duration_nanos: f64,
    pub execution_count: i64,
    pub active: Option<bool>,
}

/// Entry in the shared query text table referenced by `shared_query_text_index`
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SharedQueryText {
    /// Full text, or its truncated prefix when `full_text_sha` is set.
    pub truncated_text: String,
    pub full_text_sha: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AggregateTimer {
    pub name: String,
    pub extended: bool,
    pub total_nanos: f64,
    pub count: i64,
    pub child_timers: Vec<AggregateTimer>,
}

/// Thread-level totals; a negative value means "not available"
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ThreadStatsMessage {
    pub cpu_nanos: f64,
    pub blocked_nanos: f64,
    pub waited_nanos: f64,
    pub allocated_bytes: f64,
}

impl ThreadStatsMessage {
    pub const NOT_AVAILABLE: ThreadStatsMessage = ThreadStatsMessage {
        cpu_nanos: -1.0,
        blocked_nanos: -1.0,
        waited_nanos: -1.0,
        allocated_bytes: -1.0,
    };
}

/// Aggregate for one (agent rollup, transaction type, optional transaction name)
/// over one capture interval, as received from an agent or a lower rollup.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AggregateMessage {
    pub agent_rollup_id: String,
    pub transaction_type: String,
    pub transaction_name: Option<String>,
    pub capture_time: i64,
    pub total_duration_nanos: f64,
    pub transaction_count: i64,
    pub error_count: i64,
    pub async_transactions: bool,
    pub main_thread_root_timers: Vec<AggregateTimer>,
    pub aux_thread_root_timers: Vec<AggregateTimer>,
    pub main_thread_stats: Option<ThreadStatsMessage>,
    pub aux_thread_stats: Option<ThreadStatsMessage>,
    pub queries: Vec<AggregateQuery>,
    pub service_calls: Vec<AggregateServiceCall>,
    pub shared_query_texts: Vec<SharedQueryText>,
    pub main_thread_profile: Option<ProfileMessage>,
    pub aux_thread_profile: Option<ProfileMessage>,
}

impl AggregateMessage {
    pub fn new(agent_rollup_id: &str, transaction_type: &str, capture_time: i64) -> Self {
        Self {
            agent_rollup_id: agent_rollup_id.to_string(),
            transaction_type: transaction_type.to_string(),
            transaction_name: None,
            capture_time,
            total_duration_nanos: 0.0,
            transaction_count: 0,
            error_count: 0,
            async_transactions: false,
            main_thread_root_timers: Vec::new(),
            aux_thread_root_timers: Vec::new(),
            main_thread_stats: None,
            aux_thread_stats: None,
            queries: Vec::new(),
            service_calls: Vec::new(),
            shared_query_texts: Vec::new(),
            main_thread_profile: None,
            aux_thread_profile: None,
        }
    }

    /// Resolve a query's text through the shared text table
    pub fn query_text(&self, query: &AggregateQuery) -> Option<&SharedQueryText> {
        usize::try_from(query.shared_query_text_index)
            .ok()
            .and_then(|index| self.shared_query_texts.get(index))
    }
}
