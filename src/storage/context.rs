/// Caller context passed into every `Session` call.
///
/// `in_rollup` routes the call through the rollup semaphore whatever the
/// statement kind; the remaining fields attribute written bytes in
/// `WriteMetrics`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExecutionContext {
    pub in_rollup: bool,
    pub agent_rollup_id: Option<String>,
    pub transaction_type: Option<String>,
    pub transaction_name: Option<String>,
}

impl ExecutionContext {
    /// UI or ingest traffic with no attribution
    pub fn request() -> Self {
        Self::default()
    }

    pub fn rollup() -> Self {
        Self {
            in_rollup: true,
            ..Self::default()
        }
    }

    pub fn with_agent_rollup_id(mut self, agent_rollup_id: &str) -> Self {
        self.agent_rollup_id = Some(agent_rollup_id.to_string());
        self
    }

    pub fn with_transaction(mut self, transaction_type: &str, transaction_name: Option<&str>) -> Self {
        self.transaction_type = Some(transaction_type.to_string());
        self.transaction_name = transaction_name.map(str::to_string);
        self
    }
}
