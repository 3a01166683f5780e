use crate::model::{AggregateQuery, AggregateServiceCall};

/// Accumulator for one (type, text) query key held by a collector
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MutableQuery {
    total_duration_nanos: f64,
    execution_count: i64,
    has_total_rows: bool,
    total_rows: i64,
    active: bool,
    full_text_sha: Option<String>,
}

impl MutableQuery {
    pub fn total_duration_nanos(&self) -> f64 {
        self.total_duration_nanos
    }

    pub fn execution_count(&self) -> i64 {
        self.execution_count
    }

    pub fn has_total_rows(&self) -> bool {
        self.has_total_rows
    }

    pub fn total_rows(&self) -> i64 {
        self.total_rows
    }

    pub fn is_active(&self) -> bool {
        self.active
    }

    pub fn full_text_sha(&self) -> Option<&str> {
        self.full_text_sha.as_deref()
    }

    pub(crate) fn set_full_text_sha(&mut self, sha: Option<String>) {
        if self.full_text_sha.is_none() {
            self.full_text_sha = sha;
        }
    }

    pub fn add_to_total_duration_nanos(&mut self, nanos: f64) {
        self.total_duration_nanos += nanos;
    }

    pub fn add_to_execution_count(&mut self, count: i64) {
        self.execution_count += count;
    }

    pub fn add_to_total_rows(&mut self, has_total_rows: bool, total_rows: i64) {
        if has_total_rows {
            self.has_total_rows = true;
            self.total_rows += total_rows;
        }
    }

    pub fn set_active(&mut self, active: bool) {
        self.active |= active;
    }

    pub fn add(&mut self, query: &AggregateQuery) {
        self.add_to_total_duration_nanos(query.total_duration_nanos);
        self.add_to_execution_count(query.execution_count);
        match query.total_rows {
            Some(rows) => self.add_to_total_rows(true, rows),
            None => self.add_to_total_rows(false, 0),
        }
        self.set_active(query.active.unwrap_or(false));
    }

    pub fn add_entry(&mut self, other: &MutableQuery) {
        self.add_to_total_duration_nanos(other.total_duration_nanos);
        self.add_to_execution_count(other.execution_count);
        self.add_to_total_rows(other.has_total_rows, other.total_rows);
        self.set_active(other.active);
    }

    pub fn to_aggregate_query(
        &self,
        query_type: &str,
        shared_query_text_index: i32,
        include_active: bool,
    ) -> AggregateQuery {
        AggregateQuery {
            query_type: query_type.to_string(),
            shared_query_text_index,
            total_duration_nanos: self.total_duration_nanos,
            execution_count: self.execution_count,
            total_rows: self.has_total_rows.then_some(self.total_rows),
            active: (include_active && self.active).then_some(true),
        }
    }
}

/// Accumulator for one (type, text) service call key
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MutableServiceCall {
    total_duration_nanos: f64,
    execution_count: i64,
    active: bool,
}

impl MutableServiceCall {
    pub fn total_duration_nanos(&self) -> f64 {
        self.total_duration_nanos
    }

    pub fn execution_count(&self) -> i64 {
        self.execution_count
    }

    pub fn is_active(&self) -> bool {
        self.active
    }

    pub fn add_to_total_duration_nanos(&mut self, nanos: f64) {
        self.total_duration_nanos += nanos;
    }

    pub fn add_to_execution_count(&mut self, count: i64) {
        self.execution_count += count;
    }

    pub fn set_active(&mut self, active: bool) {
        self.active |= active;
    }

    pub fn add(&mut self, service_call: &AggregateServiceCall) {
        self.add_to_total_duration_nanos(service_call.total_duration_nanos);
        self.add_to_execution_count(service_call.execution_count);
        self.set_active(service_call.active.unwrap_or(false));
    }

    pub fn add_entry(&mut self, other: &MutableServiceCall) {
        self.add_to_total_duration_nanos(other.total_duration_nanos);
        self.add_to_execution_count(other.execution_count);
        self.set_active(other.active);
    }

    pub fn to_aggregate_service_call(
        &self,
        service_call_type: &str,
        text: &str,
        include_active: bool,
    ) -> AggregateServiceCall {
        AggregateServiceCall {
            service_call_type: service_call_type.to_string(),
            text: text.to_string(),
            total_duration_nanos: self.total_duration_nanos,
            execution_count: self.execution_count,
            active: (include_active && self.active).then_some(true),
        }
    }
}
