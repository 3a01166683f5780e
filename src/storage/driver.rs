//! Seam between `Session` and the storage cluster.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use rustc_hash::FxHashMap;
use tracing::debug;

use super::errors::DriverError;
use super::statement::{ResultSet, Row, Statement};

#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait StorageDriver: Send + Sync {
    async fn execute(&self, statement: &Statement) -> Result<ResultSet, DriverError>;
}

#[derive(Debug, Default)]
struct RecordingState {
    executed: Vec<Statement>,
    tables: FxHashMap<String, Vec<Row>>,
    failures: VecDeque<DriverError>,
}

/// In-memory driver: records statements, keeps inserted rows per table and
/// can be scripted to fail
#[derive(Debug, Default)]
pub struct RecordingDriver {
    state: Mutex<RecordingState>,
    latency: Option<Duration>,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
}

impl RecordingDriver {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every execution sleeps this long before answering
    pub fn with_latency(latency: Duration) -> Self {
        Self {
            latency: Some(latency),
            ..Self::default()
        }
    }

    /// Fail the next `count` executions with `error`
    pub fn fail_next(&self, count: usize, error: DriverError) {
        let mut state = self.state.lock();
        for _ in 0..count {
            state.failures.push_back(error.clone());
        }
    }

    pub fn executed(&self) -> Vec<Statement> {
        self.state.lock().executed.clone()
    }

    pub fn executed_queries(&self) -> Vec<String> {
        self.state
            .lock()
            .executed
            .iter()
            .map(|statement| statement.query().to_string())
            .collect()
    }

    pub fn execution_count(&self) -> usize {
        self.state.lock().executed.len()
    }

    pub fn rows(&self, table: &str) -> Vec<Row> {
        self.state.lock().tables.get(table).cloned().unwrap_or_default()
    }

    pub fn has_table(&self, table: &str) -> bool {
        self.state.lock().tables.contains_key(table)
    }

    /// Highest number of executions observed in flight at once
    pub fn max_in_flight(&self) -> usize {
        self.max_in_flight.load(Ordering::Acquire)
    }

    fn apply(&self, statement: &Statement) -> Result<ResultSet, DriverError> {
        let mut state = self.state.lock();
        state.executed.push(statement.clone());
        if let Some(error) = state.failures.pop_front() {
            debug!("❌ Scripted failure for {}", statement.query());
            return Err(error);
        }
        let query = statement.query().trim_start().to_ascii_lowercase();
        let table = statement.table_name().map(str::to_string);
        if query.starts_with("create table") {
            let name = query
                .split_whitespace()
                .nth(5)
                .map(|name| name.split('(').next().unwrap_or(name))
                .map(|name| name.rsplit('.').next().unwrap_or(name).to_string());
            if let Some(name) = name {
                state.tables.entry(name).or_default();
            }
            return Ok(ResultSet::default());
        }
        if query.starts_with("drop table") {
            if let Some(name) = query.split_whitespace().last() {
                let name = name.rsplit('.').next().unwrap_or(name);
                state.tables.remove(name);
            }
            return Ok(ResultSet::default());
        }
        match (query.split_whitespace().next(), table) {
            (Some("select"), Some(table)) => Ok(ResultSet::new(
                state.tables.get(&table).cloned().unwrap_or_default(),
            )),
            (Some("insert"), Some(table)) if query.contains(" if not exists") => {
                let rows = state.tables.entry(table).or_default();
                let row = statement.values().to_vec();
                let applied = !rows.iter().any(|existing| existing.first() == row.first());
                if applied {
                    rows.push(row);
                }
                Ok(ResultSet::conditional(applied))
            }
            (Some("insert"), Some(table)) => {
                state
                    .tables
                    .entry(table)
                    .or_default()
                    .push(statement.values().to_vec());
                Ok(ResultSet::default())
            }
            (Some("delete"), Some(table)) => {
                state.tables.remove(&table);
                Ok(ResultSet::default())
            }
            (Some("update"), Some(_)) => Ok(ResultSet::conditional(true)),
            _ => Ok(ResultSet::default()),
        }
    }
}

#[async_trait]
impl StorageDriver for RecordingDriver {
    async fn execute(&self, statement: &Statement) -> Result<ResultSet, DriverError> {
        let in_flight = self.in_flight.fetch_add(1, Ordering::AcqRel) + 1;
        self.max_in_flight.fetch_max(in_flight, Ordering::AcqRel);
        if let Some(latency) = self.latency {
            tokio::time::sleep(latency).await;
        }
        let result = self.apply(statement);
        self.in_flight.fetch_sub(1, Ordering::AcqRel);
        result
    }
}
