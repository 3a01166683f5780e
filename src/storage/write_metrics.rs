//! Breakdown of bytes and rows written by table, agent rollup, transaction
//! type and transaction name.
//!
//! Every level caps its distinct keys; the tail is folded into "Other".

use std::collections::BTreeMap;

use parking_lot::Mutex;
use rustc_hash::FxHashMap;

use super::context::ExecutionContext;
use crate::common::constants::{
    WRITE_METRICS_AGENT_LIMIT, WRITE_METRICS_OTHER, WRITE_METRICS_TRANSACTION_NAME_LIMIT,
    WRITE_METRICS_TRANSACTION_TYPE_LIMIT,
};
use crate::metrics::get_metrics;

const UNKNOWN: &str = "";

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct WriteCounts {
    pub bytes: u64,
    pub rows: u64,
}

impl WriteCounts {
    fn add(&mut self, bytes: u64, rows: u64) {
        self.bytes += bytes;
        self.rows += rows;
    }
}

#[derive(Debug, Default)]
struct Level<C> {
    counts: WriteCounts,
    children: FxHashMap<String, C>,
}

impl<C: Default> Level<C> {
    fn child(&mut self, key: &str, limit: usize) -> &mut C {
        let key = if self.children.contains_key(key) || self.children.len() < limit {
            key
        } else {
            WRITE_METRICS_OTHER
        };
        self.children.entry(key.to_string()).or_default()
    }
}

type NameLevel = WriteCounts;
type TypeLevel = Level<NameLevel>;
type AgentLevel = Level<TypeLevel>;
type TableLevel = Level<AgentLevel>;

/// Flattened row of a write metrics snapshot
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub struct WriteMetricKey {
    pub table: String,
    pub agent_rollup_id: Option<String>,
    pub transaction_type: Option<String>,
    pub transaction_name: Option<String>,
}

#[derive(Debug, Default)]
pub struct WriteMetrics {
    tables: Mutex<FxHashMap<String, TableLevel>>,
}

impl WriteMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&self, table: &str, context: &ExecutionContext, bytes: u64) {
        if let Some(metrics) = get_metrics() {
            metrics.record_write(table, bytes, 1);
        }
        let mut tables = self.tables.lock();
        let table_level = tables.entry(table.to_string()).or_default();
        table_level.counts.add(bytes, 1);
        let agent = table_level.child(
            context.agent_rollup_id.as_deref().unwrap_or(UNKNOWN),
            WRITE_METRICS_AGENT_LIMIT,
        );
        agent.counts.add(bytes, 1);
        let transaction_type = agent.child(
            context.transaction_type.as_deref().unwrap_or(UNKNOWN),
            WRITE_METRICS_TRANSACTION_TYPE_LIMIT,
        );
        transaction_type.counts.add(bytes, 1);
        transaction_type
            .child(
                context.transaction_name.as_deref().unwrap_or(UNKNOWN),
                WRITE_METRICS_TRANSACTION_NAME_LIMIT,
            )
            .add(bytes, 1);
    }

    pub fn table_counts(&self, table: &str) -> WriteCounts {
        self.tables
            .lock()
            .get(table)
            .map(|level| level.counts)
            .unwrap_or_default()
    }

    /// Every level flattened, coarser levels carrying `None` below them
    pub fn snapshot(&self) -> BTreeMap<WriteMetricKey, WriteCounts> {
        let tables = self.tables.lock();
        let mut snapshot = BTreeMap::new();
        for (table, table_level) in tables.iter() {
            snapshot.insert(key(table, None, None, None), table_level.counts);
            for (agent, agent_level) in &table_level.children {
                snapshot.insert(key(table, Some(agent), None, None), agent_level.counts);
                for (transaction_type, type_level) in &agent_level.children {
                    snapshot.insert(
                        key(table, Some(agent), Some(transaction_type), None),
                        type_level.counts,
                    );
                    for (transaction_name, counts) in &type_level.children {
                        snapshot.insert(
                            key(table, Some(agent), Some(transaction_type), Some(transaction_name)),
                            *counts,
                        );
                    }
                }
            }
        }
        snapshot
    }

    /// Snapshot and start a fresh reporting interval
    pub fn snapshot_and_reset(&self) -> BTreeMap<WriteMetricKey, WriteCounts> {
        let snapshot = self.snapshot();
        self.tables.lock().clear();
        snapshot
    }
}

fn key(
    table: &str,
    agent_rollup_id: Option<&str>,
    transaction_type: Option<&str>,
    transaction_name: Option<&str>,
) -> WriteMetricKey {
    WriteMetricKey {
        table: table.to_string(),
        agent_rollup_id: agent_rollup_id.map(str::to_string),
        transaction_type: transaction_type.map(str::to_string),
        transaction_name: transaction_name.map(str::to_string),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn context(agent: &str, transaction_type: &str, transaction_name: &str) -> ExecutionContext {
        ExecutionContext::request()
            .with_agent_rollup_id(agent)
            .with_transaction(transaction_type, Some(transaction_name))
    }

    #[test]
    fn test_attribution_per_level() {
        let metrics = WriteMetrics::new();
        metrics.record("trace", &context("agent-1", "Web", "/checkout"), 100);
        metrics.record("trace", &context("agent-1", "Web", "/cart"), 50);
        metrics.record("trace", &context("agent-2", "Background", "job"), 10);

        assert_eq!(metrics.table_counts("trace"), WriteCounts { bytes: 160, rows: 3 });
        let snapshot = metrics.snapshot();
        assert_eq!(
            snapshot[&key("trace", Some("agent-1"), Some("Web"), None)],
            WriteCounts { bytes: 150, rows: 2 }
        );
        assert_eq!(
            snapshot[&key("trace", Some("agent-1"), Some("Web"), Some("/cart"))],
            WriteCounts { bytes: 50, rows: 1 }
        );
    }

    #[test]
    fn test_transaction_names_fold_into_other() {
        let metrics = WriteMetrics::new();
        for index in 0..WRITE_METRICS_TRANSACTION_NAME_LIMIT + 5 {
            metrics.record("trace", &context("agent-1", "Web", &format!("/page/{}", index)), 1);
        }
        let snapshot = metrics.snapshot();
        let names = snapshot
            .keys()
            .filter(|key| key.transaction_name.is_some())
            .count();
        assert_eq!(names, WRITE_METRICS_TRANSACTION_NAME_LIMIT + 1);
        assert_eq!(
            snapshot[&key("trace", Some("agent-1"), Some("Web"), Some(WRITE_METRICS_OTHER))],
            WriteCounts { bytes: 5, rows: 5 }
        );
    }

    #[test]
    fn test_reset_starts_new_interval() {
        let metrics = WriteMetrics::new();
        metrics.record("gauge_value", &ExecutionContext::rollup(), 8);
        let snapshot = metrics.snapshot_and_reset();
        assert_eq!(snapshot.len(), 4);
        assert!(metrics.snapshot().is_empty());
    }
}
