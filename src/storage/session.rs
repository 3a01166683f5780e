//! Throttled gateway to the storage cluster.
//!
//! Three semaphores bound in-flight statements: reads get a quarter of
//! `max_concurrent_requests`, writes half, rollup work the last quarter.
//! Callers flagged as rollup always use the rollup semaphore.

use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tracing::{debug, info, warn};

use super::context::ExecutionContext;
use super::driver::StorageDriver;
use super::errors::{DriverError, StorageError};
use super::futures::ResultFuture;
use super::schema::{self, CompactionStrategy};
use super::statement::{Consistency, ResultSet, Statement};
use super::write_metrics::WriteMetrics;
use crate::common::constants::{
    READ_SEMAPHORE_OBJECT_NAME, ROLLUP_SEMAPHORE_OBJECT_NAME, WRITE_SEMAPHORE_OBJECT_NAME,
};
use crate::config::StorageConfig;
use crate::metrics::get_metrics;
use crate::record_storage_error;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatementKind {
    Read,
    Write,
    Update,
}

impl StatementKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            StatementKind::Read => "read",
            StatementKind::Write => "write",
            StatementKind::Update => "update",
        }
    }

    /// Whether `query` starts with a verb this kind may carry
    pub fn accepts(&self, query: &str) -> bool {
        let query = query.trim_start().to_ascii_lowercase();
        match self {
            StatementKind::Read => query.starts_with("select "),
            StatementKind::Write => query.starts_with("insert ") || query.starts_with("delete "),
            StatementKind::Update => {
                query.contains(" if ") && (query.starts_with("update ") || query.starts_with("insert "))
            }
        }
    }
}

/// Permit counts for one throttling semaphore
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SemaphoreStats {
    pub object_name: &'static str,
    pub available_permits: usize,
    pub max_permits: usize,
}

#[derive(Debug)]
struct ThrottleSemaphore {
    object_name: &'static str,
    semaphore: Arc<Semaphore>,
    max_permits: usize,
}

impl ThrottleSemaphore {
    fn new(object_name: &'static str, max_permits: usize) -> Self {
        let max_permits = max_permits.max(1);
        Self {
            object_name,
            semaphore: Arc::new(Semaphore::new(max_permits)),
            max_permits,
        }
    }

    async fn acquire(&self) -> Result<ThrottlePermit, StorageError> {
        let permit = self
            .semaphore
            .clone()
            .acquire_owned()
            .await
            .map_err(|_| StorageError::SemaphoreClosed)?;
        let permit = ThrottlePermit {
            _permit: Some(permit),
            object_name: self.object_name,
            semaphore: self.semaphore.clone(),
            max_permits: self.max_permits,
        };
        permit.publish();
        Ok(permit)
    }

    fn stats(&self) -> SemaphoreStats {
        SemaphoreStats {
            object_name: self.object_name,
            available_permits: self.semaphore.available_permits(),
            max_permits: self.max_permits,
        }
    }
}

/// Held for the duration of one statement; released on drop whatever the outcome
struct ThrottlePermit {
    _permit: Option<OwnedSemaphorePermit>,
    object_name: &'static str,
    semaphore: Arc<Semaphore>,
    max_permits: usize,
}

impl ThrottlePermit {
    fn publish(&self) {
        if let Some(metrics) = get_metrics() {
            metrics.record_semaphore(
                self.object_name,
                self.semaphore.available_permits(),
                self.max_permits,
            );
        }
    }
}

impl Drop for ThrottlePermit {
    fn drop(&mut self) {
        drop(self._permit.take());
        self.publish();
    }
}

struct SessionInner {
    driver: Arc<dyn StorageDriver>,
    keyspace: String,
    read_semaphore: ThrottleSemaphore,
    write_semaphore: ThrottleSemaphore,
    rollup_semaphore: ThrottleSemaphore,
    read_consistency: Consistency,
    write_consistency: Consistency,
    gc_grace_seconds: u64,
    schema_retry_timeout: Duration,
    schema_retry_interval: Duration,
    write_metrics: WriteMetrics,
    table_names: Mutex<BTreeSet<String>>,
}

/// Cloneable handle; all clones share the same semaphores
#[derive(Clone)]
pub struct Session {
    inner: Arc<SessionInner>,
}

impl Session {
    pub fn new(driver: Arc<dyn StorageDriver>, config: &StorageConfig) -> Self {
        let max = config.max_concurrent_requests;
        info!(
            "🗄️ Session for keyspace {} (max {} concurrent requests)",
            config.keyspace, max
        );
        let session = Self {
            inner: Arc::new(SessionInner {
                driver,
                keyspace: config.keyspace.clone(),
                read_semaphore: ThrottleSemaphore::new(READ_SEMAPHORE_OBJECT_NAME, max / 4),
                write_semaphore: ThrottleSemaphore::new(WRITE_SEMAPHORE_OBJECT_NAME, max / 2),
                rollup_semaphore: ThrottleSemaphore::new(ROLLUP_SEMAPHORE_OBJECT_NAME, max / 4),
                read_consistency: config.read_consistency,
                write_consistency: config.write_consistency,
                gc_grace_seconds: config.gc_grace_seconds,
                schema_retry_timeout: Duration::from_secs(config.schema_retry_timeout_seconds),
                schema_retry_interval: Duration::from_millis(config.schema_retry_interval_millis),
                write_metrics: WriteMetrics::new(),
                table_names: Mutex::new(BTreeSet::new()),
            }),
        };
        if let Some(metrics) = get_metrics() {
            for stats in session.semaphore_stats() {
                metrics.record_semaphore(stats.object_name, stats.available_permits, stats.max_permits);
            }
        }
        session
    }

    pub fn keyspace(&self) -> &str {
        &self.inner.keyspace
    }

    pub fn write_metrics(&self) -> &WriteMetrics {
        &self.inner.write_metrics
    }

    /// Read, write and rollup semaphores, in that order
    pub fn semaphore_stats(&self) -> Vec<SemaphoreStats> {
        vec![
            self.inner.read_semaphore.stats(),
            self.inner.write_semaphore.stats(),
            self.inner.rollup_semaphore.stats(),
        ]
    }

    /// Tables created through this session
    pub fn table_names(&self) -> Vec<String> {
        self.inner.table_names.lock().iter().cloned().collect()
    }

    pub async fn read(&self, statement: Statement, context: &ExecutionContext) -> Result<ResultSet, StorageError> {
        check_verb(StatementKind::Read, &statement)?;
        execute_throttled(self.inner.clone(), statement, StatementKind::Read, context.clone()).await
    }

    pub fn read_async(
        &self,
        statement: Statement,
        context: &ExecutionContext,
    ) -> Result<ResultFuture<ResultSet>, StorageError> {
        self.spawn(StatementKind::Read, statement, context)
    }

    pub async fn write(&self, statement: Statement, context: &ExecutionContext) -> Result<(), StorageError> {
        check_verb(StatementKind::Write, &statement)?;
        execute_throttled(self.inner.clone(), statement, StatementKind::Write, context.clone())
            .await
            .map(|_| ())
    }

    pub fn write_async(
        &self,
        statement: Statement,
        context: &ExecutionContext,
    ) -> Result<ResultFuture<ResultSet>, StorageError> {
        self.spawn(StatementKind::Write, statement, context)
    }

    /// Conditional update; returns whether the condition applied
    pub async fn update(&self, statement: Statement, context: &ExecutionContext) -> Result<bool, StorageError> {
        check_verb(StatementKind::Update, &statement)?;
        let results =
            execute_throttled(self.inner.clone(), statement, StatementKind::Update, context.clone()).await?;
        Ok(results.was_applied())
    }

    fn spawn(
        &self,
        kind: StatementKind,
        statement: Statement,
        context: &ExecutionContext,
    ) -> Result<ResultFuture<ResultSet>, StorageError> {
        check_verb(kind, &statement)?;
        Ok(ResultFuture::spawn(execute_throttled(
            self.inner.clone(),
            statement,
            kind,
            context.clone(),
        )))
    }

    pub async fn create_keyspace_if_not_exists(&self, replication_factor: u32) -> Result<(), StorageError> {
        let query = format!(
            "create keyspace if not exists {} with replication = {{ 'class' : 'SimpleStrategy', \
             'replication_factor' : {} }}",
            self.inner.keyspace, replication_factor
        );
        self.update_schema_with_retry(&query).await
    }

    /// Time windowed compaction, falling back to size tiered when the cluster rejects it
    pub async fn create_table_with_twcs(
        &self,
        create_table_query: &str,
        expiration_hours: u32,
    ) -> Result<(), StorageError> {
        let strategy = CompactionStrategy::TimeWindow { expiration_hours };
        match self.create_table(create_table_query, strategy).await {
            Err(StorageError::Driver(DriverError::InvalidConfiguration(message))) => {
                warn!(
                    "⚠️ Time windowed compaction rejected ({}), using size tiered compaction",
                    message
                );
                self.create_table(create_table_query, CompactionStrategy::SizeTiered)
                    .await
            }
            result => result,
        }
    }

    pub async fn create_table_with_lcs(&self, create_table_query: &str) -> Result<(), StorageError> {
        self.create_table(create_table_query, CompactionStrategy::Leveled).await
    }

    pub async fn create_table_with_stcs(&self, create_table_query: &str) -> Result<(), StorageError> {
        self.create_table(create_table_query, CompactionStrategy::SizeTiered)
            .await
    }

    pub async fn drop_table_if_exists(&self, table_name: &str) -> Result<(), StorageError> {
        self.update_schema_with_retry(&format!("drop table if exists {}", table_name))
            .await?;
        self.inner.table_names.lock().remove(table_name);
        Ok(())
    }

    async fn create_table(
        &self,
        create_table_query: &str,
        strategy: CompactionStrategy,
    ) -> Result<(), StorageError> {
        if !schema::is_guarded_create_table(create_table_query) {
            return Err(StorageError::InvalidCreateTable(create_table_query.to_string()));
        }
        let query = schema::create_table_query(create_table_query, strategy, self.inner.gc_grace_seconds);
        self.update_schema_with_retry(&query).await?;
        if let Some(table_name) = table_name_of(create_table_query) {
            self.inner.table_names.lock().insert(table_name);
        }
        Ok(())
    }

    /// Retry "all nodes failed" until the retry budget is spent, then one last
    /// attempt whose failure is returned as is
    pub async fn update_schema_with_retry(&self, query: &str) -> Result<(), StorageError> {
        let statement = Statement::new(query);
        let deadline = tokio::time::Instant::now() + self.inner.schema_retry_timeout;
        while tokio::time::Instant::now() < deadline {
            match self.inner.driver.execute(&statement).await {
                Ok(_) => return Ok(()),
                Err(DriverError::AllNodesFailed(message)) => {
                    debug!("🔁 Schema update failed on all nodes, retrying: {}", message);
                    if let Some(metrics) = get_metrics() {
                        metrics.record_schema_retry("update_schema");
                    }
                    tokio::time::sleep(self.inner.schema_retry_interval).await;
                }
                Err(error) => return Err(error.into()),
            }
        }
        warn!("⚠️ Schema retry budget spent for: {}", query);
        self.inner.driver.execute(&statement).await?;
        Ok(())
    }

    /// Stop admitting statements; waiting callers get `SemaphoreClosed`
    pub fn close(&self) {
        self.inner.read_semaphore.semaphore.close();
        self.inner.write_semaphore.semaphore.close();
        self.inner.rollup_semaphore.semaphore.close();
        info!("🛑 Session closed");
    }
}

fn check_verb(kind: StatementKind, statement: &Statement) -> Result<(), StorageError> {
    if kind.accepts(statement.query()) {
        Ok(())
    } else {
        Err(StorageError::UnexpectedQuery {
            expected: kind.as_str(),
            query: statement.query().to_string(),
        })
    }
}

async fn execute_throttled(
    inner: Arc<SessionInner>,
    mut statement: Statement,
    kind: StatementKind,
    context: ExecutionContext,
) -> Result<ResultSet, StorageError> {
    let semaphore = if context.in_rollup {
        &inner.rollup_semaphore
    } else {
        match kind {
            StatementKind::Read => &inner.read_semaphore,
            StatementKind::Write | StatementKind::Update => &inner.write_semaphore,
        }
    };
    statement.set_default_consistency(match kind {
        StatementKind::Read => inner.read_consistency,
        StatementKind::Write | StatementKind::Update => inner.write_consistency,
    });

    let started = Instant::now();
    let _permit = semaphore.acquire().await?;
    let result = inner.driver.execute(&statement).await;
    if let Some(metrics) = get_metrics() {
        metrics.record_storage_operation(kind.as_str(), result.is_ok(), started.elapsed().as_secs_f64());
    }
    match result {
        Ok(results) => {
            if kind != StatementKind::Read {
                if let Some(table) = statement.table_name() {
                    inner
                        .write_metrics
                        .record(table, &context, statement.bound_bytes() as u64);
                }
            }
            Ok(results)
        }
        Err(error) => {
            record_storage_error!(kind.as_str());
            debug!("❌ {} failed: {} ({})", kind.as_str(), error, statement.query());
            Err(error.into())
        }
    }
}

fn table_name_of(create_table_query: &str) -> Option<String> {
    let rest = create_table_query.get(schema::CREATE_TABLE_PREFIX.len()..)?;
    let name = rest.split(|c: char| c.is_whitespace() || c == '(').next()?;
    let name = name.rsplit('.').next().unwrap_or(name);
    (!name.is_empty()).then(|| name.to_string())
}
