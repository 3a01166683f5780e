//! `StorageDriver` over the scylla CQL driver.

use async_trait::async_trait;
use scylla::frame::response::result::CqlValue;
use scylla::frame::value::CqlTimestamp;
use scylla::query::Query;
use scylla::statement::Consistency as CqlConsistency;
use scylla::transport::errors::{DbError, QueryError};
use scylla::{Session as CqlSession, SessionBuilder};
use tracing::info;

use super::driver::StorageDriver;
use super::errors::DriverError;
use super::statement::{Consistency, ResultSet, Row, Statement, Value};

pub struct ScyllaDriver {
    session: CqlSession,
}

impl ScyllaDriver {
    pub async fn connect(contact_points: &[String]) -> Result<Self, DriverError> {
        let session = SessionBuilder::new()
            .known_nodes(contact_points)
            .build()
            .await
            .map_err(|e| DriverError::AllNodesFailed(e.to_string()))?;
        info!("🔌 Connected to storage cluster via {:?}", contact_points);
        Ok(Self { session })
    }
}

#[async_trait]
impl StorageDriver for ScyllaDriver {
    async fn execute(&self, statement: &Statement) -> Result<ResultSet, DriverError> {
        let mut query = Query::new(statement.query().to_string());
        if let Some(consistency) = statement.consistency() {
            query.set_consistency(to_cql_consistency(consistency));
        }
        let values: Vec<Option<CqlValue>> = statement.values().iter().map(to_cql_value).collect();
        let result = self
            .session
            .query_unpaged(query, values)
            .await
            .map_err(from_query_error)?;
        let rows: Vec<Row> = result
            .rows
            .unwrap_or_default()
            .into_iter()
            .map(|row| row.columns.into_iter().map(from_cql_value).collect())
            .collect();
        if statement.query().to_ascii_lowercase().contains(" if ") {
            let applied = matches!(rows.first().and_then(|row| row.first()), Some(Value::Boolean(true)));
            return Ok(ResultSet::conditional(applied));
        }
        Ok(ResultSet::new(rows))
    }
}

fn to_cql_consistency(consistency: Consistency) -> CqlConsistency {
    match consistency {
        Consistency::Any => CqlConsistency::Any,
        Consistency::One => CqlConsistency::One,
        Consistency::LocalOne => CqlConsistency::LocalOne,
        Consistency::Quorum => CqlConsistency::Quorum,
        Consistency::LocalQuorum => CqlConsistency::LocalQuorum,
        Consistency::All => CqlConsistency::All,
        Consistency::Serial => CqlConsistency::Serial,
        Consistency::LocalSerial => CqlConsistency::LocalSerial,
    }
}

fn to_cql_value(value: &Value) -> Option<CqlValue> {
    match value {
        Value::Text(text) => Some(CqlValue::Text(text.clone())),
        Value::Int(value) => Some(CqlValue::Int(*value)),
        Value::BigInt(value) => Some(CqlValue::BigInt(*value)),
        Value::Double(value) => Some(CqlValue::Double(*value)),
        Value::Boolean(value) => Some(CqlValue::Boolean(*value)),
        Value::Blob(bytes) => Some(CqlValue::Blob(bytes.clone())),
        Value::Timestamp(millis) => Some(CqlValue::Timestamp(CqlTimestamp(*millis))),
        Value::Null => None,
    }
}

fn from_cql_value(value: Option<CqlValue>) -> Value {
    match value {
        Some(CqlValue::Text(text)) | Some(CqlValue::Ascii(text)) => Value::Text(text),
        Some(CqlValue::Int(value)) => Value::Int(value),
        Some(CqlValue::BigInt(value)) => Value::BigInt(value),
        Some(CqlValue::Double(value)) => Value::Double(value),
        Some(CqlValue::Boolean(value)) => Value::Boolean(value),
        Some(CqlValue::Blob(bytes)) => Value::Blob(bytes),
        Some(CqlValue::Timestamp(CqlTimestamp(millis))) => Value::Timestamp(millis),
        // types the collector never stores come back as null
        _ => Value::Null,
    }
}

fn from_query_error(error: QueryError) -> DriverError {
    match error {
        QueryError::DbError(DbError::ConfigError, message) => DriverError::InvalidConfiguration(message),
        QueryError::DbError(DbError::Invalid | DbError::SyntaxError, message) => {
            DriverError::InvalidQuery(message)
        }
        QueryError::DbError(DbError::Unavailable { .. }, message) => DriverError::Unavailable(message),
        QueryError::DbError(DbError::ReadTimeout { .. } | DbError::WriteTimeout { .. }, message) => {
            DriverError::Timeout(message)
        }
        QueryError::RequestTimeout(message) => DriverError::Timeout(message),
        QueryError::IoError(e) => DriverError::AllNodesFailed(e.to_string()),
        other => DriverError::Other(other.to_string()),
    }
}
