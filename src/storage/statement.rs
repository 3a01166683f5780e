use std::fmt;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Consistency {
    Any,
    One,
    LocalOne,
    Quorum,
    LocalQuorum,
    All,
    Serial,
    LocalSerial,
}

impl fmt::Display for Consistency {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Consistency::Any => "ANY",
            Consistency::One => "ONE",
            Consistency::LocalOne => "LOCAL_ONE",
            Consistency::Quorum => "QUORUM",
            Consistency::LocalQuorum => "LOCAL_QUORUM",
            Consistency::All => "ALL",
            Consistency::Serial => "SERIAL",
            Consistency::LocalSerial => "LOCAL_SERIAL",
        };
        f.write_str(name)
    }
}

/// Bound statement value
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Value {
    Text(String),
    Int(i32),
    BigInt(i64),
    Double(f64),
    Boolean(bool),
    Blob(Vec<u8>),
    /// Milliseconds since the epoch
    Timestamp(i64),
    Null,
}

impl Value {
    /// Serialized size as counted by write metrics
    pub fn size_in_bytes(&self) -> usize {
        match self {
            Value::Text(text) => text.len(),
            Value::Int(_) => 4,
            Value::BigInt(_) | Value::Double(_) | Value::Timestamp(_) => 8,
            Value::Boolean(_) => 1,
            Value::Blob(bytes) => bytes.len(),
            Value::Null => 0,
        }
    }

    pub fn as_text(&self) -> Option<&str> {
        match self {
            Value::Text(text) => Some(text),
            _ => None,
        }
    }

    pub fn as_big_int(&self) -> Option<i64> {
        match self {
            Value::BigInt(value) | Value::Timestamp(value) => Some(*value),
            Value::Int(value) => Some(i64::from(*value)),
            _ => None,
        }
    }
}

impl From<&str> for Value {
    fn from(value: &str) -> Self {
        Value::Text(value.to_string())
    }
}

impl From<String> for Value {
    fn from(value: String) -> Self {
        Value::Text(value)
    }
}

impl From<i32> for Value {
    fn from(value: i32) -> Self {
        Value::Int(value)
    }
}

impl From<i64> for Value {
    fn from(value: i64) -> Self {
        Value::BigInt(value)
    }
}

impl From<f64> for Value {
    fn from(value: f64) -> Self {
        Value::Double(value)
    }
}

impl From<bool> for Value {
    fn from(value: bool) -> Self {
        Value::Boolean(value)
    }
}

impl From<Vec<u8>> for Value {
    fn from(value: Vec<u8>) -> Self {
        Value::Blob(value)
    }
}

impl<T: Into<Value>> From<Option<T>> for Value {
    fn from(value: Option<T>) -> Self {
        value.map(Into::into).unwrap_or(Value::Null)
    }
}

/// Query text plus bound values
#[derive(Debug, Clone, PartialEq)]
pub struct Statement {
    query: String,
    values: Vec<Value>,
    consistency: Option<Consistency>,
}

impl Statement {
    pub fn new(query: impl Into<String>) -> Self {
        Self {
            query: query.into(),
            values: Vec::new(),
            consistency: None,
        }
    }

    pub fn bind(mut self, value: impl Into<Value>) -> Self {
        self.values.push(value.into());
        self
    }

    pub fn with_values(mut self, values: Vec<Value>) -> Self {
        self.values = values;
        self
    }

    pub fn with_consistency(mut self, consistency: Consistency) -> Self {
        self.consistency = Some(consistency);
        self
    }

    pub fn query(&self) -> &str {
        &self.query
    }

    pub fn values(&self) -> &[Value] {
        &self.values
    }

    pub fn consistency(&self) -> Option<Consistency> {
        self.consistency
    }

    pub(crate) fn set_default_consistency(&mut self, consistency: Consistency) {
        if self.consistency.is_none() {
            self.consistency = Some(consistency);
        }
    }

    pub fn bound_bytes(&self) -> usize {
        self.values.iter().map(Value::size_in_bytes).sum()
    }

    /// Table named after `into`, `from` or `update`, keyspace prefix dropped
    pub fn table_name(&self) -> Option<&str> {
        let mut words = self.query.split_whitespace();
        let first = words.next()?;
        let table = if first.eq_ignore_ascii_case("update") {
            words.next()?
        } else {
            loop {
                let word = words.next()?;
                if word.eq_ignore_ascii_case("into") || word.eq_ignore_ascii_case("from") {
                    break words.next()?;
                }
            }
        };
        let table = table.split('(').next().unwrap_or(table);
        Some(table.rsplit('.').next().unwrap_or(table))
    }
}

impl From<&str> for Statement {
    fn from(query: &str) -> Self {
        Statement::new(query)
    }
}

pub type Row = Vec<Value>;

#[derive(Debug, Clone, Default, PartialEq)]
pub struct ResultSet {
    rows: Vec<Row>,
    applied: Option<bool>,
}

impl ResultSet {
    pub fn new(rows: Vec<Row>) -> Self {
        Self { rows, applied: None }
    }

    pub fn conditional(applied: bool) -> Self {
        Self {
            rows: Vec::new(),
            applied: Some(applied),
        }
    }

    pub fn rows(&self) -> &[Row] {
        &self.rows
    }

    pub fn into_rows(self) -> Vec<Row> {
        self.rows
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Outcome of a conditional update; plain statements always apply
    pub fn was_applied(&self) -> bool {
        self.applied.unwrap_or(true)
    }
}
