//! Serialization of everything that crosses a cluster member boundary.
//!
//! Values travel as a `{type, payload}` envelope. Only type names matching
//! the allow-list may be encoded or decoded.

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use super::errors::CodecError;
use crate::model;

/// A value that may be replicated; `TYPE_NAME` is checked against the allow-list
pub trait ClusterValue: Serialize + DeserializeOwned + Send + Sync + 'static {
    const TYPE_NAME: &'static str;
}

/// Collector, UI and wire model types, plus the plain values caches key on
pub const DEFAULT_ALLOWED_TYPES: &[&str] = &[
    "apm_collector::*",
    "apm_ui::*",
    "apm_wire::model::*",
    "std::string::String",
    "std::vec::Vec<std::string::String>",
    "i64",
    "bool",
];

#[derive(Serialize, Deserialize)]
struct Envelope {
    #[serde(rename = "type")]
    type_name: String,
    payload: serde_json::Value,
}

#[derive(Debug, Clone)]
pub struct WireCodec {
    allowed: Vec<String>,
}

impl Default for WireCodec {
    fn default() -> Self {
        Self::new(DEFAULT_ALLOWED_TYPES.iter().copied())
    }
}

impl WireCodec {
    /// Patterns are exact names, or prefixes when ending in `*`
    pub fn new<'a>(allowed: impl IntoIterator<Item = &'a str>) -> Self {
        Self {
            allowed: allowed.into_iter().map(str::to_string).collect(),
        }
    }

    pub fn is_allowed(&self, type_name: &str) -> bool {
        self.allowed.iter().any(|pattern| match pattern.strip_suffix('*') {
            Some(prefix) => type_name.starts_with(prefix),
            None => type_name == pattern,
        })
    }

    pub fn encode<T: ClusterValue>(&self, value: &T) -> Result<Vec<u8>, CodecError> {
        self.check(T::TYPE_NAME)?;
        let envelope = Envelope {
            type_name: T::TYPE_NAME.to_string(),
            payload: serde_json::to_value(value).map_err(CodecError::Encode)?,
        };
        serde_json::to_vec(&envelope).map_err(CodecError::Encode)
    }

    pub fn decode<T: ClusterValue>(&self, bytes: &[u8]) -> Result<T, CodecError> {
        let envelope: Envelope = serde_json::from_slice(bytes).map_err(CodecError::Decode)?;
        self.check(&envelope.type_name)?;
        if envelope.type_name != T::TYPE_NAME {
            return Err(CodecError::TypeMismatch {
                expected: T::TYPE_NAME.to_string(),
                found: envelope.type_name,
            });
        }
        serde_json::from_value(envelope.payload).map_err(CodecError::Decode)
    }

    fn check(&self, type_name: &str) -> Result<(), CodecError> {
        if self.is_allowed(type_name) {
            Ok(())
        } else {
            Err(CodecError::NotAllowed {
                type_name: type_name.to_string(),
            })
        }
    }
}

impl ClusterValue for String {
    const TYPE_NAME: &'static str = "std::string::String";
}

impl ClusterValue for Vec<String> {
    const TYPE_NAME: &'static str = "std::vec::Vec<std::string::String>";
}

impl ClusterValue for i64 {
    const TYPE_NAME: &'static str = "i64";
}

impl ClusterValue for bool {
    const TYPE_NAME: &'static str = "bool";
}

impl ClusterValue for model::AggregateMessage {
    const TYPE_NAME: &'static str = "apm_wire::model::AggregateMessage";
}

impl ClusterValue for model::ProfileMessage {
    const TYPE_NAME: &'static str = "apm_wire::model::ProfileMessage";
}

impl ClusterValue for model::ErrorMessageProto {
    const TYPE_NAME: &'static str = "apm_wire::model::ErrorMessageProto";
}

impl ClusterValue for model::TraceTimer {
    const TYPE_NAME: &'static str = "apm_wire::model::TraceTimer";
}
