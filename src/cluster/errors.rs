use std::time::Duration;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum CodecError {
    #[error("Type {type_name} is not allowed to cross the cluster wire")]
    NotAllowed { type_name: String },

    #[error("Expected {expected} on the wire, found {found}")]
    TypeMismatch { expected: String, found: String },

    #[error("Encoding failed: {0}")]
    Encode(#[source] serde_json::Error),

    #[error("Decoding failed: {0}")]
    Decode(#[source] serde_json::Error),
}

#[derive(Debug, Error)]
pub enum CacheError {
    #[error("Cache loader failed: {0}")]
    Loader(String),

    #[error("Codec error: {0}")]
    Codec(#[from] CodecError),

    #[error("No response within {0:?}")]
    Timeout(Duration),

    #[error("Every member failed: {0}")]
    NoResponse(String),

    #[error("Node {0} is already a cluster member")]
    DuplicateNode(String),

    #[error("Resource {0} was registered with another type")]
    TypeMismatch(String),
}
