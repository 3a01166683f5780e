use thiserror::Error;

use crate::storage::StorageError;

#[derive(Debug, Error)]
pub enum AggregateError {
    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Flush of {failed} agent rollups failed, first error: {first}")]
    PartialFlush { failed: usize, first: String },
}
