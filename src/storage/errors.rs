use thiserror::Error;

/// Failure reported by the storage driver itself
#[derive(Debug, Clone, PartialEq, Error)]
pub enum DriverError {
    #[error("All nodes failed to respond: {0}")]
    AllNodesFailed(String),

    #[error("Invalid query: {0}")]
    InvalidQuery(String),

    #[error("Invalid configuration: {0}")]
    InvalidConfiguration(String),

    #[error("Request timed out: {0}")]
    Timeout(String),

    #[error("Unavailable: {0}")]
    Unavailable(String),

    #[error("Driver error: {0}")]
    Other(String),
}

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("Unexpected {expected} query: {query}")]
    UnexpectedQuery { expected: &'static str, query: String },

    #[error("Create table query must use \"if not exists\": {0}")]
    InvalidCreateTable(String),

    #[error(transparent)]
    Driver(#[from] DriverError),

    #[error("Storage operation was cancelled")]
    Cancelled,

    #[error("Storage semaphore closed")]
    SemaphoreClosed,
}

impl StorageError {
    /// The driver error underneath, if this failure came from the cluster
    pub fn driver_error(&self) -> Option<&DriverError> {
        match self {
            StorageError::Driver(error) => Some(error),
            _ => None,
        }
    }
}
