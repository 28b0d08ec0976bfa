pub mod db;

/// Failures of the address and telemetry store.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("no device address has been stored")]
    NotFound,
    #[error("database error: {0}")]
    Persistence(#[from] rusqlite::Error),
    #[error("failed to encode or decode vitals: {0}")]
    Serialization(#[from] serde_json::Error),
    #[error("failed to prepare database location: {0}")]
    Io(#[from] std::io::Error),
    #[error("store thread is not running")]
    Unavailable,
}
