//! Error types for the storage state.

/// Result type
pub type Result<T> = std::result::Result<T, Error>;

/// Storage errors
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Filesystem failure while reading or writing the snapshot
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Snapshot contents are not a JSON object
    #[error("Invalid snapshot: {0}")]
    InvalidSnapshot(String),

    /// JSON serialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}
