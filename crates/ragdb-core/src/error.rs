use thiserror::Error;

/// Failures raised by the retrieval core.
///
/// None of these are retried by the core. A failing call leaves the in-memory
/// corpus and the persisted artifacts as they were before the call.
#[derive(Debug, Error)]
pub enum Error {
    #[error("Dimension mismatch: expected {expected}, got {actual}")]
    DimensionMismatch { expected: usize, actual: usize },

    #[error("Empty or misaligned batch: {vectors} vectors, {records} records")]
    EmptyBatch { vectors: usize, records: usize },

    #[error("Ordinal {ordinal} out of range (len {len})")]
    OutOfRange { ordinal: usize, len: usize },

    #[error("Corrupt persistent state: {0}")]
    CorruptPersistentState(String),

    /// A persist was cancelled before its commit point; nothing was written.
    #[error("Cancelled before commit")]
    Cancelled,

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Invalid record: {0}")]
    InvalidRecord(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, Error>;
