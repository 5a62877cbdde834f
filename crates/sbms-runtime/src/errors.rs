//! Runtime error types

use sbms_core::{CorrelationId, TrackerError, ValidationError};

/// Failure of an operation started by the local user
#[derive(Debug, thiserror::Error)]
pub enum RuntimeError {
    #[error(transparent)]
    Validation(#[from] ValidationError),
    #[error(transparent)]
    Tracker(#[from] TrackerError),
    #[error("Peer did not accept {id} after {attempts} attempts")]
    PushFailed { id: CorrelationId, attempts: u32 },
}

/// Failure to load or persist the message history
#[derive(Debug, thiserror::Error)]
pub enum HistoryError {
    #[error("History I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("History serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Failure of an ingestion source
#[derive(Debug, thiserror::Error)]
pub enum IngestError {
    #[error("Failed to remove {path}: {source}")]
    Remove {
        path: String,
        #[source]
        source: std::io::Error,
    },
}
