//! Error handling for the SBMS CLI

use thiserror::Error;

use crate::config::ConfigError;

#[derive(Error, Debug)]
pub enum CliError {
    #[error("SBMS error: {0}")]
    Sbms(#[from] sbms_core::SbmsError),

    #[error("Relay error: {0}")]
    Runtime(#[from] sbms_runtime::RuntimeError),

    #[error("History error: {0}")]
    History(#[from] sbms_runtime::HistoryError),

    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("Invalid input: {0}")]
    Input(String),

    #[error("No status for {id} within {waited_ms}ms")]
    StatusTimeout { id: String, waited_ms: u64 },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Result type for CLI operations
pub type Result<T> = std::result::Result<T, CliError>;

impl From<anyhow::Error> for CliError {
    fn from(err: anyhow::Error) -> Self {
        CliError::Input(format!("{:#}", err))
    }
}

impl From<sbms_core::DecodeError> for CliError {
    fn from(err: sbms_core::DecodeError) -> Self {
        CliError::Sbms(err.into())
    }
}

impl From<sbms_core::ValidationError> for CliError {
    fn from(err: sbms_core::ValidationError) -> Self {
        CliError::Sbms(err.into())
    }
}
