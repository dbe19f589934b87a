//! Crate-wide error taxonomy.

use crate::analysis::GenerationError;
use crate::config::ConfigError;
use crate::storage::StoreError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    /// Repository or network failure; the work is retried next cycle.
    #[error("transient i/o failure: {0}")]
    TransientIo(#[source] StoreError),

    /// A write or stored record violated an integrity rule; the record is skipped.
    #[error("data integrity violation: {0}")]
    DataIntegrity(#[source] StoreError),

    #[error("generation failed: {0}")]
    Generation(#[from] GenerationError),

    /// Malformed configuration. Fatal at startup.
    #[error("invalid configuration: {0}")]
    Configuration(#[from] ConfigError),

    /// Request rejected before any work was done.
    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error("{what} '{id}' not found")]
    NotFound { what: &'static str, id: String },

    #[error("background task failed: {0}")]
    Task(String),
}

pub type Result<T, E = Error> = std::result::Result<T, E>;

impl Error {
    /// Stable category string exposed to API clients.
    pub fn code(&self) -> &'static str {
        match self {
            Error::TransientIo(_) | Error::Task(_) => "transient_io",
            Error::DataIntegrity(_) => "data_integrity",
            Error::Generation(_) => "generation_failed",
            Error::Configuration(_) => "configuration",
            Error::InvalidInput(_) => "invalid_input",
            Error::NotFound { .. } => "not_found",
        }
    }

    pub fn not_found(what: &'static str, id: impl Into<String>) -> Self {
        Error::NotFound { what, id: id.into() }
    }
}

impl From<StoreError> for Error {
    fn from(e: StoreError) -> Self {
        if e.is_integrity() {
            Error::DataIntegrity(e)
        } else {
            Error::TransientIo(e)
        }
    }
}

impl From<tokio::task::JoinError> for Error {
    fn from(e: tokio::task::JoinError) -> Self {
        Error::Task(e.to_string())
    }
}
