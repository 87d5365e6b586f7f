use domain::ErrorKind;
use event_store::EventStoreError;
use thiserror::Error;

/// Errors that can occur while relaying the outbox.
#[derive(Debug, Error)]
pub enum RelayError {
    /// Pending entries could not be read.
    #[error("Failed to read outbox: {0}")]
    Store(#[from] EventStoreError),

    /// A bus message could not be mapped back to an envelope.
    #[error("Unsupported message: {0}")]
    UnsupportedMessage(String),

    /// Serialization error.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl RelayError {
    /// Classifies the error.
    pub fn kind(&self) -> ErrorKind {
        match self {
            RelayError::Store(EventStoreError::Relay(_)) => ErrorKind::RelayFailure,
            RelayError::Store(_) => ErrorKind::StorageFailure,
            RelayError::UnsupportedMessage(_) | RelayError::Serialization(_) => {
                ErrorKind::RelayFailure
            }
        }
    }
}

/// Result type for relay operations.
pub type Result<T> = std::result::Result<T, RelayError>;
