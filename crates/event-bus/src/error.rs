use thiserror::Error;

/// Errors raised by a message bus.
#[derive(Debug, Clone, Error)]
pub enum BusError {
    /// The bus connection is not available.
    #[error("Bus connection unavailable: {0}")]
    Unavailable(String),

    /// The bus rejected the message.
    #[error("Failed to publish to topic {topic}: {reason}")]
    SendFailed { topic: String, reason: String },

    /// The envelope has no transport representation.
    #[error("Event {sequence} has no transport representation")]
    Untransformable { sequence: String },
}

/// Result type for bus operations.
pub type Result<T> = std::result::Result<T, BusError>;
