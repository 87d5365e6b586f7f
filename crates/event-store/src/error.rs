use event_bus::BusError;
use thiserror::Error;

use crate::{AggregateId, Sequence};

/// Errors that can occur when interacting with the event store.
#[derive(Debug, Error)]
pub enum EventStoreError {
    /// No events exist for the aggregate.
    #[error("No aggregate with id {0} found")]
    AggregateNotFound(AggregateId),

    /// An event with the same sequence already exists for the aggregate.
    #[error("Duplicate sequence {sequence} for aggregate {aggregate_id}")]
    DuplicateSequence {
        aggregate_id: AggregateId,
        sequence: Sequence,
    },

    /// The envelope failed validation before being written.
    #[error("Invalid envelope: {0}")]
    InvalidEnvelope(String),

    /// A database error occurred.
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    /// A database migration error occurred.
    #[error("Migration error: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),

    /// A serialization/deserialization error occurred.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// The bus refused an outbox entry; the entry stays queued.
    #[error("Relay error: {0}")]
    Relay(#[from] BusError),

    /// A failure injected by a test double.
    #[error("Injected failure: {0}")]
    Injected(&'static str),
}

/// Result type for event store operations.
pub type Result<T> = std::result::Result<T, EventStoreError>;
