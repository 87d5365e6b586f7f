//! Domain error types.

use common::AggregateId;
use event_store::EventStoreError;
use lock_manager::LockError;
use thiserror::Error;

use crate::prescription::PrescriptionError;

/// Errors that can occur during domain operations.
#[derive(Debug, Error)]
pub enum DomainError {
    /// The aggregate has no events.
    #[error("Aggregate not found: {aggregate_type} with id {aggregate_id}")]
    AggregateNotFound {
        aggregate_type: &'static str,
        aggregate_id: AggregateId,
    },

    /// The aggregate's lease stayed held for the whole retry budget.
    #[error("Lock contention on {key} after {attempts} attempts")]
    LockContention { key: String, attempts: u32 },

    /// The lock backend failed.
    #[error("Lock error: {0}")]
    Lock(LockError),

    /// An error occurred in the event store.
    #[error("Event store error: {0}")]
    EventStore(#[from] EventStoreError),

    /// An error occurred in the prescription aggregate.
    #[error("Prescription error: {0}")]
    Prescription(#[from] PrescriptionError),

    /// Serialization error.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl From<LockError> for DomainError {
    fn from(error: LockError) -> Self {
        match error {
            LockError::Contended { key, attempts } => Self::LockContention { key, attempts },
            other => Self::Lock(other),
        }
    }
}

/// Failure kinds reported to callers, independent of the concrete error.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// The referenced aggregate has no events.
    NotFound,
    /// The aggregate's lease could not be acquired.
    LockContention,
    /// The state machine has no transition for the command.
    TransitionRejected,
    /// A storage or lock backend operation failed.
    StorageFailure,
    /// Publishing an outbox entry failed; only reported by the relay.
    RelayFailure,
}

impl ErrorKind {
    /// Returns a stable label for logs and metrics.
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::NotFound => "not_found",
            ErrorKind::LockContention => "lock_contention",
            ErrorKind::TransitionRejected => "transition_rejected",
            ErrorKind::StorageFailure => "storage_failure",
            ErrorKind::RelayFailure => "relay_failure",
        }
    }
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl DomainError {
    /// Classifies the error.
    pub fn kind(&self) -> ErrorKind {
        match self {
            DomainError::AggregateNotFound { .. }
            | DomainError::EventStore(EventStoreError::AggregateNotFound(_)) => ErrorKind::NotFound,
            DomainError::LockContention { .. } => ErrorKind::LockContention,
            DomainError::Prescription(PrescriptionError::InvalidTransition { .. }) => {
                ErrorKind::TransitionRejected
            }
            // A stored aggregate without an id is corrupt state, not a bad request.
            DomainError::Prescription(PrescriptionError::MissingId)
            | DomainError::Lock(_)
            | DomainError::EventStore(_)
            | DomainError::Serialization(_) => ErrorKind::StorageFailure,
        }
    }
}
