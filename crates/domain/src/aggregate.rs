//! Core aggregate traits.

use common::AggregateId;
use event_store::{DomainEvent, Sequence, Snapshot};
use serde::{Serialize, de::DeserializeOwned};

/// Trait for aggregates in an event-sourced system.
///
/// In event sourcing, aggregates:
/// - Are rebuilt by replaying events in sequence order
/// - Decide commands by producing at most one event
/// - Apply events to update state (pure, deterministic)
pub trait Aggregate: Default + Send + Sync + Sized {
    /// The commands this aggregate decides.
    type Command;

    /// The type of events this aggregate produces and consumes.
    type Event: DomainEvent;

    /// The type of errors this aggregate can produce.
    type Error: std::error::Error + Send + Sync + 'static;

    /// Collaborators `handle` may consult.
    type Services;

    /// Returns the aggregate type name.
    fn aggregate_type() -> &'static str;

    /// Returns the aggregate's identifier.
    ///
    /// Returns None until a creation event has been applied.
    fn id(&self) -> Option<&AggregateId>;

    /// Number of events applied so far.
    fn applied_events(&self) -> u64;

    /// Decides a command against the current state.
    ///
    /// The returned event is not applied; callers must pass it to `apply`.
    fn handle(
        &self,
        command: &Self::Command,
        services: &Self::Services,
    ) -> Result<Self::Event, Self::Error>;

    /// Applies an event to the aggregate, updating its state.
    ///
    /// This method must be pure and deterministic and must not fail
    /// (events represent facts that have happened).
    fn apply(&mut self, event: Self::Event);

    /// Applies multiple events in sequence.
    fn apply_events(&mut self, events: impl IntoIterator<Item = Self::Event>) {
        for event in events {
            self.apply(event);
        }
    }
}

/// Trait for aggregates that support snapshotting.
pub trait SnapshotCapable: Aggregate + Serialize + DeserializeOwned {
    /// Applied-event count at which a snapshot becomes due.
    fn snapshot_threshold() -> u64 {
        10
    }

    /// Sequence of the most recently applied event.
    fn last_sequence(&self) -> Option<&Sequence>;

    /// Returns whether a snapshot is due.
    fn should_snapshot(&self) -> bool {
        self.applied_events() >= Self::snapshot_threshold()
    }

    /// Captures the current state once a snapshot is due.
    fn snapshot(&self) -> Result<Option<Snapshot>, serde_json::Error> {
        if !self.should_snapshot() {
            return Ok(None);
        }
        let (Some(id), Some(last_sequence)) = (self.id(), self.last_sequence()) else {
            return Ok(None);
        };

        Snapshot::from_state(id.clone(), Self::aggregate_type(), last_sequence.clone(), self)
            .map(Some)
    }
}
