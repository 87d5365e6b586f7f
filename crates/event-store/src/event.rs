use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::AggregateId;

/// Position of an event within its aggregate's history.
///
/// Sequences are UUIDv7 strings, so lexicographic order follows creation
/// time. An envelope's sequence is the `event_id` of the event it carries.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Sequence(String);

impl Sequence {
    /// Generates a new time-ordered sequence.
    pub fn generate() -> Self {
        Self(Uuid::now_v7().to_string())
    }

    /// Wraps an existing sequence value.
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    /// Returns the sequence as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for Sequence {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<String> for Sequence {
    fn from(value: String) -> Self {
        Self(value)
    }
}

impl From<&str> for Sequence {
    fn from(value: &str) -> Self {
        Self(value.to_owned())
    }
}

/// A typed event that can be written to and read back from the log.
///
/// `from_payload` returns `Ok(None)` for event types this codec does not
/// know, so replay can skip them instead of failing.
pub trait DomainEvent: std::fmt::Debug + Clone + Send + Sync + 'static {
    /// Returns the event type name (e.g., "PrescriptionCreated").
    fn event_type(&self) -> &'static str;

    /// Returns the schema version of the payload.
    fn event_version(&self) -> &'static str;

    /// Returns the identifier carried inside the event.
    fn event_id(&self) -> &Sequence;

    /// Encodes the event as a JSON payload.
    fn to_payload(&self) -> serde_json::Result<serde_json::Value>;

    /// Decodes a payload stored under `event_type`.
    fn from_payload(event_type: &str, payload: serde_json::Value)
    -> serde_json::Result<Option<Self>>;
}

/// An event wrapped with the routing information needed to persist and
/// replay it.
#[derive(Debug, Clone)]
pub struct EventEnvelope<E> {
    /// The type of aggregate (e.g., "Prescription").
    pub aggregate_type: String,

    /// The aggregate this event belongs to.
    pub aggregate_id: AggregateId,

    /// Position of the event within the aggregate.
    pub sequence: Sequence,

    /// The type of the wrapped event.
    pub event_type: String,

    /// Schema version of the wrapped event.
    pub event_version: String,

    /// The event itself.
    pub payload: E,

    /// Free-form string metadata (e.g., correlation ids).
    pub metadata: HashMap<String, String>,

    /// When the envelope was created.
    pub timestamp: DateTime<Utc>,
}

impl<E: DomainEvent> EventEnvelope<E> {
    /// Wraps an event, taking the sequence from the event's own id.
    pub fn new(
        aggregate_type: impl Into<String>,
        aggregate_id: AggregateId,
        payload: E,
    ) -> Self {
        Self {
            aggregate_type: aggregate_type.into(),
            aggregate_id,
            sequence: payload.event_id().clone(),
            event_type: payload.event_type().to_owned(),
            event_version: payload.event_version().to_owned(),
            payload,
            metadata: HashMap::new(),
            timestamp: Utc::now(),
        }
    }

    /// Adds a metadata entry.
    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }

    /// Overrides the creation timestamp.
    pub fn with_timestamp(mut self, timestamp: DateTime<Utc>) -> Self {
        self.timestamp = timestamp;
        self
    }

    /// Encodes the envelope into its storage row form.
    pub fn to_stored(&self) -> serde_json::Result<StoredEvent> {
        let metadata = if self.metadata.is_empty() {
            None
        } else {
            Some(serde_json::to_value(&self.metadata)?)
        };

        Ok(StoredEvent {
            aggregate_type: self.aggregate_type.clone(),
            aggregate_id: self.aggregate_id.clone(),
            sequence: self.sequence.clone(),
            event_type: self.event_type.clone(),
            event_version: self.event_version.clone(),
            payload: self.payload.to_payload()?,
            metadata,
            timestamp: self.timestamp,
        })
    }

    /// Decodes a storage row.
    ///
    /// Returns `Ok(None)` when the row's event type is unknown to `E`.
    pub fn from_stored(stored: StoredEvent) -> serde_json::Result<Option<Self>> {
        let Some(payload) = E::from_payload(&stored.event_type, stored.payload)? else {
            return Ok(None);
        };

        let metadata = match stored.metadata {
            Some(value) => serde_json::from_value(value)?,
            None => HashMap::new(),
        };

        Ok(Some(Self {
            aggregate_type: stored.aggregate_type,
            aggregate_id: stored.aggregate_id,
            sequence: stored.sequence,
            event_type: stored.event_type,
            event_version: stored.event_version,
            payload,
            metadata,
            timestamp: stored.timestamp,
        }))
    }
}

/// An envelope in its persisted form, with the payload kept as raw JSON.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoredEvent {
    pub aggregate_type: String,
    pub aggregate_id: AggregateId,
    pub sequence: Sequence,
    pub event_type: String,
    pub event_version: String,
    pub payload: serde_json::Value,
    pub metadata: Option<serde_json::Value>,
    pub timestamp: DateTime<Utc>,
}
