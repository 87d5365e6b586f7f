//! Prescription wiring for the relay: topic routing and the CloudEvents
//! encoding used on the bus.

use chrono::{DateTime, Utc};
use common::AggregateId;
use domain::{Aggregate, Prescription, PrescriptionEvent};
use event_bus::EventBus;
use event_store::{DomainEvent, EventEnvelope, EventStore, Sequence};
use serde::{Deserialize, Serialize};

use crate::{OutboxConfig, OutboxRelay, RelayError, Result};

/// Topic for `PrescriptionCreated` entries.
pub const TOPIC_CREATED: &str = "system.prescription.created";
/// Topic for `PrescriptionUpdated` entries.
pub const TOPIC_UPDATED: &str = "system.prescription.updated";
/// Catch-all topic for anything without a known route.
pub const TOPIC_TRASH: &str = "trash";

const SPEC_VERSION: &str = "1.0";
const SOURCE: &str = "system";
const CONTENT_TYPE: &str = "application/json";
const TYPE_CREATED: &str = "system:prescription:created";
const TYPE_UPDATED: &str = "system:prescription:updated";

/// A CloudEvents 1.0 structured-mode message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CloudEvent {
    pub specversion: String,
    /// The originating envelope's sequence.
    pub id: String,
    pub source: String,
    #[serde(rename = "type")]
    pub event_type: String,
    /// The aggregate id.
    pub subject: String,
    pub time: DateTime<Utc>,
    pub datacontenttype: String,
    /// Event payload without its `eventId`, which travels as `id`.
    pub data: serde_json::Value,
}

impl CloudEvent {
    /// Rebuilds the envelope a message was produced from.
    pub fn into_envelope(self) -> Result<EventEnvelope<PrescriptionEvent>> {
        let event_type = match self.event_type.as_str() {
            TYPE_CREATED => PrescriptionEvent::CREATED,
            TYPE_UPDATED => PrescriptionEvent::UPDATED,
            other => return Err(RelayError::UnsupportedMessage(other.to_string())),
        };

        let serde_json::Value::Object(mut data) = self.data else {
            return Err(RelayError::UnsupportedMessage(format!(
                "{}: data is not an object",
                self.id
            )));
        };
        data.insert("eventId".to_string(), serde_json::Value::String(self.id));

        let payload = PrescriptionEvent::from_payload(event_type, serde_json::Value::Object(data))?
            .ok_or_else(|| RelayError::UnsupportedMessage(event_type.to_string()))?;

        Ok(EventEnvelope::new(
            Prescription::aggregate_type(),
            AggregateId::new(self.subject),
            payload,
        )
        .with_timestamp(self.time))
    }
}

/// Routes an entry to its topic by event type.
pub fn prescription_topic(envelope: &EventEnvelope<PrescriptionEvent>) -> String {
    match envelope.event_type.as_str() {
        PrescriptionEvent::CREATED => TOPIC_CREATED,
        PrescriptionEvent::UPDATED => TOPIC_UPDATED,
        _ => TOPIC_TRASH,
    }
    .to_string()
}

/// Encodes an entry as a CloudEvent, or `None` when it has no bus form.
pub fn to_cloud_event(envelope: &EventEnvelope<PrescriptionEvent>) -> Option<CloudEvent> {
    let event_type = match envelope.event_type.as_str() {
        PrescriptionEvent::CREATED => TYPE_CREATED,
        PrescriptionEvent::UPDATED => TYPE_UPDATED,
        _ => return None,
    };

    let mut data = match envelope.payload.to_payload() {
        Ok(serde_json::Value::Object(data)) => data,
        Ok(_) => return None,
        Err(e) => {
            tracing::warn!(sequence = %envelope.sequence, error = %e, "Failed to encode payload");
            return None;
        }
    };
    data.remove("eventId");

    Some(CloudEvent {
        specversion: SPEC_VERSION.to_string(),
        id: envelope.sequence.to_string(),
        source: SOURCE.to_string(),
        event_type: event_type.to_string(),
        subject: envelope.aggregate_id.to_string(),
        time: envelope.timestamp,
        datacontenttype: CONTENT_TYPE.to_string(),
        data: serde_json::Value::Object(data),
    })
}

/// [`to_cloud_event`] as a JSON message, the relay's transformer.
pub fn to_cloud_event_message(
    envelope: &EventEnvelope<PrescriptionEvent>,
) -> Option<serde_json::Value> {
    to_cloud_event(envelope).and_then(|ce| serde_json::to_value(ce).ok())
}

/// Builds a relay for prescription events with the standard routing and
/// encoding.
pub fn prescription_relay<S, B>(
    store: S,
    bus: B,
    config: OutboxConfig,
) -> OutboxRelay<S, B, PrescriptionEvent>
where
    S: EventStore<PrescriptionEvent>,
    B: EventBus,
{
    OutboxRelay::new(
        store,
        bus,
        config,
        prescription_topic,
        to_cloud_event_message,
    )
}

/// Sequence carried by a bus message, if it has one.
pub fn message_sequence(message: &serde_json::Value) -> Option<Sequence> {
    message.get("id")?.as_str().map(Sequence::new)
}
