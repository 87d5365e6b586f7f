//! Prescription domain events.

use common::AggregateId;
use event_store::{DomainEvent, Sequence};
use serde::{Deserialize, Serialize};

/// Schema version shared by all prescription payloads.
pub const EVENT_VERSION: &str = "0.0.1";

/// Events that can occur on a prescription aggregate.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data")]
pub enum PrescriptionEvent {
    /// Prescription was created.
    PrescriptionCreated(PrescriptionCreatedData),

    /// Delivery address was changed.
    PrescriptionUpdated(PrescriptionUpdatedData),
}

/// Data for PrescriptionCreated event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PrescriptionCreatedData {
    /// The new prescription's id.
    pub id: AggregateId,

    pub medication_id: String,

    pub patient_id: String,

    pub address: String,

    /// Identifier of this event; becomes the envelope sequence.
    pub event_id: Sequence,
}

/// Data for PrescriptionUpdated event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PrescriptionUpdatedData {
    pub address: String,

    pub event_id: Sequence,
}

impl PrescriptionEvent {
    pub const CREATED: &'static str = "PrescriptionCreated";
    pub const UPDATED: &'static str = "PrescriptionUpdated";
}

impl DomainEvent for PrescriptionEvent {
    fn event_type(&self) -> &'static str {
        match self {
            PrescriptionEvent::PrescriptionCreated(_) => Self::CREATED,
            PrescriptionEvent::PrescriptionUpdated(_) => Self::UPDATED,
        }
    }

    fn event_version(&self) -> &'static str {
        EVENT_VERSION
    }

    fn event_id(&self) -> &Sequence {
        match self {
            PrescriptionEvent::PrescriptionCreated(data) => &data.event_id,
            PrescriptionEvent::PrescriptionUpdated(data) => &data.event_id,
        }
    }

    fn to_payload(&self) -> serde_json::Result<serde_json::Value> {
        match self {
            PrescriptionEvent::PrescriptionCreated(data) => serde_json::to_value(data),
            PrescriptionEvent::PrescriptionUpdated(data) => serde_json::to_value(data),
        }
    }

    fn from_payload(
        event_type: &str,
        payload: serde_json::Value,
    ) -> serde_json::Result<Option<Self>> {
        match event_type {
            Self::CREATED => serde_json::from_value(payload)
                .map(|data| Some(PrescriptionEvent::PrescriptionCreated(data))),
            Self::UPDATED => serde_json::from_value(payload)
                .map(|data| Some(PrescriptionEvent::PrescriptionUpdated(data))),
            _ => Ok(None),
        }
    }
}
