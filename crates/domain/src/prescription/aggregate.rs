//! Prescription aggregate implementation.

use common::AggregateId;
use event_store::{DomainEvent, Sequence};
use serde::{Deserialize, Serialize};

use crate::aggregate::{Aggregate, SnapshotCapable};

use super::{
    PrescriptionCommand, PrescriptionError, PrescriptionEvent, PrescriptionState, transition,
    events::{PrescriptionCreatedData, PrescriptionUpdatedData},
};

/// Prescription aggregate root.
///
/// Built fresh for every command by folding the prescription's history.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Prescription {
    /// Unique prescription identifier.
    id: Option<AggregateId>,

    medication_id: Option<String>,

    patient_id: Option<String>,

    address: Option<String>,

    /// Current lifecycle stage.
    state: PrescriptionState,

    /// Number of events folded into this instance.
    applied_events: u64,

    last_event: Option<PrescriptionEvent>,

    last_sequence: Option<Sequence>,
}

impl Aggregate for Prescription {
    type Command = PrescriptionCommand;
    type Event = PrescriptionEvent;
    type Error = PrescriptionError;
    type Services = ();

    fn aggregate_type() -> &'static str {
        "Prescription"
    }

    fn id(&self) -> Option<&AggregateId> {
        self.id.as_ref()
    }

    fn applied_events(&self) -> u64 {
        self.applied_events
    }

    fn handle(
        &self,
        command: &PrescriptionCommand,
        _services: &(),
    ) -> Result<PrescriptionEvent, PrescriptionError> {
        transition(self.state, command).map(|(_, event)| event)
    }

    fn apply(&mut self, event: PrescriptionEvent) {
        match &event {
            PrescriptionEvent::PrescriptionCreated(data) => self.apply_created(data),
            PrescriptionEvent::PrescriptionUpdated(data) => self.apply_updated(data),
        }
        self.applied_events += 1;
        self.last_sequence = Some(event.event_id().clone());
        self.last_event = Some(event);
    }
}

impl SnapshotCapable for Prescription {
    fn last_sequence(&self) -> Option<&Sequence> {
        self.last_sequence.as_ref()
    }
}

// Query methods
impl Prescription {
    pub fn medication_id(&self) -> Option<&str> {
        self.medication_id.as_deref()
    }

    pub fn patient_id(&self) -> Option<&str> {
        self.patient_id.as_deref()
    }

    pub fn address(&self) -> Option<&str> {
        self.address.as_deref()
    }

    /// Returns the current state.
    pub fn state(&self) -> PrescriptionState {
        self.state
    }

    /// Returns the most recently applied event.
    pub fn last_event(&self) -> Option<&PrescriptionEvent> {
        self.last_event.as_ref()
    }
}

// Event application
impl Prescription {
    fn apply_created(&mut self, data: &PrescriptionCreatedData) {
        self.id = Some(data.id.clone());
        self.medication_id = Some(data.medication_id.clone());
        self.patient_id = Some(data.patient_id.clone());
        self.address = Some(data.address.clone());
        self.state = PrescriptionState::Created;
    }

    fn apply_updated(&mut self, data: &PrescriptionUpdatedData) {
        self.address = Some(data.address.clone());
    }
}
