//! Prescription state machine.

use common::AggregateId;
use event_store::Sequence;
use serde::{Deserialize, Serialize};

use super::{
    PrescriptionCommand, PrescriptionCreatedData, PrescriptionError, PrescriptionEvent,
    PrescriptionUpdatedData,
};

/// The lifecycle stage of a prescription.
///
/// State transitions:
/// ```text
/// New ──create──► Created ──update──┐
///                    ▲              │
///                    └──────────────┘
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
pub enum PrescriptionState {
    /// No creation event has been applied.
    #[default]
    New,

    /// Created; accepts any number of updates.
    Created,
}

impl PrescriptionState {
    /// Returns the state name as a string.
    pub fn as_str(&self) -> &'static str {
        match self {
            PrescriptionState::New => "New",
            PrescriptionState::Created => "Created",
        }
    }
}

impl std::fmt::Display for PrescriptionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Decides a command in the given state.
///
/// Returns the next state and the single event the command produces. Fresh
/// ids are generated for the aggregate (on create) and for the event.
pub fn transition(
    state: PrescriptionState,
    command: &PrescriptionCommand,
) -> Result<(PrescriptionState, PrescriptionEvent), PrescriptionError> {
    match (state, command) {
        (PrescriptionState::New, PrescriptionCommand::Create(cmd)) => Ok((
            PrescriptionState::Created,
            PrescriptionEvent::PrescriptionCreated(PrescriptionCreatedData {
                id: AggregateId::generate(),
                medication_id: cmd.medication_id.clone(),
                patient_id: cmd.patient_id.clone(),
                address: cmd.address.clone(),
                event_id: Sequence::generate(),
            }),
        )),
        (PrescriptionState::Created, PrescriptionCommand::Update(cmd)) => Ok((
            PrescriptionState::Created,
            PrescriptionEvent::PrescriptionUpdated(PrescriptionUpdatedData {
                address: cmd.address.clone(),
                event_id: Sequence::generate(),
            }),
        )),
        (state, command) => Err(PrescriptionError::InvalidTransition {
            state,
            command: command.name(),
        }),
    }
}
