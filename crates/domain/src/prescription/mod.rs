//! Prescription aggregate and related types.

mod aggregate;
mod commands;
mod events;
mod service;
mod state;

pub use aggregate::Prescription;
pub use commands::{CreatePrescription, PrescriptionCommand, UpdatePrescription};
pub use events::{PrescriptionCreatedData, PrescriptionEvent, PrescriptionUpdatedData};
pub use service::PrescriptionService;
pub use state::{PrescriptionState, transition};

use thiserror::Error;

/// Errors that can occur during prescription operations.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PrescriptionError {
    /// No transition exists for the command in the current state.
    #[error("Invalid state transition: cannot {command} from {state} state")]
    InvalidTransition {
        state: PrescriptionState,
        command: &'static str,
    },

    /// A creation event was applied without establishing an id.
    #[error("Prescription has no id after creation")]
    MissingId,
}
