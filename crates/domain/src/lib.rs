//! Domain layer for the prescription command-processing core.
//!
//! This crate provides:
//! - Aggregate trait for event-sourced entities
//! - Prescription state machine, commands, events, and aggregate
//! - `PrescriptionService`, which sequences locking, replay, and persistence

pub mod aggregate;
pub mod error;
pub mod prescription;

pub use aggregate::{Aggregate, SnapshotCapable};
pub use error::{DomainError, ErrorKind};
pub use event_store::DomainEvent;
pub use prescription::{
    CreatePrescription, Prescription, PrescriptionCommand, PrescriptionCreatedData,
    PrescriptionError, PrescriptionEvent, PrescriptionService, PrescriptionState,
    PrescriptionUpdatedData, UpdatePrescription, transition,
};
