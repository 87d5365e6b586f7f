//! Prescription commands.

use common::AggregateId;

/// Command to create a new prescription.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CreatePrescription {
    /// The medication being prescribed.
    pub medication_id: String,

    /// The patient the prescription is for.
    pub patient_id: String,

    /// Delivery address.
    pub address: String,
}

impl CreatePrescription {
    /// Creates a new CreatePrescription command.
    pub fn new(
        medication_id: impl Into<String>,
        patient_id: impl Into<String>,
        address: impl Into<String>,
    ) -> Self {
        Self {
            medication_id: medication_id.into(),
            patient_id: patient_id.into(),
            address: address.into(),
        }
    }
}

/// Command to change the delivery address of a prescription.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UpdatePrescription {
    /// The prescription to update.
    pub id: AggregateId,

    /// New delivery address.
    pub address: String,
}

impl UpdatePrescription {
    /// Creates a new UpdatePrescription command.
    pub fn new(id: impl Into<AggregateId>, address: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            address: address.into(),
        }
    }
}

/// Every command the prescription aggregate decides.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PrescriptionCommand {
    Create(CreatePrescription),
    Update(UpdatePrescription),
}

impl PrescriptionCommand {
    /// Returns the command name used in errors and metrics.
    pub fn name(&self) -> &'static str {
        match self {
            PrescriptionCommand::Create(_) => "create",
            PrescriptionCommand::Update(_) => "update",
        }
    }
}

impl From<CreatePrescription> for PrescriptionCommand {
    fn from(command: CreatePrescription) -> Self {
        PrescriptionCommand::Create(command)
    }
}

impl From<UpdatePrescription> for PrescriptionCommand {
    fn from(command: UpdatePrescription) -> Self {
        PrescriptionCommand::Update(command)
    }
}
