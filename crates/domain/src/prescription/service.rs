//! Prescription command service.

use event_store::{EventEnvelope, EventStore, EventStoreError};
use lock_manager::{LockManager, LockOptions};

use crate::aggregate::{Aggregate, SnapshotCapable};
use crate::error::DomainError;

use super::{
    CreatePrescription, Prescription, PrescriptionCommand, PrescriptionError, PrescriptionEvent,
    UpdatePrescription,
};

/// Service for handling prescription commands.
///
/// Creates need no lock because their ids are fresh. Updates hold the
/// aggregate's lease for the whole read-replay-decide-write window and
/// release it on every exit path.
pub struct PrescriptionService<S, L> {
    store: S,
    locks: L,
    lock_options: LockOptions,
}

impl<S, L> PrescriptionService<S, L>
where
    S: EventStore<PrescriptionEvent>,
    L: LockManager,
{
    /// Creates a new prescription service.
    pub fn new(store: S, locks: L, lock_options: LockOptions) -> Self {
        Self {
            store,
            locks,
            lock_options,
        }
    }

    /// Returns a reference to the underlying event store.
    pub fn store(&self) -> &S {
        &self.store
    }

    /// Returns a reference to the underlying lock manager.
    pub fn locks(&self) -> &L {
        &self.locks
    }

    /// Creates a prescription and projects the result through `transform`.
    #[tracing::instrument(skip(self, transform))]
    pub async fn create_prescription<O, F>(
        &self,
        command: CreatePrescription,
        transform: F,
    ) -> Result<O, DomainError>
    where
        F: FnOnce(&Prescription) -> O,
    {
        let result = self.create(command).await;
        record_outcome("create", &result);
        result.map(|prescription| transform(&prescription))
    }

    /// Updates a prescription and projects the result through `transform`.
    #[tracing::instrument(skip(self, transform), fields(aggregate_id = %command.id))]
    pub async fn update_prescription<O, F>(
        &self,
        command: UpdatePrescription,
        transform: F,
    ) -> Result<O, DomainError>
    where
        F: FnOnce(&Prescription) -> O,
    {
        let result = self.update(command).await;
        record_outcome("update", &result);
        result.map(|prescription| transform(&prescription))
    }

    async fn create(&self, command: CreatePrescription) -> Result<Prescription, DomainError> {
        let mut prescription = Prescription::default();

        let event = prescription.handle(&PrescriptionCommand::Create(command), &())?;
        prescription.apply(event.clone());

        let id = prescription.id().cloned().ok_or(PrescriptionError::MissingId)?;
        let envelope = EventEnvelope::new(Prescription::aggregate_type(), id, event);
        self.store.store_event(&envelope).await?;

        tracing::info!(aggregate_id = %envelope.aggregate_id, "Prescription created");
        self.log_due_snapshot(&prescription)?;
        Ok(prescription)
    }

    async fn update(&self, command: UpdatePrescription) -> Result<Prescription, DomainError> {
        self.store
            .aggregate_exists(&command.id)
            .await
            .map_err(|e| match e {
                EventStoreError::AggregateNotFound(aggregate_id) => {
                    DomainError::AggregateNotFound {
                        aggregate_type: Prescription::aggregate_type(),
                        aggregate_id,
                    }
                }
                other => DomainError::EventStore(other),
            })?;

        self.locks.lock(&command.id, &self.lock_options).await?;

        let id = command.id.clone();
        let result = self.update_locked(command).await;

        // The lease must not outlive the command, whatever the outcome.
        if let Err(e) = self.locks.unlock(&id).await {
            tracing::warn!(
                aggregate_id = %id,
                error = %e,
                "Failed to release lock, lease will expire after its TTL"
            );
        }

        result
    }

    async fn update_locked(
        &self,
        command: UpdatePrescription,
    ) -> Result<Prescription, DomainError> {
        let history = self.store.retrieve_events(&command.id, None).await?;

        let mut prescription = Prescription::default();
        prescription.apply_events(history.into_iter().map(|envelope| envelope.payload));

        let id = command.id.clone();
        let event = prescription.handle(&PrescriptionCommand::Update(command), &())?;
        prescription.apply(event.clone());

        let envelope = EventEnvelope::new(Prescription::aggregate_type(), id, event);
        self.store.store_event(&envelope).await?;

        tracing::info!(
            aggregate_id = %envelope.aggregate_id,
            applied_events = prescription.applied_events(),
            "Prescription updated"
        );
        self.log_due_snapshot(&prescription)?;
        Ok(prescription)
    }

    /// Snapshots are not persisted yet; a due snapshot is only reported.
    fn log_due_snapshot(&self, prescription: &Prescription) -> Result<(), DomainError> {
        if let Some(snapshot) = prescription.snapshot()? {
            tracing::debug!(
                aggregate_id = %snapshot.aggregate_id,
                snapshot_id = %snapshot.snapshot_id,
                last_sequence = %snapshot.last_sequence,
                "Snapshot due, storage not available"
            );
        }
        Ok(())
    }
}

fn record_outcome<T>(command: &'static str, result: &Result<T, DomainError>) {
    let outcome = match result {
        Ok(_) => "success",
        Err(e) => {
            tracing::debug!(command, error = %e, kind = %e.kind(), "Command failed");
            e.kind().as_str()
        }
    };
    metrics::counter!("prescription_commands_total", "command" => command, "outcome" => outcome)
        .increment(1);
}
