use std::sync::Arc;

use async_trait::async_trait;
use event_bus::{BusError, EventBus};

use crate::{
    AggregateId, DomainEvent, EventEnvelope, EventStoreError, Result, Sequence, StoredEvent,
};

/// Chooses the bus topic an outbox entry is published to.
pub type TopicMapper<E> = dyn Fn(&EventEnvelope<E>) -> String + Send + Sync;

/// Converts an outbox entry into a bus message.
///
/// Returning `None` marks the entry as untransformable; it stays queued.
pub type Transformer<E> = dyn Fn(&EventEnvelope<E>) -> Option<serde_json::Value> + Send + Sync;

/// Durable event log with a transactional outbox.
///
/// All implementations must be thread-safe (Send + Sync).
#[async_trait]
pub trait EventStore<E: DomainEvent>: Send + Sync {
    /// Succeeds when at least one event exists for the aggregate.
    ///
    /// Fails with `AggregateNotFound` otherwise.
    async fn aggregate_exists(&self, aggregate_id: &AggregateId) -> Result<()>;

    /// Writes the envelope to the event log and the outbox atomically.
    ///
    /// Either both rows are visible afterwards or neither is.
    async fn store_event(&self, envelope: &EventEnvelope<E>) -> Result<()>;

    /// Returns the aggregate's events in ascending sequence order.
    ///
    /// With `after`, only events whose sequence is strictly greater are
    /// returned. Rows whose event type `E` does not know are skipped.
    async fn retrieve_events(
        &self,
        aggregate_id: &AggregateId,
        after: Option<&Sequence>,
    ) -> Result<Vec<EventEnvelope<E>>>;

    /// Returns pending outbox entries, ordered by sequence.
    ///
    /// When the store is bound to an instance id, only that instance's
    /// entries are returned.
    async fn retrieve_outbox_events(&self) -> Result<Vec<EventEnvelope<E>>>;

    /// Publishes one outbox entry and removes it on success.
    ///
    /// If publishing fails the entry is retained for a later attempt. An
    /// entry that no longer exists is treated as already relayed.
    async fn send_and_delete_outbox_event(
        &self,
        envelope: &EventEnvelope<E>,
        bus: &dyn EventBus,
        topic_mapper: &TopicMapper<E>,
        transformer: &Transformer<E>,
    ) -> Result<()>;
}

#[async_trait]
impl<E: DomainEvent, T: EventStore<E> + ?Sized> EventStore<E> for Arc<T> {
    async fn aggregate_exists(&self, aggregate_id: &AggregateId) -> Result<()> {
        (**self).aggregate_exists(aggregate_id).await
    }

    async fn store_event(&self, envelope: &EventEnvelope<E>) -> Result<()> {
        (**self).store_event(envelope).await
    }

    async fn retrieve_events(
        &self,
        aggregate_id: &AggregateId,
        after: Option<&Sequence>,
    ) -> Result<Vec<EventEnvelope<E>>> {
        (**self).retrieve_events(aggregate_id, after).await
    }

    async fn retrieve_outbox_events(&self) -> Result<Vec<EventEnvelope<E>>> {
        (**self).retrieve_outbox_events().await
    }

    async fn send_and_delete_outbox_event(
        &self,
        envelope: &EventEnvelope<E>,
        bus: &dyn EventBus,
        topic_mapper: &TopicMapper<E>,
        transformer: &Transformer<E>,
    ) -> Result<()> {
        (**self)
            .send_and_delete_outbox_event(envelope, bus, topic_mapper, transformer)
            .await
    }
}

/// Checks an envelope before it is written.
pub(crate) fn validate_envelope(stored: &StoredEvent) -> Result<()> {
    if stored.aggregate_type.is_empty() {
        return Err(EventStoreError::InvalidEnvelope(
            "aggregate type must not be empty".to_string(),
        ));
    }
    if stored.aggregate_id.as_str().is_empty() {
        return Err(EventStoreError::InvalidEnvelope(
            "aggregate id must not be empty".to_string(),
        ));
    }
    if stored.sequence.as_str().is_empty() {
        return Err(EventStoreError::InvalidEnvelope(
            "sequence must not be empty".to_string(),
        ));
    }
    Ok(())
}

/// Resolves the topic and message for an outbox entry.
pub(crate) fn relay_message<E: DomainEvent>(
    envelope: &EventEnvelope<E>,
    topic_mapper: &TopicMapper<E>,
    transformer: &Transformer<E>,
) -> Result<(String, serde_json::Value)> {
    let topic = topic_mapper(envelope);
    let message = transformer(envelope).ok_or_else(|| BusError::Untransformable {
        sequence: envelope.sequence.to_string(),
    })?;
    Ok((topic, message))
}

/// Publishes a message, treating a `false` acknowledgement as a failure.
pub(crate) async fn publish(
    bus: &dyn EventBus,
    topic: &str,
    message: serde_json::Value,
) -> Result<()> {
    if bus.send(topic, message).await? {
        Ok(())
    } else {
        Err(BusError::SendFailed {
            topic: topic.to_string(),
            reason: "message not acknowledged".to_string(),
        }
        .into())
    }
}

/// Decodes stored rows, skipping event types `E` does not know.
pub(crate) fn decode_rows<E: DomainEvent>(
    rows: impl IntoIterator<Item = StoredEvent>,
) -> Result<Vec<EventEnvelope<E>>> {
    let mut envelopes = Vec::new();
    for row in rows {
        let event_type = row.event_type.clone();
        let sequence = row.sequence.clone();
        match EventEnvelope::from_stored(row)? {
            Some(envelope) => envelopes.push(envelope),
            None => {
                tracing::debug!(%event_type, %sequence, "Skipping event with unknown type");
            }
        }
    }
    Ok(envelopes)
}
