use std::collections::HashSet;
use std::sync::Arc;

use async_trait::async_trait;
use event_bus::EventBus;
use tokio::sync::RwLock;

use crate::{
    AggregateId, DomainEvent, EventEnvelope, EventStoreError, Result, Sequence, StoredEvent,
    store::{
        EventStore, TopicMapper, Transformer, decode_rows, publish, relay_message,
        validate_envelope,
    },
};

#[derive(Debug, Clone)]
struct OutboxRow {
    event: StoredEvent,
    instance_id: Option<String>,
}

#[derive(Debug, Default)]
struct MemoryState {
    events: Vec<StoredEvent>,
    outbox: Vec<OutboxRow>,
    /// Outbox rows a relay is currently publishing.
    claimed: HashSet<(AggregateId, Sequence)>,
    fail_event_insert: bool,
    fail_outbox_insert: bool,
    fail_retrieve: bool,
    fail_outbox_read: bool,
}

/// In-memory event store implementation for testing.
///
/// Mirrors the PostgreSQL store's transactional behavior: an envelope is
/// written to both the log and the outbox, or to neither.
#[derive(Clone, Default)]
pub struct InMemoryEventStore {
    state: Arc<RwLock<MemoryState>>,
    instance_id: Option<String>,
}

impl InMemoryEventStore {
    /// Creates a new empty in-memory event store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Tags outbox entries written through this handle with an instance id
    /// and restricts outbox reads to that id.
    pub fn with_instance_id(mut self, instance_id: impl Into<String>) -> Self {
        self.instance_id = Some(instance_id.into());
        self
    }

    /// Returns the total number of events in the log.
    pub async fn event_count(&self) -> usize {
        self.state.read().await.events.len()
    }

    /// Returns the total number of pending outbox entries across instances.
    pub async fn outbox_count(&self) -> usize {
        self.state.read().await.outbox.len()
    }

    /// Returns the raw log rows for an aggregate in sequence order.
    pub async fn raw_events(&self, aggregate_id: &AggregateId) -> Vec<StoredEvent> {
        let state = self.state.read().await;
        let mut rows: Vec<_> = state
            .events
            .iter()
            .filter(|e| &e.aggregate_id == aggregate_id)
            .cloned()
            .collect();
        rows.sort_by(|a, b| a.sequence.cmp(&b.sequence));
        rows
    }

    /// Writes a raw row to the log and the outbox, bypassing the codec.
    pub async fn insert_raw(&self, event: StoredEvent) {
        let mut state = self.state.write().await;
        state.outbox.push(OutboxRow {
            event: event.clone(),
            instance_id: self.instance_id.clone(),
        });
        state.events.push(event);
    }

    /// Makes the next log insert fail.
    pub async fn fail_next_event_insert(&self) {
        self.state.write().await.fail_event_insert = true;
    }

    /// Makes the next outbox insert fail after the log insert succeeded,
    /// rolling back both.
    pub async fn fail_next_outbox_insert(&self) {
        self.state.write().await.fail_outbox_insert = true;
    }

    /// Makes the next `retrieve_events` call fail.
    pub async fn fail_next_retrieve(&self) {
        self.state.write().await.fail_retrieve = true;
    }

    /// Makes the next `retrieve_outbox_events` call fail.
    pub async fn fail_next_outbox_read(&self) {
        self.state.write().await.fail_outbox_read = true;
    }

    /// Clears all events and outbox entries.
    pub async fn clear(&self) {
        let mut state = self.state.write().await;
        state.events.clear();
        state.outbox.clear();
        state.claimed.clear();
    }
}

#[async_trait]
impl<E: DomainEvent> EventStore<E> for InMemoryEventStore {
    async fn aggregate_exists(&self, aggregate_id: &AggregateId) -> Result<()> {
        let state = self.state.read().await;
        if state.events.iter().any(|e| &e.aggregate_id == aggregate_id) {
            Ok(())
        } else {
            Err(EventStoreError::AggregateNotFound(aggregate_id.clone()))
        }
    }

    async fn store_event(&self, envelope: &EventEnvelope<E>) -> Result<()> {
        let stored = envelope.to_stored()?;
        validate_envelope(&stored)?;

        let mut state = self.state.write().await;

        if std::mem::take(&mut state.fail_event_insert) {
            return Err(EventStoreError::Injected("event insert"));
        }

        let duplicate = state
            .events
            .iter()
            .any(|e| e.aggregate_id == stored.aggregate_id && e.sequence == stored.sequence);
        if duplicate {
            return Err(EventStoreError::DuplicateSequence {
                aggregate_id: stored.aggregate_id,
                sequence: stored.sequence,
            });
        }

        // Nothing is written until both inserts are known to succeed.
        if std::mem::take(&mut state.fail_outbox_insert) {
            return Err(EventStoreError::Injected("outbox insert"));
        }

        state.outbox.push(OutboxRow {
            event: stored.clone(),
            instance_id: self.instance_id.clone(),
        });
        state.events.push(stored);

        Ok(())
    }

    async fn retrieve_events(
        &self,
        aggregate_id: &AggregateId,
        after: Option<&Sequence>,
    ) -> Result<Vec<EventEnvelope<E>>> {
        let rows = {
            let mut state = self.state.write().await;
            if std::mem::take(&mut state.fail_retrieve) {
                return Err(EventStoreError::Injected("retrieve events"));
            }

            let mut rows: Vec<StoredEvent> = state
                .events
                .iter()
                .filter(|e| &e.aggregate_id == aggregate_id)
                .filter(|e| after.is_none_or(|after| &e.sequence > after))
                .cloned()
                .collect();
            rows.sort_by(|a, b| a.sequence.cmp(&b.sequence));
            rows
        };

        decode_rows(rows)
    }

    async fn retrieve_outbox_events(&self) -> Result<Vec<EventEnvelope<E>>> {
        let rows = {
            let mut state = self.state.write().await;
            if std::mem::take(&mut state.fail_outbox_read) {
                return Err(EventStoreError::Injected("retrieve outbox events"));
            }

            let mut rows: Vec<StoredEvent> = state
                .outbox
                .iter()
                .filter(|row| match &self.instance_id {
                    Some(id) => row.instance_id.as_deref() == Some(id.as_str()),
                    None => true,
                })
                .map(|row| row.event.clone())
                .collect();
            rows.sort_by(|a, b| a.sequence.cmp(&b.sequence));
            rows
        };

        decode_rows(rows)
    }

    async fn send_and_delete_outbox_event(
        &self,
        envelope: &EventEnvelope<E>,
        bus: &dyn EventBus,
        topic_mapper: &TopicMapper<E>,
        transformer: &Transformer<E>,
    ) -> Result<()> {
        let key = (envelope.aggregate_id.clone(), envelope.sequence.clone());

        // Claim the row, then publish without holding the store lock.
        {
            let mut state = self.state.write().await;
            let present = state
                .outbox
                .iter()
                .any(|row| row.event.aggregate_id == key.0 && row.event.sequence == key.1);
            if !present || !state.claimed.insert(key.clone()) {
                tracing::debug!(
                    sequence = %envelope.sequence,
                    "Outbox entry already relayed or claimed"
                );
                return Ok(());
            }
        }

        let sent = match relay_message(envelope, topic_mapper, transformer) {
            Ok((topic, message)) => publish(bus, &topic, message).await,
            Err(e) => Err(e),
        };

        let mut state = self.state.write().await;
        state.claimed.remove(&key);
        sent?;

        state
            .outbox
            .retain(|row| !(row.event.aggregate_id == key.0 && row.event.sequence == key.1));
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use async_trait::async_trait;
    use event_bus::{BusError, InMemoryEventBus, MessageStream};
    use tokio::sync::Notify;

    use super::*;
    use crate::event::tests::Noted;

    fn envelope(aggregate_id: &AggregateId, text: &str) -> EventEnvelope<Noted> {
        EventEnvelope::new("Note", aggregate_id.clone(), Noted::new(text))
    }

    fn topic(_: &EventEnvelope<Noted>) -> String {
        "notes".to_string()
    }

    fn to_message(envelope: &EventEnvelope<Noted>) -> Option<serde_json::Value> {
        Some(serde_json::json!({ "text": envelope.payload.text }))
    }

    async fn outbox(store: &InMemoryEventStore) -> Vec<EventEnvelope<Noted>> {
        store.retrieve_outbox_events().await.unwrap()
    }

    #[tokio::test]
    async fn store_event_writes_log_and_outbox() {
        let store = InMemoryEventStore::new();
        let id = AggregateId::generate();

        store.store_event(&envelope(&id, "one")).await.unwrap();

        assert_eq!(store.event_count().await, 1);
        assert_eq!(store.outbox_count().await, 1);
        assert!(EventStore::<Noted>::aggregate_exists(&store, &id).await.is_ok());
    }

    #[tokio::test]
    async fn aggregate_exists_fails_for_unknown_id() {
        let store = InMemoryEventStore::new();
        let result =
            EventStore::<Noted>::aggregate_exists(&store, &AggregateId::new("nonexistent")).await;
        assert!(matches!(result, Err(EventStoreError::AggregateNotFound(_))));
    }

    #[tokio::test]
    async fn failed_outbox_insert_leaves_no_event() {
        let store = InMemoryEventStore::new();
        let id = AggregateId::generate();

        store.fail_next_outbox_insert().await;
        let result = store.store_event(&envelope(&id, "one")).await;

        assert!(matches!(result, Err(EventStoreError::Injected(_))));
        assert_eq!(store.event_count().await, 0);
        assert_eq!(store.outbox_count().await, 0);
    }

    #[tokio::test]
    async fn failed_event_insert_leaves_no_outbox_entry() {
        let store = InMemoryEventStore::new();
        let id = AggregateId::generate();

        store.fail_next_event_insert().await;
        assert!(store.store_event(&envelope(&id, "one")).await.is_err());
        assert_eq!(store.outbox_count().await, 0);

        // The hook only fires once.
        store.store_event(&envelope(&id, "two")).await.unwrap();
        assert_eq!(store.event_count().await, 1);
    }

    #[tokio::test]
    async fn duplicate_sequence_is_rejected() {
        let store = InMemoryEventStore::new();
        let env = envelope(&AggregateId::generate(), "one");

        store.store_event(&env).await.unwrap();
        let result = store.store_event(&env).await;

        assert!(matches!(result, Err(EventStoreError::DuplicateSequence { .. })));
        assert_eq!(store.event_count().await, 1);
    }

    #[tokio::test]
    async fn retrieve_events_in_sequence_order_after_cursor() {
        let store = InMemoryEventStore::new();
        let id = AggregateId::generate();
        let first = envelope(&id, "one");
        let second = envelope(&id, "two");
        let third = envelope(&id, "three");

        // Insertion order differs from sequence order.
        store.store_event(&third).await.unwrap();
        store.store_event(&first).await.unwrap();
        store.store_event(&second).await.unwrap();
        store.store_event(&envelope(&AggregateId::generate(), "other")).await.unwrap();

        let all: Vec<EventEnvelope<Noted>> = store.retrieve_events(&id, None).await.unwrap();
        let texts: Vec<_> = all.iter().map(|e| e.payload.text.as_str()).collect();
        assert_eq!(texts, vec!["one", "two", "three"]);

        let after: Vec<EventEnvelope<Noted>> = store
            .retrieve_events(&id, Some(&first.sequence))
            .await
            .unwrap();
        let texts: Vec<_> = after.iter().map(|e| e.payload.text.as_str()).collect();
        assert_eq!(texts, vec!["two", "three"]);
    }

    #[tokio::test]
    async fn retrieve_skips_unknown_event_types() {
        let store = InMemoryEventStore::new();
        let id = AggregateId::generate();
        let mut raw = envelope(&id, "hidden").to_stored().unwrap();
        raw.event_type = "Erased".to_string();
        store.insert_raw(raw).await;

        let events: Vec<EventEnvelope<Noted>> = store.retrieve_events(&id, None).await.unwrap();
        assert!(events.is_empty());
        assert!(EventStore::<Noted>::aggregate_exists(&store, &id).await.is_ok());
    }

    #[tokio::test]
    async fn injected_retrieve_failure_fires_once() {
        let store = InMemoryEventStore::new();
        let id = AggregateId::generate();
        store.store_event(&envelope(&id, "one")).await.unwrap();

        store.fail_next_retrieve().await;
        assert!(EventStore::<Noted>::retrieve_events(&store, &id, None).await.is_err());
        assert!(EventStore::<Noted>::retrieve_events(&store, &id, None).await.is_ok());
    }

    #[tokio::test]
    async fn outbox_is_filtered_by_instance() {
        let shared = InMemoryEventStore::new();
        let a = shared.clone().with_instance_id("a");
        let b = shared.clone().with_instance_id("b");

        a.store_event(&envelope(&AggregateId::generate(), "from-a")).await.unwrap();
        b.store_event(&envelope(&AggregateId::generate(), "from-b")).await.unwrap();

        let pending = outbox(&a).await;
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].payload.text, "from-a");
        assert_eq!(outbox(&shared).await.len(), 2);
    }

    #[tokio::test]
    async fn send_and_delete_removes_entry_on_success() {
        let store = InMemoryEventStore::new();
        let bus = InMemoryEventBus::recording();
        let env = envelope(&AggregateId::generate(), "one");
        store.store_event(&env).await.unwrap();

        store
            .send_and_delete_outbox_event(&env, &bus, &topic, &to_message)
            .await
            .unwrap();

        assert_eq!(store.outbox_count().await, 0);
        assert_eq!(store.event_count().await, 1);
        assert_eq!(bus.published_to("notes").len(), 1);
    }

    #[tokio::test]
    async fn send_failure_keeps_entry() {
        let store = InMemoryEventStore::new();
        let bus = InMemoryEventBus::recording();
        bus.fail_topic("notes");
        let env = envelope(&AggregateId::generate(), "one");
        store.store_event(&env).await.unwrap();

        let result = store
            .send_and_delete_outbox_event(&env, &bus, &topic, &to_message)
            .await;

        assert!(matches!(result, Err(EventStoreError::Relay(_))));
        assert_eq!(store.outbox_count().await, 1);
    }

    #[tokio::test]
    async fn untransformable_entry_is_kept() {
        let store = InMemoryEventStore::new();
        let bus = InMemoryEventBus::recording();
        let env = envelope(&AggregateId::generate(), "one");
        store.store_event(&env).await.unwrap();

        let reject = |_: &EventEnvelope<Noted>| -> Option<serde_json::Value> { None };
        let result = store
            .send_and_delete_outbox_event(&env, &bus, &topic, &reject)
            .await;

        assert!(matches!(
            result,
            Err(EventStoreError::Relay(BusError::Untransformable { .. }))
        ));
        assert_eq!(store.outbox_count().await, 1);
        assert!(bus.published().is_empty());
    }

    #[tokio::test]
    async fn missing_entry_is_a_no_op() {
        let store = InMemoryEventStore::new();
        let bus = InMemoryEventBus::recording();
        let env = envelope(&AggregateId::generate(), "one");

        store
            .send_and_delete_outbox_event(&env, &bus, &topic, &to_message)
            .await
            .unwrap();

        assert!(bus.published().is_empty());
    }

    /// Bus whose sends block until the gate opens.
    #[derive(Default)]
    struct GatedBus {
        entered: Notify,
        gate: Notify,
        sends: std::sync::atomic::AtomicUsize,
    }

    #[async_trait]
    impl event_bus::EventBus for GatedBus {
        async fn send(&self, _topic: &str, _message: serde_json::Value) -> event_bus::Result<bool> {
            self.sends.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
            self.entered.notify_one();
            self.gate.notified().await;
            Ok(true)
        }

        async fn receive(&self, _topic: &str) -> event_bus::Result<MessageStream> {
            Err(BusError::Unavailable("gated bus has no subscribers".to_string()))
        }
    }

    #[tokio::test]
    async fn slow_publish_does_not_block_writes() {
        let store = InMemoryEventStore::new();
        let bus = Arc::new(GatedBus::default());
        let env = envelope(&AggregateId::generate(), "one");
        store.store_event(&env).await.unwrap();

        let relay = {
            let (store, bus, env) = (store.clone(), bus.clone(), env.clone());
            tokio::spawn(async move {
                store
                    .send_and_delete_outbox_event(&env, bus.as_ref(), &topic, &to_message)
                    .await
            })
        };
        bus.entered.notified().await;

        // The publish is in flight; writes and reads still go through.
        tokio::time::timeout(
            Duration::from_secs(1),
            store.store_event(&envelope(&AggregateId::generate(), "two")),
        )
        .await
        .expect("store blocked behind publish")
        .unwrap();
        assert_eq!(store.outbox_count().await, 2);

        // A second relay skips the claimed row instead of sending it again.
        store
            .send_and_delete_outbox_event(&env, bus.as_ref(), &topic, &to_message)
            .await
            .unwrap();
        assert_eq!(bus.sends.load(std::sync::atomic::Ordering::SeqCst), 1);

        bus.gate.notify_one();
        relay.await.unwrap().unwrap();
        assert_eq!(store.outbox_count().await, 1);
        assert_eq!(store.event_count().await, 2);
    }

    #[tokio::test]
    async fn failed_send_releases_claim() {
        let store = InMemoryEventStore::new();
        let bus = InMemoryEventBus::recording();
        bus.fail_topic("notes");
        let env = envelope(&AggregateId::generate(), "one");
        store.store_event(&env).await.unwrap();

        assert!(
            store
                .send_and_delete_outbox_event(&env, &bus, &topic, &to_message)
                .await
                .is_err()
        );

        bus.clear_failures();
        store
            .send_and_delete_outbox_event(&env, &bus, &topic, &to_message)
            .await
            .unwrap();
        assert_eq!(store.outbox_count().await, 0);
        assert_eq!(bus.published_to("notes").len(), 1);
    }
}
