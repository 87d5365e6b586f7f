//! Durable event log and transactional outbox.
//!
//! Every stored envelope is written to the append-only `events` log and to
//! the `outbox_events` queue in the same transaction. The outbox is drained
//! asynchronously by a relay through [`EventStore::send_and_delete_outbox_event`].

pub mod error;
pub mod event;
pub mod memory;
pub mod postgres;
pub mod snapshot;
pub mod store;

pub use common::AggregateId;
pub use error::{EventStoreError, Result};
pub use event::{DomainEvent, EventEnvelope, Sequence, StoredEvent};
pub use memory::InMemoryEventStore;
pub use postgres::PostgresEventStore;
pub use snapshot::Snapshot;
pub use store::{EventStore, TopicMapper, Transformer};
