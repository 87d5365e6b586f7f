//! Outbox relay.
//!
//! Periodically drains the event store's outbox to the message bus with
//! at-least-once delivery. Entries that fail to publish stay queued for the
//! next cycle; consumers are expected to be idempotent.

pub mod error;
pub mod prescription;
pub mod relay;

pub use error::{RelayError, Result};
pub use prescription::{
    CloudEvent, TOPIC_CREATED, TOPIC_TRASH, TOPIC_UPDATED, prescription_relay, prescription_topic,
    message_sequence, to_cloud_event, to_cloud_event_message,
};
pub use relay::{OutboxConfig, OutboxRelay, RelayReport};
