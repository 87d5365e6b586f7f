//! Message bus capability consumed by the outbox relay.
//!
//! The relay only needs to publish JSON messages to named topics; consumers
//! subscribe through [`EventBus::receive`]. Wire encodings for concrete
//! brokers live outside this crate.

pub mod error;
pub mod memory;

use std::pin::Pin;

use async_trait::async_trait;
use futures_core::Stream;

pub use error::{BusError, Result};
pub use memory::InMemoryEventBus;

/// A stream of messages received from a topic.
pub type MessageStream = Pin<Box<dyn Stream<Item = serde_json::Value> + Send>>;

/// Publish/subscribe access to a message bus.
#[async_trait]
pub trait EventBus: Send + Sync {
    /// Publishes a message to a topic.
    ///
    /// Returns `true` when the bus accepted the message.
    async fn send(&self, topic: &str, message: serde_json::Value) -> Result<bool>;

    /// Subscribes to a topic, yielding messages published after the call.
    async fn receive(&self, topic: &str) -> Result<MessageStream>;
}

#[async_trait]
impl<T: EventBus + ?Sized> EventBus for std::sync::Arc<T> {
    async fn send(&self, topic: &str, message: serde_json::Value) -> Result<bool> {
        (**self).send(topic, message).await
    }

    async fn receive(&self, topic: &str) -> Result<MessageStream> {
        (**self).receive(topic).await
    }
}
