use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use futures_util::stream;
use tokio::sync::broadcast;

use crate::{BusError, EventBus, MessageStream, Result};

const CHANNEL_CAPACITY: usize = 1024;

type MessageFilter = Box<dyn Fn(&serde_json::Value) -> bool + Send + Sync>;

#[derive(Default)]
struct BusState {
    channels: HashMap<String, broadcast::Sender<serde_json::Value>>,
    /// `None` unless the bus was built with [`InMemoryEventBus::recording`].
    published: Option<Vec<(String, serde_json::Value)>>,
    failing_topics: HashSet<String>,
    reject_when: Option<MessageFilter>,
}

/// In-process bus backed by one broadcast channel per topic.
///
/// A bus built with [`InMemoryEventBus::recording`] also keeps every
/// accepted message so tests can inspect what was published; a plain bus
/// keeps nothing. Failures can be injected per topic or per message.
#[derive(Clone, Default)]
pub struct InMemoryEventBus {
    state: Arc<Mutex<BusState>>,
}

impl InMemoryEventBus {
    /// Creates a new empty bus that only fans out to subscribers.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a bus that also records every accepted message.
    pub fn recording() -> Self {
        let bus = Self::default();
        bus.lock().published = Some(Vec::new());
        bus
    }

    /// Returns every `(topic, message)` accepted so far, in publish order.
    ///
    /// Always empty for a bus that is not recording.
    pub fn published(&self) -> Vec<(String, serde_json::Value)> {
        self.lock().published.clone().unwrap_or_default()
    }

    /// Returns the messages accepted on a single topic.
    pub fn published_to(&self, topic: &str) -> Vec<serde_json::Value> {
        self.lock()
            .published
            .iter()
            .flatten()
            .filter(|(t, _)| t == topic)
            .map(|(_, m)| m.clone())
            .collect()
    }

    /// Makes every send to `topic` fail until cleared.
    pub fn fail_topic(&self, topic: impl Into<String>) {
        self.lock().failing_topics.insert(topic.into());
    }

    /// Rejects any message matching the predicate.
    pub fn reject_when<F>(&self, predicate: F)
    where
        F: Fn(&serde_json::Value) -> bool + Send + Sync + 'static,
    {
        self.lock().reject_when = Some(Box::new(predicate));
    }

    /// Clears all injected failures.
    pub fn clear_failures(&self) {
        let mut state = self.lock();
        state.failing_topics.clear();
        state.reject_when = None;
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, BusState> {
        self.state
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

#[async_trait]
impl EventBus for InMemoryEventBus {
    async fn send(&self, topic: &str, message: serde_json::Value) -> Result<bool> {
        let mut state = self.lock();

        if state.failing_topics.contains(topic) {
            return Err(BusError::SendFailed {
                topic: topic.to_string(),
                reason: "topic unavailable".to_string(),
            });
        }
        if let Some(reject) = &state.reject_when
            && reject(&message)
        {
            return Err(BusError::SendFailed {
                topic: topic.to_string(),
                reason: "message rejected".to_string(),
            });
        }

        if let Some(sender) = state.channels.get(topic) {
            // No live subscribers is not an error for a fire-and-forget publish.
            let _ = sender.send(message.clone());
        }
        if let Some(published) = &mut state.published {
            published.push((topic.to_string(), message));
        }
        tracing::trace!(topic, "message published");

        Ok(true)
    }

    async fn receive(&self, topic: &str) -> Result<MessageStream> {
        let receiver = {
            let mut state = self.lock();
            state
                .channels
                .entry(topic.to_string())
                .or_insert_with(|| broadcast::channel(CHANNEL_CAPACITY).0)
                .subscribe()
        };

        let stream = stream::unfold(receiver, |mut receiver| async move {
            loop {
                match receiver.recv().await {
                    Ok(message) => return Some((message, receiver)),
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        tracing::warn!(skipped, "bus subscriber lagged, messages dropped");
                    }
                    Err(broadcast::error::RecvError::Closed) => return None,
                }
            }
        });

        Ok(Box::pin(stream))
    }
}
