use std::time::Duration;

use event_bus::EventBus;
use event_store::{DomainEvent, EventEnvelope, EventStore, TopicMapper, Transformer};
use tokio::sync::watch;
use tokio::time::MissedTickBehavior;

use crate::Result;

/// Relay scheduling.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OutboxConfig {
    /// Time between cycles.
    pub interval: Duration,
    /// Maximum number of entries attempted per cycle.
    pub batch_size: usize,
}

impl Default for OutboxConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(1),
            batch_size: 100,
        }
    }
}

/// Outcome of one relay cycle.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RelayReport {
    /// Entries pending when the cycle started.
    pub pending: usize,
    /// Entries this cycle tried to publish.
    pub attempted: usize,
    /// Entries published and removed.
    pub sent: usize,
    /// Entries left queued after a failure.
    pub failed: usize,
}

/// Drains an event store's outbox to a bus.
pub struct OutboxRelay<S, B, E> {
    store: S,
    bus: B,
    config: OutboxConfig,
    topic_mapper: Box<TopicMapper<E>>,
    transformer: Box<Transformer<E>>,
}

impl<S, B, E> OutboxRelay<S, B, E>
where
    E: DomainEvent,
    S: EventStore<E>,
    B: EventBus,
{
    /// Creates a relay that routes entries with `topic_mapper` and encodes
    /// them with `transformer`.
    pub fn new(
        store: S,
        bus: B,
        config: OutboxConfig,
        topic_mapper: impl Fn(&EventEnvelope<E>) -> String + Send + Sync + 'static,
        transformer: impl Fn(&EventEnvelope<E>) -> Option<serde_json::Value> + Send + Sync + 'static,
    ) -> Self {
        Self {
            store,
            bus,
            config,
            topic_mapper: Box::new(topic_mapper),
            transformer: Box::new(transformer),
        }
    }

    /// Returns the relay configuration.
    pub fn config(&self) -> &OutboxConfig {
        &self.config
    }

    /// Runs one cycle: fetch pending entries and publish up to
    /// `batch_size` of them, each independently.
    ///
    /// Only failing to read the outbox is an error; per-entry failures are
    /// logged and counted in the report.
    #[tracing::instrument(skip(self))]
    pub async fn run_cycle(&self) -> Result<RelayReport> {
        let pending = self.store.retrieve_outbox_events().await?;
        metrics::gauge!("outbox_pending_events").set(pending.len() as f64);

        let mut report = RelayReport {
            pending: pending.len(),
            ..RelayReport::default()
        };

        if pending.len() > self.config.batch_size {
            tracing::info!(
                pending = pending.len(),
                batch_size = self.config.batch_size,
                "Outbox backlog exceeds batch size, deferring remainder"
            );
        }

        for envelope in pending.iter().take(self.config.batch_size) {
            report.attempted += 1;

            let result = self
                .store
                .send_and_delete_outbox_event(
                    envelope,
                    &self.bus,
                    self.topic_mapper.as_ref(),
                    self.transformer.as_ref(),
                )
                .await;

            match result {
                Ok(()) => {
                    report.sent += 1;
                    metrics::counter!("outbox_events_sent_total").increment(1);
                    tracing::debug!(
                        sequence = %envelope.sequence,
                        event_type = %envelope.event_type,
                        "Relayed outbox entry"
                    );
                }
                Err(e) => {
                    report.failed += 1;
                    metrics::counter!("outbox_events_failed_total").increment(1);
                    tracing::warn!(
                        sequence = %envelope.sequence,
                        event_type = %envelope.event_type,
                        error = %e,
                        "Failed to relay outbox entry, will retry next cycle"
                    );
                }
            }
        }

        Ok(report)
    }

    /// Runs cycles every `interval` until `shutdown` turns `true` or its
    /// sender is dropped.
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) {
        let mut ticker = tokio::time::interval(self.config.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        tracing::info!(
            interval_ms = self.config.interval.as_millis() as u64,
            batch_size = self.config.batch_size,
            "Outbox relay started"
        );

        loop {
            if *shutdown.borrow() {
                break;
            }

            tokio::select! {
                _ = ticker.tick() => {
                    match self.run_cycle().await {
                        Ok(report) if report.attempted > 0 => {
                            tracing::info!(
                                sent = report.sent,
                                failed = report.failed,
                                remaining = report.pending - report.sent,
                                "Outbox cycle complete"
                            );
                        }
                        Ok(_) => {}
                        Err(e) => {
                            tracing::error!(error = %e, "Outbox cycle failed");
                        }
                    }
                }
                changed = shutdown.changed() => {
                    if changed.is_err() {
                        break;
                    }
                }
            }
        }

        tracing::info!("Outbox relay stopped");
    }
}
