//! HTTP adapter for the prescription command core.
//!
//! Exposes the create and update commands over REST, with structured
//! logging (tracing) and Prometheus metrics.

pub mod config;
pub mod error;
pub mod routes;

use std::sync::Arc;

use axum::Router;
use axum::routing::{get, patch, post};
use config::Config;
use domain::{PrescriptionEvent, PrescriptionService};
use event_bus::EventBus;
use event_store::{EventStore, InMemoryEventStore};
use lock_manager::{InMemoryLockManager, LockManager, LockOptions};
use metrics_exporter_prometheus::PrometheusHandle;
use tower_http::cors::{Any, CorsLayer};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tower_http::trace::TraceLayer;

/// Event store shared between the service and the outbox relay.
pub type SharedStore = Arc<dyn EventStore<PrescriptionEvent>>;

/// Lock manager shared by every request.
pub type SharedLocks = Arc<dyn LockManager>;

/// Broker the outbox relay publishes to.
pub type SharedBus = Arc<dyn EventBus>;

/// Names of the wired backends, reported by `/health`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Backends {
    pub event_store: &'static str,
    pub lock_manager: &'static str,
}

impl Backends {
    pub const IN_MEMORY: Backends = Backends {
        event_store: "memory",
        lock_manager: "memory",
    };
}

/// Shared application state accessible from all handlers.
pub struct AppState {
    pub service: PrescriptionService<SharedStore, SharedLocks>,
    pub backends: Backends,
}

impl AppState {
    pub fn new(
        store: SharedStore,
        locks: SharedLocks,
        lock_options: LockOptions,
        backends: Backends,
    ) -> Self {
        Self {
            service: PrescriptionService::new(store, locks, lock_options),
            backends,
        }
    }

    /// State backed by in-memory store and locks.
    pub fn in_memory(lock_options: LockOptions) -> Self {
        Self::new(
            Arc::new(InMemoryEventStore::new()),
            Arc::new(InMemoryLockManager::new()),
            lock_options,
            Backends::IN_MEMORY,
        )
    }
}

/// Spawns the outbox relay when it is enabled and a broker is wired.
///
/// Without a broker nothing is drained: entries stay queued in the store
/// until a process with a broker relays them.
pub fn start_relay(
    config: &Config,
    store: SharedStore,
    bus: Option<SharedBus>,
    shutdown: watch::Receiver<bool>,
) -> Option<JoinHandle<()>> {
    if !config.outbox_enabled {
        tracing::info!("outbox relay disabled");
        return None;
    }
    let Some(bus) = bus else {
        tracing::warn!("no broker configured, outbox entries stay queued");
        return None;
    };

    let relay = outbox::prescription_relay(store, bus, config.outbox_config());
    tracing::info!(
        interval_ms = config.outbox_interval.as_millis() as u64,
        batch_size = config.outbox_batch_size,
        "starting outbox relay"
    );
    Some(tokio::spawn(async move { relay.run(shutdown).await }))
}

/// Creates the Axum application router with all routes and shared state.
pub fn create_app(state: Arc<AppState>, metrics_handle: PrometheusHandle) -> Router {
    let metrics_router = Router::new()
        .route("/metrics", get(routes::metrics::get))
        .with_state(metrics_handle);

    Router::new()
        .route("/health", get(routes::health::check))
        .route("/prescriptions", post(routes::prescriptions::create))
        .route("/prescriptions/{id}", patch(routes::prescriptions::update))
        .with_state(state)
        .merge(metrics_router)
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
        .layer(TraceLayer::new_for_http())
}
