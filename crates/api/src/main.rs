//! API server entry point.

use std::sync::Arc;
use std::time::Duration;

use api::config::{Config, LogFormat};
use api::{AppState, Backends, SharedLocks, SharedStore};
use event_store::{InMemoryEventStore, PostgresEventStore};
use lock_manager::{InMemoryLockManager, RedisLockManager};
use sqlx::postgres::PgPoolOptions;
use tokio::signal;
use tokio::sync::watch;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Waits for a shutdown signal (SIGINT or SIGTERM).
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::error!(error = %e, "failed to listen for SIGINT");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {
            tracing::info!("received SIGINT, starting graceful shutdown");
        }
        () = terminate => {
            tracing::info!("received SIGTERM, starting graceful shutdown");
        }
    }
}

fn init_tracing(config: &Config) {
    let filter = EnvFilter::try_new(&config.log_level).unwrap_or_else(|_| EnvFilter::new("info"));
    let registry = tracing_subscriber::registry().with(filter);

    match config.log_format {
        LogFormat::Json => registry.with(tracing_subscriber::fmt::layer().json()).init(),
        LogFormat::Text => registry.with(tracing_subscriber::fmt::layer()).init(),
    }
}

async fn event_store(config: &Config) -> Result<(SharedStore, &'static str), BoxError> {
    let Some(url) = &config.database_url else {
        let mut store = InMemoryEventStore::new();
        if let Some(instance_id) = &config.instance_id {
            store = store.with_instance_id(instance_id.clone());
        }
        tracing::warn!("DATABASE_URL not set, events are kept in memory");
        return Ok((Arc::new(store), "memory"));
    };

    let pool = PgPoolOptions::new()
        .max_connections(10)
        .acquire_timeout(Duration::from_secs(5))
        .connect(url)
        .await?;

    let mut store = PostgresEventStore::new(pool);
    if let Some(instance_id) = &config.instance_id {
        store = store.with_instance_id(instance_id.clone());
    }
    store.run_migrations().await?;

    tracing::info!("PostgreSQL event store ready");
    Ok((Arc::new(store), "postgres"))
}

async fn lock_manager(config: &Config) -> Result<(SharedLocks, &'static str), BoxError> {
    match &config.redis_url {
        Some(url) => {
            let locks = RedisLockManager::connect(url).await?;
            Ok((Arc::new(locks), "redis"))
        }
        None => {
            tracing::warn!("REDIS_URL not set, locks are process-local");
            Ok((Arc::new(InMemoryLockManager::new()), "memory"))
        }
    }
}

#[tokio::main]
async fn main() -> Result<(), BoxError> {
    // 1. Load configuration and initialize tracing
    let config = Config::from_env();
    init_tracing(&config);

    // 2. Install Prometheus metrics recorder
    let metrics_handle = metrics_exporter_prometheus::PrometheusBuilder::new().install_recorder()?;

    // 3. Wire backends and application state
    let (store, store_backend) = event_store(&config).await?;
    let (locks, lock_backend) = lock_manager(&config).await?;
    let state = Arc::new(AppState::new(
        store.clone(),
        locks,
        config.lock_options(),
        Backends {
            event_store: store_backend,
            lock_manager: lock_backend,
        },
    ));

    // 4. Start the outbox relay
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    // TODO: wire a broker adapter here once one exists; until then the
    // outbox is left for another process to drain.
    let relay_task = api::start_relay(&config, store, None, shutdown_rx);

    // 5. Start server
    let app = api::create_app(state, metrics_handle);
    let addr = config.addr();
    tracing::info!(%addr, "starting API server");

    let listener = tokio::net::TcpListener::bind(&addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    // 6. Stop the relay after in-flight requests finish
    let _ = shutdown_tx.send(true);
    if let Some(task) = relay_task
        && let Err(e) = task.await
    {
        tracing::error!(error = %e, "outbox relay task failed");
    }

    tracing::info!("server shut down gracefully");
    Ok(())
}
