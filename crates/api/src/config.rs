//! Application configuration loaded from environment variables.

use std::str::FromStr;
use std::time::Duration;

use lock_manager::LockOptions;
use outbox::OutboxConfig;

/// Log output format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LogFormat {
    /// Human-readable lines.
    #[default]
    Text,
    /// One JSON object per line.
    Json,
}

/// Server configuration with sensible defaults.
///
/// Reads from environment variables:
/// - `HOST`, `PORT`: bind address (default `0.0.0.0:3000`)
/// - `RUST_LOG`: tracing filter directive (default `"info"`)
/// - `LOG_FORMAT`: `text` or `json`
/// - `DATABASE_URL`: PostgreSQL event store; in-memory when unset
/// - `REDIS_URL`: Redis lock manager; in-memory when unset
/// - `INSTANCE_ID`: scopes this process's outbox entries
/// - `OUTBOX_ENABLED`, `OUTBOX_INTERVAL_MS`, `OUTBOX_BATCH_SIZE`
/// - `LOCK_TTL_SECS`, `LOCK_MAX_ATTEMPTS`, `LOCK_RETRY_DELAY_MS`
#[derive(Debug, Clone)]
pub struct Config {
    pub host: String,
    pub port: u16,
    pub log_level: String,
    pub log_format: LogFormat,
    pub database_url: Option<String>,
    pub redis_url: Option<String>,
    pub instance_id: Option<String>,
    pub outbox_enabled: bool,
    pub outbox_interval: Duration,
    pub outbox_batch_size: usize,
    pub lock_ttl: Duration,
    pub lock_max_attempts: u32,
    pub lock_retry_delay: Duration,
}

impl Config {
    /// Loads configuration from environment variables, falling back to defaults.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Loads configuration from an arbitrary key lookup.
    ///
    /// Unparseable values fall back to their defaults.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let defaults = Self::default();
        let text = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        Self {
            host: text("HOST").unwrap_or(defaults.host),
            port: parsed::<u16>(&text, "PORT").unwrap_or(defaults.port),
            log_level: text("RUST_LOG").unwrap_or(defaults.log_level),
            log_format: match text("LOG_FORMAT").as_deref() {
                Some("json") => LogFormat::Json,
                _ => LogFormat::Text,
            },
            database_url: text("DATABASE_URL"),
            redis_url: text("REDIS_URL"),
            instance_id: text("INSTANCE_ID"),
            outbox_enabled: parsed::<bool>(&text, "OUTBOX_ENABLED").unwrap_or(defaults.outbox_enabled),
            outbox_interval: parsed::<u64>(&text, "OUTBOX_INTERVAL_MS")
                .map(Duration::from_millis)
                .unwrap_or(defaults.outbox_interval),
            outbox_batch_size: parsed::<usize>(&text, "OUTBOX_BATCH_SIZE")
                .filter(|n| *n > 0)
                .unwrap_or(defaults.outbox_batch_size),
            lock_ttl: parsed::<u64>(&text, "LOCK_TTL_SECS")
                .map(Duration::from_secs)
                .unwrap_or(defaults.lock_ttl),
            lock_max_attempts: parsed::<u32>(&text, "LOCK_MAX_ATTEMPTS")
                .filter(|n| *n > 0)
                .unwrap_or(defaults.lock_max_attempts),
            lock_retry_delay: parsed::<u64>(&text, "LOCK_RETRY_DELAY_MS")
                .map(Duration::from_millis)
                .unwrap_or(defaults.lock_retry_delay),
        }
    }

    /// Returns the `"host:port"` bind address string.
    pub fn addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    pub fn lock_options(&self) -> LockOptions {
        LockOptions {
            ttl: self.lock_ttl,
            max_attempts: self.lock_max_attempts,
            retry_delay: self.lock_retry_delay,
        }
    }

    pub fn outbox_config(&self) -> OutboxConfig {
        OutboxConfig {
            interval: self.outbox_interval,
            batch_size: self.outbox_batch_size,
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        let lock = LockOptions::default();
        let outbox = OutboxConfig::default();
        Self {
            host: "0.0.0.0".to_string(),
            port: 3000,
            log_level: "info".to_string(),
            log_format: LogFormat::Text,
            database_url: None,
            redis_url: None,
            instance_id: None,
            outbox_enabled: true,
            outbox_interval: outbox.interval,
            outbox_batch_size: outbox.batch_size,
            lock_ttl: lock.ttl,
            lock_max_attempts: lock.max_attempts,
            lock_retry_delay: lock.retry_delay,
        }
    }
}

fn parsed<T: FromStr>(text: &impl Fn(&str) -> Option<String>, key: &str) -> Option<T> {
    text(key).and_then(|v| v.trim().parse().ok())
}
