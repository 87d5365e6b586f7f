use std::time::Duration;

use async_trait::async_trait;
use common::AggregateId;
use redis::aio::MultiplexedConnection;

use crate::{LockManager, Result};

/// Default namespace for lock keys.
pub const DEFAULT_KEY_PREFIX: &str = "lock:";

/// Redis-backed lock manager.
///
/// Acquisition is a single `SET key 1 NX PX ttl`, so the existence check and
/// the write cannot interleave with another instance.
#[derive(Clone)]
pub struct RedisLockManager {
    client: redis::Client,
    key_prefix: String,
}

impl RedisLockManager {
    /// Creates a lock manager from an existing client.
    pub fn new(client: redis::Client) -> Self {
        Self {
            client,
            key_prefix: DEFAULT_KEY_PREFIX.to_string(),
        }
    }

    /// Opens a client for the given URL and verifies it answers `PING`.
    pub async fn connect(url: &str) -> Result<Self> {
        let client = redis::Client::open(url)?;
        let mut conn = client.get_multiplexed_async_connection().await?;
        let _: String = redis::cmd("PING").query_async(&mut conn).await?;

        tracing::info!("Redis lock manager connected");
        Ok(Self::new(client))
    }

    /// Overrides the key namespace.
    pub fn with_key_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.key_prefix = prefix.into();
        self
    }

    async fn get_conn(&self) -> Result<MultiplexedConnection> {
        Ok(self.client.get_multiplexed_async_connection().await?)
    }

    fn key(&self, id: &AggregateId) -> String {
        format!("{}{}", self.key_prefix, id)
    }

    /// `SET` with a millisecond expiry so sub-second leases keep their length.
    fn acquire_command(&self, id: &AggregateId, ttl: Duration) -> redis::Cmd {
        // Redis rejects PX 0.
        let ttl_ms = u64::try_from(ttl.as_millis()).unwrap_or(u64::MAX).max(1);
        let mut cmd = redis::cmd("SET");
        cmd.arg(self.key(id)).arg(1).arg("NX").arg("PX").arg(ttl_ms);
        cmd
    }
}

#[async_trait]
impl LockManager for RedisLockManager {
    async fn try_lock(&self, id: &AggregateId, ttl: Duration) -> Result<bool> {
        let mut conn = self.get_conn().await?;

        let reply: Option<String> = self
            .acquire_command(id, ttl)
            .query_async(&mut conn)
            .await?;

        Ok(reply.is_some())
    }

    async fn unlock(&self, id: &AggregateId) -> Result<()> {
        let mut conn = self.get_conn().await?;
        let deleted: i64 = redis::cmd("DEL")
            .arg(self.key(id))
            .query_async(&mut conn)
            .await?;

        if deleted == 0 {
            tracing::debug!(aggregate_id = %id, "Unlock found no lease");
        }
        Ok(())
    }
}
