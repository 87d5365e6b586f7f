//! Per-aggregate mutual exclusion across process instances.
//!
//! A lock is a key with a time-to-live; it exists exactly while held.
//! Acquisition is retried a bounded number of times and then fails closed.

pub mod error;
pub mod memory;
pub mod redis;

use std::time::Duration;

use async_trait::async_trait;
use common::AggregateId;

pub use crate::redis::RedisLockManager;
pub use error::{LockError, Result};
pub use memory::InMemoryLockManager;

/// How a lease is acquired.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LockOptions {
    /// Lifetime of the lease; a crashed holder's lease expires after this.
    pub ttl: Duration,
    /// Total number of acquisition attempts.
    pub max_attempts: u32,
    /// Pause between attempts.
    pub retry_delay: Duration,
}

impl Default for LockOptions {
    fn default() -> Self {
        Self {
            ttl: Duration::from_secs(30),
            max_attempts: 3,
            retry_delay: Duration::from_millis(250),
        }
    }
}

/// Grants time-bounded leases keyed by aggregate id.
#[async_trait]
pub trait LockManager: Send + Sync {
    /// Makes a single acquisition attempt.
    ///
    /// Returns `false` when the lease is held by someone else.
    async fn try_lock(&self, id: &AggregateId, ttl: Duration) -> Result<bool>;

    /// Releases the lease unconditionally.
    ///
    /// There is no ownership check: a caller whose lease already expired
    /// can release a lease taken by a later holder.
    async fn unlock(&self, id: &AggregateId) -> Result<()>;

    /// Acquires the lease, retrying while it is held.
    async fn lock(&self, id: &AggregateId, options: &LockOptions) -> Result<()> {
        acquire_with_retry(self, id, options).await
    }
}

#[async_trait]
impl<T: LockManager + ?Sized> LockManager for std::sync::Arc<T> {
    async fn try_lock(&self, id: &AggregateId, ttl: Duration) -> Result<bool> {
        (**self).try_lock(id, ttl).await
    }

    async fn unlock(&self, id: &AggregateId) -> Result<()> {
        (**self).unlock(id).await
    }

    async fn lock(&self, id: &AggregateId, options: &LockOptions) -> Result<()> {
        (**self).lock(id, options).await
    }
}

/// Attempts acquisition up to `max_attempts` times, sleeping
/// `retry_delay` between attempts.
pub async fn acquire_with_retry<L: LockManager + ?Sized>(
    manager: &L,
    id: &AggregateId,
    options: &LockOptions,
) -> Result<()> {
    let mut attempt = 1;
    loop {
        if manager.try_lock(id, options.ttl).await? {
            metrics::counter!("lock_acquired_total").increment(1);
            tracing::debug!(aggregate_id = %id, attempt, "Lock acquired");
            return Ok(());
        }

        if attempt >= options.max_attempts {
            metrics::counter!("lock_contended_total").increment(1);
            tracing::warn!(aggregate_id = %id, attempts = attempt, "Lock still held, giving up");
            return Err(LockError::Contended {
                key: id.to_string(),
                attempts: attempt,
            });
        }

        tracing::debug!(aggregate_id = %id, attempt, "Lock held, retrying");
        tokio::time::sleep(options.retry_delay).await;
        attempt += 1;
    }
}
