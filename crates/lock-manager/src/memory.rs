use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use common::AggregateId;
use tokio::time::Instant;

use crate::{LockError, LockManager, LockOptions, Result, acquire_with_retry};

#[derive(Default)]
struct Counters {
    lock_calls: AtomicUsize,
    unlock_calls: AtomicUsize,
    fail_next_unlock: AtomicBool,
}

/// In-memory lock manager for tests and single-process deployments.
///
/// Leases expire on the tokio clock, so paused-time tests can advance past
/// a TTL.
#[derive(Clone, Default)]
pub struct InMemoryLockManager {
    leases: Arc<Mutex<HashMap<AggregateId, Instant>>>,
    counters: Arc<Counters>,
}

impl InMemoryLockManager {
    /// Creates a lock manager with no leases held.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of `lock` calls made so far.
    pub fn lock_calls(&self) -> usize {
        self.counters.lock_calls.load(Ordering::SeqCst)
    }

    /// Number of `unlock` calls made so far.
    pub fn unlock_calls(&self) -> usize {
        self.counters.unlock_calls.load(Ordering::SeqCst)
    }

    /// Returns `true` if an unexpired lease exists for `id`.
    pub fn is_locked(&self, id: &AggregateId) -> bool {
        let leases = self.leases();
        leases
            .get(id)
            .is_some_and(|expires_at| *expires_at > Instant::now())
    }

    /// Makes the next `unlock` call fail without releasing the lease.
    pub fn fail_next_unlock(&self) {
        self.counters.fail_next_unlock.store(true, Ordering::SeqCst);
    }

    fn leases(&self) -> std::sync::MutexGuard<'_, HashMap<AggregateId, Instant>> {
        self.leases
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

#[async_trait]
impl LockManager for InMemoryLockManager {
    async fn try_lock(&self, id: &AggregateId, ttl: Duration) -> Result<bool> {
        let mut leases = self.leases();
        let now = Instant::now();

        match leases.get(id) {
            Some(expires_at) if *expires_at > now => Ok(false),
            _ => {
                leases.insert(id.clone(), now + ttl);
                Ok(true)
            }
        }
    }

    async fn unlock(&self, id: &AggregateId) -> Result<()> {
        self.counters.unlock_calls.fetch_add(1, Ordering::SeqCst);
        if self.counters.fail_next_unlock.swap(false, Ordering::SeqCst) {
            return Err(LockError::Injected("unlock"));
        }

        self.leases().remove(id);
        Ok(())
    }

    async fn lock(&self, id: &AggregateId, options: &LockOptions) -> Result<()> {
        self.counters.lock_calls.fetch_add(1, Ordering::SeqCst);
        acquire_with_retry(self, id, options).await
    }
}
