//! Distributed mutual exclusion for settlement attempts. Acquisition is an
//! atomic set-if-absent with a TTL. Holders release explicitly before
//! returning; dropping a guard also releases (on a spawned task) so a panic
//! unwinding through the processor still frees the lock. If the process
//! dies before release the entry self-expires after its TTL, so a future
//! retry is never permanently blocked.

use async_trait::async_trait;
use dashmap::DashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::error::Result;

#[async_trait]
pub trait LockStore: Send + Sync + 'static {
    /// Set the key only if absent, with a TTL. Returns whether this caller
    /// now holds the lock.
    async fn try_acquire(&self, key: &str, ttl: Duration) -> Result<bool>;

    /// Drop the key. Releasing a key that already expired is harmless.
    async fn release(&self, key: &str) -> Result<()>;
}

/// Scoped lock acquisition. Holds the key until dropped.
pub struct LockGuard {
    store: Arc<dyn LockStore>,
    key: String,
}

impl LockGuard {
    /// Acquire `key` on `store`, or `None` if another holder is in flight.
    pub async fn acquire(
        store: Arc<dyn LockStore>,
        key: &str,
        ttl: Duration,
    ) -> Result<Option<LockGuard>> {
        if store.try_acquire(key, ttl).await? {
            Ok(Some(LockGuard {
                store,
                key: key.to_string(),
            }))
        } else {
            Ok(None)
        }
    }

    /// Release the lock and wait for the release to land. The holder must
    /// use this on its normal exit paths: a retry arriving right after a
    /// failed attempt has to find the key free, not still queued for a
    /// spawned drop-release.
    pub async fn release(mut self) -> Result<()> {
        let key = std::mem::take(&mut self.key);
        self.store.release(&key).await
    }
}

impl Drop for LockGuard {
    fn drop(&mut self) {
        // Already released explicitly.
        if self.key.is_empty() {
            return;
        }

        let store = self.store.clone();
        let key = std::mem::take(&mut self.key);
        // Backstop for panics and forgotten guards. Release cannot await
        // inside drop; hand it to the runtime. The TTL covers the case
        // where the task never runs.
        tokio::spawn(async move {
            if let Err(err) = store.release(&key).await {
                tracing::warn!(%key, error = %err, "lock release failed; TTL will expire it");
            }
        });
    }
}

/// In-process [`LockStore`] over a concurrent map with lazy expiry.
#[derive(Default)]
pub struct MemoryLockStore {
    entries: DashMap<String, Instant>,
}

impl MemoryLockStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl LockStore for MemoryLockStore {
    async fn try_acquire(&self, key: &str, ttl: Duration) -> Result<bool> {
        let now = Instant::now();
        let mut acquired = false;

        // The entry API gives atomic check-and-set per key.
        self.entries
            .entry(key.to_string())
            .and_modify(|expires_at| {
                if *expires_at <= now {
                    *expires_at = now + ttl;
                    acquired = true;
                }
            })
            .or_insert_with(|| {
                acquired = true;
                now + ttl
            });

        Ok(acquired)
    }

    async fn release(&self, key: &str) -> Result<()> {
        self.entries.remove(key);
        Ok(())
    }
}
