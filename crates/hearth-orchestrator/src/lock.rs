//! Per-key mutual exclusion.
//!
//! Every lifecycle operation on a game server holds that server's lock for
//! its whole duration, so two calls for the same ID never interleave inside
//! one process. Operations on different IDs run concurrently.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::{Mutex, OwnedMutexGuard};

/// Held for the duration of one operation; releases on drop.
pub type KeyGuard = OwnedMutexGuard<()>;

#[derive(Default)]
pub struct KeyedLocks {
    locks: Mutex<HashMap<String, Arc<Mutex<()>>>>,
}

impl KeyedLocks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Wait for and take the lock for `key`.
    pub async fn lock(&self, key: &str) -> KeyGuard {
        let lock = {
            let mut locks = self.locks.lock().await;
            // Drop entries nobody holds or waits on.
            locks.retain(|k, l| k == key || Arc::strong_count(l) > 1);
            locks.entry(key.to_string()).or_default().clone()
        };
        lock.lock_owned().await
    }

    /// Number of keys currently tracked.
    #[cfg(test)]
    async fn len(&self) -> usize {
        self.locks.lock().await.len()
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;

    #[tokio::test]
    async fn same_key_is_serialized() {
        let locks = Arc::new(KeyedLocks::new());
        let guard = locks.lock("gs-1").await;

        let l = locks.clone();
        let waiter = tokio::spawn(async move {
            let _g = l.lock("gs-1").await;
        });
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!waiter.is_finished());

        drop(guard);
        waiter.await.unwrap();
    }

    #[tokio::test]
    async fn different_keys_do_not_block() {
        let locks = KeyedLocks::new();
        let _a = locks.lock("gs-1").await;
        let b = tokio::time::timeout(Duration::from_millis(50), locks.lock("gs-2")).await;
        assert!(b.is_ok());
    }

    #[tokio::test]
    async fn released_keys_are_pruned() {
        let locks = KeyedLocks::new();
        drop(locks.lock("gs-1").await);
        drop(locks.lock("gs-2").await);
        let _c = locks.lock("gs-3").await;
        assert_eq!(locks.len().await, 1);
    }
}
