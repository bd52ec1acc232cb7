//! Per-workspace exclusive locks

use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{Mutex, OwnedMutexGuard, RwLock};

/// Registry of one mutex per upload id.
///
/// Guards are owned, so they can be held across awaits and are released on
/// every exit path when dropped.
#[derive(Default)]
pub struct WorkspaceLocks {
    locks: RwLock<HashMap<u64, Arc<Mutex<()>>>>,
}

impl WorkspaceLocks {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn acquire(&self, upload_id: u64) -> OwnedMutexGuard<()> {
        let existing = self.locks.read().await.get(&upload_id).cloned();
        let lock = match existing {
            Some(lock) => lock,
            None => self
                .locks
                .write()
                .await
                .entry(upload_id)
                .or_default()
                .clone(),
        };
        lock.lock_owned().await
    }

    /// Drop the registry entry for `upload_id` when nothing holds or waits
    /// on it. Returns whether the entry was removed.
    pub async fn forget_if_idle(&self, upload_id: u64) -> bool {
        let mut locks = self.locks.write().await;
        let idle = locks
            .get(&upload_id)
            .is_some_and(|lock| Arc::strong_count(lock) == 1);
        if idle {
            locks.remove(&upload_id);
        }
        idle
    }

    pub async fn tracked(&self) -> usize {
        self.locks.read().await.len()
    }

    /// Whether an operation currently holds the lock for `upload_id`.
    pub async fn is_locked(&self, upload_id: u64) -> bool {
        self.locks
            .read()
            .await
            .get(&upload_id)
            .is_some_and(|lock| lock.try_lock().is_err())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn test_same_id_is_exclusive() {
        let locks = Arc::new(WorkspaceLocks::new());
        let guard = locks.acquire(1).await;
        assert!(locks.is_locked(1).await);

        let waiter = {
            let locks = locks.clone();
            tokio::spawn(async move {
                let _guard = locks.acquire(1).await;
            })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!waiter.is_finished());

        drop(guard);
        waiter.await.unwrap();
        assert!(!locks.is_locked(1).await);
    }

    #[tokio::test]
    async fn test_idle_entries_are_forgotten() {
        let locks = WorkspaceLocks::new();
        let guard = locks.acquire(3).await;
        assert!(!locks.forget_if_idle(3).await);
        assert_eq!(locks.tracked().await, 1);

        drop(guard);
        assert!(locks.forget_if_idle(3).await);
        assert_eq!(locks.tracked().await, 0);
        assert!(!locks.forget_if_idle(3).await);

        // a forgotten id can be locked again
        let _guard = locks.acquire(3).await;
        assert!(locks.is_locked(3).await);
    }

    #[tokio::test]
    async fn test_distinct_ids_are_independent() {
        let locks = WorkspaceLocks::new();
        let _first = locks.acquire(1).await;
        let _second = locks.acquire(2).await;
        assert!(locks.is_locked(1).await);
        assert!(locks.is_locked(2).await);
    }
}
