use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};

use crate::graph::PairKey;

/// Per-pair async locks, so two workers never evaluate and write the same
/// unordered pair at once.
///
/// Entries are created on demand and dropped again when the last holder or
/// waiter releases them, so a full repair run does not leave one lock per
/// pair behind.
#[derive(Default)]
pub struct PairLocks {
    locks: Mutex<HashMap<PairKey, Arc<AsyncMutex<()>>>>,
}

/// Held lock for one pair. Released on drop.
pub struct PairGuard<'a> {
    registry: &'a PairLocks,
    key: PairKey,
    guard: Option<OwnedMutexGuard<()>>,
}

impl PairLocks {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn lock(&self, key: &PairKey) -> PairGuard<'_> {
        let lock = {
            let mut locks = self.locks.lock().unwrap_or_else(|e| e.into_inner());
            locks.entry(key.clone()).or_default().clone()
        };
        let guard = lock.lock_owned().await;
        PairGuard {
            registry: self,
            key: key.clone(),
            guard: Some(guard),
        }
    }

    /// Pairs currently locked or waited on.
    pub fn len(&self) -> usize {
        self.locks.lock().unwrap_or_else(|e| e.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Drop for PairGuard<'_> {
    fn drop(&mut self) {
        drop(self.guard.take());
        let mut locks = self.registry.locks.lock().unwrap_or_else(|e| e.into_inner());
        // Only the registry's own reference left: nobody holds or awaits it.
        if locks.get(&self.key).is_some_and(|l| Arc::strong_count(l) == 1) {
            locks.remove(&self.key);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    #[tokio::test]
    async fn test_same_pair_serialized() {
        let locks = Arc::new(PairLocks::new());
        let active = Arc::new(AtomicUsize::new(0));
        let max_seen = Arc::new(AtomicUsize::new(0));

        let mut handles = Vec::new();
        for i in 0..8 {
            let (locks, active, max_seen) = (locks.clone(), active.clone(), max_seen.clone());
            // Both orders map to the same key
            let key = if i % 2 == 0 { PairKey::new("a", "b") } else { PairKey::new("b", "a") };
            handles.push(tokio::spawn(async move {
                let _guard = locks.lock(&key).await;
                let now = active.fetch_add(1, Ordering::SeqCst) + 1;
                max_seen.fetch_max(now, Ordering::SeqCst);
                tokio::time::sleep(Duration::from_millis(5)).await;
                active.fetch_sub(1, Ordering::SeqCst);
            }));
        }
        for handle in handles {
            handle.await.unwrap();
        }

        assert_eq!(max_seen.load(Ordering::SeqCst), 1);
        assert!(locks.is_empty());
    }

    #[tokio::test]
    async fn test_distinct_pairs_do_not_block() {
        let locks = PairLocks::new();
        let _ab = locks.lock(&PairKey::new("a", "b")).await;
        let cd = tokio::time::timeout(Duration::from_millis(100), locks.lock(&PairKey::new("c", "d"))).await;
        assert!(cd.is_ok());
        assert_eq!(locks.len(), 2);
    }

    #[tokio::test]
    async fn test_entry_removed_after_release() {
        let locks = PairLocks::new();
        {
            let _guard = locks.lock(&PairKey::new("x", "y")).await;
            assert_eq!(locks.len(), 1);
        }
        assert!(locks.is_empty());
    }
}
