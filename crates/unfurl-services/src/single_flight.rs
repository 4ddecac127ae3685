//! Per-key mutual exclusion for resolution passes
//!
//! Callers resolving the same identity queue on one async mutex; callers for
//! different identities never wait on each other. A key's entry is dropped
//! when its last holder or waiter goes away.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};

type Entries = Arc<Mutex<HashMap<String, Arc<AsyncMutex<()>>>>>;

#[derive(Clone, Default)]
pub struct SingleFlight {
    entries: Entries,
}

/// Held for the duration of one pass
pub struct SingleFlightGuard {
    key: String,
    entries: Entries,
    mutex: Arc<AsyncMutex<()>>,
    _guard: OwnedMutexGuard<()>,
}

impl SingleFlight {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn lock(&self, key: &str) -> SingleFlightGuard {
        let mutex = {
            let mut entries = self.entries.lock().unwrap_or_else(|e| e.into_inner());
            entries
                .entry(key.to_string())
                .or_insert_with(|| Arc::new(AsyncMutex::new(())))
                .clone()
        };

        let guard = mutex.clone().lock_owned().await;

        SingleFlightGuard {
            key: key.to_string(),
            entries: self.entries.clone(),
            mutex,
            _guard: guard,
        }
    }

    /// Keys with a holder or waiter.
    pub fn active_keys(&self) -> usize {
        self.entries.lock().unwrap_or_else(|e| e.into_inner()).len()
    }
}

impl Drop for SingleFlightGuard {
    fn drop(&mut self) {
        let mut entries = self.entries.lock().unwrap_or_else(|e| e.into_inner());
        // map entry, this guard's handle and the owned lock guard
        let unused = entries
            .get(&self.key)
            .map(|m| Arc::ptr_eq(m, &self.mutex) && Arc::strong_count(m) <= 3)
            .unwrap_or(false);
        if unused {
            entries.remove(&self.key);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    #[tokio::test]
    async fn same_key_is_serialized() {
        let flights = SingleFlight::new();
        let inside = Arc::new(AtomicUsize::new(0));
        let max_inside = Arc::new(AtomicUsize::new(0));

        let mut handles = Vec::new();
        for _ in 0..8 {
            let flights = flights.clone();
            let inside = inside.clone();
            let max_inside = max_inside.clone();
            handles.push(tokio::spawn(async move {
                let _guard = flights.lock("abc").await;
                let now = inside.fetch_add(1, Ordering::SeqCst) + 1;
                max_inside.fetch_max(now, Ordering::SeqCst);
                tokio::time::sleep(Duration::from_millis(5)).await;
                inside.fetch_sub(1, Ordering::SeqCst);
            }));
        }
        for handle in handles {
            handle.await.unwrap();
        }

        assert_eq!(max_inside.load(Ordering::SeqCst), 1);
        assert_eq!(flights.active_keys(), 0);
    }

    #[tokio::test]
    async fn different_keys_do_not_block() {
        let flights = SingleFlight::new();
        let _a = flights.lock("a").await;
        let b = tokio::time::timeout(Duration::from_millis(200), flights.lock("b")).await;
        assert!(b.is_ok());
        assert_eq!(flights.active_keys(), 2);
    }

    #[tokio::test]
    async fn entry_survives_while_waiters_remain() {
        let flights = SingleFlight::new();
        let first = flights.lock("k").await;

        let waiter = {
            let flights = flights.clone();
            tokio::spawn(async move {
                let _guard = flights.lock("k").await;
            })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;

        drop(first);
        assert_eq!(flights.active_keys(), 1);
        waiter.await.unwrap();
        assert_eq!(flights.active_keys(), 0);
    }
}
