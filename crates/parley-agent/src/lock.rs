// SPDX-FileCopyrightText: 2026 Parley Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Per-customer serialization of interaction processing.

use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use parley_core::ParleyError;
use tokio::sync::{Mutex, OwnedMutexGuard};

/// A map of async mutexes keyed by customer id. Entries are dropped once
/// nobody holds or waits on them.
#[derive(Default)]
pub struct KeyedLock {
    locks: Arc<DashMap<String, Arc<Mutex<()>>>>,
}

/// Held while a customer's interaction is being processed.
pub struct KeyedGuard {
    key: String,
    locks: Arc<DashMap<String, Arc<Mutex<()>>>>,
    guard: Option<OwnedMutexGuard<()>>,
}

impl KeyedLock {
    pub fn new() -> Self {
        Self::default()
    }

    /// Waits up to `timeout` for exclusive access to `key`.
    pub async fn acquire(&self, key: &str, timeout: Duration) -> Result<KeyedGuard, ParleyError> {
        let mutex = self
            .locks
            .entry(key.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone();
        let acquired = tokio::time::timeout(timeout, mutex.lock_owned()).await;
        match acquired {
            Ok(guard) => Ok(KeyedGuard {
                key: key.to_string(),
                locks: self.locks.clone(),
                guard: Some(guard),
            }),
            Err(_) => {
                // The mutex Arc above is already dropped by the failed future.
                self.locks
                    .remove_if(key, |_, m| Arc::strong_count(m) == 1);
                Err(ParleyError::Timeout { duration: timeout })
            }
        }
    }

    /// Number of keys currently held or awaited.
    pub fn len(&self) -> usize {
        self.locks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.locks.is_empty()
    }
}

impl Drop for KeyedGuard {
    fn drop(&mut self) {
        self.guard.take();
        self.locks
            .remove_if(&self.key, |_, m| Arc::strong_count(m) == 1);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[tokio::test]
    async fn same_key_is_serialized() {
        let lock = Arc::new(KeyedLock::new());
        let active = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));

        let mut handles = Vec::new();
        for _ in 0..8 {
            let (lock, active, peak) = (lock.clone(), active.clone(), peak.clone());
            handles.push(tokio::spawn(async move {
                let _g = lock.acquire("c1", Duration::from_secs(5)).await.unwrap();
                let now = active.fetch_add(1, Ordering::SeqCst) + 1;
                peak.fetch_max(now, Ordering::SeqCst);
                tokio::time::sleep(Duration::from_millis(5)).await;
                active.fetch_sub(1, Ordering::SeqCst);
            }));
        }
        for h in handles {
            h.await.unwrap();
        }
        assert_eq!(peak.load(Ordering::SeqCst), 1);
        assert!(lock.is_empty());
    }

    #[tokio::test]
    async fn different_keys_do_not_block() {
        let lock = KeyedLock::new();
        let _a = lock.acquire("a", Duration::from_millis(50)).await.unwrap();
        let _b = lock.acquire("b", Duration::from_millis(50)).await.unwrap();
        assert_eq!(lock.len(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn acquire_times_out() {
        let lock = KeyedLock::new();
        let _held = lock.acquire("c1", Duration::from_secs(1)).await.unwrap();
        let err = lock
            .acquire("c1", Duration::from_secs(1))
            .await
            .err()
            .unwrap();
        assert!(matches!(err, ParleyError::Timeout { .. }));
        assert_eq!(lock.len(), 1);
    }
}
