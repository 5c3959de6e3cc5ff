// SPDX-FileCopyrightText: 2026 Parley Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Counter store implementations: a process-local one and a wrapper that
//! degrades to it when the shared store is unreachable.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use dashmap::DashMap;
use parley_core::{CounterStore, ParleyError};
use tokio::time::Instant;
use tracing::{info, warn};

#[derive(Debug, Clone, Copy)]
struct Counter {
    value: i64,
    expires_at: Option<Instant>,
}

impl Counter {
    fn is_live(&self, now: Instant) -> bool {
        self.expires_at.is_none_or(|at| at > now)
    }
}

/// Single-process counter store. Increments are atomic per key.
#[derive(Debug, Default)]
pub struct MemoryCounterStore {
    counters: DashMap<String, Counter>,
}

impl MemoryCounterStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn bump(&self, key: &str, ttl: Option<Duration>) -> i64 {
        let now = Instant::now();
        let mut entry = self.counters.entry(key.to_string()).or_insert(Counter {
            value: 0,
            expires_at: ttl.map(|t| now + t),
        });
        if !entry.is_live(now) {
            *entry = Counter {
                value: 0,
                expires_at: ttl.map(|t| now + t),
            };
        }
        entry.value += 1;
        entry.value
    }
}

#[async_trait]
impl CounterStore for MemoryCounterStore {
    async fn incr_with_ttl(&self, key: &str, ttl: Duration) -> Result<i64, ParleyError> {
        Ok(self.bump(key, Some(ttl)))
    }

    async fn incr(&self, key: &str) -> Result<i64, ParleyError> {
        Ok(self.bump(key, None))
    }

    async fn get(&self, key: &str) -> Result<Option<i64>, ParleyError> {
        let now = Instant::now();
        Ok(self
            .counters
            .get(key)
            .filter(|c| c.is_live(now))
            .map(|c| c.value))
    }

    async fn set(&self, key: &str, value: i64, ttl: Option<Duration>) -> Result<(), ParleyError> {
        self.counters.insert(
            key.to_string(),
            Counter {
                value,
                expires_at: ttl.map(|t| Instant::now() + t),
            },
        );
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<(), ParleyError> {
        self.counters.remove(key);
        Ok(())
    }
}

/// Uses the shared store while it answers and a local store while it does not.
///
/// Limits keep being enforced per process during an outage instead of
/// failing open or closed.
pub struct FallbackCounterStore {
    shared: Arc<dyn CounterStore>,
    local: MemoryCounterStore,
    degraded: AtomicBool,
}

impl FallbackCounterStore {
    pub fn new(shared: Arc<dyn CounterStore>) -> Self {
        Self {
            shared,
            local: MemoryCounterStore::new(),
            degraded: AtomicBool::new(false),
        }
    }

    pub fn is_degraded(&self) -> bool {
        self.degraded.load(Ordering::Relaxed)
    }

    fn on_error(&self, op: &'static str, err: &ParleyError) {
        if !self.degraded.swap(true, Ordering::Relaxed) {
            warn!(op, error = %err, "shared counter store unavailable, using in-process counters");
        }
    }

    fn on_success(&self) {
        if self.degraded.swap(false, Ordering::Relaxed) {
            info!("shared counter store recovered");
        }
    }
}

#[async_trait]
impl CounterStore for FallbackCounterStore {
    async fn incr_with_ttl(&self, key: &str, ttl: Duration) -> Result<i64, ParleyError> {
        match self.shared.incr_with_ttl(key, ttl).await {
            Ok(v) => {
                self.on_success();
                Ok(v)
            }
            Err(e) => {
                self.on_error("incr_with_ttl", &e);
                self.local.incr_with_ttl(key, ttl).await
            }
        }
    }

    async fn incr(&self, key: &str) -> Result<i64, ParleyError> {
        match self.shared.incr(key).await {
            Ok(v) => {
                self.on_success();
                Ok(v)
            }
            Err(e) => {
                self.on_error("incr", &e);
                self.local.incr(key).await
            }
        }
    }

    async fn get(&self, key: &str) -> Result<Option<i64>, ParleyError> {
        match self.shared.get(key).await {
            Ok(v) => {
                self.on_success();
                Ok(v)
            }
            Err(e) => {
                self.on_error("get", &e);
                self.local.get(key).await
            }
        }
    }

    async fn set(&self, key: &str, value: i64, ttl: Option<Duration>) -> Result<(), ParleyError> {
        // keep the local copy warm so a later outage starts from a sane value
        self.local.set(key, value, ttl).await?;
        match self.shared.set(key, value, ttl).await {
            Ok(()) => {
                self.on_success();
                Ok(())
            }
            Err(e) => {
                self.on_error("set", &e);
                Ok(())
            }
        }
    }

    async fn delete(&self, key: &str) -> Result<(), ParleyError> {
        self.local.delete(key).await?;
        match self.shared.delete(key).await {
            Ok(()) => {
                self.on_success();
                Ok(())
            }
            Err(e) => {
                self.on_error("delete", &e);
                Ok(())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct BrokenStore;

    #[async_trait]
    impl CounterStore for BrokenStore {
        async fn incr_with_ttl(&self, _: &str, _: Duration) -> Result<i64, ParleyError> {
            Err(ParleyError::storage(std::io::Error::other("down")))
        }
        async fn incr(&self, _: &str) -> Result<i64, ParleyError> {
            Err(ParleyError::storage(std::io::Error::other("down")))
        }
        async fn get(&self, _: &str) -> Result<Option<i64>, ParleyError> {
            Err(ParleyError::storage(std::io::Error::other("down")))
        }
        async fn set(&self, _: &str, _: i64, _: Option<Duration>) -> Result<(), ParleyError> {
            Err(ParleyError::storage(std::io::Error::other("down")))
        }
        async fn delete(&self, _: &str) -> Result<(), ParleyError> {
            Err(ParleyError::storage(std::io::Error::other("down")))
        }
    }

    #[tokio::test]
    async fn memory_counter_increments_atomically() {
        let store = Arc::new(MemoryCounterStore::new());
        let mut handles = Vec::new();
        for _ in 0..50 {
            let store = store.clone();
            handles.push(tokio::spawn(async move {
                store
                    .incr_with_ttl("k", Duration::from_secs(60))
                    .await
                    .unwrap()
            }));
        }
        for h in handles {
            h.await.unwrap();
        }
        assert_eq!(store.get("k").await.unwrap(), Some(50));
    }

    #[tokio::test(start_paused = true)]
    async fn memory_counter_resets_after_ttl() {
        let store = MemoryCounterStore::new();
        store.incr_with_ttl("k", Duration::from_secs(1)).await.unwrap();
        store.incr_with_ttl("k", Duration::from_secs(1)).await.unwrap();
        tokio::time::advance(Duration::from_secs(2)).await;
        assert_eq!(store.get("k").await.unwrap(), None);
        assert_eq!(
            store.incr_with_ttl("k", Duration::from_secs(1)).await.unwrap(),
            1
        );
    }

    #[tokio::test]
    async fn fallback_keeps_counting_when_shared_store_fails() {
        let store = FallbackCounterStore::new(Arc::new(BrokenStore));
        assert_eq!(
            store.incr_with_ttl("k", Duration::from_secs(60)).await.unwrap(),
            1
        );
        assert_eq!(
            store.incr_with_ttl("k", Duration::from_secs(60)).await.unwrap(),
            2
        );
        assert!(store.is_degraded());
        assert_eq!(store.get("k").await.unwrap(), Some(2));
    }

    #[tokio::test]
    #[tracing_test::traced_test]
    async fn outage_is_logged_once() {
        let store = FallbackCounterStore::new(Arc::new(BrokenStore));
        for _ in 0..3 {
            store.incr("k").await.unwrap();
        }
        logs_assert(|lines: &[&str]| {
            match lines
                .iter()
                .filter(|l| l.contains("shared counter store unavailable"))
                .count()
            {
                1 => Ok(()),
                n => Err(format!("expected one warning, saw {n}")),
            }
        });
    }

    #[tokio::test]
    async fn fallback_prefers_shared_store() {
        let shared = Arc::new(MemoryCounterStore::new());
        let store = FallbackCounterStore::new(shared.clone());
        store.incr("v").await.unwrap();
        assert_eq!(shared.get("v").await.unwrap(), Some(1));
        assert!(!store.is_degraded());
    }
}
