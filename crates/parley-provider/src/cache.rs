// SPDX-FileCopyrightText: 2026 Parley Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Expiring cache whose entries are tagged with the workspace policy version.
//!
//! An entry is served only while it is younger than the TTL *and* its
//! version equals the version the reader observed in the counter store. A
//! settings write bumps the version, so stale entries turn into misses on the
//! next read regardless of how much TTL they have left.

use std::hash::Hash;
use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::debug;

/// Policy version of a workspace plus the version of the global fallback record.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub struct PolicyVersion {
    pub workspace: i64,
    pub global: i64,
}

struct Entry<V> {
    value: V,
    version: PolicyVersion,
    expires_at: Instant,
}

pub struct VersionedCache<K, V> {
    entries: DashMap<K, Entry<V>>,
    ttl: Duration,
}

impl<K, V> VersionedCache<K, V>
where
    K: Eq + Hash + Clone,
    V: Clone,
{
    pub fn new(ttl: Duration) -> Self {
        Self {
            entries: DashMap::new(),
            ttl,
        }
    }

    /// Returns the value only if it is unexpired and was stored under `current`.
    pub fn get(&self, key: &K, current: PolicyVersion) -> Option<V> {
        let now = Instant::now();
        let hit = self.entries.get(key).and_then(|entry| {
            (entry.version == current && entry.expires_at > now).then(|| entry.value.clone())
        });
        if hit.is_none() {
            // Drop stale entries eagerly so a version bump frees memory.
            self.entries
                .remove_if(key, |_, e| e.version != current || e.expires_at <= now);
        }
        hit
    }

    pub fn insert(&self, key: K, value: V, version: PolicyVersion) {
        self.entries.insert(
            key,
            Entry {
                value,
                version,
                expires_at: Instant::now() + self.ttl,
            },
        );
    }

    /// Drops every entry whose key matches.
    pub fn invalidate_where(&self, predicate: impl Fn(&K) -> bool) {
        self.entries.retain(|k, _| !predicate(k));
    }

    /// Removes expired entries and returns how many were dropped.
    pub fn sweep(&self) -> usize {
        let now = Instant::now();
        let before = self.entries.len();
        self.entries.retain(|_, e| e.expires_at > now);
        before.saturating_sub(self.entries.len())
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Something with expiring entries that a background task should sweep.
pub trait Sweep: Send + Sync {
    fn sweep(&self) -> usize;
}

impl<K, V> Sweep for VersionedCache<K, V>
where
    K: Eq + Hash + Clone + Send + Sync,
    V: Clone + Send + Sync,
{
    fn sweep(&self) -> usize {
        VersionedCache::sweep(self)
    }
}

/// Sweeps `target` every `interval` until `cancel` fires.
pub fn spawn_sweeper(
    target: Arc<dyn Sweep>,
    interval: Duration,
    cancel: CancellationToken,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = ticker.tick() => {
                    let removed = target.sweep();
                    if removed > 0 {
                        debug!(removed, "swept expired cache entries");
                    }
                }
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn v(workspace: i64) -> PolicyVersion {
        PolicyVersion {
            workspace,
            global: 0,
        }
    }

    #[test]
    fn hit_requires_matching_version() {
        let cache: VersionedCache<String, u32> = VersionedCache::new(Duration::from_secs(60));
        cache.insert("ws".into(), 7, v(1));
        assert_eq!(cache.get(&"ws".into(), v(1)), Some(7));
        // a bumped version is a miss and evicts the entry
        assert_eq!(cache.get(&"ws".into(), v(2)), None);
        assert!(cache.is_empty());
    }

    #[test]
    fn global_version_bump_is_a_miss() {
        let cache: VersionedCache<String, u32> = VersionedCache::new(Duration::from_secs(60));
        cache.insert("ws".into(), 7, v(1));
        let bumped = PolicyVersion {
            workspace: 1,
            global: 1,
        };
        assert_eq!(cache.get(&"ws".into(), bumped), None);
    }

    #[test]
    fn expired_entries_miss_and_sweep() {
        let cache: VersionedCache<String, u32> = VersionedCache::new(Duration::ZERO);
        cache.insert("a".into(), 1, v(0));
        cache.insert("b".into(), 2, v(0));
        assert_eq!(cache.get(&"a".into(), v(0)), None);
        assert_eq!(cache.sweep(), 1);
        assert!(cache.is_empty());
    }

    #[test]
    fn invalidate_where_drops_matching_keys() {
        let cache: VersionedCache<(String, u8), u32> =
            VersionedCache::new(Duration::from_secs(60));
        cache.insert(("ws1".into(), 0), 1, v(0));
        cache.insert(("ws1".into(), 1), 2, v(0));
        cache.insert(("ws2".into(), 0), 3, v(0));
        cache.invalidate_where(|(ws, _)| ws == "ws1");
        assert_eq!(cache.len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn sweeper_stops_on_cancel() {
        let cache: Arc<VersionedCache<String, u32>> =
            Arc::new(VersionedCache::new(Duration::from_secs(1)));
        cache.insert("a".into(), 1, v(0));
        let cancel = CancellationToken::new();
        let handle = spawn_sweeper(cache.clone(), Duration::from_secs(5), cancel.clone());

        tokio::time::sleep(Duration::from_secs(6)).await;
        assert!(cache.is_empty());

        cancel.cancel();
        handle.await.unwrap();
    }
}
