// SPDX-FileCopyrightText: 2026 Parley Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Resolution of per-workspace [`AiSettings`] behind a versioned cache.

use std::sync::Arc;
use std::time::Duration;

use parley_core::{AiSettings, CounterStore, GLOBAL_SETTINGS_ID, ParleyError, SettingsStore};
use tracing::{debug, info};

use crate::cache::{PolicyVersion, VersionedCache};

fn version_key(workspace_id: &str) -> String {
    format!("settings_version:{workspace_id}")
}

pub struct SettingsResolver {
    store: Arc<dyn SettingsStore>,
    counters: Arc<dyn CounterStore>,
    cache: Arc<VersionedCache<String, Arc<AiSettings>>>,
    /// Used when neither the workspace nor the global record exists.
    defaults: AiSettings,
}

impl SettingsResolver {
    pub fn new(
        store: Arc<dyn SettingsStore>,
        counters: Arc<dyn CounterStore>,
        ttl: Duration,
        defaults: AiSettings,
    ) -> Self {
        Self {
            store,
            counters,
            cache: Arc::new(VersionedCache::new(ttl)),
            defaults,
        }
    }

    pub fn cache(&self) -> Arc<VersionedCache<String, Arc<AiSettings>>> {
        self.cache.clone()
    }

    /// Current policy version of a workspace and of the global record.
    pub async fn version(&self, workspace_id: &str) -> Result<PolicyVersion, ParleyError> {
        let workspace = self
            .counters
            .get(&version_key(workspace_id))
            .await?
            .unwrap_or(0);
        let global = self
            .counters
            .get(&version_key(GLOBAL_SETTINGS_ID))
            .await?
            .unwrap_or(0);
        Ok(PolicyVersion { workspace, global })
    }

    /// Settings for a workspace, falling back to the global record and then
    /// to compiled defaults.
    pub async fn resolve(
        &self,
        workspace_id: &str,
    ) -> Result<(Arc<AiSettings>, PolicyVersion), ParleyError> {
        let version = self.version(workspace_id).await?;
        let key = workspace_id.to_string();
        if let Some(hit) = self.cache.get(&key, version) {
            return Ok((hit, version));
        }

        let settings = match self.store.get_ai_settings(workspace_id).await? {
            Some(s) => s,
            None => match self.store.get_ai_settings(GLOBAL_SETTINGS_ID).await? {
                Some(mut global) => {
                    debug!(workspace_id, "using global AI settings");
                    global.workspace_id = workspace_id.to_string();
                    // BYOK is a property of the workspace, never inherited.
                    global.byok = false;
                    global
                }
                None => {
                    let mut defaults = self.defaults.clone();
                    defaults.workspace_id = workspace_id.to_string();
                    defaults
                }
            },
        };

        let settings = Arc::new(settings);
        self.cache.insert(key, settings.clone(), version);
        Ok((settings, version))
    }

    /// Persists new settings and bumps the policy version so every cached
    /// copy (here and in other processes) becomes a miss.
    pub async fn update(&self, settings: &AiSettings) -> Result<(), ParleyError> {
        self.store.put_ai_settings(settings).await?;
        self.invalidate(&settings.workspace_id).await
    }

    pub async fn invalidate(&self, workspace_id: &str) -> Result<(), ParleyError> {
        let version = self.counters.incr(&version_key(workspace_id)).await?;
        if workspace_id == GLOBAL_SETTINGS_ID {
            self.cache.invalidate_where(|_| true);
        } else {
            self.cache.invalidate_where(|k| k == workspace_id);
        }
        info!(workspace_id, version, "AI settings invalidated");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::counter::MemoryCounterStore;
    use async_trait::async_trait;
    use parley_core::ProviderKind;
    use std::collections::HashMap;
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[derive(Default)]
    struct CountingStore {
        records: Mutex<HashMap<String, AiSettings>>,
        reads: AtomicUsize,
    }

    #[async_trait]
    impl SettingsStore for CountingStore {
        async fn get_ai_settings(&self, id: &str) -> Result<Option<AiSettings>, ParleyError> {
            self.reads.fetch_add(1, Ordering::SeqCst);
            Ok(self.records.lock().unwrap().get(id).cloned())
        }

        async fn put_ai_settings(&self, settings: &AiSettings) -> Result<(), ParleyError> {
            self.records
                .lock()
                .unwrap()
                .insert(settings.workspace_id.clone(), settings.clone());
            Ok(())
        }
    }

    fn resolver(store: Arc<CountingStore>) -> SettingsResolver {
        SettingsResolver::new(
            store,
            Arc::new(MemoryCounterStore::new()),
            Duration::from_secs(300),
            AiSettings::new("defaults", ProviderKind::Groq),
        )
    }

    #[tokio::test]
    async fn caches_until_version_bump() {
        let store = Arc::new(CountingStore::default());
        store
            .put_ai_settings(&AiSettings::new("ws", ProviderKind::Gemini))
            .await
            .unwrap();
        let resolver = resolver(store.clone());

        let (first, _) = resolver.resolve("ws").await.unwrap();
        resolver.resolve("ws").await.unwrap();
        assert_eq!(first.customer_provider, ProviderKind::Gemini);
        assert_eq!(store.reads.load(Ordering::SeqCst), 1);

        resolver
            .update(&AiSettings::new("ws", ProviderKind::Openai))
            .await
            .unwrap();
        let (second, version) = resolver.resolve("ws").await.unwrap();
        assert_eq!(second.customer_provider, ProviderKind::Openai);
        assert_eq!(version.workspace, 1);
        assert_eq!(store.reads.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn falls_back_to_global_then_defaults() {
        let store = Arc::new(CountingStore::default());
        let resolver = resolver(store.clone());

        let (defaults, _) = resolver.resolve("ws").await.unwrap();
        assert_eq!(defaults.workspace_id, "ws");
        assert_eq!(defaults.customer_provider, ProviderKind::Groq);

        let mut global = AiSettings::new(GLOBAL_SETTINGS_ID, ProviderKind::Mistral);
        global.byok = true;
        resolver.update(&global).await.unwrap();

        let (inherited, version) = resolver.resolve("ws").await.unwrap();
        assert_eq!(inherited.customer_provider, ProviderKind::Mistral);
        assert!(!inherited.byok);
        assert_eq!(version.global, 1);
    }
}
