// SPDX-FileCopyrightText: 2026 Parley Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! The provider runtime: the single [`LanguageModel`] the orchestration
//! components talk to.
//!
//! Per call: resolve the workspace policy (versioned cache), enforce access
//! control and the LLM rate limit, then walk the fallback chain with bounded
//! retry per member. Provider handles are cached per (workspace, role) under
//! the same policy version as the settings they were built from.

use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use parley_config::ParleyConfig;
use parley_config::model::ProvidersConfig;
use parley_core::{
    AiSettings, BotRole, CallContext, ChatProvider, ChatRequest, ChatResponse, CounterStore,
    LanguageModel, ParleyError, ProviderFactory, SettingsStore, TokenUsage, UsageStore,
    WorkspaceStore,
};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::access::AccessGuard;
use crate::cache::{PolicyVersion, VersionedCache, spawn_sweeper};
use crate::chain::{ChainMember, build_chain, embedding_member};
use crate::counter::FallbackCounterStore;
use crate::rate_limit::{RateLimiter, RateScope};
use crate::retry::with_retry;
use crate::settings::SettingsResolver;
use crate::usage::UsageLogger;

type Chain = Arc<Vec<Arc<dyn ChatProvider>>>;
type CacheKey = (String, BotRole);

/// Persistence collaborators of the runtime.
pub struct RuntimeStores {
    pub settings: Arc<dyn SettingsStore>,
    pub workspaces: Arc<dyn WorkspaceStore>,
    pub usage: Arc<dyn UsageStore>,
    /// Shared counter store. Wrapped so an outage degrades to local counters.
    pub counters: Arc<dyn CounterStore>,
}

pub struct ProviderRuntime {
    settings: SettingsResolver,
    access: AccessGuard,
    limiter: RateLimiter,
    usage: UsageLogger,
    counters: Arc<dyn CounterStore>,
    factory: Arc<dyn ProviderFactory>,
    globals: ProvidersConfig,
    chains: Arc<VersionedCache<CacheKey, Chain>>,
    embedders: Arc<VersionedCache<CacheKey, Arc<dyn ChatProvider>>>,
    dimensions: usize,
    sweep_interval: Duration,
}

impl ProviderRuntime {
    pub fn new(
        config: &ParleyConfig,
        stores: RuntimeStores,
        factory: Arc<dyn ProviderFactory>,
    ) -> Self {
        let counters: Arc<dyn CounterStore> =
            Arc::new(FallbackCounterStore::new(stores.counters));
        let ttl = Duration::from_secs(config.cache.settings_ttl_secs);

        let mut defaults = AiSettings::new("defaults", config.providers.default_provider);
        defaults.rate_limits = config.limits.as_rate_limits();

        Self {
            settings: SettingsResolver::new(stores.settings, counters.clone(), ttl, defaults),
            access: AccessGuard::new(
                stores.workspaces,
                stores.usage.clone(),
                counters.clone(),
                Duration::from_secs(config.limits.usage_cache_secs),
            ),
            limiter: RateLimiter::new(counters.clone()),
            usage: UsageLogger::new(stores.usage),
            counters,
            factory,
            globals: config.providers.clone(),
            chains: Arc::new(VersionedCache::new(ttl)),
            embedders: Arc::new(VersionedCache::new(ttl)),
            dimensions: config.embedding.dimensions,
            sweep_interval: Duration::from_secs(config.cache.sweep_interval_secs),
        }
    }

    /// Counter store (with local fallback) shared with the processor's limits.
    pub fn counters(&self) -> Arc<dyn CounterStore> {
        self.counters.clone()
    }

    pub fn limiter(&self) -> RateLimiter {
        self.limiter.clone()
    }

    pub async fn settings_for(&self, workspace_id: &str) -> Result<Arc<AiSettings>, ParleyError> {
        Ok(self.settings.resolve(workspace_id).await?.0)
    }

    /// Stores new settings and invalidates every cache built from the old ones.
    pub async fn update_settings(&self, settings: &AiSettings) -> Result<(), ParleyError> {
        self.settings.update(settings).await?;
        self.drop_handles(&settings.workspace_id);
        Ok(())
    }

    pub async fn invalidate(&self, workspace_id: &str) -> Result<(), ParleyError> {
        self.settings.invalidate(workspace_id).await?;
        self.drop_handles(workspace_id);
        Ok(())
    }

    fn drop_handles(&self, workspace_id: &str) {
        if workspace_id == parley_core::GLOBAL_SETTINGS_ID {
            self.chains.invalidate_where(|_| true);
            self.embedders.invalidate_where(|_| true);
        } else {
            self.chains.invalidate_where(|(ws, _)| ws == workspace_id);
            self.embedders.invalidate_where(|(ws, _)| ws == workspace_id);
        }
    }

    /// Starts the periodic sweep of all runtime caches.
    pub fn spawn_maintenance(&self, cancel: CancellationToken) -> Vec<JoinHandle<()>> {
        vec![
            spawn_sweeper(self.settings.cache(), self.sweep_interval, cancel.clone()),
            spawn_sweeper(self.chains.clone(), self.sweep_interval, cancel.clone()),
            spawn_sweeper(self.embedders.clone(), self.sweep_interval, cancel),
        ]
    }

    /// Resolves settings and runs every pre-flight check.
    async fn preflight(
        &self,
        ctx: &CallContext,
    ) -> Result<(Arc<AiSettings>, PolicyVersion), ParleyError> {
        let (settings, version) = self.settings.resolve(&ctx.workspace_id).await?;
        self.access.check(&ctx.workspace_id, &settings).await?;
        self.limiter
            .check(
                RateScope::Llm {
                    workspace_id: &ctx.workspace_id,
                },
                settings.rate_limits.llm_calls_per_minute,
            )
            .await?;
        Ok((settings, version))
    }

    fn build(&self, member: &ChainMember) -> Option<Arc<dyn ChatProvider>> {
        match self.factory.build(member.kind, &member.credentials) {
            Ok(provider) => Some(provider),
            Err(e) => {
                warn!(provider = %member.kind, error = %e, "failed to build provider");
                None
            }
        }
    }

    fn chain_for(&self, ctx: &CallContext, settings: &AiSettings, version: PolicyVersion) -> Chain {
        let key = (ctx.workspace_id.clone(), ctx.role);
        if let Some(chain) = self.chains.get(&key, version) {
            return chain;
        }
        let chain: Chain = Arc::new(
            build_chain(settings, &self.globals, ctx.role)
                .iter()
                .filter_map(|m| self.build(m))
                .collect(),
        );
        debug!(
            workspace_id = %ctx.workspace_id,
            role = %ctx.role,
            providers = ?chain.iter().map(|p| p.kind()).collect::<Vec<_>>(),
            "built provider chain"
        );
        self.chains.insert(key, chain.clone(), version);
        chain
    }

    fn embedder_for(
        &self,
        ctx: &CallContext,
        settings: &AiSettings,
        version: PolicyVersion,
    ) -> Result<Arc<dyn ChatProvider>, ParleyError> {
        let key = (ctx.workspace_id.clone(), ctx.role);
        if let Some(embedder) = self.embedders.get(&key, version) {
            return Ok(embedder);
        }
        let member = embedding_member(settings, &self.globals, ctx.role).ok_or_else(|| {
            ParleyError::Config(format!(
                "no embedding-capable provider configured for workspace {}",
                ctx.workspace_id
            ))
        })?;
        let embedder = self.factory.build(member.kind, &member.credentials)?;
        self.embedders.insert(key, embedder.clone(), version);
        Ok(embedder)
    }
}

#[async_trait]
impl LanguageModel for ProviderRuntime {
    async fn chat(
        &self,
        ctx: &CallContext,
        mut request: ChatRequest,
    ) -> Result<ChatResponse, ParleyError> {
        let (settings, version) = self.preflight(ctx).await?;
        let chain = self.chain_for(ctx, &settings, version);
        if chain.is_empty() {
            return Err(ParleyError::Config(format!(
                "no provider with credentials for workspace {}",
                ctx.workspace_id
            )));
        }

        request.temperature.get_or_insert(settings.temperature);
        request.max_tokens.get_or_insert(settings.max_tokens);

        let mut last_error = None;
        for (position, provider) in chain.iter().enumerate() {
            let label = provider.kind().to_string();
            let started = Instant::now();
            match with_retry(&settings.retry, &label, || provider.chat(request.clone())).await {
                Ok(response) => {
                    let model = if response.model.is_empty() {
                        provider.model().to_string()
                    } else {
                        response.model.clone()
                    };
                    self.usage
                        .record(
                            ctx,
                            provider.kind(),
                            &model,
                            response.usage,
                            started.elapsed(),
                            position > 0,
                        )
                        .await;
                    return Ok(response);
                }
                Err(e) => {
                    warn!(
                        workspace_id = %ctx.workspace_id,
                        provider = %label,
                        position,
                        error = %e,
                        "provider chain member failed"
                    );
                    last_error = Some(e);
                }
            }
        }

        Err(last_error.unwrap_or_else(|| ParleyError::Internal("empty provider chain".into())))
    }

    async fn embed(&self, ctx: &CallContext, text: &str) -> Result<Vec<f32>, ParleyError> {
        let (settings, version) = self.preflight(ctx).await?;
        let embedder = self.embedder_for(ctx, &settings, version)?;
        let label = embedder.kind().to_string();

        let started = Instant::now();
        let vector = with_retry(&settings.retry, &label, || embedder.embed(text)).await?;
        if vector.len() != self.dimensions {
            return Err(ParleyError::EmbeddingDimension {
                expected: self.dimensions,
                actual: vector.len(),
            });
        }

        self.usage
            .record(
                ctx,
                embedder.kind(),
                embedder.model(),
                TokenUsage::default(),
                started.elapsed(),
                false,
            )
            .await;
        Ok(vector)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::counter::MemoryCounterStore;
    use chrono::{DateTime, Utc};
    use parley_core::{
        Backoff, ChatMessage, DenialReason, ProviderCredentials, ProviderKind, RetryPolicy,
        UsageRecord, Workspace,
    };
    use std::collections::HashMap;
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicU32, Ordering};

    struct ScriptedProvider {
        kind: ProviderKind,
        fail: bool,
        dims: usize,
        calls: AtomicU32,
    }

    #[async_trait]
    impl ChatProvider for ScriptedProvider {
        fn kind(&self) -> ProviderKind {
            self.kind
        }

        fn model(&self) -> &str {
            "scripted"
        }

        async fn chat(&self, _: ChatRequest) -> Result<ChatResponse, ParleyError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self.fail {
                return Err(ParleyError::provider(self.kind.to_string(), "unavailable"));
            }
            Ok(ChatResponse {
                content: format!("from {}", self.kind),
                usage: TokenUsage {
                    input_tokens: 10,
                    output_tokens: 5,
                },
                tool_calls: vec![],
                model: String::new(),
            })
        }

        fn supports_embedding(&self) -> bool {
            self.kind.supports_embedding()
        }

        async fn embed(&self, _: &str) -> Result<Vec<f32>, ParleyError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(vec![0.1; self.dims])
        }
    }

    #[derive(Default)]
    struct Factory {
        providers: Mutex<HashMap<ProviderKind, Arc<ScriptedProvider>>>,
        builds: AtomicU32,
    }

    impl Factory {
        fn add(&self, kind: ProviderKind, fail: bool, dims: usize) -> Arc<ScriptedProvider> {
            let p = Arc::new(ScriptedProvider {
                kind,
                fail,
                dims,
                calls: AtomicU32::new(0),
            });
            self.providers.lock().unwrap().insert(kind, p.clone());
            p
        }
    }

    impl ProviderFactory for Factory {
        fn build(
            &self,
            kind: ProviderKind,
            _: &ProviderCredentials,
        ) -> Result<Arc<dyn ChatProvider>, ParleyError> {
            self.builds.fetch_add(1, Ordering::SeqCst);
            self.providers
                .lock()
                .unwrap()
                .get(&kind)
                .cloned()
                .map(|p| p as Arc<dyn ChatProvider>)
                .ok_or_else(|| ParleyError::provider(kind.to_string(), "not scripted"))
        }
    }

    #[derive(Default)]
    struct Stores {
        settings: Mutex<HashMap<String, AiSettings>>,
        workspace: Mutex<Option<Workspace>>,
        usage: Mutex<Vec<UsageRecord>>,
    }

    #[async_trait]
    impl SettingsStore for Stores {
        async fn get_ai_settings(&self, id: &str) -> Result<Option<AiSettings>, ParleyError> {
            Ok(self.settings.lock().unwrap().get(id).cloned())
        }
        async fn put_ai_settings(&self, s: &AiSettings) -> Result<(), ParleyError> {
            self.settings
                .lock()
                .unwrap()
                .insert(s.workspace_id.clone(), s.clone());
            Ok(())
        }
    }

    #[async_trait]
    impl WorkspaceStore for Stores {
        async fn get_workspace(&self, _: &str) -> Result<Option<Workspace>, ParleyError> {
            Ok(self.workspace.lock().unwrap().clone())
        }
        async fn upsert_workspace(&self, w: &Workspace) -> Result<(), ParleyError> {
            *self.workspace.lock().unwrap() = Some(w.clone());
            Ok(())
        }
    }

    #[async_trait]
    impl UsageStore for Stores {
        async fn record_usage(&self, r: &UsageRecord) -> Result<(), ParleyError> {
            self.usage.lock().unwrap().push(r.clone());
            Ok(())
        }
        async fn month_to_date_tokens(&self, _: &str, _: DateTime<Utc>) -> Result<u64, ParleyError> {
            Ok(0)
        }
    }

    fn keyed(settings: &mut AiSettings, kinds: &[ProviderKind]) {
        for kind in kinds {
            settings.credentials.insert(
                *kind,
                ProviderCredentials {
                    api_key: Some("k".into()),
                    ..Default::default()
                },
            );
        }
    }

    fn setup(settings: AiSettings) -> (ProviderRuntime, Arc<Factory>, Arc<Stores>) {
        let stores = Arc::new(Stores::default());
        stores
            .settings
            .lock()
            .unwrap()
            .insert("ws".into(), settings);
        *stores.workspace.lock().unwrap() = Some(Workspace::new("ws", "Shop"));
        let factory = Arc::new(Factory::default());
        let mut config = ParleyConfig::default();
        config.embedding.dimensions = 4;
        let runtime = ProviderRuntime::new(
            &config,
            RuntimeStores {
                settings: stores.clone(),
                workspaces: stores.clone(),
                usage: stores.clone(),
                counters: Arc::new(MemoryCounterStore::new()),
            },
            factory.clone(),
        );
        (runtime, factory, stores)
    }

    fn byok_settings(primary: ProviderKind, kinds: &[ProviderKind]) -> AiSettings {
        let mut settings = AiSettings::new("ws", primary);
        settings.byok = true;
        settings.retry = RetryPolicy {
            attempts: 3,
            backoff: Backoff::Fixed { delay_ms: 0 },
        };
        keyed(&mut settings, kinds);
        settings
    }

    fn request() -> ChatRequest {
        ChatRequest::new(vec![ChatMessage::user("hi")])
    }

    #[tokio::test]
    async fn falls_back_after_retries_and_logs_usage() {
        let settings = byok_settings(
            ProviderKind::Openai,
            &[ProviderKind::Openai, ProviderKind::Groq],
        );
        let (runtime, factory, stores) = setup(settings);
        let primary = factory.add(ProviderKind::Openai, true, 4);
        let backup = factory.add(ProviderKind::Groq, false, 4);

        let response = runtime
            .chat(&CallContext::customer("ws"), request())
            .await
            .unwrap();
        assert_eq!(response.content, "from groq");
        assert_eq!(primary.calls.load(Ordering::SeqCst), 3);
        assert_eq!(backup.calls.load(Ordering::SeqCst), 1);

        let usage = stores.usage.lock().unwrap();
        assert_eq!(usage.len(), 1);
        assert_eq!(usage[0].provider, ProviderKind::Groq);
        assert_eq!(usage[0].input_tokens, 10);
        assert!(usage[0].success);
    }

    #[tokio::test]
    async fn exhausted_chain_returns_last_error() {
        let settings = byok_settings(
            ProviderKind::Openai,
            &[ProviderKind::Openai, ProviderKind::Groq, ProviderKind::Mistral],
        );
        let (runtime, factory, _) = setup(settings);
        let a = factory.add(ProviderKind::Openai, true, 4);
        let b = factory.add(ProviderKind::Groq, true, 4);
        let c = factory.add(ProviderKind::Mistral, true, 4);

        let err = runtime
            .chat(&CallContext::customer("ws"), request())
            .await
            .unwrap_err();
        match err {
            ParleyError::Provider { provider, .. } => assert_eq!(provider, "mistral"),
            other => panic!("expected provider error, got {other:?}"),
        }
        // each chain position walked once, with its own retries
        for p in [a, b, c] {
            assert_eq!(p.calls.load(Ordering::SeqCst), 3);
        }
    }

    #[tokio::test]
    async fn denied_workspace_makes_no_provider_call() {
        let settings = byok_settings(ProviderKind::Openai, &[ProviderKind::Openai]);
        let (runtime, factory, stores) = setup(settings);
        let provider = factory.add(ProviderKind::Openai, false, 4);
        let mut ws = Workspace::new("ws", "Shop");
        ws.ai_blocked = true;
        *stores.workspace.lock().unwrap() = Some(ws);

        let err = runtime
            .chat(&CallContext::customer("ws"), request())
            .await
            .unwrap_err();
        assert_eq!(err.denial_reason(), Some(DenialReason::AiBlocked));
        assert_eq!(provider.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn chain_is_rebuilt_only_after_settings_change() {
        let settings = byok_settings(ProviderKind::Openai, &[ProviderKind::Openai]);
        let (runtime, factory, _) = setup(settings);
        factory.add(ProviderKind::Openai, false, 4);
        factory.add(ProviderKind::Groq, false, 4);

        let ctx = CallContext::customer("ws");
        runtime.chat(&ctx, request()).await.unwrap();
        runtime.chat(&ctx, request()).await.unwrap();
        assert_eq!(factory.builds.load(Ordering::SeqCst), 1);

        let updated = byok_settings(ProviderKind::Groq, &[ProviderKind::Groq]);
        runtime.update_settings(&updated).await.unwrap();
        let response = runtime.chat(&ctx, request()).await.unwrap();
        assert_eq!(response.content, "from groq");
        assert_eq!(factory.builds.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn embed_rejects_wrong_dimensions() {
        let settings = byok_settings(ProviderKind::Openai, &[ProviderKind::Openai]);
        let (runtime, factory, _) = setup(settings);
        factory.add(ProviderKind::Openai, false, 3);

        let err = runtime
            .embed(&CallContext::customer("ws"), "red scarf")
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            ParleyError::EmbeddingDimension {
                expected: 4,
                actual: 3
            }
        ));
    }

    #[tokio::test]
    async fn embed_reroutes_when_chat_provider_cannot_embed() {
        let settings = byok_settings(
            ProviderKind::Groq,
            &[ProviderKind::Groq, ProviderKind::Ollama],
        );
        let (runtime, factory, _) = setup(settings);
        let groq = factory.add(ProviderKind::Groq, false, 4);
        let ollama = factory.add(ProviderKind::Ollama, false, 4);

        let vector = runtime
            .embed(&CallContext::customer("ws"), "red scarf")
            .await
            .unwrap();
        assert_eq!(vector.len(), 4);
        assert_eq!(groq.calls.load(Ordering::SeqCst), 0);
        assert_eq!(ollama.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn llm_rate_limit_is_enforced() {
        let mut settings = byok_settings(ProviderKind::Openai, &[ProviderKind::Openai]);
        settings.rate_limits.llm_calls_per_minute = 1;
        let (runtime, factory, _) = setup(settings);
        factory.add(ProviderKind::Openai, false, 4);
        let ctx = CallContext::customer("ws");

        let mut results = Vec::new();
        for _ in 0..3 {
            results.push(runtime.chat(&ctx, request()).await);
        }
        assert!(
            results
                .iter()
                .any(|r| matches!(r, Err(ParleyError::RateLimited { .. })))
        );
    }
}
