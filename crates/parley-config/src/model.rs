// SPDX-FileCopyrightText: 2026 Parley Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Configuration model structs for the Parley conversation engine.
//!
//! All structs use `#[serde(deny_unknown_fields)]` to reject unrecognized
//! config keys at startup, providing actionable error messages.

use parley_core::{ProviderCredentials, ProviderKind};
use serde::{Deserialize, Serialize};

/// Top-level Parley configuration.
///
/// Loaded from TOML files following XDG hierarchy, with environment variable overrides.
/// All sections are optional and default to sensible values.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct ParleyConfig {
    #[serde(default)]
    pub agent: AgentConfig,

    #[serde(default)]
    pub storage: StorageConfig,

    /// Queue worker settings.
    #[serde(default)]
    pub worker: WorkerConfig,

    /// Global (non-BYOK) provider credentials.
    #[serde(default)]
    pub providers: ProvidersConfig,

    #[serde(default)]
    pub embedding: EmbeddingConfig,

    /// Settings and provider handle cache.
    #[serde(default)]
    pub cache: CacheConfig,

    /// Hybrid knowledge retrieval tuning.
    #[serde(default)]
    pub retrieval: RetrievalConfig,

    #[serde(default)]
    pub escalation: EscalationConfig,

    /// Default rate limits, used when a workspace has no AI settings record.
    #[serde(default)]
    pub limits: LimitsConfig,

    /// Where outbound customer messages are delivered.
    #[serde(default)]
    pub outbound: OutboundConfig,
}

/// Process identity and logging.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct AgentConfig {
    #[serde(default = "default_agent_name")]
    pub name: String,

    /// Logging level (trace, debug, info, warn, error).
    #[serde(default = "default_log_level")]
    pub log_level: String,

    /// Language state-machine replies are authored in.
    #[serde(default = "default_base_language")]
    pub base_language: String,

    /// Number of past turns given to the generator.
    #[serde(default = "default_history_turns")]
    pub history_turns: usize,

    /// Seconds an untouched shopping cart is kept.
    #[serde(default = "default_cart_ttl_secs")]
    pub cart_ttl_secs: u64,
}

fn default_agent_name() -> String {
    "parley".to_string()
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_base_language() -> String {
    "en".to_string()
}

fn default_history_turns() -> usize {
    6
}

fn default_cart_ttl_secs() -> u64 {
    86_400
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            name: default_agent_name(),
            log_level: default_log_level(),
            base_language: default_base_language(),
            history_turns: default_history_turns(),
            cart_ttl_secs: default_cart_ttl_secs(),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct StorageConfig {
    /// Path to the SQLite database file.
    #[serde(default = "default_database_path")]
    pub database_path: String,

    #[serde(default = "default_true")]
    pub wal_mode: bool,
}

fn default_database_path() -> String {
    dirs::data_local_dir()
        .map(|d| d.join("parley").join("parley.db"))
        .unwrap_or_else(|| std::path::PathBuf::from("parley.db"))
        .display()
        .to_string()
}

fn default_true() -> bool {
    true
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            database_path: default_database_path(),
            wal_mode: true,
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct WorkerConfig {
    /// Interactions processed in parallel (across customers).
    #[serde(default = "default_concurrency")]
    pub concurrency: usize,

    /// Sleep between empty queue polls.
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,

    /// Attempts before a `process` job is abandoned.
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    /// Longest wait for a customer's lock before the job is retried later.
    #[serde(default = "default_lock_timeout_secs")]
    pub lock_timeout_secs: u64,
}

fn default_concurrency() -> usize {
    8
}

fn default_poll_interval_ms() -> u64 {
    500
}

fn default_max_attempts() -> u32 {
    3
}

fn default_lock_timeout_secs() -> u64 {
    30
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            concurrency: default_concurrency(),
            poll_interval_ms: default_poll_interval_ms(),
            max_attempts: default_max_attempts(),
            lock_timeout_secs: default_lock_timeout_secs(),
        }
    }
}

/// Credentials and model overrides for one backend.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct ProviderEntry {
    #[serde(default)]
    pub api_key: Option<String>,

    #[serde(default)]
    pub model: Option<String>,

    #[serde(default)]
    pub embedding_model: Option<String>,

    #[serde(default)]
    pub base_url: Option<String>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct ProvidersConfig {
    /// Provider used by workspaces without an AI settings record.
    #[serde(default = "default_provider")]
    pub default_provider: ProviderKind,

    /// HTTP timeout for a single provider request.
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,

    #[serde(default)]
    pub groq: ProviderEntry,
    #[serde(default)]
    pub deepseek: ProviderEntry,
    #[serde(default)]
    pub gemini: ProviderEntry,
    #[serde(default)]
    pub mistral: ProviderEntry,
    #[serde(default)]
    pub openrouter: ProviderEntry,
    #[serde(default)]
    pub openai: ProviderEntry,
    #[serde(default)]
    pub ollama: ProviderEntry,
}

fn default_provider() -> ProviderKind {
    ProviderKind::Groq
}

fn default_request_timeout_secs() -> u64 {
    60
}

impl Default for ProvidersConfig {
    fn default() -> Self {
        Self {
            default_provider: default_provider(),
            request_timeout_secs: default_request_timeout_secs(),
            groq: ProviderEntry::default(),
            deepseek: ProviderEntry::default(),
            gemini: ProviderEntry::default(),
            mistral: ProviderEntry::default(),
            openrouter: ProviderEntry::default(),
            openai: ProviderEntry::default(),
            ollama: ProviderEntry::default(),
        }
    }
}

impl ProvidersConfig {
    pub fn entry(&self, kind: ProviderKind) -> &ProviderEntry {
        match kind {
            ProviderKind::Groq => &self.groq,
            ProviderKind::Deepseek => &self.deepseek,
            ProviderKind::Gemini => &self.gemini,
            ProviderKind::Mistral => &self.mistral,
            ProviderKind::Openrouter => &self.openrouter,
            ProviderKind::Openai => &self.openai,
            ProviderKind::Ollama => &self.ollama,
        }
    }

    /// Shared credentials for `kind`, if the operator configured any.
    /// Ollama needs no key but must be given an explicit `base_url`.
    pub fn global_credentials(&self, kind: ProviderKind) -> Option<ProviderCredentials> {
        let entry = self.entry(kind);
        let usable = if kind.requires_api_key() {
            entry.api_key.is_some()
        } else {
            entry.base_url.is_some()
        };
        usable.then(|| ProviderCredentials {
            api_key: entry.api_key.clone(),
            model: entry.model.clone(),
            embedding_model: entry.embedding_model.clone(),
            base_url: entry.base_url.clone(),
        })
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct EmbeddingConfig {
    /// Every stored and query embedding has exactly this many dimensions.
    #[serde(default = "default_dimensions")]
    pub dimensions: usize,
}

fn default_dimensions() -> usize {
    768
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            dimensions: default_dimensions(),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct CacheConfig {
    #[serde(default = "default_settings_ttl_secs")]
    pub settings_ttl_secs: u64,

    #[serde(default = "default_sweep_interval_secs")]
    pub sweep_interval_secs: u64,
}

fn default_settings_ttl_secs() -> u64 {
    300
}

fn default_sweep_interval_secs() -> u64 {
    60
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            settings_ttl_secs: default_settings_ttl_secs(),
            sweep_interval_secs: default_sweep_interval_secs(),
        }
    }
}

/// Weights of the hybrid score. Must sum to 1.0 so the score stays in [0, 1].
#[derive(Debug, Clone, Copy, PartialEq, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct ScoreWeights {
    #[serde(default = "default_w_similarity")]
    pub similarity: f32,
    #[serde(default = "default_w_keyword")]
    pub keyword: f32,
    #[serde(default = "default_w_recency")]
    pub recency: f32,
    #[serde(default = "default_w_intent")]
    pub intent: f32,
}

fn default_w_similarity() -> f32 {
    0.5
}

fn default_w_keyword() -> f32 {
    0.25
}

fn default_w_recency() -> f32 {
    0.1
}

fn default_w_intent() -> f32 {
    0.15
}

impl Default for ScoreWeights {
    fn default() -> Self {
        Self {
            similarity: default_w_similarity(),
            keyword: default_w_keyword(),
            recency: default_w_recency(),
            intent: default_w_intent(),
        }
    }
}

impl ScoreWeights {
    pub fn sum(&self) -> f32 {
        self.similarity + self.keyword + self.recency + self.intent
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct RetrievalConfig {
    /// Minimum cosine similarity for a vector hit.
    #[serde(default = "default_similarity_floor")]
    pub similarity_floor: f32,

    /// Minimum hybrid score for an item to be kept.
    #[serde(default = "default_score_floor")]
    pub score_floor: f32,

    #[serde(default = "default_max_results")]
    pub max_results: usize,

    /// Candidates fetched from each search before scoring.
    #[serde(default = "default_candidate_limit")]
    pub candidate_limit: usize,

    /// Score assigned to items pulled in through `related_item_ids`.
    #[serde(default = "default_related_item_score")]
    pub related_item_score: f32,

    #[serde(default = "default_recency_window_days")]
    pub recency_window_days: u32,

    /// Messages with at most this many words are expanded with the previous assistant turn.
    #[serde(default = "default_follow_up_max_words")]
    pub follow_up_max_words: usize,

    /// Top results closer than this are treated as ambiguous.
    #[serde(default = "default_ambiguity_margin")]
    pub ambiguity_margin: f32,

    #[serde(default)]
    pub weights: ScoreWeights,
}

fn default_similarity_floor() -> f32 {
    0.3
}

fn default_score_floor() -> f32 {
    0.25
}

fn default_max_results() -> usize {
    8
}

fn default_candidate_limit() -> usize {
    24
}

fn default_related_item_score() -> f32 {
    0.2
}

fn default_recency_window_days() -> u32 {
    90
}

fn default_follow_up_max_words() -> usize {
    6
}

fn default_ambiguity_margin() -> f32 {
    0.05
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            similarity_floor: default_similarity_floor(),
            score_floor: default_score_floor(),
            max_results: default_max_results(),
            candidate_limit: default_candidate_limit(),
            related_item_score: default_related_item_score(),
            recency_window_days: default_recency_window_days(),
            follow_up_max_words: default_follow_up_max_words(),
            ambiguity_margin: default_ambiguity_margin(),
            weights: ScoreWeights::default(),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct EscalationConfig {
    /// At or above this confidence a reply is never escalated.
    #[serde(default = "default_high_confidence")]
    pub high_confidence: f32,

    /// Below this confidence a reply is always escalated (actionable intents only).
    #[serde(default = "default_low_confidence")]
    pub low_confidence: f32,

    #[serde(default = "default_holding_message")]
    pub holding_message: String,

    /// Send the holding message to the customer when escalating.
    #[serde(default)]
    pub notify_customer: bool,

    /// Put the customer into human takeover when escalating.
    #[serde(default)]
    pub pause_on_escalation: bool,
}

fn default_high_confidence() -> f32 {
    0.8
}

fn default_low_confidence() -> f32 {
    0.5
}

fn default_holding_message() -> String {
    "Thanks for your message! Let me check that with the team and get back to you shortly."
        .to_string()
}

impl Default for EscalationConfig {
    fn default() -> Self {
        Self {
            high_confidence: default_high_confidence(),
            low_confidence: default_low_confidence(),
            holding_message: default_holding_message(),
            notify_customer: false,
            pause_on_escalation: false,
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct LimitsConfig {
    #[serde(default = "default_llm_calls_per_minute")]
    pub llm_calls_per_minute: u64,

    #[serde(default = "default_outbound_per_minute")]
    pub outbound_per_minute: u64,

    #[serde(default = "default_inbound_per_author_per_minute")]
    pub inbound_per_author_per_minute: u64,

    /// How long an aggregated month-to-date token count is trusted.
    #[serde(default = "default_usage_cache_secs")]
    pub usage_cache_secs: u64,
}

fn default_llm_calls_per_minute() -> u64 {
    120
}

fn default_outbound_per_minute() -> u64 {
    60
}

fn default_inbound_per_author_per_minute() -> u64 {
    12
}

fn default_usage_cache_secs() -> u64 {
    60
}

impl Default for LimitsConfig {
    fn default() -> Self {
        Self {
            llm_calls_per_minute: default_llm_calls_per_minute(),
            outbound_per_minute: default_outbound_per_minute(),
            inbound_per_author_per_minute: default_inbound_per_author_per_minute(),
            usage_cache_secs: default_usage_cache_secs(),
        }
    }
}

impl LimitsConfig {
    pub fn as_rate_limits(&self) -> parley_core::RateLimits {
        parley_core::RateLimits {
            llm_calls_per_minute: self.llm_calls_per_minute,
            outbound_per_minute: self.outbound_per_minute,
            inbound_per_author_per_minute: self.inbound_per_author_per_minute,
        }
    }
}

/// Delivery of outbound messages to the platform gateway.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct OutboundConfig {
    /// Gateway endpoint that receives one JSON POST per message. When unset,
    /// messages are only logged.
    #[serde(default)]
    pub webhook_url: Option<String>,

    /// Bearer token sent to the gateway.
    #[serde(default)]
    pub webhook_token: Option<String>,

    /// Platforms the gateway serves.
    #[serde(default = "default_platforms")]
    pub platforms: Vec<String>,

    #[serde(default = "default_outbound_timeout_secs")]
    pub timeout_secs: u64,
}

fn default_platforms() -> Vec<String> {
    ["instagram", "facebook", "whatsapp", "telegram"]
        .into_iter()
        .map(String::from)
        .collect()
}

fn default_outbound_timeout_secs() -> u64 {
    15
}

impl Default for OutboundConfig {
    fn default() -> Self {
        Self {
            webhook_url: None,
            webhook_token: None,
            platforms: default_platforms(),
            timeout_secs: default_outbound_timeout_secs(),
        }
    }
}
