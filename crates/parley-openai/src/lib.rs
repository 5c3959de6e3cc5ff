// SPDX-FileCopyrightText: 2026 Parley Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! OpenAI-compatible provider adapter for Parley.
//!
//! Every supported backend (Groq, DeepSeek, Gemini, Mistral, OpenRouter,
//! OpenAI, Ollama) exposes a chat-completions endpoint of the same shape, so
//! a single [`CompatProvider`] serves them all. [`CompatFactory`] builds
//! providers for the runtime's fallback chains.

pub mod client;
pub mod types;

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parley_config::model::ProvidersConfig;
use parley_core::{
    ChatProvider, ChatRequest, ChatResponse, ParleyError, ProviderCredentials, ProviderFactory,
    ProviderKind, TokenUsage,
};
use secrecy::SecretString;
use tracing::debug;

pub use client::CompatClient;
use types::{CompletionRequest, CompletionResponse, EmbeddingRequest, EmbeddingResponse};

/// Chat and embedding provider for one OpenAI-compatible backend.
pub struct CompatProvider {
    client: CompatClient,
    model: String,
    embedding_model: Option<String>,
}

impl CompatProvider {
    pub fn new(
        kind: ProviderKind,
        credentials: &ProviderCredentials,
        timeout: Duration,
    ) -> Result<Self, ParleyError> {
        let base_url = credentials
            .base_url
            .clone()
            .unwrap_or_else(|| kind.default_base_url().to_string());
        let api_key = credentials
            .api_key
            .clone()
            .filter(|k| !k.is_empty())
            .map(SecretString::from);

        Ok(Self {
            client: CompatClient::new(kind, base_url, api_key, timeout)?,
            model: credentials
                .model
                .clone()
                .unwrap_or_else(|| kind.default_chat_model().to_string()),
            embedding_model: credentials
                .embedding_model
                .clone()
                .or_else(|| kind.default_embedding_model().map(str::to_string)),
        })
    }
}

#[async_trait]
impl ChatProvider for CompatProvider {
    fn kind(&self) -> ProviderKind {
        self.client.kind()
    }

    fn model(&self) -> &str {
        &self.model
    }

    async fn chat(&self, request: ChatRequest) -> Result<ChatResponse, ParleyError> {
        let wire = CompletionRequest::from_chat(&request, &self.model);
        debug!(
            provider = %self.kind(),
            model = %wire.model,
            messages = wire.messages.len(),
            tools = wire.tools.len(),
            "sending chat completion"
        );

        let response: CompletionResponse = self.client.post_json("/chat/completions", &wire).await?;
        let model = response.model.unwrap_or(wire.model);
        let usage = response.usage.unwrap_or_default();
        let choice = response.choices.into_iter().next().ok_or_else(|| {
            ParleyError::provider(self.kind().to_string(), "response contained no choices")
        })?;

        Ok(ChatResponse {
            content: choice.message.content.unwrap_or_default(),
            usage: TokenUsage {
                input_tokens: usage.prompt_tokens,
                output_tokens: usage.completion_tokens,
            },
            tool_calls: choice
                .message
                .tool_calls
                .into_iter()
                .map(|c| c.into_tool_call())
                .collect(),
            model,
        })
    }

    fn supports_embedding(&self) -> bool {
        self.embedding_model.is_some()
    }

    async fn embed(&self, text: &str) -> Result<Vec<f32>, ParleyError> {
        let Some(model) = &self.embedding_model else {
            return Err(ParleyError::provider(
                self.kind().to_string(),
                "no embedding model configured",
            ));
        };
        let request = EmbeddingRequest {
            model: model.clone(),
            input: text.to_string(),
        };
        let response: EmbeddingResponse = self.client.post_json("/embeddings", &request).await?;
        response
            .data
            .into_iter()
            .next()
            .map(|d| d.embedding)
            .ok_or_else(|| {
                ParleyError::provider(self.kind().to_string(), "embedding response was empty")
            })
    }
}

/// Builds [`CompatProvider`]s with the configured request timeout.
#[derive(Debug, Clone)]
pub struct CompatFactory {
    timeout: Duration,
}

impl CompatFactory {
    pub fn new(timeout: Duration) -> Self {
        Self { timeout }
    }

    pub fn from_config(config: &ProvidersConfig) -> Self {
        Self::new(Duration::from_secs(config.request_timeout_secs))
    }
}

impl ProviderFactory for CompatFactory {
    fn build(
        &self,
        kind: ProviderKind,
        credentials: &ProviderCredentials,
    ) -> Result<Arc<dyn ChatProvider>, ParleyError> {
        Ok(Arc::new(CompatProvider::new(kind, credentials, self.timeout)?))
    }
}
