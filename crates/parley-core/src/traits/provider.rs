// SPDX-FileCopyrightText: 2026 Parley Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Language model traits.

use std::sync::Arc;

use async_trait::async_trait;

use crate::entities::ProviderCredentials;
use crate::error::ParleyError;
use crate::types::{CallContext, ChatRequest, ChatResponse, ProviderKind};

/// A single concrete LLM backend, bound to one set of credentials.
#[async_trait]
pub trait ChatProvider: Send + Sync {
    fn kind(&self) -> ProviderKind;

    /// Model used when the request does not override it.
    fn model(&self) -> &str;

    async fn chat(&self, request: ChatRequest) -> Result<ChatResponse, ParleyError>;

    fn supports_embedding(&self) -> bool {
        false
    }

    async fn embed(&self, _text: &str) -> Result<Vec<f32>, ParleyError> {
        Err(ParleyError::provider(
            self.kind().to_string(),
            "embeddings are not supported by this provider",
        ))
    }
}

/// The uniform contract the orchestration components call.
///
/// Implementations resolve the workspace policy, enforce access control and
/// walk a fallback chain; callers only see a response or the final error.
#[async_trait]
pub trait LanguageModel: Send + Sync {
    async fn chat(
        &self,
        ctx: &CallContext,
        request: ChatRequest,
    ) -> Result<ChatResponse, ParleyError>;

    /// Returns a vector of exactly the configured dimensionality.
    async fn embed(&self, ctx: &CallContext, text: &str) -> Result<Vec<f32>, ParleyError>;
}

/// Builds a provider handle for one backend and credential set.
pub trait ProviderFactory: Send + Sync {
    fn build(
        &self,
        kind: ProviderKind,
        credentials: &ProviderCredentials,
    ) -> Result<Arc<dyn ChatProvider>, ParleyError>;
}
