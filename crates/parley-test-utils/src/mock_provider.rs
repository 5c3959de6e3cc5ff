// SPDX-FileCopyrightText: 2026 Parley Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Scripted language model for deterministic testing.
//!
//! `MockProvider` implements [`LanguageModel`]. Chat replies come from two
//! sources: routes, which answer any request whose system prompt contains a
//! needle and are never consumed, and a FIFO script used for everything
//! else. When both miss, a default "mock response" is returned.

use std::collections::VecDeque;
use std::hash::{DefaultHasher, Hash, Hasher};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::Mutex;

use parley_core::{
    CallContext, ChatRequest, ChatResponse, ChatRole, DenialReason, LanguageModel, ParleyError,
    TokenUsage, ToolCall,
};

const DEFAULT_DIMENSIONS: usize = 16;

/// One scripted chat outcome.
#[derive(Debug, Clone)]
pub enum Scripted {
    Reply(ChatResponse),
    Fail(String),
}

impl Scripted {
    fn text(content: impl Into<String>) -> Self {
        Self::Reply(ChatResponse {
            content: content.into(),
            usage: TokenUsage {
                input_tokens: 10,
                output_tokens: 20,
            },
            tool_calls: Vec::new(),
            model: "mock-model".into(),
        })
    }
}

pub struct MockProvider {
    script: Arc<Mutex<VecDeque<Scripted>>>,
    routes: Arc<Mutex<Vec<(String, Scripted)>>>,
    requests: Arc<Mutex<Vec<ChatRequest>>>,
    chat_calls: AtomicUsize,
    embed_calls: AtomicUsize,
    embed_failing: AtomicBool,
    denial: std::sync::Mutex<Option<DenialReason>>,
    latency_ms: AtomicU64,
    dimensions: usize,
}

impl MockProvider {
    pub fn new() -> Self {
        Self {
            script: Arc::new(Mutex::new(VecDeque::new())),
            routes: Arc::new(Mutex::new(Vec::new())),
            requests: Arc::new(Mutex::new(Vec::new())),
            chat_calls: AtomicUsize::new(0),
            embed_calls: AtomicUsize::new(0),
            embed_failing: AtomicBool::new(false),
            denial: std::sync::Mutex::new(None),
            latency_ms: AtomicU64::new(0),
            dimensions: DEFAULT_DIMENSIONS,
        }
    }

    /// Create a mock provider pre-loaded with the given replies.
    pub fn with_responses(responses: Vec<String>) -> Self {
        Self {
            script: Arc::new(Mutex::new(
                responses.into_iter().map(Scripted::text).collect(),
            )),
            ..Self::new()
        }
    }

    pub async fn push_response(&self, text: impl Into<String>) {
        self.script.lock().await.push_back(Scripted::text(text));
    }

    /// Queues a reply that requests structured tool calls.
    pub async fn push_tool_calls(&self, calls: Vec<ToolCall>) {
        let mut reply = Scripted::text("");
        if let Scripted::Reply(r) = &mut reply {
            r.tool_calls = calls;
        }
        self.script.lock().await.push_back(reply);
    }

    /// Queues a provider error.
    pub async fn push_failure(&self, message: impl Into<String>) {
        self.script
            .lock()
            .await
            .push_back(Scripted::Fail(message.into()));
    }

    /// Answers every request whose system prompt contains `needle` with `reply`.
    /// Later routes win over earlier ones with the same needle.
    pub async fn route(&self, needle: impl Into<String>, reply: impl Into<String>) {
        let needle = needle.into();
        let mut routes = self.routes.lock().await;
        routes.retain(|(n, _)| *n != needle);
        routes.push((needle, Scripted::text(reply)));
    }

    /// Fails every request whose system prompt contains `needle`.
    pub async fn route_failure(&self, needle: impl Into<String>, message: impl Into<String>) {
        let needle = needle.into();
        let mut routes = self.routes.lock().await;
        routes.retain(|(n, _)| *n != needle);
        routes.push((needle, Scripted::Fail(message.into())));
    }

    pub fn fail_embeddings(&self, failing: bool) {
        self.embed_failing.store(failing, Ordering::SeqCst);
    }

    /// Rejects every chat and embedding call as the provider runtime does
    /// for a workspace without AI access. `None` lifts the denial.
    pub fn deny(&self, reason: Option<DenialReason>) {
        if let Ok(mut denial) = self.denial.lock() {
            *denial = reason;
        }
    }

    /// Delays every chat reply, to widen race windows in tests.
    pub fn set_latency(&self, latency: Duration) {
        self.latency_ms
            .store(latency.as_millis() as u64, Ordering::SeqCst);
    }

    fn denied(&self) -> Result<(), ParleyError> {
        match self.denial.lock().ok().and_then(|d| *d) {
            Some(reason) => Err(ParleyError::AccessDenied { reason }),
            None => Ok(()),
        }
    }

    pub fn chat_calls(&self) -> usize {
        self.chat_calls.load(Ordering::SeqCst)
    }

    pub fn embed_calls(&self) -> usize {
        self.embed_calls.load(Ordering::SeqCst)
    }

    /// Every chat request received, in order.
    pub async fn requests(&self) -> Vec<ChatRequest> {
        self.requests.lock().await.clone()
    }

    /// Scripted replies not yet consumed.
    pub async fn remaining(&self) -> usize {
        self.script.lock().await.len()
    }

    /// Deterministic bag-of-words embedding: each lowercase word is hashed
    /// into one of the dimensions, then the vector is normalised.
    pub fn embedding_for(&self, text: &str) -> Vec<f32> {
        let mut v = vec![0.0f32; self.dimensions];
        for word in text
            .split(|c: char| !c.is_alphanumeric())
            .filter(|w| w.len() > 2)
        {
            let mut h = DefaultHasher::new();
            word.to_lowercase().hash(&mut h);
            v[(h.finish() % self.dimensions as u64) as usize] += 1.0;
        }
        let norm = v.iter().map(|x| x * x).sum::<f32>().sqrt();
        if norm > 0.0 {
            v.iter_mut().for_each(|x| *x /= norm);
        }
        v
    }

    async fn next_reply(&self, request: &ChatRequest) -> Scripted {
        let system: Vec<&str> = request
            .messages
            .iter()
            .filter(|m| m.role == ChatRole::System)
            .map(|m| m.content.as_str())
            .collect();
        {
            let routes = self.routes.lock().await;
            if let Some((_, reply)) = routes
                .iter()
                .rev()
                .find(|(needle, _)| system.iter().any(|s| s.contains(needle.as_str())))
            {
                return reply.clone();
            }
        }
        self.script
            .lock()
            .await
            .pop_front()
            .unwrap_or_else(|| Scripted::text("mock response"))
    }
}

impl Default for MockProvider {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl LanguageModel for MockProvider {
    async fn chat(
        &self,
        _ctx: &CallContext,
        request: ChatRequest,
    ) -> Result<ChatResponse, ParleyError> {
        self.chat_calls.fetch_add(1, Ordering::SeqCst);
        self.denied()?;
        let latency = self.latency_ms.load(Ordering::SeqCst);
        if latency > 0 {
            tokio::time::sleep(Duration::from_millis(latency)).await;
        }
        let reply = self.next_reply(&request).await;
        self.requests.lock().await.push(request);
        match reply {
            Scripted::Reply(response) => Ok(response),
            Scripted::Fail(message) => Err(ParleyError::provider("mock", message)),
        }
    }

    async fn embed(&self, _ctx: &CallContext, text: &str) -> Result<Vec<f32>, ParleyError> {
        self.embed_calls.fetch_add(1, Ordering::SeqCst);
        self.denied()?;
        if self.embed_failing.load(Ordering::SeqCst) {
            return Err(ParleyError::provider("mock", "embeddings unavailable"));
        }
        Ok(self.embedding_for(text))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parley_core::ChatMessage;

    fn request(system: &str) -> ChatRequest {
        ChatRequest::new(vec![ChatMessage::system(system), ChatMessage::user("hi")])
    }

    #[tokio::test]
    async fn default_response_when_script_empty() {
        let provider = MockProvider::new();
        let resp = provider
            .chat(&CallContext::customer("ws"), request("x"))
            .await
            .unwrap();
        assert_eq!(resp.content, "mock response");
        assert_eq!(provider.chat_calls(), 1);
    }

    #[tokio::test]
    async fn routes_win_over_script() {
        let provider = MockProvider::with_responses(vec!["first".into(), "second".into()]);
        provider.route("classify", "routed").await;
        let ctx = CallContext::customer("ws");

        assert_eq!(provider.chat(&ctx, request("please classify")).await.unwrap().content, "routed");
        assert_eq!(provider.chat(&ctx, request("other")).await.unwrap().content, "first");
        assert_eq!(provider.chat(&ctx, request("please classify")).await.unwrap().content, "routed");
        assert_eq!(provider.remaining().await, 1);
        assert_eq!(provider.requests().await.len(), 3);
    }

    #[tokio::test]
    async fn scripted_failures_surface_as_provider_errors() {
        let provider = MockProvider::new();
        provider.push_failure("boom").await;
        let err = provider
            .chat(&CallContext::customer("ws"), request("x"))
            .await
            .unwrap_err();
        assert!(err.is_retryable());
    }

    #[tokio::test]
    async fn embeddings_are_deterministic_and_normalised() {
        let provider = MockProvider::new();
        let ctx = CallContext::customer("ws");
        let a = provider.embed(&ctx, "red scarf").await.unwrap();
        let b = provider.embed(&ctx, "Red Scarf").await.unwrap();
        assert_eq!(a, b);
        let norm: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
        assert!((norm - 1.0).abs() < 1e-5);

        provider.fail_embeddings(true);
        assert!(provider.embed(&ctx, "red scarf").await.is_err());
        assert_eq!(provider.embed_calls(), 3);
    }

    #[tokio::test]
    async fn denial_applies_until_lifted() {
        let provider = MockProvider::new();
        let ctx = CallContext::customer("ws");
        provider.deny(Some(DenialReason::TrialExpired));
        let err = provider.chat(&ctx, request("x")).await.unwrap_err();
        assert!(err.is_access_denied());

        provider.deny(None);
        assert!(provider.chat(&ctx, request("x")).await.is_ok());
    }
}
