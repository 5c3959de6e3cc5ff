// SPDX-FileCopyrightText: 2026 Parley Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! HTTP client for OpenAI-compatible endpoints.
//!
//! One [`CompatClient`] talks to one backend root (`.../v1`). It performs a
//! single attempt per call and classifies failures: transient statuses and
//! transport errors become retryable [`ParleyError::Provider`] errors, so
//! the provider runtime decides how often to retry.

use std::time::Duration;

use parley_core::{ParleyError, ProviderKind};
use reqwest::StatusCode;
use secrecy::{ExposeSecret, SecretString};
use serde::Serialize;
use serde::de::DeserializeOwned;
use tracing::debug;

use crate::types::ApiErrorResponse;

#[derive(Debug, Clone)]
pub struct CompatClient {
    client: reqwest::Client,
    kind: ProviderKind,
    base_url: String,
    api_key: Option<SecretString>,
    timeout: Duration,
}

impl CompatClient {
    pub fn new(
        kind: ProviderKind,
        base_url: impl Into<String>,
        api_key: Option<SecretString>,
        timeout: Duration,
    ) -> Result<Self, ParleyError> {
        if kind.requires_api_key() && api_key.is_none() {
            return Err(ParleyError::Config(format!("{kind} requires an api key")));
        }

        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| ParleyError::Provider {
                provider: kind.to_string(),
                message: format!("failed to build HTTP client: {e}"),
                source: Some(Box::new(e)),
            })?;

        Ok(Self {
            client,
            kind,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            api_key,
            timeout,
        })
    }

    pub fn kind(&self) -> ProviderKind {
        self.kind
    }

    /// POSTs `body` as JSON to `{base_url}{path}` and decodes the response.
    pub async fn post_json<B, T>(&self, path: &str, body: &B) -> Result<T, ParleyError>
    where
        B: Serialize + ?Sized,
        T: DeserializeOwned,
    {
        let url = format!("{}{}", self.base_url, path);
        let mut request = self.client.post(&url).json(body);
        if let Some(key) = &self.api_key {
            request = request.bearer_auth(key.expose_secret());
        }

        let response = request.send().await.map_err(|e| self.transport_error(e))?;
        let status = response.status();
        debug!(provider = %self.kind, status = %status, path, "response received");

        let text = response
            .text()
            .await
            .map_err(|e| self.transport_error(e))?;

        if !status.is_success() {
            return Err(self.status_error(status, &text));
        }

        serde_json::from_str(&text).map_err(|e| ParleyError::Provider {
            provider: self.kind.to_string(),
            message: format!("failed to parse API response: {e}"),
            source: Some(Box::new(e)),
        })
    }

    fn transport_error(&self, e: reqwest::Error) -> ParleyError {
        if e.is_timeout() {
            return ParleyError::Timeout {
                duration: self.timeout,
            };
        }
        ParleyError::Provider {
            provider: self.kind.to_string(),
            message: format!("HTTP request failed: {e}"),
            source: Some(Box::new(e)),
        }
    }

    fn status_error(&self, status: StatusCode, body: &str) -> ParleyError {
        let detail = match serde_json::from_str::<ApiErrorResponse>(body) {
            Ok(api) => match api.error.type_ {
                Some(t) => format!("{t}: {}", api.error.message),
                None => api.error.message,
            },
            Err(_) => body.chars().take(200).collect(),
        };
        let message = format!("API returned {status}: {detail}");

        if is_transient_error(status) {
            ParleyError::provider(self.kind.to_string(), message)
        } else if matches!(status, StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN) {
            ParleyError::Config(format!("{} rejected credentials: {message}", self.kind))
        } else {
            ParleyError::Validation(format!("{} rejected request: {message}", self.kind))
        }
    }
}

/// Status codes worth another attempt.
fn is_transient_error(status: StatusCode) -> bool {
    matches!(status.as_u16(), 408 | 429 | 500 | 502 | 503 | 504 | 529)
}
