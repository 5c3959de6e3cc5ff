// SPDX-FileCopyrightText: 2026 Parley Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Outbound delivery to the messaging gateway.
//!
//! Platform clients live outside this process. Each message is POSTed as
//! JSON to the configured gateway, which answers with the platform message
//! id. Without a gateway, messages are logged and given a local id.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parley_config::model::OutboundConfig;
use parley_core::{Messenger, OutboundMessage, ParleyError};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

#[derive(Serialize)]
struct GatewayRequest<'a> {
    platform: &'a str,
    #[serde(flatten)]
    message: &'a OutboundMessage,
}

#[derive(Deserialize)]
struct GatewayResponse {
    message_id: String,
}

pub struct WebhookMessenger {
    platform: String,
    url: String,
    token: Option<String>,
    client: reqwest::Client,
}

impl WebhookMessenger {
    pub fn new(
        platform: impl Into<String>,
        url: impl Into<String>,
        token: Option<String>,
        client: reqwest::Client,
    ) -> Self {
        Self {
            platform: platform.into(),
            url: url.into(),
            token,
            client,
        }
    }

    fn dispatch_error(
        &self,
        message: impl Into<String>,
        source: Option<reqwest::Error>,
    ) -> ParleyError {
        ParleyError::Dispatch {
            platform: self.platform.clone(),
            message: message.into(),
            source: source
                .map(|e| -> Box<dyn std::error::Error + Send + Sync> { Box::new(e) }),
        }
    }
}

#[async_trait]
impl Messenger for WebhookMessenger {
    fn platform(&self) -> &str {
        &self.platform
    }

    async fn send(&self, message: OutboundMessage) -> Result<String, ParleyError> {
        let mut request = self.client.post(&self.url).json(&GatewayRequest {
            platform: &self.platform,
            message: &message,
        });
        if let Some(token) = &self.token {
            request = request.bearer_auth(token);
        }
        let response = request
            .send()
            .await
            .map_err(|e| self.dispatch_error("gateway unreachable", Some(e)))?;
        let status = response.status();
        if !status.is_success() {
            return Err(self.dispatch_error(format!("gateway returned {status}"), None));
        }
        let body: GatewayResponse = response
            .json()
            .await
            .map_err(|e| self.dispatch_error("malformed gateway response", Some(e)))?;
        debug!(platform = %self.platform, message_id = %body.message_id, "gateway accepted message");
        Ok(body.message_id)
    }
}

/// Logs messages instead of delivering them.
pub struct LogMessenger {
    platform: String,
}

impl LogMessenger {
    pub fn new(platform: impl Into<String>) -> Self {
        Self {
            platform: platform.into(),
        }
    }
}

#[async_trait]
impl Messenger for LogMessenger {
    fn platform(&self) -> &str {
        &self.platform
    }

    async fn send(&self, message: OutboundMessage) -> Result<String, ParleyError> {
        info!(
            platform = %self.platform,
            to = %message.to,
            has_media = message.media_payload.is_some(),
            text = %message.text,
            "outbound message (no gateway configured)"
        );
        Ok(format!("local-{}", uuid::Uuid::new_v4()))
    }
}

/// One messenger per configured platform.
pub fn build_messengers(config: &OutboundConfig) -> Result<Vec<Arc<dyn Messenger>>, ParleyError> {
    let Some(url) = config.webhook_url.as_deref() else {
        return Ok(config
            .platforms
            .iter()
            .map(|p| Arc::new(LogMessenger::new(p.as_str())) as Arc<dyn Messenger>)
            .collect());
    };
    let client = reqwest::Client::builder()
        .timeout(Duration::from_secs(config.timeout_secs))
        .build()
        .map_err(|e| ParleyError::Config(format!("failed to build gateway client: {e}")))?;
    Ok(config
        .platforms
        .iter()
        .map(|p| {
            Arc::new(WebhookMessenger::new(
                p.as_str(),
                url,
                config.webhook_token.clone(),
                client.clone(),
            )) as Arc<dyn Messenger>
        })
        .collect())
}
