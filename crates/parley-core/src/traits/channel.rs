// SPDX-FileCopyrightText: 2026 Parley Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Outbound messaging trait for platform clients (Instagram, WhatsApp, SMS, ...).

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::ParleyError;

/// A reply to deliver to a customer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OutboundMessage {
    /// Platform user id of the recipient.
    pub to: String,
    pub text: String,
    pub reply_to_message_id: Option<String>,
    pub conversation_id: Option<String>,
    /// Platform-agnostic attachment description (carousel, image).
    pub media_payload: Option<serde_json::Value>,
}

impl OutboundMessage {
    pub fn text(to: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            to: to.into(),
            text: text.into(),
            reply_to_message_id: None,
            conversation_id: None,
            media_payload: None,
        }
    }
}

/// Sends messages on one platform.
#[async_trait]
pub trait Messenger: Send + Sync {
    /// Abstract platform identifier this client serves.
    fn platform(&self) -> &str;

    /// Delivers a message and returns the platform message id.
    async fn send(&self, message: OutboundMessage) -> Result<String, ParleyError>;
}
