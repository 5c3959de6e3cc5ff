// SPDX-FileCopyrightText: 2026 Parley Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Mock outbound messenger for deterministic testing.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use tokio::sync::Mutex;

use parley_core::{Messenger, OutboundMessage, ParleyError};

/// Captures every message passed to `send()`. When set to fail, sends are
/// rejected with a dispatch error and nothing is captured.
pub struct MockMessenger {
    platform: String,
    sent: Arc<Mutex<Vec<OutboundMessage>>>,
    failing: AtomicBool,
}

impl MockMessenger {
    pub fn new(platform: impl Into<String>) -> Self {
        Self {
            platform: platform.into(),
            sent: Arc::new(Mutex::new(Vec::new())),
            failing: AtomicBool::new(false),
        }
    }

    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    /// Get all messages that were sent through `send()`.
    pub async fn sent_messages(&self) -> Vec<OutboundMessage> {
        self.sent.lock().await.clone()
    }

    pub async fn sent_count(&self) -> usize {
        self.sent.lock().await.len()
    }

    /// Text of the most recent message, if any.
    pub async fn last_text(&self) -> Option<String> {
        self.sent.lock().await.last().map(|m| m.text.clone())
    }

    pub async fn clear_sent(&self) {
        self.sent.lock().await.clear();
    }
}

impl Default for MockMessenger {
    fn default() -> Self {
        Self::new("instagram")
    }
}

#[async_trait]
impl Messenger for MockMessenger {
    fn platform(&self) -> &str {
        &self.platform
    }

    async fn send(&self, message: OutboundMessage) -> Result<String, ParleyError> {
        if self.failing.load(Ordering::SeqCst) {
            return Err(ParleyError::Dispatch {
                platform: self.platform.clone(),
                message: "mock delivery failure".into(),
                source: None,
            });
        }
        self.sent.lock().await.push(message);
        Ok(format!("mock-msg-{}", uuid::Uuid::new_v4()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn captures_and_fails_on_demand() {
        let messenger = MockMessenger::default();
        assert_eq!(messenger.platform(), "instagram");

        let id = messenger
            .send(OutboundMessage::text("u1", "hello"))
            .await
            .unwrap();
        assert!(id.starts_with("mock-msg-"));
        assert_eq!(messenger.last_text().await.as_deref(), Some("hello"));

        messenger.set_failing(true);
        let err = messenger
            .send(OutboundMessage::text("u1", "again"))
            .await
            .unwrap_err();
        assert!(matches!(err, ParleyError::Dispatch { .. }));
        assert_eq!(messenger.sent_count().await, 1);

        messenger.clear_sent().await;
        assert_eq!(messenger.sent_count().await, 0);
    }
}
