// SPDX-FileCopyrightText: 2026 Parley Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Fixed-window rate limiting on top of a [`CounterStore`].

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use parley_core::{CounterStore, ParleyError};
use tracing::debug;

const WINDOW: Duration = Duration::from_secs(60);

/// What a limit is counted against.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RateScope<'a> {
    /// LLM calls made for a workspace.
    Llm { workspace_id: &'a str },
    /// Messages sent on behalf of a workspace.
    Outbound { workspace_id: &'a str },
    /// Inbound messages from one author, to damp spam.
    Inbound {
        workspace_id: &'a str,
        author_id: &'a str,
    },
}

impl RateScope<'_> {
    fn key(&self, window: i64) -> String {
        match self {
            Self::Llm { workspace_id } => format!("ratelimit:llm:{workspace_id}:{window}"),
            Self::Outbound { workspace_id } => {
                format!("ratelimit:outbound:{workspace_id}:{window}")
            }
            Self::Inbound {
                workspace_id,
                author_id,
            } => format!("ratelimit:inbound:{workspace_id}:{author_id}:{window}"),
        }
    }

    fn label(&self) -> &'static str {
        match self {
            Self::Llm { .. } => "llm",
            Self::Outbound { .. } => "outbound",
            Self::Inbound { .. } => "inbound",
        }
    }
}

#[derive(Clone)]
pub struct RateLimiter {
    counters: Arc<dyn CounterStore>,
}

impl RateLimiter {
    pub fn new(counters: Arc<dyn CounterStore>) -> Self {
        Self { counters }
    }

    /// Counts one event and fails once more than `per_minute` happened in
    /// the current minute. A limit of 0 disables the check.
    pub async fn check(&self, scope: RateScope<'_>, per_minute: u64) -> Result<(), ParleyError> {
        if per_minute == 0 {
            return Ok(());
        }
        let window = Utc::now().timestamp() / WINDOW.as_secs() as i64;
        // one extra window of TTL so a late increment never resurrects a key
        let count = self
            .counters
            .incr_with_ttl(&scope.key(window), WINDOW * 2)
            .await?;
        if count > per_minute as i64 {
            debug!(scope = scope.label(), count, limit = per_minute, "rate limit hit");
            return Err(ParleyError::RateLimited {
                scope: scope.label().to_string(),
                limit: per_minute,
            });
        }
        Ok(())
    }
}
