// SPDX-FileCopyrightText: 2026 Parley Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Usage log for successful provider calls.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use parley_core::{CallContext, ProviderKind, TokenUsage, UsageRecord, UsageStore};
use tracing::{info, warn};

#[derive(Clone)]
pub struct UsageLogger {
    store: Arc<dyn UsageStore>,
}

impl UsageLogger {
    pub fn new(store: Arc<dyn UsageStore>) -> Self {
        Self { store }
    }

    /// Records a call. A failing usage write is logged and swallowed: the
    /// customer already has their answer.
    pub async fn record(
        &self,
        ctx: &CallContext,
        provider: ProviderKind,
        model: &str,
        usage: TokenUsage,
        latency: Duration,
        fallback: bool,
    ) {
        let record = UsageRecord {
            workspace_id: ctx.workspace_id.clone(),
            role: ctx.role,
            provider,
            model: model.to_string(),
            input_tokens: usage.input_tokens,
            output_tokens: usage.output_tokens,
            latency_ms: latency.as_millis() as u64,
            success: true,
            created_at: Utc::now(),
        };

        info!(
            workspace_id = %record.workspace_id,
            role = %record.role,
            provider = %record.provider,
            model = %record.model,
            input_tokens = record.input_tokens,
            output_tokens = record.output_tokens,
            latency_ms = record.latency_ms,
            fallback,
            "provider call succeeded"
        );

        if let Err(e) = self.store.record_usage(&record).await {
            warn!(error = %e, workspace_id = %record.workspace_id, "failed to record usage");
        }
    }
}
