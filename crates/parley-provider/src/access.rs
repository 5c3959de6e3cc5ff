// SPDX-FileCopyrightText: 2026 Parley Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Access control enforced before every provider call.
//!
//! Checks run in a fixed order and the first failing one wins:
//! suspension, explicit AI block, expired free trial, month-to-date token
//! ceiling. BYOK workspaces pay their own provider bills and skip the
//! ceiling.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Datelike, Utc};
use parley_core::{
    AiSettings, CounterStore, DenialReason, ParleyError, Plan, UsageStore, Workspace,
    WorkspaceStatus, WorkspaceStore,
};
use tracing::{debug, warn};

pub struct AccessGuard {
    workspaces: Arc<dyn WorkspaceStore>,
    usage: Arc<dyn UsageStore>,
    counters: Arc<dyn CounterStore>,
    usage_cache_ttl: Duration,
}

impl AccessGuard {
    pub fn new(
        workspaces: Arc<dyn WorkspaceStore>,
        usage: Arc<dyn UsageStore>,
        counters: Arc<dyn CounterStore>,
        usage_cache_ttl: Duration,
    ) -> Self {
        Self {
            workspaces,
            usage,
            counters,
            usage_cache_ttl,
        }
    }

    pub async fn check(
        &self,
        workspace_id: &str,
        settings: &AiSettings,
    ) -> Result<(), ParleyError> {
        let workspace = self
            .workspaces
            .get_workspace(workspace_id)
            .await?
            .ok_or_else(|| ParleyError::not_found("workspace", workspace_id))?;

        let now = Utc::now();
        if let Some(reason) = static_denial(&workspace, now) {
            return Err(deny(workspace_id, reason));
        }

        if settings.byok {
            return Ok(());
        }
        if let Some(limit) = workspace.monthly_token_limit {
            let used = self.month_to_date(workspace_id, now).await?;
            if used >= limit {
                return Err(deny(workspace_id, DenialReason::UsageLimitExceeded));
            }
        }
        Ok(())
    }

    /// Month-to-date tokens, cached briefly in the counter store.
    async fn month_to_date(&self, workspace_id: &str, now: DateTime<Utc>) -> Result<u64, ParleyError> {
        let key = format!("usage_mtd:{workspace_id}:{}-{:02}", now.year(), now.month());
        if let Some(cached) = self.counters.get(&key).await? {
            return Ok(cached.max(0) as u64);
        }
        let used = self.usage.month_to_date_tokens(workspace_id, now).await?;
        self.counters
            .set(&key, used as i64, Some(self.usage_cache_ttl))
            .await?;
        debug!(workspace_id, used, "month-to-date usage aggregated");
        Ok(used)
    }
}

/// Denials that depend only on the workspace record.
pub fn static_denial(workspace: &Workspace, now: DateTime<Utc>) -> Option<DenialReason> {
    if workspace.status == WorkspaceStatus::Suspended {
        return Some(DenialReason::WorkspaceSuspended);
    }
    if workspace.ai_blocked {
        return Some(DenialReason::AiBlocked);
    }
    if workspace.plan == Plan::Free && workspace.trial_ends_at.is_some_and(|end| end <= now) {
        return Some(DenialReason::TrialExpired);
    }
    None
}

fn deny(workspace_id: &str, reason: DenialReason) -> ParleyError {
    warn!(workspace_id, %reason, "provider access denied");
    ParleyError::AccessDenied { reason }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::counter::MemoryCounterStore;
    use async_trait::async_trait;
    use parley_core::{ProviderKind, UsageRecord};
    use std::sync::Mutex;

    struct Fixture {
        workspace: Mutex<Workspace>,
        used: u64,
    }

    #[async_trait]
    impl WorkspaceStore for Fixture {
        async fn get_workspace(&self, _: &str) -> Result<Option<Workspace>, ParleyError> {
            Ok(Some(self.workspace.lock().unwrap().clone()))
        }
        async fn upsert_workspace(&self, w: &Workspace) -> Result<(), ParleyError> {
            *self.workspace.lock().unwrap() = w.clone();
            Ok(())
        }
    }

    #[async_trait]
    impl UsageStore for Fixture {
        async fn record_usage(&self, _: &UsageRecord) -> Result<(), ParleyError> {
            Ok(())
        }
        async fn month_to_date_tokens(&self, _: &str, _: DateTime<Utc>) -> Result<u64, ParleyError> {
            Ok(self.used)
        }
    }

    fn guard(workspace: Workspace, used: u64) -> AccessGuard {
        let fixture = Arc::new(Fixture {
            workspace: Mutex::new(workspace),
            used,
        });
        AccessGuard::new(
            fixture.clone(),
            fixture,
            Arc::new(MemoryCounterStore::new()),
            Duration::from_secs(60),
        )
    }

    fn settings() -> AiSettings {
        AiSettings::new("ws", ProviderKind::Groq)
    }

    async fn reason(guard: &AccessGuard, settings: &AiSettings) -> Option<DenialReason> {
        guard
            .check("ws", settings)
            .await
            .err()
            .and_then(|e| e.denial_reason())
    }

    #[tokio::test]
    async fn active_workspace_is_allowed() {
        assert_eq!(reason(&guard(Workspace::new("ws", "Shop"), 0), &settings()).await, None);
    }

    #[tokio::test]
    async fn each_denial_has_its_own_reason() {
        let mut suspended = Workspace::new("ws", "Shop");
        suspended.status = WorkspaceStatus::Suspended;
        suspended.ai_blocked = true;
        assert_eq!(
            reason(&guard(suspended, 0), &settings()).await,
            Some(DenialReason::WorkspaceSuspended)
        );

        let mut blocked = Workspace::new("ws", "Shop");
        blocked.ai_blocked = true;
        assert_eq!(
            reason(&guard(blocked, 0), &settings()).await,
            Some(DenialReason::AiBlocked)
        );

        let mut trial = Workspace::new("ws", "Shop");
        trial.plan = Plan::Free;
        trial.trial_ends_at = Some(Utc::now() - chrono::Duration::days(1));
        assert_eq!(
            reason(&guard(trial, 0), &settings()).await,
            Some(DenialReason::TrialExpired)
        );

        let mut capped = Workspace::new("ws", "Shop");
        capped.monthly_token_limit = Some(1_000);
        assert_eq!(
            reason(&guard(capped, 1_000), &settings()).await,
            Some(DenialReason::UsageLimitExceeded)
        );
    }

    #[tokio::test]
    async fn paid_plan_ignores_trial_end() {
        let mut paid = Workspace::new("ws", "Shop");
        paid.plan = Plan::Paid;
        paid.trial_ends_at = Some(Utc::now() - chrono::Duration::days(30));
        assert_eq!(reason(&guard(paid, 0), &settings()).await, None);
    }

    #[tokio::test]
    async fn byok_bypasses_usage_ceiling() {
        let mut capped = Workspace::new("ws", "Shop");
        capped.monthly_token_limit = Some(10);
        let mut byok = settings();
        byok.byok = true;
        assert_eq!(reason(&guard(capped, 50_000), &byok).await, None);
    }

    #[tokio::test]
    async fn missing_workspace_is_not_found() {
        struct Empty;
        #[async_trait]
        impl WorkspaceStore for Empty {
            async fn get_workspace(&self, _: &str) -> Result<Option<Workspace>, ParleyError> {
                Ok(None)
            }
            async fn upsert_workspace(&self, _: &Workspace) -> Result<(), ParleyError> {
                Ok(())
            }
        }
        let usage = Arc::new(Fixture {
            workspace: Mutex::new(Workspace::new("x", "x")),
            used: 0,
        });
        let guard = AccessGuard::new(
            Arc::new(Empty),
            usage,
            Arc::new(MemoryCounterStore::new()),
            Duration::from_secs(60),
        );
        assert!(matches!(
            guard.check("ws", &settings()).await,
            Err(ParleyError::NotFound { .. })
        ));
    }
}
