// SPDX-FileCopyrightText: 2026 Parley Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! SQLite implementation of the collaborator store traits.

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tracing::debug;

use parley_config::model::StorageConfig;
use parley_core::{
    AiSettings, ClarificationTicket, ConversationState, CounterStore, Customer, CustomerStore,
    InsertOutcome, Interaction, InteractionStatus, InteractionStore, InteractionUpdate, Job,
    JobKind, JobQueue, KnowledgeItem, KnowledgeStore, NewInteraction, Order, OrderStore,
    ParleyError, SellerNotification, SettingsStore, TicketStatus, TicketStore, UsageRecord,
    UsageStore, Workspace, WorkspaceStore,
};

use crate::database::{Database, map_tr_err};
use crate::queries;

/// SQLite-backed store.
///
/// Wraps a [`Database`] handle and delegates every operation to the typed
/// query modules. Cloning shares the underlying connection.
#[derive(Clone)]
pub struct SqliteStore {
    db: Database,
}

impl SqliteStore {
    /// Opens the database named in `config`, running pending migrations.
    pub async fn open(config: &StorageConfig) -> Result<Self, ParleyError> {
        let db = Database::open(&config.database_path, config.wal_mode).await?;
        Ok(Self { db })
    }

    pub async fn in_memory() -> Result<Self, ParleyError> {
        Ok(Self {
            db: Database::open_in_memory().await?,
        })
    }

    pub fn from_database(db: Database) -> Self {
        Self { db }
    }

    pub fn database(&self) -> &Database {
        &self.db
    }

    /// Runs a trivial query to prove the connection is alive.
    pub async fn health_check(&self) -> Result<(), ParleyError> {
        self.db
            .connection()
            .call(|conn| {
                conn.execute_batch("SELECT 1;")?;
                Ok(())
            })
            .await
            .map_err(map_tr_err)
    }

    pub async fn close(self) -> Result<(), ParleyError> {
        debug!("closing sqlite store");
        self.db.close().await
    }

    /// Returns jobs whose lease lapsed to the queue, and releases the
    /// interaction claims those jobs held.
    pub async fn requeue_stale(&self) -> Result<usize, ParleyError> {
        let released = queries::interactions::release_stale_claims(&self.db).await?;
        if released > 0 {
            debug!(count = released, "released stale interaction claims");
        }
        queries::jobs::requeue_stale(&self.db).await
    }

    pub async fn pending_jobs(&self, kind: JobKind) -> Result<i64, ParleyError> {
        queries::jobs::pending_count(&self.db, kind).await
    }

    pub async fn items_missing_embedding(
        &self,
        workspace_id: &str,
    ) -> Result<Vec<KnowledgeItem>, ParleyError> {
        queries::knowledge::items_missing_embedding(&self.db, workspace_id).await
    }

    pub async fn set_embedding(&self, item_id: &str, embedding: &[f32]) -> Result<(), ParleyError> {
        queries::knowledge::set_embedding(&self.db, item_id, embedding).await
    }

    pub async fn purge_expired_counters(&self) -> Result<usize, ParleyError> {
        queries::counters::purge_expired(&self.db).await
    }
}

#[async_trait]
impl WorkspaceStore for SqliteStore {
    async fn get_workspace(&self, id: &str) -> Result<Option<Workspace>, ParleyError> {
        queries::workspaces::get_workspace(&self.db, id).await
    }

    async fn upsert_workspace(&self, workspace: &Workspace) -> Result<(), ParleyError> {
        queries::workspaces::upsert_workspace(&self.db, workspace).await
    }
}

#[async_trait]
impl InteractionStore for SqliteStore {
    async fn insert_inbound(&self, new: NewInteraction) -> Result<InsertOutcome, ParleyError> {
        queries::interactions::insert_inbound(&self.db, new).await
    }

    async fn get_interaction(&self, id: &str) -> Result<Option<Interaction>, ParleyError> {
        queries::interactions::get_interaction(&self.db, id).await
    }

    async fn claim_interaction(&self, id: &str) -> Result<bool, ParleyError> {
        queries::interactions::claim_interaction(&self.db, id).await
    }

    async fn release_interaction(&self, id: &str) -> Result<(), ParleyError> {
        queries::interactions::release_interaction(&self.db, id).await
    }

    async fn complete_interaction(
        &self,
        id: &str,
        update: InteractionUpdate,
    ) -> Result<(), ParleyError> {
        queries::interactions::complete_interaction(&self.db, id, update).await
    }

    async fn set_interaction_status(
        &self,
        id: &str,
        status: InteractionStatus,
    ) -> Result<(), ParleyError> {
        queries::interactions::set_interaction_status(&self.db, id, status).await
    }

    async fn recent_interactions(
        &self,
        customer_id: &str,
        limit: usize,
    ) -> Result<Vec<Interaction>, ParleyError> {
        queries::interactions::recent_interactions(&self.db, customer_id, limit).await
    }
}

#[async_trait]
impl CustomerStore for SqliteStore {
    async fn get_customer(&self, id: &str) -> Result<Option<Customer>, ParleyError> {
        queries::customers::get_customer(&self.db, id).await
    }

    async fn find_or_create_customer(
        &self,
        workspace_id: &str,
        platform: &str,
        platform_user_id: &str,
        display_name: Option<&str>,
    ) -> Result<Customer, ParleyError> {
        queries::customers::find_or_create_customer(
            &self.db,
            workspace_id,
            platform,
            platform_user_id,
            display_name,
        )
        .await
    }

    async fn save_conversation_state(
        &self,
        customer_id: &str,
        state: &ConversationState,
    ) -> Result<(), ParleyError> {
        queries::customers::save_conversation_state(&self.db, customer_id, state).await
    }

    async fn set_ai_paused(&self, customer_id: &str, paused: bool) -> Result<(), ParleyError> {
        queries::customers::set_ai_paused(&self.db, customer_id, paused).await
    }

    async fn set_locale(&self, customer_id: &str, locale: &str) -> Result<(), ParleyError> {
        queries::customers::set_locale(&self.db, customer_id, locale).await
    }

    async fn record_activity(
        &self,
        customer_id: &str,
        at: DateTime<Utc>,
        preview: &str,
    ) -> Result<(), ParleyError> {
        queries::customers::record_activity(&self.db, customer_id, at, preview).await
    }

    async fn set_preference_summary(
        &self,
        customer_id: &str,
        summary: &str,
    ) -> Result<(), ParleyError> {
        queries::customers::set_preference_summary(&self.db, customer_id, summary).await
    }
}

#[async_trait]
impl KnowledgeStore for SqliteStore {
    async fn vector_search(
        &self,
        workspace_id: &str,
        embedding: &[f32],
        floor: f32,
        limit: usize,
    ) -> Result<Vec<(KnowledgeItem, f32)>, ParleyError> {
        queries::knowledge::vector_search(&self.db, workspace_id, embedding, floor, limit).await
    }

    async fn keyword_search(
        &self,
        workspace_id: &str,
        terms: &[String],
        limit: usize,
    ) -> Result<Vec<KnowledgeItem>, ParleyError> {
        queries::knowledge::keyword_search(&self.db, workspace_id, terms, limit).await
    }

    async fn get_items(
        &self,
        workspace_id: &str,
        ids: &[String],
    ) -> Result<Vec<KnowledgeItem>, ParleyError> {
        queries::knowledge::get_items(&self.db, workspace_id, ids).await
    }

    async fn find_active_by_name(
        &self,
        workspace_id: &str,
        name: &str,
    ) -> Result<Option<KnowledgeItem>, ParleyError> {
        queries::knowledge::find_active_by_name(&self.db, workspace_id, name).await
    }

    async fn insert_item(&self, item: &KnowledgeItem) -> Result<(), ParleyError> {
        queries::knowledge::insert_item(&self.db, item).await
    }

    async fn supersede_item(
        &self,
        old_id: &str,
        replacement: &KnowledgeItem,
    ) -> Result<bool, ParleyError> {
        queries::knowledge::supersede_item(&self.db, old_id, replacement).await
    }

    async fn link_related(&self, a: &str, b: &str) -> Result<(), ParleyError> {
        queries::knowledge::link_related(&self.db, a, b).await
    }
}

#[async_trait]
impl TicketStore for SqliteStore {
    async fn create_ticket(&self, ticket: &ClarificationTicket) -> Result<(), ParleyError> {
        queries::tickets::create_ticket(&self.db, ticket).await
    }

    async fn get_ticket(&self, id: &str) -> Result<Option<ClarificationTicket>, ParleyError> {
        queries::tickets::get_ticket(&self.db, id).await
    }

    async fn close_ticket(
        &self,
        id: &str,
        status: TicketStatus,
        answer: Option<&str>,
    ) -> Result<bool, ParleyError> {
        queries::tickets::close_ticket(&self.db, id, status, answer).await
    }
}

#[async_trait]
impl OrderStore for SqliteStore {
    async fn create_order_with_notification(
        &self,
        order: &Order,
        notification: &SellerNotification,
    ) -> Result<(), ParleyError> {
        queries::orders::create_order_with_notification(&self.db, order, notification).await
    }

    async fn find_order(
        &self,
        workspace_id: &str,
        reference: &str,
    ) -> Result<Option<Order>, ParleyError> {
        queries::orders::find_order(&self.db, workspace_id, reference).await
    }

    async fn insert_notification(
        &self,
        notification: &SellerNotification,
    ) -> Result<(), ParleyError> {
        queries::orders::insert_notification(&self.db, notification).await
    }
}

#[async_trait]
impl SettingsStore for SqliteStore {
    async fn get_ai_settings(&self, workspace_id: &str) -> Result<Option<AiSettings>, ParleyError> {
        queries::workspaces::get_ai_settings(&self.db, workspace_id).await
    }

    async fn put_ai_settings(&self, settings: &AiSettings) -> Result<(), ParleyError> {
        queries::workspaces::put_ai_settings(&self.db, settings).await
    }
}

#[async_trait]
impl UsageStore for SqliteStore {
    async fn record_usage(&self, record: &UsageRecord) -> Result<(), ParleyError> {
        queries::usage::record_usage(&self.db, record).await
    }

    async fn month_to_date_tokens(
        &self,
        workspace_id: &str,
        now: DateTime<Utc>,
    ) -> Result<u64, ParleyError> {
        queries::usage::month_to_date_tokens(&self.db, workspace_id, now).await
    }
}

#[async_trait]
impl JobQueue for SqliteStore {
    async fn enqueue(
        &self,
        kind: JobKind,
        payload: serde_json::Value,
        max_attempts: u32,
    ) -> Result<i64, ParleyError> {
        queries::jobs::enqueue(&self.db, kind, &payload, max_attempts).await
    }

    async fn dequeue(&self, kind: JobKind) -> Result<Option<Job>, ParleyError> {
        queries::jobs::dequeue(&self.db, kind).await
    }

    async fn ack(&self, job_id: i64) -> Result<(), ParleyError> {
        queries::jobs::ack(&self.db, job_id).await
    }

    async fn fail(&self, job_id: i64, error: &str) -> Result<(), ParleyError> {
        queries::jobs::fail(&self.db, job_id, error).await
    }
}

#[async_trait]
impl CounterStore for SqliteStore {
    async fn incr_with_ttl(&self, key: &str, ttl: Duration) -> Result<i64, ParleyError> {
        queries::counters::incr_with_ttl(&self.db, key, ttl).await
    }

    async fn incr(&self, key: &str) -> Result<i64, ParleyError> {
        queries::counters::incr(&self.db, key).await
    }

    async fn get(&self, key: &str) -> Result<Option<i64>, ParleyError> {
        queries::counters::get(&self.db, key).await
    }

    async fn set(&self, key: &str, value: i64, ttl: Option<Duration>) -> Result<(), ParleyError> {
        queries::counters::set(&self.db, key, value, ttl).await
    }

    async fn delete(&self, key: &str) -> Result<(), ParleyError> {
        queries::counters::delete(&self.db, key).await
    }
}
