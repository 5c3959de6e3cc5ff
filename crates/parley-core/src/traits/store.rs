// SPDX-FileCopyrightText: 2026 Parley Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Persistence traits, one per entity family.

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::conversation::ConversationState;
use crate::entities::{
    AiSettings, ClarificationTicket, Customer, InsertOutcome, Interaction, InteractionStatus,
    InteractionUpdate, KnowledgeItem, NewInteraction, Order, SellerNotification, TicketStatus,
    UsageRecord, Workspace,
};
use crate::error::ParleyError;

#[async_trait]
pub trait WorkspaceStore: Send + Sync {
    async fn get_workspace(&self, id: &str) -> Result<Option<Workspace>, ParleyError>;

    async fn upsert_workspace(&self, workspace: &Workspace) -> Result<(), ParleyError>;
}

#[async_trait]
pub trait InteractionStore: Send + Sync {
    /// Inserts unless (workspace, external id) already exists.
    async fn insert_inbound(&self, new: NewInteraction) -> Result<InsertOutcome, ParleyError>;

    async fn get_interaction(&self, id: &str) -> Result<Option<Interaction>, ParleyError>;

    /// Atomically moves a `PENDING` interaction to `PROCESSING`.
    ///
    /// Returns `false` when the interaction is missing or not pending, so at
    /// most one caller ever runs it.
    async fn claim_interaction(&self, id: &str) -> Result<bool, ParleyError>;

    /// Returns a claimed interaction to `PENDING`. No-op unless it is still
    /// `PROCESSING`.
    async fn release_interaction(&self, id: &str) -> Result<(), ParleyError>;

    /// Writes the final status, response and meta of an interaction.
    async fn complete_interaction(
        &self,
        id: &str,
        update: InteractionUpdate,
    ) -> Result<(), ParleyError>;

    async fn set_interaction_status(
        &self,
        id: &str,
        status: InteractionStatus,
    ) -> Result<(), ParleyError>;

    /// Latest `limit` interactions of a customer, oldest first.
    async fn recent_interactions(
        &self,
        customer_id: &str,
        limit: usize,
    ) -> Result<Vec<Interaction>, ParleyError>;
}

#[async_trait]
pub trait CustomerStore: Send + Sync {
    async fn get_customer(&self, id: &str) -> Result<Option<Customer>, ParleyError>;

    /// Returns the customer for (workspace, platform identity), creating it on first contact.
    async fn find_or_create_customer(
        &self,
        workspace_id: &str,
        platform: &str,
        platform_user_id: &str,
        display_name: Option<&str>,
    ) -> Result<Customer, ParleyError>;

    async fn save_conversation_state(
        &self,
        customer_id: &str,
        state: &ConversationState,
    ) -> Result<(), ParleyError>;

    async fn set_ai_paused(&self, customer_id: &str, paused: bool) -> Result<(), ParleyError>;

    async fn set_locale(&self, customer_id: &str, locale: &str) -> Result<(), ParleyError>;

    /// Inbox metadata: last activity time and a preview of the last message.
    async fn record_activity(
        &self,
        customer_id: &str,
        at: DateTime<Utc>,
        preview: &str,
    ) -> Result<(), ParleyError>;

    /// Replaces the rolling summary of the customer's stated preferences.
    async fn set_preference_summary(
        &self,
        customer_id: &str,
        summary: &str,
    ) -> Result<(), ParleyError>;
}

#[async_trait]
pub trait KnowledgeStore: Send + Sync {
    /// Cosine-ranked search over non-deprecated items of a workspace,
    /// returning only items with similarity at or above `floor`.
    async fn vector_search(
        &self,
        workspace_id: &str,
        embedding: &[f32],
        floor: f32,
        limit: usize,
    ) -> Result<Vec<(KnowledgeItem, f32)>, ParleyError>;

    /// Items whose name or content match any of `terms`.
    async fn keyword_search(
        &self,
        workspace_id: &str,
        terms: &[String],
        limit: usize,
    ) -> Result<Vec<KnowledgeItem>, ParleyError>;

    async fn get_items(
        &self,
        workspace_id: &str,
        ids: &[String],
    ) -> Result<Vec<KnowledgeItem>, ParleyError>;

    /// The active item with this name (case-insensitive), if any.
    async fn find_active_by_name(
        &self,
        workspace_id: &str,
        name: &str,
    ) -> Result<Option<KnowledgeItem>, ParleyError>;

    async fn insert_item(&self, item: &KnowledgeItem) -> Result<(), ParleyError>;

    /// In one transaction: flags `old_id` deprecated (pointing at the new
    /// item) and inserts `replacement`. Returns false when `old_id` was
    /// already deprecated; the replacement is inserted either way.
    async fn supersede_item(
        &self,
        old_id: &str,
        replacement: &KnowledgeItem,
    ) -> Result<bool, ParleyError>;

    /// Adds a weak cross-reference in both directions.
    async fn link_related(&self, a: &str, b: &str) -> Result<(), ParleyError>;
}

#[async_trait]
pub trait TicketStore: Send + Sync {
    async fn create_ticket(&self, ticket: &ClarificationTicket) -> Result<(), ParleyError>;

    async fn get_ticket(&self, id: &str) -> Result<Option<ClarificationTicket>, ParleyError>;

    /// Moves an open ticket to a terminal status. Returns false if it was
    /// not open.
    async fn close_ticket(
        &self,
        id: &str,
        status: TicketStatus,
        answer: Option<&str>,
    ) -> Result<bool, ParleyError>;
}

#[async_trait]
pub trait OrderStore: Send + Sync {
    /// Writes the order and the seller notification atomically.
    async fn create_order_with_notification(
        &self,
        order: &Order,
        notification: &SellerNotification,
    ) -> Result<(), ParleyError>;

    async fn find_order(
        &self,
        workspace_id: &str,
        reference: &str,
    ) -> Result<Option<Order>, ParleyError>;

    async fn insert_notification(
        &self,
        notification: &SellerNotification,
    ) -> Result<(), ParleyError>;
}

#[async_trait]
pub trait SettingsStore: Send + Sync {
    async fn get_ai_settings(&self, workspace_id: &str) -> Result<Option<AiSettings>, ParleyError>;

    async fn put_ai_settings(&self, settings: &AiSettings) -> Result<(), ParleyError>;
}

#[async_trait]
pub trait UsageStore: Send + Sync {
    async fn record_usage(&self, record: &UsageRecord) -> Result<(), ParleyError>;

    /// Sum of input and output tokens since the start of `now`'s calendar month (UTC).
    async fn month_to_date_tokens(
        &self,
        workspace_id: &str,
        now: DateTime<Utc>,
    ) -> Result<u64, ParleyError>;
}
