// SPDX-FileCopyrightText: 2026 Parley Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! In-memory store with the same observable semantics as [`SqliteStore`].
//!
//! Used by unit tests across the workspace and by the test harness. Nothing
//! is persisted.
//!
//! [`SqliteStore`]: crate::SqliteStore

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::Mutex;

use parley_core::{
    AiSettings, ClarificationTicket, ConversationState, Customer, CustomerStore, InsertOutcome,
    Interaction, InteractionStatus, InteractionStore, InteractionUpdate, Job, JobKind, JobQueue,
    KnowledgeItem, KnowledgeStore, NewInteraction, Order, OrderStore, ParleyError,
    SellerNotification, SettingsStore, TicketStatus, TicketStore, UsageRecord, UsageStore,
    Workspace, WorkspaceStore,
};

use crate::codec::cosine_similarity;
use crate::queries::usage::month_start;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum JobState {
    Pending,
    Processing,
    Completed,
    Failed,
}

#[derive(Debug, Clone)]
struct JobRow {
    job: Job,
    state: JobState,
    last_error: Option<String>,
}

#[derive(Default)]
struct Tables {
    workspaces: HashMap<String, Workspace>,
    settings: HashMap<String, AiSettings>,
    interactions: Vec<Interaction>,
    customers: Vec<Customer>,
    knowledge: Vec<KnowledgeItem>,
    tickets: HashMap<String, ClarificationTicket>,
    orders: Vec<Order>,
    notifications: Vec<SellerNotification>,
    usage: Vec<UsageRecord>,
    jobs: Vec<JobRow>,
}

impl Tables {
    fn customer_mut(&mut self, id: &str) -> Result<&mut Customer, ParleyError> {
        self.customers
            .iter_mut()
            .find(|c| c.id == id)
            .ok_or_else(|| ParleyError::not_found("customer", id))
    }

    fn job_mut(&mut self, id: i64) -> Result<&mut JobRow, ParleyError> {
        self.jobs
            .iter_mut()
            .find(|j| j.job.id == id)
            .ok_or_else(|| ParleyError::not_found("job", id.to_string()))
    }
}

/// Mutex-guarded tables. Cheap to share behind an `Arc`.
#[derive(Default)]
pub struct MemoryStore {
    tables: Mutex<Tables>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn notifications(&self, workspace_id: &str) -> Vec<SellerNotification> {
        let t = self.tables.lock().await;
        t.notifications
            .iter()
            .filter(|n| n.workspace_id == workspace_id)
            .cloned()
            .collect()
    }

    pub async fn orders(&self, workspace_id: &str) -> Vec<Order> {
        let t = self.tables.lock().await;
        t.orders
            .iter()
            .filter(|o| o.workspace_id == workspace_id)
            .cloned()
            .collect()
    }

    pub async fn tickets(&self, workspace_id: &str) -> Vec<ClarificationTicket> {
        let t = self.tables.lock().await;
        let mut tickets: Vec<_> = t
            .tickets
            .values()
            .filter(|ticket| ticket.workspace_id == workspace_id)
            .cloned()
            .collect();
        tickets.sort_by_key(|ticket| ticket.created_at);
        tickets
    }

    pub async fn usage(&self) -> Vec<UsageRecord> {
        self.tables.lock().await.usage.clone()
    }

    /// Every stored item of a workspace, including deprecated ones.
    pub async fn all_items(&self, workspace_id: &str) -> Vec<KnowledgeItem> {
        let t = self.tables.lock().await;
        t.knowledge
            .iter()
            .filter(|k| k.workspace_id == workspace_id)
            .cloned()
            .collect()
    }

    /// Status label of a job, matching the SQLite column values.
    pub async fn job_status(&self, id: i64) -> Option<&'static str> {
        let t = self.tables.lock().await;
        t.jobs.iter().find(|j| j.job.id == id).map(|j| match j.state {
            JobState::Pending => "pending",
            JobState::Processing => "processing",
            JobState::Completed => "completed",
            JobState::Failed => "failed",
        })
    }

    pub async fn last_job_error(&self, id: i64) -> Option<String> {
        let t = self.tables.lock().await;
        t.jobs
            .iter()
            .find(|j| j.job.id == id)
            .and_then(|j| j.last_error.clone())
    }

    pub async fn pending_jobs(&self, kind: JobKind) -> usize {
        let t = self.tables.lock().await;
        t.jobs
            .iter()
            .filter(|j| j.job.kind == kind && j.state == JobState::Pending)
            .count()
    }
}

#[async_trait]
impl WorkspaceStore for MemoryStore {
    async fn get_workspace(&self, id: &str) -> Result<Option<Workspace>, ParleyError> {
        Ok(self.tables.lock().await.workspaces.get(id).cloned())
    }

    async fn upsert_workspace(&self, workspace: &Workspace) -> Result<(), ParleyError> {
        self.tables
            .lock()
            .await
            .workspaces
            .insert(workspace.id.clone(), workspace.clone());
        Ok(())
    }
}

#[async_trait]
impl InteractionStore for MemoryStore {
    async fn insert_inbound(&self, new: NewInteraction) -> Result<InsertOutcome, ParleyError> {
        let mut t = self.tables.lock().await;
        if let Some(existing) = t
            .interactions
            .iter()
            .find(|i| i.workspace_id == new.workspace_id && i.external_id == new.external_id)
        {
            return Ok(InsertOutcome::Duplicate(existing.id.clone()));
        }
        let interaction = Interaction::from_new(new);
        let id = interaction.id.clone();
        t.interactions.push(interaction);
        Ok(InsertOutcome::Created(id))
    }

    async fn get_interaction(&self, id: &str) -> Result<Option<Interaction>, ParleyError> {
        let t = self.tables.lock().await;
        Ok(t.interactions.iter().find(|i| i.id == id).cloned())
    }

    async fn claim_interaction(&self, id: &str) -> Result<bool, ParleyError> {
        let mut t = self.tables.lock().await;
        let Some(i) = t.interactions.iter_mut().find(|i| i.id == id) else {
            return Ok(false);
        };
        if i.status != InteractionStatus::Pending {
            return Ok(false);
        }
        i.status = InteractionStatus::Processing;
        i.updated_at = Utc::now();
        Ok(true)
    }

    async fn release_interaction(&self, id: &str) -> Result<(), ParleyError> {
        let mut t = self.tables.lock().await;
        if let Some(i) = t
            .interactions
            .iter_mut()
            .find(|i| i.id == id && i.status == InteractionStatus::Processing)
        {
            i.status = InteractionStatus::Pending;
            i.updated_at = Utc::now();
        }
        Ok(())
    }

    async fn complete_interaction(
        &self,
        id: &str,
        update: InteractionUpdate,
    ) -> Result<(), ParleyError> {
        let mut t = self.tables.lock().await;
        let i = t
            .interactions
            .iter_mut()
            .find(|i| i.id == id)
            .ok_or_else(|| ParleyError::not_found("interaction", id))?;
        i.status = update.status;
        if update.customer_id.is_some() {
            i.customer_id = update.customer_id;
        }
        i.response = update.response;
        i.meta = update.meta;
        i.updated_at = Utc::now();
        Ok(())
    }

    async fn set_interaction_status(
        &self,
        id: &str,
        status: InteractionStatus,
    ) -> Result<(), ParleyError> {
        let mut t = self.tables.lock().await;
        let i = t
            .interactions
            .iter_mut()
            .find(|i| i.id == id)
            .ok_or_else(|| ParleyError::not_found("interaction", id))?;
        i.status = status;
        i.updated_at = Utc::now();
        Ok(())
    }

    async fn recent_interactions(
        &self,
        customer_id: &str,
        limit: usize,
    ) -> Result<Vec<Interaction>, ParleyError> {
        let t = self.tables.lock().await;
        let mine: Vec<_> = t
            .interactions
            .iter()
            .filter(|i| i.customer_id.as_deref() == Some(customer_id))
            .cloned()
            .collect();
        let skip = mine.len().saturating_sub(limit);
        Ok(mine.into_iter().skip(skip).collect())
    }
}

#[async_trait]
impl CustomerStore for MemoryStore {
    async fn get_customer(&self, id: &str) -> Result<Option<Customer>, ParleyError> {
        let t = self.tables.lock().await;
        Ok(t.customers.iter().find(|c| c.id == id).cloned())
    }

    async fn find_or_create_customer(
        &self,
        workspace_id: &str,
        platform: &str,
        platform_user_id: &str,
        display_name: Option<&str>,
    ) -> Result<Customer, ParleyError> {
        let mut t = self.tables.lock().await;
        if let Some(c) = t.customers.iter_mut().find(|c| {
            c.workspace_id == workspace_id
                && c.platform == platform
                && c.platform_user_id == platform_user_id
        }) {
            if c.display_name.is_none() && display_name.is_some() {
                c.display_name = display_name.map(str::to_string);
            }
            return Ok(c.clone());
        }
        let mut fresh = Customer::new(workspace_id, platform, platform_user_id);
        fresh.display_name = display_name.map(str::to_string);
        t.customers.push(fresh.clone());
        Ok(fresh)
    }

    async fn save_conversation_state(
        &self,
        customer_id: &str,
        state: &ConversationState,
    ) -> Result<(), ParleyError> {
        let mut t = self.tables.lock().await;
        let c = t.customer_mut(customer_id)?;
        c.state = state.clone();
        c.updated_at = Utc::now();
        Ok(())
    }

    async fn set_ai_paused(&self, customer_id: &str, paused: bool) -> Result<(), ParleyError> {
        let mut t = self.tables.lock().await;
        let c = t.customer_mut(customer_id)?;
        c.ai_paused = paused;
        c.updated_at = Utc::now();
        Ok(())
    }

    async fn set_locale(&self, customer_id: &str, locale: &str) -> Result<(), ParleyError> {
        let mut t = self.tables.lock().await;
        let c = t.customer_mut(customer_id)?;
        c.locale = Some(locale.to_string());
        c.updated_at = Utc::now();
        Ok(())
    }

    async fn record_activity(
        &self,
        customer_id: &str,
        at: DateTime<Utc>,
        preview: &str,
    ) -> Result<(), ParleyError> {
        let mut t = self.tables.lock().await;
        if let Ok(c) = t.customer_mut(customer_id) {
            c.last_message_at = Some(at);
            c.last_message_preview = Some(preview.chars().take(120).collect());
            c.updated_at = at;
        }
        Ok(())
    }

    async fn set_preference_summary(
        &self,
        customer_id: &str,
        summary: &str,
    ) -> Result<(), ParleyError> {
        let mut t = self.tables.lock().await;
        let c = t.customer_mut(customer_id)?;
        c.preference_summary = Some(summary.to_string());
        c.updated_at = Utc::now();
        Ok(())
    }
}

fn keyword_hits(item: &KnowledgeItem, terms: &[String]) -> usize {
    let haystack = format!("{} {}", item.name, item.content).to_lowercase();
    terms
        .iter()
        .filter(|t| !t.trim().is_empty() && haystack.contains(&t.to_lowercase()))
        .count()
}

#[async_trait]
impl KnowledgeStore for MemoryStore {
    async fn vector_search(
        &self,
        workspace_id: &str,
        embedding: &[f32],
        floor: f32,
        limit: usize,
    ) -> Result<Vec<(KnowledgeItem, f32)>, ParleyError> {
        let now = Utc::now();
        let t = self.tables.lock().await;
        let mut scored: Vec<(KnowledgeItem, f32)> = t
            .knowledge
            .iter()
            .filter(|k| k.workspace_id == workspace_id && k.is_active(now))
            .filter_map(|k| {
                let sim = cosine_similarity(k.embedding.as_deref()?, embedding);
                (sim >= floor).then(|| (k.clone(), sim))
            })
            .collect();
        scored.sort_by(|a, b| b.1.total_cmp(&a.1));
        scored.truncate(limit);
        Ok(scored)
    }

    async fn keyword_search(
        &self,
        workspace_id: &str,
        terms: &[String],
        limit: usize,
    ) -> Result<Vec<KnowledgeItem>, ParleyError> {
        let now = Utc::now();
        let t = self.tables.lock().await;
        let mut hits: Vec<(usize, &KnowledgeItem)> = t
            .knowledge
            .iter()
            .filter(|k| k.workspace_id == workspace_id && k.is_active(now))
            .map(|k| (keyword_hits(k, terms), k))
            .filter(|(hits, _)| *hits > 0)
            .collect();
        hits.sort_by(|a, b| b.0.cmp(&a.0));
        Ok(hits
            .into_iter()
            .take(limit)
            .map(|(_, k)| k.clone())
            .collect())
    }

    async fn get_items(
        &self,
        workspace_id: &str,
        ids: &[String],
    ) -> Result<Vec<KnowledgeItem>, ParleyError> {
        let now = Utc::now();
        let t = self.tables.lock().await;
        Ok(t.knowledge
            .iter()
            .filter(|k| k.workspace_id == workspace_id && k.is_active(now) && ids.contains(&k.id))
            .cloned()
            .collect())
    }

    async fn find_active_by_name(
        &self,
        workspace_id: &str,
        name: &str,
    ) -> Result<Option<KnowledgeItem>, ParleyError> {
        let now = Utc::now();
        let name = name.trim().to_lowercase();
        let t = self.tables.lock().await;
        Ok(t.knowledge
            .iter()
            .filter(|k| {
                k.workspace_id == workspace_id
                    && k.is_active(now)
                    && k.name.to_lowercase() == name
            })
            .max_by_key(|k| k.updated_at)
            .cloned())
    }

    async fn insert_item(&self, item: &KnowledgeItem) -> Result<(), ParleyError> {
        let mut t = self.tables.lock().await;
        if t.knowledge.iter().any(|k| k.id == item.id) {
            return Err(ParleyError::Validation(format!(
                "knowledge item {} already exists",
                item.id
            )));
        }
        t.knowledge.push(item.clone());
        Ok(())
    }

    async fn supersede_item(
        &self,
        old_id: &str,
        replacement: &KnowledgeItem,
    ) -> Result<bool, ParleyError> {
        let mut t = self.tables.lock().await;
        if t.knowledge.iter().any(|k| k.id == replacement.id) {
            return Err(ParleyError::Validation(format!(
                "knowledge item {} already exists",
                replacement.id
            )));
        }
        let mut changed = false;
        if let Some(old) = t
            .knowledge
            .iter_mut()
            .find(|k| k.id == old_id && !k.deprecated)
        {
            old.deprecated = true;
            old.superseded_by = Some(replacement.id.clone());
            old.updated_at = Utc::now();
            changed = true;
        }
        t.knowledge.push(replacement.clone());
        Ok(changed)
    }

    async fn link_related(&self, a: &str, b: &str) -> Result<(), ParleyError> {
        if a == b {
            return Ok(());
        }
        let mut t = self.tables.lock().await;
        for (from, to) in [(a, b), (b, a)] {
            if let Some(item) = t.knowledge.iter_mut().find(|k| k.id == from)
                && !item.related_item_ids.iter().any(|id| id == to)
            {
                item.related_item_ids.push(to.to_string());
            }
        }
        Ok(())
    }
}

#[async_trait]
impl TicketStore for MemoryStore {
    async fn create_ticket(&self, ticket: &ClarificationTicket) -> Result<(), ParleyError> {
        self.tables
            .lock()
            .await
            .tickets
            .insert(ticket.id.clone(), ticket.clone());
        Ok(())
    }

    async fn get_ticket(&self, id: &str) -> Result<Option<ClarificationTicket>, ParleyError> {
        Ok(self.tables.lock().await.tickets.get(id).cloned())
    }

    async fn close_ticket(
        &self,
        id: &str,
        status: TicketStatus,
        answer: Option<&str>,
    ) -> Result<bool, ParleyError> {
        let mut t = self.tables.lock().await;
        let Some(ticket) = t.tickets.get_mut(id) else {
            return Ok(false);
        };
        if ticket.status != TicketStatus::Open {
            return Ok(false);
        }
        ticket.status = status;
        if let Some(answer) = answer {
            ticket.answer = Some(answer.to_string());
        }
        ticket.resolved_at = Some(Utc::now());
        Ok(true)
    }
}

#[async_trait]
impl OrderStore for MemoryStore {
    async fn create_order_with_notification(
        &self,
        order: &Order,
        notification: &SellerNotification,
    ) -> Result<(), ParleyError> {
        let mut t = self.tables.lock().await;
        if t.notifications.iter().any(|n| n.id == notification.id) {
            return Err(ParleyError::Validation(format!(
                "notification {} already exists",
                notification.id
            )));
        }
        if t.orders
            .iter()
            .any(|o| o.workspace_id == order.workspace_id && o.reference == order.reference)
        {
            return Err(ParleyError::Validation(format!(
                "order reference {} already exists",
                order.reference
            )));
        }
        t.orders.push(order.clone());
        t.notifications.push(notification.clone());
        Ok(())
    }

    async fn find_order(
        &self,
        workspace_id: &str,
        reference: &str,
    ) -> Result<Option<Order>, ParleyError> {
        let reference = reference.trim();
        let t = self.tables.lock().await;
        Ok(t.orders
            .iter()
            .find(|o| o.workspace_id == workspace_id && o.reference.eq_ignore_ascii_case(reference))
            .cloned())
    }

    async fn insert_notification(
        &self,
        notification: &SellerNotification,
    ) -> Result<(), ParleyError> {
        self.tables
            .lock()
            .await
            .notifications
            .push(notification.clone());
        Ok(())
    }
}

#[async_trait]
impl SettingsStore for MemoryStore {
    async fn get_ai_settings(&self, workspace_id: &str) -> Result<Option<AiSettings>, ParleyError> {
        Ok(self.tables.lock().await.settings.get(workspace_id).cloned())
    }

    async fn put_ai_settings(&self, settings: &AiSettings) -> Result<(), ParleyError> {
        self.tables
            .lock()
            .await
            .settings
            .insert(settings.workspace_id.clone(), settings.clone());
        Ok(())
    }
}

#[async_trait]
impl UsageStore for MemoryStore {
    async fn record_usage(&self, record: &UsageRecord) -> Result<(), ParleyError> {
        self.tables.lock().await.usage.push(record.clone());
        Ok(())
    }

    async fn month_to_date_tokens(
        &self,
        workspace_id: &str,
        now: DateTime<Utc>,
    ) -> Result<u64, ParleyError> {
        let since = month_start(now);
        let t = self.tables.lock().await;
        Ok(t.usage
            .iter()
            .filter(|r| r.workspace_id == workspace_id && r.created_at >= since)
            .map(|r| u64::from(r.input_tokens) + u64::from(r.output_tokens))
            .sum())
    }
}

#[async_trait]
impl JobQueue for MemoryStore {
    async fn enqueue(
        &self,
        kind: JobKind,
        payload: serde_json::Value,
        max_attempts: u32,
    ) -> Result<i64, ParleyError> {
        let mut t = self.tables.lock().await;
        let id = t.jobs.len() as i64 + 1;
        t.jobs.push(JobRow {
            job: Job {
                id,
                kind,
                payload,
                attempts: 0,
                max_attempts: max_attempts.max(1),
                created_at: Utc::now(),
            },
            state: JobState::Pending,
            last_error: None,
        });
        Ok(id)
    }

    async fn dequeue(&self, kind: JobKind) -> Result<Option<Job>, ParleyError> {
        let mut t = self.tables.lock().await;
        let Some(row) = t
            .jobs
            .iter_mut()
            .find(|j| j.job.kind == kind && j.state == JobState::Pending)
        else {
            return Ok(None);
        };
        row.state = JobState::Processing;
        Ok(Some(row.job.clone()))
    }

    async fn ack(&self, job_id: i64) -> Result<(), ParleyError> {
        let mut t = self.tables.lock().await;
        t.job_mut(job_id)?.state = JobState::Completed;
        Ok(())
    }

    async fn fail(&self, job_id: i64, error: &str) -> Result<(), ParleyError> {
        let mut t = self.tables.lock().await;
        let row = t.job_mut(job_id)?;
        row.job.attempts += 1;
        row.last_error = Some(error.to_string());
        row.state = if row.job.attempts >= row.job.max_attempts {
            JobState::Failed
        } else {
            JobState::Pending
        };
        Ok(())
    }
}
