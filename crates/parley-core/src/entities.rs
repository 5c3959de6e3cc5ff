// SPDX-FileCopyrightText: 2026 Parley Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Persisted domain entities.

use std::collections::BTreeMap;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};

use crate::conversation::ConversationState;
use crate::error::ParleyError;
use crate::types::{BotRole, Intent, ProviderKind};

/// Free-form structured annotations stored alongside an interaction.
pub type Meta = serde_json::Map<String, serde_json::Value>;

/// Workspace id under which the fallback [`AiSettings`] record is stored.
pub const GLOBAL_SETTINGS_ID: &str = "global";

fn new_id() -> String {
    uuid::Uuid::new_v4().to_string()
}

// --- Workspace ---

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Default, Display, EnumString, Serialize, Deserialize,
)]
#[strum(serialize_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum WorkspaceStatus {
    #[default]
    Active,
    Suspended,
}

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Default, Display, EnumString, Serialize, Deserialize,
)]
#[strum(serialize_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum Plan {
    #[default]
    Free,
    Paid,
}

/// How the customer bot presents itself.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Persona {
    pub business_name: String,
    pub industry: String,
    pub tone: String,
    pub audience: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Workspace {
    pub id: String,
    pub persona: Persona,
    /// Global AI kill switch for the whole workspace.
    pub ai_paused: bool,
    pub status: WorkspaceStatus,
    pub ai_blocked: bool,
    pub plan: Plan,
    pub trial_ends_at: Option<DateTime<Utc>>,
    /// Month-to-date token ceiling. `None` means unlimited.
    pub monthly_token_limit: Option<u64>,
    pub created_at: DateTime<Utc>,
}

impl Workspace {
    pub fn new(id: impl Into<String>, business_name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            persona: Persona {
                business_name: business_name.into(),
                industry: String::new(),
                tone: "friendly".into(),
                audience: String::new(),
            },
            ai_paused: false,
            status: WorkspaceStatus::Active,
            ai_blocked: false,
            plan: Plan::Paid,
            trial_ends_at: None,
            monthly_token_limit: None,
            created_at: Utc::now(),
        }
    }
}

// --- Interaction ---

/// Lifecycle of an inbound message.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Display, EnumString, Serialize, Deserialize,
)]
#[strum(serialize_all = "SCREAMING_SNAKE_CASE")]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum InteractionStatus {
    Pending,
    /// Claimed by a running processor.
    Processing,
    Processed,
    NeedsReview,
    Failed,
    Ignored,
    ActionRequired,
    Resolved,
}

impl InteractionStatus {
    pub fn can_transition_to(&self, next: InteractionStatus) -> bool {
        use InteractionStatus::*;
        match self {
            Pending => matches!(
                next,
                Processing | Processed | NeedsReview | Failed | Ignored | ActionRequired
            ),
            Processing => matches!(
                next,
                Pending | Processed | NeedsReview | Failed | Ignored | ActionRequired
            ),
            NeedsReview | ActionRequired => matches!(next, Resolved),
            Processed | Failed | Ignored | Resolved => false,
        }
    }
}

/// An inbound message as delivered by the webhook collaborator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewInteraction {
    pub workspace_id: String,
    pub platform: String,
    /// Platform message id. Unique per workspace.
    pub external_id: String,
    pub conversation_id: Option<String>,
    pub author_id: String,
    pub author_name: Option<String>,
    pub content: String,
}

/// Result of an idempotent insert keyed on (workspace, external id).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InsertOutcome {
    Created(String),
    Duplicate(String),
}

impl InsertOutcome {
    pub fn id(&self) -> &str {
        match self {
            Self::Created(id) | Self::Duplicate(id) => id,
        }
    }

    pub fn is_created(&self) -> bool {
        matches!(self, Self::Created(_))
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Interaction {
    pub id: String,
    pub workspace_id: String,
    pub platform: String,
    pub external_id: String,
    pub conversation_id: Option<String>,
    pub author_id: String,
    pub author_name: Option<String>,
    pub customer_id: Option<String>,
    pub content: String,
    pub response: Option<String>,
    pub status: InteractionStatus,
    pub meta: Meta,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Interaction {
    pub fn from_new(new: NewInteraction) -> Self {
        let now = Utc::now();
        Self {
            id: new_id(),
            workspace_id: new.workspace_id,
            platform: new.platform,
            external_id: new.external_id,
            conversation_id: new.conversation_id,
            author_id: new.author_id,
            author_name: new.author_name,
            customer_id: None,
            content: new.content,
            response: None,
            status: InteractionStatus::Pending,
            meta: Meta::new(),
            created_at: now,
            updated_at: now,
        }
    }
}

/// The processor's final write for an interaction.
#[derive(Debug, Clone, PartialEq)]
pub struct InteractionUpdate {
    pub status: InteractionStatus,
    pub customer_id: Option<String>,
    pub response: Option<String>,
    pub meta: Meta,
}

// --- Customer ---

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Customer {
    pub id: String,
    pub workspace_id: String,
    pub platform: String,
    pub platform_user_id: String,
    pub display_name: Option<String>,
    /// Human takeover: the bot stays silent while set.
    pub ai_paused: bool,
    pub state: ConversationState,
    /// Detected ISO-639-1 language of the customer's recent messages.
    pub locale: Option<String>,
    pub preference_summary: Option<String>,
    pub last_message_at: Option<DateTime<Utc>>,
    pub last_message_preview: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Customer {
    pub fn new(
        workspace_id: impl Into<String>,
        platform: impl Into<String>,
        platform_user_id: impl Into<String>,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: new_id(),
            workspace_id: workspace_id.into(),
            platform: platform.into(),
            platform_user_id: platform_user_id.into(),
            display_name: None,
            ai_paused: false,
            state: ConversationState::Idle,
            locale: None,
            preference_summary: None,
            last_message_at: None,
            last_message_preview: None,
            created_at: now,
            updated_at: now,
        }
    }
}

// --- Knowledge ---

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Default, Display, EnumString, Serialize, Deserialize,
)]
#[strum(serialize_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum KnowledgeSource {
    #[default]
    Manual,
    Escalation,
    Ingestion,
}

/// A reusable business fact.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct KnowledgeItem {
    pub id: String,
    pub workspace_id: String,
    pub name: String,
    pub content: String,
    pub category: String,
    /// Structured facts (price, size, duration) rendered as `key: value` lines.
    pub meta: BTreeMap<String, String>,
    #[serde(skip)]
    pub embedding: Option<Vec<f32>>,
    /// Weak references to accessories/variants. Never owning.
    pub related_item_ids: Vec<String>,
    pub expires_at: Option<DateTime<Utc>>,
    pub deprecated: bool,
    pub superseded_by: Option<String>,
    pub source: KnowledgeSource,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// How a freshly taught fact relates to a stored one with the same name.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FactComparison {
    /// Nothing new; keep the stored item.
    Duplicate,
    /// Different content or a contradicting structured field.
    Conflict,
}

impl KnowledgeItem {
    pub fn new(
        workspace_id: impl Into<String>,
        name: impl Into<String>,
        content: impl Into<String>,
        category: impl Into<String>,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: new_id(),
            workspace_id: workspace_id.into(),
            name: name.into(),
            content: content.into(),
            category: category.into(),
            meta: BTreeMap::new(),
            embedding: None,
            related_item_ids: Vec::new(),
            expires_at: None,
            deprecated: false,
            superseded_by: None,
            source: KnowledgeSource::Manual,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires_at.is_some_and(|at| at <= now)
    }

    pub fn is_active(&self, now: DateTime<Utc>) -> bool {
        !self.deprecated && !self.is_expired(now)
    }

    /// Renders structured meta as `key: value` lines in key order.
    pub fn render_meta(&self) -> String {
        self.meta
            .iter()
            .map(|(k, v)| format!("{k}: {v}"))
            .collect::<Vec<_>>()
            .join("\n")
    }

    pub fn compare(&self, incoming: &KnowledgeItem) -> FactComparison {
        let same_content = normalize(&self.content) == normalize(&incoming.content);
        let meta_covered = incoming
            .meta
            .iter()
            .all(|(k, v)| self.meta.get(k).is_some_and(|old| normalize(old) == normalize(v)));
        if same_content && meta_covered {
            FactComparison::Duplicate
        } else {
            FactComparison::Conflict
        }
    }
}

fn normalize(s: &str) -> String {
    s.split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .to_lowercase()
}

// --- Clarification tickets ---

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Display, EnumString, Serialize, Deserialize,
)]
#[strum(serialize_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum TicketStatus {
    Open,
    Resolved,
    Dismissed,
}

/// A question the assistant could not answer confidently.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClarificationTicket {
    pub id: String,
    pub workspace_id: String,
    pub interaction_id: String,
    pub customer_id: String,
    /// Exact customer text that triggered the escalation.
    pub customer_message: String,
    pub intent: Intent,
    /// Question shown to the human.
    pub question: String,
    pub status: TicketStatus,
    pub answer: Option<String>,
    pub created_at: DateTime<Utc>,
    pub resolved_at: Option<DateTime<Utc>>,
}

impl ClarificationTicket {
    pub fn open(
        workspace_id: impl Into<String>,
        interaction_id: impl Into<String>,
        customer_id: impl Into<String>,
        customer_message: impl Into<String>,
        intent: Intent,
        question: impl Into<String>,
    ) -> Self {
        Self {
            id: new_id(),
            workspace_id: workspace_id.into(),
            interaction_id: interaction_id.into(),
            customer_id: customer_id.into(),
            customer_message: customer_message.into(),
            intent,
            question: question.into(),
            status: TicketStatus::Open,
            answer: None,
            created_at: Utc::now(),
            resolved_at: None,
        }
    }
}

// --- Orders ---

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Display, EnumString, Serialize, Deserialize,
)]
#[strum(serialize_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum OrderKind {
    Product,
    Booking,
    Call,
}

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Display, EnumString, Serialize, Deserialize,
)]
#[strum(serialize_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum OrderStatus {
    Pending,
    Confirmed,
    Cancelled,
}

/// An order, booking or call-back request captured from a conversation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Order {
    pub id: String,
    pub workspace_id: String,
    pub customer_id: String,
    /// Short code the customer can quote back.
    pub reference: String,
    pub kind: OrderKind,
    pub summary: String,
    pub fields: BTreeMap<String, String>,
    pub amount: Option<f64>,
    pub currency: Option<String>,
    pub status: OrderStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Order {
    pub fn new(
        workspace_id: impl Into<String>,
        customer_id: impl Into<String>,
        kind: OrderKind,
        summary: impl Into<String>,
    ) -> Self {
        let id = new_id();
        let reference = format!(
            "{}-{}",
            match kind {
                OrderKind::Product => "ORD",
                OrderKind::Booking => "BKG",
                OrderKind::Call => "CALL",
            },
            id.replace('-', "")[..8].to_uppercase()
        );
        let now = Utc::now();
        Self {
            id,
            workspace_id: workspace_id.into(),
            customer_id: customer_id.into(),
            reference,
            kind,
            summary: summary.into(),
            fields: BTreeMap::new(),
            amount: None,
            currency: None,
            status: OrderStatus::Pending,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn with_field(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.fields.insert(key.into(), value.into());
        self
    }

    /// Only `pending -> confirmed | cancelled` is allowed.
    pub fn transition(&mut self, to: OrderStatus) -> Result<(), ParleyError> {
        if self.status != OrderStatus::Pending || to == OrderStatus::Pending {
            return Err(ParleyError::Validation(format!(
                "order {} cannot move from {} to {to}",
                self.reference, self.status
            )));
        }
        self.status = to;
        self.updated_at = Utc::now();
        Ok(())
    }
}

/// Inbox entry for the business owner.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SellerNotification {
    pub id: String,
    pub workspace_id: String,
    pub kind: String,
    pub title: String,
    pub body: String,
    pub related_id: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl SellerNotification {
    pub fn new(
        workspace_id: impl Into<String>,
        kind: impl Into<String>,
        title: impl Into<String>,
        body: impl Into<String>,
    ) -> Self {
        Self {
            id: new_id(),
            workspace_id: workspace_id.into(),
            kind: kind.into(),
            title: title.into(),
            body: body.into(),
            related_id: None,
            created_at: Utc::now(),
        }
    }
}

// --- AI settings ---

#[derive(Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ProviderCredentials {
    pub api_key: Option<String>,
    pub model: Option<String>,
    pub embedding_model: Option<String>,
    pub base_url: Option<String>,
}

impl std::fmt::Debug for ProviderCredentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProviderCredentials")
            .field("api_key", &self.api_key.as_ref().map(|_| "[REDACTED]"))
            .field("model", &self.model)
            .field("embedding_model", &self.embedding_model)
            .field("base_url", &self.base_url)
            .finish()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Backoff {
    Exponential { base_ms: u64, max_ms: u64 },
    Fixed { delay_ms: u64 },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetryPolicy {
    /// Total attempts per chain member, including the first.
    pub attempts: u32,
    pub backoff: Backoff,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            attempts: 3,
            backoff: Backoff::Exponential {
                base_ms: 250,
                max_ms: 4_000,
            },
        }
    }
}

impl RetryPolicy {
    /// Delay before retry number `retry` (1-based).
    pub fn delay_for(&self, retry: u32) -> Duration {
        match self.backoff {
            Backoff::Fixed { delay_ms } => Duration::from_millis(delay_ms),
            Backoff::Exponential { base_ms, max_ms } => {
                let factor = 2u64.saturating_pow(retry.saturating_sub(1));
                Duration::from_millis(base_ms.saturating_mul(factor).min(max_ms))
            }
        }
    }
}

/// Per-minute limits applied by the runtime and the processor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RateLimits {
    pub llm_calls_per_minute: u64,
    pub outbound_per_minute: u64,
    pub inbound_per_author_per_minute: u64,
}

impl Default for RateLimits {
    fn default() -> Self {
        Self {
            llm_calls_per_minute: 120,
            outbound_per_minute: 60,
            inbound_per_author_per_minute: 12,
        }
    }
}

/// Per-workspace LLM policy. A record stored under [`GLOBAL_SETTINGS_ID`]
/// applies to workspaces without their own.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AiSettings {
    pub workspace_id: String,
    pub coach_provider: ProviderKind,
    pub customer_provider: ProviderKind,
    /// Bring-your-own-keys: only `credentials` may be used.
    pub byok: bool,
    pub credentials: BTreeMap<ProviderKind, ProviderCredentials>,
    pub temperature: f32,
    pub max_tokens: u32,
    pub retry: RetryPolicy,
    pub rate_limits: RateLimits,
    pub updated_at: DateTime<Utc>,
}

impl AiSettings {
    pub fn new(workspace_id: impl Into<String>, provider: ProviderKind) -> Self {
        Self {
            workspace_id: workspace_id.into(),
            coach_provider: provider,
            customer_provider: provider,
            byok: false,
            credentials: BTreeMap::new(),
            temperature: 0.3,
            max_tokens: 1024,
            retry: RetryPolicy::default(),
            rate_limits: RateLimits::default(),
            updated_at: Utc::now(),
        }
    }

    pub fn primary_for(&self, role: BotRole) -> ProviderKind {
        match role {
            BotRole::Coach => self.coach_provider,
            BotRole::Customer => self.customer_provider,
        }
    }

    /// A workspace has configured a provider when it supplied a key
    /// (or the provider needs none and has an entry).
    pub fn has_credentials(&self, kind: ProviderKind) -> bool {
        self.credentials
            .get(&kind)
            .is_some_and(|c| c.api_key.is_some() || !kind.requires_api_key())
    }
}

// --- Usage ---

/// One successful provider call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UsageRecord {
    pub workspace_id: String,
    pub role: BotRole,
    pub provider: ProviderKind,
    pub model: String,
    pub input_tokens: u32,
    pub output_tokens: u32,
    pub latency_ms: u64,
    pub success: bool,
    pub created_at: DateTime<Utc>,
}

// --- Jobs ---

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Display, EnumString, Serialize, Deserialize,
)]
#[strum(serialize_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum JobKind {
    Process,
    InitialSync,
    IngestItem,
    IngestBatch,
    RefreshEmbeddings,
    SummarizeProfile,
    ProactiveNotification,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Job {
    pub id: i64,
    pub kind: JobKind,
    pub payload: serde_json::Value,
    pub attempts: u32,
    pub max_attempts: u32,
    pub created_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn interaction_status_lifecycle() {
        use InteractionStatus::*;
        assert!(Pending.can_transition_to(Processed));
        assert!(Pending.can_transition_to(NeedsReview));
        assert!(NeedsReview.can_transition_to(Resolved));
        assert!(ActionRequired.can_transition_to(Resolved));
        assert!(!Processed.can_transition_to(Failed));
        assert!(!Pending.can_transition_to(Resolved));
        assert!(Pending.can_transition_to(Processing));
        assert!(Processing.can_transition_to(Pending));
        assert!(!Processing.can_transition_to(Resolved));
        assert_eq!(NeedsReview.to_string(), "NEEDS_REVIEW");
    }

    #[test]
    fn order_status_only_leaves_pending_once() {
        let mut order = Order::new("ws", "cust", OrderKind::Booking, "Haircut");
        assert!(order.reference.starts_with("BKG-"));
        order.transition(OrderStatus::Confirmed).unwrap();
        assert!(order.transition(OrderStatus::Cancelled).is_err());
    }

    #[test]
    fn expired_items_are_inactive() {
        let now = Utc::now();
        let mut item = KnowledgeItem::new("ws", "Summer Sale", "20% off", "promotion");
        assert!(item.is_active(now));
        item.expires_at = Some(now - chrono::Duration::hours(1));
        assert!(!item.is_active(now));
        item.expires_at = None;
        item.deprecated = true;
        assert!(!item.is_active(now));
    }

    #[test]
    fn fact_comparison_detects_price_conflict() {
        let mut stored = KnowledgeItem::new("ws", "Red Scarf", "Wool scarf", "product");
        stored.meta.insert("price".into(), "$25".into());

        let mut same = stored.clone();
        same.content = "  wool   SCARF ".into();
        assert_eq!(stored.compare(&same), FactComparison::Duplicate);

        let mut cheaper = stored.clone();
        cheaper.meta.insert("price".into(), "$20".into());
        assert_eq!(stored.compare(&cheaper), FactComparison::Conflict);
    }

    #[test]
    fn meta_renders_as_key_value_lines() {
        let mut item = KnowledgeItem::new("ws", "Red Scarf", "$25", "product");
        item.meta.insert("price".into(), "$25".into());
        item.meta.insert("color".into(), "red".into());
        assert_eq!(item.render_meta(), "color: red\nprice: $25");
    }

    #[test]
    fn exponential_backoff_is_capped() {
        let policy = RetryPolicy {
            attempts: 5,
            backoff: Backoff::Exponential {
                base_ms: 100,
                max_ms: 300,
            },
        };
        assert_eq!(policy.delay_for(1), Duration::from_millis(100));
        assert_eq!(policy.delay_for(2), Duration::from_millis(200));
        assert_eq!(policy.delay_for(3), Duration::from_millis(300));
        assert_eq!(policy.delay_for(30), Duration::from_millis(300));
    }

    #[test]
    fn credentials_debug_redacts_key() {
        let creds = ProviderCredentials {
            api_key: Some("sk-secret".into()),
            ..Default::default()
        };
        let rendered = format!("{creds:?}");
        assert!(!rendered.contains("sk-secret"));
        assert!(rendered.contains("REDACTED"));
    }
}
