// SPDX-FileCopyrightText: 2026 Parley Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Top-level control flow for one inbound interaction.
//!
//! The processor owns every agent component and drives an interaction from
//! `PENDING` to a terminal status: workspace and customer gates, the
//! conversation state machine, the classify/retrieve/generate pipeline,
//! tool side effects, escalation, outbound dispatch and the non-critical
//! follow-up work that never changes the interaction's outcome.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use futures::FutureExt;
use futures::future::{BoxFuture, join_all};
use parley_config::ParleyConfig;
use parley_core::{
    CallContext, ChatMessage, ChatRequest, ConversationState, Customer, CustomerStore,
    DenialReason, InsertOutcome, Interaction, InteractionStatus, InteractionStore,
    InteractionUpdate, JobKind, JobQueue, KnowledgeStore, LanguageModel, Messenger, Meta,
    NewInteraction, Order, OrderStore, OutboundMessage, ParleyError, SellerNotification,
    SuggestedAction, TicketStore, Workspace, WorkspaceStore,
};
use parley_knowledge::{KnowledgeRetriever, KnowledgeCurator, Retrieval, RetrievalQuery};
use parley_provider::{RateLimiter, RateScope};
use serde_json::{Value, json};
use tracing::{debug, info, warn};

use crate::classifier::{Classification, ConfirmationClassifier, IntentClassifier};
use crate::escalation::{EscalationManager, EscalationStores, Resolution};
use crate::generator::{GeneratedReply, GenerationInput, ResponseGenerator};
use crate::lock::KeyedLock;
use crate::orders::StoreOrders;
use crate::prompts::SUMMARY_PROMPT;
use crate::state_machine::{StateMachine, Step, prompt_for};
use crate::tools::{SystemAction, ToolRegistry};
use crate::translate::Translator;

const PREVIEW_CHARS: usize = 120;

/// Persistence collaborators of the processor.
#[derive(Clone)]
pub struct ProcessorStores {
    pub workspaces: Arc<dyn WorkspaceStore>,
    pub interactions: Arc<dyn InteractionStore>,
    pub customers: Arc<dyn CustomerStore>,
    pub knowledge: Arc<dyn KnowledgeStore>,
    pub tickets: Arc<dyn TicketStore>,
    pub orders: Arc<dyn OrderStore>,
    pub queue: Arc<dyn JobQueue>,
}

/// Everything the processor is built from.
pub struct ProcessorDeps {
    pub stores: ProcessorStores,
    /// Usually the provider runtime.
    pub llm: Arc<dyn LanguageModel>,
    pub limiter: RateLimiter,
    pub messengers: Vec<Arc<dyn Messenger>>,
    pub tools: Arc<ToolRegistry>,
}

/// How an interaction ended.
#[derive(Debug, Clone, PartialEq)]
pub struct ProcessOutcome {
    pub interaction_id: String,
    pub status: InteractionStatus,
    /// The text sent to the customer, if any.
    pub reply: Option<String>,
    pub ticket_id: Option<String>,
    pub order: Option<Order>,
}

impl ProcessOutcome {
    fn new(interaction_id: &str, status: InteractionStatus) -> Self {
        Self {
            interaction_id: interaction_id.to_string(),
            status,
            reply: None,
            ticket_id: None,
            order: None,
        }
    }
}

/// Maps a suggested action to the structured flow it starts.
pub fn seed_state(action: SuggestedAction) -> Option<ConversationState> {
    match action {
        SuggestedAction::OrderIntent => Some(ConversationState::CollectingOrder { product_hint: None }),
        SuggestedAction::AppointmentRequest => Some(ConversationState::CollectingService),
        SuggestedAction::CallRequest => Some(ConversationState::CollectingPhone),
        SuggestedAction::CheckOrderStatus => Some(ConversationState::AwaitingOrderId),
        SuggestedAction::EscalateToHuman => None,
    }
}

fn preview(text: &str) -> String {
    let trimmed = text.trim();
    match trimmed.char_indices().nth(PREVIEW_CHARS) {
        Some((cut, _)) => format!("{}…", &trimmed[..cut]),
        None => trimmed.to_string(),
    }
}

fn skipped(reason: &str) -> Meta {
    let mut meta = Meta::new();
    meta.insert("skip_reason".into(), json!(reason));
    meta
}

/// Pipeline result before dispatch.
struct Drafted {
    text: String,
    media: Option<Value>,
    status: InteractionStatus,
    next_state: Option<ConversationState>,
    ticket_id: Option<String>,
    send: bool,
    meta: Meta,
    co_cited: Vec<String>,
}

pub struct InteractionProcessor {
    stores: ProcessorStores,
    llm: Arc<dyn LanguageModel>,
    limiter: RateLimiter,
    messengers: HashMap<String, Arc<dyn Messenger>>,
    classifier: IntentClassifier,
    retriever: KnowledgeRetriever,
    generator: ResponseGenerator,
    escalation: EscalationManager,
    machine: StateMachine,
    translator: Translator,
    locks: KeyedLock,
    config: ParleyConfig,
}

impl InteractionProcessor {
    pub fn new(deps: ProcessorDeps, config: ParleyConfig) -> Self {
        let ProcessorDeps {
            stores,
            llm,
            limiter,
            messengers,
            tools,
        } = deps;

        let orders = Arc::new(StoreOrders::new(stores.orders.clone()));
        let machine = StateMachine::new(
            Arc::new(ConfirmationClassifier::new(llm.clone())),
            orders.clone(),
            orders,
        );
        let curator = Arc::new(KnowledgeCurator::new(stores.knowledge.clone(), llm.clone()));
        let escalation = EscalationManager::new(
            EscalationStores {
                tickets: stores.tickets.clone(),
                customers: stores.customers.clone(),
                interactions: stores.interactions.clone(),
                orders: stores.orders.clone(),
            },
            curator,
            llm.clone(),
            config.escalation.clone(),
        );

        Self {
            classifier: IntentClassifier::new(llm.clone()),
            retriever: KnowledgeRetriever::new(
                stores.knowledge.clone(),
                llm.clone(),
                config.retrieval.clone(),
            ),
            generator: ResponseGenerator::new(llm.clone(), tools),
            translator: Translator::new(llm.clone(), config.agent.base_language.clone()),
            messengers: messengers
                .into_iter()
                .map(|m| (m.platform().to_string(), m))
                .collect(),
            escalation,
            machine,
            stores,
            llm,
            limiter,
            locks: KeyedLock::new(),
            config,
        }
    }

    pub fn escalation(&self) -> &EscalationManager {
        &self.escalation
    }

    /// Records an inbound message and queues it for processing. Replayed
    /// external ids are reported as duplicates and not queued again.
    pub async fn accept_inbound(&self, new: NewInteraction) -> Result<InsertOutcome, ParleyError> {
        let outcome = self.stores.interactions.insert_inbound(new).await?;
        match &outcome {
            InsertOutcome::Created(id) => {
                let job_id = self
                    .stores
                    .queue
                    .enqueue(
                        JobKind::Process,
                        json!({ "interaction_id": id }),
                        self.config.worker.max_attempts,
                    )
                    .await?;
                debug!(interaction_id = %id, job_id, "interaction queued");
            }
            InsertOutcome::Duplicate(id) => {
                debug!(interaction_id = %id, "duplicate inbound message ignored");
            }
        }
        Ok(outcome)
    }

    /// Runs one interaction to a terminal status.
    ///
    /// The interaction is claimed in the store first. A run that loses the
    /// claim reports the current state and sends nothing. A failed run
    /// releases its claim so the job can be retried.
    pub async fn process_interaction(
        &self,
        interaction_id: &str,
    ) -> Result<ProcessOutcome, ParleyError> {
        if !self
            .stores
            .interactions
            .claim_interaction(interaction_id)
            .await?
        {
            let interaction = self
                .stores
                .interactions
                .get_interaction(interaction_id)
                .await?
                .ok_or_else(|| ParleyError::not_found("interaction", interaction_id))?;
            debug!(interaction_id, status = %interaction.status, "interaction claimed elsewhere or done");
            let mut outcome = ProcessOutcome::new(interaction_id, interaction.status);
            outcome.reply = interaction.response;
            return Ok(outcome);
        }

        let result = self.run_claimed(interaction_id).await;
        if result.is_err()
            && let Err(e) = self
                .stores
                .interactions
                .release_interaction(interaction_id)
                .await
        {
            warn!(interaction_id, error = %e, "failed to release interaction claim");
        }
        result
    }

    async fn run_claimed(&self, interaction_id: &str) -> Result<ProcessOutcome, ParleyError> {
        let interaction = self
            .stores
            .interactions
            .get_interaction(interaction_id)
            .await?
            .ok_or_else(|| ParleyError::not_found("interaction", interaction_id))?;

        let workspace = self
            .stores
            .workspaces
            .get_workspace(&interaction.workspace_id)
            .await?
            .ok_or_else(|| ParleyError::not_found("workspace", &interaction.workspace_id))?;

        let customer = self
            .stores
            .customers
            .find_or_create_customer(
                &workspace.id,
                &interaction.platform,
                &interaction.author_id,
                interaction.author_name.as_deref(),
            )
            .await?;

        if workspace.ai_paused {
            info!(interaction_id, workspace_id = %workspace.id, "AI paused for workspace, skipping");
            return self
                .finish_skipped(&interaction, &customer, "workspace_paused")
                .await;
        }

        let timeout = Duration::from_secs(self.config.worker.lock_timeout_secs);
        let _guard = self.locks.acquire(&customer.id, timeout).await?;
        // the previous holder may have moved the conversation on
        let customer = self
            .stores
            .customers
            .get_customer(&customer.id)
            .await?
            .unwrap_or(customer);

        match self
            .limiter
            .check(
                RateScope::Inbound {
                    workspace_id: &workspace.id,
                    author_id: &interaction.author_id,
                },
                self.config.limits.inbound_per_author_per_minute,
            )
            .await
        {
            Ok(()) => {}
            Err(ParleyError::RateLimited { .. }) => {
                info!(interaction_id, author_id = %interaction.author_id, "inbound rate limit hit, ignoring");
                return self
                    .finish_skipped(&interaction, &customer, "inbound_rate_limited")
                    .await;
            }
            Err(e) => return Err(e),
        }

        if customer.ai_paused {
            debug!(interaction_id, customer_id = %customer.id, "customer in human takeover, skipping");
            return self
                .finish_skipped(&interaction, &customer, "customer_paused")
                .await;
        }

        match self.machine.step(&customer, &interaction.content).await? {
            Step::Hold => {
                self.finish_skipped(&interaction, &customer, "human_takeover")
                    .await
            }
            Step::Reply { text, next, order } => {
                self.finish_state_machine(&interaction, &customer, text, next, order)
                    .await
            }
            Step::Defer => self.run_pipeline(&interaction, &workspace, customer).await,
        }
    }

    async fn finish_skipped(
        &self,
        interaction: &Interaction,
        customer: &Customer,
        reason: &str,
    ) -> Result<ProcessOutcome, ParleyError> {
        self.stores
            .interactions
            .complete_interaction(
                &interaction.id,
                InteractionUpdate {
                    status: InteractionStatus::Ignored,
                    customer_id: Some(customer.id.clone()),
                    response: None,
                    meta: skipped(reason),
                },
            )
            .await?;
        self.run_side_effects(interaction, customer, &[], false).await;
        Ok(ProcessOutcome::new(&interaction.id, InteractionStatus::Ignored))
    }

    async fn finish_state_machine(
        &self,
        interaction: &Interaction,
        customer: &Customer,
        text: String,
        next: ConversationState,
        order: Option<Order>,
    ) -> Result<ProcessOutcome, ParleyError> {
        let text = self
            .translator
            .translate(&interaction.workspace_id, &text, customer.locale.as_deref())
            .await;
        self.stores
            .customers
            .save_conversation_state(&customer.id, &next)
            .await?;

        let mut meta = Meta::new();
        meta.insert("handled_by".into(), json!("state_machine"));
        meta.insert("from_state".into(), json!(customer.state.name()));
        meta.insert("state".into(), json!(next.name()));
        if let Some(order) = &order {
            meta.insert("order_reference".into(), json!(order.reference));
        }

        let status = match self.reply_to(interaction, &text, None).await {
            Ok(_) => InteractionStatus::Processed,
            Err(e) => {
                warn!(interaction_id = %interaction.id, error = %e, "failed to send state machine reply");
                meta.insert("error_kind".into(), json!(e.kind()));
                meta.insert("error".into(), json!(e.to_string()));
                InteractionStatus::Failed
            }
        };
        self.stores
            .interactions
            .complete_interaction(
                &interaction.id,
                InteractionUpdate {
                    status,
                    customer_id: Some(customer.id.clone()),
                    response: Some(text.clone()),
                    meta,
                },
            )
            .await?;
        info!(
            interaction_id = %interaction.id,
            state = next.name(),
            status = %status,
            "state machine turn processed"
        );
        self.run_side_effects(interaction, customer, &[], true).await;

        let mut outcome = ProcessOutcome::new(&interaction.id, status);
        outcome.reply = Some(text);
        outcome.order = order;
        Ok(outcome)
    }

    async fn run_pipeline(
        &self,
        interaction: &Interaction,
        workspace: &Workspace,
        mut customer: Customer,
    ) -> Result<ProcessOutcome, ParleyError> {
        let classification = match self
            .classifier
            .classify(&workspace.id, &interaction.content)
            .await
        {
            Ok(c) => c,
            Err(ParleyError::AccessDenied { reason }) => {
                return self.finish_denied(interaction, &customer, reason).await;
            }
            Err(e) => return Err(e),
        };

        if let Some(language) = classification.language.as_deref()
            && customer.locale.as_deref() != Some(language)
        {
            self.stores
                .customers
                .set_locale(&customer.id, language)
                .await?;
            customer.locale = Some(language.to_string());
        }

        let recent = self
            .stores
            .interactions
            .recent_interactions(&customer.id, self.config.agent.history_turns + 1)
            .await?;
        let recent: Vec<&Interaction> = recent.iter().filter(|i| i.id != interaction.id).collect();
        let history = history_messages(&recent);
        let previous_reply = recent.iter().rev().find_map(|i| i.response.as_deref());

        let retrieval = self
            .retriever
            .retrieve(RetrievalQuery {
                workspace_id: &workspace.id,
                message: &interaction.content,
                intent: classification.intent,
                previous_reply,
            })
            .await;

        let generated = match self
            .generator
            .generate(GenerationInput {
                workspace,
                customer: &customer,
                interaction_id: &interaction.id,
                message: &interaction.content,
                intent: classification.intent,
                retrieval: &retrieval,
                history: &history,
                simulation: false,
            })
            .await
        {
            Ok(g) => g,
            Err(ParleyError::AccessDenied { reason }) => {
                return self.finish_denied(interaction, &customer, reason).await;
            }
            Err(e) => {
                warn!(interaction_id = %interaction.id, error = %e, "reply generation failed");
                let mut meta = classification_meta(&classification);
                meta.insert("error_kind".into(), json!(e.kind()));
                meta.insert("error".into(), json!(e.to_string()));
                self.stores
                    .interactions
                    .complete_interaction(
                        &interaction.id,
                        InteractionUpdate {
                            status: InteractionStatus::Failed,
                            customer_id: Some(customer.id.clone()),
                            response: None,
                            meta,
                        },
                    )
                    .await?;
                self.run_side_effects(interaction, &customer, &[], false).await;
                return Ok(ProcessOutcome::new(&interaction.id, InteractionStatus::Failed));
            }
        };

        let drafted = self
            .draft(interaction, &customer, &classification, &retrieval, generated)
            .await;
        let Drafted {
            text,
            media,
            mut status,
            next_state,
            ticket_id,
            send,
            mut meta,
            co_cited,
        } = drafted;

        if let Some(state) = &next_state {
            self.stores
                .customers
                .save_conversation_state(&customer.id, state)
                .await?;
            meta.insert("state".into(), json!(state.name()));
        }

        let mut sent = None;
        if send {
            match self.reply_to(interaction, &text, media).await {
                Ok(_) => sent = Some(text.clone()),
                Err(e) => {
                    warn!(interaction_id = %interaction.id, error = %e, "failed to send reply");
                    meta.insert("error_kind".into(), json!(e.kind()));
                    meta.insert("error".into(), json!(e.to_string()));
                    // an open ticket still needs review; only a plain reply fails
                    if status != InteractionStatus::NeedsReview {
                        status = InteractionStatus::Failed;
                    }
                }
            }
        }

        self.stores
            .interactions
            .complete_interaction(
                &interaction.id,
                InteractionUpdate {
                    status,
                    customer_id: Some(customer.id.clone()),
                    response: Some(text),
                    meta,
                },
            )
            .await?;
        info!(
            interaction_id = %interaction.id,
            intent = %classification.intent,
            status = %status,
            escalated = ticket_id.is_some(),
            "interaction processed"
        );

        self.run_side_effects(interaction, &customer, &co_cited, true)
            .await;

        let mut outcome = ProcessOutcome::new(&interaction.id, status);
        outcome.reply = sent;
        outcome.ticket_id = ticket_id;
        Ok(outcome)
    }

    /// Applies tool side effects, escalation and state seeding to a
    /// generated reply.
    async fn draft(
        &self,
        interaction: &Interaction,
        customer: &Customer,
        classification: &Classification,
        retrieval: &Retrieval,
        generated: GeneratedReply,
    ) -> Drafted {
        let mut meta = classification_meta(classification);
        meta.insert("confidence".into(), json!(generated.confidence));
        meta.insert(
            "used_knowledge_ids".into(),
            json!(generated.used_knowledge_ids),
        );
        meta.insert(
            "detected_categories".into(),
            json!(generated.detected_categories),
        );
        meta.insert(
            "suggested_actions".into(),
            json!(
                generated
                    .suggested_actions
                    .iter()
                    .map(|a| a.to_string())
                    .collect::<Vec<_>>()
            ),
        );
        meta.insert("retrieved".into(), json!(retrieval.items.len()));
        meta.insert("ambiguous".into(), json!(retrieval.ambiguous));
        if generated.parse_failed {
            meta.insert("error_kind".into(), json!("parse"));
        }

        let mut media = None;
        let mut next_state = None;
        let mut notified_seller = false;
        let mut tool_names = Vec::new();
        for (call, result) in &generated.tool_results {
            tool_names.push(call.name.clone());
            match &result.system_action {
                Some(SystemAction::AttachMedia { payload }) => media = Some(payload.clone()),
                Some(SystemAction::SeedState { state }) => next_state = Some(state.clone()),
                Some(SystemAction::NotifySeller { title, body }) => {
                    let mut note = SellerNotification::new(
                        &interaction.workspace_id,
                        call.name.as_str(),
                        title.as_str(),
                        body.as_str(),
                    );
                    note.related_id = Some(customer.id.clone());
                    match self.stores.orders.insert_notification(&note).await {
                        Ok(()) => notified_seller = true,
                        Err(e) => {
                            warn!(interaction_id = %interaction.id, error = %e, "failed to notify seller")
                        }
                    }
                }
                None => {}
            }
        }
        if !tool_names.is_empty() {
            meta.insert("tool_calls".into(), json!(tool_names));
        }

        let escalate = self.escalation.policy().should_escalate(
            generated.confidence,
            classification.intent,
            generated.asks_for_human(),
        );
        if escalate {
            meta.insert("escalated".into(), json!(true));
            let ticket_id = match self
                .escalation
                .open_ticket(interaction, customer, classification.intent)
                .await
            {
                Ok(ticket) => {
                    meta.insert("ticket_id".into(), json!(ticket.id));
                    Some(ticket.id)
                }
                Err(e) => {
                    warn!(interaction_id = %interaction.id, error = %e, "failed to open clarification ticket");
                    None
                }
            };
            let config = self.escalation.config();
            let text = self
                .translator
                .translate(
                    &interaction.workspace_id,
                    &config.holding_message,
                    customer.locale.as_deref(),
                )
                .await;
            return Drafted {
                text,
                media: None,
                status: InteractionStatus::NeedsReview,
                next_state: None,
                ticket_id,
                send: config.notify_customer,
                meta,
                co_cited: Vec::new(),
            };
        }

        let mut text = generated.reply;
        if next_state.is_none() && customer.state.is_idle() {
            next_state = generated.suggested_actions.iter().find_map(|a| seed_state(*a));
            if let Some(prompt) = next_state.as_ref().and_then(prompt_for) {
                let prompt = self
                    .translator
                    .translate(
                        &interaction.workspace_id,
                        &prompt,
                        customer.locale.as_deref(),
                    )
                    .await;
                text = format!("{}\n\n{prompt}", text.trim_end());
            }
        }

        Drafted {
            text,
            media,
            status: if notified_seller {
                InteractionStatus::ActionRequired
            } else {
                InteractionStatus::Processed
            },
            next_state,
            ticket_id: None,
            send: true,
            meta,
            co_cited: generated.used_knowledge_ids,
        }
    }

    async fn finish_denied(
        &self,
        interaction: &Interaction,
        customer: &Customer,
        reason: DenialReason,
    ) -> Result<ProcessOutcome, ParleyError> {
        info!(interaction_id = %interaction.id, reason = %reason, "workspace denied AI access");
        let text = reason.customer_message().to_string();
        let mut meta = Meta::new();
        meta.insert("error_kind".into(), json!("access_denied"));
        meta.insert("denial_reason".into(), json!(reason.to_string()));
        let sent = match self.reply_to(interaction, &text, None).await {
            Ok(_) => Some(text.clone()),
            Err(e) => {
                warn!(interaction_id = %interaction.id, error = %e, "failed to send unavailable notice");
                None
            }
        };
        self.stores
            .interactions
            .complete_interaction(
                &interaction.id,
                InteractionUpdate {
                    status: InteractionStatus::Failed,
                    customer_id: Some(customer.id.clone()),
                    response: Some(text),
                    meta,
                },
            )
            .await?;
        let mut outcome = ProcessOutcome::new(&interaction.id, InteractionStatus::Failed);
        outcome.reply = sent;
        Ok(outcome)
    }

    async fn reply_to(
        &self,
        interaction: &Interaction,
        text: &str,
        media: Option<Value>,
    ) -> Result<String, ParleyError> {
        let mut message = OutboundMessage::text(&interaction.author_id, text);
        message.reply_to_message_id = Some(interaction.external_id.clone());
        message.conversation_id = interaction.conversation_id.clone();
        message.media_payload = media;
        self.dispatch(&interaction.workspace_id, &interaction.platform, message)
            .await
    }

    /// Sends through the platform's messenger, honouring the outbound rate limit.
    async fn dispatch(
        &self,
        workspace_id: &str,
        platform: &str,
        message: OutboundMessage,
    ) -> Result<String, ParleyError> {
        let messenger = self
            .messengers
            .get(platform)
            .ok_or_else(|| ParleyError::Dispatch {
                platform: platform.to_string(),
                message: "no messenger registered".into(),
                source: None,
            })?;
        self.limiter
            .check(
                RateScope::Outbound { workspace_id },
                self.config.limits.outbound_per_minute,
            )
            .await?;
        let id = messenger.send(message).await?;
        debug!(workspace_id, platform, message_id = %id, "message sent");
        Ok(id)
    }

    /// Follow-up work after the interaction's status is final. Each effect
    /// fails on its own and is only logged.
    async fn run_side_effects(
        &self,
        interaction: &Interaction,
        customer: &Customer,
        co_cited: &[String],
        summarize: bool,
    ) {
        let activity = async {
            self.stores
                .customers
                .record_activity(&customer.id, Utc::now(), &preview(&interaction.content))
                .await
                .map_err(|e| ("record_activity", e))
        };
        let summary = async {
            if !summarize {
                return Ok(());
            }
            self.stores
                .queue
                .enqueue(
                    JobKind::SummarizeProfile,
                    json!({ "customer_id": customer.id, "workspace_id": customer.workspace_id }),
                    self.config.worker.max_attempts,
                )
                .await
                .map(|_| ())
                .map_err(|e| ("summarize_profile", e))
        };
        let relink = async {
            for (i, a) in co_cited.iter().enumerate() {
                for b in &co_cited[i + 1..] {
                    self.stores
                        .knowledge
                        .link_related(a, b)
                        .await
                        .map_err(|e| ("link_related", e))?;
                }
            }
            Ok::<(), (&'static str, ParleyError)>(())
        };

        let effects: Vec<BoxFuture<'_, Result<(), (&'static str, ParleyError)>>> =
            vec![activity.boxed(), summary.boxed(), relink.boxed()];
        for result in join_all(effects).await {
            if let Err((effect, e)) = result {
                warn!(interaction_id = %interaction.id, effect, error = %e, "side effect failed");
            }
        }
    }

    /// Delivers a system event (for example a seller confirming an order)
    /// into the customer's conversation. Returns the text that was sent.
    pub async fn handle_system_notification(
        &self,
        interaction_id: &str,
        event: &str,
        note: Option<&str>,
    ) -> Result<String, ParleyError> {
        let interaction = self
            .stores
            .interactions
            .get_interaction(interaction_id)
            .await?
            .ok_or_else(|| ParleyError::not_found("interaction", interaction_id))?;
        let workspace = self
            .stores
            .workspaces
            .get_workspace(&interaction.workspace_id)
            .await?
            .ok_or_else(|| ParleyError::not_found("workspace", &interaction.workspace_id))?;
        let customer = self
            .stores
            .customers
            .find_or_create_customer(
                &workspace.id,
                &interaction.platform,
                &interaction.author_id,
                interaction.author_name.as_deref(),
            )
            .await?;

        let timeout = Duration::from_secs(self.config.worker.lock_timeout_secs);
        let _guard = self.locks.acquire(&customer.id, timeout).await?;

        let recent = self
            .stores
            .interactions
            .recent_interactions(&customer.id, self.config.agent.history_turns)
            .await?;
        let history = history_messages(&recent.iter().collect::<Vec<_>>());

        let text = match self
            .generator
            .compose_notification(&workspace, &customer, &history, event, note)
            .await
        {
            Ok(text) => text,
            Err(e) if e.is_access_denied() => return Err(e),
            Err(e) => {
                warn!(interaction_id, error = %e, "notification phrasing failed, sending the event text");
                let mut raw = event.trim().to_string();
                if let Some(note) = note.filter(|n| !n.trim().is_empty()) {
                    raw.push_str(&format!(" {}", note.trim()));
                }
                self.translator
                    .translate(&workspace.id, &raw, customer.locale.as_deref())
                    .await
            }
        };

        self.reply_to(&interaction, &text, None).await?;
        self.stores
            .customers
            .record_activity(&customer.id, Utc::now(), &preview(&text))
            .await?;
        info!(interaction_id, customer_id = %customer.id, "system notification delivered");
        Ok(text)
    }

    /// Puts a seller's counter-offer to the customer and waits for yes or no.
    pub async fn offer_proposal(
        &self,
        customer_id: &str,
        item_name: &str,
        price: f64,
        currency: &str,
    ) -> Result<String, ParleyError> {
        if !(price.is_finite() && price > 0.0) {
            return Err(ParleyError::Validation(format!("invalid proposal price {price}")));
        }
        let timeout = Duration::from_secs(self.config.worker.lock_timeout_secs);
        let _guard = self.locks.acquire(customer_id, timeout).await?;
        let customer = self
            .stores
            .customers
            .get_customer(customer_id)
            .await?
            .ok_or_else(|| ParleyError::not_found("customer", customer_id))?;
        if customer.state.is_terminal() {
            return Err(ParleyError::Validation(
                "conversation is in human takeover".into(),
            ));
        }

        let state = ConversationState::AwaitingProposalResponse {
            item_name: item_name.to_string(),
            proposed_price: price,
            currency: currency.to_uppercase(),
        };
        let prompt = prompt_for(&state)
            .ok_or_else(|| ParleyError::Internal("proposal state without prompt".into()))?;
        let text = self
            .translator
            .translate(&customer.workspace_id, &prompt, customer.locale.as_deref())
            .await;

        self.stores
            .customers
            .save_conversation_state(&customer.id, &state)
            .await?;
        if let Err(e) = self
            .dispatch(
                &customer.workspace_id,
                &customer.platform,
                OutboundMessage::text(&customer.platform_user_id, &text),
            )
            .await
        {
            // the customer never saw the question
            if let Err(restore) = self
                .stores
                .customers
                .save_conversation_state(&customer.id, &customer.state)
                .await
            {
                warn!(customer_id, error = %restore, "failed to restore conversation state");
            }
            return Err(e);
        }
        info!(customer_id, item_name, price, "proposal offered");
        Ok(text)
    }

    /// Resolves a ticket with a human answer and relays the answer to the
    /// customer. A failed relay is logged; the ticket stays resolved.
    pub async fn resolve_ticket(
        &self,
        ticket_id: &str,
        answer: &str,
    ) -> Result<Resolution, ParleyError> {
        let ticket = self
            .stores
            .tickets
            .get_ticket(ticket_id)
            .await?
            .ok_or_else(|| ParleyError::not_found("ticket", ticket_id))?;
        let timeout = Duration::from_secs(self.config.worker.lock_timeout_secs);
        let _guard = self.locks.acquire(&ticket.customer_id, timeout).await?;

        let resolution = self.escalation.resolve(ticket_id, answer).await?;

        if let Some(customer) = &resolution.customer {
            let text = self
                .translator
                .translate(&customer.workspace_id, answer.trim(), customer.locale.as_deref())
                .await;
            let relay = match self
                .stores
                .interactions
                .get_interaction(&ticket.interaction_id)
                .await
            {
                Ok(Some(interaction)) => self.reply_to(&interaction, &text, None).await,
                Ok(None) => {
                    self.dispatch(
                        &customer.workspace_id,
                        &customer.platform,
                        OutboundMessage::text(&customer.platform_user_id, &text),
                    )
                    .await
                }
                Err(e) => Err(e),
            };
            if let Err(e) = relay {
                warn!(ticket_id, error = %e, "failed to relay ticket answer to customer");
            }
        }
        Ok(resolution)
    }

    pub async fn dismiss_ticket(&self, ticket_id: &str) -> Result<(), ParleyError> {
        self.escalation.dismiss(ticket_id).await.map(|_| ())
    }

    /// Marks an unfinished interaction as failed once its job gives up.
    pub async fn mark_failed(
        &self,
        interaction_id: &str,
        error: &ParleyError,
    ) -> Result<(), ParleyError> {
        let Some(interaction) = self
            .stores
            .interactions
            .get_interaction(interaction_id)
            .await?
        else {
            return Ok(());
        };
        if !matches!(
            interaction.status,
            InteractionStatus::Pending | InteractionStatus::Processing
        ) {
            return Ok(());
        }
        let mut meta = Meta::new();
        meta.insert("error_kind".into(), json!(error.kind()));
        meta.insert("error".into(), json!(error.to_string()));
        self.stores
            .interactions
            .complete_interaction(
                interaction_id,
                InteractionUpdate {
                    status: InteractionStatus::Failed,
                    customer_id: interaction.customer_id,
                    response: None,
                    meta,
                },
            )
            .await
    }

    /// Refreshes the customer's preference summary from recent messages.
    pub async fn summarize_profile(&self, customer_id: &str) -> Result<(), ParleyError> {
        let customer = self
            .stores
            .customers
            .get_customer(customer_id)
            .await?
            .ok_or_else(|| ParleyError::not_found("customer", customer_id))?;
        let recent = self
            .stores
            .interactions
            .recent_interactions(customer_id, self.config.agent.history_turns)
            .await?;
        if recent.is_empty() {
            return Ok(());
        }
        let transcript = recent
            .iter()
            .map(|i| format!("- {}", i.content.trim()))
            .collect::<Vec<_>>()
            .join("\n");
        let mut context = transcript;
        if let Some(previous) = customer.preference_summary.as_deref() {
            context = format!("Previous summary: {previous}\n\nRecent messages:\n{context}");
        }

        let response = self
            .llm
            .chat(
                &CallContext::coach(&customer.workspace_id),
                ChatRequest::new(vec![
                    ChatMessage::system(SUMMARY_PROMPT),
                    ChatMessage::user(context),
                ])
                .with_temperature(0.2),
            )
            .await?;
        let summary = response.content.trim();
        if summary.is_empty() {
            return Ok(());
        }
        self.stores
            .customers
            .set_preference_summary(customer_id, summary)
            .await?;
        debug!(customer_id, "preference summary refreshed");
        Ok(())
    }
}

fn classification_meta(classification: &Classification) -> Meta {
    let mut meta = Meta::new();
    meta.insert("handled_by".into(), json!("pipeline"));
    meta.insert("intent".into(), json!(classification.intent.to_string()));
    meta.insert(
        "intent_confidence".into(),
        json!(classification.confidence),
    );
    if let Some(language) = &classification.language {
        meta.insert("language".into(), json!(language));
    }
    meta
}

/// Earlier turns as chat messages, oldest first.
fn history_messages(recent: &[&Interaction]) -> Vec<ChatMessage> {
    let mut messages = Vec::with_capacity(recent.len() * 2);
    for interaction in recent {
        messages.push(ChatMessage::user(interaction.content.clone()));
        if let Some(response) = &interaction.response {
            messages.push(ChatMessage::assistant(response.clone()));
        }
    }
    messages
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn suggested_actions_seed_flows() {
        assert_eq!(
            seed_state(SuggestedAction::AppointmentRequest),
            Some(ConversationState::CollectingService)
        );
        assert_eq!(
            seed_state(SuggestedAction::CallRequest),
            Some(ConversationState::CollectingPhone)
        );
        assert_eq!(
            seed_state(SuggestedAction::CheckOrderStatus),
            Some(ConversationState::AwaitingOrderId)
        );
        assert!(matches!(
            seed_state(SuggestedAction::OrderIntent),
            Some(ConversationState::CollectingOrder { .. })
        ));
        assert_eq!(seed_state(SuggestedAction::EscalateToHuman), None);
    }

    #[test]
    fn preview_is_bounded() {
        assert_eq!(preview("  hi  "), "hi");
        let long = "é".repeat(300);
        let p = preview(&long);
        assert_eq!(p.chars().count(), PREVIEW_CHARS + 1);
        assert!(p.ends_with('…'));
    }

    #[test]
    fn history_alternates_roles() {
        let mut a = Interaction::from_new(NewInteraction {
            workspace_id: "ws".into(),
            platform: "instagram".into(),
            external_id: "m1".into(),
            conversation_id: None,
            author_id: "u1".into(),
            author_name: None,
            content: "hi".into(),
        });
        a.response = Some("hello!".into());
        let mut b = a.clone();
        b.content = "price?".into();
        b.response = None;
        let messages = history_messages(&[&a, &b]);
        assert_eq!(messages.len(), 3);
        assert_eq!(messages[1].content, "hello!");
        assert_eq!(messages[2].content, "price?");
    }
}
