// SPDX-FileCopyrightText: 2026 Parley Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Routing low-confidence turns to a human, and learning from the answer.

use std::sync::Arc;

use parley_config::model::EscalationConfig;
use parley_core::{
    CallContext, ChatMessage, ChatRequest, ClarificationTicket, ConversationState, Customer,
    CustomerStore, Intent, Interaction, InteractionStatus, InteractionStore, KnowledgeSource,
    LanguageModel, OrderStore, ParleyError, SellerNotification, TicketStatus, TicketStore,
};
use parley_knowledge::{KnowledgeCurator, TeachOutcome};
use tracing::{debug, info, warn};

use crate::prompts::TICKET_QUESTION_PROMPT;

/// The pure escalation rule.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct EscalationPolicy {
    pub high_confidence: f32,
    pub low_confidence: f32,
}

impl EscalationPolicy {
    pub fn new(config: &EscalationConfig) -> Self {
        Self {
            high_confidence: config.high_confidence,
            low_confidence: config.low_confidence,
        }
    }

    /// Greetings and thanks never escalate. At or above the high threshold
    /// nothing escalates. Below it, a flagged turn or one under the low
    /// threshold does.
    pub fn should_escalate(&self, confidence: f32, intent: Intent, flagged: bool) -> bool {
        if !intent.is_actionable() {
            return false;
        }
        let confidence = if confidence.is_finite() { confidence } else { 0.0 };
        if confidence >= self.high_confidence {
            return false;
        }
        flagged || confidence < self.low_confidence
    }
}

/// What resolving a ticket changed.
#[derive(Debug, Clone)]
pub struct Resolution {
    pub ticket: ClarificationTicket,
    pub customer: Option<Customer>,
    pub taught: TeachOutcome,
}

pub struct EscalationStores {
    pub tickets: Arc<dyn TicketStore>,
    pub customers: Arc<dyn CustomerStore>,
    pub interactions: Arc<dyn InteractionStore>,
    pub orders: Arc<dyn OrderStore>,
}

pub struct EscalationManager {
    stores: EscalationStores,
    curator: Arc<KnowledgeCurator>,
    llm: Arc<dyn LanguageModel>,
    config: EscalationConfig,
    policy: EscalationPolicy,
}

impl EscalationManager {
    pub fn new(
        stores: EscalationStores,
        curator: Arc<KnowledgeCurator>,
        llm: Arc<dyn LanguageModel>,
        config: EscalationConfig,
    ) -> Self {
        let policy = EscalationPolicy::new(&config);
        Self {
            stores,
            curator,
            llm,
            config,
            policy,
        }
    }

    pub fn policy(&self) -> EscalationPolicy {
        self.policy
    }

    pub fn config(&self) -> &EscalationConfig {
        &self.config
    }

    /// Opens a ticket for a turn the assistant could not answer.
    pub async fn open_ticket(
        &self,
        interaction: &Interaction,
        customer: &Customer,
        intent: Intent,
    ) -> Result<ClarificationTicket, ParleyError> {
        let question = self
            .question_for(&interaction.workspace_id, &interaction.content, intent)
            .await;
        let ticket = ClarificationTicket::open(
            &interaction.workspace_id,
            &interaction.id,
            &customer.id,
            &interaction.content,
            intent,
            question,
        );
        self.stores.tickets.create_ticket(&ticket).await?;

        let mut notification = SellerNotification::new(
            &interaction.workspace_id,
            "clarification_needed",
            "A customer question needs your answer",
            ticket.question.clone(),
        );
        notification.related_id = Some(ticket.id.clone());
        if let Err(e) = self.stores.orders.insert_notification(&notification).await {
            warn!(ticket_id = %ticket.id, error = %e, "failed to notify seller of ticket");
        }

        if self.config.pause_on_escalation {
            self.stores.customers.set_ai_paused(&customer.id, true).await?;
        }
        info!(
            workspace_id = %ticket.workspace_id,
            ticket_id = %ticket.id,
            intent = %intent,
            "clarification ticket opened"
        );
        Ok(ticket)
    }

    /// Teaches the knowledge base from a human answer, closes the ticket
    /// and hands the conversation back to the assistant.
    pub async fn resolve(&self, ticket_id: &str, answer: &str) -> Result<Resolution, ParleyError> {
        if answer.trim().is_empty() {
            return Err(ParleyError::Validation("answer must not be empty".into()));
        }
        let ticket = self.open_ticket_by_id(ticket_id).await?;

        let taught = self
            .curator
            .learn_from_answer(
                &ticket.workspace_id,
                &ticket.customer_message,
                answer,
                KnowledgeSource::Escalation,
            )
            .await?;

        if !self
            .stores
            .tickets
            .close_ticket(ticket_id, TicketStatus::Resolved, Some(answer))
            .await?
        {
            debug!(ticket_id, "ticket closed concurrently");
        }
        self.settle(&ticket).await?;
        let customer = self.resume_customer(&ticket.customer_id).await?;

        info!(
            ticket_id,
            created = taught.created.len(),
            superseded = taught.superseded.len(),
            "clarification ticket resolved"
        );
        let mut ticket = ticket;
        ticket.status = TicketStatus::Resolved;
        ticket.answer = Some(answer.to_string());
        Ok(Resolution {
            ticket,
            customer,
            taught,
        })
    }

    /// Closes a ticket without teaching anything.
    pub async fn dismiss(&self, ticket_id: &str) -> Result<ClarificationTicket, ParleyError> {
        let mut ticket = self.open_ticket_by_id(ticket_id).await?;
        self.stores
            .tickets
            .close_ticket(ticket_id, TicketStatus::Dismissed, None)
            .await?;
        self.settle(&ticket).await?;
        self.resume_customer(&ticket.customer_id).await?;
        ticket.status = TicketStatus::Dismissed;
        info!(ticket_id, "clarification ticket dismissed");
        Ok(ticket)
    }

    async fn open_ticket_by_id(&self, ticket_id: &str) -> Result<ClarificationTicket, ParleyError> {
        let ticket = self
            .stores
            .tickets
            .get_ticket(ticket_id)
            .await?
            .ok_or_else(|| ParleyError::not_found("ticket", ticket_id))?;
        if ticket.status != TicketStatus::Open {
            return Err(ParleyError::Validation(format!(
                "ticket {ticket_id} is already {}",
                ticket.status
            )));
        }
        Ok(ticket)
    }

    /// Moves the escalated interaction out of review.
    async fn settle(&self, ticket: &ClarificationTicket) -> Result<(), ParleyError> {
        let Some(interaction) = self
            .stores
            .interactions
            .get_interaction(&ticket.interaction_id)
            .await?
        else {
            return Ok(());
        };
        if interaction
            .status
            .can_transition_to(InteractionStatus::Resolved)
        {
            self.stores
                .interactions
                .set_interaction_status(&interaction.id, InteractionStatus::Resolved)
                .await?;
        }
        Ok(())
    }

    async fn resume_customer(&self, customer_id: &str) -> Result<Option<Customer>, ParleyError> {
        let Some(mut customer) = self.stores.customers.get_customer(customer_id).await? else {
            return Ok(None);
        };
        if customer.ai_paused {
            self.stores.customers.set_ai_paused(customer_id, false).await?;
            customer.ai_paused = false;
        }
        if customer.state == ConversationState::HumanTakeover {
            self.stores
                .customers
                .save_conversation_state(customer_id, &ConversationState::Idle)
                .await?;
            customer.state = ConversationState::Idle;
        }
        Ok(Some(customer))
    }

    async fn question_for(&self, workspace_id: &str, message: &str, intent: Intent) -> String {
        let fallback = format!(
            "How should we answer this {} question: \"{}\"?",
            intent.to_string().replace('_', " "),
            message.trim()
        );
        let request = ChatRequest::new(vec![
            ChatMessage::system(TICKET_QUESTION_PROMPT),
            ChatMessage::user(format!("Intent: {intent}\nCustomer message: {message}")),
        ])
        .with_temperature(0.2);
        match self.llm.chat(&CallContext::coach(workspace_id), request).await {
            Ok(r) if !r.content.trim().is_empty() => r.content.trim().to_string(),
            Ok(_) => fallback,
            Err(e) => {
                debug!(workspace_id, error = %e, "ticket question generation failed");
                fallback
            }
        }
    }
}
