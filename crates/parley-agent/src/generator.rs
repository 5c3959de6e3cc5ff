// SPDX-FileCopyrightText: 2026 Parley Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Knowledge-grounded reply generation with a bounded tool loop.

use std::str::FromStr;
use std::sync::{Arc, LazyLock};

use parley_core::{
    CallContext, ChatMessage, ChatRequest, Customer, Intent, LanguageModel, ParleyError,
    SuggestedAction, ToolCall, Workspace, parse_model_json,
};
use parley_knowledge::Retrieval;
use regex::Regex;
use serde::Deserialize;
use tracing::{debug, warn};

use crate::leaked_calls::extract_structured_calls;
use crate::prompts::{GeneratorPrompt, NOTIFICATION_PROMPT, PROMPT_CANARY};
use crate::tools::{ToolContext, ToolRegistry, ToolResult};

/// Model round trips that may request tools before a final answer is forced.
pub const MAX_TOOL_ROUNDS: usize = 2;

/// Confidence ceiling for answers produced without any knowledge.
pub const NO_KNOWLEDGE_CONFIDENCE: f32 = 0.3;

pub const APOLOGY_REPLY: &str =
    "Sorry, I couldn't put an answer together just now. A team member will follow up shortly.";

pub const SAFE_FALLBACK_REPLY: &str =
    "I can help with questions about our products, prices, delivery and bookings. What would you like to know?";

pub struct GenerationInput<'a> {
    pub workspace: &'a Workspace,
    pub customer: &'a Customer,
    pub interaction_id: &'a str,
    pub message: &'a str,
    pub intent: Intent,
    pub retrieval: &'a Retrieval,
    /// Earlier turns, oldest first.
    pub history: &'a [ChatMessage],
    /// The business owner is testing the assistant.
    pub simulation: bool,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct GeneratedReply {
    pub reply: String,
    pub confidence: f32,
    pub used_knowledge_ids: Vec<String>,
    pub detected_categories: Vec<String>,
    pub needs_clarification: bool,
    pub suggested_actions: Vec<SuggestedAction>,
    /// Every tool call executed while producing the reply.
    pub tool_results: Vec<(ToolCall, ToolResult)>,
    /// The final model output could not be decoded.
    pub parse_failed: bool,
}

impl GeneratedReply {
    pub fn asks_for_human(&self) -> bool {
        self.needs_clarification
            || self
                .suggested_actions
                .contains(&SuggestedAction::EscalateToHuman)
    }
}

#[derive(Debug, Default, Deserialize)]
struct RawReply {
    #[serde(default)]
    reply: String,
    #[serde(default)]
    confidence: f32,
    #[serde(default, alias = "usedKnowledgeIds")]
    used_knowledge_ids: Vec<String>,
    #[serde(default, alias = "detectedCategories")]
    detected_categories: Vec<String>,
    #[serde(default, alias = "needsClarification")]
    needs_clarification: bool,
    #[serde(default, alias = "suggestedActions")]
    suggested_actions: Vec<String>,
}

static MD_LINK: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\[([^\]]+)\]\((\S+?)\)").expect("valid regex"));
static HTML_TAG: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"</?[a-zA-Z][^>]*>").expect("valid regex"));
static LINE_MARKER: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?m)^\s*(?:#{1,6}\s+|[-*•]\s+|>\s?)").expect("valid regex"));
static EMPHASIS: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\*\*|__|`+|~~").expect("valid regex"));

/// Reduces markdown or HTML to plain text suitable for SMS-like channels.
pub fn strip_markup(text: &str) -> String {
    let text = MD_LINK.replace_all(text, "$1 $2");
    let text = HTML_TAG.replace_all(&text, "");
    let text = LINE_MARKER.replace_all(&text, "");
    let text = EMPHASIS.replace_all(&text, "");
    text.lines()
        .map(|l| l.split_whitespace().collect::<Vec<_>>().join(" "))
        .filter(|l| !l.is_empty())
        .collect::<Vec<_>>()
        .join("\n")
}

fn is_answer_object(content: &str) -> bool {
    parse_model_json::<serde_json::Value>("reply", content)
        .map(|v| v.get("reply").is_some())
        .unwrap_or(false)
}

fn leaks_prompt(reply: &str) -> bool {
    reply.contains(PROMPT_CANARY) || (reply.contains("KNOWLEDGE:") && reply.contains("Rules:"))
}

pub struct ResponseGenerator {
    llm: Arc<dyn LanguageModel>,
    tools: Arc<ToolRegistry>,
}

impl ResponseGenerator {
    pub fn new(llm: Arc<dyn LanguageModel>, tools: Arc<ToolRegistry>) -> Self {
        Self { llm, tools }
    }

    /// Produces a validated reply. Provider errors propagate; malformed
    /// output becomes an apology with zero confidence.
    pub async fn generate(&self, input: GenerationInput<'_>) -> Result<GeneratedReply, ParleyError> {
        let workspace_id = input.workspace.id.as_str();
        let ctx = CallContext::customer(workspace_id);
        let tool_ctx = ToolContext {
            workspace_id: workspace_id.to_string(),
            customer_id: input.customer.id.clone(),
            interaction_id: input.interaction_id.to_string(),
        };
        let tool_names = self.tools.names();
        let system = GeneratorPrompt {
            persona: &input.workspace.persona,
            intent: input.intent,
            items: &input.retrieval.items,
            ambiguous: input.retrieval.ambiguous,
            simulation: input.simulation,
            preference_summary: input.customer.preference_summary.as_deref(),
        }
        .render();

        let mut messages = Vec::with_capacity(input.history.len() + 2);
        messages.push(ChatMessage::system(system));
        messages.extend(input.history.iter().cloned());
        messages.push(ChatMessage::user(input.message));

        let mut tool_results = Vec::new();
        let mut content = String::new();
        let mut last_round_calls = Vec::new();
        for round in 0..=MAX_TOOL_ROUNDS {
            let mut request = ChatRequest::new(messages.clone()).json();
            if round < MAX_TOOL_ROUNDS && !self.tools.is_empty() {
                request = request.with_tools(self.tools.definitions());
            }
            let response = self.llm.chat(&ctx, request).await?;

            let mut calls = response.tool_calls;
            content = response.content;
            // a well-formed answer object is scanned field by field below
            if !is_answer_object(&content) {
                let (leaked, cleaned) = extract_structured_calls(&content, &tool_names);
                if !leaked.is_empty() {
                    debug!(workspace_id, count = leaked.len(), "recovered leaked tool calls");
                    calls.extend(leaked);
                    content = cleaned;
                }
            }

            if calls.is_empty() {
                break;
            }
            if round == MAX_TOOL_ROUNDS {
                last_round_calls = calls;
                break;
            }
            let mut assistant = ChatMessage::assistant(content.clone());
            assistant.tool_calls = calls.clone();
            messages.push(assistant);
            for call in calls {
                let result = self.tools.execute(&call, &tool_ctx).await;
                messages.push(ChatMessage::tool_result(&call.id, result.for_model()));
                tool_results.push((call, result));
            }
        }

        // no round is left to phrase these results; they run like calls
        // found inside the reply
        if !last_round_calls.is_empty() {
            debug!(workspace_id, count = last_round_calls.len(), "running tool calls from the final round");
        }
        for call in last_round_calls {
            let result = self.tools.execute(&call, &tool_ctx).await;
            tool_results.push((call, result));
        }

        let mut raw = match parse_model_json::<RawReply>("reply", &content) {
            Ok(raw) => raw,
            Err(e) => {
                warn!(workspace_id, error = %e, "generator output was not valid JSON");
                return Ok(GeneratedReply {
                    reply: APOLOGY_REPLY.to_string(),
                    needs_clarification: true,
                    tool_results,
                    parse_failed: true,
                    ..GeneratedReply::default()
                });
            }
        };

        // calls hidden inside the reply field run too, without another round
        let (late_calls, cleaned) = extract_structured_calls(&raw.reply, &tool_names);
        if !late_calls.is_empty() {
            raw.reply = cleaned;
            for call in late_calls {
                let result = self.tools.execute(&call, &tool_ctx).await;
                tool_results.push((call, result));
            }
        }

        let mut reply = post_validate(raw, input.intent, input.retrieval);
        reply.tool_results = tool_results;
        Ok(reply)
    }

    /// Phrases a system event (such as a seller confirming an order) for the
    /// customer, in the customer's language when known.
    pub async fn compose_notification(
        &self,
        workspace: &Workspace,
        customer: &Customer,
        history: &[ChatMessage],
        event: &str,
        note: Option<&str>,
    ) -> Result<String, ParleyError> {
        let mut system = format!(
            "{NOTIFICATION_PROMPT}\nYou write for {}.",
            workspace.persona.business_name
        );
        if let Some(locale) = customer.locale.as_deref() {
            system.push_str(&format!(" Write in the language with ISO-639-1 code \"{locale}\"."));
        }
        let mut user = format!("Update: {event}");
        if let Some(note) = note.filter(|n| !n.trim().is_empty()) {
            user.push_str(&format!("\nNote from the business: {note}"));
        }

        let mut messages = vec![ChatMessage::system(system)];
        messages.extend(history.iter().cloned());
        messages.push(ChatMessage::user(user));
        let response = self
            .llm
            .chat(
                &CallContext::customer(&workspace.id),
                ChatRequest::new(messages),
            )
            .await?;
        let text = strip_markup(&response.content);
        if text.is_empty() || leaks_prompt(&text) {
            return Err(ParleyError::parse("notification", "empty or unsafe text"));
        }
        Ok(text)
    }
}

fn post_validate(raw: RawReply, intent: Intent, retrieval: &Retrieval) -> GeneratedReply {
    let mut confidence = if raw.confidence.is_finite() {
        raw.confidence.clamp(0.0, 1.0)
    } else {
        0.0
    };

    let mut used_knowledge_ids: Vec<String> = Vec::new();
    for id in raw.used_knowledge_ids {
        if retrieval.contains(&id) && !used_knowledge_ids.contains(&id) {
            used_knowledge_ids.push(id);
        }
    }

    let mut suggested_actions: Vec<SuggestedAction> = Vec::new();
    for label in &raw.suggested_actions {
        match SuggestedAction::from_str(label.trim()) {
            Ok(action) if !suggested_actions.contains(&action) => suggested_actions.push(action),
            Ok(_) => {}
            Err(_) => debug!(label = %label, "ignoring unknown suggested action"),
        }
    }

    let detected_categories = raw
        .detected_categories
        .iter()
        .map(|c| c.trim().to_lowercase())
        .filter(|c| !c.is_empty())
        .collect();

    let mut needs_clarification = raw.needs_clarification;
    let mut reply = strip_markup(&raw.reply);

    if leaks_prompt(&reply) {
        warn!("generator reply echoed the system prompt, replacing it");
        reply = SAFE_FALLBACK_REPLY.to_string();
        confidence = 0.0;
        needs_clarification = true;
        used_knowledge_ids.clear();
    }

    if retrieval.is_empty() && intent.is_actionable() {
        needs_clarification = true;
        confidence = confidence.min(NO_KNOWLEDGE_CONFIDENCE);
        used_knowledge_ids.clear();
        if !suggested_actions.contains(&SuggestedAction::EscalateToHuman) {
            suggested_actions.push(SuggestedAction::EscalateToHuman);
        }
    }

    if reply.is_empty() {
        reply = APOLOGY_REPLY.to_string();
        confidence = 0.0;
        needs_clarification = true;
    }

    GeneratedReply {
        reply,
        confidence,
        used_knowledge_ids,
        detected_categories,
        needs_clarification,
        suggested_actions,
        tool_results: Vec::new(),
        parse_failed: false,
    }
}
