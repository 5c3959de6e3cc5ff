// SPDX-FileCopyrightText: 2026 Parley Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Provider-facing request/response types and the closed label sets used by
//! the classifiers and the response generator.

use serde::{Deserialize, Serialize};
use strum::{Display, EnumIter, EnumString};

// --- Providers ---

/// A supported LLM backend.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    PartialOrd,
    Ord,
    Display,
    EnumString,
    EnumIter,
    Serialize,
    Deserialize,
)]
#[strum(serialize_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum ProviderKind {
    Groq,
    Deepseek,
    Gemini,
    Mistral,
    Openrouter,
    Openai,
    Ollama,
}

impl ProviderKind {
    /// Global fallback order: cheap/fast first, generalist last.
    pub const GLOBAL_ORDER: [ProviderKind; 7] = [
        ProviderKind::Groq,
        ProviderKind::Deepseek,
        ProviderKind::Gemini,
        ProviderKind::Mistral,
        ProviderKind::Openrouter,
        ProviderKind::Openai,
        ProviderKind::Ollama,
    ];

    /// Providers able to produce embeddings of the configured width, in the
    /// order they are tried when the chat provider cannot embed.
    pub const EMBEDDING_PRIORITY: [ProviderKind; 3] = [
        ProviderKind::Gemini,
        ProviderKind::Openai,
        ProviderKind::Ollama,
    ];

    pub fn supports_embedding(&self) -> bool {
        Self::EMBEDDING_PRIORITY.contains(self)
    }

    /// OpenAI-compatible API root for this backend.
    pub fn default_base_url(&self) -> &'static str {
        match self {
            ProviderKind::Groq => "https://api.groq.com/openai/v1",
            ProviderKind::Deepseek => "https://api.deepseek.com/v1",
            ProviderKind::Gemini => "https://generativelanguage.googleapis.com/v1beta/openai",
            ProviderKind::Mistral => "https://api.mistral.ai/v1",
            ProviderKind::Openrouter => "https://openrouter.ai/api/v1",
            ProviderKind::Openai => "https://api.openai.com/v1",
            ProviderKind::Ollama => "http://localhost:11434/v1",
        }
    }

    pub fn default_chat_model(&self) -> &'static str {
        match self {
            ProviderKind::Groq => "llama-3.3-70b-versatile",
            ProviderKind::Deepseek => "deepseek-chat",
            ProviderKind::Gemini => "gemini-2.0-flash",
            ProviderKind::Mistral => "mistral-small-latest",
            ProviderKind::Openrouter => "openai/gpt-4o-mini",
            ProviderKind::Openai => "gpt-4o-mini",
            ProviderKind::Ollama => "llama3.1",
        }
    }

    pub fn default_embedding_model(&self) -> Option<&'static str> {
        match self {
            ProviderKind::Gemini => Some("text-embedding-004"),
            ProviderKind::Openai => Some("text-embedding-3-small"),
            ProviderKind::Ollama => Some("nomic-embed-text"),
            _ => None,
        }
    }

    /// Local backends do not need an API key.
    pub fn requires_api_key(&self) -> bool {
        !matches!(self, ProviderKind::Ollama)
    }
}

/// Which bot a call is made on behalf of. Each role selects its own primary provider.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Display, EnumString, Serialize, Deserialize,
)]
#[strum(serialize_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum BotRole {
    /// Internal assistant used by the business owner (teaching, extraction).
    Coach,
    /// The bot that talks to end customers.
    Customer,
}

/// Workspace and role a provider call is billed and routed against.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CallContext {
    pub workspace_id: String,
    pub role: BotRole,
}

impl CallContext {
    pub fn customer(workspace_id: impl Into<String>) -> Self {
        Self {
            workspace_id: workspace_id.into(),
            role: BotRole::Customer,
        }
    }

    pub fn coach(workspace_id: impl Into<String>) -> Self {
        Self {
            workspace_id: workspace_id.into(),
            role: BotRole::Coach,
        }
    }
}

// --- Chat request/response ---

#[derive(Debug, Clone, Copy, PartialEq, Eq, Display, Serialize, Deserialize)]
#[strum(serialize_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum ChatRole {
    System,
    User,
    Assistant,
    Tool,
}

/// One message of a chat transcript.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: ChatRole,
    pub content: String,
    /// Set on `Tool` messages: the call this message answers.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_call_id: Option<String>,
    /// Set on `Assistant` messages that requested tool calls.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tool_calls: Vec<ToolCall>,
}

impl ChatMessage {
    fn plain(role: ChatRole, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
            tool_call_id: None,
            tool_calls: Vec::new(),
        }
    }

    pub fn system(content: impl Into<String>) -> Self {
        Self::plain(ChatRole::System, content)
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self::plain(ChatRole::User, content)
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self::plain(ChatRole::Assistant, content)
    }

    pub fn tool_result(call_id: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            role: ChatRole::Tool,
            content: content.into(),
            tool_call_id: Some(call_id.into()),
            tool_calls: Vec::new(),
        }
    }
}

/// A function the model may call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolDefinition {
    pub name: String,
    pub description: String,
    /// JSON Schema of the arguments object.
    pub parameters: serde_json::Value,
}

/// A function call requested by the model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolCall {
    pub id: String,
    pub name: String,
    pub arguments: serde_json::Value,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ChatRequest {
    pub messages: Vec<ChatMessage>,
    /// Overrides the provider's configured model.
    pub model: Option<String>,
    pub temperature: Option<f32>,
    pub max_tokens: Option<u32>,
    pub tools: Vec<ToolDefinition>,
    /// Ask the backend to emit a single JSON object.
    pub json_mode: bool,
}

impl ChatRequest {
    pub fn new(messages: Vec<ChatMessage>) -> Self {
        Self {
            messages,
            ..Self::default()
        }
    }

    pub fn json(mut self) -> Self {
        self.json_mode = true;
        self
    }

    pub fn with_tools(mut self, tools: Vec<ToolDefinition>) -> Self {
        self.tools = tools;
        self
    }

    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = Some(temperature);
        self
    }
}

/// Token usage reported by a provider.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenUsage {
    pub input_tokens: u32,
    pub output_tokens: u32,
}

impl TokenUsage {
    pub fn total(&self) -> u64 {
        u64::from(self.input_tokens) + u64::from(self.output_tokens)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ChatResponse {
    pub content: String,
    pub usage: TokenUsage,
    pub tool_calls: Vec<ToolCall>,
    pub model: String,
}

// --- Classification labels ---

/// Closed intent taxonomy for inbound customer messages.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    Display,
    EnumString,
    EnumIter,
    Serialize,
    Deserialize,
)]
#[strum(serialize_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum Intent {
    ProductInquiry,
    PriceCheck,
    DeliveryQuestion,
    Negotiation,
    OrderIntent,
    OrderStatus,
    AppointmentRequest,
    CallRequest,
    Complaint,
    Greeting,
    Gratitude,
    Unknown,
}

impl Intent {
    /// Greetings and thanks never need a human.
    pub fn is_actionable(&self) -> bool {
        !matches!(self, Intent::Greeting | Intent::Gratitude)
    }
}

/// Follow-up actions the generator may suggest.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    Display,
    EnumString,
    EnumIter,
    Serialize,
    Deserialize,
)]
#[strum(serialize_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum SuggestedAction {
    OrderIntent,
    AppointmentRequest,
    CallRequest,
    CheckOrderStatus,
    EscalateToHuman,
}

/// Outcome of the yes/no classifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display, EnumString, Serialize, Deserialize)]
#[strum(serialize_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum Confirmation {
    Yes,
    No,
    Unknown,
}
