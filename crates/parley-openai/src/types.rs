// SPDX-FileCopyrightText: 2026 Parley Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Wire types of the OpenAI-compatible chat completions and embeddings APIs.

use parley_core::{ChatMessage, ChatRequest, ChatRole, ToolCall, ToolDefinition};
use serde::{Deserialize, Serialize};

// --- Request types ---

#[derive(Debug, Clone, Serialize)]
pub struct CompletionRequest {
    pub model: String,
    pub messages: Vec<ApiMessage>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u32>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub tools: Vec<ApiTool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub response_format: Option<ResponseFormat>,
    pub stream: bool,
}

impl CompletionRequest {
    /// Builds the wire request, using `default_model` unless the request overrides it.
    pub fn from_chat(request: &ChatRequest, default_model: &str) -> Self {
        Self {
            model: request
                .model
                .clone()
                .unwrap_or_else(|| default_model.to_string()),
            messages: request.messages.iter().map(ApiMessage::from).collect(),
            temperature: request.temperature,
            max_tokens: request.max_tokens,
            tools: request.tools.iter().map(ApiTool::from).collect(),
            response_format: request.json_mode.then(|| ResponseFormat {
                format_type: "json_object".into(),
            }),
            stream: false,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResponseFormat {
    #[serde(rename = "type")]
    pub format_type: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiMessage {
    pub role: String,
    pub content: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_call_id: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tool_calls: Vec<ApiToolCall>,
}

impl From<&ChatMessage> for ApiMessage {
    fn from(message: &ChatMessage) -> Self {
        let role = match message.role {
            ChatRole::System => "system",
            ChatRole::User => "user",
            ChatRole::Assistant => "assistant",
            ChatRole::Tool => "tool",
        };
        Self {
            role: role.to_string(),
            content: Some(message.content.clone()),
            tool_call_id: message.tool_call_id.clone(),
            tool_calls: message.tool_calls.iter().map(ApiToolCall::from).collect(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiTool {
    #[serde(rename = "type")]
    pub tool_type: String,
    pub function: ApiFunction,
}

impl From<&ToolDefinition> for ApiTool {
    fn from(tool: &ToolDefinition) -> Self {
        Self {
            tool_type: "function".into(),
            function: ApiFunction {
                name: tool.name.clone(),
                description: tool.description.clone(),
                parameters: tool.parameters.clone(),
            },
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiFunction {
    pub name: String,
    pub description: String,
    pub parameters: serde_json::Value,
}

/// A function call as it travels on the wire: arguments are a JSON string.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiToolCall {
    #[serde(default)]
    pub id: String,
    #[serde(rename = "type", default = "function_type")]
    pub call_type: String,
    pub function: ApiFunctionCall,
}

fn function_type() -> String {
    "function".into()
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiFunctionCall {
    pub name: String,
    #[serde(default)]
    pub arguments: String,
}

impl From<&ToolCall> for ApiToolCall {
    fn from(call: &ToolCall) -> Self {
        Self {
            id: call.id.clone(),
            call_type: function_type(),
            function: ApiFunctionCall {
                name: call.name.clone(),
                arguments: call.arguments.to_string(),
            },
        }
    }
}

impl ApiToolCall {
    /// Decodes the argument string. Arguments that are not valid JSON are
    /// kept as a raw string so the caller can report them.
    pub fn into_tool_call(self) -> ToolCall {
        let arguments = if self.function.arguments.trim().is_empty() {
            serde_json::Value::Object(Default::default())
        } else {
            serde_json::from_str(&self.function.arguments)
                .unwrap_or(serde_json::Value::String(self.function.arguments))
        };
        ToolCall {
            id: self.id,
            name: self.function.name,
            arguments,
        }
    }
}

// --- Response types ---

#[derive(Debug, Clone, Deserialize)]
pub struct CompletionResponse {
    #[serde(default)]
    pub model: Option<String>,
    pub choices: Vec<Choice>,
    #[serde(default)]
    pub usage: Option<ApiUsage>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Choice {
    pub message: ResponseMessage,
    #[serde(default)]
    pub finish_reason: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ResponseMessage {
    #[serde(default)]
    pub content: Option<String>,
    #[serde(default)]
    pub tool_calls: Vec<ApiToolCall>,
}

#[derive(Debug, Clone, Copy, Default, Deserialize)]
pub struct ApiUsage {
    #[serde(default)]
    pub prompt_tokens: u32,
    #[serde(default)]
    pub completion_tokens: u32,
}

// --- Embeddings ---

#[derive(Debug, Clone, Serialize)]
pub struct EmbeddingRequest {
    pub model: String,
    pub input: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct EmbeddingResponse {
    pub data: Vec<EmbeddingData>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct EmbeddingData {
    pub embedding: Vec<f32>,
}

// --- Errors ---

#[derive(Debug, Clone, Deserialize)]
pub struct ApiErrorResponse {
    pub error: ApiErrorBody,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ApiErrorBody {
    pub message: String,
    #[serde(rename = "type", default)]
    pub type_: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn json_mode_sets_response_format() {
        let request = ChatRequest::new(vec![ChatMessage::user("hi")]).json();
        let wire = CompletionRequest::from_chat(&request, "m");
        let json = serde_json::to_value(&wire).unwrap();
        assert_eq!(json["response_format"]["type"], "json_object");
        assert_eq!(json["model"], "m");
        assert!(json.get("tools").is_none());
    }

    #[test]
    fn model_override_wins() {
        let mut request = ChatRequest::new(vec![ChatMessage::user("hi")]);
        request.model = Some("other".into());
        assert_eq!(CompletionRequest::from_chat(&request, "m").model, "other");
    }

    #[test]
    fn malformed_arguments_survive_as_string() {
        let call = ApiToolCall {
            id: "c1".into(),
            call_type: "function".into(),
            function: ApiFunctionCall {
                name: "checkout".into(),
                arguments: "{not json".into(),
            },
        };
        let decoded = call.into_tool_call();
        assert_eq!(decoded.arguments, serde_json::json!("{not json"));
    }

    #[test]
    fn empty_arguments_become_empty_object() {
        let call: ApiToolCall = serde_json::from_value(serde_json::json!({
            "id": "c2",
            "function": {"name": "checkout", "arguments": ""}
        }))
        .unwrap();
        assert_eq!(call.into_tool_call().arguments, serde_json::json!({}));
    }
}
