// SPDX-FileCopyrightText: 2026 Parley Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Recovery of tool calls that a model wrote into its text instead of the
//! function-calling channel.
//!
//! Open-weight models served through OpenAI-compatible endpoints regularly
//! emit their native call syntax as plain text. Every recovered call is
//! removed from the text so the customer never sees it, and is returned as a
//! regular [`ToolCall`].
//!
//! Recognised forms:
//! - `<tool_call>{"name": ..., "arguments": {...}}</tool_call>`
//! - `<function=name>{...}</function>`
//! - `[TOOL_CALLS] [{"name": ..., "arguments": {...}}]`
//! - `<|python_tag|>{"name": ..., "parameters": {...}}`
//! - a fenced json block holding `name` plus `arguments` or `parameters`
//! - a bare `known_tool({...})`

use std::sync::LazyLock;

use parley_core::ToolCall;
use regex::Regex;
use serde_json::Value;

static TOOL_CALL_TAG: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?s)<tool_call>\s*(.*?)\s*</tool_call>").expect("valid regex")
});

static FUNCTION_TAG: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?s)<function=([A-Za-z_][A-Za-z0-9_]*)>\s*(.*?)\s*</function>")
        .expect("valid regex")
});

static FENCED_JSON: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?s)```(?:json)?\s*(\{.*?\})\s*```").expect("valid regex")
});

static BARE_CALL: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\b([a-z_][a-z0-9_]*)\s*\(").expect("valid regex"));

const TOOL_CALLS_MARKER: &str = "[TOOL_CALLS]";
const PYTHON_TAG: &str = "<|python_tag|>";

/// Pulls leaked calls out of `text`.
///
/// `known_tools` limits the fenced and bare forms, which would otherwise
/// match ordinary prose. Tagged forms are always recovered, even for
/// unknown names, so the executor can reject them explicitly.
pub fn extract_structured_calls(text: &str, known_tools: &[&str]) -> (Vec<ToolCall>, String) {
    let mut found = Found::default();

    for caps in TOOL_CALL_TAG.captures_iter(text) {
        let (Some(whole), Some(body)) = (caps.get(0), caps.get(1)) else {
            continue;
        };
        let calls = first_json(body.as_str())
            .map(|(v, _)| calls_from_value(&v))
            .unwrap_or_default();
        found.claim(whole.start(), whole.end(), calls);
    }

    for caps in FUNCTION_TAG.captures_iter(text) {
        let (Some(whole), Some(name), Some(body)) = (caps.get(0), caps.get(1), caps.get(2)) else {
            continue;
        };
        let arguments = first_json(body.as_str())
            .map(|(v, _)| v)
            .unwrap_or_else(|| Value::Object(Default::default()));
        found.claim(
            whole.start(),
            whole.end(),
            vec![(name.as_str().to_string(), arguments)],
        );
    }

    for marker in [TOOL_CALLS_MARKER, PYTHON_TAG] {
        let mut from = 0;
        while let Some(pos) = text[from..].find(marker).map(|p| p + from) {
            let body_start = pos + marker.len();
            match first_json(&text[body_start..]) {
                Some((value, consumed)) => {
                    found.claim(pos, body_start + consumed, calls_from_value(&value));
                    from = body_start + consumed;
                }
                None => {
                    found.claim(pos, body_start, Vec::new());
                    from = body_start;
                }
            }
        }
    }

    for caps in FENCED_JSON.captures_iter(text) {
        let (Some(whole), Some(body)) = (caps.get(0), caps.get(1)) else {
            continue;
        };
        let Some((value, _)) = first_json(body.as_str()) else {
            continue;
        };
        let calls: Vec<_> = calls_from_value(&value)
            .into_iter()
            .filter(|(name, _)| known_tools.contains(&name.as_str()))
            .collect();
        if !calls.is_empty() {
            found.claim(whole.start(), whole.end(), calls);
        }
    }

    for caps in BARE_CALL.captures_iter(text) {
        let (Some(whole), Some(name)) = (caps.get(0), caps.get(1)) else {
            continue;
        };
        if !known_tools.contains(&name.as_str()) {
            continue;
        }
        let args_start = whole.end();
        let Some((arguments, consumed)) = first_json(&text[args_start..]) else {
            continue;
        };
        if !arguments.is_object() {
            continue;
        }
        let rest = &text[args_start + consumed..];
        let trimmed = rest.trim_start();
        if !trimmed.starts_with(')') {
            continue;
        }
        let end = args_start + consumed + (rest.len() - trimmed.len()) + 1;
        found.claim(
            whole.start(),
            end,
            vec![(name.as_str().to_string(), arguments)],
        );
    }

    found.finish(text)
}

#[derive(Default)]
struct Found {
    spans: Vec<(usize, usize)>,
    calls: Vec<(usize, String, Value)>,
}

impl Found {
    /// Records a span unless it overlaps one already taken.
    fn claim(&mut self, start: usize, end: usize, calls: Vec<(String, Value)>) {
        if self.spans.iter().any(|&(s, e)| start < e && s < end) {
            return;
        }
        self.spans.push((start, end));
        for (name, arguments) in calls {
            self.calls.push((start, name, arguments));
        }
    }

    fn finish(mut self, text: &str) -> (Vec<ToolCall>, String) {
        if self.spans.is_empty() {
            return (Vec::new(), text.to_string());
        }
        self.spans.sort_unstable();
        let mut cleaned = String::with_capacity(text.len());
        let mut cursor = 0;
        for (start, end) in &self.spans {
            cleaned.push_str(&text[cursor..*start]);
            cleaned.push(' ');
            cursor = *end;
        }
        cleaned.push_str(&text[cursor..]);
        let cleaned = tidy_lines(&cleaned);

        self.calls.sort_by_key(|(pos, _, _)| *pos);
        let calls = self
            .calls
            .into_iter()
            .map(|(_, name, arguments)| ToolCall {
                id: format!("call_{}", uuid::Uuid::new_v4().simple()),
                name,
                arguments,
            })
            .collect();
        (calls, cleaned)
    }
}

/// Collapses spaces and tabs within each line and drops the blank lines a
/// removed span leaves behind. Line breaks in the remaining text survive.
fn tidy_lines(text: &str) -> String {
    let mut lines: Vec<String> = Vec::new();
    for line in text.lines() {
        let line = line
            .split([' ', '\t'])
            .filter(|w| !w.is_empty())
            .collect::<Vec<_>>()
            .join(" ");
        if line.is_empty() && lines.last().is_none_or(|l| l.is_empty()) {
            continue;
        }
        lines.push(line);
    }
    while lines.last().is_some_and(|l| l.is_empty()) {
        lines.pop();
    }
    lines.join("\n")
}

/// Decodes the first JSON value at the start of `s` (after whitespace) and
/// returns it with the number of bytes consumed.
fn first_json(s: &str) -> Option<(Value, usize)> {
    let leading = s.len() - s.trim_start().len();
    let body = &s[leading..];
    if !body.starts_with(['{', '[']) {
        return None;
    }
    let mut stream = serde_json::Deserializer::from_str(body).into_iter::<Value>();
    match stream.next() {
        Some(Ok(value)) => Some((value, leading + stream.byte_offset())),
        _ => None,
    }
}

fn calls_from_value(value: &Value) -> Vec<(String, Value)> {
    match value {
        Value::Array(items) => items.iter().filter_map(call_from_object).collect(),
        other => call_from_object(other).into_iter().collect(),
    }
}

fn call_from_object(value: &Value) -> Option<(String, Value)> {
    let obj = value.as_object()?;
    let (name, args) = match obj.get("function").and_then(Value::as_object) {
        Some(function) => (function.get("name")?, function.get("arguments")),
        None => (
            obj.get("name")?,
            obj.get("arguments").or_else(|| obj.get("parameters")),
        ),
    };
    let name = name.as_str()?.trim();
    if name.is_empty() {
        return None;
    }
    let arguments = match args {
        Some(Value::String(raw)) => {
            serde_json::from_str(raw).unwrap_or_else(|_| Value::Object(Default::default()))
        }
        Some(v @ Value::Object(_)) => v.clone(),
        _ => Value::Object(Default::default()),
    };
    Some((name.to_string(), arguments))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    const KNOWN: &[&str] = &["show_carousel", "add_to_cart", "check_order_status"];

    fn extract(text: &str) -> (Vec<ToolCall>, String) {
        extract_structured_calls(text, KNOWN)
    }

    #[test]
    fn plain_text_is_untouched() {
        let (calls, cleaned) = extract("Our red scarf costs $25. Want one?");
        assert!(calls.is_empty());
        assert_eq!(cleaned, "Our red scarf costs $25. Want one?");
    }

    #[test]
    fn tool_call_tags() {
        let (calls, cleaned) = extract(
            "Here you go! <tool_call>{\"name\": \"show_carousel\", \"arguments\": {\"query\": \"scarves\"}}</tool_call>",
        );
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].name, "show_carousel");
        assert_eq!(calls[0].arguments, json!({"query": "scarves"}));
        assert_eq!(cleaned, "Here you go!");
    }

    #[test]
    fn function_equals_tags() {
        let (calls, cleaned) =
            extract("<function=add_to_cart>{\"item_name\": \"Red Scarf\", \"quantity\": 2}</function> Added!");
        assert_eq!(calls[0].name, "add_to_cart");
        assert_eq!(calls[0].arguments["quantity"], 2);
        assert_eq!(cleaned, "Added!");
    }

    #[test]
    fn mistral_tool_calls_marker_with_several_calls() {
        let (calls, cleaned) = extract(
            "[TOOL_CALLS] [{\"name\": \"show_carousel\", \"arguments\": {\"query\": \"hats\"}}, {\"name\": \"check_order_status\", \"arguments\": \"{\\\"reference\\\": \\\"ORD-1\\\"}\"}]",
        );
        assert_eq!(calls.len(), 2);
        assert_eq!(calls[1].name, "check_order_status");
        assert_eq!(calls[1].arguments, json!({"reference": "ORD-1"}));
        assert_eq!(cleaned, "");
    }

    #[test]
    fn llama_python_tag() {
        let (calls, cleaned) = extract(
            "Checking now <|python_tag|>{\"name\": \"check_order_status\", \"parameters\": {\"reference\": \"ORD-9\"}}",
        );
        assert_eq!(calls[0].arguments, json!({"reference": "ORD-9"}));
        assert_eq!(cleaned, "Checking now");
    }

    #[test]
    fn fenced_json_only_for_known_tools() {
        let (calls, cleaned) = extract(
            "Sure.\n```json\n{\"name\": \"show_carousel\", \"arguments\": {\"query\": \"gloves\"}}\n```",
        );
        assert_eq!(calls.len(), 1);
        assert_eq!(cleaned, "Sure.");

        let reply = "```json\n{\"reply\": \"Hi\", \"confidence\": 0.9}\n```";
        let (calls, cleaned) = extract(reply);
        assert!(calls.is_empty());
        assert_eq!(cleaned, reply);
    }

    #[test]
    fn line_breaks_survive_cleaning() {
        let (calls, cleaned) = extract(
            "We have:\n- Red Scarf, $25\n- Blue Hat, $18\n\n<tool_call>{\"name\": \"show_carousel\", \"arguments\": {}}</tool_call>\nVisit us at\n12  Market Street",
        );
        assert_eq!(calls.len(), 1);
        assert_eq!(
            cleaned,
            "We have:\n- Red Scarf, $25\n- Blue Hat, $18\n\nVisit us at\n12 Market Street"
        );
    }

    #[test]
    fn bare_known_call_with_nested_object() {
        let (calls, cleaned) = extract(
            "Let me add that. add_to_cart({\"item_name\": \"Red Scarf\", \"options\": {\"size\": \"M\"}}) Done.",
        );
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].arguments["options"]["size"], "M");
        assert_eq!(cleaned, "Let me add that. Done.");
    }

    #[test]
    fn bare_unknown_call_is_prose() {
        let (calls, cleaned) = extract("call me({\"at\": 5})");
        assert!(calls.is_empty());
        assert_eq!(cleaned, "call me({\"at\": 5})");
    }

    #[test]
    fn tagged_unknown_names_are_still_recovered() {
        let (calls, cleaned) =
            extract("<tool_call>{\"name\": \"delete_everything\", \"arguments\": {}}</tool_call>ok");
        assert_eq!(calls[0].name, "delete_everything");
        assert_eq!(cleaned, "ok");
    }

    #[test]
    fn broken_payload_is_stripped_without_calls() {
        let (calls, cleaned) = extract("Hi <tool_call>{not json</tool_call> there");
        assert!(calls.is_empty());
        assert_eq!(cleaned, "Hi there");
    }

    #[test]
    fn openai_style_function_wrapper() {
        let (calls, _) = extract(
            "<tool_call>{\"type\": \"function\", \"function\": {\"name\": \"show_carousel\", \"arguments\": \"{\\\"query\\\": \\\"bags\\\"}\"}}</tool_call>",
        );
        assert_eq!(calls[0].name, "show_carousel");
        assert_eq!(calls[0].arguments, json!({"query": "bags"}));
    }
}
