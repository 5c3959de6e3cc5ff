// SPDX-FileCopyrightText: 2026 Parley Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Lenient decoding of JSON emitted by language models.
//!
//! Models asked for "JSON only" still wrap it in code fences or prose. The
//! outermost object (or array) is cut out before decoding.

use serde::de::DeserializeOwned;

use crate::error::ParleyError;

/// Returns the slice spanning the first `{`/`[` to the matching last `}`/`]`.
pub fn json_span(text: &str) -> Option<&str> {
    let start = text.find(['{', '['])?;
    let close = if text[start..].starts_with('{') { '}' } else { ']' };
    let end = text.rfind(close)?;
    (end > start).then(|| &text[start..=end])
}

/// Decodes `T` from model output, tolerating fences and surrounding prose.
pub fn parse_model_json<T: DeserializeOwned>(context: &str, text: &str) -> Result<T, ParleyError> {
    let trimmed = text.trim();
    if let Ok(value) = serde_json::from_str(trimmed) {
        return Ok(value);
    }
    let span = json_span(trimmed)
        .ok_or_else(|| ParleyError::parse(context, "no JSON value in model output"))?;
    serde_json::from_str(span).map_err(|e| ParleyError::parse(context, e.to_string()))
}
