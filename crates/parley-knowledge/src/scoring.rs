// SPDX-FileCopyrightText: 2026 Parley Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Hybrid scoring primitives.

use chrono::{DateTime, Utc};
use parley_config::model::ScoreWeights;
use parley_core::Intent;

/// Knowledge categories that answer a given intent.
pub fn intent_categories(intent: Intent) -> &'static [&'static str] {
    match intent {
        Intent::PriceCheck => &["product", "pricing", "promotion"],
        Intent::ProductInquiry => &["product", "promotion"],
        Intent::DeliveryQuestion => &["delivery", "shipping", "policy"],
        Intent::Negotiation => &["pricing", "promotion", "policy"],
        Intent::OrderIntent => &["product", "pricing"],
        Intent::AppointmentRequest => &["service", "booking", "hours"],
        Intent::CallRequest => &["contact", "hours"],
        Intent::Complaint => &["policy", "returns", "support"],
        Intent::OrderStatus => &["delivery", "policy"],
        Intent::Greeting | Intent::Gratitude | Intent::Unknown => &[],
    }
}

pub fn category_boost(intent: Intent, category: &str) -> f32 {
    let category = category.trim().to_lowercase();
    if intent_categories(intent).contains(&category.as_str()) {
        1.0
    } else {
        0.0
    }
}

/// 1.0 for an item updated now, falling linearly to 0.0 at `window_days`.
pub fn recency_boost(updated_at: DateTime<Utc>, now: DateTime<Utc>, window_days: u32) -> f32 {
    if window_days == 0 {
        return 0.0;
    }
    let age_days = (now - updated_at).num_seconds().max(0) as f32 / 86_400.0;
    (1.0 - age_days / window_days as f32).clamp(0.0, 1.0)
}

/// Inputs of one item's hybrid score. Each component is clamped to [0, 1].
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct ScoreInputs {
    pub similarity: f32,
    pub keyword_hit: bool,
    pub recency: f32,
    pub category: f32,
}

pub fn hybrid_score(weights: &ScoreWeights, inputs: ScoreInputs) -> f32 {
    let keyword = if inputs.keyword_hit { 1.0 } else { 0.0 };
    weights.similarity * inputs.similarity.clamp(0.0, 1.0)
        + weights.keyword * keyword
        + weights.recency * inputs.recency.clamp(0.0, 1.0)
        + weights.intent * inputs.category.clamp(0.0, 1.0)
}

const STOPWORDS: &[&str] = &[
    "the", "and", "for", "you", "your", "are", "was", "what", "how", "much", "does", "can",
    "with", "have", "has", "this", "that", "there", "any", "about", "please", "want", "need",
    "would", "could", "from", "just", "its", "but", "not", "all", "get",
];

/// Search terms for keyword matching: lowercase words of three or more
/// characters, stopwords removed, first occurrence order, at most `max`.
pub fn keyword_terms(text: &str, max: usize) -> Vec<String> {
    let mut terms: Vec<String> = Vec::new();
    for word in text
        .split(|c: char| !c.is_alphanumeric())
        .map(str::to_lowercase)
    {
        if word.chars().count() < 3 || STOPWORDS.contains(&word.as_str()) {
            continue;
        }
        if !terms.contains(&word) {
            terms.push(word);
        }
        if terms.len() == max {
            break;
        }
    }
    terms
}
