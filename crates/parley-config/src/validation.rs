// SPDX-FileCopyrightText: 2026 Parley Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Post-deserialization validation for configuration values.
//!
//! Checks the semantic constraints serde cannot express: weight sums,
//! threshold ordering, non-zero sizes.

use crate::diagnostic::ConfigError;
use crate::model::ParleyConfig;

const WEIGHT_TOLERANCE: f32 = 1e-3;
const LOG_LEVELS: &[&str] = &["trace", "debug", "info", "warn", "error"];

/// Validate a deserialized configuration.
///
/// Collects every violation instead of failing fast.
pub fn validate_config(config: &ParleyConfig) -> Result<(), Vec<ConfigError>> {
    let mut errors = Vec::new();

    if !LOG_LEVELS.contains(&config.agent.log_level.as_str()) {
        errors.push(ConfigError::validation(format!(
            "agent.log_level must be one of {}, got `{}`",
            LOG_LEVELS.join(", "),
            config.agent.log_level
        )));
    }

    if config.agent.base_language.trim().is_empty() {
        errors.push(ConfigError::validation(
            "agent.base_language must not be empty",
        ));
    }

    if config.agent.cart_ttl_secs == 0 {
        errors.push(ConfigError::validation(
            "agent.cart_ttl_secs must be at least 1",
        ));
    }

    if config.storage.database_path.trim().is_empty() {
        errors.push(ConfigError::validation(
            "storage.database_path must not be empty",
        ));
    }

    if config.worker.concurrency == 0 {
        errors.push(ConfigError::validation(
            "worker.concurrency must be at least 1",
        ));
    }

    if config.worker.max_attempts == 0 {
        errors.push(ConfigError::validation(
            "worker.max_attempts must be at least 1",
        ));
    }

    if config.worker.lock_timeout_secs == 0 {
        errors.push(ConfigError::validation(
            "worker.lock_timeout_secs must be at least 1",
        ));
    }

    if config.embedding.dimensions == 0 {
        errors.push(ConfigError::validation(
            "embedding.dimensions must be greater than 0",
        ));
    }

    if config.cache.settings_ttl_secs == 0 || config.cache.sweep_interval_secs == 0 {
        errors.push(ConfigError::validation(
            "cache.settings_ttl_secs and cache.sweep_interval_secs must be greater than 0",
        ));
    }

    if config.outbound.platforms.is_empty() {
        errors.push(ConfigError::validation(
            "outbound.platforms must name at least one platform",
        ));
    }

    if let Some(url) = config.outbound.webhook_url.as_deref()
        && !(url.starts_with("http://") || url.starts_with("https://"))
    {
        errors.push(ConfigError::validation(format!(
            "outbound.webhook_url must be an http(s) URL, got `{url}`"
        )));
    }

    validate_retrieval(config, &mut errors);
    validate_escalation(config, &mut errors);

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}

fn validate_retrieval(config: &ParleyConfig, errors: &mut Vec<ConfigError>) {
    let r = &config.retrieval;
    let w = &r.weights;

    for (name, value) in [
        ("similarity", w.similarity),
        ("keyword", w.keyword),
        ("recency", w.recency),
        ("intent", w.intent),
    ] {
        if !(0.0..=1.0).contains(&value) {
            errors.push(ConfigError::validation(format!(
                "retrieval.weights.{name} must be within [0, 1], got {value}"
            )));
        }
    }

    if (w.sum() - 1.0).abs() > WEIGHT_TOLERANCE {
        errors.push(ConfigError::validation(format!(
            "retrieval.weights must sum to 1.0, got {}",
            w.sum()
        )));
    }

    for (name, value) in [
        ("similarity_floor", r.similarity_floor),
        ("score_floor", r.score_floor),
        ("related_item_score", r.related_item_score),
        ("ambiguity_margin", r.ambiguity_margin),
    ] {
        if !(0.0..=1.0).contains(&value) {
            errors.push(ConfigError::validation(format!(
                "retrieval.{name} must be within [0, 1], got {value}"
            )));
        }
    }

    if r.max_results == 0 {
        errors.push(ConfigError::validation(
            "retrieval.max_results must be at least 1",
        ));
    }

    if r.candidate_limit < r.max_results {
        errors.push(ConfigError::validation(format!(
            "retrieval.candidate_limit ({}) must not be smaller than retrieval.max_results ({})",
            r.candidate_limit, r.max_results
        )));
    }

    if r.recency_window_days == 0 {
        errors.push(ConfigError::validation(
            "retrieval.recency_window_days must be at least 1",
        ));
    }
}

fn validate_escalation(config: &ParleyConfig, errors: &mut Vec<ConfigError>) {
    let e = &config.escalation;

    for (name, value) in [
        ("high_confidence", e.high_confidence),
        ("low_confidence", e.low_confidence),
    ] {
        if !(0.0..=1.0).contains(&value) {
            errors.push(ConfigError::validation(format!(
                "escalation.{name} must be within [0, 1], got {value}"
            )));
        }
    }

    if e.low_confidence > e.high_confidence {
        errors.push(ConfigError::validation(format!(
            "escalation.low_confidence ({}) must not exceed escalation.high_confidence ({})",
            e.low_confidence, e.high_confidence
        )));
    }

    if e.holding_message.trim().is_empty() {
        errors.push(ConfigError::validation(
            "escalation.holding_message must not be empty",
        ));
    }
}
