// SPDX-FileCopyrightText: 2026 Parley Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Error types for the Parley conversation engine.

use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};
use thiserror::Error;

type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Why a workspace may not use the language model right now.
///
/// Each reason has a stable snake_case name that is stored on the
/// interaction meta and can be shown to operators.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Display, EnumString, Serialize, Deserialize,
)]
#[strum(serialize_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum DenialReason {
    WorkspaceSuspended,
    AiBlocked,
    TrialExpired,
    UsageLimitExceeded,
}

impl DenialReason {
    /// Customer-facing text. Never includes internal detail.
    pub fn customer_message(&self) -> &'static str {
        "Sorry, our assistant is temporarily unavailable. A team member will get back to you soon."
    }
}

/// The primary error type used across all Parley crates.
#[derive(Debug, Error)]
pub enum ParleyError {
    /// Workspace is not allowed to call a provider (checked before any network call).
    #[error("access denied: {reason}")]
    AccessDenied { reason: DenialReason },

    /// A rate limit window is exhausted.
    #[error("rate limit exceeded for {scope} ({limit} per window)")]
    RateLimited { scope: String, limit: u64 },

    /// LLM provider errors (network, timeout, non-success status, bad body).
    #[error("provider error ({provider}): {message}")]
    Provider {
        provider: String,
        message: String,
        #[source]
        source: Option<BoxError>,
    },

    /// An embedding came back with the wrong number of dimensions.
    #[error("embedding dimension mismatch: expected {expected}, got {actual}")]
    EmbeddingDimension { expected: usize, actual: usize },

    /// Malformed structured output from a model.
    #[error("parse error in {context}: {message}")]
    Parse { context: String, message: String },

    /// Input that violates a schema or domain rule.
    #[error("validation error: {0}")]
    Validation(String),

    /// A tool name outside the registered set.
    #[error("unknown tool: {0}")]
    UnknownTool(String),

    /// Outbound message delivery failed.
    #[error("dispatch error ({platform}): {message}")]
    Dispatch {
        platform: String,
        message: String,
        #[source]
        source: Option<BoxError>,
    },

    /// Storage backend errors (database connection, query failure, serialization).
    #[error("storage error: {source}")]
    Storage {
        #[source]
        source: BoxError,
    },

    /// A referenced entity does not exist.
    #[error("{entity} not found: {id}")]
    NotFound { entity: &'static str, id: String },

    /// Configuration errors.
    #[error("configuration error: {0}")]
    Config(String),

    /// Operation timed out.
    #[error("operation timed out after {duration:?}")]
    Timeout { duration: std::time::Duration },

    /// Internal or unexpected errors.
    #[error("internal error: {0}")]
    Internal(String),
}

impl ParleyError {
    pub fn provider(provider: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Provider {
            provider: provider.into(),
            message: message.into(),
            source: None,
        }
    }

    pub fn storage(source: impl Into<BoxError>) -> Self {
        Self::Storage {
            source: source.into(),
        }
    }

    pub fn parse(context: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Parse {
            context: context.into(),
            message: message.into(),
        }
    }

    pub fn not_found(entity: &'static str, id: impl Into<String>) -> Self {
        Self::NotFound {
            entity,
            id: id.into(),
        }
    }

    /// Returns the denial reason if this is an access-control failure.
    pub fn denial_reason(&self) -> Option<DenialReason> {
        match self {
            Self::AccessDenied { reason } => Some(*reason),
            _ => None,
        }
    }

    pub fn is_access_denied(&self) -> bool {
        matches!(self, Self::AccessDenied { .. })
    }

    /// Whether a provider call that failed with this error is worth retrying.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Provider { .. } | Self::Timeout { .. })
    }

    /// Stable machine-readable kind, recorded on interaction meta.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::AccessDenied { .. } => "access_denied",
            Self::RateLimited { .. } => "rate_limited",
            Self::Provider { .. } => "provider",
            Self::EmbeddingDimension { .. } => "embedding_dimension",
            Self::Parse { .. } => "parse",
            Self::Validation(_) => "validation",
            Self::UnknownTool(_) => "unknown_tool",
            Self::Dispatch { .. } => "dispatch",
            Self::Storage { .. } => "storage",
            Self::NotFound { .. } => "not_found",
            Self::Config(_) => "config",
            Self::Timeout { .. } => "timeout",
            Self::Internal(_) => "internal",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    #[test]
    fn denial_reasons_have_distinct_machine_names() {
        let names: Vec<String> = [
            DenialReason::WorkspaceSuspended,
            DenialReason::AiBlocked,
            DenialReason::TrialExpired,
            DenialReason::UsageLimitExceeded,
        ]
        .iter()
        .map(|r| r.to_string())
        .collect();
        assert_eq!(
            names,
            vec![
                "workspace_suspended",
                "ai_blocked",
                "trial_expired",
                "usage_limit_exceeded"
            ]
        );
        for name in &names {
            assert!(DenialReason::from_str(name).is_ok());
        }
    }

    #[test]
    fn only_provider_and_timeout_are_retryable() {
        assert!(ParleyError::provider("groq", "503").is_retryable());
        assert!(
            ParleyError::Timeout {
                duration: std::time::Duration::from_secs(1)
            }
            .is_retryable()
        );
        assert!(
            !ParleyError::AccessDenied {
                reason: DenialReason::AiBlocked
            }
            .is_retryable()
        );
        assert!(!ParleyError::Validation("bad".into()).is_retryable());
    }

    #[test]
    fn denial_reason_is_extracted() {
        let err = ParleyError::AccessDenied {
            reason: DenialReason::TrialExpired,
        };
        assert_eq!(err.denial_reason(), Some(DenialReason::TrialExpired));
        assert_eq!(err.kind(), "access_denied");
        assert_eq!(ParleyError::Internal("x".into()).denial_reason(), None);
    }
}
