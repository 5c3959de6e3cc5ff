// SPDX-FileCopyrightText: 2026 Parley Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Configuration loader using Figment for layered config merging.
//!
//! Supports XDG hierarchy: `./parley.toml` > `~/.config/parley/parley.toml` > `/etc/parley/parley.toml`
//! with environment variable overrides via `PARLEY_` prefix.

#![allow(clippy::result_large_err)] // figment::Error is external and cannot be boxed without wrapper

use std::path::Path;

use figment::{
    Figment,
    providers::{Env, Format, Serialized, Toml},
};

use crate::model::ParleyConfig;

/// Top-level sections, in the order they are matched against env var names.
/// `retrieval_weights` precedes `retrieval` so the longer prefix wins.
const ENV_SECTIONS: &[&str] = &[
    "agent",
    "storage",
    "worker",
    "providers",
    "embedding",
    "cache",
    "retrieval_weights",
    "retrieval",
    "escalation",
    "limits",
    "outbound",
];

const PROVIDER_NAMES: &[&str] = &[
    "groq",
    "deepseek",
    "gemini",
    "mistral",
    "openrouter",
    "openai",
    "ollama",
];

/// Load configuration from the standard XDG hierarchy with env var overrides.
///
/// Merge order (later overrides earlier):
/// 1. Compiled defaults
/// 2. `/etc/parley/parley.toml`
/// 3. `~/.config/parley/parley.toml`
/// 4. `./parley.toml`
/// 5. `PARLEY_*` environment variables
pub fn load_config() -> Result<ParleyConfig, figment::Error> {
    build_figment().extract()
}

/// Load configuration from a TOML string only (no XDG lookup, no env).
pub fn load_config_from_str(toml_content: &str) -> Result<ParleyConfig, figment::Error> {
    Figment::new()
        .merge(Serialized::defaults(ParleyConfig::default()))
        .merge(Toml::string(toml_content))
        .extract()
}

/// Load configuration from a specific file path with env var overrides.
pub fn load_config_from_path(path: &Path) -> Result<ParleyConfig, figment::Error> {
    tracing::debug!(path = %path.display(), "loading configuration file");
    Figment::new()
        .merge(Serialized::defaults(ParleyConfig::default()))
        .merge(Toml::file(path))
        .merge(env_provider())
        .extract()
}

/// Build the Figment used internally for config loading.
pub fn build_figment() -> Figment {
    Figment::new()
        .merge(Serialized::defaults(ParleyConfig::default()))
        .merge(Toml::file("/etc/parley/parley.toml"))
        .merge(Toml::file(
            dirs::config_dir()
                .map(|d| d.join("parley/parley.toml"))
                .unwrap_or_default(),
        ))
        .merge(Toml::file("parley.toml"))
        .merge(env_provider())
}

/// Renders the compiled defaults as a starter `parley.toml`.
pub fn default_config_toml() -> Result<String, toml::ser::Error> {
    toml::to_string_pretty(&ParleyConfig::default())
}

/// Create the environment variable provider using explicit `map()` for section-to-dot mapping.
///
/// Uses `Env::map()` rather than `Env::split("_")` because key names contain
/// underscores: `PARLEY_PROVIDERS_OPENAI_API_KEY` must map to
/// `providers.openai.api_key`, not `providers.openai.api.key`.
fn env_provider() -> Env {
    Env::prefixed("PARLEY_").map(|key| map_env_key(key.as_str()).into())
}

fn map_env_key(key: &str) -> String {
    for section in ENV_SECTIONS {
        let Some(rest) = key.strip_prefix(&format!("{section}_")) else {
            continue;
        };
        let section = section.replace('_', ".");
        if section == "providers" {
            for name in PROVIDER_NAMES {
                if let Some(field) = rest.strip_prefix(&format!("{name}_")) {
                    return format!("providers.{name}.{field}");
                }
            }
        }
        return format!("{section}.{rest}");
    }
    key.to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn env_keys_map_to_nested_paths() {
        assert_eq!(map_env_key("agent_log_level"), "agent.log_level");
        assert_eq!(
            map_env_key("storage_database_path"),
            "storage.database_path"
        );
        assert_eq!(
            map_env_key("providers_openai_api_key"),
            "providers.openai.api_key"
        );
        assert_eq!(
            map_env_key("providers_request_timeout_secs"),
            "providers.request_timeout_secs"
        );
        assert_eq!(
            map_env_key("retrieval_weights_similarity"),
            "retrieval.weights.similarity"
        );
        assert_eq!(map_env_key("retrieval_score_floor"), "retrieval.score_floor");
        assert_eq!(map_env_key("unrelated"), "unrelated");
    }

    #[test]
    fn defaults_render_as_toml() {
        let rendered = default_config_toml().unwrap();
        assert!(rendered.contains("[retrieval.weights]"));
        assert!(rendered.contains("high_confidence"));
    }
}
