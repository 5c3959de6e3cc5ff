// SPDX-FileCopyrightText: 2026 Parley Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Fallback chain construction.

use parley_config::model::ProvidersConfig;
use parley_core::{AiSettings, BotRole, ProviderCredentials, ProviderKind};
use tracing::debug;

/// One provider of a chain with the credentials it will be called with.
#[derive(Debug, Clone, PartialEq)]
pub struct ChainMember {
    pub kind: ProviderKind,
    pub credentials: ProviderCredentials,
}

/// Provider order for a role: the role's primary first, then either the
/// workspace's own configured providers (BYOK) or the global preference
/// order. No provider appears twice.
pub fn fallback_order(settings: &AiSettings, role: BotRole) -> Vec<ProviderKind> {
    let candidates = std::iter::once(settings.primary_for(role)).chain(ProviderKind::GLOBAL_ORDER);
    let mut order: Vec<ProviderKind> = Vec::new();
    for kind in candidates {
        if settings.byok && !settings.has_credentials(kind) {
            continue;
        }
        if !order.contains(&kind) {
            order.push(kind);
        }
    }
    order
}

/// Credentials for `kind`: the workspace's own, or the shared ones unless BYOK.
pub fn credentials_for(
    settings: &AiSettings,
    globals: &ProvidersConfig,
    kind: ProviderKind,
) -> Option<ProviderCredentials> {
    if settings.has_credentials(kind) {
        return settings.credentials.get(&kind).cloned();
    }
    if settings.byok {
        return None;
    }
    globals.global_credentials(kind)
}

/// The chain actually walked at call time. Providers without usable
/// credentials are skipped.
pub fn build_chain(
    settings: &AiSettings,
    globals: &ProvidersConfig,
    role: BotRole,
) -> Vec<ChainMember> {
    fallback_order(settings, role)
        .into_iter()
        .filter_map(|kind| match credentials_for(settings, globals, kind) {
            Some(credentials) => Some(ChainMember { kind, credentials }),
            None => {
                debug!(provider = %kind, "skipping provider without credentials");
                None
            }
        })
        .collect()
}

/// Provider used for embeddings: the role's primary if it can embed,
/// otherwise the first embedding-capable provider (fixed priority) that has
/// credentials.
pub fn embedding_member(
    settings: &AiSettings,
    globals: &ProvidersConfig,
    role: BotRole,
) -> Option<ChainMember> {
    let primary = settings.primary_for(role);
    let candidates = std::iter::once(primary)
        .filter(|k| k.supports_embedding())
        .chain(ProviderKind::EMBEDDING_PRIORITY);
    for kind in candidates {
        if let Some(credentials) = credentials_for(settings, globals, kind) {
            return Some(ChainMember { kind, credentials });
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    fn with_key(settings: &mut AiSettings, kind: ProviderKind) {
        settings.credentials.insert(
            kind,
            ProviderCredentials {
                api_key: Some(format!("key-{kind}")),
                ..Default::default()
            },
        );
    }

    #[test]
    fn global_order_starts_with_primary_and_is_deduplicated() {
        let settings = AiSettings::new("ws", ProviderKind::Openai);
        let order = fallback_order(&settings, BotRole::Customer);
        assert_eq!(order[0], ProviderKind::Openai);
        assert_eq!(order.len(), ProviderKind::GLOBAL_ORDER.len());
        assert_eq!(order[1], ProviderKind::Groq);
        assert_eq!(
            order.iter().filter(|k| **k == ProviderKind::Openai).count(),
            1
        );
    }

    #[test]
    fn byok_chain_only_contains_configured_providers() {
        let mut settings = AiSettings::new("ws", ProviderKind::Openai);
        settings.byok = true;
        with_key(&mut settings, ProviderKind::Openai);
        with_key(&mut settings, ProviderKind::Mistral);
        let order = fallback_order(&settings, BotRole::Customer);
        assert_eq!(order, vec![ProviderKind::Openai, ProviderKind::Mistral]);
    }

    #[test]
    fn byok_never_uses_global_credentials() {
        let mut globals = ProvidersConfig::default();
        globals.groq.api_key = Some("shared".into());
        let mut settings = AiSettings::new("ws", ProviderKind::Groq);
        settings.byok = true;
        assert!(build_chain(&settings, &globals, BotRole::Customer).is_empty());

        settings.byok = false;
        let chain = build_chain(&settings, &globals, BotRole::Customer);
        assert_eq!(chain.len(), 1);
        assert_eq!(chain[0].credentials.api_key.as_deref(), Some("shared"));
    }

    #[test]
    fn roles_choose_their_own_primary() {
        let mut settings = AiSettings::new("ws", ProviderKind::Groq);
        settings.coach_provider = ProviderKind::Deepseek;
        assert_eq!(
            fallback_order(&settings, BotRole::Coach)[0],
            ProviderKind::Deepseek
        );
        assert_eq!(
            fallback_order(&settings, BotRole::Customer)[0],
            ProviderKind::Groq
        );
    }

    #[test]
    fn embedding_reroutes_by_fixed_priority() {
        let mut globals = ProvidersConfig::default();
        globals.openai.api_key = Some("sk".into());
        globals.gemini.api_key = Some("g".into());
        // groq cannot embed: the first embedding provider with credentials wins
        let settings = AiSettings::new("ws", ProviderKind::Groq);
        let member = embedding_member(&settings, &globals, BotRole::Customer).unwrap();
        assert_eq!(member.kind, ProviderKind::Gemini);

        // an embedding-capable primary is used directly
        let settings = AiSettings::new("ws", ProviderKind::Openai);
        let member = embedding_member(&settings, &globals, BotRole::Customer).unwrap();
        assert_eq!(member.kind, ProviderKind::Openai);
    }
}
