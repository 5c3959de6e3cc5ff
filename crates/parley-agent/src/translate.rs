// SPDX-FileCopyrightText: 2026 Parley Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Translation of base-language replies into the customer's language.

use std::sync::Arc;

use parley_core::{CallContext, ChatMessage, ChatRequest, LanguageModel};
use tracing::{debug, warn};

use crate::prompts::TRANSLATION_PROMPT;

pub struct Translator {
    llm: Arc<dyn LanguageModel>,
    base_language: String,
}

impl Translator {
    pub fn new(llm: Arc<dyn LanguageModel>, base_language: impl Into<String>) -> Self {
        Self {
            llm,
            base_language: base_language.into().to_lowercase(),
        }
    }

    pub fn base_language(&self) -> &str {
        &self.base_language
    }

    /// Whether text in the base language must be translated for `locale`.
    pub fn needs_translation(&self, locale: Option<&str>) -> bool {
        locale.is_some_and(|l| !l.is_empty() && !l.eq_ignore_ascii_case(&self.base_language))
    }

    /// Returns `text` in `locale`, or unchanged when no translation is needed
    /// or the model fails.
    pub async fn translate(&self, workspace_id: &str, text: &str, locale: Option<&str>) -> String {
        let Some(target) = locale.filter(|_| self.needs_translation(locale)) else {
            return text.to_string();
        };
        if text.trim().is_empty() {
            return text.to_string();
        }
        let request = ChatRequest::new(vec![
            ChatMessage::system(TRANSLATION_PROMPT.replace("{language}", target)),
            ChatMessage::user(text),
        ])
        .with_temperature(0.0);
        match self
            .llm
            .chat(&CallContext::customer(workspace_id), request)
            .await
        {
            Ok(response) if !response.content.trim().is_empty() => {
                debug!(workspace_id, locale = target, "reply translated");
                response.content.trim().to_string()
            }
            Ok(_) => text.to_string(),
            Err(e) => {
                warn!(workspace_id, locale = target, error = %e, "translation failed, sending base language");
                text.to_string()
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use parley_core::{ChatResponse, ParleyError};
    use std::sync::Mutex;

    #[derive(Default)]
    struct Echo {
        prompts: Mutex<Vec<String>>,
        fail: bool,
    }

    #[async_trait]
    impl LanguageModel for Echo {
        async fn chat(
            &self,
            _ctx: &CallContext,
            request: ChatRequest,
        ) -> Result<ChatResponse, ParleyError> {
            if self.fail {
                return Err(ParleyError::provider("groq", "down"));
            }
            self.prompts
                .lock()
                .unwrap()
                .push(request.messages[0].content.clone());
            Ok(ChatResponse {
                content: format!(" [es] {} ", request.messages[1].content),
                ..ChatResponse::default()
            })
        }

        async fn embed(&self, _ctx: &CallContext, _text: &str) -> Result<Vec<f32>, ParleyError> {
            Ok(Vec::new())
        }
    }

    #[tokio::test]
    async fn base_language_and_unknown_locale_pass_through() {
        let llm = Arc::new(Echo::default());
        let t = Translator::new(llm.clone(), "EN");
        assert_eq!(t.translate("ws", "Hello", Some("en")).await, "Hello");
        assert_eq!(t.translate("ws", "Hello", None).await, "Hello");
        assert!(llm.prompts.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn other_locales_are_translated() {
        let llm = Arc::new(Echo::default());
        let t = Translator::new(llm.clone(), "en");
        assert_eq!(t.translate("ws", "Hello", Some("es")).await, "[es] Hello");
        assert!(llm.prompts.lock().unwrap()[0].contains("\"es\""));
    }

    #[tokio::test]
    async fn failures_keep_the_original() {
        let llm = Arc::new(Echo {
            fail: true,
            ..Echo::default()
        });
        let t = Translator::new(llm, "en");
        assert_eq!(t.translate("ws", "Hello", Some("fr")).await, "Hello");
    }
}
