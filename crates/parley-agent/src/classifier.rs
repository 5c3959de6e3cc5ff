// SPDX-FileCopyrightText: 2026 Parley Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Intent and yes/no classification.

use std::str::FromStr;
use std::sync::Arc;

use async_trait::async_trait;
use parley_core::{
    CallContext, ChatMessage, ChatRequest, Confirmation, Intent, LanguageModel, ParleyError,
    parse_model_json,
};
use serde::Deserialize;
use tracing::{debug, warn};

use crate::prompts::{CLASSIFIER_PROMPT, CONFIRMATION_PROMPT};
use crate::state_machine::IntentDetector;

/// Highest confidence an `unknown` label may carry.
pub const UNKNOWN_CONFIDENCE_CEILING: f32 = 0.5;

#[derive(Debug, Clone, PartialEq)]
pub struct Classification {
    pub intent: Intent,
    pub confidence: f32,
    pub rationale: String,
    /// ISO-639-1 code of the message language, when the model reported one.
    pub language: Option<String>,
}

impl Classification {
    /// Used whenever the model output cannot be trusted.
    pub fn fallback() -> Self {
        Self {
            intent: Intent::Unknown,
            confidence: 0.0,
            rationale: String::new(),
            language: None,
        }
    }
}

#[derive(Debug, Deserialize)]
struct RawClassification {
    intent: String,
    confidence: f32,
    #[serde(default)]
    rationale: String,
    #[serde(default)]
    language: Option<String>,
}

fn validate(raw: RawClassification) -> Result<Classification, ParleyError> {
    let label = raw.intent.trim().to_lowercase();
    let intent = Intent::from_str(&label)
        .map_err(|_| ParleyError::parse("intent", format!("unknown label {label:?}")))?;
    if !raw.confidence.is_finite() {
        return Err(ParleyError::parse("intent", "confidence is not a number"));
    }
    let confidence = raw.confidence.clamp(0.0, 1.0);
    if intent == Intent::Unknown && confidence >= UNKNOWN_CONFIDENCE_CEILING {
        return Err(ParleyError::parse(
            "intent",
            format!("unknown reported with confidence {confidence}"),
        ));
    }
    Ok(Classification {
        intent,
        confidence,
        rationale: raw.rationale.trim().to_string(),
        language: raw.language.as_deref().and_then(normalize_language),
    })
}

/// Accepts two or three letter codes, optionally with a region suffix.
pub fn normalize_language(code: &str) -> Option<String> {
    let primary = code.trim().split(['-', '_']).next()?.to_lowercase();
    let ok = (2..=3).contains(&primary.len()) && primary.chars().all(|c| c.is_ascii_lowercase());
    ok.then_some(primary)
}

pub struct IntentClassifier {
    llm: Arc<dyn LanguageModel>,
}

impl IntentClassifier {
    pub fn new(llm: Arc<dyn LanguageModel>) -> Self {
        Self { llm }
    }

    /// Classifies one customer message.
    ///
    /// Only access denial is returned as an error. Provider failures and
    /// contract violations degrade to [`Classification::fallback`].
    pub async fn classify(
        &self,
        workspace_id: &str,
        message: &str,
    ) -> Result<Classification, ParleyError> {
        let request = ChatRequest::new(vec![
            ChatMessage::system(CLASSIFIER_PROMPT),
            ChatMessage::user(message),
        ])
        .json()
        .with_temperature(0.0);

        let response = match self
            .llm
            .chat(&CallContext::customer(workspace_id), request)
            .await
        {
            Ok(r) => r,
            Err(e) if e.is_access_denied() => return Err(e),
            Err(e) => {
                warn!(workspace_id, error = %e, "intent classification failed");
                return Ok(Classification::fallback());
            }
        };

        match parse_model_json::<RawClassification>("intent", &response.content).and_then(validate)
        {
            Ok(c) => {
                debug!(workspace_id, intent = %c.intent, confidence = c.confidence, "classified");
                Ok(c)
            }
            Err(e) => {
                warn!(workspace_id, error = %e, "discarding classifier output");
                Ok(Classification::fallback())
            }
        }
    }
}

// Entries must not mean anything else in another language. Short
// syllables such as "ha", "hai", "da" or "la" go to the model.
const AFFIRMATIONS: &[&str] = &[
    "yes", "y", "yeah", "yep", "yup", "yes please", "sure", "ok", "okay", "confirm",
    "confirmed", "correct", "right", "go ahead", "do it", "sounds good", "perfect", "deal",
    "si", "sí", "claro", "vale", "oui", "ouais", "ja", "jawohl", "sim", "haan", "haa", "ji haan",
    "theek hai", "ndiyo", "naam", "aiwa", "evet", "tak", "iya", "betul", "はい", "是", "好",
    "对", "네", "예", "👍",
];

const NEGATIONS: &[&str] = &[
    "no", "n", "nope", "nah", "no thanks", "no thank you", "not now", "don't", "dont",
    "never mind", "nevermind", "non", "nein", "não", "nao", "nahi", "nahin", "nai", "hapana",
    "hayir", "hayır", "nie", "tidak", "nggak", "enggak", "nej", "いいえ", "不", "不要",
    "아니요", "아니", "👎",
];

/// Lowercases and strips surrounding punctuation and whitespace.
fn normalize_answer(text: &str) -> String {
    text.trim()
        .trim_matches(|c: char| c.is_ascii_punctuation() || c.is_whitespace() || c == '¡' || c == '¿')
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .to_lowercase()
}

/// Exact whole-message lookup in the multilingual lexicon.
pub fn lexicon_confirmation(text: &str) -> Option<Confirmation> {
    let answer = normalize_answer(text);
    if AFFIRMATIONS.contains(&answer.as_str()) {
        Some(Confirmation::Yes)
    } else if NEGATIONS.contains(&answer.as_str()) {
        Some(Confirmation::No)
    } else {
        None
    }
}

#[derive(Debug, Deserialize)]
struct RawConfirmation {
    answer: String,
}

/// Resolves yes/no answers: lexicon first, model second.
pub struct ConfirmationClassifier {
    llm: Arc<dyn LanguageModel>,
}

impl ConfirmationClassifier {
    pub fn new(llm: Arc<dyn LanguageModel>) -> Self {
        Self { llm }
    }

    async fn ask_model(&self, workspace_id: &str, text: &str) -> Result<Confirmation, ParleyError> {
        let request = ChatRequest::new(vec![
            ChatMessage::system(CONFIRMATION_PROMPT),
            ChatMessage::user(text),
        ])
        .json()
        .with_temperature(0.0);
        let response = self
            .llm
            .chat(&CallContext::customer(workspace_id), request)
            .await?;
        let raw: RawConfirmation = parse_model_json("confirmation", &response.content)?;
        Ok(Confirmation::from_str(raw.answer.trim().to_lowercase().as_str())
            .unwrap_or(Confirmation::Unknown))
    }
}

#[async_trait]
impl IntentDetector for ConfirmationClassifier {
    async fn confirm(&self, workspace_id: &str, text: &str) -> Confirmation {
        if text.trim().is_empty() {
            return Confirmation::Unknown;
        }
        if let Some(hit) = lexicon_confirmation(text) {
            return hit;
        }
        match self.ask_model(workspace_id, text).await {
            Ok(answer) => answer,
            Err(e) => {
                warn!(workspace_id, error = %e, "confirmation classification failed");
                Confirmation::Unknown
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parley_core::{ChatResponse, TokenUsage};
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct Scripted {
        replies: Mutex<Vec<Result<String, ParleyError>>>,
        calls: AtomicUsize,
    }

    impl Scripted {
        fn new(replies: Vec<Result<String, ParleyError>>) -> Arc<Self> {
            Arc::new(Self {
                replies: Mutex::new(replies),
                calls: AtomicUsize::new(0),
            })
        }
    }

    #[async_trait]
    impl LanguageModel for Scripted {
        async fn chat(
            &self,
            _ctx: &CallContext,
            _request: ChatRequest,
        ) -> Result<ChatResponse, ParleyError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let next = self.replies.lock().unwrap().remove(0)?;
            Ok(ChatResponse {
                content: next,
                usage: TokenUsage::default(),
                tool_calls: Vec::new(),
                model: "test".into(),
            })
        }

        async fn embed(&self, _ctx: &CallContext, _text: &str) -> Result<Vec<f32>, ParleyError> {
            Ok(vec![0.0; 4])
        }
    }

    #[tokio::test]
    async fn valid_label_is_accepted() {
        let llm = Scripted::new(vec![Ok(
            r#"{"intent":"price_check","confidence":0.92,"rationale":"asks cost","language":"EN-us"}"#
                .into(),
        )]);
        let c = IntentClassifier::new(llm)
            .classify("ws", "How much is the red scarf?")
            .await
            .unwrap();
        assert_eq!(c.intent, Intent::PriceCheck);
        assert!((c.confidence - 0.92).abs() < 1e-6);
        assert_eq!(c.language.as_deref(), Some("en"));
    }

    #[tokio::test]
    async fn confident_unknown_is_a_contract_violation() {
        let llm = Scripted::new(vec![Ok(r#"{"intent":"unknown","confidence":0.9}"#.into())]);
        let c = IntentClassifier::new(llm).classify("ws", "??").await.unwrap();
        assert_eq!(c, Classification::fallback());
    }

    #[tokio::test]
    async fn unlisted_label_and_provider_error_fall_back() {
        let llm = Scripted::new(vec![
            Ok(r#"{"intent":"refund","confidence":0.7}"#.into()),
            Err(ParleyError::provider("groq", "503")),
        ]);
        let classifier = IntentClassifier::new(llm);
        assert_eq!(
            classifier.classify("ws", "a").await.unwrap().intent,
            Intent::Unknown
        );
        assert_eq!(
            classifier.classify("ws", "b").await.unwrap().confidence,
            0.0
        );
    }

    #[tokio::test]
    async fn access_denial_propagates() {
        let llm = Scripted::new(vec![Err(ParleyError::AccessDenied {
            reason: parley_core::DenialReason::TrialExpired,
        })]);
        let err = IntentClassifier::new(llm).classify("ws", "hi").await.unwrap_err();
        assert!(err.is_access_denied());
    }

    #[test]
    fn lexicon_is_whole_message_and_multilingual() {
        assert_eq!(lexicon_confirmation("Yes!"), Some(Confirmation::Yes));
        assert_eq!(lexicon_confirmation("  sí "), Some(Confirmation::Yes));
        assert_eq!(lexicon_confirmation("haan"), Some(Confirmation::Yes));
        assert_eq!(lexicon_confirmation("Nope."), Some(Confirmation::No));
        assert_eq!(lexicon_confirmation("nahi"), Some(Confirmation::No));
        assert_eq!(lexicon_confirmation("yes but change the time"), None);
        assert_eq!(lexicon_confirmation("maybe"), None);
    }

    #[test]
    fn ambiguous_short_words_are_left_to_the_model() {
        for word in ["k", "ha", "Ha!", "hai", "la", "na", "ya", "da", "han"] {
            assert_eq!(lexicon_confirmation(word), None, "{word}");
        }
    }

    #[tokio::test]
    async fn lexicon_hits_skip_the_model() {
        let llm = Scripted::new(vec![]);
        let detector = ConfirmationClassifier::new(llm.clone());
        assert_eq!(detector.confirm("ws", "OK").await, Confirmation::Yes);
        assert_eq!(detector.confirm("ws", "").await, Confirmation::Unknown);
        assert_eq!(llm.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn model_resolves_code_switched_answers() {
        let llm = Scripted::new(vec![
            Ok(r#"{"answer":"yes"}"#.into()),
            Ok("not json".into()),
        ]);
        let detector = ConfirmationClassifier::new(llm);
        assert_eq!(
            detector.confirm("ws", "haan bhai book kar do").await,
            Confirmation::Yes
        );
        assert_eq!(detector.confirm("ws", "hmm").await, Confirmation::Unknown);
    }
}
