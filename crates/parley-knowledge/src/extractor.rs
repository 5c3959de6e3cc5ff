// SPDX-FileCopyrightText: 2026 Parley Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Turning a human's free-text answer into stored knowledge.
//!
//! The coach model extracts structured candidates from the answer. Each valid
//! candidate is compared with the active item of the same name: identical
//! facts are skipped, contradicting ones deprecate the stored item and record
//! a new one. Nothing is ever overwritten in place or deleted.

use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use parley_core::{
    CallContext, ChatMessage, ChatRequest, FactComparison, KnowledgeItem, KnowledgeSource,
    KnowledgeStore, LanguageModel, ParleyError, parse_model_json,
};
use serde::Deserialize;
use tracing::{debug, info, warn};

const MAX_NAME_CHARS: usize = 120;

const EXTRACTION_PROMPT: &str = r#"You turn a business owner's answer into reusable knowledge-base facts.

Return a JSON object {"items": [...]}. Each item has:
- "name": the product, service or policy the fact is about (short, no sentence)
- "content": the fact as a standalone statement
- "category": one of product, pricing, promotion, delivery, shipping, policy, returns, service, booking, hours, contact, support, faq
- "meta": object of structured fields as strings, e.g. {"price": "25", "currency": "USD"}
- "expires_at": RFC 3339 timestamp if the fact is time-limited, otherwise null

Only include facts stated in the answer. If nothing reusable is stated return {"items": []}.
Output JSON only."#;

/// A fact proposed by extraction, before validation.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct KnowledgeCandidate {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub content: String,
    #[serde(default)]
    pub category: String,
    #[serde(default)]
    pub meta: BTreeMap<String, serde_json::Value>,
    #[serde(default)]
    pub expires_at: Option<DateTime<Utc>>,
}

#[derive(Deserialize)]
struct ExtractionOutput {
    #[serde(default)]
    items: Vec<KnowledgeCandidate>,
}

impl KnowledgeCandidate {
    /// Trims and normalises the candidate, rejecting ones with no name or
    /// content.
    pub fn validate(self, now: DateTime<Utc>) -> Result<KnowledgeCandidate, String> {
        let name: String = self.name.trim().chars().take(MAX_NAME_CHARS).collect();
        let content = self.content.trim().to_string();
        if name.is_empty() {
            return Err("missing name".into());
        }
        if content.is_empty() {
            return Err(format!("{name}: missing content"));
        }
        if self.expires_at.is_some_and(|at| at <= now) {
            return Err(format!("{name}: already expired"));
        }
        let category = match self.category.trim().to_lowercase() {
            c if c.is_empty() => "general".to_string(),
            c => c,
        };
        let meta = self
            .meta
            .into_iter()
            .filter_map(|(k, v)| {
                let value = match v {
                    serde_json::Value::String(s) => s.trim().to_string(),
                    serde_json::Value::Null => return None,
                    other => other.to_string(),
                };
                (!k.trim().is_empty() && !value.is_empty())
                    .then(|| (k.trim().to_lowercase(), serde_json::Value::String(value)))
            })
            .collect();
        Ok(KnowledgeCandidate {
            name,
            content,
            category,
            meta,
            expires_at: self.expires_at,
        })
    }

    fn into_item(self, workspace_id: &str, source: KnowledgeSource) -> KnowledgeItem {
        let mut item = KnowledgeItem::new(workspace_id, self.name, self.content, self.category);
        item.meta = self
            .meta
            .into_iter()
            .map(|(k, v)| match v {
                serde_json::Value::String(s) => (k, s),
                other => (k, other.to_string()),
            })
            .collect();
        item.expires_at = self.expires_at;
        item.source = source;
        item
    }
}

/// What a teach-back changed.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TeachOutcome {
    /// Ids of items recorded for names not known before.
    pub created: Vec<String>,
    /// (deprecated id, replacement id) pairs.
    pub superseded: Vec<(String, String)>,
    /// Ids of stored items the candidate merely repeated.
    pub duplicates: Vec<String>,
    pub rejected: usize,
}

impl TeachOutcome {
    /// Ids of every item now carrying the taught facts.
    pub fn active_ids(&self) -> Vec<String> {
        self.created
            .iter()
            .chain(self.superseded.iter().map(|(_, new)| new))
            .chain(self.duplicates.iter())
            .cloned()
            .collect()
    }
}

pub struct KnowledgeCurator {
    store: Arc<dyn KnowledgeStore>,
    llm: Arc<dyn LanguageModel>,
}

impl KnowledgeCurator {
    pub fn new(store: Arc<dyn KnowledgeStore>, llm: Arc<dyn LanguageModel>) -> Self {
        Self { store, llm }
    }

    /// Asks the coach model for knowledge candidates in `answer`.
    pub async fn extract(
        &self,
        workspace_id: &str,
        question: Option<&str>,
        answer: &str,
    ) -> Result<Vec<KnowledgeCandidate>, ParleyError> {
        let user = match question {
            Some(q) => format!("Customer question: {q}\nOwner answer: {answer}"),
            None => format!("Owner answer: {answer}"),
        };
        let request = ChatRequest::new(vec![
            ChatMessage::system(EXTRACTION_PROMPT),
            ChatMessage::user(user),
        ])
        .json()
        .with_temperature(0.0);
        let response = self
            .llm
            .chat(&CallContext::coach(workspace_id), request)
            .await?;
        let output: ExtractionOutput = parse_model_json("knowledge extraction", &response.content)?;
        Ok(output.items)
    }

    /// Extracts and stores the facts in a human answer. When extraction
    /// yields nothing usable the answer itself is stored as a FAQ entry
    /// named after the question.
    pub async fn learn_from_answer(
        &self,
        workspace_id: &str,
        question: &str,
        answer: &str,
        source: KnowledgeSource,
    ) -> Result<TeachOutcome, ParleyError> {
        let candidates = match self.extract(workspace_id, Some(question), answer).await {
            Ok(c) => c,
            Err(e) => {
                warn!(workspace_id, error = %e, "knowledge extraction failed, storing answer verbatim");
                Vec::new()
            }
        };
        let mut outcome = self.teach(workspace_id, candidates, source).await?;
        if outcome.active_ids().is_empty() && !answer.trim().is_empty() {
            let fallback = KnowledgeCandidate {
                name: question.to_string(),
                content: answer.to_string(),
                category: "faq".into(),
                ..KnowledgeCandidate::default()
            };
            let extra = self.teach(workspace_id, vec![fallback], source).await?;
            outcome.created.extend(extra.created);
            outcome.superseded.extend(extra.superseded);
            outcome.duplicates.extend(extra.duplicates);
        }
        Ok(outcome)
    }

    /// Validates and stores candidates, superseding conflicting facts.
    pub async fn teach(
        &self,
        workspace_id: &str,
        candidates: Vec<KnowledgeCandidate>,
        source: KnowledgeSource,
    ) -> Result<TeachOutcome, ParleyError> {
        let now = Utc::now();
        let mut outcome = TeachOutcome::default();
        for candidate in candidates {
            let candidate = match candidate.validate(now) {
                Ok(c) => c,
                Err(reason) => {
                    debug!(workspace_id, reason = %reason, "knowledge candidate rejected");
                    outcome.rejected += 1;
                    continue;
                }
            };
            let mut item = candidate.into_item(workspace_id, source);
            let existing = self.store.find_active_by_name(workspace_id, &item.name).await?;
            match existing {
                Some(old) if old.compare(&item) == FactComparison::Duplicate => {
                    outcome.duplicates.push(old.id);
                }
                Some(old) => {
                    item.related_item_ids = old.related_item_ids.clone();
                    self.attach_embedding(&mut item).await;
                    let was_active = self.store.supersede_item(&old.id, &item).await?;
                    if !was_active {
                        debug!(old_id = %old.id, "item was already superseded concurrently");
                    }
                    info!(
                        workspace_id,
                        old_id = %old.id,
                        new_id = %item.id,
                        name = %item.name,
                        "knowledge conflict, previous fact deprecated"
                    );
                    outcome.superseded.push((old.id, item.id));
                }
                None => {
                    self.attach_embedding(&mut item).await;
                    self.store.insert_item(&item).await?;
                    outcome.created.push(item.id);
                }
            }
        }
        Ok(outcome)
    }

    /// Best effort: an item without an embedding is still keyword-searchable.
    async fn attach_embedding(&self, item: &mut KnowledgeItem) {
        let text = format!("{}\n{}", item.name, item.content);
        match self
            .llm
            .embed(&CallContext::coach(&item.workspace_id), &text)
            .await
        {
            Ok(v) => item.embedding = Some(v),
            Err(e) => warn!(item = %item.name, error = %e, "embedding failed, stored without vector"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use parley_core::ChatResponse;
    use parley_storage::MemoryStore;
    use std::sync::Mutex;

    struct ScriptedCoach {
        replies: Mutex<Vec<String>>,
    }

    impl ScriptedCoach {
        fn new(replies: &[&str]) -> Arc<Self> {
            Arc::new(Self {
                replies: Mutex::new(replies.iter().rev().map(|s| s.to_string()).collect()),
            })
        }
    }

    #[async_trait]
    impl LanguageModel for ScriptedCoach {
        async fn chat(&self, _: &CallContext, _: ChatRequest) -> Result<ChatResponse, ParleyError> {
            let content = self
                .replies
                .lock()
                .unwrap()
                .pop()
                .ok_or_else(|| ParleyError::provider("mock", "no scripted reply"))?;
            Ok(ChatResponse {
                content,
                ..ChatResponse::default()
            })
        }

        async fn embed(&self, _: &CallContext, _: &str) -> Result<Vec<f32>, ParleyError> {
            Ok(vec![1.0, 0.0])
        }
    }

    fn curator(store: &Arc<MemoryStore>, coach: Arc<ScriptedCoach>) -> KnowledgeCurator {
        KnowledgeCurator::new(store.clone(), coach)
    }

    #[tokio::test]
    async fn new_fact_is_created_with_meta() {
        let store = Arc::new(MemoryStore::new());
        let coach = ScriptedCoach::new(&[r#"{"items":[{"name":"Red Scarf","content":"The red scarf costs $25","category":"Product","meta":{"price":25,"currency":"USD"}}]}"#]);
        let outcome = curator(&store, coach)
            .learn_from_answer("ws", "How much is the red scarf?", "$25", KnowledgeSource::Escalation)
            .await
            .unwrap();

        assert_eq!(outcome.created.len(), 1);
        let item = store.find_active_by_name("ws", "red scarf").await.unwrap().unwrap();
        assert_eq!(item.category, "product");
        assert_eq!(item.meta["price"], "25");
        assert_eq!(item.source, KnowledgeSource::Escalation);
        assert!(item.embedding.is_some());
    }

    #[tokio::test]
    async fn conflicting_fact_deprecates_instead_of_overwriting() {
        let store = Arc::new(MemoryStore::new());
        let mut old = KnowledgeItem::new("ws", "Red Scarf", "The red scarf costs $25", "product");
        old.meta.insert("price".into(), "25".into());
        old.related_item_ids = vec!["pin".into()];
        store.insert_item(&old).await.unwrap();

        let coach = ScriptedCoach::new(&[r#"{"items":[{"name":"red scarf","content":"The red scarf costs $30","category":"product","meta":{"price":"30"}}]}"#]);
        let outcome = curator(&store, coach)
            .learn_from_answer("ws", "price?", "now $30", KnowledgeSource::Escalation)
            .await
            .unwrap();

        assert_eq!(outcome.superseded.len(), 1);
        let all = store.all_items("ws").await;
        assert_eq!(all.len(), 2);
        let stored_old = all.iter().find(|i| i.id == old.id).unwrap();
        assert!(stored_old.deprecated);
        assert_eq!(stored_old.content, "The red scarf costs $25");
        let active = store.find_active_by_name("ws", "Red Scarf").await.unwrap().unwrap();
        assert_eq!(active.meta["price"], "30");
        assert_eq!(active.related_item_ids, vec!["pin".to_string()]);
        assert_eq!(stored_old.superseded_by.as_deref(), Some(active.id.as_str()));
    }

    #[tokio::test]
    async fn repeated_fact_is_a_duplicate() {
        let store = Arc::new(MemoryStore::new());
        let old = KnowledgeItem::new("ws", "Hours", "Open 9 to 5", "hours");
        store.insert_item(&old).await.unwrap();

        let coach = ScriptedCoach::new(&[r#"{"items":[{"name":"Hours","content":"open 9  to 5","category":"hours"}]}"#]);
        let outcome = curator(&store, coach)
            .learn_from_answer("ws", "when open?", "9-5", KnowledgeSource::Manual)
            .await
            .unwrap();
        assert_eq!(outcome.duplicates, vec![old.id]);
        assert_eq!(store.all_items("ws").await.len(), 1);
    }

    #[tokio::test]
    async fn unusable_extraction_falls_back_to_faq() {
        let store = Arc::new(MemoryStore::new());
        let coach = ScriptedCoach::new(&["I could not find anything"]);
        let outcome = curator(&store, coach)
            .learn_from_answer("ws", "Do you ship to Oslo?", "Yes, in 5 days", KnowledgeSource::Escalation)
            .await
            .unwrap();

        assert_eq!(outcome.created.len(), 1);
        let item = store
            .find_active_by_name("ws", "Do you ship to Oslo?")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(item.category, "faq");
        assert_eq!(item.content, "Yes, in 5 days");
    }

    #[test]
    fn validation_rejects_empty_and_expired() {
        let now = Utc::now();
        assert!(KnowledgeCandidate::default().validate(now).is_err());
        let expired = KnowledgeCandidate {
            name: "Promo".into(),
            content: "2 for 1".into(),
            expires_at: Some(now - chrono::Duration::days(1)),
            ..KnowledgeCandidate::default()
        };
        assert!(expired.validate(now).is_err());
        let ok = KnowledgeCandidate {
            name: "  Promo ".into(),
            content: "2 for 1".into(),
            ..KnowledgeCandidate::default()
        }
        .validate(now)
        .unwrap();
        assert_eq!(ok.name, "Promo");
        assert_eq!(ok.category, "general");
    }
}
