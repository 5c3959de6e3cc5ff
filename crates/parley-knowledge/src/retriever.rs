// SPDX-FileCopyrightText: 2026 Parley Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Hybrid retriever combining vector similarity, keyword hits, recency and
//! intent-category boosts.
//!
//! The retriever embeds the (possibly expanded) query and runs the vector
//! search alongside an FTS keyword search, scores the union of both candidate
//! sets, keeps the best items above the score floor and finally pulls in the
//! weakly referenced related items of the survivors at a fixed lower score.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::Utc;
use parley_config::model::RetrievalConfig;
use parley_core::{CallContext, Intent, KnowledgeItem, KnowledgeStore, LanguageModel, ParleyError};
use tracing::{debug, warn};

use crate::scoring::{ScoreInputs, category_boost, hybrid_score, keyword_terms, recency_boost};

const MAX_TERMS: usize = 12;

/// What to search for.
#[derive(Debug, Clone, Copy)]
pub struct RetrievalQuery<'a> {
    pub workspace_id: &'a str,
    pub message: &'a str,
    pub intent: Intent,
    /// The assistant's previous reply, used to resolve short follow-ups.
    pub previous_reply: Option<&'a str>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ScoredItem {
    pub item: KnowledgeItem,
    pub score: f32,
    /// Pulled in through another item's `related_item_ids`.
    pub related: bool,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct Retrieval {
    pub items: Vec<ScoredItem>,
    /// The two best matches are near-tied and name different things.
    pub ambiguous: bool,
}

impl Retrieval {
    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn ids(&self) -> Vec<String> {
        self.items.iter().map(|s| s.item.id.clone()).collect()
    }

    pub fn contains(&self, id: &str) -> bool {
        self.items.iter().any(|s| s.item.id == id)
    }
}

/// Appends the previous assistant turn to short messages so that "how much
/// is it?" still finds the item under discussion.
pub fn expand_query(message: &str, previous_reply: Option<&str>, max_words: usize) -> String {
    match previous_reply {
        Some(prev) if !prev.trim().is_empty() && message.split_whitespace().count() <= max_words => {
            format!("{}\n{}", prev.trim(), message.trim())
        }
        _ => message.trim().to_string(),
    }
}

pub struct KnowledgeRetriever {
    store: Arc<dyn KnowledgeStore>,
    llm: Arc<dyn LanguageModel>,
    config: RetrievalConfig,
}

struct Candidate {
    item: KnowledgeItem,
    similarity: f32,
    keyword_hit: bool,
}

impl KnowledgeRetriever {
    pub fn new(
        store: Arc<dyn KnowledgeStore>,
        llm: Arc<dyn LanguageModel>,
        config: RetrievalConfig,
    ) -> Self {
        Self { store, llm, config }
    }

    /// Never fails: any error is logged and yields an empty result.
    pub async fn retrieve(&self, query: RetrievalQuery<'_>) -> Retrieval {
        match self.try_retrieve(query).await {
            Ok(found) => found,
            Err(e) => {
                warn!(
                    workspace_id = query.workspace_id,
                    error = %e,
                    "knowledge retrieval failed, continuing without knowledge"
                );
                Retrieval::default()
            }
        }
    }

    async fn try_retrieve(&self, query: RetrievalQuery<'_>) -> Result<Retrieval, ParleyError> {
        let cfg = &self.config;
        let text = expand_query(query.message, query.previous_reply, cfg.follow_up_max_words);
        let terms = keyword_terms(&text, MAX_TERMS);
        let ctx = CallContext::customer(query.workspace_id);

        let vector = async {
            let embedding = self.llm.embed(&ctx, &text).await?;
            let hits = self
                .store
                .vector_search(
                    query.workspace_id,
                    &embedding,
                    cfg.similarity_floor,
                    cfg.candidate_limit,
                )
                .await?;
            Ok::<_, ParleyError>((embedding, hits))
        };
        let keyword = self
            .store
            .keyword_search(query.workspace_id, &terms, cfg.candidate_limit);
        let (vector, keyword) = tokio::join!(vector, keyword);
        let keyword_hits = keyword?;
        let (embedding, vector_hits) = match vector {
            Ok(found) => found,
            Err(e) if e.is_access_denied() => return Err(e),
            Err(e) => {
                warn!(
                    workspace_id = query.workspace_id,
                    error = %e,
                    "vector search failed, using keyword matches only"
                );
                (Vec::new(), Vec::new())
            }
        };

        let now = Utc::now();
        let mut candidates: HashMap<String, Candidate> = HashMap::new();
        for (item, similarity) in vector_hits {
            candidates.insert(
                item.id.clone(),
                Candidate {
                    item,
                    similarity,
                    keyword_hit: false,
                },
            );
        }
        for item in keyword_hits {
            candidates
                .entry(item.id.clone())
                .and_modify(|c| c.keyword_hit = true)
                .or_insert_with(|| {
                    let similarity = item
                        .embedding
                        .as_deref()
                        .map(|e| cosine(e, &embedding))
                        .unwrap_or(0.0);
                    Candidate {
                        item,
                        similarity,
                        keyword_hit: true,
                    }
                });
        }
        let candidate_count = candidates.len();

        let mut scored: Vec<ScoredItem> = candidates
            .into_values()
            .filter(|c| c.item.is_active(now))
            .map(|c| {
                let inputs = ScoreInputs {
                    similarity: c.similarity,
                    keyword_hit: c.keyword_hit,
                    recency: recency_boost(c.item.updated_at, now, cfg.recency_window_days),
                    category: category_boost(query.intent, &c.item.category),
                };
                ScoredItem {
                    score: hybrid_score(&cfg.weights, inputs),
                    item: c.item,
                    related: false,
                }
            })
            .filter(|s| s.score >= cfg.score_floor)
            .collect();
        scored.sort_by(|a, b| b.score.total_cmp(&a.score));
        scored.truncate(cfg.max_results);

        let ambiguous = is_ambiguous(&scored, cfg.ambiguity_margin);
        let related = self.related_items(query.workspace_id, &scored).await;
        debug!(
            workspace_id = query.workspace_id,
            candidates = candidate_count,
            kept = scored.len(),
            related = related.len(),
            ambiguous,
            "knowledge retrieved"
        );
        scored.extend(related);
        Ok(Retrieval {
            items: scored,
            ambiguous,
        })
    }

    /// Fetches related items not already in `scored`. Failures only lose the
    /// expansion.
    async fn related_items(&self, workspace_id: &str, scored: &[ScoredItem]) -> Vec<ScoredItem> {
        let mut wanted: Vec<String> = Vec::new();
        for s in scored {
            for id in &s.item.related_item_ids {
                if !wanted.contains(id) && !scored.iter().any(|x| &x.item.id == id) {
                    wanted.push(id.clone());
                }
            }
        }
        if wanted.is_empty() {
            return Vec::new();
        }
        match self.store.get_items(workspace_id, &wanted).await {
            Ok(items) => items
                .into_iter()
                .map(|item| ScoredItem {
                    item,
                    score: self.config.related_item_score,
                    related: true,
                })
                .collect(),
            Err(e) => {
                warn!(workspace_id, error = %e, "related item expansion failed");
                Vec::new()
            }
        }
    }
}

fn is_ambiguous(scored: &[ScoredItem], margin: f32) -> bool {
    match scored {
        [first, second, ..] => {
            (first.score - second.score).abs() <= margin
                && !first.item.name.trim().eq_ignore_ascii_case(second.item.name.trim())
        }
        _ => false,
    }
}

fn cosine(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }
    let dot: f32 = a.iter().zip(b).map(|(x, y)| x * y).sum();
    let na: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let nb: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();
    if na == 0.0 || nb == 0.0 {
        0.0
    } else {
        (dot / (na * nb)).max(0.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use parley_core::{ChatRequest, ChatResponse};
    use parley_storage::MemoryStore;
    use std::sync::atomic::{AtomicBool, Ordering};

    /// Embeds by keyword: one axis per known word.
    struct AxisEmbedder {
        fail: AtomicBool,
    }

    const AXES: [&str; 4] = ["scarf", "hat", "delivery", "red"];

    #[async_trait]
    impl LanguageModel for AxisEmbedder {
        async fn chat(&self, _: &CallContext, _: ChatRequest) -> Result<ChatResponse, ParleyError> {
            Err(ParleyError::Internal("chat not scripted".into()))
        }

        async fn embed(&self, _: &CallContext, text: &str) -> Result<Vec<f32>, ParleyError> {
            if self.fail.load(Ordering::SeqCst) {
                return Err(ParleyError::provider("mock", "down"));
            }
            let lower = text.to_lowercase();
            Ok(AXES
                .iter()
                .map(|w| if lower.contains(w) { 1.0 } else { 0.0 })
                .collect())
        }
    }

    fn item(name: &str, content: &str, category: &str, embedding: [f32; 4]) -> KnowledgeItem {
        let mut item = KnowledgeItem::new("ws", name, content, category);
        item.embedding = Some(embedding.to_vec());
        item
    }

    async fn setup(
        items: Vec<KnowledgeItem>,
    ) -> (Arc<MemoryStore>, KnowledgeRetriever, Arc<AxisEmbedder>) {
        let store = Arc::new(MemoryStore::new());
        for i in &items {
            store.insert_item(i).await.unwrap();
        }
        let llm = Arc::new(AxisEmbedder {
            fail: AtomicBool::new(false),
        });
        let retriever =
            KnowledgeRetriever::new(store.clone(), llm.clone(), RetrievalConfig::default());
        (store, retriever, llm)
    }

    fn query<'a>(message: &'a str, intent: Intent) -> RetrievalQuery<'a> {
        RetrievalQuery {
            workspace_id: "ws",
            message,
            intent,
            previous_reply: None,
        }
    }

    #[tokio::test]
    async fn finds_matching_item_first() {
        let scarf = item("Red Scarf", "$25", "product", [1.0, 0.0, 0.0, 1.0]);
        let hat = item("Hat", "$10", "product", [0.0, 1.0, 0.0, 0.0]);
        let (_, retriever, _) = setup(vec![scarf.clone(), hat]).await;

        let found = retriever
            .retrieve(query("How much is the red scarf?", Intent::PriceCheck))
            .await;
        assert_eq!(found.items[0].item.id, scarf.id);
        assert!(!found.items.iter().any(|s| s.item.name == "Hat"));
        assert!(!found.ambiguous);
    }

    #[tokio::test]
    async fn expired_and_deprecated_items_are_excluded() {
        let mut promo = item("Scarf promo", "scarf 2 for 1", "promotion", [1.0, 0.0, 0.0, 0.0]);
        promo.expires_at = Some(Utc::now() - chrono::Duration::hours(1));
        let mut old = item("Scarf", "scarf costs 20", "product", [1.0, 0.0, 0.0, 0.0]);
        old.deprecated = true;
        let (_, retriever, _) = setup(vec![promo, old]).await;

        let found = retriever.retrieve(query("scarf price", Intent::PriceCheck)).await;
        assert!(found.is_empty());
    }

    #[tokio::test]
    async fn related_items_are_appended_at_fixed_score() {
        let mut scarf = item("Red Scarf", "$25", "product", [1.0, 0.0, 0.0, 1.0]);
        let pin = item("Brooch", "Silver brooch, $3", "accessory", [0.0, 0.0, 0.0, 0.0]);
        scarf.related_item_ids = vec![pin.id.clone()];
        let (_, retriever, _) = setup(vec![scarf, pin.clone()]).await;

        let found = retriever.retrieve(query("red scarf", Intent::PriceCheck)).await;
        let related = found.items.iter().find(|s| s.item.id == pin.id).unwrap();
        assert!(related.related);
        assert_eq!(related.score, RetrievalConfig::default().related_item_score);
        assert!(!found.items[0].related);
    }

    #[tokio::test]
    async fn short_follow_up_uses_previous_reply() {
        let hat = item("Hat", "Wool hat, $10", "product", [0.0, 1.0, 0.0, 0.0]);
        let (_, retriever, _) = setup(vec![hat.clone()]).await;

        let bare = retriever.retrieve(query("how much?", Intent::PriceCheck)).await;
        assert!(bare.is_empty());

        let mut q = query("how much?", Intent::PriceCheck);
        q.previous_reply = Some("We have a lovely wool hat in stock.");
        let found = retriever.retrieve(q).await;
        assert!(found.contains(&hat.id));
    }

    #[tokio::test]
    async fn near_tie_between_different_names_is_ambiguous() {
        let a = item("Blue scarf", "scarf", "product", [1.0, 0.0, 0.0, 0.0]);
        let b = item("Green scarf", "scarf", "product", [1.0, 0.0, 0.0, 0.0]);
        let (_, retriever, _) = setup(vec![a, b]).await;

        let found = retriever.retrieve(query("scarf", Intent::ProductInquiry)).await;
        assert_eq!(found.items.len(), 2);
        assert!(found.ambiguous);
    }

    #[tokio::test]
    async fn embedding_failure_keeps_keyword_matches() {
        let scarf = item("Red Scarf", "$25", "product", [1.0, 0.0, 0.0, 1.0]);
        let scarf_id = scarf.id.clone();
        let (_, retriever, llm) = setup(vec![scarf]).await;
        llm.fail.store(true, Ordering::SeqCst);

        let found = retriever.retrieve(query("red scarf", Intent::PriceCheck)).await;
        assert!(found.contains(&scarf_id));

        let nothing = retriever.retrieve(query("opening hours", Intent::ProductInquiry)).await;
        assert!(nothing.is_empty());
    }

    #[test]
    fn expansion_only_for_short_messages() {
        assert_eq!(expand_query("how much?", Some("The hat"), 6), "The hat\nhow much?");
        assert_eq!(
            expand_query("tell me about all the winter hats you have today", Some("x"), 6),
            "tell me about all the winter hats you have today"
        );
        assert_eq!(expand_query(" hi ", None, 6), "hi");
    }
}
