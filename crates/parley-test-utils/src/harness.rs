// SPDX-FileCopyrightText: 2026 Parley Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Test harness for end-to-end integration testing.
//!
//! `TestHarness` assembles a complete [`InteractionProcessor`] with a
//! scripted model, a capturing messenger and in-memory storage. Provides
//! `receive()` to drive an inbound message through the full pipeline.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use parley_agent::{
    CatalogCommerce, InteractionProcessor, ProcessOutcome, ProcessorDeps, ProcessorStores,
    QueueWorker, ToolRegistry,
};
use parley_config::ParleyConfig;
use parley_core::{
    Customer, CustomerStore, InsertOutcome, Interaction, InteractionStore, KnowledgeItem,
    KnowledgeStore, NewInteraction, ParleyError, Workspace, WorkspaceStore,
};
use parley_provider::{MemoryCounterStore, RateLimiter};
use parley_storage::MemoryStore;

use crate::mock_messenger::MockMessenger;
use crate::mock_provider::MockProvider;

pub const WORKSPACE_ID: &str = "ws-test";
pub const PLATFORM: &str = "instagram";
pub const CUSTOMER: &str = "customer-1";

/// Builder for creating test environments with configurable options.
pub struct TestHarnessBuilder {
    responses: Vec<String>,
    workspace: Workspace,
    config: ParleyConfig,
    knowledge: Vec<KnowledgeItem>,
}

impl TestHarnessBuilder {
    fn new() -> Self {
        Self {
            responses: Vec::new(),
            workspace: Workspace::new(WORKSPACE_ID, "Test Boutique"),
            config: ParleyConfig::default(),
            knowledge: Vec::new(),
        }
    }

    /// Set scripted model replies, consumed in order.
    pub fn with_mock_responses(mut self, responses: Vec<String>) -> Self {
        self.responses = responses;
        self
    }

    pub fn with_workspace(mut self, update: impl FnOnce(&mut Workspace)) -> Self {
        update(&mut self.workspace);
        self
    }

    pub fn with_config(mut self, update: impl FnOnce(&mut ParleyConfig)) -> Self {
        update(&mut self.config);
        self
    }

    /// Adds a knowledge item to the test workspace.
    pub fn with_knowledge(mut self, name: &str, content: &str, category: &str) -> Self {
        self.knowledge
            .push(KnowledgeItem::new(WORKSPACE_ID, name, content, category));
        self
    }

    pub async fn build(self) -> Result<TestHarness, ParleyError> {
        let store = Arc::new(MemoryStore::new());
        store.upsert_workspace(&self.workspace).await?;

        let provider = Arc::new(MockProvider::with_responses(self.responses));
        for mut item in self.knowledge {
            item.embedding = Some(provider.embedding_for(&format!("{} {}", item.name, item.content)));
            store.insert_item(&item).await?;
        }

        let messenger = Arc::new(MockMessenger::new(PLATFORM));
        let tools = Arc::new(ToolRegistry::commerce(Arc::new(
            CatalogCommerce::new(store.clone(), store.clone())
                .with_cart_ttl(Duration::from_secs(self.config.agent.cart_ttl_secs)),
        )));
        let stores = ProcessorStores {
            workspaces: store.clone(),
            interactions: store.clone(),
            customers: store.clone(),
            knowledge: store.clone(),
            tickets: store.clone(),
            orders: store.clone(),
            queue: store.clone(),
        };
        let processor = Arc::new(InteractionProcessor::new(
            ProcessorDeps {
                stores,
                llm: provider.clone(),
                limiter: RateLimiter::new(Arc::new(MemoryCounterStore::new())),
                messengers: vec![messenger.clone()],
                tools,
            },
            self.config.clone(),
        ));
        let worker = QueueWorker::new(processor.clone(), store.clone(), self.config.worker.clone());

        Ok(TestHarness {
            provider,
            messenger,
            store,
            processor,
            worker,
            config: self.config,
            next_message: AtomicU64::new(1),
        })
    }
}

/// A complete test environment with mock collaborators and in-memory storage.
pub struct TestHarness {
    pub provider: Arc<MockProvider>,
    pub messenger: Arc<MockMessenger>,
    pub store: Arc<MemoryStore>,
    pub processor: Arc<InteractionProcessor>,
    pub worker: QueueWorker,
    pub config: ParleyConfig,
    next_message: AtomicU64,
}

impl TestHarness {
    pub fn builder() -> TestHarnessBuilder {
        TestHarnessBuilder::new()
    }

    /// An inbound message from `author` with a fresh external id.
    pub fn inbound(&self, author: &str, text: &str) -> NewInteraction {
        let n = self.next_message.fetch_add(1, Ordering::SeqCst);
        NewInteraction {
            workspace_id: WORKSPACE_ID.into(),
            platform: PLATFORM.into(),
            external_id: format!("ext-{n}"),
            conversation_id: Some(format!("conv-{author}")),
            author_id: author.into(),
            author_name: None,
            content: text.into(),
        }
    }

    /// Accepts and processes a message from the default customer.
    pub async fn receive(&self, text: &str) -> Result<ProcessOutcome, ParleyError> {
        self.receive_from(CUSTOMER, text).await
    }

    pub async fn receive_from(
        &self,
        author: &str,
        text: &str,
    ) -> Result<ProcessOutcome, ParleyError> {
        let accepted = self.processor.accept_inbound(self.inbound(author, text)).await?;
        let id = match accepted {
            InsertOutcome::Created(id) | InsertOutcome::Duplicate(id) => id,
        };
        self.processor.process_interaction(&id).await
    }

    pub async fn customer(&self) -> Result<Customer, ParleyError> {
        self.store
            .find_or_create_customer(WORKSPACE_ID, PLATFORM, CUSTOMER, None)
            .await
    }

    pub async fn interaction(&self, id: &str) -> Result<Interaction, ParleyError> {
        self.store
            .get_interaction(id)
            .await?
            .ok_or_else(|| ParleyError::not_found("interaction", id))
    }

    /// Id of the first knowledge item with this name.
    pub async fn knowledge_id(&self, name: &str) -> Option<String> {
        self.store
            .find_active_by_name(WORKSPACE_ID, name)
            .await
            .ok()
            .flatten()
            .map(|item| item.id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn harness_builds_with_seeded_workspace_and_knowledge() {
        let harness = TestHarness::builder()
            .with_knowledge("Red Scarf", "$25", "product")
            .build()
            .await
            .unwrap();
        assert!(harness.knowledge_id("red scarf").await.is_some());
        let ws = harness.store.get_workspace(WORKSPACE_ID).await.unwrap();
        assert_eq!(ws.unwrap().persona.business_name, "Test Boutique");
    }
}
