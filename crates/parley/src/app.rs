// SPDX-FileCopyrightText: 2026 Parley Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Wires the storage, provider runtime and processor into one application.

use std::sync::Arc;
use std::time::Duration;

use parley_agent::{
    CatalogCommerce, InteractionProcessor, ProcessorDeps, ProcessorStores, QueueWorker,
    ToolRegistry,
};
use parley_config::ParleyConfig;
use parley_core::ParleyError;
use parley_openai::CompatFactory;
use parley_provider::{ProviderRuntime, RuntimeStores};
use parley_storage::SqliteStore;
use tracing::info;

use crate::outbound::build_messengers;

pub struct App {
    pub store: SqliteStore,
    pub runtime: Arc<ProviderRuntime>,
    pub commerce: Arc<CatalogCommerce>,
    pub processor: Arc<InteractionProcessor>,
    pub worker: QueueWorker,
}

impl App {
    pub async fn build(config: &ParleyConfig) -> Result<Self, ParleyError> {
        let store = SqliteStore::open(&config.storage).await?;
        let shared = Arc::new(store.clone());
        info!(path = %config.storage.database_path, "storage opened");

        let runtime = Arc::new(ProviderRuntime::new(
            config,
            RuntimeStores {
                settings: shared.clone(),
                workspaces: shared.clone(),
                usage: shared.clone(),
                counters: shared.clone(),
            },
            Arc::new(CompatFactory::from_config(&config.providers)),
        ));

        let messengers = build_messengers(&config.outbound)?;
        let commerce = Arc::new(
            CatalogCommerce::new(shared.clone(), shared.clone())
                .with_cart_ttl(Duration::from_secs(config.agent.cart_ttl_secs)),
        );
        let tools = Arc::new(ToolRegistry::commerce(commerce.clone()));

        let processor = Arc::new(InteractionProcessor::new(
            ProcessorDeps {
                stores: ProcessorStores {
                    workspaces: shared.clone(),
                    interactions: shared.clone(),
                    customers: shared.clone(),
                    knowledge: shared.clone(),
                    tickets: shared.clone(),
                    orders: shared.clone(),
                    queue: shared.clone(),
                },
                llm: runtime.clone(),
                limiter: runtime.limiter(),
                messengers,
                tools,
            },
            config.clone(),
        ));
        let worker = QueueWorker::new(processor.clone(), shared, config.worker.clone());

        Ok(Self {
            store,
            runtime,
            commerce,
            processor,
            worker,
        })
    }

    pub async fn close(self) -> Result<(), ParleyError> {
        drop(self.worker);
        drop(self.processor);
        drop(self.commerce);
        drop(self.runtime);
        self.store.close().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn builds_against_a_fresh_database() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = ParleyConfig::default();
        config.storage.database_path = dir.path().join("parley.db").display().to_string();

        let app = App::build(&config).await.unwrap();
        app.store.health_check().await.unwrap();
        assert_eq!(app.worker.run_pending().await.unwrap(), 0);
        assert_eq!(app.commerce.sweep_carts(), 0);
        app.close().await.unwrap();
    }
}
