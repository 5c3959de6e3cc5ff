// SPDX-FileCopyrightText: 2026 Parley Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Seams between the orchestration core and its collaborators.
//!
//! All traits use `#[async_trait]` for dynamic dispatch compatibility.

pub mod channel;
pub mod counter;
pub mod provider;
pub mod queue;
pub mod store;

pub use channel::{Messenger, OutboundMessage};
pub use counter::CounterStore;
pub use provider::{ChatProvider, LanguageModel, ProviderFactory};
pub use queue::JobQueue;
pub use store::{
    CustomerStore, InteractionStore, KnowledgeStore, OrderStore, SettingsStore, TicketStore,
    UsageStore, WorkspaceStore,
};
