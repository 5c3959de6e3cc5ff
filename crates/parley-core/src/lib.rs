// SPDX-FileCopyrightText: 2026 Parley Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Core library for the Parley conversation engine.
//!
//! This crate provides the error type, domain entities, provider-facing
//! types and the collaborator traits used throughout the Parley workspace.
//! Every other crate implements or consumes traits defined here.

pub mod conversation;
pub mod entities;
pub mod error;
pub mod json;
pub mod traits;
pub mod types;

pub use conversation::ConversationState;
pub use entities::*;
pub use error::{DenialReason, ParleyError};
pub use json::parse_model_json;
pub use types::*;

pub use traits::{
    ChatProvider, CounterStore, CustomerStore, InteractionStore, JobQueue, KnowledgeStore,
    LanguageModel, Messenger, OrderStore, OutboundMessage, ProviderFactory, SettingsStore,
    TicketStore, UsageStore, WorkspaceStore,
};
