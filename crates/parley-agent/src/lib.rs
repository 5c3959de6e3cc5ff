// SPDX-FileCopyrightText: 2026 Parley Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Conversation engine for Parley.
//!
//! Classifies inbound messages, grounds replies in the workspace knowledge
//! base, runs structured capture flows through a deterministic state
//! machine, routes uncertain turns to a human, and drives each interaction
//! to a terminal status through the [`InteractionProcessor`].

pub mod classifier;
pub mod escalation;
pub mod generator;
pub mod leaked_calls;
pub mod lock;
pub mod orders;
pub mod processor;
pub mod prompts;
pub mod shutdown;
pub mod state_machine;
pub mod tools;
pub mod translate;
pub mod worker;

pub use classifier::{Classification, ConfirmationClassifier, IntentClassifier};
pub use escalation::{EscalationManager, EscalationPolicy, Resolution};
pub use generator::{GeneratedReply, GenerationInput, ResponseGenerator};
pub use leaked_calls::extract_structured_calls;
pub use processor::{InteractionProcessor, ProcessOutcome, ProcessorDeps, ProcessorStores};
pub use state_machine::{IntentDetector, OrderCreator, OrderLookup, StateMachine, Step};
pub use tools::{CatalogCommerce, Commerce, SystemAction, ToolContext, ToolRegistry, ToolResult};
pub use translate::Translator;
pub use worker::QueueWorker;
