// SPDX-FileCopyrightText: 2026 Parley Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Test utilities for Parley integration tests.
//!
//! Provides mock collaborators and a test harness for fast, deterministic,
//! CI-runnable tests without external services.
//!
//! # Components
//!
//! - [`MockProvider`] - Scripted language model with failure injection and call counting
//! - [`MockMessenger`] - Outbound messenger that captures sends and can fail on demand
//! - [`TestHarness`] - A full [`InteractionProcessor`](parley_agent::InteractionProcessor) over in-memory storage

pub mod harness;
pub mod mock_messenger;
pub mod mock_provider;

pub use harness::{TestHarness, TestHarnessBuilder};
pub use mock_messenger::MockMessenger;
pub use mock_provider::MockProvider;
