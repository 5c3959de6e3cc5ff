// SPDX-FileCopyrightText: 2026 Parley Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Provider runtime for the Parley conversation engine.
//!
//! Resolves per-workspace AI policy behind a versioned cache, enforces access
//! control and rate limits, and walks an ordered fallback chain of chat
//! providers with bounded retry. Concrete provider clients live in adapter
//! crates and are plugged in through [`parley_core::ProviderFactory`].

pub mod access;
pub mod cache;
pub mod chain;
pub mod counter;
pub mod rate_limit;
pub mod retry;
pub mod runtime;
pub mod settings;
pub mod usage;

pub use access::AccessGuard;
pub use cache::{PolicyVersion, VersionedCache};
pub use counter::{FallbackCounterStore, MemoryCounterStore};
pub use rate_limit::{RateLimiter, RateScope};
pub use retry::with_retry;
pub use runtime::{ProviderRuntime, RuntimeStores};
pub use settings::SettingsResolver;
