// SPDX-FileCopyrightText: 2026 Parley Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! SQLite persistence layer for the Parley conversation engine.
//!
//! Provides WAL-mode SQLite storage with embedded migrations, a single
//! serialized connection via `tokio-rusqlite`, typed query modules for every
//! entity, a crash-safe job queue and shared counters. [`MemoryStore`] offers
//! the same trait surface without a database.

pub mod adapter;
pub mod codec;
pub mod database;
pub mod memory;
pub mod migrations;
pub mod queries;

pub use adapter::SqliteStore;
pub use database::Database;
pub use memory::MemoryStore;
