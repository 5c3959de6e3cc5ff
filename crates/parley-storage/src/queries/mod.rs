// SPDX-FileCopyrightText: 2026 Parley Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Query modules for CRUD operations on storage entities.

pub mod counters;
pub mod customers;
pub mod interactions;
pub mod jobs;
pub mod knowledge;
pub mod orders;
pub mod tickets;
pub mod usage;
pub mod workspaces;
