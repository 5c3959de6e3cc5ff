// SPDX-FileCopyrightText: 2026 Parley Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Shared counter store used for rate limiting, settings versioning and
//! usage aggregation caching.

use std::time::Duration;

use async_trait::async_trait;

use crate::error::ParleyError;

#[async_trait]
pub trait CounterStore: Send + Sync {
    /// Atomically increments `key` and returns the new value. The expiry is
    /// set when the key is created and left untouched by later increments.
    async fn incr_with_ttl(&self, key: &str, ttl: Duration) -> Result<i64, ParleyError>;

    /// Atomically increments `key` with no expiry.
    async fn incr(&self, key: &str) -> Result<i64, ParleyError>;

    async fn get(&self, key: &str) -> Result<Option<i64>, ParleyError>;

    async fn set(&self, key: &str, value: i64, ttl: Option<Duration>) -> Result<(), ParleyError>;

    async fn delete(&self, key: &str) -> Result<(), ParleyError>;
}
