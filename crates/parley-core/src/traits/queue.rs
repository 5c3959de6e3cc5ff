// SPDX-FileCopyrightText: 2026 Parley Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Durable job queue.

use async_trait::async_trait;

use crate::entities::{Job, JobKind};
use crate::error::ParleyError;

#[async_trait]
pub trait JobQueue: Send + Sync {
    /// Adds a job and returns its id.
    async fn enqueue(
        &self,
        kind: JobKind,
        payload: serde_json::Value,
        max_attempts: u32,
    ) -> Result<i64, ParleyError>;

    /// Claims the oldest pending job of `kind`, if any.
    async fn dequeue(&self, kind: JobKind) -> Result<Option<Job>, ParleyError>;

    async fn ack(&self, job_id: i64) -> Result<(), ParleyError>;

    /// Records a failure. The job is retried until it reaches `max_attempts`.
    async fn fail(&self, job_id: i64, error: &str) -> Result<(), ParleyError>;
}
