// SPDX-FileCopyrightText: 2026 Parley Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Queue worker: pulls `process` and `summarize_profile` jobs and runs them
//! with bounded concurrency until cancelled.

use std::sync::Arc;
use std::time::Duration;

use parley_config::model::WorkerConfig;
use parley_core::{Job, JobKind, JobQueue, ParleyError};
use serde_json::Value;
use tokio::sync::Semaphore;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, error, info, warn};

use crate::processor::InteractionProcessor;
use crate::shutdown;

const DRAIN_TIMEOUT: Duration = Duration::from_secs(30);

/// Job kinds this worker executes, in polling priority.
pub const HANDLED_KINDS: [JobKind; 2] = [JobKind::Process, JobKind::SummarizeProfile];

#[derive(Clone)]
pub struct QueueWorker {
    processor: Arc<InteractionProcessor>,
    queue: Arc<dyn JobQueue>,
    config: WorkerConfig,
}

fn payload_str<'a>(job: &'a Job, key: &str) -> Result<&'a str, ParleyError> {
    job.payload
        .get(key)
        .and_then(Value::as_str)
        .filter(|s| !s.is_empty())
        .ok_or_else(|| {
            ParleyError::Validation(format!("job {} payload lacks \"{key}\"", job.id))
        })
}

impl QueueWorker {
    pub fn new(
        processor: Arc<InteractionProcessor>,
        queue: Arc<dyn JobQueue>,
        config: WorkerConfig,
    ) -> Self {
        Self {
            processor,
            queue,
            config,
        }
    }

    /// Polls until `cancel` fires, then drains in-flight jobs.
    pub async fn run(&self, cancel: CancellationToken) -> Result<(), ParleyError> {
        let concurrency = self.config.concurrency.max(1);
        let poll = Duration::from_millis(self.config.poll_interval_ms);
        let permits = Arc::new(Semaphore::new(concurrency));
        let tracker = TaskTracker::new();
        info!(concurrency, poll_ms = self.config.poll_interval_ms, "queue worker running");

        loop {
            let permit = tokio::select! {
                permit = permits.clone().acquire_owned() => permit
                    .map_err(|e| ParleyError::Internal(format!("worker semaphore closed: {e}")))?,
                _ = cancel.cancelled() => break,
            };

            match self.next_job().await {
                Ok(Some(job)) => {
                    let worker = self.clone();
                    tracker.spawn(async move {
                        worker.run_job(job).await;
                        drop(permit);
                    });
                }
                Ok(None) => {
                    drop(permit);
                    tokio::select! {
                        _ = tokio::time::sleep(poll) => {}
                        _ = cancel.cancelled() => break,
                    }
                }
                Err(e) => {
                    drop(permit);
                    error!(error = %e, "failed to poll job queue");
                    tokio::select! {
                        _ = tokio::time::sleep(poll) => {}
                        _ = cancel.cancelled() => break,
                    }
                }
            }
        }

        info!("shutdown signal received, stopping queue worker");
        shutdown::drain(&tracker, DRAIN_TIMEOUT).await;
        info!("queue worker stopped");
        Ok(())
    }

    /// Runs every job currently queued, one at a time. Returns how many ran.
    pub async fn run_pending(&self) -> Result<usize, ParleyError> {
        let mut count = 0;
        while let Some(job) = self.next_job().await? {
            self.run_job(job).await;
            count += 1;
        }
        Ok(count)
    }

    async fn next_job(&self) -> Result<Option<Job>, ParleyError> {
        for kind in HANDLED_KINDS {
            if let Some(job) = self.queue.dequeue(kind).await? {
                return Ok(Some(job));
            }
        }
        Ok(None)
    }

    /// Executes one job and records its outcome on the queue.
    pub async fn run_job(&self, job: Job) {
        debug!(job_id = job.id, kind = %job.kind, attempt = job.attempts + 1, "running job");
        let result = match job.kind {
            JobKind::Process => self.process(&job).await,
            JobKind::SummarizeProfile => match payload_str(&job, "customer_id") {
                Ok(customer_id) => self.processor.summarize_profile(customer_id).await,
                Err(e) => Err(e),
            },
            other => Err(ParleyError::Validation(format!(
                "job kind {other} is handled elsewhere"
            ))),
        };

        let recorded = match &result {
            Ok(()) => self.queue.ack(job.id).await,
            Err(e) => {
                warn!(job_id = job.id, kind = %job.kind, error = %e, "job failed");
                self.queue.fail(job.id, &e.to_string()).await
            }
        };
        if let Err(e) = recorded {
            error!(job_id = job.id, error = %e, "failed to record job outcome");
        }
    }

    async fn process(&self, job: &Job) -> Result<(), ParleyError> {
        let interaction_id = payload_str(job, "interaction_id")?;
        match self.processor.process_interaction(interaction_id).await {
            Ok(_) => Ok(()),
            Err(e) => {
                let last_attempt = job.attempts + 1 >= job.max_attempts;
                if last_attempt || !e.is_retryable() {
                    if let Err(mark) = self.processor.mark_failed(interaction_id, &e).await {
                        warn!(interaction_id, error = %mark, "failed to mark interaction failed");
                    }
                }
                Err(e)
            }
        }
    }
}
