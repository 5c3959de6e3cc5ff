// SPDX-FileCopyrightText: 2026 Parley Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Crash-safe job queue.
//!
//! A dequeued job is marked `processing` with a five minute lease. Jobs whose
//! lease lapsed (the worker died) are returned to `pending` by
//! [`requeue_stale`].

use parley_core::{Job, JobKind, ParleyError};
use rusqlite::{OptionalExtension, params};
use tracing::warn;

use crate::codec::{enum_col, json_col, to_json, ts_col};
use crate::database::{Database, map_tr_err};

const NOW: &str = "strftime('%Y-%m-%dT%H:%M:%fZ', 'now')";

pub async fn enqueue(
    db: &Database,
    kind: JobKind,
    payload: &serde_json::Value,
    max_attempts: u32,
) -> Result<i64, ParleyError> {
    let payload = payload.clone();
    db.connection()
        .call(move |conn| {
            conn.execute(
                "INSERT INTO jobs (kind, payload, max_attempts) VALUES (?1, ?2, ?3)",
                params![kind.to_string(), to_json(&payload)?, max_attempts.max(1)],
            )?;
            Ok(conn.last_insert_rowid())
        })
        .await
        .map_err(map_tr_err)
}

/// Claims the oldest pending job of `kind`.
pub async fn dequeue(db: &Database, kind: JobKind) -> Result<Option<Job>, ParleyError> {
    db.connection()
        .call(move |conn| {
            let tx = conn.transaction()?;
            let job = tx
                .query_row(
                    "SELECT id, kind, payload, attempts, max_attempts, created_at
                     FROM jobs
                     WHERE kind = ?1 AND status = 'pending'
                     ORDER BY id ASC
                     LIMIT 1",
                    params![kind.to_string()],
                    |row| {
                        Ok(Job {
                            id: row.get(0)?,
                            kind: enum_col(row, 1)?,
                            payload: json_col(row, 2)?,
                            attempts: row.get(3)?,
                            max_attempts: row.get(4)?,
                            created_at: ts_col(row, 5)?,
                        })
                    },
                )
                .optional()?;
            if let Some(job) = &job {
                tx.execute(
                    &format!(
                        "UPDATE jobs SET status = 'processing',
                         locked_until = strftime('%Y-%m-%dT%H:%M:%fZ', 'now', '+5 minutes'),
                         updated_at = {NOW}
                         WHERE id = ?1"
                    ),
                    params![job.id],
                )?;
            }
            tx.commit()?;
            Ok(job)
        })
        .await
        .map_err(map_tr_err)
}

pub async fn ack(db: &Database, id: i64) -> Result<(), ParleyError> {
    db.connection()
        .call(move |conn| {
            conn.execute(
                &format!(
                    "UPDATE jobs SET status = 'completed', locked_until = NULL, updated_at = {NOW}
                     WHERE id = ?1"
                ),
                params![id],
            )?;
            Ok(())
        })
        .await
        .map_err(map_tr_err)
}

/// Records a failed attempt. The job returns to `pending` until it has used
/// `max_attempts`, then stays `failed`.
pub async fn fail(db: &Database, id: i64, error: &str) -> Result<(), ParleyError> {
    let error = error.to_string();
    let exhausted = db
        .connection()
        .call(move |conn| {
            let (attempts, max_attempts): (u32, u32) = conn.query_row(
                "SELECT attempts, max_attempts FROM jobs WHERE id = ?1",
                params![id],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )?;
            let attempts = attempts + 1;
            let exhausted = attempts >= max_attempts;
            let status = if exhausted { "failed" } else { "pending" };
            conn.execute(
                &format!(
                    "UPDATE jobs SET status = ?1, attempts = ?2, last_error = ?3,
                     locked_until = NULL, updated_at = {NOW}
                     WHERE id = ?4"
                ),
                params![status, attempts, error, id],
            )?;
            Ok(exhausted)
        })
        .await
        .map_err(map_tr_err)?;
    if exhausted {
        warn!(job_id = id, "job exhausted its attempts");
    }
    Ok(())
}

/// Returns jobs whose lease expired to `pending`. Returns how many moved.
pub async fn requeue_stale(db: &Database) -> Result<usize, ParleyError> {
    db.connection()
        .call(|conn| {
            conn.execute(
                &format!(
                    "UPDATE jobs SET status = 'pending', locked_until = NULL, updated_at = {NOW}
                     WHERE status = 'processing' AND locked_until < {NOW}"
                ),
                [],
            )
        })
        .await
        .map_err(map_tr_err)
}

/// Job status by id, for diagnostics and tests.
pub async fn job_status(db: &Database, id: i64) -> Result<Option<String>, ParleyError> {
    db.connection()
        .call(move |conn| {
            conn.query_row("SELECT status FROM jobs WHERE id = ?1", params![id], |row| {
                row.get(0)
            })
            .optional()
        })
        .await
        .map_err(map_tr_err)
}

/// Number of jobs of `kind` still waiting.
pub async fn pending_count(db: &Database, kind: JobKind) -> Result<i64, ParleyError> {
    db.connection()
        .call(move |conn| {
            conn.query_row(
                "SELECT COUNT(*) FROM jobs WHERE kind = ?1 AND status = 'pending'",
                params![kind.to_string()],
                |row| row.get(0),
            )
        })
        .await
        .map_err(map_tr_err)
}
