// SPDX-FileCopyrightText: 2026 Parley Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Interaction records: idempotent intake and final status writes.

use chrono::Utc;
use parley_core::{
    InsertOutcome, Interaction, InteractionStatus, InteractionUpdate, NewInteraction, ParleyError,
};
use rusqlite::{OptionalExtension, Row, params};

use crate::codec::{enum_col, json_col, to_json, ts, ts_col};
use crate::database::{Database, map_tr_err};

const COLUMNS: &str = "id, workspace_id, platform, external_id, conversation_id, author_id,
    author_name, customer_id, content, response, status, meta, created_at, updated_at";

fn row_to_interaction(row: &Row<'_>) -> rusqlite::Result<Interaction> {
    Ok(Interaction {
        id: row.get(0)?,
        workspace_id: row.get(1)?,
        platform: row.get(2)?,
        external_id: row.get(3)?,
        conversation_id: row.get(4)?,
        author_id: row.get(5)?,
        author_name: row.get(6)?,
        customer_id: row.get(7)?,
        content: row.get(8)?,
        response: row.get(9)?,
        status: enum_col(row, 10)?,
        meta: json_col(row, 11)?,
        created_at: ts_col(row, 12)?,
        updated_at: ts_col(row, 13)?,
    })
}

/// Inserts a pending interaction unless (workspace, external id) exists.
pub async fn insert_inbound(
    db: &Database,
    new: NewInteraction,
) -> Result<InsertOutcome, ParleyError> {
    let i = Interaction::from_new(new);
    db.connection()
        .call(move |conn| {
            let inserted = conn.execute(
                "INSERT OR IGNORE INTO interactions
                    (id, workspace_id, platform, external_id, conversation_id, author_id,
                     author_name, customer_id, content, response, status, meta,
                     created_at, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, NULL, ?8, NULL, ?9, ?10, ?11, ?11)",
                params![
                    i.id,
                    i.workspace_id,
                    i.platform,
                    i.external_id,
                    i.conversation_id,
                    i.author_id,
                    i.author_name,
                    i.content,
                    i.status.to_string(),
                    to_json(&i.meta)?,
                    ts(i.created_at),
                ],
            )?;
            if inserted == 1 {
                return Ok(InsertOutcome::Created(i.id));
            }
            let existing: String = conn.query_row(
                "SELECT id FROM interactions WHERE workspace_id = ?1 AND external_id = ?2",
                params![i.workspace_id, i.external_id],
                |row| row.get(0),
            )?;
            Ok(InsertOutcome::Duplicate(existing))
        })
        .await
        .map_err(map_tr_err)
}

pub async fn get_interaction(db: &Database, id: &str) -> Result<Option<Interaction>, ParleyError> {
    let id = id.to_string();
    db.connection()
        .call(move |conn| {
            conn.query_row(
                &format!("SELECT {COLUMNS} FROM interactions WHERE id = ?1"),
                params![id],
                row_to_interaction,
            )
            .optional()
        })
        .await
        .map_err(map_tr_err)
}

pub async fn complete_interaction(
    db: &Database,
    id: &str,
    update: InteractionUpdate,
) -> Result<(), ParleyError> {
    let id = id.to_string();
    let changed = db
        .connection()
        .call({
            let id = id.clone();
            move |conn| {
                conn.execute(
                    "UPDATE interactions
                     SET status = ?1, customer_id = COALESCE(?2, customer_id),
                         response = ?3, meta = ?4, updated_at = ?5
                     WHERE id = ?6",
                    params![
                        update.status.to_string(),
                        update.customer_id,
                        update.response,
                        to_json(&update.meta)?,
                        ts(Utc::now()),
                        id,
                    ],
                )
            }
        })
        .await
        .map_err(map_tr_err)?;
    if changed == 0 {
        return Err(ParleyError::not_found("interaction", id));
    }
    Ok(())
}

pub async fn set_interaction_status(
    db: &Database,
    id: &str,
    status: InteractionStatus,
) -> Result<(), ParleyError> {
    let id = id.to_string();
    let changed = db
        .connection()
        .call({
            let id = id.clone();
            move |conn| {
                conn.execute(
                    "UPDATE interactions SET status = ?1, updated_at = ?2 WHERE id = ?3",
                    params![status.to_string(), ts(Utc::now()), id],
                )
            }
        })
        .await
        .map_err(map_tr_err)?;
    if changed == 0 {
        return Err(ParleyError::not_found("interaction", id));
    }
    Ok(())
}

/// `PENDING` to `PROCESSING` in one statement. `false` if another run got there first.
pub async fn claim_interaction(db: &Database, id: &str) -> Result<bool, ParleyError> {
    let id = id.to_string();
    let changed = db
        .connection()
        .call(move |conn| {
            conn.execute(
                "UPDATE interactions SET status = 'PROCESSING', updated_at = ?1
                 WHERE id = ?2 AND status = 'PENDING'",
                params![ts(Utc::now()), id],
            )
        })
        .await
        .map_err(map_tr_err)?;
    Ok(changed == 1)
}

pub async fn release_interaction(db: &Database, id: &str) -> Result<(), ParleyError> {
    let id = id.to_string();
    db.connection()
        .call(move |conn| {
            conn.execute(
                "UPDATE interactions SET status = 'PENDING', updated_at = ?1
                 WHERE id = ?2 AND status = 'PROCESSING'",
                params![ts(Utc::now()), id],
            )
        })
        .await
        .map_err(map_tr_err)?;
    Ok(())
}

/// Returns claims older than five minutes to `PENDING`, matching the job lease.
pub async fn release_stale_claims(db: &Database) -> Result<usize, ParleyError> {
    db.connection()
        .call(|conn| {
            conn.execute(
                "UPDATE interactions
                 SET status = 'PENDING',
                     updated_at = strftime('%Y-%m-%dT%H:%M:%fZ', 'now')
                 WHERE status = 'PROCESSING'
                   AND updated_at < strftime('%Y-%m-%dT%H:%M:%fZ', 'now', '-5 minutes')",
                [],
            )
        })
        .await
        .map_err(map_tr_err)
}

/// Latest `limit` interactions of a customer, returned oldest first.
pub async fn recent_interactions(
    db: &Database,
    customer_id: &str,
    limit: usize,
) -> Result<Vec<Interaction>, ParleyError> {
    let customer_id = customer_id.to_string();
    db.connection()
        .call(move |conn| {
            let mut stmt = conn.prepare(&format!(
                "SELECT {COLUMNS} FROM interactions
                 WHERE customer_id = ?1
                 ORDER BY created_at DESC, rowid DESC
                 LIMIT ?2"
            ))?;
            let mut rows = stmt
                .query_map(params![customer_id, limit as i64], row_to_interaction)?
                .collect::<Result<Vec<_>, _>>()?;
            rows.reverse();
            Ok(rows)
        })
        .await
        .map_err(map_tr_err)
}
