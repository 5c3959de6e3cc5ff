// SPDX-FileCopyrightText: 2026 Parley Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Clarification tickets raised by escalation.

use chrono::Utc;
use parley_core::{ClarificationTicket, ParleyError, TicketStatus};
use rusqlite::{OptionalExtension, params};

use crate::codec::{enum_col, ts, ts_col, ts_opt, ts_opt_col};
use crate::database::{Database, map_tr_err};

pub async fn create_ticket(db: &Database, ticket: &ClarificationTicket) -> Result<(), ParleyError> {
    let t = ticket.clone();
    db.connection()
        .call(move |conn| {
            conn.execute(
                "INSERT INTO clarification_tickets
                    (id, workspace_id, interaction_id, customer_id, customer_message, intent,
                     question, status, answer, created_at, resolved_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)",
                params![
                    t.id,
                    t.workspace_id,
                    t.interaction_id,
                    t.customer_id,
                    t.customer_message,
                    t.intent.to_string(),
                    t.question,
                    t.status.to_string(),
                    t.answer,
                    ts(t.created_at),
                    ts_opt(t.resolved_at),
                ],
            )?;
            Ok(())
        })
        .await
        .map_err(map_tr_err)
}

pub async fn get_ticket(db: &Database, id: &str) -> Result<Option<ClarificationTicket>, ParleyError> {
    let id = id.to_string();
    db.connection()
        .call(move |conn| {
            conn.query_row(
                "SELECT id, workspace_id, interaction_id, customer_id, customer_message, intent,
                        question, status, answer, created_at, resolved_at
                 FROM clarification_tickets WHERE id = ?1",
                params![id],
                |row| {
                    Ok(ClarificationTicket {
                        id: row.get(0)?,
                        workspace_id: row.get(1)?,
                        interaction_id: row.get(2)?,
                        customer_id: row.get(3)?,
                        customer_message: row.get(4)?,
                        intent: enum_col(row, 5)?,
                        question: row.get(6)?,
                        status: enum_col(row, 7)?,
                        answer: row.get(8)?,
                        created_at: ts_col(row, 9)?,
                        resolved_at: ts_opt_col(row, 10)?,
                    })
                },
            )
            .optional()
        })
        .await
        .map_err(map_tr_err)
}

/// Moves an open ticket to `status`. False if it was not open.
pub async fn close_ticket(
    db: &Database,
    id: &str,
    status: TicketStatus,
    answer: Option<&str>,
) -> Result<bool, ParleyError> {
    let id = id.to_string();
    let answer = answer.map(str::to_string);
    let changed = db
        .connection()
        .call(move |conn| {
            conn.execute(
                "UPDATE clarification_tickets
                 SET status = ?1, answer = COALESCE(?2, answer), resolved_at = ?3
                 WHERE id = ?4 AND status = 'open'",
                params![status.to_string(), answer, ts(Utc::now()), id],
            )
        })
        .await
        .map_err(map_tr_err)?;
    Ok(changed == 1)
}
