// SPDX-FileCopyrightText: 2026 Parley Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Provider usage log and month-to-date totals.

use chrono::{DateTime, Datelike, TimeZone, Utc};
use parley_core::{ParleyError, UsageRecord};
use rusqlite::params;

use crate::codec::ts;
use crate::database::{Database, map_tr_err};

pub async fn record_usage(db: &Database, record: &UsageRecord) -> Result<(), ParleyError> {
    let r = record.clone();
    db.connection()
        .call(move |conn| {
            conn.execute(
                "INSERT INTO usage_log (workspace_id, role, provider, model, input_tokens,
                                        output_tokens, latency_ms, success, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
                params![
                    r.workspace_id,
                    r.role.to_string(),
                    r.provider.to_string(),
                    r.model,
                    r.input_tokens,
                    r.output_tokens,
                    r.latency_ms as i64,
                    r.success,
                    ts(r.created_at),
                ],
            )?;
            Ok(())
        })
        .await
        .map_err(map_tr_err)
}

/// First instant of `now`'s calendar month, UTC.
pub fn month_start(now: DateTime<Utc>) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(now.year(), now.month(), 1, 0, 0, 0)
        .single()
        .unwrap_or(now)
}

pub async fn month_to_date_tokens(
    db: &Database,
    workspace_id: &str,
    now: DateTime<Utc>,
) -> Result<u64, ParleyError> {
    let workspace_id = workspace_id.to_string();
    let since = ts(month_start(now));
    let total: i64 = db
        .connection()
        .call(move |conn| {
            conn.query_row(
                "SELECT COALESCE(SUM(input_tokens + output_tokens), 0) FROM usage_log
                 WHERE workspace_id = ?1 AND created_at >= ?2",
                params![workspace_id, since],
                |row| row.get(0),
            )
        })
        .await
        .map_err(map_tr_err)?;
    Ok(total.max(0) as u64)
}
