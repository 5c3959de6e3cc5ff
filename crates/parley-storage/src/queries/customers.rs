// SPDX-FileCopyrightText: 2026 Parley Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Customer records and their persisted conversation state.

use chrono::{DateTime, Utc};
use parley_core::{ConversationState, Customer, ParleyError};
use rusqlite::{OptionalExtension, Row, params};

use crate::codec::{json_col, to_json, ts, ts_col, ts_opt_col};
use crate::database::{Database, map_tr_err};

const COLUMNS: &str = "id, workspace_id, platform, platform_user_id, display_name, ai_paused,
    state, locale, preference_summary, last_message_at, last_message_preview, created_at,
    updated_at";

fn row_to_customer(row: &Row<'_>) -> rusqlite::Result<Customer> {
    Ok(Customer {
        id: row.get(0)?,
        workspace_id: row.get(1)?,
        platform: row.get(2)?,
        platform_user_id: row.get(3)?,
        display_name: row.get(4)?,
        ai_paused: row.get(5)?,
        state: json_col(row, 6)?,
        locale: row.get(7)?,
        preference_summary: row.get(8)?,
        last_message_at: ts_opt_col(row, 9)?,
        last_message_preview: row.get(10)?,
        created_at: ts_col(row, 11)?,
        updated_at: ts_col(row, 12)?,
    })
}

pub async fn get_customer(db: &Database, id: &str) -> Result<Option<Customer>, ParleyError> {
    let id = id.to_string();
    db.connection()
        .call(move |conn| {
            conn.query_row(
                &format!("SELECT {COLUMNS} FROM customers WHERE id = ?1"),
                params![id],
                row_to_customer,
            )
            .optional()
        })
        .await
        .map_err(map_tr_err)
}

/// Returns the customer for a platform identity, creating it on first
/// contact. A display name fills in a missing one but never overwrites.
pub async fn find_or_create_customer(
    db: &Database,
    workspace_id: &str,
    platform: &str,
    platform_user_id: &str,
    display_name: Option<&str>,
) -> Result<Customer, ParleyError> {
    let mut fresh = Customer::new(workspace_id, platform, platform_user_id);
    fresh.display_name = display_name.map(str::to_string);
    db.connection()
        .call(move |conn| {
            let tx = conn.transaction()?;
            tx.execute(
                "INSERT OR IGNORE INTO customers
                    (id, workspace_id, platform, platform_user_id, display_name, ai_paused,
                     state, created_at, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, 0, ?6, ?7, ?7)",
                params![
                    fresh.id,
                    fresh.workspace_id,
                    fresh.platform,
                    fresh.platform_user_id,
                    fresh.display_name,
                    to_json(&fresh.state)?,
                    ts(fresh.created_at),
                ],
            )?;
            if fresh.display_name.is_some() {
                tx.execute(
                    "UPDATE customers SET display_name = ?1
                     WHERE workspace_id = ?2 AND platform = ?3 AND platform_user_id = ?4
                       AND display_name IS NULL",
                    params![
                        fresh.display_name,
                        fresh.workspace_id,
                        fresh.platform,
                        fresh.platform_user_id
                    ],
                )?;
            }
            let customer = tx.query_row(
                &format!(
                    "SELECT {COLUMNS} FROM customers
                     WHERE workspace_id = ?1 AND platform = ?2 AND platform_user_id = ?3"
                ),
                params![fresh.workspace_id, fresh.platform, fresh.platform_user_id],
                row_to_customer,
            )?;
            tx.commit()?;
            Ok(customer)
        })
        .await
        .map_err(map_tr_err)
}

async fn update_one(
    db: &Database,
    customer_id: &str,
    sql: &'static str,
    value: rusqlite::types::Value,
) -> Result<(), ParleyError> {
    let id = customer_id.to_string();
    let changed = db
        .connection()
        .call({
            let id = id.clone();
            move |conn| conn.execute(sql, params![value, ts(Utc::now()), id])
        })
        .await
        .map_err(map_tr_err)?;
    if changed == 0 {
        return Err(ParleyError::not_found("customer", id));
    }
    Ok(())
}

pub async fn save_conversation_state(
    db: &Database,
    customer_id: &str,
    state: &ConversationState,
) -> Result<(), ParleyError> {
    let json = serde_json::to_string(state).map_err(ParleyError::storage)?;
    update_one(
        db,
        customer_id,
        "UPDATE customers SET state = ?1, updated_at = ?2 WHERE id = ?3",
        json.into(),
    )
    .await
}

pub async fn set_ai_paused(db: &Database, customer_id: &str, paused: bool) -> Result<(), ParleyError> {
    update_one(
        db,
        customer_id,
        "UPDATE customers SET ai_paused = ?1, updated_at = ?2 WHERE id = ?3",
        i64::from(paused).into(),
    )
    .await
}

pub async fn set_locale(db: &Database, customer_id: &str, locale: &str) -> Result<(), ParleyError> {
    update_one(
        db,
        customer_id,
        "UPDATE customers SET locale = ?1, updated_at = ?2 WHERE id = ?3",
        locale.to_string().into(),
    )
    .await
}

pub async fn set_preference_summary(
    db: &Database,
    customer_id: &str,
    summary: &str,
) -> Result<(), ParleyError> {
    update_one(
        db,
        customer_id,
        "UPDATE customers SET preference_summary = ?1, updated_at = ?2 WHERE id = ?3",
        summary.to_string().into(),
    )
    .await
}

pub async fn record_activity(
    db: &Database,
    customer_id: &str,
    at: DateTime<Utc>,
    preview: &str,
) -> Result<(), ParleyError> {
    let id = customer_id.to_string();
    let preview: String = preview.chars().take(120).collect();
    db.connection()
        .call(move |conn| {
            conn.execute(
                "UPDATE customers
                 SET last_message_at = ?1, last_message_preview = ?2, updated_at = ?1
                 WHERE id = ?3",
                params![ts(at), preview, id],
            )?;
            Ok(())
        })
        .await
        .map_err(map_tr_err)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::queries::testing::db;

    #[tokio::test]
    async fn find_or_create_is_stable_per_identity() {
        let db = db().await;
        let a = find_or_create_customer(&db, "ws", "chat", "u-1", None).await.unwrap();
        let b = find_or_create_customer(&db, "ws", "chat", "u-1", Some("Ada")).await.unwrap();
        let c = find_or_create_customer(&db, "ws", "sms", "u-1", None).await.unwrap();
        assert_eq!(a.id, b.id);
        assert_ne!(a.id, c.id);
        assert_eq!(b.display_name.as_deref(), Some("Ada"));
        assert_eq!(a.state, ConversationState::Idle);
    }

    #[tokio::test]
    async fn state_and_flags_persist() {
        let db = db().await;
        let c = find_or_create_customer(&db, "ws", "chat", "u-1", None).await.unwrap();
        let state = ConversationState::CollectingCallTime {
            phone: "5551234567".into(),
        };
        save_conversation_state(&db, &c.id, &state).await.unwrap();
        set_ai_paused(&db, &c.id, true).await.unwrap();
        set_locale(&db, &c.id, "fr").await.unwrap();
        record_activity(&db, &c.id, Utc::now(), "bonjour").await.unwrap();

        let loaded = get_customer(&db, &c.id).await.unwrap().unwrap();
        assert_eq!(loaded.state, state);
        assert!(loaded.ai_paused);
        assert_eq!(loaded.locale.as_deref(), Some("fr"));
        assert_eq!(loaded.last_message_preview.as_deref(), Some("bonjour"));
    }

    #[tokio::test]
    async fn updating_unknown_customer_fails() {
        let db = db().await;
        let err = set_ai_paused(&db, "ghost", true).await.unwrap_err();
        assert!(matches!(err, ParleyError::NotFound { entity: "customer", .. }));
    }
}
