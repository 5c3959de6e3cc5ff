// SPDX-FileCopyrightText: 2026 Parley Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Workspace and AI settings records.

use parley_core::{AiSettings, ParleyError, Workspace};
use rusqlite::{OptionalExtension, params};

use crate::codec::{enum_col, json_col, to_json, ts, ts_col, ts_opt, ts_opt_col};
use crate::database::{Database, map_tr_err};

pub async fn get_workspace(db: &Database, id: &str) -> Result<Option<Workspace>, ParleyError> {
    let id = id.to_string();
    db.connection()
        .call(move |conn| {
            conn.query_row(
                "SELECT id, persona, ai_paused, status, ai_blocked, plan, trial_ends_at,
                        monthly_token_limit, created_at
                 FROM workspaces WHERE id = ?1",
                params![id],
                |row| {
                    Ok(Workspace {
                        id: row.get(0)?,
                        persona: json_col(row, 1)?,
                        ai_paused: row.get(2)?,
                        status: enum_col(row, 3)?,
                        ai_blocked: row.get(4)?,
                        plan: enum_col(row, 5)?,
                        trial_ends_at: ts_opt_col(row, 6)?,
                        monthly_token_limit: row.get::<_, Option<i64>>(7)?.map(|v| v.max(0) as u64),
                        created_at: ts_col(row, 8)?,
                    })
                },
            )
            .optional()
        })
        .await
        .map_err(map_tr_err)
}

pub async fn upsert_workspace(db: &Database, workspace: &Workspace) -> Result<(), ParleyError> {
    let w = workspace.clone();
    db.connection()
        .call(move |conn| {
            conn.execute(
                "INSERT INTO workspaces (id, persona, ai_paused, status, ai_blocked, plan,
                                         trial_ends_at, monthly_token_limit, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)
                 ON CONFLICT(id) DO UPDATE SET
                    persona = excluded.persona,
                    ai_paused = excluded.ai_paused,
                    status = excluded.status,
                    ai_blocked = excluded.ai_blocked,
                    plan = excluded.plan,
                    trial_ends_at = excluded.trial_ends_at,
                    monthly_token_limit = excluded.monthly_token_limit",
                params![
                    w.id,
                    to_json(&w.persona)?,
                    w.ai_paused,
                    w.status.to_string(),
                    w.ai_blocked,
                    w.plan.to_string(),
                    ts_opt(w.trial_ends_at),
                    w.monthly_token_limit.map(|v| v as i64),
                    ts(w.created_at),
                ],
            )?;
            Ok(())
        })
        .await
        .map_err(map_tr_err)
}

pub async fn get_ai_settings(
    db: &Database,
    workspace_id: &str,
) -> Result<Option<AiSettings>, ParleyError> {
    let workspace_id = workspace_id.to_string();
    db.connection()
        .call(move |conn| {
            conn.query_row(
                "SELECT settings FROM ai_settings WHERE workspace_id = ?1",
                params![workspace_id],
                |row| json_col(row, 0),
            )
            .optional()
        })
        .await
        .map_err(map_tr_err)
}

pub async fn put_ai_settings(db: &Database, settings: &AiSettings) -> Result<(), ParleyError> {
    let settings = settings.clone();
    db.connection()
        .call(move |conn| {
            conn.execute(
                "INSERT INTO ai_settings (workspace_id, settings, updated_at) VALUES (?1, ?2, ?3)
                 ON CONFLICT(workspace_id) DO UPDATE SET
                    settings = excluded.settings, updated_at = excluded.updated_at",
                params![
                    settings.workspace_id,
                    to_json(&settings)?,
                    ts(settings.updated_at)
                ],
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
    use parley_core::{Plan, ProviderCredentials, ProviderKind, WorkspaceStatus};

    #[tokio::test]
    async fn workspace_upsert_roundtrip() {
        let db = db().await;
        let mut ws = Workspace::new("ws-1", "Ada's Scarves");
        ws.plan = Plan::Free;
        ws.trial_ends_at = Some(chrono::Utc::now());
        ws.monthly_token_limit = Some(50_000);
        upsert_workspace(&db, &ws).await.unwrap();

        ws.status = WorkspaceStatus::Suspended;
        upsert_workspace(&db, &ws).await.unwrap();

        let loaded = get_workspace(&db, "ws-1").await.unwrap().unwrap();
        assert_eq!(loaded.status, WorkspaceStatus::Suspended);
        assert_eq!(loaded.plan, Plan::Free);
        assert_eq!(loaded.persona.business_name, "Ada's Scarves");
        assert_eq!(loaded.monthly_token_limit, Some(50_000));
        assert!(get_workspace(&db, "missing").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn settings_keep_credentials() {
        let db = db().await;
        let mut settings = AiSettings::new("ws-1", ProviderKind::Gemini);
        settings.byok = true;
        settings.credentials.insert(
            ProviderKind::Gemini,
            ProviderCredentials {
                api_key: Some("g-key".into()),
                ..Default::default()
            },
        );
        put_ai_settings(&db, &settings).await.unwrap();

        let loaded = get_ai_settings(&db, "ws-1").await.unwrap().unwrap();
        assert!(loaded.byok);
        assert!(loaded.has_credentials(ProviderKind::Gemini));
        assert_eq!(loaded.customer_provider, ProviderKind::Gemini);
    }
}
