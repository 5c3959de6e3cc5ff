// SPDX-FileCopyrightText: 2026 Parley Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Knowledge items: vector search over BLOB embeddings and FTS5 keyword search.

use chrono::Utc;
use parley_core::{KnowledgeItem, ParleyError};
use rusqlite::{Connection, OptionalExtension, Row, params};
use tracing::debug;

use crate::codec::{
    blob_to_vec, cosine_similarity, enum_col, fts_query, json_col, to_json, ts, ts_col,
    ts_opt, ts_opt_col, vec_to_blob,
};
use crate::database::{Database, map_tr_err};

const COLUMNS: &str = "k.id, k.workspace_id, k.name, k.content, k.category, k.meta, k.embedding,
    k.related_item_ids, k.expires_at, k.deprecated, k.superseded_by, k.source, k.created_at,
    k.updated_at";

/// Non-deprecated and not expired at `?now`.
const ACTIVE: &str = "k.deprecated = 0 AND (k.expires_at IS NULL OR k.expires_at > ?2)";

fn row_to_item(row: &Row<'_>) -> rusqlite::Result<KnowledgeItem> {
    let embedding: Option<Vec<u8>> = row.get(6)?;
    Ok(KnowledgeItem {
        id: row.get(0)?,
        workspace_id: row.get(1)?,
        name: row.get(2)?,
        content: row.get(3)?,
        category: row.get(4)?,
        meta: json_col(row, 5)?,
        embedding: embedding.map(|b| blob_to_vec(&b)),
        related_item_ids: json_col(row, 7)?,
        expires_at: ts_opt_col(row, 8)?,
        deprecated: row.get(9)?,
        superseded_by: row.get(10)?,
        source: enum_col(row, 11)?,
        created_at: ts_col(row, 12)?,
        updated_at: ts_col(row, 13)?,
    })
}

fn insert(conn: &Connection, item: &KnowledgeItem) -> rusqlite::Result<()> {
    conn.execute(
        "INSERT INTO knowledge_items
            (id, workspace_id, name, content, category, meta, embedding, related_item_ids,
             expires_at, deprecated, superseded_by, source, created_at, updated_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14)",
        params![
            item.id,
            item.workspace_id,
            item.name,
            item.content,
            item.category,
            to_json(&item.meta)?,
            item.embedding.as_deref().map(vec_to_blob),
            to_json(&item.related_item_ids)?,
            ts_opt(item.expires_at),
            item.deprecated,
            item.superseded_by,
            item.source.to_string(),
            ts(item.created_at),
            ts(item.updated_at),
        ],
    )?;
    Ok(())
}

pub async fn insert_item(db: &Database, item: &KnowledgeItem) -> Result<(), ParleyError> {
    let item = item.clone();
    db.connection()
        .call(move |conn| insert(conn, &item))
        .await
        .map_err(map_tr_err)
}

/// Cosine-ranked active items with similarity at or above `floor`.
///
/// Similarity is computed in process over the workspace's stored vectors;
/// items without an embedding or with a different width never match.
pub async fn vector_search(
    db: &Database,
    workspace_id: &str,
    embedding: &[f32],
    floor: f32,
    limit: usize,
) -> Result<Vec<(KnowledgeItem, f32)>, ParleyError> {
    let workspace_id = workspace_id.to_string();
    let query = embedding.to_vec();
    let items = db
        .connection()
        .call(move |conn| {
            let mut stmt = conn.prepare(&format!(
                "SELECT {COLUMNS} FROM knowledge_items k
                 WHERE k.workspace_id = ?1 AND {ACTIVE} AND k.embedding IS NOT NULL"
            ))?;
            let items = stmt
                .query_map(params![workspace_id, ts(Utc::now())], row_to_item)?
                .collect::<Result<Vec<_>, _>>()?;
            Ok(items)
        })
        .await
        .map_err(map_tr_err)?;

    let candidates = items.len();
    let mut scored: Vec<(KnowledgeItem, f32)> = items
        .into_iter()
        .filter_map(|item| {
            let sim = cosine_similarity(item.embedding.as_deref()?, &query);
            (sim >= floor).then_some((item, sim))
        })
        .collect();
    scored.sort_by(|a, b| b.1.total_cmp(&a.1));
    scored.truncate(limit);
    debug!(candidates, matched = scored.len(), "vector search");
    Ok(scored)
}

/// Active items whose name or content match any of `terms`, best BM25 first.
pub async fn keyword_search(
    db: &Database,
    workspace_id: &str,
    terms: &[String],
    limit: usize,
) -> Result<Vec<KnowledgeItem>, ParleyError> {
    let Some(query) = fts_query(terms) else {
        return Ok(Vec::new());
    };
    let workspace_id = workspace_id.to_string();
    db.connection()
        .call(move |conn| {
            let mut stmt = conn.prepare(&format!(
                "SELECT {COLUMNS} FROM knowledge_fts
                 JOIN knowledge_items k ON k.rowid = knowledge_fts.rowid
                 WHERE k.workspace_id = ?1 AND {ACTIVE} AND knowledge_fts MATCH ?3
                 ORDER BY bm25(knowledge_fts)
                 LIMIT ?4"
            ))?;
            let items = stmt
                .query_map(
                    params![workspace_id, ts(Utc::now()), query, limit as i64],
                    row_to_item,
                )?
                .collect::<Result<Vec<_>, _>>()?;
            Ok(items)
        })
        .await
        .map_err(map_tr_err)
}

/// Active items of a workspace by id. Unknown or inactive ids are skipped.
pub async fn get_items(
    db: &Database,
    workspace_id: &str,
    ids: &[String],
) -> Result<Vec<KnowledgeItem>, ParleyError> {
    if ids.is_empty() {
        return Ok(Vec::new());
    }
    let workspace_id = workspace_id.to_string();
    let ids = ids.to_vec();
    db.connection()
        .call(move |conn| {
            let placeholders: Vec<String> = (0..ids.len()).map(|i| format!("?{}", i + 3)).collect();
            let sql = format!(
                "SELECT {COLUMNS} FROM knowledge_items k
                 WHERE k.workspace_id = ?1 AND {ACTIVE} AND k.id IN ({})",
                placeholders.join(", ")
            );
            let now = ts(Utc::now());
            let mut values: Vec<&dyn rusqlite::types::ToSql> = Vec::with_capacity(ids.len() + 2);
            values.push(&workspace_id);
            values.push(&now);
            values.extend(ids.iter().map(|id| id as &dyn rusqlite::types::ToSql));
            let mut stmt = conn.prepare(&sql)?;
            let items = stmt
                .query_map(values.as_slice(), row_to_item)?
                .collect::<Result<Vec<_>, _>>()?;
            Ok(items)
        })
        .await
        .map_err(map_tr_err)
}

pub async fn find_active_by_name(
    db: &Database,
    workspace_id: &str,
    name: &str,
) -> Result<Option<KnowledgeItem>, ParleyError> {
    let workspace_id = workspace_id.to_string();
    let name = name.trim().to_string();
    db.connection()
        .call(move |conn| {
            conn.query_row(
                &format!(
                    "SELECT {COLUMNS} FROM knowledge_items k
                     WHERE k.workspace_id = ?1 AND {ACTIVE} AND lower(k.name) = lower(?3)
                     ORDER BY k.updated_at DESC
                     LIMIT 1"
                ),
                params![workspace_id, ts(Utc::now()), name],
                row_to_item,
            )
            .optional()
        })
        .await
        .map_err(map_tr_err)
}

/// Deprecates `old_id` in favour of `replacement` and inserts the
/// replacement, in one transaction.
pub async fn supersede_item(
    db: &Database,
    old_id: &str,
    replacement: &KnowledgeItem,
) -> Result<bool, ParleyError> {
    let old_id = old_id.to_string();
    let replacement = replacement.clone();
    db.connection()
        .call(move |conn| {
            let tx = conn.transaction()?;
            let changed = tx.execute(
                "UPDATE knowledge_items
                 SET deprecated = 1, superseded_by = ?1, updated_at = ?2
                 WHERE id = ?3 AND deprecated = 0",
                params![replacement.id, ts(Utc::now()), old_id],
            )?;
            insert(&tx, &replacement)?;
            tx.commit()?;
            Ok(changed == 1)
        })
        .await
        .map_err(map_tr_err)
}

/// Adds `b` to `a`'s related ids and vice versa.
pub async fn link_related(db: &Database, a: &str, b: &str) -> Result<(), ParleyError> {
    if a == b {
        return Ok(());
    }
    let (a, b) = (a.to_string(), b.to_string());
    db.connection()
        .call(move |conn| {
            let tx = conn.transaction()?;
            for (from, to) in [(&a, &b), (&b, &a)] {
                let related: Option<String> = tx
                    .query_row(
                        "SELECT related_item_ids FROM knowledge_items WHERE id = ?1",
                        params![from],
                        |row| row.get(0),
                    )
                    .optional()?;
                let Some(related) = related else { continue };
                let mut ids: Vec<String> = serde_json::from_str(&related).unwrap_or_default();
                if !ids.contains(to) {
                    ids.push(to.clone());
                    tx.execute(
                        "UPDATE knowledge_items SET related_item_ids = ?1 WHERE id = ?2",
                        params![to_json(&ids)?, from],
                    )?;
                }
            }
            tx.commit()?;
            Ok(())
        })
        .await
        .map_err(map_tr_err)
}

/// Active items of a workspace with no stored embedding.
pub async fn items_missing_embedding(
    db: &Database,
    workspace_id: &str,
) -> Result<Vec<KnowledgeItem>, ParleyError> {
    let workspace_id = workspace_id.to_string();
    db.connection()
        .call(move |conn| {
            let mut stmt = conn.prepare(&format!(
                "SELECT {COLUMNS} FROM knowledge_items k
                 WHERE k.workspace_id = ?1 AND {ACTIVE} AND k.embedding IS NULL"
            ))?;
            let items = stmt
                .query_map(params![workspace_id, ts(Utc::now())], row_to_item)?
                .collect::<Result<Vec<_>, _>>()?;
            Ok(items)
        })
        .await
        .map_err(map_tr_err)
}

pub async fn set_embedding(db: &Database, id: &str, embedding: &[f32]) -> Result<(), ParleyError> {
    let id = id.to_string();
    let blob = vec_to_blob(embedding);
    db.connection()
        .call(move |conn| {
            conn.execute(
                "UPDATE knowledge_items SET embedding = ?1, updated_at = ?2 WHERE id = ?3",
                params![blob, ts(Utc::now()), id],
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
    use chrono::Duration;

    fn item(name: &str, content: &str, embedding: Vec<f32>) -> KnowledgeItem {
        let mut item = KnowledgeItem::new("ws", name, content, "product");
        item.embedding = Some(embedding);
        item
    }

    #[tokio::test]
    async fn vector_search_ranks_and_applies_floor() {
        let db = db().await;
        insert_item(&db, &item("Red scarf", "Wool scarf", vec![1.0, 0.0])).await.unwrap();
        insert_item(&db, &item("Blue scarf", "Silk scarf", vec![0.8, 0.6])).await.unwrap();
        insert_item(&db, &item("Delivery", "Ships in 2 days", vec![0.0, 1.0])).await.unwrap();

        let hits = vector_search(&db, "ws", &[1.0, 0.0], 0.5, 10).await.unwrap();
        let names: Vec<_> = hits.iter().map(|(i, _)| i.name.as_str()).collect();
        assert_eq!(names, vec!["Red scarf", "Blue scarf"]);
        assert!(hits[0].1 > hits[1].1);

        assert!(vector_search(&db, "other", &[1.0, 0.0], 0.0, 10).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn deprecated_and_expired_items_are_excluded() {
        let db = db().await;
        let mut expired = item("Summer sale", "20% off", vec![1.0, 0.0]);
        expired.expires_at = Some(Utc::now() - Duration::days(1));
        insert_item(&db, &expired).await.unwrap();
        let mut old = item("Price", "10 EUR", vec![1.0, 0.0]);
        old.deprecated = true;
        insert_item(&db, &old).await.unwrap();

        assert!(vector_search(&db, "ws", &[1.0, 0.0], 0.0, 10).await.unwrap().is_empty());
        assert!(
            keyword_search(&db, "ws", &["sale".into(), "price".into()], 10)
                .await
                .unwrap()
                .is_empty()
        );
    }

    #[tokio::test]
    async fn keyword_search_matches_name_and_content() {
        let db = db().await;
        insert_item(&db, &item("Red scarf", "Hand knitted wool", vec![1.0])).await.unwrap();
        insert_item(&db, &item("Gloves", "Matching the red scarf", vec![1.0])).await.unwrap();
        insert_item(&db, &item("Hat", "Cotton", vec![1.0])).await.unwrap();

        let hits = keyword_search(&db, "ws", &["scarf".into()], 10).await.unwrap();
        assert_eq!(hits.len(), 2);
        let hits = keyword_search(&db, "ws", &["wool".into(), "cotton".into()], 10)
            .await
            .unwrap();
        assert_eq!(hits.len(), 2);
    }

    #[tokio::test]
    async fn supersede_deprecates_old_and_inserts_new() {
        let db = db().await;
        let old = item("Scarf price", "10 EUR", vec![1.0]);
        insert_item(&db, &old).await.unwrap();
        let new = item("Scarf price", "12 EUR", vec![1.0]);

        assert!(supersede_item(&db, &old.id, &new).await.unwrap());
        let active = find_active_by_name(&db, "ws", "scarf PRICE").await.unwrap().unwrap();
        assert_eq!(active.id, new.id);
        assert_eq!(active.content, "12 EUR");

        let again = item("Scarf price", "13 EUR", vec![1.0]);
        assert!(!supersede_item(&db, &old.id, &again).await.unwrap());
    }

    #[tokio::test]
    async fn links_are_symmetric_and_deduplicated() {
        let db = db().await;
        let a = item("Scarf", "x", vec![1.0]);
        let b = item("Gloves", "y", vec![1.0]);
        insert_item(&db, &a).await.unwrap();
        insert_item(&db, &b).await.unwrap();
        link_related(&db, &a.id, &b.id).await.unwrap();
        link_related(&db, &b.id, &a.id).await.unwrap();

        let items = get_items(&db, "ws", &[a.id.clone(), b.id.clone()]).await.unwrap();
        for i in items {
            assert_eq!(i.related_item_ids.len(), 1);
        }
    }

    #[tokio::test]
    async fn embeddings_can_be_backfilled() {
        let db = db().await;
        let mut bare = item("Hat", "Cotton", vec![]);
        bare.embedding = None;
        insert_item(&db, &bare).await.unwrap();
        assert_eq!(items_missing_embedding(&db, "ws").await.unwrap().len(), 1);
        set_embedding(&db, &bare.id, &[0.5, 0.5]).await.unwrap();
        assert!(items_missing_embedding(&db, "ws").await.unwrap().is_empty());
    }
}
