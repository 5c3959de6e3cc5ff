// SPDX-FileCopyrightText: 2026 Parley Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Shared counters with optional expiry, used for rate limiting and spam
//! windows when several processes share one database.

use std::time::Duration;

use chrono::Utc;
use parley_core::ParleyError;
use rusqlite::{Connection, OptionalExtension, params};

use crate::codec::ts;
use crate::database::{Database, map_tr_err};

fn expiry(ttl: Option<Duration>) -> Option<String> {
    ttl.and_then(|t| chrono::Duration::from_std(t).ok())
        .map(|t| ts(Utc::now() + t))
}

fn bump(conn: &mut Connection, key: &str, ttl: Option<Duration>) -> rusqlite::Result<i64> {
    let now = ts(Utc::now());
    let tx = conn.transaction()?;
    tx.execute(
        "DELETE FROM counters WHERE key = ?1 AND expires_at IS NOT NULL AND expires_at <= ?2",
        params![key, now],
    )?;
    let value = tx.query_row(
        "INSERT INTO counters (key, value, expires_at) VALUES (?1, 1, ?2)
         ON CONFLICT(key) DO UPDATE SET value = value + 1
         RETURNING value",
        params![key, expiry(ttl)],
        |row| row.get(0),
    )?;
    tx.commit()?;
    Ok(value)
}

/// Increments `key`. The expiry is fixed when the key is created.
pub async fn incr_with_ttl(db: &Database, key: &str, ttl: Duration) -> Result<i64, ParleyError> {
    let key = key.to_string();
    db.connection()
        .call(move |conn| bump(conn, &key, Some(ttl)))
        .await
        .map_err(map_tr_err)
}

pub async fn incr(db: &Database, key: &str) -> Result<i64, ParleyError> {
    let key = key.to_string();
    db.connection()
        .call(move |conn| bump(conn, &key, None))
        .await
        .map_err(map_tr_err)
}

/// Current value, ignoring an expired key.
pub async fn get(db: &Database, key: &str) -> Result<Option<i64>, ParleyError> {
    let key = key.to_string();
    db.connection()
        .call(move |conn| {
            conn.query_row(
                "SELECT value FROM counters
                 WHERE key = ?1 AND (expires_at IS NULL OR expires_at > ?2)",
                params![key, ts(Utc::now())],
                |row| row.get(0),
            )
            .optional()
        })
        .await
        .map_err(map_tr_err)
}

pub async fn set(
    db: &Database,
    key: &str,
    value: i64,
    ttl: Option<Duration>,
) -> Result<(), ParleyError> {
    let key = key.to_string();
    db.connection()
        .call(move |conn| {
            conn.execute(
                "INSERT INTO counters (key, value, expires_at) VALUES (?1, ?2, ?3)
                 ON CONFLICT(key) DO UPDATE SET value = excluded.value,
                                                expires_at = excluded.expires_at",
                params![key, value, expiry(ttl)],
            )?;
            Ok(())
        })
        .await
        .map_err(map_tr_err)
}

pub async fn delete(db: &Database, key: &str) -> Result<(), ParleyError> {
    let key = key.to_string();
    db.connection()
        .call(move |conn| {
            conn.execute("DELETE FROM counters WHERE key = ?1", params![key])?;
            Ok(())
        })
        .await
        .map_err(map_tr_err)
}

/// Drops every expired counter. Returns how many were removed.
pub async fn purge_expired(db: &Database) -> Result<usize, ParleyError> {
    db.connection()
        .call(|conn| {
            conn.execute(
                "DELETE FROM counters WHERE expires_at IS NOT NULL AND expires_at <= ?1",
                params![ts(Utc::now())],
            )
        })
        .await
        .map_err(map_tr_err)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::queries::testing::db;

    #[tokio::test]
    async fn increments_are_cumulative() {
        let db = db().await;
        assert_eq!(incr(&db, "a").await.unwrap(), 1);
        assert_eq!(incr(&db, "a").await.unwrap(), 2);
        assert_eq!(incr_with_ttl(&db, "b", Duration::from_secs(60)).await.unwrap(), 1);
        assert_eq!(get(&db, "a").await.unwrap(), Some(2));
        assert_eq!(get(&db, "missing").await.unwrap(), None);
    }

    #[tokio::test]
    async fn expired_counter_restarts() {
        let db = db().await;
        incr_with_ttl(&db, "w", Duration::from_millis(20)).await.unwrap();
        incr_with_ttl(&db, "w", Duration::from_millis(20)).await.unwrap();
        tokio::time::sleep(Duration::from_millis(40)).await;

        assert_eq!(get(&db, "w").await.unwrap(), None);
        assert_eq!(incr_with_ttl(&db, "w", Duration::from_secs(60)).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn set_overwrites_and_delete_removes() {
        let db = db().await;
        incr(&db, "k").await.unwrap();
        set(&db, "k", 41, None).await.unwrap();
        assert_eq!(incr(&db, "k").await.unwrap(), 42);

        set(&db, "gone", 1, Some(Duration::from_millis(1))).await.unwrap();
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert_eq!(purge_expired(&db).await.unwrap(), 1);

        delete(&db, "k").await.unwrap();
        assert_eq!(get(&db, "k").await.unwrap(), None);
    }
}
