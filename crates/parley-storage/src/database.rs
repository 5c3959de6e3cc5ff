// SPDX-FileCopyrightText: 2026 Parley Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Database connection management with PRAGMA setup, WAL mode, and lifecycle.
//!
//! All reads and writes are serialized through tokio-rusqlite's single
//! background thread. Do NOT create additional Connection instances for writes.

use std::path::Path;

use parley_core::ParleyError;
use tokio_rusqlite::Connection;
use tracing::{debug, info};

use crate::migrations;

/// Handle to the Parley database. Cheap to clone.
#[derive(Clone)]
pub struct Database {
    conn: Connection,
}

impl Database {
    /// Opens (creating if needed) the database at `path` and applies pending
    /// migrations.
    pub async fn open(path: &str, wal_mode: bool) -> Result<Self, ParleyError> {
        if let Some(parent) = Path::new(path).parent()
            && !parent.as_os_str().is_empty()
        {
            std::fs::create_dir_all(parent).map_err(ParleyError::storage)?;
        }

        let conn = Connection::open(path).await.map_err(ParleyError::storage)?;
        let db = Self { conn };
        db.configure(wal_mode).await?;
        migrations::run(&db.conn).await?;
        info!(path, wal_mode, "database opened");
        Ok(db)
    }

    /// Private in-memory database, used by tests and `config check`.
    pub async fn open_in_memory() -> Result<Self, ParleyError> {
        let conn = Connection::open_in_memory()
            .await
            .map_err(ParleyError::storage)?;
        let db = Self { conn };
        db.configure(false).await?;
        migrations::run(&db.conn).await?;
        Ok(db)
    }

    async fn configure(&self, wal_mode: bool) -> Result<(), ParleyError> {
        self.conn
            .call(move |conn| {
                if wal_mode {
                    conn.pragma_update(None, "journal_mode", "WAL")?;
                }
                conn.pragma_update(None, "synchronous", "NORMAL")?;
                conn.pragma_update(None, "foreign_keys", "ON")?;
                conn.pragma_update(None, "busy_timeout", 5000)?;
                Ok(())
            })
            .await
            .map_err(map_tr_err)?;
        debug!("database pragmas applied");
        Ok(())
    }

    pub fn connection(&self) -> &Connection {
        &self.conn
    }

    /// Checkpoints the WAL and closes the connection.
    pub async fn close(self) -> Result<(), ParleyError> {
        self.conn
            .call(|conn| {
                conn.execute_batch("PRAGMA wal_checkpoint(TRUNCATE);")?;
                Ok(())
            })
            .await
            .map_err(map_tr_err)?;
        self.conn.close().await.map_err(ParleyError::storage)
    }
}

pub(crate) fn map_tr_err(e: tokio_rusqlite::Error<rusqlite::Error>) -> ParleyError {
    ParleyError::Storage {
        source: Box::new(e),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[tokio::test]
    async fn open_creates_parent_dirs_and_schema() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("nested/parley.db");
        let db = Database::open(path.to_str().unwrap(), true).await.unwrap();

        let tables: i64 = db
            .connection()
            .call(|conn| -> Result<i64, rusqlite::Error> {
                conn.query_row(
                    "SELECT COUNT(*) FROM sqlite_master WHERE type = 'table' \
                     AND name IN ('interactions', 'customers', 'knowledge_items', 'jobs')",
                    [],
                    |row| row.get(0),
                )
            })
            .await
            .unwrap();
        assert_eq!(tables, 4);
        db.close().await.unwrap();
    }

    #[tokio::test]
    async fn reopening_is_idempotent() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("parley.db");
        let path = path.to_str().unwrap();
        Database::open(path, true).await.unwrap().close().await.unwrap();
        Database::open(path, true).await.unwrap().close().await.unwrap();
    }
}
