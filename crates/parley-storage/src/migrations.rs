// SPDX-FileCopyrightText: 2026 Parley Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Embedded database migrations using refinery.
//!
//! SQL files under `migrations/` are compiled into the binary and applied on
//! every open. Refinery records applied versions in `refinery_schema_history`.

use parley_core::ParleyError;
use tokio_rusqlite::Connection;
use tracing::info;

mod embedded {
    use refinery::embed_migrations;
    embed_migrations!("migrations");
}

pub async fn run(conn: &Connection) -> Result<(), ParleyError> {
    let applied = conn
        .call(|conn| {
            embedded::migrations::runner()
                .run(conn)
                .map(|report| report.applied_migrations().len())
        })
        .await
        .map_err(ParleyError::storage)?;
    if applied > 0 {
        info!(applied, "database migrations applied");
    }
    Ok(())
}
