// SPDX-FileCopyrightText: 2026 Warden Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Embedded schema migrations.
//!
//! SQL files live in `migrations/` at the crate root and are compiled in via
//! refinery. The runner is idempotent; already-applied versions are skipped.

use tracing::debug;

use warden_core::WardenError;

use crate::database::map_tr_err;

mod embedded {
    refinery::embed_migrations!("migrations");
}

/// Run all pending migrations on the shared connection.
pub async fn run(conn: &tokio_rusqlite::Connection) -> Result<(), WardenError> {
    let report = conn
        .call(|conn| {
            embedded::migrations::runner()
                .run(conn)
                .map_err(|e| rusqlite::Error::ModuleError(e.to_string()))
        })
        .await
        .map_err(map_tr_err)?;

    let applied = report.applied_migrations().len();
    if applied > 0 {
        debug!(applied, "schema migrations applied");
    }
    Ok(())
}
