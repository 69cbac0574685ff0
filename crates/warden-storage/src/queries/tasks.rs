// SPDX-FileCopyrightText: 2026 Warden Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Persistent scheduled-task mirror.
//!
//! The scheduler runs on monotonic time; durable tasks additionally land
//! here with a wall-clock due time so a restart can restore them. Re-upserts
//! with the same task key replace the pending row.

use chrono::{DateTime, Utc};
use rusqlite::params;

use warden_core::{TenantId, WardenError};

use crate::database::{map_tr_err, Database};
use crate::models::PersistentTask;

/// Insert or replace a mirrored task.
pub async fn upsert(db: &Database, task: &PersistentTask) -> Result<(), WardenError> {
    let task = task.clone();
    db.connection()
        .call(move |conn| {
            conn.execute(
                "INSERT INTO tasks (task_key, tenant_id, kind, payload, due_at)
                 VALUES (?1, ?2, ?3, ?4, ?5)
                 ON CONFLICT (task_key)
                 DO UPDATE SET tenant_id = excluded.tenant_id,
                               kind = excluded.kind,
                               payload = excluded.payload,
                               due_at = excluded.due_at",
                params![
                    task.task_key,
                    task.tenant.0 as i64,
                    task.kind,
                    task.payload,
                    task.due_at.to_rfc3339(),
                ],
            )?;
            Ok(())
        })
        .await
        .map_err(map_tr_err)
}

/// Remove a mirrored task after it fires or is cancelled.
pub async fn remove(db: &Database, task_key: &str) -> Result<(), WardenError> {
    let task_key = task_key.to_string();
    db.connection()
        .call(move |conn| {
            conn.execute("DELETE FROM tasks WHERE task_key = ?1", params![task_key])?;
            Ok(())
        })
        .await
        .map_err(map_tr_err)
}

/// Load every mirrored task, soonest first. Rows with an unparseable due
/// time are skipped (and counted by the caller via the length difference).
pub async fn load_all(db: &Database) -> Result<Vec<PersistentTask>, WardenError> {
    db.connection()
        .call(|conn| {
            let mut stmt = conn.prepare(
                "SELECT task_key, tenant_id, kind, payload, due_at
                 FROM tasks ORDER BY due_at ASC",
            )?;
            let rows = stmt.query_map([], |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, i64>(1)?,
                    row.get::<_, String>(2)?,
                    row.get::<_, String>(3)?,
                    row.get::<_, String>(4)?,
                ))
            })?;
            let mut tasks = Vec::new();
            for row in rows {
                let (task_key, tenant, kind, payload, due_at) = row?;
                let Ok(due_at) = DateTime::parse_from_rfc3339(&due_at) else {
                    continue;
                };
                tasks.push(PersistentTask {
                    task_key,
                    tenant: TenantId(tenant as u64),
                    kind,
                    payload,
                    due_at: due_at.with_timezone(&Utc),
                });
            }
            Ok(tasks)
        })
        .await
        .map_err(map_tr_err)
}
