// SPDX-FileCopyrightText: 2026 Warden Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! CRUD operations for scoped per-tenant records.

use rusqlite::params;

use warden_core::{TenantId, WardenError};

use crate::database::{map_tr_err, Database};

/// Fetch a single record value.
pub async fn get(
    db: &Database,
    tenant: TenantId,
    namespace: &str,
    key: &str,
) -> Result<Option<String>, WardenError> {
    let namespace = namespace.to_string();
    let key = key.to_string();
    db.connection()
        .call(move |conn| {
            let result = conn.query_row(
                "SELECT value FROM records
                 WHERE tenant_id = ?1 AND namespace = ?2 AND key = ?3",
                params![tenant.0 as i64, namespace, key],
                |row| row.get::<_, String>(0),
            );
            match result {
                Ok(value) => Ok(Some(value)),
                Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
                Err(e) => Err(e),
            }
        })
        .await
        .map_err(map_tr_err)
}

/// Upsert a record value. Durable (WAL fsync policy) before returning.
pub async fn put(
    db: &Database,
    tenant: TenantId,
    namespace: &str,
    key: &str,
    value: &str,
) -> Result<(), WardenError> {
    let namespace = namespace.to_string();
    let key = key.to_string();
    let value = value.to_string();
    db.connection()
        .call(move |conn| {
            conn.execute(
                "INSERT INTO records (tenant_id, namespace, key, value)
                 VALUES (?1, ?2, ?3, ?4)
                 ON CONFLICT (tenant_id, namespace, key)
                 DO UPDATE SET value = excluded.value,
                               updated_at = strftime('%Y-%m-%dT%H:%M:%fZ', 'now')",
                params![tenant.0 as i64, namespace, key, value],
            )?;
            Ok(())
        })
        .await
        .map_err(map_tr_err)
}

/// Delete a record. Deleting an absent record is a no-op.
pub async fn delete(
    db: &Database,
    tenant: TenantId,
    namespace: &str,
    key: &str,
) -> Result<(), WardenError> {
    let namespace = namespace.to_string();
    let key = key.to_string();
    db.connection()
        .call(move |conn| {
            conn.execute(
                "DELETE FROM records
                 WHERE tenant_id = ?1 AND namespace = ?2 AND key = ?3",
                params![tenant.0 as i64, namespace, key],
            )?;
            Ok(())
        })
        .await
        .map_err(map_tr_err)
}

/// List all `(key, value)` pairs under a tenant namespace, key-ordered.
pub async fn scan(
    db: &Database,
    tenant: TenantId,
    namespace: &str,
) -> Result<Vec<(String, String)>, WardenError> {
    let namespace = namespace.to_string();
    db.connection()
        .call(move |conn| {
            let mut stmt = conn.prepare(
                "SELECT key, value FROM records
                 WHERE tenant_id = ?1 AND namespace = ?2
                 ORDER BY key ASC",
            )?;
            let rows = stmt.query_map(params![tenant.0 as i64, namespace], |row| {
                Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?))
            })?;
            rows.collect::<Result<Vec<_>, _>>()
        })
        .await
        .map_err(map_tr_err)
}

/// Delete every record under a tenant namespace. Returns rows removed.
pub async fn delete_prefix(
    db: &Database,
    tenant: TenantId,
    namespace: &str,
) -> Result<u64, WardenError> {
    let namespace = namespace.to_string();
    db.connection()
        .call(move |conn| {
            let n = conn.execute(
                "DELETE FROM records WHERE tenant_id = ?1 AND namespace = ?2",
                params![tenant.0 as i64, namespace],
            )?;
            Ok(n as u64)
        })
        .await
        .map_err(map_tr_err)
}

/// Delete every record belonging to a tenant. Returns rows removed.
pub async fn delete_tenant(db: &Database, tenant: TenantId) -> Result<u64, WardenError> {
    db.connection()
        .call(move |conn| {
            let n = conn.execute(
                "DELETE FROM records WHERE tenant_id = ?1",
                params![tenant.0 as i64],
            )?;
            Ok(n as u64)
        })
        .await
        .map_err(map_tr_err)
}
