// SPDX-FileCopyrightText: 2026 Warden Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Store trait for durable per-tenant records.
//!
//! Records are keyed `(tenant, namespace, key)` and hold JSON text. Writes
//! are last-write-wins and must be durable before `put` returns. Concurrent
//! readers are safe; the backend serializes writers to the same scope.

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::error;

use crate::error::WardenError;
use crate::ids::TenantId;

/// Durable per-tenant record store.
#[async_trait]
pub trait Store: Send + Sync {
    /// Fetch a record. Read errors are reported as absent by the backend
    /// (treated as "no config") after logging.
    async fn get(
        &self,
        tenant: TenantId,
        namespace: &str,
        key: &str,
    ) -> Result<Option<String>, WardenError>;

    /// Write a record, replacing any existing value atomically.
    async fn put(
        &self,
        tenant: TenantId,
        namespace: &str,
        key: &str,
        value: &str,
    ) -> Result<(), WardenError>;

    /// Delete a record. Deleting an absent record is a no-op.
    async fn delete(&self, tenant: TenantId, namespace: &str, key: &str)
        -> Result<(), WardenError>;

    /// List all `(key, value)` pairs under a tenant namespace.
    async fn scan(
        &self,
        tenant: TenantId,
        namespace: &str,
    ) -> Result<Vec<(String, String)>, WardenError>;

    /// Delete every record under a tenant namespace. Returns the number of
    /// records removed.
    async fn delete_prefix(&self, tenant: TenantId, namespace: &str) -> Result<u64, WardenError>;

    /// Delete every record belonging to a tenant (soft tenant removal).
    async fn delete_tenant(&self, tenant: TenantId) -> Result<u64, WardenError>;
}

/// Fetch and deserialize a typed record.
///
/// Absent records map to `Ok(None)`. A record that exists but fails to
/// deserialize maps to [`WardenError::ConfigCorrupt`]; the original bytes
/// stay in the store for forensics.
pub async fn get_record<T: DeserializeOwned>(
    store: &dyn Store,
    tenant: TenantId,
    namespace: &'static str,
    key: &str,
) -> Result<Option<T>, WardenError> {
    let Some(raw) = store.get(tenant, namespace, key).await? else {
        return Ok(None);
    };
    match serde_json::from_str(&raw) {
        Ok(value) => Ok(Some(value)),
        Err(e) => {
            error!(
                tenant = %tenant,
                namespace,
                key,
                error = %e,
                "record failed schema validation, preserving original bytes"
            );
            Err(WardenError::ConfigCorrupt {
                tenant,
                feature: namespace,
                detail: e.to_string(),
            })
        }
    }
}

/// Serialize and write a typed record.
pub async fn put_record<T: Serialize>(
    store: &dyn Store,
    tenant: TenantId,
    namespace: &str,
    key: &str,
    value: &T,
) -> Result<(), WardenError> {
    let raw = serde_json::to_string(value)
        .map_err(|e| WardenError::Internal(format!("record serialization failed: {e}")))?;
    store.put(tenant, namespace, key, &raw).await
}
