// SPDX-FileCopyrightText: 2026 Warden Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! SQLite implementation of the Store trait.

use async_trait::async_trait;
use tracing::error;

use warden_core::{Store, TenantId, WardenError};

use crate::database::Database;
use crate::queries;

/// SQLite-backed record store.
///
/// Wraps a [`Database`] handle and delegates to the typed query modules.
/// Writers against the same scope are serialized by the single background
/// connection; readers never block each other under WAL.
#[derive(Clone)]
pub struct SqliteStore {
    db: Database,
}

impl SqliteStore {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    pub fn database(&self) -> &Database {
        &self.db
    }
}

#[async_trait]
impl Store for SqliteStore {
    async fn get(
        &self,
        tenant: TenantId,
        namespace: &str,
        key: &str,
    ) -> Result<Option<String>, WardenError> {
        // Read errors are reported as absent ("no config") after logging;
        // callers can't do anything smarter with a broken read.
        match queries::records::get(&self.db, tenant, namespace, key).await {
            Ok(value) => Ok(value),
            Err(e) => {
                error!(tenant = %tenant, namespace, key, error = %e, "record read failed");
                Ok(None)
            }
        }
    }

    async fn put(
        &self,
        tenant: TenantId,
        namespace: &str,
        key: &str,
        value: &str,
    ) -> Result<(), WardenError> {
        queries::records::put(&self.db, tenant, namespace, key, value).await
    }

    async fn delete(
        &self,
        tenant: TenantId,
        namespace: &str,
        key: &str,
    ) -> Result<(), WardenError> {
        queries::records::delete(&self.db, tenant, namespace, key).await
    }

    async fn scan(
        &self,
        tenant: TenantId,
        namespace: &str,
    ) -> Result<Vec<(String, String)>, WardenError> {
        queries::records::scan(&self.db, tenant, namespace).await
    }

    async fn delete_prefix(&self, tenant: TenantId, namespace: &str) -> Result<u64, WardenError> {
        queries::records::delete_prefix(&self.db, tenant, namespace).await
    }

    async fn delete_tenant(&self, tenant: TenantId) -> Result<u64, WardenError> {
        queries::records::delete_tenant(&self.db, tenant).await
    }
}
