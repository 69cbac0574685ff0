// SPDX-FileCopyrightText: 2026 Warden Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Read-through cache for per-tenant feature settings.
//!
//! Singleton settings records (key `"config"` in a feature namespace) are the
//! hottest reads in the system -- every event touches several of them. The
//! cache holds the raw JSON per `(tenant, namespace)` and is invalidated
//! synchronously on every write, so a feature never observes a stale config
//! after an admin update completes.

use std::sync::Arc;

use dashmap::DashMap;
use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::{debug, error, warn};

use warden_core::{Store, TenantId, WardenError};

/// Key used for singleton settings records inside a feature namespace.
pub const SETTINGS_KEY: &str = "config";

/// Bound on cached entries. Crossing it resets the cache wholesale; entries
/// repopulate on demand.
const CACHE_CAP: usize = 4096;

/// Cached state of one `(tenant, namespace)` settings record.
#[derive(Clone)]
enum Cached {
    Present(Arc<str>),
    Absent,
}

/// Read-through, write-through settings cache over the Store.
pub struct TenantConfigCache {
    store: Arc<dyn Store>,
    entries: DashMap<(TenantId, &'static str), Cached>,
}

impl TenantConfigCache {
    pub fn new(store: Arc<dyn Store>) -> Self {
        Self { store, entries: DashMap::new() }
    }

    /// Fetch a feature's settings for a tenant.
    ///
    /// `Ok(None)` means no settings record exists (feature disabled).
    /// A record that fails to deserialize maps to
    /// [`WardenError::ConfigCorrupt`]; the raw bytes stay in the store.
    pub async fn get<T: DeserializeOwned>(
        &self,
        tenant: TenantId,
        namespace: &'static str,
    ) -> Result<Option<T>, WardenError> {
        let cached = self.entries.get(&(tenant, namespace)).map(|e| e.clone());
        let raw = match cached {
            Some(Cached::Present(raw)) => Some(raw),
            Some(Cached::Absent) => None,
            None => {
                let fetched = self.store.get(tenant, namespace, SETTINGS_KEY).await?;
                let cached = match &fetched {
                    Some(raw) => Cached::Present(Arc::from(raw.as_str())),
                    None => Cached::Absent,
                };
                if self.entries.len() >= CACHE_CAP {
                    warn!(cap = CACHE_CAP, "settings cache full, resetting");
                    self.entries.clear();
                }
                self.entries.insert((tenant, namespace), cached.clone());
                match cached {
                    Cached::Present(raw) => Some(raw),
                    Cached::Absent => None,
                }
            }
        };

        let Some(raw) = raw else {
            return Ok(None);
        };
        match serde_json::from_str(&raw) {
            Ok(value) => Ok(Some(value)),
            Err(e) => {
                error!(
                    tenant = %tenant,
                    namespace,
                    error = %e,
                    "settings record failed schema validation"
                );
                Err(WardenError::ConfigCorrupt {
                    tenant,
                    feature: namespace,
                    detail: e.to_string(),
                })
            }
        }
    }

    /// Write a feature's settings. The cache entry is replaced before this
    /// returns, so subsequent reads in the same tenant worker see the update.
    pub async fn put<T: Serialize>(
        &self,
        tenant: TenantId,
        namespace: &'static str,
        value: &T,
    ) -> Result<(), WardenError> {
        let raw = serde_json::to_string(value)
            .map_err(|e| WardenError::Internal(format!("settings serialization failed: {e}")))?;
        self.store.put(tenant, namespace, SETTINGS_KEY, &raw).await?;
        self.entries
            .insert((tenant, namespace), Cached::Present(Arc::from(raw.as_str())));
        debug!(tenant = %tenant, namespace, "settings updated");
        Ok(())
    }

    /// Delete a feature's settings record.
    pub async fn delete(&self, tenant: TenantId, namespace: &'static str) -> Result<(), WardenError> {
        self.store.delete(tenant, namespace, SETTINGS_KEY).await?;
        self.entries.insert((tenant, namespace), Cached::Absent);
        Ok(())
    }

    /// Drop a cached entry without touching the store. Used when another
    /// writer (admin surface) mutated the underlying record directly.
    pub fn invalidate(&self, tenant: TenantId, namespace: &'static str) {
        self.entries.remove(&(tenant, namespace));
    }
}
