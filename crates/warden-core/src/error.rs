// SPDX-FileCopyrightText: 2026 Warden Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Error types for the Warden moderation engine.

use thiserror::Error;

use crate::ids::TenantId;

/// The primary error type used across all Warden traits and core operations.
///
/// Variants follow the engine's error taxonomy: `ConfigAbsent` is an expected
/// outcome (feature disabled for the tenant), `TransientUpstream` is retried
/// by the executor, `PermanentUpstream` is dead-lettered, and
/// `InternalInvariant` marks a state contradiction repaired in place.
#[derive(Debug, Error)]
pub enum WardenError {
    /// No configuration record exists for this feature and tenant.
    /// Expected; callers treat this as "feature disabled".
    #[error("no {feature} configuration for tenant {tenant}")]
    ConfigAbsent { tenant: TenantId, feature: &'static str },

    /// A stored record failed schema validation. The feature is disabled for
    /// the tenant and the original bytes are preserved for forensics.
    #[error("corrupt {feature} configuration for tenant {tenant}: {detail}")]
    ConfigCorrupt {
        tenant: TenantId,
        feature: &'static str,
        detail: String,
    },

    /// A retryable upstream failure (timeout, 5xx, rate limit).
    #[error("transient upstream failure: {detail}")]
    TransientUpstream {
        detail: String,
        /// Upstream-provided retry delay, if any (rate-limit responses).
        retry_after: Option<std::time::Duration>,
    },

    /// A terminal upstream failure (permission denied, not found, invalid input).
    #[error("permanent upstream failure: {detail}")]
    PermanentUpstream { detail: String },

    /// A feature detected a state contradiction (e.g. a board entry whose
    /// source message no longer exists).
    #[error("internal invariant violated: {detail}")]
    InternalInvariant { detail: String },

    /// Storage backend errors (database connection, query failure, serialization).
    #[error("storage error: {source}")]
    Storage {
        source: Box<dyn std::error::Error + Send + Sync>,
    },

    /// Operation timed out.
    #[error("operation timed out after {duration:?}")]
    Timeout { duration: std::time::Duration },

    /// Internal or unexpected errors.
    #[error("internal error: {0}")]
    Internal(String),
}

impl WardenError {
    /// Whether this error should be retried by the executor.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            WardenError::TransientUpstream { .. } | WardenError::Timeout { .. }
        )
    }
}
