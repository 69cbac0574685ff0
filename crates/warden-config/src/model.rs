// SPDX-FileCopyrightText: 2026 Warden Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Configuration model structs for the Warden moderation engine.
//!
//! All structs use `#[serde(deny_unknown_fields)]` to reject unrecognized
//! config keys at startup, providing actionable error messages. This is the
//! *process* configuration; per-tenant policy settings live in the Store and
//! are managed at runtime.

use serde::{Deserialize, Serialize};

/// Top-level Warden configuration.
///
/// Loaded from TOML files following XDG hierarchy, with environment variable
/// overrides. All sections are optional and default to sensible values.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct WardenConfig {
    /// Runtime behavior: logging, worker pool, inbox sizing.
    #[serde(default)]
    pub runtime: RuntimeConfig,

    /// Storage backend settings.
    #[serde(default)]
    pub storage: StorageConfig,

    /// Sliding-window rate counter settings.
    #[serde(default)]
    pub rate_window: RateWindowConfig,

    /// Outbound action executor settings.
    #[serde(default)]
    pub executor: ExecutorConfig,
}

/// Runtime behavior configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct RuntimeConfig {
    /// Logging level (trace, debug, info, warn, error).
    #[serde(default = "default_log_level")]
    pub log_level: String,

    /// Maximum number of tenant workers processing events in parallel.
    #[serde(default = "default_worker_cap")]
    pub worker_cap: usize,

    /// Bounded per-tenant inbox capacity.
    #[serde(default = "default_inbox_capacity")]
    pub inbox_capacity: usize,

    /// Overflow policy for admin-class events when a tenant inbox is full:
    /// "block" applies backpressure, "drop_oldest" evicts the oldest event.
    /// Message-class events always drop-oldest.
    #[serde(default = "default_admin_overflow")]
    pub admin_overflow: OverflowPolicy,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
            worker_cap: default_worker_cap(),
            inbox_capacity: default_inbox_capacity(),
            admin_overflow: default_admin_overflow(),
        }
    }
}

/// Inbox overflow policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum OverflowPolicy {
    Block,
    DropOldest,
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_worker_cap() -> usize {
    8
}

fn default_inbox_capacity() -> usize {
    1024
}

fn default_admin_overflow() -> OverflowPolicy {
    OverflowPolicy::Block
}

/// Storage backend configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct StorageConfig {
    /// Path to the SQLite database file.
    #[serde(default = "default_database_path")]
    pub database_path: String,

    /// Enable WAL (Write-Ahead Logging) mode for SQLite.
    #[serde(default = "default_wal_mode")]
    pub wal_mode: bool,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            database_path: default_database_path(),
            wal_mode: default_wal_mode(),
        }
    }
}

fn default_database_path() -> String {
    dirs::data_dir()
        .map(|p| p.join("warden").join("warden.db"))
        .unwrap_or_else(|| std::path::PathBuf::from("warden.db"))
        .to_string_lossy()
        .into_owned()
}

fn default_wal_mode() -> bool {
    true
}

/// Sliding-window rate counter configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct RateWindowConfig {
    /// Maximum timestamp entries held per tenant. Overflow evicts the
    /// tenant's oldest subject key and counts the drop.
    #[serde(default = "default_per_tenant_cap")]
    pub per_tenant_cap: usize,

    /// Interval of the background pass that drops fully-expired keys.
    #[serde(default = "default_sweep_interval_secs")]
    pub sweep_interval_secs: u64,
}

impl Default for RateWindowConfig {
    fn default() -> Self {
        Self {
            per_tenant_cap: default_per_tenant_cap(),
            sweep_interval_secs: default_sweep_interval_secs(),
        }
    }
}

fn default_per_tenant_cap() -> usize {
    10_000
}

fn default_sweep_interval_secs() -> u64 {
    60
}

/// Outbound action executor configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct ExecutorConfig {
    /// Maximum delivery attempts before a transient failure dead-letters.
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    /// Base backoff between retries, doubled per attempt.
    #[serde(default = "default_base_backoff_ms")]
    pub base_backoff_ms: u64,

    /// Backoff ceiling.
    #[serde(default = "default_max_backoff_ms")]
    pub max_backoff_ms: u64,

    /// Per-envelope delivery deadline; exceeding it counts as transient.
    #[serde(default = "default_deadline_secs")]
    pub deadline_secs: u64,

    /// How long an idempotency key suppresses re-submission.
    #[serde(default = "default_idempotency_ttl_secs")]
    pub idempotency_ttl_secs: u64,

    /// Channel id receiving operator notices for dead-lettered actions.
    /// `None` disables notices.
    #[serde(default)]
    pub notice_channel: Option<u64>,
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            base_backoff_ms: default_base_backoff_ms(),
            max_backoff_ms: default_max_backoff_ms(),
            deadline_secs: default_deadline_secs(),
            idempotency_ttl_secs: default_idempotency_ttl_secs(),
            notice_channel: None,
        }
    }
}

fn default_max_attempts() -> u32 {
    5
}

fn default_base_backoff_ms() -> u64 {
    500
}

fn default_max_backoff_ms() -> u64 {
    30_000
}

fn default_deadline_secs() -> u64 {
    30
}

fn default_idempotency_ttl_secs() -> u64 {
    600
}
