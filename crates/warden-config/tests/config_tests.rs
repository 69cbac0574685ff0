// SPDX-FileCopyrightText: 2026 Warden Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Integration tests for the Warden configuration system.

use warden_config::diagnostic::suggest_key;
use warden_config::model::OverflowPolicy;
use warden_config::{load_and_validate_str, load_config_from_str};

/// Valid TOML with all known fields deserializes successfully.
#[test]
fn valid_toml_deserializes_into_warden_config() {
    let toml = r#"
[runtime]
log_level = "debug"
worker_cap = 4
inbox_capacity = 256
admin_overflow = "drop_oldest"

[storage]
database_path = "/tmp/warden-test.db"
wal_mode = false

[rate_window]
per_tenant_cap = 5000
sweep_interval_secs = 30

[executor]
max_attempts = 3
base_backoff_ms = 250
max_backoff_ms = 10000
deadline_secs = 15
idempotency_ttl_secs = 120
notice_channel = 123456789
"#;

    let config = load_config_from_str(toml).expect("valid TOML should deserialize");
    assert_eq!(config.runtime.log_level, "debug");
    assert_eq!(config.runtime.worker_cap, 4);
    assert_eq!(config.runtime.inbox_capacity, 256);
    assert_eq!(config.runtime.admin_overflow, OverflowPolicy::DropOldest);
    assert_eq!(config.storage.database_path, "/tmp/warden-test.db");
    assert!(!config.storage.wal_mode);
    assert_eq!(config.rate_window.per_tenant_cap, 5000);
    assert_eq!(config.rate_window.sweep_interval_secs, 30);
    assert_eq!(config.executor.max_attempts, 3);
    assert_eq!(config.executor.base_backoff_ms, 250);
    assert_eq!(config.executor.deadline_secs, 15);
    assert_eq!(config.executor.notice_channel, Some(123456789));
}

/// Unknown field in [runtime] produces an error mentioning the bad key.
#[test]
fn unknown_field_in_runtime_produces_error() {
    let toml = r#"
[runtime]
worker_capp = 4
"#;

    let err = load_config_from_str(toml).expect_err("should reject unknown field");
    let err_str = format!("{err}");
    assert!(
        err_str.contains("unknown field") || err_str.contains("worker_capp"),
        "error should mention unknown field or the bad key, got: {err_str}"
    );
}

/// Missing optional sections use defaults without error.
#[test]
fn missing_optional_sections_use_defaults() {
    let config = load_config_from_str("").expect("empty TOML should use defaults");

    assert_eq!(config.runtime.log_level, "info");
    assert_eq!(config.runtime.worker_cap, 8);
    assert_eq!(config.runtime.inbox_capacity, 1024);
    assert_eq!(config.runtime.admin_overflow, OverflowPolicy::Block);
    assert!(config.storage.wal_mode);
    assert_eq!(config.rate_window.per_tenant_cap, 10_000);
    assert_eq!(config.rate_window.sweep_interval_secs, 60);
    assert_eq!(config.executor.max_attempts, 5);
    assert_eq!(config.executor.deadline_secs, 30);
    assert_eq!(config.executor.idempotency_ttl_secs, 600);
    assert!(config.executor.notice_channel.is_none());
}

/// An invalid overflow policy string is rejected.
#[test]
fn invalid_overflow_policy_rejected() {
    let toml = r#"
[runtime]
admin_overflow = "explode"
"#;

    assert!(load_config_from_str(toml).is_err());
}

/// load_and_validate_str runs semantic validation after deserialization.
#[test]
fn validation_catches_zero_worker_cap() {
    let toml = r#"
[runtime]
worker_cap = 0
"#;

    let errors = load_and_validate_str(toml).expect_err("should fail validation");
    assert!(errors
        .iter()
        .any(|e| e.to_string().contains("worker_cap")));
}

/// Typo suggestions come from the shared fuzzy matcher.
#[test]
fn typo_suggestion_for_runtime_keys() {
    let valid = &["log_level", "worker_cap", "inbox_capacity", "admin_overflow"];
    assert_eq!(
        suggest_key("inbox_capcity", valid),
        Some("inbox_capacity".to_string())
    );
}
