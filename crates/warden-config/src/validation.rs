// SPDX-FileCopyrightText: 2026 Warden Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Post-deserialization validation for configuration values.
//!
//! Validates semantic constraints that cannot be expressed via serde
//! attributes, such as non-empty paths and sane worker/backoff bounds.

use crate::diagnostic::ConfigError;
use crate::model::WardenConfig;

/// Validate a deserialized configuration for semantic correctness.
///
/// Returns `Ok(())` if all validations pass, or `Err(Vec<ConfigError>)` with
/// all collected validation errors (does not fail fast).
pub fn validate_config(config: &WardenConfig) -> Result<(), Vec<ConfigError>> {
    let mut errors = Vec::new();

    if config.storage.database_path.trim().is_empty() {
        errors.push(ConfigError::Validation {
            message: "storage.database_path must not be empty".to_string(),
        });
    }

    if config.runtime.worker_cap == 0 {
        errors.push(ConfigError::Validation {
            message: "runtime.worker_cap must be at least 1".to_string(),
        });
    }

    if config.runtime.inbox_capacity == 0 {
        errors.push(ConfigError::Validation {
            message: "runtime.inbox_capacity must be at least 1".to_string(),
        });
    }

    const VALID_LEVELS: &[&str] = &["trace", "debug", "info", "warn", "error"];
    if !VALID_LEVELS.contains(&config.runtime.log_level.as_str()) {
        errors.push(ConfigError::Validation {
            message: format!(
                "runtime.log_level `{}` is not one of {}",
                config.runtime.log_level,
                VALID_LEVELS.join(", ")
            ),
        });
    }

    if config.rate_window.per_tenant_cap == 0 {
        errors.push(ConfigError::Validation {
            message: "rate_window.per_tenant_cap must be at least 1".to_string(),
        });
    }

    if config.executor.max_attempts == 0 {
        errors.push(ConfigError::Validation {
            message: "executor.max_attempts must be at least 1".to_string(),
        });
    }

    if config.executor.base_backoff_ms > config.executor.max_backoff_ms {
        errors.push(ConfigError::Validation {
            message: format!(
                "executor.base_backoff_ms ({}) must not exceed executor.max_backoff_ms ({})",
                config.executor.base_backoff_ms, config.executor.max_backoff_ms
            ),
        });
    }

    if config.executor.deadline_secs == 0 {
        errors.push(ConfigError::Validation {
            message: "executor.deadline_secs must be at least 1".to_string(),
        });
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}
