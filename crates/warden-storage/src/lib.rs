// SPDX-FileCopyrightText: 2026 Warden Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! SQLite persistence layer for the Warden moderation engine.
//!
//! Provides WAL-mode SQLite storage with embedded migrations, a single-writer
//! concurrency model via `tokio-rusqlite`, the scoped per-tenant record store,
//! the persistent scheduled-task mirror, and the read-through settings cache.

pub mod cache;
pub mod database;
pub mod migrations;
pub mod models;
pub mod queries;
pub mod store;

pub use cache::{TenantConfigCache, SETTINGS_KEY};
pub use database::Database;
pub use models::*;
pub use store::SqliteStore;
