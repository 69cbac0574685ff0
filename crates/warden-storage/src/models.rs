// SPDX-FileCopyrightText: 2026 Warden Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Row types for the storage layer.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use warden_core::TenantId;

/// One scoped record row.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Record {
    pub tenant: TenantId,
    pub namespace: String,
    pub key: String,
    pub value: String,
    pub updated_at: String,
}

/// A scheduled task mirrored to disk so restarts restore it.
///
/// `task_key` is the stable feature-chosen identity (e.g.
/// `"bumper.remind:1234"`); re-scheduling the same key replaces the row.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PersistentTask {
    pub task_key: String,
    pub tenant: TenantId,
    pub kind: String,
    pub payload: String,
    pub due_at: DateTime<Utc>,
}
