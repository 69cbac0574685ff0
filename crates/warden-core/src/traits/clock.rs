// SPDX-FileCopyrightText: 2026 Warden Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Injectable time source.
//!
//! Rate windows and the scheduler run on monotonic time; persisted due times
//! and log timestamps use wall time. Tests inject a manual clock and advance
//! it explicitly.

use std::time::Instant;

use chrono::{DateTime, Utc};

/// Monotonic + wall time source.
pub trait Clock: Send + Sync {
    /// Monotonic instant, never going backwards.
    fn now(&self) -> Instant;

    /// Wall-clock time, for persisted due times and user-visible timestamps.
    fn wall(&self) -> DateTime<Utc>;
}
