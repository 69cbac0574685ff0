// SPDX-FileCopyrightText: 2026 Warden Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Deterministic clock for tests.

use std::sync::Mutex;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};

use warden_core::Clock;

/// A clock that only moves when a test advances it.
///
/// Monotonic and wall time advance in lockstep, so code that persists wall
/// due-times and compares monotonic instants stays consistent.
pub struct ManualClock {
    base: Instant,
    wall_base: DateTime<Utc>,
    offset: Mutex<Duration>,
}

impl Default for ManualClock {
    fn default() -> Self {
        Self::new()
    }
}

impl ManualClock {
    pub fn new() -> Self {
        Self {
            base: Instant::now(),
            wall_base: Utc::now(),
            offset: Mutex::new(Duration::ZERO),
        }
    }

    /// Move both time sources forward by `delta`.
    pub fn advance(&self, delta: Duration) {
        *self.offset.lock().expect("clock poisoned") += delta;
    }

    /// Elapsed virtual time since construction.
    pub fn elapsed(&self) -> Duration {
        *self.offset.lock().expect("clock poisoned")
    }
}

impl Clock for ManualClock {
    fn now(&self) -> Instant {
        self.base + *self.offset.lock().expect("clock poisoned")
    }

    fn wall(&self) -> DateTime<Utc> {
        self.wall_base
            + chrono::Duration::from_std(*self.offset.lock().expect("clock poisoned"))
                .expect("offset in range")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn advance_moves_both_time_sources() {
        let clock = ManualClock::new();
        let t0 = clock.now();
        let w0 = clock.wall();

        clock.advance(Duration::from_secs(90));

        assert_eq!(clock.now().duration_since(t0), Duration::from_secs(90));
        assert_eq!((clock.wall() - w0).num_seconds(), 90);
    }

    #[test]
    fn time_is_frozen_without_advance() {
        let clock = ManualClock::new();
        let a = clock.now();
        let b = clock.now();
        assert_eq!(a, b);
    }
}
