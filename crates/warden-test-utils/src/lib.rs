// SPDX-FileCopyrightText: 2026 Warden Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Test utilities for Warden integration tests.
//!
//! Provides a deterministic manual clock, a configurable mock gateway
//! (directory + recording sink), and a full-stack test harness over a temp
//! SQLite database.

pub mod harness;
pub mod manual_clock;
pub mod mock_gateway;

pub use harness::{HarnessCore, TestHarness, TestHarnessBuilder};
pub use manual_clock::ManualClock;
pub use mock_gateway::{MockDirectory, RecordingSink};
