// SPDX-FileCopyrightText: 2026 Warden Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Runtime for the Warden moderation engine.
//!
//! Everything between the gateway adapter and the features lives here:
//! the event dispatcher with per-tenant cooperative ordering, the timed task
//! scheduler, the sliding-window rate counters, and the outbound action
//! executor with its retry and idempotency machinery.

pub mod clock;
pub mod dispatcher;
pub mod executor;
pub mod rate_window;
pub mod scheduler;
pub mod shutdown;

pub use clock::SystemClock;
pub use dispatcher::{Dispatcher, DispatcherHandle};
pub use executor::{DeadLetter, Executor, ExecutorHandle};
pub use rate_window::{RateKey, RateWindow};
pub use scheduler::{Scheduler, SchedulerHandle, TaskSpec, TickSink};
