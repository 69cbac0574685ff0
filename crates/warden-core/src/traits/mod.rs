// SPDX-FileCopyrightText: 2026 Warden Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Trait definitions for the seams between the core and its collaborators.

pub mod clock;
pub mod feature;
pub mod gateway;
pub mod sink;
pub mod store;

pub use clock::Clock;
pub use feature::{Evaluation, Feature};
pub use gateway::{GatewayDirectory, HistoryLine, Member, MessageMeta};
pub use sink::{ActionSink, SinkError, SinkOutcome};
pub use store::{get_record, put_record, Store};
