// SPDX-FileCopyrightText: 2026 Warden Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Policy evaluators for the Warden moderation engine.
//!
//! Each feature is a value type constructed with the shared subsystem
//! handles in [`FeatureContext`] and registered with the dispatcher. All
//! per-tenant policy state lives in the Store; the only in-memory state a
//! feature may keep is bounded caches rebuilt from the event stream
//! (snipe buffers, the anti-nuke punishment ledger, compiled regexes).

use std::sync::Arc;

use warden_core::{Clock, GatewayDirectory, Store};
use warden_runtime::{RateWindow, SchedulerHandle};
use warden_storage::TenantConfigCache;

pub mod antinuke;
pub mod antiraid;
pub mod autorole;
pub mod board;
pub mod bumper;
pub mod feeds;
pub mod filters;
pub mod levels;
pub mod snipe;
pub mod tickets;

pub use antinuke::AntiNuke;
pub use antiraid::AntiRaid;
pub use autorole::AutoRole;
pub use board::Board;
pub use bumper::BumpReminder;
pub use feeds::Feeds;
pub use filters::Filters;
pub use levels::Levels;
pub use snipe::Snipe;
pub use tickets::Tickets;

/// Shared handles every feature receives at construction.
#[derive(Clone)]
pub struct FeatureContext {
    pub store: Arc<dyn Store>,
    pub config: Arc<TenantConfigCache>,
    pub scheduler: SchedulerHandle,
    pub rate: Arc<RateWindow>,
    pub clock: Arc<dyn Clock>,
    pub directory: Arc<dyn GatewayDirectory>,
}
