// SPDX-FileCopyrightText: 2026 Warden Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Core library for the Warden moderation engine.
//!
//! This crate provides the foundational trait definitions, error types, and
//! the normalized event/action model used throughout the Warden workspace.
//! The runtime, storage, and feature crates all build on what is defined here.

pub mod action;
pub mod error;
pub mod event;
pub mod ids;
pub mod traits;

// Re-export key items at crate root for ergonomic imports.
pub use action::{Action, ActionEnvelope, Completion, Embed, EndpointClass, Permission};
pub use error::WardenError;
pub use event::{Event, EventBody, EventClass, EventKind, TaskFire, TaskId};
pub use ids::{ChannelId, EmojiId, MessageId, MessageRef, RoleId, SubjectId, TenantId, UserId};

// Re-export the trait seams at crate root.
pub use traits::{
    ActionSink, Clock, Evaluation, Feature, GatewayDirectory, SinkError, SinkOutcome, Store,
};
