// SPDX-FileCopyrightText: 2026 Warden Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Write side of the gateway adapter.
//!
//! The executor is the only caller; it owns retry, backoff, and idempotency.
//! Implementations classify their failures into transient (retryable) and
//! permanent (dead-letter) so the executor never has to guess.

use async_trait::async_trait;
use thiserror::Error;

use crate::action::ActionEnvelope;
use crate::ids::{ChannelId, MessageId};

/// Failure classification reported by the sink.
#[derive(Debug, Error)]
pub enum SinkError {
    /// Timeout, 5xx, or rate-limit; the executor retries with backoff.
    #[error("transient sink failure: {detail}")]
    Transient {
        detail: String,
        /// Upstream-provided delay for rate-limit responses.
        retry_after: Option<std::time::Duration>,
    },

    /// Permission denied, not found, invalid input; dead-lettered.
    #[error("permanent sink failure: {detail}")]
    Permanent { detail: String },
}

/// Result of a successfully performed action.
///
/// Actions that create upstream objects report the new ids so the executor
/// can fulfil the envelope's [`Completion`](crate::action::Completion).
#[derive(Debug, Clone, Default)]
pub struct SinkOutcome {
    pub message_id: Option<MessageId>,
    pub channel_id: Option<ChannelId>,
}

/// Outbound action sink backed by the gateway client.
#[async_trait]
pub trait ActionSink: Send + Sync {
    async fn perform(&self, envelope: &ActionEnvelope) -> Result<SinkOutcome, SinkError>;
}
