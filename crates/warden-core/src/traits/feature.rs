// SPDX-FileCopyrightText: 2026 Warden Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! The policy-evaluator trait.
//!
//! A feature subscribes to event kinds and evaluates one event at a time.
//! Evaluators must be CPU-bounded: the only I/O they may perform is Store
//! access and scheduler registration. Outbound effects are returned as
//! action envelopes, never performed inline.

use async_trait::async_trait;

use crate::action::ActionEnvelope;
use crate::error::WardenError;
use crate::event::{Event, EventKind};

/// The result of evaluating one event.
///
/// A feature can produce actions *and* fail partway; the dispatcher forwards
/// whatever actions were emitted and logs the error. Feature errors are
/// localized -- other features still run for the same event.
#[derive(Debug, Default)]
pub struct Evaluation {
    pub actions: Vec<ActionEnvelope>,
    pub error: Option<WardenError>,
}

impl Evaluation {
    /// No actions, no error.
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn actions(actions: Vec<ActionEnvelope>) -> Self {
        Self { actions, error: None }
    }

    pub fn failed(error: WardenError) -> Self {
        Self { actions: Vec::new(), error: Some(error) }
    }

    pub fn partial(actions: Vec<ActionEnvelope>, error: WardenError) -> Self {
        Self { actions, error: Some(error) }
    }

    /// Convenience: treat ConfigAbsent as a clean no-op, surface the rest.
    pub fn from_result(result: Result<Vec<ActionEnvelope>, WardenError>) -> Self {
        match result {
            Ok(actions) => Self::actions(actions),
            Err(WardenError::ConfigAbsent { .. }) => Self::empty(),
            Err(e) => Self::failed(e),
        }
    }
}

/// A policy evaluator registered with the dispatcher.
#[async_trait]
pub trait Feature: Send + Sync {
    /// Stable feature name for logs and config namespaces.
    fn name(&self) -> &'static str;

    /// Event kinds this feature wants to see.
    fn subscriptions(&self) -> &'static [EventKind];

    /// Evaluate one event. Runs inside the tenant's worker; must not block
    /// on outbound I/O.
    async fn evaluate(&self, event: &Event) -> Evaluation;
}
