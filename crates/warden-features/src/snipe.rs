// SPDX-FileCopyrightText: 2026 Warden Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Snipe buffers: recently deleted/edited messages and removed reactions.
//!
//! Bounded ring buffers per `(tenant, channel)`, rebuilt empty on restart.
//! Retrieval is by 1-indexed recency (1 = most recent). A bulk purge
//! replaces the single retained purge batch for the channel.

use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use warden_core::event::{Attachment, Emoji};
use warden_core::{
    ChannelId, Evaluation, Event, EventBody, EventKind, Feature, MessageId, TenantId, UserId,
};

use crate::FeatureContext;

/// Entries retained per ring.
const CAPACITY: usize = 10;

/// A captured deleted message.
#[derive(Debug, Clone, PartialEq)]
pub struct SnipedMessage {
    pub author: Option<UserId>,
    pub content: String,
    pub attachments: Vec<Attachment>,
    pub captured_at: DateTime<Utc>,
}

/// A captured edit with before/after.
#[derive(Debug, Clone, PartialEq)]
pub struct SnipedEdit {
    pub author: UserId,
    pub before: Option<String>,
    pub after: String,
    pub captured_at: DateTime<Utc>,
}

/// A captured removed reaction.
#[derive(Debug, Clone, PartialEq)]
pub struct SnipedReaction {
    pub user: UserId,
    pub emoji: Emoji,
    pub message: MessageId,
    pub captured_at: DateTime<Utc>,
}

#[derive(Default)]
struct ChannelBuffers {
    deleted: VecDeque<SnipedMessage>,
    edited: VecDeque<SnipedEdit>,
    reactions: VecDeque<SnipedReaction>,
    /// One batch retained; replaced wholesale by the next purge.
    last_purge: Vec<SnipedMessage>,
}

fn push_bounded<T>(ring: &mut VecDeque<T>, item: T) {
    ring.push_back(item);
    while ring.len() > CAPACITY {
        ring.pop_front();
    }
}

/// 1-indexed recency lookup: index 1 is the newest entry.
fn nth_recent<T: Clone>(ring: &VecDeque<T>, index: usize) -> Option<T> {
    if index == 0 || index > ring.len() {
        return None;
    }
    ring.get(ring.len() - index).cloned()
}

/// The snipe evaluator.
pub struct Snipe {
    ctx: FeatureContext,
    buffers: Mutex<HashMap<(TenantId, ChannelId), ChannelBuffers>>,
}

impl Snipe {
    pub fn new(ctx: FeatureContext) -> Self {
        Self { ctx, buffers: Mutex::new(HashMap::new()) }
    }

    // --- Retrieval surface (1-indexed recency) ---

    pub fn deleted(&self, tenant: TenantId, channel: ChannelId, index: usize) -> Option<SnipedMessage> {
        let buffers = self.buffers.lock().expect("snipe poisoned");
        buffers.get(&(tenant, channel)).and_then(|b| nth_recent(&b.deleted, index))
    }

    pub fn edited(&self, tenant: TenantId, channel: ChannelId, index: usize) -> Option<SnipedEdit> {
        let buffers = self.buffers.lock().expect("snipe poisoned");
        buffers.get(&(tenant, channel)).and_then(|b| nth_recent(&b.edited, index))
    }

    pub fn removed_reaction(
        &self,
        tenant: TenantId,
        channel: ChannelId,
        index: usize,
    ) -> Option<SnipedReaction> {
        let buffers = self.buffers.lock().expect("snipe poisoned");
        buffers.get(&(tenant, channel)).and_then(|b| nth_recent(&b.reactions, index))
    }

    pub fn last_purge(&self, tenant: TenantId, channel: ChannelId) -> Vec<SnipedMessage> {
        let buffers = self.buffers.lock().expect("snipe poisoned");
        buffers.get(&(tenant, channel)).map(|b| b.last_purge.clone()).unwrap_or_default()
    }

    // --- Operator surface ---

    /// Drop every buffer for a channel.
    pub fn clear(&self, tenant: TenantId, channel: ChannelId) {
        self.buffers.lock().expect("snipe poisoned").remove(&(tenant, channel));
    }

    /// Remove a single deleted-message entry by 1-indexed recency.
    pub fn remove_deleted(&self, tenant: TenantId, channel: ChannelId, index: usize) -> bool {
        let mut buffers = self.buffers.lock().expect("snipe poisoned");
        let Some(b) = buffers.get_mut(&(tenant, channel)) else {
            return false;
        };
        if index == 0 || index > b.deleted.len() {
            return false;
        }
        let pos = b.deleted.len() - index;
        b.deleted.remove(pos).is_some()
    }
}

#[async_trait]
impl Feature for Snipe {
    fn name(&self) -> &'static str {
        "snipe"
    }

    fn subscriptions(&self) -> &'static [EventKind] {
        &[
            EventKind::MessageDelete,
            EventKind::MessageEdit,
            EventKind::MessageBulkDelete,
            EventKind::ReactionRemove,
        ]
    }

    async fn evaluate(&self, event: &Event) -> Evaluation {
        let captured_at = self.ctx.clock.wall();
        let mut buffers = self.buffers.lock().expect("snipe poisoned");
        match &event.body {
            EventBody::MessageDelete { channel, author, content, attachments, .. } => {
                let b = buffers.entry((event.tenant, *channel)).or_default();
                push_bounded(
                    &mut b.deleted,
                    SnipedMessage {
                        author: *author,
                        content: content.clone().unwrap_or_default(),
                        attachments: attachments.clone(),
                        captured_at,
                    },
                );
            }
            EventBody::MessageEdit { channel, author, before, after, .. } => {
                let b = buffers.entry((event.tenant, *channel)).or_default();
                push_bounded(
                    &mut b.edited,
                    SnipedEdit {
                        author: *author,
                        before: before.clone(),
                        after: after.clone(),
                        captured_at,
                    },
                );
            }
            EventBody::MessageBulkDelete { channel, messages } => {
                let b = buffers.entry((event.tenant, *channel)).or_default();
                b.last_purge = messages
                    .iter()
                    .map(|m| SnipedMessage {
                        author: Some(m.author),
                        content: m.content.clone(),
                        attachments: m.attachments.clone(),
                        captured_at,
                    })
                    .collect();
            }
            EventBody::ReactionRemove { channel, message, emoji, user } => {
                let b = buffers.entry((event.tenant, *channel)).or_default();
                push_bounded(
                    &mut b.reactions,
                    SnipedReaction {
                        user: *user,
                        emoji: emoji.clone(),
                        message: *message,
                        captured_at,
                    },
                );
            }
            _ => {}
        }
        Evaluation::empty()
    }
}
