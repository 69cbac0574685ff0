// SPDX-FileCopyrightText: 2026 Warden Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Mock gateway: a configurable directory plus a recording action sink.
//!
//! `MockDirectory` answers the read-side lookups features perform;
//! `RecordingSink` captures every envelope the executor delivers and can be
//! scripted to fail specific idempotency keys transiently or permanently.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::Notify;

use warden_core::event::Emoji;
use warden_core::traits::gateway::{HistoryLine, Member, MessageMeta};
use warden_core::{
    Action, ActionEnvelope, ActionSink, ChannelId, GatewayDirectory, MessageId, SinkError,
    SinkOutcome, TenantId, UserId, WardenError,
};

fn emoji_key(emoji: &Emoji) -> String {
    match emoji.id {
        Some(id) => format!("id:{id}"),
        None => format!("u:{}", emoji.name),
    }
}

#[derive(Default)]
struct DirectoryState {
    members: HashMap<(TenantId, UserId), Member>,
    owners: HashSet<(TenantId, UserId)>,
    messages: HashMap<(TenantId, ChannelId, MessageId), MessageMeta>,
    reactions: HashMap<(TenantId, ChannelId, MessageId, String), HashSet<UserId>>,
    history: HashMap<(TenantId, ChannelId), Vec<HistoryLine>>,
    tenant_names: HashMap<TenantId, String>,
}

/// In-memory gateway directory for tests.
#[derive(Default)]
pub struct MockDirectory {
    state: Mutex<DirectoryState>,
}

impl MockDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_member(&self, tenant: TenantId, member: Member) {
        let mut state = self.state.lock().unwrap();
        state.members.insert((tenant, member.user), member);
    }

    /// Convenience: a plain human member with no roles.
    pub fn add_simple_member(&self, tenant: TenantId, user: UserId, username: &str) {
        self.add_member(
            tenant,
            Member {
                user,
                username: username.to_string(),
                roles: Vec::new(),
                is_bot: false,
                joined_at: Utc::now(),
                account_created_at: Utc::now() - chrono::Duration::days(400),
                has_avatar: true,
            },
        );
    }

    pub fn remove_member(&self, tenant: TenantId, user: UserId) {
        self.state.lock().unwrap().members.remove(&(tenant, user));
    }

    pub fn set_owner(&self, tenant: TenantId, user: UserId) {
        self.state.lock().unwrap().owners.insert((tenant, user));
    }

    pub fn set_tenant_name(&self, tenant: TenantId, name: &str) {
        self.state.lock().unwrap().tenant_names.insert(tenant, name.to_string());
    }

    pub fn add_message(&self, tenant: TenantId, meta: MessageMeta) {
        let mut state = self.state.lock().unwrap();
        state.messages.insert((tenant, meta.channel, meta.message), meta);
    }

    pub fn remove_message(&self, tenant: TenantId, channel: ChannelId, message: MessageId) {
        self.state.lock().unwrap().messages.remove(&(tenant, channel, message));
    }

    /// Register a reaction, mirroring what the gateway cache would hold.
    pub fn react(
        &self,
        tenant: TenantId,
        channel: ChannelId,
        message: MessageId,
        emoji: &Emoji,
        user: UserId,
    ) {
        let mut state = self.state.lock().unwrap();
        state
            .reactions
            .entry((tenant, channel, message, emoji_key(emoji)))
            .or_default()
            .insert(user);
    }

    pub fn unreact(
        &self,
        tenant: TenantId,
        channel: ChannelId,
        message: MessageId,
        emoji: &Emoji,
        user: UserId,
    ) {
        let mut state = self.state.lock().unwrap();
        if let Some(users) = state
            .reactions
            .get_mut(&(tenant, channel, message, emoji_key(emoji)))
        {
            users.remove(&user);
        }
    }

    pub fn set_history(&self, tenant: TenantId, channel: ChannelId, lines: Vec<HistoryLine>) {
        self.state.lock().unwrap().history.insert((tenant, channel), lines);
    }
}

#[async_trait]
impl GatewayDirectory for MockDirectory {
    async fn member(&self, tenant: TenantId, user: UserId) -> Result<Option<Member>, WardenError> {
        Ok(self.state.lock().unwrap().members.get(&(tenant, user)).cloned())
    }

    async fn is_owner(&self, tenant: TenantId, user: UserId) -> Result<bool, WardenError> {
        Ok(self.state.lock().unwrap().owners.contains(&(tenant, user)))
    }

    async fn tenant_name(&self, tenant: TenantId) -> Result<String, WardenError> {
        Ok(self
            .state
            .lock()
            .unwrap()
            .tenant_names
            .get(&tenant)
            .cloned()
            .unwrap_or_else(|| format!("tenant-{tenant}")))
    }

    async fn message(
        &self,
        tenant: TenantId,
        channel: ChannelId,
        message: MessageId,
    ) -> Result<Option<MessageMeta>, WardenError> {
        Ok(self
            .state
            .lock()
            .unwrap()
            .messages
            .get(&(tenant, channel, message))
            .cloned())
    }

    async fn reaction_count(
        &self,
        tenant: TenantId,
        channel: ChannelId,
        message: MessageId,
        emoji: &Emoji,
    ) -> Result<u32, WardenError> {
        Ok(self
            .state
            .lock()
            .unwrap()
            .reactions
            .get(&(tenant, channel, message, emoji_key(emoji)))
            .map(|users| users.len() as u32)
            .unwrap_or(0))
    }

    async fn has_reacted(
        &self,
        tenant: TenantId,
        channel: ChannelId,
        message: MessageId,
        emoji: &Emoji,
        user: UserId,
    ) -> Result<bool, WardenError> {
        Ok(self
            .state
            .lock()
            .unwrap()
            .reactions
            .get(&(tenant, channel, message, emoji_key(emoji)))
            .is_some_and(|users| users.contains(&user)))
    }

    async fn channel_history(
        &self,
        tenant: TenantId,
        channel: ChannelId,
        limit: u32,
    ) -> Result<Vec<HistoryLine>, WardenError> {
        let state = self.state.lock().unwrap();
        let lines = state.history.get(&(tenant, channel)).cloned().unwrap_or_default();
        Ok(lines.into_iter().take(limit as usize).collect())
    }

    async fn member_ids(&self, tenant: TenantId) -> Result<Vec<UserId>, WardenError> {
        let state = self.state.lock().unwrap();
        let mut ids: Vec<UserId> = state
            .members
            .keys()
            .filter(|(t, _)| *t == tenant)
            .map(|(_, u)| *u)
            .collect();
        ids.sort();
        Ok(ids)
    }
}

enum ScriptedFailure {
    Transient { remaining: u32 },
    Permanent,
}

/// Records everything the executor performs; always succeeds unless a key
/// has a scripted failure. Creating actions report synthetic ids.
pub struct RecordingSink {
    performed: Mutex<Vec<ActionEnvelope>>,
    failures: Mutex<HashMap<String, ScriptedFailure>>,
    next_message_id: AtomicU64,
    next_channel_id: AtomicU64,
    notify: Notify,
}

impl Default for RecordingSink {
    fn default() -> Self {
        Self {
            performed: Mutex::new(Vec::new()),
            failures: Mutex::new(HashMap::new()),
            next_message_id: AtomicU64::new(9_000_000),
            next_channel_id: AtomicU64::new(5_000_000),
            notify: Notify::new(),
        }
    }
}

impl RecordingSink {
    pub fn new() -> Self {
        Self::default()
    }

    /// All envelopes delivered so far, in delivery order.
    pub fn performed(&self) -> Vec<ActionEnvelope> {
        self.performed.lock().unwrap().clone()
    }

    /// Envelopes whose action matches a predicate.
    pub fn performed_where(&self, f: impl Fn(&Action) -> bool) -> Vec<ActionEnvelope> {
        self.performed.lock().unwrap().iter().filter(|e| f(&e.action)).cloned().collect()
    }

    pub fn clear(&self) {
        self.performed.lock().unwrap().clear();
    }

    /// Fail the next `times` deliveries of `key` transiently.
    pub fn fail_transient(&self, key: &str, times: u32) {
        self.failures
            .lock()
            .unwrap()
            .insert(key.to_string(), ScriptedFailure::Transient { remaining: times });
    }

    /// Fail every delivery of `key` permanently.
    pub fn fail_permanent(&self, key: &str) {
        self.failures
            .lock()
            .unwrap()
            .insert(key.to_string(), ScriptedFailure::Permanent);
    }

    /// Wait until at least `n` envelopes were performed.
    pub async fn wait_for(&self, n: usize) {
        loop {
            let notified = self.notify.notified();
            if self.performed.lock().unwrap().len() >= n {
                return;
            }
            notified.await;
        }
    }
}

#[async_trait]
impl ActionSink for RecordingSink {
    async fn perform(&self, envelope: &ActionEnvelope) -> Result<SinkOutcome, SinkError> {
        {
            let mut failures = self.failures.lock().unwrap();
            match failures.get_mut(&envelope.idempotency_key) {
                Some(ScriptedFailure::Transient { remaining }) if *remaining > 0 => {
                    *remaining -= 1;
                    return Err(SinkError::Transient { detail: "scripted 503".into(), retry_after: None });
                }
                Some(ScriptedFailure::Permanent) => {
                    return Err(SinkError::Permanent { detail: "scripted permission denial".into() });
                }
                _ => {}
            }
        }

        let outcome = match &envelope.action {
            Action::SendMessage { .. } | Action::SendDirectMessage { .. } => SinkOutcome {
                message_id: Some(MessageId(self.next_message_id.fetch_add(1, Ordering::SeqCst))),
                channel_id: None,
            },
            Action::CreateChannel { .. } => SinkOutcome {
                message_id: None,
                channel_id: Some(ChannelId(self.next_channel_id.fetch_add(1, Ordering::SeqCst))),
            },
            _ => SinkOutcome::default(),
        };

        self.performed.lock().unwrap().push(envelope.clone());
        self.notify.notify_waiters();
        Ok(outcome)
    }
}
