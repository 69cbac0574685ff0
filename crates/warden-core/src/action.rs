// SPDX-FileCopyrightText: 2026 Warden Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Outbound actions and their envelopes.
//!
//! Features emit [`ActionEnvelope`]s; the executor owns them from submission
//! until terminal success or dead-letter. Envelopes carry a stable
//! idempotency key so replaying an event never produces a second external
//! effect within the dedup TTL.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};
use uuid::Uuid;

use crate::event::Emoji;
use crate::ids::{ChannelId, MessageId, RoleId, TenantId, UserId};

/// Channel permission bits the core manipulates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display, EnumString, Serialize, Deserialize)]
#[strum(serialize_all = "snake_case")]
pub enum Permission {
    ViewChannel,
    SendMessages,
    ManageMessages,
    AddReactions,
    AttachFiles,
}

/// A permission overwrite applied to a role or user on a channel.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PermissionOverwrite {
    pub role: Option<RoleId>,
    pub user: Option<UserId>,
    pub allow: Vec<Permission>,
    pub deny: Vec<Permission>,
}

impl PermissionOverwrite {
    pub fn for_role(role: RoleId, allow: Vec<Permission>, deny: Vec<Permission>) -> Self {
        Self { role: Some(role), user: None, allow, deny }
    }

    pub fn for_user(user: UserId, allow: Vec<Permission>, deny: Vec<Permission>) -> Self {
        Self { role: None, user: Some(user), allow, deny }
    }
}

/// A rendered embed attached to an outbound message.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Embed {
    pub title: Option<String>,
    pub description: Option<String>,
    pub color: Option<u32>,
    pub footer: Option<String>,
    pub timestamp: Option<DateTime<Utc>>,
    pub image_url: Option<String>,
    pub jump_link: Option<String>,
}

/// An interactive component attached to an outbound message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Component {
    pub custom_id: String,
    pub label: String,
}

/// An outbound action a feature asks the gateway to perform.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum Action {
    BanMember {
        user: UserId,
    },
    KickMember {
        user: UserId,
    },
    TimeoutMember {
        user: UserId,
        until: DateTime<Utc>,
    },
    AddRoles {
        user: UserId,
        roles: Vec<RoleId>,
    },
    RemoveRoles {
        user: UserId,
        roles: Vec<RoleId>,
    },
    DeleteMessage {
        channel: ChannelId,
        message: MessageId,
    },
    DeleteBulk {
        channel: ChannelId,
        messages: Vec<MessageId>,
    },
    SendMessage {
        channel: ChannelId,
        content: String,
        embed: Option<Embed>,
        components: Vec<Component>,
        ephemeral: bool,
    },
    SendDirectMessage {
        user: UserId,
        content: String,
    },
    EditMessage {
        channel: ChannelId,
        message: MessageId,
        content: Option<String>,
        embed: Option<Embed>,
    },
    ClearReaction {
        channel: ChannelId,
        message: MessageId,
        emoji: Emoji,
    },
    SetChannelPermissions {
        channel: ChannelId,
        overwrite: PermissionOverwrite,
    },
    CreateChannel {
        name: String,
        category: Option<ChannelId>,
        overwrites: Vec<PermissionOverwrite>,
    },
    DeleteChannel {
        channel: ChannelId,
    },
    RenameChannel {
        channel: ChannelId,
        name: String,
    },
    PinMessage {
        channel: ChannelId,
        message: MessageId,
    },
    UnpinMessage {
        channel: ChannelId,
        message: MessageId,
    },
    FetchHistory {
        channel: ChannelId,
        limit: u32,
        before: Option<MessageId>,
    },
}

/// Upstream rate-limit route class. The executor serializes envelopes within
/// each `(tenant, endpoint_class)` lane.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display, EnumString, Serialize, Deserialize)]
#[strum(serialize_all = "snake_case")]
pub enum EndpointClass {
    Moderation,
    Roles,
    Messages,
    Channels,
    History,
}

impl Action {
    pub fn endpoint_class(&self) -> EndpointClass {
        match self {
            Action::BanMember { .. }
            | Action::KickMember { .. }
            | Action::TimeoutMember { .. } => EndpointClass::Moderation,
            Action::AddRoles { .. } | Action::RemoveRoles { .. } => EndpointClass::Roles,
            Action::DeleteMessage { .. }
            | Action::DeleteBulk { .. }
            | Action::SendMessage { .. }
            | Action::SendDirectMessage { .. }
            | Action::EditMessage { .. }
            | Action::ClearReaction { .. }
            | Action::PinMessage { .. }
            | Action::UnpinMessage { .. } => EndpointClass::Messages,
            Action::SetChannelPermissions { .. }
            | Action::CreateChannel { .. }
            | Action::DeleteChannel { .. }
            | Action::RenameChannel { .. } => EndpointClass::Channels,
            Action::FetchHistory { .. } => EndpointClass::History,
        }
    }

    /// Short kind label for logs and idempotency keys.
    pub fn kind_label(&self) -> &'static str {
        match self {
            Action::BanMember { .. } => "ban_member",
            Action::KickMember { .. } => "kick_member",
            Action::TimeoutMember { .. } => "timeout_member",
            Action::AddRoles { .. } => "add_roles",
            Action::RemoveRoles { .. } => "remove_roles",
            Action::DeleteMessage { .. } => "delete_message",
            Action::DeleteBulk { .. } => "delete_bulk",
            Action::SendMessage { .. } => "send_message",
            Action::SendDirectMessage { .. } => "send_direct_message",
            Action::EditMessage { .. } => "edit_message",
            Action::ClearReaction { .. } => "clear_reaction",
            Action::SetChannelPermissions { .. } => "set_channel_permissions",
            Action::CreateChannel { .. } => "create_channel",
            Action::DeleteChannel { .. } => "delete_channel",
            Action::RenameChannel { .. } => "rename_channel",
            Action::PinMessage { .. } => "pin_message",
            Action::UnpinMessage { .. } => "unpin_message",
            Action::FetchHistory { .. } => "fetch_history",
        }
    }
}

/// Where to write the upstream ids produced by a successful action.
///
/// Some actions create upstream objects whose ids a feature must persist
/// (the board message backing a board entry, the channel backing a ticket).
/// Features cannot block on outbound I/O, so the executor performs the write:
/// on success it merges the returned ids into the named Store record.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Completion {
    pub namespace: String,
    pub key: String,
    /// JSON field receiving the created message id, if any.
    pub message_field: Option<String>,
    /// JSON field receiving the created channel id, if any.
    pub channel_field: Option<String>,
}

/// An outbound action plus the metadata the executor needs to deliver it
/// at-most-once.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ActionEnvelope {
    pub id: Uuid,
    pub tenant: TenantId,
    pub action: Action,
    pub reason: String,
    pub idempotency_key: String,
    pub attempt: u32,
    pub created_at: DateTime<Utc>,
    pub completion: Option<Completion>,
}

impl ActionEnvelope {
    pub fn new(
        tenant: TenantId,
        action: Action,
        reason: impl Into<String>,
        idempotency_key: impl Into<String>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            tenant,
            action,
            reason: reason.into(),
            idempotency_key: idempotency_key.into(),
            attempt: 0,
            created_at: Utc::now(),
            completion: None,
        }
    }

    pub fn with_completion(mut self, completion: Completion) -> Self {
        self.completion = Some(completion);
        self
    }

    pub fn endpoint_class(&self) -> EndpointClass {
        self.action.endpoint_class()
    }
}
