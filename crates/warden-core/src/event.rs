// SPDX-FileCopyrightText: 2026 Warden Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Normalized inbound events.
//!
//! The gateway adapter translates its wire protocol into this model before
//! anything in the core sees it. Events carry everything a policy evaluator
//! needs at decision time; lookups that require upstream state (member roles,
//! reaction counts) go through the `GatewayDirectory` trait instead.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};

use crate::ids::{ChannelId, EmojiId, MessageId, RoleId, TenantId, UserId};

/// An emoji reference, either a tenant-registered custom emoji (with id) or
/// a plain unicode emoji (name only).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Emoji {
    pub id: Option<EmojiId>,
    pub name: String,
}

impl Emoji {
    /// Unicode emoji with no custom id.
    pub fn unicode(name: impl Into<String>) -> Self {
        Self { id: None, name: name.into() }
    }

    /// Tenant-registered custom emoji.
    pub fn custom(id: EmojiId, name: impl Into<String>) -> Self {
        Self { id: Some(id), name: name.into() }
    }

    /// Canonical equality: custom emoji compare by id when both sides carry
    /// one, unicode emoji compare by exact string. A custom emoji never
    /// matches a unicode emoji even if the names collide.
    pub fn matches(&self, other: &Emoji) -> bool {
        match (self.id, other.id) {
            (Some(a), Some(b)) => a == b,
            (None, None) => self.name == other.name,
            _ => false,
        }
    }
}

impl std::fmt::Display for Emoji {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self.id {
            Some(id) => write!(f, "{}:{}", self.name, id),
            None => write!(f, "{}", self.name),
        }
    }
}

/// A message attachment as observed on the wire.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Attachment {
    pub filename: String,
    pub url: String,
}

/// A deleted message captured in a bulk-delete batch.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeletedMessage {
    pub message: MessageId,
    pub author: UserId,
    pub content: String,
    pub attachments: Vec<Attachment>,
}

/// Interaction component kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display, EnumString, Serialize, Deserialize)]
#[strum(serialize_all = "snake_case")]
pub enum InteractionKind {
    Button,
    Select,
}

/// Identifier of a scheduled task, unique within a process lifetime.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TaskId(pub u64);

impl std::fmt::Display for TaskId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "task-{}", self.0)
    }
}

/// A fired scheduled task, delivered to features as a synthetic event.
///
/// Carries both the configured due time and the actual fire time so callbacks
/// can observe scheduler lag.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskFire {
    pub id: TaskId,
    /// Feature-defined task kind, e.g. `"antiraid.release"`.
    pub kind: String,
    pub payload: serde_json::Value,
    pub due: DateTime<Utc>,
    pub fired: DateTime<Utc>,
}

/// Discriminant of an event body, used for feature subscriptions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display, EnumString, Serialize, Deserialize)]
#[strum(serialize_all = "snake_case")]
pub enum EventKind {
    MessageCreate,
    MessageEdit,
    MessageDelete,
    MessageBulkDelete,
    ReactionAdd,
    ReactionRemove,
    MemberJoin,
    MemberLeave,
    MemberUpdate,
    MemberBanned,
    MemberKicked,
    BotAdded,
    ChannelCreate,
    ChannelDelete,
    ChannelUpdate,
    RoleCreate,
    RoleDelete,
    RoleUpdate,
    EmojiUpdate,
    WebhookCreate,
    Interaction,
    FeedItemObserved,
    ScheduledTick,
}

/// Back-pressure class of an event. Message-class events may be dropped
/// under inbox overflow; admin-class events block instead.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventClass {
    Message,
    Admin,
}

/// The body of a normalized event.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum EventBody {
    MessageCreate {
        channel: ChannelId,
        message: MessageId,
        author: UserId,
        content: String,
        attachments: Vec<Attachment>,
        mentions: Vec<UserId>,
        author_is_bot: bool,
    },
    MessageEdit {
        channel: ChannelId,
        message: MessageId,
        author: UserId,
        before: Option<String>,
        after: String,
    },
    MessageDelete {
        channel: ChannelId,
        message: MessageId,
        author: Option<UserId>,
        content: Option<String>,
        attachments: Vec<Attachment>,
    },
    MessageBulkDelete {
        channel: ChannelId,
        messages: Vec<DeletedMessage>,
    },
    ReactionAdd {
        channel: ChannelId,
        message: MessageId,
        emoji: Emoji,
        user: UserId,
    },
    ReactionRemove {
        channel: ChannelId,
        message: MessageId,
        emoji: Emoji,
        user: UserId,
    },
    MemberJoin {
        user: UserId,
        account_created_at: DateTime<Utc>,
        has_avatar: bool,
        is_bot: bool,
    },
    MemberLeave {
        user: UserId,
    },
    MemberUpdate {
        user: UserId,
        added_roles: Vec<RoleId>,
        removed_roles: Vec<RoleId>,
        timed_out: bool,
        actor: Option<UserId>,
    },
    /// A ban attributed to an actor (from the upstream audit feed).
    MemberBanned {
        target: UserId,
        actor: UserId,
    },
    /// A kick attributed to an actor (from the upstream audit feed).
    MemberKicked {
        target: UserId,
        actor: UserId,
    },
    /// A bot account added to the tenant by an actor.
    BotAdded {
        bot: UserId,
        actor: UserId,
    },
    ChannelCreate {
        channel: ChannelId,
        actor: UserId,
    },
    ChannelDelete {
        channel: ChannelId,
        actor: UserId,
    },
    ChannelUpdate {
        channel: ChannelId,
        actor: UserId,
    },
    RoleCreate {
        role: RoleId,
        actor: UserId,
    },
    RoleDelete {
        role: RoleId,
        actor: UserId,
    },
    RoleUpdate {
        role: RoleId,
        actor: UserId,
        /// Permission bits granted in this update that appear on the
        /// monitored-permissions list (resolved by the gateway adapter).
        granted_monitored: Vec<String>,
    },
    EmojiUpdate {
        added: Vec<EmojiId>,
        removed: Vec<EmojiId>,
        actor: UserId,
    },
    WebhookCreate {
        channel: ChannelId,
        actor: UserId,
    },
    Interaction {
        kind: InteractionKind,
        user: UserId,
        channel: ChannelId,
        message: Option<MessageId>,
        custom_id: String,
        values: Vec<String>,
    },
    /// A new item surfaced by an external feed poller.
    FeedItemObserved {
        feed_id: String,
        title: String,
        url: String,
    },
    ScheduledTick {
        task: TaskFire,
    },
}

impl EventBody {
    pub fn kind(&self) -> EventKind {
        match self {
            EventBody::MessageCreate { .. } => EventKind::MessageCreate,
            EventBody::MessageEdit { .. } => EventKind::MessageEdit,
            EventBody::MessageDelete { .. } => EventKind::MessageDelete,
            EventBody::MessageBulkDelete { .. } => EventKind::MessageBulkDelete,
            EventBody::ReactionAdd { .. } => EventKind::ReactionAdd,
            EventBody::ReactionRemove { .. } => EventKind::ReactionRemove,
            EventBody::MemberJoin { .. } => EventKind::MemberJoin,
            EventBody::MemberLeave { .. } => EventKind::MemberLeave,
            EventBody::MemberUpdate { .. } => EventKind::MemberUpdate,
            EventBody::MemberBanned { .. } => EventKind::MemberBanned,
            EventBody::MemberKicked { .. } => EventKind::MemberKicked,
            EventBody::BotAdded { .. } => EventKind::BotAdded,
            EventBody::ChannelCreate { .. } => EventKind::ChannelCreate,
            EventBody::ChannelDelete { .. } => EventKind::ChannelDelete,
            EventBody::ChannelUpdate { .. } => EventKind::ChannelUpdate,
            EventBody::RoleCreate { .. } => EventKind::RoleCreate,
            EventBody::RoleDelete { .. } => EventKind::RoleDelete,
            EventBody::RoleUpdate { .. } => EventKind::RoleUpdate,
            EventBody::EmojiUpdate { .. } => EventKind::EmojiUpdate,
            EventBody::WebhookCreate { .. } => EventKind::WebhookCreate,
            EventBody::Interaction { .. } => EventKind::Interaction,
            EventBody::FeedItemObserved { .. } => EventKind::FeedItemObserved,
            EventBody::ScheduledTick { .. } => EventKind::ScheduledTick,
        }
    }
}

impl EventKind {
    /// Back-pressure class for inbox overflow handling.
    pub fn class(&self) -> EventClass {
        match self {
            EventKind::MessageCreate
            | EventKind::MessageEdit
            | EventKind::MessageDelete
            | EventKind::MessageBulkDelete
            | EventKind::ReactionAdd
            | EventKind::ReactionRemove
            | EventKind::FeedItemObserved => EventClass::Message,
            _ => EventClass::Admin,
        }
    }
}

/// A normalized inbound event, scoped to a tenant.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Event {
    pub tenant: TenantId,
    pub body: EventBody,
}

impl Event {
    pub fn new(tenant: TenantId, body: EventBody) -> Self {
        Self { tenant, body }
    }

    pub fn kind(&self) -> EventKind {
        self.body.kind()
    }

    pub fn class(&self) -> EventClass {
        self.kind().class()
    }
}
