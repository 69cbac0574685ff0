// SPDX-FileCopyrightText: 2026 Warden Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Read side of the gateway adapter.
//!
//! Features resolve upstream state (member roles, message authorship,
//! reaction counts) through this trait. Implementations answer from the
//! gateway's local cache; entries older than an hour are refetched, so
//! lookups are bounded and cheap enough to call from evaluators.

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::error::WardenError;
use crate::event::{Attachment, Emoji};
use crate::ids::{ChannelId, MessageId, RoleId, TenantId, UserId};

/// A tenant member as known to the gateway.
#[derive(Debug, Clone)]
pub struct Member {
    pub user: UserId,
    pub username: String,
    /// Role set ordered by hierarchy rank, highest first.
    pub roles: Vec<RoleId>,
    pub is_bot: bool,
    pub joined_at: DateTime<Utc>,
    pub account_created_at: DateTime<Utc>,
    pub has_avatar: bool,
}

impl Member {
    pub fn has_role(&self, role: RoleId) -> bool {
        self.roles.contains(&role)
    }

    pub fn has_any_role(&self, roles: &[RoleId]) -> bool {
        self.roles.iter().any(|r| roles.contains(r))
    }
}

/// Metadata of a message resolved from the gateway cache.
#[derive(Debug, Clone)]
pub struct MessageMeta {
    pub channel: ChannelId,
    pub message: MessageId,
    pub author: UserId,
    pub author_is_bot: bool,
    pub content: String,
    pub attachments: Vec<Attachment>,
    pub pinned: bool,
}

/// One line of channel history for transcript rendering.
#[derive(Debug, Clone)]
pub struct HistoryLine {
    pub at: DateTime<Utc>,
    pub author: UserId,
    pub author_name: String,
    pub content: String,
    pub attachment_filenames: Vec<String>,
    pub embed_titles: Vec<String>,
}

/// Read-only view of upstream gateway state.
#[async_trait]
pub trait GatewayDirectory: Send + Sync {
    /// Resolve a tenant member. `None` when the user is not (or no longer)
    /// a member.
    async fn member(&self, tenant: TenantId, user: UserId) -> Result<Option<Member>, WardenError>;

    /// Whether the user owns the tenant.
    async fn is_owner(&self, tenant: TenantId, user: UserId) -> Result<bool, WardenError>;

    /// Display name of the tenant, for message templates.
    async fn tenant_name(&self, tenant: TenantId) -> Result<String, WardenError>;

    /// Resolve a message. `None` when it is unknown or already deleted.
    async fn message(
        &self,
        tenant: TenantId,
        channel: ChannelId,
        message: MessageId,
    ) -> Result<Option<MessageMeta>, WardenError>;

    /// Current raw reaction count for an emoji on a message.
    async fn reaction_count(
        &self,
        tenant: TenantId,
        channel: ChannelId,
        message: MessageId,
        emoji: &Emoji,
    ) -> Result<u32, WardenError>;

    /// Whether a specific user currently has the emoji reaction on a message.
    async fn has_reacted(
        &self,
        tenant: TenantId,
        channel: ChannelId,
        message: MessageId,
        emoji: &Emoji,
        user: UserId,
    ) -> Result<bool, WardenError>;

    /// Channel history, oldest first, capped at `limit` lines.
    async fn channel_history(
        &self,
        tenant: TenantId,
        channel: ChannelId,
        limit: u32,
    ) -> Result<Vec<HistoryLine>, WardenError>;

    /// All current member ids of a tenant.
    async fn member_ids(&self, tenant: TenantId) -> Result<Vec<UserId>, WardenError>;
}
