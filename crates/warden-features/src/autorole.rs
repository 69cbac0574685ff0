// SPDX-FileCopyrightText: 2026 Warden Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Auto-role: join roles, button roles, and reaction roles.
//!
//! Join roles are granted on MemberJoin, with separate lists for humans and
//! bots. Button roles map an interaction custom id to a role and toggle it;
//! reaction roles map `(message, emoji)` to a role, granted on ReactionAdd
//! and revoked on ReactionRemove.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::debug;

use warden_core::event::Emoji;
use warden_core::traits::store::{get_record, put_record};
use warden_core::{
    Action, ActionEnvelope, Evaluation, Event, EventBody, EventKind, Feature, MessageId, RoleId,
    TenantId, UserId, WardenError,
};

use crate::FeatureContext;

pub const NAMESPACE: &str = "autorole.list";
pub const BUTTON_NAMESPACE: &str = "autorole.button_roles";
pub const REACTION_NAMESPACE: &str = "autorole.reaction_roles";

/// Join-role settings.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AutoRoleSettings {
    #[serde(default)]
    pub human_roles: Vec<RoleId>,
    #[serde(default)]
    pub bot_roles: Vec<RoleId>,
}

/// A button-role binding, stored under the interaction custom id.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ButtonRole {
    pub role: RoleId,
}

/// A reaction-role binding, stored under `"{message}:{emoji}"`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReactionRole {
    pub role: RoleId,
}

fn reaction_key(message: MessageId, emoji: &Emoji) -> String {
    match emoji.id {
        Some(id) => format!("{message}:id:{id}"),
        None => format!("{message}:u:{}", emoji.name),
    }
}

/// The auto-role evaluator.
pub struct AutoRole {
    ctx: FeatureContext,
}

impl AutoRole {
    pub fn new(ctx: FeatureContext) -> Self {
        Self { ctx }
    }

    /// Operator surface: bind a button custom id to a role.
    pub async fn bind_button(
        &self,
        tenant: TenantId,
        custom_id: &str,
        role: RoleId,
    ) -> Result<(), WardenError> {
        put_record(self.ctx.store.as_ref(), tenant, BUTTON_NAMESPACE, custom_id, &ButtonRole { role })
            .await
    }

    /// Operator surface: bind `(message, emoji)` to a role.
    pub async fn bind_reaction(
        &self,
        tenant: TenantId,
        message: MessageId,
        emoji: &Emoji,
        role: RoleId,
    ) -> Result<(), WardenError> {
        put_record(
            self.ctx.store.as_ref(),
            tenant,
            REACTION_NAMESPACE,
            &reaction_key(message, emoji),
            &ReactionRole { role },
        )
        .await
    }

    async fn on_join(
        &self,
        tenant: TenantId,
        user: UserId,
        is_bot: bool,
    ) -> Result<Vec<ActionEnvelope>, WardenError> {
        let Some(settings) = self
            .ctx
            .config
            .get::<AutoRoleSettings>(tenant, NAMESPACE)
            .await?
        else {
            return Ok(Vec::new());
        };
        let roles = if is_bot { settings.bot_roles } else { settings.human_roles };
        if roles.is_empty() {
            return Ok(Vec::new());
        }
        debug!(tenant = %tenant, user = %user, count = roles.len(), "granting join roles");
        Ok(vec![ActionEnvelope::new(
            tenant,
            Action::AddRoles { user, roles },
            "autorole: join roles",
            format!("autorole:join:{tenant}:{user}"),
        )])
    }

    async fn on_button(
        &self,
        tenant: TenantId,
        user: UserId,
        custom_id: &str,
    ) -> Result<Vec<ActionEnvelope>, WardenError> {
        let Some(binding): Option<ButtonRole> =
            get_record(self.ctx.store.as_ref(), tenant, BUTTON_NAMESPACE, custom_id).await?
        else {
            return Ok(Vec::new());
        };

        // Toggle: has the role -> remove, otherwise add.
        let has_role = self
            .ctx
            .directory
            .member(tenant, user)
            .await?
            .is_some_and(|m| m.has_role(binding.role));

        let (action, verb) = if has_role {
            (Action::RemoveRoles { user, roles: vec![binding.role] }, "remove")
        } else {
            (Action::AddRoles { user, roles: vec![binding.role] }, "add")
        };
        Ok(vec![ActionEnvelope::new(
            tenant,
            action,
            "autorole: button toggle",
            format!("autorole:button:{tenant}:{user}:{custom_id}:{verb}"),
        )])
    }

    async fn on_reaction(
        &self,
        tenant: TenantId,
        user: UserId,
        message: MessageId,
        emoji: &Emoji,
        added: bool,
    ) -> Result<Vec<ActionEnvelope>, WardenError> {
        let key = reaction_key(message, emoji);
        let Some(binding): Option<ReactionRole> =
            get_record(self.ctx.store.as_ref(), tenant, REACTION_NAMESPACE, &key).await?
        else {
            return Ok(Vec::new());
        };

        let (action, verb) = if added {
            (Action::AddRoles { user, roles: vec![binding.role] }, "add")
        } else {
            (Action::RemoveRoles { user, roles: vec![binding.role] }, "remove")
        };
        Ok(vec![ActionEnvelope::new(
            tenant,
            action,
            "autorole: reaction role",
            format!("autorole:reaction:{tenant}:{user}:{key}:{verb}"),
        )])
    }

    async fn run(&self, event: &Event) -> Result<Vec<ActionEnvelope>, WardenError> {
        match &event.body {
            EventBody::MemberJoin { user, is_bot, .. } => {
                self.on_join(event.tenant, *user, *is_bot).await
            }
            EventBody::Interaction { user, custom_id, .. } => {
                self.on_button(event.tenant, *user, custom_id).await
            }
            EventBody::ReactionAdd { user, message, emoji, .. } => {
                self.on_reaction(event.tenant, *user, *message, emoji, true).await
            }
            EventBody::ReactionRemove { user, message, emoji, .. } => {
                self.on_reaction(event.tenant, *user, *message, emoji, false).await
            }
            _ => Ok(Vec::new()),
        }
    }
}

#[async_trait]
impl Feature for AutoRole {
    fn name(&self) -> &'static str {
        "autorole"
    }

    fn subscriptions(&self) -> &'static [EventKind] {
        &[
            EventKind::MemberJoin,
            EventKind::Interaction,
            EventKind::ReactionAdd,
            EventKind::ReactionRemove,
        ]
    }

    async fn evaluate(&self, event: &Event) -> Evaluation {
        Evaluation::from_result(self.run(event).await)
    }
}
