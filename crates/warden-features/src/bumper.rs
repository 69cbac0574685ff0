// SPDX-FileCopyrightText: 2026 Warden Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Bump reminder.
//!
//! Watches the designated channel for successful bump confirmations from the
//! monitored upstream bot. A confirmation records `last_bumped`, thanks the
//! bumper channel-side, unlocks the channel if autolock is on, and schedules
//! a persistent reminder at `last_bumped + interval`. When the reminder
//! fires, the reminder message is posted and the channel is re-locked.
//! Autoclean deletes unrelated chatter in the channel.

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use warden_core::action::{Permission, PermissionOverwrite};
use warden_core::traits::store::{get_record, put_record};
use warden_core::{
    Action, ActionEnvelope, ChannelId, Evaluation, Event, EventBody, EventKind, Feature, RoleId,
    TenantId, UserId, WardenError,
};
use warden_runtime::TaskSpec;

use crate::FeatureContext;

pub const NAMESPACE: &str = "bumper.state";
pub const LOG_NAMESPACE: &str = "bumper.log";
const STATE_KEY: &str = "state";
const REMIND_KIND: &str = "bumper.remind";

/// Per-tenant bump reminder settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BumperSettings {
    /// The channel bumps happen in.
    pub channel: ChannelId,

    /// The upstream bot whose confirmations we watch.
    pub bump_bot: UserId,

    /// Substring marking a successful bump confirmation.
    #[serde(default = "default_success_marker")]
    pub success_marker: String,

    #[serde(default = "default_interval_secs")]
    pub interval_secs: u64,

    #[serde(default = "default_reminder_message")]
    pub reminder_message: String,

    #[serde(default = "default_thank_you_message")]
    pub thank_you_message: String,

    /// Delete non-bump messages in the channel.
    #[serde(default)]
    pub autoclean: bool,

    /// Deny @everyone sending between the reminder and the next bump.
    #[serde(default)]
    pub autolock: bool,
}

fn default_success_marker() -> String {
    "Bump done".to_string()
}

fn default_interval_secs() -> u64 {
    7200
}

fn default_reminder_message() -> String {
    "Time to bump! Run /bump".to_string()
}

fn default_thank_you_message() -> String {
    "Thanks for the bump!".to_string()
}

/// Singleton runtime state.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BumperState {
    pub last_bumped: Option<DateTime<Utc>>,
    pub locked: bool,
}

/// Per-user bump stats.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BumpStats {
    pub bumps: u32,
    pub last_bump: Option<DateTime<Utc>>,
}

/// The @everyone role shares the tenant id upstream.
fn everyone_role(tenant: TenantId) -> RoleId {
    RoleId(tenant.0)
}

/// The bump reminder evaluator.
pub struct BumpReminder {
    ctx: FeatureContext,
}

impl BumpReminder {
    pub fn new(ctx: FeatureContext) -> Self {
        Self { ctx }
    }

    pub async fn state(&self, tenant: TenantId) -> Result<BumperState, WardenError> {
        Ok(get_record(self.ctx.store.as_ref(), tenant, NAMESPACE, STATE_KEY)
            .await?
            .unwrap_or_default())
    }

    pub async fn stats(&self, tenant: TenantId, user: UserId) -> Result<BumpStats, WardenError> {
        Ok(
            get_record(self.ctx.store.as_ref(), tenant, LOG_NAMESPACE, &user.to_string())
                .await?
                .unwrap_or_default(),
        )
    }

    fn lock_envelope(
        &self,
        tenant: TenantId,
        settings: &BumperSettings,
        deny: bool,
    ) -> ActionEnvelope {
        let overwrite = if deny {
            PermissionOverwrite::for_role(
                everyone_role(tenant),
                Vec::new(),
                vec![Permission::SendMessages],
            )
        } else {
            PermissionOverwrite::for_role(
                everyone_role(tenant),
                vec![Permission::SendMessages],
                Vec::new(),
            )
        };
        let verb = if deny { "lock" } else { "unlock" };
        ActionEnvelope::new(
            tenant,
            Action::SetChannelPermissions { channel: settings.channel, overwrite },
            format!("bumper: {verb} channel"),
            format!("bumper:{verb}:{tenant}:{}", settings.channel),
        )
    }

    async fn on_bump_confirmed(
        &self,
        tenant: TenantId,
        settings: &BumperSettings,
    ) -> Result<Vec<ActionEnvelope>, WardenError> {
        let now = self.ctx.clock.wall();
        put_record(
            self.ctx.store.as_ref(),
            tenant,
            NAMESPACE,
            STATE_KEY,
            &BumperState { last_bumped: Some(now), locked: false },
        )
        .await?;

        self.ctx
            .scheduler
            .after(
                Duration::from_secs(settings.interval_secs),
                TaskSpec::persistent(
                    tenant,
                    REMIND_KIND,
                    serde_json::json!({}),
                    format!("{REMIND_KIND}:{tenant}"),
                ),
            )
            .await?;

        info!(tenant = %tenant, "bump confirmed, reminder scheduled");

        let mut actions = vec![ActionEnvelope::new(
            tenant,
            Action::SendMessage {
                channel: settings.channel,
                content: settings.thank_you_message.clone(),
                embed: None,
                components: Vec::new(),
                ephemeral: false,
            },
            "bumper: thank you",
            format!("bumper:thanks:{tenant}:{}", now.timestamp()),
        )];
        if settings.autolock {
            actions.push(self.lock_envelope(tenant, settings, false));
        }
        Ok(actions)
    }

    async fn record_user_bump(&self, tenant: TenantId, user: UserId) -> Result<(), WardenError> {
        let mut stats = self.stats(tenant, user).await?;
        stats.bumps += 1;
        stats.last_bump = Some(self.ctx.clock.wall());
        put_record(self.ctx.store.as_ref(), tenant, LOG_NAMESPACE, &user.to_string(), &stats).await
    }

    async fn on_message(
        &self,
        tenant: TenantId,
        channel: ChannelId,
        message: warden_core::MessageId,
        author: UserId,
        content: &str,
        author_is_bot: bool,
    ) -> Result<Vec<ActionEnvelope>, WardenError> {
        let Some(settings) = self
            .ctx
            .config
            .get::<BumperSettings>(tenant, NAMESPACE)
            .await?
        else {
            return Ok(Vec::new());
        };
        if channel != settings.channel {
            return Ok(Vec::new());
        }

        // Confirmation from the monitored bot.
        if author == settings.bump_bot && content.contains(&settings.success_marker) {
            return self.on_bump_confirmed(tenant, &settings).await;
        }

        // A user's bump invocation: track stats, leave the message alone.
        let trimmed = content.trim();
        if trimmed.starts_with("/bump") || trimmed.starts_with("!d bump") {
            self.record_user_bump(tenant, author).await?;
            debug!(tenant = %tenant, user = %author, "user bump recorded");
            return Ok(Vec::new());
        }

        // Anything else in the channel is chatter; autoclean removes it.
        if settings.autoclean && !author_is_bot {
            return Ok(vec![ActionEnvelope::new(
                tenant,
                Action::DeleteMessage { channel, message },
                "bumper: autoclean",
                format!("bumper:clean:{tenant}:{message}"),
            )]);
        }
        Ok(Vec::new())
    }

    async fn on_remind(&self, tenant: TenantId) -> Result<Vec<ActionEnvelope>, WardenError> {
        let Some(settings) = self
            .ctx
            .config
            .get::<BumperSettings>(tenant, NAMESPACE)
            .await?
        else {
            return Ok(Vec::new());
        };

        let mut state = self.state(tenant).await?;
        let mut actions = vec![ActionEnvelope::new(
            tenant,
            Action::SendMessage {
                channel: settings.channel,
                content: settings.reminder_message.clone(),
                embed: None,
                components: Vec::new(),
                ephemeral: false,
            },
            "bumper: reminder",
            format!("bumper:remind:{tenant}:{}", self.ctx.clock.wall().timestamp()),
        )];

        if settings.autolock {
            actions.push(self.lock_envelope(tenant, &settings, true));
            state.locked = true;
            put_record(self.ctx.store.as_ref(), tenant, NAMESPACE, STATE_KEY, &state).await?;
        }
        Ok(actions)
    }

    async fn run(&self, event: &Event) -> Result<Vec<ActionEnvelope>, WardenError> {
        match &event.body {
            EventBody::MessageCreate {
                channel, message, author, content, author_is_bot, ..
            } => {
                self.on_message(event.tenant, *channel, *message, *author, content, *author_is_bot)
                    .await
            }
            EventBody::ScheduledTick { task } if task.kind == REMIND_KIND => {
                self.on_remind(event.tenant).await
            }
            _ => Ok(Vec::new()),
        }
    }
}

#[async_trait]
impl Feature for BumpReminder {
    fn name(&self) -> &'static str {
        "bumper"
    }

    fn subscriptions(&self) -> &'static [EventKind] {
        &[EventKind::MessageCreate, EventKind::ScheduledTick]
    }

    async fn evaluate(&self, event: &Event) -> Evaluation {
        Evaluation::from_result(self.run(event).await)
    }
}
