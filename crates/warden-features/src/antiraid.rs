// SPDX-FileCopyrightText: 2026 Warden Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Anti-raid: mass-join lockdown and low-trust account filtering.
//!
//! Three submodules run on every join: the new-account filter, the
//! no-avatar filter, and the mass-join window. Crossing the join threshold
//! enters raid state, a persistent per-tenant flag that rejects all new
//! joins until it auto-clears 30 minutes later (extended by further joins)
//! or an operator clears it. A one-shot whitelist lets a specific user
//! through once; consumed on use.

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use warden_core::traits::store::{get_record, put_record};
use warden_core::{
    Action, ActionEnvelope, ChannelId, Evaluation, Event, EventBody, EventKind, Feature,
    SubjectId, TenantId, UserId, WardenError,
};
use warden_runtime::{RateKey, TaskSpec};

use crate::FeatureContext;

pub const NAMESPACE: &str = "antiraid.settings";
pub const STATE_NAMESPACE: &str = "antiraid.raid_state";
pub const WHITELIST_NAMESPACE: &str = "antiraid.whitelist";
const STATE_KEY: &str = "state";
const RELEASE_KIND: &str = "antiraid.release";

/// Raid state auto-clears this long after the last triggering join.
const RAID_DURATION: Duration = Duration::from_secs(30 * 60);

/// Action applied by the account filters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FilterAction {
    Kick,
    Ban,
    Timeout,
}

/// Per-tenant anti-raid settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AntiRaidSettings {
    /// Minimum account age in days; `None` disables the new-account filter.
    #[serde(default)]
    pub min_account_age_days: Option<u32>,

    #[serde(default = "default_filter_action")]
    pub new_account_action: FilterAction,

    /// Reject members without a custom avatar.
    #[serde(default)]
    pub require_avatar: bool,

    #[serde(default = "default_filter_action")]
    pub no_avatar_action: FilterAction,

    /// Joins within `join_window_secs` that trigger lockdown; `None`
    /// disables the mass-join module.
    #[serde(default)]
    pub join_threshold: Option<u32>,

    #[serde(default = "default_join_window_secs")]
    pub join_window_secs: u64,

    /// Minutes a timed-out account stays muted.
    #[serde(default = "default_timeout_minutes")]
    pub timeout_minutes: u32,

    #[serde(default)]
    pub alert_channel: Option<ChannelId>,
}

fn default_filter_action() -> FilterAction {
    FilterAction::Kick
}

fn default_join_window_secs() -> u64 {
    10
}

fn default_timeout_minutes() -> u32 {
    60
}

/// Persistent raid state.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RaidState {
    pub active: bool,
    pub since: DateTime<Utc>,
    pub reason: String,
}

/// A one-shot join whitelist entry.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct WhitelistEntry {
    added_at: DateTime<Utc>,
}

/// The anti-raid evaluator.
pub struct AntiRaid {
    ctx: FeatureContext,
}

impl AntiRaid {
    pub fn new(ctx: FeatureContext) -> Self {
        Self { ctx }
    }

    /// Operator surface: allow `user` to bypass raid state once.
    pub async fn add_join_whitelist(&self, tenant: TenantId, user: UserId) -> Result<(), WardenError> {
        put_record(
            self.ctx.store.as_ref(),
            tenant,
            WHITELIST_NAMESPACE,
            &user.to_string(),
            &WhitelistEntry { added_at: self.ctx.clock.wall() },
        )
        .await
    }

    /// Operator surface: clear raid state manually.
    pub async fn clear_raid_state(&self, tenant: TenantId) -> Result<(), WardenError> {
        self.deactivate(tenant).await
    }

    pub async fn raid_state(&self, tenant: TenantId) -> Result<Option<RaidState>, WardenError> {
        get_record(self.ctx.store.as_ref(), tenant, STATE_NAMESPACE, STATE_KEY).await
    }

    async fn deactivate(&self, tenant: TenantId) -> Result<(), WardenError> {
        if let Some(mut state) = self.raid_state(tenant).await? {
            state.active = false;
            put_record(self.ctx.store.as_ref(), tenant, STATE_NAMESPACE, STATE_KEY, &state).await?;
            info!(tenant = %tenant, "raid state cleared");
        }
        Ok(())
    }

    fn filter_envelope(
        &self,
        tenant: TenantId,
        user: UserId,
        action: FilterAction,
        timeout_minutes: u32,
        reason: String,
        key_prefix: &str,
    ) -> ActionEnvelope {
        let action = match action {
            FilterAction::Kick => Action::KickMember { user },
            FilterAction::Ban => Action::BanMember { user },
            FilterAction::Timeout => Action::TimeoutMember {
                user,
                until: self.ctx.clock.wall() + chrono::Duration::minutes(i64::from(timeout_minutes)),
            },
        };
        ActionEnvelope::new(tenant, action, reason, format!("{key_prefix}:{tenant}:{user}"))
    }

    /// Consume the one-shot whitelist entry for `user`, if present.
    async fn consume_whitelist(&self, tenant: TenantId, user: UserId) -> Result<bool, WardenError> {
        let key = user.to_string();
        let entry: Option<WhitelistEntry> =
            get_record(self.ctx.store.as_ref(), tenant, WHITELIST_NAMESPACE, &key).await?;
        if entry.is_some() {
            self.ctx.store.delete(tenant, WHITELIST_NAMESPACE, &key).await?;
            info!(tenant = %tenant, user = %user, "join whitelist consumed");
            return Ok(true);
        }
        Ok(false)
    }

    async fn schedule_release(&self, tenant: TenantId) -> Result<(), WardenError> {
        // Re-scheduling the same persist key pushes the release out, so
        // further joins extend the lockdown.
        self.ctx
            .scheduler
            .after(
                RAID_DURATION,
                TaskSpec::persistent(
                    tenant,
                    RELEASE_KIND,
                    serde_json::json!({}),
                    format!("{RELEASE_KIND}:{tenant}"),
                ),
            )
            .await?;
        Ok(())
    }

    async fn on_join(
        &self,
        tenant: TenantId,
        user: UserId,
        account_created_at: DateTime<Utc>,
        has_avatar: bool,
        is_bot: bool,
    ) -> Result<Vec<ActionEnvelope>, WardenError> {
        let Some(settings) = self
            .ctx
            .config
            .get::<AntiRaidSettings>(tenant, NAMESPACE)
            .await?
        else {
            return Ok(Vec::new());
        };

        // Active raid state rejects every join except a one-shot whitelist.
        if self.raid_state(tenant).await?.is_some_and(|s| s.active) {
            if self.consume_whitelist(tenant, user).await? {
                return Ok(Vec::new());
            }
            self.schedule_release(tenant).await?;
            return Ok(vec![ActionEnvelope::new(
                tenant,
                Action::KickMember { user },
                "anti-raid: raid state active",
                format!("antiraid:raid_kick:{tenant}:{user}"),
            )]);
        }

        // New-account filter.
        if let Some(min_days) = settings.min_account_age_days {
            let age = self.ctx.clock.wall() - account_created_at;
            if age < chrono::Duration::days(i64::from(min_days)) {
                return Ok(vec![self.filter_envelope(
                    tenant,
                    user,
                    settings.new_account_action,
                    settings.timeout_minutes,
                    format!("anti-raid: account younger than {min_days} days"),
                    "antiraid:new_account",
                )]);
            }
        }

        // No-avatar filter. Bots are excluded; many legitimate bots ship
        // without an avatar.
        if settings.require_avatar && !has_avatar && !is_bot {
            return Ok(vec![self.filter_envelope(
                tenant,
                user,
                settings.no_avatar_action,
                settings.timeout_minutes,
                "anti-raid: no custom avatar".to_string(),
                "antiraid:no_avatar",
            )]);
        }

        // Mass-join window.
        if let Some(threshold) = settings.join_threshold {
            let window = Duration::from_secs(settings.join_window_secs);
            let key = RateKey::new(tenant, SubjectId::Tenant, "antiraid:join");
            let count = self.ctx.rate.record(key, self.ctx.clock.now(), window);
            if count as u32 >= threshold {
                let reason = format!(
                    "{count} joins within {}s crossed threshold {threshold}",
                    settings.join_window_secs
                );
                warn!(tenant = %tenant, reason = %reason, "entering raid state");
                put_record(
                    self.ctx.store.as_ref(),
                    tenant,
                    STATE_NAMESPACE,
                    STATE_KEY,
                    &RaidState { active: true, since: self.ctx.clock.wall(), reason: reason.clone() },
                )
                .await?;
                self.schedule_release(tenant).await?;

                let mut actions = Vec::new();
                if let Some(alert_channel) = settings.alert_channel {
                    actions.push(ActionEnvelope::new(
                        tenant,
                        Action::SendMessage {
                            channel: alert_channel,
                            content: format!("raid lockdown engaged: {reason}"),
                            embed: None,
                            components: Vec::new(),
                            ephemeral: false,
                        },
                        "anti-raid lockdown alert",
                        format!("antiraid:alert:{tenant}"),
                    ));
                }
                return Ok(actions);
            }
        }

        Ok(Vec::new())
    }

    async fn run(&self, event: &Event) -> Result<Vec<ActionEnvelope>, WardenError> {
        match &event.body {
            EventBody::MemberJoin { user, account_created_at, has_avatar, is_bot } => {
                self.on_join(event.tenant, *user, *account_created_at, *has_avatar, *is_bot)
                    .await
            }
            EventBody::ScheduledTick { task } if task.kind == RELEASE_KIND => {
                self.deactivate(event.tenant).await?;
                Ok(Vec::new())
            }
            _ => Ok(Vec::new()),
        }
    }
}

#[async_trait]
impl Feature for AntiRaid {
    fn name(&self) -> &'static str {
        "antiraid"
    }

    fn subscriptions(&self) -> &'static [EventKind] {
        &[EventKind::MemberJoin, EventKind::ScheduledTick]
    }

    async fn evaluate(&self, event: &Event) -> Evaluation {
        Evaluation::from_result(self.run(event).await)
    }
}
