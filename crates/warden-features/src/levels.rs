// SPDX-FileCopyrightText: 2026 Warden Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Levels: message experience, level-ups, and role rewards.
//!
//! Every 5th counted message awards `round(roll × rate_multiplier)` XP where
//! the roll is uniform in 15..=25. The level identity
//! `level = max(1, floor(sqrt(xp / 100)))` holds after every write,
//! including admin writes. Role rewards diff the target reward set against
//! the member's current roles; with stacking off only the single
//! highest-level reward applies.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rand::Rng;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use warden_core::traits::store::{get_record, put_record};
use warden_core::{
    Action, ActionEnvelope, ChannelId, Evaluation, Event, EventBody, EventKind, Feature, RoleId,
    TenantId, UserId, WardenError,
};

use crate::FeatureContext;

pub const NAMESPACE: &str = "levels.settings";
pub const PROGRESS_NAMESPACE: &str = "levels.user_progress";
pub const REWARDS_NAMESPACE: &str = "levels.role_rewards";
pub const IGNORES_NAMESPACE: &str = "levels.ignores";

/// XP curve divisor: `level = max(1, floor(sqrt(xp / 100)))`.
const XP_CURVE_DIVISOR: f64 = 100.0;

/// Messages between XP awards.
const MESSAGES_PER_AWARD: u32 = 5;

/// Where level-up announcements go.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AnnounceMode {
    Off,
    #[default]
    Channel,
    Dm,
}

/// Per-tenant leveling settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LevelsSettings {
    #[serde(default = "default_multiplier")]
    pub rate_multiplier: f64,

    #[serde(default)]
    pub announce: AnnounceMode,

    /// Template with `{user}`, `{level}`, `{username}`, `{server}`.
    #[serde(default = "default_template")]
    pub template: String,

    /// Whether reward roles accumulate or only the highest applies.
    #[serde(default = "default_stack_rewards")]
    pub stack_rewards: bool,
}

fn default_multiplier() -> f64 {
    1.0
}

fn default_template() -> String {
    "{user} reached level {level}!".to_string()
}

fn default_stack_rewards() -> bool {
    true
}

/// Channels and roles excluded from earning.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LevelIgnores {
    #[serde(default)]
    pub channels: Vec<ChannelId>,
    #[serde(default)]
    pub roles: Vec<RoleId>,
}

/// Per-user progress record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LevelProgress {
    pub level: u32,
    pub xp: u64,
    pub messages_since_last_award: u32,
    pub last_award_time: Option<DateTime<Utc>>,
    #[serde(default = "default_show_notifications")]
    pub show_notifications: bool,
}

fn default_show_notifications() -> bool {
    true
}

impl Default for LevelProgress {
    fn default() -> Self {
        Self {
            level: 1,
            xp: 0,
            messages_since_last_award: 0,
            last_award_time: None,
            show_notifications: true,
        }
    }
}

/// A role reward, stored under the required level as key.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RoleReward {
    pub role: RoleId,
}

/// The level identity. Holds after every write.
pub fn level_for_xp(xp: u64) -> u32 {
    let level = (xp as f64 / XP_CURVE_DIVISOR).sqrt().floor() as u32;
    level.max(1)
}

/// Source of XP rolls, injectable so tests can pin the value.
pub trait XpSource: Send + Sync {
    /// Uniform random in 15..=25.
    fn roll(&self) -> u32;
}

/// Production roll.
pub struct UniformXp;

impl XpSource for UniformXp {
    fn roll(&self) -> u32 {
        rand::thread_rng().gen_range(15..=25)
    }
}

/// The levels evaluator.
pub struct Levels {
    ctx: FeatureContext,
    xp: Box<dyn XpSource>,
}

impl Levels {
    pub fn new(ctx: FeatureContext) -> Self {
        Self { ctx, xp: Box::new(UniformXp) }
    }

    pub fn with_xp_source(ctx: FeatureContext, xp: Box<dyn XpSource>) -> Self {
        Self { ctx, xp }
    }

    // --- Admin surface ---

    pub async fn progress(
        &self,
        tenant: TenantId,
        user: UserId,
    ) -> Result<Option<LevelProgress>, WardenError> {
        get_record(self.ctx.store.as_ref(), tenant, PROGRESS_NAMESPACE, &user.to_string()).await
    }

    /// Set a user's XP directly; level is recomputed to keep the identity.
    pub async fn set_xp(&self, tenant: TenantId, user: UserId, xp: u64) -> Result<(), WardenError> {
        let mut progress = self.progress(tenant, user).await?.unwrap_or_default();
        progress.xp = xp;
        progress.level = level_for_xp(xp);
        self.write_progress(tenant, user, &progress).await
    }

    pub async fn remove_progress(&self, tenant: TenantId, user: UserId) -> Result<(), WardenError> {
        self.ctx.store.delete(tenant, PROGRESS_NAMESPACE, &user.to_string()).await
    }

    /// Delete every progress record for the tenant.
    pub async fn reset_all(&self, tenant: TenantId) -> Result<u64, WardenError> {
        self.ctx.store.delete_prefix(tenant, PROGRESS_NAMESPACE).await
    }

    /// Bind a reward role to a required level.
    pub async fn set_role_reward(
        &self,
        tenant: TenantId,
        level: u32,
        role: RoleId,
    ) -> Result<(), WardenError> {
        put_record(
            self.ctx.store.as_ref(),
            tenant,
            REWARDS_NAMESPACE,
            &format!("{level:06}"),
            &RoleReward { role },
        )
        .await
    }

    /// Recompute reward roles for a user and emit the diff.
    pub async fn sync_roles(
        &self,
        tenant: TenantId,
        user: UserId,
    ) -> Result<Vec<ActionEnvelope>, WardenError> {
        let Some(settings) = self.ctx.config.get::<LevelsSettings>(tenant, NAMESPACE).await? else {
            return Ok(Vec::new());
        };
        let Some(progress) = self.progress(tenant, user).await? else {
            return Ok(Vec::new());
        };
        self.reward_diff(tenant, user, progress.level, &settings).await
    }

    /// Prune progress records whose user is no longer a member.
    pub async fn cleanup_missing(&self, tenant: TenantId) -> Result<u64, WardenError> {
        let members = self.ctx.directory.member_ids(tenant).await?;
        let records = self.ctx.store.scan(tenant, PROGRESS_NAMESPACE).await?;
        let mut removed = 0;
        for (key, _) in records {
            let Ok(raw) = key.parse::<u64>() else { continue };
            if !members.contains(&UserId(raw)) {
                self.ctx.store.delete(tenant, PROGRESS_NAMESPACE, &key).await?;
                removed += 1;
            }
        }
        if removed > 0 {
            info!(tenant = %tenant, removed, "pruned level records of departed members");
        }
        Ok(removed)
    }

    // --- Internals ---

    async fn write_progress(
        &self,
        tenant: TenantId,
        user: UserId,
        progress: &LevelProgress,
    ) -> Result<(), WardenError> {
        debug_assert_eq!(progress.level, level_for_xp(progress.xp));
        put_record(self.ctx.store.as_ref(), tenant, PROGRESS_NAMESPACE, &user.to_string(), progress)
            .await
    }

    async fn reward_roles(&self, tenant: TenantId) -> Result<Vec<(u32, RoleId)>, WardenError> {
        let rows = self.ctx.store.scan(tenant, REWARDS_NAMESPACE).await?;
        let mut rewards = Vec::new();
        for (key, value) in rows {
            let Ok(level) = key.parse::<u32>() else { continue };
            let Ok(reward) = serde_json::from_str::<RoleReward>(&value) else { continue };
            rewards.push((level, reward.role));
        }
        Ok(rewards)
    }

    /// Compute add/remove actions to move the member's reward roles to the
    /// target set for `level`.
    async fn reward_diff(
        &self,
        tenant: TenantId,
        user: UserId,
        level: u32,
        settings: &LevelsSettings,
    ) -> Result<Vec<ActionEnvelope>, WardenError> {
        let rewards = self.reward_roles(tenant).await?;
        if rewards.is_empty() {
            return Ok(Vec::new());
        }
        let Some(member) = self.ctx.directory.member(tenant, user).await? else {
            return Ok(Vec::new());
        };

        let mut earned: Vec<(u32, RoleId)> =
            rewards.iter().copied().filter(|(required, _)| *required <= level).collect();
        if !settings.stack_rewards {
            // Only the highest-level earned reward applies.
            earned.sort_by_key(|(required, _)| *required);
            earned = earned.last().copied().into_iter().collect();
        }
        let target: Vec<RoleId> = earned.iter().map(|(_, role)| *role).collect();
        let all_reward_roles: Vec<RoleId> = rewards.iter().map(|(_, role)| *role).collect();

        let to_add: Vec<RoleId> =
            target.iter().copied().filter(|r| !member.has_role(*r)).collect();
        let to_remove: Vec<RoleId> = member
            .roles
            .iter()
            .copied()
            .filter(|r| all_reward_roles.contains(r) && !target.contains(r))
            .collect();

        let mut actions = Vec::new();
        if !to_add.is_empty() {
            actions.push(ActionEnvelope::new(
                tenant,
                Action::AddRoles { user, roles: to_add },
                format!("levels: rewards for level {level}"),
                format!("levels:reward_add:{tenant}:{user}:{level}"),
            ));
        }
        if !to_remove.is_empty() {
            actions.push(ActionEnvelope::new(
                tenant,
                Action::RemoveRoles { user, roles: to_remove },
                format!("levels: outgrown rewards below level {level}"),
                format!("levels:reward_remove:{tenant}:{user}:{level}"),
            ));
        }
        Ok(actions)
    }

    fn render_template(
        template: &str,
        user: UserId,
        username: &str,
        level: u32,
        server: &str,
    ) -> String {
        template
            .replace("{user}", &format!("<@{user}>"))
            .replace("{username}", username)
            .replace("{level}", &level.to_string())
            .replace("{server}", server)
    }

    async fn announce(
        &self,
        tenant: TenantId,
        user: UserId,
        channel: ChannelId,
        level: u32,
        settings: &LevelsSettings,
        progress: &LevelProgress,
    ) -> Result<Option<ActionEnvelope>, WardenError> {
        if settings.announce == AnnounceMode::Off || !progress.show_notifications {
            return Ok(None);
        }
        let username = self
            .ctx
            .directory
            .member(tenant, user)
            .await?
            .map(|m| m.username)
            .unwrap_or_else(|| user.to_string());
        let server = self.ctx.directory.tenant_name(tenant).await?;
        let content = Self::render_template(&settings.template, user, &username, level, &server);

        let action = match settings.announce {
            AnnounceMode::Channel => Action::SendMessage {
                channel,
                content,
                embed: None,
                components: Vec::new(),
                ephemeral: false,
            },
            AnnounceMode::Dm => Action::SendDirectMessage { user, content },
            AnnounceMode::Off => unreachable!(),
        };
        Ok(Some(ActionEnvelope::new(
            tenant,
            action,
            format!("levels: level {level} reached"),
            format!("levels:announce:{tenant}:{user}:{level}"),
        )))
    }

    async fn on_message(
        &self,
        tenant: TenantId,
        channel: ChannelId,
        author: UserId,
    ) -> Result<Vec<ActionEnvelope>, WardenError> {
        let Some(settings) = self.ctx.config.get::<LevelsSettings>(tenant, NAMESPACE).await? else {
            return Ok(Vec::new());
        };

        let ignores: LevelIgnores = self
            .ctx
            .config
            .get(tenant, IGNORES_NAMESPACE)
            .await?
            .unwrap_or_default();
        if ignores.channels.contains(&channel) {
            return Ok(Vec::new());
        }
        if !ignores.roles.is_empty()
            && let Some(member) = self.ctx.directory.member(tenant, author).await?
            && member.has_any_role(&ignores.roles)
        {
            return Ok(Vec::new());
        }

        let mut progress = self.progress(tenant, author).await?.unwrap_or_default();
        progress.messages_since_last_award += 1;

        if progress.messages_since_last_award < MESSAGES_PER_AWARD {
            self.write_progress(tenant, author, &progress).await?;
            return Ok(Vec::new());
        }

        // Award: every 5th counted message.
        let gained = (f64::from(self.xp.roll()) * settings.rate_multiplier).round() as u64;
        let old_level = progress.level;
        progress.xp += gained;
        progress.level = level_for_xp(progress.xp);
        progress.messages_since_last_award = 0;
        progress.last_award_time = Some(self.ctx.clock.wall());
        self.write_progress(tenant, author, &progress).await?;

        debug!(
            tenant = %tenant,
            user = %author,
            gained,
            xp = progress.xp,
            level = progress.level,
            "xp awarded"
        );

        if progress.level <= old_level {
            return Ok(Vec::new());
        }

        info!(tenant = %tenant, user = %author, level = progress.level, "level up");
        let mut actions = Vec::new();
        if let Some(announcement) = self
            .announce(tenant, author, channel, progress.level, &settings, &progress)
            .await?
        {
            actions.push(announcement);
        }
        actions.extend(self.reward_diff(tenant, author, progress.level, &settings).await?);
        Ok(actions)
    }

    async fn run(&self, event: &Event) -> Result<Vec<ActionEnvelope>, WardenError> {
        match &event.body {
            EventBody::MessageCreate { channel, author, author_is_bot: false, .. } => {
                self.on_message(event.tenant, *channel, *author).await
            }
            EventBody::MemberLeave { user } => {
                // Departed members keep their record until cleanup; nothing
                // to do inline. Kept explicit for the subscription list.
                debug!(tenant = %event.tenant, user = %user, "member left, record retained");
                Ok(Vec::new())
            }
            _ => Ok(Vec::new()),
        }
    }
}

#[async_trait]
impl Feature for Levels {
    fn name(&self) -> &'static str {
        "levels"
    }

    fn subscriptions(&self) -> &'static [EventKind] {
        &[EventKind::MessageCreate, EventKind::MemberLeave]
    }

    async fn evaluate(&self, event: &Event) -> Evaluation {
        Evaluation::from_result(self.run(event).await)
    }
}
