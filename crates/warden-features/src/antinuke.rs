// SPDX-FileCopyrightText: 2026 Warden Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Anti-nuke: detect and punish rapid destructive admin actions.
//!
//! Each monitored admin action attributed to an actor increments a sliding
//! window counter keyed `(tenant, actor, kind)`. Crossing the configured
//! threshold within the shared timeframe emits one punishment plus an alert
//! to the system channel. The punishment fires at the first event that
//! pushes the counter to threshold, never retroactively; a per-(tenant,
//! actor) ledger suppresses repeat punishments for five minutes.

use std::collections::{BTreeMap, HashMap};
use std::sync::Mutex;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};
use tracing::info;

use warden_core::{
    Action, ActionEnvelope, ChannelId, Evaluation, Event, EventBody, EventKind, Feature,
    SubjectId, TenantId, UserId, WardenError,
};
use warden_runtime::RateKey;

use crate::FeatureContext;

/// Settings namespace.
pub const NAMESPACE: &str = "antinuke.settings";

/// How long a punished actor is immune to a second punishment.
const PUNISH_IDEMPOTENCY: Duration = Duration::from_secs(300);

/// Monitored admin action kinds.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Display, EnumString, Serialize,
    Deserialize,
)]
#[strum(serialize_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum AdminActionKind {
    Kick,
    Ban,
    Channel,
    Role,
    Emoji,
    Webhook,
    BotAdd,
    Permissions,
}

/// What to do to an actor that trips a threshold.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Punishment {
    Ban,
    Kick,
    StripPrivilegedRoles,
}

/// Per-tenant anti-nuke settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AntiNukeSettings {
    /// Enabled modules with their per-kind thresholds.
    pub modules: BTreeMap<AdminActionKind, u32>,

    /// Shared sliding-window timeframe in seconds.
    #[serde(default = "default_timeframe_secs")]
    pub timeframe_secs: u64,

    /// Users never evaluated.
    #[serde(default)]
    pub whitelist_users: Vec<UserId>,

    /// Bot accounts never evaluated.
    #[serde(default)]
    pub whitelist_bots: Vec<UserId>,

    /// Operator-designated admins, exempt like the owner.
    #[serde(default)]
    pub admins: Vec<UserId>,

    /// Global punishment applied on threshold breach.
    pub punishment: Punishment,

    /// Permission names the permissions module watches for.
    #[serde(default)]
    pub monitored_permissions: Vec<String>,

    /// System channel receiving alert messages.
    #[serde(default)]
    pub alert_channel: Option<ChannelId>,
}

fn default_timeframe_secs() -> u64 {
    10
}

/// The anti-nuke evaluator.
pub struct AntiNuke {
    ctx: FeatureContext,
    /// `(tenant, actor)` -> punished-at. One representation only; the
    /// per-action variant from older systems is deliberately not kept.
    punished: Mutex<HashMap<(TenantId, UserId), Instant>>,
}

impl AntiNuke {
    pub fn new(ctx: FeatureContext) -> Self {
        Self { ctx, punished: Mutex::new(HashMap::new()) }
    }

    /// Classify an event into `(actor, kind)` if anti-nuke monitors it.
    fn classify(settings: &AntiNukeSettings, body: &EventBody) -> Option<(UserId, AdminActionKind)> {
        match body {
            EventBody::MemberBanned { actor, .. } => Some((*actor, AdminActionKind::Ban)),
            EventBody::MemberKicked { actor, .. } => Some((*actor, AdminActionKind::Kick)),
            EventBody::ChannelCreate { actor, .. }
            | EventBody::ChannelDelete { actor, .. }
            | EventBody::ChannelUpdate { actor, .. } => Some((*actor, AdminActionKind::Channel)),
            EventBody::RoleCreate { actor, .. } | EventBody::RoleDelete { actor, .. } => {
                Some((*actor, AdminActionKind::Role))
            }
            EventBody::RoleUpdate { actor, granted_monitored, .. } => {
                let watched = granted_monitored
                    .iter()
                    .any(|p| settings.monitored_permissions.contains(p));
                if watched {
                    Some((*actor, AdminActionKind::Permissions))
                } else {
                    Some((*actor, AdminActionKind::Role))
                }
            }
            EventBody::EmojiUpdate { actor, .. } => Some((*actor, AdminActionKind::Emoji)),
            EventBody::WebhookCreate { actor, .. } => Some((*actor, AdminActionKind::Webhook)),
            EventBody::BotAdded { actor, .. } => Some((*actor, AdminActionKind::BotAdd)),
            _ => None,
        }
    }

    async fn is_exempt(
        &self,
        settings: &AntiNukeSettings,
        tenant: TenantId,
        actor: UserId,
    ) -> Result<bool, WardenError> {
        if settings.whitelist_users.contains(&actor)
            || settings.whitelist_bots.contains(&actor)
            || settings.admins.contains(&actor)
        {
            return Ok(true);
        }
        self.ctx.directory.is_owner(tenant, actor).await
    }

    /// Whether the actor was punished within the idempotency window.
    /// Records the punishment when it was not.
    fn check_and_mark_punished(&self, tenant: TenantId, actor: UserId) -> bool {
        let now = self.ctx.clock.now();
        let mut punished = self.punished.lock().expect("antinuke ledger poisoned");
        punished.retain(|_, &mut at| now.duration_since(at) < PUNISH_IDEMPOTENCY);
        if punished.contains_key(&(tenant, actor)) {
            return true;
        }
        punished.insert((tenant, actor), now);
        false
    }

    async fn punishment_action(
        &self,
        settings: &AntiNukeSettings,
        tenant: TenantId,
        actor: UserId,
    ) -> Result<Action, WardenError> {
        Ok(match settings.punishment {
            Punishment::Ban => Action::BanMember { user: actor },
            Punishment::Kick => Action::KickMember { user: actor },
            Punishment::StripPrivilegedRoles => {
                let roles = self
                    .ctx
                    .directory
                    .member(tenant, actor)
                    .await?
                    .map(|m| m.roles)
                    .unwrap_or_default();
                Action::RemoveRoles { user: actor, roles }
            }
        })
    }

    async fn run(&self, event: &Event) -> Result<Vec<ActionEnvelope>, WardenError> {
        let tenant = event.tenant;
        let Some(settings) = self
            .ctx
            .config
            .get::<AntiNukeSettings>(tenant, NAMESPACE)
            .await?
        else {
            return Ok(Vec::new());
        };

        let Some((actor, kind)) = Self::classify(&settings, &event.body) else {
            return Ok(Vec::new());
        };
        let Some(&threshold) = settings.modules.get(&kind) else {
            return Ok(Vec::new());
        };
        if self.is_exempt(&settings, tenant, actor).await? {
            return Ok(Vec::new());
        }

        let window = Duration::from_secs(settings.timeframe_secs);
        let key = RateKey::new(tenant, SubjectId::User(actor), format!("antinuke:{kind}"));
        let count = self.ctx.rate.record(key, self.ctx.clock.now(), window);

        if (count as u32) < threshold {
            return Ok(Vec::new());
        }
        if self.check_and_mark_punished(tenant, actor) {
            return Ok(Vec::new());
        }

        info!(
            tenant = %tenant,
            actor = %actor,
            kind = %kind,
            count,
            threshold,
            "anti-nuke threshold breached"
        );

        let reason = format!("anti-nuke: {count} {kind} actions within {}s", settings.timeframe_secs);
        let mut actions = vec![ActionEnvelope::new(
            tenant,
            self.punishment_action(&settings, tenant, actor).await?,
            reason.clone(),
            format!("antinuke:punish:{tenant}:{actor}"),
        )];

        if let Some(alert_channel) = settings.alert_channel {
            actions.push(ActionEnvelope::new(
                tenant,
                Action::SendMessage {
                    channel: alert_channel,
                    content: format!("anti-nuke punished <@{actor}>: {reason}"),
                    embed: None,
                    components: Vec::new(),
                    ephemeral: false,
                },
                "anti-nuke alert",
                format!("antinuke:alert:{tenant}:{actor}"),
            ));
        }

        Ok(actions)
    }
}

#[async_trait]
impl Feature for AntiNuke {
    fn name(&self) -> &'static str {
        "antinuke"
    }

    fn subscriptions(&self) -> &'static [EventKind] {
        &[
            EventKind::MemberBanned,
            EventKind::MemberKicked,
            EventKind::ChannelCreate,
            EventKind::ChannelDelete,
            EventKind::ChannelUpdate,
            EventKind::RoleCreate,
            EventKind::RoleDelete,
            EventKind::RoleUpdate,
            EventKind::EmojiUpdate,
            EventKind::WebhookCreate,
            EventKind::BotAdded,
        ]
    }

    async fn evaluate(&self, event: &Event) -> Evaluation {
        Evaluation::from_result(self.run(event).await)
    }
}
