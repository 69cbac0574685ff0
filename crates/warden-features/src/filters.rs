// SPDX-FileCopyrightText: 2026 Warden Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Message filters.
//!
//! Each channel carries a set of enabled filter kinds; inbound messages from
//! non-exempt authors are checked against them in a fixed order. The first
//! matching kind deletes the message and posts a short-lived warning, removed
//! five seconds later by a scheduled task. Word matching is whole-word and
//! case-folded; regex patterns are compiled once per tenant and recompiled
//! only when the pattern list changes. Patterns that fail to compile are
//! skipped and logged.

use std::collections::BTreeSet;
use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use regex::Regex;
use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};
use tracing::{debug, warn};

use warden_core::event::Attachment;
use warden_core::traits::store::get_record;
use warden_core::{
    Action, ActionEnvelope, ChannelId, Completion, Evaluation, Event, EventBody, EventKind,
    Feature, MessageId, RoleId, SubjectId, TenantId, UserId, WardenError,
};
use warden_runtime::{RateKey, TaskSpec};

use crate::FeatureContext;

pub const NAMESPACE: &str = "filters.config";
pub const WARNINGS_NAMESPACE: &str = "filters.warnings";
const CLEANUP_KIND: &str = "filters.cleanup";

/// How long a warning message stays up.
const WARNING_TTL: Duration = Duration::from_secs(5);

/// The filter kinds, evaluated in this order.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Display, EnumString, Serialize,
    Deserialize,
)]
#[strum(serialize_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum FilterKind {
    Invites,
    Links,
    Caps,
    Spam,
    MassMention,
    EmojiCount,
    Spoilers,
    MusicFiles,
    Words,
    Regex,
}

/// Tenant-wide filter settings; per-channel kind sets live in separate
/// records keyed by channel id.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FiltersSettings {
    #[serde(default)]
    pub exempt_roles: Vec<RoleId>,
    #[serde(default)]
    pub exempt_users: Vec<UserId>,

    /// Whole-word, case-folded blocklist.
    #[serde(default)]
    pub words: Vec<String>,

    /// Regex blocklist; invalid patterns are skipped at compile time.
    #[serde(default)]
    pub patterns: Vec<String>,

    #[serde(default = "default_mass_mention_limit")]
    pub mass_mention_limit: usize,

    #[serde(default = "default_emoji_limit")]
    pub emoji_limit: usize,

    #[serde(default = "default_caps_min_len")]
    pub caps_min_len: usize,

    /// Uppercase ratio above which a message counts as shouting.
    #[serde(default = "default_caps_ratio")]
    pub caps_ratio: f64,

    #[serde(default = "default_spam_threshold")]
    pub spam_threshold: u32,

    #[serde(default = "default_spam_window_secs")]
    pub spam_window_secs: u64,
}

impl Default for FiltersSettings {
    fn default() -> Self {
        Self {
            exempt_roles: Vec::new(),
            exempt_users: Vec::new(),
            words: Vec::new(),
            patterns: Vec::new(),
            mass_mention_limit: default_mass_mention_limit(),
            emoji_limit: default_emoji_limit(),
            caps_min_len: default_caps_min_len(),
            caps_ratio: default_caps_ratio(),
            spam_threshold: default_spam_threshold(),
            spam_window_secs: default_spam_window_secs(),
        }
    }
}

fn default_mass_mention_limit() -> usize {
    5
}

fn default_emoji_limit() -> usize {
    10
}

fn default_caps_min_len() -> usize {
    10
}

fn default_caps_ratio() -> f64 {
    0.7
}

fn default_spam_threshold() -> u32 {
    5
}

fn default_spam_window_secs() -> u64 {
    5
}

/// Per-channel enabled kinds, stored under the channel id.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ChannelFilters {
    pub kinds: BTreeSet<FilterKind>,
}

struct CompiledPatterns {
    source: Vec<String>,
    compiled: Vec<Regex>,
}

/// The filters evaluator.
pub struct Filters {
    ctx: FeatureContext,
    /// Per-tenant compiled regex cache, invalidated when the pattern list
    /// changes.
    regexes: Mutex<HashMap<TenantId, CompiledPatterns>>,
}

impl Filters {
    pub fn new(ctx: FeatureContext) -> Self {
        Self { ctx, regexes: Mutex::new(HashMap::new()) }
    }

    /// Operator surface: set the enabled kinds for a channel.
    pub async fn set_channel_filters(
        &self,
        tenant: TenantId,
        channel: ChannelId,
        kinds: BTreeSet<FilterKind>,
    ) -> Result<(), WardenError> {
        warden_core::traits::store::put_record(
            self.ctx.store.as_ref(),
            tenant,
            NAMESPACE,
            &channel.to_string(),
            &ChannelFilters { kinds },
        )
        .await
    }

    fn with_compiled<R>(
        &self,
        tenant: TenantId,
        patterns: &[String],
        f: impl FnOnce(&[Regex]) -> R,
    ) -> R {
        let mut cache = self.regexes.lock().expect("filters cache poisoned");
        let entry = cache.get(&tenant);
        let stale = entry.is_none_or(|c| c.source != patterns);
        if stale {
            let compiled = patterns
                .iter()
                .filter_map(|p| match Regex::new(p) {
                    Ok(regex) => Some(regex),
                    Err(e) => {
                        warn!(tenant = %tenant, pattern = %p, error = %e, "skipping invalid filter pattern");
                        None
                    }
                })
                .collect();
            cache.insert(tenant, CompiledPatterns { source: patterns.to_vec(), compiled });
        }
        f(&cache.get(&tenant).expect("just inserted").compiled)
    }

    fn matches_invites(content: &str) -> bool {
        let lower = content.to_lowercase();
        lower.contains("discord.gg/") || lower.contains("discord.com/invite/")
    }

    fn matches_links(content: &str) -> bool {
        let lower = content.to_lowercase();
        lower.contains("http://") || lower.contains("https://") || lower.contains("www.")
    }

    fn matches_caps(content: &str, min_len: usize, ratio: f64) -> bool {
        let letters: Vec<char> = content.chars().filter(|c| c.is_alphabetic()).collect();
        if letters.len() < min_len {
            return false;
        }
        let upper = letters.iter().filter(|c| c.is_uppercase()).count();
        (upper as f64) / (letters.len() as f64) > ratio
    }

    fn matches_mass_mention(mentions: usize, limit: usize) -> bool {
        mentions >= limit
    }

    fn count_emoji(content: &str) -> usize {
        // Custom emoji use the <:name:id> / <a:name:id> wire form; unicode
        // emoji live in the pictographic planes.
        let custom = content.matches("<:").count() + content.matches("<a:").count();
        let unicode = content
            .chars()
            .filter(|&c| {
                let cp = c as u32;
                (0x1F300..=0x1FAFF).contains(&cp) || (0x2600..=0x27BF).contains(&cp)
            })
            .count();
        custom + unicode
    }

    fn matches_spoilers(content: &str) -> bool {
        content.matches("||").count() >= 2
    }

    fn matches_music_files(attachments: &[Attachment]) -> bool {
        const EXTENSIONS: &[&str] = &[".mp3", ".wav", ".flac", ".ogg", ".m4a"];
        attachments.iter().any(|a| {
            let lower = a.filename.to_lowercase();
            EXTENSIONS.iter().any(|ext| lower.ends_with(ext))
        })
    }

    fn matches_words(content: &str, words: &[String]) -> bool {
        if words.is_empty() {
            return false;
        }
        let folded: Vec<String> = content
            .split(|c: char| !c.is_alphanumeric())
            .filter(|w| !w.is_empty())
            .map(|w| w.to_lowercase())
            .collect();
        words.iter().any(|blocked| {
            let blocked = blocked.to_lowercase();
            folded.iter().any(|w| *w == blocked)
        })
    }

    /// First matching kind, or `None`.
    fn first_match(
        &self,
        tenant: TenantId,
        settings: &FiltersSettings,
        kinds: &BTreeSet<FilterKind>,
        channel: ChannelId,
        author: UserId,
        content: &str,
        attachments: &[Attachment],
        mentions: usize,
    ) -> Option<FilterKind> {
        for kind in kinds {
            let hit = match kind {
                FilterKind::Invites => Self::matches_invites(content),
                FilterKind::Links => Self::matches_links(content),
                FilterKind::Caps => {
                    Self::matches_caps(content, settings.caps_min_len, settings.caps_ratio)
                }
                FilterKind::Spam => {
                    let key = RateKey::new(
                        tenant,
                        SubjectId::User(author),
                        format!("filters:spam:{channel}"),
                    );
                    let window = Duration::from_secs(settings.spam_window_secs);
                    let count = self.ctx.rate.record(key, self.ctx.clock.now(), window);
                    count as u32 >= settings.spam_threshold
                }
                FilterKind::MassMention => {
                    Self::matches_mass_mention(mentions, settings.mass_mention_limit)
                }
                FilterKind::EmojiCount => Self::count_emoji(content) >= settings.emoji_limit,
                FilterKind::Spoilers => Self::matches_spoilers(content),
                FilterKind::MusicFiles => Self::matches_music_files(attachments),
                FilterKind::Words => Self::matches_words(content, &settings.words),
                FilterKind::Regex => self.with_compiled(tenant, &settings.patterns, |compiled| {
                    compiled.iter().any(|r| r.is_match(content))
                }),
            };
            if hit {
                return Some(*kind);
            }
        }
        None
    }

    async fn is_exempt(
        &self,
        settings: &FiltersSettings,
        tenant: TenantId,
        author: UserId,
    ) -> Result<bool, WardenError> {
        if settings.exempt_users.contains(&author) {
            return Ok(true);
        }
        if !settings.exempt_roles.is_empty()
            && let Some(member) = self.ctx.directory.member(tenant, author).await?
            && member.has_any_role(&settings.exempt_roles)
        {
            return Ok(true);
        }
        Ok(false)
    }

    async fn on_message(
        &self,
        tenant: TenantId,
        channel: ChannelId,
        message: MessageId,
        author: UserId,
        content: &str,
        attachments: &[Attachment],
        mentions: usize,
    ) -> Result<Vec<ActionEnvelope>, WardenError> {
        let Some(settings) = self
            .ctx
            .config
            .get::<FiltersSettings>(tenant, NAMESPACE)
            .await?
        else {
            return Ok(Vec::new());
        };
        let channel_filters: Option<ChannelFilters> =
            get_record(self.ctx.store.as_ref(), tenant, NAMESPACE, &channel.to_string()).await?;
        let Some(channel_filters) = channel_filters else {
            return Ok(Vec::new());
        };
        if channel_filters.kinds.is_empty() || self.is_exempt(&settings, tenant, author).await? {
            return Ok(Vec::new());
        }

        let Some(kind) = self.first_match(
            tenant,
            &settings,
            &channel_filters.kinds,
            channel,
            author,
            content,
            attachments,
            mentions,
        ) else {
            return Ok(Vec::new());
        };

        debug!(tenant = %tenant, channel = %channel, author = %author, kind = %kind, "filter hit");

        // Warning record + scheduled cleanup. The executor back-fills the
        // warning's message id; the cleanup tick deletes it.
        let warning_key = format!("{tenant}:{channel}:{message}");
        self.ctx
            .scheduler
            .after(
                WARNING_TTL,
                TaskSpec::ephemeral(
                    tenant,
                    CLEANUP_KIND,
                    serde_json::json!({ "key": warning_key, "channel": channel.0 }),
                ),
            )
            .await?;

        Ok(vec![
            ActionEnvelope::new(
                tenant,
                Action::DeleteMessage { channel, message },
                format!("filters: {kind}"),
                format!("filters:delete:{tenant}:{channel}:{message}"),
            ),
            ActionEnvelope::new(
                tenant,
                Action::SendMessage {
                    channel,
                    content: format!("<@{author}> message removed ({kind})"),
                    embed: None,
                    components: Vec::new(),
                    ephemeral: false,
                },
                format!("filters: {kind} warning"),
                format!("filters:warn:{tenant}:{channel}:{message}"),
            )
            .with_completion(Completion {
                namespace: WARNINGS_NAMESPACE.to_string(),
                key: warning_key,
                message_field: Some("message_id".to_string()),
                channel_field: None,
            }),
        ])
    }

    async fn on_cleanup(
        &self,
        tenant: TenantId,
        payload: &serde_json::Value,
    ) -> Result<Vec<ActionEnvelope>, WardenError> {
        let Some(key) = payload.get("key").and_then(|v| v.as_str()) else {
            return Ok(Vec::new());
        };
        let Some(channel) = payload.get("channel").and_then(|v| v.as_u64()).map(ChannelId) else {
            return Ok(Vec::new());
        };
        let record: Option<serde_json::Value> =
            get_record(self.ctx.store.as_ref(), tenant, WARNINGS_NAMESPACE, key).await?;
        self.ctx.store.delete(tenant, WARNINGS_NAMESPACE, key).await?;

        let Some(message) = record
            .as_ref()
            .and_then(|r| r.get("message_id"))
            .and_then(|v| v.as_u64())
            .map(MessageId)
        else {
            return Ok(Vec::new());
        };
        Ok(vec![ActionEnvelope::new(
            tenant,
            Action::DeleteMessage { channel, message },
            "filters: warning expired",
            format!("filters:cleanup:{tenant}:{key}"),
        )])
    }

    async fn run(&self, event: &Event) -> Result<Vec<ActionEnvelope>, WardenError> {
        match &event.body {
            EventBody::MessageCreate {
                channel,
                message,
                author,
                content,
                attachments,
                mentions,
                author_is_bot: false,
            } => {
                self.on_message(
                    event.tenant,
                    *channel,
                    *message,
                    *author,
                    content,
                    attachments,
                    mentions.len(),
                )
                .await
            }
            EventBody::ScheduledTick { task } if task.kind == CLEANUP_KIND => {
                self.on_cleanup(event.tenant, &task.payload).await
            }
            _ => Ok(Vec::new()),
        }
    }
}

#[async_trait]
impl Feature for Filters {
    fn name(&self) -> &'static str {
        "filters"
    }

    fn subscriptions(&self) -> &'static [EventKind] {
        &[EventKind::MessageCreate, EventKind::ScheduledTick]
    }

    async fn evaluate(&self, event: &Event) -> Evaluation {
        Evaluation::from_result(self.run(event).await)
    }
}
