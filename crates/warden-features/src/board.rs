// SPDX-FileCopyrightText: 2026 Warden Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Board engine: starboard and clownboard.
//!
//! One engine, two instances differing only in name and record namespaces.
//! A board entry exists iff the effective reaction count on the source is at
//! or above the threshold and the board is not locked. The entry record is
//! written before the board message is sent; the executor back-fills the
//! created message id through the envelope completion, and per-tenant event
//! ordering guarantees a source never gets two board posts.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, error, info};
use uuid::Uuid;

use warden_core::event::Emoji;
use warden_core::traits::gateway::MessageMeta;
use warden_core::traits::store::{get_record, put_record};
use warden_core::{
    Action, ActionEnvelope, ChannelId, Completion, Embed, Evaluation, Event, EventBody,
    EventKind, Feature, MessageId, RoleId, TenantId, UserId, WardenError,
};

use crate::FeatureContext;

/// Per-tenant board settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BoardSettings {
    /// Channel the rendered copies land in.
    pub channel: ChannelId,

    /// Trigger emoji.
    pub emoji: Emoji,

    /// Effective count required for an entry.
    pub threshold: u32,

    /// Whether the author's own reaction counts.
    #[serde(default)]
    pub allow_self_react: bool,

    /// A locked board keeps its entries but stops reacting to changes.
    #[serde(default)]
    pub locked: bool,

    #[serde(default)]
    pub ignored_channels: Vec<ChannelId>,
    #[serde(default)]
    pub ignored_members: Vec<UserId>,
    #[serde(default)]
    pub ignored_roles: Vec<RoleId>,

    #[serde(default = "default_true")]
    pub show_attachments: bool,
    #[serde(default = "default_true")]
    pub show_timestamp: bool,
    #[serde(default = "default_true")]
    pub show_jump_link: bool,

    /// Embed accent color.
    #[serde(default = "default_color")]
    pub color: u32,
}

fn default_true() -> bool {
    true
}

fn default_color() -> u32 {
    0xFFD700
}

/// Source-to-board linkage, keyed by source message id.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BoardEntry {
    /// Back-filled by the executor once the board message exists.
    #[serde(default)]
    pub board_message_id: Option<MessageId>,
    pub source_channel: ChannelId,
    pub star_count: u32,
    pub last_render: DateTime<Utc>,
}

/// The board evaluator. Construct via [`Board::starboard`] or
/// [`Board::clownboard`].
pub struct Board {
    ctx: FeatureContext,
    name: &'static str,
    config_namespace: &'static str,
    entries_namespace: &'static str,
}

impl Board {
    pub fn starboard(ctx: FeatureContext) -> Self {
        Self {
            ctx,
            name: "starboard",
            config_namespace: "starboard.config",
            entries_namespace: "starboard.entries",
        }
    }

    pub fn clownboard(ctx: FeatureContext) -> Self {
        Self {
            ctx,
            name: "clownboard",
            config_namespace: "clownboard.config",
            entries_namespace: "clownboard.entries",
        }
    }

    pub async fn entry(
        &self,
        tenant: TenantId,
        source: MessageId,
    ) -> Result<Option<BoardEntry>, WardenError> {
        get_record(self.ctx.store.as_ref(), tenant, self.entries_namespace, &source.to_string())
            .await
    }

    async fn ignored(
        &self,
        settings: &BoardSettings,
        tenant: TenantId,
        meta: &MessageMeta,
    ) -> Result<bool, WardenError> {
        if settings.ignored_channels.contains(&meta.channel)
            || settings.ignored_members.contains(&meta.author)
            || meta.channel == settings.channel
        {
            return Ok(true);
        }
        if !settings.ignored_roles.is_empty()
            && let Some(member) = self.ctx.directory.member(tenant, meta.author).await?
            && member.has_any_role(&settings.ignored_roles)
        {
            return Ok(true);
        }
        Ok(false)
    }

    /// Raw count minus the author's own reaction when self-reacts are
    /// disallowed.
    async fn effective_count(
        &self,
        settings: &BoardSettings,
        tenant: TenantId,
        meta: &MessageMeta,
    ) -> Result<u32, WardenError> {
        let raw = self
            .ctx
            .directory
            .reaction_count(tenant, meta.channel, meta.message, &settings.emoji)
            .await?;
        if settings.allow_self_react {
            return Ok(raw);
        }
        let self_react = self
            .ctx
            .directory
            .has_reacted(tenant, meta.channel, meta.message, &settings.emoji, meta.author)
            .await?;
        Ok(if self_react { raw.saturating_sub(1) } else { raw })
    }

    fn render_embed(&self, settings: &BoardSettings, tenant: TenantId, meta: &MessageMeta, count: u32) -> Embed {
        Embed {
            title: None,
            description: Some(meta.content.clone()),
            color: Some(settings.color),
            footer: Some(format!("{} {}", settings.emoji, count)),
            timestamp: settings.show_timestamp.then(|| self.ctx.clock.wall()),
            image_url: settings
                .show_attachments
                .then(|| meta.attachments.first().map(|a| a.url.clone()))
                .flatten(),
            jump_link: settings
                .show_jump_link
                .then(|| format!("https://chat.invalid/{tenant}/{}/{}", meta.channel, meta.message)),
        }
    }

    async fn create_entry(
        &self,
        settings: &BoardSettings,
        tenant: TenantId,
        meta: &MessageMeta,
        count: u32,
    ) -> Result<Vec<ActionEnvelope>, WardenError> {
        // Record first: per-tenant ordering makes this the guard against a
        // second post for the same source.
        put_record(
            self.ctx.store.as_ref(),
            tenant,
            self.entries_namespace,
            &meta.message.to_string(),
            &BoardEntry {
                board_message_id: None,
                source_channel: meta.channel,
                star_count: count,
                last_render: self.ctx.clock.wall(),
            },
        )
        .await?;

        info!(
            board = self.name,
            tenant = %tenant,
            source = %meta.message,
            count,
            "board entry created"
        );

        let envelope = ActionEnvelope::new(
            tenant,
            Action::SendMessage {
                channel: settings.channel,
                content: format!("<@{}> in <#{}>", meta.author, meta.channel),
                embed: Some(self.render_embed(settings, tenant, meta, count)),
                components: Vec::new(),
                ephemeral: false,
            },
            format!("{}: threshold reached", self.name),
            // The entry record guards replays; each creation is unique.
            format!("{}:create:{tenant}:{}:{}", self.name, meta.message, Uuid::new_v4()),
        )
        .with_completion(Completion {
            namespace: self.entries_namespace.to_string(),
            key: meta.message.to_string(),
            message_field: Some("board_message_id".to_string()),
            channel_field: None,
        });
        Ok(vec![envelope])
    }

    async fn update_entry(
        &self,
        settings: &BoardSettings,
        tenant: TenantId,
        meta: &MessageMeta,
        mut entry: BoardEntry,
        count: u32,
    ) -> Result<Vec<ActionEnvelope>, WardenError> {
        entry.star_count = count;
        entry.last_render = self.ctx.clock.wall();
        put_record(
            self.ctx.store.as_ref(),
            tenant,
            self.entries_namespace,
            &meta.message.to_string(),
            &entry,
        )
        .await?;

        let Some(board_message) = entry.board_message_id else {
            // Creation still in flight; the refreshed count is in the record
            // and the next change will render it.
            debug!(board = self.name, source = %meta.message, "board message id not yet known");
            return Ok(Vec::new());
        };

        Ok(vec![ActionEnvelope::new(
            tenant,
            Action::EditMessage {
                channel: settings.channel,
                message: board_message,
                content: None,
                embed: Some(self.render_embed(settings, tenant, meta, count)),
            },
            format!("{}: count changed", self.name),
            format!("{}:update:{tenant}:{}:{count}", self.name, meta.message),
        )])
    }

    async fn delete_entry(
        &self,
        settings: &BoardSettings,
        tenant: TenantId,
        source: MessageId,
        entry: BoardEntry,
    ) -> Result<Vec<ActionEnvelope>, WardenError> {
        self.ctx.store.delete(tenant, self.entries_namespace, &source.to_string()).await?;
        info!(board = self.name, tenant = %tenant, source = %source, "board entry removed");

        let Some(board_message) = entry.board_message_id else {
            return Ok(Vec::new());
        };
        Ok(vec![ActionEnvelope::new(
            tenant,
            Action::DeleteMessage { channel: settings.channel, message: board_message },
            format!("{}: dropped below threshold", self.name),
            format!("{}:delete:{tenant}:{source}:{board_message}", self.name),
        )])
    }

    async fn on_reaction(
        &self,
        tenant: TenantId,
        channel: ChannelId,
        message: MessageId,
        emoji: &Emoji,
    ) -> Result<Vec<ActionEnvelope>, WardenError> {
        let Some(settings) = self
            .ctx
            .config
            .get::<BoardSettings>(tenant, self.config_namespace)
            .await?
        else {
            return Ok(Vec::new());
        };
        if settings.locked || !settings.emoji.matches(emoji) {
            return Ok(Vec::new());
        }

        let entry = self.entry(tenant, message).await?;
        let Some(meta) = self.ctx.directory.message(tenant, channel, message).await? else {
            // Source vanished. An entry pointing at nothing violates the
            // entry invariant; repair by deleting it.
            if let Some(entry) = entry {
                error!(
                    board = self.name,
                    tenant = %tenant,
                    source = %message,
                    "entry without source message, repairing by deletion"
                );
                return self.delete_entry(&settings, tenant, message, entry).await;
            }
            return Ok(Vec::new());
        };

        if self.ignored(&settings, tenant, &meta).await? {
            return Ok(Vec::new());
        }

        let count = self.effective_count(&settings, tenant, &meta).await?;
        match entry {
            Some(entry) if count >= settings.threshold => {
                self.update_entry(&settings, tenant, &meta, entry, count).await
            }
            Some(entry) => self.delete_entry(&settings, tenant, message, entry).await,
            None if count >= settings.threshold => {
                self.create_entry(&settings, tenant, &meta, count).await
            }
            None => Ok(Vec::new()),
        }
    }

    /// Source edits propagate to the rendered copy.
    async fn on_edit(
        &self,
        tenant: TenantId,
        channel: ChannelId,
        message: MessageId,
    ) -> Result<Vec<ActionEnvelope>, WardenError> {
        let Some(settings) = self
            .ctx
            .config
            .get::<BoardSettings>(tenant, self.config_namespace)
            .await?
        else {
            return Ok(Vec::new());
        };
        if settings.locked {
            return Ok(Vec::new());
        }
        let Some(entry) = self.entry(tenant, message).await? else {
            return Ok(Vec::new());
        };
        let Some(board_message) = entry.board_message_id else {
            return Ok(Vec::new());
        };
        let Some(meta) = self.ctx.directory.message(tenant, channel, message).await? else {
            return Ok(Vec::new());
        };

        Ok(vec![ActionEnvelope::new(
            tenant,
            Action::EditMessage {
                channel: settings.channel,
                message: board_message,
                content: None,
                embed: Some(self.render_embed(&settings, tenant, &meta, entry.star_count)),
            },
            format!("{}: source edited", self.name),
            format!("{}:edit:{tenant}:{message}:{}", self.name, meta.content.len()),
        )])
    }

    async fn run(&self, event: &Event) -> Result<Vec<ActionEnvelope>, WardenError> {
        match &event.body {
            EventBody::ReactionAdd { channel, message, emoji, .. }
            | EventBody::ReactionRemove { channel, message, emoji, .. } => {
                self.on_reaction(event.tenant, *channel, *message, emoji).await
            }
            EventBody::MessageEdit { channel, message, .. } => {
                self.on_edit(event.tenant, *channel, *message).await
            }
            _ => Ok(Vec::new()),
        }
    }
}

#[async_trait]
impl Feature for Board {
    fn name(&self) -> &'static str {
        self.name
    }

    fn subscriptions(&self) -> &'static [EventKind] {
        &[EventKind::ReactionAdd, EventKind::ReactionRemove, EventKind::MessageEdit]
    }

    async fn evaluate(&self, event: &Event) -> Evaluation {
        Evaluation::from_result(self.run(event).await)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use warden_core::event::Attachment;
    use warden_runtime::{RateWindow, Scheduler};
    use warden_storage::{Database, SqliteStore, TenantConfigCache};
    use warden_test_utils::{ManualClock, MockDirectory};

    const TENANT: TenantId = TenantId(6);
    const SOURCE_CHANNEL: ChannelId = ChannelId(10);
    const BOARD_CHANNEL: ChannelId = ChannelId(11);
    const SOURCE: MessageId = MessageId(500);
    const AUTHOR: UserId = UserId(90);

    struct Fixture {
        feature: Board,
        directory: Arc<MockDirectory>,
        config: Arc<TenantConfigCache>,
        store: Arc<SqliteStore>,
        _temp: tempfile::TempDir,
    }

    async fn fixture() -> Fixture {
        let temp = tempfile::tempdir().unwrap();
        let db = Database::open(temp.path().join("t.db").to_str().unwrap())
            .await
            .unwrap();
        let clock = Arc::new(ManualClock::new());
        let store = Arc::new(SqliteStore::new(db.clone()));
        let config = Arc::new(TenantConfigCache::new(store.clone()));
        let directory = Arc::new(MockDirectory::new());
        let scheduler = Scheduler::new(clock.clone(), None);

        let ctx = FeatureContext {
            store: store.clone(),
            config: config.clone(),
            scheduler: scheduler.handle(),
            rate: Arc::new(RateWindow::new(10_000)),
            clock,
            directory: directory.clone(),
        };
        Fixture { feature: Board::starboard(ctx), directory, config, store, _temp: temp }
    }

    fn star() -> Emoji {
        Emoji::unicode("⭐")
    }

    fn settings() -> BoardSettings {
        BoardSettings {
            channel: BOARD_CHANNEL,
            emoji: star(),
            threshold: 3,
            allow_self_react: false,
            locked: false,
            ignored_channels: Vec::new(),
            ignored_members: Vec::new(),
            ignored_roles: Vec::new(),
            show_attachments: true,
            show_timestamp: true,
            show_jump_link: true,
            color: 0xFFD700,
        }
    }

    fn source_meta() -> MessageMeta {
        MessageMeta {
            channel: SOURCE_CHANNEL,
            message: SOURCE,
            author: AUTHOR,
            author_is_bot: false,
            content: "a memorable message".into(),
            attachments: vec![Attachment {
                filename: "cat.png".into(),
                url: "https://cdn.invalid/cat.png".into(),
            }],
            pinned: false,
        }
    }

    fn reaction_add(user: u64) -> Event {
        Event::new(
            TENANT,
            EventBody::ReactionAdd {
                channel: SOURCE_CHANNEL,
                message: SOURCE,
                emoji: star(),
                user: UserId(user),
            },
        )
    }

    fn reaction_remove(user: u64) -> Event {
        Event::new(
            TENANT,
            EventBody::ReactionRemove {
                channel: SOURCE_CHANNEL,
                message: SOURCE,
                emoji: star(),
                user: UserId(user),
            },
        )
    }

    async fn setup(f: &Fixture) {
        f.config.put(TENANT, "starboard.config", &settings()).await.unwrap();
        f.directory.add_message(TENANT, source_meta());
    }

    async fn add_star(f: &Fixture, user: u64) -> Evaluation {
        f.directory.react(TENANT, SOURCE_CHANNEL, SOURCE, &star(), UserId(user));
        f.feature.evaluate(&reaction_add(user)).await
    }

    async fn remove_star(f: &Fixture, user: u64) -> Evaluation {
        f.directory.unreact(TENANT, SOURCE_CHANNEL, SOURCE, &star(), UserId(user));
        f.feature.evaluate(&reaction_remove(user)).await
    }

    #[tokio::test]
    async fn entry_created_exactly_at_threshold() {
        let f = fixture().await;
        setup(&f).await;

        assert!(add_star(&f, 1).await.actions.is_empty());
        assert!(add_star(&f, 2).await.actions.is_empty());

        let eval = add_star(&f, 3).await;
        assert_eq!(eval.actions.len(), 1);
        let Action::SendMessage { channel, embed, .. } = &eval.actions[0].action else {
            panic!("expected SendMessage");
        };
        assert_eq!(*channel, BOARD_CHANNEL);
        let embed = embed.as_ref().unwrap();
        assert_eq!(embed.description.as_deref(), Some("a memorable message"));
        assert_eq!(embed.footer.as_deref(), Some("⭐ 3"));
        assert!(embed.image_url.is_some());

        let entry = f.feature.entry(TENANT, SOURCE).await.unwrap().unwrap();
        assert_eq!(entry.star_count, 3);
    }

    #[tokio::test]
    async fn fourth_reaction_updates_not_recreates() {
        let f = fixture().await;
        setup(&f).await;
        for user in 1..=3 {
            add_star(&f, user).await;
        }

        // Simulate the executor back-filling the board message id.
        let mut entry = f.feature.entry(TENANT, SOURCE).await.unwrap().unwrap();
        entry.board_message_id = Some(MessageId(9001));
        put_record(f.store.as_ref(), TENANT, "starboard.entries", &SOURCE.to_string(), &entry)
            .await
            .unwrap();

        let eval = add_star(&f, 4).await;
        assert_eq!(eval.actions.len(), 1);
        assert!(matches!(
            &eval.actions[0].action,
            Action::EditMessage { message, .. } if *message == MessageId(9001)
        ));
        let entry = f.feature.entry(TENANT, SOURCE).await.unwrap().unwrap();
        assert_eq!(entry.star_count, 4);
    }

    #[tokio::test]
    async fn dropping_below_threshold_deletes_entry_and_message() {
        let f = fixture().await;
        setup(&f).await;
        for user in 1..=3 {
            add_star(&f, user).await;
        }
        let mut entry = f.feature.entry(TENANT, SOURCE).await.unwrap().unwrap();
        entry.board_message_id = Some(MessageId(9001));
        put_record(f.store.as_ref(), TENANT, "starboard.entries", &SOURCE.to_string(), &entry)
            .await
            .unwrap();

        // Two removals: 3 -> 1, below threshold.
        remove_star(&f, 1).await;
        let eval = remove_star(&f, 2).await;

        assert!(f.feature.entry(TENANT, SOURCE).await.unwrap().is_none());
        // The first removal (count 2) already deleted; the second sees no entry.
        let deletes: Vec<_> = eval
            .actions
            .iter()
            .filter(|e| matches!(e.action, Action::DeleteMessage { .. }))
            .collect();
        assert!(deletes.is_empty());
    }

    #[tokio::test]
    async fn re_crossing_threshold_creates_fresh_entry() {
        let f = fixture().await;
        setup(&f).await;
        for user in 1..=3 {
            add_star(&f, user).await;
        }
        let mut entry = f.feature.entry(TENANT, SOURCE).await.unwrap().unwrap();
        entry.board_message_id = Some(MessageId(9001));
        put_record(f.store.as_ref(), TENANT, "starboard.entries", &SOURCE.to_string(), &entry)
            .await
            .unwrap();

        // Drop to 1, entry deleted.
        remove_star(&f, 1).await;
        assert!(f.feature.entry(TENANT, SOURCE).await.unwrap().is_none());

        // Climb back to 3: a brand-new entry (no resurrected message id).
        add_star(&f, 1).await;
        let eval = add_star(&f, 4).await;
        assert_eq!(eval.actions.len(), 1);
        assert!(matches!(eval.actions[0].action, Action::SendMessage { .. }));
        let entry = f.feature.entry(TENANT, SOURCE).await.unwrap().unwrap();
        assert!(entry.board_message_id.is_none());
    }

    #[tokio::test]
    async fn self_react_excluded_when_disallowed() {
        let f = fixture().await;
        setup(&f).await;

        // Author + two others = raw 3, effective 2: no entry.
        add_star(&f, AUTHOR.0).await;
        add_star(&f, 1).await;
        let eval = add_star(&f, 2).await;
        assert!(eval.actions.is_empty());
        assert!(f.feature.entry(TENANT, SOURCE).await.unwrap().is_none());

        // A third non-author star crosses.
        let eval = add_star(&f, 3).await;
        assert_eq!(eval.actions.len(), 1);
    }

    #[tokio::test]
    async fn locked_board_ignores_reactions() {
        let f = fixture().await;
        let mut s = settings();
        s.locked = true;
        f.config.put(TENANT, "starboard.config", &s).await.unwrap();
        f.directory.add_message(TENANT, source_meta());

        for user in 1..=5 {
            assert!(add_star(&f, user).await.actions.is_empty());
        }
        assert!(f.feature.entry(TENANT, SOURCE).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn wrong_emoji_is_ignored() {
        let f = fixture().await;
        setup(&f).await;

        let clown = Emoji::unicode("🤡");
        for user in 1..=5u64 {
            f.directory.react(TENANT, SOURCE_CHANNEL, SOURCE, &clown, UserId(user));
            let event = Event::new(
                TENANT,
                EventBody::ReactionAdd {
                    channel: SOURCE_CHANNEL,
                    message: SOURCE,
                    emoji: clown.clone(),
                    user: UserId(user),
                },
            );
            assert!(f.feature.evaluate(&event).await.actions.is_empty());
        }
    }

    #[tokio::test]
    async fn source_edit_propagates_to_board_embed() {
        let f = fixture().await;
        setup(&f).await;
        for user in 1..=3 {
            add_star(&f, user).await;
        }
        let mut entry = f.feature.entry(TENANT, SOURCE).await.unwrap().unwrap();
        entry.board_message_id = Some(MessageId(9001));
        put_record(f.store.as_ref(), TENANT, "starboard.entries", &SOURCE.to_string(), &entry)
            .await
            .unwrap();

        // The gateway cache now holds the edited content.
        let mut meta = source_meta();
        meta.content = "edited!".into();
        f.directory.add_message(TENANT, meta);

        let edit = Event::new(
            TENANT,
            EventBody::MessageEdit {
                channel: SOURCE_CHANNEL,
                message: SOURCE,
                author: AUTHOR,
                before: Some("a memorable message".into()),
                after: "edited!".into(),
            },
        );
        let eval = f.feature.evaluate(&edit).await;
        assert_eq!(eval.actions.len(), 1);
        let Action::EditMessage { embed, .. } = &eval.actions[0].action else {
            panic!("expected EditMessage");
        };
        assert_eq!(embed.as_ref().unwrap().description.as_deref(), Some("edited!"));
    }

    #[tokio::test]
    async fn missing_source_with_entry_is_repaired() {
        let f = fixture().await;
        setup(&f).await;
        for user in 1..=3 {
            add_star(&f, user).await;
        }
        f.directory.remove_message(TENANT, SOURCE_CHANNEL, SOURCE);

        let eval = f.feature.evaluate(&reaction_add(9)).await;
        assert!(eval.error.is_none());
        assert!(f.feature.entry(TENANT, SOURCE).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn clownboard_runs_independently() {
        let f = fixture().await;
        // Starboard unconfigured; clownboard configured with its own emoji.
        let clown_feature = Board::clownboard(FeatureContext {
            store: f.feature.ctx.store.clone(),
            config: f.feature.ctx.config.clone(),
            scheduler: f.feature.ctx.scheduler.clone(),
            rate: f.feature.ctx.rate.clone(),
            clock: f.feature.ctx.clock.clone(),
            directory: f.feature.ctx.directory.clone(),
        });
        let clown = Emoji::unicode("🤡");
        let mut s = settings();
        s.emoji = clown.clone();
        s.threshold = 2;
        f.config.put(TENANT, "clownboard.config", &s).await.unwrap();
        f.directory.add_message(TENANT, source_meta());

        for user in 1..=2u64 {
            f.directory.react(TENANT, SOURCE_CHANNEL, SOURCE, &clown, UserId(user));
        }
        let event = Event::new(
            TENANT,
            EventBody::ReactionAdd {
                channel: SOURCE_CHANNEL,
                message: SOURCE,
                emoji: clown,
                user: UserId(2),
            },
        );
        let eval = clown_feature.evaluate(&event).await;
        assert_eq!(eval.actions.len(), 1);
        assert!(clown_feature.entry(TENANT, SOURCE).await.unwrap().is_some());
        // Starboard namespace untouched.
        assert!(f.feature.entry(TENANT, SOURCE).await.unwrap().is_none());
    }
}
