// SPDX-FileCopyrightText: 2026 Warden Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Ticket system.
//!
//! A panel message carries an open button; pressing it creates a private
//! channel visible to the owner and the support role only. One open ticket
//! per `(tenant, user)` is enforced by the open-ticket record keyed on the
//! owner. Closing renders a transcript from channel history, ships it to
//! the log channel, and deletes the channel after a 10 second grace period.

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};
use uuid::Uuid;

use warden_core::action::{Component, Permission, PermissionOverwrite};
use warden_core::traits::gateway::HistoryLine;
use warden_core::traits::store::{get_record, put_record};
use warden_core::{
    Action, ActionEnvelope, ChannelId, Completion, Evaluation, Event, EventBody, EventKind,
    Feature, RoleId, TenantId, UserId, WardenError,
};
use warden_runtime::TaskSpec;

use crate::FeatureContext;

pub const NAMESPACE: &str = "tickets.config";
pub const OPEN_NAMESPACE: &str = "tickets.open";
pub const CLOSED_NAMESPACE: &str = "tickets.closed";

pub const OPEN_CUSTOM_ID: &str = "ticket:open";
pub const CLOSE_CUSTOM_ID: &str = "ticket:close";

const DELETE_KIND: &str = "tickets.delete_channel";
const PURGE_KIND: &str = "tickets.purge";

/// Channel deletion grace period after close.
const DELETE_GRACE: Duration = Duration::from_secs(10);

/// Transcript lines fetched from history.
const TRANSCRIPT_LIMIT: u32 = 500;

/// Per-tenant ticket settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TicketSettings {
    /// Category new ticket channels are created under.
    #[serde(default)]
    pub category: Option<ChannelId>,

    /// Role granted view+send on every ticket.
    pub support_role: RoleId,

    /// Channel receiving transcripts.
    #[serde(default)]
    pub log_channel: Option<ChannelId>,

    #[serde(default = "default_panel_message")]
    pub panel_message: String,

    /// How long closed-ticket records are retained.
    #[serde(default = "default_closed_ttl_secs")]
    pub closed_ttl_secs: u64,
}

fn default_panel_message() -> String {
    "Need help? Open a ticket.".to_string()
}

fn default_closed_ttl_secs() -> u64 {
    7 * 24 * 3600
}

/// Ticket lifecycle states. Open -> Closed is terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TicketStatus {
    Open,
    Closed,
}

/// An open ticket, keyed by owner id.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Ticket {
    pub id: Uuid,
    pub owner: UserId,
    /// Back-filled by the executor once the channel exists.
    #[serde(default)]
    pub channel_id: Option<ChannelId>,
    pub topic: String,
    pub opened_at: DateTime<Utc>,
    pub status: TicketStatus,
}

/// A closed ticket's transcript pointer, retained for the configured TTL.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClosedTicket {
    pub id: Uuid,
    pub owner: UserId,
    pub closed_at: DateTime<Utc>,
    /// Log channel the transcript was shipped to.
    pub transcript_channel: Option<ChannelId>,
}

/// The @everyone role shares the tenant id upstream.
fn everyone_role(tenant: TenantId) -> RoleId {
    RoleId(tenant.0)
}

/// The ticket evaluator.
pub struct Tickets {
    ctx: FeatureContext,
}

impl Tickets {
    pub fn new(ctx: FeatureContext) -> Self {
        Self { ctx }
    }

    /// Operator surface: place a panel message with the open button.
    pub async fn create_panel(
        &self,
        tenant: TenantId,
        channel: ChannelId,
    ) -> Result<Vec<ActionEnvelope>, WardenError> {
        let Some(settings) = self
            .ctx
            .config
            .get::<TicketSettings>(tenant, NAMESPACE)
            .await?
        else {
            return Err(WardenError::ConfigAbsent { tenant, feature: "tickets" });
        };
        Ok(vec![ActionEnvelope::new(
            tenant,
            Action::SendMessage {
                channel,
                content: settings.panel_message,
                embed: None,
                components: vec![Component {
                    custom_id: OPEN_CUSTOM_ID.to_string(),
                    label: "Open ticket".to_string(),
                }],
                ephemeral: false,
            },
            "tickets: panel",
            format!("tickets:panel:{tenant}:{channel}"),
        )])
    }

    pub async fn open_ticket(
        &self,
        tenant: TenantId,
        owner: UserId,
    ) -> Result<Option<Ticket>, WardenError> {
        get_record(self.ctx.store.as_ref(), tenant, OPEN_NAMESPACE, &owner.to_string()).await
    }

    async fn on_open(
        &self,
        tenant: TenantId,
        user: UserId,
        topic: String,
    ) -> Result<Vec<ActionEnvelope>, WardenError> {
        let Some(settings) = self
            .ctx
            .config
            .get::<TicketSettings>(tenant, NAMESPACE)
            .await?
        else {
            return Ok(Vec::new());
        };

        // One open ticket per (tenant, user).
        if self.open_ticket(tenant, user).await?.is_some() {
            info!(tenant = %tenant, user = %user, "ticket open refused: one already open");
            return Ok(Vec::new());
        }

        let ticket = Ticket {
            id: Uuid::new_v4(),
            owner: user,
            channel_id: None,
            topic,
            opened_at: self.ctx.clock.wall(),
            status: TicketStatus::Open,
        };
        put_record(self.ctx.store.as_ref(), tenant, OPEN_NAMESPACE, &user.to_string(), &ticket)
            .await?;

        info!(tenant = %tenant, user = %user, ticket = %ticket.id, "ticket opened");

        let overwrites = vec![
            PermissionOverwrite::for_role(
                everyone_role(tenant),
                Vec::new(),
                vec![Permission::ViewChannel],
            ),
            PermissionOverwrite::for_role(
                settings.support_role,
                vec![Permission::ViewChannel, Permission::SendMessages],
                Vec::new(),
            ),
            PermissionOverwrite::for_user(
                user,
                vec![Permission::ViewChannel, Permission::SendMessages],
                Vec::new(),
            ),
        ];
        Ok(vec![ActionEnvelope::new(
            tenant,
            Action::CreateChannel {
                name: format!("ticket-{user}"),
                category: settings.category,
                overwrites,
            },
            "tickets: open",
            format!("tickets:create:{tenant}:{}", ticket.id),
        )
        .with_completion(Completion {
            namespace: OPEN_NAMESPACE.to_string(),
            key: user.to_string(),
            message_field: None,
            channel_field: Some("channel_id".to_string()),
        })])
    }

    /// Render `[ts] author: content` transcript lines with attachment
    /// filenames and embed titles annotated.
    fn render_transcript(lines: &[HistoryLine]) -> String {
        let mut out = String::new();
        for line in lines {
            out.push_str(&format!(
                "[{}] {}: {}",
                line.at.format("%Y-%m-%d %H:%M:%S"),
                line.author_name,
                line.content
            ));
            for filename in &line.attachment_filenames {
                out.push_str(&format!(" [file: {filename}]"));
            }
            for title in &line.embed_titles {
                out.push_str(&format!(" [embed: {title}]"));
            }
            out.push('\n');
        }
        out
    }

    async fn on_close(
        &self,
        tenant: TenantId,
        user: UserId,
    ) -> Result<Vec<ActionEnvelope>, WardenError> {
        let Some(settings) = self
            .ctx
            .config
            .get::<TicketSettings>(tenant, NAMESPACE)
            .await?
        else {
            return Ok(Vec::new());
        };
        let Some(ticket) = self.open_ticket(tenant, user).await? else {
            return Ok(Vec::new());
        };

        let mut actions = Vec::new();

        // Transcript to the log channel, if both sides exist.
        if let (Some(log_channel), Some(channel)) = (settings.log_channel, ticket.channel_id) {
            let history = self
                .ctx
                .directory
                .channel_history(tenant, channel, TRANSCRIPT_LIMIT)
                .await?;
            let mut transcript = Self::render_transcript(&history);
            if transcript.len() > 4000 {
                transcript.truncate(4000);
                transcript.push_str("\n[truncated]");
            }
            actions.push(ActionEnvelope::new(
                tenant,
                Action::SendMessage {
                    channel: log_channel,
                    content: format!(
                        "Transcript of ticket {} (owner <@{user}>):\n{transcript}",
                        ticket.id
                    ),
                    embed: None,
                    components: Vec::new(),
                    ephemeral: false,
                },
                "tickets: transcript",
                format!("tickets:transcript:{tenant}:{}", ticket.id),
            ));
        } else if settings.log_channel.is_some() {
            warn!(tenant = %tenant, ticket = %ticket.id, "no channel id on close, transcript skipped");
        }

        // Open -> Closed is terminal: the open record is replaced by a
        // closed record that expires after the configured TTL.
        self.ctx.store.delete(tenant, OPEN_NAMESPACE, &user.to_string()).await?;
        put_record(
            self.ctx.store.as_ref(),
            tenant,
            CLOSED_NAMESPACE,
            &ticket.id.to_string(),
            &ClosedTicket {
                id: ticket.id,
                owner: user,
                closed_at: self.ctx.clock.wall(),
                transcript_channel: settings.log_channel,
            },
        )
        .await?;
        self.ctx
            .scheduler
            .after(
                Duration::from_secs(settings.closed_ttl_secs),
                TaskSpec::persistent(
                    tenant,
                    PURGE_KIND,
                    serde_json::json!({ "ticket": ticket.id.to_string() }),
                    format!("{PURGE_KIND}:{tenant}:{}", ticket.id),
                ),
            )
            .await?;

        // Channel deletion after the grace period.
        if let Some(channel) = ticket.channel_id {
            self.ctx
                .scheduler
                .after(
                    DELETE_GRACE,
                    TaskSpec::persistent(
                        tenant,
                        DELETE_KIND,
                        serde_json::json!({ "channel": channel.0 }),
                        format!("{DELETE_KIND}:{tenant}:{channel}"),
                    ),
                )
                .await?;
        }

        info!(tenant = %tenant, user = %user, ticket = %ticket.id, "ticket closed");
        Ok(actions)
    }

    async fn on_tick(
        &self,
        tenant: TenantId,
        kind: &str,
        payload: &serde_json::Value,
    ) -> Result<Vec<ActionEnvelope>, WardenError> {
        match kind {
            DELETE_KIND => {
                let Some(channel) = payload.get("channel").and_then(|v| v.as_u64()).map(ChannelId)
                else {
                    return Ok(Vec::new());
                };
                Ok(vec![ActionEnvelope::new(
                    tenant,
                    Action::DeleteChannel { channel },
                    "tickets: closed channel removal",
                    format!("tickets:delete:{tenant}:{channel}"),
                )])
            }
            PURGE_KIND => {
                if let Some(ticket) = payload.get("ticket").and_then(|v| v.as_str()) {
                    self.ctx.store.delete(tenant, CLOSED_NAMESPACE, ticket).await?;
                }
                Ok(Vec::new())
            }
            _ => Ok(Vec::new()),
        }
    }

    async fn run(&self, event: &Event) -> Result<Vec<ActionEnvelope>, WardenError> {
        match &event.body {
            EventBody::Interaction { user, custom_id, values, .. } => {
                if custom_id == OPEN_CUSTOM_ID {
                    let topic = values.first().cloned().unwrap_or_else(|| "support".to_string());
                    self.on_open(event.tenant, *user, topic).await
                } else if custom_id == CLOSE_CUSTOM_ID {
                    self.on_close(event.tenant, *user).await
                } else {
                    Ok(Vec::new())
                }
            }
            EventBody::ScheduledTick { task }
                if task.kind == DELETE_KIND || task.kind == PURGE_KIND =>
            {
                self.on_tick(event.tenant, &task.kind, &task.payload).await
            }
            _ => Ok(Vec::new()),
        }
    }
}

#[async_trait]
impl Feature for Tickets {
    fn name(&self) -> &'static str {
        "tickets"
    }

    fn subscriptions(&self) -> &'static [EventKind] {
        &[EventKind::Interaction, EventKind::ScheduledTick]
    }

    async fn evaluate(&self, event: &Event) -> Evaluation {
        Evaluation::from_result(self.run(event).await)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use warden_core::event::InteractionKind;
    use warden_runtime::{RateWindow, Scheduler};
    use warden_storage::{Database, SqliteStore, TenantConfigCache};
    use warden_test_utils::{ManualClock, MockDirectory};

    const TENANT: TenantId = TenantId(10);
    const USER: UserId = UserId(33);
    const SUPPORT: RoleId = RoleId(44);
    const LOG: ChannelId = ChannelId(60);

    struct Fixture {
        feature: Tickets,
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
        let scheduler = Scheduler::new(clock.clone(), Some(db));

        let ctx = FeatureContext {
            store: store.clone(),
            config: config.clone(),
            scheduler: scheduler.handle(),
            rate: Arc::new(RateWindow::new(10_000)),
            clock,
            directory: directory.clone(),
        };
        Fixture { feature: Tickets::new(ctx), directory, config, store, _temp: temp }
    }

    fn settings() -> TicketSettings {
        TicketSettings {
            category: Some(ChannelId(70)),
            support_role: SUPPORT,
            log_channel: Some(LOG),
            panel_message: default_panel_message(),
            closed_ttl_secs: default_closed_ttl_secs(),
        }
    }

    fn interaction(user: UserId, custom_id: &str) -> Event {
        Event::new(
            TENANT,
            EventBody::Interaction {
                kind: InteractionKind::Button,
                user,
                channel: ChannelId(1),
                message: None,
                custom_id: custom_id.into(),
                values: Vec::new(),
            },
        )
    }

    #[tokio::test]
    async fn open_creates_private_channel_with_overwrites() {
        let f = fixture().await;
        f.config.put(TENANT, NAMESPACE, &settings()).await.unwrap();

        let eval = f.feature.evaluate(&interaction(USER, OPEN_CUSTOM_ID)).await;
        assert_eq!(eval.actions.len(), 1);
        let Action::CreateChannel { name, category, overwrites } = &eval.actions[0].action else {
            panic!("expected CreateChannel");
        };
        assert_eq!(name, &format!("ticket-{USER}"));
        assert_eq!(*category, Some(ChannelId(70)));
        assert_eq!(overwrites.len(), 3);

        // @everyone denied view.
        assert_eq!(overwrites[0].role, Some(everyone_role(TENANT)));
        assert_eq!(overwrites[0].deny, vec![Permission::ViewChannel]);
        // Support role and owner granted view+send.
        assert_eq!(overwrites[1].role, Some(SUPPORT));
        assert!(overwrites[1].allow.contains(&Permission::SendMessages));
        assert_eq!(overwrites[2].user, Some(USER));

        let ticket = f.feature.open_ticket(TENANT, USER).await.unwrap().unwrap();
        assert_eq!(ticket.status, TicketStatus::Open);
    }

    #[tokio::test]
    async fn second_open_for_same_user_is_refused() {
        let f = fixture().await;
        f.config.put(TENANT, NAMESPACE, &settings()).await.unwrap();

        assert_eq!(f.feature.evaluate(&interaction(USER, OPEN_CUSTOM_ID)).await.actions.len(), 1);
        assert!(f.feature.evaluate(&interaction(USER, OPEN_CUSTOM_ID)).await.actions.is_empty());

        // A different user still can.
        assert_eq!(
            f.feature.evaluate(&interaction(UserId(34), OPEN_CUSTOM_ID)).await.actions.len(),
            1
        );
    }

    #[tokio::test]
    async fn close_ships_transcript_and_schedules_deletion() {
        let f = fixture().await;
        f.config.put(TENANT, NAMESPACE, &settings()).await.unwrap();
        f.feature.evaluate(&interaction(USER, OPEN_CUSTOM_ID)).await;

        // Executor back-fill of the created channel id.
        let mut ticket = f.feature.open_ticket(TENANT, USER).await.unwrap().unwrap();
        ticket.channel_id = Some(ChannelId(500));
        put_record(f.store.as_ref(), TENANT, OPEN_NAMESPACE, &USER.to_string(), &ticket)
            .await
            .unwrap();

        f.directory.set_history(
            TENANT,
            ChannelId(500),
            vec![
                HistoryLine {
                    at: chrono::Utc::now(),
                    author: USER,
                    author_name: "alice".into(),
                    content: "my thing is broken".into(),
                    attachment_filenames: vec!["screenshot.png".into()],
                    embed_titles: Vec::new(),
                },
                HistoryLine {
                    at: chrono::Utc::now(),
                    author: UserId(2),
                    author_name: "support-bob".into(),
                    content: "on it".into(),
                    attachment_filenames: Vec::new(),
                    embed_titles: vec!["Status".into()],
                },
            ],
        );

        let eval = f.feature.evaluate(&interaction(USER, CLOSE_CUSTOM_ID)).await;
        assert_eq!(eval.actions.len(), 1);
        let Action::SendMessage { channel, content, .. } = &eval.actions[0].action else {
            panic!("expected transcript SendMessage");
        };
        assert_eq!(*channel, LOG);
        assert!(content.contains("alice: my thing is broken [file: screenshot.png]"));
        assert!(content.contains("support-bob: on it [embed: Status]"));

        // Open record gone, closed record retained.
        assert!(f.feature.open_ticket(TENANT, USER).await.unwrap().is_none());
        let closed: Option<ClosedTicket> = get_record(
            f.store.as_ref(),
            TENANT,
            CLOSED_NAMESPACE,
            &ticket.id.to_string(),
        )
        .await
        .unwrap();
        assert!(closed.is_some());
    }

    #[tokio::test]
    async fn delete_tick_emits_channel_deletion() {
        let f = fixture().await;
        f.config.put(TENANT, NAMESPACE, &settings()).await.unwrap();

        let tick = Event::new(
            TENANT,
            EventBody::ScheduledTick {
                task: warden_core::TaskFire {
                    id: warden_core::TaskId(1),
                    kind: DELETE_KIND.to_string(),
                    payload: serde_json::json!({ "channel": 500 }),
                    due: chrono::Utc::now(),
                    fired: chrono::Utc::now(),
                },
            },
        );
        let eval = f.feature.evaluate(&tick).await;
        assert_eq!(eval.actions.len(), 1);
        assert!(matches!(
            eval.actions[0].action,
            Action::DeleteChannel { channel } if channel == ChannelId(500)
        ));
    }

    #[tokio::test]
    async fn close_without_open_ticket_is_noop() {
        let f = fixture().await;
        f.config.put(TENANT, NAMESPACE, &settings()).await.unwrap();
        assert!(f.feature.evaluate(&interaction(USER, CLOSE_CUSTOM_ID)).await.actions.is_empty());
    }

    #[tokio::test]
    async fn panel_carries_open_button() {
        let f = fixture().await;
        f.config.put(TENANT, NAMESPACE, &settings()).await.unwrap();

        let actions = f.feature.create_panel(TENANT, ChannelId(2)).await.unwrap();
        let Action::SendMessage { components, .. } = &actions[0].action else {
            panic!("expected SendMessage");
        };
        assert_eq!(components[0].custom_id, OPEN_CUSTOM_ID);
    }

    #[tokio::test]
    async fn purge_tick_drops_closed_record() {
        let f = fixture().await;
        f.config.put(TENANT, NAMESPACE, &settings()).await.unwrap();
        let id = Uuid::new_v4();
        put_record(
            f.store.as_ref(),
            TENANT,
            CLOSED_NAMESPACE,
            &id.to_string(),
            &ClosedTicket {
                id,
                owner: USER,
                closed_at: chrono::Utc::now(),
                transcript_channel: Some(LOG),
            },
        )
        .await
        .unwrap();

        let tick = Event::new(
            TENANT,
            EventBody::ScheduledTick {
                task: warden_core::TaskFire {
                    id: warden_core::TaskId(2),
                    kind: PURGE_KIND.to_string(),
                    payload: serde_json::json!({ "ticket": id.to_string() }),
                    due: chrono::Utc::now(),
                    fired: chrono::Utc::now(),
                },
            },
        );
        f.feature.evaluate(&tick).await;
        let closed: Option<ClosedTicket> =
            get_record(f.store.as_ref(), TENANT, CLOSED_NAMESPACE, &id.to_string())
                .await
                .unwrap();
        assert!(closed.is_none());
    }
}
