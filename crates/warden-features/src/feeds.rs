// SPDX-FileCopyrightText: 2026 Warden Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Feed notifier.
//!
//! External pollers (music services, social feeds) push "new item observed"
//! events; this feature announces them into the configured channel per feed.
//! The idempotency key is derived from the item URL, so the same item
//! observed twice never announces twice within the dedup TTL.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::debug;

use warden_core::traits::store::{get_record, put_record};
use warden_core::{
    Action, ActionEnvelope, ChannelId, Evaluation, Event, EventBody, EventKind, Feature,
    TenantId, WardenError,
};

use crate::FeatureContext;

pub const NAMESPACE: &str = "feeds.config";

/// Per-feed announcement config, keyed by feed id.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FeedConfig {
    pub channel: ChannelId,

    /// Template with `{title}` and `{url}`.
    #[serde(default = "default_template")]
    pub template: String,
}

fn default_template() -> String {
    "New post: {title}\n{url}".to_string()
}

/// The feed notifier evaluator.
pub struct Feeds {
    ctx: FeatureContext,
}

impl Feeds {
    pub fn new(ctx: FeatureContext) -> Self {
        Self { ctx }
    }

    /// Operator surface: configure a feed's target channel and template.
    pub async fn configure_feed(
        &self,
        tenant: TenantId,
        feed_id: &str,
        config: &FeedConfig,
    ) -> Result<(), WardenError> {
        put_record(self.ctx.store.as_ref(), tenant, NAMESPACE, feed_id, config).await
    }

    pub async fn remove_feed(&self, tenant: TenantId, feed_id: &str) -> Result<(), WardenError> {
        self.ctx.store.delete(tenant, NAMESPACE, feed_id).await
    }

    async fn run(&self, event: &Event) -> Result<Vec<ActionEnvelope>, WardenError> {
        let EventBody::FeedItemObserved { feed_id, title, url } = &event.body else {
            return Ok(Vec::new());
        };
        let tenant = event.tenant;

        let Some(config): Option<FeedConfig> =
            get_record(self.ctx.store.as_ref(), tenant, NAMESPACE, feed_id).await?
        else {
            debug!(tenant = %tenant, feed = %feed_id, "unconfigured feed item dropped");
            return Ok(Vec::new());
        };

        let content = config
            .template
            .replace("{title}", title)
            .replace("{url}", url);

        Ok(vec![ActionEnvelope::new(
            tenant,
            Action::SendMessage {
                channel: config.channel,
                content,
                embed: None,
                components: Vec::new(),
                ephemeral: false,
            },
            format!("feeds: new item from {feed_id}"),
            format!("feeds:{tenant}:{feed_id}:{url}"),
        )])
    }
}

#[async_trait]
impl Feature for Feeds {
    fn name(&self) -> &'static str {
        "feeds"
    }

    fn subscriptions(&self) -> &'static [EventKind] {
        &[EventKind::FeedItemObserved]
    }

    async fn evaluate(&self, event: &Event) -> Evaluation {
        Evaluation::from_result(self.run(event).await)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use warden_runtime::{RateWindow, Scheduler};
    use warden_storage::{Database, SqliteStore, TenantConfigCache};
    use warden_test_utils::{ManualClock, MockDirectory};

    const TENANT: TenantId = TenantId(11);

    async fn fixture() -> (Feeds, tempfile::TempDir) {
        let temp = tempfile::tempdir().unwrap();
        let db = Database::open(temp.path().join("t.db").to_str().unwrap())
            .await
            .unwrap();
        let clock = Arc::new(ManualClock::new());
        let store = Arc::new(SqliteStore::new(db.clone()));
        let config = Arc::new(TenantConfigCache::new(store.clone()));
        let scheduler = Scheduler::new(clock.clone(), None);

        let ctx = FeatureContext {
            store,
            config,
            scheduler: scheduler.handle(),
            rate: Arc::new(RateWindow::new(10_000)),
            clock,
            directory: Arc::new(MockDirectory::new()),
        };
        (Feeds::new(ctx), temp)
    }

    fn item(feed_id: &str) -> Event {
        Event::new(
            TENANT,
            EventBody::FeedItemObserved {
                feed_id: feed_id.into(),
                title: "Fresh drop".into(),
                url: "https://feed.invalid/item/1".into(),
            },
        )
    }

    #[tokio::test]
    async fn configured_feed_announces_with_substitution() {
        let (feeds, _t) = fixture().await;
        feeds
            .configure_feed(
                TENANT,
                "yt:channel123",
                &FeedConfig {
                    channel: ChannelId(8),
                    template: "{title} -> {url}".into(),
                },
            )
            .await
            .unwrap();

        let eval = feeds.evaluate(&item("yt:channel123")).await;
        assert_eq!(eval.actions.len(), 1);
        let Action::SendMessage { channel, content, .. } = &eval.actions[0].action else {
            panic!("expected SendMessage");
        };
        assert_eq!(*channel, ChannelId(8));
        assert_eq!(content, "Fresh drop -> https://feed.invalid/item/1");
    }

    #[tokio::test]
    async fn idempotency_key_is_stable_per_item() {
        let (feeds, _t) = fixture().await;
        feeds
            .configure_feed(TENANT, "feed", &FeedConfig { channel: ChannelId(8), template: default_template() })
            .await
            .unwrap();

        let a = feeds.evaluate(&item("feed")).await;
        let b = feeds.evaluate(&item("feed")).await;
        // Same item observed twice carries the same key; the executor
        // drops the duplicate.
        assert_eq!(a.actions[0].idempotency_key, b.actions[0].idempotency_key);
    }

    #[tokio::test]
    async fn unconfigured_feed_is_dropped() {
        let (feeds, _t) = fixture().await;
        assert!(feeds.evaluate(&item("unknown")).await.actions.is_empty());
    }

    #[tokio::test]
    async fn removed_feed_stops_announcing() {
        let (feeds, _t) = fixture().await;
        feeds
            .configure_feed(TENANT, "feed", &FeedConfig { channel: ChannelId(8), template: default_template() })
            .await
            .unwrap();
        feeds.remove_feed(TENANT, "feed").await.unwrap();
        assert!(feeds.evaluate(&item("feed")).await.actions.is_empty());
    }
}
