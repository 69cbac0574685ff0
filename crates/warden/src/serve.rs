// SPDX-FileCopyrightText: 2026 Warden Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! `warden serve` command implementation.
//!
//! Wires storage, the scheduler, rate windows, the executor, and every
//! feature into the dispatcher, then pumps gateway events until shutdown.
//! The gateway client itself ships separately; hosts embed the engine via
//! [`run_serve`] and hand it their adapter. For development, `--replay`
//! drives the full pipeline from a JSONL file of normalized events with
//! actions logged instead of delivered.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::mpsc;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use warden_config::WardenConfig;
use warden_core::traits::gateway::{HistoryLine, Member, MessageMeta};
use warden_core::{
    ActionEnvelope, ActionSink, ChannelId, Clock, Event, Feature, GatewayDirectory, MessageId,
    SinkError, SinkOutcome, Store, TenantId, UserId, WardenError,
};
use warden_features::{
    AntiNuke, AntiRaid, AutoRole, Board, BumpReminder, FeatureContext, Feeds, Filters, Levels,
    Snipe, Tickets,
};
use warden_runtime::{shutdown, Dispatcher, Executor, RateWindow, Scheduler, SystemClock};
use warden_storage::{Database, SqliteStore, TenantConfigCache};

/// The gateway seam a host hands to the engine.
pub struct GatewayParts {
    pub directory: Arc<dyn GatewayDirectory>,
    pub sink: Arc<dyn ActionSink>,
    pub inbound: mpsc::Receiver<Event>,
}

/// Initializes the tracing subscriber from the configured log level.
fn init_tracing(log_level: &str) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(format!("warden={log_level}")));
    let _ = tracing_subscriber::fmt().with_env_filter(filter).try_init();
}

/// Build every feature against the shared context, in registration order.
///
/// Order matters: anti-nuke and anti-raid run before the cosmetic features
/// so punitive actions lead the executor queues for an event.
fn build_features(ctx: &FeatureContext) -> Vec<Arc<dyn Feature>> {
    vec![
        Arc::new(AntiNuke::new(ctx.clone())),
        Arc::new(AntiRaid::new(ctx.clone())),
        Arc::new(AutoRole::new(ctx.clone())),
        Arc::new(Filters::new(ctx.clone())),
        Arc::new(Levels::new(ctx.clone())),
        Arc::new(Board::starboard(ctx.clone())),
        Arc::new(Board::clownboard(ctx.clone())),
        Arc::new(Snipe::new(ctx.clone())),
        Arc::new(BumpReminder::new(ctx.clone())),
        Arc::new(Tickets::new(ctx.clone())),
        Arc::new(Feeds::new(ctx.clone())),
    ]
}

/// Runs the engine against a connected gateway until shutdown.
///
/// This is the embedding API: hosts construct their gateway adapter,
/// hand over [`GatewayParts`], and the engine owns the rest.
pub async fn run_serve(config: WardenConfig, gateway: GatewayParts) -> Result<(), WardenError> {
    init_tracing(&config.runtime.log_level);
    info!("starting warden serve");

    let GatewayParts { directory, sink, mut inbound } = gateway;

    // Storage.
    let db = Database::open(&config.storage.database_path).await?;
    let store: Arc<SqliteStore> = Arc::new(SqliteStore::new(db.clone()));
    let config_cache = Arc::new(TenantConfigCache::new(store.clone() as Arc<dyn Store>));

    // Runtime.
    let clock: Arc<dyn Clock> = Arc::new(SystemClock);
    let rate = Arc::new(RateWindow::new(config.rate_window.per_tenant_cap));
    let scheduler = Scheduler::new(clock.clone(), Some(db.clone()));
    let restored = scheduler.restore().await?;
    if restored > 0 {
        info!(restored, "scheduled tasks restored from storage");
    }

    let cancel = shutdown::install_signal_handler();
    let executor = Executor::new(
        config.executor.clone(),
        sink,
        Some(store.clone() as Arc<dyn Store>),
        clock.clone(),
        cancel.clone(),
    );

    // Features and dispatcher.
    let ctx = FeatureContext {
        store: store.clone(),
        config: config_cache,
        scheduler: scheduler.handle(),
        rate: rate.clone(),
        clock: clock.clone(),
        directory,
    };
    let dispatcher = Dispatcher::new(&config.runtime, build_features(&ctx), executor.handle());
    let dispatcher_handle = dispatcher.handle();
    let workers = dispatcher.spawn_workers(cancel.clone());

    // Scheduler pump.
    let pump = {
        let cancel = cancel.clone();
        let handle = dispatcher_handle.clone();
        tokio::spawn(async move {
            scheduler.run(Arc::new(handle), cancel).await;
        })
    };

    // Rate-window sweeper.
    let sweeper = {
        let cancel = cancel.clone();
        let rate = rate.clone();
        let clock = clock.clone();
        let interval = Duration::from_secs(config.rate_window.sweep_interval_secs);
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = tokio::time::sleep(interval) => {
                        let removed = rate.sweep(clock.now());
                        if removed > 0 {
                            info!(removed, "rate window sweep");
                        }
                    }
                }
            }
        })
    };

    // Inbound pump: gateway -> dispatcher.
    info!("engine running");
    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            event = inbound.recv() => match event {
                Some(event) => dispatcher_handle.submit(event).await,
                None => {
                    warn!("gateway event stream closed, shutting down");
                    cancel.cancel();
                    break;
                }
            },
        }
    }

    // Drain: workers finish their in-flight event, the executor finishes
    // in-flight actions, then storage checkpoints.
    for worker in workers {
        let _ = worker.await;
    }
    let _ = pump.await;
    let _ = sweeper.await;
    shutdown::drain_executor(&executor, Duration::from_secs(10)).await;
    db.close().await?;
    info!("warden serve stopped");
    Ok(())
}

/// CLI entry: live serve requires an embedded gateway adapter; `--replay`
/// drives the engine from a file instead.
pub async fn run_serve_cli(
    config: WardenConfig,
    replay: Option<String>,
) -> Result<(), WardenError> {
    let Some(path) = replay else {
        return Err(WardenError::Internal(
            "no gateway adapter is compiled into this binary; \
             run with --replay <events.jsonl> or embed the engine via serve::run_serve"
                .to_string(),
        ));
    };

    let events = read_replay_file(&path).await?;
    info!(count = events.len(), path = %path, "replaying events");

    let (tx, rx) = mpsc::channel(1024);
    let parts = GatewayParts {
        directory: Arc::new(ReplayDirectory),
        sink: Arc::new(LogSink),
        inbound: rx,
    };

    let feeder = tokio::spawn(async move {
        for event in events {
            if tx.send(event).await.is_err() {
                break;
            }
        }
        // Dropping the sender ends the stream; the engine drains and exits.
    });

    run_serve(config, parts).await?;
    let _ = feeder.await;
    Ok(())
}

async fn read_replay_file(path: &str) -> Result<Vec<Event>, WardenError> {
    let raw = tokio::fs::read_to_string(path)
        .await
        .map_err(|e| WardenError::Internal(format!("cannot read {path}: {e}")))?;
    let mut events = Vec::new();
    for (lineno, line) in raw.lines().enumerate() {
        if line.trim().is_empty() {
            continue;
        }
        match serde_json::from_str::<Event>(line) {
            Ok(event) => events.push(event),
            Err(e) => {
                error!(lineno = lineno + 1, error = %e, "skipping malformed replay line");
            }
        }
    }
    Ok(events)
}

/// Directory used under replay: every lookup answers "unknown".
/// Features that need upstream state degrade to no-ops.
struct ReplayDirectory;

#[async_trait]
impl GatewayDirectory for ReplayDirectory {
    async fn member(&self, _: TenantId, _: UserId) -> Result<Option<Member>, WardenError> {
        Ok(None)
    }

    async fn is_owner(&self, _: TenantId, _: UserId) -> Result<bool, WardenError> {
        Ok(false)
    }

    async fn tenant_name(&self, tenant: TenantId) -> Result<String, WardenError> {
        Ok(format!("tenant-{tenant}"))
    }

    async fn message(
        &self,
        _: TenantId,
        _: ChannelId,
        _: MessageId,
    ) -> Result<Option<MessageMeta>, WardenError> {
        Ok(None)
    }

    async fn reaction_count(
        &self,
        _: TenantId,
        _: ChannelId,
        _: MessageId,
        _: &warden_core::event::Emoji,
    ) -> Result<u32, WardenError> {
        Ok(0)
    }

    async fn has_reacted(
        &self,
        _: TenantId,
        _: ChannelId,
        _: MessageId,
        _: &warden_core::event::Emoji,
        _: UserId,
    ) -> Result<bool, WardenError> {
        Ok(false)
    }

    async fn channel_history(
        &self,
        _: TenantId,
        _: ChannelId,
        _: u32,
    ) -> Result<Vec<HistoryLine>, WardenError> {
        Ok(Vec::new())
    }

    async fn member_ids(&self, _: TenantId) -> Result<Vec<UserId>, WardenError> {
        Ok(Vec::new())
    }
}

/// Sink used under replay: actions are logged, never delivered.
struct LogSink;

#[async_trait]
impl ActionSink for LogSink {
    async fn perform(&self, envelope: &ActionEnvelope) -> Result<SinkOutcome, SinkError> {
        info!(
            tenant = %envelope.tenant,
            action = envelope.action.kind_label(),
            reason = %envelope.reason,
            key = %envelope.idempotency_key,
            "replay action"
        );
        Ok(SinkOutcome::default())
    }
}
