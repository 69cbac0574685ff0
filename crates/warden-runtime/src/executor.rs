// SPDX-FileCopyrightText: 2026 Warden Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Outbound action executor.
//!
//! Consumes action envelopes, grouped by `(tenant, endpoint_class)` into
//! serial lanes so upstream per-route rate limits are respected. Transient
//! failures retry with exponential backoff and jitter, capped at a
//! configurable attempt count; permanent failures dead-letter with a reason.
//! Each envelope carries a stable idempotency key; re-submission within the
//! TTL is dropped before it reaches a lane.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use metrics::counter;
use rand::Rng;
use tokio::sync::{mpsc, Notify};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use warden_config::model::ExecutorConfig;
use warden_core::{
    Action, ActionEnvelope, ActionSink, ChannelId, Clock, EndpointClass, SinkError, SinkOutcome,
    Store, TenantId,
};

const LANE_BUFFER: usize = 256;

/// A terminally failed envelope and why.
#[derive(Debug, Clone)]
pub struct DeadLetter {
    pub envelope: ActionEnvelope,
    pub reason: String,
    pub at: DateTime<Utc>,
}

struct ExecInner {
    sink: Arc<dyn ActionSink>,
    store: Option<Arc<dyn Store>>,
    clock: Arc<dyn Clock>,
    config: ExecutorConfig,
    lanes: tokio::sync::Mutex<HashMap<(TenantId, EndpointClass), mpsc::Sender<ActionEnvelope>>>,
    /// idempotency key -> first-seen instant.
    seen: Mutex<HashMap<String, Instant>>,
    dead: Mutex<Vec<DeadLetter>>,
    in_flight: AtomicUsize,
    idle: Notify,
    cancel: CancellationToken,
}

/// Cloneable submission handle used by the dispatcher.
#[derive(Clone)]
pub struct ExecutorHandle {
    inner: Arc<ExecInner>,
}

/// The executor; owns the delivery lanes.
pub struct Executor {
    inner: Arc<ExecInner>,
}

impl Executor {
    pub fn new(
        config: ExecutorConfig,
        sink: Arc<dyn ActionSink>,
        store: Option<Arc<dyn Store>>,
        clock: Arc<dyn Clock>,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            inner: Arc::new(ExecInner {
                sink,
                store,
                clock,
                config,
                lanes: tokio::sync::Mutex::new(HashMap::new()),
                seen: Mutex::new(HashMap::new()),
                dead: Mutex::new(Vec::new()),
                in_flight: AtomicUsize::new(0),
                idle: Notify::new(),
                cancel,
            }),
        }
    }

    pub fn handle(&self) -> ExecutorHandle {
        ExecutorHandle { inner: Arc::clone(&self.inner) }
    }

    /// Dead letters accumulated since startup.
    pub fn dead_letters(&self) -> Vec<DeadLetter> {
        self.inner.dead.lock().expect("executor poisoned").clone()
    }

    /// Wait until every submitted envelope reached a terminal state.
    pub async fn drain(&self) {
        loop {
            // Register interest before checking, so a decrement between the
            // check and the await cannot be missed.
            let notified = self.inner.idle.notified();
            if self.inner.in_flight.load(Ordering::SeqCst) == 0 {
                return;
            }
            notified.await;
        }
    }
}

impl ExecutorHandle {
    /// Submit an envelope for delivery. Duplicate idempotency keys within
    /// the TTL are dropped here.
    pub async fn submit(&self, envelope: ActionEnvelope) {
        if self.is_duplicate(&envelope) {
            debug!(
                tenant = %envelope.tenant,
                key = %envelope.idempotency_key,
                "duplicate action dropped"
            );
            counter!("warden_executor_deduped").increment(1);
            return;
        }

        self.inner.in_flight.fetch_add(1, Ordering::SeqCst);

        let lane_key = (envelope.tenant, envelope.endpoint_class());
        let sender = {
            let mut lanes = self.inner.lanes.lock().await;
            match lanes.get(&lane_key) {
                Some(sender) => sender.clone(),
                None => {
                    let (tx, rx) = mpsc::channel(LANE_BUFFER);
                    let inner = Arc::clone(&self.inner);
                    tokio::spawn(async move {
                        lane_loop(inner, lane_key, rx).await;
                    });
                    lanes.insert(lane_key, tx.clone());
                    tx
                }
            }
        };

        if sender.send(envelope).await.is_err() {
            // Lane stopped during shutdown.
            self.inner.in_flight.fetch_sub(1, Ordering::SeqCst);
            self.inner.idle.notify_waiters();
        }
    }

    /// Check and record the idempotency key; purges expired keys as it goes.
    fn is_duplicate(&self, envelope: &ActionEnvelope) -> bool {
        let ttl = Duration::from_secs(self.inner.config.idempotency_ttl_secs);
        let now = self.inner.clock.now();
        let mut seen = self.inner.seen.lock().expect("executor poisoned");
        seen.retain(|_, &mut first| now.duration_since(first) < ttl);
        if seen.contains_key(&envelope.idempotency_key) {
            return true;
        }
        seen.insert(envelope.idempotency_key.clone(), now);
        false
    }
}

async fn lane_loop(
    inner: Arc<ExecInner>,
    lane: (TenantId, EndpointClass),
    mut rx: mpsc::Receiver<ActionEnvelope>,
) {
    debug!(tenant = %lane.0, endpoint = %lane.1, "executor lane started");
    loop {
        let envelope = tokio::select! {
            _ = inner.cancel.cancelled() => break,
            received = rx.recv() => match received {
                Some(envelope) => envelope,
                None => break,
            },
        };
        deliver(&inner, envelope).await;
        inner.in_flight.fetch_sub(1, Ordering::SeqCst);
        inner.idle.notify_waiters();
    }
    debug!(tenant = %lane.0, endpoint = %lane.1, "executor lane stopped");
}

/// Drive one envelope to a terminal state: success, dead-letter, or
/// abandoned by shutdown.
async fn deliver(inner: &Arc<ExecInner>, mut envelope: ActionEnvelope) {
    let deadline = Duration::from_secs(inner.config.deadline_secs);

    loop {
        envelope.attempt += 1;

        let result = tokio::time::timeout(deadline, inner.sink.perform(&envelope)).await;
        let failure = match result {
            Ok(Ok(outcome)) => {
                counter!("warden_executor_delivered").increment(1);
                apply_completion(inner, &envelope, &outcome).await;
                return;
            }
            Ok(Err(SinkError::Permanent { detail })) => {
                dead_letter(inner, envelope, format!("permanent failure: {detail}")).await;
                return;
            }
            Ok(Err(SinkError::Transient { detail, retry_after })) => (detail, retry_after),
            Err(_) => ("delivery deadline exceeded".to_string(), None),
        };
        let (detail, retry_after) = failure;

        if envelope.attempt >= inner.config.max_attempts {
            dead_letter(
                inner,
                envelope,
                format!("retries exhausted after transient failures: {detail}"),
            )
            .await;
            return;
        }

        let backoff = retry_after.unwrap_or_else(|| backoff_for(&inner.config, envelope.attempt));
        counter!("warden_executor_retries").increment(1);
        warn!(
            tenant = %envelope.tenant,
            action = envelope.action.kind_label(),
            attempt = envelope.attempt,
            backoff_ms = backoff.as_millis() as u64,
            detail = %detail,
            "transient delivery failure, backing off"
        );

        tokio::select! {
            _ = inner.cancel.cancelled() => return,
            _ = tokio::time::sleep(backoff) => {}
        }
    }
}

/// Exponential backoff with jitter: `base * 2^(attempt-1)` capped at the
/// configured ceiling, plus up to half the base of random jitter.
fn backoff_for(config: &ExecutorConfig, attempt: u32) -> Duration {
    let base = config.base_backoff_ms;
    let exp = base.saturating_mul(1u64 << (attempt - 1).min(16));
    let capped = exp.min(config.max_backoff_ms);
    let jitter = rand::thread_rng().gen_range(0..=base / 2);
    Duration::from_millis(capped + jitter)
}

async fn dead_letter(inner: &Arc<ExecInner>, envelope: ActionEnvelope, reason: String) {
    error!(
        tenant = %envelope.tenant,
        action = envelope.action.kind_label(),
        key = %envelope.idempotency_key,
        reason = %reason,
        "action dead-lettered"
    );
    counter!("warden_executor_dead_letters").increment(1);

    let notice = inner.config.notice_channel.map(ChannelId).map(|channel| {
        ActionEnvelope::new(
            envelope.tenant,
            Action::SendMessage {
                channel,
                content: format!(
                    "action `{}` failed permanently: {reason}",
                    envelope.action.kind_label()
                ),
                embed: None,
                components: Vec::new(),
                ephemeral: false,
            },
            "executor dead-letter notice",
            format!("executor:notice:{}", envelope.id),
        )
    });

    inner.dead.lock().expect("executor poisoned").push(DeadLetter {
        envelope,
        reason,
        at: inner.clock.wall(),
    });

    // Best-effort operator notice, outside retry machinery.
    if let Some(notice) = notice
        && let Err(e) = inner.sink.perform(&notice).await
    {
        warn!(error = %e, "dead-letter notice delivery failed");
    }
}

/// Merge created upstream ids into the Store record named by the envelope's
/// completion, so features that must persist a created message/channel id
/// (board entries, tickets) get it without blocking on outbound I/O.
async fn apply_completion(inner: &Arc<ExecInner>, envelope: &ActionEnvelope, outcome: &SinkOutcome) {
    let Some(completion) = &envelope.completion else {
        return;
    };
    let Some(store) = &inner.store else {
        return;
    };

    let raw = store
        .get(envelope.tenant, &completion.namespace, &completion.key)
        .await
        .ok()
        .flatten();
    let mut value: serde_json::Value = raw
        .and_then(|r| serde_json::from_str(&r).ok())
        .unwrap_or_else(|| serde_json::json!({}));

    if let (Some(field), Some(message_id)) = (&completion.message_field, outcome.message_id) {
        value[field.as_str()] = serde_json::json!(message_id.0);
    }
    if let (Some(field), Some(channel_id)) = (&completion.channel_field, outcome.channel_id) {
        value[field.as_str()] = serde_json::json!(channel_id.0);
    }

    if let Err(e) = store
        .put(envelope.tenant, &completion.namespace, &completion.key, &value.to_string())
        .await
    {
        error!(
            tenant = %envelope.tenant,
            namespace = %completion.namespace,
            key = %completion.key,
            error = %e,
            "completion record write failed"
        );
    } else {
        info!(
            tenant = %envelope.tenant,
            namespace = %completion.namespace,
            key = %completion.key,
            "completion ids recorded"
        );
    }
}


#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;

    use warden_core::{Action, MessageId, UserId};

    use crate::clock::SystemClock;
    use test_support::RecordingSink;

    fn fast_config() -> ExecutorConfig {
        ExecutorConfig {
            max_attempts: 3,
            base_backoff_ms: 2,
            max_backoff_ms: 10,
            deadline_secs: 5,
            idempotency_ttl_secs: 600,
            notice_channel: None,
        }
    }

    fn executor_with(sink: Arc<dyn ActionSink>, config: ExecutorConfig) -> Executor {
        Executor::new(config, sink, None, Arc::new(SystemClock), CancellationToken::new())
    }

    fn ban_envelope(key: &str) -> ActionEnvelope {
        ActionEnvelope::new(
            TenantId(1),
            Action::BanMember { user: UserId(5) },
            "test ban",
            key,
        )
    }

    #[tokio::test]
    async fn delivers_and_preserves_submission_order() {
        let sink = Arc::new(RecordingSink::default());
        let executor = executor_with(sink.clone(), fast_config());
        let handle = executor.handle();

        for n in 0..4 {
            handle.submit(ban_envelope(&format!("ban:{n}"))).await;
        }
        executor.drain().await;

        let performed = sink.performed();
        assert_eq!(performed.len(), 4);
        let keys: Vec<_> = performed.iter().map(|e| e.idempotency_key.clone()).collect();
        assert_eq!(keys, vec!["ban:0", "ban:1", "ban:2", "ban:3"]);
    }

    #[tokio::test]
    async fn duplicate_idempotency_key_dropped_within_ttl() {
        let sink = Arc::new(RecordingSink::default());
        let executor = executor_with(sink.clone(), fast_config());
        let handle = executor.handle();

        handle.submit(ban_envelope("same-key")).await;
        handle.submit(ban_envelope("same-key")).await;
        executor.drain().await;

        assert_eq!(sink.performed().len(), 1);
    }

    /// Sink that fails transiently N times, then succeeds.
    struct FlakySink {
        failures_left: Mutex<u32>,
        performed: Mutex<Vec<u32>>,
    }

    #[async_trait]
    impl ActionSink for FlakySink {
        async fn perform(&self, envelope: &ActionEnvelope) -> Result<SinkOutcome, SinkError> {
            let mut left = self.failures_left.lock().unwrap();
            if *left > 0 {
                *left -= 1;
                return Err(SinkError::Transient { detail: "503".into(), retry_after: None });
            }
            self.performed.lock().unwrap().push(envelope.attempt);
            Ok(SinkOutcome::default())
        }
    }

    #[tokio::test]
    async fn transient_failures_retry_until_success() {
        let sink = Arc::new(FlakySink {
            failures_left: Mutex::new(2),
            performed: Mutex::new(Vec::new()),
        });
        let executor = executor_with(sink.clone(), fast_config());

        executor.handle().submit(ban_envelope("flaky")).await;
        executor.drain().await;

        // Two failures then success on the third attempt.
        assert_eq!(*sink.performed.lock().unwrap(), vec![3]);
        assert!(executor.dead_letters().is_empty());
    }

    #[tokio::test]
    async fn transient_failures_exhaust_into_dead_letter() {
        let sink = Arc::new(FlakySink {
            failures_left: Mutex::new(99),
            performed: Mutex::new(Vec::new()),
        });
        let executor = executor_with(sink.clone(), fast_config());

        executor.handle().submit(ban_envelope("doomed")).await;
        executor.drain().await;

        let dead = executor.dead_letters();
        assert_eq!(dead.len(), 1);
        assert!(dead[0].reason.contains("retries exhausted"));
        assert_eq!(dead[0].envelope.attempt, 3);
    }

    /// Sink that always fails permanently.
    struct DenyingSink;

    #[async_trait]
    impl ActionSink for DenyingSink {
        async fn perform(&self, _envelope: &ActionEnvelope) -> Result<SinkOutcome, SinkError> {
            Err(SinkError::Permanent { detail: "missing permissions".into() })
        }
    }

    #[tokio::test]
    async fn permanent_failure_dead_letters_without_retry() {
        let executor = executor_with(Arc::new(DenyingSink), fast_config());

        executor.handle().submit(ban_envelope("denied")).await;
        executor.drain().await;

        let dead = executor.dead_letters();
        assert_eq!(dead.len(), 1);
        assert_eq!(dead[0].envelope.attempt, 1, "no retry on permanent failure");
        assert!(dead[0].reason.contains("missing permissions"));
    }

    /// Sink that returns a created message id.
    struct CreatingSink;

    #[async_trait]
    impl ActionSink for CreatingSink {
        async fn perform(&self, _envelope: &ActionEnvelope) -> Result<SinkOutcome, SinkError> {
            Ok(SinkOutcome { message_id: Some(MessageId(777)), channel_id: None })
        }
    }

    #[tokio::test]
    async fn completion_writes_created_ids_into_store() {
        use warden_storage::{Database, SqliteStore};

        let dir = tempfile::tempdir().unwrap();
        let db = Database::open(dir.path().join("exec.db").to_str().unwrap())
            .await
            .unwrap();
        let store: Arc<dyn Store> = Arc::new(SqliteStore::new(db));

        // Pre-existing entry record, as a board feature would write it.
        store
            .put(TenantId(1), "starboard.entries", "42", r#"{"star_count":3}"#)
            .await
            .unwrap();

        let executor = Executor::new(
            fast_config(),
            Arc::new(CreatingSink),
            Some(store.clone()),
            Arc::new(SystemClock),
            CancellationToken::new(),
        );

        let envelope = ActionEnvelope::new(
            TenantId(1),
            Action::SendMessage {
                channel: ChannelId(10),
                content: "board post".into(),
                embed: None,
                components: Vec::new(),
                ephemeral: false,
            },
            "board entry create",
            "board:create:1:42",
        )
        .with_completion(warden_core::Completion {
            namespace: "starboard.entries".into(),
            key: "42".into(),
            message_field: Some("board_message_id".into()),
            channel_field: None,
        });

        executor.handle().submit(envelope).await;
        executor.drain().await;

        let raw = store.get(TenantId(1), "starboard.entries", "42").await.unwrap().unwrap();
        let value: serde_json::Value = serde_json::from_str(&raw).unwrap();
        assert_eq!(value["board_message_id"], 777);
        assert_eq!(value["star_count"], 3, "existing fields preserved");
    }

    #[tokio::test]
    async fn backoff_grows_and_caps() {
        let config = ExecutorConfig {
            base_backoff_ms: 100,
            max_backoff_ms: 1000,
            ..fast_config()
        };
        let b1 = backoff_for(&config, 1).as_millis() as u64;
        let b3 = backoff_for(&config, 3).as_millis() as u64;
        let b10 = backoff_for(&config, 10).as_millis() as u64;

        assert!((100..=150).contains(&b1));
        assert!((400..=450).contains(&b3));
        assert!((1000..=1050).contains(&b10), "capped at max plus jitter");
    }
}
