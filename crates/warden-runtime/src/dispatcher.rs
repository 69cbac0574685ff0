// SPDX-FileCopyrightText: 2026 Warden Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Event dispatcher with per-tenant cooperative ordering.
//!
//! One logical FIFO queue per tenant; a pool of workers dequeues at most one
//! tenant at a time, runs every subscribed feature against the event in
//! registration order, forwards the emitted actions to the executor, and
//! releases the tenant. Events for one tenant are therefore observed by all
//! features in arrival order, while distinct tenants proceed in parallel up
//! to the worker cap.
//!
//! Inboxes are bounded. Overflowing message-class events drop the oldest
//! queued event; admin-class events apply backpressure by default
//! (configurable to drop-oldest).

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use metrics::counter;
use tokio::sync::Notify;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use warden_config::model::RuntimeConfig;
use warden_config::OverflowPolicy;
use warden_core::{Event, EventClass, Feature, TenantId, WardenError};

use crate::executor::ExecutorHandle;
use crate::scheduler::TickSink;

#[derive(Default)]
struct DispatchState {
    queues: HashMap<TenantId, VecDeque<Event>>,
    /// Tenants with queued work, not currently held by a worker.
    ready: VecDeque<TenantId>,
    ready_set: HashSet<TenantId>,
    /// Tenants currently held by a worker.
    active: HashSet<TenantId>,
    dropped: u64,
}

struct DispatchInner {
    features: Vec<Arc<dyn Feature>>,
    executor: ExecutorHandle,
    inbox_capacity: usize,
    admin_overflow: OverflowPolicy,
    state: Mutex<DispatchState>,
    work_ready: Notify,
    space_freed: Notify,
}

/// Cloneable submission handle. The gateway adapter and the scheduler push
/// events through this.
#[derive(Clone)]
pub struct DispatcherHandle {
    inner: Arc<DispatchInner>,
}

/// The dispatcher; owns the worker pool.
pub struct Dispatcher {
    inner: Arc<DispatchInner>,
    worker_cap: usize,
}

impl Dispatcher {
    pub fn new(
        config: &RuntimeConfig,
        features: Vec<Arc<dyn Feature>>,
        executor: ExecutorHandle,
    ) -> Self {
        info!(
            features = features.len(),
            workers = config.worker_cap,
            inbox = config.inbox_capacity,
            "dispatcher created"
        );
        Self {
            inner: Arc::new(DispatchInner {
                features,
                executor,
                inbox_capacity: config.inbox_capacity,
                admin_overflow: config.admin_overflow,
                state: Mutex::new(DispatchState::default()),
                work_ready: Notify::new(),
                space_freed: Notify::new(),
            }),
            worker_cap: config.worker_cap,
        }
    }

    pub fn handle(&self) -> DispatcherHandle {
        DispatcherHandle { inner: Arc::clone(&self.inner) }
    }

    /// Spawn the worker pool. Workers run until the token is cancelled,
    /// finishing their in-flight event first.
    pub fn spawn_workers(&self, cancel: CancellationToken) -> Vec<tokio::task::JoinHandle<()>> {
        (0..self.worker_cap)
            .map(|worker_id| {
                let inner = Arc::clone(&self.inner);
                let cancel = cancel.clone();
                tokio::spawn(async move {
                    worker_loop(worker_id, inner, cancel).await;
                })
            })
            .collect()
    }

    /// Process every queued event to completion on the calling task.
    /// Test-only determinism: the harness submits events, then drains.
    pub async fn drain(&self) {
        loop {
            let Some((tenant, event)) = claim_next(&self.inner) else {
                return;
            };
            process_event(&self.inner, &event).await;
            release_tenant(&self.inner, tenant);
        }
    }

    /// Events dropped by overflow since startup.
    pub fn dropped_events(&self) -> u64 {
        self.inner.state.lock().expect("dispatcher poisoned").dropped
    }
}

impl DispatcherHandle {
    /// Enqueue an event for its tenant.
    ///
    /// Returns after the event is queued. For admin-class events under the
    /// `block` policy this awaits until inbox space frees up.
    pub async fn submit(&self, event: Event) {
        let tenant = event.tenant;
        let mut event = Some(event);
        loop {
            let enqueued = {
                let mut state = self.inner.state.lock().expect("dispatcher poisoned");
                let queue = state.queues.entry(tenant).or_default();
                if queue.len() >= self.inner.inbox_capacity {
                    let class = event.as_ref().expect("event present").class();
                    let drop_oldest = class == EventClass::Message
                        || self.inner.admin_overflow == OverflowPolicy::DropOldest;
                    if drop_oldest {
                        queue.pop_front();
                        queue.push_back(event.take().expect("event present"));
                        state.dropped += 1;
                        counter!("warden_dispatcher_dropped").increment(1);
                        warn!(tenant = %tenant, "inbox full, dropped oldest event");
                        mark_ready(&mut state, tenant);
                        true
                    } else {
                        false
                    }
                } else {
                    queue.push_back(event.take().expect("event present"));
                    mark_ready(&mut state, tenant);
                    true
                }
            };

            if enqueued {
                self.inner.work_ready.notify_one();
                return;
            }
            // Block policy: wait for a worker to free space, then retry.
            self.inner.space_freed.notified().await;
        }
    }

    /// Current queue depth for a tenant (test observability).
    pub fn queue_depth(&self, tenant: TenantId) -> usize {
        self.inner
            .state
            .lock()
            .expect("dispatcher poisoned")
            .queues
            .get(&tenant)
            .map(|q| q.len())
            .unwrap_or(0)
    }
}

#[async_trait]
impl TickSink for DispatcherHandle {
    async fn deliver(&self, event: Event) {
        self.submit(event).await;
    }
}

fn mark_ready(state: &mut DispatchState, tenant: TenantId) {
    if !state.active.contains(&tenant) && state.ready_set.insert(tenant) {
        state.ready.push_back(tenant);
    }
}

/// Claim the next `(tenant, event)` pair, marking the tenant active.
fn claim_next(inner: &DispatchInner) -> Option<(TenantId, Event)> {
    let mut state = inner.state.lock().expect("dispatcher poisoned");
    let tenant = state.ready.pop_front()?;
    state.ready_set.remove(&tenant);
    state.active.insert(tenant);
    let event = state
        .queues
        .get_mut(&tenant)
        .and_then(|q| q.pop_front())
        .expect("ready tenant has queued event");
    Some((tenant, event))
}

/// Release a tenant after processing; re-queue it if more work arrived.
fn release_tenant(inner: &DispatchInner, tenant: TenantId) {
    let more = {
        let mut state = inner.state.lock().expect("dispatcher poisoned");
        state.active.remove(&tenant);
        match state.queues.get(&tenant) {
            Some(q) if !q.is_empty() => {
                mark_ready(&mut state, tenant);
                true
            }
            _ => {
                state.queues.remove(&tenant);
                false
            }
        }
    };
    inner.space_freed.notify_waiters();
    if more {
        inner.work_ready.notify_one();
    }
}

async fn worker_loop(worker_id: usize, inner: Arc<DispatchInner>, cancel: CancellationToken) {
    debug!(worker_id, "dispatcher worker started");
    loop {
        match claim_next(&inner) {
            Some((tenant, event)) => {
                process_event(&inner, &event).await;
                release_tenant(&inner, tenant);
            }
            None => {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = inner.work_ready.notified() => {}
                }
            }
        }
        if cancel.is_cancelled() {
            break;
        }
    }
    debug!(worker_id, "dispatcher worker stopped");
}

/// Run every subscribed feature against the event, in registration order,
/// forwarding emitted actions to the executor. Feature errors are localized.
async fn process_event(inner: &DispatchInner, event: &Event) {
    let kind = event.kind();
    for feature in &inner.features {
        if !feature.subscriptions().contains(&kind) {
            continue;
        }
        let evaluation = feature.evaluate(event).await;

        if let Some(err) = &evaluation.error {
            match err {
                WardenError::ConfigCorrupt { .. } => {
                    // Feature stays silently disabled for the tenant; the
                    // operator log entry is the user-visible behavior.
                    error!(
                        tenant = %event.tenant,
                        feature = feature.name(),
                        error = %err,
                        "feature disabled: corrupt configuration"
                    );
                }
                WardenError::InternalInvariant { .. } => {
                    error!(
                        tenant = %event.tenant,
                        feature = feature.name(),
                        error = %err,
                        "feature invariant violation"
                    );
                }
                _ => {
                    warn!(
                        tenant = %event.tenant,
                        feature = feature.name(),
                        error = %err,
                        "feature evaluation failed"
                    );
                }
            }
        }

        // Actions from a single event reach the executor together, in
        // emission order, even when the evaluation also reported an error.
        for envelope in evaluation.actions {
            inner.executor.submit(envelope).await;
        }
    }
}
