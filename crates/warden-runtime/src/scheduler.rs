// SPDX-FileCopyrightText: 2026 Warden Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Timed task scheduler.
//!
//! A min-heap keyed by monotonic due time. A single pump task sleeps until
//! the head is due, then pops all due tasks and delivers them to the
//! dispatcher as synthetic `ScheduledTick` events. If the pump falls behind,
//! tasks fire in heap order regardless of lag; each tick carries both the
//! configured due time and the actual fire time.
//!
//! Tasks scheduled with a persist key are mirrored to the Store's tasks
//! table so a restart restores them; a past-due restore fires immediately.

use std::cmp::Reverse;
use std::collections::{BinaryHeap, HashMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::Notify;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use warden_core::{Clock, Event, EventBody, TaskFire, TaskId, TenantId, WardenError};
use warden_storage::{queries, Database, PersistentTask};

/// What to run and for whom.
#[derive(Debug, Clone)]
pub struct TaskSpec {
    pub tenant: TenantId,
    /// Feature-defined task kind, e.g. `"antiraid.release"`.
    pub kind: String,
    pub payload: serde_json::Value,
    /// Stable key for the Store mirror. `None` = in-memory only.
    /// Scheduling again with the same key replaces the pending task.
    pub persist_key: Option<String>,
}

impl TaskSpec {
    pub fn ephemeral(tenant: TenantId, kind: impl Into<String>, payload: serde_json::Value) -> Self {
        Self { tenant, kind: kind.into(), payload, persist_key: None }
    }

    pub fn persistent(
        tenant: TenantId,
        kind: impl Into<String>,
        payload: serde_json::Value,
        persist_key: impl Into<String>,
    ) -> Self {
        Self {
            tenant,
            kind: kind.into(),
            payload,
            persist_key: Some(persist_key.into()),
        }
    }
}

/// Receiver of fired ticks. Implemented by the dispatcher handle; tests
/// substitute a recorder.
#[async_trait]
pub trait TickSink: Send + Sync {
    async fn deliver(&self, event: Event);
}

struct HeapEntry {
    due: Instant,
    seq: u64,
    id: TaskId,
}

impl PartialEq for HeapEntry {
    fn eq(&self, other: &Self) -> bool {
        self.due == other.due && self.seq == other.seq
    }
}
impl Eq for HeapEntry {}
impl PartialOrd for HeapEntry {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}
impl Ord for HeapEntry {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.due.cmp(&other.due).then(self.seq.cmp(&other.seq))
    }
}

struct Pending {
    spec: TaskSpec,
    wall_due: DateTime<Utc>,
}

#[derive(Default)]
struct SchedState {
    heap: BinaryHeap<Reverse<HeapEntry>>,
    pending: HashMap<TaskId, Pending>,
    cancelled: HashSet<TaskId>,
    /// persist key -> pending id, so re-scheduling replaces.
    by_key: HashMap<String, TaskId>,
}

struct SchedulerInner {
    clock: Arc<dyn Clock>,
    state: Mutex<SchedState>,
    notify: Notify,
    seq: AtomicU64,
    next_id: AtomicU64,
    /// Mirror for persistent tasks; absent in lightweight tests.
    db: Option<Database>,
}

/// Cloneable handle for registering and cancelling tasks.
#[derive(Clone)]
pub struct SchedulerHandle {
    inner: Arc<SchedulerInner>,
}

/// The scheduler itself; owns the pump loop.
pub struct Scheduler {
    inner: Arc<SchedulerInner>,
}

impl Scheduler {
    pub fn new(clock: Arc<dyn Clock>, db: Option<Database>) -> Self {
        Self {
            inner: Arc::new(SchedulerInner {
                clock,
                state: Mutex::new(SchedState::default()),
                notify: Notify::new(),
                seq: AtomicU64::new(0),
                next_id: AtomicU64::new(1),
                db,
            }),
        }
    }

    pub fn handle(&self) -> SchedulerHandle {
        SchedulerHandle { inner: Arc::clone(&self.inner) }
    }

    /// Restore mirrored tasks from the Store. Call once at startup, before
    /// the pump runs. Past-due tasks become due immediately.
    pub async fn restore(&self) -> Result<usize, WardenError> {
        let Some(db) = self.inner.db.clone() else {
            return Ok(0);
        };
        let tasks = queries::tasks::load_all(&db).await?;
        let count = tasks.len();
        for task in tasks {
            let payload: serde_json::Value =
                serde_json::from_str(&task.payload).unwrap_or(serde_json::Value::Null);
            let spec = TaskSpec {
                tenant: task.tenant,
                kind: task.kind,
                payload,
                persist_key: Some(task.task_key),
            };
            // Mirror row already exists; schedule in memory only.
            self.handle().schedule_in_memory(task.due_at, spec);
        }
        if count > 0 {
            info!(count, "restored persistent scheduled tasks");
        }
        Ok(count)
    }

    /// Deliver every currently-due task to `sink`, in heap order.
    /// Returns the number fired. The pump calls this after each sleep;
    /// tests with a manual clock call it directly.
    pub async fn run_due(&self, sink: &dyn TickSink) -> usize {
        self.inner.run_due(sink).await
    }

    /// Pump loop: sleep until the head is due, fire, repeat. Runs until the
    /// token is cancelled.
    pub async fn run(&self, sink: Arc<dyn TickSink>, cancel: CancellationToken) {
        info!("scheduler pump started");
        loop {
            let sleep_for = {
                let state = self.inner.state.lock().expect("scheduler poisoned");
                let now = self.inner.clock.now();
                match state.heap.peek() {
                    Some(Reverse(head)) => head.due.saturating_duration_since(now),
                    // Nothing pending: park until a schedule call notifies.
                    None => Duration::from_secs(3600),
                }
            };

            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = self.inner.notify.notified() => continue,
                _ = tokio::time::sleep(sleep_for) => {
                    self.inner.run_due(sink.as_ref()).await;
                }
            }
        }
        info!("scheduler pump stopped");
    }
}

impl SchedulerHandle {
    /// Schedule a task at an absolute wall-clock due time.
    pub async fn at(&self, due: DateTime<Utc>, spec: TaskSpec) -> Result<TaskId, WardenError> {
        if let Some(key) = &spec.persist_key {
            let task = PersistentTask {
                task_key: key.clone(),
                tenant: spec.tenant,
                kind: spec.kind.clone(),
                payload: spec.payload.to_string(),
                due_at: due,
            };
            if let Some(db) = &self.inner.db {
                queries::tasks::upsert(db, &task).await?;
            }
        }
        Ok(self.schedule_in_memory(due, spec))
    }

    /// Schedule a task `delta` from now.
    pub async fn after(&self, delta: Duration, spec: TaskSpec) -> Result<TaskId, WardenError> {
        let due = self.inner.clock.wall()
            + chrono::Duration::from_std(delta)
                .map_err(|e| WardenError::Internal(format!("task delay out of range: {e}")))?;
        self.at(due, spec).await
    }

    /// Cancel a pending task. A cancelled task never fires. Returns whether
    /// the task was still pending.
    pub async fn cancel(&self, id: TaskId) -> Result<bool, WardenError> {
        let persist_key = {
            let mut state = self.inner.state.lock().expect("scheduler poisoned");
            match state.pending.remove(&id) {
                Some(pending) => {
                    state.cancelled.insert(id);
                    if let Some(key) = &pending.spec.persist_key {
                        state.by_key.remove(key);
                    }
                    pending.spec.persist_key
                }
                None => return Ok(false),
            }
        };
        if let (Some(key), Some(db)) = (persist_key, &self.inner.db) {
            queries::tasks::remove(db, &key).await?;
        }
        debug!(task = %id, "scheduled task cancelled");
        Ok(true)
    }

    /// Number of tasks pending (test observability).
    pub fn pending_len(&self) -> usize {
        self.inner.state.lock().expect("scheduler poisoned").pending.len()
    }

    fn schedule_in_memory(&self, due: DateTime<Utc>, spec: TaskSpec) -> TaskId {
        let id = TaskId(self.inner.next_id.fetch_add(1, Ordering::Relaxed));
        let seq = self.inner.seq.fetch_add(1, Ordering::Relaxed);

        // Wall due -> monotonic due, clamped to now for past-due restores.
        let now = self.inner.clock.now();
        let wall_now = self.inner.clock.wall();
        let due_instant = match (due - wall_now).to_std() {
            Ok(delta) => now + delta,
            Err(_) => now,
        };

        let mut state = self.inner.state.lock().expect("scheduler poisoned");
        // Same persist key replaces the previous pending task.
        if let Some(key) = &spec.persist_key
            && let Some(old) = state.by_key.insert(key.clone(), id)
        {
            state.pending.remove(&old);
            state.cancelled.insert(old);
        }
        state.pending.insert(id, Pending { spec, wall_due: due });
        state.heap.push(Reverse(HeapEntry { due: due_instant, seq, id }));
        drop(state);

        self.inner.notify.notify_one();
        id
    }
}

impl SchedulerInner {
    async fn run_due(&self, sink: &dyn TickSink) -> usize {
        let mut fired = 0;
        loop {
            let (id, pending) = {
                let mut state = self.state.lock().expect("scheduler poisoned");
                let now = self.clock.now();
                let Some(Reverse(head)) = state.heap.peek() else { break };
                if head.due > now {
                    break;
                }
                let Reverse(entry) = state.heap.pop().expect("peeked entry");
                if state.cancelled.remove(&entry.id) {
                    continue;
                }
                let Some(pending) = state.pending.remove(&entry.id) else {
                    continue;
                };
                if let Some(key) = &pending.spec.persist_key {
                    state.by_key.remove(key);
                }
                (entry.id, pending)
            };

            let fired_at = self.clock.wall();
            if fired_at - pending.wall_due > chrono::Duration::seconds(5) {
                warn!(
                    task = %id,
                    kind = %pending.spec.kind,
                    lag_secs = (fired_at - pending.wall_due).num_seconds(),
                    "scheduled task fired late"
                );
            }

            // Mirror row removed before delivery: a fire is consumed even if
            // the process dies mid-delivery (at-most-once restore).
            if let (Some(key), Some(db)) = (&pending.spec.persist_key, &self.db)
                && let Err(e) = queries::tasks::remove(db, key).await
            {
                warn!(task = %id, error = %e, "failed to clear task mirror");
            }

            let event = Event::new(
                pending.spec.tenant,
                EventBody::ScheduledTick {
                    task: TaskFire {
                        id,
                        kind: pending.spec.kind,
                        payload: pending.spec.payload,
                        due: pending.wall_due,
                        fired: fired_at,
                    },
                },
            );
            sink.deliver(event).await;
            fired += 1;
        }
        fired
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex as StdMutex;

    /// Deterministic manual clock for scheduler tests.
    struct TestClock {
        base: Instant,
        wall_base: DateTime<Utc>,
        offset: StdMutex<Duration>,
    }

    impl TestClock {
        fn new() -> Self {
            Self {
                base: Instant::now(),
                wall_base: Utc::now(),
                offset: StdMutex::new(Duration::ZERO),
            }
        }

        fn advance(&self, d: Duration) {
            *self.offset.lock().unwrap() += d;
        }
    }

    impl Clock for TestClock {
        fn now(&self) -> Instant {
            self.base + *self.offset.lock().unwrap()
        }

        fn wall(&self) -> DateTime<Utc> {
            self.wall_base + chrono::Duration::from_std(*self.offset.lock().unwrap()).unwrap()
        }
    }

    #[derive(Default)]
    struct RecordingSink {
        fires: StdMutex<Vec<Event>>,
    }

    #[async_trait]
    impl TickSink for RecordingSink {
        async fn deliver(&self, event: Event) {
            self.fires.lock().unwrap().push(event);
        }
    }

    fn spec(kind: &str) -> TaskSpec {
        TaskSpec::ephemeral(TenantId(1), kind, serde_json::json!({}))
    }

    #[tokio::test]
    async fn task_fires_when_due() {
        let clock = Arc::new(TestClock::new());
        let scheduler = Scheduler::new(clock.clone(), None);
        let sink = RecordingSink::default();

        scheduler
            .handle()
            .after(Duration::from_secs(60), spec("test.fire"))
            .await
            .unwrap();

        assert_eq!(scheduler.run_due(&sink).await, 0, "not due yet");

        clock.advance(Duration::from_secs(61));
        assert_eq!(scheduler.run_due(&sink).await, 1);

        let fires = sink.fires.lock().unwrap();
        let EventBody::ScheduledTick { task } = &fires[0].body else {
            panic!("expected tick");
        };
        assert_eq!(task.kind, "test.fire");
        assert!(task.fired >= task.due);
    }

    #[tokio::test]
    async fn cancelled_task_never_fires() {
        let clock = Arc::new(TestClock::new());
        let scheduler = Scheduler::new(clock.clone(), None);
        let sink = RecordingSink::default();

        let id = scheduler
            .handle()
            .after(Duration::from_secs(10), spec("test.cancel"))
            .await
            .unwrap();
        assert!(scheduler.handle().cancel(id).await.unwrap());
        assert!(!scheduler.handle().cancel(id).await.unwrap(), "double cancel");

        clock.advance(Duration::from_secs(20));
        assert_eq!(scheduler.run_due(&sink).await, 0);
    }

    #[tokio::test]
    async fn lagging_tasks_fire_in_heap_order() {
        let clock = Arc::new(TestClock::new());
        let scheduler = Scheduler::new(clock.clone(), None);
        let sink = RecordingSink::default();
        let handle = scheduler.handle();

        handle.after(Duration::from_secs(30), spec("second")).await.unwrap();
        handle.after(Duration::from_secs(10), spec("first")).await.unwrap();
        handle.after(Duration::from_secs(20), spec("middle")).await.unwrap();

        // Everything is overdue at once; order must follow due times.
        clock.advance(Duration::from_secs(100));
        assert_eq!(scheduler.run_due(&sink).await, 3);

        let fires = sink.fires.lock().unwrap();
        let kinds: Vec<String> = fires
            .iter()
            .map(|e| match &e.body {
                EventBody::ScheduledTick { task } => task.kind.clone(),
                _ => unreachable!(),
            })
            .collect();
        assert_eq!(kinds, vec!["first", "middle", "second"]);
    }

    #[tokio::test]
    async fn same_persist_key_replaces_pending_task() {
        let clock = Arc::new(TestClock::new());
        let scheduler = Scheduler::new(clock.clone(), None);
        let sink = RecordingSink::default();
        let handle = scheduler.handle();

        let spec1 = TaskSpec::persistent(
            TenantId(1),
            "bumper.remind",
            serde_json::json!({"n": 1}),
            "bumper.remind:1",
        );
        let spec2 = TaskSpec::persistent(
            TenantId(1),
            "bumper.remind",
            serde_json::json!({"n": 2}),
            "bumper.remind:1",
        );

        handle.after(Duration::from_secs(10), spec1).await.unwrap();
        handle.after(Duration::from_secs(20), spec2).await.unwrap();
        assert_eq!(handle.pending_len(), 1);

        clock.advance(Duration::from_secs(30));
        assert_eq!(scheduler.run_due(&sink).await, 1);

        let fires = sink.fires.lock().unwrap();
        let EventBody::ScheduledTick { task } = &fires[0].body else {
            panic!("expected tick");
        };
        assert_eq!(task.payload["n"], 2);
    }

    #[tokio::test]
    async fn persistent_tasks_survive_restart() {
        let dir = tempfile::tempdir().unwrap();
        let db = Database::open(dir.path().join("sched.db").to_str().unwrap())
            .await
            .unwrap();

        let clock = Arc::new(TestClock::new());
        let scheduler = Scheduler::new(clock.clone(), Some(db.clone()));
        scheduler
            .handle()
            .after(
                Duration::from_secs(7200),
                TaskSpec::persistent(
                    TenantId(5),
                    "bumper.remind",
                    serde_json::json!({"channel": 9}),
                    "bumper.remind:5",
                ),
            )
            .await
            .unwrap();

        // "Restart": a fresh scheduler over the same database.
        let clock2 = Arc::new(TestClock::new());
        let restarted = Scheduler::new(clock2.clone(), Some(db.clone()));
        assert_eq!(restarted.restore().await.unwrap(), 1);

        let sink = RecordingSink::default();
        clock2.advance(Duration::from_secs(7201));
        assert_eq!(restarted.run_due(&sink).await, 1);

        // Fired task clears its mirror row.
        assert!(queries::tasks::load_all(&db).await.unwrap().is_empty());
        db.close().await.unwrap();
    }

    #[tokio::test]
    async fn past_due_restore_fires_immediately() {
        let dir = tempfile::tempdir().unwrap();
        let db = Database::open(dir.path().join("pastdue.db").to_str().unwrap())
            .await
            .unwrap();

        queries::tasks::upsert(
            &db,
            &PersistentTask {
                task_key: "antiraid.release:3".into(),
                tenant: TenantId(3),
                kind: "antiraid.release".into(),
                payload: "{}".into(),
                due_at: Utc::now() - chrono::Duration::minutes(10),
            },
        )
        .await
        .unwrap();

        let clock = Arc::new(TestClock::new());
        let scheduler = Scheduler::new(clock.clone(), Some(db.clone()));
        scheduler.restore().await.unwrap();

        let sink = RecordingSink::default();
        assert_eq!(scheduler.run_due(&sink).await, 1);
        db.close().await.unwrap();
    }
}
