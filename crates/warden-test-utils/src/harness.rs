// SPDX-FileCopyrightText: 2026 Warden Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Test harness for end-to-end integration testing.
//!
//! `TestHarness` assembles a complete engine stack over a temp SQLite
//! database with a manual clock, mock directory, and recording sink.
//! Features are supplied by the test through a constructor closure that
//! receives the shared subsystem handles, then events are driven through
//! the real dispatcher/scheduler/executor with `process()`.

use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;

use warden_config::model::{ExecutorConfig, RuntimeConfig};
use warden_core::{ActionEnvelope, Event, Feature, Store};
use warden_runtime::{
    DeadLetter, Dispatcher, DispatcherHandle, Executor, RateWindow, Scheduler, SchedulerHandle,
};
use warden_storage::{Database, SqliteStore, TenantConfigCache};

use crate::manual_clock::ManualClock;
use crate::mock_gateway::{MockDirectory, RecordingSink};

/// The shared subsystem handles a feature constructor needs.
pub struct HarnessCore {
    pub clock: Arc<ManualClock>,
    pub store: Arc<SqliteStore>,
    pub config_cache: Arc<TenantConfigCache>,
    pub directory: Arc<MockDirectory>,
    pub rate: Arc<RateWindow>,
    pub scheduler: SchedulerHandle,
}

/// Builder for creating test environments with configurable options.
pub struct TestHarnessBuilder {
    executor_config: ExecutorConfig,
    runtime_config: RuntimeConfig,
    per_tenant_cap: usize,
}

impl TestHarnessBuilder {
    fn new() -> Self {
        Self {
            executor_config: ExecutorConfig {
                // Tight backoffs keep retry tests fast.
                base_backoff_ms: 2,
                max_backoff_ms: 20,
                ..ExecutorConfig::default()
            },
            runtime_config: RuntimeConfig::default(),
            per_tenant_cap: 10_000,
        }
    }

    pub fn with_executor_config(mut self, config: ExecutorConfig) -> Self {
        self.executor_config = config;
        self
    }

    pub fn with_runtime_config(mut self, config: RuntimeConfig) -> Self {
        self.runtime_config = config;
        self
    }

    pub fn with_rate_window_cap(mut self, cap: usize) -> Self {
        self.per_tenant_cap = cap;
        self
    }

    /// Build the harness. `make_features` receives the shared handles and
    /// returns the feature list, in registration order.
    pub async fn build<F>(self, make_features: F) -> TestHarness
    where
        F: FnOnce(&HarnessCore) -> Vec<Arc<dyn Feature>>,
    {
        let temp_dir = tempfile::TempDir::new().expect("temp dir");
        let db_path = temp_dir.path().join("harness.db");
        let db = Database::open(db_path.to_str().unwrap())
            .await
            .expect("open harness database");

        let clock = Arc::new(ManualClock::new());
        let store = Arc::new(SqliteStore::new(db.clone()));
        let config_cache = Arc::new(TenantConfigCache::new(store.clone()));
        let directory = Arc::new(MockDirectory::new());
        let rate = Arc::new(RateWindow::new(self.per_tenant_cap));

        let scheduler = Scheduler::new(clock.clone(), Some(db));
        let core = HarnessCore {
            clock: clock.clone(),
            store: store.clone(),
            config_cache: config_cache.clone(),
            directory: directory.clone(),
            rate: rate.clone(),
            scheduler: scheduler.handle(),
        };

        let features = make_features(&core);

        let sink = Arc::new(RecordingSink::new());
        let cancel = CancellationToken::new();
        let executor = Executor::new(
            self.executor_config,
            sink.clone(),
            Some(store.clone() as Arc<dyn Store>),
            clock.clone(),
            cancel.clone(),
        );
        let dispatcher = Dispatcher::new(&self.runtime_config, features, executor.handle());
        let dispatcher_handle = dispatcher.handle();

        TestHarness {
            clock,
            store,
            config_cache,
            directory,
            sink,
            rate,
            scheduler,
            scheduler_handle: core.scheduler,
            dispatcher,
            dispatcher_handle,
            executor,
            _cancel: cancel,
            _temp_dir: temp_dir,
        }
    }
}

/// A complete engine stack over mocks, driven synchronously from tests.
pub struct TestHarness {
    pub clock: Arc<ManualClock>,
    pub store: Arc<SqliteStore>,
    pub config_cache: Arc<TenantConfigCache>,
    pub directory: Arc<MockDirectory>,
    pub sink: Arc<RecordingSink>,
    pub rate: Arc<RateWindow>,
    scheduler: Scheduler,
    pub scheduler_handle: SchedulerHandle,
    dispatcher: Dispatcher,
    pub dispatcher_handle: DispatcherHandle,
    executor: Executor,
    _cancel: CancellationToken,
    _temp_dir: tempfile::TempDir,
}

impl TestHarness {
    pub fn builder() -> TestHarnessBuilder {
        TestHarnessBuilder::new()
    }

    /// Submit an event and settle the whole pipeline.
    pub async fn process(&self, event: Event) {
        self.dispatcher_handle.submit(event).await;
        self.settle().await;
    }

    /// Advance the manual clock, then fire whatever became due and settle.
    pub async fn advance(&self, delta: Duration) {
        self.clock.advance(delta);
        self.settle().await;
    }

    /// Run dispatcher, executor, and scheduler until nothing is pending.
    /// Scheduled ticks fired mid-settle feed back through the dispatcher.
    pub async fn settle(&self) {
        loop {
            self.dispatcher.drain().await;
            self.executor.drain().await;
            let fired = self.scheduler.run_due(&self.dispatcher_handle).await;
            if fired == 0 {
                // One more drain in case the last executor completions wrote
                // records features read lazily; queues are empty, so done.
                self.dispatcher.drain().await;
                self.executor.drain().await;
                return;
            }
        }
    }

    /// Everything the sink performed so far.
    pub fn actions(&self) -> Vec<ActionEnvelope> {
        self.sink.performed()
    }

    /// Dead letters accumulated by the executor.
    pub fn dead_letters(&self) -> Vec<DeadLetter> {
        self.executor.dead_letters()
    }
}
