// SPDX-FileCopyrightText: 2026 Warden Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! In-memory sliding-window rate counters.
//!
//! Counters are keyed `(tenant, subject, kind)` and hold a bounded deque of
//! event timestamps. This is single-writer process-local state: callers go
//! through a plain mutex with no awaits held across it. A periodic sweep
//! drops fully-expired keys; a per-tenant entry cap bounds memory against
//! hostile tenants, evicting the tenant's oldest key on overflow.

use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;
use std::time::{Duration, Instant};

use metrics::counter;
use tracing::warn;

use warden_core::{SubjectId, TenantId};

/// Counter identity.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RateKey {
    pub tenant: TenantId,
    pub subject: SubjectId,
    pub kind: String,
}

impl RateKey {
    pub fn new(tenant: TenantId, subject: SubjectId, kind: impl Into<String>) -> Self {
        Self { tenant, subject, kind: kind.into() }
    }
}

struct KeyState {
    events: VecDeque<Instant>,
    window: Duration,
    first_seen: Instant,
}

#[derive(Default)]
struct Inner {
    keys: HashMap<RateKey, KeyState>,
    /// Total retained timestamps per tenant, for cap enforcement.
    tenant_entries: HashMap<TenantId, usize>,
    dropped_keys: u64,
}

/// Sliding-window counter table.
pub struct RateWindow {
    per_tenant_cap: usize,
    inner: Mutex<Inner>,
}

impl RateWindow {
    pub fn new(per_tenant_cap: usize) -> Self {
        Self { per_tenant_cap, inner: Mutex::new(Inner::default()) }
    }

    /// Record one event at `now`, retaining timestamps within `window`.
    /// Returns the count within the full window after recording.
    pub fn record(&self, key: RateKey, now: Instant, window: Duration) -> usize {
        let mut inner = self.inner.lock().expect("rate window poisoned");
        let tenant = key.tenant;

        // Cap check before inserting. Evicting the tenant's oldest key keeps
        // the hottest (most recently created) counters alive.
        let used = inner.tenant_entries.get(&tenant).copied().unwrap_or(0);
        if used >= self.per_tenant_cap {
            if let Some(oldest) = inner
                .keys
                .iter()
                .filter(|(k, _)| k.tenant == tenant)
                .min_by_key(|(_, s)| s.first_seen)
                .map(|(k, _)| k.clone())
            {
                let removed = inner.keys.remove(&oldest).map(|s| s.events.len()).unwrap_or(0);
                *inner.tenant_entries.entry(tenant).or_insert(0) =
                    used.saturating_sub(removed);
                inner.dropped_keys += 1;
                counter!("warden_rate_window_dropped").increment(1);
                warn!(
                    tenant = %tenant,
                    cap = self.per_tenant_cap,
                    "rate window tenant cap reached, evicted oldest key"
                );
            }
        }

        let state = inner.keys.entry(key).or_insert_with(|| KeyState {
            events: VecDeque::new(),
            window,
            first_seen: now,
        });
        state.window = window;

        // Evict expired timestamps, then append.
        let cutoff = now.checked_sub(window);
        let before = state.events.len();
        if let Some(cutoff) = cutoff {
            while state.events.front().is_some_and(|&t| t < cutoff) {
                state.events.pop_front();
            }
        }
        state.events.push_back(now);
        let count = state.events.len();
        let delta = count as isize - before as isize;

        let entries = inner.tenant_entries.entry(tenant).or_insert(0);
        *entries = entries.saturating_add_signed(delta);

        count
    }

    /// Count events within the trailing `within` duration (`within` must not
    /// exceed the key's retention window; larger values are clamped by what
    /// is retained).
    pub fn count(&self, key: &RateKey, now: Instant, within: Duration) -> usize {
        let inner = self.inner.lock().expect("rate window poisoned");
        let Some(state) = inner.keys.get(key) else {
            return 0;
        };
        let Some(cutoff) = now.checked_sub(within) else {
            return state.events.len();
        };
        state.events.iter().rev().take_while(|&&t| t >= cutoff).count()
    }

    /// Drop a counter entirely.
    pub fn reset(&self, key: &RateKey) {
        let mut inner = self.inner.lock().expect("rate window poisoned");
        if let Some(state) = inner.keys.remove(key) {
            let entries = inner.tenant_entries.entry(key.tenant).or_insert(0);
            *entries = entries.saturating_sub(state.events.len());
        }
    }

    /// Drop keys with no event inside their window. Returns keys removed.
    /// Called from a periodic background task (default every 60s).
    pub fn sweep(&self, now: Instant) -> usize {
        let mut inner = self.inner.lock().expect("rate window poisoned");
        let expired: Vec<RateKey> = inner
            .keys
            .iter()
            .filter(|(_, s)| {
                s.events
                    .back()
                    .is_none_or(|&last| now.checked_sub(s.window).is_some_and(|c| last < c))
            })
            .map(|(k, _)| k.clone())
            .collect();
        for key in &expired {
            if let Some(state) = inner.keys.remove(key) {
                let entries = inner.tenant_entries.entry(key.tenant).or_insert(0);
                *entries = entries.saturating_sub(state.events.len());
            }
        }
        expired.len()
    }

    /// Keys evicted by the per-tenant cap since startup.
    pub fn dropped_keys(&self) -> u64 {
        self.inner.lock().expect("rate window poisoned").dropped_keys
    }
}
