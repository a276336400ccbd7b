// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Process-wide aggregates fed by request handlers.
//!
//! Every aggregate has its own synchronization so a slow reader of one never
//! stalls writers of another. Request, login and purchase totals are
//! cumulative; the two latency windows are reset atomically with each read.

use fnv::FnvHashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, MutexGuard};
use tracing::warn;

/// Identifies a request counter: HTTP method plus path template
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RequestKey {
    pub method: String,
    pub path: String,
}

impl RequestKey {
    pub fn new(method: &str, path: &str) -> Self {
        Self {
            method: method.to_string(),
            path: path.to_string(),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LoginSnapshot {
    pub success: u64,
    pub failed: u64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct PurchaseSnapshot {
    pub items_sold: u64,
    pub creation_failures: u64,
    pub revenue: f64,
}

/// Sum and count of latency observations for one export window
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct LatencySnapshot {
    pub sum_ms: f64,
    pub count: u64,
}

impl LatencySnapshot {
    /// Mean latency in milliseconds, 0 for an empty window
    pub fn average(&self) -> f64 {
        if self.count == 0 {
            return 0.0;
        }
        self.sum_ms / self.count as f64
    }
}

#[derive(Debug, Default)]
struct LatencyAccumulator {
    window: Mutex<LatencySnapshot>,
}

impl LatencyAccumulator {
    fn record(&self, duration_ms: f64) {
        let mut window = lock(&self.window);
        window.sum_ms += duration_ms;
        window.count += 1;
    }

    fn drain(&self) -> LatencySnapshot {
        std::mem::take(&mut *lock(&self.window))
    }
}

#[derive(Debug, Default)]
pub struct MetricsRegistry {
    requests: Mutex<FnvHashMap<RequestKey, u64>>,
    logins_succeeded: AtomicU64,
    logins_failed: AtomicU64,
    purchases: Mutex<PurchaseSnapshot>,
    request_latency: LatencyAccumulator,
    purchase_latency: LatencyAccumulator,
}

impl MetricsRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_request(&self, method: &str, path: &str) {
        *lock(&self.requests)
            .entry(RequestKey::new(method, path))
            .or_insert(0) += 1;
    }

    pub fn record_login(&self, success: bool) {
        let counter = if success {
            &self.logins_succeeded
        } else {
            &self.logins_failed
        };
        counter.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_purchase(&self, quantity: u64, amount: f64) {
        let mut purchases = lock(&self.purchases);
        purchases.items_sold += quantity;
        purchases.revenue += amount;
    }

    pub fn record_purchase_failure(&self) {
        lock(&self.purchases).creation_failures += 1;
    }

    pub fn record_latency(&self, duration_ms: f64) {
        self.request_latency.record(duration_ms);
    }

    pub fn record_purchase_latency(&self, duration_ms: f64) {
        self.purchase_latency.record(duration_ms);
    }

    /// Current value of every request counter, sorted by key.
    ///
    /// Counters are cumulative: reading does not reset them.
    pub fn drain_request_counters(&self) -> Vec<(RequestKey, u64)> {
        let mut counters: Vec<(RequestKey, u64)> = lock(&self.requests)
            .iter()
            .map(|(key, count)| (key.clone(), *count))
            .collect();
        counters.sort_by(|(a, _), (b, _)| a.cmp(b));
        counters
    }

    pub fn snapshot_logins(&self) -> LoginSnapshot {
        LoginSnapshot {
            success: self.logins_succeeded.load(Ordering::Relaxed),
            failed: self.logins_failed.load(Ordering::Relaxed),
        }
    }

    pub fn snapshot_purchases(&self) -> PurchaseSnapshot {
        *lock(&self.purchases)
    }

    /// Returns the request latency window and starts a new one.
    pub fn drain_latency(&self) -> LatencySnapshot {
        self.request_latency.drain()
    }

    /// Returns the purchase latency window and starts a new one.
    pub fn drain_purchase_latency(&self) -> LatencySnapshot {
        self.purchase_latency.drain()
    }
}

/// Locks an aggregate, recovering the data if a writer panicked mid-update.
pub(crate) fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| {
        warn!("Recovering poisoned telemetry lock");
        poisoned.into_inner()
    })
}
