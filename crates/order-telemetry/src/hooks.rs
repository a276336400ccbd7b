// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Entry points for the request-handling layer.
//!
//! Every call is a short, lock-bounded update of the shared aggregates; none
//! of them can fail or block on I/O.

use crate::registry::MetricsRegistry;
use crate::sessions::SessionTracker;
use std::sync::Arc;
use std::time::Instant;

/// Stopwatch started by [`Hooks::on_request_start`]
#[derive(Debug)]
#[must_use = "pass the handle to on_request_finish to record latency"]
pub struct RequestHandle {
    started: Instant,
}

impl RequestHandle {
    pub fn started(&self) -> Instant {
        self.started
    }
}

#[derive(Debug, Clone)]
pub struct Hooks {
    registry: Arc<MetricsRegistry>,
    sessions: Arc<SessionTracker>,
}

impl Hooks {
    pub fn new(registry: Arc<MetricsRegistry>, sessions: Arc<SessionTracker>) -> Self {
        Self { registry, sessions }
    }

    pub fn on_request_start(&self, method: &str, path: &str) -> RequestHandle {
        self.registry.record_request(method, path);
        RequestHandle {
            started: Instant::now(),
        }
    }

    pub fn on_request_finish(&self, handle: RequestHandle) {
        let elapsed = handle.started.elapsed();
        self.registry.record_latency(elapsed.as_secs_f64() * 1000.0);
    }

    pub fn on_authenticated_request(&self, token: &str) {
        self.sessions.touch(token);
    }

    pub fn on_logout(&self, token: &str) {
        self.sessions.remove(token);
    }

    pub fn on_login_result(&self, success: bool) {
        self.registry.record_login(success);
    }

    pub fn on_purchase(&self, quantity: u64, amount: f64) {
        self.registry.record_purchase(quantity, amount);
    }

    pub fn on_purchase_failure(&self) {
        self.registry.record_purchase_failure();
    }

    pub fn on_purchase_latency(&self, duration_ms: f64) {
        self.registry.record_purchase_latency(duration_ms);
    }
}

/// Extracts the token from an `Authorization: Bearer <token>` header value
pub fn bearer_token(header_value: &str) -> Option<&str> {
    let mut parts = header_value.split_whitespace();
    let scheme = parts.next()?;
    if !scheme.eq_ignore_ascii_case("bearer") {
        return None;
    }
    parts.next()
}
