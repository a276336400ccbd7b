// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Liveness tracking for bearer-token sessions.
//!
//! A token becomes active on its first authenticated request, stays active
//! while requests keep arriving, and leaves the set on logout or once it has
//! been idle for longer than the configured timeout.

use crate::registry::lock;
use fnv::FnvHashMap;
use std::sync::Mutex;
use std::time::{Duration, Instant};
use tracing::debug;

#[derive(Debug)]
pub struct SessionTracker {
    sessions: Mutex<FnvHashMap<String, Instant>>,
    timeout: Duration,
}

impl SessionTracker {
    pub fn new(timeout: Duration) -> Self {
        Self {
            sessions: Mutex::new(FnvHashMap::default()),
            timeout,
        }
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Marks `token` as seen now.
    pub fn touch(&self, token: &str) {
        self.touch_at(token, Instant::now());
    }

    /// Marks `token` as seen at `seen_at`. Empty tokens are ignored.
    pub fn touch_at(&self, token: &str, seen_at: Instant) {
        if token.is_empty() {
            return;
        }
        let mut sessions = lock(&self.sessions);
        match sessions.get_mut(token) {
            Some(last_seen) => *last_seen = seen_at,
            None => {
                sessions.insert(token.to_string(), seen_at);
            }
        }
    }

    pub fn remove(&self, token: &str) {
        lock(&self.sessions).remove(token);
    }

    pub fn count_active(&self) -> usize {
        lock(&self.sessions).len()
    }

    pub fn last_seen(&self, token: &str) -> Option<Instant> {
        lock(&self.sessions).get(token).copied()
    }

    /// Evicts every session idle for strictly longer than the timeout.
    /// Returns the number of evicted sessions.
    pub fn sweep(&self, now: Instant) -> usize {
        let mut sessions = lock(&self.sessions);
        let before = sessions.len();
        sessions.retain(|_, last_seen| now.saturating_duration_since(*last_seen) <= self.timeout);
        let evicted = before - sessions.len();
        if evicted > 0 {
            debug!(
                "Evicted {evicted} idle sessions, {} still active",
                sessions.len()
            );
        }
        evicted
    }
}
