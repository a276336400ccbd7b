// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Lifecycle of the telemetry pipeline.
//!
//! [`Telemetry`] owns the shared aggregates and runs two independent loops:
//! one exports a batch every `export_interval`, the other evicts idle
//! sessions every `sweep_interval`. Both stop when [`Telemetry::shutdown`]
//! cancels their token.

use crate::config::TelemetryConfig;
use crate::flusher::{Flusher, FlusherConfig};
use crate::hooks::Hooks;
use crate::registry::MetricsRegistry;
use crate::sampler::Sampler;
use crate::sessions::SessionTracker;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::task::JoinHandle;
use tokio::time::{interval, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

pub struct Telemetry {
    registry: Arc<MetricsRegistry>,
    sessions: Arc<SessionTracker>,
    flusher: Option<Arc<Flusher>>,
    export_interval: Duration,
    sweep_interval: Duration,
    cancel_token: CancellationToken,
}

/// Join handles of the background loops
pub struct TelemetryTasks {
    pub export: Option<JoinHandle<()>>,
    pub sweep: JoinHandle<()>,
}

impl TelemetryTasks {
    pub async fn join(self) {
        if let Some(export) = self.export {
            let _ = export.await;
        }
        let _ = self.sweep.await;
    }
}

impl Telemetry {
    pub fn new(config: &TelemetryConfig) -> Self {
        Self::with_sampler(config, Sampler::default())
    }

    pub fn with_sampler(config: &TelemetryConfig, sampler: Sampler) -> Self {
        let registry = Arc::new(MetricsRegistry::new());
        let sessions = Arc::new(SessionTracker::new(config.session_timeout));

        let flusher = if config.export_enabled() {
            Some(Arc::new(Flusher::new(FlusherConfig {
                registry: Arc::clone(&registry),
                sessions: Arc::clone(&sessions),
                sampler: Arc::new(sampler),
                source: config.source.clone(),
                endpoint: config.endpoint.clone(),
                api_key: config.api_key.clone(),
                https_proxy: config.https_proxy.clone(),
                timeout: config.export_timeout,
            })))
        } else {
            info!("No metrics endpoint configured, metrics will not be exported");
            None
        };

        Self {
            registry,
            sessions,
            flusher,
            export_interval: config.export_interval,
            sweep_interval: config.sweep_interval,
            cancel_token: CancellationToken::new(),
        }
    }

    pub fn hooks(&self) -> Hooks {
        Hooks::new(Arc::clone(&self.registry), Arc::clone(&self.sessions))
    }

    pub fn registry(&self) -> &Arc<MetricsRegistry> {
        &self.registry
    }

    pub fn sessions(&self) -> &Arc<SessionTracker> {
        &self.sessions
    }

    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel_token.clone()
    }

    /// Spawns the export and sweep loops on the current runtime.
    pub fn start(&self) -> TelemetryTasks {
        let export = self.flusher.as_ref().map(|flusher| {
            tokio::spawn(export_loop(
                Arc::clone(flusher),
                self.export_interval,
                self.cancel_token.clone(),
            ))
        });
        let sweep = tokio::spawn(sweep_loop(
            Arc::clone(&self.sessions),
            self.sweep_interval,
            self.cancel_token.clone(),
        ));
        TelemetryTasks { export, sweep }
    }

    /// Runs one export tick now. No-op when exporting is disabled.
    pub async fn export_now(&self) {
        if let Some(flusher) = &self.flusher {
            flusher.flush().await;
        }
    }

    /// Runs one sweep tick now and returns the number of evicted sessions.
    pub fn sweep_now(&self) -> usize {
        self.sessions.sweep(Instant::now())
    }

    pub fn shutdown(&self) {
        debug!("Stopping telemetry loops");
        self.cancel_token.cancel();
    }
}

async fn export_loop(flusher: Arc<Flusher>, period: Duration, cancel_token: CancellationToken) {
    let mut ticker = interval(period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    ticker.tick().await; // discard first tick, which is instantaneous

    loop {
        tokio::select! {
            _ = cancel_token.cancelled() => break,
            _ = ticker.tick() => {
                debug!("Exporting metrics");
                // The send is bounded by the sink timeout, cancellation waits for it
                flusher.flush().await;
            }
        }
    }
    debug!("Metrics export loop stopped");
}

async fn sweep_loop(sessions: Arc<SessionTracker>, period: Duration, cancel_token: CancellationToken) {
    let mut ticker = interval(period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    ticker.tick().await;

    loop {
        tokio::select! {
            _ = cancel_token.cancelled() => break,
            _ = ticker.tick() => {
                sessions.sweep(Instant::now());
            }
        }
    }
    debug!("Session sweep loop stopped");
}
