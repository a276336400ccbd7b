// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! In-process telemetry for the order service.
//!
//! Request handlers feed a shared [`registry::MetricsRegistry`] and
//! [`sessions::SessionTracker`] through [`hooks::Hooks`] (or the
//! [`layer::TelemetryLayer`] middleware). Two background loops owned by
//! [`service::Telemetry`] periodically export an OTLP/JSON snapshot to the
//! configured sink and evict idle sessions.

#![cfg_attr(not(test), deny(clippy::panic))]
#![cfg_attr(not(test), deny(clippy::unwrap_used))]
#![cfg_attr(not(test), deny(clippy::expect_used))]
#![cfg_attr(not(test), deny(clippy::todo))]
#![cfg_attr(not(test), deny(clippy::unimplemented))]

pub mod config;
pub mod constants;
pub mod errors;
pub mod flusher;
pub mod hooks;
pub mod layer;
pub mod metric;
pub mod registry;
pub mod sampler;
pub mod service;
pub mod sessions;
pub mod sink;
