// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

use std::time::Duration;

pub const DEFAULT_SOURCE: &str = "order-service";
pub const DEFAULT_EXPORT_INTERVAL: Duration = Duration::from_secs(10);
pub const DEFAULT_SWEEP_INTERVAL: Duration = Duration::from_secs(60);
pub const DEFAULT_SESSION_TIMEOUT: Duration = Duration::from_secs(5 * 60);
pub const DEFAULT_EXPORT_TIMEOUT: Duration = Duration::from_secs(5);

// Exported series
pub const REQUESTS_METRIC: &str = "requests";
pub const CPU_METRIC: &str = "cpu";
pub const MEMORY_METRIC: &str = "memory";
pub const ACTIVE_USERS_METRIC: &str = "active_users";
pub const LOGIN_SUCCESS_METRIC: &str = "login_success";
pub const LOGIN_FAILED_METRIC: &str = "login_failed";
pub const PIZZAS_SOLD_METRIC: &str = "pizzas_sold";
pub const PIZZA_CREATION_FAILURES_METRIC: &str = "pizza_creation_failures";
pub const REVENUE_METRIC: &str = "revenue";
pub const LATENCY_METRIC: &str = "latency";
pub const PIZZA_CREATION_LATENCY_METRIC: &str = "pizza_creation_latency";

pub const UNIT_COUNT: &str = "1";
pub const UNIT_PERCENT: &str = "%";
pub const UNIT_MILLISECONDS: &str = "ms";

// Attribute keys
pub const SOURCE_ATTRIBUTE: &str = "source";
pub const ENDPOINT_ATTRIBUTE: &str = "endpoint";
pub const METHOD_ATTRIBUTE: &str = "method";
