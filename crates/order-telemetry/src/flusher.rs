// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

use crate::constants::*;
use crate::errors::ShippingError;
use crate::metric::{MetricEncoder, MetricKind, MetricRecord, MetricValue};
use crate::registry::MetricsRegistry;
use crate::sampler::Sampler;
use crate::sessions::SessionTracker;
use crate::sink::{ExportBatch, SinkApi};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error};

pub struct FlusherConfig {
    pub registry: Arc<MetricsRegistry>,
    pub sessions: Arc<SessionTracker>,
    pub sampler: Arc<Sampler>,
    pub source: String,
    pub endpoint: String,
    pub api_key: Option<String>,
    pub https_proxy: Option<String>,
    pub timeout: Duration,
}

/// Collects one snapshot of every aggregate and ships it to the sink
pub struct Flusher {
    registry: Arc<MetricsRegistry>,
    sessions: Arc<SessionTracker>,
    sampler: Arc<Sampler>,
    encoder: MetricEncoder,
    sink: SinkApi,
}

impl Flusher {
    pub fn new(config: FlusherConfig) -> Self {
        Flusher {
            registry: config.registry,
            sessions: config.sessions,
            sampler: config.sampler,
            encoder: MetricEncoder::new(config.source),
            sink: SinkApi::new(
                config.endpoint,
                config.api_key,
                config.https_proxy.as_deref(),
                config.timeout,
            ),
        }
    }

    /// Builds the batch for one tick.
    ///
    /// Sources are read in a fixed order, each under its own lock; the
    /// latency windows are reset as they are read.
    pub fn collect(&self) -> ExportBatch {
        let mut metrics = self.http_metrics();
        metrics.extend(self.system_metrics());
        metrics.extend(self.user_metrics());
        metrics.extend(self.auth_metrics());
        metrics.extend(self.purchase_metrics());
        metrics.extend(self.latency_metrics());
        ExportBatch::new(metrics)
    }

    /// Collects and ships one batch. Failures are logged and the batch is dropped.
    pub async fn flush(&self) {
        let batch = self.collect();
        debug!("Flushing {} metrics to {}", batch.len(), self.sink.endpoint());
        if let Err(e) = self.sink.ship(&batch).await {
            match e {
                ShippingError::Payload(msg) => {
                    error!("Failed to prepare metrics payload. Data dropped: {msg}")
                }
                ShippingError::Destination(status, msg) => {
                    error!("Error pushing metrics: {status:?} {msg}. Data dropped")
                }
            }
        }
    }

    fn http_metrics(&self) -> Vec<MetricRecord> {
        self.registry
            .drain_request_counters()
            .into_iter()
            .map(|(key, count)| {
                self.sum_int(
                    REQUESTS_METRIC,
                    count,
                    &[
                        (ENDPOINT_ATTRIBUTE, key.path.as_str()),
                        (METHOD_ATTRIBUTE, key.method.as_str()),
                    ],
                )
            })
            .collect()
    }

    fn system_metrics(&self) -> Vec<MetricRecord> {
        vec![
            self.encoder.encode(
                CPU_METRIC,
                MetricValue::Float(self.sampler.cpu_utilization()),
                UNIT_PERCENT,
                MetricKind::Gauge,
                &[],
            ),
            self.encoder.encode(
                MEMORY_METRIC,
                MetricValue::Float(self.sampler.memory_utilization()),
                UNIT_PERCENT,
                MetricKind::Gauge,
                &[],
            ),
        ]
    }

    fn user_metrics(&self) -> Vec<MetricRecord> {
        let active = self.sessions.count_active();
        vec![self.encoder.encode(
            ACTIVE_USERS_METRIC,
            MetricValue::Int(to_i64(active as u64)),
            UNIT_COUNT,
            MetricKind::Gauge,
            &[],
        )]
    }

    fn auth_metrics(&self) -> Vec<MetricRecord> {
        let logins = self.registry.snapshot_logins();
        vec![
            self.sum_int(LOGIN_SUCCESS_METRIC, logins.success, &[]),
            self.sum_int(LOGIN_FAILED_METRIC, logins.failed, &[]),
        ]
    }

    fn purchase_metrics(&self) -> Vec<MetricRecord> {
        let purchases = self.registry.snapshot_purchases();
        vec![
            self.sum_int(PIZZAS_SOLD_METRIC, purchases.items_sold, &[]),
            self.sum_int(
                PIZZA_CREATION_FAILURES_METRIC,
                purchases.creation_failures,
                &[],
            ),
            self.encoder.encode(
                REVENUE_METRIC,
                MetricValue::Float(purchases.revenue),
                UNIT_COUNT,
                MetricKind::Sum,
                &[],
            ),
        ]
    }

    fn latency_metrics(&self) -> Vec<MetricRecord> {
        let request_latency = self.registry.drain_latency();
        let purchase_latency = self.registry.drain_purchase_latency();
        vec![
            self.encoder.encode(
                LATENCY_METRIC,
                MetricValue::Float(request_latency.average()),
                UNIT_MILLISECONDS,
                MetricKind::Sum,
                &[],
            ),
            self.encoder.encode(
                PIZZA_CREATION_LATENCY_METRIC,
                MetricValue::Float(purchase_latency.average()),
                UNIT_MILLISECONDS,
                MetricKind::Sum,
                &[],
            ),
        ]
    }

    fn sum_int(&self, name: &str, value: u64, attributes: &[(&str, &str)]) -> MetricRecord {
        self.encoder.encode(
            name,
            MetricValue::Int(to_i64(value)),
            UNIT_COUNT,
            MetricKind::Sum,
            attributes,
        )
    }
}

fn to_i64(value: u64) -> i64 {
    i64::try_from(value).unwrap_or(i64::MAX)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metric::MetricData;
    use crate::sampler::tests::FixedStatsReader;
    use crate::sampler::MemoryStats;
    use mockito::Server;
    use tracing_test::traced_test;

    struct Fixture {
        registry: Arc<MetricsRegistry>,
        sessions: Arc<SessionTracker>,
        flusher: Flusher,
    }

    fn fixture(endpoint: String) -> Fixture {
        let registry = Arc::new(MetricsRegistry::new());
        let sessions = Arc::new(SessionTracker::new(DEFAULT_SESSION_TIMEOUT));
        let sampler = Arc::new(Sampler::new(Box::new(FixedStatsReader {
            load: Some(2.0),
            cores: 8,
            memory: Some(MemoryStats {
                total: 4_000,
                free: 1_000,
            }),
        })));
        let flusher = Flusher::new(FlusherConfig {
            registry: Arc::clone(&registry),
            sessions: Arc::clone(&sessions),
            sampler,
            source: "pizza-service".to_string(),
            endpoint,
            api_key: Some("api-key".to_string()),
            https_proxy: None,
            timeout: Duration::from_secs(1),
        });
        Fixture {
            registry,
            sessions,
            flusher,
        }
    }

    fn find<'a>(batch: &'a ExportBatch, name: &str) -> Vec<&'a MetricRecord> {
        batch.metrics().filter(|m| m.name == name).collect()
    }

    fn int_value(record: &MetricRecord) -> i64 {
        match record.data_points()[0].value {
            MetricValue::Int(v) => v,
            MetricValue::Float(v) => panic!("expected int, got {v}"),
        }
    }

    fn float_value(record: &MetricRecord) -> f64 {
        match record.data_points()[0].value {
            MetricValue::Float(v) => v,
            MetricValue::Int(v) => panic!("expected float, got {v}"),
        }
    }

    #[test]
    fn test_collect_requests_and_logins() {
        let fixture = fixture("http://127.0.0.1:1".to_string());
        for _ in 0..5 {
            fixture.registry.record_request("GET", "/x");
        }
        fixture.registry.record_login(true);

        let batch = fixture.flusher.collect();

        let requests = find(&batch, "requests");
        assert_eq!(requests.len(), 1);
        let requests = requests[0];
        assert_eq!(requests.kind(), MetricKind::Sum);
        assert_eq!(int_value(requests), 5);
        assert_eq!(requests.attribute("endpoint"), Some("/x"));
        assert_eq!(requests.attribute("method"), Some("GET"));
        assert_eq!(requests.attribute("source"), Some("pizza-service"));

        for (name, expected) in [("login_success", 1), ("login_failed", 0)] {
            let records = find(&batch, name);
            assert_eq!(records.len(), 1);
            assert_eq!(int_value(records[0]), expected);
            match &records[0].data {
                MetricData::Sum(sum) => assert!(sum.is_monotonic),
                MetricData::Gauge(_) => panic!("{name} should be a sum"),
            }
        }
    }

    #[test]
    fn test_collect_order_and_kinds() {
        let fixture = fixture("http://127.0.0.1:1".to_string());
        fixture.registry.record_request("GET", "/api/order/menu");
        let batch = fixture.flusher.collect();

        let names: Vec<&str> = batch.metrics().map(|m| m.name.as_str()).collect();
        assert_eq!(
            names,
            vec![
                "requests",
                "cpu",
                "memory",
                "active_users",
                "login_success",
                "login_failed",
                "pizzas_sold",
                "pizza_creation_failures",
                "revenue",
                "latency",
                "pizza_creation_latency",
            ]
        );

        let gauges: Vec<&str> = batch
            .metrics()
            .filter(|m| m.kind() == MetricKind::Gauge)
            .map(|m| m.name.as_str())
            .collect();
        assert_eq!(gauges, vec!["cpu", "memory", "active_users"]);
        assert!(batch
            .metrics()
            .all(|m| m.attribute("source") == Some("pizza-service")));
    }

    #[test]
    fn test_collect_system_and_session_gauges() {
        let fixture = fixture("http://127.0.0.1:1".to_string());
        fixture.sessions.touch("a");
        fixture.sessions.touch("b");
        fixture.sessions.touch("a");

        let batch = fixture.flusher.collect();
        assert_eq!(float_value(find(&batch, "cpu")[0]), 25.0);
        assert_eq!(float_value(find(&batch, "memory")[0]), 75.0);
        assert_eq!(int_value(find(&batch, "active_users")[0]), 2);
    }

    #[test]
    fn test_collect_resets_only_latency() {
        let fixture = fixture("http://127.0.0.1:1".to_string());
        fixture.registry.record_request("GET", "/api/franchise");
        fixture.registry.record_purchase(3, 0.0126);
        fixture.registry.record_latency(10.0);
        fixture.registry.record_latency(20.0);
        fixture.registry.record_purchase_latency(250.0);

        let first = fixture.flusher.collect();
        assert_eq!(float_value(find(&first, "latency")[0]), 15.0);
        assert_eq!(
            float_value(find(&first, "pizza_creation_latency")[0]),
            250.0
        );

        let second = fixture.flusher.collect();
        assert_eq!(float_value(find(&second, "latency")[0]), 0.0);
        assert_eq!(
            float_value(find(&second, "pizza_creation_latency")[0]),
            0.0
        );
        assert_eq!(int_value(find(&second, "requests")[0]), 1);
        assert_eq!(int_value(find(&second, "pizzas_sold")[0]), 3);
        assert!((float_value(find(&second, "revenue")[0]) - 0.0126).abs() < 1e-9);
    }

    #[tokio::test]
    async fn test_flush_posts_batch() {
        let mut server = Server::new_async().await;
        let mock = server
            .mock("POST", "/api/v1/push")
            .match_header("authorization", "Bearer api-key")
            .match_header("content-type", "application/json")
            .with_status(204)
            .expect(1)
            .create_async()
            .await;

        let fixture = fixture(format!("{}/api/v1/push", server.url()));
        fixture.registry.record_request("PUT", "/api/auth");
        fixture.flusher.flush().await;

        mock.assert_async().await;
    }

    #[tokio::test]
    #[traced_test]
    async fn test_flush_swallows_rejection() {
        let mut server = Server::new_async().await;
        let mock = server
            .mock("POST", "/api/v1/push")
            .with_status(500)
            .with_body("boom")
            .expect(1)
            .create_async()
            .await;

        let fixture = fixture(format!("{}/api/v1/push", server.url()));
        fixture.registry.record_latency(42.0);
        fixture.flusher.flush().await;

        mock.assert_async().await;
        assert!(logs_contain("Error pushing metrics"));
        // The failed window is gone, not retried
        assert_eq!(fixture.registry.drain_latency().count, 0);
    }

    #[tokio::test]
    #[traced_test]
    async fn test_flush_swallows_unreachable_sink() {
        let fixture = fixture("http://127.0.0.1:1/api/v1/push".to_string());
        fixture.flusher.flush().await;
        assert!(logs_contain("Data dropped"));
    }
}
