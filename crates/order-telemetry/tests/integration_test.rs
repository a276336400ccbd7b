// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

use hyper::header::AUTHORIZATION;
use hyper::{Request, Response};
use mockito::{Matcher, Server};
use order_telemetry::config::TelemetryConfig;
use order_telemetry::layer::TelemetryLayer;
use order_telemetry::sampler::{HostStatsReader, MemoryStats, Sampler};
use order_telemetry::service::Telemetry;
use serde_json::json;
use std::convert::Infallible;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::time::{sleep, timeout, Duration};
use tower::{service_fn, Layer, ServiceExt};

struct IdleHost;

impl HostStatsReader for IdleHost {
    fn load_average(&self) -> Option<f64> {
        Some(0.0)
    }

    fn cpu_count(&self) -> usize {
        4
    }

    fn memory(&self) -> Option<MemoryStats> {
        Some(MemoryStats {
            total: 2_000,
            free: 1_000,
        })
    }
}

fn telemetry(endpoint: String, export_interval: Duration) -> Telemetry {
    let config = TelemetryConfig {
        endpoint,
        api_key: Some("glc_secret".to_string()),
        source: "jwt-pizza-service".to_string(),
        export_interval,
        ..Default::default()
    };
    Telemetry::with_sampler(&config, Sampler::new(Box::new(IdleHost)))
}

#[tokio::test]
async fn export_batch_contains_requests_and_logins() {
    let mut server = Server::new_async().await;
    let mock = server
        .mock("POST", "/otlp/v1/metrics")
        .match_header("authorization", "Bearer glc_secret")
        .match_header("content-type", "application/json")
        .match_body(Matcher::PartialJson(json!({
            "resourceMetrics": [{"scopeMetrics": [{"metrics": [
                {
                    "name": "requests",
                    "unit": "1",
                    "sum": {
                        "dataPoints": [{
                            "asInt": 5,
                            "attributes": [
                                {"key": "endpoint", "value": {"stringValue": "/x"}},
                                {"key": "method", "value": {"stringValue": "GET"}},
                                {"key": "source", "value": {"stringValue": "jwt-pizza-service"}}
                            ]
                        }],
                        "aggregationTemporality": "AGGREGATION_TEMPORALITY_CUMULATIVE",
                        "isMonotonic": true
                    }
                },
                {"name": "cpu", "unit": "%", "gauge": {"dataPoints": [{"asDouble": 0.0}]}},
                {"name": "memory", "unit": "%", "gauge": {"dataPoints": [{"asDouble": 50.0}]}},
                {"name": "active_users", "gauge": {"dataPoints": [{"asInt": 0}]}},
                {"name": "login_success", "sum": {"dataPoints": [{"asInt": 1}], "isMonotonic": true}},
                {"name": "login_failed", "sum": {"dataPoints": [{"asInt": 0}], "isMonotonic": true}}
            ]}]}]
        })))
        .with_status(200)
        .expect(1)
        .create_async()
        .await;

    let telemetry = telemetry(
        format!("{}/otlp/v1/metrics", server.url()),
        Duration::from_secs(10),
    );
    let hooks = telemetry.hooks();
    for _ in 0..5 {
        let handle = hooks.on_request_start("GET", "/x");
        hooks.on_request_finish(handle);
    }
    hooks.on_login_result(true);

    telemetry.export_now().await;
    mock.assert_async().await;
}

#[tokio::test]
async fn export_loop_ships_on_its_own_timer() {
    let mut server = Server::new_async().await;
    let mock = server
        .mock("POST", "/otlp/v1/metrics")
        .with_status(200)
        .expect_at_least(1)
        .create_async()
        .await;

    let telemetry = telemetry(
        format!("{}/otlp/v1/metrics", server.url()),
        Duration::from_millis(50),
    );
    let tasks = telemetry.start();

    let wait = async {
        while !mock.matched_async().await {
            sleep(Duration::from_millis(20)).await;
        }
    };
    let result = timeout(Duration::from_secs(2), wait).await;

    telemetry.shutdown();
    tasks.join().await;
    assert!(result.is_ok(), "timed out before the sink received a batch");
}

#[tokio::test]
async fn failing_sink_does_not_stop_the_export_loop() {
    let mut server = Server::new_async().await;
    let mock = server
        .mock("POST", "/otlp/v1/metrics")
        .with_status(503)
        .expect_at_least(2)
        .create_async()
        .await;

    let telemetry = telemetry(
        format!("{}/otlp/v1/metrics", server.url()),
        Duration::from_millis(50),
    );
    let hooks = telemetry.hooks();
    hooks.on_purchase_latency(100.0);
    let tasks = telemetry.start();

    sleep(Duration::from_millis(400)).await;
    telemetry.shutdown();
    tasks.join().await;

    mock.assert_async().await;
    // The first window was consumed by a failed export and is not replayed
    assert_eq!(telemetry.registry().drain_purchase_latency().count, 0);
}

#[tokio::test]
async fn hung_sink_does_not_stall_the_export_loop() {
    // Accepts every connection and never answers
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let accepted = Arc::new(AtomicUsize::new(0));
    let holder = {
        let accepted = Arc::clone(&accepted);
        tokio::spawn(async move {
            let mut held = Vec::new();
            while let Ok((stream, _)) = listener.accept().await {
                accepted.fetch_add(1, Ordering::SeqCst);
                held.push(stream);
            }
        })
    };

    let config = TelemetryConfig {
        endpoint: format!("http://{addr}/otlp/v1/metrics"),
        export_interval: Duration::from_millis(50),
        export_timeout: Duration::from_millis(100),
        ..Default::default()
    };
    let telemetry = Telemetry::with_sampler(&config, Sampler::new(Box::new(IdleHost)));
    let tasks = telemetry.start();

    let wait = async {
        while accepted.load(Ordering::SeqCst) < 2 {
            sleep(Duration::from_millis(20)).await;
        }
    };
    let result = timeout(Duration::from_secs(3), wait).await;

    telemetry.shutdown();
    timeout(Duration::from_secs(1), tasks.join())
        .await
        .expect("export loop did not stop after a hung send");
    holder.abort();
    assert!(result.is_ok(), "export loop never reached a second tick");
}

#[tokio::test]
async fn middleware_and_logout_drive_active_users() {
    let telemetry = telemetry("http://127.0.0.1:1/unused".to_string(), Duration::from_secs(10));
    let hooks = telemetry.hooks();
    let service = TelemetryLayer::new(hooks.clone()).layer(service_fn(|_req: Request<()>| async {
        Ok::<_, Infallible>(Response::new(()))
    }));

    let mut tasks = Vec::new();
    for i in 0..100 {
        let service = service.clone();
        tasks.push(tokio::spawn(async move {
            let request = Request::get("/api/user/me")
                .header(AUTHORIZATION, format!("Bearer token-{}", i % 2))
                .body(())
                .unwrap();
            service.oneshot(request).await.unwrap();
        }));
    }
    for task in tasks {
        task.await.unwrap();
    }

    let counters = telemetry.registry().drain_request_counters();
    assert_eq!(counters.len(), 1);
    assert_eq!(counters[0].1, 100);
    assert_eq!(telemetry.registry().drain_latency().count, 100);
    assert_eq!(telemetry.sessions().count_active(), 2);

    hooks.on_logout("token-0");
    assert_eq!(telemetry.sessions().count_active(), 1);
    assert!(telemetry.sessions().last_seen("token-0").is_none());
}
