// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

#![cfg_attr(not(test), deny(clippy::panic))]
#![cfg_attr(not(test), deny(clippy::unwrap_used))]
#![cfg_attr(not(test), deny(clippy::expect_used))]
#![cfg_attr(not(test), deny(clippy::todo))]
#![cfg_attr(not(test), deny(clippy::unimplemented))]

use http_body_util::Full;
use hyper::body::{Bytes, Incoming};
use hyper::server::conn::http1;
use hyper::{Method, Request, Response, StatusCode};
use hyper_util::rt::TokioIo;
use hyper_util::service::TowerToHyperService;
use std::convert::Infallible;
use std::env;
use tokio::net::TcpListener;
use tower::{service_fn, Layer};
use tracing::{debug, error, info};
use tracing_subscriber::EnvFilter;

use order_telemetry::{
    config::TelemetryConfig,
    layer::{RouteTemplates, TelemetryLayer},
    service::Telemetry,
};

const DEFAULT_AGENT_PORT: u16 = 3000;
const AGENT_HOST: &str = "0.0.0.0";
const HEALTH_PATH: &str = "/health";
// Every path without a route is counted under one series
const UNMATCHED_ROUTE: &str = "/*";

#[tokio::main]
pub async fn main() {
    let log_level = env::var("METRICS_LOG_LEVEL")
        .map(|val| val.to_lowercase())
        .unwrap_or("info".to_string());
    let env_filter = format!("h2=off,hyper=off,rustls=off,{}", log_level);

    let filter = match EnvFilter::try_new(env_filter) {
        Ok(filter) => filter,
        Err(e) => {
            eprintln!("could not parse log level in configuration: {e}");
            return;
        }
    };
    let subscriber = tracing_subscriber::fmt::Subscriber::builder()
        .with_env_filter(filter)
        .with_level(true)
        .with_thread_names(false)
        .with_thread_ids(false)
        .with_line_number(false)
        .with_file(false)
        .with_target(true)
        .without_time()
        .finish();
    if let Err(e) = tracing::subscriber::set_global_default(subscriber) {
        eprintln!("setting default subscriber failed: {e}");
        return;
    }

    debug!("Logging subsystem enabled");

    let config = match TelemetryConfig::from_env() {
        Ok(config) => config,
        Err(e) => {
            error!("Error creating telemetry config on agent startup: {e}");
            return;
        }
    };

    let port: u16 = env::var("METRICS_AGENT_PORT")
        .ok()
        .and_then(|port| port.parse::<u16>().ok())
        .unwrap_or(DEFAULT_AGENT_PORT);

    let listener = match TcpListener::bind((AGENT_HOST, port)).await {
        Ok(listener) => listener,
        Err(e) => {
            error!("Unable to bind {AGENT_HOST}:{port}: {e}");
            return;
        }
    };

    let telemetry = Telemetry::new(&config);
    let tasks = telemetry.start();
    let routes = RouteTemplates::new([HEALTH_PATH]);
    let layer = TelemetryLayer::new(telemetry.hooks()).with_templates(move |path| {
        routes
            .resolve(path)
            .or_else(|| Some(UNMATCHED_ROUTE.to_string()))
    });

    info!(
        "Telemetry agent listening on port {port}, source {}, exporting every {}s",
        config.source,
        config.export_interval.as_secs()
    );

    let shutdown = tokio::signal::ctrl_c();
    tokio::pin!(shutdown);

    loop {
        tokio::select! {
            _ = &mut shutdown => {
                info!("Shutdown signal received");
                break;
            }
            accepted = listener.accept() => match accepted {
                Ok((stream, remote)) => {
                    let service = TowerToHyperService::new(layer.layer(service_fn(handle)));
                    tokio::spawn(async move {
                        if let Err(e) = http1::Builder::new()
                            .serve_connection(TokioIo::new(stream), service)
                            .await
                        {
                            debug!("Connection from {remote} closed with error: {e}");
                        }
                    });
                }
                Err(e) => error!("Failed to accept connection: {e}"),
            }
        }
    }

    telemetry.shutdown();
    tasks.join().await;
    // Ship whatever accumulated since the last tick
    telemetry.export_now().await;
}

async fn handle(req: Request<Incoming>) -> Result<Response<Full<Bytes>>, Infallible> {
    let response = match (req.method(), req.uri().path()) {
        (&Method::GET, HEALTH_PATH) => Response::new(Full::new(Bytes::from_static(b"ok"))),
        _ => {
            let mut response = Response::new(Full::new(Bytes::from_static(b"not found")));
            *response.status_mut() = StatusCode::NOT_FOUND;
            response
        }
    };
    Ok(response)
}
