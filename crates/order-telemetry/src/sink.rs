// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! HTTP transport to the OTLP/JSON metrics sink.

use crate::errors::ShippingError;
use crate::metric::MetricRecord;
use reqwest::header::{AUTHORIZATION, CONTENT_TYPE};
use reqwest::Response;
use serde::Serialize;
use std::time::{Duration, Instant};
use tracing::{debug, error};

/// One export, grouping every record under a single resource and scope
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ExportBatch {
    pub resource_metrics: Vec<ResourceMetrics>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ResourceMetrics {
    pub scope_metrics: Vec<ScopeMetrics>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ScopeMetrics {
    pub metrics: Vec<MetricRecord>,
}

impl ExportBatch {
    pub fn new(metrics: Vec<MetricRecord>) -> Self {
        Self {
            resource_metrics: vec![ResourceMetrics {
                scope_metrics: vec![ScopeMetrics { metrics }],
            }],
        }
    }

    pub fn metrics(&self) -> impl Iterator<Item = &MetricRecord> {
        self.resource_metrics
            .iter()
            .flat_map(|resource| resource.scope_metrics.iter())
            .flat_map(|scope| scope.metrics.iter())
    }

    pub fn len(&self) -> usize {
        self.metrics().count()
    }

    pub fn is_empty(&self) -> bool {
        self.metrics().next().is_none()
    }
}

#[derive(Debug, Clone)]
pub struct SinkApi {
    endpoint: String,
    api_key: Option<String>,
    timeout: Duration,
    client: reqwest::Client,
}

impl SinkApi {
    pub fn new(
        endpoint: String,
        api_key: Option<String>,
        https_proxy: Option<&str>,
        timeout: Duration,
    ) -> Self {
        let client = build_client(https_proxy, timeout).unwrap_or_else(|e| {
            error!(
                "Unable to build metrics sink client: {}, falling back to defaults",
                e
            );
            reqwest::Client::new()
        });
        Self {
            endpoint,
            api_key,
            timeout,
            client,
        }
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    /// Posts `batch` once. Any non-2xx answer is a [`ShippingError::Destination`].
    pub async fn ship(&self, batch: &ExportBatch) -> Result<Response, ShippingError> {
        let body = serde_json::to_vec(batch).map_err(|e| ShippingError::Payload(e.to_string()))?;

        let mut request = self
            .client
            .post(&self.endpoint)
            .header(CONTENT_TYPE, "application/json")
            .timeout(self.timeout)
            .body(body);
        if let Some(api_key) = &self.api_key {
            request = request.header(AUTHORIZATION, format!("Bearer {api_key}"));
        }

        let start = Instant::now();
        let response = request
            .send()
            .await
            .map_err(|e| ShippingError::Destination(e.status(), e.to_string()))?;
        let elapsed = start.elapsed();

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(ShippingError::Destination(
                Some(status),
                format!("Sink rejected metrics: {body}"),
            ));
        }

        debug!(
            "Shipped {} metrics to {} in {} ms",
            batch.len(),
            self.endpoint,
            elapsed.as_millis()
        );
        Ok(response)
    }
}

fn build_client(
    https_proxy: Option<&str>,
    timeout: Duration,
) -> Result<reqwest::Client, reqwest::Error> {
    let mut builder = reqwest::Client::builder().timeout(timeout);
    if let Some(proxy) = https_proxy {
        builder = builder.proxy(reqwest::Proxy::https(proxy)?);
    }
    builder.build()
}
