// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! OTLP/JSON metric records and the encoder that builds them.
//!
//! Serialized shape of one record:
//!
//! ```text
//! { "name": "requests", "unit": "1",
//!   "sum": { "dataPoints": [{ "asInt": 5, "timeUnixNano": ..., "attributes": [...] }],
//!            "aggregationTemporality": "AGGREGATION_TEMPORALITY_CUMULATIVE",
//!            "isMonotonic": true } }
//! ```
//!
//! Gauges carry the same `dataPoints` under a `gauge` key and no
//! temporality metadata.

use crate::constants::SOURCE_ATTRIBUTE;
use derive_more::Display;
use serde::Serialize;
use std::time::{SystemTime, UNIX_EPOCH};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Display)]
pub enum MetricKind {
    #[display("sum")]
    Sum,
    #[display("gauge")]
    Gauge,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub enum MetricValue {
    #[serde(rename = "asInt")]
    Int(i64),
    #[serde(rename = "asDouble")]
    Float(f64),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum AggregationTemporality {
    #[serde(rename = "AGGREGATION_TEMPORALITY_CUMULATIVE")]
    Cumulative,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AnyValue {
    pub string_value: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct KeyValue {
    pub key: String,
    pub value: AnyValue,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DataPoint {
    #[serde(flatten)]
    pub value: MetricValue,
    pub time_unix_nano: u64,
    pub attributes: Vec<KeyValue>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Sum {
    pub data_points: Vec<DataPoint>,
    pub aggregation_temporality: AggregationTemporality,
    pub is_monotonic: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Gauge {
    pub data_points: Vec<DataPoint>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum MetricData {
    Sum(Sum),
    Gauge(Gauge),
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MetricRecord {
    pub name: String,
    pub unit: String,
    #[serde(flatten)]
    pub data: MetricData,
}

impl MetricRecord {
    pub fn kind(&self) -> MetricKind {
        match self.data {
            MetricData::Sum(_) => MetricKind::Sum,
            MetricData::Gauge(_) => MetricKind::Gauge,
        }
    }

    pub fn data_points(&self) -> &[DataPoint] {
        match &self.data {
            MetricData::Sum(sum) => &sum.data_points,
            MetricData::Gauge(gauge) => &gauge.data_points,
        }
    }

    /// Value of the first attribute named `key`
    pub fn attribute(&self, key: &str) -> Option<&str> {
        self.data_points()
            .first()?
            .attributes
            .iter()
            .find(|kv| kv.key == key)
            .map(|kv| kv.value.string_value.as_str())
    }
}

/// Builds [`MetricRecord`]s stamped with a fixed `source` attribute
#[derive(Debug, Clone)]
pub struct MetricEncoder {
    source: String,
}

impl MetricEncoder {
    pub fn new(source: impl Into<String>) -> Self {
        Self {
            source: source.into(),
        }
    }

    pub fn source(&self) -> &str {
        &self.source
    }

    pub fn encode(
        &self,
        name: &str,
        value: MetricValue,
        unit: &str,
        kind: MetricKind,
        attributes: &[(&str, &str)],
    ) -> MetricRecord {
        let mut key_values: Vec<KeyValue> = attributes
            .iter()
            .map(|(key, value)| key_value(key, value))
            .collect();
        key_values.push(key_value(SOURCE_ATTRIBUTE, &self.source));

        let data_points = vec![DataPoint {
            value,
            time_unix_nano: now_unix_nano(),
            attributes: key_values,
        }];

        let data = match kind {
            MetricKind::Sum => MetricData::Sum(Sum {
                data_points,
                aggregation_temporality: AggregationTemporality::Cumulative,
                is_monotonic: true,
            }),
            MetricKind::Gauge => MetricData::Gauge(Gauge { data_points }),
        };

        MetricRecord {
            name: name.to_string(),
            unit: unit.to_string(),
            data,
        }
    }
}

fn key_value(key: &str, value: &str) -> KeyValue {
    KeyValue {
        key: key.to_string(),
        value: AnyValue {
            string_value: value.to_string(),
        },
    }
}

fn now_unix_nano() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|elapsed| u64::try_from(elapsed.as_nanos()).unwrap_or(u64::MAX))
        .unwrap_or_default()
}
