// Copyright 2021-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! The metric kernel.
//!
//! Every metric type stores a validated inner value ([`Metric`]) and exposes
//! a payload projection distinct from the stored representation. Stored
//! values are decoded through a closed set of constructors keyed by the kind
//! string; an unknown kind or a value that fails its kind's validation
//! decodes to `None` and is evicted by the database layer.

use std::collections::BTreeMap;

use serde_json::{json, Map, Value};

use crate::histogram::{Bucketing, Functional, Histogram, PrecomputedExponential};

mod boolean;
mod counter;
mod custom_distribution;
mod datetime;
mod event;
mod labeled;
mod quantity;
mod string;
mod timing_distribution;
mod uuid;

pub use boolean::BooleanMetric;
pub use counter::CounterMetric;
pub use custom_distribution::CustomDistributionMetric;
pub use datetime::{Datetime, DatetimeMetric, TimeUnit};
pub use event::{EventMetric, RecordedEvent};
pub use labeled::LabeledMetric;
pub use quantity::QuantityMetric;
pub use string::StringMetric;
pub use timing_distribution::{TimerId, TimingDistributionMetric};
pub use uuid::UuidMetric;

/// Identifier prefix of metrics internal to the SDK. They are readable by
/// the assembler (client info, sequence bookkeeping) but never appear in the
/// `metrics` section of an external payload.
pub const RESERVED_METRIC_IDENTIFIER_PREFIX: &str = "beacon.internal";

/// Separator between a labeled metric's base identifier and its label.
pub const LABEL_SEPARATOR: char = '/';

/// Maximum byte length of a string metric's value.
pub const MAX_STRING_LENGTH: usize = 100;

/// Timing distributions bucket with log base 2, 8 buckets per magnitude.
pub const TIMING_LOG_BASE: f64 = 2.0;
pub const TIMING_BUCKETS_PER_MAGNITUDE: f64 = 8.0;

pub fn is_reserved_identifier(identifier: &str) -> bool {
    identifier.starts_with(RESERVED_METRIC_IDENTIFIER_PREFIX)
}

/// Recording lifetime of a metric.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Lifetime {
    /// Cleared when the owning ping is submitted.
    Ping,
    /// Persisted indefinitely, cleared only on explicit reset or
    /// upload-disable.
    User,
    /// Cleared at process restart and on lifetime-clearing submissions.
    Application,
}

impl Lifetime {
    /// Root key of the storage sub-store backing this lifetime.
    pub fn sub_store_name(self) -> &'static str {
        match self {
            Lifetime::Ping => "pingLifetimeMetrics",
            Lifetime::User => "userLifetimeMetrics",
            Lifetime::Application => "appLifetimeMetrics",
        }
    }
}

/// Definition shared by all metric types.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommonMetricData {
    pub name: String,
    pub category: String,
    pub send_in_pings: Vec<String>,
    pub lifetime: Lifetime,
    pub disabled: bool,
    /// Set on the per-label instances handed out by [`LabeledMetric`].
    pub dynamic_label: Option<String>,
}

impl Default for CommonMetricData {
    fn default() -> Self {
        Self {
            name: String::new(),
            category: String::new(),
            send_in_pings: Vec::new(),
            lifetime: Lifetime::Ping,
            disabled: false,
            dynamic_label: None,
        }
    }
}

impl CommonMetricData {
    /// The canonical `category.name` identifier. An empty category elides
    /// the dot.
    pub fn base_identifier(&self) -> String {
        if self.category.is_empty() {
            self.name.clone()
        } else {
            format!("{}.{}", self.category, self.name)
        }
    }

    /// The storage identifier, including the dynamic label when present.
    pub fn identifier(&self) -> String {
        let base = self.base_identifier();
        match &self.dynamic_label {
            Some(label) => format!("{base}{LABEL_SEPARATOR}{label}"),
            None => base,
        }
    }
}

/// The validated inner value of a metric, tagged by kind.
#[derive(Debug, Clone, PartialEq)]
pub enum Metric {
    Boolean(bool),
    Counter(i32),
    CustomDistribution {
        range_min: u64,
        range_max: u64,
        bucket_count: usize,
        /// Sparse `{sample → count}` map; buckets are reconstructed on read.
        samples: BTreeMap<u64, u64>,
    },
    Datetime(Datetime),
    Quantity(i64),
    String(String),
    /// Sparse `{sample → count}` map; buckets are reconstructed on read.
    TimingDistribution(BTreeMap<u64, u64>),
    Uuid(String),
}

impl Metric {
    /// The kind string, used as a storage path segment and payload section
    /// name.
    pub fn kind(&self) -> &'static str {
        match self {
            Metric::Boolean(_) => "boolean",
            Metric::Counter(_) => "counter",
            Metric::CustomDistribution { .. } => "custom_distribution",
            Metric::Datetime(_) => "datetime",
            Metric::Quantity(_) => "quantity",
            Metric::String(_) => "string",
            Metric::TimingDistribution(_) => "timing_distribution",
            Metric::Uuid(_) => "uuid",
        }
    }

    /// Serialize into the stored representation.
    pub fn stored(&self) -> Value {
        match self {
            Metric::Boolean(b) => json!(b),
            Metric::Counter(c) => json!(c),
            Metric::CustomDistribution {
                range_min,
                range_max,
                bucket_count,
                samples,
            } => json!({
                "range_min": range_min,
                "range_max": range_max,
                "bucket_count": bucket_count,
                "samples": sample_map_to_json(samples),
            }),
            Metric::Datetime(d) => d.stored(),
            Metric::Quantity(q) => json!(q),
            Metric::String(s) => json!(s),
            Metric::TimingDistribution(samples) => Value::Object(sample_map_to_json(samples)),
            Metric::Uuid(u) => json!(u),
        }
    }

    /// Decode a stored value through the closed constructor set.
    ///
    /// Returns `None` when the kind is unknown or the value does not satisfy
    /// the kind's validation predicate. Callers treat that as storage
    /// corruption and delete the offending leaf.
    pub fn from_stored(kind: &str, value: &Value) -> Option<Metric> {
        match kind {
            "boolean" => value.as_bool().map(Metric::Boolean),
            "counter" => value
                .as_i64()
                .filter(|v| (0..=i32::MAX as i64).contains(v))
                .map(|v| Metric::Counter(v as i32)),
            "custom_distribution" => {
                let obj = value.as_object()?;
                Some(Metric::CustomDistribution {
                    range_min: obj.get("range_min")?.as_u64()?,
                    range_max: obj.get("range_max")?.as_u64()?,
                    bucket_count: obj.get("bucket_count")?.as_u64()? as usize,
                    samples: sample_map_from_json(obj.get("samples")?.as_object()?)?,
                })
            }
            "datetime" => Datetime::from_stored(value).map(Metric::Datetime),
            "quantity" => value
                .as_i64()
                .filter(|v| *v >= 0)
                .map(Metric::Quantity),
            "string" => value
                .as_str()
                .filter(|s| s.len() <= MAX_STRING_LENGTH)
                .map(|s| Metric::String(s.to_string())),
            "timing_distribution" => {
                Some(Metric::TimingDistribution(sample_map_from_json(
                    value.as_object()?,
                )?))
            }
            "uuid" => value
                .as_str()
                .filter(|s| uuid::looks_like_uuid(s))
                .map(|s| Metric::Uuid(s.to_string())),
            _ => None,
        }
    }

    /// The payload projection, i.e. what lands in the assembled ping.
    pub fn payload(&self) -> Value {
        match self {
            Metric::Boolean(b) => json!(b),
            Metric::Counter(c) => json!(c),
            Metric::CustomDistribution {
                range_min,
                range_max,
                bucket_count,
                samples,
            } => {
                let bucketing =
                    PrecomputedExponential::new(*range_min, *range_max, *bucket_count);
                distribution_payload(bucketing, samples)
            }
            Metric::Datetime(d) => json!(d.render()),
            Metric::Quantity(q) => json!(q),
            Metric::String(s) => json!(s),
            Metric::TimingDistribution(samples) => {
                let bucketing = Functional::new(TIMING_LOG_BASE, TIMING_BUCKETS_PER_MAGNITUDE);
                distribution_payload(bucketing, samples)
            }
            Metric::Uuid(u) => json!(u),
        }
    }
}

fn distribution_payload<B: Bucketing>(bucketing: B, samples: &BTreeMap<u64, u64>) -> Value {
    let mut hist = Histogram::new(bucketing);
    for (&sample, &count) in samples {
        for _ in 0..count {
            hist.accumulate(sample);
        }
    }
    json!({
        "values": hist
            .values()
            .iter()
            .map(|(k, v)| (k.to_string(), json!(v)))
            .collect::<Map<String, Value>>(),
        "sum": hist.sum(),
    })
}

fn sample_map_to_json(samples: &BTreeMap<u64, u64>) -> Map<String, Value> {
    samples
        .iter()
        .map(|(k, v)| (k.to_string(), json!(v)))
        .collect()
}

fn sample_map_from_json(obj: &Map<String, Value>) -> Option<BTreeMap<u64, u64>> {
    obj.iter()
        .map(|(k, v)| Some((k.parse::<u64>().ok()?, v.as_u64()?)))
        .collect()
}
