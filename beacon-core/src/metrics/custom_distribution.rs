// Copyright 2021-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

use std::collections::BTreeMap;

use crate::context::Context;
use crate::error_recording::{record_error, ErrorType};
use crate::metrics::{CommonMetricData, Metric};

/// A custom distribution metric.
///
/// Samples accumulate into an exponential histogram whose bucket edges are
/// precomputed from `(range_min, range_max, bucket_count)`. The stored form
/// keeps the raw `{sample → count}` map next to the bucketing parameters so
/// the payload can be rebuilt from storage alone.
#[derive(Debug, Clone)]
pub struct CustomDistributionMetric {
    meta: CommonMetricData,
    range_min: u64,
    range_max: u64,
    bucket_count: usize,
}

impl CustomDistributionMetric {
    pub fn new(meta: CommonMetricData, range_min: u64, range_max: u64, bucket_count: usize) -> Self {
        Self {
            meta,
            range_min,
            range_max,
            bucket_count,
        }
    }

    pub fn meta(&self) -> &CommonMetricData {
        &self.meta
    }

    /// Accumulate `samples`. Negative samples record a single
    /// `invalid_value` error and are skipped.
    pub fn accumulate_samples(&self, ctx: &mut Context, samples: &[i64]) {
        if !ctx.should_record(&self.meta) {
            return;
        }
        let mut negatives = 0;
        let mut accepted = Vec::with_capacity(samples.len());
        for &sample in samples {
            if sample < 0 {
                negatives += 1;
            } else {
                accepted.push(sample as u64);
            }
        }

        if !accepted.is_empty() {
            let (range_min, range_max, bucket_count) =
                (self.range_min, self.range_max, self.bucket_count);
            ctx.metrics
                .transform(&self.meta, "custom_distribution", &move |current| {
                    let mut stored = match current {
                        Some(Metric::CustomDistribution { samples, .. }) => samples,
                        _ => BTreeMap::new(),
                    };
                    for &sample in &accepted {
                        *stored.entry(sample).or_insert(0) += 1;
                    }
                    Metric::CustomDistribution {
                        range_min,
                        range_max,
                        bucket_count,
                        samples: stored,
                    }
                });
        }

        if negatives > 0 {
            record_error(
                ctx,
                &self.meta,
                ErrorType::InvalidValue,
                format!("{negatives} negative samples"),
            );
        }
    }

    /// The raw stored `{sample → count}` map for `ping`. Test-only.
    pub fn test_get_value(&self, ctx: &mut Context, ping: &str) -> Option<BTreeMap<u64, u64>> {
        match ctx.metrics.get_metric(ping, &self.meta, "custom_distribution")? {
            Metric::CustomDistribution { samples, .. } => Some(samples),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::test_context;
    use crate::error_recording::test_get_num_recorded_errors;
    use crate::metrics::Lifetime;

    fn metric() -> CustomDistributionMetric {
        CustomDistributionMetric::new(
            CommonMetricData {
                name: "payload_size".into(),
                category: "net".into(),
                send_in_pings: vec!["metrics".into()],
                lifetime: Lifetime::Ping,
                ..Default::default()
            },
            1,
            100,
            10,
        )
    }

    #[test]
    fn test_accumulate_and_read_back() {
        let mut ctx = test_context();
        let metric = metric();
        metric.accumulate_samples(&mut ctx, &[1, 1, 50]);
        metric.accumulate_samples(&mut ctx, &[50]);
        let samples = metric.test_get_value(&mut ctx, "metrics").unwrap();
        assert_eq!(samples.get(&1), Some(&2));
        assert_eq!(samples.get(&50), Some(&2));
    }

    #[test]
    fn test_negative_samples_are_skipped() {
        let mut ctx = test_context();
        let metric = metric();
        metric.accumulate_samples(&mut ctx, &[-1, -2, 7]);
        let samples = metric.test_get_value(&mut ctx, "metrics").unwrap();
        assert_eq!(samples.len(), 1);
        assert_eq!(
            test_get_num_recorded_errors(&mut ctx, metric.meta(), ErrorType::InvalidValue, None),
            1
        );
    }

    #[test]
    fn test_payload_buckets_cover_samples() {
        let mut ctx = test_context();
        let metric = metric();
        metric.accumulate_samples(&mut ctx, &[2, 10, 1000]);
        let stored = ctx
            .metrics
            .get_metric("metrics", metric.meta(), "custom_distribution")
            .unwrap();
        let payload = stored.payload();
        assert_eq!(payload["sum"], serde_json::json!(1012));
        let total: u64 = payload["values"]
            .as_object()
            .unwrap()
            .values()
            .map(|v| v.as_u64().unwrap())
            .sum();
        assert_eq!(total, 3);
    }
}
