// Copyright 2021-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

use crate::context::Context;
use crate::error_recording::{record_error, ErrorType};
use crate::metrics::{CommonMetricData, Metric};

/// A counter metric. Only goes up, saturating at `i32::MAX`.
#[derive(Debug, Clone)]
pub struct CounterMetric {
    meta: CommonMetricData,
}

impl CounterMetric {
    pub fn new(meta: CommonMetricData) -> Self {
        Self { meta }
    }

    pub fn meta(&self) -> &CommonMetricData {
        &self.meta
    }

    /// Increase the counter by `amount`. Negative or zero amounts record an
    /// `invalid_value` error instead.
    pub fn add(&self, ctx: &mut Context, amount: i32) {
        if !ctx.should_record(&self.meta) {
            return;
        }
        if amount <= 0 {
            record_error(
                ctx,
                &self.meta,
                ErrorType::InvalidValue,
                format!("added negative or zero value {amount}"),
            );
            return;
        }
        ctx.metrics.transform(&self.meta, "counter", &|current| {
            let current = match current {
                Some(Metric::Counter(c)) => c,
                _ => 0,
            };
            Metric::Counter(current.saturating_add(amount))
        });
    }

    /// The currently stored value for `ping`, if any. Test-only.
    pub fn test_get_value(&self, ctx: &mut Context, ping: &str) -> Option<i32> {
        match ctx.metrics.get_metric(ping, &self.meta, "counter")? {
            Metric::Counter(c) => Some(c),
            _ => None,
        }
    }
}
