// Copyright 2021-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

use crate::context::Context;
use crate::error_recording::{record_error, ErrorType};
use crate::metrics::{CommonMetricData, Metric};

/// A quantity metric. Records a single non-negative integer, e.g. the width
/// of a window or the number of open tabs.
#[derive(Debug, Clone)]
pub struct QuantityMetric {
    meta: CommonMetricData,
}

impl QuantityMetric {
    pub fn new(meta: CommonMetricData) -> Self {
        Self { meta }
    }

    pub fn meta(&self) -> &CommonMetricData {
        &self.meta
    }

    /// Set to `value`. Negative values record an `invalid_value` error.
    pub fn set(&self, ctx: &mut Context, value: i64) {
        if !ctx.should_record(&self.meta) {
            return;
        }
        if value < 0 {
            record_error(
                ctx,
                &self.meta,
                ErrorType::InvalidValue,
                format!("set to negative value {value}"),
            );
            return;
        }
        ctx.metrics.record(&self.meta, &Metric::Quantity(value));
    }

    /// The currently stored value for `ping`, if any. Test-only.
    pub fn test_get_value(&self, ctx: &mut Context, ping: &str) -> Option<i64> {
        match ctx.metrics.get_metric(ping, &self.meta, "quantity")? {
            Metric::Quantity(q) => Some(q),
            _ => None,
        }
    }
}
