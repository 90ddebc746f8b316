// Copyright 2021-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

use crate::context::Context;
use crate::metrics::{CommonMetricData, Metric};

/// A boolean metric. Records a simple true/false flag.
#[derive(Debug, Clone)]
pub struct BooleanMetric {
    meta: CommonMetricData,
}

impl BooleanMetric {
    pub fn new(meta: CommonMetricData) -> Self {
        Self { meta }
    }

    pub fn meta(&self) -> &CommonMetricData {
        &self.meta
    }

    pub fn set(&self, ctx: &mut Context, value: bool) {
        if !ctx.should_record(&self.meta) {
            return;
        }
        ctx.metrics.record(&self.meta, &Metric::Boolean(value));
    }

    /// The currently stored value for `ping`, if any. Test-only.
    pub fn test_get_value(&self, ctx: &mut Context, ping: &str) -> Option<bool> {
        match ctx.metrics.get_metric(ping, &self.meta, "boolean")? {
            Metric::Boolean(b) => Some(b),
            _ => None,
        }
    }
}
