// Copyright 2021-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

use crate::context::Context;
use crate::error_recording::{record_error, ErrorType};
use crate::metrics::{CommonMetricData, Metric, MAX_STRING_LENGTH};

/// A string metric. Values longer than [`MAX_STRING_LENGTH`] bytes are
/// truncated and an `invalid_overflow` error is recorded.
#[derive(Debug, Clone)]
pub struct StringMetric {
    meta: CommonMetricData,
}

impl StringMetric {
    pub fn new(meta: CommonMetricData) -> Self {
        Self { meta }
    }

    pub fn meta(&self) -> &CommonMetricData {
        &self.meta
    }

    pub fn set(&self, ctx: &mut Context, value: impl Into<String>) {
        if !ctx.should_record(&self.meta) {
            return;
        }
        let value = value.into();
        let value = if value.len() > MAX_STRING_LENGTH {
            record_error(
                ctx,
                &self.meta,
                ErrorType::InvalidOverflow,
                format!(
                    "value length {} exceeds maximum of {MAX_STRING_LENGTH}",
                    value.len()
                ),
            );
            truncate_at_boundary(value, MAX_STRING_LENGTH)
        } else {
            value
        };
        ctx.metrics.record(&self.meta, &Metric::String(value));
    }

    /// The currently stored value for `ping`, if any. Test-only.
    pub fn test_get_value(&self, ctx: &mut Context, ping: &str) -> Option<String> {
        match ctx.metrics.get_metric(ping, &self.meta, "string")? {
            Metric::String(s) => Some(s),
            _ => None,
        }
    }
}

/// Truncate to at most `max_bytes`, backing up to a char boundary.
fn truncate_at_boundary(mut value: String, max_bytes: usize) -> String {
    if value.len() <= max_bytes {
        return value;
    }
    let mut cut = max_bytes;
    while !value.is_char_boundary(cut) {
        cut -= 1;
    }
    value.truncate(cut);
    value
}
