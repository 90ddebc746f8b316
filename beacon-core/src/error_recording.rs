// Copyright 2021-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Recording-error accounting.
//!
//! Invalid uses of a metric never surface to the caller. They are counted in
//! labeled counters under the `beacon.error` category, labeled with the
//! offending metric's base identifier, and ride along in every ping the
//! metric is bound to.

use crate::context::Context;
use crate::metrics::{CommonMetricData, Lifetime, Metric};

/// Category of the error counters.
pub const ERROR_METRIC_CATEGORY: &str = "beacon.error";

/// The recognized recording error types.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorType {
    /// The value itself is invalid (negative counter, malformed UUID, …).
    InvalidValue,
    /// A labeled metric was used with an invalid label.
    InvalidLabel,
    /// The metric was used out of order (e.g. stopping an unstarted timer).
    InvalidState,
    /// The value exceeded a size bound and was truncated.
    InvalidOverflow,
    /// A stored value had the wrong type for its kind.
    InvalidType,
}

impl ErrorType {
    pub fn as_str(self) -> &'static str {
        match self {
            ErrorType::InvalidValue => "invalid_value",
            ErrorType::InvalidLabel => "invalid_label",
            ErrorType::InvalidState => "invalid_state",
            ErrorType::InvalidOverflow => "invalid_overflow",
            ErrorType::InvalidType => "invalid_type",
        }
    }
}

fn error_metric_meta(meta: &CommonMetricData, error: ErrorType) -> CommonMetricData {
    CommonMetricData {
        name: error.as_str().into(),
        category: ERROR_METRIC_CATEGORY.into(),
        send_in_pings: meta.send_in_pings.clone(),
        lifetime: Lifetime::Ping,
        disabled: false,
        dynamic_label: Some(meta.base_identifier()),
    }
}

/// Count one recording error against `meta`.
///
/// Error counters themselves are never error-reported; they write straight
/// through the database.
pub fn record_error(
    ctx: &mut Context,
    meta: &CommonMetricData,
    error: ErrorType,
    message: String,
) {
    tracing::warn!(
        metric.id = %meta.base_identifier(),
        error.kind = error.as_str(),
        "{message}"
    );
    let error_meta = error_metric_meta(meta, error);
    ctx.metrics.transform(&error_meta, "counter", &|current| {
        let current = match current {
            Some(Metric::Counter(c)) => c,
            _ => 0,
        };
        Metric::Counter(current.saturating_add(1))
    });
}

/// Number of errors of `error` recorded against `meta`, in `ping` (default:
/// the metric's first ping). Test-only.
pub fn test_get_num_recorded_errors(
    ctx: &mut Context,
    meta: &CommonMetricData,
    error: ErrorType,
    ping: Option<&str>,
) -> i32 {
    let error_meta = error_metric_meta(meta, error);
    let first_ping = meta.send_in_pings.first().cloned().unwrap_or_default();
    let ping = ping.unwrap_or(&first_ping);
    match ctx.metrics.get_metric(ping, &error_meta, "counter") {
        Some(Metric::Counter(c)) => c,
        _ => 0,
    }
}
