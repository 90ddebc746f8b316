// Copyright 2021-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

use std::marker::PhantomData;
use std::sync::OnceLock;

use regex::Regex;

use crate::context::Context;
use crate::error_recording::{record_error, ErrorType};
use crate::metrics::{
    BooleanMetric, CommonMetricData, CounterMetric, QuantityMetric, StringMetric,
};

/// Label recorded in place of anything invalid or over the cardinality cap.
pub const OTHER_LABEL: &str = "__other__";

/// Maximum number of distinct dynamic labels per metric.
pub const MAX_LABELS: usize = 16;

fn label_is_valid(label: &str) -> bool {
    static RE: OnceLock<Regex> = OnceLock::new();
    // The pattern is a literal; it cannot fail to compile.
    #[allow(clippy::unwrap_used)]
    let re = RE
        .get_or_init(|| Regex::new(r"^[a-z_][a-z0-9_-]{0,29}(\.[a-z_][a-z0-9_-]{0,29})*$").unwrap());
    label.len() <= 71 && re.is_match(label)
}

/// Metric types that may be wrapped by [`LabeledMetric`].
pub trait AllowLabeled {
    fn kind() -> &'static str;
    fn with_meta(meta: CommonMetricData) -> Self;
}

impl AllowLabeled for BooleanMetric {
    fn kind() -> &'static str {
        "boolean"
    }
    fn with_meta(meta: CommonMetricData) -> Self {
        BooleanMetric::new(meta)
    }
}

impl AllowLabeled for CounterMetric {
    fn kind() -> &'static str {
        "counter"
    }
    fn with_meta(meta: CommonMetricData) -> Self {
        CounterMetric::new(meta)
    }
}

impl AllowLabeled for StringMetric {
    fn kind() -> &'static str {
        "string"
    }
    fn with_meta(meta: CommonMetricData) -> Self {
        StringMetric::new(meta)
    }
}

impl AllowLabeled for QuantityMetric {
    fn kind() -> &'static str {
        "quantity"
    }
    fn with_meta(meta: CommonMetricData) -> Self {
        QuantityMetric::new(meta)
    }
}

/// A labeled metric: a family of submetrics of one kind, keyed by label.
///
/// When the definition carries a static label set, anything outside the set
/// lands under [`OTHER_LABEL`]. Dynamic labels are validated against the
/// label regex and the cardinality cap instead.
#[derive(Debug, Clone)]
pub struct LabeledMetric<T: AllowLabeled> {
    meta: CommonMetricData,
    static_labels: Option<Vec<String>>,
    _marker: PhantomData<T>,
}

impl<T: AllowLabeled> LabeledMetric<T> {
    pub fn new(meta: CommonMetricData, static_labels: Option<Vec<String>>) -> Self {
        Self {
            meta,
            static_labels,
            _marker: PhantomData,
        }
    }

    pub fn meta(&self) -> &CommonMetricData {
        &self.meta
    }

    /// The submetric for `label`, after validation.
    pub fn get(&self, ctx: &mut Context, label: &str) -> T {
        let label = self.validate_label(ctx, label);
        T::with_meta(CommonMetricData {
            dynamic_label: Some(label),
            ..self.meta.clone()
        })
    }

    fn validate_label(&self, ctx: &mut Context, label: &str) -> String {
        if let Some(allowed) = &self.static_labels {
            if allowed.iter().any(|l| l == label) {
                return label.to_string();
            }
            record_error(
                ctx,
                &self.meta,
                ErrorType::InvalidLabel,
                format!("label {label:?} is not in the allowed set"),
            );
            return OTHER_LABEL.to_string();
        }

        if !label_is_valid(label) {
            record_error(
                ctx,
                &self.meta,
                ErrorType::InvalidLabel,
                format!("label {label:?} fails validation"),
            );
            return OTHER_LABEL.to_string();
        }

        // Cardinality cap: a label already seen in storage stays valid, new
        // ones beyond the cap collapse into __other__.
        let base = self.meta.base_identifier();
        let seen = self
            .meta
            .send_in_pings
            .first()
            .map(|ping| ctx.metrics.stored_labels(ping, T::kind(), &base))
            .unwrap_or_default();
        if seen.len() >= MAX_LABELS && !seen.iter().any(|l| l == label) {
            record_error(
                ctx,
                &self.meta,
                ErrorType::InvalidLabel,
                format!("label {label:?} exceeds the cap of {MAX_LABELS} labels"),
            );
            return OTHER_LABEL.to_string();
        }

        label.to_string()
    }
}
