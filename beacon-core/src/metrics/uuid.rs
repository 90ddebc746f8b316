// Copyright 2021-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

use std::sync::OnceLock;

use regex::Regex;

use crate::context::Context;
use crate::error_recording::{record_error, ErrorType};
use crate::metrics::{CommonMetricData, Metric};

/// Loose UUID shape check: 8-4-4-4-12 hex groups, any version/variant.
pub(crate) fn looks_like_uuid(value: &str) -> bool {
    static RE: OnceLock<Regex> = OnceLock::new();
    // The pattern is a literal; it cannot fail to compile.
    #[allow(clippy::unwrap_used)]
    let re = RE.get_or_init(|| {
        Regex::new(
            r"^[0-9a-fA-F]{8}-[0-9a-fA-F]{4}-[0-9a-fA-F]{4}-[0-9a-fA-F]{4}-[0-9a-fA-F]{12}$",
        )
        .unwrap()
    });
    re.is_match(value)
}

/// A UUID metric. Stores an identifier in canonical hyphenated form.
#[derive(Debug, Clone)]
pub struct UuidMetric {
    meta: CommonMetricData,
}

impl UuidMetric {
    pub fn new(meta: CommonMetricData) -> Self {
        Self { meta }
    }

    pub fn meta(&self) -> &CommonMetricData {
        &self.meta
    }

    /// Set to `value`. Inputs that do not look like a UUID record
    /// `invalid_value` and do not persist.
    pub fn set(&self, ctx: &mut Context, value: &str) {
        if !ctx.should_record(&self.meta) {
            return;
        }
        if !looks_like_uuid(value) {
            record_error(
                ctx,
                &self.meta,
                ErrorType::InvalidValue,
                format!("{value:?} is not a valid UUID"),
            );
            return;
        }
        ctx.metrics
            .record(&self.meta, &Metric::Uuid(value.to_lowercase()));
    }

    /// Generate a fresh random UUID, record and return it.
    pub fn generate_and_set(&self, ctx: &mut Context) -> ::uuid::Uuid {
        let id = ::uuid::Uuid::new_v4();
        self.set(ctx, &id.to_string());
        id
    }

    /// The currently stored value for `ping`, if any. Test-only.
    pub fn test_get_value(&self, ctx: &mut Context, ping: &str) -> Option<String> {
        match ctx.metrics.get_metric(ping, &self.meta, "uuid")? {
            Metric::Uuid(u) => Some(u),
            _ => None,
        }
    }
}
