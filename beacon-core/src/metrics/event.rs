// Copyright 2021-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::context::Context;
use crate::error_recording::{record_error, ErrorType};
use crate::metrics::{CommonMetricData, MAX_STRING_LENGTH};

/// One recorded event, as persisted and as serialized into a ping.
///
/// Timestamps are milliseconds relative to the per-process epoch, so events
/// within a ping stay monotonic even across wall clock adjustments.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecordedEvent {
    pub timestamp: u64,
    pub category: String,
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    #[serde(default)]
    pub extra: Option<BTreeMap<String, String>>,
}

/// An event metric. Records occurrences with optional string extras into the
/// append-only events database.
#[derive(Debug, Clone)]
pub struct EventMetric {
    meta: CommonMetricData,
    allowed_extra_keys: Vec<String>,
}

impl EventMetric {
    pub fn new(meta: CommonMetricData, allowed_extra_keys: Vec<String>) -> Self {
        Self {
            meta,
            allowed_extra_keys,
        }
    }

    pub fn meta(&self) -> &CommonMetricData {
        &self.meta
    }

    /// Record an occurrence of this event.
    ///
    /// Unknown extra keys record `invalid_value` and are dropped; overlong
    /// extra values are truncated with `invalid_overflow`. When the events
    /// list of a ping reaches the configured maximum the ping is submitted
    /// eagerly.
    pub fn record(&self, ctx: &mut Context, extra: Option<BTreeMap<String, String>>) {
        if !ctx.should_record(&self.meta) {
            return;
        }

        let extra = match extra {
            None => None,
            Some(map) => {
                let mut cleaned = BTreeMap::new();
                for (key, value) in map {
                    if !self.allowed_extra_keys.contains(&key) {
                        record_error(
                            ctx,
                            &self.meta,
                            ErrorType::InvalidValue,
                            format!("unknown extra key {key:?}"),
                        );
                        continue;
                    }
                    let value = if value.len() > MAX_STRING_LENGTH {
                        record_error(
                            ctx,
                            &self.meta,
                            ErrorType::InvalidOverflow,
                            format!("extra value for {key:?} exceeds {MAX_STRING_LENGTH} bytes"),
                        );
                        let mut cut = MAX_STRING_LENGTH;
                        while !value.is_char_boundary(cut) {
                            cut -= 1;
                        }
                        value[..cut].to_string()
                    } else {
                        value
                    };
                    cleaned.insert(key, value);
                }
                if cleaned.is_empty() {
                    None
                } else {
                    Some(cleaned)
                }
            }
        };

        let event = RecordedEvent {
            timestamp: ctx.next_event_timestamp(),
            category: self.meta.category.clone(),
            name: self.meta.name.clone(),
            extra,
        };

        let max_events = ctx.config.max_events;
        let mut full = Vec::new();
        for ping in &self.meta.send_in_pings {
            if ctx.events.record(ping, &event) >= max_events {
                full.push(ping.clone());
            }
        }
        for ping in full {
            if let Err(e) = crate::pings::submit_ping(ctx, &ping, Some("max_capacity")) {
                tracing::warn!(ping.name = %ping, error = %e, "Eager event ping submission failed");
            }
        }
    }

    /// All stored occurrences for `ping`. Test-only.
    pub fn test_get_value(&self, ctx: &mut Context, ping: &str) -> Vec<RecordedEvent> {
        ctx.events
            .test_get_events(ping)
            .into_iter()
            .filter(|e| e.category == self.meta.category && e.name == self.meta.name)
            .collect()
    }
}
