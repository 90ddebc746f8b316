// Copyright 2021-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

use chrono::{DateTime, FixedOffset, Local, TimeZone};
use serde_json::{json, Value};

use crate::context::Context;
use crate::error_recording::{record_error, ErrorType};
use crate::metrics::{CommonMetricData, Metric};

/// Precision a datetime metric truncates to when projected into a payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimeUnit {
    Nanosecond,
    Microsecond,
    Millisecond,
    Second,
    Minute,
    Hour,
    Day,
}

impl TimeUnit {
    fn as_str(self) -> &'static str {
        match self {
            TimeUnit::Nanosecond => "nanosecond",
            TimeUnit::Microsecond => "microsecond",
            TimeUnit::Millisecond => "millisecond",
            TimeUnit::Second => "second",
            TimeUnit::Minute => "minute",
            TimeUnit::Hour => "hour",
            TimeUnit::Day => "day",
        }
    }

    fn from_str(s: &str) -> Option<Self> {
        Some(match s {
            "nanosecond" => TimeUnit::Nanosecond,
            "microsecond" => TimeUnit::Microsecond,
            "millisecond" => TimeUnit::Millisecond,
            "second" => TimeUnit::Second,
            "minute" => TimeUnit::Minute,
            "hour" => TimeUnit::Hour,
            "day" => TimeUnit::Day,
            _ => return None,
        })
    }

    /// `chrono` format string rendering a datetime truncated to this unit,
    /// with timezone offset where the unit carries one.
    fn format_pattern(self) -> &'static str {
        match self {
            TimeUnit::Nanosecond => "%Y-%m-%dT%H:%M:%S%.9f%:z",
            TimeUnit::Microsecond => "%Y-%m-%dT%H:%M:%S%.6f%:z",
            TimeUnit::Millisecond => "%Y-%m-%dT%H:%M:%S%.3f%:z",
            TimeUnit::Second => "%Y-%m-%dT%H:%M:%S%:z",
            TimeUnit::Minute => "%Y-%m-%dT%H:%M%:z",
            TimeUnit::Hour => "%Y-%m-%dT%H%:z",
            TimeUnit::Day => "%Y-%m-%d%:z",
        }
    }
}

/// Stored representation of a datetime: wall clock instant, the offset it
/// was observed in, and the precision to render at.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Datetime {
    pub timestamp_ms: i64,
    pub offset_seconds: i32,
    pub time_unit: TimeUnit,
}

impl Datetime {
    pub fn from_chrono(value: &DateTime<FixedOffset>, time_unit: TimeUnit) -> Self {
        Self {
            timestamp_ms: value.timestamp_millis(),
            offset_seconds: value.offset().local_minus_utc(),
            time_unit,
        }
    }

    /// Local wall clock time, now.
    pub fn now(time_unit: TimeUnit) -> Self {
        let now = Local::now();
        Self::from_chrono(&now.fixed_offset(), time_unit)
    }

    pub fn to_chrono(&self) -> Option<DateTime<FixedOffset>> {
        let offset = FixedOffset::east_opt(self.offset_seconds)?;
        offset.timestamp_millis_opt(self.timestamp_ms).single()
    }

    pub fn stored(&self) -> Value {
        json!({
            "timestamp_ms": self.timestamp_ms,
            "offset_seconds": self.offset_seconds,
            "time_unit": self.time_unit.as_str(),
        })
    }

    pub fn from_stored(value: &Value) -> Option<Self> {
        let obj = value.as_object()?;
        let parsed = Self {
            timestamp_ms: obj.get("timestamp_ms")?.as_i64()?,
            offset_seconds: obj.get("offset_seconds")?.as_i64()? as i32,
            time_unit: TimeUnit::from_str(obj.get("time_unit")?.as_str()?)?,
        };
        // An offset chrono cannot represent means the stored value is junk.
        parsed.to_chrono()?;
        Some(parsed)
    }

    /// Render truncated to the configured time unit, offset included.
    pub fn render(&self) -> String {
        match self.to_chrono() {
            Some(dt) => dt.format(self.time_unit.format_pattern()).to_string(),
            None => String::new(),
        }
    }
}

/// A datetime metric. Records a wall clock instant together with the
/// timezone offset it was observed in.
#[derive(Debug, Clone)]
pub struct DatetimeMetric {
    meta: CommonMetricData,
    time_unit: TimeUnit,
}

impl DatetimeMetric {
    pub fn new(meta: CommonMetricData, time_unit: TimeUnit) -> Self {
        Self { meta, time_unit }
    }

    pub fn meta(&self) -> &CommonMetricData {
        &self.meta
    }

    /// Record `value`, or the current local time when `None`.
    pub fn set(&self, ctx: &mut Context, value: Option<DateTime<FixedOffset>>) {
        if !ctx.should_record(&self.meta) {
            return;
        }
        let datetime = match value {
            Some(v) => Datetime::from_chrono(&v, self.time_unit),
            None => Datetime::now(self.time_unit),
        };
        ctx.metrics.record(&self.meta, &Metric::Datetime(datetime));
    }

    /// Record from raw parts. Out-of-range offsets record `invalid_value`.
    pub fn set_raw(&self, ctx: &mut Context, timestamp_ms: i64, offset_seconds: i32) {
        if !ctx.should_record(&self.meta) {
            return;
        }
        let datetime = Datetime {
            timestamp_ms,
            offset_seconds,
            time_unit: self.time_unit,
        };
        if datetime.to_chrono().is_none() {
            record_error(
                ctx,
                &self.meta,
                ErrorType::InvalidValue,
                format!("unrepresentable datetime: ts {timestamp_ms} offset {offset_seconds}"),
            );
            return;
        }
        ctx.metrics.record(&self.meta, &Metric::Datetime(datetime));
    }

    /// The currently stored value for `ping`, if any. Test-only.
    pub fn test_get_value(&self, ctx: &mut Context, ping: &str) -> Option<Datetime> {
        match ctx.metrics.get_metric(ping, &self.meta, "datetime")? {
            Metric::Datetime(d) => Some(d),
            _ => None,
        }
    }
}
