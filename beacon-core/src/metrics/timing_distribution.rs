// Copyright 2021-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

use std::collections::{BTreeMap, HashMap};
use std::time::{Duration, Instant};

use crate::context::Context;
use crate::error_recording::{record_error, ErrorType};
use crate::metrics::{CommonMetricData, Metric, TimeUnit};

/// Opaque handle for one running timer of a timing distribution.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TimerId(u64);

impl From<u64> for TimerId {
    fn from(value: u64) -> Self {
        Self(value)
    }
}

fn duration_to_sample(unit: TimeUnit, duration: Duration) -> u64 {
    match unit {
        TimeUnit::Nanosecond => duration.as_nanos().min(u64::MAX as u128) as u64,
        TimeUnit::Microsecond => duration.as_micros().min(u64::MAX as u128) as u64,
        TimeUnit::Millisecond => duration.as_millis().min(u64::MAX as u128) as u64,
        TimeUnit::Second => duration.as_secs(),
        TimeUnit::Hour => duration.as_secs() / 3600,
        TimeUnit::Minute => duration.as_secs() / 60,
        TimeUnit::Day => duration.as_secs() / 86400,
    }
}

/// A timing distribution metric.
///
/// Durations accumulate into a functional log-linear histogram; the stored
/// form is the sparse `{sample → count}` map, rebucketed at payload time.
#[derive(Debug)]
pub struct TimingDistributionMetric {
    meta: CommonMetricData,
    time_unit: TimeUnit,
    next_timer: u64,
    running: HashMap<TimerId, Instant>,
}

impl TimingDistributionMetric {
    pub fn new(meta: CommonMetricData, time_unit: TimeUnit) -> Self {
        Self {
            meta,
            time_unit,
            next_timer: 0,
            running: HashMap::new(),
        }
    }

    pub fn meta(&self) -> &CommonMetricData {
        &self.meta
    }

    /// Start a timer and hand back its id.
    pub fn start(&mut self) -> TimerId {
        let id = TimerId(self.next_timer);
        self.next_timer += 1;
        self.running.insert(id, Instant::now());
        id
    }

    /// Stop the timer and accumulate the elapsed time.
    ///
    /// Stopping a timer that was never started (or already stopped) records
    /// an `invalid_state` error.
    pub fn stop_and_accumulate(&mut self, ctx: &mut Context, id: TimerId) {
        let Some(started) = self.running.remove(&id) else {
            record_error(
                ctx,
                &self.meta,
                ErrorType::InvalidState,
                format!("timer {id:?} was not running"),
            );
            return;
        };
        if !ctx.should_record(&self.meta) {
            return;
        }
        let sample = duration_to_sample(self.time_unit, started.elapsed());
        self.accumulate(ctx, sample);
    }

    /// Discard a running timer without recording.
    pub fn cancel(&mut self, id: TimerId) {
        self.running.remove(&id);
    }

    /// Accumulate externally measured samples. Negative samples record
    /// `invalid_value` and are skipped.
    pub fn accumulate_raw_samples(&self, ctx: &mut Context, samples: &[i64]) {
        if !ctx.should_record(&self.meta) {
            return;
        }
        let mut negatives = 0;
        for &sample in samples {
            if sample < 0 {
                negatives += 1;
                continue;
            }
            self.accumulate(ctx, sample as u64);
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

    fn accumulate(&self, ctx: &mut Context, sample: u64) {
        ctx.metrics
            .transform(&self.meta, "timing_distribution", &move |current| {
                let mut samples = match current {
                    Some(Metric::TimingDistribution(m)) => m,
                    _ => BTreeMap::new(),
                };
                *samples.entry(sample).or_insert(0) += 1;
                Metric::TimingDistribution(samples)
            });
    }

    /// The raw stored `{sample → count}` map for `ping`. Test-only.
    pub fn test_get_value(&self, ctx: &mut Context, ping: &str) -> Option<BTreeMap<u64, u64>> {
        match ctx.metrics.get_metric(ping, &self.meta, "timing_distribution")? {
            Metric::TimingDistribution(m) => Some(m),
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

    fn metric() -> TimingDistributionMetric {
        TimingDistributionMetric::new(
            CommonMetricData {
                name: "page_load".into(),
                category: "perf".into(),
                send_in_pings: vec!["metrics".into()],
                lifetime: Lifetime::Ping,
                ..Default::default()
            },
            TimeUnit::Microsecond,
        )
    }

    #[test]
    fn test_start_stop_accumulates_one_sample() {
        let mut ctx = test_context();
        let mut metric = metric();
        let id = metric.start();
        metric.stop_and_accumulate(&mut ctx, id);
        let samples = metric.test_get_value(&mut ctx, "metrics").unwrap();
        assert_eq!(samples.values().sum::<u64>(), 1);
    }

    #[test]
    fn test_stop_without_start_is_invalid_state() {
        let mut ctx = test_context();
        let mut metric = metric();
        metric.stop_and_accumulate(&mut ctx, TimerId::from(999));
        assert_eq!(metric.test_get_value(&mut ctx, "metrics"), None);
        assert_eq!(
            test_get_num_recorded_errors(&mut ctx, metric.meta(), ErrorType::InvalidState, None),
            1
        );
    }

    #[test]
    fn test_cancel_discards_timer() {
        let mut ctx = test_context();
        let mut metric = metric();
        let id = metric.start();
        metric.cancel(id);
        metric.stop_and_accumulate(&mut ctx, id);
        assert_eq!(metric.test_get_value(&mut ctx, "metrics"), None);
        assert_eq!(
            test_get_num_recorded_errors(&mut ctx, metric.meta(), ErrorType::InvalidState, None),
            1
        );
    }

    #[test]
    fn test_raw_samples_and_negatives() {
        let mut ctx = test_context();
        let metric = metric();
        metric.accumulate_raw_samples(&mut ctx, &[10, 10, -5, 250]);
        let samples = metric.test_get_value(&mut ctx, "metrics").unwrap();
        assert_eq!(samples.get(&10), Some(&2));
        assert_eq!(samples.get(&250), Some(&1));
        assert_eq!(
            test_get_num_recorded_errors(&mut ctx, metric.meta(), ErrorType::InvalidValue, None),
            1
        );
    }

    #[test]
    fn test_duration_conversion() {
        let d = Duration::from_millis(1500);
        assert_eq!(duration_to_sample(TimeUnit::Millisecond, d), 1500);
        assert_eq!(duration_to_sample(TimeUnit::Second, d), 1);
        assert_eq!(duration_to_sample(TimeUnit::Microsecond, d), 1_500_000);
    }
}
