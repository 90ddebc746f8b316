// Copyright 2021-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Rate limiter implementations
use std::time::{Duration, Instant};

/// Outcome of asking the rate limiter for one unit of work.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RateLimiterState {
    /// The caller may proceed; the interval budget has been charged.
    Allowed,
    /// The interval budget is exhausted. The caller should wait for the
    /// embedded duration, after which a fresh window opens.
    Throttled(Duration),
}

/// Windowed count rate limiter.
///
/// Allows at most `max_count` units per `interval`. The window starts lazily
/// on the first request after the previous window elapsed, so an idle
/// limiter never throttles.
///
/// Not thread safe, wrap in a `Mutex` when shared.
#[derive(Debug)]
pub struct RateLimiter {
    interval: Duration,
    max_count: u32,
    started: Option<Instant>,
    count: u32,
}

impl RateLimiter {
    pub fn new(interval: Duration, max_count: u32) -> Self {
        Self {
            interval,
            max_count,
            started: None,
            count: 0,
        }
    }

    /// Charge one unit against the current window.
    pub fn try_acquire(&mut self) -> RateLimiterState {
        self.try_acquire_at(Instant::now())
    }

    /// Same as [`RateLimiter::try_acquire`], with an externally supplied
    /// clock reading. Requests older than the current window are treated as
    /// belonging to it.
    pub fn try_acquire_at(&mut self, now: Instant) -> RateLimiterState {
        match self.started {
            Some(started) if now.saturating_duration_since(started) < self.interval => {}
            _ => {
                // Previous window elapsed (or first request ever), open a new one.
                self.started = Some(now);
                self.count = 0;
            }
        }

        if self.count >= self.max_count {
            // `started` is always set at this point.
            let elapsed = self
                .started
                .map(|s| now.saturating_duration_since(s))
                .unwrap_or_default();
            return RateLimiterState::Throttled(self.interval.saturating_sub(elapsed));
        }

        self.count += 1;
        RateLimiterState::Allowed
    }

    /// Number of units still available in the current window.
    pub fn remaining(&self) -> u32 {
        self.max_count.saturating_sub(self.count)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const INTERVAL: Duration = Duration::from_secs(60);

    #[test]
    fn test_allows_up_to_max_count() {
        let mut limiter = RateLimiter::new(INTERVAL, 3);
        let now = Instant::now();
        for _ in 0..3 {
            assert_eq!(limiter.try_acquire_at(now), RateLimiterState::Allowed);
        }
        assert!(matches!(
            limiter.try_acquire_at(now),
            RateLimiterState::Throttled(_)
        ));
    }

    #[test]
    fn test_window_reopens_after_interval() {
        let mut limiter = RateLimiter::new(INTERVAL, 1);
        let now = Instant::now();
        assert_eq!(limiter.try_acquire_at(now), RateLimiterState::Allowed);
        assert!(matches!(
            limiter.try_acquire_at(now + Duration::from_secs(30)),
            RateLimiterState::Throttled(_)
        ));
        assert_eq!(
            limiter.try_acquire_at(now + INTERVAL),
            RateLimiterState::Allowed
        );
    }

    #[test]
    fn test_throttled_reports_time_to_next_window() {
        let mut limiter = RateLimiter::new(INTERVAL, 1);
        let now = Instant::now();
        assert_eq!(limiter.try_acquire_at(now), RateLimiterState::Allowed);
        match limiter.try_acquire_at(now + Duration::from_secs(45)) {
            RateLimiterState::Throttled(remaining) => {
                assert_eq!(remaining, Duration::from_secs(15));
            }
            other => panic!("expected throttled, got {other:?}"),
        }
    }

    #[test]
    fn test_idle_limiter_never_throttles() {
        let mut limiter = RateLimiter::new(INTERVAL, 2);
        let mut now = Instant::now();
        for _ in 0..10 {
            now += INTERVAL;
            assert_eq!(limiter.try_acquire_at(now), RateLimiterState::Allowed);
        }
    }

    #[test]
    fn test_remaining() {
        let mut limiter = RateLimiter::new(INTERVAL, 5);
        let now = Instant::now();
        assert_eq!(limiter.remaining(), 5);
        limiter.try_acquire_at(now);
        limiter.try_acquire_at(now);
        assert_eq!(limiter.remaining(), 3);
    }
}
