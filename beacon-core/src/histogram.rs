// Copyright 2021-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Histogram accumulation for the distribution metric types.
//!
//! Two bucketing schemes exist:
//!
//! * [`PrecomputedExponential`]: bucket edges are computed once from
//!   `(min, max, bucket_count)` by logarithmic interpolation; samples are
//!   placed by binary search. Used by custom distributions.
//! * [`Functional`]: bucket minimums are a pure function of the sample, so
//!   no edge list is materialized. Used by timing distributions.

use std::collections::BTreeMap;

/// Lower bound of the first non-underflow bucket in a precomputed histogram.
const DEFAULT_MIN_FIRST_BUCKET: u64 = 1;

pub trait Bucketing {
    /// The minimum value of the bucket `sample` falls into.
    fn sample_to_bucket_minimum(&self, sample: u64) -> u64;
}

/// Exponential bucketing with materialized edges.
///
/// Edges are strictly increasing: interpolation rounds forward by at least
/// one per step, so `bucket_count` distinct edges always cover `[0, max]`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PrecomputedExponential {
    bucket_ranges: Vec<u64>,
}

impl PrecomputedExponential {
    pub fn new(min: u64, max: u64, bucket_count: usize) -> Self {
        Self {
            bucket_ranges: exponential_bucket_ranges(min, max, bucket_count),
        }
    }

    pub fn ranges(&self) -> &[u64] {
        &self.bucket_ranges
    }
}

impl Bucketing for PrecomputedExponential {
    fn sample_to_bucket_minimum(&self, sample: u64) -> u64 {
        // Find the last edge that is <= sample. Overflow samples land in the
        // last bucket.
        let idx = match self.bucket_ranges.binary_search(&sample) {
            Ok(i) => i,
            Err(0) => 0,
            Err(i) => i - 1,
        };
        self.bucket_ranges[idx]
    }
}

fn exponential_bucket_ranges(min: u64, max: u64, bucket_count: usize) -> Vec<u64> {
    let min = min.max(DEFAULT_MIN_FIRST_BUCKET);
    let mut ranges = Vec::with_capacity(bucket_count);
    // Bucket 0 is the underflow bucket.
    ranges.push(0);
    if bucket_count < 2 {
        return ranges;
    }

    let log_max = (max as f64).ln();
    let mut current = min;
    ranges.push(current);
    for i in 2..bucket_count {
        let log_current = (current as f64).ln();
        let log_ratio = (log_max - log_current) / (bucket_count - i) as f64;
        let next = (log_current + log_ratio).exp().round() as u64;
        // Round forward by at least one so edges stay strictly increasing.
        current = if next > current { next } else { current + 1 };
        ranges.push(current);
    }
    ranges
}

/// Log-linear bucketing computed on the fly.
///
/// With log base `b` and `n` buckets per magnitude, the bucket index of a
/// sample is `⌊log_g(sample + 1)⌋` where `g = b^(1/n)`; the stored histogram
/// is the sparse `{bucket index → count}` map.
#[derive(Debug, Clone, PartialEq)]
pub struct Functional {
    exponent: f64,
}

impl Functional {
    pub fn new(log_base: f64, buckets_per_magnitude: f64) -> Self {
        Self {
            exponent: log_base.powf(1.0 / buckets_per_magnitude),
        }
    }

    fn sample_to_bucket_index(&self, sample: u64) -> u64 {
        // The cast truncates toward zero, which is floor for non-negatives.
        ((sample.saturating_add(1) as f64).ln() / self.exponent.ln()) as u64
    }

    pub fn bucket_index_to_bucket_minimum(&self, index: u64) -> u64 {
        self.exponent.powf(index as f64).floor() as u64
    }
}

impl Bucketing for Functional {
    fn sample_to_bucket_minimum(&self, sample: u64) -> u64 {
        if sample == 0 {
            return 0;
        }
        self.bucket_index_to_bucket_minimum(self.sample_to_bucket_index(sample))
    }
}

/// A histogram: sparse bucket counts plus running sum and count.
#[derive(Debug, Clone, PartialEq)]
pub struct Histogram<B: Bucketing> {
    values: BTreeMap<u64, u64>,
    count: u64,
    sum: u64,
    bucketing: B,
}

impl<B: Bucketing> Histogram<B> {
    pub fn new(bucketing: B) -> Self {
        Self {
            values: BTreeMap::new(),
            count: 0,
            sum: 0,
            bucketing,
        }
    }

    pub fn accumulate(&mut self, sample: u64) {
        let bucket = self.bucketing.sample_to_bucket_minimum(sample);
        *self.values.entry(bucket).or_insert(0) += 1;
        self.count += 1;
        self.sum = self.sum.saturating_add(sample);
    }

    /// Bucket-minimum → count map of everything accumulated so far.
    pub fn values(&self) -> &BTreeMap<u64, u64> {
        &self.values
    }

    pub fn count(&self) -> u64 {
        self.count
    }

    pub fn sum(&self) -> u64 {
        self.sum
    }

    pub fn bucketing(&self) -> &B {
        &self.bucketing
    }
}
