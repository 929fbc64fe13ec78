//! # Exponential Histogram Estimators
//!
//! Sliding-window mean and variance in O(k · log N) memory per key.
//!
//! The sketch keeps a list of buckets, youngest first. Each bucket covers a
//! dyadic run of arrivals and carries the run's count, sum, and sum of
//! squares. Arrivals enter as singleton buckets; whenever more than `k`
//! buckets share a size, the two oldest of that size merge (the counts add,
//! doubling the size; the merged bucket keeps the younger rank). Buckets
//! whose rank has fallen N arrivals behind are dropped whole — the oldest
//! bucket may straddle the window boundary and is included entirely, which
//! bounds the relative error at roughly `1 / (k - 1)`.
//!
//! The window clock is the arrival rank, not the tuple timestamp, so a
//! timestamp that moves backwards is simply treated as "now".

use std::collections::VecDeque;
use std::sync::Arc;

use fxhash::FxHashMap;

use crate::dataflow::{Operator, OperatorError, OutputVec};
use crate::feature::{Feature, FeatureMap, FeatureSubscriber, SubscriberError};
use crate::flow::{FlowField, FlowRecord, KeySpec};

use super::FeatureEmitter;

#[derive(Debug, Clone, Copy)]
struct Bucket {
    /// Rank of the youngest arrival merged into this bucket.
    rank: u64,
    count: u64,
    sum: f64,
    sum_sq: f64,
}

/// The per-key sliding-window sketch.
#[derive(Debug, Clone)]
pub struct ExponentialHistogram {
    window_size: u64,
    k: usize,
    next_rank: u64,
    /// Youngest first.
    buckets: VecDeque<Bucket>,
}

impl ExponentialHistogram {
    /// Creates a sketch over the last `window_size` arrivals with bucket
    /// decay factor `k` (canonical choice 2).
    ///
    /// # Panics
    ///
    /// Panics if `window_size` is 0 or `k` < 2.
    #[must_use]
    pub fn new(window_size: usize, k: usize) -> Self {
        assert!(window_size > 0, "window_size must be > 0");
        assert!(k >= 2, "k must be >= 2");
        Self {
            window_size: window_size as u64,
            k,
            next_rank: 0,
            buckets: VecDeque::new(),
        }
    }

    /// Inserts one observation.
    pub fn insert(&mut self, value: f64) {
        self.next_rank += 1;
        self.buckets.push_front(Bucket {
            rank: self.next_rank,
            count: 1,
            sum: value,
            sum_sq: value * value,
        });
        self.merge_levels();
        self.expire();
    }

    /// Merge the two oldest buckets of any size held by more than `k`
    /// buckets. A merge doubles the size, so it can cascade into the next
    /// level; rescan until stable.
    fn merge_levels(&mut self) {
        loop {
            let mut merged = false;
            let mut start = 0;
            while start < self.buckets.len() {
                let size = self.buckets[start].count;
                let mut end = start;
                while end < self.buckets.len() && self.buckets[end].count == size {
                    end += 1;
                }
                if end - start > self.k {
                    // The two oldest of this run sit at end-1 and end-2.
                    let older = self.buckets.remove(end - 1).expect("index in range");
                    let younger = &mut self.buckets[end - 2];
                    younger.count += older.count;
                    younger.sum += older.sum;
                    younger.sum_sq += older.sum_sq;
                    merged = true;
                    break;
                }
                start = end;
            }
            if !merged {
                return;
            }
        }
    }

    fn expire(&mut self) {
        let cutoff = self.next_rank.saturating_sub(self.window_size);
        while let Some(oldest) = self.buckets.back() {
            if oldest.rank <= cutoff {
                self.buckets.pop_back();
            } else {
                break;
            }
        }
    }

    /// Observations currently represented (the straddling bucket counts
    /// whole, so this can briefly exceed N).
    #[must_use]
    pub fn count(&self) -> u64 {
        self.buckets.iter().map(|b| b.count).sum()
    }

    /// Windowed mean estimate; 0 when empty.
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn mean(&self) -> f64 {
        let count = self.count();
        if count == 0 {
            return 0.0;
        }
        let sum: f64 = self.buckets.iter().map(|b| b.sum).sum();
        sum / count as f64
    }

    /// Windowed variance estimate `E[X²] − E[X]²`, clamped at 0 against
    /// floating-point drift; 0 when empty.
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn variance(&self) -> f64 {
        let count = self.count();
        if count == 0 {
            return 0.0;
        }
        let sum: f64 = self.buckets.iter().map(|b| b.sum).sum();
        let sum_sq: f64 = self.buckets.iter().map(|b| b.sum_sq).sum();
        let mean = sum / count as f64;
        (sum_sq / count as f64 - mean * mean).max(0.0)
    }

    /// Number of buckets currently held.
    #[must_use]
    pub fn num_buckets(&self) -> usize {
        self.buckets.len()
    }
}

/// Which estimate an [`ExponentialHistogramOperator`] publishes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EhStatistic {
    /// Windowed mean.
    Average,
    /// Windowed variance.
    Variance,
}

/// Keyed sliding-window estimator over a numeric field.
///
/// One [`ExponentialHistogram`] per key, created lazily; after every input
/// the operator publishes `Feature::Single(estimate)` under its identifier
/// and notifies the subscriber.
pub struct ExponentialHistogramOperator<R> {
    base: FeatureEmitter,
    statistic: EhStatistic,
    key: KeySpec,
    value_field: FlowField,
    window_size: usize,
    k: usize,
    state: FxHashMap<String, ExponentialHistogram>,
    _record: std::marker::PhantomData<fn(&R)>,
}

impl<R: FlowRecord> ExponentialHistogramOperator<R> {
    /// A windowed-mean estimator.
    #[must_use]
    pub fn average(
        window_size: usize,
        k: usize,
        value_field: FlowField,
        key: KeySpec,
        features: Arc<FeatureMap>,
        identifier: impl Into<String>,
    ) -> Self {
        Self::with_statistic(
            EhStatistic::Average,
            window_size,
            k,
            value_field,
            key,
            features,
            identifier,
        )
    }

    /// A windowed-variance estimator.
    #[must_use]
    pub fn variance(
        window_size: usize,
        k: usize,
        value_field: FlowField,
        key: KeySpec,
        features: Arc<FeatureMap>,
        identifier: impl Into<String>,
    ) -> Self {
        Self::with_statistic(
            EhStatistic::Variance,
            window_size,
            k,
            value_field,
            key,
            features,
            identifier,
        )
    }

    fn with_statistic(
        statistic: EhStatistic,
        window_size: usize,
        k: usize,
        value_field: FlowField,
        key: KeySpec,
        features: Arc<FeatureMap>,
        identifier: impl Into<String>,
    ) -> Self {
        Self {
            base: FeatureEmitter::new(identifier, features),
            statistic,
            key,
            value_field,
            window_size,
            k,
            state: FxHashMap::default(),
            _record: std::marker::PhantomData,
        }
    }

    /// Registers this operator's column with a feature subscriber.
    ///
    /// # Errors
    ///
    /// Propagates [`SubscriberError`] when the subscriber is already live.
    pub fn register_subscriber(
        &mut self,
        subscriber: Arc<FeatureSubscriber>,
    ) -> Result<(), SubscriberError> {
        self.base.register_subscriber(subscriber)
    }

    /// Distinct keys observed so far.
    #[must_use]
    pub fn key_count(&self) -> usize {
        self.state.len()
    }
}

impl<R: FlowRecord> Operator<R> for ExponentialHistogramOperator<R> {
    fn name(&self) -> &str {
        self.base.identifier()
    }

    fn on_record(&mut self, record: &R, _out: &mut OutputVec<R>) -> Result<(), OperatorError> {
        let value = record.field_f64(self.value_field).ok_or_else(|| {
            OperatorError::ConfigError("value field is not numeric on this schema".to_string())
        })?;
        let key = self.key.key_for(record);
        let histogram = self
            .state
            .entry(key.clone())
            .or_insert_with(|| ExponentialHistogram::new(self.window_size, self.k));
        histogram.insert(value);
        let estimate = match self.statistic {
            EhStatistic::Average => histogram.mean(),
            EhStatistic::Variance => histogram.variance(),
        };
        self.base.emit(&key, Feature::Single(estimate));
        self.base.notify(record.id(), estimate);
        Ok(())
    }
}

impl<R> std::fmt::Debug for ExponentialHistogramOperator<R> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ExponentialHistogramOperator")
            .field("identifier", &self.base.identifier())
            .field("statistic", &self.statistic)
            .field("window_size", &self.window_size)
            .field("keys", &self.state.len())
            .finish_non_exhaustive()
    }
}
