//! # Blocked Top-K Estimator
//!
//! Approximate heavy hitters of a categorical field over a sliding window
//! of N elements, maintained in blocks of b.
//!
//! Per key the estimator keeps a filling block of value counts, a ring of
//! up to N/b archived blocks, and running totals maintained incrementally:
//! an arrival bumps the filling block and the totals; every b arrivals the
//! filling block is archived and, once the ring is full, the expired
//! block's counts are subtracted back out. The oldest block straddles the
//! window boundary and counts whole, matching the exponential histogram's
//! inclusion policy.
//!
//! Frequencies are normalized by the number of observations currently
//! inside the window, so a partially filled window reports honest
//! probabilities. Ties rank the most-recently-seen value first.

use std::collections::VecDeque;
use std::sync::Arc;

use fxhash::FxHashMap;

use crate::dataflow::{Operator, OperatorError, OutputVec};
use crate::feature::{Feature, FeatureMap, FeatureSubscriber, SubscriberError};
use crate::flow::{FlowField, FlowRecord, KeySpec};

use super::FeatureEmitter;

#[derive(Debug, Clone, Copy)]
struct Total {
    count: u64,
    last_seen: u64,
}

/// Per-key sliding-window heavy-hitter state.
#[derive(Debug, Clone)]
pub struct BlockedTopK {
    block_size: usize,
    max_blocks: usize,
    /// Block currently filling.
    current: FxHashMap<String, u64>,
    /// Archived blocks, oldest first.
    blocks: VecDeque<FxHashMap<String, u64>>,
    /// Running totals across current + archived blocks.
    totals: FxHashMap<String, Total>,
    in_current: usize,
    in_window: u64,
    seq: u64,
}

impl BlockedTopK {
    /// Creates state for a window of `window_size` elements in
    /// `block_size`-element blocks.
    ///
    /// # Panics
    ///
    /// Panics if either size is 0 or the block is larger than the window.
    #[must_use]
    pub fn new(window_size: usize, block_size: usize) -> Self {
        assert!(window_size > 0, "window_size must be > 0");
        assert!(
            block_size > 0 && block_size <= window_size,
            "block_size must be in 1..=window_size"
        );
        Self {
            block_size,
            max_blocks: (window_size / block_size).max(1),
            current: FxHashMap::default(),
            blocks: VecDeque::new(),
            totals: FxHashMap::default(),
            in_current: 0,
            in_window: 0,
            seq: 0,
        }
    }

    /// Records one observation of `value`.
    pub fn observe(&mut self, value: &str) {
        self.seq += 1;
        *self.current.entry(value.to_string()).or_insert(0) += 1;
        let total = self.totals.entry(value.to_string()).or_insert(Total {
            count: 0,
            last_seen: 0,
        });
        total.count += 1;
        total.last_seen = self.seq;
        self.in_current += 1;
        self.in_window += 1;
        if self.in_current == self.block_size {
            self.rotate();
        }
    }

    /// Archives the filling block; once the ring is full, the oldest block
    /// expires and its counts leave the running totals.
    fn rotate(&mut self) {
        let filled = std::mem::take(&mut self.current);
        self.in_current = 0;
        self.blocks.push_back(filled);
        if self.blocks.len() <= self.max_blocks {
            return;
        }
        let expired = self.blocks.pop_front().expect("ring not empty");
        for (value, count) in expired {
            self.in_window -= count;
            if let Some(total) = self.totals.get_mut(&value) {
                total.count -= count;
                if total.count == 0 {
                    self.totals.remove(&value);
                }
            }
        }
    }

    /// The k heaviest values, descending; parallel arrays padded to
    /// exactly k with empty keys and zero frequencies.
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn top(&self, k: usize) -> (Vec<String>, Vec<f64>) {
        let mut entries: Vec<(&String, &Total)> = self.totals.iter().collect();
        entries.sort_by(|a, b| {
            b.1.count
                .cmp(&a.1.count)
                .then(b.1.last_seen.cmp(&a.1.last_seen))
        });
        let window = if self.in_window == 0 {
            1.0
        } else {
            self.in_window as f64
        };
        let mut keys = Vec::with_capacity(k);
        let mut frequencies = Vec::with_capacity(k);
        for (value, total) in entries.into_iter().take(k) {
            keys.push(value.clone());
            frequencies.push(total.count as f64 / window);
        }
        while keys.len() < k {
            keys.push(String::new());
            frequencies.push(0.0);
        }
        (keys, frequencies)
    }

    /// Observations currently inside the window.
    #[must_use]
    pub fn observations(&self) -> u64 {
        self.in_window
    }
}

/// Keyed heavy-hitter operator over a categorical field.
///
/// After every input it publishes a `Feature::TopK` of exactly k entries
/// under its identifier and notifies the subscriber with the top frequency.
pub struct TopKOperator<R> {
    base: FeatureEmitter,
    key: KeySpec,
    value_field: FlowField,
    window_size: usize,
    block_size: usize,
    k: usize,
    state: FxHashMap<String, BlockedTopK>,
    _record: std::marker::PhantomData<fn(&R)>,
}

impl<R: FlowRecord> TopKOperator<R> {
    /// Creates a top-K operator over `value_field`, windowed by
    /// `window_size` in `block_size` blocks.
    #[must_use]
    pub fn new(
        window_size: usize,
        block_size: usize,
        k: usize,
        value_field: FlowField,
        key: KeySpec,
        features: Arc<FeatureMap>,
        identifier: impl Into<String>,
    ) -> Self {
        Self {
            base: FeatureEmitter::new(identifier, features),
            key,
            value_field,
            window_size,
            block_size,
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

impl<R: FlowRecord> Operator<R> for TopKOperator<R> {
    fn name(&self) -> &str {
        self.base.identifier()
    }

    fn on_record(&mut self, record: &R, _out: &mut OutputVec<R>) -> Result<(), OperatorError> {
        let value = record.field_str(self.value_field).ok_or_else(|| {
            OperatorError::ConfigError("top-k field missing on this schema".to_string())
        })?;
        let key = self.key.key_for(record);
        let state = self
            .state
            .entry(key.clone())
            .or_insert_with(|| BlockedTopK::new(self.window_size, self.block_size));
        state.observe(&value);
        let (keys, frequencies) = state.top(self.k);
        let best = frequencies.first().copied().unwrap_or(0.0);
        self.base.emit(&key, Feature::TopK { keys, frequencies });
        self.base.notify(record.id(), best);
        Ok(())
    }
}

impl<R> std::fmt::Debug for TopKOperator<R> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TopKOperator")
            .field("identifier", &self.base.identifier())
            .field("window_size", &self.window_size)
            .field("block_size", &self.block_size)
            .field("k", &self.k)
            .field("keys", &self.state.len())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::flow::Netflow;

    #[test]
    fn test_first_block_normalizes_by_observed() {
        let mut state = BlockedTopK::new(10, 5);
        for _ in 0..5 {
            state.observe("x");
        }
        let (keys, frequencies) = state.top(2);
        assert_eq!(keys, vec!["x".to_string(), String::new()]);
        assert!((frequencies[0] - 1.0).abs() < 1e-12);
        assert!(frequencies[1].abs() < 1e-12);
    }

    #[test]
    fn test_second_block_splits_mass() {
        let mut state = BlockedTopK::new(10, 5);
        for _ in 0..5 {
            state.observe("x");
        }
        for _ in 0..5 {
            state.observe("y");
        }
        let (keys, frequencies) = state.top(2);
        assert_eq!(state.observations(), 10);
        // Equal mass; recency ranks y first.
        assert_eq!(keys, vec!["y".to_string(), "x".to_string()]);
        assert!((frequencies[0] - 0.5).abs() < 1e-12);
        assert!((frequencies[1] - 0.5).abs() < 1e-12);
    }

    #[test]
    fn test_expired_block_leaves_totals() {
        let mut state = BlockedTopK::new(10, 5);
        for _ in 0..5 {
            state.observe("x");
        }
        for _ in 0..10 {
            state.observe("y");
        }
        // Third rotation evicted the x block entirely.
        let (keys, frequencies) = state.top(2);
        assert_eq!(keys[0], "y");
        assert!((frequencies[0] - 1.0).abs() < 1e-12);
        assert_eq!(keys[1], "");
        assert_eq!(state.observations(), 10);
    }

    #[test]
    fn test_emission_shape_invariants() {
        let mut state = BlockedTopK::new(12, 4);
        for value in ["a", "b", "a", "c", "a", "b", "d", "a", "e"] {
            state.observe(value);
            let (keys, frequencies) = state.top(3);
            assert_eq!(keys.len(), 3);
            assert_eq!(frequencies.len(), 3);
            let sum: f64 = frequencies.iter().sum();
            assert!(sum <= 1.0 + 1e-12, "sum {sum}");
            for pair in frequencies.windows(2) {
                assert!(pair[0] >= pair[1], "not sorted: {frequencies:?}");
            }
            for f in &frequencies {
                assert!((0.0..=1.0).contains(f));
            }
        }
    }

    #[test]
    fn test_operator_publishes_topk_feature() {
        let features = Arc::new(FeatureMap::new(16));
        let mut op = TopKOperator::<Netflow>::new(
            10,
            5,
            2,
            FlowField::DestPort,
            KeySpec::single(FlowField::DestIp),
            Arc::clone(&features),
            "topDestPorts",
        );
        let mut out = OutputVec::new();
        for port in [80, 80, 443, 80, 22] {
            let record = Netflow::sample("src", "10.0.0.1", port);
            op.on_record(&record, &mut out).unwrap();
        }
        let feature = features
            .apply("10.0.0.1", "topDestPorts", Feature::clone)
            .unwrap();
        match feature {
            Feature::TopK { keys, frequencies } => {
                assert_eq!(keys[0], "80");
                assert!((frequencies[0] - 0.6).abs() < 1e-12);
            }
            Feature::Single(_) => panic!("expected TopK"),
        }
    }
}
