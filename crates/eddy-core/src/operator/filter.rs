//! # Filter Operator
//!
//! Gates records on a filter expression evaluated against the feature map.
//!
//! Matches (non-zero result) are forwarded downstream unchanged; non-matches
//! and evaluation failures are dropped and counted. Matches are batched in
//! an output queue of configurable length and flushed when the queue fills
//! or the stream terminates.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use crate::dataflow::{Operator, OperatorError, Output, OutputVec};
use crate::expr::Expression;
use crate::feature::FeatureMap;
use crate::flow::{FlowRecord, KeySpec};

/// Process-lifetime monotonic counters for one filter.
#[derive(Debug, Default)]
pub struct FilterStats {
    passed: AtomicU64,
    dropped: AtomicU64,
    failed: AtomicU64,
}

impl FilterStats {
    /// A fresh, zeroed counter set.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// A point-in-time copy of every counter.
    #[must_use]
    pub fn snapshot(&self) -> FilterStatsSnapshot {
        FilterStatsSnapshot {
            passed: self.passed.load(Ordering::Relaxed),
            dropped: self.dropped.load(Ordering::Relaxed),
            failed: self.failed.load(Ordering::Relaxed),
        }
    }
}

/// Counter values at one instant.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FilterStatsSnapshot {
    /// Records forwarded (expression non-zero).
    pub passed: u64,
    /// Records dropped (expression zero).
    pub dropped: u64,
    /// Records dropped because evaluation failed.
    pub failed: u64,
}

/// Expression gate over the record stream.
pub struct FilterOperator<R> {
    name: String,
    expression: Expression,
    key: KeySpec,
    features: Arc<FeatureMap>,
    queue: Vec<R>,
    queue_length: usize,
    stats: Arc<FilterStats>,
}

impl<R: FlowRecord> FilterOperator<R> {
    /// Creates a filter forwarding records whose expression evaluates
    /// non-zero for the record's key. `queue_length` sizes the output
    /// batch (1 forwards immediately).
    #[must_use]
    pub fn new(
        name: impl Into<String>,
        expression: Expression,
        key: KeySpec,
        features: Arc<FeatureMap>,
        queue_length: usize,
        stats: Arc<FilterStats>,
    ) -> Self {
        let queue_length = queue_length.max(1);
        Self {
            name: name.into(),
            expression,
            key,
            features,
            queue: Vec::with_capacity(queue_length),
            queue_length,
            stats,
        }
    }

    fn flush_into(&mut self, out: &mut OutputVec<R>) {
        for record in self.queue.drain(..) {
            out.push(Output::Forward(record));
        }
    }
}

impl<R: FlowRecord> Operator<R> for FilterOperator<R> {
    fn name(&self) -> &str {
        &self.name
    }

    fn on_record(&mut self, record: &R, out: &mut OutputVec<R>) -> Result<(), OperatorError> {
        let key = self.key.key_for(record);
        match self.expression.evaluate(&key, &self.features) {
            Ok(result) if result != 0.0 => {
                self.stats.passed.fetch_add(1, Ordering::Relaxed);
                self.queue.push(record.clone());
                if self.queue.len() >= self.queue_length {
                    self.flush_into(out);
                }
            }
            Ok(_) => {
                self.stats.dropped.fetch_add(1, Ordering::Relaxed);
            }
            Err(error) => {
                // Failed evaluation is a non-match, not a fault.
                self.stats.failed.fetch_add(1, Ordering::Relaxed);
                tracing::debug!(filter = %self.name, key = %key, %error, "expression failed; dropping");
            }
        }
        Ok(())
    }

    fn on_terminate(&mut self, out: &mut OutputVec<R>) {
        self.flush_into(out);
    }
}

impl<R> std::fmt::Debug for FilterOperator<R> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FilterOperator")
            .field("name", &self.name)
            .field("queue_length", &self.queue_length)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::expr::{BinaryOp, Token};
    use crate::feature::Feature;
    use crate::flow::{FlowField, Netflow};

    fn frequency_sum_filter(
        features: &Arc<FeatureMap>,
        stats: &Arc<FilterStats>,
        queue_length: usize,
    ) -> FilterOperator<Netflow> {
        // top frequencies summed below 0.9 -> pass
        let expression = Expression::new(vec![
            Token::topk_frequency("top2", 0),
            Token::Op(BinaryOp::Add),
            Token::topk_frequency("top2", 1),
            Token::Op(BinaryOp::LessThan),
            Token::Number(0.9),
        ]);
        FilterOperator::new(
            "lowConcentration",
            expression,
            KeySpec::single(FlowField::DestIp),
            Arc::clone(features),
            queue_length,
            Arc::clone(stats),
        )
    }

    fn topk_feature(f0: f64, f1: f64) -> Feature {
        Feature::TopK {
            keys: vec!["80".to_string(), "443".to_string()],
            frequencies: vec![f0, f1],
        }
    }

    #[test]
    fn test_filter_forwards_matches_and_drops_rest() {
        let features = Arc::new(FeatureMap::new(8));
        features.update_insert("D", "top2", topk_feature(0.5, 0.3));
        features.update_insert("E", "top2", topk_feature(0.6, 0.35));
        let stats = Arc::new(FilterStats::new());
        let mut filter = frequency_sum_filter(&features, &stats, 1);

        let mut out = OutputVec::new();
        filter.on_record(&Netflow::sample("s", "D", 80), &mut out).unwrap();
        assert_eq!(out.len(), 1);

        let mut out = OutputVec::new();
        filter.on_record(&Netflow::sample("s", "E", 80), &mut out).unwrap();
        assert!(out.is_empty());

        let snap = stats.snapshot();
        assert_eq!((snap.passed, snap.dropped, snap.failed), (1, 1, 0));
    }

    #[test]
    fn test_missing_feature_counts_as_failed() {
        let features = Arc::new(FeatureMap::new(8));
        let stats = Arc::new(FilterStats::new());
        let mut filter = frequency_sum_filter(&features, &stats, 1);

        let mut out = OutputVec::new();
        filter
            .on_record(&Netflow::sample("s", "unknown", 80), &mut out)
            .unwrap();
        assert!(out.is_empty());
        assert_eq!(stats.snapshot().failed, 1);
    }

    #[test]
    fn test_queued_matches_flush_on_terminate() {
        let features = Arc::new(FeatureMap::new(8));
        features.update_insert("D", "top2", topk_feature(0.2, 0.1));
        let stats = Arc::new(FilterStats::new());
        let mut filter = frequency_sum_filter(&features, &stats, 10);

        let mut out = OutputVec::new();
        filter.on_record(&Netflow::sample("s", "D", 80), &mut out).unwrap();
        filter.on_record(&Netflow::sample("s", "D", 81), &mut out).unwrap();
        assert!(out.is_empty(), "queue holds matches until full");

        filter.on_terminate(&mut out);
        assert_eq!(out.len(), 2);
    }
}
