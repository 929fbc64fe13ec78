//! # Feature Store
//!
//! Per-node keyed storage for derived features.
//!
//! Operators publish one [`Feature`] per `(tuple key, operator identifier)`
//! pair into the [`FeatureMap`]; the expression evaluator reads them back
//! through [`FeatureProjection`] probes. The map is the only operator-facing
//! shared-mutable structure in the engine, so access is striped: a fixed
//! set of `parking_lot` mutexes, one per stripe, chosen by key hash. No lock
//! is ever allocated after construction.
//!
//! Entries are created on first emission and replaced in place afterwards;
//! nothing is evicted during a run. Capacity is a preallocation hint — the
//! map grows past it, logging a single warning.

use std::hash::{Hash, Hasher};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use fxhash::{FxHashMap, FxHasher};
use parking_lot::Mutex;

mod subscriber;

pub use subscriber::{FeatureSubscriber, SubscriberError};

/// A derived feature value.
///
/// Tagged variant instead of a class hierarchy: the evaluator pattern
/// matches, nothing downcasts.
#[derive(Debug, Clone, PartialEq)]
pub enum Feature {
    /// A scalar estimate (mean, variance, identity projection, ...).
    Single(f64),
    /// Approximate heavy hitters: parallel arrays of length k, descending
    /// frequency order, padded with empty keys and zero frequencies.
    TopK {
        /// The k most frequent values, best first.
        keys: Vec<String>,
        /// Normalized frequencies in `[0, 1]`, non-increasing.
        frequencies: Vec<f64>,
    },
}

/// Projection from a [`Feature`] to the double the evaluator consumes.
///
/// A projection that does not fit the stored variant is an evaluation
/// failure, not a panic.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FeatureProjection {
    /// The scalar of a [`Feature::Single`].
    Value,
    /// The i-th frequency of a [`Feature::TopK`] (0 = most frequent).
    TopKFrequency(usize),
    /// The number of non-padding keys of a [`Feature::TopK`].
    TopKCount,
}

impl FeatureProjection {
    /// Applies the projection. `None` when the variant does not match or
    /// the index is out of range.
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn apply(self, feature: &Feature) -> Option<f64> {
        match (self, feature) {
            (Self::Value, Feature::Single(v)) => Some(*v),
            (Self::TopKFrequency(i), Feature::TopK { frequencies, .. }) => {
                frequencies.get(i).copied()
            }
            (Self::TopKCount, Feature::TopK { keys, .. }) => {
                Some(keys.iter().filter(|k| !k.is_empty()).count() as f64)
            }
            _ => None,
        }
    }
}

/// Number of lock stripes. Power of two so the stripe index is a mask.
const STRIPES: usize = 64;

type Shard = FxHashMap<(String, String), Feature>;

/// Striped map from `(tuple key, operator identifier)` to [`Feature`].
///
/// Writers are the operators (many), readers are the evaluator and the
/// subscribers (many); per-entry operations are linearizable because every
/// entry lives under exactly one stripe lock.
pub struct FeatureMap {
    shards: Vec<Mutex<Shard>>,
    capacity: usize,
    entries: AtomicUsize,
    capacity_warned: AtomicBool,
}

impl FeatureMap {
    /// Creates a map sized for `capacity` entries. Capacity is a hint:
    /// exceeding it logs once and the map keeps growing.
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        let per_shard = (capacity / STRIPES).max(4);
        let shards = (0..STRIPES)
            .map(|_| {
                Mutex::new(FxHashMap::with_capacity_and_hasher(
                    per_shard,
                    fxhash::FxBuildHasher::default(),
                ))
            })
            .collect();
        Self {
            shards,
            capacity,
            entries: AtomicUsize::new(0),
            capacity_warned: AtomicBool::new(false),
        }
    }

    fn shard_for(&self, key: &str, identifier: &str) -> &Mutex<Shard> {
        let mut hasher = FxHasher::default();
        key.hash(&mut hasher);
        identifier.hash(&mut hasher);
        let index = (hasher.finish() as usize) & (STRIPES - 1);
        &self.shards[index]
    }

    /// Inserts or replaces the feature for `(key, identifier)`.
    pub fn update_insert(&self, key: &str, identifier: &str, feature: Feature) {
        let shard = self.shard_for(key, identifier);
        let mut guard = shard.lock();
        let fresh = guard
            .insert((key.to_string(), identifier.to_string()), feature)
            .is_none();
        drop(guard);
        if fresh {
            let count = self.entries.fetch_add(1, Ordering::Relaxed) + 1;
            self.maybe_warn_capacity(count);
        }
    }

    /// Whether a feature exists for `(key, identifier)`.
    #[must_use]
    pub fn exists(&self, key: &str, identifier: &str) -> bool {
        let shard = self.shard_for(key, identifier);
        let guard = shard.lock();
        guard.contains_key(&(key.to_string(), identifier.to_string()))
    }

    /// Read-only visitor over the feature for `(key, identifier)`, run
    /// under the entry's stripe lock. `None` when the entry is absent.
    pub fn apply<R>(
        &self,
        key: &str,
        identifier: &str,
        f: impl FnOnce(&Feature) -> R,
    ) -> Option<R> {
        let shard = self.shard_for(key, identifier);
        let guard = shard.lock();
        guard.get(&(key.to_string(), identifier.to_string())).map(f)
    }

    /// Total entries across all stripes.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.load(Ordering::Relaxed)
    }

    /// Whether the map holds no entries.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn maybe_warn_capacity(&self, count: usize) {
        if self.capacity > 0
            && count > self.capacity
            && !self.capacity_warned.swap(true, Ordering::Relaxed)
        {
            tracing::warn!(
                capacity = self.capacity,
                "feature map grew past its capacity hint"
            );
        }
    }
}

impl std::fmt::Debug for FeatureMap {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FeatureMap")
            .field("capacity", &self.capacity)
            .field("len", &self.len())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_update_then_apply_observes_latest() {
        let map = FeatureMap::new(16);
        map.update_insert("k", "mean", Feature::Single(1.0));
        map.update_insert("k", "mean", Feature::Single(2.5));
        let seen = map.apply("k", "mean", |f| f.clone()).unwrap();
        assert_eq!(seen, Feature::Single(2.5));
    }

    #[test]
    fn test_entries_are_keyed_by_both_components() {
        let map = FeatureMap::new(16);
        map.update_insert("k", "mean", Feature::Single(1.0));
        map.update_insert("k", "var", Feature::Single(9.0));
        map.update_insert("other", "mean", Feature::Single(3.0));
        assert_eq!(map.len(), 3);
        assert!(map.exists("k", "var"));
        assert!(!map.exists("other", "var"));
    }

    #[test]
    fn test_projection_variant_mismatch_is_none() {
        let single = Feature::Single(4.0);
        let topk = Feature::TopK {
            keys: vec!["80".to_string(), String::new()],
            frequencies: vec![0.6, 0.0],
        };
        assert_eq!(FeatureProjection::Value.apply(&single), Some(4.0));
        assert_eq!(FeatureProjection::Value.apply(&topk), None);
        assert_eq!(FeatureProjection::TopKFrequency(0).apply(&topk), Some(0.6));
        assert_eq!(FeatureProjection::TopKFrequency(5).apply(&topk), None);
        assert_eq!(FeatureProjection::TopKCount.apply(&topk), Some(1.0));
        assert_eq!(FeatureProjection::TopKCount.apply(&single), None);
    }

    #[test]
    fn test_concurrent_writers_distinct_entries() {
        use std::sync::Arc;
        let map = Arc::new(FeatureMap::new(1024));
        let handles: Vec<_> = (0..4)
            .map(|w| {
                let map = Arc::clone(&map);
                std::thread::spawn(move || {
                    for i in 0..250 {
                        let key = format!("key{w}-{i}");
                        map.update_insert(&key, "f", Feature::Single(f64::from(w)));
                    }
                })
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }
        assert_eq!(map.len(), 1000);
    }
}
