//! # Shuffle Layer
//!
//! Hash-partitioned redistribution of records across the cluster.
//!
//! A record entering the shuffle is routed to *two* nodes — the partition
//! owning its source endpoint and the partition owning its destination
//! endpoint — coalesced to a single send when both hash to the same node.
//! The id is stripped before transmission; the receiving node assigns a
//! fresh local one. Per-peer send buffers are bounded by the high-water
//! mark: when a buffer is full the send is dropped and counted, trading
//! completeness for latency.
//!
//! Ordering: per-peer FIFO on both sides, nothing across peers. Delivery is
//! at-least-once within the hwm budget, and the two routing replicas are
//! not deduplicated — downstream aggregation is keyed so replicas land on
//! different nodes' state.
//!
//! ## Pieces
//!
//! - [`FlowPartitioner`]: key hash → node id.
//! - [`Transport`] / [`MeshTransport`]: abstract per-peer channels and the
//!   in-process mesh.
//! - [`ShuffleSender`] / [`ShuffleReceiver`]: the consume side and the pull
//!   side of the exchange.

use std::hash::{Hash, Hasher};

use fxhash::FxHasher;

mod exchange;
mod spsc;
mod transport;

pub use exchange::{
    ShuffleHandle, ShuffleReceiver, ShuffleSender, ShuffleStats, ShuffleStatsSnapshot,
};
pub use spsc::SpscRing;
pub use transport::{MeshTransport, Transport, WireMessage, TERMINATE_SENTINEL};

/// Stable hash of a partition key. Every node must agree on this function,
/// so it is pinned to `FxHasher` rather than the std randomized default.
#[must_use]
pub fn hash_key(key: &str) -> u64 {
    let mut hasher = FxHasher::default();
    key.hash(&mut hasher);
    hasher.finish()
}

/// Maps partition keys onto node ids.
#[derive(Debug, Clone, Copy)]
pub struct FlowPartitioner {
    num_nodes: usize,
}

impl FlowPartitioner {
    /// Creates a partitioner over `num_nodes` nodes.
    ///
    /// # Panics
    ///
    /// Panics if `num_nodes` is 0.
    #[must_use]
    pub fn new(num_nodes: usize) -> Self {
        assert!(num_nodes > 0, "num_nodes must be > 0");
        Self { num_nodes }
    }

    /// The node owning `key`'s partition.
    #[must_use]
    #[allow(clippy::cast_possible_truncation)] // hash mod num_nodes
    pub fn node_for(&self, key: &str) -> usize {
        (hash_key(key) as usize) % self.num_nodes
    }

    /// Number of nodes this partitioner spreads across.
    #[must_use]
    pub fn num_nodes(&self) -> usize {
        self.num_nodes
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_partitioner_is_deterministic() {
        let p = FlowPartitioner::new(4);
        assert_eq!(p.node_for("10.0.0.1"), p.node_for("10.0.0.1"));
        assert!(p.node_for("10.0.0.1") < 4);
    }

    #[test]
    fn test_partitioner_spreads_keys() {
        let p = FlowPartitioner::new(4);
        let mut counts = [0usize; 4];
        for i in 0..1000 {
            counts[p.node_for(&format!("10.0.{}.{}", i / 250, i % 250))] += 1;
        }
        for count in counts {
            assert!(count > 100, "partition too cold: {count}");
        }
    }

    #[test]
    #[should_panic(expected = "num_nodes must be > 0")]
    fn test_zero_nodes_panics() {
        let _ = FlowPartitioner::new(0);
    }
}
