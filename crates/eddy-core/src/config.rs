//! Engine configuration types.
//!
//! Defaults mirror the production deployment: 10k-element windows, 1k-element
//! blocks, 10k-entry queues and feature capacity. Hostnames for a cluster are
//! derived as `{prefix}{node_id}`, with a loopback shortcut for the
//! single-node case.

use serde::{Deserialize, Serialize};

/// Default per-operator queue length.
pub const DEFAULT_QUEUE_LENGTH: usize = 10_000;

/// Default shuffle high-water mark (per-peer send buffer capacity).
pub const DEFAULT_HWM: usize = 10_000;

/// Default sliding-window size in elements.
pub const DEFAULT_WINDOW_SIZE: usize = 10_000;

/// Default block size for the blocked top-K estimator.
pub const DEFAULT_BLOCK_SIZE: usize = 1_000;

/// Default feature-map capacity hint.
pub const DEFAULT_CAPACITY: usize = 10_000;

/// How many records between metric log lines on the hot paths.
pub const DEFAULT_METRIC_INTERVAL: u64 = 100_000;

/// Cluster-level configuration: identity of this node, peer addressing,
/// and the resource bounds shared by the fabric and the shuffle.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClusterConfig {
    /// Total nodes in the cluster.
    pub num_nodes: usize,
    /// This node's id in `0..num_nodes`.
    pub node_id: usize,
    /// Hostname prefix common to all nodes.
    pub prefix: String,
    /// First port of the per-node port range.
    pub starting_port: u16,
    /// Per-peer send-buffer capacity; sends beyond it are dropped.
    pub hwm: usize,
    /// Producer queue length (records buffered before dispatch).
    pub queue_length: usize,
    /// Feature-map capacity hint.
    pub capacity: usize,
    /// Records between metric log lines.
    pub metric_interval: u64,
}

impl Default for ClusterConfig {
    fn default() -> Self {
        Self {
            num_nodes: 1,
            node_id: 0,
            prefix: "node".to_string(),
            starting_port: 10_000,
            hwm: DEFAULT_HWM,
            queue_length: DEFAULT_QUEUE_LENGTH,
            capacity: DEFAULT_CAPACITY,
            metric_interval: DEFAULT_METRIC_INTERVAL,
        }
    }
}

impl ClusterConfig {
    /// Single-node configuration with all defaults.
    #[must_use]
    pub fn single_node() -> Self {
        Self::default()
    }

    /// Hostnames for every node, `{prefix}{i}`; a one-node cluster
    /// shortcuts to loopback.
    #[must_use]
    pub fn hostnames(&self) -> Vec<String> {
        if self.num_nodes == 1 {
            return vec!["127.0.0.1".to_string()];
        }
        (0..self.num_nodes)
            .map(|i| format!("{}{}", self.prefix, i))
            .collect()
    }

    /// Ports for every node, assigned consecutively from `starting_port`.
    #[must_use]
    pub fn ports(&self) -> Vec<u16> {
        (0..self.num_nodes)
            .map(|i| self.starting_port.wrapping_add(u16::try_from(i).unwrap_or(0)))
            .collect()
    }
}

/// Sliding-window parameters shared by the estimators.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct WindowConfig {
    /// Window size N in elements.
    pub window_size: usize,
    /// Block size b for the blocked top-K estimator.
    pub block_size: usize,
    /// Bucket decay factor (exponential histogram) / result size (top-K).
    pub k: usize,
}

impl Default for WindowConfig {
    fn default() -> Self {
        Self {
            window_size: DEFAULT_WINDOW_SIZE,
            block_size: DEFAULT_BLOCK_SIZE,
            k: 2,
        }
    }
}
