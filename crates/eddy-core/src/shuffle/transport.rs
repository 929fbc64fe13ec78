//! Abstract per-peer transport and the in-process mesh implementation.
//!
//! The shuffle contract needs only this much from a transport: reliable,
//! ordered delivery per directed peer pair, a best-effort `send` that may
//! drop at the high-water mark, and a non-blocking `try_recv` per inbound
//! peer channel. The wire unit is one record per message, string-serialized
//! with the id elided, plus a well-known terminate sentinel.
//!
//! [`MeshTransport`] satisfies the contract in-process with one bounded
//! SPSC ring per directed pair — the reference implementation used by tests
//! and single-host clusters. A socket transport plugs in behind the same
//! trait without touching the exchange.

use std::sync::Arc;

use super::spsc::SpscRing;

/// The terminate sentinel as it appears on the wire.
pub const TERMINATE_SENTINEL: &str = "__terminate__";

/// One message on a peer channel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WireMessage {
    /// A record payload: comma-separated fields, id elided.
    Record(String),
    /// End-of-stream sentinel; one per peer channel.
    Terminate,
}

impl WireMessage {
    /// Encodes for a byte-string transport.
    #[must_use]
    pub fn into_line(self) -> String {
        match self {
            Self::Record(payload) => payload,
            Self::Terminate => TERMINATE_SENTINEL.to_string(),
        }
    }

    /// Decodes from a byte-string transport.
    #[must_use]
    pub fn from_line(line: &str) -> Self {
        if line == TERMINATE_SENTINEL {
            Self::Terminate
        } else {
            Self::Record(line.to_string())
        }
    }
}

/// Reliable, ordered, per-peer push/pull channel.
pub trait Transport: Send + Sync {
    /// Total nodes in the mesh.
    fn num_nodes(&self) -> usize;

    /// This endpoint's node id.
    fn node_id(&self) -> usize;

    /// Sends to a peer. Returns false when the message was dropped (peer
    /// buffer at the high-water mark or peer gone) — the caller counts it
    /// and moves on; nothing is retried.
    fn send(&self, to: usize, message: WireMessage) -> bool;

    /// Non-blocking receive from one inbound peer channel.
    fn try_recv(&self, from: usize) -> Option<WireMessage>;
}

/// In-process mesh: an N×N matrix of bounded SPSC rings, one per directed
/// peer pair. `hwm` is each ring's capacity.
///
/// Safety contract of the rings (one pusher, one popper per ring) maps to
/// one send thread and one pull thread per node.
pub struct MeshTransport {
    node_id: usize,
    /// `outbound[p]`: ring this node pushes for peer `p`.
    outbound: Vec<Arc<SpscRing<WireMessage>>>,
    /// `inbound[p]`: ring peer `p` pushes for this node.
    inbound: Vec<Arc<SpscRing<WireMessage>>>,
}

impl MeshTransport {
    /// Builds a fully connected mesh, returning one transport handle per
    /// node.
    ///
    /// # Panics
    ///
    /// Panics if `num_nodes` is 0.
    #[must_use]
    pub fn mesh(num_nodes: usize, hwm: usize) -> Vec<Self> {
        assert!(num_nodes > 0, "num_nodes must be > 0");
        // rings[from][to]
        let rings: Vec<Vec<Arc<SpscRing<WireMessage>>>> = (0..num_nodes)
            .map(|_| {
                (0..num_nodes)
                    .map(|_| Arc::new(SpscRing::with_capacity(hwm)))
                    .collect()
            })
            .collect();
        (0..num_nodes)
            .map(|node| Self {
                node_id: node,
                outbound: rings[node].clone(),
                inbound: rings.iter().map(|row| Arc::clone(&row[node])).collect(),
            })
            .collect()
    }
}

impl Transport for MeshTransport {
    fn num_nodes(&self) -> usize {
        self.outbound.len()
    }

    fn node_id(&self) -> usize {
        self.node_id
    }

    fn send(&self, to: usize, message: WireMessage) -> bool {
        match self.outbound.get(to) {
            Some(ring) => ring.try_push(message).is_ok(),
            None => false,
        }
    }

    fn try_recv(&self, from: usize) -> Option<WireMessage> {
        self.inbound.get(from).and_then(|ring| ring.pop())
    }
}

impl std::fmt::Debug for MeshTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MeshTransport")
            .field("node_id", &self.node_id)
            .field("num_nodes", &self.outbound.len())
            .finish()
    }
}
