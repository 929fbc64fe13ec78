//! # Edge Request Map
//!
//! Pending partial-match requests for the cross-node graph-query layer.
//!
//! Peers register an [`EdgeRequest`] ("send me edges touching this source
//! and/or target until `expiry`"); every record processed on this node is
//! checked against the table and transmitted to the requesting peer when it
//! matches. The table is striped: `table_capacity` buckets, one mutex per
//! bucket, each holding a list of requests.
//!
//! A request indexes by its bound fields — source-only hash, target-only
//! hash, or the product hash when both are bound — and `process` probes all
//! three candidate buckets per record. Expired requests are evicted inline.
//! A record is never pushed to a peer that is one of its natural partitions
//! (that peer receives it through the shuffle already), and a per-call
//! bitset caps delivery at one send per peer per record.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use smallvec::SmallVec;

use crate::flow::{FlowField, FlowRecord};
use crate::shuffle::{hash_key, FlowPartitioner, Transport, WireMessage};

/// Errors raised by the edge request table.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum GraphError {
    /// A request bound neither a source nor a target.
    #[error("edge request must bind a source or a target")]
    UnboundRequest,
}

/// A pending partial-match request from a peer.
#[derive(Debug, Clone, PartialEq)]
pub struct EdgeRequest {
    /// Required source endpoint; `None` is a wildcard.
    pub source: Option<String>,
    /// Required target endpoint; `None` is a wildcard.
    pub target: Option<String>,
    /// Peer that wants the matching records.
    pub return_node: usize,
    /// The request stops matching once record time passes this.
    pub expiry: f64,
}

impl EdgeRequest {
    /// Whether the request's bound fields equal the record's endpoints.
    #[must_use]
    pub fn matches(&self, source: &str, target: &str) -> bool {
        self.source.as_deref().map_or(true, |s| s == source)
            && self.target.as_deref().map_or(true, |t| t == target)
    }

    /// Whether the request has expired at `time`.
    #[must_use]
    pub fn is_expired(&self, time: f64) -> bool {
        self.expiry < time
    }
}

/// Striped table of pending edge requests, shared between the request
/// intake thread and the record-processing thread.
pub struct EdgeRequestMap<R> {
    partitioner: FlowPartitioner,
    transport: Arc<dyn Transport>,
    buckets: Vec<Mutex<Vec<EdgeRequest>>>,
    source_field: FlowField,
    target_field: FlowField,
    pushes: AtomicU64,
    push_fails: AtomicU64,
    requests_viewed: AtomicU64,
    terminated: AtomicBool,
    _record: std::marker::PhantomData<fn(&R)>,
}

impl<R: FlowRecord> EdgeRequestMap<R> {
    /// Creates a table of `table_capacity` buckets routing matches over
    /// `transport`.
    ///
    /// # Panics
    ///
    /// Panics if `table_capacity` is 0.
    #[must_use]
    pub fn new(transport: Arc<dyn Transport>, table_capacity: usize) -> Self {
        assert!(table_capacity > 0, "table_capacity must be > 0");
        let partitioner = FlowPartitioner::new(transport.num_nodes());
        Self {
            partitioner,
            transport,
            buckets: (0..table_capacity).map(|_| Mutex::new(Vec::new())).collect(),
            source_field: FlowField::SourceIp,
            target_field: FlowField::DestIp,
            pushes: AtomicU64::new(0),
            push_fails: AtomicU64::new(0),
            requests_viewed: AtomicU64::new(0),
            terminated: AtomicBool::new(false),
            _record: std::marker::PhantomData,
        }
    }

    #[allow(clippy::cast_possible_truncation)] // hash mod table capacity
    fn index_for(&self, source: Option<&str>, target: Option<&str>) -> Option<usize> {
        let capacity = self.buckets.len();
        match (source, target) {
            (Some(s), None) => Some(hash_key(s) as usize % capacity),
            (None, Some(t)) => Some(hash_key(t) as usize % capacity),
            (Some(s), Some(t)) => {
                Some(hash_key(s).wrapping_mul(hash_key(t)) as usize % capacity)
            }
            (None, None) => None,
        }
    }

    /// Files a request under the bucket its bound fields hash to.
    ///
    /// # Errors
    ///
    /// [`GraphError::UnboundRequest`] when both fields are wildcards.
    pub fn add_request(&self, request: EdgeRequest) -> Result<(), GraphError> {
        let index = self
            .index_for(request.source.as_deref(), request.target.as_deref())
            .ok_or(GraphError::UnboundRequest)?;
        self.buckets[index].lock().push(request);
        Ok(())
    }

    /// Checks a record against the table: evicts expired requests, sends
    /// the record to every peer with a live matching request (at most once
    /// per peer, never to the record's natural partitions), and returns
    /// the number of live requests examined.
    pub fn process(&self, record: &R) -> usize {
        let Some(source) = record.field_str(self.source_field) else {
            return 0;
        };
        let Some(target) = record.field_str(self.target_field) else {
            return 0;
        };
        let time = record.time();
        let mut sent: SmallVec<[bool; 8]> =
            SmallVec::from_elem(false, self.transport.num_nodes());

        let candidates = [
            self.index_for(Some(&source), None),
            self.index_for(None, Some(&target)),
            self.index_for(Some(&source), Some(&target)),
        ];

        let mut examined = 0;
        for index in candidates.into_iter().flatten() {
            let mut bucket = self.buckets[index].lock();
            self.requests_viewed
                .fetch_add(bucket.len() as u64, Ordering::Relaxed);
            let mut slot = 0;
            while slot < bucket.len() {
                if bucket[slot].is_expired(time) {
                    bucket.remove(slot);
                    continue;
                }
                examined += 1;
                let request = &bucket[slot];
                if request.matches(&source, &target)
                    && !self.natural_partition(request, &source, &target)
                    && !sent[request.return_node]
                    && !self.terminated.load(Ordering::Relaxed)
                {
                    let node = request.return_node;
                    sent[node] = true;
                    let delivered = self
                        .transport
                        .send(node, WireMessage::Record(record.to_wire()));
                    if delivered {
                        self.pushes.fetch_add(1, Ordering::Relaxed);
                    } else {
                        self.push_fails.fetch_add(1, Ordering::Relaxed);
                        tracing::debug!(node, "edge push dropped");
                    }
                }
                slot += 1;
            }
        }
        examined
    }

    /// Whether `request.return_node` already receives this record through
    /// the shuffle (it owns the partition of an endpoint the request left
    /// unbound-side relevant).
    fn natural_partition(&self, request: &EdgeRequest, source: &str, target: &str) -> bool {
        let node = request.return_node;
        match (&request.source, &request.target) {
            (Some(_), None) => self.partitioner.node_for(target) == node,
            (None, Some(_)) => self.partitioner.node_for(source) == node,
            (Some(_), Some(_)) => {
                self.partitioner.node_for(source) == node
                    || self.partitioner.node_for(target) == node
            }
            (None, None) => false,
        }
    }

    /// Sends the transport sentinel to every peer, once.
    pub fn terminate(&self) {
        if self.terminated.swap(true, Ordering::Relaxed) {
            return;
        }
        for peer in 0..self.transport.num_nodes() {
            if !self.transport.send(peer, WireMessage::Terminate) {
                tracing::warn!(peer, "failed to deliver terminate sentinel");
            }
        }
    }

    /// Records pushed to peers.
    #[must_use]
    pub fn pushes(&self) -> u64 {
        self.pushes.load(Ordering::Relaxed)
    }

    /// Pushes dropped by the transport.
    #[must_use]
    pub fn push_fails(&self) -> u64 {
        self.push_fails.load(Ordering::Relaxed)
    }

    /// Total requests viewed across all `process` calls.
    #[must_use]
    pub fn requests_viewed(&self) -> u64 {
        self.requests_viewed.load(Ordering::Relaxed)
    }

    /// Live requests currently in the table. Diagnostics only.
    #[must_use]
    pub fn len(&self) -> usize {
        self.buckets.iter().map(|b| b.lock().len()).sum()
    }

    /// Whether the table holds no requests.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl<R> std::fmt::Debug for EdgeRequestMap<R> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EdgeRequestMap")
            .field("table_capacity", &self.buckets.len())
            .finish_non_exhaustive()
    }
}
