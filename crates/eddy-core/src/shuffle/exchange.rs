//! The two halves of the shuffle exchange: the consume-side
//! [`ShuffleSender`] and the pull-side [`ShuffleReceiver`].

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

use crate::dataflow::{Operator, OperatorError, OutputVec, Producer};
use crate::flow::{FlowField, FlowRecord};

use super::transport::{Transport, WireMessage};
use super::FlowPartitioner;

/// Records drained from one peer channel before moving to the next, so a
/// flooding peer cannot starve the others.
const DRAIN_BATCH: usize = 32;

/// Idle sweeps of all peer channels before the pull thread naps.
const IDLE_SPINS_BEFORE_NAP: u32 = 64;

/// Process-lifetime monotonic counters for one shuffle instance, shared
/// between the two halves and whoever wants to read them.
#[derive(Debug, Default)]
pub struct ShuffleStats {
    consumed: AtomicU64,
    sent: AtomicU64,
    send_failed: AtomicU64,
    received: AtomicU64,
    parse_errors: AtomicU64,
}

impl ShuffleStats {
    /// A fresh, zeroed counter set.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// A point-in-time copy of every counter.
    #[must_use]
    pub fn snapshot(&self) -> ShuffleStatsSnapshot {
        ShuffleStatsSnapshot {
            consumed: self.consumed.load(Ordering::Relaxed),
            sent: self.sent.load(Ordering::Relaxed),
            send_failed: self.send_failed.load(Ordering::Relaxed),
            received: self.received.load(Ordering::Relaxed),
            parse_errors: self.parse_errors.load(Ordering::Relaxed),
        }
    }
}

/// Counter values at one instant.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ShuffleStatsSnapshot {
    /// Records the sender consumed from its upstream.
    pub consumed: u64,
    /// Messages handed to the transport successfully.
    pub sent: u64,
    /// Messages dropped at the high-water mark.
    pub send_failed: u64,
    /// Records the receiver decoded and fed downstream.
    pub received: u64,
    /// Wire payloads that failed to decode (skipped).
    pub parse_errors: u64,
}

/// The consume side of the exchange: routes each record to the partitions
/// owning its source and destination endpoints.
pub struct ShuffleSender<R> {
    partitioner: FlowPartitioner,
    transport: Arc<dyn Transport>,
    source_field: FlowField,
    dest_field: FlowField,
    stats: Arc<ShuffleStats>,
    metric_interval: u64,
    terminated: bool,
    _record: std::marker::PhantomData<fn(&R)>,
}

impl<R: FlowRecord> ShuffleSender<R> {
    /// Creates a sender routing on the source/dest endpoint addresses.
    #[must_use]
    pub fn new(
        transport: Arc<dyn Transport>,
        stats: Arc<ShuffleStats>,
        metric_interval: u64,
    ) -> Self {
        Self::with_fields(
            transport,
            stats,
            metric_interval,
            FlowField::SourceIp,
            FlowField::DestIp,
        )
    }

    /// Creates a sender routing on an explicit field pair.
    #[must_use]
    pub fn with_fields(
        transport: Arc<dyn Transport>,
        stats: Arc<ShuffleStats>,
        metric_interval: u64,
        source_field: FlowField,
        dest_field: FlowField,
    ) -> Self {
        let partitioner = FlowPartitioner::new(transport.num_nodes());
        Self {
            partitioner,
            transport,
            source_field,
            dest_field,
            stats,
            metric_interval,
            terminated: false,
            _record: std::marker::PhantomData,
        }
    }

    fn send_payload(&self, node: usize, payload: String) {
        if self.transport.send(node, WireMessage::Record(payload)) {
            self.stats.sent.fetch_add(1, Ordering::Relaxed);
        } else {
            let failed = self.stats.send_failed.fetch_add(1, Ordering::Relaxed) + 1;
            if failed % self.metric_interval == 1 {
                tracing::debug!(node, failed, "shuffle send dropped at hwm");
            }
        }
    }
}

impl<R: FlowRecord> Operator<R> for ShuffleSender<R> {
    fn name(&self) -> &str {
        "shuffle-sender"
    }

    fn on_record(&mut self, record: &R, _out: &mut OutputVec<R>) -> Result<(), OperatorError> {
        let consumed = self.stats.consumed.fetch_add(1, Ordering::Relaxed) + 1;
        if consumed % self.metric_interval == 0 {
            tracing::info!(
                node = self.transport.node_id(),
                consumed,
                "shuffle consume count"
            );
        }

        let source = record.field_str(self.source_field).ok_or_else(|| {
            OperatorError::ConfigError("source routing field missing on schema".to_string())
        })?;
        let node1 = self.partitioner.node_for(&source);
        let dest = record.field_str(self.dest_field).ok_or_else(|| {
            OperatorError::ConfigError("dest routing field missing on schema".to_string())
        })?;
        let node2 = self.partitioner.node_for(&dest);

        // The receiving node assigns its own id, so it never rides the wire.
        let payload = record.to_wire();
        if node1 == node2 {
            self.send_payload(node1, payload);
        } else {
            self.send_payload(node1, payload.clone());
            self.send_payload(node2, payload);
        }
        Ok(())
    }

    fn on_terminate(&mut self, _out: &mut OutputVec<R>) {
        if std::mem::replace(&mut self.terminated, true) {
            return;
        }
        for peer in 0..self.transport.num_nodes() {
            if !self.transport.send(peer, WireMessage::Terminate) {
                tracing::warn!(peer, "failed to deliver terminate sentinel");
            }
        }
    }
}

impl<R> std::fmt::Debug for ShuffleSender<R> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ShuffleSender")
            .field("node_id", &self.transport.node_id())
            .field("num_nodes", &self.partitioner.num_nodes())
            .finish_non_exhaustive()
    }
}

/// The pull side of the exchange: a dedicated thread polling every peer
/// channel, decoding payloads, stamping fresh local ids, and feeding the
/// node-local producer chain.
pub struct ShuffleReceiver<R: FlowRecord> {
    transport: Arc<dyn Transport>,
    producer: Producer<R>,
    stats: Arc<ShuffleStats>,
    stop: Arc<AtomicBool>,
    metric_interval: u64,
}

impl<R: FlowRecord> ShuffleReceiver<R> {
    /// Wraps the node-local producer chain behind a pull loop.
    #[must_use]
    pub fn new(
        transport: Arc<dyn Transport>,
        producer: Producer<R>,
        stats: Arc<ShuffleStats>,
        stop: Arc<AtomicBool>,
        metric_interval: u64,
    ) -> Self {
        Self {
            transport,
            producer,
            stats,
            stop,
            metric_interval,
        }
    }

    /// Spawns the pull thread.
    ///
    /// # Panics
    ///
    /// Panics if the OS refuses to spawn a thread.
    #[must_use]
    pub fn spawn(self) -> ShuffleHandle<R> {
        let stop = Arc::clone(&self.stop);
        let name = format!("eddy-pull-{}", self.transport.node_id());
        let thread = std::thread::Builder::new()
            .name(name)
            .spawn(move || self.run())
            .expect("spawn shuffle pull thread");
        ShuffleHandle { thread, stop }
    }

    /// The pull loop. Exits when every peer channel has delivered its
    /// terminate sentinel or the stop flag is raised, then drains and
    /// terminates the local chain.
    fn run(mut self) -> Producer<R> {
        let node = self.transport.node_id();
        let peers = self.transport.num_nodes();
        let mut terminated = vec![false; peers];
        let mut next_id: u64 = 0;
        let mut idle_sweeps: u32 = 0;

        loop {
            if self.stop.load(Ordering::Relaxed) {
                tracing::debug!(node, "shuffle pull stopping on flag");
                break;
            }
            if terminated.iter().all(|done| *done) {
                tracing::debug!(node, "shuffle pull saw terminate from every peer");
                break;
            }

            let mut progressed = false;
            for from in 0..peers {
                if terminated[from] {
                    continue;
                }
                for _ in 0..DRAIN_BATCH {
                    let Some(message) = self.transport.try_recv(from) else {
                        break;
                    };
                    progressed = true;
                    match message {
                        WireMessage::Terminate => {
                            terminated[from] = true;
                            break;
                        }
                        WireMessage::Record(payload) => {
                            match R::from_wire(next_id, &payload) {
                                Ok(record) => {
                                    next_id += 1;
                                    let received =
                                        self.stats.received.fetch_add(1, Ordering::Relaxed) + 1;
                                    if received % self.metric_interval == 0 {
                                        tracing::info!(node, from, received, "shuffle pull count");
                                    }
                                    self.producer.feed(record);
                                }
                                Err(error) => {
                                    self.stats.parse_errors.fetch_add(1, Ordering::Relaxed);
                                    tracing::warn!(node, from, %error, "skipping undecodable payload");
                                }
                            }
                        }
                    }
                }
            }

            if progressed {
                idle_sweeps = 0;
            } else {
                // Spin-yield, then nap once the channels stay quiet.
                idle_sweeps = idle_sweeps.saturating_add(1);
                if idle_sweeps < IDLE_SPINS_BEFORE_NAP {
                    std::thread::yield_now();
                } else {
                    std::thread::sleep(Duration::from_micros(100));
                }
            }
        }

        self.producer.terminate();
        self.producer
    }
}

impl<R: FlowRecord> std::fmt::Debug for ShuffleReceiver<R> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ShuffleReceiver")
            .field("node_id", &self.transport.node_id())
            .finish_non_exhaustive()
    }
}

/// Handle to a running pull thread.
pub struct ShuffleHandle<R> {
    thread: JoinHandle<Producer<R>>,
    stop: Arc<AtomicBool>,
}

impl<R> ShuffleHandle<R> {
    /// Raises the cooperative stop flag; the pull loop notices between
    /// messages.
    pub fn stop(&self) {
        self.stop.store(true, Ordering::Relaxed);
    }

    /// Waits for the pull thread and returns the (terminated) local
    /// producer chain.
    ///
    /// # Panics
    ///
    /// Panics if the pull thread panicked.
    #[must_use]
    pub fn join(self) -> Producer<R> {
        self.thread.join().expect("shuffle pull thread panicked")
    }
}

impl<R> std::fmt::Debug for ShuffleHandle<R> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ShuffleHandle").finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dataflow::Dataflow;
    use crate::flow::Netflow;
    use crate::shuffle::MeshTransport;

    fn sender_for(
        transport: Arc<dyn Transport>,
        stats: &Arc<ShuffleStats>,
    ) -> ShuffleSender<Netflow> {
        ShuffleSender::new(transport, Arc::clone(stats), 1_000_000)
    }

    #[test]
    fn test_sender_coalesces_same_node() {
        let mut mesh = MeshTransport::mesh(1, 16);
        let transport: Arc<dyn Transport> = Arc::new(mesh.remove(0));
        let stats = Arc::new(ShuffleStats::new());
        let mut sender = sender_for(Arc::clone(&transport), &stats);

        let record = Netflow::sample("a", "b", 80);
        let mut out = OutputVec::new();
        sender.on_record(&record, &mut out).unwrap();

        // One node: both routes land on node 0, coalesced to one send.
        assert_eq!(stats.snapshot().sent, 1);
        assert!(transport.try_recv(0).is_some());
        assert!(transport.try_recv(0).is_none());
    }

    #[test]
    fn test_sender_counts_hwm_drops() {
        let mut mesh = MeshTransport::mesh(1, 2);
        let transport: Arc<dyn Transport> = Arc::new(mesh.remove(0));
        let stats = Arc::new(ShuffleStats::new());
        let mut sender = sender_for(transport, &stats);

        let record = Netflow::sample("a", "b", 80);
        let mut out = OutputVec::new();
        for _ in 0..5 {
            sender.on_record(&record, &mut out).unwrap();
        }
        let snap = stats.snapshot();
        assert_eq!(snap.sent, 2);
        assert_eq!(snap.send_failed, 3);
        assert_eq!(snap.consumed, 5);
    }

    #[test]
    fn test_receiver_assigns_fresh_ids_and_terminates() {
        let mut mesh = MeshTransport::mesh(1, 16);
        let transport: Arc<dyn Transport> = Arc::new(mesh.remove(0));
        let stats = Arc::new(ShuffleStats::new());

        let mut record = Netflow::sample("a", "b", 80);
        record.set_id(999);
        transport.send(0, WireMessage::Record(record.to_wire()));
        transport.send(0, WireMessage::Record(record.to_wire()));
        transport.send(0, WireMessage::Terminate);

        let receiver = ShuffleReceiver::<Netflow>::new(
            Arc::clone(&transport),
            Producer::new(1, Dataflow::new()),
            Arc::clone(&stats),
            Arc::new(AtomicBool::new(false)),
            1_000_000,
        );
        let producer = receiver.spawn().join();

        assert_eq!(producer.fed(), 2);
        assert_eq!(stats.snapshot().received, 2);
    }

    #[test]
    fn test_receiver_skips_undecodable_payloads() {
        let mut mesh = MeshTransport::mesh(1, 16);
        let transport: Arc<dyn Transport> = Arc::new(mesh.remove(0));
        let stats = Arc::new(ShuffleStats::new());

        transport.send(0, WireMessage::Record("not,a,netflow".to_string()));
        transport.send(0, WireMessage::Terminate);

        let receiver = ShuffleReceiver::<Netflow>::new(
            transport,
            Producer::new(1, Dataflow::new()),
            Arc::clone(&stats),
            Arc::new(AtomicBool::new(false)),
            1_000_000,
        );
        let producer = receiver.spawn().join();

        assert_eq!(producer.fed(), 0);
        assert_eq!(stats.snapshot().parse_errors, 1);
    }

    #[test]
    fn test_stop_flag_exits_without_sentinels() {
        let mut mesh = MeshTransport::mesh(2, 16);
        let _peer = mesh.pop().unwrap();
        let transport: Arc<dyn Transport> = Arc::new(mesh.remove(0));
        let stop = Arc::new(AtomicBool::new(false));

        let receiver = ShuffleReceiver::<Netflow>::new(
            transport,
            Producer::new(1, Dataflow::new()),
            Arc::new(ShuffleStats::new()),
            Arc::clone(&stop),
            1_000_000,
        );
        let handle = receiver.spawn();
        handle.stop();
        let _ = handle.join();
    }
}
