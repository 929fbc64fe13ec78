//! End-to-end pipeline scenarios: shuffle partitioning across a two-node
//! mesh, the offline create-features flow, and the live filter pipeline.

use std::io::Write as _;
use std::sync::atomic::AtomicBool;
use std::sync::{Arc, Mutex};

use eddy_core::dataflow::{Dataflow, Operator, OperatorError, OutputVec, Producer};
use eddy_core::expr::{BinaryOp, Expression, Token};
use eddy_core::feature::{FeatureMap, FeatureSubscriber};
use eddy_core::flow::{FlowField, FlowRecord, KeySpec, Netflow};
use eddy_core::operator::{
    ExponentialHistogramOperator, FilterOperator, FilterStats, IdentityOperator, TopKOperator,
};
use eddy_core::shuffle::{
    FlowPartitioner, MeshTransport, ShuffleReceiver, ShuffleSender, ShuffleStats, Transport,
};
use eddy_core::source::{CsvFileSource, DataSource};

/// Sink operator capturing every record it sees.
struct Collect {
    records: Arc<Mutex<Vec<Netflow>>>,
}

impl Collect {
    fn new() -> (Self, Arc<Mutex<Vec<Netflow>>>) {
        let records = Arc::new(Mutex::new(Vec::new()));
        (
            Self {
                records: Arc::clone(&records),
            },
            records,
        )
    }
}

impl Operator<Netflow> for Collect {
    fn name(&self) -> &str {
        "collect"
    }

    fn on_record(
        &mut self,
        record: &Netflow,
        _out: &mut OutputVec<Netflow>,
    ) -> Result<(), OperatorError> {
        self.records.lock().unwrap().push(record.clone());
        Ok(())
    }
}

fn netflow_line(source: &str, dest: &str, port: u32, bytes: u64) -> String {
    format!("0,1.0,tcp,{source},{dest},49152,{port},0.1,100,200,{bytes},240,3,4")
}

fn record(source: &str, dest: &str, port: u32) -> Netflow {
    Netflow::from_csv(&netflow_line(source, dest, port, 140)).unwrap()
}

/// Finds an address whose partition is `node` under a 2-node split.
fn addr_on(partitioner: &FlowPartitioner, node: usize, base: &str) -> String {
    for i in 0..128 {
        let candidate = format!("{base}.{i}");
        if partitioner.node_for(&candidate) == node {
            return candidate;
        }
    }
    panic!("no address hashing to node {node}");
}

struct TwoNodeCluster {
    transports: Vec<Arc<dyn Transport>>,
    stats: Vec<Arc<ShuffleStats>>,
}

impl TwoNodeCluster {
    fn new() -> Self {
        let transports = MeshTransport::mesh(2, 64)
            .into_iter()
            .map(|t| Arc::new(t) as Arc<dyn Transport>)
            .collect();
        let stats = (0..2).map(|_| Arc::new(ShuffleStats::new())).collect();
        Self { transports, stats }
    }

    fn spawn_receivers(
        &self,
    ) -> (
        Vec<eddy_core::shuffle::ShuffleHandle<Netflow>>,
        Vec<Arc<Mutex<Vec<Netflow>>>>,
    ) {
        let mut handles = Vec::new();
        let mut collected = Vec::new();
        for node in 0..2 {
            let (collect, records) = Collect::new();
            let mut flow = Dataflow::new();
            let sink = flow.add_operator(Box::new(collect));
            flow.add_root(sink).unwrap();
            let receiver = ShuffleReceiver::<Netflow>::new(
                Arc::clone(&self.transports[node]),
                Producer::new(1, flow),
                Arc::clone(&self.stats[node]),
                Arc::new(AtomicBool::new(false)),
                1_000_000,
            );
            handles.push(receiver.spawn());
            collected.push(records);
        }
        (handles, collected)
    }

    fn senders(&self) -> Vec<Producer<Netflow>> {
        (0..2)
            .map(|node| {
                let mut ingest = Dataflow::new();
                let sender = ingest.add_operator(Box::new(ShuffleSender::<Netflow>::new(
                    Arc::clone(&self.transports[node]),
                    Arc::clone(&self.stats[node]),
                    1_000_000,
                )));
                ingest.add_root(sender).unwrap();
                Producer::new(1, ingest)
            })
            .collect()
    }
}

#[test]
fn test_shuffle_delivers_to_both_partitions_with_fresh_ids() {
    let cluster = TwoNodeCluster::new();
    let (handles, collected) = cluster.spawn_receivers();
    let mut senders = cluster.senders();

    let partitioner = FlowPartitioner::new(2);
    let source = addr_on(&partitioner, 0, "172.16.0");
    let dest = addr_on(&partitioner, 1, "10.0.0");

    let mut input = record(&source, &dest, 80);
    input.set_id(12_345);
    senders[0].feed(input.clone());
    for sender in &mut senders {
        sender.terminate();
    }
    for handle in handles {
        let _ = handle.join();
    }

    let node0 = collected[0].lock().unwrap();
    let node1 = collected[1].lock().unwrap();
    assert_eq!(node0.len(), 1, "node 0 receives the source replica");
    assert_eq!(node1.len(), 1, "node 1 receives the dest replica");
    for received in node0.iter().chain(node1.iter()) {
        assert_ne!(received.id(), 12_345, "receive id is freshly assigned");
        assert_eq!(received.source_ip, input.source_ip);
        assert_eq!(received.dest_ip, input.dest_ip);
    }
}

#[test]
fn test_shuffle_coalesces_same_partition() {
    let cluster = TwoNodeCluster::new();
    let (handles, collected) = cluster.spawn_receivers();
    let mut senders = cluster.senders();

    let partitioner = FlowPartitioner::new(2);
    let source = addr_on(&partitioner, 0, "172.16.1");
    let dest = addr_on(&partitioner, 0, "10.0.1");

    senders[0].feed(record(&source, &dest, 80));
    for sender in &mut senders {
        sender.terminate();
    }
    for handle in handles {
        let _ = handle.join();
    }

    assert_eq!(collected[0].lock().unwrap().len(), 1, "one coalesced send");
    assert_eq!(collected[1].lock().unwrap().len(), 0);
    assert_eq!(cluster.stats[0].snapshot().sent, 1);
}

/// Shared in-memory writer for inspecting subscriber output.
#[derive(Clone, Default)]
struct SharedBuf(Arc<Mutex<Vec<u8>>>);

impl std::io::Write for SharedBuf {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        self.0.lock().unwrap().extend_from_slice(buf);
        Ok(buf.len())
    }
    fn flush(&mut self) -> std::io::Result<()> {
        Ok(())
    }
}

#[test]
fn test_create_features_emits_one_row_per_record() {
    let mut file = tempfile::NamedTempFile::new().unwrap();
    for i in 0..6u32 {
        writeln!(
            file,
            "{}",
            netflow_line("172.16.0.9", &format!("10.0.0.{}", i % 2), 80, 100 + u64::from(i))
        )
        .unwrap();
    }
    writeln!(file, "this line does not parse").unwrap();
    file.flush().unwrap();

    let features = Arc::new(FeatureMap::new(64));
    let subscriber = Arc::new(FeatureSubscriber::new(16));
    let key = KeySpec::single(FlowField::DestIp);

    let mut label = IdentityOperator::<Netflow>::new(
        FlowField::Label,
        key.clone(),
        Arc::clone(&features),
        "label",
    );
    label.register_subscriber(Arc::clone(&subscriber)).unwrap();

    let mut mean = ExponentialHistogramOperator::<Netflow>::average(
        4,
        2,
        FlowField::SrcTotalBytes,
        key.clone(),
        Arc::clone(&features),
        "averageSrcTotalBytes",
    );
    mean.register_subscriber(Arc::clone(&subscriber)).unwrap();

    let mut top = TopKOperator::<Netflow>::new(
        10,
        5,
        2,
        FlowField::DestPort,
        key,
        Arc::clone(&features),
        "topDestPorts",
    );
    top.register_subscriber(Arc::clone(&subscriber)).unwrap();

    let buf = SharedBuf::default();
    subscriber.init(Box::new(buf.clone()));

    let mut flow = Dataflow::new();
    for operator in [
        Box::new(label) as Box<dyn Operator<Netflow>>,
        Box::new(mean),
        Box::new(top),
    ] {
        let id = flow.add_operator(operator);
        flow.add_root(id).unwrap();
    }
    let mut producer = Producer::new(2, flow);

    let mut source = CsvFileSource::<Netflow>::new(file.path());
    source.connect().unwrap();
    let stats = source.run(&mut producer).unwrap();
    producer.terminate();
    subscriber.flush().unwrap();

    assert_eq!(stats.records, 6);
    assert_eq!(stats.parse_errors, 1);
    assert_eq!(subscriber.rows_written(), 6);

    let text = String::from_utf8(buf.0.lock().unwrap().clone()).unwrap();
    for line in text.lines() {
        assert_eq!(line.split(',').count(), 3, "row {line}");
    }
}

#[test]
fn test_filter_pipeline_gates_on_port_concentration() {
    let features = Arc::new(FeatureMap::new(64));
    let filter_stats = Arc::new(FilterStats::new());
    let (collect, matched) = Collect::new();

    let mut flow = Dataflow::new();
    let top = flow.add_operator(Box::new(TopKOperator::<Netflow>::new(
        10,
        5,
        2,
        FlowField::DestPort,
        KeySpec::single(FlowField::DestIp),
        Arc::clone(&features),
        "topDestPorts",
    )));
    let expression = Expression::new(vec![
        Token::topk_frequency("topDestPorts", 0),
        Token::Op(BinaryOp::Add),
        Token::topk_frequency("topDestPorts", 1),
        Token::Op(BinaryOp::LessThan),
        Token::Number(0.9),
    ]);
    let filter = flow.add_operator(Box::new(FilterOperator::new(
        "lowConcentration",
        expression,
        KeySpec::single(FlowField::DestIp),
        Arc::clone(&features),
        1,
        Arc::clone(&filter_stats),
    )));
    let sink = flow.add_operator(Box::new(collect));
    flow.add_root(top).unwrap();
    flow.add_root(filter).unwrap();
    flow.connect(filter, sink).unwrap();

    let mut producer = Producer::new(1, flow);
    // Destination E: one port only. Destination D: four distinct ports.
    for port in [80, 80, 80, 80] {
        producer.feed(record("s", "E", port));
    }
    for port in [22, 443, 8080, 53] {
        producer.feed(record("s", "D", port));
    }
    producer.terminate();

    let matched = matched.lock().unwrap();
    assert!(
        matched.iter().all(|r| r.dest_ip == "D"),
        "only the spread destination passes"
    );
    assert!(!matched.is_empty(), "spread destination must pass");

    let snapshot = filter_stats.snapshot();
    assert_eq!(snapshot.passed as usize, matched.len());
    assert_eq!(
        snapshot.passed + snapshot.dropped + snapshot.failed,
        8,
        "every record was either forwarded or dropped"
    );
}
