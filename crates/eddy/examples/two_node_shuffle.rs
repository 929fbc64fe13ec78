//! Two-node cluster over the in-process mesh: records are partitioned by
//! source and destination endpoint, and each node maintains per-destination
//! byte averages for its share of the key space.
//!
//! Run with `cargo run --example two_node_shuffle`.

use eddy::prelude::*;

fn node_chain(features: &Arc<FeatureMap>) -> Dataflow<Netflow> {
    let mut flow = Dataflow::new();
    let mean = flow.add_operator(Box::new(ExponentialHistogramOperator::<Netflow>::average(
        1_000,
        2,
        FlowField::SrcTotalBytes,
        KeySpec::single(FlowField::DestIp),
        Arc::clone(features),
        "averageSrcTotalBytes",
    )));
    flow.add_root(mean).expect("fresh arena");
    flow
}

fn main() -> Result<(), eddy::Error> {
    let config = ClusterConfig {
        num_nodes: 2,
        ..ClusterConfig::default()
    };

    let transports: Vec<Arc<dyn Transport>> = MeshTransport::mesh(config.num_nodes, config.hwm)
        .into_iter()
        .map(|t| Arc::new(t) as Arc<dyn Transport>)
        .collect();

    // One feature map, one pull thread, one sender per node.
    let features: Vec<Arc<FeatureMap>> = (0..config.num_nodes)
        .map(|_| Arc::new(FeatureMap::new(config.capacity)))
        .collect();
    let stats: Vec<Arc<ShuffleStats>> = (0..config.num_nodes)
        .map(|_| Arc::new(ShuffleStats::new()))
        .collect();

    let handles: Vec<_> = (0..config.num_nodes)
        .map(|node| {
            let receiver = ShuffleReceiver::<Netflow>::new(
                Arc::clone(&transports[node]),
                Producer::new(1, node_chain(&features[node])),
                Arc::clone(&stats[node]),
                Arc::new(std::sync::atomic::AtomicBool::new(false)),
                config.metric_interval,
            );
            receiver.spawn()
        })
        .collect();

    // Every node runs an ingest chain ending in a shuffle sender; here only
    // node 0 actually sees the trace, but each sender still owes every peer
    // a terminate sentinel.
    let mut ingests: Vec<Producer<Netflow>> = (0..config.num_nodes)
        .map(|node| {
            let mut ingest = Dataflow::new();
            let sender = ingest.add_operator(Box::new(ShuffleSender::<Netflow>::new(
                Arc::clone(&transports[node]),
                Arc::clone(&stats[node]),
                config.metric_interval,
            )));
            ingest.add_root(sender).expect("fresh arena");
            Producer::new(config.queue_length, ingest)
        })
        .collect();

    for i in 0..100u32 {
        let line = format!(
            "0,{}.0,tcp,172.16.{}.9,10.0.0.{},49152,80,0.1,{},200,140,240,3,4",
            i,
            i % 4,
            i % 8,
            100 + i
        );
        ingests[0].feed(Netflow::from_csv(&line)?);
    }
    // Flush the queues and broadcast the terminate sentinels.
    for producer in &mut ingests {
        producer.terminate();
    }

    for (node, handle) in handles.into_iter().enumerate() {
        let local = handle.join();
        let snapshot = stats[node].snapshot();
        println!(
            "node {node}: pulled {} records, {} features",
            snapshot.received,
            features[node].len()
        );
        drop(local);
    }
    Ok(())
}
