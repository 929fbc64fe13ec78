//! Single-node pipeline: top-K destination ports per destination host,
//! filtered on port concentration.
//!
//! Run with `cargo run --example basic_pipeline`.

use eddy::prelude::*;

/// Terminal sink that prints every record the filter lets through.
struct PrintSink;

impl Operator<Netflow> for PrintSink {
    fn name(&self) -> &str {
        "print-sink"
    }

    fn on_record(
        &mut self,
        record: &Netflow,
        _out: &mut eddy::dataflow::OutputVec<Netflow>,
    ) -> Result<(), eddy::dataflow::OperatorError> {
        println!(
            "match: {} -> {}:{}",
            record.source_ip, record.dest_ip, record.dest_port
        );
        Ok(())
    }
}

fn main() -> Result<(), eddy::Error> {
    let features = Arc::new(FeatureMap::new(1024));
    let filter_stats = Arc::new(FilterStats::new());

    let mut flow = Dataflow::new();

    // Top-2 destination ports per destination host, over the last 10 flows
    // in blocks of 5.
    let topk = flow.add_operator(Box::new(TopKOperator::<Netflow>::new(
        10,
        5,
        2,
        FlowField::DestPort,
        KeySpec::single(FlowField::DestIp),
        Arc::clone(&features),
        "topDestPorts",
    )));

    // Forward flows whose two heaviest ports carry less than 90% of the
    // traffic — spread-out destinations are the interesting ones.
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
    let sink = flow.add_operator(Box::new(PrintSink));

    flow.add_root(topk)?;
    flow.add_root(filter)?;
    flow.connect(filter, sink)?;

    let mut producer = Producer::new(1, flow);

    // A destination hammered on one port, and one spread over many.
    for (dest, port) in [
        ("10.0.0.1", 80),
        ("10.0.0.1", 80),
        ("10.0.0.1", 80),
        ("10.0.0.2", 22),
        ("10.0.0.2", 443),
        ("10.0.0.2", 8080),
        ("10.0.0.2", 53),
    ] {
        let line = format!("0,1.0,tcp,172.16.0.9,{dest},49152,{port},0.1,100,200,140,240,3,4");
        producer.feed(Netflow::from_csv(&line)?);
    }
    producer.terminate();

    let snapshot = filter_stats.snapshot();
    println!(
        "passed={} dropped={} failed={}",
        snapshot.passed, snapshot.dropped, snapshot.failed
    );
    Ok(())
}
