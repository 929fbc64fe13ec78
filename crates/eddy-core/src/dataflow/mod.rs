//! # Dataflow Fabric
//!
//! The producer/consumer fabric: an arena of operators wired into a static
//! graph, plus the batching [`Producer`] that feeds it.
//!
//! ## Ownership model
//!
//! Operators never hold references to each other. The [`Dataflow`] arena
//! owns every operator; registrations store [`OperatorId`] handles and the
//! fabric routes records through the handle graph. One thread owns the
//! whole chain (`&mut` dispatch), so operator state needs no locks — the
//! only shared structure operators touch is the feature map.
//!
//! ## Contract
//!
//! - All wiring (`connect` / `add_root`) completes before the first record
//!   is fed. The graph does not change at runtime.
//! - A failing operator is logged and the fabric keeps running; its
//!   downstream sees nothing for that record.
//! - `terminate` propagates to every operator exactly once.

use smallvec::SmallVec;

/// Handle to an operator in a [`Dataflow`] arena.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct OperatorId(pub u32);

impl std::fmt::Display for OperatorId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "OperatorId({})", self.0)
    }
}

/// A record emitted by an operator toward its downstream.
#[derive(Debug)]
pub enum Output<R> {
    /// Pass a record on (identity pass-through for filter matches).
    Forward(R),
}

/// Collection type for operator outputs; most operators emit zero or one.
pub type OutputVec<R> = SmallVec<[Output<R>; 2]>;

/// Errors raised inside an operator. The fabric logs these and continues.
#[derive(Debug, thiserror::Error)]
pub enum OperatorError {
    /// The operator could not process the record.
    #[error("processing failed: {0}")]
    ProcessingFailed(String),

    /// The operator is misconfigured for this record schema.
    #[error("configuration error: {0}")]
    ConfigError(String),
}

/// Trait implemented by every streaming operator.
///
/// `on_record` is called inline on the feeding thread and must not block
/// outside I/O boundaries.
pub trait Operator<R>: Send {
    /// Human-readable operator name, used in logs.
    fn name(&self) -> &str;

    /// Processes one record, pushing any forwarded records into `out`.
    ///
    /// # Errors
    ///
    /// An error marks this record as failed for this operator; the fabric
    /// logs it and keeps running.
    fn on_record(&mut self, record: &R, out: &mut OutputVec<R>) -> Result<(), OperatorError>;

    /// Called once when the stream ends. Operators may flush buffered
    /// records into `out`; they are routed downstream like any forward.
    fn on_terminate(&mut self, _out: &mut OutputVec<R>) {}
}

/// Errors raised while wiring a [`Dataflow`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum DataflowError {
    /// A handle does not name an operator in this arena.
    #[error("unknown operator handle")]
    UnknownOperator,

    /// An operator cannot feed itself.
    #[error("self loop rejected")]
    SelfLoop,

    /// The edge would close a cycle; the graph must stay acyclic.
    #[error("edge would create a cycle")]
    CycleDetected,
}

/// The operator arena plus its static routing table.
pub struct Dataflow<R> {
    operators: Vec<Box<dyn Operator<R>>>,
    downstream: Vec<SmallVec<[OperatorId; 4]>>,
    roots: SmallVec<[OperatorId; 4]>,
    terminated: bool,
}

impl<R> Default for Dataflow<R> {
    fn default() -> Self {
        Self::new()
    }
}

impl<R> Dataflow<R> {
    /// An empty arena.
    #[must_use]
    pub fn new() -> Self {
        Self {
            operators: Vec::new(),
            downstream: Vec::new(),
            roots: SmallVec::new(),
            terminated: false,
        }
    }

    /// Moves an operator into the arena, returning its handle.
    pub fn add_operator(&mut self, operator: Box<dyn Operator<R>>) -> OperatorId {
        let id = OperatorId(u32::try_from(self.operators.len()).expect("arena fits in u32"));
        self.operators.push(operator);
        self.downstream.push(SmallVec::new());
        id
    }

    /// Routes `from`'s forwarded records to `to`. Pre-start only.
    ///
    /// # Errors
    ///
    /// Rejects unknown handles, self-loops, and edges that would close a
    /// cycle.
    pub fn connect(&mut self, from: OperatorId, to: OperatorId) -> Result<(), DataflowError> {
        let count = self.operators.len();
        if from.0 as usize >= count || to.0 as usize >= count {
            return Err(DataflowError::UnknownOperator);
        }
        if from == to {
            return Err(DataflowError::SelfLoop);
        }
        if self.reaches(to, from) {
            return Err(DataflowError::CycleDetected);
        }
        self.downstream[from.0 as usize].push(to);
        Ok(())
    }

    /// Marks an operator as a root: it receives every record fed into the
    /// owning producer.
    ///
    /// # Errors
    ///
    /// Rejects unknown handles.
    pub fn add_root(&mut self, id: OperatorId) -> Result<(), DataflowError> {
        if id.0 as usize >= self.operators.len() {
            return Err(DataflowError::UnknownOperator);
        }
        self.roots.push(id);
        Ok(())
    }

    /// Whether `from` can reach `target` through downstream edges.
    fn reaches(&self, from: OperatorId, target: OperatorId) -> bool {
        let mut stack: SmallVec<[OperatorId; 8]> = SmallVec::new();
        stack.push(from);
        let mut seen = vec![false; self.operators.len()];
        while let Some(id) = stack.pop() {
            if id == target {
                return true;
            }
            if std::mem::replace(&mut seen[id.0 as usize], true) {
                continue;
            }
            stack.extend(self.downstream[id.0 as usize].iter().copied());
        }
        false
    }

    /// Number of operators in the arena.
    #[must_use]
    pub fn len(&self) -> usize {
        self.operators.len()
    }

    /// Whether the arena is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.operators.is_empty()
    }

    /// Delivers one record to every root, then routes forwards downstream.
    pub fn broadcast(&mut self, record: &R) {
        let roots = self.roots.clone();
        for root in roots {
            self.dispatch(root, record);
        }
    }

    fn dispatch(&mut self, id: OperatorId, record: &R) {
        let mut out = OutputVec::new();
        let operator = &mut self.operators[id.0 as usize];
        if let Err(error) = operator.on_record(record, &mut out) {
            tracing::error!(
                operator = operator.name(),
                %error,
                "operator failed; fabric continues"
            );
            return;
        }
        if out.is_empty() {
            return;
        }
        let targets = self.downstream[id.0 as usize].clone();
        for output in out {
            let Output::Forward(forwarded) = output;
            for next in &targets {
                self.dispatch(*next, &forwarded);
            }
        }
    }

    /// Propagates termination to every operator, once, in arena order
    /// (upstream operators are added first, so flushes drain downstream).
    pub fn terminate(&mut self) {
        if std::mem::replace(&mut self.terminated, true) {
            return;
        }
        for index in 0..self.operators.len() {
            let mut out = OutputVec::new();
            self.operators[index].on_terminate(&mut out);
            if out.is_empty() {
                continue;
            }
            let targets = self.downstream[index].clone();
            for output in out {
                let Output::Forward(forwarded) = output;
                for next in &targets {
                    self.dispatch(*next, &forwarded);
                }
            }
        }
    }
}

impl<R> std::fmt::Debug for Dataflow<R> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Dataflow")
            .field("operators", &self.operators.len())
            .field("roots", &self.roots)
            .finish_non_exhaustive()
    }
}

/// The fabric's batching ingress: holds up to `queue_length` records, then
/// dispatches the whole batch through the dataflow.
///
/// Single-writer by construction — the owning thread is the only feeder,
/// which is the thread-safety contract of the fabric (wiring before
/// feeding, feeding from one thread).
pub struct Producer<R> {
    queue: Vec<R>,
    queue_length: usize,
    flow: Dataflow<R>,
    fed: u64,
}

impl<R> Producer<R> {
    /// Wraps a dataflow behind a queue of `queue_length` records.
    #[must_use]
    pub fn new(queue_length: usize, flow: Dataflow<R>) -> Self {
        let queue_length = queue_length.max(1);
        Self {
            queue: Vec::with_capacity(queue_length),
            queue_length,
            flow,
            fed: 0,
        }
    }

    /// Queues one record, dispatching the batch when the queue fills.
    pub fn feed(&mut self, record: R) {
        self.fed += 1;
        self.queue.push(record);
        if self.queue.len() >= self.queue_length {
            self.flush();
        }
    }

    /// Dispatches every queued record now.
    pub fn flush(&mut self) {
        let batch = std::mem::take(&mut self.queue);
        for record in &batch {
            self.flow.broadcast(record);
        }
    }

    /// Records fed since construction.
    #[must_use]
    pub fn fed(&self) -> u64 {
        self.fed
    }

    /// The wired dataflow.
    #[must_use]
    pub fn dataflow(&self) -> &Dataflow<R> {
        &self.flow
    }

    /// Mutable access for wiring before start.
    pub fn dataflow_mut(&mut self) -> &mut Dataflow<R> {
        &mut self.flow
    }

    /// Flushes the queue and terminates the dataflow.
    pub fn terminate(&mut self) {
        self.flush();
        self.flow.terminate();
    }
}

impl<R> std::fmt::Debug for Producer<R> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Producer")
            .field("queue_length", &self.queue_length)
            .field("queued", &self.queue.len())
            .field("fed", &self.fed)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU64, Ordering};
    use std::sync::Arc;

    struct Counting {
        seen: Arc<AtomicU64>,
        forward: bool,
        fail: bool,
    }

    impl Operator<u64> for Counting {
        fn name(&self) -> &str {
            "counting"
        }

        fn on_record(&mut self, record: &u64, out: &mut OutputVec<u64>) -> Result<(), OperatorError> {
            if self.fail {
                return Err(OperatorError::ProcessingFailed("boom".to_string()));
            }
            self.seen.fetch_add(1, Ordering::Relaxed);
            if self.forward {
                out.push(Output::Forward(*record + 1));
            }
            Ok(())
        }
    }

    fn counting(seen: &Arc<AtomicU64>, forward: bool, fail: bool) -> Box<Counting> {
        Box::new(Counting {
            seen: Arc::clone(seen),
            forward,
            fail,
        })
    }

    #[test]
    fn test_queue_dispatches_when_full() {
        let seen = Arc::new(AtomicU64::new(0));
        let mut flow: Dataflow<u64> = Dataflow::new();
        let id = flow.add_operator(counting(&seen, false, false));
        flow.add_root(id).unwrap();
        let mut producer = Producer::new(3, flow);

        producer.feed(1);
        producer.feed(2);
        assert_eq!(seen.load(Ordering::Relaxed), 0);
        producer.feed(3);
        assert_eq!(seen.load(Ordering::Relaxed), 3);
    }

    #[test]
    fn test_forward_reaches_downstream() {
        let first = Arc::new(AtomicU64::new(0));
        let second = Arc::new(AtomicU64::new(0));
        let mut flow: Dataflow<u64> = Dataflow::new();
        let a = flow.add_operator(counting(&first, true, false));
        let b = flow.add_operator(counting(&second, false, false));
        flow.connect(a, b).unwrap();
        flow.add_root(a).unwrap();

        flow.broadcast(&7);
        assert_eq!(first.load(Ordering::Relaxed), 1);
        assert_eq!(second.load(Ordering::Relaxed), 1);
    }

    #[test]
    fn test_failing_operator_does_not_stop_fabric() {
        let seen = Arc::new(AtomicU64::new(0));
        let mut flow: Dataflow<u64> = Dataflow::new();
        let bad = flow.add_operator(counting(&seen, false, true));
        let good = flow.add_operator(counting(&seen, false, false));
        flow.add_root(bad).unwrap();
        flow.add_root(good).unwrap();

        flow.broadcast(&1);
        // Only the healthy root counted.
        assert_eq!(seen.load(Ordering::Relaxed), 1);
    }

    #[test]
    fn test_cycle_rejected() {
        let seen = Arc::new(AtomicU64::new(0));
        let mut flow: Dataflow<u64> = Dataflow::new();
        let a = flow.add_operator(counting(&seen, true, false));
        let b = flow.add_operator(counting(&seen, true, false));
        flow.connect(a, b).unwrap();
        assert_eq!(flow.connect(b, a), Err(DataflowError::CycleDetected));
        assert_eq!(flow.connect(a, a), Err(DataflowError::SelfLoop));
    }

    #[test]
    fn test_terminate_flushes_remainder() {
        let seen = Arc::new(AtomicU64::new(0));
        let mut flow: Dataflow<u64> = Dataflow::new();
        let id = flow.add_operator(counting(&seen, false, false));
        flow.add_root(id).unwrap();
        let mut producer = Producer::new(100, flow);
        producer.feed(1);
        producer.feed(2);
        producer.terminate();
        assert_eq!(seen.load(Ordering::Relaxed), 2);
    }
}
