//! # Eddy Core
//!
//! The core streaming engine for Eddy: distributed analytics over
//! netflow-like flow records.
//!
//! This crate provides:
//! - **Flow model**: typed records addressed by field position, with the
//!   line/wire codec ([`flow`])
//! - **Dataflow fabric**: an operator arena with handle-based wiring and a
//!   batching producer ([`dataflow`])
//! - **Shuffle**: hash-partitioned cross-node exchange with bounded
//!   per-peer buffers ([`shuffle`])
//! - **Estimators**: sliding-window mean/variance and heavy hitters in
//!   bounded memory ([`operator`])
//! - **Feature map**: striped per-node store of derived features
//!   ([`feature`])
//! - **Expressions**: infix filter programs over named features ([`expr`])
//!
//! ## Design Principles
//!
//! 1. **Bounded memory per key** — O(k · log N) sketches, blocked top-K
//! 2. **Single-owner operator state** — one thread owns a chain; only the
//!    feature map is shared, behind striped locks
//! 3. **Latency over completeness at the edges** — full peer buffers drop
//!    and count instead of blocking the hot path
//! 4. **Static topology** — wiring completes before the first record flows
//!
//! ## Example
//!
//! ```rust
//! use std::sync::Arc;
//! use eddy_core::dataflow::{Dataflow, Producer};
//! use eddy_core::feature::FeatureMap;
//! use eddy_core::flow::{FlowField, KeySpec, Netflow};
//! use eddy_core::operator::ExponentialHistogramOperator;
//!
//! let features = Arc::new(FeatureMap::new(1024));
//! let mut flow = Dataflow::new();
//! let mean = flow.add_operator(Box::new(ExponentialHistogramOperator::<Netflow>::average(
//!     10_000,
//!     2,
//!     FlowField::SrcTotalBytes,
//!     KeySpec::single(FlowField::DestIp),
//!     Arc::clone(&features),
//!     "averageSrcTotalBytes",
//! )));
//! flow.add_root(mean).unwrap();
//! let mut producer = Producer::new(1, flow);
//! # let _ = &mut producer;
//! ```

#![deny(missing_docs)]
#![warn(clippy::all, clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]
// Allow unsafe in the shuffle SPSC ring only.
#![allow(unsafe_code)]

pub mod config;
pub mod dataflow;
pub mod expr;
pub mod feature;
pub mod flow;
pub mod graph;
pub mod operator;
pub mod shuffle;
pub mod source;

/// Result type for eddy-core operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Error types for eddy-core.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Record decoding errors.
    #[error("parse error: {0}")]
    Parse(#[from] flow::ParseError),

    /// Dataflow wiring errors.
    #[error("dataflow error: {0}")]
    Dataflow(#[from] dataflow::DataflowError),

    /// Operator processing errors.
    #[error("operator error: {0}")]
    Operator(#[from] dataflow::OperatorError),

    /// Expression conversion/evaluation errors.
    #[error("expression error: {0}")]
    Expr(#[from] expr::ExprError),

    /// Feature subscriber errors.
    #[error("subscriber error: {0}")]
    Subscriber(#[from] feature::SubscriberError),

    /// Edge request table errors.
    #[error("graph error: {0}")]
    Graph(#[from] graph::GraphError),

    /// Data source errors.
    #[error("source error: {0}")]
    Source(#[from] source::SourceError),
}
