//! # Eddy
//!
//! Distributed streaming analytics over netflow-like flow records.
//!
//! Eddy partitions a record stream across a cluster by endpoint, maintains
//! per-key sliding-window estimates in bounded memory (exponential-histogram
//! mean and variance, blocked top-K heavy hitters), and gates records on
//! filter expressions over the derived features.
//!
//! # Quick Start
//!
//! ```rust
//! use eddy::prelude::*;
//!
//! // Per-destination mean of source bytes over the last 10k flows.
//! let features = Arc::new(FeatureMap::new(10_000));
//! let mut flow = Dataflow::new();
//! let mean = flow.add_operator(Box::new(ExponentialHistogramOperator::<Netflow>::average(
//!     10_000,
//!     2,
//!     FlowField::SrcTotalBytes,
//!     KeySpec::single(FlowField::DestIp),
//!     Arc::clone(&features),
//!     "averageSrcTotalBytes",
//! )));
//! flow.add_root(mean)?;
//!
//! let mut producer = Producer::new(1, flow);
//! let record = Netflow::from_csv(
//!     "1,1.5,tcp,172.30.1.11,10.0.0.5,5580,80,0.07,2240,1240,2896,1896,16,14",
//! )?;
//! producer.feed(record);
//! producer.terminate();
//!
//! assert!(features.exists("10.0.0.5", "averageSrcTotalBytes"));
//! # Ok::<(), eddy::Error>(())
//! ```

#![deny(missing_docs)]
#![warn(clippy::all)]

pub use eddy_core::*;

/// Commonly used types and traits.
///
/// ```rust
/// use eddy::prelude::*;
/// ```
pub mod prelude {
    // Flow model
    pub use eddy_core::flow::{FlowField, FlowRecord, KeySpec, Netflow, VastNetflow};

    // Fabric
    pub use eddy_core::dataflow::{Dataflow, Operator, OperatorId, Producer};

    // Features & expressions
    pub use eddy_core::expr::{BinaryOp, Expression, Token};
    pub use eddy_core::feature::{Feature, FeatureMap, FeatureProjection, FeatureSubscriber};

    // Operators
    pub use eddy_core::operator::{
        ExponentialHistogramOperator, FilterOperator, FilterStats, IdentityOperator, TopKOperator,
    };

    // Shuffle
    pub use eddy_core::shuffle::{
        MeshTransport, ShuffleReceiver, ShuffleSender, ShuffleStats, Transport,
    };

    // Configuration
    pub use eddy_core::config::{ClusterConfig, WindowConfig};

    // Sources
    pub use eddy_core::source::{CsvFileSource, DataSource, TcpLineSource};

    // Standard library re-exports for convenience
    pub use std::sync::Arc;
}
