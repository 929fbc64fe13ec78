//! # Streaming Operators
//!
//! The keyed operators of the pipeline: sliding-window estimators
//! (exponential-histogram mean/variance, blocked top-K), the identity
//! projection, and the expression filter.
//!
//! Every feature-producing operator is parameterized the same way: a value
//! field, a [`KeySpec`](crate::flow::KeySpec) deriving the per-key state
//! index, and an identifier naming its output in the
//! [`FeatureMap`](crate::feature::FeatureMap). Per-key state is created
//! lazily on first observation and never evicted; it is touched only by
//! the thread that owns the operator's chain.

use std::sync::Arc;

use crate::feature::{Feature, FeatureMap, FeatureSubscriber, SubscriberError};

mod exp_histogram;
mod filter;
mod identity;
mod topk;

pub use exp_histogram::{EhStatistic, ExponentialHistogram, ExponentialHistogramOperator};
pub use filter::{FilterOperator, FilterStats, FilterStatsSnapshot};
pub use identity::IdentityOperator;
pub use topk::{BlockedTopK, TopKOperator};

/// Shared plumbing of every feature-producing operator: the identifier,
/// the node-wide feature map, and the optional subscriber.
pub(crate) struct FeatureEmitter {
    identifier: String,
    features: Arc<FeatureMap>,
    subscriber: Option<Arc<FeatureSubscriber>>,
}

impl FeatureEmitter {
    pub(crate) fn new(identifier: impl Into<String>, features: Arc<FeatureMap>) -> Self {
        Self {
            identifier: identifier.into(),
            features,
            subscriber: None,
        }
    }

    pub(crate) fn identifier(&self) -> &str {
        &self.identifier
    }

    /// Registers this operator's column with the subscriber and keeps the
    /// handle for per-tuple notifications.
    pub(crate) fn register_subscriber(
        &mut self,
        subscriber: Arc<FeatureSubscriber>,
    ) -> Result<(), SubscriberError> {
        subscriber.register(&self.identifier)?;
        self.subscriber = Some(subscriber);
        Ok(())
    }

    /// Publishes the feature for a tuple key.
    pub(crate) fn emit(&self, key: &str, feature: Feature) {
        self.features.update_insert(key, &self.identifier, feature);
    }

    /// Reports the per-tuple value to the subscriber, if one registered.
    pub(crate) fn notify(&self, tuple_id: u64, value: f64) {
        if let Some(subscriber) = &self.subscriber {
            if let Err(error) = subscriber.update(tuple_id, &self.identifier, value) {
                tracing::debug!(
                    identifier = %self.identifier,
                    %error,
                    "subscriber update failed"
                );
            }
        }
    }
}
