//! Identity projection: publishes one field of each record, untouched.
//!
//! Exists mostly for the create-features mode, where the label column has
//! to ride along with the derived features.

use std::sync::Arc;

use crate::dataflow::{Operator, OperatorError, OutputVec};
use crate::feature::{Feature, FeatureMap, FeatureSubscriber, SubscriberError};
use crate::flow::{FlowField, FlowRecord, KeySpec};

use super::FeatureEmitter;

/// Publishes `Feature::Single(field value)` for every record.
pub struct IdentityOperator<R> {
    base: FeatureEmitter,
    key: KeySpec,
    value_field: FlowField,
    _record: std::marker::PhantomData<fn(&R)>,
}

impl<R: FlowRecord> IdentityOperator<R> {
    /// Creates an identity projection of `value_field` keyed by `key`.
    #[must_use]
    pub fn new(
        value_field: FlowField,
        key: KeySpec,
        features: Arc<FeatureMap>,
        identifier: impl Into<String>,
    ) -> Self {
        Self {
            base: FeatureEmitter::new(identifier, features),
            key,
            value_field,
            _record: std::marker::PhantomData,
        }
    }

    /// Registers this operator's column with a feature subscriber.
    ///
    /// # Errors
    ///
    /// Propagates [`SubscriberError`] when the subscriber is already live.
    pub fn register_subscriber(
        &mut self,
        subscriber: Arc<FeatureSubscriber>,
    ) -> Result<(), SubscriberError> {
        self.base.register_subscriber(subscriber)
    }
}

impl<R: FlowRecord> Operator<R> for IdentityOperator<R> {
    fn name(&self) -> &str {
        self.base.identifier()
    }

    fn on_record(&mut self, record: &R, _out: &mut OutputVec<R>) -> Result<(), OperatorError> {
        let value = record.field_f64(self.value_field).ok_or_else(|| {
            OperatorError::ConfigError("identity field is not numeric on this schema".to_string())
        })?;
        let key = self.key.key_for(record);
        self.base.emit(&key, Feature::Single(value));
        self.base.notify(record.id(), value);
        Ok(())
    }
}

impl<R> std::fmt::Debug for IdentityOperator<R> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IdentityOperator")
            .field("identifier", &self.base.identifier())
            .finish_non_exhaustive()
    }
}
