//! Per-tuple feature vector assembly for the offline create-features mode.
//!
//! Feature-producing operators register their identifier up front (column
//! order is registration order) and then report one `(tuple id, value)` pair
//! per consumed tuple. Once every registered column has reported for a
//! tuple, the subscriber emits one CSV row and forgets the tuple.

use std::io::Write;

use fxhash::FxHashMap;
use parking_lot::Mutex;

/// Errors raised by the [`FeatureSubscriber`].
#[derive(Debug, thiserror::Error)]
pub enum SubscriberError {
    /// `register` was called after `init`.
    #[error("cannot register '{0}' after init")]
    RegisterAfterInit(String),

    /// `update` was called with an identifier that never registered.
    #[error("identifier '{0}' is not registered")]
    Unregistered(String),

    /// `update` was called before `init`.
    #[error("subscriber is not initialized")]
    NotInitialized,

    /// The output writer failed.
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

struct Row {
    values: Vec<Option<f64>>,
    filled: usize,
}

struct Inner {
    columns: Vec<String>,
    index: FxHashMap<String, usize>,
    rows: FxHashMap<u64, Row>,
    out: Option<Box<dyn Write + Send>>,
    rows_written: u64,
}

/// Buffers per-tuple feature vectors and emits one CSV row per completed
/// tuple, columns in registration order.
pub struct FeatureSubscriber {
    inner: Mutex<Inner>,
}

impl FeatureSubscriber {
    /// Creates a subscriber sized for roughly `capacity` in-flight tuples.
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        Self {
            inner: Mutex::new(Inner {
                columns: Vec::new(),
                index: FxHashMap::default(),
                rows: FxHashMap::with_capacity_and_hasher(
                    capacity,
                    fxhash::FxBuildHasher::default(),
                ),
                out: None,
                rows_written: 0,
            }),
        }
    }

    /// Registers a feature column. Must complete before [`init`].
    ///
    /// # Errors
    ///
    /// [`SubscriberError::RegisterAfterInit`] once the subscriber is live.
    ///
    /// [`init`]: FeatureSubscriber::init
    pub fn register(&self, identifier: &str) -> Result<(), SubscriberError> {
        let mut inner = self.inner.lock();
        if inner.out.is_some() {
            return Err(SubscriberError::RegisterAfterInit(identifier.to_string()));
        }
        if !inner.index.contains_key(identifier) {
            let position = inner.columns.len();
            inner.columns.push(identifier.to_string());
            inner.index.insert(identifier.to_string(), position);
        }
        Ok(())
    }

    /// Attaches the output writer and goes live. Call after every
    /// `register` and before the pipeline starts.
    pub fn init(&self, out: Box<dyn Write + Send>) {
        let mut inner = self.inner.lock();
        inner.out = Some(out);
    }

    /// Reports `value` for `identifier` on tuple `tuple_id`. Emits the
    /// tuple's CSV row once all registered columns have reported.
    ///
    /// # Errors
    ///
    /// [`SubscriberError::NotInitialized`] before `init`,
    /// [`SubscriberError::Unregistered`] for unknown identifiers, or the
    /// underlying I/O error.
    pub fn update(
        &self,
        tuple_id: u64,
        identifier: &str,
        value: f64,
    ) -> Result<(), SubscriberError> {
        let mut inner = self.inner.lock();
        if inner.out.is_none() {
            return Err(SubscriberError::NotInitialized);
        }
        let Some(&column) = inner.index.get(identifier) else {
            return Err(SubscriberError::Unregistered(identifier.to_string()));
        };
        let width = inner.columns.len();
        let row = inner.rows.entry(tuple_id).or_insert_with(|| Row {
            values: vec![None; width],
            filled: 0,
        });
        if row.values[column].is_none() {
            row.filled += 1;
        }
        row.values[column] = Some(value);

        if row.filled == width {
            let row = inner.rows.remove(&tuple_id).expect("row present");
            let line = row
                .values
                .iter()
                .map(|v| v.unwrap_or(0.0).to_string())
                .collect::<Vec<_>>()
                .join(",");
            let out = inner.out.as_mut().expect("initialized");
            writeln!(out, "{line}")?;
            inner.rows_written += 1;
        }
        Ok(())
    }

    /// Flushes the writer. Tuples that never completed stay buffered and
    /// are dropped with the subscriber.
    ///
    /// # Errors
    ///
    /// Returns the underlying I/O error.
    pub fn flush(&self) -> Result<(), SubscriberError> {
        let mut inner = self.inner.lock();
        let pending = inner.rows.len();
        if pending > 0 {
            tracing::debug!(pending, "flushing with incomplete feature rows");
        }
        if let Some(out) = inner.out.as_mut() {
            out.flush()?;
        }
        Ok(())
    }

    /// Completed rows written so far.
    #[must_use]
    pub fn rows_written(&self) -> u64 {
        self.inner.lock().rows_written
    }

    /// Registered column identifiers in emission order.
    #[must_use]
    pub fn columns(&self) -> Vec<String> {
        self.inner.lock().columns.clone()
    }
}

impl std::fmt::Debug for FeatureSubscriber {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let inner = self.inner.lock();
        f.debug_struct("FeatureSubscriber")
            .field("columns", &inner.columns)
            .field("rows_written", &inner.rows_written)
            .finish_non_exhaustive()
    }
}
