//! # Flow Record Model
//!
//! Typed records flowing through the pipeline, addressed by field position.
//!
//! Every schema implements [`FlowRecord`]: a position-0 generated identifier,
//! a floating-point event time used as the window clock, projected field
//! access through [`FlowField`], and the line/wire codec used by the data
//! sources and the shuffle layer.
//!
//! ## Identifier discipline
//!
//! The identifier is assigned by the first producer that introduces the
//! tuple and is *not* part of the wire representation: the shuffle strips it
//! on send and the receiving node assigns a fresh local one. Nothing
//! downstream may assume ids are globally unique — only monotonic within
//! the channel that assigned them.
//!
//! ## Keys
//!
//! Keyed operators derive their per-key state index from a [`KeySpec`]: one
//! or more fields formatted and concatenated in order. The formatting is
//! deterministic, so the same tuple always lands on the same key.

use std::borrow::Cow;

use smallvec::SmallVec;

mod netflow;

pub use netflow::{Netflow, VastNetflow};

/// Fields addressable on a flow record.
///
/// Both production schemas project onto this set; a schema that lacks a
/// field returns `None` from the accessors.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FlowField {
    /// Supervised label column (unlabeled records carry -1).
    Label,
    /// Event timestamp in seconds.
    TimeSeconds,
    /// IP-layer protocol name.
    Protocol,
    /// Source endpoint address.
    SourceIp,
    /// Destination endpoint address.
    DestIp,
    /// Source port.
    SourcePort,
    /// Destination port.
    DestPort,
    /// Flow duration in seconds.
    DurationSeconds,
    /// Payload bytes sent by the source.
    SrcPayloadBytes,
    /// Payload bytes sent by the destination.
    DestPayloadBytes,
    /// Total bytes sent by the source.
    SrcTotalBytes,
    /// Total bytes sent by the destination.
    DestTotalBytes,
    /// Packets seen from the source.
    SrcPacketCount,
    /// Packets seen from the destination.
    DestPacketCount,
}

/// Errors raised while decoding a record from a CSV line or wire payload.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ParseError {
    /// The line did not split into the schema's field count.
    #[error("expected {expected} fields, got {got}")]
    FieldCount {
        /// Fields the schema requires.
        expected: usize,
        /// Fields present on the line.
        got: usize,
    },

    /// A field failed numeric conversion.
    #[error("field {position} ({name}) is not a valid {kind}")]
    InvalidField {
        /// Zero-based position on the line.
        position: usize,
        /// Schema name of the field.
        name: &'static str,
        /// Expected primitive kind.
        kind: &'static str,
    },

    /// The line was empty after trimming.
    #[error("empty record line")]
    EmptyLine,
}

/// A typed record flowing through the pipeline.
///
/// Implementations are plain structs; field access goes through
/// [`FlowField`] so operators can be parameterized by field instead of by
/// schema.
pub trait FlowRecord: Clone + Send + Sync + 'static {
    /// Number of fields on the wire (the id is elided).
    const WIRE_FIELDS: usize;

    /// The generated tuple identifier (position 0).
    fn id(&self) -> u64;

    /// Replaces the tuple identifier. Called by the producer that
    /// introduces the tuple and by the shuffle pull side.
    fn set_id(&mut self, id: u64);

    /// The event timestamp used as the window clock.
    fn time(&self) -> f64;

    /// Projects a field as a string, if the schema carries it.
    fn field_str(&self, field: FlowField) -> Option<Cow<'_, str>>;

    /// Projects a field as a double, if the schema carries it and the
    /// field is numeric.
    fn field_f64(&self, field: FlowField) -> Option<f64>;

    /// Decodes a record from a comma-separated line. The id is left at 0;
    /// the caller assigns it.
    ///
    /// # Errors
    ///
    /// Returns [`ParseError`] when the field count or a numeric column is
    /// malformed. The ingest policy for parse errors is skip-and-count.
    fn from_csv(line: &str) -> Result<Self, ParseError>;

    /// Encodes the record for the shuffle wire: comma-separated fields
    /// with the id elided.
    fn to_wire(&self) -> String;

    /// Decodes a wire payload and stamps the receiver-assigned id.
    ///
    /// # Errors
    ///
    /// Returns [`ParseError`] when the payload is malformed.
    fn from_wire(id: u64, payload: &str) -> Result<Self, ParseError> {
        let mut record = Self::from_csv(payload)?;
        record.set_id(id);
        Ok(record)
    }
}

/// Deterministic string key derived from one or more record fields.
///
/// The key is the in-order concatenation of the formatted fields. Fields a
/// schema does not carry format as the empty string, which keeps the
/// derivation total.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeySpec {
    fields: SmallVec<[FlowField; 2]>,
}

impl KeySpec {
    /// A key over a single field.
    #[must_use]
    pub fn single(field: FlowField) -> Self {
        Self {
            fields: SmallVec::from_slice(&[field]),
        }
    }

    /// A key over an ordered pair of fields.
    #[must_use]
    pub fn pair(first: FlowField, second: FlowField) -> Self {
        Self {
            fields: SmallVec::from_slice(&[first, second]),
        }
    }

    /// A key over an arbitrary ordered field list.
    #[must_use]
    pub fn new(fields: impl IntoIterator<Item = FlowField>) -> Self {
        Self {
            fields: fields.into_iter().collect(),
        }
    }

    /// The fields this key is derived from, in order.
    #[must_use]
    pub fn fields(&self) -> &[FlowField] {
        &self.fields
    }

    /// Formats the key for a record.
    #[must_use]
    pub fn key_for<R: FlowRecord>(&self, record: &R) -> String {
        let mut key = String::new();
        for field in &self.fields {
            if let Some(part) = record.field_str(*field) {
                key.push_str(&part);
            }
        }
        key
    }
}
