//! The two production flow schemas: the generic [`Netflow`] record and the
//! vendor [`VastNetflow`] record.
//!
//! Both put the generated id at position 0 (off the wire), the label at
//! position 1, and share positions for the endpoints, the timestamp, and
//! the numeric columns the estimators consume.

use std::borrow::Cow;
use std::fmt::Write as _;
use std::str::FromStr;

use super::{FlowField, FlowRecord, ParseError};

/// Label value carried by unlabeled records.
pub const UNLABELED: i64 = -1;

fn split_line(line: &str) -> Option<Vec<&str>> {
    let line = line.trim();
    if line.is_empty() {
        return None;
    }
    Some(line.split(',').map(str::trim).collect())
}

fn parse_field<T: FromStr>(
    fields: &[&str],
    position: usize,
    name: &'static str,
    kind: &'static str,
) -> Result<T, ParseError> {
    fields[position].parse().map_err(|_| ParseError::InvalidField {
        position,
        name,
        kind,
    })
}

/// The generic flow schema.
///
/// Wire layout (id elided): label, time, protocol, source ip, dest ip,
/// source port, dest port, duration, source/dest payload bytes, source/dest
/// total bytes, source/dest packet counts.
#[derive(Debug, Clone, PartialEq)]
pub struct Netflow {
    /// Generated tuple identifier (position 0, never on the wire).
    pub id: u64,
    /// Supervised label, [`UNLABELED`] when absent.
    pub label: i64,
    /// Event time in seconds.
    pub time_seconds: f64,
    /// IP-layer protocol name.
    pub protocol: String,
    /// Source endpoint address.
    pub source_ip: String,
    /// Destination endpoint address.
    pub dest_ip: String,
    /// Source port.
    pub source_port: u32,
    /// Destination port.
    pub dest_port: u32,
    /// Flow duration in seconds.
    pub duration_seconds: f64,
    /// Payload bytes sent by the source.
    pub src_payload_bytes: u64,
    /// Payload bytes sent by the destination.
    pub dest_payload_bytes: u64,
    /// Total bytes sent by the source.
    pub src_total_bytes: u64,
    /// Total bytes sent by the destination.
    pub dest_total_bytes: u64,
    /// Packets seen from the source.
    pub src_packet_count: u64,
    /// Packets seen from the destination.
    pub dest_packet_count: u64,
}

impl Netflow {
    #[cfg(test)]
    pub(crate) fn sample(source_ip: &str, dest_ip: &str, dest_port: u32) -> Self {
        Self {
            id: 0,
            label: UNLABELED,
            time_seconds: 1.0,
            protocol: "tcp".to_string(),
            source_ip: source_ip.to_string(),
            dest_ip: dest_ip.to_string(),
            source_port: 49152,
            dest_port,
            duration_seconds: 0.5,
            src_payload_bytes: 100,
            dest_payload_bytes: 200,
            src_total_bytes: 140,
            dest_total_bytes: 240,
            src_packet_count: 3,
            dest_packet_count: 4,
        }
    }
}

impl FlowRecord for Netflow {
    const WIRE_FIELDS: usize = 14;

    fn id(&self) -> u64 {
        self.id
    }

    fn set_id(&mut self, id: u64) {
        self.id = id;
    }

    fn time(&self) -> f64 {
        self.time_seconds
    }

    fn field_str(&self, field: FlowField) -> Option<Cow<'_, str>> {
        let owned = |s: String| Some(Cow::Owned(s));
        match field {
            FlowField::Label => owned(self.label.to_string()),
            FlowField::TimeSeconds => owned(self.time_seconds.to_string()),
            FlowField::Protocol => Some(Cow::Borrowed(&self.protocol)),
            FlowField::SourceIp => Some(Cow::Borrowed(&self.source_ip)),
            FlowField::DestIp => Some(Cow::Borrowed(&self.dest_ip)),
            FlowField::SourcePort => owned(self.source_port.to_string()),
            FlowField::DestPort => owned(self.dest_port.to_string()),
            FlowField::DurationSeconds => owned(self.duration_seconds.to_string()),
            FlowField::SrcPayloadBytes => owned(self.src_payload_bytes.to_string()),
            FlowField::DestPayloadBytes => owned(self.dest_payload_bytes.to_string()),
            FlowField::SrcTotalBytes => owned(self.src_total_bytes.to_string()),
            FlowField::DestTotalBytes => owned(self.dest_total_bytes.to_string()),
            FlowField::SrcPacketCount => owned(self.src_packet_count.to_string()),
            FlowField::DestPacketCount => owned(self.dest_packet_count.to_string()),
        }
    }

    #[allow(clippy::cast_precision_loss)] // counters fit comfortably in f64
    fn field_f64(&self, field: FlowField) -> Option<f64> {
        match field {
            FlowField::Label => Some(self.label as f64),
            FlowField::TimeSeconds => Some(self.time_seconds),
            FlowField::Protocol | FlowField::SourceIp | FlowField::DestIp => None,
            FlowField::SourcePort => Some(f64::from(self.source_port)),
            FlowField::DestPort => Some(f64::from(self.dest_port)),
            FlowField::DurationSeconds => Some(self.duration_seconds),
            FlowField::SrcPayloadBytes => Some(self.src_payload_bytes as f64),
            FlowField::DestPayloadBytes => Some(self.dest_payload_bytes as f64),
            FlowField::SrcTotalBytes => Some(self.src_total_bytes as f64),
            FlowField::DestTotalBytes => Some(self.dest_total_bytes as f64),
            FlowField::SrcPacketCount => Some(self.src_packet_count as f64),
            FlowField::DestPacketCount => Some(self.dest_packet_count as f64),
        }
    }

    fn from_csv(line: &str) -> Result<Self, ParseError> {
        let fields = split_line(line).ok_or(ParseError::EmptyLine)?;
        if fields.len() != Self::WIRE_FIELDS {
            return Err(ParseError::FieldCount {
                expected: Self::WIRE_FIELDS,
                got: fields.len(),
            });
        }
        Ok(Self {
            id: 0,
            label: parse_field(&fields, 0, "label", "integer")?,
            time_seconds: parse_field(&fields, 1, "time_seconds", "double")?,
            protocol: fields[2].to_string(),
            source_ip: fields[3].to_string(),
            dest_ip: fields[4].to_string(),
            source_port: parse_field(&fields, 5, "source_port", "integer")?,
            dest_port: parse_field(&fields, 6, "dest_port", "integer")?,
            duration_seconds: parse_field(&fields, 7, "duration_seconds", "double")?,
            src_payload_bytes: parse_field(&fields, 8, "src_payload_bytes", "integer")?,
            dest_payload_bytes: parse_field(&fields, 9, "dest_payload_bytes", "integer")?,
            src_total_bytes: parse_field(&fields, 10, "src_total_bytes", "integer")?,
            dest_total_bytes: parse_field(&fields, 11, "dest_total_bytes", "integer")?,
            src_packet_count: parse_field(&fields, 12, "src_packet_count", "integer")?,
            dest_packet_count: parse_field(&fields, 13, "dest_packet_count", "integer")?,
        })
    }

    fn to_wire(&self) -> String {
        let mut out = String::with_capacity(96);
        let _ = write!(
            out,
            "{},{},{},{},{},{},{},{},{},{},{},{},{},{}",
            self.label,
            self.time_seconds,
            self.protocol,
            self.source_ip,
            self.dest_ip,
            self.source_port,
            self.dest_port,
            self.duration_seconds,
            self.src_payload_bytes,
            self.dest_payload_bytes,
            self.src_total_bytes,
            self.dest_total_bytes,
            self.src_packet_count,
            self.dest_packet_count,
        );
        out
    }
}

/// The vendor flow schema, as produced by the VAST challenge trace.
///
/// Carries the extra provenance columns (parse date, protocol code,
/// fragment counters, collision marker) on top of the positions shared
/// with [`Netflow`].
#[derive(Debug, Clone, PartialEq)]
pub struct VastNetflow {
    /// Generated tuple identifier (position 0, never on the wire).
    pub id: u64,
    /// Supervised label, [`UNLABELED`] when absent.
    pub label: i64,
    /// Event time in seconds.
    pub time_seconds: f64,
    /// Vendor parse date column.
    pub parse_date: String,
    /// Vendor date-time string column.
    pub date_time: String,
    /// IP-layer protocol name.
    pub protocol: String,
    /// IP-layer protocol code.
    pub protocol_code: String,
    /// Source endpoint address.
    pub source_ip: String,
    /// Destination endpoint address.
    pub dest_ip: String,
    /// Source port.
    pub source_port: u32,
    /// Destination port.
    pub dest_port: u32,
    /// More-fragments marker.
    pub more_fragments: u64,
    /// Fragment count.
    pub count_fragments: u64,
    /// Flow duration in seconds.
    pub duration_seconds: f64,
    /// Payload bytes sent by the source.
    pub src_payload_bytes: u64,
    /// Payload bytes sent by the destination.
    pub dest_payload_bytes: u64,
    /// Total bytes sent by the source.
    pub src_total_bytes: u64,
    /// Total bytes sent by the destination.
    pub dest_total_bytes: u64,
    /// First-seen packets from the source.
    pub src_packet_count: u64,
    /// First-seen packets from the destination.
    pub dest_packet_count: u64,
    /// Vendor record-force-collision marker.
    pub record_force_collision: u64,
}

impl FlowRecord for VastNetflow {
    const WIRE_FIELDS: usize = 20;

    fn id(&self) -> u64 {
        self.id
    }

    fn set_id(&mut self, id: u64) {
        self.id = id;
    }

    fn time(&self) -> f64 {
        self.time_seconds
    }

    fn field_str(&self, field: FlowField) -> Option<Cow<'_, str>> {
        let owned = |s: String| Some(Cow::Owned(s));
        match field {
            FlowField::Label => owned(self.label.to_string()),
            FlowField::TimeSeconds => owned(self.time_seconds.to_string()),
            FlowField::Protocol => Some(Cow::Borrowed(&self.protocol)),
            FlowField::SourceIp => Some(Cow::Borrowed(&self.source_ip)),
            FlowField::DestIp => Some(Cow::Borrowed(&self.dest_ip)),
            FlowField::SourcePort => owned(self.source_port.to_string()),
            FlowField::DestPort => owned(self.dest_port.to_string()),
            FlowField::DurationSeconds => owned(self.duration_seconds.to_string()),
            FlowField::SrcPayloadBytes => owned(self.src_payload_bytes.to_string()),
            FlowField::DestPayloadBytes => owned(self.dest_payload_bytes.to_string()),
            FlowField::SrcTotalBytes => owned(self.src_total_bytes.to_string()),
            FlowField::DestTotalBytes => owned(self.dest_total_bytes.to_string()),
            FlowField::SrcPacketCount => owned(self.src_packet_count.to_string()),
            FlowField::DestPacketCount => owned(self.dest_packet_count.to_string()),
        }
    }

    #[allow(clippy::cast_precision_loss)]
    fn field_f64(&self, field: FlowField) -> Option<f64> {
        match field {
            FlowField::Label => Some(self.label as f64),
            FlowField::TimeSeconds => Some(self.time_seconds),
            FlowField::Protocol | FlowField::SourceIp | FlowField::DestIp => None,
            FlowField::SourcePort => Some(f64::from(self.source_port)),
            FlowField::DestPort => Some(f64::from(self.dest_port)),
            FlowField::DurationSeconds => Some(self.duration_seconds),
            FlowField::SrcPayloadBytes => Some(self.src_payload_bytes as f64),
            FlowField::DestPayloadBytes => Some(self.dest_payload_bytes as f64),
            FlowField::SrcTotalBytes => Some(self.src_total_bytes as f64),
            FlowField::DestTotalBytes => Some(self.dest_total_bytes as f64),
            FlowField::SrcPacketCount => Some(self.src_packet_count as f64),
            FlowField::DestPacketCount => Some(self.dest_packet_count as f64),
        }
    }

    fn from_csv(line: &str) -> Result<Self, ParseError> {
        let fields = split_line(line).ok_or(ParseError::EmptyLine)?;
        if fields.len() != Self::WIRE_FIELDS {
            return Err(ParseError::FieldCount {
                expected: Self::WIRE_FIELDS,
                got: fields.len(),
            });
        }
        Ok(Self {
            id: 0,
            label: parse_field(&fields, 0, "label", "integer")?,
            time_seconds: parse_field(&fields, 1, "time_seconds", "double")?,
            parse_date: fields[2].to_string(),
            date_time: fields[3].to_string(),
            protocol: fields[4].to_string(),
            protocol_code: fields[5].to_string(),
            source_ip: fields[6].to_string(),
            dest_ip: fields[7].to_string(),
            source_port: parse_field(&fields, 8, "source_port", "integer")?,
            dest_port: parse_field(&fields, 9, "dest_port", "integer")?,
            more_fragments: parse_field(&fields, 10, "more_fragments", "integer")?,
            count_fragments: parse_field(&fields, 11, "count_fragments", "integer")?,
            duration_seconds: parse_field(&fields, 12, "duration_seconds", "double")?,
            src_payload_bytes: parse_field(&fields, 13, "src_payload_bytes", "integer")?,
            dest_payload_bytes: parse_field(&fields, 14, "dest_payload_bytes", "integer")?,
            src_total_bytes: parse_field(&fields, 15, "src_total_bytes", "integer")?,
            dest_total_bytes: parse_field(&fields, 16, "dest_total_bytes", "integer")?,
            src_packet_count: parse_field(&fields, 17, "src_packet_count", "integer")?,
            dest_packet_count: parse_field(&fields, 18, "dest_packet_count", "integer")?,
            record_force_collision: parse_field(&fields, 19, "record_force_collision", "integer")?,
        })
    }

    fn to_wire(&self) -> String {
        let mut out = String::with_capacity(128);
        let _ = write!(
            out,
            "{},{},{},{},{},{},{},{},{},{},{},{},{},{},{},{},{},{},{},{}",
            self.label,
            self.time_seconds,
            self.parse_date,
            self.date_time,
            self.protocol,
            self.protocol_code,
            self.source_ip,
            self.dest_ip,
            self.source_port,
            self.dest_port,
            self.more_fragments,
            self.count_fragments,
            self.duration_seconds,
            self.src_payload_bytes,
            self.dest_payload_bytes,
            self.src_total_bytes,
            self.dest_total_bytes,
            self.src_packet_count,
            self.dest_packet_count,
            self.record_force_collision,
        );
        out
    }
}
