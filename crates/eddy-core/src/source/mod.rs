//! # Data Sources
//!
//! Ingestion endpoints feeding the pipeline: a line-delimited CSV file
//! reader and a TCP line reader. Both follow the same contract — `connect`
//! establishes the input, `run` loops the ingest, parsing one record per
//! line, stamping monotonically increasing ingress ids, skipping malformed
//! lines (counted, never fatal), and honoring a shared stop flag between
//! lines. `run` flushes the producer before returning; terminating the
//! chain stays with the caller.

use std::fs::File;
use std::io::{BufRead, BufReader};
use std::net::TcpStream;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use crate::dataflow::Producer;
use crate::flow::FlowRecord;

/// Errors raised by a data source.
#[derive(Debug, thiserror::Error)]
pub enum SourceError {
    /// The input file could not be opened.
    #[error("failed to open {path}: {source}")]
    Open {
        /// The path that failed.
        path: String,
        /// The underlying I/O error.
        source: std::io::Error,
    },

    /// The TCP peer could not be reached.
    #[error("failed to connect to {address}: {source}")]
    Connect {
        /// The address that failed.
        address: String,
        /// The underlying I/O error.
        source: std::io::Error,
    },

    /// `run` was called before a successful `connect`.
    #[error("source is not connected")]
    NotConnected,

    /// The input failed mid-read.
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// Ingest counters returned by [`DataSource::run`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SourceStats {
    /// Records parsed and fed downstream.
    pub records: u64,
    /// Lines skipped because they failed to parse.
    pub parse_errors: u64,
}

/// An ingestion endpoint.
pub trait DataSource<R: FlowRecord> {
    /// Establishes the input. Must succeed before [`run`](DataSource::run).
    ///
    /// # Errors
    ///
    /// Returns [`SourceError`] when the input cannot be opened or reached.
    fn connect(&mut self) -> Result<(), SourceError>;

    /// Runs the ingest loop until the input ends or the stop flag rises.
    ///
    /// # Errors
    ///
    /// Returns [`SourceError`] on connection loss; parse failures are
    /// counted, not raised.
    fn run(&mut self, producer: &mut Producer<R>) -> Result<SourceStats, SourceError>;
}

fn ingest_lines<R: FlowRecord>(
    reader: &mut dyn BufRead,
    producer: &mut Producer<R>,
    stop: &AtomicBool,
    next_id: &mut u64,
) -> Result<SourceStats, SourceError> {
    let mut stats = SourceStats::default();
    let mut line = String::new();
    loop {
        if stop.load(Ordering::Relaxed) {
            tracing::debug!("source stopping on flag");
            break;
        }
        line.clear();
        if reader.read_line(&mut line)? == 0 {
            break;
        }
        match R::from_csv(&line) {
            Ok(mut record) => {
                record.set_id(*next_id);
                *next_id += 1;
                stats.records += 1;
                producer.feed(record);
            }
            Err(error) => {
                stats.parse_errors += 1;
                tracing::warn!(%error, "skipping malformed input line");
            }
        }
    }
    producer.flush();
    Ok(stats)
}

/// Line-delimited CSV file source, one record per line.
pub struct CsvFileSource<R> {
    path: PathBuf,
    reader: Option<BufReader<File>>,
    stop: Arc<AtomicBool>,
    next_id: u64,
    _record: std::marker::PhantomData<fn(&R)>,
}

impl<R: FlowRecord> CsvFileSource<R> {
    /// Creates a source over `path`.
    #[must_use]
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self::with_stop(path, Arc::new(AtomicBool::new(false)))
    }

    /// Creates a source sharing an external stop flag.
    #[must_use]
    pub fn with_stop(path: impl Into<PathBuf>, stop: Arc<AtomicBool>) -> Self {
        Self {
            path: path.into(),
            reader: None,
            stop,
            next_id: 0,
            _record: std::marker::PhantomData,
        }
    }
}

impl<R: FlowRecord> DataSource<R> for CsvFileSource<R> {
    fn connect(&mut self) -> Result<(), SourceError> {
        let file = File::open(&self.path).map_err(|source| SourceError::Open {
            path: self.path.display().to_string(),
            source,
        })?;
        self.reader = Some(BufReader::new(file));
        Ok(())
    }

    fn run(&mut self, producer: &mut Producer<R>) -> Result<SourceStats, SourceError> {
        let reader = self.reader.as_mut().ok_or(SourceError::NotConnected)?;
        ingest_lines(reader, producer, &self.stop, &mut self.next_id)
    }
}

impl<R> std::fmt::Debug for CsvFileSource<R> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CsvFileSource")
            .field("path", &self.path)
            .finish_non_exhaustive()
    }
}

/// TCP line source: newline-terminated ASCII records from a single peer.
pub struct TcpLineSource<R> {
    address: String,
    reader: Option<BufReader<TcpStream>>,
    stop: Arc<AtomicBool>,
    next_id: u64,
    _record: std::marker::PhantomData<fn(&R)>,
}

impl<R: FlowRecord> TcpLineSource<R> {
    /// Creates a source reading from `ip:port`.
    #[must_use]
    pub fn new(ip: &str, port: u16) -> Self {
        Self::with_stop(ip, port, Arc::new(AtomicBool::new(false)))
    }

    /// Creates a source sharing an external stop flag.
    #[must_use]
    pub fn with_stop(ip: &str, port: u16, stop: Arc<AtomicBool>) -> Self {
        Self {
            address: format!("{ip}:{port}"),
            reader: None,
            stop,
            next_id: 0,
            _record: std::marker::PhantomData,
        }
    }
}

impl<R: FlowRecord> DataSource<R> for TcpLineSource<R> {
    fn connect(&mut self) -> Result<(), SourceError> {
        let stream = TcpStream::connect(&self.address).map_err(|source| SourceError::Connect {
            address: self.address.clone(),
            source,
        })?;
        self.reader = Some(BufReader::new(stream));
        Ok(())
    }

    fn run(&mut self, producer: &mut Producer<R>) -> Result<SourceStats, SourceError> {
        let reader = self.reader.as_mut().ok_or(SourceError::NotConnected)?;
        ingest_lines(reader, producer, &self.stop, &mut self.next_id)
    }
}

impl<R> std::fmt::Debug for TcpLineSource<R> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TcpLineSource")
            .field("address", &self.address)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dataflow::{Dataflow, Operator, OperatorError, OutputVec};
    use crate::flow::Netflow;
    use std::io::Write;
    use std::sync::Mutex;

    struct CollectIds {
        ids: Arc<Mutex<Vec<u64>>>,
    }

    impl Operator<Netflow> for CollectIds {
        fn name(&self) -> &str {
            "collect"
        }
        fn on_record(
            &mut self,
            record: &Netflow,
            _out: &mut OutputVec<Netflow>,
        ) -> Result<(), OperatorError> {
            self.ids.lock().unwrap().push(record.id);
            Ok(())
        }
    }

    const GOOD_LINE: &str = "1,2.0,tcp,a,b,1,2,0.1,10,20,30,40,5,6";

    #[test]
    fn test_file_source_skips_bad_lines_and_numbers_ids() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "{GOOD_LINE}").unwrap();
        writeln!(file, "garbage line").unwrap();
        writeln!(file, "{GOOD_LINE}").unwrap();
        file.flush().unwrap();

        let ids = Arc::new(Mutex::new(Vec::new()));
        let mut flow = Dataflow::new();
        let op = flow.add_operator(Box::new(CollectIds { ids: Arc::clone(&ids) }));
        flow.add_root(op).unwrap();
        let mut producer = Producer::new(1, flow);

        let mut source = CsvFileSource::<Netflow>::new(file.path());
        source.connect().unwrap();
        let stats = source.run(&mut producer).unwrap();

        assert_eq!(stats.records, 2);
        assert_eq!(stats.parse_errors, 1);
        assert_eq!(*ids.lock().unwrap(), vec![0, 1]);
    }

    #[test]
    fn test_run_before_connect_fails() {
        let mut source = CsvFileSource::<Netflow>::new("/nonexistent/path.csv");
        let mut producer = Producer::new(1, Dataflow::new());
        assert!(matches!(
            source.run(&mut producer),
            Err(SourceError::NotConnected)
        ));
    }

    #[test]
    fn test_missing_file_reports_path() {
        let mut source = CsvFileSource::<Netflow>::new("/nonexistent/path.csv");
        match source.connect() {
            Err(SourceError::Open { path, .. }) => assert!(path.contains("nonexistent")),
            other => panic!("expected open error, got {other:?}"),
        }
    }

    #[test]
    fn test_tcp_connect_failure_reports_address() {
        // Port 1 on loopback is essentially never listening.
        let mut source = TcpLineSource::<Netflow>::new("127.0.0.1", 1);
        match source.connect() {
            Err(SourceError::Connect { address, .. }) => {
                assert_eq!(address, "127.0.0.1:1");
            }
            Ok(()) => panic!("unexpected connection"),
            Err(other) => panic!("unexpected error {other:?}"),
        }
    }
}
