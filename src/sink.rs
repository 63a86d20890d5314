//! Destinations for per-object benchmark results.

use serde::{Serialize, Serializer};
use std::error::Error as StdError;
use std::io::{self, Write};
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use crate::upload::UploadReport;

/// The measurement taken for one terminal object upload attempt.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ObjectRecord {
    pub key: String,
    pub object_size: u64,
    /// Milliseconds since the unix epoch when serialized.
    #[serde(serialize_with = "epoch_millis")]
    pub start: SystemTime,
    #[serde(serialize_with = "epoch_millis")]
    pub end: SystemTime,
    /// The full error chain, `None` for a completed upload.
    pub error: Option<String>,
}

impl ObjectRecord {
    pub fn elapsed(&self) -> Duration {
        self.end.duration_since(self.start).unwrap_or_default()
    }
}

impl From<&UploadReport> for ObjectRecord {
    fn from(report: &UploadReport) -> Self {
        ObjectRecord {
            key: report.key.clone(),
            object_size: report.object_size,
            start: report.start,
            end: report.end,
            error: report.error.as_ref().map(|e| error_chain(e)),
        }
    }
}

fn error_chain(error: &(dyn StdError + 'static)) -> String {
    let mut message = error.to_string();
    let mut source = error.source();
    while let Some(cause) = source {
        message.push_str(": ");
        message.push_str(&cause.to_string());
        source = cause.source();
    }
    message
}

fn epoch_millis<S: Serializer>(time: &SystemTime, serializer: S) -> Result<S::Ok, S::Error> {
    let millis = time
        .duration_since(UNIX_EPOCH)
        .map(|elapsed| elapsed.as_millis())
        .unwrap_or_default();
    serializer.serialize_u64(u64::try_from(millis).unwrap_or(u64::MAX))
}

/// Receives one [ObjectRecord] per finished upload attempt.
///
/// Aggregation and reporting happen downstream of the sink.
pub trait ResultSink: Send + Sync + 'static {
    fn record(&self, record: ObjectRecord);

    /// Push buffered records to their destination. Called once at the end of a run.
    fn flush(&self) -> io::Result<()> {
        Ok(())
    }
}

impl ResultSink for Box<dyn ResultSink> {
    fn record(&self, record: ObjectRecord) {
        (**self).record(record)
    }

    fn flush(&self) -> io::Result<()> {
        (**self).flush()
    }
}

/// Keeps every record in memory.
#[derive(Debug, Default)]
pub struct MemorySink {
    records: Mutex<Vec<ObjectRecord>>,
}

impl MemorySink {
    fn records_mut(&self) -> MutexGuard<'_, Vec<ObjectRecord>> {
        self.records.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn records(&self) -> Vec<ObjectRecord> {
        self.records_mut().clone()
    }

    pub fn len(&self) -> usize {
        self.records_mut().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl ResultSink for MemorySink {
    fn record(&self, record: ObjectRecord) {
        self.records_mut().push(record);
    }
}

/// Writes each record as one line of JSON.
///
/// Records are not flushed individually. Wrap the writer in a
/// [BufWriter](std::io::BufWriter) and rely on [ResultSink::flush].
#[derive(Debug)]
pub struct JsonLinesSink<W> {
    writer: Mutex<W>,
}

impl<W: Write + Send + 'static> JsonLinesSink<W> {
    pub fn new(writer: W) -> Self {
        JsonLinesSink {
            writer: Mutex::new(writer),
        }
    }

    pub fn into_inner(self) -> W {
        self.writer.into_inner().unwrap_or_else(PoisonError::into_inner)
    }

    fn writer(&self) -> MutexGuard<'_, W> {
        self.writer.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self, record: &ObjectRecord) -> io::Result<()> {
        let mut writer = self.writer();
        serde_json::to_writer(&mut *writer, record)?;
        writer.write_all(b"\n")
    }
}

impl<W: Write + Send + 'static> ResultSink for JsonLinesSink<W> {
    fn record(&self, record: ObjectRecord) {
        if let Err(e) = self.write(&record) {
            tracing::error!(key = %record.key, error = %e, "Failed to write result record");
        }
    }

    fn flush(&self) -> io::Result<()> {
        self.writer().flush()
    }
}

/// Emits each record as a structured `tracing` event.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingSink;

impl ResultSink for TracingSink {
    fn record(&self, record: ObjectRecord) {
        tracing::info!(
            key = %record.key,
            object_size = record.object_size,
            elapsed_ms = record.elapsed().as_millis() as u64,
            error = record.error.as_deref(),
            "Object result"
        );
    }
}
