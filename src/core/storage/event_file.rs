//! The event log: one fixed-size record per observed lock acquisition.
//!
//! Records are 24 bytes, big-endian: target lock id, target context id,
//! source lock id (−1 when the thread held nothing else), source context
//! id, and the acquiring thread's id. The writer batches records through a
//! buffer; the reader streams them back until end-of-file, treating a
//! short trailing record as the tail of an interrupted run rather than an
//! error.

use crate::core::storage::{
    self, EVENTS_MAGIC_COOKIE, StoreError, validate_header,
};
use crate::core::types::LockEvent;
use crate::core::utils::Counter;
use std::fs::File;
use std::io::{BufReader, BufWriter, Read, Write};
use std::path::{Path, PathBuf};
use tracing::{info, warn};

pub(crate) const EVENT_RECORD_LEN: usize = 4 + 4 + 4 + 4 + 8;

/// Consumer side of the event stream.
///
/// The recorder feeds an [`EventFileWriter`]; the analyzer replays a file
/// into a graph builder. Both sit behind this trait.
pub trait LockEventSink {
    fn on_lock_event(&mut self, event: &LockEvent) -> Result<(), StoreError>;
}

/// Buffered writer for the event log.
pub struct EventFileWriter {
    writer: BufWriter<File>,
    written_events: Counter,
    path: PathBuf,
}

impl EventFileWriter {
    /// Create (or truncate) the event log at `path` and write its header.
    pub fn create<P: AsRef<Path>>(path: P) -> Result<Self, StoreError> {
        let path = path.as_ref().to_owned();
        info!("opening for writing: {}", path.display());
        let file = File::create(&path)?;
        let mut writer = BufWriter::with_capacity(EVENT_RECORD_LEN * 1024, file);
        storage::write_header(&mut writer, EVENTS_MAGIC_COOKIE)?;
        Ok(EventFileWriter {
            writer,
            written_events: Counter::new("written lock events", 100_000),
            path,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Flush buffered records to disk. Not on the recording fast path; the
    /// buffer otherwise drains only when full.
    pub fn flush(&mut self) -> Result<(), StoreError> {
        self.writer.flush()?;
        Ok(())
    }

    /// Flush and close the log.
    pub fn close(mut self) -> Result<(), StoreError> {
        self.flush()
    }
}

impl LockEventSink for EventFileWriter {
    fn on_lock_event(&mut self, event: &LockEvent) -> Result<(), StoreError> {
        let mut record = [0u8; EVENT_RECORD_LEN];
        record[0..4].copy_from_slice(&event.target_lock_id.to_be_bytes());
        record[4..8].copy_from_slice(&event.target_context_id.to_be_bytes());
        record[8..12].copy_from_slice(&event.source_lock_id.to_be_bytes());
        record[12..16].copy_from_slice(&event.source_context_id.to_be_bytes());
        record[16..24].copy_from_slice(&(event.thread_id as i64).to_be_bytes());
        self.writer.write_all(&record)?;
        self.written_events.increment();
        Ok(())
    }
}

/// Outcome of replaying an event log.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReplaySummary {
    pub parsed_events: u64,
    /// Whether the file ended in a partial record — the in-flight write of
    /// an abnormally terminated process. Informational, not an error.
    pub truncated: bool,
}

/// Streaming reader for the event log.
pub struct EventFileReader;

impl EventFileReader {
    /// Validate the header at `path`, then feed every complete record to
    /// `sink` in file order.
    pub fn replay<P: AsRef<Path>>(
        path: P,
        sink: &mut dyn LockEventSink,
    ) -> Result<ReplaySummary, StoreError> {
        let path = path.as_ref();
        info!("opening for reading: {}", path.display());
        let file = File::open(path)?;
        let mut reader = BufReader::new(file);
        validate_header(&mut reader, EVENTS_MAGIC_COOKIE, path)?;

        let mut summary = ReplaySummary {
            parsed_events: 0,
            truncated: false,
        };
        let mut record = [0u8; EVENT_RECORD_LEN];
        loop {
            match read_record(&mut reader, &mut record)? {
                RecordRead::Complete => {
                    sink.on_lock_event(&parse_record(&record))?;
                    summary.parsed_events += 1;
                }
                RecordRead::Eof => break,
                RecordRead::Partial => {
                    warn!(
                        "ignoring truncated trailing record in {}",
                        path.display()
                    );
                    summary.truncated = true;
                    break;
                }
            }
        }
        Ok(summary)
    }
}

enum RecordRead {
    Complete,
    Partial,
    Eof,
}

fn read_record<R: Read>(
    reader: &mut R,
    record: &mut [u8; EVENT_RECORD_LEN],
) -> Result<RecordRead, StoreError> {
    let mut filled = 0;
    while filled < EVENT_RECORD_LEN {
        let n = reader.read(&mut record[filled..])?;
        if n == 0 {
            return Ok(if filled == 0 {
                RecordRead::Eof
            } else {
                RecordRead::Partial
            });
        }
        filled += n;
    }
    Ok(RecordRead::Complete)
}

fn parse_record(record: &[u8; EVENT_RECORD_LEN]) -> LockEvent {
    let mut word = [0u8; 4];
    let mut long = [0u8; 8];

    word.copy_from_slice(&record[0..4]);
    let target_lock_id = i32::from_be_bytes(word);
    word.copy_from_slice(&record[4..8]);
    let target_context_id = i32::from_be_bytes(word);
    word.copy_from_slice(&record[8..12]);
    let source_lock_id = i32::from_be_bytes(word);
    word.copy_from_slice(&record[12..16]);
    let source_context_id = i32::from_be_bytes(word);
    long.copy_from_slice(&record[16..24]);
    let thread_id = i64::from_be_bytes(long) as u64;

    LockEvent {
        target_lock_id,
        target_context_id,
        source_lock_id,
        source_context_id,
        thread_id,
    }
}
