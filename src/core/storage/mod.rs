//! Append-only binary stores shared by the recorder and the analyzer.
//!
//! Two files make up a recording:
//! - the *context store* (`lockweave_contexts.db`): variable-length lock and
//!   locking-context records, addressed by the byte offset at which they
//!   start — the offset is the record's identifier;
//! - the *event log* (`lockweave_events.db`): fixed-size records, one per
//!   observed lock acquisition.
//!
//! Both files carry the same header shape: an 8-byte magic cookie followed
//! by a 4+4 byte major/minor version, big-endian. A wrong cookie or a major
//! version mismatch is fatal at open; a minor mismatch is tolerated.

pub mod context_file;
pub mod event_file;

pub use context_file::{ContextFileReader, ContextFileWriter};
pub use event_file::{EventFileReader, EventFileWriter, LockEventSink, ReplaySummary};

use std::io::{self, Read, Write};
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Default file name for the event log inside a recording directory.
pub const EVENT_DB_FILENAME: &str = "lockweave_events.db";
/// Default file name for the context store inside a recording directory.
pub const CONTEXTS_DB_FILENAME: &str = "lockweave_contexts.db";

pub(crate) const CONTEXTS_MAGIC_COOKIE: i64 = 0x4C4F_434B_5745_5645; // "LOCKWEVE"
pub(crate) const EVENTS_MAGIC_COOKIE: i64 = 0x4C57_4556_544C_4F47; // "LWEVTLOG"
pub(crate) const MAJOR_VERSION: i32 = 1;
pub(crate) const MINOR_VERSION: i32 = 0;
pub(crate) const HEADER_LEN: usize = 8 + 4 + 4;

/// Errors raised by the binary store formats.
#[derive(Debug, Error)]
pub enum StoreError {
    /// The file does not start with the expected magic cookie — it is not
    /// one of ours, or it was overwritten.
    #[error("invalid file contents in {path}")]
    CorruptHeader { path: PathBuf },

    /// The file was written by an incompatible major version of the format.
    #[error("incompatible version {major}.{minor} in {path}")]
    IncompatibleVersion {
        major: i32,
        minor: i32,
        path: PathBuf,
    },

    /// The 32-bit offset space is exhausted (or the file on disk already
    /// exceeds it).
    #[error("file too large: {path}")]
    FileTooLarge { path: PathBuf },

    /// An offset did not resolve to a decodable record. Offsets are only
    /// meaningful when they were returned by a writer; anything else lands
    /// here.
    #[error("no record at offset {offset}")]
    InvalidOffset { offset: i32 },

    #[error(transparent)]
    Io(#[from] io::Error),
}

/// Write the common header: magic cookie, then major/minor version.
pub(crate) fn write_header<W: Write>(writer: &mut W, magic: i64) -> io::Result<()> {
    writer.write_all(&magic.to_be_bytes())?;
    writer.write_all(&MAJOR_VERSION.to_be_bytes())?;
    writer.write_all(&MINOR_VERSION.to_be_bytes())?;
    Ok(())
}

/// Validate the common header against the expected magic cookie.
///
/// Performs no further reads on failure, so a wrong file is rejected
/// before any record is touched.
pub(crate) fn validate_header<R: Read>(
    reader: &mut R,
    magic: i64,
    path: &Path,
) -> Result<(), StoreError> {
    let corrupt = || StoreError::CorruptHeader {
        path: path.to_owned(),
    };

    let mut cookie = [0u8; 8];
    reader.read_exact(&mut cookie).map_err(|_| corrupt())?;
    if i64::from_be_bytes(cookie) != magic {
        return Err(corrupt());
    }

    let mut word = [0u8; 4];
    reader.read_exact(&mut word).map_err(|_| corrupt())?;
    let major = i32::from_be_bytes(word);
    reader.read_exact(&mut word).map_err(|_| corrupt())?;
    let minor = i32::from_be_bytes(word);

    if major != MAJOR_VERSION {
        return Err(StoreError::IncompatibleVersion {
            major,
            minor,
            path: path.to_owned(),
        });
    }
    Ok(())
}
