//! The context store: variable-length lock and locking-context records,
//! identified by the byte offset at which each record starts.
//!
//! The writer appends sequentially and hands back the starting offset of
//! every record; that offset is the ID used by the event log and the whole
//! analysis pipeline. Existing bytes are never rewritten, so an ID resolves
//! to the same value for the lifetime of the file. The format is not
//! self-delimiting — records can only be found through offsets returned at
//! write time.

use crate::core::storage::{
    self, CONTEXTS_MAGIC_COOKIE, HEADER_LEN, StoreError, validate_header,
};
use crate::core::types::{ContextId, Lock, LockId, LockingContext};
use fxhash::FxHashMap;
use std::fs::{self, File};
use std::io::{BufWriter, Cursor, Write};
use std::path::{Path, PathBuf};
use tracing::info;

/// Appends lock and locking-context records, returning each record's
/// starting byte offset as its identifier.
pub struct ContextFileWriter {
    writer: BufWriter<File>,
    /// Offset of the next byte to be written, tracked in 64 bits so that
    /// running past the 32-bit offset space is detected, not wrapped.
    next_position: i64,
    path: PathBuf,
}

impl ContextFileWriter {
    /// Create (or truncate) the context store at `path` and write its
    /// header.
    pub fn create<P: AsRef<Path>>(path: P) -> Result<Self, StoreError> {
        let path = path.as_ref().to_owned();
        info!("opening for writing: {}", path.display());
        let file = File::create(&path)?;
        let mut writer = BufWriter::new(file);
        storage::write_header(&mut writer, CONTEXTS_MAGIC_COOKIE)?;
        Ok(ContextFileWriter {
            writer,
            next_position: HEADER_LEN as i64,
            path,
        })
    }

    /// Append a lock record: length-prefixed class name, then the object id.
    pub fn write_lock(&mut self, lock: &Lock) -> Result<LockId, StoreError> {
        let record_len = 4 + lock.class_name().len() as i64 + 4;
        let start = self.start_of_record(record_len)?;
        self.write_string(lock.class_name())?;
        self.writer.write_all(&lock.object_id().to_be_bytes())?;
        self.next_position += record_len;
        Ok(start)
    }

    /// Append a locking-context record: three length-prefixed strings.
    pub fn write_context(&mut self, context: &LockingContext) -> Result<ContextId, StoreError> {
        let record_len = 3 * 4
            + context.thread_name().len() as i64
            + context.lock_reference().len() as i64
            + context.method_with_class().len() as i64;
        let start = self.start_of_record(record_len)?;
        self.write_string(context.thread_name())?;
        self.write_string(context.lock_reference())?;
        self.write_string(context.method_with_class())?;
        self.next_position += record_len;
        Ok(start)
    }

    /// Flush buffered records to disk.
    pub fn flush(&mut self) -> Result<(), StoreError> {
        self.writer.flush()?;
        Ok(())
    }

    /// Flush and close the store.
    pub fn close(mut self) -> Result<(), StoreError> {
        self.flush()
    }

    fn start_of_record(&self, record_len: i64) -> Result<i32, StoreError> {
        if self.next_position + record_len > i32::MAX as i64 {
            return Err(StoreError::FileTooLarge {
                path: self.path.clone(),
            });
        }
        Ok(self.next_position as i32)
    }

    fn write_string(&mut self, s: &str) -> Result<(), StoreError> {
        self.writer.write_all(&(s.len() as i32).to_be_bytes())?;
        self.writer.write_all(s.as_bytes())?;
        Ok(())
    }
}

// The BufWriter inside flushes on drop, so records survive an orderly exit
// even without an explicit close(). An abnormal termination may truncate
// the tail; readers treat that as missing records, not corruption.

/// Random-access reader over a context store.
///
/// The whole file is loaded up front (its size is bounded by the 32-bit
/// offset space) and decoded records are cached per offset, since the
/// analysis phase re-reads the same contexts many times.
pub struct ContextFileReader {
    data: Vec<u8>,
    lock_cache: FxHashMap<LockId, Lock>,
    context_cache: FxHashMap<ContextId, LockingContext>,
}

impl ContextFileReader {
    /// Open and validate a context store.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, StoreError> {
        let path = path.as_ref();
        info!("opening for reading: {}", path.display());
        let metadata = fs::metadata(path)?;
        if metadata.len() > i32::MAX as u64 {
            return Err(StoreError::FileTooLarge {
                path: path.to_owned(),
            });
        }
        let data = fs::read(path)?;
        validate_header(&mut Cursor::new(&data), CONTEXTS_MAGIC_COOKIE, path)?;
        Ok(ContextFileReader {
            data,
            lock_cache: FxHashMap::default(),
            context_cache: FxHashMap::default(),
        })
    }

    /// Read the lock record starting at `id`.
    pub fn read_lock(&mut self, id: LockId) -> Result<Lock, StoreError> {
        if let Some(lock) = self.lock_cache.get(&id) {
            return Ok(lock.clone());
        }
        let mut pos = Self::offset_to_pos(id)?;
        let class_name = self.read_string(id, &mut pos)?;
        let object_id = self.read_i32(id, &mut pos)?;
        let lock = Lock::new(class_name, object_id);
        self.lock_cache.insert(id, lock.clone());
        Ok(lock)
    }

    /// Read the locking-context record starting at `id`.
    pub fn read_context(&mut self, id: ContextId) -> Result<LockingContext, StoreError> {
        if let Some(context) = self.context_cache.get(&id) {
            return Ok(context.clone());
        }
        let mut pos = Self::offset_to_pos(id)?;
        let thread_name = self.read_string(id, &mut pos)?;
        let lock_reference = self.read_string(id, &mut pos)?;
        let method_with_class = self.read_string(id, &mut pos)?;
        let context = LockingContext::new(thread_name, lock_reference, method_with_class);
        self.context_cache.insert(id, context.clone());
        Ok(context)
    }

    fn offset_to_pos(id: i32) -> Result<usize, StoreError> {
        if id < HEADER_LEN as i32 {
            return Err(StoreError::InvalidOffset { offset: id });
        }
        Ok(id as usize)
    }

    fn read_i32(&self, id: i32, pos: &mut usize) -> Result<i32, StoreError> {
        let end = pos
            .checked_add(4)
            .filter(|&end| end <= self.data.len())
            .ok_or(StoreError::InvalidOffset { offset: id })?;
        let mut word = [0u8; 4];
        word.copy_from_slice(&self.data[*pos..end]);
        *pos = end;
        Ok(i32::from_be_bytes(word))
    }

    fn read_string(&self, id: i32, pos: &mut usize) -> Result<String, StoreError> {
        let len = self.read_i32(id, pos)?;
        if len < 0 {
            return Err(StoreError::InvalidOffset { offset: id });
        }
        let end = pos
            .checked_add(len as usize)
            .filter(|&end| end <= self.data.len())
            .ok_or(StoreError::InvalidOffset { offset: id })?;
        let s = std::str::from_utf8(&self.data[*pos..end])
            .map_err(|_| StoreError::InvalidOffset { offset: id })?
            .to_owned();
        *pos = end;
        Ok(s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::storage::MAJOR_VERSION;
    use tempfile::tempdir;

    #[test]
    fn test_lock_round_trip() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("contexts.db");

        let lock_a = Lock::new("pool::Inner", 0x1234);
        let lock_b = Lock::new("registry::Shard", -7);

        let mut writer = ContextFileWriter::create(&path).unwrap();
        let id_a = writer.write_lock(&lock_a).unwrap();
        let id_b = writer.write_lock(&lock_b).unwrap();
        writer.close().unwrap();

        assert_eq!(id_a, HEADER_LEN as i32);
        assert!(id_b > id_a);

        let mut reader = ContextFileReader::open(&path).unwrap();
        assert_eq!(reader.read_lock(id_a).unwrap(), lock_a);
        assert_eq!(reader.read_lock(id_b).unwrap(), lock_b);
        // Re-reads resolve to the same value
        assert_eq!(reader.read_lock(id_a).unwrap(), lock_a);
    }

    #[test]
    fn test_context_round_trip() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("contexts.db");

        let ctx = LockingContext::new("worker-1", "self.queue", "pool::push");

        let mut writer = ContextFileWriter::create(&path).unwrap();
        let id = writer.write_context(&ctx).unwrap();
        writer.close().unwrap();

        let mut reader = ContextFileReader::open(&path).unwrap();
        assert_eq!(reader.read_context(id).unwrap(), ctx);
    }

    #[test]
    fn test_mixed_records_resolve_by_offset() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("contexts.db");

        let lock = Lock::new("a::B", 1);
        let ctx = LockingContext::new("main", "this", "a::B::get");

        let mut writer = ContextFileWriter::create(&path).unwrap();
        let ctx_id = writer.write_context(&ctx).unwrap();
        let lock_id = writer.write_lock(&lock).unwrap();
        let ctx_id2 = writer.write_context(&ctx).unwrap();
        writer.close().unwrap();

        // Equal values written twice occupy distinct offsets; both resolve.
        assert_ne!(ctx_id, ctx_id2);

        let mut reader = ContextFileReader::open(&path).unwrap();
        assert_eq!(reader.read_lock(lock_id).unwrap(), lock);
        assert_eq!(reader.read_context(ctx_id).unwrap(), ctx);
        assert_eq!(reader.read_context(ctx_id2).unwrap(), ctx);
    }

    #[test]
    fn test_wrong_magic_cookie_is_rejected() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("not_ours.db");
        fs::write(&path, b"definitely not a context store").unwrap();

        match ContextFileReader::open(&path) {
            Err(StoreError::CorruptHeader { .. }) => {}
            other => panic!("expected CorruptHeader, got {other:?}"),
        }
    }

    #[test]
    fn test_incompatible_major_version_is_rejected() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("future.db");

        let mut bytes = Vec::new();
        bytes.extend_from_slice(&CONTEXTS_MAGIC_COOKIE.to_be_bytes());
        bytes.extend_from_slice(&(MAJOR_VERSION + 1).to_be_bytes());
        bytes.extend_from_slice(&0i32.to_be_bytes());
        fs::write(&path, &bytes).unwrap();

        match ContextFileReader::open(&path) {
            Err(StoreError::IncompatibleVersion { major, .. }) => {
                assert_eq!(major, MAJOR_VERSION + 1);
            }
            other => panic!("expected IncompatibleVersion, got {other:?}"),
        }
    }

    #[test]
    fn test_newer_minor_version_is_tolerated() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("minor.db");

        let mut bytes = Vec::new();
        bytes.extend_from_slice(&CONTEXTS_MAGIC_COOKIE.to_be_bytes());
        bytes.extend_from_slice(&MAJOR_VERSION.to_be_bytes());
        bytes.extend_from_slice(&99i32.to_be_bytes());
        fs::write(&path, &bytes).unwrap();

        assert!(ContextFileReader::open(&path).is_ok());
    }

    #[test]
    fn test_bogus_offset_is_an_error() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("contexts.db");

        let mut writer = ContextFileWriter::create(&path).unwrap();
        writer
            .write_lock(&Lock::new("x::Y", 9))
            .unwrap();
        writer.close().unwrap();

        let mut reader = ContextFileReader::open(&path).unwrap();
        assert!(matches!(
            reader.read_context(7),
            Err(StoreError::InvalidOffset { .. })
        ));
        assert!(matches!(
            reader.read_lock(1_000_000),
            Err(StoreError::InvalidOffset { .. })
        ));
    }
}
