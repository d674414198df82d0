//! ID assignment caches for the recording path.
//!
//! Both caches front the context store: a miss appends a new record and the
//! returned offset becomes the ID. The lock cache is keyed by monitor
//! *identity* (its address), the context cache by *value*. Neither may ever
//! hand out two different IDs for the same live identity or cached value;
//! a value whose cache entry has been reclaimed may legitimately get a
//! fresh ID, which the offline duplicate-merge stages repair.

use crate::core::storage::{ContextFileWriter, StoreError};
use crate::core::types::{ContextId, Lock, LockId, LockingContext, MonitorRef};
use fxhash::FxHashMap;
use lru::LruCache;
use std::num::NonZeroUsize;
use tracing::trace;

/// How many distinct locking contexts the value cache keeps before it
/// starts shedding the least recently seen ones. Contexts are cheap to
/// re-derive, so the bound trades a little log redundancy for a hard cap
/// on recording-path memory.
pub(crate) const CONTEXT_CACHE_CAPACITY: usize = 8192;

/// Maps live monitors, by identity, to their assigned lock IDs.
///
/// Entries live until the host reports the monitor destroyed, so a live
/// monitor always resolves to the same ID and a dead one stops pinning
/// its slot. A one-entry hot cache short-circuits the common case of
/// repeated acquisitions of the same lock.
pub struct LockIdCache {
    ids: FxHashMap<usize, LockId>,
    last: Option<(usize, LockId)>,
}

impl Default for LockIdCache {
    fn default() -> Self {
        Self::new()
    }
}

impl LockIdCache {
    pub fn new() -> Self {
        LockIdCache {
            ids: FxHashMap::default(),
            last: None,
        }
    }

    /// Return the ID for `monitor`, writing a new lock record on first
    /// sight.
    pub fn acquire(
        &mut self,
        monitor: &MonitorRef,
        writer: &mut ContextFileWriter,
    ) -> Result<LockId, StoreError> {
        if let Some((address, id)) = self.last
            && address == monitor.address
        {
            return Ok(id);
        }
        if let Some(&id) = self.ids.get(&monitor.address) {
            self.last = Some((monitor.address, id));
            return Ok(id);
        }
        let id = writer.write_lock(&Lock::from_monitor(monitor))?;
        trace!("created new lock ID {id}");
        self.ids.insert(monitor.address, id);
        self.last = Some((monitor.address, id));
        Ok(id)
    }

    /// Reclamation hook: the monitor at `address` is gone, so its slot may
    /// be reused by a future allocation and must not alias the old ID.
    pub fn forget(&mut self, address: usize) {
        self.ids.remove(&address);
        if self.last.is_some_and(|(a, _)| a == address) {
            self.last = None;
        }
    }

    pub fn len(&self) -> usize {
        self.ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }
}

/// Maps locking contexts, by value, to their assigned context IDs.
///
/// Bounded LRU: shedding an entry under pressure only means an equal
/// context seen later gets a fresh offset, which the analyzer's alike-merge
/// and duplicate-edge translation collapse again.
pub struct ContextIdCache {
    ids: LruCache<LockingContext, ContextId>,
}

impl Default for ContextIdCache {
    fn default() -> Self {
        Self::new()
    }
}

impl ContextIdCache {
    pub fn new() -> Self {
        Self::with_capacity(CONTEXT_CACHE_CAPACITY)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        ContextIdCache {
            ids: LruCache::new(NonZeroUsize::new(capacity).unwrap_or(NonZeroUsize::MIN)),
        }
    }

    /// Return the ID for `context`, writing a new record if no equal
    /// context is cached.
    pub fn acquire(
        &mut self,
        context: &LockingContext,
        writer: &mut ContextFileWriter,
    ) -> Result<ContextId, StoreError> {
        if let Some(&id) = self.ids.get(context) {
            return Ok(id);
        }
        let id = writer.write_context(context)?;
        trace!("created new context ID {id}");
        self.ids.put(context.clone(), id);
        Ok(id)
    }

    pub fn len(&self) -> usize {
        self.ids.len()
    }
}
