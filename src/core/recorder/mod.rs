//! Runtime capture of lock-acquisition order.
//!
//! The recorder is the synchronized entry point the instrumentation layer
//! calls around every monitor operation. On each acquisition it resolves a
//! lock ID and a context ID through the caches, and — when the calling
//! thread already holds another monitor — appends one ordering event to
//! the log: "the new lock was taken while the most recently entered lock
//! was held".
//!
//! Acquisitions are reported *before* the underlying lock is taken, so an
//! acquisition that deadlocks and never returns still leaves its edge in
//! the log.
//!
//! The per-thread held-lock stack is thread-local and unsynchronized; ID
//! resolution plus the log append run inside one process-wide critical
//! section, the only serialization point of the recording path. No failure
//! in here may disturb the monitored program: errors and panics disable
//! recording process-wide (one-way, idempotent) and the program runs on.

pub mod held_locks;
pub mod id_cache;

use crate::core::recorder::held_locks::{HELD_LOCKS, HeldLock, HeldLockStack};
use crate::core::recorder::id_cache::{ContextIdCache, LockIdCache};
use crate::core::storage::{
    CONTEXTS_DB_FILENAME, ContextFileWriter, EVENT_DB_FILENAME, EventFileWriter, LockEventSink,
    StoreError,
};
use crate::core::types::{
    ContextId, LockEvent, LockId, LockingContext, MonitorRef, NO_ID, ThreadId,
    get_current_thread_id,
};
use crate::core::utils::Counter;
use parking_lot::Mutex;
use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::path::Path;
use std::sync::atomic::{AtomicU8, Ordering};
use tracing::error;

const STATE_INACTIVE: u8 = 0;
const STATE_ACTIVE: u8 = 1;
const STATE_DISABLED: u8 = 2;

// Recorder lifecycle: Inactive -> Active -> (Inactive on stop | Disabled on
// failure). Disabled is terminal for the process.
static RECORDER_STATE: AtomicU8 = AtomicU8::new(STATE_INACTIVE);

lazy_static::lazy_static! {
    static ref GLOBAL_RECORDER: Mutex<Option<EventRecorder>> = Mutex::new(None);
}

/// Owns the output files and ID caches of one recording session.
pub struct EventRecorder {
    context_writer: ContextFileWriter,
    event_writer: EventFileWriter,
    lock_ids: LockIdCache,
    context_ids: ContextIdCache,
    entered_monitors: Counter,
}

impl EventRecorder {
    /// Create `lockweave_events.db` and `lockweave_contexts.db` inside
    /// `output_dir`.
    pub fn create<P: AsRef<Path>>(output_dir: P) -> Result<Self, StoreError> {
        let output_dir = output_dir.as_ref();
        Ok(EventRecorder {
            context_writer: ContextFileWriter::create(output_dir.join(CONTEXTS_DB_FILENAME))?,
            event_writer: EventFileWriter::create(output_dir.join(EVENT_DB_FILENAME))?,
            lock_ids: LockIdCache::new(),
            context_ids: ContextIdCache::new(),
            entered_monitors: Counter::new("entered monitors", 100_000),
        })
    }

    /// Resolve IDs for one acquisition and append its event record.
    ///
    /// `source` is the monitor most recently entered (and still held) by
    /// the same thread, or `None` for a bare acquisition.
    pub(crate) fn record_acquisition(
        &mut self,
        monitor: &MonitorRef,
        context: &LockingContext,
        source: Option<&HeldLock>,
        thread_id: ThreadId,
    ) -> Result<(LockId, ContextId), StoreError> {
        let target_lock_id = self.lock_ids.acquire(monitor, &mut self.context_writer)?;
        let target_context_id = self.context_ids.acquire(context, &mut self.context_writer)?;
        let (source_lock_id, source_context_id) = match source {
            Some(held) => (held.lock_id, held.context_id),
            None => (NO_ID, NO_ID),
        };
        self.event_writer.on_lock_event(&LockEvent {
            target_lock_id,
            target_context_id,
            source_lock_id,
            source_context_id,
            thread_id,
        })?;
        self.entered_monitors.increment();
        Ok((target_lock_id, target_context_id))
    }

    pub(crate) fn forget_monitor(&mut self, address: usize) {
        self.lock_ids.forget(address);
    }

    /// Flush both output files.
    pub fn flush(&mut self) -> Result<(), StoreError> {
        self.context_writer.flush()?;
        self.event_writer.flush()?;
        Ok(())
    }

    /// Flush and close both output files.
    pub fn close(self) -> Result<(), StoreError> {
        self.context_writer.close()?;
        self.event_writer.close()?;
        Ok(())
    }
}

/// Install a recorder writing into `output_dir` and start accepting
/// monitor events.
pub(crate) fn init_recorder<P: AsRef<Path>>(output_dir: P) -> Result<(), StoreError> {
    let recorder = EventRecorder::create(output_dir)?;
    *GLOBAL_RECORDER.lock() = Some(recorder);
    RECORDER_STATE.store(STATE_ACTIVE, Ordering::SeqCst);
    Ok(())
}

/// Stop recording and close the output files. Safe to call when nothing
/// was ever started.
pub fn stop_recording() -> Result<(), StoreError> {
    RECORDER_STATE
        .compare_exchange(
            STATE_ACTIVE,
            STATE_INACTIVE,
            Ordering::SeqCst,
            Ordering::SeqCst,
        )
        .ok();
    let recorder = GLOBAL_RECORDER.lock().take();
    match recorder {
        Some(recorder) => recorder.close(),
        None => Ok(()),
    }
}

/// Whether monitor events are currently being captured.
pub fn is_recording() -> bool {
    RECORDER_STATE.load(Ordering::SeqCst) == STATE_ACTIVE
}

/// One-way kill switch: the tool must never destabilize the program it
/// observes, so any internal fault silences the recorder for the rest of
/// the process. Logged once.
fn disable_recorder(reason: &dyn fmt::Display) {
    if RECORDER_STATE.swap(STATE_DISABLED, Ordering::SeqCst) != STATE_DISABLED {
        error!("lock-order recording disabled: {reason}");
    }
}

/// Report that the current thread is about to enter `monitor`.
///
/// Callable from any thread. Never panics and never returns an error: a
/// recording failure disables the recorder and the call becomes a no-op.
pub fn on_monitor_enter(
    monitor: MonitorRef,
    thread_name: &str,
    lock_reference: &str,
    method_with_class: &str,
) {
    if !is_recording() {
        return;
    }
    let outcome = panic::catch_unwind(AssertUnwindSafe(|| {
        enter_impl(&monitor, thread_name, lock_reference, method_with_class)
    }));
    match outcome {
        Ok(Ok(())) => {}
        Ok(Err(err)) => disable_recorder(&err),
        Err(_) => disable_recorder(&"panic in the recording path"),
    }
}

/// Report that the current thread has released `monitor`.
pub fn on_monitor_exit(monitor: MonitorRef) {
    if !is_recording() {
        return;
    }
    let outcome = panic::catch_unwind(AssertUnwindSafe(|| {
        HELD_LOCKS.with(|cell| cell.borrow_mut().exit(monitor.address));
    }));
    if outcome.is_err() {
        disable_recorder(&"panic in the recording path");
    }
}

/// Report that `monitor` has been destroyed. Its address may be recycled
/// for an unrelated lock, so the identity cache must drop the mapping.
pub fn on_monitor_destroyed(monitor: MonitorRef) {
    if !is_recording() {
        return;
    }
    let outcome = panic::catch_unwind(AssertUnwindSafe(|| {
        if let Some(recorder) = GLOBAL_RECORDER.lock().as_mut() {
            recorder.forget_monitor(monitor.address);
        }
    }));
    if outcome.is_err() {
        disable_recorder(&"panic in the recording path");
    }
}

fn enter_impl(
    monitor: &MonitorRef,
    thread_name: &str,
    lock_reference: &str,
    method_with_class: &str,
) -> Result<(), StoreError> {
    HELD_LOCKS.with(|cell| {
        let mut stack = cell.borrow_mut();
        stack.sweep();
        if stack.reenter(monitor.address) {
            // Reentrant acquisition: not an ordering risk, nothing to log.
            return Ok(());
        }

        let context = LockingContext::new(thread_name, lock_reference, method_with_class);
        let thread_id = get_current_thread_id();

        let (lock_id, context_id) = {
            let mut guard = GLOBAL_RECORDER.lock();
            let Some(recorder) = guard.as_mut() else {
                return Ok(());
            };
            recorder.record_acquisition(monitor, &context, stack.top(), thread_id)?
        };

        stack.push(HeldLock {
            address: monitor.address,
            lock_id,
            context_id,
            ref_count: 1,
        });
        Ok(())
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::storage::{EVENT_DB_FILENAME, EventFileReader};
    use tempfile::tempdir;

    #[derive(Default)]
    struct CollectingSink {
        events: Vec<LockEvent>,
    }

    impl LockEventSink for CollectingSink {
        fn on_lock_event(&mut self, event: &LockEvent) -> Result<(), StoreError> {
            self.events.push(*event);
            Ok(())
        }
    }

    // Drives a private recorder instance with an explicit stack, the same
    // steps the global entry point performs.
    fn enter(
        stack: &mut HeldLockStack,
        recorder: &mut EventRecorder,
        monitor: &MonitorRef,
        context: &LockingContext,
        thread_id: ThreadId,
    ) {
        stack.sweep();
        if stack.reenter(monitor.address) {
            return;
        }
        let (lock_id, context_id) = recorder
            .record_acquisition(monitor, context, stack.top(), thread_id)
            .unwrap();
        stack.push(HeldLock {
            address: monitor.address,
            lock_id,
            context_id,
            ref_count: 1,
        });
    }

    fn replay(dir: &Path) -> Vec<LockEvent> {
        let mut sink = CollectingSink::default();
        EventFileReader::replay(dir.join(EVENT_DB_FILENAME), &mut sink).unwrap();
        sink.events
    }

    #[test]
    fn test_bare_acquisition_has_no_source() {
        let dir = tempdir().unwrap();
        let mut recorder = EventRecorder::create(dir.path()).unwrap();
        let mut stack = HeldLockStack::default();

        let monitor = MonitorRef::new("cache::Inner", 0x10);
        let context = LockingContext::new("main", "self.cache", "cache::get");
        enter(&mut stack, &mut recorder, &monitor, &context, 1);
        recorder.close().unwrap();

        let events = replay(dir.path());
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].source_lock_id, NO_ID);
        assert_eq!(events[0].source_context_id, NO_ID);
        assert_eq!(events[0].thread_id, 1);
    }

    #[test]
    fn test_nested_acquisition_records_edge_from_most_recent() {
        let dir = tempdir().unwrap();
        let mut recorder = EventRecorder::create(dir.path()).unwrap();
        let mut stack = HeldLockStack::default();

        let outer = MonitorRef::new("a::A", 0x10);
        let middle = MonitorRef::new("b::B", 0x20);
        let inner = MonitorRef::new("c::C", 0x30);
        let context = LockingContext::new("main", "this", "m::f");

        enter(&mut stack, &mut recorder, &outer, &context, 1);
        enter(&mut stack, &mut recorder, &middle, &context, 1);
        enter(&mut stack, &mut recorder, &inner, &context, 1);
        recorder.close().unwrap();

        let events = replay(dir.path());
        assert_eq!(events.len(), 3);
        // Edge source is the most recently entered lock, not the oldest.
        assert_eq!(events[1].source_lock_id, events[0].target_lock_id);
        assert_eq!(events[2].source_lock_id, events[1].target_lock_id);
    }

    #[test]
    fn test_reentrant_acquisition_records_nothing() {
        let dir = tempdir().unwrap();
        let mut recorder = EventRecorder::create(dir.path()).unwrap();
        let mut stack = HeldLockStack::default();

        let monitor = MonitorRef::new("a::A", 0x10);
        let context = LockingContext::new("main", "this", "m::f");

        enter(&mut stack, &mut recorder, &monitor, &context, 1);
        enter(&mut stack, &mut recorder, &monitor, &context, 1);
        enter(&mut stack, &mut recorder, &monitor, &context, 1);
        recorder.close().unwrap();

        let events = replay(dir.path());
        assert_eq!(events.len(), 1);
        assert_eq!(stack.len(), 1);
    }

    #[test]
    fn test_exit_reopens_the_edge_source() {
        let dir = tempdir().unwrap();
        let mut recorder = EventRecorder::create(dir.path()).unwrap();
        let mut stack = HeldLockStack::default();

        let a = MonitorRef::new("a::A", 0x10);
        let b = MonitorRef::new("b::B", 0x20);
        let c = MonitorRef::new("c::C", 0x30);
        let context = LockingContext::new("main", "this", "m::f");

        enter(&mut stack, &mut recorder, &a, &context, 1);
        enter(&mut stack, &mut recorder, &b, &context, 1);
        stack.exit(b.address);
        enter(&mut stack, &mut recorder, &c, &context, 1);
        recorder.close().unwrap();

        let events = replay(dir.path());
        assert_eq!(events.len(), 3);
        // After b's exit, a is the most recently entered held lock again.
        assert_eq!(events[2].source_lock_id, events[0].target_lock_id);
    }
}
