use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

/// Thread identifier type
///
/// Uniquely identifies a thread in the monitored application.
pub type ThreadId = u64;

// Global counter for assigning unique thread IDs
static THREAD_ID_COUNTER: AtomicU64 = AtomicU64::new(1);

// Thread-local storage for each thread's assigned ID
thread_local! {
    static THREAD_ID: ThreadId = {
        // Each thread gets a unique ID once, when this is first accessed
        THREAD_ID_COUNTER.fetch_add(1, Ordering::SeqCst)
    };
}

/// Get a unique identifier of the current thread
/// This will always return the same ID for the lifetime of the thread
pub fn get_current_thread_id() -> ThreadId {
    THREAD_ID.with(|&id| id)
}

/// Lock identifier type
///
/// The byte offset at which the lock record starts in the context store.
/// The offset doubles as the identifier, so no separate allocation table
/// is needed.
pub type LockId = i32;

/// Locking-context identifier type, also a context-store byte offset.
pub type ContextId = i32;

/// Sentinel for "no source lock" in an event record: the acquisition
/// happened while the thread held nothing else.
pub const NO_ID: i32 = -1;

/// Identity of a live monitor object as seen by the instrumentation layer.
///
/// `address` distinguishes instances (any process-unique-enough integer
/// works; for in-process monitors it is the object address) and is the key
/// the identity cache uses. The low 32 bits end up in [`Lock::object_id`].
#[derive(Debug, Clone, Copy)]
pub struct MonitorRef<'a> {
    pub class_name: &'a str,
    pub address: usize,
}

impl<'a> MonitorRef<'a> {
    pub fn new(class_name: &'a str, address: usize) -> Self {
        MonitorRef {
            class_name,
            address,
        }
    }
}

/// A lock as recorded in the context store.
///
/// Two locks are equal iff class name and object id both match.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Lock {
    class_name: String,
    object_id: i32,
}

impl Lock {
    pub fn new(class_name: impl Into<String>, object_id: i32) -> Self {
        Lock {
            class_name: class_name.into(),
            object_id,
        }
    }

    pub fn from_monitor(monitor: &MonitorRef) -> Self {
        Lock {
            class_name: monitor.class_name.to_owned(),
            object_id: monitor.address as u32 as i32,
        }
    }

    pub fn class_name(&self) -> &str {
        &self.class_name
    }

    pub fn object_id(&self) -> i32 {
        self.object_id
    }
}

impl fmt::Display for Lock {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{:X}", self.class_name, self.object_id as u32)
    }
}

/// The context in which a lock was acquired.
///
/// `lock_reference` is a textual description of how the lock object was
/// addressed, for example `"this"` or `"pool.inner"`. `method_with_class`
/// is the fully qualified function that performed the acquisition.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct LockingContext {
    thread_name: String,
    lock_reference: String,
    method_with_class: String,
}

impl LockingContext {
    pub fn new(
        thread_name: impl Into<String>,
        lock_reference: impl Into<String>,
        method_with_class: impl Into<String>,
    ) -> Self {
        LockingContext {
            thread_name: thread_name.into(),
            lock_reference: lock_reference.into(),
            method_with_class: method_with_class.into(),
        }
    }

    pub fn thread_name(&self) -> &str {
        &self.thread_name
    }

    pub fn lock_reference(&self) -> &str {
        &self.lock_reference
    }

    pub fn method_with_class(&self) -> &str {
        &self.method_with_class
    }

    /// Looser equivalence than `==`: the same acquisition pattern,
    /// regardless of which thread performed it. This is what makes
    /// cross-thread and cross-iteration matching possible.
    pub fn alike(&self, other: &LockingContext) -> bool {
        self.lock_reference == other.lock_reference
            && self.method_with_class == other.method_with_class
    }
}

impl fmt::Display for LockingContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "thread: {} lock: {} in: {}",
            self.thread_name, self.lock_reference, self.method_with_class
        )
    }
}

/// One record of the event log: a lock acquisition observed while the
/// acquiring thread possibly held another lock.
///
/// `source_lock_id`/`source_context_id` are [`NO_ID`] when the target was
/// acquired with nothing else held — such records contribute node
/// existence to the graph, but no edge.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LockEvent {
    pub target_lock_id: LockId,
    pub target_context_id: ContextId,
    pub source_lock_id: LockId,
    pub source_context_id: ContextId,
    pub thread_id: ThreadId,
}

impl LockEvent {
    /// Whether this record carries an ordering edge, not just a node.
    pub fn has_source(&self) -> bool {
        self.source_lock_id >= 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::mpsc;
    use std::thread;

    #[test]
    fn test_thread_id_consistency() {
        let (tx, rx) = mpsc::channel();

        let handle = thread::spawn(move || {
            let id1 = get_current_thread_id();
            let id2 = get_current_thread_id();

            // All calls should return the same ID
            assert_eq!(id1, id2);

            tx.send(id1).unwrap();
        });

        let _thread_id = rx.recv().unwrap();
        handle.join().unwrap();
    }

    #[test]
    fn test_thread_id_uniqueness() {
        let (tx, rx) = mpsc::channel();

        let mut handles = vec![];
        for _ in 0..10 {
            let tx = tx.clone();
            handles.push(thread::spawn(move || {
                let id = get_current_thread_id();
                tx.send(id).unwrap();
            }));
        }

        let mut ids = vec![];
        for _ in 0..10 {
            ids.push(rx.recv().unwrap());
        }

        for handle in handles {
            handle.join().unwrap();
        }

        // Verify all IDs are unique
        let mut unique_ids = ids.clone();
        unique_ids.sort();
        unique_ids.dedup();
        assert_eq!(ids.len(), unique_ids.len());
    }

    #[test]
    fn test_lock_equality() {
        let a = Lock::new("pool::Inner", 42);
        let b = Lock::new("pool::Inner", 42);
        let c = Lock::new("pool::Inner", 43);
        assert_eq!(a, b);
        assert_ne!(a, c);
        assert_eq!(a.to_string(), "pool::Inner@2A");
    }

    #[test]
    fn test_context_alike_ignores_thread_name() {
        let a = LockingContext::new("worker-1", "self.queue", "pool::push");
        let b = LockingContext::new("worker-2", "self.queue", "pool::push");
        let c = LockingContext::new("worker-1", "self.other", "pool::push");
        assert_ne!(a, b);
        assert!(a.alike(&b));
        assert!(!a.alike(&c));
    }
}
