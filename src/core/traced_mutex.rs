use crate::core::recorder::{on_monitor_destroyed, on_monitor_enter, on_monitor_exit};
use crate::core::types::MonitorRef;
use std::any::type_name;
use std::ops::{Deref, DerefMut};
use std::panic::Location;
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::thread;

/// A wrapper around `std::sync::Mutex` that reports every acquisition and
/// release to the lock-order recorder.
///
/// The inner mutex is boxed so the monitor's address stays put when the
/// wrapper moves; the address is the lock's identity for the whole
/// recording. The acquisition context is derived automatically: the
/// current thread's name, the label given at construction, and the
/// caller's source location.
pub struct TracedMutex<T> {
    label: String,
    inner: Box<Mutex<T>>,
}

/// Guard for a TracedMutex, reports the release when dropped
pub struct TracedGuard<'a, T> {
    class_name: &'static str,
    address: usize,
    guard: MutexGuard<'a, T>,
}

impl<T> TracedMutex<T> {
    /// Create a new TracedMutex labeled `"this"`.
    pub fn new(value: T) -> Self {
        Self::with_label(value, "this")
    }

    /// Create a new TracedMutex with a label describing how the lock is
    /// reached, for example `"bank.accounts"`. The label is what ties
    /// recordings of different runs (and different instances) together.
    pub fn with_label(value: T, label: impl Into<String>) -> Self {
        TracedMutex {
            label: label.into(),
            inner: Box::new(Mutex::new(value)),
        }
    }

    fn class_name() -> &'static str {
        type_name::<T>()
    }

    fn address(&self) -> usize {
        self.inner.as_ref() as *const Mutex<T> as usize
    }

    fn monitor(&self) -> MonitorRef<'static> {
        MonitorRef::new(Self::class_name(), self.address())
    }

    /// Acquire the lock, reporting the acquisition first.
    ///
    /// Reporting happens before blocking on the inner mutex, so even an
    /// acquisition that deadlocks leaves its ordering edge in the log.
    #[track_caller]
    pub fn lock(&self) -> Result<TracedGuard<'_, T>, PoisonError<MutexGuard<'_, T>>> {
        let location = Location::caller();
        let method = format!("{}:{}", location.file(), location.line());
        let thread = thread::current();
        on_monitor_enter(
            self.monitor(),
            thread.name().unwrap_or("unnamed"),
            &self.label,
            &method,
        );
        match self.inner.lock() {
            Ok(guard) => Ok(TracedGuard {
                class_name: Self::class_name(),
                address: self.address(),
                guard,
            }),
            Err(poisoned) => {
                // The acquisition never completed for us; undo the entry.
                on_monitor_exit(self.monitor());
                Err(poisoned)
            }
        }
    }

    pub fn label(&self) -> &str {
        &self.label
    }
}

impl<T> Drop for TracedMutex<T> {
    fn drop(&mut self) {
        // The address may be recycled by the allocator; tell the recorder
        // this monitor is gone.
        on_monitor_destroyed(self.monitor());
    }
}

impl<'a, T> Deref for TracedGuard<'a, T> {
    type Target = T;

    fn deref(&self) -> &T {
        &self.guard
    }
}

impl<'a, T> DerefMut for TracedGuard<'a, T> {
    fn deref_mut(&mut self) -> &mut T {
        &mut self.guard
    }
}

impl<'a, T> Drop for TracedGuard<'a, T> {
    fn drop(&mut self) {
        on_monitor_exit(MonitorRef::new(self.class_name, self.address));
    }
}
