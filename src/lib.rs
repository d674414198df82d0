//! # Lockweave
//!
//! A potential-deadlock detector: records the order in which a program
//! acquires its locks, then analyzes the resulting lock-order graph for
//! cycles — a necessary condition for deadlock — without the deadlock ever
//! having to happen.
//!
//! ## Features
//!
//! - Low-overhead runtime capture of lock acquisition order
//! - Append-only binary recording that survives crashes of the observed
//!   program
//! - Exhaustive offline cycle enumeration with duplicate collapsing
//! - [`TracedMutex`] for instrumenting Rust code directly
//! - Graphviz output of the suspicious lock graphs

mod core;
pub use core::{
    Lockweave, TracedGuard, TracedMutex, recorder, storage,
    analyzer::{
        self, AnalysisReport, AnalysisStats, CycleReport, CycleType, OutputMode, ReportEdge,
        analyze,
    },
    recorder::{is_recording, on_monitor_destroyed, on_monitor_enter, on_monitor_exit, stop_recording},
    storage::{CONTEXTS_DB_FILENAME, EVENT_DB_FILENAME, StoreError},
    types::{ContextId, Lock, LockId, LockingContext, MonitorRef, ThreadId},
};
