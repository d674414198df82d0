use lockweave::{MonitorRef, OutputMode, on_monitor_enter, on_monitor_exit};
mod common;
use common::start_recording;

// A reentrant monitor entered twice by the same thread must not produce a
// self edge — re-entry is not an ordering risk. Driven through the raw
// instrumentation boundary, the way a runtime with reentrant monitors
// would call it.
#[test]
fn test_reentrant_acquisition_produces_no_edges() {
    let harness = start_recording();

    let monitor = MonitorRef::new("session::State", 0x5150);
    on_monitor_enter(monitor, "main", "this", "session::open");
    on_monitor_enter(monitor, "main", "this", "session::refresh");
    on_monitor_enter(monitor, "main", "this", "session::touch");
    on_monitor_exit(monitor);
    on_monitor_exit(monitor);
    on_monitor_exit(monitor);

    let recording = harness.stop();
    let report = recording.analyze(OutputMode::AllEdges);

    // One event for the outermost entry, nothing for the re-entries.
    assert_eq!(report.stats.parsed_events, 1);
    assert_eq!(report.stats.nodes, 1);
    assert_eq!(report.stats.unique_edges, 0);
    assert!(report.cycles.is_empty());
    assert!(report.all_edges.is_empty());
}
