use lockweave::{OutputMode, TracedMutex};
use std::sync::Arc;
use std::thread;
mod common;
use common::{start_recording, take_in_order};

// Two pairs of workers repeat the same lock inversion. Every pairing of an
// "in order" edge with an "inverted" edge is its own cycle, but they all
// describe one logical defect: after the alike merge a single cycle is
// reported.
#[test]
fn test_repeated_pattern_collapses_to_one_cycle() {
    let harness = start_recording();

    let account = Arc::new(TracedMutex::with_label("account", "bank.account"));
    let ledger = Arc::new(TracedMutex::with_label("ledger", "bank.ledger"));

    for (index, forward) in [true, false, true, false].into_iter().enumerate() {
        let account = Arc::clone(&account);
        let ledger = Arc::clone(&ledger);
        let worker = thread::Builder::new()
            .name(format!("worker-{index}"))
            .spawn(move || {
                if forward {
                    take_in_order(&account, &ledger);
                } else {
                    take_in_order(&ledger, &account);
                }
            })
            .expect("Failed to spawn worker");
        // Run the workers back to back: the inversion is recorded either
        // way and the test never risks the real deadlock.
        worker.join().expect("worker panicked");
    }

    let recording = harness.stop();
    let report = recording.analyze(OutputMode::AllCycles);

    // Two forward edges times two inverted edges.
    assert_eq!(report.stats.cycles_found, 4);
    assert_eq!(report.stats.alike_cycles_removed, 3);
    assert_eq!(report.cycles.len(), 1);
    assert!(!report.cycles[0].single_threaded);

    // All four cycles ran through the same two locks: one merged group.
    assert_eq!(report.cycle_groups.len(), 1);
}
