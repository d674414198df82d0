use lockweave::{OutputMode, TracedMutex};
use std::sync::Arc;
use std::thread;
mod common;
use common::{start_recording, take_in_order};

// Two threads acquiring the same pair of locks in opposite orders is the
// canonical potential deadlock. The threads run one after the other, so
// nothing actually deadlocks — the inversion still has to show up as one
// multi-threaded cycle.
#[test]
fn test_two_thread_opposite_order_is_one_cycle() {
    let harness = start_recording();

    let account = Arc::new(TracedMutex::with_label("account", "bank.account"));
    let ledger = Arc::new(TracedMutex::with_label("ledger", "bank.ledger"));

    let account_clone = Arc::clone(&account);
    let ledger_clone = Arc::clone(&ledger);
    let first = thread::Builder::new()
        .name("transfer".into())
        .spawn(move || take_in_order(&account_clone, &ledger_clone))
        .expect("Failed to spawn thread");
    first.join().expect("transfer thread panicked");

    let account_clone = Arc::clone(&account);
    let ledger_clone = Arc::clone(&ledger);
    let second = thread::Builder::new()
        .name("audit".into())
        .spawn(move || take_in_order(&ledger_clone, &account_clone))
        .expect("Failed to spawn thread");
    second.join().expect("audit thread panicked");

    let recording = harness.stop();
    let report = recording.analyze(OutputMode::AllCycles);

    assert_eq!(report.cycles.len(), 1);
    let cycle = &report.cycles[0];
    assert!(!cycle.single_threaded);
    assert_eq!(cycle.edges.len(), 2);

    // Both directions between the two locks are present.
    let references: Vec<(&str, &str)> = cycle
        .edges
        .iter()
        .map(|edge| {
            (
                edge.source_context.lock_reference(),
                edge.target_context.lock_reference(),
            )
        })
        .collect();
    assert!(references.contains(&("bank.account", "bank.ledger")));
    assert!(references.contains(&("bank.ledger", "bank.account")));

    // The same cycle survives the multi-threaded-only filter.
    let filtered = recording.analyze(OutputMode::MultiThreadedCyclesOnly);
    assert_eq!(filtered.cycles.len(), 1);
    assert_eq!(filtered.stats.single_threaded_cycles_removed, 0);
}
