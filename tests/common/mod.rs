use lockweave::{
    AnalysisReport, CONTEXTS_DB_FILENAME, EVENT_DB_FILENAME, Lockweave, OutputMode, TracedMutex,
    analyze, stop_recording,
};
use tempfile::TempDir;

/// A recording session writing into a temporary directory.
///
/// The recorder is process-global, so each integration test file drives
/// exactly one recording.
pub struct RecordingHarness {
    dir: TempDir,
}

pub fn start_recording() -> RecordingHarness {
    let dir = tempfile::tempdir().expect("Failed to create recording directory");
    Lockweave::new()
        .with_output_dir(dir.path())
        .start()
        .expect("Failed to start recording");
    RecordingHarness { dir }
}

impl RecordingHarness {
    /// Stop recording and keep the files for analysis.
    pub fn stop(self) -> Recording {
        stop_recording().expect("Failed to stop recording");
        Recording { dir: self.dir }
    }
}

pub struct Recording {
    dir: TempDir,
}

impl Recording {
    pub fn analyze(&self, mode: OutputMode) -> AnalysisReport {
        analyze(
            self.dir.path().join(EVENT_DB_FILENAME),
            self.dir.path().join(CONTEXTS_DB_FILENAME),
            mode,
        )
        .expect("Analysis failed")
    }
}

/// Take both locks in the given order, then release in reverse order.
/// Shared by the tests so every thread acquires from the same call sites.
#[allow(dead_code)]
pub fn take_in_order<T>(first: &TracedMutex<T>, second: &TracedMutex<T>) {
    let _first_guard = first.lock().expect("first lock poisoned");
    let _second_guard = second.lock().expect("second lock poisoned");
}
