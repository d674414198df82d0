//! Small diagnostics helpers shared by the recorder and the analyzer.

use tracing::debug;

/// Counts events and emits a debug line every `interval` increments, so
/// high-volume paths stay observable without logging every event.
pub struct Counter {
    name: &'static str,
    value: u64,
    interval: u64,
}

impl Counter {
    pub fn new(name: &'static str, interval: u64) -> Self {
        Counter {
            name,
            value: 0,
            interval,
        }
    }

    pub fn increment(&mut self) {
        self.value += 1;
        if self.value % self.interval == 0 {
            debug!("{}: {}", self.name, self.value);
        }
    }

    pub fn value(&self) -> u64 {
        self.value
    }
}

/// Tracks the maximum of an observed series.
#[derive(Default)]
pub struct MaxValueCounter {
    value: usize,
}

impl MaxValueCounter {
    pub fn observe(&mut self, candidate: usize) {
        if candidate > self.value {
            self.value = candidate;
        }
    }

    pub fn value(&self) -> usize {
        self.value
    }
}
