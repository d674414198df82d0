// Core types
pub mod types;
pub use types::*;

// Append-only binary stores
pub mod storage;

// Runtime event capture
pub mod recorder;
pub use recorder::{
    is_recording, on_monitor_destroyed, on_monitor_enter, on_monitor_exit, stop_recording,
};

// Offline analysis
pub mod analyzer;

// Traced mutex
pub mod traced_mutex;
pub use traced_mutex::{TracedGuard, TracedMutex};

pub mod utils;

use anyhow::{Context, Result};
use std::path::{Path, PathBuf};

/// Lockweave configuration struct
///
/// Builder for a recording session: pick an output directory, then
/// `start()` to begin capturing lock-order events process-wide.
pub struct Lockweave {
    output_dir: PathBuf,
}

impl Default for Lockweave {
    fn default() -> Self {
        Self::new()
    }
}

impl Lockweave {
    /// Create a new Lockweave recording into the current directory.
    pub fn new() -> Self {
        Lockweave {
            output_dir: PathBuf::from("."),
        }
    }

    /// Set the directory the recording files are written into.
    ///
    /// # Arguments
    /// * `path` - Directory for `lockweave_events.db` and
    ///   `lockweave_contexts.db`. Must already exist.
    ///
    /// # Returns
    /// The builder for method chaining
    pub fn with_output_dir<P: AsRef<Path>>(mut self, path: P) -> Self {
        self.output_dir = path.as_ref().to_owned();
        self
    }

    /// Start recording lock-order events with the configured settings.
    ///
    /// # Errors
    /// Returns an error if the output files cannot be created
    pub fn start(self) -> Result<()> {
        recorder::init_recorder(&self.output_dir).with_context(|| {
            format!(
                "failed to start recording into {}",
                self.output_dir.display()
            )
        })?;
        Ok(())
    }
}
