//! Progress reporting trait.
//!
//! This module defines the ProgressCallback trait, which decouples the
//! transfer engine from whatever displays progress (CLI, logs, a scheduler).

use std::fmt;
use std::sync::Arc;

use crate::error::EngineError;

/// What happened to one file.
#[derive(Debug, Clone)]
pub enum FileOutcome {
    /// Transferred, with the size of the written file
    Successful { bytes: u64 },
    /// Destination existed and the write mode said to leave it
    Skipped,
    /// Source vanished before it could be transferred
    Missing,
    Failed(Arc<EngineError>),
}

impl fmt::Display for FileOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FileOutcome::Successful { .. } => write!(f, "successful"),
            FileOutcome::Skipped => write!(f, "skipped"),
            FileOutcome::Missing => write!(f, "missing"),
            FileOutcome::Failed(e) => write!(f, "failed: {}", e),
        }
    }
}

/// Counts reported when a run finishes.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TransferSummary {
    pub successful: usize,
    pub failed: usize,
    pub skipped: usize,
    pub missing: usize,
    /// Bytes written to the destination
    pub bytes: u64,
}

impl TransferSummary {
    pub fn record(&mut self, outcome: &FileOutcome) {
        match outcome {
            FileOutcome::Successful { bytes } => {
                self.successful += 1;
                self.bytes += bytes;
            }
            FileOutcome::Skipped => self.skipped += 1,
            FileOutcome::Missing => self.missing += 1,
            FileOutcome::Failed(_) => self.failed += 1,
        }
    }

    pub fn total(&self) -> usize {
        self.successful + self.failed + self.skipped + self.missing
    }
}

/// Trait for receiving progress updates from a transfer run.
///
/// All methods are called synchronously from the thread running the
/// transfer, in file order. `index` is zero-based.
pub trait ProgressCallback: Send {
    /// Called once the candidate list is known, before the first file.
    fn on_run_started(&self, total: usize);

    /// Called when a file is about to be processed.
    fn on_file_started(&self, index: usize, total: usize, source: &dyn fmt::Display, target: &dyn fmt::Display);

    /// Called when a file is done, whatever the outcome.
    fn on_file_completed(&self, index: usize, source: &dyn fmt::Display, outcome: &FileOutcome);

    /// Called when the run is complete (all files processed).
    fn on_run_completed(&self, summary: &TransferSummary);
}
