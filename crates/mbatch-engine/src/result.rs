//! Pipeline execution result types.

use std::path::PathBuf;

use mbatch_types::{BatchKey, ReportNote, RunSource, RunVersion, Severity};

use crate::reconcile::Reconciliation;

/// Result of `execute_pipeline`.
#[derive(Debug, Clone)]
pub struct RunOutcome {
    pub run_source: RunSource,
    pub run_version: RunVersion,
    pub scanned: usize,
    pub unchanged: usize,
    /// Dispatched and archived in this run.
    pub processed: Vec<BatchKey>,
    /// Dispatch or archive failed; recorded FAILED.
    pub failed: Vec<BatchKey>,
    /// Found already archived and indexed without dispatch.
    pub adopted: Vec<BatchKey>,
    /// Too few samples or features; never dispatched.
    pub unusable: Vec<BatchKey>,
    /// Newly marked STALE.
    pub stale: Vec<BatchKey>,
    /// STALE entries whose batch reappeared unchanged.
    pub revived: Vec<BatchKey>,
    pub notes: Vec<ReportNote>,
    pub duration_secs: f64,
}

impl RunOutcome {
    pub(crate) fn new(run_source: RunSource, run_version: RunVersion) -> Self {
        Self {
            run_source,
            run_version,
            scanned: 0,
            unchanged: 0,
            processed: Vec::new(),
            failed: Vec::new(),
            adopted: Vec::new(),
            unusable: Vec::new(),
            stale: Vec::new(),
            revived: Vec::new(),
            notes: Vec::new(),
            duration_secs: 0.0,
        }
    }

    /// Notes of the given severity, in recorded order.
    pub fn notes_of(&self, severity: Severity) -> impl Iterator<Item = &ReportNote> {
        self.notes.iter().filter(move |n| n.severity == severity)
    }
}

/// Result of `check_pipeline`.
#[derive(Debug, Clone)]
pub struct CheckResult {
    pub run_source: RunSource,
    pub scanned: usize,
    pub reconciliation: Reconciliation,
    /// Pending batches that would not be dispatched.
    pub unusable: Vec<BatchKey>,
    /// Configured analysis service, when the endpoint file is readable.
    pub endpoint: Option<String>,
    pub notes: Vec<ReportNote>,
}

/// Result of `reindex_pipeline`.
#[derive(Debug, Clone)]
pub struct ReindexResult {
    pub run_source: RunSource,
    pub batches: usize,
    pub entries: usize,
    /// Previous index files kept under the version suffix.
    pub backups: Vec<PathBuf>,
    pub notes: Vec<ReportNote>,
}
