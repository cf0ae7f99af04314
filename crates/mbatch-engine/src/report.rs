//! Run-scoped collection of warnings and errors.

use mbatch_types::{BatchKey, ReportNote, Severity};

/// Notes raised during one run, in the order they were recorded.
///
/// Passed by `&mut` to each stage. Recording only logs and appends; it
/// never changes what the stage does next.
#[derive(Debug, Default)]
pub struct RunReport {
    notes: Vec<ReportNote>,
}

impl RunReport {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&mut self, note: ReportNote) {
        match note.severity {
            Severity::Warning => tracing::warn!(
                batch_key = note.batch_key.as_ref().map(BatchKey::as_str),
                "{}",
                note.message
            ),
            Severity::Error => tracing::error!(
                batch_key = note.batch_key.as_ref().map(BatchKey::as_str),
                "{}",
                note.message
            ),
        }
        self.notes.push(note);
    }

    pub fn warning(&mut self, message: impl Into<String>, batch_key: Option<&BatchKey>) {
        self.record(ReportNote::warning(message, batch_key.cloned()));
    }

    pub fn error(&mut self, message: impl Into<String>, batch_key: Option<&BatchKey>) {
        self.record(ReportNote::error(message, batch_key.cloned()));
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.notes.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.notes.is_empty()
    }

    /// Append notes collected by a stage that ran on another thread.
    /// They were logged when first recorded, so they are not logged again.
    pub fn merge(&mut self, other: RunReport) {
        self.notes.extend(other.notes);
    }

    /// Take every note recorded so far, leaving the report empty.
    pub fn drain(&mut self) -> Vec<ReportNote> {
        std::mem::take(&mut self.notes)
    }
}
