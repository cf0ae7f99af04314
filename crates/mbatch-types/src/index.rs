//! Index catalogue model types.
//!
//! An [`IndexEntry`] records the outcome of one batch at one run version.
//! The catalogue itself lives in `mbatch-state`.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::batch::{BatchKey, Fingerprint};

// ---------------------------------------------------------------------------
// Run identity
// ---------------------------------------------------------------------------

/// Timestamp-coded run identifier (e.g. `"2024_01_03_1400"`).
///
/// Versions order lexicographically, which matches chronological order for
/// the `YYYY_MM_DD[_HHMM]` convention.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RunVersion(String);

impl RunVersion {
    /// Create a new run version.
    #[must_use]
    pub fn new(version: impl Into<String>) -> Self {
        Self(version.into())
    }

    /// Borrow the inner string.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for RunVersion {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl<S: Into<String>> From<S> for RunVersion {
    fn from(value: S) -> Self {
        Self(value.into())
    }
}

/// Logical origin of a run (a data-provider name such as `GDC` or `MWB`).
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RunSource(String);

impl RunSource {
    /// Create a new run source tag.
    #[must_use]
    pub fn new(source: impl Into<String>) -> Self {
        Self(source.into())
    }

    /// Borrow the inner string.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for RunSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl<S: Into<String>> From<S> for RunSource {
    fn from(value: S) -> Self {
        Self(value.into())
    }
}

// ---------------------------------------------------------------------------
// Entry status
// ---------------------------------------------------------------------------

/// Processing status of a catalogue entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EntryStatus {
    /// Attempted but not yet finished.
    New,
    /// Dispatched and durably archived.
    Processed,
    /// Dispatch or archive failed; retried on a later run.
    Failed,
    /// No longer present in the source tree.
    Stale,
}

impl EntryStatus {
    /// Wire-format string for storage.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::New => "NEW",
            Self::Processed => "PROCESSED",
            Self::Failed => "FAILED",
            Self::Stale => "STALE",
        }
    }

    /// Parse the storage representation.
    #[must_use]
    pub fn parse(raw: &str) -> Option<Self> {
        match raw {
            "NEW" => Some(Self::New),
            "PROCESSED" => Some(Self::Processed),
            "FAILED" => Some(Self::Failed),
            "STALE" => Some(Self::Stale),
            _ => None,
        }
    }
}

impl std::fmt::Display for EntryStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

// ---------------------------------------------------------------------------
// Index entry
// ---------------------------------------------------------------------------

/// Outcome of one batch at one run version.
///
/// `last_processed_at` is an RFC 3339 UTC string; the store keeps it
/// verbatim so re-saving an untouched entry is byte-stable.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IndexEntry {
    pub batch_key: BatchKey,
    pub run_version: RunVersion,
    pub status: EntryStatus,
    /// Archived result directory, set once the batch is PROCESSED.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result_location: Option<PathBuf>,
    pub content_fingerprint: Fingerprint,
    /// Sample columns in the archived data matrix.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sample_count: Option<usize>,
    /// Feature rows in the archived data matrix.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub feature_count: Option<usize>,
    pub last_processed_at: String,
    /// Failure reason for FAILED entries.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub diagnostic: Option<String>,
}

impl IndexEntry {
    /// `true` when this entry points at an archived result.
    #[must_use]
    pub fn has_result(&self) -> bool {
        self.result_location.is_some()
    }
}
