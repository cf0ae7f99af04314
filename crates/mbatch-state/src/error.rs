//! Index store error types.

use std::path::{Path, PathBuf};

/// Errors produced by [`IndexStore`](crate::IndexStore) operations.
#[derive(Debug, thiserror::Error)]
pub enum StateError {
    /// File-system I/O failure on a catalogue file.
    #[error("i/o error on {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// A persisted form could not be parsed or the two forms disagree.
    /// Recovery requires rebuilding the catalogue from the results tree.
    #[error("index corrupt at {}: {reason}", path.display())]
    Corrupt { path: PathBuf, reason: String },

    /// Catalogue could not be encoded.
    #[error("catalogue encode error: {0}")]
    Encode(#[from] serde_json::Error),

    /// Internal mutex was poisoned by a panicked thread.
    #[error("index store lock poisoned")]
    LockPoisoned,
}

impl StateError {
    pub(crate) fn io(path: &Path, source: std::io::Error) -> Self {
        Self::Io {
            path: path.to_path_buf(),
            source,
        }
    }

    pub(crate) fn corrupt(path: &Path, reason: impl Into<String>) -> Self {
        Self::Corrupt {
            path: path.to_path_buf(),
            reason: reason.into(),
        }
    }

    /// `true` when the persisted catalogue needs a reindex before use.
    #[must_use]
    pub fn is_corrupt(&self) -> bool {
        matches!(self, Self::Corrupt { .. })
    }
}

/// Convenience alias used throughout this crate.
pub type Result<T> = std::result::Result<T, StateError>;
