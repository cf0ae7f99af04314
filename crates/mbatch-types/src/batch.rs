//! Sample batch model produced by the source scanner.

use std::collections::BTreeSet;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::index::RunSource;

// ---------------------------------------------------------------------------
// Newtypes
// ---------------------------------------------------------------------------

/// Identifier of a logical sample group within a run source.
///
/// Derived from the batch directory's path relative to the source root,
/// always with `/` separators (e.g. `"TCGA-BRCA/STAR - Counts/2024_01_01"`).
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct BatchKey(String);

impl BatchKey {
    /// Create a new batch key.
    #[must_use]
    pub fn new(key: impl Into<String>) -> Self {
        Self(key.into())
    }

    /// Borrow the inner string.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Path components of the key, in order.
    pub fn components(&self) -> impl Iterator<Item = &str> {
        self.0.split('/').filter(|c| !c.is_empty())
    }
}

impl std::fmt::Display for BatchKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl<S: Into<String>> From<S> for BatchKey {
    fn from(value: S) -> Self {
        Self(value.into())
    }
}

/// Content fingerprint of a batch (lowercase hex SHA-256).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Fingerprint(String);

impl Fingerprint {
    /// Wrap an already computed fingerprint string.
    #[must_use]
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    /// Borrow the inner string.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl<S: Into<String>> From<S> for Fingerprint {
    fn from(value: S) -> Self {
        Self(value.into())
    }
}

// ---------------------------------------------------------------------------
// Batch
// ---------------------------------------------------------------------------

/// One group of sample data files discovered by a scan.
///
/// Batches are ephemeral: every scan recreates them from the source tree.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Batch {
    /// First component of the batch key (project / dataset family).
    pub source_tag: String,
    /// Logical origin of the run (e.g. `GDC`, `MWB`).
    pub run_source: RunSource,
    /// Column naming sample identifiers (`aliquot_barcode`, `Sample`).
    pub id_column: String,
    pub batch_key: BatchKey,
    pub sample_identifiers: BTreeSet<String>,
    /// Non-blank rows below the data matrix header.
    pub feature_count: usize,
    /// Absolute paths of the batch's data files, sorted by file name.
    pub data_file_paths: Vec<PathBuf>,
    pub content_fingerprint: Fingerprint,
    /// `false` when the data matrix has too few samples or features to
    /// analyse; such batches are never sent to the analysis service.
    pub usable: bool,
}

impl Batch {
    /// Number of distinct sample identifiers in the batch.
    #[must_use]
    pub fn sample_count(&self) -> usize {
        self.sample_identifiers.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn batch_key_components_skip_empty_segments() {
        let key = BatchKey::new("TCGA-BRCA//STAR - Counts/2024_01_01");
        let parts: Vec<&str> = key.components().collect();
        assert_eq!(parts, vec!["TCGA-BRCA", "STAR - Counts", "2024_01_01"]);
    }

    #[test]
    fn batch_key_orders_lexicographically() {
        let mut keys = vec![BatchKey::new("b"), BatchKey::new("a/z"), BatchKey::new("a")];
        keys.sort();
        assert_eq!(
            keys.iter().map(BatchKey::as_str).collect::<Vec<_>>(),
            vec!["a", "a/z", "b"]
        );
    }

    #[test]
    fn fingerprint_serde_transparent() {
        let fp = Fingerprint::new("abc123");
        assert_eq!(serde_json::to_string(&fp).unwrap(), "\"abc123\"");
    }

    #[test]
    fn sample_count_counts_distinct_ids() {
        let batch = Batch {
            source_tag: "TCGA-BRCA".into(),
            run_source: RunSource::new("GDC"),
            id_column: "aliquot_barcode".into(),
            batch_key: BatchKey::new("TCGA-BRCA/rna"),
            sample_identifiers: ["s1", "s2", "s1"].iter().map(ToString::to_string).collect(),
            feature_count: 2,
            data_file_paths: vec![],
            content_fingerprint: Fingerprint::new("f"),
            usable: true,
        };
        assert_eq!(batch.sample_count(), 2);
    }
}
