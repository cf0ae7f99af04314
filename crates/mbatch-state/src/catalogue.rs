//! In-memory catalogue of known batches and its JSON form.
//!
//! Each batch key owns a history of entries ordered by run version; the
//! last one is the batch's current entry. Superseding entries for a new run
//! version are appended, entries for the same run version are replaced, and
//! nothing is ever removed.

use std::collections::BTreeMap;
use std::path::Path;

use mbatch_types::{BatchKey, EntryStatus, IndexEntry, RunSource, RunVersion};
use serde::{Deserialize, Serialize};

use crate::error::{self, StateError};

/// Version of the JSON catalogue document.
pub const CATALOGUE_SCHEMA_VERSION: u32 = 1;

/// All entries recorded for one batch key, oldest run version first.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BatchHistory {
    entries: Vec<IndexEntry>,
}

impl BatchHistory {
    /// Current entry (latest run version).
    #[must_use]
    pub fn current(&self) -> Option<&IndexEntry> {
        self.entries.last()
    }

    /// Every entry, oldest run version first.
    #[must_use]
    pub fn entries(&self) -> &[IndexEntry] {
        &self.entries
    }

    /// Insert or replace by run version. Returns `true` if anything changed.
    fn upsert(&mut self, entry: IndexEntry) -> bool {
        match self
            .entries
            .binary_search_by(|e| e.run_version.cmp(&entry.run_version))
        {
            Ok(pos) => {
                if self.entries[pos] == entry {
                    false
                } else {
                    self.entries[pos] = entry;
                    true
                }
            }
            Err(pos) => {
                self.entries.insert(pos, entry);
                true
            }
        }
    }
}

/// Catalogue of batches for one run source.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IndexCatalogue {
    run_source: RunSource,
    batches: BTreeMap<BatchKey, BatchHistory>,
}

impl IndexCatalogue {
    /// Empty catalogue for `run_source`.
    #[must_use]
    pub fn new(run_source: RunSource) -> Self {
        Self {
            run_source,
            batches: BTreeMap::new(),
        }
    }

    #[must_use]
    pub fn run_source(&self) -> &RunSource {
        &self.run_source
    }

    /// Number of distinct batch keys.
    #[must_use]
    pub fn len(&self) -> usize {
        self.batches.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.batches.is_empty()
    }

    /// Current entry for `batch_key`, if the batch is known.
    #[must_use]
    pub fn lookup(&self, batch_key: &BatchKey) -> Option<&IndexEntry> {
        self.batches.get(batch_key).and_then(BatchHistory::current)
    }

    /// Full history for `batch_key` (empty for unknown keys).
    #[must_use]
    pub fn history(&self, batch_key: &BatchKey) -> &[IndexEntry] {
        self.batches
            .get(batch_key)
            .map_or(&[], BatchHistory::entries)
    }

    /// Known batch keys in order.
    pub fn keys(&self) -> impl Iterator<Item = &BatchKey> {
        self.batches.keys()
    }

    /// Current entry of every batch, ordered by key.
    pub fn current_entries(&self) -> impl Iterator<Item = &IndexEntry> {
        self.batches.values().filter_map(BatchHistory::current)
    }

    /// Every history entry, ordered by (batch key, run version).
    pub fn all_entries(&self) -> impl Iterator<Item = &IndexEntry> {
        self.batches.values().flat_map(|h| h.entries.iter())
    }

    /// Newest run version recorded for any batch.
    #[must_use]
    pub fn latest_run_version(&self) -> Option<&RunVersion> {
        self.batches
            .values()
            .filter_map(|h| h.entries.last())
            .map(|e| &e.run_version)
            .max()
    }

    /// Insert `entry` or supersede the entry for its (batch key, run version).
    /// Returns `true` if the catalogue changed.
    pub fn upsert(&mut self, entry: IndexEntry) -> bool {
        self.batches
            .entry(entry.batch_key.clone())
            .or_default()
            .upsert(entry)
    }

    /// Flag the current entry of `batch_key` STALE, in place.
    /// Returns `true` if the status changed.
    pub fn mark_stale(&mut self, batch_key: &BatchKey) -> bool {
        self.set_current_status(batch_key, EntryStatus::Stale)
    }

    /// Overwrite the status of the current entry of `batch_key`.
    /// Returns `true` if the status changed.
    pub fn set_current_status(&mut self, batch_key: &BatchKey, status: EntryStatus) -> bool {
        let Some(current) = self
            .batches
            .get_mut(batch_key)
            .and_then(|h| h.entries.last_mut())
        else {
            return false;
        };
        if current.status == status {
            return false;
        }
        current.status = status;
        true
    }

    /// Build a catalogue from flat entries, rejecting duplicate
    /// (batch key, run version) pairs.
    ///
    /// # Errors
    ///
    /// Returns [`StateError::Corrupt`] naming `origin` on duplicates.
    pub fn from_entries(
        run_source: RunSource,
        entries: impl IntoIterator<Item = IndexEntry>,
        origin: &Path,
    ) -> error::Result<Self> {
        let mut catalogue = Self::new(run_source);
        for entry in entries {
            let duplicate = catalogue
                .history(&entry.batch_key)
                .iter()
                .any(|e| e.run_version == entry.run_version);
            if duplicate {
                return Err(StateError::corrupt(
                    origin,
                    format!(
                        "duplicate entry for batch '{}' at run version '{}'",
                        entry.batch_key, entry.run_version
                    ),
                ));
            }
            catalogue.upsert(entry);
        }
        Ok(catalogue)
    }

    /// Encode as the hierarchical JSON catalogue document.
    ///
    /// # Errors
    ///
    /// Returns [`StateError::Encode`] if serialization fails.
    pub fn to_json_bytes(&self) -> error::Result<Vec<u8>> {
        let doc = CatalogueDocument {
            schema_version: CATALOGUE_SCHEMA_VERSION,
            run_source: self.run_source.clone(),
            batches: self
                .batches
                .iter()
                .filter_map(|(key, history)| {
                    history.current().map(|current| {
                        (
                            key.clone(),
                            BatchRecord {
                                current: current.clone(),
                                history: history.entries.clone(),
                            },
                        )
                    })
                })
                .collect(),
        };
        let mut bytes = serde_json::to_vec_pretty(&doc)?;
        bytes.push(b'\n');
        Ok(bytes)
    }

    /// Decode and verify a JSON catalogue document read from `origin`.
    ///
    /// # Errors
    ///
    /// Returns [`StateError::Corrupt`] if the document does not parse or is
    /// internally inconsistent.
    pub fn from_json_slice(bytes: &[u8], origin: &Path) -> error::Result<Self> {
        let doc: CatalogueDocument = serde_json::from_slice(bytes)
            .map_err(|e| StateError::corrupt(origin, format!("invalid catalogue JSON: {e}")))?;

        if doc.schema_version != CATALOGUE_SCHEMA_VERSION {
            return Err(StateError::corrupt(
                origin,
                format!(
                    "unsupported catalogue schema version {} (expected {CATALOGUE_SCHEMA_VERSION})",
                    doc.schema_version
                ),
            ));
        }

        let mut catalogue = Self::new(doc.run_source);
        for (key, record) in doc.batches {
            let mut history = BatchHistory::default();
            for entry in record.history {
                if entry.batch_key != key {
                    return Err(StateError::corrupt(
                        origin,
                        format!("entry for '{}' filed under '{key}'", entry.batch_key),
                    ));
                }
                if let Some(last) = history.entries.last() {
                    if last.run_version >= entry.run_version {
                        return Err(StateError::corrupt(
                            origin,
                            format!("history of '{key}' is not strictly ordered by run version"),
                        ));
                    }
                }
                history.entries.push(entry);
            }
            if history.current() != Some(&record.current) {
                return Err(StateError::corrupt(
                    origin,
                    format!("current entry of '{key}' does not match its history"),
                ));
            }
            catalogue.batches.insert(key, history);
        }
        Ok(catalogue)
    }
}

#[derive(Serialize, Deserialize)]
struct CatalogueDocument {
    schema_version: u32,
    run_source: RunSource,
    batches: BTreeMap<BatchKey, BatchRecord>,
}

#[derive(Serialize, Deserialize)]
struct BatchRecord {
    current: IndexEntry,
    history: Vec<IndexEntry>,
}
