//! Partition scanned batches against the catalogue.

use std::collections::BTreeSet;

use mbatch_state::IndexCatalogue;
use mbatch_types::{Batch, BatchKey, EntryStatus};

/// Reconciliation result. Every scanned batch key appears in exactly one
/// of `new`, `changed` or `unchanged`; `stale` holds catalogue keys the
/// scan did not see. All lists are sorted.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Reconciliation {
    /// Unknown, or known with the same content but no result yet.
    pub new: Vec<BatchKey>,
    /// Content differs from the current catalogue entry.
    pub changed: Vec<BatchKey>,
    /// Same content, already processed.
    pub unchanged: Vec<BatchKey>,
    /// In the catalogue, absent from the scan.
    pub stale: Vec<BatchKey>,
}

impl Reconciliation {
    /// Batches that need dispatching.
    pub fn pending(&self) -> impl Iterator<Item = &BatchKey> {
        self.new.iter().chain(self.changed.iter())
    }
}

/// Classify `scanned` against `catalogue`. Pure and deterministic.
#[must_use]
pub fn reconcile(scanned: &[Batch], catalogue: &IndexCatalogue) -> Reconciliation {
    let mut out = Reconciliation::default();
    let mut seen = BTreeSet::new();

    for batch in scanned {
        if !seen.insert(&batch.batch_key) {
            continue;
        }
        let key = batch.batch_key.clone();
        match catalogue.lookup(&batch.batch_key) {
            None => out.new.push(key),
            Some(entry) if entry.content_fingerprint != batch.content_fingerprint => {
                out.changed.push(key);
            }
            Some(entry) => match entry.status {
                EntryStatus::Processed => out.unchanged.push(key),
                EntryStatus::Stale if entry.has_result() => out.unchanged.push(key),
                EntryStatus::New | EntryStatus::Failed | EntryStatus::Stale => {
                    out.new.push(key);
                }
            },
        }
    }

    out.stale = catalogue
        .keys()
        .filter(|key| !seen.contains(key))
        .cloned()
        .collect();

    out.new.sort();
    out.changed.sort();
    out.unchanged.sort();
    out
}
