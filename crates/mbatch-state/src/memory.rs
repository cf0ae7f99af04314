//! In-memory [`IndexStore`] for tests.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

use mbatch_types::RunSource;

use crate::backend::IndexStore;
use crate::catalogue::IndexCatalogue;
use crate::error::{self, StateError};

/// Keeps the last saved catalogue in a mutex and counts saves.
pub struct MemoryIndexStore {
    run_source: RunSource,
    saved: Mutex<Option<IndexCatalogue>>,
    saves: AtomicUsize,
}

impl MemoryIndexStore {
    #[must_use]
    pub fn new(run_source: RunSource) -> Self {
        Self {
            run_source,
            saved: Mutex::new(None),
            saves: AtomicUsize::new(0),
        }
    }

    /// Number of successful [`IndexStore::save`] calls.
    #[must_use]
    pub fn save_count(&self) -> usize {
        self.saves.load(Ordering::SeqCst)
    }
}

impl IndexStore for MemoryIndexStore {
    fn load(&self) -> error::Result<IndexCatalogue> {
        let guard = self.saved.lock().map_err(|_| StateError::LockPoisoned)?;
        Ok(guard
            .clone()
            .unwrap_or_else(|| IndexCatalogue::new(self.run_source.clone())))
    }

    fn save(&self, catalogue: &IndexCatalogue) -> error::Result<()> {
        let mut guard = self.saved.lock().map_err(|_| StateError::LockPoisoned)?;
        *guard = Some(catalogue.clone());
        self.saves.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn describe(&self) -> String {
        format!("memory:{}", self.run_source)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mbatch_types::{BatchKey, EntryStatus, Fingerprint, IndexEntry, RunVersion};

    #[test]
    fn save_is_visible_to_load() {
        let store = MemoryIndexStore::new(RunSource::new("GDC"));
        assert!(store.load().unwrap().is_empty());

        let mut cat = store.load().unwrap();
        cat.upsert(IndexEntry {
            batch_key: BatchKey::new("A"),
            run_version: RunVersion::new("2024_01_01"),
            status: EntryStatus::New,
            result_location: None,
            content_fingerprint: Fingerprint::new("f"),
            sample_count: None,
            feature_count: None,
            last_processed_at: "t".into(),
            diagnostic: None,
        });
        store.save(&cat).unwrap();

        assert_eq!(store.load().unwrap(), cat);
        assert_eq!(store.save_count(), 1);
        assert_eq!(store.describe(), "memory:GDC");
    }
}
