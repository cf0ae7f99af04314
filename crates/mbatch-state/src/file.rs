//! File-backed implementation of [`IndexStore`].
//!
//! The catalogue is persisted twice: a flat TSV index for humans and
//! spreadsheet tools, and a JSON catalogue for downstream viewers. The JSON
//! form is authoritative and is written first, so it is the commit point of
//! every save. The TSV is derived from it; a stale, garbled or missing TSV
//! is reported as a load warning and rewritten on the next save.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use mbatch_types::RunSource;

use crate::atomic::write_atomic;
use crate::backend::IndexStore;
use crate::catalogue::IndexCatalogue;
use crate::error::{self, StateError};
use crate::tabular;

/// Locations of the two persisted forms.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IndexPaths {
    /// Flat tab-separated index.
    pub tabular: PathBuf,
    /// Hierarchical JSON catalogue.
    pub catalogue: PathBuf,
}

/// File-backed index store for one run source.
pub struct FileIndexStore {
    paths: IndexPaths,
    run_source: RunSource,
    warnings: Mutex<Vec<String>>,
}

impl FileIndexStore {
    #[must_use]
    pub fn new(paths: IndexPaths, run_source: RunSource) -> Self {
        Self {
            paths,
            run_source,
            warnings: Mutex::new(Vec::new()),
        }
    }

    #[must_use]
    pub fn paths(&self) -> &IndexPaths {
        &self.paths
    }

    fn read_optional(path: &Path) -> error::Result<Option<Vec<u8>>> {
        match fs::read(path) {
            Ok(bytes) => Ok(Some(bytes)),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(StateError::io(path, e)),
        }
    }

    fn load_catalogue(&self) -> error::Result<IndexCatalogue> {
        let json = Self::read_optional(&self.paths.catalogue)?;
        let tsv = Self::read_optional(&self.paths.tabular)?;

        let Some(json) = json else {
            // A populated tabular index without its catalogue cannot be trusted.
            if let Some(tsv) = tsv {
                let text = String::from_utf8_lossy(&tsv);
                if text.lines().skip(1).any(|l| !l.is_empty()) {
                    return Err(StateError::corrupt(
                        &self.paths.catalogue,
                        "catalogue missing while tabular index has entries",
                    ));
                }
            }
            return Ok(IndexCatalogue::new(self.run_source.clone()));
        };

        let catalogue = IndexCatalogue::from_json_slice(&json, &self.paths.catalogue)?;
        if catalogue.run_source() != &self.run_source {
            return Err(StateError::corrupt(
                &self.paths.catalogue,
                format!(
                    "catalogue belongs to run source '{}', expected '{}'",
                    catalogue.run_source(),
                    self.run_source
                ),
            ));
        }

        if let Some(problem) = self.check_tabular(tsv, &catalogue) {
            tracing::warn!(
                tabular = %self.paths.tabular.display(),
                problem = %problem,
                "Tabular index out of step with catalogue"
            );
            self.warn(format!(
                "{} {problem}; it will be regenerated from {}",
                self.paths.tabular.display(),
                self.paths.catalogue.display()
            ));
        }
        Ok(catalogue)
    }

    /// Why the persisted TSV does not match `catalogue`, if it does not.
    fn check_tabular(&self, tsv: Option<Vec<u8>>, catalogue: &IndexCatalogue) -> Option<String> {
        let Some(tsv) = tsv else {
            return Some("is missing".into());
        };
        let Ok(text) = String::from_utf8(tsv) else {
            return Some("is not UTF-8".into());
        };
        match tabular::decode(&text, self.run_source.clone(), &self.paths.tabular) {
            Ok(flat) if &flat == catalogue => None,
            Ok(_) => Some("disagrees with the catalogue".into()),
            Err(e) => Some(format!("is unreadable ({e})")),
        }
    }

    fn warn(&self, message: String) {
        if let Ok(mut warnings) = self.warnings.lock() {
            warnings.push(message);
        }
    }
}

impl IndexStore for FileIndexStore {
    fn load(&self) -> error::Result<IndexCatalogue> {
        let catalogue = self.load_catalogue()?;
        tracing::debug!(
            store = %self.describe(),
            batches = catalogue.len(),
            "Loaded index catalogue"
        );
        Ok(catalogue)
    }

    fn save(&self, catalogue: &IndexCatalogue) -> error::Result<()> {
        let tsv = tabular::encode(catalogue);
        let json = catalogue.to_json_bytes()?;
        write_atomic(&self.paths.catalogue, &json)?;
        write_atomic(&self.paths.tabular, tsv.as_bytes())?;
        tracing::debug!(
            store = %self.describe(),
            batches = catalogue.len(),
            "Saved index catalogue"
        );
        Ok(())
    }

    fn take_warnings(&self) -> Vec<String> {
        self.warnings
            .lock()
            .map(|mut w| std::mem::take(&mut *w))
            .unwrap_or_default()
    }

    fn describe(&self) -> String {
        format!(
            "{} + {}",
            self.paths.catalogue.display(),
            self.paths.tabular.display()
        )
    }
}
