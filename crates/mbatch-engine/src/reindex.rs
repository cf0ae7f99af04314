//! Rebuild the catalogue from archived results on disk.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use mbatch_state::{atomic, FileIndexStore, IndexCatalogue, IndexPaths, IndexStore};
use mbatch_types::{EntryStatus, IndexEntry, RunSource};
use walkdir::WalkDir;

use crate::archive::{read_manifest, MANIFEST_FILE, STAGING_DIR};
use crate::report::RunReport;

/// Walk `results_root/<run_source>` for archive manifests and build a
/// catalogue of PROCESSED entries. Any persisted catalogue is ignored.
///
/// # Errors
///
/// Fails if the results tree cannot be traversed. Unreadable or misplaced
/// manifests are skipped with a warning instead.
pub fn scan_results(
    results_root: &Path,
    run_source: &RunSource,
    report: &mut RunReport,
) -> Result<IndexCatalogue> {
    let source_dir = results_root.join(run_source.as_str());
    let mut catalogue = IndexCatalogue::new(run_source.clone());
    if !source_dir.exists() {
        report.warning(
            format!("no results for {run_source} under {}", results_root.display()),
            None,
        );
        return Ok(catalogue);
    }

    let walker = WalkDir::new(&source_dir)
        .sort_by_file_name()
        .into_iter()
        .filter_entry(|e| e.file_name() != STAGING_DIR);
    for entry in walker {
        let entry = entry
            .with_context(|| format!("Failed to traverse results tree {}", source_dir.display()))?;
        if !entry.file_type().is_file() || entry.file_name() != MANIFEST_FILE {
            continue;
        }
        let Some(dir) = entry.path().parent() else {
            continue;
        };
        match entry_from_archive(&source_dir, dir, run_source) {
            Ok(index_entry) => {
                catalogue.upsert(index_entry);
            }
            Err(reason) => report.warning(
                format!("skipping archive {}: {reason}", dir.display()),
                None,
            ),
        }
    }

    tracing::info!(
        run_source = %run_source,
        batches = catalogue.len(),
        "Rebuilt catalogue from results tree"
    );
    Ok(catalogue)
}

fn entry_from_archive(source_dir: &Path, dir: &Path, run_source: &RunSource) -> Result<IndexEntry, String> {
    let manifest = read_manifest(dir).map_err(|e| e.to_string())?;
    let relative: Vec<String> = dir
        .strip_prefix(source_dir)
        .map_err(|e| e.to_string())?
        .components()
        .map(|c| c.as_os_str().to_string_lossy().into_owned())
        .collect();
    let Some((version, key_parts)) = relative.split_first() else {
        return Err("manifest outside any run version directory".into());
    };

    if &manifest.run_source != run_source {
        return Err(format!("manifest run source is '{}'", manifest.run_source));
    }
    if manifest.run_version.as_str() != version {
        return Err(format!(
            "manifest run version '{}' does not match directory '{version}'",
            manifest.run_version
        ));
    }
    if manifest.batch_key.as_str() != key_parts.join("/") {
        return Err(format!(
            "manifest batch key '{}' does not match its location",
            manifest.batch_key
        ));
    }

    Ok(IndexEntry {
        batch_key: manifest.batch_key,
        run_version: manifest.run_version,
        status: EntryStatus::Processed,
        result_location: Some(dir.to_path_buf()),
        content_fingerprint: manifest.content_fingerprint,
        sample_count: Some(manifest.sample_count),
        feature_count: manifest.feature_count,
        last_processed_at: manifest.archived_at,
        diagnostic: None,
    })
}

/// Where the rebuilt index went and where the old one was kept.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SwapOutcome {
    /// Previous index files, renamed with the version suffix.
    pub backups: Vec<PathBuf>,
}

fn with_suffix(path: &Path, suffix: &str) -> PathBuf {
    let mut name = path.file_name().map(|n| n.to_os_string()).unwrap_or_default();
    name.push(suffix);
    path.with_file_name(name)
}

/// Stage `catalogue` in `temp_dir`, verify it, copy the live index files
/// to backups with `version_suffix` appended, and atomically replace them.
///
/// The live files are never absent: each is replaced by a rename in its own
/// directory, catalogue first.
///
/// # Errors
///
/// Fails if `temp_dir` holds the live files, if a backup with this suffix
/// already exists, or if staging, verification, backup, or the swap fails.
/// The live files are untouched unless the swap itself fails.
pub fn install(
    catalogue: &IndexCatalogue,
    live: &IndexPaths,
    temp_dir: &Path,
    version_suffix: &str,
) -> Result<SwapOutcome> {
    let file_name = |p: &Path| p.file_name().map(PathBuf::from).unwrap_or_default();
    let staged = IndexPaths {
        tabular: temp_dir.join(file_name(&live.tabular)),
        catalogue: temp_dir.join(file_name(&live.catalogue)),
    };
    anyhow::ensure!(
        staged.tabular != live.tabular && staged.catalogue != live.catalogue,
        "Reindex temp_dir {} must not be the index directory",
        temp_dir.display()
    );

    let pending: Vec<(&PathBuf, PathBuf)> = [&live.catalogue, &live.tabular]
        .into_iter()
        .filter(|path| path.exists())
        .map(|path| (path, with_suffix(path, version_suffix)))
        .collect();
    for (_, backup) in &pending {
        anyhow::ensure!(
            !backup.exists(),
            "Backup {} already exists; use a different reindex.version_suffix",
            backup.display()
        );
    }

    let staged_store = FileIndexStore::new(staged.clone(), catalogue.run_source().clone());
    staged_store
        .save(catalogue)
        .with_context(|| format!("Failed to stage rebuilt index in {}", temp_dir.display()))?;
    let reloaded = staged_store
        .load()
        .context("Rebuilt index failed verification")?;
    anyhow::ensure!(
        &reloaded == catalogue && staged_store.take_warnings().is_empty(),
        "Rebuilt index failed verification: staged files do not match"
    );

    let mut backups = Vec::new();
    for (path, backup) in pending {
        atomic::copy_atomic(path, &backup).with_context(|| {
            format!("Failed to back up {} to {}", path.display(), backup.display())
        })?;
        backups.push(backup);
    }

    // Catalogue first, tabular last, matching the store's commit order.
    for (from, to) in [(&staged.catalogue, &live.catalogue), (&staged.tabular, &live.tabular)] {
        atomic::copy_atomic(from, to)
            .with_context(|| format!("Failed to install {}", to.display()))?;
        let _ = fs::remove_file(from);
    }

    tracing::info!(
        catalogue = %live.catalogue.display(),
        backups = backups.len(),
        "Installed rebuilt index"
    );
    Ok(SwapOutcome { backups })
}

/// Rebuild the index of `run_source` from `results_root` and install it
/// over `live`, keeping the previous files under `version_suffix`.
///
/// # Errors
///
/// See [`scan_results`] and [`install`].
pub fn rebuild(
    results_root: &Path,
    run_source: &RunSource,
    live: &IndexPaths,
    temp_dir: &Path,
    version_suffix: &str,
    report: &mut RunReport,
) -> Result<(IndexCatalogue, SwapOutcome)> {
    let catalogue = scan_results(results_root, run_source, report)?;
    let swap = install(&catalogue, live, temp_dir, version_suffix)?;
    Ok((catalogue, swap))
}

#[cfg(test)]
mod tests {
    use super::*;
    use mbatch_types::{Batch, BatchKey, Fingerprint, RunVersion};

    use crate::archive::ResultArchiver;
    use crate::dispatch::DispatchResult;

    fn archive(results: &Path, version: &str, key: &str, fp: &str, artifacts: &Path) {
        let batch = Batch {
            source_tag: key.split('/').next().unwrap_or_default().to_string(),
            run_source: RunSource::new("GDC"),
            id_column: "aliquot_barcode".into(),
            batch_key: BatchKey::new(key),
            sample_identifiers: ["s1", "s2"].iter().map(ToString::to_string).collect(),
            feature_count: 2,
            data_file_paths: vec![],
            content_fingerprint: Fingerprint::new(fp),
            usable: true,
        };
        ResultArchiver::new(results, RunSource::new("GDC"), RunVersion::new(version))
            .archive(
                &batch,
                &DispatchResult::Success {
                    artifact_location: artifacts.to_path_buf(),
                },
            )
            .unwrap();
    }

    fn artifacts(dir: &Path) -> PathBuf {
        let out = dir.join("out");
        fs::create_dir_all(&out).unwrap();
        fs::write(out.join("summary.tsv"), "x").unwrap();
        out
    }

    #[test]
    fn rebuilds_history_from_manifests() {
        let dir = tempfile::tempdir().unwrap();
        let results = dir.path().join("results");
        let out = artifacts(dir.path());
        archive(&results, "2024_01_01", "P1/rna", "f1", &out);
        archive(&results, "2024_02_01", "P1/rna", "f2", &out);
        archive(&results, "2024_01_01", "P2", "g1", &out);

        let mut report = RunReport::new();
        let cat = scan_results(&results, &RunSource::new("GDC"), &mut report).unwrap();
        assert!(report.is_empty());
        assert_eq!(cat.len(), 2);
        let history = cat.history(&BatchKey::new("P1/rna"));
        assert_eq!(history.len(), 2);
        assert_eq!(history[1].content_fingerprint.as_str(), "f2");
        assert!(cat.current_entries().all(|e| e.status == EntryStatus::Processed));
    }

    #[test]
    fn corrupt_manifest_is_skipped_with_warning() {
        let dir = tempfile::tempdir().unwrap();
        let results = dir.path().join("results");
        let out = artifacts(dir.path());
        archive(&results, "2024_01_01", "P1", "f1", &out);
        let bad = results.join("GDC/2024_01_01/P2");
        fs::create_dir_all(&bad).unwrap();
        fs::write(bad.join(MANIFEST_FILE), "{ not json").unwrap();

        let mut report = RunReport::new();
        let cat = scan_results(&results, &RunSource::new("GDC"), &mut report).unwrap();
        assert_eq!(cat.len(), 1);
        assert_eq!(report.drain().len(), 1);
    }

    #[test]
    fn rebuild_replaces_index_with_results_tree() {
        let dir = tempfile::tempdir().unwrap();
        let results = dir.path().join("results");
        let out = artifacts(dir.path());
        archive(&results, "2024_01_01", "P1", "f1", &out);
        let live = IndexPaths {
            tabular: dir.path().join("idx/index.tsv"),
            catalogue: dir.path().join("idx/catalogue.json"),
        };

        let mut report = RunReport::new();
        let (cat, swap) = rebuild(
            &results,
            &RunSource::new("GDC"),
            &live,
            &dir.path().join("tmp"),
            "_REINDEX_X",
            &mut report,
        )
        .unwrap();

        assert!(swap.backups.is_empty());
        let store = FileIndexStore::new(live, RunSource::new("GDC"));
        assert_eq!(store.load().unwrap(), cat);
        assert_eq!(cat.len(), 1);
    }

    #[test]
    fn install_backs_up_live_files() {
        let dir = tempfile::tempdir().unwrap();
        let live = IndexPaths {
            tabular: dir.path().join("idx/index.tsv"),
            catalogue: dir.path().join("idx/catalogue.json"),
        };
        fs::create_dir_all(dir.path().join("idx")).unwrap();
        fs::write(&live.tabular, "old tsv").unwrap();
        fs::write(&live.catalogue, "old json").unwrap();
        let temp = dir.path().join("tmp");

        let cat = IndexCatalogue::new(RunSource::new("GDC"));
        let outcome = install(&cat, &live, &temp, "_REINDEX_2024_01_03").unwrap();

        assert_eq!(outcome.backups.len(), 2);
        assert_eq!(
            fs::read_to_string(dir.path().join("idx/catalogue.json_REINDEX_2024_01_03")).unwrap(),
            "old json"
        );
        let store = FileIndexStore::new(live, RunSource::new("GDC"));
        assert!(store.load().unwrap().is_empty());
        assert!(store.take_warnings().is_empty());
        assert_eq!(fs::read_dir(&temp).unwrap().count(), 0);
    }

    #[test]
    fn install_refuses_to_overwrite_backup() {
        let dir = tempfile::tempdir().unwrap();
        let live = IndexPaths {
            tabular: dir.path().join("idx/index.tsv"),
            catalogue: dir.path().join("idx/catalogue.json"),
        };
        fs::create_dir_all(dir.path().join("idx")).unwrap();
        fs::write(&live.catalogue, "live json").unwrap();
        fs::write(dir.path().join("idx/catalogue.json_R1"), "first backup").unwrap();

        let cat = IndexCatalogue::new(RunSource::new("GDC"));
        let err = install(&cat, &live, &dir.path().join("tmp"), "_R1").unwrap_err();

        assert!(err.to_string().contains("already exists"), "got: {err}");
        assert_eq!(fs::read_to_string(&live.catalogue).unwrap(), "live json");
        assert_eq!(
            fs::read_to_string(dir.path().join("idx/catalogue.json_R1")).unwrap(),
            "first backup"
        );
    }

    #[test]
    fn install_refuses_temp_dir_holding_live_files() {
        let dir = tempfile::tempdir().unwrap();
        let idx = dir.path().join("idx");
        let live = IndexPaths {
            tabular: idx.join("index.tsv"),
            catalogue: idx.join("catalogue.json"),
        };
        fs::create_dir_all(&idx).unwrap();
        fs::write(&live.tabular, "live tsv").unwrap();
        fs::write(&live.catalogue, "live json").unwrap();

        let cat = IndexCatalogue::new(RunSource::new("GDC"));
        assert!(install(&cat, &live, &idx, "_R1").is_err());

        assert_eq!(fs::read_to_string(&live.catalogue).unwrap(), "live json");
        assert_eq!(fs::read_to_string(&live.tabular).unwrap(), "live tsv");
    }
}
