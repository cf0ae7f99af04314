//! Results tree archiver.
//!
//! Artifacts land in `results_root/<run_source>/<run_version>/<batch_key>/`.
//! They are copied into a staging directory first, the `archive.json`
//! manifest is written last, and the staging directory is renamed into
//! place. A manifest at the destination therefore means the batch is
//! durably archived.

use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use chrono::{SecondsFormat, Utc};
use mbatch_types::{Batch, BatchKey, Fingerprint, RunSource, RunVersion};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use walkdir::WalkDir;

use crate::dispatch::DispatchResult;

/// Manifest written into every archived batch directory.
pub const MANIFEST_FILE: &str = "archive.json";
/// Per-run-version staging area, skipped by the reindexer.
pub const STAGING_DIR: &str = ".staging";
pub const MANIFEST_SCHEMA_VERSION: u32 = 1;

#[derive(Debug, thiserror::Error)]
pub enum ArchiveError {
    #[error("dispatch produced no artifacts: {diagnostic}")]
    NothingToArchive { diagnostic: String },

    #[error("artifact location {} does not exist", path.display())]
    MissingArtifact { path: PathBuf },

    #[error("archive i/o error on {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("invalid manifest {}: {reason}", path.display())]
    Manifest { path: PathBuf, reason: String },
}

impl ArchiveError {
    fn io(path: &Path, source: io::Error) -> Self {
        Self::Io {
            path: path.to_path_buf(),
            source,
        }
    }
}

/// Contents of `archive.json`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArchiveManifest {
    pub schema_version: u32,
    pub batch_key: BatchKey,
    pub run_source: RunSource,
    pub run_version: RunVersion,
    pub source_tag: String,
    pub id_column: String,
    pub content_fingerprint: Fingerprint,
    pub sample_count: usize,
    /// Absent in manifests written before feature rows were counted.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub feature_count: Option<usize>,
    pub archived_at: String,
    /// Archived files relative to the batch directory.
    pub artifacts: Vec<String>,
}

/// A batch found durably archived in the results tree.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArchivedBatch {
    pub location: PathBuf,
    pub manifest: ArchiveManifest,
}

/// Archives dispatch artifacts for one run.
#[derive(Debug, Clone)]
pub struct ResultArchiver {
    results_root: PathBuf,
    run_source: RunSource,
    run_version: RunVersion,
}

impl ResultArchiver {
    #[must_use]
    pub fn new(results_root: impl Into<PathBuf>, run_source: RunSource, run_version: RunVersion) -> Self {
        Self {
            results_root: results_root.into(),
            run_source,
            run_version,
        }
    }

    fn version_dir(&self) -> PathBuf {
        self.results_root
            .join(self.run_source.as_str())
            .join(self.run_version.as_str())
    }

    /// Final location of `batch_key` for this run.
    #[must_use]
    pub fn destination(&self, batch_key: &BatchKey) -> PathBuf {
        batch_key
            .components()
            .fold(self.version_dir(), |dir, part| dir.join(part))
    }

    /// Archive the outcome of dispatching `batch`.
    ///
    /// # Errors
    ///
    /// Returns [`ArchiveError`] for a failed dispatch, a missing artifact
    /// location, or any local I/O failure. Nothing is left at the
    /// destination on failure.
    pub fn archive(&self, batch: &Batch, result: &DispatchResult) -> Result<ArchivedBatch, ArchiveError> {
        match result {
            DispatchResult::Success { artifact_location } => {
                self.archive_artifacts(batch, artifact_location)
            }
            DispatchResult::AlreadyProcessed { result_location } => Ok(ArchivedBatch {
                location: result_location.clone(),
                manifest: read_manifest(result_location)?,
            }),
            DispatchResult::Failure { diagnostic, .. } => Err(ArchiveError::NothingToArchive {
                diagnostic: diagnostic.clone(),
            }),
        }
    }

    fn archive_artifacts(&self, batch: &Batch, source: &Path) -> Result<ArchivedBatch, ArchiveError> {
        if !source.exists() {
            return Err(ArchiveError::MissingArtifact {
                path: source.to_path_buf(),
            });
        }

        let staging_root = self.version_dir().join(STAGING_DIR);
        let stage_name = staging_name(&batch.batch_key);
        let staging = staging_root.join(&stage_name);
        if staging.exists() {
            fs::remove_dir_all(&staging).map_err(|e| ArchiveError::io(&staging, e))?;
        }

        let staged = self.stage(batch, source, &staging);
        let manifest = match staged {
            Ok(manifest) => manifest,
            Err(e) => {
                let _ = fs::remove_dir_all(&staging);
                return Err(e);
            }
        };

        let destination = self.destination(&batch.batch_key);
        if let Err(e) = promote(&staging, &destination, &staging_root.join(format!("{stage_name}.replaced"))) {
            let _ = fs::remove_dir_all(&staging);
            return Err(e);
        }

        tracing::info!(
            batch_key = %batch.batch_key,
            destination = %destination.display(),
            artifacts = manifest.artifacts.len(),
            "Archived batch results"
        );
        Ok(ArchivedBatch {
            location: destination,
            manifest,
        })
    }

    fn stage(&self, batch: &Batch, source: &Path, staging: &Path) -> Result<ArchiveManifest, ArchiveError> {
        fs::create_dir_all(staging).map_err(|e| ArchiveError::io(staging, e))?;
        let artifacts = copy_tree(source, staging)?;

        let manifest = ArchiveManifest {
            schema_version: MANIFEST_SCHEMA_VERSION,
            batch_key: batch.batch_key.clone(),
            run_source: self.run_source.clone(),
            run_version: self.run_version.clone(),
            source_tag: batch.source_tag.clone(),
            id_column: batch.id_column.clone(),
            content_fingerprint: batch.content_fingerprint.clone(),
            sample_count: batch.sample_count(),
            feature_count: Some(batch.feature_count),
            archived_at: Utc::now().to_rfc3339_opts(SecondsFormat::Secs, true),
            artifacts,
        };
        let path = staging.join(MANIFEST_FILE);
        let bytes = serde_json::to_vec_pretty(&manifest).map_err(|e| ArchiveError::Manifest {
            path: path.clone(),
            reason: e.to_string(),
        })?;
        let mut file = fs::File::create(&path).map_err(|e| ArchiveError::io(&path, e))?;
        file.write_all(&bytes).map_err(|e| ArchiveError::io(&path, e))?;
        file.sync_all().map_err(|e| ArchiveError::io(&path, e))?;
        Ok(manifest)
    }
}

/// Collision-free staging directory name for `batch_key`.
fn staging_name(batch_key: &BatchKey) -> String {
    format!("{:x}", Sha256::digest(batch_key.as_str().as_bytes()))
}

/// Copy a file or directory tree into `dest`, returning the relative paths
/// of copied files in walk order.
fn copy_tree(source: &Path, dest: &Path) -> Result<Vec<String>, ArchiveError> {
    if source.is_file() {
        let name = source.file_name().map(PathBuf::from).unwrap_or_else(|| PathBuf::from("artifact"));
        fs::copy(source, dest.join(&name)).map_err(|e| ArchiveError::io(source, e))?;
        return Ok(vec![name.to_string_lossy().into_owned()]);
    }

    let mut artifacts = Vec::new();
    for entry in WalkDir::new(source).min_depth(1).sort_by_file_name() {
        let entry = entry.map_err(|e| {
            let path = e.path().map_or_else(|| source.to_path_buf(), Path::to_path_buf);
            ArchiveError::io(&path, e.into())
        })?;
        let relative = entry.path().strip_prefix(source).unwrap_or(entry.path());
        if relative == Path::new(MANIFEST_FILE) {
            continue;
        }
        let target = dest.join(relative);
        if entry.file_type().is_dir() {
            fs::create_dir_all(&target).map_err(|e| ArchiveError::io(&target, e))?;
        } else {
            fs::copy(entry.path(), &target).map_err(|e| ArchiveError::io(entry.path(), e))?;
            let rel: Vec<_> = relative
                .components()
                .map(|c| c.as_os_str().to_string_lossy().into_owned())
                .collect();
            artifacts.push(rel.join("/"));
        }
    }
    Ok(artifacts)
}

/// Rename `staging` to `destination`, moving any previous copy aside first.
fn promote(staging: &Path, destination: &Path, aside: &Path) -> Result<(), ArchiveError> {
    if let Some(parent) = destination.parent() {
        fs::create_dir_all(parent).map_err(|e| ArchiveError::io(parent, e))?;
    }
    let replacing = destination.exists();
    if replacing {
        if aside.exists() {
            fs::remove_dir_all(aside).map_err(|e| ArchiveError::io(aside, e))?;
        }
        fs::rename(destination, aside).map_err(|e| ArchiveError::io(destination, e))?;
    }
    if let Err(e) = fs::rename(staging, destination) {
        if replacing {
            let _ = fs::rename(aside, destination);
        }
        return Err(ArchiveError::io(destination, e));
    }
    if replacing {
        let _ = fs::remove_dir_all(aside);
    }
    Ok(())
}

/// Read the manifest of an archived batch directory.
///
/// # Errors
///
/// Returns [`ArchiveError`] if the manifest is missing or unparsable.
pub fn read_manifest(dir: &Path) -> Result<ArchiveManifest, ArchiveError> {
    let path = dir.join(MANIFEST_FILE);
    let bytes = fs::read(&path).map_err(|e| ArchiveError::io(&path, e))?;
    let manifest: ArchiveManifest =
        serde_json::from_slice(&bytes).map_err(|e| ArchiveError::Manifest {
            path: path.clone(),
            reason: e.to_string(),
        })?;
    if manifest.schema_version != MANIFEST_SCHEMA_VERSION {
        return Err(ArchiveError::Manifest {
            path,
            reason: format!("unsupported schema version {}", manifest.schema_version),
        });
    }
    Ok(manifest)
}

/// Latest run version under `results_root/<run_source>` holding an archive
/// of `batch` with the same fingerprint.
#[must_use]
pub fn find_existing(results_root: &Path, run_source: &RunSource, batch: &Batch) -> Option<ArchivedBatch> {
    let source_dir = results_root.join(run_source.as_str());
    let mut versions: Vec<String> = fs::read_dir(&source_dir)
        .ok()?
        .filter_map(Result::ok)
        .filter(|e| e.file_type().is_ok_and(|t| t.is_dir()))
        .map(|e| e.file_name().to_string_lossy().into_owned())
        .filter(|name| !name.starts_with('.'))
        .collect();
    versions.sort_unstable_by(|a, b| b.cmp(a));

    versions.into_iter().find_map(|version| {
        let location = batch
            .batch_key
            .components()
            .fold(source_dir.join(&version), |dir, part| dir.join(part));
        let manifest = read_manifest(&location).ok()?;
        (manifest.batch_key == batch.batch_key
            && manifest.content_fingerprint == batch.content_fingerprint)
            .then_some(ArchivedBatch { location, manifest })
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeSet;

    fn batch(key: &str, fp: &str) -> Batch {
        Batch {
            source_tag: key.split('/').next().unwrap_or_default().to_string(),
            run_source: RunSource::new("GDC"),
            id_column: "aliquot_barcode".into(),
            batch_key: BatchKey::new(key),
            sample_identifiers: ["s1", "s2"].iter().map(ToString::to_string).collect::<BTreeSet<_>>(),
            feature_count: 2,
            data_file_paths: vec![],
            content_fingerprint: Fingerprint::new(fp),
            usable: true,
        }
    }

    fn artifacts(dir: &Path) -> PathBuf {
        let out = dir.join("service-out/job-1");
        fs::create_dir_all(out.join("plots")).unwrap();
        fs::write(out.join("summary.tsv"), "metric\tvalue\nDSC\t0.4\n").unwrap();
        fs::write(out.join("plots/pca.png"), b"\x89PNG").unwrap();
        out
    }

    fn archiver(root: &Path, version: &str) -> ResultArchiver {
        ResultArchiver::new(root, RunSource::new("GDC"), RunVersion::new(version))
    }

    #[test]
    fn archives_into_versioned_tree_with_manifest() {
        let dir = tempfile::tempdir().unwrap();
        let results = dir.path().join("results");
        let source = artifacts(dir.path());

        let archived = archiver(&results, "2024_01_01")
            .archive(
                &batch("TCGA-BRCA/rna", "f1"),
                &DispatchResult::Success {
                    artifact_location: source,
                },
            )
            .unwrap();

        assert_eq!(archived.location, results.join("GDC/2024_01_01/TCGA-BRCA/rna"));
        assert!(archived.location.join("plots/pca.png").exists());
        assert_eq!(archived.manifest.artifacts, ["plots/pca.png", "summary.tsv"]);
        assert_eq!(archived.manifest.sample_count, 2);
        assert_eq!(archived.manifest.feature_count, Some(2));
        assert_eq!(read_manifest(&archived.location).unwrap(), archived.manifest);
        let staging = results.join("GDC/2024_01_01").join(STAGING_DIR);
        assert_eq!(fs::read_dir(staging).unwrap().count(), 0);
    }

    #[test]
    fn rearchive_replaces_previous_copy() {
        let dir = tempfile::tempdir().unwrap();
        let results = dir.path().join("results");
        let source = artifacts(dir.path());
        let a = archiver(&results, "2024_01_01");
        let success = DispatchResult::Success {
            artifact_location: source.clone(),
        };
        a.archive(&batch("A", "f1"), &success).unwrap();
        fs::remove_file(source.join("plots/pca.png")).unwrap();

        let again = a.archive(&batch("A", "f2"), &success).unwrap();
        assert!(!again.location.join("plots/pca.png").exists());
        assert_eq!(again.manifest.content_fingerprint.as_str(), "f2");
    }

    #[test]
    fn staging_names_do_not_collide() {
        assert_ne!(
            staging_name(&BatchKey::new("a__b")),
            staging_name(&BatchKey::new("a/b"))
        );
        assert_eq!(staging_name(&BatchKey::new("a/b")).len(), 64);
    }

    #[test]
    fn missing_artifact_is_archive_error() {
        let dir = tempfile::tempdir().unwrap();
        let err = archiver(dir.path(), "2024_01_01")
            .archive(
                &batch("A", "f1"),
                &DispatchResult::Success {
                    artifact_location: dir.path().join("gone"),
                },
            )
            .unwrap_err();
        assert!(matches!(err, ArchiveError::MissingArtifact { .. }));
        assert!(!dir.path().join("GDC/2024_01_01/A").exists());
    }

    #[test]
    fn failed_dispatch_has_nothing_to_archive() {
        let dir = tempfile::tempdir().unwrap();
        let err = archiver(dir.path(), "2024_01_01")
            .archive(
                &batch("A", "f1"),
                &DispatchResult::Failure {
                    diagnostic: "boom".into(),
                    retryable: false,
                },
            )
            .unwrap_err();
        assert!(err.to_string().contains("boom"));
    }

    #[test]
    fn single_file_artifact_is_copied() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("result.zip");
        fs::write(&file, b"PK").unwrap();
        let archived = archiver(&dir.path().join("r"), "2024_01_01")
            .archive(
                &batch("A", "f1"),
                &DispatchResult::Success {
                    artifact_location: file,
                },
            )
            .unwrap();
        assert_eq!(archived.manifest.artifacts, ["result.zip"]);
    }

    #[test]
    fn find_existing_prefers_latest_matching_version() {
        let dir = tempfile::tempdir().unwrap();
        let results = dir.path().join("results");
        let source = artifacts(dir.path());
        let success = DispatchResult::Success {
            artifact_location: source,
        };
        archiver(&results, "2024_01_01").archive(&batch("A", "f1"), &success).unwrap();
        archiver(&results, "2024_02_01").archive(&batch("A", "f1"), &success).unwrap();
        archiver(&results, "2024_03_01").archive(&batch("A", "f9"), &success).unwrap();

        let found = find_existing(&results, &RunSource::new("GDC"), &batch("A", "f1")).unwrap();
        assert_eq!(found.manifest.run_version.as_str(), "2024_02_01");
        assert!(find_existing(&results, &RunSource::new("GDC"), &batch("B", "f1")).is_none());
        assert!(find_existing(&results, &RunSource::new("MWB"), &batch("A", "f1")).is_none());
    }
}
