//! Source tree scanner.
//!
//! A batch directory is any directory under the source root that contains
//! a `matrix.tsv`. Its path relative to the root, joined with `/`, is the
//! batch key. Samples come from the `batches.tsv` column named by the
//! configured id column, falling back to the matrix header. A batch
//! directory nested inside another batch directory is skipped with a
//! warning, so archived results never nest either.
//!
//! Scanning is all-or-nothing: any traversal or read failure discards the
//! partial result.

use std::collections::BTreeSet;
use std::fs::{self, File};
use std::io::{self, BufRead, BufReader, Read};
use std::path::{Path, PathBuf};
use std::time::UNIX_EPOCH;

use mbatch_types::{Batch, BatchKey, Fingerprint, RunSource};
use sha2::{Digest, Sha256};
use walkdir::WalkDir;

use crate::config::types::FingerprintMode;
use crate::report::RunReport;

/// Data matrix marking a batch directory.
pub const MATRIX_FILE: &str = "matrix.tsv";
/// Optional per-sample batch information.
pub const BATCHES_FILE: &str = "batches.tsv";

/// Scan failures. Any of these aborts the run.
#[derive(Debug, thiserror::Error)]
pub enum ScanError {
    #[error("source root {} does not exist", path.display())]
    RootMissing { path: PathBuf },

    #[error("source root {} is not a directory", path.display())]
    NotADirectory { path: PathBuf },

    #[error("cannot traverse source tree at {}: {source}", path.display())]
    Walk {
        path: PathBuf,
        #[source]
        source: walkdir::Error,
    },

    #[error("cannot read {}: {source}", path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

impl ScanError {
    fn read(path: &Path, source: io::Error) -> Self {
        Self::Read {
            path: path.to_path_buf(),
            source,
        }
    }
}

/// Discovers batches under one source root.
#[derive(Debug, Clone)]
pub struct SourceScanner {
    root: PathBuf,
    id_column: String,
    run_source: RunSource,
    fingerprint_mode: FingerprintMode,
}

impl SourceScanner {
    #[must_use]
    pub fn new(
        root: impl Into<PathBuf>,
        id_column: impl Into<String>,
        run_source: RunSource,
        fingerprint_mode: FingerprintMode,
    ) -> Self {
        Self {
            root: root.into(),
            id_column: id_column.into(),
            run_source,
            fingerprint_mode,
        }
    }

    /// Scan the tree and return its batches ordered by batch key.
    ///
    /// # Errors
    ///
    /// Returns [`ScanError`] if the root is missing or not a directory, or
    /// if any directory or file cannot be read.
    pub fn scan(&self, report: &mut RunReport) -> Result<Vec<Batch>, ScanError> {
        match fs::metadata(&self.root) {
            Ok(meta) if meta.is_dir() => {}
            Ok(_) => {
                return Err(ScanError::NotADirectory {
                    path: self.root.clone(),
                })
            }
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                return Err(ScanError::RootMissing {
                    path: self.root.clone(),
                })
            }
            Err(e) => return Err(ScanError::read(&self.root, e)),
        }

        let mut batch_dirs = Vec::new();
        for entry in WalkDir::new(&self.root).sort_by_file_name() {
            let entry = entry.map_err(|e| ScanError::Walk {
                path: e.path().map_or_else(|| self.root.clone(), Path::to_path_buf),
                source: e,
            })?;
            if !entry.file_type().is_file() || entry.file_name() != MATRIX_FILE {
                continue;
            }
            let Some(dir) = entry.path().parent() else {
                continue;
            };
            if dir == self.root {
                report.warning(
                    format!(
                        "{MATRIX_FILE} directly in source root {} ignored; batches must live in subdirectories",
                        self.root.display()
                    ),
                    None,
                );
                continue;
            }
            batch_dirs.push(dir.to_path_buf());
        }

        let known: BTreeSet<&Path> = batch_dirs.iter().map(PathBuf::as_path).collect();
        let mut batches = Vec::new();
        for dir in &batch_dirs {
            let enclosing = dir
                .ancestors()
                .skip(1)
                .take_while(|a| *a != self.root.as_path())
                .find(|a| known.contains(a));
            if let Some(outer) = enclosing {
                report.warning(
                    format!(
                        "batch directory {} is nested inside batch directory {}; skipped",
                        dir.display(),
                        outer.display()
                    ),
                    None,
                );
                continue;
            }
            batches.push(self.build_batch(dir, report)?);
        }

        batches.sort_by(|a, b| a.batch_key.cmp(&b.batch_key));
        tracing::info!(
            root = %self.root.display(),
            batches = batches.len(),
            "Scanned source tree"
        );
        Ok(batches)
    }

    fn build_batch(&self, dir: &Path, report: &mut RunReport) -> Result<Batch, ScanError> {
        let components: Vec<String> = dir
            .strip_prefix(&self.root)
            .unwrap_or(dir)
            .components()
            .map(|c| c.as_os_str().to_string_lossy().into_owned())
            .collect();
        let batch_key = BatchKey::new(components.join("/"));
        let source_tag = components.first().cloned().unwrap_or_default();

        let data_file_paths = list_data_files(dir)?;
        let shape = read_matrix_shape(&dir.join(MATRIX_FILE))?;
        let sample_identifiers =
            match read_batch_samples(&dir.join(BATCHES_FILE), &self.id_column)? {
                BatchSamples::Found(samples) => samples,
                BatchSamples::MissingColumn => {
                    report.warning(
                        format!(
                            "{BATCHES_FILE} has no '{}' column; using {MATRIX_FILE} header for sample identifiers",
                            self.id_column
                        ),
                        Some(&batch_key),
                    );
                    shape.header_samples.clone()
                }
                BatchSamples::Absent => shape.header_samples.clone(),
            };
        let content_fingerprint = fingerprint(&data_file_paths, self.fingerprint_mode)?;

        tracing::debug!(
            batch_key = %batch_key,
            samples = sample_identifiers.len(),
            features = shape.feature_rows,
            files = data_file_paths.len(),
            usable = shape.usable(),
            "Discovered batch"
        );

        Ok(Batch {
            source_tag,
            run_source: self.run_source.clone(),
            id_column: self.id_column.clone(),
            batch_key,
            sample_identifiers,
            feature_count: shape.feature_rows,
            data_file_paths,
            content_fingerprint,
            usable: shape.usable(),
        })
    }
}

/// Regular files directly inside `dir`, sorted by name.
fn list_data_files(dir: &Path) -> Result<Vec<PathBuf>, ScanError> {
    let mut files = Vec::new();
    for entry in fs::read_dir(dir).map_err(|e| ScanError::read(dir, e))? {
        let entry = entry.map_err(|e| ScanError::read(dir, e))?;
        let path = entry.path();
        let meta = fs::metadata(&path).map_err(|e| ScanError::read(&path, e))?;
        if meta.is_file() {
            files.push(path);
        }
    }
    files.sort_by(|a, b| a.file_name().cmp(&b.file_name()));
    Ok(files)
}

fn split_row(line: &str) -> impl Iterator<Item = &str> {
    line.trim_end_matches(['\r', '\n']).split('\t')
}

/// Shape of a data matrix.
struct MatrixShape {
    header_samples: BTreeSet<String>,
    feature_rows: usize,
}

impl MatrixShape {
    /// More than one sample column and more than one feature row.
    fn usable(&self) -> bool {
        self.header_samples.len() > 1 && self.feature_rows > 1
    }
}

/// Read the header samples of `matrix.tsv` and count its feature rows.
fn read_matrix_shape(path: &Path) -> Result<MatrixShape, ScanError> {
    let file = File::open(path).map_err(|e| ScanError::read(path, e))?;
    let mut lines = BufReader::new(file).lines();

    let header = match lines.next() {
        Some(line) => line.map_err(|e| ScanError::read(path, e))?,
        None => String::new(),
    };
    let header_samples = split_row(&header)
        .skip(1)
        .map(str::trim)
        .filter(|cell| !cell.is_empty())
        .map(str::to_string)
        .collect();

    let mut feature_rows = 0;
    for line in lines {
        let line = line.map_err(|e| ScanError::read(path, e))?;
        if !line.trim().is_empty() {
            feature_rows += 1;
        }
    }

    Ok(MatrixShape {
        header_samples,
        feature_rows,
    })
}

enum BatchSamples {
    Found(BTreeSet<String>),
    MissingColumn,
    Absent,
}

fn read_batch_samples(path: &Path, id_column: &str) -> Result<BatchSamples, ScanError> {
    let text = match fs::read_to_string(path) {
        Ok(text) => text,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(BatchSamples::Absent),
        Err(e) => return Err(ScanError::read(path, e)),
    };
    let mut lines = text.lines();
    let Some(column) = lines
        .next()
        .and_then(|header| split_row(header).position(|cell| cell.trim() == id_column))
    else {
        return Ok(BatchSamples::MissingColumn);
    };

    let samples = lines
        .filter_map(|line| split_row(line).nth(column))
        .map(str::trim)
        .filter(|cell| !cell.is_empty())
        .map(str::to_string)
        .collect();
    Ok(BatchSamples::Found(samples))
}

/// SHA-256 over the data files, in order.
fn fingerprint(files: &[PathBuf], mode: FingerprintMode) -> Result<Fingerprint, ScanError> {
    let mut hasher = Sha256::new();
    for path in files {
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        hasher.update(name.as_bytes());
        hasher.update([0u8]);
        match mode {
            FingerprintMode::Metadata => {
                let meta = fs::metadata(path).map_err(|e| ScanError::read(path, e))?;
                let modified = meta.modified().map_err(|e| ScanError::read(path, e))?;
                let since_epoch = modified.duration_since(UNIX_EPOCH).unwrap_or_default();
                hasher.update(meta.len().to_le_bytes());
                hasher.update(since_epoch.as_secs().to_le_bytes());
                hasher.update(since_epoch.subsec_nanos().to_le_bytes());
            }
            FingerprintMode::Content => {
                hasher.update(content_digest(path)?);
            }
        }
    }
    Ok(Fingerprint::new(format!("{:x}", hasher.finalize())))
}

fn content_digest(path: &Path) -> Result<[u8; 32], ScanError> {
    let file = File::open(path).map_err(|e| ScanError::read(path, e))?;
    let mut reader = BufReader::new(file);
    let mut hasher = Sha256::new();
    let mut buffer = [0u8; 8192];
    loop {
        let read = reader
            .read(&mut buffer)
            .map_err(|e| ScanError::read(path, e))?;
        if read == 0 {
            break;
        }
        hasher.update(&buffer[..read]);
    }
    Ok(hasher.finalize().into())
}
