//! Pipeline YAML configuration types.

use std::path::PathBuf;

use mbatch_state::IndexPaths;
use mbatch_types::{RunSource, RunVersion};
use serde::{Deserialize, Serialize};

/// Top-level pipeline configuration parsed from YAML.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineConfig {
    pub version: String,
    pub pipeline: String,
    pub run: RunConfig,
    pub source: SourceConfig,
    pub results: ResultsConfig,
    pub index: IndexConfig,
    pub service: ServiceConfig,
    #[serde(default)]
    pub resources: ResourceConfig,
    #[serde(default)]
    pub reindex: Option<ReindexConfig>,
}

/// Identity of this run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunConfig {
    /// Timestamp-coded `YYYY_MM_DD[_HHMM]`.
    pub version: RunVersion,
    pub source: RunSource,
}

/// How batch content fingerprints are computed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FingerprintMode {
    /// Name, size and modification time of every data file.
    #[default]
    Metadata,
    /// Name and full content digest of every data file.
    Content,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SourceConfig {
    pub root: PathBuf,
    /// Sample-identifier column in `batches.tsv`.
    pub id_column: String,
    #[serde(default)]
    pub fingerprint: FingerprintMode,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResultsConfig {
    pub root: PathBuf,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IndexConfig {
    pub tabular: PathBuf,
    pub catalogue: PathBuf,
}

impl IndexConfig {
    #[must_use]
    pub fn paths(&self) -> IndexPaths {
        IndexPaths {
            tabular: self.tabular.clone(),
            catalogue: self.catalogue.clone(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServiceConfig {
    /// Single-line file holding the analysis service base URL.
    pub endpoint_file: PathBuf,
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
    #[serde(default = "default_max_polls")]
    pub max_polls: u32,
    /// Forwarded verbatim to the service.
    #[serde(default)]
    pub util_dir: Option<String>,
}

fn default_request_timeout_secs() -> u64 {
    60
}
fn default_poll_interval_ms() -> u64 {
    5_000
}
fn default_max_polls() -> u32 {
    720
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResourceConfig {
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_backoff_base_ms")]
    pub backoff_base_ms: u64,
    #[serde(default = "default_backoff_max_ms")]
    pub backoff_max_ms: u64,
    #[serde(default = "default_parallelism")]
    pub parallelism: u32,
}

fn default_max_retries() -> u32 {
    3
}
fn default_backoff_base_ms() -> u64 {
    1_000
}
fn default_backoff_max_ms() -> u64 {
    60_000
}
fn default_parallelism() -> u32 {
    1
}

impl Default for ResourceConfig {
    fn default() -> Self {
        Self {
            max_retries: default_max_retries(),
            backoff_base_ms: default_backoff_base_ms(),
            backoff_max_ms: default_backoff_max_ms(),
            parallelism: default_parallelism(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReindexConfig {
    /// Staging directory for the rebuilt index files.
    pub temp_dir: PathBuf,
    /// Appended to the live index file names when they are backed up.
    #[serde(default)]
    pub version_suffix: Option<String>,
}

impl ReindexConfig {
    /// Backup suffix, defaulting to `_REINDEX_<run version>`.
    #[must_use]
    pub fn effective_suffix(&self, run_version: &RunVersion) -> String {
        self.version_suffix
            .clone()
            .unwrap_or_else(|| format!("_REINDEX_{run_version}"))
    }
}
