//! Semantic validation for parsed pipeline configuration values.

use std::path::Path;
use std::sync::LazyLock;

use anyhow::{bail, Result};
use regex::Regex;

use crate::config::types::PipelineConfig;

static RUN_VERSION_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^\d{4}_\d{2}_\d{2}(_\d{4})?$").expect("valid run version regex"));

fn is_blank(path: &Path) -> bool {
    path.as_os_str().is_empty()
}

/// Validate a parsed pipeline configuration.
/// Returns `Ok(())` if valid, Err with all validation errors if not.
///
/// # Errors
///
/// Returns an error listing all validation failures found in the pipeline config.
pub fn validate_pipeline(config: &PipelineConfig) -> Result<()> {
    let mut errors = Vec::new();

    if config.version != "1.0" {
        errors.push(format!(
            "Unsupported pipeline version '{}', expected '1.0'",
            config.version
        ));
    }

    if config.pipeline.trim().is_empty() {
        errors.push("Pipeline name must not be empty".to_string());
    }

    if !RUN_VERSION_RE.is_match(config.run.version.as_str()) {
        errors.push(format!(
            "run.version '{}' must look like YYYY_MM_DD or YYYY_MM_DD_HHMM",
            config.run.version
        ));
    }

    let run_source = config.run.source.as_str();
    if run_source.trim().is_empty() {
        errors.push("run.source must not be empty".to_string());
    } else if run_source.contains(['/', '\\']) || run_source.starts_with('.') {
        errors.push(format!(
            "run.source '{run_source}' must be a single directory name"
        ));
    }

    if is_blank(&config.source.root) {
        errors.push("source.root must not be empty".to_string());
    }
    if config.source.id_column.trim().is_empty() {
        errors.push("source.id_column must not be empty".to_string());
    }

    if is_blank(&config.results.root) {
        errors.push("results.root must not be empty".to_string());
    }

    if is_blank(&config.index.tabular) || is_blank(&config.index.catalogue) {
        errors.push("index.tabular and index.catalogue must both be set".to_string());
    } else if config.index.tabular == config.index.catalogue {
        errors.push("index.tabular and index.catalogue must be different files".to_string());
    }

    if is_blank(&config.service.endpoint_file) {
        errors.push("service.endpoint_file must not be empty".to_string());
    }
    if config.service.request_timeout_secs == 0 {
        errors.push("service.request_timeout_secs must be > 0".to_string());
    }
    if config.service.max_polls == 0 {
        errors.push("service.max_polls must be at least 1".to_string());
    }

    if config.resources.parallelism == 0 {
        errors.push("parallelism must be at least 1".to_string());
    }
    if config.resources.backoff_base_ms > config.resources.backoff_max_ms {
        errors.push(format!(
            "backoff_base_ms ({}) must not exceed backoff_max_ms ({})",
            config.resources.backoff_base_ms, config.resources.backoff_max_ms
        ));
    }

    if let Some(reindex) = &config.reindex {
        if is_blank(&reindex.temp_dir) {
            errors.push("reindex.temp_dir must not be empty".to_string());
        } else if [&config.index.tabular, &config.index.catalogue]
            .iter()
            .any(|index| index.parent() == Some(reindex.temp_dir.as_path()))
        {
            errors.push(format!(
                "reindex.temp_dir '{}' must not be the directory holding the index files",
                reindex.temp_dir.display()
            ));
        }
        if let Some(suffix) = &reindex.version_suffix {
            if suffix.is_empty() || suffix.contains(['/', '\\']) {
                errors.push(format!(
                    "reindex.version_suffix '{suffix}' must be a non-empty file name fragment"
                ));
            }
        }
    }

    if errors.is_empty() {
        Ok(())
    } else {
        bail!("Pipeline validation failed:\n  - {}", errors.join("\n  - "));
    }
}
