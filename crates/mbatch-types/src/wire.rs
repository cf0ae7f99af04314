//! Request/response schema for the analysis service boundary.
//!
//! The service is job based: a [`JobRequest`] creates and queues a job and
//! is acknowledged with a [`JobAck`]; the job is then polled until its
//! [`JobStatusReport`] reaches a terminal [`JobState`]. Every message
//! carries a [`SchemaVersion`] and is validated on send and on receive.

use serde::{Deserialize, Serialize};

use crate::batch::{Batch, BatchKey, Fingerprint};
use crate::index::{RunSource, RunVersion};

/// Dispatch schema version.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SchemaVersion {
    /// Version 1, the current schema.
    #[default]
    #[serde(rename = "1")]
    V1,
}

/// Violation of the dispatch schema.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum WireError {
    #[error("missing field '{0}'")]
    MissingField(&'static str),
    #[error("job id mismatch: expected '{expected}', got '{actual}'")]
    JobIdMismatch { expected: String, actual: String },
    #[error("job {job_id} succeeded without an artifact location")]
    MissingArtifact { job_id: String },
}

/// Body of `POST {base}/v1/jobs`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobRequest {
    pub schema_version: SchemaVersion,
    pub batch_key: BatchKey,
    pub run_source: RunSource,
    pub run_version: RunVersion,
    pub source_tag: String,
    pub id_column: String,
    pub sample_identifiers: Vec<String>,
    /// Data file paths as seen on the shared filesystem.
    pub data_files: Vec<String>,
    pub content_fingerprint: Fingerprint,
    /// Opaque utility/config directory forwarded to the service.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub util_dir: Option<String>,
}

impl JobRequest {
    /// Build a request for `batch` under the given run version.
    #[must_use]
    pub fn for_batch(batch: &Batch, run_version: &RunVersion, util_dir: Option<String>) -> Self {
        Self {
            schema_version: SchemaVersion::V1,
            batch_key: batch.batch_key.clone(),
            run_source: batch.run_source.clone(),
            run_version: run_version.clone(),
            source_tag: batch.source_tag.clone(),
            id_column: batch.id_column.clone(),
            sample_identifiers: batch.sample_identifiers.iter().cloned().collect(),
            data_files: batch
                .data_file_paths
                .iter()
                .map(|p| p.to_string_lossy().into_owned())
                .collect(),
            content_fingerprint: batch.content_fingerprint.clone(),
            util_dir,
        }
    }

    /// Check the request before it is sent.
    ///
    /// # Errors
    ///
    /// Returns [`WireError::MissingField`] for the first empty required field.
    pub fn validate(&self) -> Result<(), WireError> {
        if self.batch_key.as_str().trim().is_empty() {
            return Err(WireError::MissingField("batch_key"));
        }
        if self.run_source.as_str().trim().is_empty() {
            return Err(WireError::MissingField("run_source"));
        }
        if self.run_version.as_str().trim().is_empty() {
            return Err(WireError::MissingField("run_version"));
        }
        if self.id_column.trim().is_empty() {
            return Err(WireError::MissingField("id_column"));
        }
        if self.data_files.is_empty() {
            return Err(WireError::MissingField("data_files"));
        }
        if self.content_fingerprint.as_str().is_empty() {
            return Err(WireError::MissingField("content_fingerprint"));
        }
        Ok(())
    }
}

/// Job lifecycle states reported by the service.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobState {
    Created,
    Queued,
    Running,
    Succeeded,
    Failed,
}

impl JobState {
    /// `true` for states after which the job never changes again.
    #[must_use]
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Succeeded | Self::Failed)
    }
}

impl std::fmt::Display for JobState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            Self::Created => "created",
            Self::Queued => "queued",
            Self::Running => "running",
            Self::Succeeded => "succeeded",
            Self::Failed => "failed",
        })
    }
}

/// Acknowledgement of a [`JobRequest`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobAck {
    pub schema_version: SchemaVersion,
    pub job_id: String,
    pub status: JobState,
}

impl JobAck {
    /// Check a received acknowledgement.
    ///
    /// # Errors
    ///
    /// Returns [`WireError::MissingField`] when the job id is blank.
    pub fn validate(&self) -> Result<(), WireError> {
        if self.job_id.trim().is_empty() {
            return Err(WireError::MissingField("job_id"));
        }
        Ok(())
    }
}

/// Body of `GET {base}/v1/jobs/{job_id}`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobStatusReport {
    pub schema_version: SchemaVersion,
    pub job_id: String,
    pub status: JobState,
    /// Where the finished job left its result artifacts.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub artifact_location: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub diagnostic: Option<String>,
}

impl JobStatusReport {
    /// Check a received status report for the job we asked about.
    ///
    /// # Errors
    ///
    /// Returns [`WireError`] when the report is for another job or claims
    /// success without an artifact location.
    pub fn validate(&self, expected_job_id: &str) -> Result<(), WireError> {
        if self.job_id != expected_job_id {
            return Err(WireError::JobIdMismatch {
                expected: expected_job_id.to_string(),
                actual: self.job_id.clone(),
            });
        }
        if self.status == JobState::Succeeded
            && self
                .artifact_location
                .as_deref()
                .is_none_or(|loc| loc.trim().is_empty())
        {
            return Err(WireError::MissingArtifact {
                job_id: self.job_id.clone(),
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    fn batch() -> Batch {
        Batch {
            source_tag: "TCGA-BRCA".into(),
            run_source: RunSource::new("GDC"),
            id_column: "aliquot_barcode".into(),
            batch_key: BatchKey::new("TCGA-BRCA/rna"),
            sample_identifiers: ["s2", "s1"].iter().map(ToString::to_string).collect(),
            feature_count: 2,
            data_file_paths: vec![PathBuf::from("/data/TCGA-BRCA/rna/matrix.tsv")],
            content_fingerprint: Fingerprint::new("abc"),
            usable: true,
        }
    }

    #[test]
    fn request_for_batch_is_valid_and_sorted() {
        let req = JobRequest::for_batch(&batch(), &RunVersion::new("2024_01_01"), None);
        assert!(req.validate().is_ok());
        assert_eq!(req.sample_identifiers, vec!["s1", "s2"]);
        assert_eq!(req.data_files, vec!["/data/TCGA-BRCA/rna/matrix.tsv"]);
    }

    #[test]
    fn request_without_data_files_is_rejected() {
        let mut b = batch();
        b.data_file_paths.clear();
        let req = JobRequest::for_batch(&b, &RunVersion::new("2024_01_01"), None);
        assert_eq!(req.validate(), Err(WireError::MissingField("data_files")));
    }

    #[test]
    fn schema_version_serializes_as_string() {
        let req = JobRequest::for_batch(&batch(), &RunVersion::new("2024_01_01"), None);
        let value = serde_json::to_value(&req).unwrap();
        assert_eq!(value["schema_version"], "1");
    }

    #[test]
    fn unknown_schema_version_fails_to_parse() {
        let raw = r#"{"schema_version":"2","job_id":"j1","status":"queued"}"#;
        assert!(serde_json::from_str::<JobAck>(raw).is_err());
    }

    #[test]
    fn succeeded_status_requires_artifact() {
        let report = JobStatusReport {
            schema_version: SchemaVersion::V1,
            job_id: "j1".into(),
            status: JobState::Succeeded,
            artifact_location: None,
            diagnostic: None,
        };
        assert!(matches!(
            report.validate("j1"),
            Err(WireError::MissingArtifact { .. })
        ));
    }

    #[test]
    fn status_for_other_job_is_rejected() {
        let report = JobStatusReport {
            schema_version: SchemaVersion::V1,
            job_id: "j2".into(),
            status: JobState::Running,
            artifact_location: None,
            diagnostic: None,
        };
        assert!(matches!(
            report.validate("j1"),
            Err(WireError::JobIdMismatch { .. })
        ));
    }

    #[test]
    fn terminal_states() {
        assert!(JobState::Succeeded.is_terminal());
        assert!(JobState::Failed.is_terminal());
        assert!(!JobState::Running.is_terminal());
    }
}
