//! Submit-and-poll driver with retry and the idempotent short-circuit.

use std::future::Future;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use mbatch_types::wire::{JobRequest, JobState};
use mbatch_types::{Batch, BatchKey, EntryStatus, IndexEntry, RunVersion};

use super::error::DispatchError;
use super::service::AnalysisService;
use crate::errors::{compute_backoff, RetryPolicy};

/// How often, and how many times, a queued job is polled.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PollPolicy {
    pub interval: Duration,
    pub max_polls: u32,
}

/// Outcome of dispatching one batch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DispatchResult {
    /// The service finished the job; artifacts are at `artifact_location`.
    Success { artifact_location: PathBuf },
    /// Exhausted or non-retryable failure.
    Failure { diagnostic: String, retryable: bool },
    /// Same content already processed; nothing was sent.
    AlreadyProcessed { result_location: PathBuf },
}

/// Drives one batch through the analysis service.
pub struct Dispatcher<S> {
    service: Arc<S>,
    retry: RetryPolicy,
    poll: PollPolicy,
    run_version: RunVersion,
    util_dir: Option<String>,
}

impl<S> Clone for Dispatcher<S> {
    fn clone(&self) -> Self {
        Self {
            service: Arc::clone(&self.service),
            retry: self.retry,
            poll: self.poll,
            run_version: self.run_version.clone(),
            util_dir: self.util_dir.clone(),
        }
    }
}

impl<S: AnalysisService> Dispatcher<S> {
    #[must_use]
    pub fn new(
        service: Arc<S>,
        retry: RetryPolicy,
        poll: PollPolicy,
        run_version: RunVersion,
        util_dir: Option<String>,
    ) -> Self {
        Self {
            service,
            retry,
            poll,
            run_version,
            util_dir,
        }
    }

    /// Dispatch `batch`, given its current catalogue entry.
    ///
    /// Returns [`DispatchResult::AlreadyProcessed`] without any network call
    /// when `existing` is PROCESSED with the same fingerprint.
    pub async fn dispatch(&self, batch: &Batch, existing: Option<&IndexEntry>) -> DispatchResult {
        if let Some(entry) = existing {
            if entry.status == EntryStatus::Processed
                && entry.content_fingerprint == batch.content_fingerprint
            {
                if let Some(location) = &entry.result_location {
                    tracing::debug!(
                        batch_key = %batch.batch_key,
                        "Already processed, skipping dispatch"
                    );
                    return DispatchResult::AlreadyProcessed {
                        result_location: location.clone(),
                    };
                }
            }
        }

        let request = JobRequest::for_batch(batch, &self.run_version, self.util_dir.clone());
        if let Err(e) = request.validate() {
            return DispatchResult::Failure {
                diagnostic: format!("invalid job request: {e}"),
                retryable: false,
            };
        }

        match self.run_job(&request).await {
            Ok(artifact_location) => {
                tracing::info!(
                    batch_key = %batch.batch_key,
                    artifact_location = %artifact_location.display(),
                    "Analysis job succeeded"
                );
                DispatchResult::Success { artifact_location }
            }
            Err(err) => DispatchResult::Failure {
                diagnostic: err.to_string(),
                retryable: err.retryable,
            },
        }
    }

    async fn run_job(&self, request: &JobRequest) -> Result<PathBuf, DispatchError> {
        let key = &request.batch_key;
        let ack = self
            .with_retry(key, "submit", || self.service.submit(request))
            .await?;
        ack.validate()?;
        tracing::info!(
            batch_key = %key,
            job_id = %ack.job_id,
            status = %ack.status,
            service = %self.service.describe(),
            "Analysis job submitted"
        );

        for poll in 1..=self.poll.max_polls {
            let report = self
                .with_retry(key, "status", || self.service.status(&ack.job_id))
                .await?;
            report.validate(&ack.job_id)?;
            match report.status {
                JobState::Succeeded => {
                    let Some(location) = report.artifact_location else {
                        return Err(DispatchError::protocol(format!(
                            "job {} succeeded without an artifact location",
                            ack.job_id
                        )));
                    };
                    return Ok(PathBuf::from(location));
                }
                JobState::Failed => {
                    return Err(DispatchError::job_failed(format!(
                        "job {} failed: {}",
                        ack.job_id,
                        report
                            .diagnostic
                            .as_deref()
                            .unwrap_or("no diagnostic from service")
                    )));
                }
                JobState::Created | JobState::Queued | JobState::Running => {
                    tracing::debug!(
                        batch_key = %key,
                        job_id = %ack.job_id,
                        status = %report.status,
                        poll,
                        "Analysis job still pending"
                    );
                }
            }
            if poll < self.poll.max_polls {
                tokio::time::sleep(self.poll.interval).await;
            }
        }

        Err(DispatchError::timeout(format!(
            "job {} not finished after {} polls",
            ack.job_id, self.poll.max_polls
        )))
    }

    /// Run one exchange, retrying retryable failures up to `max_retries`
    /// times with exponential backoff.
    async fn with_retry<T, F, Fut>(
        &self,
        batch_key: &BatchKey,
        operation: &'static str,
        mut call: F,
    ) -> Result<T, DispatchError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, DispatchError>>,
    {
        let max_retries = self.retry.max_retries;
        let mut attempt = 0u32;

        loop {
            attempt += 1;
            match call().await {
                Ok(value) => return Ok(value),
                Err(err) if err.retryable && attempt <= max_retries => {
                    let delay = compute_backoff(&self.retry, attempt);
                    #[allow(clippy::cast_possible_truncation)]
                    let delay_ms = delay.as_millis() as u64;
                    tracing::warn!(
                        batch_key = %batch_key,
                        operation,
                        attempt,
                        max_retries,
                        delay_ms,
                        kind = %err.kind,
                        "Retryable dispatch error, will retry"
                    );
                    tokio::time::sleep(delay).await;
                }
                Err(err) => {
                    if err.retryable {
                        tracing::error!(
                            batch_key = %batch_key,
                            operation,
                            attempt,
                            max_retries,
                            kind = %err.kind,
                            "Max retries exhausted"
                        );
                    } else {
                        tracing::error!(
                            batch_key = %batch_key,
                            operation,
                            kind = %err.kind,
                            "Non-retryable dispatch error"
                        );
                    }
                    return Err(err);
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::VecDeque;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Mutex;

    use mbatch_types::wire::{JobAck, JobStatusReport, SchemaVersion};
    use mbatch_types::{Fingerprint, RunSource};

    /// Replays scripted responses; once a script runs dry the last entry
    /// repeats.
    struct ScriptedService {
        submits: Mutex<VecDeque<Result<JobAck, DispatchError>>>,
        statuses: Mutex<VecDeque<Result<JobStatusReport, DispatchError>>>,
        submit_calls: AtomicU32,
        status_calls: AtomicU32,
    }

    impl ScriptedService {
        fn new(
            submits: Vec<Result<JobAck, DispatchError>>,
            statuses: Vec<Result<JobStatusReport, DispatchError>>,
        ) -> Self {
            Self {
                submits: Mutex::new(submits.into()),
                statuses: Mutex::new(statuses.into()),
                submit_calls: AtomicU32::new(0),
                status_calls: AtomicU32::new(0),
            }
        }

        fn next<T: Clone>(queue: &Mutex<VecDeque<T>>) -> T {
            let mut q = queue.lock().unwrap();
            if q.len() > 1 {
                q.pop_front().unwrap()
            } else {
                q.front().cloned().unwrap()
            }
        }
    }

    impl AnalysisService for ScriptedService {
        async fn submit(&self, _request: &JobRequest) -> Result<JobAck, DispatchError> {
            self.submit_calls.fetch_add(1, Ordering::SeqCst);
            Self::next(&self.submits)
        }

        async fn status(&self, _job_id: &str) -> Result<JobStatusReport, DispatchError> {
            self.status_calls.fetch_add(1, Ordering::SeqCst);
            Self::next(&self.statuses)
        }

        fn describe(&self) -> String {
            "scripted".into()
        }
    }

    fn ack() -> Result<JobAck, DispatchError> {
        Ok(JobAck {
            schema_version: SchemaVersion::V1,
            job_id: "job-1".into(),
            status: JobState::Queued,
        })
    }

    fn report(status: JobState, artifact: Option<&str>) -> Result<JobStatusReport, DispatchError> {
        Ok(JobStatusReport {
            schema_version: SchemaVersion::V1,
            job_id: "job-1".into(),
            status,
            artifact_location: artifact.map(str::to_string),
            diagnostic: (status == JobState::Failed).then(|| "R crashed".to_string()),
        })
    }

    fn batch() -> Batch {
        Batch {
            source_tag: "A".into(),
            run_source: RunSource::new("GDC"),
            id_column: "aliquot_barcode".into(),
            batch_key: BatchKey::new("A"),
            sample_identifiers: ["s1", "s2"].iter().map(ToString::to_string).collect(),
            feature_count: 2,
            data_file_paths: vec![PathBuf::from("/src/A/matrix.tsv")],
            content_fingerprint: Fingerprint::new("f1"),
            usable: true,
        }
    }

    fn dispatcher(service: Arc<ScriptedService>, max_retries: u32, max_polls: u32) -> Dispatcher<ScriptedService> {
        Dispatcher::new(
            service,
            RetryPolicy {
                max_retries,
                backoff_base_ms: 0,
                backoff_max_ms: 0,
            },
            PollPolicy {
                interval: Duration::ZERO,
                max_polls,
            },
            RunVersion::new("2024_01_01"),
            None,
        )
    }

    #[tokio::test]
    async fn test_polls_until_success() {
        let service = Arc::new(ScriptedService::new(
            vec![ack()],
            vec![
                report(JobState::Queued, None),
                report(JobState::Running, None),
                report(JobState::Succeeded, Some("/svc/out/job-1")),
            ],
        ));
        let result = dispatcher(Arc::clone(&service), 3, 10)
            .dispatch(&batch(), None)
            .await;

        assert_eq!(
            result,
            DispatchResult::Success {
                artifact_location: PathBuf::from("/svc/out/job-1")
            }
        );
        assert_eq!(service.status_calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_transport_errors_retried_then_exhausted() {
        let service = Arc::new(ScriptedService::new(
            vec![Err(DispatchError::transport("connection refused"))],
            vec![report(JobState::Succeeded, Some("/x"))],
        ));
        let result = dispatcher(Arc::clone(&service), 3, 10)
            .dispatch(&batch(), None)
            .await;

        assert!(matches!(
            result,
            DispatchResult::Failure { retryable: true, .. }
        ));
        assert_eq!(service.submit_calls.load(Ordering::SeqCst), 4);
        assert_eq!(service.status_calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_transient_error_recovers() {
        let service = Arc::new(ScriptedService::new(
            vec![Err(DispatchError::status(503, "busy")), ack()],
            vec![report(JobState::Succeeded, Some("/svc/out"))],
        ));
        let result = dispatcher(Arc::clone(&service), 3, 10)
            .dispatch(&batch(), None)
            .await;

        assert!(matches!(result, DispatchResult::Success { .. }));
        assert_eq!(service.submit_calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_client_error_not_retried() {
        let service = Arc::new(ScriptedService::new(
            vec![Err(DispatchError::status(400, "bad request"))],
            vec![report(JobState::Succeeded, Some("/x"))],
        ));
        let result = dispatcher(Arc::clone(&service), 3, 10)
            .dispatch(&batch(), None)
            .await;

        assert!(matches!(
            result,
            DispatchResult::Failure { retryable: false, .. }
        ));
        assert_eq!(service.submit_calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_job_failure_carries_service_diagnostic() {
        let service = Arc::new(ScriptedService::new(
            vec![ack()],
            vec![report(JobState::Failed, None)],
        ));
        let result = dispatcher(service, 3, 10).dispatch(&batch(), None).await;

        let DispatchResult::Failure { diagnostic, retryable } = result else {
            panic!("expected failure, got {result:?}");
        };
        assert!(diagnostic.contains("R crashed"), "got: {diagnostic}");
        assert!(!retryable);
    }

    #[tokio::test]
    async fn test_poll_budget_exhausted_is_timeout() {
        let service = Arc::new(ScriptedService::new(
            vec![ack()],
            vec![report(JobState::Running, None)],
        ));
        let result = dispatcher(Arc::clone(&service), 0, 5)
            .dispatch(&batch(), None)
            .await;

        let DispatchResult::Failure { diagnostic, .. } = result else {
            panic!("expected failure, got {result:?}");
        };
        assert!(diagnostic.starts_with("timeout"), "got: {diagnostic}");
        assert_eq!(service.status_calls.load(Ordering::SeqCst), 5);
    }

    #[tokio::test]
    async fn test_processed_same_fingerprint_short_circuits() {
        let service = Arc::new(ScriptedService::new(
            vec![Err(DispatchError::transport("must not be called"))],
            vec![report(JobState::Running, None)],
        ));
        let existing = IndexEntry {
            batch_key: BatchKey::new("A"),
            run_version: RunVersion::new("2023_12_01"),
            status: EntryStatus::Processed,
            result_location: Some(PathBuf::from("/r/GDC/2023_12_01/A")),
            content_fingerprint: Fingerprint::new("f1"),
            sample_count: None,
            feature_count: None,
            last_processed_at: "t".into(),
            diagnostic: None,
        };
        let result = dispatcher(Arc::clone(&service), 3, 10)
            .dispatch(&batch(), Some(&existing))
            .await;

        assert_eq!(
            result,
            DispatchResult::AlreadyProcessed {
                result_location: PathBuf::from("/r/GDC/2023_12_01/A")
            }
        );
        assert_eq!(service.submit_calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_success_without_artifact_is_protocol_failure() {
        let service = Arc::new(ScriptedService::new(
            vec![ack()],
            vec![report(JobState::Succeeded, None)],
        ));
        let result = dispatcher(service, 3, 10).dispatch(&batch(), None).await;
        assert!(matches!(
            result,
            DispatchResult::Failure { retryable: false, .. }
        ));
    }
}
