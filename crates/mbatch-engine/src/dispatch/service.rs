//! Analysis service abstraction.

use std::future::Future;

use mbatch_types::wire::{JobAck, JobRequest, JobStatusReport};

use super::error::DispatchError;

/// One exchange with the analysis service per call; retry and polling live
/// in [`Dispatcher`](super::Dispatcher).
pub trait AnalysisService: Send + Sync {
    /// Create and queue a job for `request`.
    fn submit(
        &self,
        request: &JobRequest,
    ) -> impl Future<Output = Result<JobAck, DispatchError>> + Send;

    /// Fetch the current status of `job_id`.
    fn status(
        &self,
        job_id: &str,
    ) -> impl Future<Output = Result<JobStatusReport, DispatchError>> + Send;

    /// Human-readable endpoint, for logs.
    fn describe(&self) -> String;
}
