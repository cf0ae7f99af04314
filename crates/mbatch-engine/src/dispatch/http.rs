//! HTTP client for the analysis service, using reqwest.

use std::time::Duration;

use mbatch_types::wire::{JobAck, JobRequest, JobStatusReport};
use reqwest::Url;
use serde::de::DeserializeOwned;
use tracing::{debug, warn};

use super::error::DispatchError;
use super::service::AnalysisService;

/// Talks to `POST {base}/v1/jobs` and `GET {base}/v1/jobs/{job_id}`.
#[derive(Clone)]
pub struct HttpAnalysisService {
    client: reqwest::Client,
    base: Url,
}

impl HttpAnalysisService {
    /// Build a client for `base` with a per-request timeout.
    ///
    /// # Errors
    ///
    /// Returns a transport [`DispatchError`] if the client cannot be built.
    pub fn new(base: Url, request_timeout: Duration) -> Result<Self, DispatchError> {
        let client = reqwest::Client::builder()
            .timeout(request_timeout)
            .user_agent(concat!("mbatch/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| DispatchError::transport(format!("failed to create HTTP client: {e}")))?;
        Ok(Self { client, base })
    }

    fn jobs_url(&self) -> String {
        format!("{}/v1/jobs", self.base.as_str().trim_end_matches('/'))
    }

    async fn read_json<T: DeserializeOwned>(
        url: &str,
        sent: Result<reqwest::Response, reqwest::Error>,
    ) -> Result<T, DispatchError> {
        let response = sent.map_err(|e| {
            warn!(
                url,
                error = %e,
                is_connect = e.is_connect(),
                is_timeout = e.is_timeout(),
                "Analysis service request failed"
            );
            DispatchError::transport(format!("request to {url} failed: {e}"))
        })?;

        let status = response.status();
        debug!(url, status = status.as_u16(), "Analysis service response received");
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            let detail = body.trim();
            return Err(DispatchError::status(
                status.as_u16(),
                if detail.is_empty() {
                    format!("{status} from {url}")
                } else {
                    format!("{status} from {url}: {detail}")
                },
            ));
        }

        response
            .json::<T>()
            .await
            .map_err(|e| DispatchError::protocol(format!("unexpected response from {url}: {e}")))
    }
}

impl AnalysisService for HttpAnalysisService {
    async fn submit(&self, request: &JobRequest) -> Result<JobAck, DispatchError> {
        let url = self.jobs_url();
        let sent = self.client.post(&url).json(request).send().await;
        Self::read_json(&url, sent).await
    }

    async fn status(&self, job_id: &str) -> Result<JobStatusReport, DispatchError> {
        let url = format!("{}/{job_id}", self.jobs_url());
        let sent = self.client.get(&url).send().await;
        Self::read_json(&url, sent).await
    }

    fn describe(&self) -> String {
        self.base.to_string()
    }
}
