//! Pipeline error model and retry backoff policy helpers.

use std::time::Duration;

use mbatch_state::StateError;

use crate::lock::LockError;
use crate::scanner::ScanError;

// ---------------------------------------------------------------------------
// PipelineError: fatal, run-aborting errors
// ---------------------------------------------------------------------------

/// Fatal pipeline error. Any of these aborts the run before or between
/// batches; per-batch failures never surface here and are recorded in the
/// catalogue and run report instead.
#[derive(Debug)]
pub enum PipelineError {
    /// Configuration or endpoint file is unusable.
    Config(anyhow::Error),
    /// The source tree could not be scanned completely.
    Scan(ScanError),
    /// The persisted catalogue cannot be trusted; run a reindex.
    IndexCorrupt(StateError),
    /// Another run holds the results-tree lock.
    Locked(LockError),
    /// Host-side failure (task panic, catalogue write, staging I/O).
    Infrastructure(anyhow::Error),
}

impl std::fmt::Display for PipelineError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Config(e) => write!(f, "configuration error: {e:#}"),
            Self::Scan(e) => write!(f, "{e}"),
            Self::IndexCorrupt(e) => write!(f, "{e} (run `mbatch reindex` to rebuild)"),
            Self::Locked(e) => write!(f, "{e}"),
            Self::Infrastructure(e) => write!(f, "{e:#}"),
        }
    }
}

impl std::error::Error for PipelineError {}

impl From<anyhow::Error> for PipelineError {
    fn from(e: anyhow::Error) -> Self {
        Self::Infrastructure(e)
    }
}

impl From<ScanError> for PipelineError {
    fn from(e: ScanError) -> Self {
        Self::Scan(e)
    }
}

impl From<LockError> for PipelineError {
    fn from(e: LockError) -> Self {
        Self::Locked(e)
    }
}

impl From<StateError> for PipelineError {
    fn from(e: StateError) -> Self {
        if e.is_corrupt() {
            Self::IndexCorrupt(e)
        } else {
            Self::Infrastructure(e.into())
        }
    }
}

impl PipelineError {
    /// `true` for errors a reindex would fix.
    #[must_use]
    pub fn is_index_corrupt(&self) -> bool {
        matches!(self, Self::IndexCorrupt(_))
    }
}

/// Retry schedule for one service exchange.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub backoff_base_ms: u64,
    pub backoff_max_ms: u64,
}

/// Compute retry delay for the given attempt number (1-based).
pub(crate) fn compute_backoff(policy: &RetryPolicy, attempt: u32) -> Duration {
    let factor = 2u64.saturating_pow(attempt.saturating_sub(1));
    let delay_ms = policy.backoff_base_ms.saturating_mul(factor);
    Duration::from_millis(delay_ms.min(policy.backoff_max_ms))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::Path;

    fn policy(base: u64, max: u64) -> RetryPolicy {
        RetryPolicy {
            max_retries: 3,
            backoff_base_ms: base,
            backoff_max_ms: max,
        }
    }

    // -----------------------------------------------------------------------
    // PipelineError tests
    // -----------------------------------------------------------------------

    #[test]
    fn test_corrupt_state_error_maps_to_index_corrupt() {
        let err: PipelineError = StateError::Corrupt {
            path: Path::new("/idx/c.json").to_path_buf(),
            reason: "bad".into(),
        }
        .into();
        assert!(err.is_index_corrupt());
        assert!(err.to_string().contains("mbatch reindex"));
    }

    #[test]
    fn test_other_state_error_is_infrastructure() {
        let err: PipelineError = StateError::LockPoisoned.into();
        assert!(matches!(err, PipelineError::Infrastructure(_)));
    }

    #[test]
    fn test_pipeline_error_from_anyhow() {
        let pe: PipelineError = anyhow::anyhow!("something went wrong").into();
        assert!(matches!(pe, PipelineError::Infrastructure(_)));
        assert!(pe.to_string().contains("something went wrong"));
    }

    // -----------------------------------------------------------------------
    // compute_backoff tests
    // -----------------------------------------------------------------------

    #[test]
    fn test_backoff_doubles() {
        let p = policy(1_000, 60_000);
        assert_eq!(compute_backoff(&p, 1), Duration::from_millis(1_000));
        assert_eq!(compute_backoff(&p, 2), Duration::from_millis(2_000));
        assert_eq!(compute_backoff(&p, 3), Duration::from_millis(4_000));
    }

    #[test]
    fn test_backoff_capped() {
        let p = policy(1_000, 60_000);
        assert_eq!(compute_backoff(&p, 20), Duration::from_millis(60_000));
        assert_eq!(compute_backoff(&p, 200), Duration::from_millis(60_000));
    }

    #[test]
    fn test_zero_base_never_sleeps() {
        let p = policy(0, 0);
        assert_eq!(compute_backoff(&p, 5), Duration::ZERO);
    }
}
