//! Dispatch error model.

use mbatch_types::wire::WireError;

/// What went wrong talking to the analysis service.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DispatchErrorKind {
    /// Connection refused, reset, timed out at the transport level.
    Transport,
    /// Non-success HTTP status.
    Status(u16),
    /// Response did not match the versioned schema.
    Protocol,
    /// The service ran the job and reported failure.
    JobFailed,
    /// The job did not reach a terminal state within the poll budget.
    Timeout,
}

impl std::fmt::Display for DispatchErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Transport => f.write_str("transport"),
            Self::Status(code) => write!(f, "http {code}"),
            Self::Protocol => f.write_str("protocol"),
            Self::JobFailed => f.write_str("job failed"),
            Self::Timeout => f.write_str("timeout"),
        }
    }
}

/// Per-batch dispatch failure. Never aborts the run.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{kind}: {message}")]
pub struct DispatchError {
    pub kind: DispatchErrorKind,
    pub message: String,
    /// Whether repeating the same exchange could succeed.
    pub retryable: bool,
}

impl DispatchError {
    #[must_use]
    pub fn transport(message: impl Into<String>) -> Self {
        Self {
            kind: DispatchErrorKind::Transport,
            message: message.into(),
            retryable: true,
        }
    }

    /// 5xx and 429 are retryable, every other status is not.
    #[must_use]
    pub fn status(code: u16, message: impl Into<String>) -> Self {
        Self {
            kind: DispatchErrorKind::Status(code),
            message: message.into(),
            retryable: code == 429 || (500..600).contains(&code),
        }
    }

    #[must_use]
    pub fn protocol(message: impl Into<String>) -> Self {
        Self {
            kind: DispatchErrorKind::Protocol,
            message: message.into(),
            retryable: false,
        }
    }

    #[must_use]
    pub fn job_failed(message: impl Into<String>) -> Self {
        Self {
            kind: DispatchErrorKind::JobFailed,
            message: message.into(),
            retryable: false,
        }
    }

    #[must_use]
    pub fn timeout(message: impl Into<String>) -> Self {
        Self {
            kind: DispatchErrorKind::Timeout,
            message: message.into(),
            retryable: true,
        }
    }
}

impl From<WireError> for DispatchError {
    fn from(e: WireError) -> Self {
        Self::protocol(e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_retryability() {
        assert!(DispatchError::status(503, "unavailable").retryable);
        assert!(DispatchError::status(429, "slow down").retryable);
        assert!(!DispatchError::status(400, "bad request").retryable);
        assert!(!DispatchError::status(404, "no such job").retryable);
    }

    #[test]
    fn test_wire_error_is_protocol() {
        let err: DispatchError = WireError::MissingField("job_id").into();
        assert_eq!(err.kind, DispatchErrorKind::Protocol);
        assert!(!err.retryable);
        assert_eq!(err.to_string(), "protocol: missing field 'job_id'");
    }

    #[test]
    fn test_display_includes_status_code() {
        let err = DispatchError::status(502, "bad gateway");
        assert_eq!(err.to_string(), "http 502: bad gateway");
    }
}
