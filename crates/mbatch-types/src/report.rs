//! Run report notes.

use serde::{Deserialize, Serialize};

use crate::batch::BatchKey;

/// Severity of a [`ReportNote`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Severity {
    Warning,
    Error,
}

impl std::fmt::Display for Severity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            Self::Warning => "WARNING",
            Self::Error => "ERROR",
        })
    }
}

/// A warning or error raised by a stage, kept for end-of-run review.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReportNote {
    pub severity: Severity,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub batch_key: Option<BatchKey>,
}

impl ReportNote {
    #[must_use]
    pub fn warning(message: impl Into<String>, batch_key: Option<BatchKey>) -> Self {
        Self {
            severity: Severity::Warning,
            message: message.into(),
            batch_key,
        }
    }

    #[must_use]
    pub fn error(message: impl Into<String>, batch_key: Option<BatchKey>) -> Self {
        Self {
            severity: Severity::Error,
            message: message.into(),
            batch_key,
        }
    }
}

impl std::fmt::Display for ReportNote {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.batch_key {
            Some(key) => write!(f, "[{}] {}: {}", self.severity, key, self.message),
            None => write!(f, "[{}] {}", self.severity, self.message),
        }
    }
}
