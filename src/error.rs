//! Error taxonomy for pipeline execution.
//!
//! Every failure a phase can produce is folded into [`PipelineError`], which
//! carries just enough classification for the engine to decide between
//! retrying, degrading an optional phase, and halting the run.

use thiserror::Error;

use crate::adapters::ServiceError;
use crate::normalize::ParseError;

/// Characters of raw diagnostic text kept in errors and log lines
pub const DIAGNOSTIC_CHARS: usize = 200;

/// Truncate diagnostic text to [`DIAGNOSTIC_CHARS`] characters
pub fn truncate_diagnostic(text: &str) -> String {
    text.chars().take(DIAGNOSTIC_CHARS).collect()
}

/// Failure of a single phase attempt
#[derive(Debug, Clone, Error, PartialEq)]
pub enum PipelineError {
    /// Network failure, timeout or 5xx (retryable)
    #[error("transport error: {0}")]
    Transport(String),

    /// Rate limit hit (retryable after cool-down)
    #[error("quota exhausted: {0}")]
    Quota(String),

    /// Bad or missing credential
    #[error("authentication failed: {0}")]
    Auth(String),

    /// Provider rejected the request and will keep rejecting it
    #[error("permanent service failure: {0}")]
    Permanent(String),

    /// Model output had no usable structure
    #[error(transparent)]
    Parse(#[from] ParseError),

    /// Output failed a quality gate (retryable up to the attempt budget)
    #[error("validation failed: {0}")]
    Validation(String),

    /// A declared input artifact is absent from the run context
    #[error("missing input artifact '{0}'")]
    MissingInput(String),

    #[error("i/o error: {0}")]
    Io(String),

    #[error("{0}")]
    Other(String),
}

impl PipelineError {
    /// Whether another attempt of the same phase may succeed
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::Transport(_) | Self::Quota(_) | Self::Validation(_)
        )
    }

    pub fn is_quota(&self) -> bool {
        matches!(self, Self::Quota(_))
    }

    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation(message.into())
    }

    pub fn other(message: impl std::fmt::Display) -> Self {
        Self::Other(message.to_string())
    }

    /// Short diagnostic suitable for a log line or report entry
    pub fn diagnostic(&self) -> String {
        truncate_diagnostic(&self.to_string())
    }
}

impl From<ServiceError> for PipelineError {
    fn from(err: ServiceError) -> Self {
        let message = err.to_string();
        match err {
            ServiceError::Transient { .. } => Self::Transport(message),
            ServiceError::Quota { .. } => Self::Quota(message),
            ServiceError::Auth { .. } => Self::Auth(message),
            ServiceError::Permanent { .. } => Self::Permanent(message),
        }
    }
}

impl From<std::io::Error> for PipelineError {
    fn from(err: std::io::Error) -> Self {
        Self::Io(err.to_string())
    }
}

impl From<serde_json::Error> for PipelineError {
    fn from(err: serde_json::Error) -> Self {
        Self::Other(format!("serialization failed: {}", err))
    }
}

impl From<anyhow::Error> for PipelineError {
    fn from(err: anyhow::Error) -> Self {
        Self::Io(format!("{:#}", err))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retryable_classification() {
        assert!(PipelineError::Transport("reset".into()).is_retryable());
        assert!(PipelineError::Quota("429".into()).is_retryable());
        assert!(PipelineError::validation("too small").is_retryable());

        assert!(!PipelineError::Auth("bad key".into()).is_retryable());
        assert!(!PipelineError::Permanent("400".into()).is_retryable());
        assert!(!PipelineError::MissingInput("script.json".into()).is_retryable());
    }

    #[test]
    fn test_service_error_mapping() {
        let err: PipelineError = ServiceError::quota("veo", "RESOURCE_EXHAUSTED", None).into();
        assert!(err.is_quota());

        let err: PipelineError = ServiceError::auth("anthropic", "invalid x-api-key").into();
        assert!(matches!(err, PipelineError::Auth(_)));
    }

    #[test]
    fn test_diagnostic_is_truncated() {
        let err = PipelineError::Other("x".repeat(500));
        assert_eq!(err.diagnostic().chars().count(), DIAGNOSTIC_CHARS);
    }
}
