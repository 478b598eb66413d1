//! Adapter interfaces for external services.
//!
//! Every remote provider (LLM, TTS, video/image generation, upload targets,
//! build webhooks) is reached through [`ServiceAdapter`], which normalizes
//! transport failures into a typed [`ServiceError`].

pub mod anthropic;
pub mod ffmpeg;
pub mod http;
pub mod long_running;
pub mod quota;
pub mod telegram;
pub mod vertex;

use std::time::Duration;

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use thiserror::Error;

use crate::error::truncate_diagnostic;

pub use anthropic::AnthropicAdapter;
pub use ffmpeg::{FfmpegAssembler, MediaAssembler, MediaInfo};
pub use http::{encode_operation, HttpAdapter};
pub use long_running::{run_to_completion, LongRunningOperation, LongRunningPolicy, PollStatus};
pub use quota::QuotaGuard;
pub use telegram::{TelegramClient, VideoPublisher};
pub use vertex::{VertexPredictAdapter, VertexVideoOperation};

/// Marker some providers put in error bodies instead of (or alongside) a 429
const RESOURCE_EXHAUSTED: &str = "RESOURCE_EXHAUSTED";

/// A single request to a remote provider
#[derive(Debug, Clone)]
pub struct ServiceCall {
    /// Provider-specific operation (usually a path relative to the base URL)
    pub operation: String,

    /// JSON payload; `Null` means the call carries no body
    pub payload: serde_json::Value,
}

impl ServiceCall {
    pub fn new(operation: impl Into<String>, payload: serde_json::Value) -> Self {
        Self {
            operation: operation.into(),
            payload,
        }
    }

    /// A call without a request body
    pub fn get(operation: impl Into<String>) -> Self {
        Self::new(operation, serde_json::Value::Null)
    }
}

/// Output from a successful provider call
#[derive(Debug, Clone, Default)]
pub struct ServiceResponse {
    /// Raw response body
    pub body: Vec<u8>,

    /// Estimated cost in USD (if the provider reports usage)
    pub cost_usd: Option<f64>,
}

impl ServiceResponse {
    pub fn new(body: Vec<u8>) -> Self {
        Self {
            body,
            cost_usd: None,
        }
    }

    pub fn with_cost(mut self, cost_usd: f64) -> Self {
        self.cost_usd = Some(cost_usd);
        self
    }

    /// Body decoded as (lossy) UTF-8 text
    pub fn text(&self) -> String {
        String::from_utf8_lossy(&self.body).into_owned()
    }

    /// Body decoded as JSON
    pub fn json<T: DeserializeOwned>(&self, provider: &str) -> Result<T, ServiceError> {
        serde_json::from_slice(&self.body).map_err(|e| {
            ServiceError::transient(
                provider,
                format!("malformed response body ({}): {}", e, self.text()),
            )
        })
    }
}

/// Typed failure of a remote call
#[derive(Debug, Clone, Error, PartialEq)]
pub enum ServiceError {
    /// Timeouts, 5xx, connection resets
    #[error("{provider}: transient failure: {message}")]
    Transient { provider: String, message: String },

    /// 429 / RESOURCE_EXHAUSTED
    #[error("{provider}: quota exhausted: {message}")]
    Quota {
        provider: String,
        message: String,
        retry_after: Option<Duration>,
    },

    /// 4xx other than 429 and auth failures
    #[error("{provider}: permanent failure: {message}")]
    Permanent { provider: String, message: String },

    /// Bad or missing credential
    #[error("{provider}: authentication failed: {message}")]
    Auth { provider: String, message: String },
}

impl ServiceError {
    pub fn transient(provider: &str, message: impl AsRef<str>) -> Self {
        Self::Transient {
            provider: provider.to_string(),
            message: truncate_diagnostic(message.as_ref()),
        }
    }

    pub fn quota(provider: &str, message: impl AsRef<str>, retry_after: Option<Duration>) -> Self {
        Self::Quota {
            provider: provider.to_string(),
            message: truncate_diagnostic(message.as_ref()),
            retry_after,
        }
    }

    pub fn permanent(provider: &str, message: impl AsRef<str>) -> Self {
        Self::Permanent {
            provider: provider.to_string(),
            message: truncate_diagnostic(message.as_ref()),
        }
    }

    pub fn auth(provider: &str, message: impl AsRef<str>) -> Self {
        Self::Auth {
            provider: provider.to_string(),
            message: truncate_diagnostic(message.as_ref()),
        }
    }

    /// Classify an HTTP status and response body
    pub fn from_status(
        provider: &str,
        status: u16,
        body: &str,
        retry_after: Option<Duration>,
    ) -> Self {
        let message = format!("HTTP {}: {}", status, body.trim());

        if status == 429 || body.contains(RESOURCE_EXHAUSTED) {
            return Self::quota(provider, message, retry_after);
        }

        match status {
            401 | 403 => Self::auth(provider, message),
            408 => Self::transient(provider, message),
            400..=499 => Self::permanent(provider, message),
            _ => Self::transient(provider, message),
        }
    }

    /// Classify a transport-level reqwest failure
    pub fn from_reqwest(provider: &str, err: &reqwest::Error) -> Self {
        if let Some(status) = err.status() {
            return Self::from_status(provider, status.as_u16(), &err.to_string(), None);
        }
        // Timeouts, refused connections, resets and body decode failures
        Self::transient(provider, err.to_string())
    }

    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Transient { .. } | Self::Quota { .. })
    }

    pub fn is_quota(&self) -> bool {
        matches!(self, Self::Quota { .. })
    }

    pub fn provider(&self) -> &str {
        match self {
            Self::Transient { provider, .. }
            | Self::Quota { provider, .. }
            | Self::Permanent { provider, .. }
            | Self::Auth { provider, .. } => provider,
        }
    }
}

/// Uniform interface to an unreliable remote provider
#[async_trait]
pub trait ServiceAdapter: Send + Sync {
    /// Human-readable provider name
    fn name(&self) -> &str;

    /// Perform one remote call. No local state is mutated.
    async fn call(&self, call: ServiceCall) -> Result<ServiceResponse, ServiceError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_classification() {
        assert!(matches!(
            ServiceError::from_status("p", 429, "slow down", None),
            ServiceError::Quota { .. }
        ));
        assert!(matches!(
            ServiceError::from_status("p", 400, "RESOURCE_EXHAUSTED: quota", None),
            ServiceError::Quota { .. }
        ));
        assert!(matches!(
            ServiceError::from_status("p", 401, "bad key", None),
            ServiceError::Auth { .. }
        ));
        assert!(matches!(
            ServiceError::from_status("p", 404, "no such model", None),
            ServiceError::Permanent { .. }
        ));
        assert!(matches!(
            ServiceError::from_status("p", 503, "unavailable", None),
            ServiceError::Transient { .. }
        ));
        assert!(matches!(
            ServiceError::from_status("p", 408, "request timeout", None),
            ServiceError::Transient { .. }
        ));
    }

    #[test]
    fn test_quota_keeps_retry_after() {
        let err = ServiceError::from_status("p", 429, "", Some(Duration::from_secs(7)));
        match err {
            ServiceError::Quota { retry_after, .. } => {
                assert_eq!(retry_after, Some(Duration::from_secs(7)))
            }
            other => panic!("expected quota error, got {:?}", other),
        }
    }

    #[test]
    fn test_response_json_failure_is_transient() {
        let response = ServiceResponse::new(b"<html>gateway</html>".to_vec());
        let result: Result<serde_json::Value, _> = response.json("p");
        assert!(matches!(result, Err(ServiceError::Transient { .. })));
    }

    #[test]
    fn test_publisher_reexport() {
        let publisher: std::sync::Arc<dyn VideoPublisher> =
            std::sync::Arc::new(TelegramClient::new("token".to_string(), "chat".to_string()));
        assert_eq!(publisher.name(), "telegram");
    }
}
