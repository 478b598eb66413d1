//! Generic JSON-over-HTTP adapter.
//!
//! The operation is a path relative to the base URL. A `Null` payload is sent
//! as a GET, anything else as a JSON POST. Used for TTS, build webhooks and
//! any provider without special response handling.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::header::RETRY_AFTER;

use super::{ServiceAdapter, ServiceCall, ServiceError, ServiceResponse};

/// Default request timeout
const DEFAULT_TIMEOUT: Duration = Duration::from_secs(120);

/// JSON HTTP client bound to one provider
pub struct HttpAdapter {
    name: String,
    base_url: String,
    headers: Vec<(String, String)>,
    timeout: Duration,
    client: reqwest::Client,
}

impl HttpAdapter {
    pub fn new(name: impl Into<String>, base_url: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            base_url: base_url.into(),
            headers: Vec::new(),
            timeout: DEFAULT_TIMEOUT,
            client: reqwest::Client::new(),
        }
    }

    /// Add a header sent with every request
    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    /// Add `Authorization: Bearer <token>`
    pub fn with_bearer(self, token: &str) -> Self {
        self.with_header("Authorization", format!("Bearer {}", token))
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Full URL for an operation
    fn url(&self, operation: &str) -> String {
        if operation.is_empty() {
            return self.base_url.clone();
        }
        format!(
            "{}/{}",
            self.base_url.trim_end_matches('/'),
            operation.trim_start_matches('/')
        )
    }
}

/// `path?k=v&..` with form-encoded parameters, for GET operations
pub fn encode_operation(path: &str, params: &[(&str, &str)]) -> String {
    let query = reqwest::Url::parse_with_params("http://localhost/", params)
        .ok()
        .and_then(|url| url.query().map(str::to_string))
        .unwrap_or_default();
    if query.is_empty() {
        path.to_string()
    } else {
        format!("{}?{}", path, query)
    }
}

/// Parse a `Retry-After` header given in seconds
pub(crate) fn parse_retry_after(value: Option<&reqwest::header::HeaderValue>) -> Option<Duration> {
    value
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.trim().parse::<u64>().ok())
        .map(Duration::from_secs)
}

#[async_trait]
impl ServiceAdapter for HttpAdapter {
    fn name(&self) -> &str {
        &self.name
    }

    async fn call(&self, call: ServiceCall) -> Result<ServiceResponse, ServiceError> {
        let url = self.url(&call.operation);

        let mut request = if call.payload.is_null() {
            self.client.get(&url)
        } else {
            self.client.post(&url).json(&call.payload)
        };
        request = request.timeout(self.timeout);
        for (name, value) in &self.headers {
            request = request.header(name.as_str(), value.as_str());
        }

        let response = request
            .send()
            .await
            .map_err(|e| ServiceError::from_reqwest(&self.name, &e))?;

        let status = response.status();
        let retry_after = parse_retry_after(response.headers().get(RETRY_AFTER));
        let body = response
            .bytes()
            .await
            .map_err(|e| ServiceError::from_reqwest(&self.name, &e))?;

        if !status.is_success() {
            return Err(ServiceError::from_status(
                &self.name,
                status.as_u16(),
                &String::from_utf8_lossy(&body),
                retry_after,
            ));
        }

        Ok(ServiceResponse::new(body.to_vec()))
    }
}
