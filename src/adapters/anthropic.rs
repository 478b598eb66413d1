//! Anthropic Messages API adapter.

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::json;

use super::{HttpAdapter, ServiceAdapter, ServiceCall, ServiceError, ServiceResponse};
use crate::error::PipelineError;

const BASE_URL: &str = "https://api.anthropic.com/v1";
const API_VERSION: &str = "2023-06-01";
const PROVIDER: &str = "anthropic";

/// USD per input / output token
const INPUT_TOKEN_COST: f64 = 3e-6;
const OUTPUT_TOKEN_COST: f64 = 15e-6;

/// Flat estimate used when the response carries no usage block
pub const ESTIMATED_CALL_COST: f64 = 0.002;

#[derive(Debug, Deserialize)]
struct MessagesResponse {
    #[serde(default)]
    content: Vec<ContentBlock>,
    usage: Option<Usage>,
}

#[derive(Debug, Deserialize)]
struct ContentBlock {
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    text: String,
}

#[derive(Debug, Deserialize)]
struct Usage {
    #[serde(default)]
    input_tokens: u64,
    #[serde(default)]
    output_tokens: u64,
}

/// LLM adapter: the `messages` operation returns the concatenated text blocks
pub struct AnthropicAdapter {
    http: HttpAdapter,
}

impl AnthropicAdapter {
    pub fn new(api_key: &str) -> Self {
        Self::with_base_url(api_key, BASE_URL)
    }

    pub fn with_base_url(api_key: &str, base_url: &str) -> Self {
        let http = HttpAdapter::new(PROVIDER, base_url)
            .with_header("x-api-key", api_key)
            .with_header("anthropic-version", API_VERSION);
        Self { http }
    }
}

#[async_trait]
impl ServiceAdapter for AnthropicAdapter {
    fn name(&self) -> &str {
        PROVIDER
    }

    async fn call(&self, call: ServiceCall) -> Result<ServiceResponse, ServiceError> {
        let raw = self.http.call(call).await?;
        let parsed: MessagesResponse = raw.json(PROVIDER)?;

        let text: String = parsed
            .content
            .iter()
            .filter(|block| block.kind == "text")
            .map(|block| block.text.as_str())
            .collect::<Vec<_>>()
            .join("");

        let cost = parsed
            .usage
            .map(|u| u.input_tokens as f64 * INPUT_TOKEN_COST + u.output_tokens as f64 * OUTPUT_TOKEN_COST)
            .unwrap_or(ESTIMATED_CALL_COST);

        Ok(ServiceResponse::new(text.into_bytes()).with_cost(cost))
    }
}

/// Send one user prompt through an LLM adapter; returns the text and its cost
pub async fn complete(
    llm: &dyn ServiceAdapter,
    model: &str,
    prompt: &str,
    max_tokens: u32,
) -> Result<(String, f64), PipelineError> {
    let call = ServiceCall::new(
        "messages",
        json!({
            "model": model,
            "max_tokens": max_tokens,
            "messages": [{"role": "user", "content": prompt}],
        }),
    );
    let response = llm.call(call).await?;
    let cost = response.cost_usd.unwrap_or(ESTIMATED_CALL_COST);
    Ok((response.text(), cost))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_messages_response_parsing() {
        let body = r#"{
            "content": [{"type": "text", "text": "[{\"name\": \"A\"}]"}],
            "usage": {"input_tokens": 1000, "output_tokens": 100}
        }"#;
        let parsed: MessagesResponse = serde_json::from_str(body).unwrap();
        assert_eq!(parsed.content[0].text, "[{\"name\": \"A\"}]");
        let usage = parsed.usage.unwrap();
        let cost = usage.input_tokens as f64 * INPUT_TOKEN_COST
            + usage.output_tokens as f64 * OUTPUT_TOKEN_COST;
        assert!((cost - 0.0045).abs() < 1e-9);
    }
}
