//! Vertex AI predict endpoints: long-running video generation, images and music.

use std::sync::Arc;

use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use serde_json::{json, Value};

use super::{
    HttpAdapter, LongRunningOperation, PollStatus, ServiceAdapter, ServiceCall, ServiceError,
    ServiceResponse,
};

pub const VIDEO_MODEL: &str = "veo-3.1-generate-preview";
pub const IMAGE_MODEL: &str = "imagen-4.0-generate-001";
pub const MUSIC_MODEL: &str = "lyria-002";

/// Vertex base URL for a region
pub fn base_url(location: &str) -> String {
    format!("https://{}-aiplatform.googleapis.com/v1", location)
}

/// Model path `projects/../locations/../publishers/google/models/<model>`
pub fn model_path(project: &str, location: &str, model: &str) -> String {
    format!(
        "projects/{}/locations/{}/publishers/google/models/{}",
        project, location, model
    )
}

/// Vertex REST adapter with bearer auth
pub fn vertex_http(location: &str, access_token: &str) -> HttpAdapter {
    HttpAdapter::new("vertex", base_url(location)).with_bearer(access_token)
}

fn decode(provider: &str, encoded: &str) -> Result<Vec<u8>, ServiceError> {
    STANDARD
        .decode(encoded)
        .map_err(|e| ServiceError::transient(provider, format!("invalid base64 payload: {}", e)))
}

/// Video generation via `predictLongRunning` + `fetchPredictOperation`
pub struct VertexVideoOperation {
    http: Arc<dyn ServiceAdapter>,
    model_path: String,
}

impl VertexVideoOperation {
    pub fn new(http: Arc<dyn ServiceAdapter>, project: &str, location: &str) -> Self {
        Self {
            http,
            model_path: model_path(project, location, VIDEO_MODEL),
        }
    }

    /// Request body for one clip
    pub fn request(prompt: &str, aspect_ratio: &str, duration_seconds: u32) -> Value {
        json!({
            "instances": [{"prompt": prompt}],
            "parameters": {
                "aspectRatio": aspect_ratio,
                "sampleCount": 1,
                "durationSeconds": duration_seconds,
            }
        })
    }
}

/// Interpret a `fetchPredictOperation` response
pub(crate) fn parse_operation_status(status: &Value) -> Result<PollStatus, ServiceError> {
    if !status.get("done").and_then(Value::as_bool).unwrap_or(false) {
        return Ok(PollStatus::Pending);
    }
    if let Some(error) = status.get("error") {
        return Ok(PollStatus::Failed(error.to_string()));
    }

    let encoded = status
        .pointer("/response/videos")
        .and_then(Value::as_array)
        .and_then(|videos| {
            videos
                .iter()
                .find_map(|v| v.get("bytesBase64Encoded").and_then(Value::as_str))
        });

    match encoded {
        Some(encoded) => Ok(PollStatus::Done(ServiceResponse::new(decode(
            "vertex", encoded,
        )?))),
        None => Ok(PollStatus::Failed("no video data in response".to_string())),
    }
}

#[async_trait]
impl LongRunningOperation for VertexVideoOperation {
    fn name(&self) -> &str {
        "vertex-video"
    }

    async fn submit(&self, request: &Value) -> Result<String, ServiceError> {
        let operation = format!("{}:predictLongRunning", self.model_path);
        let response = self.http.call(ServiceCall::new(operation, request.clone())).await?;
        let body: Value = response.json(self.name())?;

        body.get("name")
            .and_then(Value::as_str)
            .filter(|name| !name.is_empty())
            .map(str::to_string)
            .ok_or_else(|| {
                ServiceError::transient(self.name(), format!("no operation name in {}", body))
            })
    }

    async fn poll(&self, handle: &str) -> Result<PollStatus, ServiceError> {
        let operation = format!("{}:fetchPredictOperation", self.model_path);
        let response = self
            .http
            .call(ServiceCall::new(operation, json!({"operationName": handle})))
            .await?;
        let status: Value = response.json(self.name())?;
        parse_operation_status(&status)
    }
}

/// One-shot generation via `predict`; the response body is the decoded media
pub struct VertexPredictAdapter {
    http: Arc<dyn ServiceAdapter>,
    model_path: String,
    label: &'static str,
    /// Prediction fields that may carry the base64 payload, in order
    payload_fields: &'static [&'static str],
}

impl VertexPredictAdapter {
    /// Still images (thumbnails)
    pub fn image(http: Arc<dyn ServiceAdapter>, project: &str, location: &str) -> Self {
        Self {
            http,
            model_path: model_path(project, location, IMAGE_MODEL),
            label: "vertex-image",
            payload_fields: &["bytesBase64Encoded"],
        }
    }

    /// Instrumental background music (WAV)
    pub fn music(http: Arc<dyn ServiceAdapter>, project: &str, location: &str) -> Self {
        Self {
            http,
            model_path: model_path(project, location, MUSIC_MODEL),
            label: "vertex-music",
            payload_fields: &["audioContent", "audio_content", "bytesBase64Encoded", "encodedAudio"],
        }
    }

    pub fn image_request(prompt: &str, aspect_ratio: &str) -> Value {
        json!({
            "instances": [{"prompt": prompt}],
            "parameters": {"sampleCount": 1, "aspectRatio": aspect_ratio}
        })
    }

    pub fn music_request(prompt: &str) -> Value {
        json!({
            "instances": [{"prompt": prompt}],
            "parameters": {"sampleCount": 1}
        })
    }

    fn payload<'a>(&self, body: &'a Value) -> Option<&'a str> {
        let prediction = body.pointer("/predictions/0")?;
        self.payload_fields
            .iter()
            .find_map(|field| prediction.get(*field).and_then(Value::as_str))
    }
}

#[async_trait]
impl ServiceAdapter for VertexPredictAdapter {
    fn name(&self) -> &str {
        self.label
    }

    async fn call(&self, call: ServiceCall) -> Result<ServiceResponse, ServiceError> {
        let operation = format!("{}:predict", self.model_path);
        let response = self.http.call(ServiceCall::new(operation, call.payload)).await?;
        let body: Value = response.json(self.name())?;

        let encoded = self.payload(&body).ok_or_else(|| {
            ServiceError::permanent(self.name(), format!("no media in response: {}", body))
        })?;

        Ok(ServiceResponse::new(decode(self.name(), encoded)?))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sources::testing::ScriptedAdapter;

    #[test]
    fn test_model_path() {
        assert_eq!(
            model_path("proj", "us-central1", VIDEO_MODEL),
            "projects/proj/locations/us-central1/publishers/google/models/veo-3.1-generate-preview"
        );
        assert_eq!(
            base_url("us-central1"),
            "https://us-central1-aiplatform.googleapis.com/v1"
        );
    }

    #[test]
    fn test_operation_status_parsing() {
        let pending = json!({"name": "op", "done": false});
        assert!(matches!(
            parse_operation_status(&pending).unwrap(),
            PollStatus::Pending
        ));

        let done = json!({
            "done": true,
            "response": {"videos": [{"bytesBase64Encoded": STANDARD.encode(b"mp4data")}]}
        });
        match parse_operation_status(&done).unwrap() {
            PollStatus::Done(response) => assert_eq!(response.body, b"mp4data"),
            other => panic!("expected done, got {:?}", other),
        }

        let failed = json!({"done": true, "error": {"code": 3}});
        assert!(matches!(
            parse_operation_status(&failed).unwrap(),
            PollStatus::Failed(_)
        ));

        let empty = json!({"done": true, "response": {"videos": []}});
        assert!(matches!(
            parse_operation_status(&empty).unwrap(),
            PollStatus::Failed(_)
        ));
    }

    #[tokio::test]
    async fn test_music_payload_field_fallback() {
        let http = Arc::new(ScriptedAdapter::new(vec![ScriptedAdapter::json(json!({
            "predictions": [{"audioContent": STANDARD.encode(b"RIFFwav")}]
        }))]));
        let music = VertexPredictAdapter::music(http.clone(), "proj", "us-central1");
        let response = music
            .call(ServiceCall::new("", VertexPredictAdapter::music_request("calm piano")))
            .await
            .unwrap();

        assert_eq!(response.body, b"RIFFwav");
        assert!(http.operations()[0].ends_with("models/lyria-002:predict"));
    }
}
