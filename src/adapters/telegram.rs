//! Telegram Bot API client used as the publish target for finished videos.

use async_trait::async_trait;
use reqwest::multipart::{Form, Part};
use serde::Deserialize;

use super::ServiceError;

const PROVIDER: &str = "telegram";

/// Telegram Bot API client
pub struct TelegramClient {
    /// Bot token
    bot_token: String,
    /// Target chat ID
    chat_id: String,
    /// HTTP client
    client: reqwest::Client,
}

/// Response from Telegram API
#[derive(Debug, Deserialize)]
struct TelegramResponse<T> {
    ok: bool,
    result: Option<T>,
    description: Option<String>,
    error_code: Option<u16>,
}

/// Message result from sendMessage/sendVideo
#[derive(Debug, Deserialize)]
struct MessageResult {
    message_id: i64,
}

impl TelegramClient {
    /// Create a new Telegram client
    pub fn new(bot_token: String, chat_id: String) -> Self {
        Self {
            bot_token,
            chat_id,
            client: reqwest::Client::new(),
        }
    }

    /// Build API URL
    fn api_url(&self, method: &str) -> String {
        format!("https://api.telegram.org/bot{}/{}", self.bot_token, method)
    }

    async fn read_response(response: reqwest::Response) -> Result<i64, ServiceError> {
        let status = response.status().as_u16();
        let text = response
            .text()
            .await
            .map_err(|e| ServiceError::from_reqwest(PROVIDER, &e))?;

        let result: TelegramResponse<MessageResult> = serde_json::from_str(&text)
            .map_err(|_| ServiceError::from_status(PROVIDER, status, &text, None))?;

        if !result.ok {
            return Err(ServiceError::from_status(
                PROVIDER,
                result.error_code.unwrap_or(status),
                &result.description.unwrap_or_default(),
                None,
            ));
        }

        Ok(result.result.map(|r| r.message_id).unwrap_or(0))
    }

    /// Upload in-memory video bytes with an optional caption
    pub async fn send_video_bytes(
        &self,
        video: Vec<u8>,
        file_name: &str,
        caption: Option<&str>,
    ) -> Result<i64, ServiceError> {
        let file_part = Part::bytes(video)
            .file_name(file_name.to_string())
            .mime_str("video/mp4")
            .map_err(|e| ServiceError::permanent(PROVIDER, e.to_string()))?;

        let mut form = Form::new()
            .text("chat_id", self.chat_id.clone())
            .text("supports_streaming", "true")
            .part("video", file_part);

        if let Some(cap) = caption {
            form = form.text("caption", truncate_caption(cap));
        }

        let response = self
            .client
            .post(self.api_url("sendVideo"))
            .multipart(form)
            .send()
            .await
            .map_err(|e| ServiceError::from_reqwest(PROVIDER, &e))?;

        Self::read_response(response).await
    }
}

/// Telegram caps captions at 1024 characters
const MAX_CAPTION_CHARS: usize = 1024;

fn truncate_caption(caption: &str) -> String {
    caption.chars().take(MAX_CAPTION_CHARS).collect()
}

/// Destination for a finished video
#[async_trait]
pub trait VideoPublisher: Send + Sync {
    fn name(&self) -> &str;

    /// Upload the video; returns a provider reference to the published post
    async fn publish(
        &self,
        video: Vec<u8>,
        file_name: &str,
        caption: &str,
    ) -> Result<String, ServiceError>;
}

#[async_trait]
impl VideoPublisher for TelegramClient {
    fn name(&self) -> &str {
        PROVIDER
    }

    async fn publish(
        &self,
        video: Vec<u8>,
        file_name: &str,
        caption: &str,
    ) -> Result<String, ServiceError> {
        let message_id = self.send_video_bytes(video, file_name, Some(caption)).await?;
        Ok(format!("{}:{}", self.chat_id, message_id))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_api_url() {
        let client = TelegramClient::new("TOKEN".to_string(), "123".to_string());
        assert_eq!(
            client.api_url("sendVideo"),
            "https://api.telegram.org/botTOKEN/sendVideo"
        );
    }

    #[test]
    fn test_caption_truncation() {
        let long = "é".repeat(2000);
        assert_eq!(truncate_caption(&long).chars().count(), 1024);
        assert_eq!(truncate_caption("short"), "short");
    }

    #[test]
    fn test_error_response_shape() {
        let body = r#"{"ok": false, "error_code": 401, "description": "Unauthorized"}"#;
        let parsed: TelegramResponse<MessageResult> = serde_json::from_str(body).unwrap();
        assert!(!parsed.ok);
        assert_eq!(parsed.error_code, Some(401));
        assert!(parsed.result.is_none());
    }
}
