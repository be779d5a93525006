//! Vision-language API client (Anthropic Messages API)

use std::time::Duration;

use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use reqwest::header::{HeaderMap, HeaderValue, CONTENT_TYPE};
use serde::{Deserialize, Serialize};
use tracing::debug;

use super::camera::Frame;
use super::ScanError;
use crate::state::Mode;

const MESSAGES_URL: &str = "https://api.anthropic.com/v1/messages";
const API_VERSION: &str = "2023-06-01";
const REQUEST_TIMEOUT: Duration = Duration::from_secs(60);

#[derive(Debug, Serialize)]
struct MessagesRequest<'a> {
    model: &'a str,
    max_tokens: u32,
    messages: [Message<'a>; 1],
}

#[derive(Debug, Serialize)]
struct Message<'a> {
    role: &'static str,
    content: [ContentBlock<'a>; 2],
}

#[derive(Debug, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum ContentBlock<'a> {
    Image { source: ImageSource },
    Text { text: &'a str },
}

#[derive(Debug, Serialize)]
struct ImageSource {
    #[serde(rename = "type")]
    kind: &'static str,
    media_type: &'static str,
    data: String,
}

#[derive(Debug, Deserialize)]
struct MessagesResponse {
    content: Vec<ResponseBlock>,
}

#[derive(Debug, Deserialize)]
struct ResponseBlock {
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    text: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ErrorResponse {
    error: ErrorBody,
}

#[derive(Debug, Deserialize)]
struct ErrorBody {
    message: String,
}

/// Client for the vision model
#[derive(Debug, Clone)]
pub struct VisionClient {
    client: reqwest::Client,
    model: String,
    max_tokens: u32,
}

impl VisionClient {
    pub fn new(api_key: &str, model: &str, max_tokens: u32) -> Result<Self, ScanError> {
        let mut headers = HeaderMap::new();
        let mut key = HeaderValue::from_str(api_key)
            .map_err(|_| ScanError::Api {
                status: 0,
                message: "API key contains invalid header characters".to_string(),
            })?;
        key.set_sensitive(true);
        headers.insert("x-api-key", key);
        headers.insert("anthropic-version", HeaderValue::from_static(API_VERSION));
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));

        let client = reqwest::Client::builder()
            .default_headers(headers)
            .timeout(REQUEST_TIMEOUT)
            .build()?;

        Ok(Self {
            client,
            model: model.to_string(),
            max_tokens,
        })
    }

    /// Ask the model to read `frame` according to `mode`
    pub async fn analyze(&self, frame: &Frame, mode: Mode) -> Result<String, ScanError> {
        let body = build_request(&self.model, self.max_tokens, frame, mode);
        debug!(model = %self.model, %mode, "sending frame to vision model");

        let response = self.client.post(MESSAGES_URL).json(&body).send().await?;

        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            let message = serde_json::from_str::<ErrorResponse>(&text)
                .map(|e| e.error.message)
                .unwrap_or(text);
            return Err(ScanError::Api {
                status: status.as_u16(),
                message,
            });
        }

        let parsed: MessagesResponse = response.json().await?;
        first_text(parsed)
    }
}

fn build_request<'a>(
    model: &'a str,
    max_tokens: u32,
    frame: &Frame,
    mode: Mode,
) -> MessagesRequest<'a> {
    MessagesRequest {
        model,
        max_tokens,
        messages: [Message {
            role: "user",
            content: [
                ContentBlock::Image {
                    source: ImageSource {
                        kind: "base64",
                        media_type: "image/jpeg",
                        data: STANDARD.encode(&frame.jpeg),
                    },
                },
                ContentBlock::Text {
                    text: mode.prompt(),
                },
            ],
        }],
    }
}

fn first_text(response: MessagesResponse) -> Result<String, ScanError> {
    let text = response
        .content
        .into_iter()
        .find(|block| block.kind == "text")
        .and_then(|block| block.text)
        .map(|text| text.trim().to_string())
        .unwrap_or_default();

    if text.is_empty() {
        return Err(ScanError::EmptyResult);
    }
    Ok(text)
}
