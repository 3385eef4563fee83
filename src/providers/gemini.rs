//! Gemini HTTP transport
//!
//! `generateContent` and `streamGenerateContent?alt=sse` over reqwest,
//! authenticated with the `x-goog-api-key` header

use super::GeminiTransport;
use crate::config::settings::GeminiConfig;
use crate::models::gemini::{ErrorEnvelope, GenerateContentRequest, GenerateContentResponse};
use crate::services::client::{DeltaSink, UpstreamError};
use crate::services::sse::FrameDecoder;
use crate::utils::logging::truncate_content;
use anyhow::{Context, Result};
use async_trait::async_trait;
use futures::StreamExt;
use reqwest::{Client, Response};
use std::time::Duration;
use tracing::{debug, warn};

const API_KEY_HEADER: &str = "x-goog-api-key";

/// Gemini transport
#[derive(Debug, Clone)]
pub struct GeminiHttpTransport {
    client: Client,
    base_url: String,
    api_key: String,
    read_timeout: Duration,
}

impl GeminiHttpTransport {
    /// Create a new transport; `read_timeout` bounds the buffered call and every streamed read
    pub fn new(base_url: &str, api_key: &str, read_timeout: Duration) -> Result<Self> {
        let client = Client::builder()
            .connect_timeout(read_timeout)
            .user_agent(concat!("chatrelay/", env!("CARGO_PKG_VERSION")))
            .build()
            .context("Failed to create HTTP client")?;

        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key: api_key.to_string(),
            read_timeout,
        })
    }

    pub fn from_config(config: &GeminiConfig) -> Result<Self> {
        Self::new(&config.base_url, &config.api_key, config.read_timeout())
    }

    /// Build the request URL
    fn build_url(&self, model: &str, method: &str) -> String {
        format!("{}/models/{}:{}", self.base_url, model, method)
    }

    fn map_send_error(&self, err: reqwest::Error) -> UpstreamError {
        if err.is_timeout() {
            UpstreamError::Timeout(self.read_timeout)
        } else {
            UpstreamError::Transport(err.to_string())
        }
    }

    /// Turn a non-success response into an error, preferring the provider's message
    ///
    /// The body read is bounded by the read timeout; a stalled error body
    /// becomes `Timeout`.
    async fn error_from_response(&self, response: Response) -> UpstreamError {
        let status = response.status();
        let error_text = match tokio::time::timeout(self.read_timeout, response.text()).await {
            Ok(text) => text.unwrap_or_default(),
            Err(_) => {
                warn!("Gemini error body ({}) not received within {:?}", status, self.read_timeout);
                return UpstreamError::Timeout(self.read_timeout);
            }
        };

        let message = match serde_json::from_str::<ErrorEnvelope>(&error_text) {
            Ok(envelope) => envelope.error.message,
            Err(_) if !error_text.trim().is_empty() => truncate_content(error_text.trim(), 200),
            Err(_) => status.canonical_reason().unwrap_or("unknown error").to_string(),
        };

        UpstreamError::Status {
            status: status.as_u16(),
            message,
        }
    }
}

/// Decode one streamed payload into its text delta
///
/// Error frames become `Status` errors; frames without text are skipped.
fn delta_from_payload(payload: &str) -> Result<Option<String>, UpstreamError> {
    if let Ok(envelope) = serde_json::from_str::<ErrorEnvelope>(payload) {
        return Err(UpstreamError::Status {
            status: envelope.error.code.unwrap_or(500),
            message: envelope.error.message,
        });
    }

    match serde_json::from_str::<GenerateContentResponse>(payload) {
        Ok(frame) => Ok(frame
            .first_text()
            .filter(|text| !text.is_empty())
            .map(str::to_string)),
        Err(e) => {
            warn!("Failed to parse stream frame: {} - data: {}", e, truncate_content(payload, 120));
            Ok(None)
        }
    }
}

#[async_trait]
impl GeminiTransport for GeminiHttpTransport {
    fn name(&self) -> &str {
        "gemini"
    }

    async fn generate(
        &self,
        model: &str,
        body: &GenerateContentRequest,
    ) -> Result<GenerateContentResponse, UpstreamError> {
        let url = self.build_url(model, "generateContent");
        debug!("Sending Gemini request to {}", url);

        let response = self
            .client
            .post(&url)
            .timeout(self.read_timeout)
            .header(API_KEY_HEADER, &self.api_key)
            .json(body)
            .send()
            .await
            .map_err(|e| self.map_send_error(e))?;

        if !response.status().is_success() {
            return Err(self.error_from_response(response).await);
        }

        response
            .json::<GenerateContentResponse>()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    UpstreamError::Timeout(self.read_timeout)
                } else {
                    UpstreamError::Decode(e.to_string())
                }
            })
    }

    async fn stream_generate(
        &self,
        model: &str,
        body: &GenerateContentRequest,
        sink: &mut dyn DeltaSink,
    ) -> Result<(), UpstreamError> {
        let url = format!("{}?alt=sse", self.build_url(model, "streamGenerateContent"));
        debug!("Sending Gemini streaming request to {}", url);

        let request = self
            .client
            .post(&url)
            .header(API_KEY_HEADER, &self.api_key)
            .header("Accept", "text/event-stream")
            .json(body)
            .send();

        let response = tokio::time::timeout(self.read_timeout, request)
            .await
            .map_err(|_| UpstreamError::Timeout(self.read_timeout))?
            .map_err(|e| self.map_send_error(e))?;

        if !response.status().is_success() {
            return Err(self.error_from_response(response).await);
        }

        let mut body_stream = response.bytes_stream();
        let mut decoder = FrameDecoder::new();

        loop {
            let next = tokio::time::timeout(self.read_timeout, body_stream.next())
                .await
                .map_err(|_| UpstreamError::Timeout(self.read_timeout))?;

            let Some(chunk) = next else {
                break;
            };
            let chunk = chunk.map_err(|e| UpstreamError::Transport(format!("Failed to read stream chunk: {}", e)))?;

            for payload in decoder.feed(&chunk) {
                if let Some(delta) = delta_from_payload(&payload)? {
                    debug!("[gemini] delta size={}", delta.len());
                    sink.on_delta(delta)
                        .await
                        .map_err(|_| UpstreamError::ClientDisconnected)?;
                }
            }
        }

        if let Some(payload) = decoder.finish() {
            if let Some(delta) = delta_from_payload(&payload)? {
                sink.on_delta(delta)
                    .await
                    .map_err(|_| UpstreamError::ClientDisconnected)?;
            }
        }

        Ok(())
    }
}
