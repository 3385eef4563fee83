//! Provider module
//!
//! Defines the transport trait for the Gemini API and its HTTP implementation

pub mod gemini;

use crate::models::gemini::{GenerateContentRequest, GenerateContentResponse};
use crate::services::client::{DeltaSink, UpstreamError};
use async_trait::async_trait;

/// One attempt against the provider, no retries
///
/// Retry and fallback policy live in [`crate::services::UpstreamClient`];
/// implementations only perform a single request against the given model.
#[async_trait]
pub trait GeminiTransport: Send + Sync {
    /// Get the transport name
    fn name(&self) -> &str;

    /// Buffered `generateContent` call
    async fn generate(
        &self,
        model: &str,
        body: &GenerateContentRequest,
    ) -> Result<GenerateContentResponse, UpstreamError>;

    /// Streaming call; every non-empty text delta is pushed to `sink` in arrival order
    async fn stream_generate(
        &self,
        model: &str,
        body: &GenerateContentRequest,
        sink: &mut dyn DeltaSink,
    ) -> Result<(), UpstreamError>;
}

pub use gemini::GeminiHttpTransport;
