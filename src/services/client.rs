//! Upstream client service
//!
//! Wraps a [`GeminiTransport`] with the retry, backoff and model-fallback
//! policy. Retry state lives in a [`RetryContext`] created per call, so one
//! client can serve concurrent requests.

use crate::config::Settings;
use crate::models::chat::ProviderRequest;
use crate::providers::GeminiTransport;
use crate::utils::logging::truncate_content;
use async_trait::async_trait;
use rand::Rng;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, error, info, warn};

/// Returned by `chat` when the provider answers without any candidate text
pub const EMPTY_CANDIDATE_REPLY: &str = "Sorry, I couldn't come up with a response. Please try again.";

/// Upstream failure
#[derive(Debug, Clone, Error)]
pub enum UpstreamError {
    /// Non-success HTTP status (or an error frame inside a stream)
    #[error("API request failed: {status} - {message}")]
    Status { status: u16, message: String },

    /// The stream completed without a single delta
    #[error("provider returned an empty stream")]
    EmptyStream,

    /// No response or body data within the read timeout
    #[error("no data from provider within {0:?}")]
    Timeout(Duration),

    /// Connection-level failure
    #[error("transport error: {0}")]
    Transport(String),

    /// Body could not be decoded
    #[error("invalid provider response: {0}")]
    Decode(String),

    /// The stream failed after deltas were already delivered
    #[error("stream interrupted after {delivered} deltas: {reason}")]
    Interrupted { delivered: usize, reason: String },

    /// The outward channel went away while streaming
    #[error("client disconnected")]
    ClientDisconnected,
}

impl UpstreamError {
    /// Overload, 429, 5xx and empty streams are worth another attempt
    pub fn is_retryable(&self) -> bool {
        match self {
            UpstreamError::Status { status, message } => {
                *status == 429 || (500..=599).contains(status) || mentions_overload(message)
            }
            UpstreamError::EmptyStream => true,
            UpstreamError::Transport(message) => mentions_overload(message),
            UpstreamError::Timeout(_)
            | UpstreamError::Decode(_)
            | UpstreamError::Interrupted { .. }
            | UpstreamError::ClientDisconnected => false,
        }
    }
}

fn mentions_overload(message: &str) -> bool {
    message.to_ascii_lowercase().contains("overloaded")
}

/// The outward side went away
#[derive(Debug, Clone, Copy, Error)]
#[error("outward channel closed")]
pub struct SinkClosed;

/// Receives incremental text deltas in arrival order
#[async_trait]
pub trait DeltaSink: Send {
    async fn on_delta(&mut self, delta: String) -> Result<(), SinkClosed>;
}

/// Conversation provider as seen by the relay and the handlers
#[async_trait]
pub trait ChatProvider: Send + Sync {
    /// Single buffered call
    async fn chat(&self, request: &ProviderRequest) -> Result<String, UpstreamError>;

    /// Streaming call; returns the number of deltas delivered
    async fn chat_stream(
        &self,
        request: &ProviderRequest,
        sink: &mut dyn DeltaSink,
    ) -> Result<usize, UpstreamError>;
}

/// Per-call retry state
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryContext {
    pub attempt: u32,
    pub active_model: String,
    pub base_delay: Duration,
}

/// What to do after a failed attempt
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RetryDecision {
    /// Sleep, then try the same model again
    Backoff(Duration),
    /// Restart the attempt budget against another model
    SwitchModel { from: String, to: String },
    /// Propagate the failure
    GiveUp,
}

/// Retry configuration
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Attempts per model
    pub max_attempts: u32,
    pub base_delay: Duration,
    /// Upper bound of the uniform jitter added to each delay
    pub jitter: Duration,
    pub primary_model: String,
    pub fallback_model: Option<String>,
}

impl RetryPolicy {
    pub fn from_settings(settings: &Settings) -> Self {
        Self {
            max_attempts: settings.retry.max_attempts,
            base_delay: Duration::from_millis(settings.retry.base_delay_ms),
            jitter: Duration::from_millis(settings.retry.jitter_ms),
            primary_model: settings.gemini.model.clone(),
            fallback_model: settings.effective_fallback_model().map(str::to_string),
        }
    }

    /// Fresh state for one logical call
    pub fn start(&self) -> RetryContext {
        RetryContext {
            attempt: 0,
            active_model: self.primary_model.clone(),
            base_delay: self.base_delay,
        }
    }

    /// Advance the state machine after attempt `ctx.attempt` failed with `err`
    pub fn decide(&self, ctx: &mut RetryContext, err: &UpstreamError) -> RetryDecision {
        if !err.is_retryable() {
            return RetryDecision::GiveUp;
        }

        if ctx.attempt < self.max_attempts {
            return RetryDecision::Backoff(self.backoff_delay(ctx));
        }

        match &self.fallback_model {
            Some(fallback) if *fallback != ctx.active_model => {
                let from = std::mem::replace(&mut ctx.active_model, fallback.clone());
                ctx.attempt = 0;
                RetryDecision::SwitchModel { from, to: fallback.clone() }
            }
            _ => RetryDecision::GiveUp,
        }
    }

    /// `base * 2^(attempt-1) + uniform(0, jitter)`
    pub fn backoff_delay(&self, ctx: &RetryContext) -> Duration {
        let exponent = ctx.attempt.saturating_sub(1).min(16);
        let delay = ctx.base_delay.saturating_mul(1u32 << exponent);
        let jitter_ms = self.jitter.as_millis() as u64;
        let jitter = if jitter_ms == 0 {
            0
        } else {
            rand::thread_rng().gen_range(0..=jitter_ms)
        };
        delay + Duration::from_millis(jitter)
    }
}

/// Counts deltas passing through to the caller's sink
struct CountingSink<'a> {
    inner: &'a mut dyn DeltaSink,
    delivered: usize,
}

#[async_trait]
impl<'a> DeltaSink for CountingSink<'a> {
    async fn on_delta(&mut self, delta: String) -> Result<(), SinkClosed> {
        self.inner.on_delta(delta).await?;
        self.delivered += 1;
        Ok(())
    }
}

/// Client with retry, backoff and model fallback
#[derive(Debug, Clone)]
pub struct UpstreamClient<T> {
    transport: T,
    policy: RetryPolicy,
}

impl<T: GeminiTransport> UpstreamClient<T> {
    pub fn new(transport: T, policy: RetryPolicy) -> Self {
        Self { transport, policy }
    }

    /// Get inner transport reference
    pub fn inner(&self) -> &T {
        &self.transport
    }

    /// Apply the policy to a failed attempt; `Err` means give up
    async fn recover(&self, ctx: &mut RetryContext, err: UpstreamError, op: &str) -> Result<(), UpstreamError> {
        let failed_attempt = ctx.attempt;
        match self.policy.decide(ctx, &err) {
            RetryDecision::Backoff(delay) => {
                warn!(
                    "[{}] {} attempt {}/{} on {} failed, retrying after {}ms: {}",
                    self.transport.name(),
                    op,
                    failed_attempt,
                    self.policy.max_attempts,
                    ctx.active_model,
                    delay.as_millis(),
                    err
                );
                tokio::time::sleep(delay).await;
                Ok(())
            }
            RetryDecision::SwitchModel { from, to } => {
                warn!(
                    "[{}] {} exhausted {} attempts on {}, falling back to {}: {}",
                    self.transport.name(),
                    op,
                    self.policy.max_attempts,
                    from,
                    to,
                    err
                );
                Ok(())
            }
            RetryDecision::GiveUp => {
                error!(
                    "[{}] {} failed on {} after attempt {}: {}",
                    self.transport.name(),
                    op,
                    ctx.active_model,
                    failed_attempt,
                    err
                );
                Err(err)
            }
        }
    }
}

#[async_trait]
impl<T: GeminiTransport> ChatProvider for UpstreamClient<T> {
    async fn chat(&self, request: &ProviderRequest) -> Result<String, UpstreamError> {
        let body = request.to_wire();
        let mut ctx = self.policy.start();

        loop {
            ctx.attempt += 1;
            debug!("chat attempt {} on {}", ctx.attempt, ctx.active_model);

            let err = match self.transport.generate(&ctx.active_model, &body).await {
                Ok(response) => {
                    return Ok(match response.first_text() {
                        Some(text) => {
                            info!(
                                "chat succeeded on {} (attempt {}): {}",
                                ctx.active_model,
                                ctx.attempt,
                                truncate_content(text, 80)
                            );
                            text.to_string()
                        }
                        None => {
                            warn!("chat on {} returned no candidate text", ctx.active_model);
                            EMPTY_CANDIDATE_REPLY.to_string()
                        }
                    });
                }
                Err(err) => err,
            };

            self.recover(&mut ctx, err, "chat").await?;
        }
    }

    async fn chat_stream(
        &self,
        request: &ProviderRequest,
        sink: &mut dyn DeltaSink,
    ) -> Result<usize, UpstreamError> {
        let body = request.to_wire();
        let mut ctx = self.policy.start();

        loop {
            ctx.attempt += 1;
            debug!("chat_stream attempt {} on {}", ctx.attempt, ctx.active_model);

            let mut counting = CountingSink {
                inner: &mut *sink,
                delivered: 0,
            };
            let result = self
                .transport
                .stream_generate(&ctx.active_model, &body, &mut counting)
                .await;
            let delivered = counting.delivered;

            let err = match result {
                Ok(()) if delivered > 0 => {
                    info!(
                        "chat_stream completed on {} with {} deltas (attempt {})",
                        ctx.active_model, delivered, ctx.attempt
                    );
                    return Ok(delivered);
                }
                Ok(()) => UpstreamError::EmptyStream,
                Err(UpstreamError::ClientDisconnected) => return Err(UpstreamError::ClientDisconnected),
                Err(err) if delivered > 0 => {
                    warn!("chat_stream on {} broke after {} deltas: {}", ctx.active_model, delivered, err);
                    return Err(UpstreamError::Interrupted {
                        delivered,
                        reason: err.to_string(),
                    });
                }
                Err(err) => err,
            };

            self.recover(&mut ctx, err, "chat_stream").await?;
        }
    }
}
