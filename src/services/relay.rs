//! Stream relay
//!
//! Owns the outward event channel of one streaming request and guarantees the
//! sequence `start, chunk*, (done|error)`, whatever the provider does. When
//! the stream fails before producing output, a single buffered call is
//! replayed as fixed-size chunks.

use crate::models::chat::ProviderRequest;
use crate::models::events::RelayEvent;
use crate::models::UserId;
use crate::services::client::{ChatProvider, DeltaSink, SinkClosed, UpstreamError};
use crate::utils::error::UPSTREAM_FAILURE_MESSAGE;
use async_trait::async_trait;
use axum::response::sse::Event;
use std::convert::Infallible;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

/// Outward side of the relay
#[async_trait]
pub trait EventSink: Send {
    async fn send(&mut self, event: RelayEvent) -> Result<(), SinkClosed>;

    /// Release the channel; later sends fail
    async fn close(&mut self);
}

/// Event sink feeding an axum `Sse` body through a bounded channel
pub struct ChannelSink {
    tx: Option<mpsc::Sender<Result<Event, Infallible>>>,
}

impl ChannelSink {
    pub fn new(tx: mpsc::Sender<Result<Event, Infallible>>) -> Self {
        Self { tx: Some(tx) }
    }
}

#[async_trait]
impl EventSink for ChannelSink {
    async fn send(&mut self, event: RelayEvent) -> Result<(), SinkClosed> {
        let tx = self.tx.as_ref().ok_or(SinkClosed)?;
        let json = serde_json::to_string(&event).map_err(|e| {
            error!("Event serialization failed: {}", e);
            SinkClosed
        })?;
        tx.send(Ok(Event::default().data(json))).await.map_err(|_| SinkClosed)
    }

    async fn close(&mut self) {
        // dropping the sender ends the response body
        self.tx.take();
    }
}

/// Everything the relay needs for one request
#[derive(Debug, Clone)]
pub struct RelayJob {
    pub user_id: UserId,
    /// Request for the streaming attempt
    pub stream_request: ProviderRequest,
    /// Request for the buffered last resort
    pub fallback_request: ProviderRequest,
    /// Balance reported in the `done` event
    pub remaining_credits: u32,
}

/// How a relay run ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RelayOutcome {
    Streamed { chunks: usize },
    Fallback { chunks: usize },
    Failed,
    Disconnected,
}

/// Forwards provider deltas as `chunk` events without buffering
struct ChunkForwarder<'a> {
    sink: &'a mut dyn EventSink,
    emitted: usize,
}

#[async_trait]
impl<'a> DeltaSink for ChunkForwarder<'a> {
    async fn on_delta(&mut self, delta: String) -> Result<(), SinkClosed> {
        debug!("relay chunk size={}", delta.len());
        self.sink.send(RelayEvent::chunk(delta)).await?;
        self.emitted += 1;
        Ok(())
    }
}

#[derive(Clone)]
pub struct StreamRelay {
    provider: Arc<dyn ChatProvider>,
    slice_chars: usize,
}

impl StreamRelay {
    pub fn new(provider: Arc<dyn ChatProvider>, slice_chars: usize) -> Self {
        Self {
            provider,
            slice_chars: slice_chars.max(1),
        }
    }

    /// Run one request to completion; the sink is closed on every path
    pub async fn run(&self, job: RelayJob, sink: &mut dyn EventSink) -> RelayOutcome {
        let outcome = self.drive(&job, sink).await;
        sink.close().await;

        match outcome {
            RelayOutcome::Disconnected => info!("Relay for user {} stopped: client disconnected", job.user_id),
            RelayOutcome::Failed => warn!("Relay for user {} ended with an error event", job.user_id),
            _ => info!("Relay for user {} finished: {:?}", job.user_id, outcome),
        }
        outcome
    }

    async fn drive(&self, job: &RelayJob, sink: &mut dyn EventSink) -> RelayOutcome {
        if sink.send(RelayEvent::Start).await.is_err() {
            return RelayOutcome::Disconnected;
        }

        let mut forwarder = ChunkForwarder { sink: &mut *sink, emitted: 0 };
        let result = self.provider.chat_stream(&job.stream_request, &mut forwarder).await;
        let emitted = forwarder.emitted;

        let err = match result {
            Ok(_) => {
                return self
                    .finish(sink, job.remaining_credits, RelayOutcome::Streamed { chunks: emitted })
                    .await;
            }
            Err(UpstreamError::ClientDisconnected) => return RelayOutcome::Disconnected,
            Err(err) => err,
        };

        if emitted > 0 {
            // replaying a buffered answer would duplicate text the client already has
            error!("Stream for user {} failed after {} chunks: {}", job.user_id, emitted, err);
            return Self::fail(sink, &err).await;
        }

        warn!("Stream for user {} failed, falling back to buffered call: {}", job.user_id, err);
        let text = match self.provider.chat(&job.fallback_request).await {
            Ok(text) => text,
            Err(fallback_err) => {
                error!("Buffered fallback for user {} failed: {}", job.user_id, fallback_err);
                return Self::fail(sink, &fallback_err).await;
            }
        };

        let slices = split_into_slices(&text, self.slice_chars);
        let chunks = slices.len();
        for slice in slices {
            if sink.send(RelayEvent::chunk(slice)).await.is_err() {
                return RelayOutcome::Disconnected;
            }
        }

        self.finish(sink, job.remaining_credits, RelayOutcome::Fallback { chunks }).await
    }

    async fn finish(&self, sink: &mut dyn EventSink, remaining: u32, outcome: RelayOutcome) -> RelayOutcome {
        let done = RelayEvent::Done {
            remaining_chat_coupons: remaining,
        };
        match sink.send(done).await {
            Ok(()) => outcome,
            Err(_) => RelayOutcome::Disconnected,
        }
    }

    async fn fail(sink: &mut dyn EventSink, err: &UpstreamError) -> RelayOutcome {
        let event = RelayEvent::Error {
            error: UPSTREAM_FAILURE_MESSAGE.to_string(),
            details: Some(err.to_string()),
        };
        match sink.send(event).await {
            Ok(()) => RelayOutcome::Failed,
            Err(_) => RelayOutcome::Disconnected,
        }
    }
}

/// Split on character boundaries into slices of at most `size` characters
pub fn split_into_slices(text: &str, size: usize) -> Vec<String> {
    let size = size.max(1);
    let chars: Vec<char> = text.chars().collect();
    chars.chunks(size).map(|slice| slice.iter().collect()).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_split_into_slices() {
        let text = "a".repeat(65);
        let slices = split_into_slices(&text, 30);
        assert_eq!(slices.iter().map(|s| s.len()).collect::<Vec<_>>(), vec![30, 30, 5]);
        assert_eq!(slices.concat(), text);
        assert!(split_into_slices("", 30).is_empty());
    }

    #[test]
    fn test_split_counts_characters() {
        let text = "안녕하세요 만나서 반갑습니다";
        let slices = split_into_slices(text, 4);
        assert_eq!(slices[0], "안녕하세");
        assert_eq!(slices.concat(), text);
    }

    #[tokio::test]
    async fn test_channel_sink_close() {
        let (tx, mut rx) = mpsc::channel(4);
        let mut sink = ChannelSink::new(tx);

        sink.send(RelayEvent::Start).await.unwrap();
        sink.close().await;
        assert!(sink.send(RelayEvent::chunk("late")).await.is_err());

        assert!(rx.recv().await.is_some());
        assert!(rx.recv().await.is_none());
    }

    #[tokio::test]
    async fn test_channel_sink_reports_dropped_receiver() {
        let (tx, rx) = mpsc::channel(4);
        drop(rx);
        let mut sink = ChannelSink::new(tx);
        assert!(sink.send(RelayEvent::Start).await.is_err());
    }
}
