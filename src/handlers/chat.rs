//! Chat handlers
//!
//! Session start (credit consumption), buffered and streaming message
//! endpoints, and the read-only eligibility report

use crate::handlers::AppState;
use crate::middleware::auth::AuthenticatedUser;
use crate::models::chat::{
    ChatMessageRequest, ChatMessageResponse, ChatStatusResponse, GenerationOverrides, RawTurn,
    StartChatRequest, StartChatResponse,
};
use crate::models::UserId;
use crate::services::relay::{ChannelSink, RelayJob};
use crate::utils::error::{AppError, AppResult};
use crate::utils::logging::create_provider_request_log_summary;
use axum::{
    extract::State,
    http::header,
    response::{
        sse::{Event, KeepAlive},
        IntoResponse, Response, Sse,
    },
    Extension, Json,
};
use std::convert::Infallible;
use std::sync::Arc;
use std::time::Duration;
use tokio_stream::wrappers::ReceiverStream;
use tracing::{debug, info, warn, Instrument};

const SESSION_STARTED: &str = "Chat session started";
const SESSION_ALREADY_STARTED: &str = "Chat session already started";

/// Start a chat session, consuming one credit
///
/// POST /api/v1/chat/start
pub async fn start_chat(
    State(state): State<Arc<AppState>>,
    Extension(user): Extension<AuthenticatedUser>,
    Json(body): Json<StartChatRequest>,
) -> AppResult<Json<StartChatResponse>> {
    let user_id = resolve_user(user.0, body.user_id)?;

    let outcome = state
        .gate
        .start(user_id, body.idempotency_key.as_deref())
        .await?;

    let message = if outcome.duplicate {
        SESSION_ALREADY_STARTED
    } else {
        SESSION_STARTED
    };

    Ok(Json(StartChatResponse {
        message: message.to_string(),
        remaining_chat_coupons: outcome.remaining,
    }))
}

/// Buffered message on the short history window
///
/// POST /api/v1/chat/message
pub async fn send_message(
    State(state): State<Arc<AppState>>,
    Extension(user): Extension<AuthenticatedUser>,
    Json(body): Json<ChatMessageRequest>,
) -> AppResult<Json<ChatMessageResponse>> {
    let user_id = resolve_user(user.0, body.user_id)?;
    validate_message_request(&body)?;

    let remaining = state.gate.check_usage(user_id).await?;

    let request = state.composer.compose(
        &body.messages,
        state.settings.chat.buffered_history,
        body.generation_config.as_ref(),
    );
    debug!("Provider request: {}", create_provider_request_log_summary(&request));

    let response = state.provider.chat(&request).await?;
    info!("Buffered reply for user {} ({} chars)", user_id, response.chars().count());

    Ok(Json(ChatMessageResponse {
        response,
        remaining_chat_coupons: remaining,
    }))
}

/// Streaming message on the full history window
///
/// POST /api/v1/chat/message_stream
///
/// Validation and eligibility failures are plain JSON errors; once they pass
/// the response is an event stream driven by the relay in its own task.
pub async fn stream_message(
    State(state): State<Arc<AppState>>,
    Extension(user): Extension<AuthenticatedUser>,
    Json(body): Json<ChatMessageRequest>,
) -> AppResult<Response> {
    let user_id = resolve_user(user.0, body.user_id)?;
    validate_message_request(&body)?;

    let remaining = state.gate.check_usage(user_id).await?;

    let chat = &state.settings.chat;
    let overrides = body.generation_config.as_ref();
    let stream_options = chat.stream_profile().overlay(overrides);
    let fallback_options = chat.fallback_profile().overlay(overrides);

    let job = RelayJob {
        user_id,
        stream_request: state
            .composer
            .compose(&body.messages, chat.stream_history, Some(&stream_options)),
        fallback_request: state
            .composer
            .compose(&body.messages, chat.stream_history, Some(&fallback_options)),
        remaining_credits: remaining,
    };
    debug!("Provider request: {}", create_provider_request_log_summary(&job.stream_request));

    let (tx, rx) = tokio::sync::mpsc::channel::<Result<Event, Infallible>>(32);
    let relay = state.relay.clone();
    let span = tracing::info_span!("relay", user_id = user_id);

    tokio::spawn(
        async move {
            let mut sink = ChannelSink::new(tx);
            relay.run(job, &mut sink).await;
        }
        .instrument(span),
    );

    let sse = Sse::new(ReceiverStream::new(rx)).keep_alive(
        KeepAlive::new()
            .interval(Duration::from_secs(15))
            .text("keep-alive"),
    );

    Ok((
        [
            (header::CACHE_CONTROL, "no-cache"),
            (header::HeaderName::from_static("x-accel-buffering"), "no"),
        ],
        sse,
    )
        .into_response())
}

/// Read-only eligibility report
///
/// GET /api/v1/chat/status
pub async fn chat_status(
    State(state): State<Arc<AppState>>,
    Extension(user): Extension<AuthenticatedUser>,
) -> AppResult<Json<ChatStatusResponse>> {
    let status = state.gate.status(user.0).await?;
    Ok(Json(status))
}

/// The body may name a user, but only the authenticated one
fn resolve_user(authenticated: UserId, claimed: Option<UserId>) -> AppResult<UserId> {
    match claimed {
        Some(claimed) if claimed != authenticated => {
            warn!("User {} attempted to act as user {}", authenticated, claimed);
            Err(AppError::Forbidden(
                "user_id does not match the authenticated user".to_string(),
            ))
        }
        _ => Ok(authenticated),
    }
}

/// Reject malformed input before any upstream contact
fn validate_message_request(request: &ChatMessageRequest) -> AppResult<()> {
    validate_turns(&request.messages)?;
    if let Some(overrides) = &request.generation_config {
        validate_overrides(overrides)?;
    }
    Ok(())
}

fn validate_turns(turns: &[RawTurn]) -> AppResult<()> {
    if turns.is_empty() {
        return Err(AppError::Validation("Message list cannot be empty".to_string()));
    }
    Ok(())
}

fn validate_overrides(overrides: &GenerationOverrides) -> AppResult<()> {
    if let Some(temperature) = overrides.temperature {
        if !(0.0..=2.0).contains(&temperature) {
            return Err(AppError::Validation("temperature must be between 0.0 and 2.0".to_string()));
        }
    }

    if let Some(top_p) = overrides.top_p {
        if !(0.0..=1.0).contains(&top_p) {
            return Err(AppError::Validation("topP must be between 0.0 and 1.0".to_string()));
        }
    }

    if overrides.top_k == Some(0) {
        return Err(AppError::Validation("topK must be greater than 0".to_string()));
    }

    if overrides.max_output_tokens == Some(0) {
        return Err(AppError::Validation("maxOutputTokens must be greater than 0".to_string()));
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_resolve_user() {
        assert_eq!(resolve_user(1, None).unwrap(), 1);
        assert_eq!(resolve_user(1, Some(1)).unwrap(), 1);
        assert!(matches!(resolve_user(1, Some(2)), Err(AppError::Forbidden(_))));
    }

    #[test]
    fn test_validate_message_request() {
        let valid = ChatMessageRequest {
            messages: vec![RawTurn::new("user", "Hello")],
            ..Default::default()
        };
        assert!(validate_message_request(&valid).is_ok());

        let empty = ChatMessageRequest::default();
        assert!(matches!(validate_message_request(&empty), Err(AppError::Validation(_))));

        let bad_temperature = ChatMessageRequest {
            messages: vec![RawTurn::new("user", "Hello")],
            generation_config: Some(GenerationOverrides {
                temperature: Some(3.0),
                ..Default::default()
            }),
            ..Default::default()
        };
        assert!(validate_message_request(&bad_temperature).is_err());

        let bad_top_k = ChatMessageRequest {
            messages: vec![RawTurn::new("user", "Hello")],
            generation_config: Some(GenerationOverrides {
                top_k: Some(0),
                ..Default::default()
            }),
            ..Default::default()
        };
        assert!(validate_message_request(&bad_top_k).is_err());
    }
}
