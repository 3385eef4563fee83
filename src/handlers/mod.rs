//! HTTP handlers module
//!
//! Router construction, shared application state and all HTTP endpoints

pub mod chat;
pub mod health;

use crate::config::{AccountsFile, Settings};
use crate::middleware::auth::auth_middleware;
use crate::middleware::logging::request_logging_middleware;
use crate::providers::GeminiHttpTransport;
use crate::services::entitlement::{CreditStore, MembershipDirectory};
use crate::services::{
    ChatProvider, EntitlementGate, IdentityVerifier, InMemoryCreditStore, InMemoryDirectory,
    MessageComposer, RetryPolicy, StaticTokenVerifier, StreamRelay, UpstreamClient,
};
use anyhow::{Context, Result};
use axum::http::HeaderValue;
use axum::{middleware, routing::get, routing::post, Router};
use std::sync::Arc;
use std::time::Instant;
use tower::ServiceBuilder;
use tower_http::{
    cors::{Any, CorsLayer},
    limit::RequestBodyLimitLayer,
    trace::TraceLayer,
};
use tracing::info;

/// Application state
pub struct AppState {
    pub settings: Settings,
    pub composer: MessageComposer,
    pub provider: Arc<dyn ChatProvider>,
    pub relay: StreamRelay,
    pub gate: EntitlementGate,
    pub verifier: Arc<dyn IdentityVerifier>,
    pub started_at: Instant,
}

impl AppState {
    /// Wire the state from its collaborators
    pub fn new(
        settings: Settings,
        provider: Arc<dyn ChatProvider>,
        directory: Arc<dyn MembershipDirectory>,
        credits: Arc<dyn CreditStore>,
        verifier: Arc<dyn IdentityVerifier>,
    ) -> Self {
        let composer = MessageComposer::from_settings(&settings);
        let relay = StreamRelay::new(provider.clone(), settings.chat.fallback_slice_chars);
        let gate = EntitlementGate::from_settings(&settings, directory, credits);

        Self {
            settings,
            composer,
            provider,
            relay,
            gate,
            verifier,
            started_at: Instant::now(),
        }
    }
}

/// Create application router backed by the Gemini transport and in-memory stores
pub fn create_router(settings: Settings, accounts: AccountsFile) -> Result<Router> {
    let transport = GeminiHttpTransport::from_config(&settings.gemini)
        .context("Failed to create Gemini transport")?;
    let client = UpstreamClient::new(transport, RetryPolicy::from_settings(&settings));

    info!(
        "Upstream model {} (fallback: {})",
        settings.gemini.model,
        settings.effective_fallback_model().unwrap_or("none")
    );
    info!("Seeded {} accounts", accounts.accounts.len());

    let state = AppState::new(
        settings,
        Arc::new(client),
        Arc::new(InMemoryDirectory::from_accounts(&accounts)),
        Arc::new(InMemoryCreditStore::from_accounts(&accounts)),
        Arc::new(StaticTokenVerifier::from_accounts(&accounts)),
    );

    Ok(router_with_state(Arc::new(state)))
}

/// Build the router around an existing state
pub fn router_with_state(state: Arc<AppState>) -> Router {
    let chat_routes = Router::new()
        .route("/api/v1/chat/start", post(chat::start_chat))
        .route("/api/v1/chat/message", post(chat::send_message))
        .route("/api/v1/chat/message_stream", post(chat::stream_message))
        .route("/api/v1/chat/status", get(chat::chat_status))
        .route_layer(middleware::from_fn_with_state(state.clone(), auth_middleware));

    // Create middleware stack
    let middleware_stack = ServiceBuilder::new()
        .layer(TraceLayer::new_for_http())
        .layer(middleware::from_fn(request_logging_middleware))
        // innermost, so only the routes see the limited body type
        .layer(RequestBodyLimitLayer::new(state.settings.security.max_request_size));

    let mut router = Router::new()
        .merge(chat_routes)
        .route("/health", get(health::health_check))
        .route("/health/live", get(health::liveness_check))
        .layer(middleware_stack);

    if state.settings.security.cors_enabled {
        router = router.layer(cors_layer(&state.settings.security.allowed_origins));
    }

    router.with_state(state)
}

fn cors_layer(allowed_origins: &[String]) -> CorsLayer {
    let layer = CorsLayer::new().allow_methods(Any).allow_headers(Any);

    if allowed_origins.is_empty() || allowed_origins.iter().any(|o| o == "*") {
        return layer.allow_origin(Any);
    }

    let origins: Vec<HeaderValue> = allowed_origins
        .iter()
        .filter_map(|origin| origin.parse().ok())
        .collect();
    layer.allow_origin(origins)
}
