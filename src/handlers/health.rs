//! Health probes
//!
//! Neither probe contacts Gemini or touches the account stores.

use crate::handlers::AppState;
use axum::{extract::State, response::Json};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::debug;

#[derive(Debug, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
    pub service: String,
    pub version: String,
    /// RFC 3339
    pub timestamp: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<HealthDetails>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct HealthDetails {
    /// Primary upstream model
    pub model: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub fallback_model: Option<String>,
    pub config: String,
    pub uptime_seconds: u64,
}

impl HealthResponse {
    fn report(state: &AppState, status: &str) -> Self {
        let settings = &state.settings;
        Self {
            status: status.to_string(),
            service: crate::NAME.to_string(),
            version: crate::VERSION.to_string(),
            timestamp: chrono::Utc::now().to_rfc3339(),
            details: Some(HealthDetails {
                model: settings.gemini.model.clone(),
                fallback_model: settings.effective_fallback_model().map(str::to_string),
                config: "valid".to_string(),
                uptime_seconds: state.started_at.elapsed().as_secs(),
            }),
        }
    }
}

/// GET /health
pub async fn health_check(State(state): State<Arc<AppState>>) -> Json<HealthResponse> {
    debug!("Health probe");
    Json(HealthResponse::report(&state, "healthy"))
}

/// GET /health/live
pub async fn liveness_check(State(state): State<Arc<AppState>>) -> Json<HealthResponse> {
    debug!("Liveness probe");
    Json(HealthResponse::report(&state, "alive"))
}
