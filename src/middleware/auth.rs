//! Authentication middleware
//!
//! Resolves the bearer credential to a verified user for the chat routes

use crate::handlers::AppState;
use crate::models::UserId;
use crate::services::identity::{bearer_token, AuthError};
use crate::utils::error::AppError;
use axum::{
    extract::{Request, State},
    http::header::AUTHORIZATION,
    middleware::Next,
    response::Response,
};
use std::sync::Arc;
use tracing::{debug, warn};

/// Verified caller, inserted into request extensions
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AuthenticatedUser(pub UserId);

/// Authentication middleware
///
/// Rejects the request with 401 unless `Authorization: Bearer <token>` verifies
pub async fn auth_middleware(
    State(state): State<Arc<AppState>>,
    mut request: Request,
    next: Next,
) -> Result<Response, AppError> {
    let token = request
        .headers()
        .get(AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
        .and_then(bearer_token)
        .map(str::to_string)
        .ok_or(AuthError::Missing)?;

    let user_id = state.verifier.verify(&token).await.map_err(|e| {
        warn!("Authentication failed: {}", e);
        e
    })?;

    debug!("Authenticated user {}", user_id);
    request.extensions_mut().insert(AuthenticatedUser(user_id));
    Ok(next.run(request).await)
}
