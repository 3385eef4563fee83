//! Bearer credential verification

use crate::config::AccountsFile;
use crate::models::UserId;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AuthError {
    #[error("Missing bearer credential")]
    Missing,

    #[error("Invalid credential")]
    Invalid,

    #[error("Credential has expired")]
    Expired,
}

/// Identity collaborator: credential in, verified user out
#[async_trait]
pub trait IdentityVerifier: Send + Sync {
    async fn verify(&self, token: &str) -> Result<UserId, AuthError>;
}

#[derive(Debug, Clone)]
struct Credential {
    user_id: UserId,
    expires_at: Option<DateTime<Utc>>,
}

/// Verifies tokens against a fixed table seeded from the accounts file
#[derive(Debug, Default)]
pub struct StaticTokenVerifier {
    tokens: DashMap<String, Credential>,
}

impl StaticTokenVerifier {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_accounts(file: &AccountsFile) -> Self {
        let verifier = Self::new();
        for seed in &file.accounts {
            verifier.register(&seed.token, seed.user_id, seed.token_expires_at);
        }
        verifier
    }

    pub fn register(&self, token: &str, user_id: UserId, expires_at: Option<DateTime<Utc>>) {
        self.tokens.insert(token.to_string(), Credential { user_id, expires_at });
    }
}

#[async_trait]
impl IdentityVerifier for StaticTokenVerifier {
    async fn verify(&self, token: &str) -> Result<UserId, AuthError> {
        let token = token.trim();
        if token.is_empty() {
            return Err(AuthError::Missing);
        }

        let credential = self.tokens.get(token).ok_or(AuthError::Invalid)?;
        match credential.expires_at {
            Some(expires_at) if expires_at <= Utc::now() => Err(AuthError::Expired),
            _ => Ok(credential.user_id),
        }
    }
}

/// Extract the credential from an `Authorization` header value
pub fn bearer_token(header: &str) -> Option<&str> {
    let (scheme, token) = header.trim().split_once(' ')?;
    if !scheme.eq_ignore_ascii_case("bearer") {
        return None;
    }
    let token = token.trim();
    (!token.is_empty()).then_some(token)
}
