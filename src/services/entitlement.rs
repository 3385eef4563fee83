//! Entitlement gate
//!
//! Eligibility checks and credit consumption. Membership data and the credit
//! counter are external collaborators reached through [`MembershipDirectory`]
//! and [`CreditStore`]; the gate relies on their atomic primitives rather than
//! on any in-process locking.

use crate::config::Settings;
use crate::models::chat::ChatStatusResponse;
use crate::models::UserId;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::time::Instant;
use tracing::{debug, info, warn};

/// Eligibility failure
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum EntitlementError {
    #[error("User {0} not found")]
    UnknownUser(UserId),

    #[error("No active membership")]
    NoMembership,

    #[error("Membership has expired")]
    MembershipExpired,

    #[error("Membership does not include the '{0}' feature")]
    FeatureMissing(String),

    #[error("No chat credits remaining")]
    NoCredits,

    #[error("Credit store failure: {0}")]
    Store(String),
}

/// Credit store failure
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CreditError {
    #[error("balance is zero")]
    Insufficient,

    #[error("no balance for user {0}")]
    UnknownUser(UserId),

    #[error("{0}")]
    Backend(String),
}

impl From<CreditError> for EntitlementError {
    fn from(err: CreditError) -> Self {
        match err {
            CreditError::Insufficient => EntitlementError::NoCredits,
            CreditError::UnknownUser(user_id) => EntitlementError::UnknownUser(user_id),
            CreditError::Backend(msg) => EntitlementError::Store(msg),
        }
    }
}

/// Membership attached to an account
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Membership {
    pub name: String,
    pub features: Vec<String>,
    pub expires_at: DateTime<Utc>,
}

impl Membership {
    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        self.expires_at <= now
    }

    pub fn has_feature(&self, feature: &str) -> bool {
        self.features.iter().any(|f| f == feature)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Account {
    pub user_id: UserId,
    pub email: Option<String>,
    pub membership: Option<Membership>,
}

/// Dedup key: one client token scoped to one user
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct IdempotencyKey {
    pub user_id: UserId,
    pub token: String,
}

impl IdempotencyKey {
    pub fn new(user_id: UserId, token: impl Into<String>) -> Self {
        Self {
            user_id,
            token: token.into(),
        }
    }
}

/// Lifecycle of a live dedup record
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DedupState {
    /// Written by the winning call, whose decrement has not landed yet
    Pending,
    /// The winning call's decrement has landed
    Settled,
}

/// Membership and feature lookup
#[async_trait]
pub trait MembershipDirectory: Send + Sync {
    async fn account(&self, user_id: UserId) -> Option<Account>;
}

/// Credit counter and dedup store
///
/// `decrement` and `insert_if_absent` must each be atomic with respect to
/// concurrent callers.
#[async_trait]
pub trait CreditStore: Send + Sync {
    /// Current balance (zero for users without a counter)
    async fn balance(&self, user_id: UserId) -> Result<u32, CreditError>;

    /// Decrement by one and return the new balance; never goes below zero
    async fn decrement(&self, user_id: UserId) -> Result<u32, CreditError>;

    /// Write a dedup record unless a live one exists; `true` when written
    async fn insert_if_absent(&self, key: &IdempotencyKey, ttl: Duration) -> Result<bool, CreditError>;

    /// State of the live dedup record, `None` when absent or expired
    async fn dedup_state(&self, key: &IdempotencyKey) -> Result<Option<DedupState>, CreditError>;

    /// Mark a record written by `insert_if_absent` as settled
    async fn settle(&self, key: &IdempotencyKey) -> Result<(), CreditError>;

    async fn remove(&self, key: &IdempotencyKey) -> Result<(), CreditError>;
}

/// Result of a `start` call
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StartOutcome {
    pub remaining: u32,
    /// The call was suppressed by a live dedup record
    pub duplicate: bool,
}

/// How often a duplicate re-checks a pending record, and for how long
const SETTLE_POLL: Duration = Duration::from_millis(5);
const SETTLE_WAIT: Duration = Duration::from_secs(2);

pub struct EntitlementGate {
    directory: Arc<dyn MembershipDirectory>,
    credits: Arc<dyn CreditStore>,
    feature: String,
    dedup_ttl: Duration,
}

impl EntitlementGate {
    pub fn new(
        directory: Arc<dyn MembershipDirectory>,
        credits: Arc<dyn CreditStore>,
        feature: impl Into<String>,
        dedup_ttl: Duration,
    ) -> Self {
        Self {
            directory,
            credits,
            feature: feature.into(),
            dedup_ttl,
        }
    }

    pub fn from_settings(
        settings: &Settings,
        directory: Arc<dyn MembershipDirectory>,
        credits: Arc<dyn CreditStore>,
    ) -> Self {
        Self::new(
            directory,
            credits,
            settings.chat.feature.clone(),
            settings.entitlement.dedup_ttl(),
        )
    }

    /// Membership present, unexpired and carrying the chat feature
    async fn check_membership(&self, user_id: UserId) -> Result<Account, EntitlementError> {
        let account = self
            .directory
            .account(user_id)
            .await
            .ok_or(EntitlementError::UnknownUser(user_id))?;

        let membership = account.membership.as_ref().ok_or(EntitlementError::NoMembership)?;
        if membership.is_expired_at(Utc::now()) {
            return Err(EntitlementError::MembershipExpired);
        }
        if !membership.has_feature(&self.feature) {
            return Err(EntitlementError::FeatureMissing(self.feature.clone()));
        }

        Ok(account)
    }

    /// Re-verify eligibility for a usage call; never decrements
    ///
    /// Returns the current balance.
    pub async fn check_usage(&self, user_id: UserId) -> Result<u32, EntitlementError> {
        self.check_membership(user_id).await?;

        let balance = self.credits.balance(user_id).await?;
        if balance == 0 {
            return Err(EntitlementError::NoCredits);
        }
        Ok(balance)
    }

    /// Consume one credit for a new chat session
    ///
    /// With a key, a live dedup record for `(user, key)` suppresses the
    /// decrement and reports the current balance. Blank keys count as absent.
    pub async fn start(&self, user_id: UserId, idempotency_key: Option<&str>) -> Result<StartOutcome, EntitlementError> {
        self.check_membership(user_id).await?;

        let key = idempotency_key
            .map(str::trim)
            .filter(|token| !token.is_empty())
            .map(|token| IdempotencyKey::new(user_id, token));

        if let Some(key) = &key {
            if self.credits.dedup_state(key).await?.is_some() {
                return self.duplicate(key).await;
            }
        }

        if self.credits.balance(user_id).await? == 0 {
            return Err(EntitlementError::NoCredits);
        }

        let Some(key) = key else {
            let remaining = self.credits.decrement(user_id).await?;
            info!("User {} started a chat without idempotency key, {} credits left", user_id, remaining);
            return Ok(StartOutcome {
                remaining,
                duplicate: false,
            });
        };

        if !self.credits.insert_if_absent(&key, self.dedup_ttl).await? {
            // a concurrent duplicate won the insert
            return self.duplicate(&key).await;
        }

        match self.credits.decrement(user_id).await {
            Ok(remaining) => {
                if let Err(err) = self.credits.settle(&key).await {
                    warn!("Failed to settle dedup record for user {}: {}", user_id, err);
                }
                info!("User {} started a chat, {} credits left", user_id, remaining);
                Ok(StartOutcome {
                    remaining,
                    duplicate: false,
                })
            }
            Err(err) => {
                warn!("Credit decrement failed for user {}: {}", user_id, err);
                if let Err(remove_err) = self.credits.remove(&key).await {
                    warn!("Failed to roll back dedup record for user {}: {}", user_id, remove_err);
                }
                Err(err.into())
            }
        }
    }

    /// Report a suppressed call
    ///
    /// Waits for a pending record to settle so the duplicate reads the
    /// balance after the winning decrement.
    async fn duplicate(&self, key: &IdempotencyKey) -> Result<StartOutcome, EntitlementError> {
        let deadline = Instant::now() + SETTLE_WAIT;
        while self.credits.dedup_state(key).await? == Some(DedupState::Pending) {
            if Instant::now() >= deadline {
                warn!("Dedup record for user {} still pending after {:?}", key.user_id, SETTLE_WAIT);
                break;
            }
            tokio::time::sleep(SETTLE_POLL).await;
        }

        let remaining = self.credits.balance(key.user_id).await?;
        debug!("Duplicate start suppressed for user {}", key.user_id);
        Ok(StartOutcome {
            remaining,
            duplicate: true,
        })
    }

    /// Read-only eligibility report
    pub async fn status(&self, user_id: UserId) -> Result<ChatStatusResponse, EntitlementError> {
        let remaining = self.credits.balance(user_id).await?;

        let (status, reason) = match self.check_membership(user_id).await {
            Ok(_) if remaining == 0 => ("unavailable", Some(EntitlementError::NoCredits.to_string())),
            Ok(_) => ("available", None),
            Err(EntitlementError::MembershipExpired) => {
                ("expired", Some(EntitlementError::MembershipExpired.to_string()))
            }
            Err(err @ (EntitlementError::NoMembership | EntitlementError::FeatureMissing(_))) => {
                ("unavailable", Some(err.to_string()))
            }
            Err(err) => return Err(err),
        };

        Ok(ChatStatusResponse {
            status: status.to_string(),
            reason,
            feature: self.feature.clone(),
            remaining_chat_coupons: remaining,
        })
    }
}
