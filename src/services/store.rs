//! In-memory collaborator stores
//!
//! Account directory and credit/dedup store backed by `DashMap`, seeded from
//! the accounts file. Atomicity comes from the per-key shard locks held by
//! `get_mut` and the entry API.

use crate::config::{AccountSeed, AccountsFile};
use crate::models::UserId;
use crate::services::entitlement::{
    Account, CreditError, CreditStore, DedupState, IdempotencyKey, Membership, MembershipDirectory,
};
use async_trait::async_trait;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use std::time::{Duration, Instant};
use tracing::debug;

impl From<&AccountSeed> for Account {
    fn from(seed: &AccountSeed) -> Self {
        Account {
            user_id: seed.user_id,
            email: seed.email.clone(),
            membership: seed.membership.as_ref().map(|m| Membership {
                name: m.name.clone(),
                features: m.features.clone(),
                expires_at: m.expires_at,
            }),
        }
    }
}

#[derive(Debug, Default)]
pub struct InMemoryDirectory {
    accounts: DashMap<UserId, Account>,
}

impl InMemoryDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_accounts(file: &AccountsFile) -> Self {
        let directory = Self::new();
        for seed in &file.accounts {
            directory.upsert(Account::from(seed));
        }
        directory
    }

    pub fn upsert(&self, account: Account) {
        self.accounts.insert(account.user_id, account);
    }
}

#[async_trait]
impl MembershipDirectory for InMemoryDirectory {
    async fn account(&self, user_id: UserId) -> Option<Account> {
        self.accounts.get(&user_id).map(|entry| entry.value().clone())
    }
}

#[derive(Debug, Clone, Copy)]
struct DedupRecord {
    expires_at: Instant,
    settled: bool,
}

impl DedupRecord {
    fn pending(ttl: Duration) -> Self {
        Self {
            expires_at: Instant::now() + ttl,
            settled: false,
        }
    }

    fn is_live(&self) -> bool {
        self.expires_at > Instant::now()
    }
}

/// Balances plus expiring dedup records
#[derive(Debug, Default)]
pub struct InMemoryCreditStore {
    balances: DashMap<UserId, u32>,
    dedup: DashMap<IdempotencyKey, DedupRecord>,
}

impl InMemoryCreditStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_accounts(file: &AccountsFile) -> Self {
        let store = Self::new();
        for seed in &file.accounts {
            store.set_balance(seed.user_id, seed.credits);
        }
        store
    }

    pub fn set_balance(&self, user_id: UserId, credits: u32) {
        self.balances.insert(user_id, credits);
    }

    /// Drop expired dedup records
    pub fn purge_expired(&self) {
        let now = Instant::now();
        let before = self.dedup.len();
        self.dedup.retain(|_, record| record.expires_at > now);
        let purged = before.saturating_sub(self.dedup.len());
        if purged > 0 {
            debug!("Purged {} expired idempotency records", purged);
        }
    }

    pub fn dedup_len(&self) -> usize {
        self.dedup.len()
    }
}

#[async_trait]
impl CreditStore for InMemoryCreditStore {
    async fn balance(&self, user_id: UserId) -> Result<u32, CreditError> {
        Ok(self.balances.get(&user_id).map(|b| *b).unwrap_or(0))
    }

    async fn decrement(&self, user_id: UserId) -> Result<u32, CreditError> {
        let mut balance = self
            .balances
            .get_mut(&user_id)
            .ok_or(CreditError::UnknownUser(user_id))?;

        if *balance == 0 {
            return Err(CreditError::Insufficient);
        }
        *balance -= 1;
        Ok(*balance)
    }

    async fn insert_if_absent(&self, key: &IdempotencyKey, ttl: Duration) -> Result<bool, CreditError> {
        self.purge_expired();

        let inserted = match self.dedup.entry(key.clone()) {
            Entry::Occupied(mut entry) => {
                if entry.get().is_live() {
                    false
                } else {
                    entry.insert(DedupRecord::pending(ttl));
                    true
                }
            }
            Entry::Vacant(entry) => {
                entry.insert(DedupRecord::pending(ttl));
                true
            }
        };
        Ok(inserted)
    }

    async fn dedup_state(&self, key: &IdempotencyKey) -> Result<Option<DedupState>, CreditError> {
        Ok(self
            .dedup
            .get(key)
            .filter(|record| record.is_live())
            .map(|record| {
                if record.settled {
                    DedupState::Settled
                } else {
                    DedupState::Pending
                }
            }))
    }

    async fn settle(&self, key: &IdempotencyKey) -> Result<(), CreditError> {
        if let Some(mut record) = self.dedup.get_mut(key) {
            record.settled = true;
        }
        Ok(())
    }

    async fn remove(&self, key: &IdempotencyKey) -> Result<(), CreditError> {
        self.dedup.remove(key);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_decrement_stops_at_zero() {
        let store = InMemoryCreditStore::new();
        store.set_balance(1, 1);

        assert_eq!(store.decrement(1).await, Ok(0));
        assert_eq!(store.decrement(1).await, Err(CreditError::Insufficient));
        assert_eq!(store.balance(1).await, Ok(0));
        assert_eq!(store.decrement(2).await, Err(CreditError::UnknownUser(2)));
    }

    #[tokio::test]
    async fn test_insert_if_absent() {
        let store = InMemoryCreditStore::new();
        let key = IdempotencyKey::new(1, "abc");

        assert_eq!(store.insert_if_absent(&key, Duration::from_secs(60)).await, Ok(true));
        assert_eq!(store.insert_if_absent(&key, Duration::from_secs(60)).await, Ok(false));
        assert_eq!(store.dedup_state(&key).await, Ok(Some(DedupState::Pending)));

        store.settle(&key).await.unwrap();
        assert_eq!(store.dedup_state(&key).await, Ok(Some(DedupState::Settled)));

        // same token, other user
        let other = IdempotencyKey::new(2, "abc");
        assert_eq!(store.insert_if_absent(&other, Duration::from_secs(60)).await, Ok(true));

        store.remove(&key).await.unwrap();
        assert_eq!(store.dedup_state(&key).await, Ok(None));
    }

    #[tokio::test]
    async fn test_expired_record_is_replaced() {
        let store = InMemoryCreditStore::new();
        let key = IdempotencyKey::new(1, "abc");

        assert_eq!(store.insert_if_absent(&key, Duration::ZERO).await, Ok(true));
        assert_eq!(store.dedup_state(&key).await, Ok(None));
        assert_eq!(store.insert_if_absent(&key, Duration::from_secs(60)).await, Ok(true));
        assert_eq!(store.dedup_len(), 1);
    }
}
