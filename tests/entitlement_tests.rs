//! Entitlement gate tests
//!
//! Eligibility ordering and at-most-once credit consumption

use chatrelay::services::entitlement::{Account, CreditStore, DedupState, IdempotencyKey, Membership};
use chatrelay::services::{EntitlementError, EntitlementGate, InMemoryCreditStore, InMemoryDirectory};
use chrono::{Duration as ChronoDuration, Utc};
use std::sync::Arc;
use std::time::Duration;

const PREMIUM: u64 = 1;
const EXPIRED: u64 = 2;
const NO_FEATURE: u64 = 3;
const NO_MEMBERSHIP: u64 = 4;

fn membership(features: &[&str], days: i64) -> Option<Membership> {
    Some(Membership {
        name: "premium".to_string(),
        features: features.iter().map(|f| f.to_string()).collect(),
        expires_at: Utc::now() + ChronoDuration::days(days),
    })
}

fn account(user_id: u64, membership: Option<Membership>) -> Account {
    Account {
        user_id,
        email: None,
        membership,
    }
}

fn setup(credits: u32, ttl: Duration) -> (EntitlementGate, Arc<InMemoryCreditStore>) {
    let directory = InMemoryDirectory::new();
    directory.upsert(account(PREMIUM, membership(&["chat", "ocr"], 30)));
    directory.upsert(account(EXPIRED, membership(&["chat"], -1)));
    directory.upsert(account(NO_FEATURE, membership(&["ocr"], 30)));
    directory.upsert(account(NO_MEMBERSHIP, None));

    let credits_store = Arc::new(InMemoryCreditStore::new());
    for user_id in [PREMIUM, EXPIRED, NO_FEATURE, NO_MEMBERSHIP] {
        credits_store.set_balance(user_id, credits);
    }

    let gate = EntitlementGate::new(Arc::new(directory), credits_store.clone(), "chat", ttl);
    (gate, credits_store)
}

fn five_minutes() -> Duration {
    Duration::from_secs(300)
}

#[tokio::test]
async fn test_same_key_decrements_once() {
    let (gate, _) = setup(5, five_minutes());

    let first = gate.start(PREMIUM, Some("session-abc")).await.unwrap();
    let second = gate.start(PREMIUM, Some("session-abc")).await.unwrap();

    assert_eq!(first.remaining, 4);
    assert!(!first.duplicate);
    assert_eq!(second.remaining, 4);
    assert!(second.duplicate);
    assert_eq!(gate.check_usage(PREMIUM).await.unwrap(), 4);
}

#[tokio::test]
async fn test_duplicate_of_last_credit_reports_zero() {
    let (gate, _) = setup(1, five_minutes());

    let first = gate.start(PREMIUM, Some("k")).await.unwrap();
    let second = gate.start(PREMIUM, Some("k")).await.unwrap();
    assert_eq!((first.remaining, second.remaining), (0, 0));
    assert!(second.duplicate);

    // a new key has nothing left to consume
    assert_eq!(gate.start(PREMIUM, Some("other")).await, Err(EntitlementError::NoCredits));
}

#[tokio::test]
async fn test_calls_without_key_each_decrement() {
    let (gate, _) = setup(3, five_minutes());

    assert_eq!(gate.start(PREMIUM, None).await.unwrap().remaining, 2);
    assert_eq!(gate.start(PREMIUM, None).await.unwrap().remaining, 1);
    assert_eq!(gate.start(PREMIUM, Some("   ")).await.unwrap().remaining, 0);
    assert_eq!(gate.start(PREMIUM, None).await, Err(EntitlementError::NoCredits));
}

#[tokio::test]
async fn test_different_keys_each_decrement() {
    let (gate, _) = setup(3, five_minutes());

    assert_eq!(gate.start(PREMIUM, Some("a")).await.unwrap().remaining, 2);
    assert_eq!(gate.start(PREMIUM, Some("b")).await.unwrap().remaining, 1);
}

#[tokio::test]
async fn test_key_expires_after_ttl() {
    let (gate, store) = setup(3, Duration::from_millis(50));

    assert_eq!(gate.start(PREMIUM, Some("k")).await.unwrap().remaining, 2);
    tokio::time::sleep(Duration::from_millis(120)).await;

    let again = gate.start(PREMIUM, Some("k")).await.unwrap();
    assert_eq!(again.remaining, 1);
    assert!(!again.duplicate);
    assert_eq!(store.dedup_len(), 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_duplicates_decrement_once() {
    let (gate, _) = setup(10, five_minutes());
    let gate = Arc::new(gate);

    let handles: Vec<_> = (0..16)
        .map(|_| {
            let gate = gate.clone();
            tokio::spawn(async move { gate.start(PREMIUM, Some("double-click")).await })
        })
        .collect();

    let mut fresh = 0;
    for handle in handles {
        let outcome = handle.await.unwrap().unwrap();
        if !outcome.duplicate {
            fresh += 1;
        }
        assert_eq!(outcome.remaining, 9);
    }

    assert_eq!(fresh, 1);
    assert_eq!(gate.check_usage(PREMIUM).await.unwrap(), 9);
}

#[tokio::test]
async fn test_duplicate_waits_for_pending_decrement() {
    let (gate, store) = setup(5, five_minutes());
    let gate = Arc::new(gate);
    let key = IdempotencyKey::new(PREMIUM, "in-flight");

    // another request has claimed the key but not yet decremented
    assert!(store.insert_if_absent(&key, five_minutes()).await.unwrap());

    let duplicate = {
        let gate = gate.clone();
        tokio::spawn(async move { gate.start(PREMIUM, Some("in-flight")).await })
    };

    tokio::time::sleep(Duration::from_millis(50)).await;
    assert!(!duplicate.is_finished());

    assert_eq!(store.decrement(PREMIUM).await.unwrap(), 4);
    store.settle(&key).await.unwrap();
    assert_eq!(store.dedup_state(&key).await.unwrap(), Some(DedupState::Settled));

    let outcome = duplicate.await.unwrap().unwrap();
    assert!(outcome.duplicate);
    assert_eq!(outcome.remaining, 4);
    assert_eq!(gate.check_usage(PREMIUM).await.unwrap(), 4);
}

#[tokio::test]
async fn test_eligibility_failures() {
    let (gate, _) = setup(5, five_minutes());

    assert_eq!(gate.start(99, None).await, Err(EntitlementError::UnknownUser(99)));
    assert_eq!(gate.start(EXPIRED, None).await, Err(EntitlementError::MembershipExpired));
    assert_eq!(
        gate.start(NO_FEATURE, Some("k")).await,
        Err(EntitlementError::FeatureMissing("chat".to_string()))
    );
    assert_eq!(gate.check_usage(NO_MEMBERSHIP).await, Err(EntitlementError::NoMembership));
}

#[tokio::test]
async fn test_membership_checked_before_balance() {
    let (gate, _) = setup(0, five_minutes());

    assert_eq!(gate.check_usage(EXPIRED).await, Err(EntitlementError::MembershipExpired));
    assert_eq!(gate.check_usage(PREMIUM).await, Err(EntitlementError::NoCredits));
}

#[tokio::test]
async fn test_usage_check_never_decrements() {
    let (gate, _) = setup(2, five_minutes());

    for _ in 0..5 {
        assert_eq!(gate.check_usage(PREMIUM).await.unwrap(), 2);
    }
}

#[tokio::test]
async fn test_status_report() {
    let (gate, credits) = setup(2, five_minutes());

    let status = gate.status(PREMIUM).await.unwrap();
    assert_eq!(status.status, "available");
    assert_eq!(status.remaining_chat_coupons, 2);
    assert!(status.reason.is_none());

    assert_eq!(gate.status(EXPIRED).await.unwrap().status, "expired");
    assert_eq!(gate.status(NO_FEATURE).await.unwrap().status, "unavailable");

    credits.set_balance(PREMIUM, 0);
    let status = gate.status(PREMIUM).await.unwrap();
    assert_eq!(status.status, "unavailable");
    assert_eq!(status.reason.as_deref(), Some("No chat credits remaining"));

    assert_eq!(gate.status(99).await, Err(EntitlementError::UnknownUser(99)));
}
