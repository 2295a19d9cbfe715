//! Session registry tests

use super::helpers::*;
use live_trade::{TradeError, registry::SessionRegistry, session::TradeState};
use pretty_assertions::assert_eq;
use std::sync::{Arc, Barrier};
use std::thread;

#[tokio::test]
async fn test_create_indexes_both_participants() {
    let registry = SessionRegistry::new();
    let (trade_id, handle) = registry
        .create_session(participant(ALICE), participant(BOB))
        .unwrap();

    assert_eq!(handle.lock().await.state(), TradeState::Invited);
    assert_eq!(registry.len(), 1);
    for user in [ALICE, BOB] {
        let found = registry.active_session_for_user(user).unwrap();
        assert_eq!(found.lock().await.id(), &trade_id);
    }
    assert!(registry.active_session_for_user(CAROL).is_none());
}

#[test]
fn test_user_cannot_join_second_session() {
    let registry = SessionRegistry::new();
    registry
        .create_session(participant(ALICE), participant(BOB))
        .unwrap();

    // Busy as initiator
    assert_eq!(
        registry
            .create_session(participant(ALICE), participant(CAROL))
            .unwrap_err(),
        TradeError::AlreadyInSession { user_id: ALICE }
    );
    // Busy as target
    assert_eq!(
        registry
            .create_session(participant(CAROL), participant(BOB))
            .unwrap_err(),
        TradeError::AlreadyInSession { user_id: BOB }
    );
    assert_eq!(registry.len(), 1);
}

#[test]
fn test_self_trade_rejected() {
    let registry = SessionRegistry::new();
    assert_eq!(
        registry
            .create_session(participant(ALICE), participant(ALICE))
            .unwrap_err(),
        TradeError::SelfTrade
    );
    assert!(registry.is_empty());
}

#[test]
fn test_remove_frees_both_users() {
    let registry = SessionRegistry::new();
    let (trade_id, _) = registry
        .create_session(participant(ALICE), participant(BOB))
        .unwrap();

    assert!(registry.remove_session(&trade_id));
    assert!(!registry.remove_session(&trade_id));
    assert!(registry.get_session(&trade_id).is_none());
    assert!(registry.active_session_for_user(ALICE).is_none());
    assert!(registry.active_session_for_user(BOB).is_none());

    // Both can trade again, with each other or anyone else
    registry
        .create_session(participant(BOB), participant(CAROL))
        .unwrap();
    registry
        .create_session(participant(ALICE), participant(DAVE))
        .unwrap();
    assert_eq!(registry.len(), 2);
}

#[test]
fn test_concurrent_invites_for_same_user() {
    const THREADS: usize = 8;

    for _ in 0..20 {
        let registry = Arc::new(SessionRegistry::new());
        let barrier = Arc::new(Barrier::new(THREADS));

        let handles: Vec<_> = (0..THREADS)
            .map(|i| {
                let registry = Arc::clone(&registry);
                let barrier = Arc::clone(&barrier);
                thread::spawn(move || {
                    let initiator = participant(barterbay_common::UserId(100 + i as i64));
                    barrier.wait();
                    registry.create_session(initiator, participant(BOB)).is_ok()
                })
            })
            .collect();

        let successes = handles
            .into_iter()
            .map(|handle| handle.join().unwrap())
            .filter(|ok| *ok)
            .count();

        assert_eq!(successes, 1);
        assert_eq!(registry.len(), 1);
    }
}
