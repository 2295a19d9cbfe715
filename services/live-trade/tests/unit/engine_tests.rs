//! Trade engine tests
//!
//! Drive the engine directly with in-memory inventory and channel-backed
//! connections.

use super::helpers::*;
use barterbay_common::{OfferLine, Participant, TradeId, UserId};
use chrono::{Duration, Utc};
use inventory_store::{InMemoryInventory, InventoryStore};
use live_trade::{
    SessionConfig, TradeError,
    models::{CancelReason, ClientMessage, ServerEvent},
    notifications::NotificationKind,
    session::TradeState,
};
use pretty_assertions::assert_eq;
use rstest::rstest;
use std::sync::Arc;

fn snapshot_of(event: &ServerEvent) -> &live_trade::models::TradeSnapshot {
    match event {
        ServerEvent::TradeStarted { trade }
        | ServerEvent::TradeUpdated { trade }
        | ServerEvent::TradeCompleted { trade } => trade,
        other => panic!("expected a snapshot event, got {other:?}"),
    }
}

#[tokio::test]
async fn test_full_swap() {
    let (mut h, inventory) = Harness::standard();
    h.connect(ALICE);
    h.connect(BOB);

    let trade_id = h
        .engine
        .invite(&participant(ALICE), participant(BOB))
        .unwrap();
    assert_eq!(types(&h.drain(BOB)), vec!["trade_invite_received"]);
    match h.last_event(ALICE) {
        Some(ServerEvent::TradeInviteSent { delivered, to, .. }) => {
            assert!(delivered);
            assert_eq!(to.id, BOB);
        }
        other => panic!("unexpected {other:?}"),
    }

    h.engine.accept(BOB, &trade_id).await.unwrap();
    assert_eq!(types(&h.drain(ALICE)), vec!["trade_started"]);
    assert_eq!(types(&h.drain(BOB)), vec!["trade_started"]);

    h.engine.add_item(ALICE, &trade_id, SWORD, 1).await.unwrap();
    h.engine.add_item(BOB, &trade_id, SHIELD, 2).await.unwrap();

    let updates = h.drain(ALICE);
    assert_eq!(types(&updates), vec!["trade_updated", "trade_updated"]);
    let latest = snapshot_of(&updates[1]);
    assert_eq!(latest.initiator_offer, vec![OfferLine::new(SWORD, 1)]);
    assert_eq!(latest.partner_offer, vec![OfferLine::new(SHIELD, 2)]);
    assert_eq!(latest.state, TradeState::Negotiating);
    h.drain(BOB);

    h.engine.confirm(ALICE, &trade_id).await.unwrap();
    let pending = h.drain(BOB);
    assert!(snapshot_of(&pending[0]).initiator_confirmed);
    h.drain(ALICE);

    h.engine.confirm(BOB, &trade_id).await.unwrap();
    for user in [ALICE, BOB] {
        let events = h.drain(user);
        assert_eq!(types(&events), vec!["trade_completed"]);
        assert_eq!(snapshot_of(&events[0]).state, TradeState::Completed);
    }

    assert_eq!(inventory.quantity(ALICE, SWORD).await.unwrap(), 0);
    assert_eq!(inventory.quantity(ALICE, SHIELD).await.unwrap(), 2);
    assert_eq!(inventory.quantity(BOB, SWORD).await.unwrap(), 1);
    assert_eq!(inventory.quantity(BOB, SHIELD).await.unwrap(), 0);

    assert!(h.engine.registry().is_empty());
    for user in [ALICE, BOB] {
        assert_eq!(
            h.notifier.kinds_for(user),
            vec![NotificationKind::TradeCompleted]
        );
    }

    // Terminal sessions are gone
    assert_eq!(
        h.engine.confirm(ALICE, &trade_id).await.unwrap_err(),
        TradeError::SessionNotFound { trade_id }
    );
}

#[tokio::test]
async fn test_decline_ends_session() {
    let (mut h, _) = Harness::standard();
    h.connect(ALICE);
    h.connect(BOB);

    let trade_id = h
        .engine
        .invite(&participant(ALICE), participant(BOB))
        .unwrap();
    h.drain(ALICE);
    h.drain(BOB);

    h.engine.decline(BOB, &trade_id).await.unwrap();
    assert_eq!(
        h.last_event(ALICE),
        Some(ServerEvent::TradeDeclined {
            trade_id: trade_id.clone(),
            by: BOB,
        })
    );
    assert!(h.engine.registry().is_empty());

    assert!(matches!(
        h.engine.accept(BOB, &trade_id).await,
        Err(TradeError::SessionNotFound { .. })
    ));
    for user in [ALICE, BOB] {
        match h.engine.confirm(user, &trade_id).await {
            Err(TradeError::SessionNotFound { trade_id: reported }) => {
                assert_eq!(reported, trade_id);
            }
            other => panic!("confirm by {user} after decline: {other:?}"),
        }
    }
    assert!(h.drain(ALICE).is_empty());
    assert!(h.drain(BOB).is_empty());

    // Both are free again
    h.engine
        .invite(&participant(BOB), participant(ALICE))
        .unwrap();
}

#[tokio::test]
async fn test_initiator_cannot_accept_own_invite() {
    let (mut h, _) = Harness::standard();
    let trade_id = h
        .engine
        .invite(&participant(ALICE), participant(BOB))
        .unwrap();

    assert_eq!(
        h.engine.accept(ALICE, &trade_id).await.unwrap_err(),
        TradeError::NotAParticipant {
            trade_id: trade_id.clone(),
            user_id: ALICE,
        }
    );
    assert_eq!(
        h.engine.accept(CAROL, &trade_id).await.unwrap_err().code(),
        "not_a_participant"
    );

    h.engine.accept(BOB, &trade_id).await.unwrap();
    assert_eq!(
        h.engine.accept(BOB, &trade_id).await.unwrap_err().code(),
        "invalid_state"
    );
    h.drain(ALICE);
}

#[tokio::test]
async fn test_outsider_cannot_modify_session() {
    let (mut h, _) = Harness::standard();
    let trade_id = h.open_trade(ALICE, BOB).await;

    for result in [
        h.engine.add_item(CAROL, &trade_id, POTION, 1).await,
        h.engine.remove_item(CAROL, &trade_id, SWORD, None).await,
        h.engine.confirm(CAROL, &trade_id).await,
        h.engine.cancel(CAROL, &trade_id).await,
    ] {
        assert_eq!(result.unwrap_err().code(), "not_a_participant");
    }

    let unknown = TradeId::parse("no-such-trade").unwrap();
    assert!(matches!(
        h.engine.add_item(ALICE, &unknown, SWORD, 1).await,
        Err(TradeError::SessionNotFound { .. })
    ));
}

#[tokio::test]
async fn test_item_unavailable_leaves_offer_unchanged() {
    let (mut h, _) = Harness::standard();
    h.connect(ALICE);
    let trade_id = h.open_trade(ALICE, BOB).await;

    assert_eq!(
        h.engine.add_item(ALICE, &trade_id, SWORD, 2).await.unwrap_err(),
        TradeError::ItemUnavailable {
            item_id: SWORD,
            requested: 2,
            available: 1,
        }
    );
    assert!(h.drain(ALICE).is_empty());

    // Already pledged units count against the holding
    h.engine.add_item(ALICE, &trade_id, SWORD, 1).await.unwrap();
    assert_eq!(
        h.engine
            .add_item(ALICE, &trade_id, SWORD, 1)
            .await
            .unwrap_err()
            .code(),
        "item_unavailable"
    );

    let handle = h.engine.registry().get_session(&trade_id).unwrap();
    let session = handle.lock().await;
    assert_eq!(
        session.offer(live_trade::session::Side::Initiator),
        &[OfferLine::new(SWORD, 1)]
    );
}

#[tokio::test]
async fn test_offer_change_resets_confirmations() {
    let (mut h, _) = Harness::standard();
    h.connect(ALICE);
    let trade_id = h.open_trade(ALICE, BOB).await;

    h.engine.add_item(ALICE, &trade_id, SWORD, 1).await.unwrap();
    h.engine.confirm(ALICE, &trade_id).await.unwrap();
    h.engine.add_item(BOB, &trade_id, SHIELD, 1).await.unwrap();

    let last = h.drain(ALICE).pop().unwrap();
    let snapshot = snapshot_of(&last);
    assert!(!snapshot.initiator_confirmed);
    assert!(!snapshot.partner_confirmed);

    // A single confirm after the change must not commit
    h.engine.confirm(BOB, &trade_id).await.unwrap();
    assert_eq!(h.engine.registry().len(), 1);
}

#[tokio::test]
async fn test_repeated_confirm_is_idempotent() {
    let (mut h, inventory) = Harness::standard();
    h.connect(ALICE);
    h.connect(BOB);
    let trade_id = h.open_trade(ALICE, BOB).await;
    h.engine.add_item(ALICE, &trade_id, SWORD, 1).await.unwrap();
    h.drain(ALICE);
    h.drain(BOB);

    h.engine.confirm(ALICE, &trade_id).await.unwrap();
    h.drain(BOB);
    h.drain(ALICE);

    h.engine.confirm(ALICE, &trade_id).await.unwrap();
    assert_eq!(types(&h.drain(ALICE)), vec!["trade_updated"]);
    assert!(h.drain(BOB).is_empty());

    // One-sided gift commits once Bob confirms
    h.engine.confirm(BOB, &trade_id).await.unwrap();
    assert_eq!(types(&h.drain(BOB)), vec!["trade_completed"]);
    assert_eq!(inventory.quantity(BOB, SWORD).await.unwrap(), 1);
}

#[tokio::test]
async fn test_empty_trade_cannot_be_confirmed() {
    let (mut h, _) = Harness::standard();
    let trade_id = h.open_trade(ALICE, BOB).await;

    assert_eq!(
        h.engine.confirm(ALICE, &trade_id).await.unwrap_err(),
        TradeError::EmptyTrade {
            trade_id: trade_id.clone(),
        }
    );
}

#[tokio::test]
async fn test_remove_item() {
    let (mut h, _) = Harness::standard();
    h.connect(BOB);
    let trade_id = h.open_trade(ALICE, BOB).await;

    h.engine.add_item(BOB, &trade_id, SHIELD, 2).await.unwrap();
    h.engine
        .remove_item(BOB, &trade_id, SHIELD, Some(1))
        .await
        .unwrap();
    let last = h.drain(BOB).pop().unwrap();
    assert_eq!(snapshot_of(&last).partner_offer, vec![OfferLine::new(SHIELD, 1)]);

    h.engine
        .remove_item(BOB, &trade_id, SHIELD, None)
        .await
        .unwrap();
    let last = h.drain(BOB).pop().unwrap();
    assert!(snapshot_of(&last).partner_offer.is_empty());

    assert_eq!(
        h.engine
            .remove_item(BOB, &trade_id, SHIELD, None)
            .await
            .unwrap_err(),
        TradeError::ItemNotOffered { item_id: SHIELD }
    );
}

#[tokio::test]
async fn test_cancel_by_either_participant() {
    let (mut h, _) = Harness::standard();
    h.connect(ALICE);
    h.connect(BOB);
    let trade_id = h.open_trade(ALICE, BOB).await;

    h.engine.cancel(BOB, &trade_id).await.unwrap();
    let expected = ServerEvent::TradeCancelled {
        trade_id: trade_id.clone(),
        reason: CancelReason::Cancelled,
        by: Some(BOB),
    };
    assert_eq!(h.last_event(ALICE), Some(expected.clone()));
    assert_eq!(h.last_event(BOB), Some(expected));
    assert!(h.engine.registry().is_empty());
}

#[rstest]
#[case::while_invited(false)]
#[case::while_negotiating(true)]
#[tokio::test]
async fn test_disconnect_cancels_session(#[case] accepted: bool) {
    let (mut h, _) = Harness::standard();
    h.connect(ALICE);
    h.connect(BOB);

    let trade_id = h
        .engine
        .invite(&participant(ALICE), participant(BOB))
        .unwrap();
    if accepted {
        h.engine.accept(BOB, &trade_id).await.unwrap();
    }
    h.drain(ALICE);
    h.drain(BOB);

    h.disconnect(ALICE).await;

    assert_eq!(
        h.last_event(BOB),
        Some(ServerEvent::TradeCancelled {
            trade_id,
            reason: CancelReason::ParticipantDisconnected,
            by: Some(ALICE),
        })
    );
    assert!(h.engine.registry().is_empty());
    assert!(h.engine.registry().active_session_for_user(BOB).is_none());
}

#[tokio::test]
async fn test_reconnect_keeps_session() {
    let (mut h, _) = Harness::standard();
    h.connect(ALICE);
    h.connect(BOB);
    let trade_id = h.open_trade(ALICE, BOB).await;

    // New socket replaces the old one before the old one goes away
    h.connect(ALICE);
    h.engine.handle_disconnect(ALICE).await;

    assert_eq!(h.engine.registry().len(), 1);
    h.engine.add_item(ALICE, &trade_id, SWORD, 1).await.unwrap();
    assert_eq!(types(&h.drain(ALICE)), vec!["trade_updated"]);
}

#[tokio::test]
async fn test_offline_invite_falls_back_to_notification() {
    let (mut h, _) = Harness::standard();
    h.connect(ALICE);

    let trade_id = h
        .engine
        .invite(&participant(ALICE), participant(BOB))
        .unwrap();

    assert_eq!(
        h.last_event(ALICE),
        Some(ServerEvent::TradeInviteSent {
            trade_id,
            to: participant(BOB),
            delivered: false,
        })
    );
    assert_eq!(h.notifier.kinds_for(BOB), vec![NotificationKind::TradeInvite]);
    assert_eq!(h.engine.registry().len(), 1);
}

#[tokio::test]
async fn test_busy_target_rejects_invite() {
    let (mut h, _) = Harness::standard();
    h.open_trade(ALICE, BOB).await;

    assert_eq!(
        h.engine
            .invite(&participant(CAROL), participant(BOB))
            .unwrap_err(),
        TradeError::AlreadyInSession { user_id: BOB }
    );
    assert_eq!(h.engine.registry().len(), 1);
}

#[tokio::test]
async fn test_expire_stale_sessions() {
    let (mut h, _) = Harness::standard();
    h.connect(ALICE);
    h.connect(BOB);
    let trade_id = h
        .engine
        .invite(&participant(ALICE), participant(BOB))
        .unwrap();
    h.drain(ALICE);
    h.drain(BOB);

    assert_eq!(h.engine.expire_stale(Utc::now()).await, 0);
    assert_eq!(
        h.engine
            .expire_stale(Utc::now() + Duration::minutes(3))
            .await,
        1
    );

    let expected = ServerEvent::TradeCancelled {
        trade_id,
        reason: CancelReason::Expired,
        by: None,
    };
    assert_eq!(h.last_event(ALICE), Some(expected.clone()));
    assert_eq!(h.last_event(BOB), Some(expected));
    assert!(h.engine.registry().is_empty());
}

#[tokio::test]
async fn test_idle_negotiation_expires() {
    let inventory = Arc::new(InMemoryInventory::with_holdings([(ALICE, SWORD, 1)]));
    let config = SessionConfig {
        invite_timeout_seconds: 0,
        idle_timeout_seconds: 60,
        ..SessionConfig::default()
    };
    let mut h = Harness::with_config(inventory as Arc<dyn InventoryStore>, config);

    // Unanswered invites expire at once
    h.engine
        .invite(&participant(ALICE), participant(BOB))
        .unwrap();
    assert_eq!(h.engine.expire_stale(Utc::now()).await, 1);

    let trade_id = h
        .engine
        .invite(&participant(ALICE), participant(BOB))
        .unwrap();
    h.engine.accept(BOB, &trade_id).await.unwrap();
    h.engine.add_item(ALICE, &trade_id, SWORD, 1).await.unwrap();

    assert_eq!(
        h.engine
            .expire_stale(Utc::now() + Duration::seconds(30))
            .await,
        0
    );
    assert_eq!(
        h.engine
            .expire_stale(Utc::now() + Duration::seconds(61))
            .await,
        1
    );
}

#[tokio::test]
async fn test_cancel_all_on_shutdown() {
    let (mut h, _) = Harness::standard();
    h.connect(CAROL);
    h.open_trade(ALICE, BOB).await;
    let trade_id = h
        .engine
        .invite(&participant(CAROL), participant(DAVE))
        .unwrap();
    h.drain(CAROL);

    assert_eq!(h.engine.cancel_all(CancelReason::Shutdown).await, 2);
    assert!(h.engine.registry().is_empty());
    assert_eq!(
        h.last_event(CAROL),
        Some(ServerEvent::TradeCancelled {
            trade_id,
            reason: CancelReason::Shutdown,
            by: None,
        })
    );
}

#[tokio::test]
async fn test_handle_message_validates_target() {
    let (h, _) = Harness::standard();
    let alice = participant(ALICE);

    let err = h
        .engine
        .handle_message(
            &alice,
            ClientMessage::TradeInvite {
                target_user_id: BOB,
                target_username: "   ".to_string(),
            },
        )
        .await
        .unwrap_err();
    assert_eq!(err.code(), "malformed_message");

    let err = h
        .engine
        .handle_message(
            &alice,
            ClientMessage::TradeInvite {
                target_user_id: UserId(1),
                target_username: "alice".to_string(),
            },
        )
        .await
        .unwrap_err();
    assert_eq!(err, TradeError::SelfTrade);

    h.engine
        .handle_message(
            &alice,
            ClientMessage::TradeInvite {
                target_user_id: BOB,
                target_username: " bob ".to_string(),
            },
        )
        .await
        .unwrap();
    let handle = h.engine.registry().active_session_for_user(BOB).unwrap();
    assert_eq!(handle.lock().await.partner(), &Participant::new(BOB, "bob"));
}
