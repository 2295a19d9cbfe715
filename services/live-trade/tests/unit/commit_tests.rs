//! Commit path tests: conflicts, races, backend failures and timeouts

use super::helpers::*;
use async_trait::async_trait;
use barterbay_common::{ItemId, OfferLine, Transfer, UserId};
use inventory_store::{InMemoryInventory, InventoryError, InventoryResult, InventoryStore};
use live_trade::{SessionConfig, models::ServerEvent};
use pretty_assertions::assert_eq;
use std::sync::Arc;
use std::time::Duration;

#[derive(Clone, Copy)]
enum Fault {
    /// Commit fails outright
    Backend,
    /// Commit reports its own bound expired after a pause, applying nothing
    Timeout(Duration),
    /// Commit applies after a pause
    Slow(Duration),
}

/// Answers lookups from an in-memory table, fails or stalls the commit
struct FaultyInventory {
    inner: InMemoryInventory,
    fault: Fault,
}

#[async_trait]
impl InventoryStore for FaultyInventory {
    async fn quantity(&self, user_id: UserId, item_id: ItemId) -> InventoryResult<u32> {
        self.inner.quantity(user_id, item_id).await
    }

    async fn holdings(&self, user_id: UserId) -> InventoryResult<Vec<OfferLine>> {
        self.inner.holdings(user_id).await
    }

    async fn check_and_transfer(&self, transfers: &[Transfer]) -> InventoryResult<()> {
        match self.fault {
            Fault::Backend => Err(InventoryError::Backend("connection reset".to_string())),
            Fault::Timeout(after) => {
                tokio::time::sleep(after).await;
                Err(InventoryError::Timeout)
            }
            Fault::Slow(delay) => {
                tokio::time::sleep(delay).await;
                self.inner.check_and_transfer(transfers).await
            }
        }
    }
}

fn faulty(fault: Fault) -> Arc<FaultyInventory> {
    Arc::new(FaultyInventory {
        inner: InMemoryInventory::with_holdings([(ALICE, SWORD, 1), (BOB, SHIELD, 2)]),
        fault,
    })
}

/// Open a sword for two shields swap with Alice's confirm already in
async fn ready_swap(h: &mut Harness) -> barterbay_common::TradeId {
    h.connect(ALICE);
    h.connect(BOB);
    let trade_id = h.open_trade(ALICE, BOB).await;
    h.engine.add_item(ALICE, &trade_id, SWORD, 1).await.unwrap();
    h.engine.add_item(BOB, &trade_id, SHIELD, 2).await.unwrap();
    h.engine.confirm(ALICE, &trade_id).await.unwrap();
    h.drain(ALICE);
    h.drain(BOB);
    trade_id
}

fn failure_reason(event: Option<ServerEvent>) -> String {
    match event {
        Some(ServerEvent::TradeFailed { reason, .. }) => reason,
        other => panic!("expected trade_failed, got {other:?}"),
    }
}

#[tokio::test]
async fn test_holding_changed_before_commit() {
    let (mut h, inventory) = Harness::standard();
    let trade_id = ready_swap(&mut h).await;

    // Bob loses a shield elsewhere after offering both
    inventory.set_quantity(BOB, SHIELD, 1);

    h.engine.confirm(BOB, &trade_id).await.unwrap();

    let reason = failure_reason(h.last_event(ALICE));
    assert!(reason.contains("holds 1"), "{reason}");
    assert_eq!(failure_reason(h.last_event(BOB)), reason);

    // Nothing moved
    assert_eq!(inventory.quantity(ALICE, SWORD).await.unwrap(), 1);
    assert_eq!(inventory.quantity(BOB, SHIELD).await.unwrap(), 1);
    assert_eq!(inventory.quantity(ALICE, SHIELD).await.unwrap(), 0);
    assert!(h.engine.registry().is_empty());
    assert!(h.notifier.kinds_for(ALICE).is_empty());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_commit_races_direct_transfer() {
    for _ in 0..25 {
        let (mut h, inventory) = Harness::standard();
        let trade_id = ready_swap(&mut h).await;

        let engine = Arc::clone(&h.engine);
        let trade = {
            let trade_id = trade_id.clone();
            tokio::spawn(async move { engine.confirm(BOB, &trade_id).await })
        };
        let store = Arc::clone(&inventory);
        let direct = tokio::spawn(async move {
            store
                .check_and_transfer(&[Transfer::new(ALICE, CAROL, SWORD, 1)])
                .await
        });

        trade.await.unwrap().unwrap();
        let direct_won = direct.await.unwrap().is_ok();

        let outcome = h.last_event(ALICE).unwrap();
        match (direct_won, &outcome) {
            (true, ServerEvent::TradeFailed { .. }) => {
                assert_eq!(inventory.quantity(CAROL, SWORD).await.unwrap(), 1);
                assert_eq!(inventory.quantity(BOB, SHIELD).await.unwrap(), 2);
            }
            (false, ServerEvent::TradeCompleted { .. }) => {
                assert_eq!(inventory.quantity(BOB, SWORD).await.unwrap(), 1);
                assert_eq!(inventory.quantity(ALICE, SHIELD).await.unwrap(), 2);
            }
            _ => panic!("direct_won={direct_won} but session ended with {outcome:?}"),
        }

        assert_eq!(inventory.total_of(SWORD), 1);
        assert_eq!(inventory.total_of(SHIELD), 2);
        assert!(h.engine.registry().is_empty());
    }
}

#[tokio::test]
async fn test_backend_failure_fails_trade() {
    let inventory = faulty(Fault::Backend);
    let mut h = Harness::new(Arc::clone(&inventory) as Arc<dyn InventoryStore>);
    let trade_id = ready_swap(&mut h).await;

    h.engine.confirm(BOB, &trade_id).await.unwrap();

    let reason = failure_reason(h.last_event(BOB));
    assert!(reason.contains("try again"), "{reason}");
    assert!(!reason.contains("connection reset"));
    assert_eq!(inventory.inner.quantity(ALICE, SWORD).await.unwrap(), 1);
    assert!(h.engine.registry().is_empty());
}

#[tokio::test]
async fn test_store_timeout_fails_trade() {
    let inventory = faulty(Fault::Timeout(Duration::from_millis(20)));
    let mut h = Harness::new(Arc::clone(&inventory) as Arc<dyn InventoryStore>);
    let trade_id = ready_swap(&mut h).await;

    h.engine.confirm(BOB, &trade_id).await.unwrap();

    let reason = failure_reason(h.last_event(ALICE));
    assert!(reason.contains("timed out"), "{reason}");
    assert_eq!(failure_reason(h.last_event(BOB)), reason);
    assert_eq!(inventory.inner.quantity(BOB, SHIELD).await.unwrap(), 2);
    assert!(h.engine.registry().active_session_for_user(ALICE).is_none());
}

#[tokio::test]
async fn test_slow_commit_reports_what_the_store_did() {
    let inventory = faulty(Fault::Slow(Duration::from_millis(200)));
    let config = SessionConfig {
        commit_timeout_ms: 50,
        ..SessionConfig::default()
    };
    let mut h = Harness::with_config(Arc::clone(&inventory) as Arc<dyn InventoryStore>, config);
    let trade_id = ready_swap(&mut h).await;

    h.engine.confirm(BOB, &trade_id).await.unwrap();

    // The transfer landed, so both sides must hear it completed
    for user in [ALICE, BOB] {
        match h.last_event(user) {
            Some(ServerEvent::TradeCompleted { .. }) => {}
            other => panic!("expected trade_completed, got {other:?}"),
        }
    }
    assert_eq!(inventory.inner.quantity(BOB, SWORD).await.unwrap(), 1);
    assert_eq!(inventory.inner.quantity(ALICE, SHIELD).await.unwrap(), 2);
    assert!(h.engine.registry().is_empty());
}
