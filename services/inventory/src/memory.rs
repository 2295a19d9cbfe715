//! In-process inventory backed by a single mutex-guarded table

use async_trait::async_trait;
use barterbay_common::{ItemId, OfferLine, Transfer, UserId};
use parking_lot::Mutex;
use rustc_hash::FxHashMap;
use tracing::debug;

use crate::{InventoryError, InventoryResult, InventoryStore, TransferPlan};

/// In-memory inventory.
///
/// `check_and_transfer` runs check and apply under one lock acquisition,
/// so concurrent batches are fully serialized.
#[derive(Debug, Default)]
pub struct InMemoryInventory {
    holdings: Mutex<FxHashMap<(UserId, ItemId), u32>>,
}

impl InMemoryInventory {
    /// Create an empty inventory
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Create an inventory pre-populated with `(user, item, quantity)` rows
    pub fn with_holdings<I>(rows: I) -> Self
    where
        I: IntoIterator<Item = (UserId, ItemId, u32)>,
    {
        let inventory = Self::new();
        for (user_id, item_id, quantity) in rows {
            inventory.set_quantity(user_id, item_id, quantity);
        }
        inventory
    }

    /// Overwrite a holding. Intended for seeding and administration.
    pub fn set_quantity(&self, user_id: UserId, item_id: ItemId, quantity: u32) {
        let mut holdings = self.holdings.lock();
        if quantity == 0 {
            holdings.remove(&(user_id, item_id));
        } else {
            holdings.insert((user_id, item_id), quantity);
        }
    }

    /// Sum of `item_id` across every user
    #[must_use]
    pub fn total_of(&self, item_id: ItemId) -> u64 {
        self.holdings
            .lock()
            .iter()
            .filter(|((_, item), _)| *item == item_id)
            .map(|(_, &qty)| u64::from(qty))
            .sum()
    }

    fn quantity_sync(&self, user_id: UserId, item_id: ItemId) -> u32 {
        self.holdings
            .lock()
            .get(&(user_id, item_id))
            .copied()
            .unwrap_or(0)
    }
}

#[async_trait]
impl InventoryStore for InMemoryInventory {
    async fn quantity(&self, user_id: UserId, item_id: ItemId) -> InventoryResult<u32> {
        Ok(self.quantity_sync(user_id, item_id))
    }

    async fn holdings(&self, user_id: UserId) -> InventoryResult<Vec<OfferLine>> {
        let mut lines: Vec<OfferLine> = self
            .holdings
            .lock()
            .iter()
            .filter(|((user, _), _)| *user == user_id)
            .map(|(&(_, item_id), &quantity)| OfferLine::new(item_id, quantity))
            .collect();
        lines.sort_by_key(|line| line.item_id);
        Ok(lines)
    }

    async fn check_and_transfer(&self, transfers: &[Transfer]) -> InventoryResult<()> {
        let plan = TransferPlan::build(transfers)?;
        if plan.is_empty() {
            return Ok(());
        }

        let mut holdings = self.holdings.lock();

        plan.check(|user_id, item_id| {
            holdings
                .get(&(user_id, item_id))
                .map_or(0, |&qty| u64::from(qty))
        })?;

        // Verify every credit fits before touching anything
        for (user_id, item_id, credit) in plan.credits() {
            let current = u64::from(holdings.get(&(user_id, item_id)).copied().unwrap_or(0));
            let debit = plan
                .debits()
                .find(|&(u, i, _)| u == user_id && i == item_id)
                .map_or(0, |(_, _, qty)| qty);
            if current - debit + credit > u64::from(u32::MAX) {
                return Err(InventoryError::Overflow { user_id, item_id });
            }
        }

        for (user_id, item_id, debit) in plan.debits() {
            let key = (user_id, item_id);
            let remaining = u64::from(holdings.get(&key).copied().unwrap_or(0)) - debit;
            if remaining == 0 {
                holdings.remove(&key);
            } else {
                // Bounded by the original u32 value
                holdings.insert(key, remaining as u32);
            }
        }

        for (user_id, item_id, credit) in plan.credits() {
            let entry = holdings.entry((user_id, item_id)).or_insert(0);
            // Bounded by the overflow check above
            *entry = (u64::from(*entry) + credit) as u32;
        }

        debug!(transfers = transfers.len(), "Inventory batch applied");
        Ok(())
    }
}
