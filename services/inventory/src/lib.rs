//! Inventory Store
//!
//! Authoritative mapping of user → item → owned quantity. The live-trade
//! engine depends on exactly one transactional primitive from this crate:
//! [`InventoryStore::check_and_transfer`], which verifies every debit of a
//! transfer batch against current holdings and applies all debits and
//! credits as a single all-or-nothing unit.
//!
//! Backends:
//! - [`InMemoryInventory`]: one mutex around the whole table
//! - `PgInventoryStore` (feature `postgres`): one transaction with row locks

#![warn(missing_docs)]
#![forbid(unsafe_code)]

use async_trait::async_trait;
use barterbay_common::{ItemId, OfferLine, Transfer, UserId};
use std::collections::{BTreeMap, BTreeSet};
use thiserror::Error;

pub mod memory;
#[cfg(feature = "postgres")]
pub mod postgres;

pub use memory::InMemoryInventory;
#[cfg(feature = "postgres")]
pub use postgres::PgInventoryStore;

/// Inventory error types
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum InventoryError {
    /// A debit exceeds what the user currently holds
    #[error("user {user_id} holds {available} of item {item_id} but {requested} are required")]
    Insufficient {
        /// Owner that is short
        user_id: UserId,
        /// Item that is short
        item_id: ItemId,
        /// Total quantity the batch debits
        requested: u64,
        /// Quantity currently held
        available: u64,
    },

    /// The batch itself is malformed
    #[error("invalid transfer: {reason}")]
    InvalidTransfer {
        /// What was wrong with the batch
        reason: String,
    },

    /// A credit would overflow the stored quantity
    #[error("quantity overflow crediting item {item_id} to user {user_id}")]
    Overflow {
        /// Receiving user
        user_id: UserId,
        /// Credited item
        item_id: ItemId,
    },

    /// The backend did not finish the batch within its commit bound
    #[error("inventory operation timed out")]
    Timeout,

    /// Storage backend failure
    #[error("inventory backend error: {0}")]
    Backend(String),
}

impl InventoryError {
    /// True when the failure is caused by holdings, not by the backend
    #[must_use]
    pub const fn is_conflict(&self) -> bool {
        matches!(self, Self::Insufficient { .. })
    }
}

/// Type alias for inventory results
pub type InventoryResult<T> = Result<T, InventoryError>;

/// Transactional contract consumed by the live-trade engine
#[async_trait]
pub trait InventoryStore: Send + Sync {
    /// Quantity of `item_id` currently owned by `user_id` (0 if none)
    async fn quantity(&self, user_id: UserId, item_id: ItemId) -> InventoryResult<u32>;

    /// Every non-empty holding of `user_id`, ordered by item id
    async fn holdings(&self, user_id: UserId) -> InventoryResult<Vec<OfferLine>>;

    /// Verify and apply a batch of transfers atomically.
    ///
    /// Either every transfer is applied or none is. Implementations must
    /// guarantee that no concurrent call can observe or act on holdings
    /// between the check and the apply.
    ///
    /// Callers await the result to the end. A backend that needs a time
    /// bound enforces it itself and reports [`InventoryError::Timeout`]
    /// only when nothing was applied.
    async fn check_and_transfer(&self, transfers: &[Transfer]) -> InventoryResult<()>;
}

/// Per-key debit and credit totals of a transfer batch
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct TransferPlan {
    debits: BTreeMap<(UserId, ItemId), u64>,
    credits: BTreeMap<(UserId, ItemId), u64>,
}

impl TransferPlan {
    /// Validate and aggregate a batch
    pub fn build(transfers: &[Transfer]) -> InventoryResult<Self> {
        let mut plan = Self::default();

        for transfer in transfers {
            if transfer.quantity == 0 {
                return Err(InventoryError::InvalidTransfer {
                    reason: format!("zero quantity for item {}", transfer.item_id),
                });
            }
            if transfer.from == transfer.to {
                return Err(InventoryError::InvalidTransfer {
                    reason: format!("user {} cannot transfer to itself", transfer.from),
                });
            }

            *plan
                .debits
                .entry((transfer.from, transfer.item_id))
                .or_default() += u64::from(transfer.quantity);
            *plan
                .credits
                .entry((transfer.to, transfer.item_id))
                .or_default() += u64::from(transfer.quantity);
        }

        Ok(plan)
    }

    /// Aggregated debits in key order
    pub fn debits(&self) -> impl Iterator<Item = (UserId, ItemId, u64)> + '_ {
        self.debits.iter().map(|(&(user, item), &qty)| (user, item, qty))
    }

    /// Aggregated credits in key order
    pub fn credits(&self) -> impl Iterator<Item = (UserId, ItemId, u64)> + '_ {
        self.credits.iter().map(|(&(user, item), &qty)| (user, item, qty))
    }

    /// Every key the batch touches, sorted. Backends lock in this order.
    #[must_use]
    pub fn touched_keys(&self) -> BTreeSet<(UserId, ItemId)> {
        self.debits.keys().chain(self.credits.keys()).copied().collect()
    }

    /// True when the batch moves nothing
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.debits.is_empty()
    }

    /// First debit not covered by `holding`, if any
    pub fn check<F>(&self, mut holding: F) -> InventoryResult<()>
    where
        F: FnMut(UserId, ItemId) -> u64,
    {
        for (user_id, item_id, requested) in self.debits() {
            let available = holding(user_id, item_id);
            if available < requested {
                return Err(InventoryError::Insufficient {
                    user_id,
                    item_id,
                    requested,
                    available,
                });
            }
        }
        Ok(())
    }
}
