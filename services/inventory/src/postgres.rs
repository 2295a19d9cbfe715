//! PostgreSQL inventory backend
//!
//! Holdings live in `user_items(user_id, item_id, quantity)`. A transfer
//! batch runs inside one transaction: every touched row is locked with
//! `SELECT ... FOR UPDATE` in key order (so two batches can never lock the
//! same rows in opposite orders), debits are verified against the locked
//! values, then all updates are applied and committed together.
//!
//! Keys without a row get a zero row inserted first, so credits to a user
//! who holds none of an item are locked like any other key.
//!
//! With a commit timeout set, each batch runs under `SET LOCAL`
//! `statement_timeout` and `lock_timeout`. An expired batch is rolled back
//! by the server and reported as [`InventoryError::Timeout`].

use async_trait::async_trait;
use barterbay_common::{ItemId, OfferLine, Transfer, UserId};
use rustc_hash::FxHashMap;
use sqlx::{PgPool, postgres::PgPoolOptions};
use std::time::Duration;
use tracing::{debug, info};

use crate::{InventoryError, InventoryResult, InventoryStore, TransferPlan};

const CREATE_TABLE: &str = r"
CREATE TABLE IF NOT EXISTS user_items (
    user_id   BIGINT  NOT NULL,
    item_id   BIGINT  NOT NULL,
    quantity  INTEGER NOT NULL CHECK (quantity >= 0),
    PRIMARY KEY (user_id, item_id)
)";

/// Inventory stored in PostgreSQL
#[derive(Debug, Clone)]
pub struct PgInventoryStore {
    pool: PgPool,
    commit_timeout: Option<Duration>,
}

impl PgInventoryStore {
    /// Connect a pool to `database_url`
    pub async fn connect(database_url: &str, max_connections: u32) -> InventoryResult<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .connect(database_url)
            .await
            .map_err(backend)?;

        info!("Connected inventory store to PostgreSQL");
        Ok(Self::from_pool(pool))
    }

    /// Wrap an existing pool
    #[must_use]
    pub const fn from_pool(pool: PgPool) -> Self {
        Self {
            pool,
            commit_timeout: None,
        }
    }

    /// Bound every transfer batch by `timeout`, enforced by the server
    #[must_use]
    pub const fn with_commit_timeout(mut self, timeout: Duration) -> Self {
        self.commit_timeout = Some(timeout);
        self
    }

    /// Create the `user_items` table if it does not exist
    pub async fn ensure_schema(&self) -> InventoryResult<()> {
        sqlx::query(CREATE_TABLE)
            .execute(&self.pool)
            .await
            .map_err(backend)?;
        Ok(())
    }
}

// query_canceled (statement_timeout) and lock_not_available (lock_timeout)
const TIMEOUT_SQLSTATES: [&str; 2] = ["57014", "55P03"];

fn backend(err: sqlx::Error) -> InventoryError {
    match &err {
        sqlx::Error::PoolTimedOut => InventoryError::Timeout,
        sqlx::Error::Database(db)
            if db
                .code()
                .is_some_and(|code| TIMEOUT_SQLSTATES.contains(&&*code)) =>
        {
            InventoryError::Timeout
        }
        _ => InventoryError::Backend(err.to_string()),
    }
}

/// `SET LOCAL` statements for a batch bounded by `timeout`
pub(crate) fn timeout_statements(timeout: Duration) -> [String; 2] {
    let millis = timeout.as_millis().max(1);
    [
        format!("SET LOCAL statement_timeout = {millis}"),
        format!("SET LOCAL lock_timeout = {millis}"),
    ]
}

fn to_u32(value: i32) -> u32 {
    u32::try_from(value).unwrap_or(0)
}

#[async_trait]
impl InventoryStore for PgInventoryStore {
    async fn quantity(&self, user_id: UserId, item_id: ItemId) -> InventoryResult<u32> {
        let quantity: Option<i32> = sqlx::query_scalar(
            "SELECT quantity FROM user_items WHERE user_id = $1 AND item_id = $2",
        )
        .bind(user_id.as_i64())
        .bind(item_id.as_i64())
        .fetch_optional(&self.pool)
        .await
        .map_err(backend)?;

        Ok(quantity.map_or(0, to_u32))
    }

    async fn holdings(&self, user_id: UserId) -> InventoryResult<Vec<OfferLine>> {
        let rows: Vec<(i64, i32)> = sqlx::query_as(
            "SELECT item_id, quantity FROM user_items \
             WHERE user_id = $1 AND quantity > 0 ORDER BY item_id",
        )
        .bind(user_id.as_i64())
        .fetch_all(&self.pool)
        .await
        .map_err(backend)?;

        Ok(rows
            .into_iter()
            .map(|(item_id, quantity)| OfferLine::new(ItemId(item_id), to_u32(quantity)))
            .collect())
    }

    async fn check_and_transfer(&self, transfers: &[Transfer]) -> InventoryResult<()> {
        let plan = TransferPlan::build(transfers)?;
        if plan.is_empty() {
            return Ok(());
        }

        // Dropping the transaction without commit rolls it back
        let mut tx = self.pool.begin().await.map_err(backend)?;

        if let Some(timeout) = self.commit_timeout {
            for statement in timeout_statements(timeout) {
                sqlx::query(&statement)
                    .execute(&mut *tx)
                    .await
                    .map_err(backend)?;
            }
        }

        let keys = plan.touched_keys();
        let mut locked: FxHashMap<(UserId, ItemId), u64> = FxHashMap::default();
        for &(user_id, item_id) in &keys {
            sqlx::query(
                "INSERT INTO user_items (user_id, item_id, quantity) VALUES ($1, $2, 0) \
                 ON CONFLICT (user_id, item_id) DO NOTHING",
            )
            .bind(user_id.as_i64())
            .bind(item_id.as_i64())
            .execute(&mut *tx)
            .await
            .map_err(backend)?;

            let quantity: i32 = sqlx::query_scalar(
                "SELECT quantity FROM user_items \
                 WHERE user_id = $1 AND item_id = $2 FOR UPDATE",
            )
            .bind(user_id.as_i64())
            .bind(item_id.as_i64())
            .fetch_one(&mut *tx)
            .await
            .map_err(backend)?;

            locked.insert((user_id, item_id), u64::from(to_u32(quantity)));
        }

        plan.check(|user_id, item_id| locked.get(&(user_id, item_id)).copied().unwrap_or(0))?;

        for (user_id, item_id, debit) in plan.debits() {
            if let Some(held) = locked.get_mut(&(user_id, item_id)) {
                *held -= debit;
            }
        }
        for (user_id, item_id, credit) in plan.credits() {
            let held = locked.entry((user_id, item_id)).or_insert(0);
            *held += credit;
            if *held > i32::MAX as u64 {
                return Err(InventoryError::Overflow { user_id, item_id });
            }
        }

        // Only rows this batch holds locks on are written or removed
        for &(user_id, item_id) in &keys {
            let quantity = locked.get(&(user_id, item_id)).copied().unwrap_or(0);
            let statement = if quantity == 0 {
                sqlx::query("DELETE FROM user_items WHERE user_id = $1 AND item_id = $2")
                    .bind(user_id.as_i64())
                    .bind(item_id.as_i64())
            } else {
                // Bounded by the overflow check above
                sqlx::query("UPDATE user_items SET quantity = $3 WHERE user_id = $1 AND item_id = $2")
                    .bind(user_id.as_i64())
                    .bind(item_id.as_i64())
                    .bind(quantity as i32)
            };
            statement.execute(&mut *tx).await.map_err(backend)?;
        }

        tx.commit().await.map_err(backend)?;

        debug!(transfers = transfers.len(), "Inventory batch committed");
        Ok(())
    }
}
