//! Core identity and inventory types shared by the BarterBay services

use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;
use uuid::Uuid;

use crate::constants::MAX_TRADE_ID_LEN;

/// Numeric user identifier issued by the account service
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct UserId(pub i64);

impl UserId {
    /// Create a new user id
    #[must_use]
    pub const fn new(id: i64) -> Self {
        Self(id)
    }

    /// Raw numeric value
    #[must_use]
    pub const fn as_i64(self) -> i64 {
        self.0
    }
}

impl fmt::Display for UserId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Item catalogue identifier
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ItemId(pub i64);

impl ItemId {
    /// Create a new item id
    #[must_use]
    pub const fn new(id: i64) -> Self {
        Self(id)
    }

    /// Raw numeric value
    #[must_use]
    pub const fn as_i64(self) -> i64 {
        self.0
    }
}

impl fmt::Display for ItemId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Rejected trade identifier
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TradeIdError {
    /// Identifier was empty
    #[error("trade id must not be empty")]
    Empty,
    /// Identifier exceeded the maximum length
    #[error("trade id exceeds {max} characters")]
    TooLong {
        /// Maximum accepted length
        max: usize,
    },
}

/// Opaque live-trade session identifier
///
/// Serialized as a plain string. Deserializing goes through
/// [`TradeId::parse`], so wire input obeys the same bounds.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct TradeId(String);

impl TradeId {
    /// Allocate a fresh random identifier
    #[must_use]
    pub fn generate() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    /// Wrap a client supplied identifier
    pub fn parse(raw: impl Into<String>) -> Result<Self, TradeIdError> {
        let raw = raw.into();
        if raw.is_empty() {
            return Err(TradeIdError::Empty);
        }
        if raw.len() > MAX_TRADE_ID_LEN {
            return Err(TradeIdError::TooLong {
                max: MAX_TRADE_ID_LEN,
            });
        }
        Ok(Self(raw))
    }

    /// Borrow the identifier text
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl TryFrom<String> for TradeId {
    type Error = TradeIdError;

    fn try_from(raw: String) -> Result<Self, Self::Error> {
        Self::parse(raw)
    }
}

impl From<TradeId> for String {
    fn from(id: TradeId) -> Self {
        id.0
    }
}

impl fmt::Display for TradeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// A user as seen by a trade session: numeric id plus display name
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Participant {
    pub id: UserId,
    pub username: String,
}

impl Participant {
    /// Create a participant
    pub fn new(id: UserId, username: impl Into<String>) -> Self {
        Self {
            id,
            username: username.into(),
        }
    }
}

impl fmt::Display for Participant {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}#{}", self.username, self.id)
    }
}

/// One `(item, quantity)` line of an offer or a holding
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OfferLine {
    pub item_id: ItemId,
    pub quantity: u32,
}

impl OfferLine {
    #[must_use]
    pub const fn new(item_id: ItemId, quantity: u32) -> Self {
        Self { item_id, quantity }
    }
}

/// A single directed movement of item units between two users
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Transfer {
    pub from: UserId,
    pub to: UserId,
    pub item_id: ItemId,
    pub quantity: u32,
}

impl Transfer {
    #[must_use]
    pub const fn new(from: UserId, to: UserId, item_id: ItemId, quantity: u32) -> Self {
        Self {
            from,
            to,
            item_id,
            quantity,
        }
    }
}
