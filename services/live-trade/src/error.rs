//! Error types for the live-trade service

use barterbay_common::{ItemId, TradeId, UserId};
use thiserror::Error;

use crate::session::TradeState;

/// Live-trade error types.
///
/// Every variant except [`TradeError::CommitConflict`] is reported only to
/// the socket that caused it and leaves session state untouched.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TradeError {
    /// User already participates in a non-terminal session
    #[error("User {user_id} is already in an active trade")]
    AlreadyInSession {
        /// The busy user
        user_id: UserId,
    },

    /// No live session with this id
    #[error("Trade not found: {trade_id}")]
    SessionNotFound {
        /// The unknown identifier
        trade_id: TradeId,
    },

    /// Sender is neither initiator nor partner, or acted for the wrong side
    #[error("User {user_id} is not allowed to act on trade {trade_id}")]
    NotAParticipant {
        /// Target session
        trade_id: TradeId,
        /// Offending user
        user_id: UserId,
    },

    /// Offer exceeds the unreserved quantity held
    #[error("Item {item_id} unavailable: requested {requested}, available {available}")]
    ItemUnavailable {
        /// Offered item
        item_id: ItemId,
        /// Total quantity the offer line would hold
        requested: u64,
        /// Quantity the user can still pledge
        available: u64,
    },

    /// Removal of an item that is not on the sender's side
    #[error("Item {item_id} is not part of your offer")]
    ItemNotOffered {
        /// Item the sender tried to remove
        item_id: ItemId,
    },

    /// Zero or out-of-range quantity
    #[error("Invalid quantity: {reason}")]
    InvalidQuantity {
        /// Why the quantity was rejected
        reason: String,
    },

    /// Offer already holds the maximum number of lines
    #[error("Offer cannot hold more than {limit} different items")]
    OfferLimitExceeded {
        /// Configured line limit
        limit: usize,
    },

    /// Action not legal in the session's current state
    #[error("Trade {trade_id} cannot {operation} while {state}")]
    InvalidState {
        /// Target session
        trade_id: TradeId,
        /// Attempted action
        operation: &'static str,
        /// State that forbids it
        state: TradeState,
    },

    /// Both offers are empty, nothing to confirm
    #[error("Trade {trade_id} has nothing to exchange")]
    EmptyTrade {
        /// Target session
        trade_id: TradeId,
    },

    /// Invite addressed to the sender itself
    #[error("You cannot trade with yourself")]
    SelfTrade,

    /// Inventory check failed at commit time
    #[error("Trade could not be committed: {reason}")]
    CommitConflict {
        /// Shortfall explanation
        reason: String,
    },

    /// Connection replaced by a newer one for the same user
    #[error("Connection superseded by a newer session")]
    ConnectionSuperseded,

    /// Frame could not be decoded
    #[error("Malformed message: {reason}")]
    MalformedMessage {
        /// Decoder error
        reason: String,
    },

    /// Frame carried an unknown `type`
    #[error("Unknown message type: {message_type}")]
    UnknownMessageType {
        /// The unrecognised type tag
        message_type: String,
    },

    /// Connection exceeded its inbound message quota
    #[error("Too many messages, slow down")]
    RateLimited,

    /// Inventory backend could not answer a lookup
    #[error("Inventory temporarily unavailable")]
    InventoryUnavailable,
}

impl TradeError {
    /// Stable machine-readable code sent to clients
    #[must_use]
    pub const fn code(&self) -> &'static str {
        match self {
            Self::AlreadyInSession { .. } => "already_in_session",
            Self::SessionNotFound { .. } => "session_not_found",
            Self::NotAParticipant { .. } => "not_a_participant",
            Self::ItemUnavailable { .. } => "item_unavailable",
            Self::ItemNotOffered { .. } => "item_not_offered",
            Self::InvalidQuantity { .. } => "invalid_quantity",
            Self::OfferLimitExceeded { .. } => "offer_limit_exceeded",
            Self::InvalidState { .. } => "invalid_state",
            Self::EmptyTrade { .. } => "empty_trade",
            Self::SelfTrade => "self_trade",
            Self::CommitConflict { .. } => "commit_conflict",
            Self::ConnectionSuperseded => "connection_superseded",
            Self::MalformedMessage { .. } => "malformed_message",
            Self::UnknownMessageType { .. } => "unknown_message_type",
            Self::RateLimited => "rate_limited",
            Self::InventoryUnavailable => "inventory_unavailable",
        }
    }

    /// Session the error refers to, if any
    #[must_use]
    pub fn trade_id(&self) -> Option<&TradeId> {
        match self {
            Self::SessionNotFound { trade_id }
            | Self::NotAParticipant { trade_id, .. }
            | Self::InvalidState { trade_id, .. }
            | Self::EmptyTrade { trade_id } => Some(trade_id),
            _ => None,
        }
    }
}

/// Type alias for live-trade results
pub type TradeResult<T> = Result<T, TradeError>;
