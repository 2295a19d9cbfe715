//! Live-trade wire protocol
//!
//! JSON text frames tagged by `type`, with camelCase fields.

use barterbay_common::{ItemId, OfferLine, Participant, TradeId, UserId};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{TradeError, TradeResult};
use crate::session::TradeState;

/// Messages accepted from clients
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case", rename_all_fields = "camelCase")]
pub enum ClientMessage {
    TradeInvite {
        target_user_id: UserId,
        target_username: String,
    },
    TradeAccept {
        trade_id: TradeId,
    },
    TradeDecline {
        trade_id: TradeId,
    },
    AddItem {
        trade_id: TradeId,
        item_id: ItemId,
        quantity: u32,
    },
    RemoveItem {
        trade_id: TradeId,
        item_id: ItemId,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        quantity: Option<u32>,
    },
    ConfirmTrade {
        trade_id: TradeId,
    },
    CancelTrade {
        trade_id: TradeId,
    },
    Ping,
}

impl ClientMessage {
    /// Every recognised `type` tag
    pub const TYPES: [&'static str; 8] = [
        "trade_invite",
        "trade_accept",
        "trade_decline",
        "add_item",
        "remove_item",
        "confirm_trade",
        "cancel_trade",
        "ping",
    ];

    /// Decode a text frame.
    ///
    /// Unknown tags are reported separately from frames that fail to parse.
    pub fn decode(text: &str) -> TradeResult<Self> {
        let value: Value = serde_json::from_str(text).map_err(malformed)?;

        let message_type = match value.get("type") {
            Some(Value::String(message_type)) => message_type.clone(),
            Some(_) => {
                return Err(TradeError::MalformedMessage {
                    reason: "\"type\" must be a string".to_string(),
                });
            }
            None => {
                return Err(TradeError::MalformedMessage {
                    reason: "missing \"type\" field".to_string(),
                });
            }
        };

        if !Self::TYPES.contains(&message_type.as_str()) {
            return Err(TradeError::UnknownMessageType { message_type });
        }

        serde_json::from_value(value).map_err(malformed)
    }

    #[must_use]
    pub const fn message_type(&self) -> &'static str {
        match self {
            Self::TradeInvite { .. } => "trade_invite",
            Self::TradeAccept { .. } => "trade_accept",
            Self::TradeDecline { .. } => "trade_decline",
            Self::AddItem { .. } => "add_item",
            Self::RemoveItem { .. } => "remove_item",
            Self::ConfirmTrade { .. } => "confirm_trade",
            Self::CancelTrade { .. } => "cancel_trade",
            Self::Ping => "ping",
        }
    }
}

fn malformed(err: serde_json::Error) -> TradeError {
    TradeError::MalformedMessage {
        reason: err.to_string(),
    }
}

/// Wire view of a session
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TradeSnapshot {
    pub trade_id: TradeId,
    pub state: TradeState,
    pub initiator: Participant,
    pub partner: Participant,
    pub initiator_offer: Vec<OfferLine>,
    pub partner_offer: Vec<OfferLine>,
    pub initiator_confirmed: bool,
    pub partner_confirmed: bool,
    /// Unix milliseconds
    pub updated_at: i64,
}

/// Why a session was cancelled
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CancelReason {
    /// A participant sent `cancel_trade`
    Cancelled,
    ParticipantDisconnected,
    /// Invite or idle timeout
    Expired,
    Shutdown,
}

/// Events pushed to clients
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case", rename_all_fields = "camelCase")]
pub enum ServerEvent {
    TradeInviteReceived {
        trade_id: TradeId,
        from: Participant,
    },
    TradeInviteSent {
        trade_id: TradeId,
        to: Participant,
        /// Whether the target had a live connection
        delivered: bool,
    },
    TradeStarted {
        trade: TradeSnapshot,
    },
    TradeDeclined {
        trade_id: TradeId,
        by: UserId,
    },
    TradeUpdated {
        trade: TradeSnapshot,
    },
    TradeCompleted {
        trade: TradeSnapshot,
    },
    TradeCancelled {
        trade_id: TradeId,
        reason: CancelReason,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        by: Option<UserId>,
    },
    TradeFailed {
        trade_id: TradeId,
        reason: String,
    },
    Error {
        code: String,
        message: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        trade_id: Option<TradeId>,
    },
    Pong,
}

impl ServerEvent {
    /// Error event for a rejected request
    #[must_use]
    pub fn error(err: &TradeError) -> Self {
        Self::Error {
            code: err.code().to_string(),
            message: err.to_string(),
            trade_id: err.trade_id().cloned(),
        }
    }

    #[must_use]
    pub const fn event_type(&self) -> &'static str {
        match self {
            Self::TradeInviteReceived { .. } => "trade_invite_received",
            Self::TradeInviteSent { .. } => "trade_invite_sent",
            Self::TradeStarted { .. } => "trade_started",
            Self::TradeDeclined { .. } => "trade_declined",
            Self::TradeUpdated { .. } => "trade_updated",
            Self::TradeCompleted { .. } => "trade_completed",
            Self::TradeCancelled { .. } => "trade_cancelled",
            Self::TradeFailed { .. } => "trade_failed",
            Self::Error { .. } => "error",
            Self::Pong => "pong",
        }
    }
}
