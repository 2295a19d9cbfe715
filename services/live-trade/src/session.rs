//! Trade session state machine
//!
//! A [`TradeSession`] is pure data plus guarded transitions. It knows
//! nothing about sockets, locks or the inventory backend: callers pass in
//! the sender's owned quantity when offering and perform the commit
//! themselves between [`TradeSession::confirm`] returning
//! [`ConfirmOutcome::ReadyToCommit`] and [`TradeSession::complete`] /
//! [`TradeSession::fail`].
//!
//! ```text
//! INVITED ──accept──▶ NEGOTIATING ──both confirm──▶ COMMITTING ──▶ COMPLETED
//!    │                    │                                    └──▶ FAILED
//!    └──decline/cancel────┴──cancel/disconnect/expiry──▶ CANCELLED
//! ```

use barterbay_common::{ItemId, OfferLine, Participant, TradeId, Transfer, UserId};
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use tracing::debug;

use crate::error::{TradeError, TradeResult};
use crate::models::TradeSnapshot;

/// Session lifecycle state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TradeState {
    Invited,
    Negotiating,
    Committing,
    Completed,
    Cancelled,
    Failed,
}

impl TradeState {
    /// No further transitions are possible
    #[must_use]
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Cancelled | Self::Failed)
    }

    /// Legal transition table
    #[must_use]
    pub const fn can_transition_to(self, next: Self) -> bool {
        matches!(
            (self, next),
            (Self::Invited, Self::Negotiating | Self::Cancelled)
                | (Self::Negotiating, Self::Committing | Self::Cancelled)
                | (Self::Committing, Self::Completed | Self::Failed)
        )
    }

    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Invited => "INVITED",
            Self::Negotiating => "NEGOTIATING",
            Self::Committing => "COMMITTING",
            Self::Completed => "COMPLETED",
            Self::Cancelled => "CANCELLED",
            Self::Failed => "FAILED",
        }
    }
}

impl fmt::Display for TradeState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Which side of the session a user is on
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Side {
    Initiator,
    Partner,
}

impl Side {
    #[must_use]
    pub const fn other(self) -> Self {
        match self {
            Self::Initiator => Self::Partner,
            Self::Partner => Self::Initiator,
        }
    }
}

/// Result of a confirmation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfirmOutcome {
    /// Flag set, waiting for the other side
    Pending,
    /// Sender had already confirmed; nothing changed
    AlreadyConfirmed,
    /// Both flags set; session is now COMMITTING
    ReadyToCommit,
}

/// Per-offer limits
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OfferLimits {
    pub max_lines: usize,
    pub max_line_quantity: u32,
}

impl Default for OfferLimits {
    fn default() -> Self {
        Self {
            max_lines: barterbay_common::DEFAULT_MAX_OFFER_LINES,
            max_line_quantity: barterbay_common::DEFAULT_MAX_LINE_QUANTITY,
        }
    }
}

/// One live-trade negotiation between exactly two users
#[derive(Debug, Clone)]
pub struct TradeSession {
    id: TradeId,
    initiator: Participant,
    partner: Participant,
    state: TradeState,
    initiator_offer: Vec<OfferLine>,
    partner_offer: Vec<OfferLine>,
    initiator_confirmed: bool,
    partner_confirmed: bool,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl TradeSession {
    /// Create a session in `INVITED`
    #[must_use]
    pub fn new(id: TradeId, initiator: Participant, partner: Participant) -> Self {
        let now = Utc::now();
        Self {
            id,
            initiator,
            partner,
            state: TradeState::Invited,
            initiator_offer: Vec::new(),
            partner_offer: Vec::new(),
            initiator_confirmed: false,
            partner_confirmed: false,
            created_at: now,
            updated_at: now,
        }
    }

    #[must_use]
    pub const fn id(&self) -> &TradeId {
        &self.id
    }

    #[must_use]
    pub const fn initiator(&self) -> &Participant {
        &self.initiator
    }

    #[must_use]
    pub const fn partner(&self) -> &Participant {
        &self.partner
    }

    #[must_use]
    pub const fn state(&self) -> TradeState {
        self.state
    }

    #[must_use]
    pub const fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    #[must_use]
    pub const fn updated_at(&self) -> DateTime<Utc> {
        self.updated_at
    }

    #[must_use]
    pub const fn is_terminal(&self) -> bool {
        self.state.is_terminal()
    }

    /// Side of `user_id`, if it participates
    #[must_use]
    pub fn side_of(&self, user_id: UserId) -> Option<Side> {
        if self.initiator.id == user_id {
            Some(Side::Initiator)
        } else if self.partner.id == user_id {
            Some(Side::Partner)
        } else {
            None
        }
    }

    #[must_use]
    pub const fn participant(&self, side: Side) -> &Participant {
        match side {
            Side::Initiator => &self.initiator,
            Side::Partner => &self.partner,
        }
    }

    /// The participant opposite `side`
    #[must_use]
    pub const fn counterpart(&self, side: Side) -> &Participant {
        self.participant(side.other())
    }

    #[must_use]
    pub fn offer(&self, side: Side) -> &[OfferLine] {
        match side {
            Side::Initiator => &self.initiator_offer,
            Side::Partner => &self.partner_offer,
        }
    }

    #[must_use]
    pub const fn confirmed(&self, side: Side) -> bool {
        match side {
            Side::Initiator => self.initiator_confirmed,
            Side::Partner => self.partner_confirmed,
        }
    }

    /// Quantity of `item_id` currently on `side`'s offer
    #[must_use]
    pub fn offered_quantity(&self, side: Side, item_id: ItemId) -> u32 {
        self.offer(side)
            .iter()
            .find(|line| line.item_id == item_id)
            .map_or(0, |line| line.quantity)
    }

    /// Time since the last mutation
    #[must_use]
    pub fn idle_for(&self, now: DateTime<Utc>) -> Duration {
        now - self.updated_at
    }

    /// Partner accepts the invitation
    pub fn accept(&mut self, user_id: UserId) -> TradeResult<()> {
        let side = self.require_side(user_id)?;
        self.require_state(TradeState::Invited, "accept")?;
        self.require_partner(side, user_id)?;
        self.transition(TradeState::Negotiating, "accept")
    }

    /// Partner declines the invitation
    pub fn decline(&mut self, user_id: UserId) -> TradeResult<()> {
        let side = self.require_side(user_id)?;
        self.require_state(TradeState::Invited, "decline")?;
        self.require_partner(side, user_id)?;
        self.transition(TradeState::Cancelled, "decline")
    }

    /// Add `quantity` units of `item_id` to the sender's own offer.
    ///
    /// `owned` is the sender's current holding; the resulting line may not
    /// exceed it. An existing line for the same item is incremented.
    pub fn add_item(
        &mut self,
        user_id: UserId,
        item_id: ItemId,
        quantity: u32,
        owned: u32,
        limits: OfferLimits,
    ) -> TradeResult<()> {
        let side = self.require_side(user_id)?;
        self.require_state(TradeState::Negotiating, "add items")?;

        if quantity == 0 {
            return Err(TradeError::InvalidQuantity {
                reason: "quantity must be positive".to_string(),
            });
        }

        let current = self.offered_quantity(side, item_id);
        let requested = u64::from(current) + u64::from(quantity);
        if requested > u64::from(limits.max_line_quantity) {
            return Err(TradeError::InvalidQuantity {
                reason: format!("at most {} units per item", limits.max_line_quantity),
            });
        }
        if requested > u64::from(owned) {
            return Err(TradeError::ItemUnavailable {
                item_id,
                requested,
                available: u64::from(owned),
            });
        }

        let offer = self.offer_mut(side);
        match offer.iter_mut().find(|line| line.item_id == item_id) {
            // Bounded by max_line_quantity above
            Some(line) => line.quantity = requested as u32,
            None => {
                if offer.len() >= limits.max_lines {
                    return Err(TradeError::OfferLimitExceeded {
                        limit: limits.max_lines,
                    });
                }
                offer.push(OfferLine::new(item_id, quantity));
            }
        }

        self.offers_changed();
        Ok(())
    }

    /// Remove units of `item_id` from the sender's own offer.
    ///
    /// `None`, or a quantity at least the offered amount, drops the line.
    pub fn remove_item(
        &mut self,
        user_id: UserId,
        item_id: ItemId,
        quantity: Option<u32>,
    ) -> TradeResult<()> {
        let side = self.require_side(user_id)?;
        self.require_state(TradeState::Negotiating, "remove items")?;

        if quantity == Some(0) {
            return Err(TradeError::InvalidQuantity {
                reason: "quantity must be positive".to_string(),
            });
        }

        let offer = self.offer_mut(side);
        let index = offer
            .iter()
            .position(|line| line.item_id == item_id)
            .ok_or(TradeError::ItemNotOffered { item_id })?;

        match quantity {
            Some(qty) if qty < offer[index].quantity => offer[index].quantity -= qty,
            _ => {
                offer.remove(index);
            }
        }

        self.offers_changed();
        Ok(())
    }

    /// Set the sender's confirmation flag.
    ///
    /// Re-confirming is a no-op. When both flags are set the session moves
    /// to `COMMITTING` and the caller must run the commit.
    pub fn confirm(&mut self, user_id: UserId) -> TradeResult<ConfirmOutcome> {
        let side = self.require_side(user_id)?;
        self.require_state(TradeState::Negotiating, "confirm")?;

        if self.confirmed(side) {
            return Ok(ConfirmOutcome::AlreadyConfirmed);
        }
        if self.initiator_offer.is_empty() && self.partner_offer.is_empty() {
            return Err(TradeError::EmptyTrade {
                trade_id: self.id.clone(),
            });
        }

        match side {
            Side::Initiator => self.initiator_confirmed = true,
            Side::Partner => self.partner_confirmed = true,
        }
        self.touch();

        if self.initiator_confirmed && self.partner_confirmed {
            self.transition(TradeState::Committing, "commit")?;
            Ok(ConfirmOutcome::ReadyToCommit)
        } else {
            Ok(ConfirmOutcome::Pending)
        }
    }

    /// Participant cancels before commit
    pub fn cancel(&mut self, user_id: UserId) -> TradeResult<()> {
        self.require_side(user_id)?;
        self.transition(TradeState::Cancelled, "cancel")
    }

    /// System cancel (disconnect, expiry, shutdown)
    pub fn abort(&mut self) -> TradeResult<()> {
        self.transition(TradeState::Cancelled, "cancel")
    }

    /// Commit succeeded
    pub fn complete(&mut self) -> TradeResult<()> {
        self.transition(TradeState::Completed, "complete")
    }

    /// Commit failed
    pub fn fail(&mut self) -> TradeResult<()> {
        self.transition(TradeState::Failed, "fail")
    }

    /// Transfers that settle the current offers
    #[must_use]
    pub fn transfers(&self) -> Vec<Transfer> {
        let give = |from: &Participant, to: &Participant, offer: &[OfferLine]| {
            offer
                .iter()
                .map(|line| Transfer::new(from.id, to.id, line.item_id, line.quantity))
                .collect::<Vec<_>>()
        };

        let mut transfers = give(&self.initiator, &self.partner, &self.initiator_offer);
        transfers.extend(give(&self.partner, &self.initiator, &self.partner_offer));
        transfers
    }

    /// Wire view of the session
    #[must_use]
    pub fn snapshot(&self) -> TradeSnapshot {
        TradeSnapshot {
            trade_id: self.id.clone(),
            state: self.state,
            initiator: self.initiator.clone(),
            partner: self.partner.clone(),
            initiator_offer: self.initiator_offer.clone(),
            partner_offer: self.partner_offer.clone(),
            initiator_confirmed: self.initiator_confirmed,
            partner_confirmed: self.partner_confirmed,
            updated_at: self.updated_at.timestamp_millis(),
        }
    }

    fn offer_mut(&mut self, side: Side) -> &mut Vec<OfferLine> {
        match side {
            Side::Initiator => &mut self.initiator_offer,
            Side::Partner => &mut self.partner_offer,
        }
    }

    fn offers_changed(&mut self) {
        self.initiator_confirmed = false;
        self.partner_confirmed = false;
        self.touch();
    }

    fn touch(&mut self) {
        self.updated_at = Utc::now();
    }

    fn require_side(&self, user_id: UserId) -> TradeResult<Side> {
        self.side_of(user_id).ok_or_else(|| TradeError::NotAParticipant {
            trade_id: self.id.clone(),
            user_id,
        })
    }

    fn require_partner(&self, side: Side, user_id: UserId) -> TradeResult<()> {
        if side == Side::Partner {
            Ok(())
        } else {
            Err(TradeError::NotAParticipant {
                trade_id: self.id.clone(),
                user_id,
            })
        }
    }

    fn require_state(&self, expected: TradeState, operation: &'static str) -> TradeResult<()> {
        if self.state == expected {
            Ok(())
        } else {
            Err(self.invalid_state(operation))
        }
    }

    fn invalid_state(&self, operation: &'static str) -> TradeError {
        TradeError::InvalidState {
            trade_id: self.id.clone(),
            operation,
            state: self.state,
        }
    }

    fn transition(&mut self, next: TradeState, operation: &'static str) -> TradeResult<()> {
        if !self.state.can_transition_to(next) {
            return Err(self.invalid_state(operation));
        }

        debug!(trade_id = %self.id, from = %self.state, to = %next, "Trade transition");
        self.state = next;
        self.touch();
        Ok(())
    }
}
