//! Trade engine
//!
//! Applies client commands to sessions and fans the resulting events out
//! through the connection manager. Every mutation, including the inventory
//! commit, runs while holding the session's lock. After taking the lock the
//! session is re-checked for a terminal state, since a concurrent cancel
//! may have ended it while this task waited.

use barterbay_common::{ItemId, Participant, TradeId, UserId};
use chrono::{DateTime, Utc};
use inventory_store::{InventoryError, InventoryStore};
use std::sync::Arc;
use tokio::sync::{OwnedMutexGuard, mpsc};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::config::SessionConfig;
use crate::connections::ConnectionManager;
use crate::error::{TradeError, TradeResult};
use crate::models::{CancelReason, ClientMessage, ServerEvent};
use crate::notifications::{Notification, NotificationKind, Notifier};
use crate::registry::SessionRegistry;
use crate::session::{ConfirmOutcome, TradeSession, TradeState};

type SessionGuard = OwnedMutexGuard<TradeSession>;

/// Live-trade business logic, independent of any transport
pub struct TradeEngine {
    registry: Arc<SessionRegistry>,
    connections: Arc<ConnectionManager<ServerEvent>>,
    inventory: Arc<dyn InventoryStore>,
    notifier: Arc<dyn Notifier>,
    config: SessionConfig,
}

impl TradeEngine {
    pub fn new(
        registry: Arc<SessionRegistry>,
        connections: Arc<ConnectionManager<ServerEvent>>,
        inventory: Arc<dyn InventoryStore>,
        notifier: Arc<dyn Notifier>,
        config: SessionConfig,
    ) -> Self {
        Self {
            registry,
            connections,
            inventory,
            notifier,
            config,
        }
    }

    #[must_use]
    pub fn registry(&self) -> &Arc<SessionRegistry> {
        &self.registry
    }

    #[must_use]
    pub fn connections(&self) -> &Arc<ConnectionManager<ServerEvent>> {
        &self.connections
    }

    /// Apply one decoded client message sent by `sender`.
    ///
    /// Errors are meant for the sender only; session state is unchanged
    /// whenever an error is returned.
    pub async fn handle_message(
        &self,
        sender: &Participant,
        message: ClientMessage,
    ) -> TradeResult<()> {
        match message {
            ClientMessage::TradeInvite {
                target_user_id,
                target_username,
            } => {
                let target = validate_target(target_user_id, target_username)?;
                self.invite(sender, target).map(|_| ())
            }
            ClientMessage::TradeAccept { trade_id } => self.accept(sender.id, &trade_id).await,
            ClientMessage::TradeDecline { trade_id } => self.decline(sender.id, &trade_id).await,
            ClientMessage::AddItem {
                trade_id,
                item_id,
                quantity,
            } => self.add_item(sender.id, &trade_id, item_id, quantity).await,
            ClientMessage::RemoveItem {
                trade_id,
                item_id,
                quantity,
            } => {
                self.remove_item(sender.id, &trade_id, item_id, quantity)
                    .await
            }
            ClientMessage::ConfirmTrade { trade_id } => self.confirm(sender.id, &trade_id).await,
            ClientMessage::CancelTrade { trade_id } => self.cancel(sender.id, &trade_id).await,
            // Answered by the gateway
            ClientMessage::Ping => Ok(()),
        }
    }

    /// Open a session and invite `target`
    pub fn invite(&self, initiator: &Participant, target: Participant) -> TradeResult<TradeId> {
        let (trade_id, _) = self
            .registry
            .create_session(initiator.clone(), target.clone())?;

        #[cfg(feature = "monitoring")]
        crate::metrics::get_metrics().record_session_opened();

        let delivered = self.connections.send(
            target.id,
            ServerEvent::TradeInviteReceived {
                trade_id: trade_id.clone(),
                from: initiator.clone(),
            },
        );
        if !delivered {
            self.notifier.notify(
                target.id,
                Notification::new(
                    NotificationKind::TradeInvite,
                    trade_id.clone(),
                    format!("{} wants to trade with you", initiator.username),
                ),
            );
        }

        info!(
            trade_id = %trade_id,
            initiator = %initiator,
            partner = %target,
            delivered,
            "Trade invite sent"
        );

        self.connections.send(
            initiator.id,
            ServerEvent::TradeInviteSent {
                trade_id: trade_id.clone(),
                to: target,
                delivered,
            },
        );
        Ok(trade_id)
    }

    pub async fn accept(&self, user_id: UserId, trade_id: &TradeId) -> TradeResult<()> {
        let mut session = self.lock_live(trade_id).await?;
        session.accept(user_id)?;

        info!(trade_id = %trade_id, "Trade started");
        self.send_both(
            &session,
            ServerEvent::TradeStarted {
                trade: session.snapshot(),
            },
        );
        Ok(())
    }

    pub async fn decline(&self, user_id: UserId, trade_id: &TradeId) -> TradeResult<()> {
        let mut session = self.lock_live(trade_id).await?;
        session.decline(user_id)?;
        self.finish(&session);

        info!(trade_id = %trade_id, by = %user_id, "Trade declined");
        self.send_both(
            &session,
            ServerEvent::TradeDeclined {
                trade_id: trade_id.clone(),
                by: user_id,
            },
        );
        Ok(())
    }

    pub async fn add_item(
        &self,
        user_id: UserId,
        trade_id: &TradeId,
        item_id: ItemId,
        quantity: u32,
    ) -> TradeResult<()> {
        let mut session = self.lock_live(trade_id).await?;

        // Skip the lookup when the session would reject the sender anyway
        let owned = if session.side_of(user_id).is_some()
            && session.state() == TradeState::Negotiating
        {
            self.owned_quantity(user_id, item_id).await?
        } else {
            0
        };

        session.add_item(user_id, item_id, quantity, owned, self.config.offer_limits())?;

        debug!(trade_id = %trade_id, user_id = %user_id, item_id = %item_id, quantity, "Item offered");
        self.send_both(
            &session,
            ServerEvent::TradeUpdated {
                trade: session.snapshot(),
            },
        );
        Ok(())
    }

    pub async fn remove_item(
        &self,
        user_id: UserId,
        trade_id: &TradeId,
        item_id: ItemId,
        quantity: Option<u32>,
    ) -> TradeResult<()> {
        let mut session = self.lock_live(trade_id).await?;
        session.remove_item(user_id, item_id, quantity)?;

        debug!(trade_id = %trade_id, user_id = %user_id, item_id = %item_id, ?quantity, "Item withdrawn");
        self.send_both(
            &session,
            ServerEvent::TradeUpdated {
                trade: session.snapshot(),
            },
        );
        Ok(())
    }

    /// Confirm the current offers; commits once both sides have confirmed
    pub async fn confirm(&self, user_id: UserId, trade_id: &TradeId) -> TradeResult<()> {
        let mut session = self.lock_live(trade_id).await?;

        match session.confirm(user_id)? {
            ConfirmOutcome::AlreadyConfirmed => {
                self.connections.send(
                    user_id,
                    ServerEvent::TradeUpdated {
                        trade: session.snapshot(),
                    },
                );
            }
            ConfirmOutcome::Pending => {
                debug!(trade_id = %trade_id, user_id = %user_id, "Trade confirmed by one side");
                self.send_both(
                    &session,
                    ServerEvent::TradeUpdated {
                        trade: session.snapshot(),
                    },
                );
            }
            ConfirmOutcome::ReadyToCommit => self.commit(&mut session).await,
        }
        Ok(())
    }

    pub async fn cancel(&self, user_id: UserId, trade_id: &TradeId) -> TradeResult<()> {
        let mut session = self.lock_live(trade_id).await?;
        session.cancel(user_id)?;
        self.finish(&session);

        info!(trade_id = %trade_id, by = %user_id, "Trade cancelled");
        self.send_both(
            &session,
            ServerEvent::TradeCancelled {
                trade_id: trade_id.clone(),
                reason: CancelReason::Cancelled,
                by: Some(user_id),
            },
        );
        Ok(())
    }

    /// Cancel the user's session after their connection went away
    pub async fn handle_disconnect(&self, user_id: UserId) {
        let Some(handle) = self.registry.active_session_for_user(user_id) else {
            return;
        };

        let mut session = handle.lock_owned().await;
        if session.is_terminal() || session.side_of(user_id).is_none() {
            return;
        }
        // Reconnected while the disconnect was queued
        if self.connections.is_connected(user_id) {
            debug!(user_id = %user_id, "Ignoring disconnect of reconnected user");
            return;
        }
        if let Err(err) = session.abort() {
            warn!(trade_id = %session.id(), error = %err, "Could not cancel after disconnect");
            return;
        }
        self.finish(&session);

        info!(trade_id = %session.id(), user_id = %user_id, "Trade cancelled by disconnect");
        let event = ServerEvent::TradeCancelled {
            trade_id: session.id().clone(),
            reason: CancelReason::ParticipantDisconnected,
            by: Some(user_id),
        };
        if let Some(side) = session.side_of(user_id) {
            self.connections.send(session.counterpart(side).id, event);
        }
    }

    /// Cancel sessions past their invite or idle timeout; returns the count
    pub async fn expire_stale(&self, now: DateTime<Utc>) -> usize {
        let mut expired = 0;

        for trade_id in self.registry.session_ids() {
            let Some(handle) = self.registry.get_session(&trade_id) else {
                continue;
            };
            let mut session = handle.lock_owned().await;

            let (age, limit) = match session.state() {
                TradeState::Invited => (now - session.created_at(), self.config.invite_timeout()),
                TradeState::Negotiating => (session.idle_for(now), self.config.idle_timeout()),
                _ => continue,
            };
            if age.to_std().unwrap_or_default() < limit {
                continue;
            }

            if session.abort().is_ok() {
                self.finish(&session);
                info!(trade_id = %trade_id, state = "expired", "Trade cancelled by timeout");
                self.send_both(
                    &session,
                    ServerEvent::TradeCancelled {
                        trade_id: trade_id.clone(),
                        reason: CancelReason::Expired,
                        by: None,
                    },
                );
                expired += 1;
            }
        }

        expired
    }

    /// Cancel every live session; used on shutdown
    pub async fn cancel_all(&self, reason: CancelReason) -> usize {
        let mut cancelled = 0;

        for trade_id in self.registry.session_ids() {
            let Some(handle) = self.registry.get_session(&trade_id) else {
                continue;
            };
            let mut session = handle.lock_owned().await;
            if session.is_terminal() || session.abort().is_err() {
                continue;
            }

            self.finish(&session);
            self.send_both(
                &session,
                ServerEvent::TradeCancelled {
                    trade_id,
                    reason,
                    by: None,
                },
            );
            cancelled += 1;
        }

        cancelled
    }

    /// Consume disconnect notices from the connection manager
    pub fn spawn_disconnect_listener(
        self: &Arc<Self>,
        mut disconnects: mpsc::UnboundedReceiver<UserId>,
    ) -> JoinHandle<()> {
        let engine = Arc::clone(self);
        tokio::spawn(async move {
            while let Some(user_id) = disconnects.recv().await {
                let engine = Arc::clone(&engine);
                tokio::spawn(async move { engine.handle_disconnect(user_id).await });
            }
        })
    }

    /// Periodic expiry sweep
    pub fn spawn_expiry_task(self: &Arc<Self>) -> JoinHandle<()> {
        let engine = Arc::clone(self);
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(engine.config.sweep_interval());

            loop {
                interval.tick().await;
                let expired = engine.expire_stale(Utc::now()).await;
                if expired > 0 {
                    info!(expired, "Expired stale trade sessions");
                }
            }
        })
    }

    async fn lock_live(&self, trade_id: &TradeId) -> TradeResult<SessionGuard> {
        let handle = self
            .registry
            .get_session(trade_id)
            .ok_or_else(|| not_found(trade_id))?;

        let session = handle.lock_owned().await;
        if session.is_terminal() {
            return Err(not_found(trade_id));
        }
        Ok(session)
    }

    async fn owned_quantity(&self, user_id: UserId, item_id: ItemId) -> TradeResult<u32> {
        self.inventory
            .quantity(user_id, item_id)
            .await
            .map_err(|err| {
                warn!(user_id = %user_id, item_id = %item_id, error = %err, "Inventory lookup failed");
                TradeError::InventoryUnavailable
            })
    }

    /// Run the inventory commit for a session in `COMMITTING`
    async fn commit(&self, session: &mut SessionGuard) {
        let trade_id = session.id().clone();
        let transfers = session.transfers();

        // Never dropped mid-flight; the store owns the time bound
        let failure = match self.inventory.check_and_transfer(&transfers).await {
            Ok(()) => None,
            Err(err) if err.is_conflict() => {
                warn!(trade_id = %trade_id, error = %err, "Trade commit conflict");
                Some(TradeError::CommitConflict {
                    reason: err.to_string(),
                })
            }
            Err(InventoryError::Timeout) => {
                error!(trade_id = %trade_id, timeout = ?self.config.commit_timeout(), "Trade commit timed out");
                Some(TradeError::CommitConflict {
                    reason: "inventory update timed out, please try again".to_string(),
                })
            }
            Err(err) => {
                error!(trade_id = %trade_id, error = %err, "Inventory backend failed during commit");
                Some(TradeError::CommitConflict {
                    reason: "inventory could not be updated, please try again".to_string(),
                })
            }
        };

        match failure {
            None => self.complete(session),
            Some(err) => self.fail(session, &err),
        }
    }

    fn complete(&self, session: &mut SessionGuard) {
        if let Err(err) = session.complete() {
            error!(trade_id = %session.id(), error = %err, "Commit applied but session could not complete");
            return;
        }
        self.finish(session);

        info!(
            trade_id = %session.id(),
            initiator = %session.initiator(),
            partner = %session.partner(),
            "Trade completed"
        );
        self.send_both(
            session,
            ServerEvent::TradeCompleted {
                trade: session.snapshot(),
            },
        );

        for (user, other) in [
            (session.initiator(), session.partner()),
            (session.partner(), session.initiator()),
        ] {
            self.notifier.notify(
                user.id,
                Notification::new(
                    NotificationKind::TradeCompleted,
                    session.id().clone(),
                    format!("Your trade with {} is complete", other.username),
                ),
            );
        }
    }

    fn fail(&self, session: &mut SessionGuard, err: &TradeError) {
        if let Err(state_err) = session.fail() {
            error!(trade_id = %session.id(), error = %state_err, "Session could not be failed");
            return;
        }
        self.finish(session);

        let reason = match err {
            TradeError::CommitConflict { reason } => reason.clone(),
            other => other.to_string(),
        };
        self.send_both(
            session,
            ServerEvent::TradeFailed {
                trade_id: session.id().clone(),
                reason,
            },
        );
    }

    /// Drop a session that just reached a terminal state
    fn finish(&self, session: &TradeSession) {
        self.registry.remove_session(session.id());

        #[cfg(feature = "monitoring")]
        crate::metrics::get_metrics().record_session_closed(session.state());
    }

    fn send_both(&self, session: &TradeSession, event: ServerEvent) {
        self.connections.send(session.initiator().id, event.clone());
        self.connections.send(session.partner().id, event);
    }
}

fn not_found(trade_id: &TradeId) -> TradeError {
    TradeError::SessionNotFound {
        trade_id: trade_id.clone(),
    }
}

fn validate_target(user_id: UserId, username: String) -> TradeResult<Participant> {
    let username = username.trim();
    if username.is_empty() || username.len() > barterbay_common::MAX_USERNAME_LEN {
        return Err(TradeError::MalformedMessage {
            reason: format!(
                "targetUsername must be 1 to {} characters",
                barterbay_common::MAX_USERNAME_LEN
            ),
        });
    }
    Ok(Participant::new(user_id, username))
}
