//! User → live connection bindings
//!
//! One binding per user; binding again supersedes the previous connection.
//! Delivery is best effort: a full or closed outbound buffer drops the
//! event and never blocks the caller.

use barterbay_common::UserId;
use dashmap::DashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

/// Process-unique connection identifier
pub type ConnectionId = u64;

/// Why the server is closing a connection
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CloseReason {
    /// A newer connection for the same user took over
    Superseded,
    Shutdown,
}

impl CloseReason {
    /// WebSocket close code
    #[must_use]
    pub const fn close_code(self) -> u16 {
        match self {
            Self::Superseded => barterbay_common::CLOSE_CODE_SUPERSEDED,
            Self::Shutdown => barterbay_common::CLOSE_CODE_SHUTDOWN,
        }
    }
}

/// Item on a connection's outbound queue
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outbound<E> {
    Event(E),
    Close(CloseReason),
}

struct Binding<E> {
    connection_id: ConnectionId,
    tx: mpsc::Sender<Outbound<E>>,
}

/// Registry of live connections, generic over the event type
pub struct ConnectionManager<E> {
    bindings: DashMap<UserId, Binding<E>>,
    next_id: AtomicU64,
    disconnect_tx: Option<mpsc::UnboundedSender<UserId>>,
}

impl<E> Default for ConnectionManager<E> {
    fn default() -> Self {
        Self {
            bindings: DashMap::new(),
            next_id: AtomicU64::new(1),
            disconnect_tx: None,
        }
    }
}

impl<E> ConnectionManager<E> {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Manager that reports every real disconnect on `disconnect_tx`
    #[must_use]
    pub fn with_disconnect_channel(disconnect_tx: mpsc::UnboundedSender<UserId>) -> Self {
        Self {
            disconnect_tx: Some(disconnect_tx),
            ..Self::default()
        }
    }

    /// Bind `user_id` to a new outbound queue, superseding any previous one
    pub fn bind(&self, user_id: UserId, tx: mpsc::Sender<Outbound<E>>) -> ConnectionId {
        let connection_id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let previous = self.bindings.insert(
            user_id,
            Binding {
                connection_id,
                tx,
            },
        );

        if let Some(previous) = previous {
            info!(
                user_id = %user_id,
                old_connection = previous.connection_id,
                new_connection = connection_id,
                "Connection superseded"
            );
            let _ = previous.tx.try_send(Outbound::Close(CloseReason::Superseded));
        } else {
            debug!(user_id = %user_id, connection_id, "Connection bound");
        }

        connection_id
    }

    /// Queue `event` for `user_id`; `false` when it could not be queued
    pub fn send(&self, user_id: UserId, event: E) -> bool {
        let Some(binding) = self.bindings.get(&user_id) else {
            return false;
        };

        match binding.tx.try_send(Outbound::Event(event)) {
            Ok(()) => true,
            Err(mpsc::error::TrySendError::Full(_)) => {
                warn!(user_id = %user_id, "Outbound buffer full, dropping event");
                false
            }
            Err(mpsc::error::TrySendError::Closed(_)) => false,
        }
    }

    /// Remove the binding if it still belongs to `connection_id`.
    ///
    /// Returns `true` and reports a disconnect only when the binding was
    /// removed; a superseded connection unbinding is a no-op.
    pub fn unbind(&self, user_id: UserId, connection_id: ConnectionId) -> bool {
        let removed = self
            .bindings
            .remove_if(&user_id, |_, binding| binding.connection_id == connection_id)
            .is_some();

        if removed {
            debug!(user_id = %user_id, connection_id, "Connection unbound");
            if let Some(disconnect_tx) = &self.disconnect_tx {
                let _ = disconnect_tx.send(user_id);
            }
        }
        removed
    }

    #[must_use]
    pub fn is_connected(&self, user_id: UserId) -> bool {
        self.bindings.contains_key(&user_id)
    }

    #[must_use]
    pub fn connection_count(&self) -> usize {
        self.bindings.len()
    }

    /// Ask every live connection to close
    pub fn close_all(&self, reason: CloseReason) {
        for binding in &self.bindings {
            let _ = binding.tx.try_send(Outbound::Close(reason));
        }
        info!(connections = self.bindings.len(), ?reason, "Closing all connections");
    }
}
