//! Per-user notification delivery
//!
//! Notifications go straight to a connected `/notifications` socket.
//! Anything that cannot be delivered is kept in a small per-user backlog
//! (oldest dropped first) and flushed when the user next connects.

use barterbay_common::{TradeId, UserId};
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use rustc_hash::FxHashMap;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::debug;

use crate::connections::{ConnectionId, ConnectionManager, Outbound};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NotificationKind {
    /// Invite sent while the target had no live-trade connection
    TradeInvite,
    TradeCompleted,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Notification {
    pub kind: NotificationKind,
    pub trade_id: TradeId,
    pub message: String,
    pub created_at: DateTime<Utc>,
}

impl Notification {
    #[must_use]
    pub fn new(kind: NotificationKind, trade_id: TradeId, message: impl Into<String>) -> Self {
        Self {
            kind,
            trade_id,
            message: message.into(),
            created_at: Utc::now(),
        }
    }
}

/// Fire-and-forget notification sink
pub trait Notifier: Send + Sync {
    fn notify(&self, user_id: UserId, notification: Notification);
}

/// Notifier backed by the `/notifications` socket and an offline backlog
pub struct NotificationHub {
    connections: Arc<ConnectionManager<Notification>>,
    backlog: Mutex<FxHashMap<UserId, VecDeque<Notification>>>,
    backlog_limit: usize,
}

impl NotificationHub {
    #[must_use]
    pub fn new(backlog_limit: usize) -> Self {
        Self {
            connections: Arc::new(ConnectionManager::new()),
            backlog: Mutex::new(FxHashMap::default()),
            backlog_limit,
        }
    }

    #[must_use]
    pub fn connections(&self) -> &Arc<ConnectionManager<Notification>> {
        &self.connections
    }

    /// Bind a notification socket and replay anything queued while offline
    pub fn connect(
        &self,
        user_id: UserId,
        tx: mpsc::Sender<Outbound<Notification>>,
    ) -> ConnectionId {
        let connection_id = self.connections.bind(user_id, tx);

        let pending = self.backlog.lock().remove(&user_id).unwrap_or_default();
        if !pending.is_empty() {
            debug!(user_id = %user_id, count = pending.len(), "Flushing notification backlog");
        }
        for notification in pending {
            if !self.connections.send(user_id, notification.clone()) {
                self.enqueue(user_id, notification);
            }
        }

        connection_id
    }

    pub fn disconnect(&self, user_id: UserId, connection_id: ConnectionId) {
        self.connections.unbind(user_id, connection_id);
    }

    /// Number of notifications waiting for `user_id`
    #[must_use]
    pub fn pending(&self, user_id: UserId) -> usize {
        self.backlog.lock().get(&user_id).map_or(0, VecDeque::len)
    }

    fn enqueue(&self, user_id: UserId, notification: Notification) {
        if self.backlog_limit == 0 {
            return;
        }

        let mut backlog = self.backlog.lock();
        let queue = backlog.entry(user_id).or_default();
        if queue.len() >= self.backlog_limit {
            queue.pop_front();
        }
        queue.push_back(notification);
    }
}

impl Notifier for NotificationHub {
    fn notify(&self, user_id: UserId, notification: Notification) {
        if !self.connections.send(user_id, notification.clone()) {
            self.enqueue(user_id, notification);
        }
    }
}
